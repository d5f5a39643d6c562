//! Extraction: parsed blocks become the editable clean-text mapping plus the metadata side-file
//! that a merge needs to put the script back together.

use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::artifact::{
    read_mapping, read_script, write_json_atomic, ArtifactPaths, EntryType, ExtractedScript,
    MetadataFile, ScriptText, TextEntry, TextMapping, METADATA_VERSION,
};
use crate::error::ParseWarning;
use crate::ir::{block_id, BlockKind, BlockMetadata, ReconstructionTemplate};
use crate::markup::strip;
use crate::script::{parse_script, ParsedBlock};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractReport {
    pub blocks: usize,
    pub translatable: usize,
    pub separators: usize,
    /// Ids of blocks whose markup could not be stripped; they are passed through unchanged.
    pub malformed: Vec<String>,
    pub warnings: Vec<ParseWarning>,
    /// Entries whose translation was already present in the script.
    pub prefilled: usize,
    /// Entries whose translation came from a previous mapping.
    pub carried_over: usize,
}

#[derive(Clone, Debug)]
pub struct Extraction {
    pub script: ExtractedScript,
    pub report: ExtractReport,
}

pub fn extract_script(
    script: &ScriptText,
    source_name: &str,
    previous: Option<&TextMapping>,
) -> Extraction {
    let parsed = parse_script(&script.text);
    let mut report = ExtractReport {
        warnings: parsed.warnings.clone(),
        ..ExtractReport::default()
    };
    let mut mapping = TextMapping::new();
    let mut blocks: IndexMap<String, BlockMetadata> = IndexMap::new();

    for (idx, pb) in parsed.blocks.into_iter().enumerate() {
        let ordinal = idx + 1;
        let id = block_id(ordinal, pb.kind, pb.speaker.as_deref());
        report.blocks += 1;
        if !pb.kind.is_translatable() {
            report.separators += 1;
            mapping.insert(id.clone(), separator_entry());
            blocks.insert(id, separator_metadata(pb));
            continue;
        }

        // An existing translation with broken markup would otherwise be dropped from the mapping
        // and lost on the next merge, so it marks the whole block malformed like a broken source.
        let prepared = strip(&pb.source).map_err(|e| e.to_string()).and_then(|src| {
            match pb.existing.as_deref().map(strip).transpose() {
                Ok(existing) => Ok((src, existing.map(|s| s.clean).unwrap_or_default())),
                Err(e) => Err(format!("existing translation: {e}")),
            }
        });

        match prepared {
            Ok((stripped, target_text)) => {
                report.translatable += 1;
                if !target_text.is_empty() {
                    report.prefilled += 1;
                }
                mapping.insert(
                    id.clone(),
                    TextEntry {
                        source_text: stripped.clean,
                        target_text,
                        speaker: pb.speaker.clone(),
                        entry_type: None,
                    },
                );
                blocks.insert(
                    id,
                    BlockMetadata {
                        kind: pb.kind,
                        speaker: pb.speaker,
                        tag_records: stripped.tags,
                        reconstruction_template: pb.template,
                        warning: None,
                    },
                );
            }
            Err(err) => {
                let warning = ParseWarning::new(pb.line, format!("{id}: {err}"));
                warn!(block = %id, line = pb.line, error = %err, "malformed markup; block passed through");
                report.warnings.push(warning.clone());
                report.malformed.push(id.clone());
                mapping.insert(
                    id.clone(),
                    TextEntry {
                        source_text: pb.source.clone(),
                        target_text: String::new(),
                        speaker: pb.speaker.clone(),
                        entry_type: Some(EntryType::Malformed),
                    },
                );
                blocks.insert(
                    id,
                    BlockMetadata {
                        kind: pb.kind,
                        speaker: pb.speaker,
                        tag_records: Vec::new(),
                        reconstruction_template: ReconstructionTemplate::Verbatim { raw: pb.raw },
                        warning: Some(warning),
                    },
                );
            }
        }
    }

    if let Some(prev) = previous {
        report.carried_over = carry_over(&mut mapping, prev);
    }

    let metadata = MetadataFile {
        version: METADATA_VERSION,
        source: source_name.to_string(),
        language: parsed.language,
        source_digest: script.digest.clone(),
        bom: script.bom,
        blocks,
    };
    Extraction {
        script: ExtractedScript { mapping, metadata },
        report,
    }
}

fn separator_entry() -> TextEntry {
    TextEntry {
        entry_type: Some(EntryType::Separator),
        ..TextEntry::default()
    }
}

fn separator_metadata(pb: ParsedBlock) -> BlockMetadata {
    BlockMetadata {
        kind: BlockKind::Separator,
        speaker: None,
        tag_records: Vec::new(),
        reconstruction_template: ReconstructionTemplate::Verbatim { raw: pb.raw },
        warning: pb.warning,
    }
}

/// Copies translations from an earlier mapping of the same script.
///
/// An entry first takes the translation stored under its own id when the source text is unchanged;
/// otherwise the first unused previous entry with the same source text and speaker is used, which
/// follows lines that moved when blocks were inserted above them.
fn carry_over(mapping: &mut TextMapping, previous: &TextMapping) -> usize {
    let mut used: HashSet<&str> = HashSet::new();
    let mut pending: Vec<String> = Vec::new();
    let mut carried = 0usize;

    for (id, entry) in mapping.iter_mut() {
        if !entry.is_translatable() {
            continue;
        }
        match previous.get_key_value(id) {
            Some((pid, prev))
                if prev.is_translatable()
                    && prev.source_text == entry.source_text
                    && !prev.target_text.is_empty() =>
            {
                entry.target_text = prev.target_text.clone();
                used.insert(pid.as_str());
                carried += 1;
            }
            _ => pending.push(id.clone()),
        }
    }

    for id in pending {
        let Some(entry) = mapping.get_mut(&id) else {
            continue;
        };
        let found = previous.iter().find(|(pid, prev)| {
            !used.contains(pid.as_str())
                && prev.is_translatable()
                && !prev.target_text.is_empty()
                && prev.source_text == entry.source_text
                && prev.speaker == entry.speaker
        });
        if let Some((pid, prev)) = found {
            debug!(block = %id, from = %pid, "carried translation from moved block");
            entry.target_text = prev.target_text.clone();
            used.insert(pid.as_str());
            carried += 1;
        }
    }
    carried
}

/// Where extraction takes earlier translations from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CarryOver<'a> {
    /// The mapping already at the output path, when there is one. Translations edited into it
    /// survive re-extraction.
    Existing,
    /// A mapping extracted from an older version of the script.
    From(&'a Path),
    /// Start from the script alone and replace whatever is at the output path.
    Fresh,
}

/// Extracts `script_path` and writes both artifacts.
pub fn extract_file(
    script_path: &Path,
    outputs: &ArtifactPaths,
    carry: CarryOver<'_>,
) -> anyhow::Result<ExtractReport> {
    let script = read_script(script_path)?;
    let previous = match carry {
        CarryOver::Existing if outputs.text_json.exists() => Some(
            read_mapping(&outputs.text_json)
                .context("existing text mapping is unreadable; re-extract with --force")?,
        ),
        CarryOver::From(path) => Some(read_mapping(path)?),
        CarryOver::Existing | CarryOver::Fresh => None,
    };
    let source_name = script_path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();
    let extraction = extract_script(&script, &source_name, previous.as_ref());

    write_json_atomic(&outputs.text_json, &extraction.script.mapping)?;
    write_json_atomic(&outputs.meta_json, &extraction.script.metadata)?;
    let r = &extraction.report;
    info!(
        script = %script_path.display(),
        blocks = r.blocks,
        translatable = r.translatable,
        malformed = r.malformed.len(),
        warnings = r.warnings.len(),
        prefilled = r.prefilled,
        carried_over = r.carried_over,
        "extracted"
    );
    Ok(extraction.report)
}

#[cfg(test)]
mod tests {
    use super::extract_script;
    use crate::artifact::{decode_script, EntryType, TextMapping};
    use crate::ir::{BlockKind, TagKind};
    use crate::merge::{merge_script, MergeOptions};

    const SCRIPT: &str = "translate french start_1:

    # e \"Hi, [player_name]! {b}Welcome{/b}.\"
    e \"Hi, [player_name]! {b}Welcome{/b}.\"

    # \"It was {i}quiet{/i}.\"
    \"It was {i}quiet{/i}.\"
";

    fn ids(m: &TextMapping) -> Vec<&str> {
        m.keys().map(String::as_str).collect()
    }

    #[test]
    fn mapping_and_metadata_share_ids_in_order() {
        let ex = extract_script(&decode_script(SCRIPT.as_bytes()), "script.rpy", None);
        let m = &ex.script.mapping;
        assert_eq!(
            ids(m),
            vec!["00001-sep", "00002-e", "00003-sep", "00004-narration"]
        );
        let meta_ids: Vec<&str> = ex.script.metadata.blocks.keys().map(String::as_str).collect();
        assert_eq!(meta_ids, ids(m));

        let e = &m["00002-e"];
        assert_eq!(e.source_text, "Hi, [player_name]! Welcome.");
        assert_eq!(e.target_text, "");
        assert_eq!(e.speaker.as_deref(), Some("e"));

        let meta = &ex.script.metadata.blocks["00002-e"];
        let kinds: Vec<TagKind> = meta.tag_records.iter().map(|t| t.kind).collect();
        assert_eq!(kinds, vec![TagKind::Placeholder, TagKind::Open, TagKind::Close]);
        assert_eq!(ex.script.metadata.language.as_deref(), Some("french"));
        assert_eq!(ex.report.translatable, 2);
        assert_eq!(ex.report.separators, 2);
    }

    #[test]
    fn re_extraction_is_stable() {
        let a = extract_script(&decode_script(SCRIPT.as_bytes()), "s.rpy", None);
        let b = extract_script(&decode_script(SCRIPT.as_bytes()), "s.rpy", None);
        assert_eq!(a.script.mapping, b.script.mapping);
        assert_eq!(a.script.metadata, b.script.metadata);
    }

    #[test]
    fn malformed_markup_is_reported_and_kept_verbatim() {
        let src = "translate french a:\n    e \"Broken {b tag\"\n    e \"Fine\"\n";
        let ex = extract_script(&decode_script(src.as_bytes()), "s.rpy", None);
        assert_eq!(ex.report.malformed, vec!["00002-e".to_string()]);
        let entry = &ex.script.mapping["00002-e"];
        assert_eq!(entry.entry_type, Some(EntryType::Malformed));
        assert_eq!(entry.source_text, "Broken {b tag");
        let blocks = ex.script.blocks();
        let ordinals: Vec<usize> = blocks.iter().map(|b| b.ordinal).collect();
        assert_eq!(ordinals, vec![1, 2, 3]);
        assert!(blocks[1].malformed);
        assert!(!blocks[1].needs_translation());
        assert!(blocks[2].needs_translation());
        assert_eq!(blocks[2].kind, BlockKind::Dialogue);
    }

    #[test]
    fn existing_translations_are_prefilled() {
        let src = "translate french a:\n    # e \"Hello {b}you{/b}\"\n    e \"Bonjour {b}toi{/b}\"\n";
        let ex = extract_script(&decode_script(src.as_bytes()), "s.rpy", None);
        let e = &ex.script.mapping["00002-e"];
        assert_eq!(e.source_text, "Hello you");
        assert_eq!(e.target_text, "Bonjour toi");
        assert_eq!(ex.report.prefilled, 1);
    }

    #[test]
    fn malformed_existing_translation_marks_the_block_malformed() {
        let src = "translate french a:\n    # e \"Hello {b}you{/b}\"\n    e \"Bonjour {b toi\"\n";
        let ex = extract_script(&decode_script(src.as_bytes()), "s.rpy", None);
        assert_eq!(ex.report.malformed, vec!["00002-e".to_string()]);
        assert_eq!(ex.report.prefilled, 0);
        assert!(ex.report.warnings.iter().any(|w| w.message.contains("existing translation")));
        let e = &ex.script.mapping["00002-e"];
        assert_eq!(e.entry_type, Some(EntryType::Malformed));
        assert_eq!(e.source_text, "Hello {b}you{/b}");

        let (out, report) = merge_script(&ex.script, MergeOptions::default());
        assert_eq!(out, src);
        assert!(report.is_clean(), "{:?}", report.errors);
    }

    #[test]
    fn previous_translations_follow_moved_blocks() {
        let first = extract_script(&decode_script(SCRIPT.as_bytes()), "s.rpy", None);
        let mut prev = first.script.mapping.clone();
        prev["00002-e"].target_text = "Salut, [player_name]! Bienvenue.".to_string();
        prev["00004-narration"].target_text = "C'était calme.".to_string();

        let edited = SCRIPT.replace(
            "translate french start_1:\n",
            "translate french start_1:\n\n    # e \"New line\"\n    e \"New line\"\n",
        );
        let second = extract_script(&decode_script(edited.as_bytes()), "s.rpy", Some(&prev));
        assert_eq!(second.report.carried_over, 2);
        let m = &second.script.mapping;
        assert_eq!(m["00002-e"].target_text, "");
        assert_eq!(m["00004-e"].target_text, "Salut, [player_name]! Bienvenue.");
        assert_eq!(m["00006-narration"].target_text, "C'était calme.");
    }
}
