//! Rebuilds a script from its metadata and an edited clean-text mapping.

use std::path::Path;

use anyhow::{anyhow, Context};
use serde::Serialize;
use tracing::{info, warn};

use crate::artifact::{decode_script, write_atomic, ArtifactPaths, ExtractedScript, TextEntry};
use crate::error::{ValidationError, ValidationRule};
use crate::extract::extract_script;
use crate::ir::{BlockMetadata, ReconstructionTemplate, StatementTemplate};
use crate::markup::{
    check_balance, check_placeholders, placeholder_counts, placeholders, restore_unchecked, strip,
};
use crate::script::lexer::{escape, statement_reads_back, unescape};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeOptions {
    pub skip_validation: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    pub blocks: usize,
    /// Statements emitted from a non-empty `targetText`.
    pub translated: usize,
    /// Statements whose `targetText` was empty and were emitted as the script had them.
    pub untranslated: usize,
    /// Statements whose translation could not be restored and were emitted as they were.
    pub fallback_source: Vec<String>,
    pub errors: Vec<ValidationError>,
}

impl MergeReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

struct Merger {
    opts: MergeOptions,
    report: MergeReport,
    out: String,
}

/// Merges in ordinal order. The output is always produced; problems land in the report.
pub fn merge_script(script: &ExtractedScript, opts: MergeOptions) -> (String, MergeReport) {
    let mut m = Merger {
        opts,
        report: MergeReport::default(),
        out: String::new(),
    };

    for (id, meta) in &script.metadata.blocks {
        m.report.blocks += 1;
        match &meta.reconstruction_template {
            ReconstructionTemplate::Verbatim { raw } => m.out.push_str(raw),
            ReconstructionTemplate::Statement(t) => match script.mapping.get(id) {
                Some(entry) => m.statement(id, meta, t, entry),
                None => {
                    m.fail(id, ValidationRule::MissingEntry, "no entry in the text mapping", "", "");
                    m.out.push_str(&t.render(&t.source_literal));
                }
            },
        }
    }

    if !opts.skip_validation {
        for (id, entry) in &script.mapping {
            if !script.metadata.blocks.contains_key(id) {
                m.fail(
                    id,
                    ValidationRule::OrphanEntry,
                    "entry has no metadata",
                    &entry.source_text,
                    &entry.target_text,
                );
            }
        }
    }
    (m.out, m.report)
}

impl Merger {
    fn statement(&mut self, id: &str, meta: &BlockMetadata, t: &StatementTemplate, entry: &TextEntry) {
        // Untranslated lines keep whatever the script holds, usually a copy of the source.
        if entry.target_text.is_empty() {
            self.report.untranslated += 1;
            self.out.push_str(&t.render(&t.source_literal));
            return;
        }
        self.report.translated += 1;
        let target = entry.target_text.as_str();

        if !self.opts.skip_validation {
            if let Err(e) = check_placeholders(target, &meta.tag_records) {
                warn!(block = %id, error = %e, "translation rejected; keeping the original line");
                self.report.fallback_source.push(id.to_string());
                self.record(id, ValidationRule::MissingPlaceholder, &e.to_string(), entry);
                self.out.push_str(&t.render(&t.source_literal));
                return;
            }
        }

        // Text identical to what the script already holds is emitted byte for byte.
        let active = unescape(&t.source_literal);
        let (restored, literal) = if strip(&active).is_ok_and(|s| s.clean == target) {
            (active, t.source_literal.clone())
        } else {
            let restored = restore_unchecked(target, &entry.source_text, &meta.tag_records);
            let literal = escape(&restored, t.quote);
            (restored, literal)
        };

        if !self.opts.skip_validation {
            self.validate(id, meta, t, entry, &restored, &literal);
        }
        self.out.push_str(&t.render(&literal));
    }

    fn validate(
        &mut self,
        id: &str,
        meta: &BlockMetadata,
        t: &StatementTemplate,
        entry: &TextEntry,
        restored: &str,
        literal: &str,
    ) {
        let line = format!("{}{}{q}{literal}{q}{}", t.indent, t.head, t.tail, q = t.quote);
        if !statement_reads_back(&line, t.quote, literal, &t.tail) {
            self.record(id, ValidationRule::QuoteBalance, "statement would not read back", entry);
        }

        match strip(restored) {
            Err(e) => self.record(id, ValidationRule::MalformedMarkup, &e.to_string(), entry),
            Ok(s) => {
                if check_balance(&meta.tag_records).is_ok() {
                    if let Err(detail) = check_balance(&s.tags) {
                        self.record(id, ValidationRule::MarkupBalance, &detail, entry);
                    }
                }
            }
        }

        let known = placeholder_counts(&entry.source_text);
        let mut reported: Vec<String> = Vec::new();
        for token in placeholders(&entry.target_text) {
            if !known.contains_key(&token) && !reported.contains(&token) {
                let detail = format!("{token} does not occur in the source");
                self.record(id, ValidationRule::UnexpectedPlaceholder, &detail, entry);
                reported.push(token);
            }
        }
    }

    fn record(&mut self, id: &str, rule: ValidationRule, detail: &str, entry: &TextEntry) {
        self.fail(id, rule, detail, &entry.source_text, &entry.target_text);
    }

    fn fail(&mut self, id: &str, rule: ValidationRule, detail: &str, source: &str, target: &str) {
        self.report.errors.push(ValidationError {
            block_id: id.to_string(),
            rule,
            detail: detail.to_string(),
            source_text: source.to_string(),
            target_text: target.to_string(),
        });
    }
}

/// Merges artifacts into `output`, refusing to overwrite the artifacts or the source script.
pub fn merge_files(
    paths: &ArtifactPaths,
    output: &Path,
    opts: MergeOptions,
) -> anyhow::Result<MergeReport> {
    let script = ExtractedScript::load(paths)?;
    let source_script = paths.text_json.with_file_name(&script.metadata.source);
    for protected in [&paths.text_json, &paths.meta_json, &source_script] {
        if same_path(output, protected) {
            return Err(anyhow!(
                "refusing to overwrite {} with merge output",
                protected.display()
            ));
        }
    }

    let (text, report) = merge_script(&script, opts);
    write_atomic(output, &with_bom(&text, script.metadata.bom))?;
    info!(
        output = %output.display(),
        blocks = report.blocks,
        translated = report.translated,
        errors = report.errors.len(),
        "merged"
    );
    Ok(report)
}

fn same_path(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(ca), Ok(cb)) => ca == cb,
        _ => false,
    }
}

/// Extracts and merges `script_path` in memory and checks the result is byte-identical.
///
/// Nothing is written: artifacts already next to the script are left alone.
pub fn verify_roundtrip(script_path: &Path) -> anyhow::Result<MergeReport> {
    let original = std::fs::read(script_path)
        .with_context(|| format!("read script: {}", script_path.display()))?;
    let source_name = script_path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let extraction = extract_script(&decode_script(&original), source_name, None);
    let (text, report) = merge_script(&extraction.script, MergeOptions::default());
    let merged = with_bom(&text, extraction.script.metadata.bom);
    if merged == original {
        return Ok(report);
    }

    let left = String::from_utf8_lossy(&original);
    let right = String::from_utf8_lossy(&merged);
    let line = left
        .lines()
        .zip(right.lines())
        .position(|(x, y)| x != y)
        .map(|i| i + 1)
        .unwrap_or_else(|| left.lines().count().min(right.lines().count()) + 1);
    Err(anyhow!(
        "round trip differs from {} at line {line}",
        script_path.display()
    ))
}

fn with_bom(text: &str, bom: bool) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(text.len() + UTF8_BOM.len());
    if bom {
        bytes.extend_from_slice(UTF8_BOM);
    }
    bytes.extend_from_slice(text.as_bytes());
    bytes
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{merge_script, verify_roundtrip, MergeOptions};
    use crate::artifact::{decode_script, ExtractedScript, TextEntry};
    use crate::error::ValidationRule;
    use crate::extract::extract_script;
    use crate::ir::ReconstructionTemplate;

    fn extracted(src: &str) -> ExtractedScript {
        extract_script(&decode_script(src.as_bytes()), "s.rpy", None).script
    }

    fn merged_with(src: &str, id: &str, target: &str) -> (String, super::MergeReport) {
        let mut s = extracted(src);
        s.mapping[id].target_text = target.to_string();
        merge_script(&s, MergeOptions::default())
    }

    const ROUNDTRIP: &str = "# TODO: Translation updated at 2024-01-01 10:00\r\n\
\r\n\
# game/script.rpy:10\r\n\
translate french start_a1b2c3d4:\r\n\
\r\n\
    # e happy \"Hi, [player_name]! {b}Welcome{/b} to {color=#f00}the {i}club{/i}{/color}.{w}\" with vpunch\r\n\
    e happy \"Hi, [player_name]! {b}Welcome{/b} to {color=#f00}the {i}club{/i}{/color}.{w}\" with vpunch\r\n\
\r\n\
    # voice \"e_001.ogg\"\r\n\
    voice \"e_001.ogg\"\r\n\
    # \"It's {{literally} [[not] a tag. He said \\\"hi\\\".\"\r\n\
    \"C'est {{littéralement} [[pas] une balise.\"\r\n\
    # e 'Broken {b markup'\r\n\
    e 'Broken {b markup'\r\n\
    nvl clear\r\n\
\r\n\
translate french python:\r\n\
    gui.text_font = \"DejaVuSans.ttf\"\r\n\
\r\n\
translate french strings:\r\n\
\r\n\
    # game/screens.rpy:20\r\n\
    old \"Start\"\r\n\
    new \"Start\"\r\n\
\r\n\
    old \"Quit {size=-4}now{/size}\"\r\n\
    new \"Quitter {size=-4}maintenant{/size}\"\r\n\
";

    #[test]
    fn untouched_mapping_reproduces_the_script_exactly() {
        let s = extracted(ROUNDTRIP);
        let (out, report) = merge_script(&s, MergeOptions::default());
        assert_eq!(out, ROUNDTRIP);
        assert!(report.is_clean(), "{:?}", report.errors);
        assert!(report.fallback_source.is_empty());
    }

    #[test]
    fn bold_word_is_wrapped_after_translation() {
        let src = "translate romanian a:\n    e \"{b}wonderful{/b}\"\n";
        let (out, report) = merged_with(src, "00002-e", "minunat");
        assert_eq!(out, "translate romanian a:\n    e \"{b}minunat{/b}\"\n");
        assert!(report.is_clean());
        assert_eq!(report.translated, 1);
    }

    #[test]
    fn placeholder_survives_and_tags_land_on_word_boundaries() {
        let src = "translate french a:\n    # e \"Hi, [player_name]! {b}Welcome{/b}.\"\n    e \"Hi, [player_name]! {b}Welcome{/b}.\"\n";
        let (out, report) = merged_with(src, "00002-e", "Salut, [player_name] ! Bienvenue.");
        assert!(report.is_clean(), "{:?}", report.errors);
        assert!(out.contains("e \"Salut, [player_name] ! {b}Bienvenue{/b}.\"\n"), "{out}");
    }

    #[test]
    fn dropped_placeholder_falls_back_to_the_original_line() {
        let src = "translate french a:\n    e \"Hi, [player_name]!\"\n";
        let (out, report) = merged_with(src, "00002-e", "Salut !");
        assert_eq!(out, src);
        assert_eq!(report.fallback_source, vec!["00002-e".to_string()]);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].rule, ValidationRule::MissingPlaceholder);
        assert_eq!(report.errors[0].target_text, "Salut !");
    }

    #[test]
    fn quotes_in_translations_are_escaped() {
        let src = "translate french a:\n    e \"Hello\"\n";
        let (out, report) = merged_with(src, "00002-e", "Il a dit \"non\"\net partit");
        assert!(report.is_clean(), "{:?}", report.errors);
        assert_eq!(out, "translate french a:\n    e \"Il a dit \\\"non\\\"\\net partit\"\n");
    }

    #[test]
    fn typed_markup_and_new_placeholders_are_reported() {
        let src = "translate french a:\n    e \"Hello\"\n    e \"Bye\"\n";
        let mut s = extracted(src);
        s.mapping["00002-e"].target_text = "Salut {b".to_string();
        s.mapping["00003-e"].target_text = "Au revoir [name]".to_string();
        let (_, report) = merge_script(&s, MergeOptions::default());
        let rules: Vec<ValidationRule> = report.errors.iter().map(|e| e.rule).collect();
        assert_eq!(
            rules,
            vec![ValidationRule::MalformedMarkup, ValidationRule::UnexpectedPlaceholder]
        );

        let (_, quiet) = merge_script(&s, MergeOptions { skip_validation: true });
        assert!(quiet.is_clean());
    }

    #[test]
    fn missing_and_orphan_entries() {
        let src = "translate french a:\n    e \"Hello\"\n";
        let mut s = extracted(src);
        s.mapping.shift_remove("00002-e");
        s.mapping.insert(
            "00099-e".to_string(),
            TextEntry {
                source_text: "Ghost".to_string(),
                ..TextEntry::default()
            },
        );
        let (out, report) = merge_script(&s, MergeOptions::default());
        assert_eq!(out, src);
        let rules: Vec<ValidationRule> = report.errors.iter().map(|e| e.rule).collect();
        assert_eq!(rules, vec![ValidationRule::MissingEntry, ValidationRule::OrphanEntry]);
    }

    #[test]
    fn existing_translation_missing_a_placeholder_is_reported() {
        let src = "translate french a:\n    # e \"Hi, [player_name]!\"\n    e \"Salut!\"\n";
        let s = extracted(src);
        assert_eq!(s.mapping["00002-e"].target_text, "Salut!");
        let (out, report) = merge_script(&s, MergeOptions::default());
        assert_eq!(out, src);
        assert_eq!(report.errors.len(), 1, "{:?}", report.errors);
        assert_eq!(report.errors[0].block_id, "00002-e");
        assert_eq!(report.errors[0].rule, ValidationRule::MissingPlaceholder);
        assert_eq!(report.fallback_source, vec!["00002-e".to_string()]);
    }

    #[test]
    fn stray_closing_tag_breaks_markup_balance() {
        let src = "translate french a:\n    e \"It was {i}quiet{/i} tonight.\"\n";
        let (_, report) = merged_with(src, "00002-e", "C'était calme{/i} ce soir.");
        let rules: Vec<ValidationRule> = report.errors.iter().map(|e| e.rule).collect();
        assert_eq!(rules, vec![ValidationRule::MarkupBalance]);
    }

    #[test]
    fn statement_that_would_not_read_back_breaks_quote_balance() {
        let src = "translate french a:\n    e \"Hello\"\n";
        let mut s = extracted(src);
        s.mapping["00002-e"].target_text = "Bonjour".to_string();
        match &mut s.metadata.blocks["00002-e"].reconstruction_template {
            ReconstructionTemplate::Statement(t) => t.tail = "\"oops".to_string(),
            ReconstructionTemplate::Verbatim { .. } => panic!("expected a statement"),
        }
        let (_, report) = merge_script(&s, MergeOptions::default());
        let rules: Vec<ValidationRule> = report.errors.iter().map(|e| e.rule).collect();
        assert_eq!(rules, vec![ValidationRule::QuoteBalance]);
    }

    #[test]
    fn verify_leaves_existing_artifacts_alone() {
        let dir = tempfile::tempdir().expect("tempdir");
        let script = dir.path().join("s.rpy");
        std::fs::write(&script, ROUNDTRIP).expect("write");
        let text_json = dir.path().join("s.text.json");
        std::fs::write(&text_json, "{\"edited\": true}").expect("write");

        let report = verify_roundtrip(&script).expect("round trip");
        assert!(report.is_clean(), "{:?}", report.errors);
        assert_eq!(std::fs::read_to_string(&text_json).expect("read"), "{\"edited\": true}");
        assert!(!dir.path().join("s.merged.rpy").exists());
    }
}
