use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use encoding_rs::UTF_8;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ir::{Block, BlockKind, BlockMetadata};

pub const METADATA_VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryType {
    Separator,
    Malformed,
}

/// One editable entry of the clean-text mapping.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextEntry {
    pub source_text: String,
    #[serde(default)]
    pub target_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub entry_type: Option<EntryType>,
}

impl TextEntry {
    pub fn is_translatable(&self) -> bool {
        self.entry_type.is_none()
    }
}

/// Insertion-ordered `id -> entry` map; iteration order is ordinal order.
pub type TextMapping = IndexMap<String, TextEntry>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataFile {
    pub version: u32,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// sha256 of the source script bytes.
    pub source_digest: String,
    /// The source started with a UTF-8 byte order mark.
    #[serde(default)]
    pub bom: bool,
    pub blocks: IndexMap<String, BlockMetadata>,
}

/// A clean-text mapping paired with the metadata it was extracted with.
#[derive(Clone, Debug)]
pub struct ExtractedScript {
    pub mapping: TextMapping,
    pub metadata: MetadataFile,
}

impl ExtractedScript {
    pub fn load(paths: &ArtifactPaths) -> anyhow::Result<Self> {
        Ok(Self {
            mapping: read_mapping(&paths.text_json)?,
            metadata: read_metadata(&paths.meta_json)?,
        })
    }

    /// Rebuilds the block arena in ordinal order. Metadata drives the order and kind; entries that
    /// are missing from the mapping come back with empty text.
    pub fn blocks(&self) -> Vec<Block> {
        self.metadata
            .blocks
            .iter()
            .enumerate()
            .map(|(idx, (id, meta))| {
                let entry = self.mapping.get(id);
                Block {
                    ordinal: idx + 1,
                    id: id.clone(),
                    kind: meta.kind,
                    speaker: meta.speaker.clone(),
                    source_text: entry.map(|e| e.source_text.clone()).unwrap_or_default(),
                    target_text: entry.map(|e| e.target_text.clone()).unwrap_or_default(),
                    malformed: meta.kind != BlockKind::Separator
                        && entry.is_some_and(|e| e.entry_type == Some(EntryType::Malformed)),
                }
            })
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub text_json: PathBuf,
    pub meta_json: PathBuf,
}

pub fn default_outputs_for(script: &Path) -> ArtifactPaths {
    let stem = file_stem(script);
    ArtifactPaths {
        text_json: script.with_file_name(format!("{stem}.text.json")),
        meta_json: script.with_file_name(format!("{stem}.meta.json")),
    }
}

pub fn default_merged_output_for(script: &Path) -> PathBuf {
    let stem = file_stem(script);
    script.with_file_name(format!("{stem}.merged.rpy"))
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("script")
        .to_string()
}

/// A decoded script and the facts about its bytes that a merge must reproduce.
#[derive(Clone, Debug)]
pub struct ScriptText {
    pub text: String,
    pub bom: bool,
    pub digest: String,
}

pub fn decode_script(bytes: &[u8]) -> ScriptText {
    let bom = bytes.starts_with(&[0xEF, 0xBB, 0xBF]);
    // `decode` sniffs and drops any BOM, so UTF-16 files survive too.
    let (text, _, had_errors) = UTF_8.decode(bytes);
    if had_errors {
        tracing::warn!("script contains invalid UTF-8; replaced with U+FFFD");
    }
    ScriptText {
        text: text.into_owned(),
        bom,
        digest: digest_hex(bytes),
    }
}

pub fn read_script(path: &Path) -> anyhow::Result<ScriptText> {
    let bytes = fs::read(path).with_context(|| format!("read script: {}", path.display()))?;
    Ok(decode_script(&bytes))
}

pub fn digest_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

pub fn read_mapping(path: &Path) -> anyhow::Result<TextMapping> {
    let bytes = fs::read(path).with_context(|| format!("read text json: {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parse text json: {}", path.display()))
}

pub fn read_metadata(path: &Path) -> anyhow::Result<MetadataFile> {
    let bytes = fs::read(path).with_context(|| format!("read metadata: {}", path.display()))?;
    let meta: MetadataFile = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse metadata: {}", path.display()))?;
    if meta.version != METADATA_VERSION {
        return Err(anyhow!(
            "unsupported metadata version {} in {} (expected {METADATA_VERSION})",
            meta.version,
            path.display()
        ));
    }
    Ok(meta)
}

/// Writes via a sibling temp file and a rename, so readers never observe a half-written file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create dir: {}", parent.display()))?;
    }
    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    fs::write(&tmp, bytes).with_context(|| format!("write: {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}

pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let mut bytes = serde_json::to_vec_pretty(value).context("serialize json")?;
    bytes.push(b'\n');
    write_atomic(path, &bytes)
}

#[cfg(test)]
mod tests {
    use super::{decode_script, default_outputs_for, EntryType, TextEntry, TextMapping};
    use std::path::Path;

    #[test]
    fn entries_serialize_with_camel_case_and_type() {
        let mut m = TextMapping::new();
        m.insert(
            "00002-e".to_string(),
            TextEntry {
                source_text: "Hi".to_string(),
                target_text: String::new(),
                speaker: Some("e".to_string()),
                entry_type: None,
            },
        );
        m.insert(
            "00001-sep".to_string(),
            TextEntry {
                entry_type: Some(EntryType::Separator),
                ..TextEntry::default()
            },
        );
        let json = serde_json::to_string(&m).expect("json");
        assert_eq!(
            json,
            r#"{"00002-e":{"sourceText":"Hi","targetText":"","speaker":"e"},"00001-sep":{"sourceText":"","targetText":"","type":"separator"}}"#
        );
        let back: TextMapping = serde_json::from_str(&json).expect("parse");
        assert_eq!(back.keys().next().map(String::as_str), Some("00002-e"));
    }

    #[test]
    fn bom_is_detected_and_stripped() {
        let s = decode_script(b"\xEF\xBB\xBFtranslate french a:\n");
        assert!(s.bom);
        assert_eq!(s.text, "translate french a:\n");
        assert_eq!(s.digest.len(), 64);
    }

    #[test]
    fn artifact_names_follow_the_script_stem() {
        let p = default_outputs_for(Path::new("game/tl/french/script.rpy"));
        assert_eq!(p.text_json, Path::new("game/tl/french/script.text.json"));
        assert_eq!(p.meta_json, Path::new("game/tl/french/script.meta.json"));
    }
}
