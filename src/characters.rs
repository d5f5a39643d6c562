use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterInfo {
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Speaker variable to character description, as loaded from a JSON object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharacterMap {
    entries: HashMap<String, CharacterInfo>,
}

/// What a translator is told about whoever speaks a line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpeakerInfo {
    pub variable: String,
    pub display_name: String,
    pub gender: Option<String>,
    pub role: Option<String>,
}

impl SpeakerInfo {
    /// One-line description for prompts, e.g. `Eileen (female, protagonist)`.
    pub fn describe(&self) -> String {
        let extras: Vec<&str> = [self.gender.as_deref(), self.role.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.trim().is_empty())
            .collect();
        if extras.is_empty() {
            self.display_name.clone()
        } else {
            format!("{} ({})", self.display_name, extras.join(", "))
        }
    }
}

impl CharacterMap {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("read characters: {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("parse characters: {}", path.display()))
    }

    pub fn insert(&mut self, variable: impl Into<String>, info: CharacterInfo) {
        self.entries.insert(variable.into(), info);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Unknown speakers resolve to their own name.
    pub fn resolve(&self, speaker: &str) -> SpeakerInfo {
        match self.entries.get(speaker) {
            Some(info) if !info.display_name.trim().is_empty() => SpeakerInfo {
                variable: speaker.to_string(),
                display_name: info.display_name.clone(),
                gender: info.gender.clone(),
                role: info.role.clone(),
            },
            Some(info) => SpeakerInfo {
                variable: speaker.to_string(),
                display_name: speaker.to_string(),
                gender: info.gender.clone(),
                role: info.role.clone(),
            },
            None => SpeakerInfo {
                variable: speaker.to_string(),
                display_name: speaker.to_string(),
                gender: None,
                role: None,
            },
        }
    }

    pub fn display_name(&self, speaker: &str) -> String {
        self.resolve(speaker).display_name
    }
}

#[cfg(test)]
mod tests {
    use super::CharacterMap;

    #[test]
    fn resolves_known_and_unknown_speakers() {
        let map: CharacterMap = serde_json::from_str(
            r#"{"e": {"displayName": "Eileen", "gender": "female", "role": "guide"}, "m": {"displayName": ""}}"#,
        )
        .expect("characters");
        assert_eq!(map.len(), 2);
        let e = map.resolve("e");
        assert_eq!(e.display_name, "Eileen");
        assert_eq!(e.describe(), "Eileen (female, guide)");
        assert_eq!(map.display_name("m"), "m");
        assert_eq!(map.resolve("x").describe(), "x");
    }
}
