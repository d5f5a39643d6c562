//! Translation collaborators. The pipeline treats them as opaque `text -> text` functions.

mod echo;
mod openai;

pub use echo::Echo;
pub use openai::OpenAiCompatible;

use crate::characters::SpeakerInfo;
use crate::config::{BackendKind, ResolvedBackend};
use crate::pipeline::ContextLine;

pub const MARKER_START: &str = "<<<TRANSLATION>>>";
pub const MARKER_END: &str = "<<<END_TRANSLATION>>>";

#[derive(Clone, Copy, Debug)]
pub struct TranslationRequest<'a> {
    pub block_id: &'a str,
    pub source_text: &'a str,
    pub context: &'a [ContextLine],
    pub speaker: Option<&'a SpeakerInfo>,
    pub source_language: &'a str,
    pub target_language: &'a str,
    /// Fully rendered prompt for chat-style backends.
    pub prompt: &'a str,
}

pub trait Translate {
    fn name(&self) -> &str;

    fn translate(&mut self, req: &TranslationRequest<'_>) -> anyhow::Result<String>;
}

pub fn build_backend(backend: &ResolvedBackend) -> anyhow::Result<Box<dyn Translate>> {
    Ok(match backend.kind {
        BackendKind::Echo => Box::new(Echo::new(&backend.name)),
        BackendKind::OpenAi => Box::new(OpenAiCompatible::new(backend)?),
    })
}

/// Pulls the text between the translation markers, if the reply has them.
pub fn extract_marked(content: &str) -> Option<&str> {
    let start = content.find(MARKER_START)? + MARKER_START.len();
    let end = content[start..].find(MARKER_END)? + start;
    Some(content[start..end].trim())
}

/// Drops markers, code fences and wrapping quotes that chat models like to add.
pub fn cleanup_model_text(text: &str) -> String {
    let mut s = extract_marked(text).unwrap_or(text).trim().to_string();
    if s.starts_with("```") {
        if let Some(i) = s.find('\n') {
            s = s[i + 1..].to_string();
        }
        if let Some(end) = s.rfind("```") {
            s = s[..end].to_string();
        }
    }
    let s = s.trim();
    let unquoted = ['"', '\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}']
        .iter()
        .fold(s, |acc, q| acc.trim_matches(*q));
    // Only strip quotes that wrap the whole line; inner quotes belong to the text.
    if unquoted.contains(['"', '\u{201C}', '\u{201D}']) {
        s.to_string()
    } else {
        unquoted.trim().to_string()
    }
}
