use crate::characters::CharacterMap;
use crate::ir::{Block, BlockKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContextWindow {
    pub before: usize,
    pub after: usize,
}

impl Default for ContextWindow {
    fn default() -> Self {
        Self {
            before: 3,
            after: 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContextLine {
    /// Display name of the speaker; `None` for narration.
    pub speaker: Option<String>,
    pub text: String,
}

fn is_context_source(block: &Block) -> bool {
    matches!(block.kind, BlockKind::Dialogue | BlockKind::Narration) && !block.malformed
}

/// Neighbouring lines for the block at `index`, in script order.
///
/// Only dialogue and narration count towards the window; separators and choice strings are
/// stepped over. Choice strings get no context at all.
pub fn build_context(
    blocks: &[Block],
    index: usize,
    window: ContextWindow,
    characters: &CharacterMap,
) -> Vec<ContextLine> {
    let Some(current) = blocks.get(index) else {
        return Vec::new();
    };
    if !matches!(current.kind, BlockKind::Dialogue | BlockKind::Narration) {
        return Vec::new();
    }

    let line = |b: &Block| ContextLine {
        speaker: b.speaker.as_deref().map(|s| characters.display_name(s)),
        text: b.source_text.clone(),
    };

    let mut before: Vec<ContextLine> = blocks[..index]
        .iter()
        .rev()
        .filter(|b| is_context_source(b))
        .take(window.before)
        .map(line)
        .collect();
    before.reverse();

    let after = blocks[index + 1..]
        .iter()
        .filter(|b| is_context_source(b))
        .take(window.after)
        .map(line);

    before.extend(after);
    before
}

/// Plain-text rendering used in prompts: `Name: text` or the bare text for narration.
pub fn render_context(lines: &[ContextLine]) -> String {
    let mut out = String::new();
    for l in lines {
        if let Some(s) = l.speaker.as_deref() {
            out.push_str(s);
            out.push_str(": ");
        }
        out.push_str(&l.text);
        out.push('\n');
    }
    out
}
