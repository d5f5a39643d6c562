use serde::{Deserialize, Serialize};

use crate::error::ParseWarning;

pub const ORDINAL_WIDTH: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlockKind {
    Dialogue,
    Narration,
    ChoiceString,
    Separator,
}

impl BlockKind {
    #[must_use]
    pub fn is_translatable(self) -> bool {
        match self {
            Self::Dialogue | Self::Narration | Self::ChoiceString => true,
            Self::Separator => false,
        }
    }
}

/// Builds the composite `<ordinal>-<speakerOrKind>` key.
#[must_use]
pub fn block_id(ordinal: usize, kind: BlockKind, speaker: Option<&str>) -> String {
    let tag = match (kind, speaker) {
        (BlockKind::Dialogue, Some(s)) => sanitize_id_part(s),
        (BlockKind::Dialogue, None) | (BlockKind::Narration, _) => "narration".to_string(),
        (BlockKind::ChoiceString, _) => "choice".to_string(),
        (BlockKind::Separator, _) => "sep".to_string(),
    };
    format!("{ordinal:0ORDINAL_WIDTH$}-{tag}")
}

fn sanitize_id_part(s: &str) -> String {
    let out: String = s
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if out.is_empty() {
        "speaker".to_string()
    } else {
        out
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TagKind {
    Open,
    Close,
    SelfClosing,
    Placeholder,
}

impl TagKind {
    #[must_use]
    pub fn is_markup(self) -> bool {
        !matches!(self, Self::Placeholder)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagRecord {
    pub kind: TagKind,
    pub payload: String,
    /// Char offset into the clean text before which the payload is reinserted.
    pub anchor_position: usize,
}

/// Surrounding script syntax needed to re-emit a block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "form", rename_all = "kebab-case")]
pub enum ReconstructionTemplate {
    Statement(StatementTemplate),
    Verbatim { raw: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementTemplate {
    /// Raw lines emitted unchanged before the statement (source comment, `old` line).
    pub preamble: String,
    pub indent: String,
    /// Keyword/speaker tokens between the indent and the opening quote.
    pub head: String,
    pub quote: char,
    /// Escaped literal content as it appeared in the active line.
    pub source_literal: String,
    pub tail: String,
    pub eol: String,
}

impl StatementTemplate {
    #[must_use]
    pub fn render(&self, literal: &str) -> String {
        let mut out = String::with_capacity(
            self.preamble.len() + self.indent.len() + self.head.len() + literal.len() + 16,
        );
        out.push_str(&self.preamble);
        out.push_str(&self.indent);
        out.push_str(&self.head);
        out.push(self.quote);
        out.push_str(literal);
        out.push(self.quote);
        out.push_str(&self.tail);
        out.push_str(&self.eol);
        out
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockMetadata {
    pub kind: BlockKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    #[serde(default)]
    pub tag_records: Vec<TagRecord>,
    pub reconstruction_template: ReconstructionTemplate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<ParseWarning>,
}

/// One addressable unit of the arena, rebuilt from the extraction artifacts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub ordinal: usize,
    pub id: String,
    pub kind: BlockKind,
    pub speaker: Option<String>,
    pub source_text: String,
    pub target_text: String,
    /// Markup could not be stripped; the block is passed through and never sent to a translator.
    pub malformed: bool,
}

impl Block {
    #[must_use]
    pub fn needs_translation(&self) -> bool {
        self.kind.is_translatable() && !self.malformed && self.target_text.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{block_id, BlockKind, StatementTemplate};

    #[test]
    fn block_ids_use_speaker_or_kind() {
        assert_eq!(block_id(3, BlockKind::Dialogue, Some("e")), "00003-e");
        assert_eq!(block_id(12, BlockKind::Narration, None), "00012-narration");
        assert_eq!(block_id(7, BlockKind::ChoiceString, None), "00007-choice");
        assert_eq!(block_id(1, BlockKind::Separator, None), "00001-sep");
        assert_eq!(
            block_id(4, BlockKind::Dialogue, Some("Old Man")),
            "00004-Old_Man"
        );
    }

    #[test]
    fn statement_template_renders_around_literal() {
        let t = StatementTemplate {
            preamble: "    # e \"Hi\"\n".to_string(),
            indent: "    ".to_string(),
            head: "e ".to_string(),
            quote: '"',
            source_literal: "Hi".to_string(),
            tail: " with vpunch".to_string(),
            eol: "\n".to_string(),
        };
        assert_eq!(
            t.render("Salut"),
            "    # e \"Hi\"\n    e \"Salut\" with vpunch\n"
        );
    }
}
