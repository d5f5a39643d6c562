//! Section state machine over a translation script.
//!
//! Every input byte ends up in exactly one [`ParsedBlock`]: translatable statements become
//! dialogue/narration/choice blocks, everything else is coalesced into verbatim separators, so
//! concatenating the blocks' raw text reproduces the input.

use crate::error::ParseWarning;
use crate::ir::{BlockKind, ReconstructionTemplate, StatementTemplate};

use super::lexer::{is_non_say_keyword, parse_header, parse_say, split_lines, unescape, HeaderKind, SayLine};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Outside,
    InDialogue,
    InChoice,
    /// Body of a section whose content is never translated (`python`, `style`, unknown).
    Verbatim,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedBlock {
    pub kind: BlockKind,
    pub speaker: Option<String>,
    /// 1-based line number where the block starts.
    pub line: usize,
    /// The block's exact input text.
    pub raw: String,
    /// Unescaped source prose, markup included. Empty for separators.
    pub source: String,
    /// Unescaped text of the active line when it already differs from the source.
    pub existing: Option<String>,
    pub template: ReconstructionTemplate,
    pub warning: Option<ParseWarning>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedScript {
    pub language: Option<String>,
    pub blocks: Vec<ParsedBlock>,
    pub warnings: Vec<ParseWarning>,
}

#[derive(Default)]
struct Pending {
    start_line: usize,
    raw: String,
}

struct PendingOld {
    line: usize,
    raw: String,
    say: SayLine,
}

struct Parser {
    state: State,
    out: ParsedScript,
    sep: Pending,
    /// Indented comments inside a dialogue section, candidates for a statement's source line.
    comments: Vec<(usize, String)>,
    old: Option<PendingOld>,
}

pub fn parse_script(text: &str) -> ParsedScript {
    let mut p = Parser {
        state: State::Outside,
        out: ParsedScript::default(),
        sep: Pending::default(),
        comments: Vec::new(),
        old: None,
    };
    for (idx, (body, eol)) in split_lines(text).into_iter().enumerate() {
        p.line(idx + 1, body, eol);
    }
    p.finish()
}

impl Parser {
    fn line(&mut self, line_no: usize, body: &str, eol: &str) {
        let raw = format!("{body}{eol}");
        let blank = body.trim().is_empty();
        let top_level = !blank && !body.starts_with(char::is_whitespace);

        if top_level && self.state != State::Outside {
            self.leave_section();
        }

        match self.state {
            State::Outside => self.outside(line_no, body, raw),
            State::InDialogue => self.in_dialogue(line_no, body, eol, raw, blank),
            State::InChoice => self.in_choice(line_no, body, eol, raw, blank),
            State::Verbatim => self.push_sep(line_no, &raw),
        }
    }

    fn outside(&mut self, line_no: usize, body: &str, raw: String) {
        let trimmed = body.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            self.push_sep(line_no, &raw);
            return;
        }
        if !body.starts_with(char::is_whitespace) {
            if let Some(header) = parse_header(trimmed) {
                self.out.language.get_or_insert(header.language);
                self.push_sep(line_no, &raw);
                self.state = match header.kind {
                    HeaderKind::Dialogue { .. } => State::InDialogue,
                    HeaderKind::Strings => State::InChoice,
                    HeaderKind::Other { label } => {
                        tracing::debug!(line = line_no, %label, "verbatim translate section");
                        State::Verbatim
                    }
                };
                return;
            }
            self.push_warning(line_no, raw, "unsupported top-level statement".to_string());
            self.state = State::Verbatim;
            return;
        }
        self.push_warning(line_no, raw, "indented statement outside a translate section".to_string());
    }

    fn in_dialogue(&mut self, line_no: usize, body: &str, eol: &str, raw: String, blank: bool) {
        if blank {
            self.flush_comments();
            self.push_sep(line_no, &raw);
            return;
        }
        let trimmed = body.trim_start();
        if trimmed.starts_with('#') {
            self.comments.push((line_no, raw));
            return;
        }

        match parse_say(body) {
            Some(say) if !say.keyword().is_some_and(is_non_say_keyword) => {
                self.push_statement(line_no, say, eol, raw);
            }
            _ => {
                let word = trimmed
                    .split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
                    .next()
                    .unwrap_or("");
                if is_non_say_keyword(word) {
                    self.flush_comments();
                    self.push_sep(line_no, &raw);
                } else {
                    let start = self.comment_start().unwrap_or(line_no);
                    let mut text = self.take_comments();
                    text.push_str(&raw);
                    let message = format!("unsupported statement: {}", trimmed.trim_end());
                    self.push_warning(start, text, message);
                }
            }
        }
    }

    fn push_statement(&mut self, line_no: usize, say: SayLine, eol: &str, raw: String) {
        // The comment right above a statement carries the original line.
        let source_say = self.comments.last().and_then(|(_, c)| {
            let c = c.trim_end_matches(['\n', '\r']);
            let stripped = c.trim_start().strip_prefix('#')?;
            let stripped = stripped.strip_prefix(' ').unwrap_or(stripped);
            parse_say(stripped)
        });

        let start = self.comment_start().unwrap_or(line_no);
        let preamble = self.take_comments();
        let active = unescape(&say.literal);
        let (source, speaker, existing) = match source_say {
            Some(src) => {
                let source = unescape(&src.literal);
                let existing = if source != active { Some(active) } else { None };
                (source, src.speaker.or(say.speaker.clone()), existing)
            }
            None => (active, say.speaker.clone(), None),
        };
        let kind = if speaker.is_some() {
            BlockKind::Dialogue
        } else {
            BlockKind::Narration
        };

        let mut block_raw = preamble.clone();
        block_raw.push_str(&raw);
        let template = ReconstructionTemplate::Statement(StatementTemplate {
            preamble,
            indent: say.indent,
            head: say.head,
            quote: say.quote,
            source_literal: say.literal,
            tail: say.tail,
            eol: eol.to_string(),
        });
        self.push_block(ParsedBlock {
            kind,
            speaker,
            line: start,
            raw: block_raw,
            source,
            existing,
            template,
            warning: None,
        });
    }

    fn in_choice(&mut self, line_no: usize, body: &str, eol: &str, raw: String, blank: bool) {
        if blank || body.trim_start().starts_with('#') {
            match self.old.as_mut() {
                Some(old) => old.raw.push_str(&raw),
                None => self.push_sep(line_no, &raw),
            }
            return;
        }

        let say = parse_say(body);
        match say.as_ref().and_then(|s| s.keyword()) {
            Some("old") => {
                if let Some(prev) = self.old.take() {
                    self.push_warning(prev.line, prev.raw, "`old` string without `new`".to_string());
                }
                if let Some(say) = say {
                    self.old = Some(PendingOld {
                        line: line_no,
                        raw,
                        say,
                    });
                }
            }
            Some("new") => {
                let Some(say) = say else { return };
                match self.old.take() {
                    Some(old) => self.push_choice(old, say, eol, raw),
                    None => self.push_warning(line_no, raw, "`new` string without `old`".to_string()),
                }
            }
            _ => {
                if let Some(prev) = self.old.take() {
                    self.push_warning(prev.line, prev.raw, "`old` string without `new`".to_string());
                }
                self.push_warning(line_no, raw, format!("unsupported statement in strings section: {}", body.trim()));
            }
        }
    }

    fn push_choice(&mut self, old: PendingOld, new: SayLine, eol: &str, raw: String) {
        let source = unescape(&old.say.literal);
        let active = unescape(&new.literal);
        let existing = if source != active { Some(active) } else { None };
        let mut block_raw = old.raw.clone();
        block_raw.push_str(&raw);
        let template = ReconstructionTemplate::Statement(StatementTemplate {
            preamble: old.raw,
            indent: new.indent,
            head: new.head,
            quote: new.quote,
            source_literal: new.literal,
            tail: new.tail,
            eol: eol.to_string(),
        });
        self.push_block(ParsedBlock {
            kind: BlockKind::ChoiceString,
            speaker: None,
            line: old.line,
            raw: block_raw,
            source,
            existing,
            template,
            warning: None,
        });
    }

    fn leave_section(&mut self) {
        self.flush_comments();
        if let Some(prev) = self.old.take() {
            self.push_warning(prev.line, prev.raw, "`old` string without `new`".to_string());
        }
        self.state = State::Outside;
    }

    fn comment_start(&self) -> Option<usize> {
        self.comments.first().map(|(l, _)| *l)
    }

    fn take_comments(&mut self) -> String {
        self.comments.drain(..).map(|(_, raw)| raw).collect()
    }

    fn flush_comments(&mut self) {
        if let Some(start) = self.comment_start() {
            let text = self.take_comments();
            self.push_sep(start, &text);
        }
    }

    fn push_sep(&mut self, line_no: usize, raw: &str) {
        if self.sep.raw.is_empty() {
            self.sep.start_line = line_no;
        }
        self.sep.raw.push_str(raw);
    }

    fn flush_sep(&mut self) {
        if self.sep.raw.is_empty() {
            return;
        }
        let sep = std::mem::take(&mut self.sep);
        self.out.blocks.push(separator(sep.start_line, sep.raw, None));
    }

    fn push_block(&mut self, block: ParsedBlock) {
        self.flush_sep();
        self.out.blocks.push(block);
    }

    fn push_warning(&mut self, line_no: usize, raw: String, message: String) {
        let warning = ParseWarning::new(line_no, message);
        tracing::warn!(line = line_no, message = %warning.message, "passing statement through verbatim");
        self.out.warnings.push(warning.clone());
        self.push_block(separator(line_no, raw, Some(warning)));
    }

    fn finish(mut self) -> ParsedScript {
        self.leave_section();
        self.flush_sep();
        self.out
    }
}

fn separator(line: usize, raw: String, warning: Option<ParseWarning>) -> ParsedBlock {
    ParsedBlock {
        kind: BlockKind::Separator,
        speaker: None,
        line,
        raw: raw.clone(),
        source: String::new(),
        existing: None,
        template: ReconstructionTemplate::Verbatim { raw },
        warning,
    }
}
