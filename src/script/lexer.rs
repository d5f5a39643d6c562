use once_cell::sync::Lazy;
use regex::Regex;

static HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^translate\s+([A-Za-z_][A-Za-z0-9_]*)\s+(.+?)\s*:\s*(?:#.*)?$").expect("header regex")
});
static HEAD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[A-Za-z_][A-Za-z0-9_.]*\s+)*$").expect("head regex"));
static IDENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.]*$").expect("ident regex"));

/// Statements that may carry a string but never carry dialogue.
pub const NON_SAY_KEYWORDS: [&str; 27] = [
    "voice", "play", "stop", "queue", "show", "hide", "scene", "with", "pause", "call", "jump",
    "return", "pass", "nvl", "window", "define", "default", "image", "label", "menu", "translate",
    "python", "init", "if", "elif", "else", "while",
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HeaderKind {
    Dialogue { label: String },
    Strings,
    Other { label: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub language: String,
    pub kind: HeaderKind,
}

pub fn parse_header(line: &str) -> Option<Header> {
    let caps = HEADER_RE.captures(line)?;
    let language = caps.get(1)?.as_str().to_string();
    let label = caps.get(2)?.as_str().trim().to_string();
    let kind = if label == "strings" {
        HeaderKind::Strings
    } else if label == "python" || !IDENT_RE.is_match(&label) {
        HeaderKind::Other { label }
    } else {
        HeaderKind::Dialogue { label }
    };
    Some(Header { language, kind })
}

/// A statement line of the form `<indent><head><quote>literal<quote><tail>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SayLine {
    pub indent: String,
    pub head: String,
    pub speaker: Option<String>,
    pub quote: char,
    /// Escaped literal content between the quotes.
    pub literal: String,
    pub tail: String,
}

impl SayLine {
    /// First bare word of the head (`old`, `voice`, a speaker variable...).
    pub fn keyword(&self) -> Option<&str> {
        self.head.split_whitespace().next()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LiteralSpan {
    /// Byte offset of the first content byte.
    pub start: usize,
    /// Byte offset of the closing quote.
    pub end: usize,
}

/// Scans a string literal whose opening quote sits at byte `open`.
pub fn scan_literal(s: &str, open: usize) -> Option<LiteralSpan> {
    let quote = s[open..].chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let rest = &s[open + 1..];
    let triple: String = [quote, quote].iter().collect();
    if rest.starts_with(&triple) {
        return None;
    }
    let mut escaped = false;
    for (i, c) in rest.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '\n' | '\r' => return None,
            c if c == quote => {
                return Some(LiteralSpan {
                    start: open + 1,
                    end: open + 1 + i,
                })
            }
            _ => {}
        }
    }
    None
}

fn find_quote(s: &str) -> Option<usize> {
    s.find(['"', '\''])
}

/// Recognises say-shaped statements: `e "..."`, `e happy "..." with vpunch`, `"..."`,
/// `"Eileen" "..."`, `old "..."`.
pub fn parse_say(line: &str) -> Option<SayLine> {
    let body_start = line.len() - line.trim_start().len();
    let indent = &line[..body_start];
    let body = &line[body_start..];

    let q = find_quote(body)?;
    let head = &body[..q];
    if !HEAD_RE.is_match(head) {
        return None;
    }
    let first = scan_literal(body, q)?;
    let quote = body[q..].chars().next()?;
    let after_first = &body[first.end + 1..];

    // `"Eileen" "Hello"`: the first literal names the speaker.
    let trimmed = after_first.trim_start();
    if head.is_empty() && (trimmed.starts_with('"') || trimmed.starts_with('\'')) {
        let q2 = first.end + 1 + (after_first.len() - trimmed.len());
        let second = scan_literal(body, q2)?;
        let tail = &body[second.end + 1..];
        if !is_valid_tail(tail) {
            return None;
        }
        let speaker = unescape(&body[first.start..first.end]);
        return Some(SayLine {
            indent: indent.to_string(),
            head: body[..q2].to_string(),
            speaker: Some(speaker),
            quote: body[q2..].chars().next()?,
            literal: body[second.start..second.end].to_string(),
            tail: tail.to_string(),
        });
    }

    if !is_valid_tail(after_first) {
        return None;
    }
    let speaker = head.split_whitespace().next().map(str::to_string);
    Some(SayLine {
        indent: indent.to_string(),
        head: head.to_string(),
        speaker,
        quote,
        literal: body[first.start..first.end].to_string(),
        tail: after_first.to_string(),
    })
}

fn is_valid_tail(tail: &str) -> bool {
    tail.is_empty() || tail.starts_with(char::is_whitespace) || tail.starts_with('(')
}

pub fn is_non_say_keyword(word: &str) -> bool {
    NON_SAY_KEYWORDS.contains(&word) || word.starts_with('$')
}

/// Resolves `\\`, `\"`, `\'` and `\n`; other escapes are kept as written.
pub fn unescape(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    let mut chars = literal.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('\\') | Some('"') | Some('\'') => {
                out.push(chars.next().unwrap_or('\\'));
            }
            Some('n') => {
                chars.next();
                out.push('\n');
            }
            _ => out.push('\\'),
        }
    }
    out
}

/// Inverse of [`unescape`] for the given quote character.
pub fn escape(text: &str, quote: char) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let chars: Vec<char> = text.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        match c {
            '\\' => {
                let next = chars.get(i + 1).copied();
                match next {
                    None | Some('\\') | Some('"') | Some('\'') | Some('n') => out.push_str("\\\\"),
                    Some(_) => out.push('\\'),
                }
            }
            '\n' => out.push_str("\\n"),
            '\r' => {}
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}

/// True when `line` reads back as a statement holding exactly `literal` between `quote`s,
/// followed by `tail`.
pub fn statement_reads_back(line: &str, quote: char, literal: &str, tail: &str) -> bool {
    parse_say(line).is_some_and(|s| s.quote == quote && s.literal == literal && s.tail == tail)
}

/// Splits text into lines, each keeping its own terminator.
pub fn split_lines(text: &str) -> Vec<(&str, &str)> {
    text.split_inclusive('\n')
        .map(|line| {
            if let Some(body) = line.strip_suffix("\r\n") {
                (body, "\r\n")
            } else if let Some(body) = line.strip_suffix('\n') {
                (body, "\n")
            } else {
                (line, "")
            }
        })
        .collect()
}
