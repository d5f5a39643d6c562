//! Inline markup codec.
//!
//! `{...}` directives are cut out of the prose and remembered with the clean-text offset they were
//! removed at; `[...]` placeholders are remembered but stay in the prose, since the translator must
//! echo them verbatim. `{{` and `[[` are escapes and pass through as text.

use std::collections::HashMap;

use crate::error::MarkupError;
use crate::ir::{TagKind, TagRecord};
use crate::textutil::{is_cjk, is_word_char};

/// Text tags that never take a closing counterpart.
pub const SELF_CLOSING_TAGS: [&str; 9] = [
    "w", "p", "nw", "fast", "done", "clear", "image", "space", "vspace",
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Stripped {
    pub clean: String,
    pub tags: Vec<TagRecord>,
}

pub fn strip(raw: &str) -> Result<Stripped, MarkupError> {
    let chars: Vec<char> = raw.chars().collect();
    let mut clean = String::with_capacity(raw.len());
    let mut clean_len = 0usize;
    let mut tags: Vec<TagRecord> = Vec::new();

    let mut i = 0usize;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            '{' | '[' if next == Some(c) => {
                clean.push(c);
                clean.push(c);
                clean_len += 2;
                i += 2;
            }
            '{' => {
                let close = find_close(&chars, i, '{', '}').ok_or_else(|| MarkupError::Malformed {
                    offset: i,
                    reason: "unterminated markup tag".to_string(),
                })?;
                let payload: String = chars[i..=close].iter().collect();
                let inner = &payload[1..payload.len() - 1];
                if inner.trim().is_empty() || inner.trim() == "/" {
                    return Err(MarkupError::Malformed {
                        offset: i,
                        reason: "empty markup tag".to_string(),
                    });
                }
                let kind = classify_markup(inner);
                tags.push(TagRecord {
                    kind,
                    payload,
                    anchor_position: clean_len,
                });
                i = close + 1;
            }
            '[' => {
                let close = find_placeholder_close(&chars, i).ok_or_else(|| {
                    MarkupError::Malformed {
                        offset: i,
                        reason: "unterminated placeholder".to_string(),
                    }
                })?;
                if close == i + 1 {
                    return Err(MarkupError::Malformed {
                        offset: i,
                        reason: "empty placeholder".to_string(),
                    });
                }
                let token: String = chars[i..=close].iter().collect();
                tags.push(TagRecord {
                    kind: TagKind::Placeholder,
                    payload: token.clone(),
                    anchor_position: clean_len,
                });
                clean.push_str(&token);
                clean_len += close + 1 - i;
                i = close + 1;
            }
            _ => {
                clean.push(c);
                clean_len += 1;
                i += 1;
            }
        }
    }

    Ok(Stripped { clean, tags })
}

// Returns the index of the delimiter closing the one at `start`; an opening delimiter or a line
// break before it means the directive is unterminated.
fn find_close(chars: &[char], start: usize, open: char, close: char) -> Option<usize> {
    for (j, &c) in chars.iter().enumerate().skip(start + 1) {
        if c == close {
            return Some(j);
        }
        if c == open || c == '\n' {
            return None;
        }
    }
    None
}

// Placeholders may index into their expression (`[inventory[0]]`), so brackets nest; a line break
// before the outer `]` still leaves the placeholder unterminated.
fn find_placeholder_close(chars: &[char], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (j, &c) in chars.iter().enumerate().skip(start) {
        match c {
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(j);
                }
            }
            '\n' => return None,
            _ => {}
        }
    }
    None
}

fn classify_markup(inner: &str) -> TagKind {
    if inner.starts_with('/') {
        return TagKind::Close;
    }
    if SELF_CLOSING_TAGS.contains(&tag_name(inner)) {
        TagKind::SelfClosing
    } else {
        TagKind::Open
    }
}

/// Name of a directive: `{color=#f00}` and `{/color}` are both `color`.
#[must_use]
pub fn tag_name(payload: &str) -> &str {
    let inner = payload
        .trim_start_matches('{')
        .trim_end_matches('}')
        .trim_start_matches('/');
    inner.split('=').next().unwrap_or("").trim()
}

/// Reinserts markup into `translated` and checks that every placeholder survived.
pub fn restore(
    translated: &str,
    source_clean: &str,
    tags: &[TagRecord],
) -> Result<String, MarkupError> {
    check_placeholders(translated, tags)?;
    Ok(restore_unchecked(translated, source_clean, tags))
}

pub fn check_placeholders(translated: &str, tags: &[TagRecord]) -> Result<(), MarkupError> {
    let mut expected: Vec<(&str, usize)> = Vec::new();
    for t in tags.iter().filter(|t| t.kind == TagKind::Placeholder) {
        match expected.iter_mut().find(|(tok, _)| *tok == t.payload) {
            Some((_, n)) => *n += 1,
            None => expected.push((&t.payload, 1)),
        }
    }
    if expected.is_empty() {
        return Ok(());
    }
    let found = placeholder_counts(translated);
    for (token, want) in expected {
        let got = found.get(token).copied().unwrap_or(0);
        if got < want {
            return Err(MarkupError::MissingPlaceholder {
                token: token.to_string(),
                expected: want,
                found: got,
            });
        }
    }
    Ok(())
}

/// Proportional remapping of markup anchors onto `translated`.
///
/// Each anchor keeps its fractional offset within the source clean text and is snapped to the
/// nearest word boundary of the translation (word starts for opening tags, word ends for closing
/// tags, never inside a placeholder). Heavily reordered translations can end up with tags around
/// the wrong words; an unchanged translation always reproduces the original anchors.
#[must_use]
pub fn restore_unchecked(translated: &str, source_clean: &str, tags: &[TagRecord]) -> String {
    let markup: Vec<&TagRecord> = tags.iter().filter(|t| t.kind.is_markup()).collect();
    if markup.is_empty() {
        return translated.to_string();
    }

    let t_chars: Vec<char> = translated.chars().collect();
    let n_t = t_chars.len();
    let n_s = source_clean.chars().count();
    let identity = translated == source_clean;
    let locked = placeholder_char_spans(&t_chars);

    let mut positions: Vec<usize> = Vec::with_capacity(markup.len());
    let mut prev = 0usize;
    for tag in &markup {
        let pos = if identity {
            tag.anchor_position.min(n_t)
        } else if n_s == 0 || tag.anchor_position == 0 {
            0
        } else if tag.anchor_position >= n_s {
            n_t
        } else {
            let raw = (tag.anchor_position as f64 / n_s as f64) * n_t as f64;
            snap_to_boundary(&t_chars, &locked, raw.round() as usize, tag.kind)
        };
        let pos = pos.max(prev);
        positions.push(pos);
        prev = pos;
    }

    let extra: usize = markup.iter().map(|t| t.payload.len()).sum();
    let mut out = String::with_capacity(translated.len() + extra);
    let mut k = 0usize;
    for i in 0..=n_t {
        while k < markup.len() && positions[k] == i {
            out.push_str(&markup[k].payload);
            k += 1;
        }
        if i < n_t {
            out.push(t_chars[i]);
        }
    }
    out
}

fn snap_to_boundary(chars: &[char], locked: &[(usize, usize)], target: usize, kind: TagKind) -> usize {
    let n = chars.len();
    let target = target.min(n);
    let is_candidate = |i: usize| -> bool {
        if n == 0 {
            return true;
        }
        if i == 0 {
            return kind != TagKind::Close;
        }
        if i == n {
            return kind != TagKind::Open;
        }
        if locked.iter().any(|&(s, e)| s < i && i < e) {
            return false;
        }
        let before = chars[i - 1];
        let after = chars[i];
        let split = is_word_char(before) != is_word_char(after) || is_cjk(before) || is_cjk(after);
        if !split {
            return false;
        }
        match kind {
            TagKind::Open => is_word_char(after),
            TagKind::Close => is_word_char(before),
            TagKind::SelfClosing | TagKind::Placeholder => true,
        }
    };

    let prefer_later = kind == TagKind::Open;
    for dist in 0..=n {
        let lo = target.checked_sub(dist);
        let hi = if target + dist <= n {
            Some(target + dist)
        } else {
            None
        };
        let (first, second) = if prefer_later { (hi, lo) } else { (lo, hi) };
        for cand in [first, second].into_iter().flatten() {
            if is_candidate(cand) {
                return cand;
            }
        }
    }
    target
}

/// Checks that every opening directive is closed in order.
pub fn check_balance(tags: &[TagRecord]) -> Result<(), String> {
    let mut stack: Vec<&str> = Vec::new();
    for t in tags {
        match t.kind {
            TagKind::Open => stack.push(tag_name(&t.payload)),
            TagKind::Close => {
                let name = tag_name(&t.payload);
                match stack.pop() {
                    Some(open) if open == name => {}
                    Some(open) => {
                        return Err(format!("{} closes {{{open}}}", t.payload));
                    }
                    None => return Err(format!("{} has no opening tag", t.payload)),
                }
            }
            TagKind::SelfClosing | TagKind::Placeholder => {}
        }
    }
    match stack.last() {
        Some(open) => Err(format!("{{{open}}} is never closed")),
        None => Ok(()),
    }
}

/// Placeholder tokens (`[name]`) in order of appearance; escapes and unterminated brackets are
/// ignored.
#[must_use]
pub fn placeholders(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    placeholder_char_spans(&chars)
        .into_iter()
        .map(|(s, e)| chars[s..e].iter().collect())
        .collect()
}

#[must_use]
pub fn placeholder_counts(text: &str) -> HashMap<String, usize> {
    let mut out: HashMap<String, usize> = HashMap::new();
    for tok in placeholders(text) {
        *out.entry(tok).or_insert(0) += 1;
    }
    out
}

// Half-open char spans of every placeholder token.
fn placeholder_char_spans(chars: &[char]) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut i = 0usize;
    while i < chars.len() {
        match chars[i] {
            '[' if chars.get(i + 1) == Some(&'[') => i += 2,
            '{' if chars.get(i + 1) == Some(&'{') => i += 2,
            '[' => match find_placeholder_close(chars, i) {
                Some(close) if close > i + 1 => {
                    spans.push((i, close + 1));
                    i = close + 1;
                }
                _ => i += 1,
            },
            _ => i += 1,
        }
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::{check_balance, placeholders, restore, restore_unchecked, strip};
    use crate::error::MarkupError;
    use crate::ir::TagKind;

    #[test]
    fn strip_bold_records_open_and_close_anchors() {
        let s = strip("{b}wonderful{/b}").expect("strip");
        assert_eq!(s.clean, "wonderful");
        assert_eq!(s.tags.len(), 2);
        assert_eq!(s.tags[0].kind, TagKind::Open);
        assert_eq!(s.tags[0].anchor_position, 0);
        assert_eq!(s.tags[1].kind, TagKind::Close);
        assert_eq!(s.tags[1].anchor_position, 9);
    }

    #[test]
    fn restore_bold_onto_shorter_translation() {
        let s = strip("{b}wonderful{/b}").expect("strip");
        let out = restore("minunat", &s.clean, &s.tags).expect("restore");
        assert_eq!(out, "{b}minunat{/b}");
    }

    #[test]
    fn placeholders_stay_in_clean_text() {
        let s = strip("Hi, [player_name]!").expect("strip");
        assert_eq!(s.clean, "Hi, [player_name]!");
        assert_eq!(s.tags.len(), 1);
        assert_eq!(s.tags[0].kind, TagKind::Placeholder);
        assert_eq!(s.tags[0].payload, "[player_name]");
        assert_eq!(s.tags[0].anchor_position, 4);
    }

    #[test]
    fn dropped_placeholder_is_reported() {
        let s = strip("Hi, [player_name]!").expect("strip");
        let err = restore("Salut!", &s.clean, &s.tags).expect_err("must fail");
        assert!(matches!(
            err,
            MarkupError::MissingPlaceholder { ref token, expected: 1, found: 0 } if token == "[player_name]"
        ));
        let ok = restore("Salut, [player_name]!", &s.clean, &s.tags).expect("restore");
        assert_eq!(ok, "Salut, [player_name]!");
    }

    #[test]
    fn identity_restore_reproduces_mid_word_tags() {
        let raw = "Wait{w=0.5}... {i}un{/i}believable, {color=#f00}[name]{/color}!{nw}";
        let s = strip(raw).expect("strip");
        assert_eq!(s.clean, "Wait... unbelievable, [name]!");
        let out = restore(&s.clean, &s.clean, &s.tags).expect("restore");
        assert_eq!(out, raw);
    }

    #[test]
    fn escapes_pass_through_as_text() {
        let s = strip("Use {{braces}} and [[brackets] here").expect("strip");
        assert_eq!(s.clean, "Use {{braces}} and [[brackets] here");
        assert!(s.tags.is_empty());
        assert!(placeholders(&s.clean).is_empty());
    }

    #[test]
    fn unterminated_markup_is_an_error() {
        assert!(matches!(
            strip("Hello {b world"),
            Err(MarkupError::Malformed { offset: 6, .. })
        ));
        assert!(matches!(
            strip("Hello [name"),
            Err(MarkupError::Malformed { .. })
        ));
        assert!(matches!(strip("a {} b"), Err(MarkupError::Malformed { .. })));
    }

    #[test]
    fn tags_snap_to_word_boundaries() {
        let s = strip("Hello {b}big{/b} world").expect("strip");
        let out = restore_unchecked("Salut grand monde", &s.clean, &s.tags);
        assert_eq!(out, "Salut {b}grand{/b} monde");
    }

    #[test]
    fn tags_never_land_inside_placeholders() {
        let s = strip("Go {b}now{/b}, [player_name]").expect("strip");
        let out = restore_unchecked("[player_name], vas-y maintenant", &s.clean, &s.tags);
        assert!(out.contains("[player_name]"), "{out}");
        assert_eq!(out.matches("{b}").count(), 1);
        assert_eq!(out.matches("{/b}").count(), 1);
        assert!(out.find("{b}").expect("open") < out.find("{/b}").expect("close"));
    }

    #[test]
    fn cjk_translations_get_per_character_boundaries() {
        let s = strip("a {b}very{/b} good day").expect("strip");
        let out = restore_unchecked("非常好的一天", &s.clean, &s.tags);
        assert_eq!(out.matches("{b}").count(), 1);
        assert!(!out.starts_with("{b}非常好的一天{/b}"));
    }

    #[test]
    fn balance_check_reports_unclosed_and_crossed_tags() {
        let ok = strip("{b}{i}x{/i}{/b}{w}").expect("strip");
        assert!(check_balance(&ok.tags).is_ok());
        let open = strip("{b}x").expect("strip");
        assert!(check_balance(&open.tags).is_err());
        let crossed = strip("{b}{i}x{/b}{/i}").expect("strip");
        assert!(check_balance(&crossed.tags).is_err());
    }

    #[test]
    fn placeholders_may_nest_brackets() {
        let s = strip("You have [inventory[0]] now").expect("strip");
        assert_eq!(s.clean, "You have [inventory[0]] now");
        assert_eq!(s.tags.len(), 1);
        assert_eq!(s.tags[0].kind, TagKind::Placeholder);
        assert_eq!(s.tags[0].payload, "[inventory[0]]");
        assert_eq!(s.tags[0].anchor_position, 9);

        let s = strip("{b}[persistent.names[\"e\"]]{/b} waves").expect("strip");
        assert_eq!(s.clean, "[persistent.names[\"e\"]] waves");
        assert_eq!(placeholders(&s.clean), vec!["[persistent.names[\"e\"]]".to_string()]);
        let out = restore(&s.clean, &s.clean, &s.tags).expect("restore");
        assert_eq!(out, "{b}[persistent.names[\"e\"]]{/b} waves");
        assert!(restore("Il salue", &s.clean, &s.tags).is_err());

        assert!(matches!(
            strip("Broken [inventory[0] here"),
            Err(MarkupError::Malformed { offset: 7, .. })
        ));
    }
}
