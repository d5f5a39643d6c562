use once_cell::sync::Lazy;
use regex::Regex;

static LETTER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\p{L}").expect("letter"));
// One level of nested brackets, as in `[inventory[0]]`.
static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[(?:[^\[\]\r\n]|\[[^\[\]\r\n]*\])+\]").expect("placeholder")
});

/// True when nothing but placeholders, digits and punctuation remain, so there is no prose to
/// translate.
pub fn is_trivial_text(text: &str) -> bool {
    let plain = PLACEHOLDER_RE.replace_all(text, " ");
    let plain = plain.trim();
    if plain.is_empty() {
        return true;
    }
    !LETTER_RE.is_match(plain)
}

/// Byte spans of `[...]` placeholder tokens.
pub fn placeholder_byte_spans(text: &str) -> Vec<(usize, usize)> {
    PLACEHOLDER_RE
        .find_iter(text)
        .map(|m| (m.start(), m.end()))
        .collect()
}

#[inline]
pub fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '\'' || ch == '\u{2019}'
}

/// Scripts written without spaces, where every character is its own word boundary.
pub fn is_cjk(ch: char) -> bool {
    let u = ch as u32;
    (0x3400..=0x4DBF).contains(&u)
        || (0x4E00..=0x9FFF).contains(&u)
        || (0xF900..=0xFAFF).contains(&u)
        || (0x20000..=0x2EBEF).contains(&u)
        || (0x3040..=0x309F).contains(&u)
        || (0x30A0..=0x30FF).contains(&u)
        || (0x31F0..=0x31FF).contains(&u)
}

/// Single-line excerpt for log fields.
pub fn preview(input: &str, limit: usize) -> String {
    let cleaned = input.replace(['\n', '\r'], " ");
    let mut out: String = cleaned.chars().take(limit).collect();
    if cleaned.chars().count() > limit {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{is_cjk, is_trivial_text, placeholder_byte_spans, preview};

    #[test]
    fn trivial_text_has_no_letters_outside_placeholders() {
        assert!(is_trivial_text("..."));
        assert!(is_trivial_text("[player_name]!"));
        assert!(is_trivial_text("  "));
        assert!(!is_trivial_text("Hi, [player_name]!"));
        assert!(!is_trivial_text("你好"));
        assert!(is_trivial_text("[inventory[0]]!"));
        assert!(!is_trivial_text("[inventory[0]] left"));
    }

    #[test]
    fn placeholder_spans_include_indexed_expressions() {
        let text = "Take [inventory[0]] and [gold]";
        let spans: Vec<&str> = placeholder_byte_spans(text)
            .into_iter()
            .map(|(s, e)| &text[s..e])
            .collect();
        assert_eq!(spans, vec!["[inventory[0]]", "[gold]"]);
    }

    #[test]
    fn cjk_detection_covers_han_and_kana() {
        assert!(is_cjk('好'));
        assert!(is_cjk('か'));
        assert!(is_cjk('カ'));
        assert!(!is_cjk('a'));
        assert!(!is_cjk('한'));
    }

    #[test]
    fn preview_truncates_and_flattens() {
        assert_eq!(preview("a\nb", 10), "a b");
        assert_eq!(preview("abcdef", 3), "abc...");
    }
}
