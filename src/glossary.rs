//! Glossary post-pass over translated lines.

use std::path::Path;

use anyhow::Context;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::textutil::{is_word_char, placeholder_byte_spans};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlossaryEntry {
    #[serde(alias = "source_term")]
    pub source_term: String,
    #[serde(alias = "target_form")]
    pub target_form: String,
    /// Other spellings a translator may have produced for the term (plurals, declensions).
    #[serde(default, alias = "inflected_forms")]
    pub inflected_forms: Vec<String>,
}

#[derive(Deserialize)]
struct GlossaryToml {
    #[serde(default)]
    term: Vec<GlossaryEntry>,
}

/// Reads a JSON array of entries, or `[[term]]` tables when the file ends in `.toml`.
pub fn load_glossary(path: &Path) -> anyhow::Result<Vec<GlossaryEntry>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read glossary: {}", path.display()))?;
    let is_toml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("toml"));
    let entries = if is_toml {
        let doc: GlossaryToml = toml::from_str(&text)
            .with_context(|| format!("parse glossary toml: {}", path.display()))?;
        doc.term
    } else {
        serde_json::from_str(&text)
            .with_context(|| format!("parse glossary json: {}", path.display()))?
    };
    Ok(entries)
}

struct CompiledEntry {
    entry: GlossaryEntry,
    source_re: Regex,
    /// Source term plus inflected forms, longest alternative first.
    target_re: Regex,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GlossaryOutcome {
    pub text: String,
    pub replacements: usize,
}

pub struct GlossaryMatcher {
    entries: Vec<CompiledEntry>,
}

impl GlossaryMatcher {
    pub fn new(entries: &[GlossaryEntry]) -> anyhow::Result<Self> {
        let mut sorted: Vec<&GlossaryEntry> = entries
            .iter()
            .filter(|e| !e.source_term.trim().is_empty() && !e.target_form.trim().is_empty())
            .collect();
        // Longest terms claim their spans before any shorter term nested inside them.
        sorted.sort_by_key(|e| std::cmp::Reverse(e.source_term.chars().count()));

        let mut compiled = Vec::with_capacity(sorted.len());
        for e in sorted {
            let source_re = term_regex(&[e.source_term.as_str()])
                .with_context(|| format!("compile glossary term: {}", e.source_term))?;
            let mut alts: Vec<&str> = std::iter::once(e.source_term.as_str())
                .chain(e.inflected_forms.iter().map(String::as_str))
                .filter(|s| !s.trim().is_empty())
                .collect();
            alts.sort_by_key(|s| std::cmp::Reverse(s.chars().count()));
            alts.dedup();
            let target_re = term_regex(&alts)
                .with_context(|| format!("compile glossary forms: {}", e.source_term))?;
            compiled.push(CompiledEntry {
                entry: e.clone(),
                source_re,
                target_re,
            });
        }
        Ok(Self { entries: compiled })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries whose source term occurs in `source` outside placeholders, longest first.
    #[must_use]
    pub fn relevant_for(&self, source: &str) -> Vec<&GlossaryEntry> {
        let placeholders = placeholder_byte_spans(source);
        self.entries
            .iter()
            .filter(|c| find_bounded(&c.source_re, source, &placeholders).next().is_some())
            .map(|c| &c.entry)
            .collect()
    }

    #[must_use]
    pub fn render_for_prompt(terms: &[&GlossaryEntry]) -> String {
        if terms.is_empty() {
            return String::new();
        }
        let mut out = String::from("GLOSSARY (use these translations consistently):\n");
        for t in terms {
            out.push_str("- ");
            out.push_str(&t.source_term);
            out.push_str(" => ");
            out.push_str(&t.target_form);
            out.push('\n');
        }
        out
    }

    /// Rewrites glossary terms in `translated`, considering only terms present in `source`.
    ///
    /// Replacements take the case class of the term's first occurrence in the source. Source text
    /// already claimed by a longer term does not count as an occurrence of a shorter one.
    #[must_use]
    pub fn apply(&self, source: &str, translated: &str) -> GlossaryOutcome {
        let mut text = translated.to_string();
        let mut locked = placeholder_byte_spans(&text);
        let mut source_locked = placeholder_byte_spans(source);
        let mut replacements = 0usize;

        for c in &self.entries {
            let occurrences: Vec<(usize, usize)> =
                find_bounded(&c.source_re, source, &source_locked).collect();
            let Some(&(fs, fe)) = occurrences.first() else {
                continue;
            };
            let replacement = match_case(&source[fs..fe], &c.entry.target_form);
            source_locked.extend(occurrences);

            let spans: Vec<(usize, usize)> = find_bounded(&c.target_re, &text, &locked).collect();
            if spans.is_empty() {
                continue;
            }

            let mut out = String::with_capacity(text.len());
            let mut new_locked: Vec<(usize, usize)> = Vec::with_capacity(locked.len() + spans.len());
            let mut last = 0usize;
            // (old offset, cumulative delta after that offset)
            let mut shifts: Vec<(usize, isize)> = Vec::with_capacity(spans.len());
            let mut delta: isize = 0;
            for (s, e) in spans {
                out.push_str(&text[last..s]);
                let start = out.len();
                out.push_str(&replacement);
                new_locked.push((start, out.len()));
                delta += replacement.len() as isize - (e - s) as isize;
                shifts.push((e, delta));
                last = e;
                replacements += 1;
            }
            out.push_str(&text[last..]);

            for (s, e) in locked {
                let d = shifts
                    .iter()
                    .take_while(|(end, _)| *end <= s)
                    .last()
                    .map(|(_, d)| *d)
                    .unwrap_or(0);
                new_locked.push(((s as isize + d) as usize, (e as isize + d) as usize));
            }
            new_locked.sort_unstable();
            text = out;
            locked = new_locked;
        }

        GlossaryOutcome { text, replacements }
    }
}

fn term_regex(alts: &[&str]) -> Result<Regex, regex::Error> {
    let pattern = alts
        .iter()
        .map(|a| regex::escape(a.trim()))
        .collect::<Vec<_>>()
        .join("|");
    RegexBuilder::new(&format!("(?:{pattern})"))
        .case_insensitive(true)
        .build()
}

/// Matches that sit on word boundaries and do not overlap a locked span.
fn find_bounded<'a>(
    re: &'a Regex,
    text: &'a str,
    locked: &'a [(usize, usize)],
) -> impl Iterator<Item = (usize, usize)> + 'a {
    re.find_iter(text)
        .map(|m| (m.start(), m.end()))
        .filter(move |&(s, e)| {
            let before = text[..s].chars().next_back();
            let after = text[e..].chars().next();
            let bounded = !before.is_some_and(is_word_char) && !after.is_some_and(is_word_char);
            bounded && !locked.iter().any(|&(ls, le)| s < le && ls < e)
        })
}

fn match_case(sample: &str, target: &str) -> String {
    let letters: Vec<char> = sample.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() > 1 && letters.iter().all(|c| c.is_uppercase()) {
        return target.to_uppercase();
    }
    if letters.first().is_some_and(|c| c.is_uppercase()) {
        let mut chars = target.chars();
        return match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        };
    }
    target.to_string()
}
