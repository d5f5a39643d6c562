//! Sequential translation of every entry whose `targetText` is still empty.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::artifact::{ExtractedScript, TextMapping};
use crate::backend::{cleanup_model_text, Translate, TranslationRequest, MARKER_END, MARKER_START};
use crate::characters::{CharacterMap, SpeakerInfo};
use crate::glossary::GlossaryMatcher;
use crate::ir::{Block, BlockKind};
use crate::markup::{placeholder_counts, placeholders, strip};
use crate::progress::ConsoleProgress;
use crate::textutil::{is_trivial_text, preview};

use super::context::{build_context, render_context, ContextWindow};
use super::prompts::{render_template, PromptSet};
use super::trace::TraceWriter;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchOptions {
    pub window: ContextWindow,
    pub max_attempts: usize,
    pub autosave_every: usize,
    pub max_blocks: Option<usize>,
    pub source_lang: String,
    pub target_lang: String,
    pub log_max_chars: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            window: ContextWindow::default(),
            max_attempts: 2,
            autosave_every: 10,
            max_blocks: None,
            source_lang: "English".to_string(),
            target_lang: "French".to_string(),
            log_max_chars: 240,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockFailure {
    pub block_id: String,
    pub reason: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    /// Blocks that needed a translation when the run started.
    pub pending: usize,
    pub translated: usize,
    /// Blocks with no prose (placeholders, punctuation) copied through without a backend call.
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<BlockFailure>,
    pub glossary_replacements: usize,
    pub cancelled: bool,
}

pub struct BatchTranslator<'a> {
    backend: &'a mut dyn Translate,
    prompts: &'a PromptSet,
    characters: &'a CharacterMap,
    glossary: Option<&'a GlossaryMatcher>,
    trace: Option<&'a TraceWriter>,
    progress: Option<&'a ConsoleProgress>,
    opts: BatchOptions,
}

impl<'a> BatchTranslator<'a> {
    pub fn new(
        backend: &'a mut dyn Translate,
        prompts: &'a PromptSet,
        characters: &'a CharacterMap,
        opts: BatchOptions,
    ) -> Self {
        Self {
            backend,
            prompts,
            characters,
            glossary: None,
            trace: None,
            progress: None,
            opts,
        }
    }

    #[must_use]
    pub fn with_glossary(mut self, glossary: Option<&'a GlossaryMatcher>) -> Self {
        self.glossary = glossary;
        self
    }

    #[must_use]
    pub fn with_trace(mut self, trace: &'a TraceWriter) -> Self {
        self.trace = Some(trace);
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: &'a ConsoleProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Fills empty `targetText` entries in ordinal order.
    ///
    /// Failures stay local to their block. `cancel` is polled between blocks; `autosave` receives
    /// the mapping every `autosave_every` filled entries, and the caller owns the final write.
    pub fn run(
        &mut self,
        script: &mut ExtractedScript,
        cancel: &AtomicBool,
        autosave: &mut dyn FnMut(&TextMapping) -> anyhow::Result<()>,
    ) -> anyhow::Result<BatchSummary> {
        let blocks = script.blocks();
        let mut pending: Vec<usize> = blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| b.needs_translation())
            .map(|(i, _)| i)
            .collect();
        if let Some(max) = self.opts.max_blocks {
            pending.truncate(max);
        }

        let mut summary = BatchSummary {
            pending: pending.len(),
            ..BatchSummary::default()
        };
        info!(
            script = %script.metadata.source,
            backend = self.backend.name(),
            pending = pending.len(),
            "batch translation started"
        );

        let autosave_every = self.opts.autosave_every.max(1);
        let mut unsaved = 0usize;
        for (done, &idx) in pending.iter().enumerate() {
            if cancel.load(Ordering::Relaxed) {
                info!(done, remaining = pending.len() - done, "batch translation cancelled");
                summary.cancelled = true;
                break;
            }
            let block = &blocks[idx];

            if is_trivial_text(&block.source_text) {
                debug!(block = %block.id, ordinal = block.ordinal, "no prose; copied through");
                set_target(&mut script.mapping, &block.id, block.source_text.clone());
                summary.skipped += 1;
                unsaved += 1;
            } else {
                match self.translate_block(&blocks, idx, &script.metadata.source) {
                    Ok((text, replaced)) => {
                        set_target(&mut script.mapping, &block.id, text);
                        summary.translated += 1;
                        summary.glossary_replacements += replaced;
                        unsaved += 1;
                    }
                    Err(reason) => {
                        warn!(
                            block = %block.id,
                            ordinal = block.ordinal,
                            %reason,
                            "block left untranslated"
                        );
                        summary.failed += 1;
                        summary.failures.push(BlockFailure {
                            block_id: block.id.clone(),
                            reason,
                        });
                    }
                }
            }

            if unsaved >= autosave_every {
                if let Err(e) = autosave(&script.mapping) {
                    warn!(error = %format!("{e:#}"), "autosave failed");
                }
                unsaved = 0;
            }
            if let Some(p) = self.progress {
                p.progress("Translate", done + 1, pending.len());
            }
        }

        info!(
            translated = summary.translated,
            skipped = summary.skipped,
            failed = summary.failed,
            "batch translation finished"
        );
        Ok(summary)
    }

    fn translate_block(
        &mut self,
        blocks: &[Block],
        idx: usize,
        script_name: &str,
    ) -> Result<(String, usize), String> {
        let block = &blocks[idx];
        let context = build_context(blocks, idx, self.opts.window, self.characters);
        let speaker: Option<SpeakerInfo> =
            block.speaker.as_deref().map(|s| self.characters.resolve(s));
        let speaker_desc = match (&speaker, block.kind) {
            (Some(s), _) => s.describe(),
            (None, BlockKind::ChoiceString) => "(menu choice)".to_string(),
            (None, _) => "(narration)".to_string(),
        };
        let glossary_hint = self
            .glossary
            .map(|g| GlossaryMatcher::render_for_prompt(&g.relevant_for(&block.source_text)))
            .unwrap_or_default();
        let context_text = if context.is_empty() {
            "(none)\n".to_string()
        } else {
            render_context(&context)
        };

        let base_vars = [
            ("source_lang", self.opts.source_lang.as_str()),
            ("target_lang", self.opts.target_lang.as_str()),
            ("speaker", speaker_desc.as_str()),
            ("context", context_text.as_str()),
            ("glossary", glossary_hint.as_str()),
            ("source", block.source_text.as_str()),
            ("marker_start", MARKER_START),
            ("marker_end", MARKER_END),
        ];
        let mut prompt = render_template(&self.prompts.translate, &base_vars);
        let mut last_error = String::from("no attempts made");

        for attempt in 1..=self.opts.max_attempts.max(1) {
            self.trace_text(script_name, &block.id, attempt, "prompt", &prompt);
            let req = TranslationRequest {
                block_id: &block.id,
                source_text: &block.source_text,
                context: &context,
                speaker: speaker.as_ref(),
                source_language: &self.opts.source_lang,
                target_language: &self.opts.target_lang,
                prompt: &prompt,
            };
            let reply = match self.backend.translate(&req) {
                Ok(r) => r,
                Err(e) => {
                    last_error = format!("backend error: {e:#}");
                    warn!(block = %block.id, attempt, error = %last_error, "translation call failed");
                    continue;
                }
            };
            self.trace_text(script_name, &block.id, attempt, "reply", &reply);

            let cleaned = cleanup_model_text(&reply);
            match check_reply(&block.source_text, &cleaned) {
                Ok(()) => {
                    let (text, replaced) = match self.glossary {
                        Some(g) => {
                            let out = g.apply(&block.source_text, &cleaned);
                            (out.text, out.replacements)
                        }
                        None => (cleaned, 0),
                    };
                    debug!(
                        block = %block.id,
                        attempt,
                        translated = %preview(&text, self.opts.log_max_chars),
                        "block translated"
                    );
                    return Ok((text, replaced));
                }
                Err(problem) => {
                    debug!(block = %block.id, attempt, %problem, "reply rejected");
                    let mut vars = base_vars.to_vec();
                    vars.push(("validation_error", problem.as_str()));
                    vars.push(("bad", cleaned.as_str()));
                    prompt = render_template(&self.prompts.translate_repair, &vars);
                    last_error = problem;
                }
            }
        }
        Err(last_error)
    }

    fn trace_text(&self, script: &str, block_id: &str, attempt: usize, kind: &str, text: &str) {
        if let Some(t) = self.trace {
            if let Err(e) = t.write_block_text(script, block_id, attempt, kind, text) {
                warn!(error = %format!("{e:#}"), "trace write failed");
            }
        }
    }
}

fn set_target(mapping: &mut TextMapping, id: &str, text: String) {
    if let Some(entry) = mapping.get_mut(id) {
        entry.target_text = text;
    }
}

/// Rejects replies the merge could not use as they stand.
pub fn check_reply(source: &str, reply: &str) -> Result<(), String> {
    if reply.trim().is_empty() {
        return Err("empty reply".to_string());
    }
    match strip(reply) {
        Err(e) => return Err(format!("reply has malformed markup: {e}")),
        Ok(s) if s.tags.iter().any(|t| t.kind.is_markup()) => {
            return Err("reply contains {text tags}; leave formatting out".to_string());
        }
        Ok(_) => {}
    }

    let want = placeholder_counts(source);
    let got = placeholder_counts(reply);
    for token in placeholders(source) {
        let n = want.get(&token).copied().unwrap_or(0);
        let found = got.get(&token).copied().unwrap_or(0);
        if found < n {
            return Err(format!("placeholder {token} missing from the reply; copy it exactly"));
        }
    }
    for token in placeholders(reply) {
        if !want.contains_key(&token) {
            return Err(format!("placeholder {token} does not occur in the source"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicBool;

    use super::{check_reply, BatchOptions, BatchTranslator};
    use crate::artifact::{decode_script, ExtractedScript};
    use crate::backend::{Translate, TranslationRequest};
    use crate::characters::CharacterMap;
    use crate::extract::extract_script;
    use crate::glossary::{GlossaryEntry, GlossaryMatcher};
    use crate::pipeline::prompts::PromptSet;

    const SCRIPT: &str = "translate french start:
    # e \"Hi, [player_name]!\"
    e \"Hi, [player_name]!\"
    # \"The {b}tower{/b} was dark.\"
    \"The {b}tower{/b} was dark.\"
    # e \"...\"
    e \"...\"
";

    struct Scripted {
        replies: VecDeque<String>,
        prompts: Vec<String>,
    }

    impl Scripted {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: replies.iter().map(|s| s.to_string()).collect(),
                prompts: Vec::new(),
            }
        }
    }

    impl Translate for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn translate(&mut self, req: &TranslationRequest<'_>) -> anyhow::Result<String> {
            self.prompts.push(req.prompt.to_string());
            self.replies
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("out of replies"))
        }
    }

    fn script() -> ExtractedScript {
        extract_script(&decode_script(SCRIPT.as_bytes()), "start.rpy", None).script
    }

    fn run(backend: &mut dyn Translate, script: &mut ExtractedScript) -> super::BatchSummary {
        let prompts = PromptSet::default();
        let chars = CharacterMap::default();
        let cancel = AtomicBool::new(false);
        BatchTranslator::new(backend, &prompts, &chars, BatchOptions::default())
            .run(script, &cancel, &mut |_| Ok(()))
            .expect("run")
    }

    #[test]
    fn fills_targets_and_second_run_is_a_no_op() {
        let mut s = script();
        let mut backend = Scripted::new(&["Salut, [player_name] !", "La tour était sombre."]);
        let summary = run(&mut backend, &mut s);
        assert_eq!(summary.translated, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(s.mapping["00002-e"].target_text, "Salut, [player_name] !");
        assert_eq!(s.mapping["00003-narration"].target_text, "La tour était sombre.");
        assert_eq!(s.mapping["00004-e"].target_text, "...");

        let before = s.mapping.clone();
        let mut idle = Scripted::new(&[]);
        let again = run(&mut idle, &mut s);
        assert_eq!(again.pending, 0);
        assert!(idle.prompts.is_empty());
        assert_eq!(s.mapping, before);
    }

    #[test]
    fn dropped_placeholder_is_retried_with_feedback() {
        let mut s = script();
        let mut backend = Scripted::new(&["Salut !", "Salut, [player_name] !", "Sombre."]);
        let summary = run(&mut backend, &mut s);
        assert_eq!(summary.translated, 2);
        assert_eq!(summary.failed, 0);
        assert!(backend.prompts[1].contains("placeholder [player_name] missing"));
        assert!(backend.prompts[1].contains("BAD_OUTPUT:\nSalut !"));
    }

    #[test]
    fn exhausted_attempts_leave_the_block_empty() {
        let mut s = script();
        let mut backend = Scripted::new(&["Salut !", "Salut toi !", "Sombre."]);
        let summary = run(&mut backend, &mut s);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failures[0].block_id, "00002-e");
        assert_eq!(s.mapping["00002-e"].target_text, "");
        assert_eq!(s.mapping["00003-narration"].target_text, "Sombre.");
    }

    #[test]
    fn cancellation_stops_before_the_next_block() {
        let mut s = script();
        let mut backend = Scripted::new(&["x"]);
        let prompts = PromptSet::default();
        let chars = CharacterMap::default();
        let cancel = AtomicBool::new(true);
        let summary = BatchTranslator::new(&mut backend, &prompts, &chars, BatchOptions::default())
            .run(&mut s, &cancel, &mut |_| Ok(()))
            .expect("run");
        assert!(summary.cancelled);
        assert_eq!(summary.translated, 0);
        assert!(backend.prompts.is_empty());
    }

    #[test]
    fn autosave_and_glossary_hooks() {
        let mut s = script();
        let mut backend = Scripted::new(&["Salut, [player_name] !", "La Tower était sombre."]);
        let prompts = PromptSet::default();
        let chars = CharacterMap::default();
        let glossary = GlossaryMatcher::new(&[GlossaryEntry {
            source_term: "tower".to_string(),
            target_form: "tour".to_string(),
            inflected_forms: Vec::new(),
        }])
        .expect("glossary");
        let cancel = AtomicBool::new(false);
        let mut saves = 0usize;
        let opts = BatchOptions {
            autosave_every: 1,
            ..BatchOptions::default()
        };
        let summary = BatchTranslator::new(&mut backend, &prompts, &chars, opts)
            .with_glossary(Some(&glossary))
            .run(&mut s, &cancel, &mut |_| {
                saves += 1;
                Ok(())
            })
            .expect("run");
        assert_eq!(saves, 3);
        assert_eq!(summary.glossary_replacements, 1);
        assert_eq!(s.mapping["00003-narration"].target_text, "La Tour était sombre.");
        assert!(backend.prompts[1].contains("- tower => tour"));
    }

    #[test]
    fn reply_guard() {
        assert!(check_reply("Hi [a]", "").is_err());
        assert!(check_reply("Hi [a]", "Salut [a] [b]").is_err());
        assert!(check_reply("Hi", "{b}Salut{/b}").is_err());
        assert!(check_reply("Hi", "Salut {b").is_err());
        assert!(check_reply("Hi [a]", "Salut [a]").is_ok());
    }
}
