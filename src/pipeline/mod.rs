mod batch;
mod config;
mod context;
mod prompts;
mod trace;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Context;

use crate::artifact::{write_json_atomic, ArtifactPaths, ExtractedScript};
use crate::backend::{build_backend, Translate};
use crate::characters::CharacterMap;
use crate::glossary::{load_glossary, GlossaryMatcher};
use crate::progress::ConsoleProgress;

pub use batch::{check_reply, BatchOptions, BatchSummary, BatchTranslator, BlockFailure};
pub use config::{init_default_config, ConfigOverrides, PipelineConfig};
pub use context::{build_context, render_context, ContextLine, ContextWindow};
pub use prompts::{render_template, PromptSet};
pub use trace::TraceWriter;

/// Runs batch translation over extracted scripts with one configured backend.
pub struct TranslatorPipeline {
    cfg: PipelineConfig,
    progress: ConsoleProgress,
    backend: Box<dyn Translate>,
    characters: CharacterMap,
    glossary: Option<GlossaryMatcher>,
    trace: TraceWriter,
    cancel: Arc<AtomicBool>,
}

impl TranslatorPipeline {
    pub fn new(cfg: PipelineConfig, progress: ConsoleProgress) -> anyhow::Result<Self> {
        let backend = build_backend(&cfg.backend)?;
        Self::with_backend(cfg, progress, backend)
    }

    pub fn with_backend(
        cfg: PipelineConfig,
        progress: ConsoleProgress,
        backend: Box<dyn Translate>,
    ) -> anyhow::Result<Self> {
        let characters = match cfg.characters.as_deref() {
            Some(p) => CharacterMap::load(p)?,
            None => CharacterMap::default(),
        };
        let glossary = match cfg.glossary.as_deref() {
            Some(p) => Some(GlossaryMatcher::new(&load_glossary(p)?)?),
            None => None,
        };
        let trace = match cfg.trace_dir.clone() {
            Some(dir) => TraceWriter::new(dir, true)?,
            None => TraceWriter::disabled(),
        };
        progress.info(format!("Translate backend: {}", backend.name()));
        if !characters.is_empty() {
            progress.info(format!("Characters: {}", characters.len()));
        }
        if let Some(g) = glossary.as_ref() {
            progress.info(format!("Glossary terms: {}", g.len()));
        }
        Ok(Self {
            cfg,
            progress,
            backend,
            characters,
            glossary,
            trace,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Setting the flag stops the current run after the block in flight.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Translates the empty entries of one extracted script and rewrites its mapping in place.
    pub fn translate_artifacts(&mut self, paths: &ArtifactPaths) -> anyhow::Result<BatchSummary> {
        let mut script = ExtractedScript::load(paths)?;
        let target_lang = self
            .cfg
            .target_lang
            .clone()
            .or_else(|| script.metadata.language.clone())
            .context("target language unknown: set --target-lang or pipeline.target_lang")?;
        self.progress.info(format!(
            "Translate {} ({} -> {})",
            script.metadata.source, self.cfg.source_lang, target_lang
        ));

        let opts = BatchOptions {
            window: self.cfg.context,
            max_attempts: self.cfg.max_attempts,
            autosave_every: self.cfg.autosave_every,
            max_blocks: self.cfg.max_blocks,
            source_lang: self.cfg.source_lang.clone(),
            target_lang,
            log_max_chars: self.cfg.log_max_chars,
        };
        let text_json = paths.text_json.clone();
        let mut autosave = |mapping: &crate::artifact::TextMapping| -> anyhow::Result<()> {
            write_json_atomic(&text_json, mapping)
        };

        let summary = BatchTranslator::new(
            self.backend.as_mut(),
            &self.cfg.prompts,
            &self.characters,
            opts,
        )
        .with_glossary(self.glossary.as_ref())
        .with_trace(&self.trace)
        .with_progress(&self.progress)
        .run(&mut script, &self.cancel, &mut autosave)?;

        write_json_atomic(&paths.text_json, &script.mapping)?;
        self.progress.summary(
            "Translated",
            &[
                ("translated", summary.translated),
                ("skipped", summary.skipped),
                ("failed", summary.failed),
            ],
        );
        for f in &summary.failures {
            self.progress.warn(format!("{}: {}", f.block_id, f.reason));
        }
        Ok(summary)
    }
}
