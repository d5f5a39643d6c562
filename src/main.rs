use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use vn_translator::artifact::{default_merged_output_for, default_outputs_for, ArtifactPaths};
use vn_translator::extract::{extract_file, CarryOver};
use vn_translator::merge::{merge_files, verify_roundtrip, MergeOptions, MergeReport};
use vn_translator::pipeline::{
    init_default_config, ConfigOverrides, PipelineConfig, TranslatorPipeline,
};
use vn_translator::progress::ConsoleProgress;

const LOG_ENV: &str = "VN_TRANSLATOR_LOG";
const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Parser, Debug)]
#[command(name = "vn-translator")]
#[command(about = "Ren'Py translation-file extractor, batch translator and merger", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write `<stem>.text.json` + `<stem>.meta.json` for a tl script (no LLM)
    Extract {
        #[arg(value_name = "RPY")]
        input: PathBuf,

        #[command(flatten)]
        artifacts: ArtifactArgs,

        /// Carry translations over from a mapping extracted from an older version of the script
        /// (default: the mapping already at the output path)
        #[arg(long, value_name = "JSON", conflicts_with = "force")]
        previous: Option<PathBuf>,

        /// Ignore the existing mapping and start from the script alone
        #[arg(long)]
        force: bool,
    },

    /// Fill empty `targetText` entries with a backend, one script after another
    Translate {
        /// Scripts already extracted next to their `<stem>.text.json` + `<stem>.meta.json`
        #[arg(value_name = "RPY", required = true)]
        inputs: Vec<PathBuf>,

        #[command(flatten)]
        overrides: OverrideArgs,
    },

    /// Rebuild the script from metadata + text mapping (no LLM)
    Merge {
        #[arg(value_name = "RPY")]
        input: PathBuf,

        #[command(flatten)]
        artifacts: ArtifactArgs,

        /// Output script (default: <stem>.merged.rpy)
        #[arg(short, long, value_name = "RPY")]
        output: Option<PathBuf>,

        /// Skip markup/placeholder/quote validation
        #[arg(long)]
        skip_validation: bool,
    },

    /// Extract and merge in memory, and check the result is byte-identical (writes nothing)
    Verify {
        #[arg(value_name = "RPY")]
        input: PathBuf,
    },

    /// Generate default config + prompt files, then exit
    InitConfig {
        /// Directory to write config/prompt files (default: current directory)
        #[arg(value_name = "DIR")]
        dir: Option<PathBuf>,

        /// Overwrite existing config/prompt files
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Debug)]
struct ArtifactArgs {
    /// Text mapping JSON (default: <stem>.text.json)
    #[arg(long, value_name = "JSON")]
    text_json: Option<PathBuf>,

    /// Block metadata JSON (default: <stem>.meta.json)
    #[arg(long, value_name = "JSON")]
    meta_json: Option<PathBuf>,
}

impl ArtifactArgs {
    fn resolve(self, input: &Path) -> ArtifactPaths {
        let defaults = default_outputs_for(input);
        ArtifactPaths {
            text_json: self.text_json.unwrap_or(defaults.text_json),
            meta_json: self.meta_json.unwrap_or(defaults.meta_json),
        }
    }
}

#[derive(Args, Debug)]
struct OverrideArgs {
    /// Config file path (default: search for vn-translator.toml upwards)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Backend name from config (e.g. echo, local)
    #[arg(long)]
    backend: Option<String>,

    /// Source language name used in prompts
    #[arg(long)]
    source_lang: Option<String>,

    /// Target language name (default: from the script's translate headers)
    #[arg(long)]
    target_lang: Option<String>,

    /// Glossary file (.toml or .json)
    #[arg(long, value_name = "FILE")]
    glossary: Option<PathBuf>,

    /// Character map JSON (speaker variable -> display name, gender, role)
    #[arg(long, value_name = "JSON")]
    characters: Option<PathBuf>,

    /// Preceding dialogue lines sent as context
    #[arg(long)]
    context_before: Option<usize>,

    /// Following dialogue lines sent as context
    #[arg(long)]
    context_after: Option<usize>,

    /// Translate at most N blocks (dev-only)
    #[arg(long)]
    max_blocks: Option<usize>,
}

impl OverrideArgs {
    fn into_overrides(self) -> ConfigOverrides {
        ConfigOverrides {
            config_path: self.config,
            backend: self.backend,
            source_lang: self.source_lang,
            target_lang: self.target_lang,
            glossary: self.glossary,
            characters: self.characters,
            context_before: self.context_before,
            context_after: self.context_after,
            max_blocks: self.max_blocks,
        }
    }
}

fn build_log_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER))
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(build_log_filter())
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let progress = ConsoleProgress::new(true);
    match run(cli.command, progress) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command, progress: ConsoleProgress) -> anyhow::Result<ExitCode> {
    match command {
        Command::Extract {
            input,
            artifacts,
            previous,
            force,
        } => {
            let paths = artifacts.resolve(&input);
            let carry = match (&previous, force) {
                (Some(p), _) => CarryOver::From(p.as_path()),
                (None, true) => CarryOver::Fresh,
                (None, false) => CarryOver::Existing,
            };
            let report = extract_file(&input, &paths, carry)?;
            for w in &report.warnings {
                progress.warn(format!("line {}: {}", w.line, w.message));
            }
            progress.summary(
                "Extracted",
                &[
                    ("blocks", report.blocks),
                    ("translatable", report.translatable),
                    ("separators", report.separators),
                    ("malformed", report.malformed.len()),
                    ("prefilled", report.prefilled),
                    ("carried_over", report.carried_over),
                ],
            );
            progress.info(format!("Wrote {}", paths.text_json.display()));
            progress.info(format!("Wrote {}", paths.meta_json.display()));
            Ok(ExitCode::SUCCESS)
        }
        Command::Translate { inputs, overrides } => {
            let first = inputs.first().context("no input scripts")?;
            let cfg = PipelineConfig::from_paths_and_args(first, overrides.into_overrides())
                .context("build config")?;
            let mut pipeline = TranslatorPipeline::new(cfg, progress)?;
            let mut failed = 0usize;
            for input in &inputs {
                let summary = pipeline
                    .translate_artifacts(&default_outputs_for(input))
                    .with_context(|| format!("translate {}", input.display()))?;
                if summary.cancelled {
                    return Ok(ExitCode::from(130));
                }
                failed += summary.failed;
            }
            Ok(if failed > 0 {
                ExitCode::from(2)
            } else {
                ExitCode::SUCCESS
            })
        }
        Command::Merge {
            input,
            artifacts,
            output,
            skip_validation,
        } => {
            let paths = artifacts.resolve(&input);
            let output = output.unwrap_or_else(|| default_merged_output_for(&input));
            let report = merge_files(&paths, &output, MergeOptions { skip_validation })?;
            report_merge(&progress, &report, &output);
            Ok(if report.is_clean() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            })
        }
        Command::Verify { input } => {
            let report = verify_roundtrip(&input)?;
            progress.summary(
                "Verified",
                &[
                    ("blocks", report.blocks),
                    ("translated", report.translated),
                    ("untranslated", report.untranslated),
                ],
            );
            progress.info(format!("Round trip OK: {}", input.display()));
            Ok(ExitCode::SUCCESS)
        }
        Command::InitConfig { dir, force } => {
            let dir = match dir {
                Some(d) => d,
                None => std::env::current_dir().context("current dir")?,
            };
            let cfg_path = init_default_config(&dir, force).context("init default config")?;
            progress.info(format!("Wrote config: {}", cfg_path.display()));
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn report_merge(progress: &ConsoleProgress, report: &MergeReport, output: &Path) {
    for e in &report.errors {
        progress.warn(format!("{} [{}] {}", e.block_id, e.rule, e.detail));
    }
    progress.summary(
        "Merged",
        &[
            ("blocks", report.blocks),
            ("translated", report.translated),
            ("untranslated", report.untranslated),
            ("fallback", report.fallback_source.len()),
            ("errors", report.errors.len()),
        ],
    );
    progress.info(format!("Wrote {}", output.display()));
}
