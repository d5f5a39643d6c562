use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::config::{
    find_default_config, load_config, resolve_backend, AppConfig, ResolvedBackend,
    CONFIG_ENV, CONFIG_FILENAME,
};
use crate::pipeline::context::ContextWindow;
use crate::pipeline::prompts::{default_prompt_files, PromptSet, DEFAULT_PROMPTS_DIR};

/// Command-line values that take precedence over the config file.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub backend: Option<String>,
    pub source_lang: Option<String>,
    pub target_lang: Option<String>,
    pub glossary: Option<PathBuf>,
    pub characters: Option<PathBuf>,
    pub context_before: Option<usize>,
    pub context_after: Option<usize>,
    pub max_blocks: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub backend: ResolvedBackend,
    pub source_lang: String,
    /// `None` means: use the language from the script's own headers.
    pub target_lang: Option<String>,

    pub context: ContextWindow,
    pub max_attempts: usize,
    pub autosave_every: usize,
    pub trace_dir: Option<PathBuf>,
    pub log_max_chars: usize,
    pub max_blocks: Option<usize>,

    pub glossary: Option<PathBuf>,
    pub characters: Option<PathBuf>,

    pub prompts: PromptSet,
}

impl PipelineConfig {
    pub fn from_paths_and_args(input: &Path, args: ConfigOverrides) -> anyhow::Result<Self> {
        let workdir = input
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        let workdir = workdir.canonicalize().unwrap_or(workdir);

        let cfg_file = args
            .config_path
            .clone()
            .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
            .or_else(|| find_default_config(&workdir, CONFIG_FILENAME));

        let mut file_cfg = AppConfig::default();
        if let Some(p) = cfg_file.as_ref() {
            if p.exists() {
                file_cfg = load_config(p)?;
                tracing::debug!(config = %p.display(), "loaded config");
            } else if args.config_path.is_some() {
                return Err(anyhow::anyhow!("config not found: {}", p.display()));
            }
        }
        let cfg_path = cfg_file.unwrap_or_else(|| workdir.join(CONFIG_FILENAME));
        let cfg_dir = cfg_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| workdir.clone());
        let relative_to_config = |s: &str| -> Option<PathBuf> {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            let p = PathBuf::from(s);
            Some(if p.is_relative() { cfg_dir.join(p) } else { p })
        };

        let p = &file_cfg.pipeline;
        let backend_name = args
            .backend
            .or_else(|| p.backend.clone())
            .unwrap_or_else(|| "echo".to_string());
        let backend = resolve_backend(&file_cfg, &cfg_path, &backend_name)?;

        let source_lang = args
            .source_lang
            .or_else(|| p.source_lang.clone())
            .unwrap_or_else(|| "English".to_string());
        let target_lang = args.target_lang.or_else(|| p.target_lang.clone());

        let defaults = ContextWindow::default();
        let context = ContextWindow {
            before: args
                .context_before
                .or(p.context_before)
                .unwrap_or(defaults.before),
            after: args
                .context_after
                .or(p.context_after)
                .unwrap_or(defaults.after),
        };

        let trace_dir = if p.trace_prompts.unwrap_or(false) {
            let dir = p.trace_dir.clone().unwrap_or_else(|| "_trace".to_string());
            relative_to_config(&dir)
        } else {
            None
        };

        let glossary = args
            .glossary
            .or_else(|| p.glossary.as_deref().and_then(relative_to_config));
        let characters = args
            .characters
            .or_else(|| p.characters.as_deref().and_then(relative_to_config));

        let prompts = PromptSet::load(&cfg_path, &file_cfg).context("load prompts")?;

        Ok(Self {
            backend,
            source_lang,
            target_lang,
            context,
            max_attempts: p.max_attempts.unwrap_or(2).max(1),
            autosave_every: p.autosave_every.unwrap_or(10).max(1),
            trace_dir,
            log_max_chars: p.log_max_chars.unwrap_or(240),
            max_blocks: args.max_blocks.or(p.max_blocks).filter(|n| *n > 0),
            glossary,
            characters,
            prompts,
        })
    }
}

pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create config dir: {}", dir.display()))?;
    let cfg_path = dir.join(CONFIG_FILENAME);

    let prompts_dir = dir.join(DEFAULT_PROMPTS_DIR);
    std::fs::create_dir_all(&prompts_dir)
        .with_context(|| format!("create prompts dir: {}", prompts_dir.display()))?;
    for (fname, body) in default_prompt_files() {
        let p = prompts_dir.join(fname);
        if p.exists() && !force {
            continue;
        }
        std::fs::write(&p, body).with_context(|| format!("write prompt: {}", p.display()))?;
    }

    if cfg_path.exists() && !force {
        return Ok(cfg_path);
    }
    std::fs::write(&cfg_path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("write config: {}", cfg_path.display()))?;
    Ok(cfg_path)
}

const DEFAULT_CONFIG_TOML: &str = r#"[pipeline]
source_lang = "English"
# target_lang defaults to the language in the script's `translate <lang> ...:` headers.
# target_lang = "French"
backend = "echo"

context_before = 3
context_after = 1
max_attempts = 2
autosave_every = 10

trace_dir = "_trace"
trace_prompts = false
log_max_chars = 240

# glossary = "glossary.toml"
# characters = "characters.json"

[prompts]
translate = "prompts/translate.txt"
translate_repair = "prompts/translate_repair.txt"

# Returns every line unchanged; useful for dry runs.
[backends.echo]
kind = "echo"

# Any chat-completions server (OpenAI, OpenRouter, llama.cpp server, vLLM...).
[backends.local]
kind = "open_ai"
endpoint = "http://127.0.0.1:8080/v1/chat/completions"
model = "local-model"
# api_key_env = "OPENAI_API_KEY"
temperature = 0.2
timeout_secs = 120
"#;

#[cfg(test)]
mod tests {
    use super::{init_default_config, ConfigOverrides, PipelineConfig};
    use crate::config::BackendKind;

    #[test]
    fn generated_config_loads_and_cli_overrides_win() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg_path = init_default_config(dir.path(), false).expect("init");
        assert!(dir.path().join("prompts/translate.txt").exists());

        let script = dir.path().join("script.rpy");
        let cfg = PipelineConfig::from_paths_and_args(
            &script,
            ConfigOverrides {
                config_path: Some(cfg_path.clone()),
                context_before: Some(5),
                glossary: Some(dir.path().join("g.json")),
                ..ConfigOverrides::default()
            },
        )
        .expect("config");
        assert_eq!(cfg.backend.kind, BackendKind::Echo);
        assert_eq!(cfg.context.before, 5);
        assert_eq!(cfg.context.after, 1);
        assert_eq!(cfg.max_attempts, 2);
        assert_eq!(cfg.trace_dir, None);
        assert_eq!(cfg.glossary, Some(dir.path().join("g.json")));
        assert!(cfg.prompts.translate.contains("{{source}}"));

        let local = PipelineConfig::from_paths_and_args(
            &script,
            ConfigOverrides {
                config_path: Some(cfg_path),
                backend: Some("local".to_string()),
                ..ConfigOverrides::default()
            },
        )
        .expect("config");
        assert_eq!(local.backend.kind, BackendKind::OpenAi);
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let res = PipelineConfig::from_paths_and_args(
            &dir.path().join("s.rpy"),
            ConfigOverrides {
                config_path: Some(dir.path().join("absent.toml")),
                ..ConfigOverrides::default()
            },
        );
        assert!(res.is_err());
    }
}
