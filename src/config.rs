use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use serde::Deserialize;

pub const CONFIG_FILENAME: &str = "vn-translator.toml";
pub const CONFIG_ENV: &str = "VN_TRANSLATOR_CONFIG";

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub prompts: PromptsSection,
    #[serde(default)]
    pub backends: HashMap<String, BackendSection>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PipelineSection {
    #[serde(default)]
    pub source_lang: Option<String>,
    /// Defaults to the language named in the script's `translate` headers.
    #[serde(default)]
    pub target_lang: Option<String>,

    #[serde(default)]
    pub backend: Option<String>,

    #[serde(default)]
    pub context_before: Option<usize>,
    #[serde(default)]
    pub context_after: Option<usize>,
    #[serde(default)]
    pub max_attempts: Option<usize>,

    #[serde(default)]
    pub autosave_every: Option<usize>,

    #[serde(default)]
    pub trace_dir: Option<String>,
    #[serde(default)]
    pub trace_prompts: Option<bool>,
    #[serde(default)]
    pub log_max_chars: Option<usize>,

    /// Glossary file (JSON array or TOML `[[term]]` tables), relative to the config file.
    #[serde(default)]
    pub glossary: Option<String>,
    /// Character map JSON, relative to the config file.
    #[serde(default)]
    pub characters: Option<String>,

    /// Optional dev-only limiter: translate at most N blocks per file.
    #[serde(default)]
    pub max_blocks: Option<usize>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PromptsSection {
    #[serde(default)]
    pub translate: Option<String>,
    #[serde(default)]
    pub translate_repair: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Echo,
    #[serde(alias = "openai", alias = "openai_compatible")]
    OpenAi,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct BackendSection {
    #[serde(default)]
    pub kind: BackendKind,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Name of the environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct ResolvedBackend {
    pub name: String,
    pub kind: BackendKind,
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub timeout_secs: u64,
}

impl ResolvedBackend {
    pub fn echo() -> Self {
        Self {
            name: "echo".to_string(),
            kind: BackendKind::Echo,
            endpoint: None,
            model: None,
            api_key: None,
            temperature: 0.0,
            max_tokens: None,
            timeout_secs: 0,
        }
    }
}

pub fn find_file_upwards(start_dir: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = start_dir;
    for _ in 0..=max_levels {
        let candidate = dir.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
    None
}

pub fn find_default_config(workdir: &Path, filename: &str) -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, filename, 8) {
            return Some(p);
        }
    }
    if let Some(p) = find_file_upwards(workdir, filename, 8) {
        return Some(p);
    }
    let exe = std::env::current_exe().ok()?;
    find_file_upwards(exe.parent()?, filename, 10)
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: AppConfig = toml::from_str(&text).context("parse config toml")?;
    Ok(cfg)
}

/// Looks up `[backends.<name>]`; `echo` is always available without configuration.
pub fn resolve_backend(cfg: &AppConfig, config_path: &Path, name: &str) -> anyhow::Result<ResolvedBackend> {
    let Some(b) = cfg.backends.get(name) else {
        if name == "echo" {
            return Ok(ResolvedBackend::echo());
        }
        return Err(anyhow!(
            "backend not configured: {} (config={})",
            name,
            config_path.display()
        ));
    };

    let api_key = match b.api_key_env.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(var) => Some(std::env::var(var).with_context(|| {
            format!("backend {name}: environment variable {var} is not set")
        })?),
        None => None,
    };
    if b.kind == BackendKind::OpenAi && (b.endpoint.is_none() || b.model.is_none()) {
        return Err(anyhow!(
            "backend {} needs both endpoint and model (config={})",
            name,
            config_path.display()
        ));
    }

    Ok(ResolvedBackend {
        name: name.to_string(),
        kind: b.kind,
        endpoint: b.endpoint.clone(),
        model: b.model.clone(),
        api_key,
        temperature: b.temperature.unwrap_or(0.2),
        max_tokens: b.max_tokens,
        timeout_secs: b.timeout_secs.unwrap_or(120),
    })
}

#[cfg(test)]
mod tests {
    use super::{find_file_upwards, resolve_backend, AppConfig, BackendKind};
    use std::path::Path;

    #[test]
    fn parses_backends_and_pipeline_section() {
        let cfg: AppConfig = toml::from_str(
            r#"
[pipeline]
backend = "local"
context_before = 2
glossary = "glossary.toml"

[backends.local]
kind = "open_ai"
endpoint = "http://127.0.0.1:8080/v1/chat/completions"
model = "qwen"
"#,
        )
        .expect("config");
        assert_eq!(cfg.pipeline.context_before, Some(2));
        let b = resolve_backend(&cfg, Path::new("x.toml"), "local").expect("backend");
        assert_eq!(b.kind, BackendKind::OpenAi);
        assert_eq!(b.timeout_secs, 120);
        assert_eq!(b.api_key, None);
        assert!(resolve_backend(&cfg, Path::new("x.toml"), "missing").is_err());
        assert_eq!(
            resolve_backend(&cfg, Path::new("x.toml"), "echo").expect("echo").kind,
            BackendKind::Echo
        );
    }

    #[test]
    fn upward_search_finds_parent_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).expect("mkdir");
        std::fs::write(dir.path().join("marker.toml"), "").expect("write");
        assert_eq!(
            find_file_upwards(&nested, "marker.toml", 4),
            Some(dir.path().join("marker.toml"))
        );
        assert_eq!(find_file_upwards(&nested, "marker.toml", 1), None);
    }
}
