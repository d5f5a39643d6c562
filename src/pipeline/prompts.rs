use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};

use crate::config::AppConfig;

pub const DEFAULT_PROMPTS_DIR: &str = "prompts";

pub const DEFAULT_TRANSLATE: &str = "translate.txt";
pub const DEFAULT_TRANSLATE_REPAIR: &str = "translate_repair.txt";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptSet {
    pub translate: String,
    pub translate_repair: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            translate: DEFAULT_TRANSLATE_TEXT.to_string(),
            translate_repair: DEFAULT_TRANSLATE_REPAIR_TEXT.to_string(),
        }
    }
}

impl PromptSet {
    /// Configured paths must exist. Unconfigured prompts come from `prompts/` next to the config
    /// when present, else from the built-in text.
    pub fn load(config_path: &Path, cfg: &AppConfig) -> anyhow::Result<Self> {
        let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
        Ok(Self {
            translate: read_prompt(
                config_dir,
                "translate",
                cfg.prompts.translate.as_deref(),
                DEFAULT_TRANSLATE,
                DEFAULT_TRANSLATE_TEXT,
            )?,
            translate_repair: read_prompt(
                config_dir,
                "translate_repair",
                cfg.prompts.translate_repair.as_deref(),
                DEFAULT_TRANSLATE_REPAIR,
                DEFAULT_TRANSLATE_REPAIR_TEXT,
            )?,
        })
    }
}

fn read_prompt(
    config_dir: &Path,
    key: &str,
    configured: Option<&str>,
    default_filename: &str,
    builtin: &str,
) -> anyhow::Result<String> {
    let (path, required) = match configured.map(str::trim).filter(|s| !s.is_empty()) {
        Some(p) => (PathBuf::from(p), true),
        None => (
            PathBuf::from(DEFAULT_PROMPTS_DIR).join(default_filename),
            false,
        ),
    };
    let path = if path.is_relative() {
        config_dir.join(path)
    } else {
        path
    };
    if !path.exists() {
        if required {
            return Err(anyhow!(
                "prompt file not found for {key}: {} (run: vn-translator init-config)",
                path.display()
            ));
        }
        return Ok(builtin.to_string());
    }
    std::fs::read_to_string(&path).with_context(|| format!("read prompt: {}", path.display()))
}

/// Replaces every `{{name}}` with its value; unknown names are left in place.
///
/// Substituted values are never scanned again, so a source line or reply that itself contains
/// `{{context}}` comes through literally.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let value = after.find("}}").and_then(|end| {
            let name = &after[..end];
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| (*v, end))
        });
        match value {
            Some((v, end)) => {
                out.push_str(v);
                rest = &after[end + 2..];
            }
            None => {
                out.push_str("{{");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

pub fn default_prompt_files() -> Vec<(&'static str, &'static str)> {
    vec![
        (DEFAULT_TRANSLATE, DEFAULT_TRANSLATE_TEXT),
        (DEFAULT_TRANSLATE_REPAIR, DEFAULT_TRANSLATE_REPAIR_TEXT),
    ]
}

pub const DEFAULT_TRANSLATE_TEXT: &str = r#"You translate dialogue for a visual novel from {{source_lang}} to {{target_lang}}.

Rules:
- Translate only the LINE below; the context is for reference.
- Keep the speaker's voice and register.
- Copy every [bracketed] placeholder exactly, untranslated.
- Do NOT add quotes, notes, or explanations.
- Wrap the translation between {{marker_start}} and {{marker_end}}.

Speaker: {{speaker}}

{{glossary}}
CONTEXT:
{{context}}
LINE:
{{source}}"#;

pub const DEFAULT_TRANSLATE_REPAIR_TEXT: &str = r#"Your previous translation of a visual-novel line was rejected.
Fix it and return ONLY the corrected translation between {{marker_start}} and {{marker_end}}.

Problem:
{{validation_error}}

Rules:
- Copy every [bracketed] placeholder exactly, untranslated.
- Do NOT omit content; do NOT add new information.
- The output must be in {{target_lang}}.

Language: {{source_lang}} -> {{target_lang}}
Speaker: {{speaker}}

SOURCE:
{{source}}

BAD_OUTPUT:
{{bad}}"#;
