use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::ResolvedBackend;
use crate::textutil::preview;

use super::{Translate, TranslationRequest};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

/// Any server speaking the chat-completions protocol (OpenAI, OpenRouter, llama.cpp server...).
pub struct OpenAiCompatible {
    name: String,
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl OpenAiCompatible {
    pub fn new(backend: &ResolvedBackend) -> anyhow::Result<Self> {
        let endpoint = backend
            .endpoint
            .clone()
            .ok_or_else(|| anyhow!("backend {} has no endpoint", backend.name))?;
        let model = backend
            .model
            .clone()
            .ok_or_else(|| anyhow!("backend {} has no model", backend.name))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(backend.timeout_secs))
            .build()
            .context("build http client")?;
        Ok(Self {
            name: backend.name.clone(),
            client,
            endpoint,
            model,
            api_key: backend.api_key.clone(),
            temperature: backend.temperature,
            max_tokens: backend.max_tokens,
        })
    }
}

impl Translate for OpenAiCompatible {
    fn name(&self) -> &str {
        &self.name
    }

    fn translate(&mut self, req: &TranslationRequest<'_>) -> anyhow::Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![Message {
                role: "user".to_string(),
                content: req.prompt.to_string(),
            }],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        debug!(
            backend = %self.name,
            block = req.block_id,
            prompt_len = req.prompt.len(),
            input_preview = %preview(req.source_text, 120),
            "chat request prepared"
        );

        let start = Instant::now();
        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = self.api_key.as_deref() {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .with_context(|| format!("send chat request to {}", self.endpoint))?;
        let status = response.status();
        let body = response.text().context("read response body")?;
        let duration_ms = start.elapsed().as_millis();

        if !status.is_success() {
            error!(
                status = %status,
                duration_ms,
                body_preview = %preview(&body, 400),
                "chat request failed"
            );
            return Err(anyhow!("{} returned {}: {}", self.name, status, preview(&body, 400)));
        }

        let parsed: ChatResponse = serde_json::from_str(&body).with_context(|| {
            format!("parse chat response json: {}", preview(&body, 200))
        })?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow!("{} response missing choices", self.name))?;

        info!(
            backend = %self.name,
            block = req.block_id,
            duration_ms,
            response_len = content.len(),
            "chat response received"
        );
        Ok(content)
    }
}
