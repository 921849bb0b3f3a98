// src/llm/client.rs

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::config::LlmConfig;
use crate::llm::backend::{Completion, CompletionOptions, LlmProvider};
use crate::llm::prompt::LlmPrompt;
use crate::llm::retry::LlmError;

const PROMPT_ABI_VERSION: &str = "v2-deltatest-unit";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAI,
    Anthropic,
    Ollama,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Provider::OpenAI => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Ollama => "ollama",
        })
    }
}

/// OpenAI responses API or Anthropic messages API.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    provider: Provider,
    model: String,
    api_key: String,
    base_url: Option<String>,
    http: reqwest::blocking::Client,
}

impl RemoteClient {
    pub fn new(cfg: &LlmConfig) -> Result<Self, LlmError> {
        Ok(Self {
            provider: cfg.provider,
            model: cfg.model.clone(),
            api_key: cfg.api_key.clone(),
            base_url: cfg.base_url.clone(),
            http: http_client(cfg.timeout_secs)?,
        })
    }
}

impl LlmProvider for RemoteClient {
    fn name(&self) -> &str {
        match self.provider {
            Provider::OpenAI => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Ollama => "ollama",
        }
    }

    fn complete(&self, prompt: &LlmPrompt, options: &CompletionOptions) -> Result<Completion, LlmError> {
        let prompt_hash = hash_prompt(prompt);
        let (url, headers, body) = build_request(
            self.provider,
            &self.model,
            &self.api_key,
            self.base_url.as_deref(),
            prompt,
            options,
            &prompt_hash,
        );

        let json = post_json(&self.http, &url, &headers, &body)?;

        if let Some(cached) = json
            .pointer("/usage/prompt_tokens_details/cached_tokens")
            .and_then(|v| v.as_u64())
        {
            tracing::debug!(cached_tokens = cached, "prompt cache hit");
        }

        let text = extract_text(self.provider, &json)?;
        Ok(Completion { text, prompt_hash })
    }
}

pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::blocking::Client, LlmError> {
    reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| LlmError::Transport(e.to_string()))
}

/// POST `body`, classify HTTP failures, parse the JSON reply.
pub(crate) fn post_json(
    http: &reqwest::blocking::Client,
    url: &str,
    headers: &[(&'static str, String)],
    body: &Value,
) -> Result<Value, LlmError> {
    let mut req = http.post(url).json(body);
    for (k, v) in headers {
        req = req.header(*k, v);
    }

    let resp = req.send().map_err(|e| LlmError::Transport(e.to_string()))?;
    let status = resp.status();
    let retry_after = resp
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);

    let text = resp.text().map_err(|e| LlmError::Transport(e.to_string()))?;

    if !status.is_success() {
        return Err(LlmError::from_status(status.as_u16(), retry_after, &text));
    }

    serde_json::from_str(&text).map_err(|e| LlmError::InvalidResponse(e.to_string()))
}

pub fn hash_prompt(prompt: &LlmPrompt) -> String {
    let mut h = Sha256::new();
    h.update(PROMPT_ABI_VERSION.as_bytes());
    h.update(prompt.system.as_bytes());
    h.update(prompt.user.as_bytes());
    hex::encode(h.finalize())
}

pub(crate) fn build_request(
    provider: Provider,
    model: &str,
    api_key: &str,
    base_url: Option<&str>,
    prompt: &LlmPrompt,
    options: &CompletionOptions,
    prompt_hash: &str,
) -> (String, Vec<(&'static str, String)>, Value) {
    match provider {
        Provider::OpenAI => {
            let url = base_url.unwrap_or("https://api.openai.com/v1/responses").to_string();

            let mut body = serde_json::json!({
                "model": model,
                "instructions": prompt.system,
                "input": prompt.user,
                "max_output_tokens": options.max_tokens,
                "prompt_cache_key": prompt_hash,
            });
            if let Some(t) = options.temperature {
                body["temperature"] = t.into();
            }

            (url, vec![("Authorization", format!("Bearer {api_key}"))], body)
        }

        Provider::Anthropic => {
            let url = base_url.unwrap_or("https://api.anthropic.com/v1/messages").to_string();

            let mut body = serde_json::json!({
                "model": model,
                "max_tokens": options.max_tokens,
                "system": prompt.system,
                "messages": [
                    { "role": "user", "content": prompt.user }
                ]
            });
            if let Some(t) = options.temperature {
                body["temperature"] = t.into();
            }

            (
                url,
                vec![
                    ("x-api-key", api_key.to_string()),
                    ("anthropic-version", "2023-06-01".into()),
                ],
                body,
            )
        }

        Provider::Ollama => {
            let base = base_url.unwrap_or("http://localhost:11434").trim_end_matches('/');
            let mut body = serde_json::json!({
                "model": model,
                "stream": false,
                "messages": [
                    { "role": "system", "content": prompt.system },
                    { "role": "user", "content": prompt.user }
                ],
                "options": { "num_predict": options.max_tokens },
            });
            if let Some(t) = options.temperature {
                body["options"]["temperature"] = t.into();
            }

            (format!("{base}/api/chat"), Vec::new(), body)
        }
    }
}

pub(crate) fn extract_text(provider: Provider, v: &Value) -> Result<String, LlmError> {
    let text = match provider {
        Provider::OpenAI => v
            .get("output")
            .and_then(|o| o.as_array())
            .and_then(|arr| {
                arr.iter().find_map(|item| {
                    item.get("content")?
                        .as_array()?
                        .iter()
                        .find_map(|c| c.get("text")?.as_str())
                })
            }),

        Provider::Anthropic => v
            .get("content")
            .and_then(|c| c.as_array())
            .and_then(|arr| {
                arr.iter()
                    .find(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
                    .and_then(|b| b.get("text")?.as_str())
            }),

        Provider::Ollama => v.pointer("/message/content").and_then(|c| c.as_str()),
    };

    text.map(str::to_owned)
        .ok_or_else(|| LlmError::InvalidResponse(format!("{provider} response has no text")))
}
