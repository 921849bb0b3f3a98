use crate::config::LlmConfig;
use crate::llm::backend::{Completion, CompletionOptions, LlmProvider};
use crate::llm::client::{build_request, extract_text, hash_prompt, http_client, post_json, Provider};
use crate::llm::prompt::LlmPrompt;
use crate::llm::retry::LlmError;

/// Local Ollama server over `/api/chat`. No key, no prompt cache.
#[derive(Debug, Clone)]
pub struct Ollama {
    model: String,
    base_url: Option<String>,
    http: reqwest::blocking::Client,
}

impl Ollama {
    pub fn new(cfg: &LlmConfig) -> Result<Self, LlmError> {
        Ok(Self {
            model: cfg.model.clone(),
            base_url: cfg.base_url.clone(),
            http: http_client(cfg.timeout_secs)?,
        })
    }
}

impl LlmProvider for Ollama {
    fn name(&self) -> &str {
        "ollama"
    }

    fn complete(&self, prompt: &LlmPrompt, options: &CompletionOptions) -> Result<Completion, LlmError> {
        let (url, headers, body) = build_request(
            Provider::Ollama,
            &self.model,
            "",
            self.base_url.as_deref(),
            prompt,
            options,
            "",
        );

        let json = post_json(&self.http, &url, &headers, &body)?;

        // Ollama reports model errors in a 200 body.
        if let Some(err) = json.get("error").and_then(|e| e.as_str()) {
            return Err(LlmError::Rejected {
                status: 200,
                message: err.to_string(),
            });
        }

        Ok(Completion {
            text: extract_text(Provider::Ollama, &json)?,
            prompt_hash: hash_prompt(prompt),
        })
    }
}
