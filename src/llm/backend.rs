use std::time::Duration;

use crate::config::LlmConfig;
use crate::llm::client::{Provider, RemoteClient};
use crate::llm::ollama::Ollama;
use crate::llm::prompt::LlmPrompt;
use crate::llm::retry::{LlmError, RetryPolicy, Retrying};

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub prompt_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionOptions {
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: None,
        }
    }
}

/// One text-generation backend. Retries are not the backend's concern;
/// wrap it in [`Retrying`].
pub trait LlmProvider {
    fn name(&self) -> &str;

    fn complete(&self, prompt: &LlmPrompt, options: &CompletionOptions) -> Result<Completion, LlmError>;
}

impl<P: LlmProvider + ?Sized> LlmProvider for Box<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn complete(&self, prompt: &LlmPrompt, options: &CompletionOptions) -> Result<Completion, LlmError> {
        (**self).complete(prompt, options)
    }
}

/// Backend for the configured provider, behind the shared retry policy.
pub fn build_provider(cfg: &LlmConfig) -> Result<Box<dyn LlmProvider>, LlmError> {
    let policy = RetryPolicy {
        max_retries: cfg.max_retries,
        base_backoff: Duration::from_millis(cfg.base_backoff_ms),
        ..RetryPolicy::default()
    };

    let provider: Box<dyn LlmProvider> = match cfg.provider {
        Provider::OpenAI | Provider::Anthropic => {
            if cfg.api_key.trim().is_empty() {
                return Err(LlmError::Rejected {
                    status: 401,
                    message: format!("no API key configured for {}", cfg.provider),
                });
            }
            Box::new(Retrying::new(RemoteClient::new(cfg)?, policy))
        }
        Provider::Ollama => Box::new(Retrying::new(Ollama::new(cfg)?, policy)),
    };

    tracing::debug!(provider = provider.name(), model = %cfg.model, "llm backend ready");
    Ok(provider)
}
