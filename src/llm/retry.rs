// src/llm/retry.rs
//
// Error kinds at the provider boundary and the one retry policy applied to
// every backend.

use std::thread;
use std::time::Duration;

use crate::llm::backend::{Completion, CompletionOptions, LlmProvider};
use crate::llm::prompt::LlmPrompt;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LlmError {
    #[error("rate limited{}", retry_after.map(|d| format!(" (retry after {}s)", d.as_secs())).unwrap_or_default())]
    RateLimited { retry_after: Option<Duration> },

    #[error("quota exhausted: {0}")]
    Quota(String),

    #[error("server error {status}")]
    Server { status: u16 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. } | LlmError::Server { .. } | LlmError::Transport(_)
        )
    }

    /// Map an HTTP failure to an error kind.
    pub fn from_status(status: u16, retry_after: Option<Duration>, body: &str) -> Self {
        let lower = body.to_ascii_lowercase();
        match status {
            429 if lower.contains("insufficient_quota") || lower.contains("quota") => {
                LlmError::Quota(first_line(body))
            }
            402 => LlmError::Quota(first_line(body)),
            429 => LlmError::RateLimited { retry_after },
            500..=599 => LlmError::Server { status },
            _ => LlmError::Rejected {
                status,
                message: first_line(body),
            },
        }
    }
}

fn first_line(s: &str) -> String {
    let line = s.lines().next().unwrap_or("").trim();
    if line.chars().count() > 200 {
        let mut x: String = line.chars().take(200).collect();
        x.push_str("...");
        x
    } else {
        line.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32, err: &LlmError) -> Duration {
        if let LlmError::RateLimited {
            retry_after: Some(after),
        } = err
        {
            return (*after).min(self.max_backoff);
        }

        let factor = 2u32.saturating_pow(attempt);
        self.base_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

/// Wraps any provider with [`RetryPolicy`]. Non-retryable errors and the
/// error after the last retry are returned unchanged.
pub struct Retrying<P> {
    inner: P,
    policy: RetryPolicy,
    sleep: fn(Duration),
}

impl<P: LlmProvider> Retrying<P> {
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            sleep: thread::sleep,
        }
    }

    #[cfg(test)]
    fn without_sleep(inner: P, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            sleep: |_| {},
        }
    }
}

impl<P: LlmProvider> LlmProvider for Retrying<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn complete(&self, prompt: &LlmPrompt, options: &CompletionOptions) -> Result<Completion, LlmError> {
        let mut attempt = 0;
        loop {
            match self.inner.complete(prompt, options) {
                Ok(done) => return Ok(done),
                Err(e) if e.is_retryable() && attempt < self.policy.max_retries => {
                    let delay = self.policy.delay(attempt, &e);
                    tracing::warn!(
                        provider = self.inner.name(),
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "{e}; retrying"
                    );
                    (self.sleep)(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
