//! llm/orchestrator.rs
//!
//! Prompt → provider → code. The `TestGenerator` the pipeline talks to.

use crate::error::Result;
use crate::llm::backend::{CompletionOptions, LlmProvider};
use crate::llm::prompt::{build_fix_prompt, build_generate_prompt, LlmPrompt};
use crate::llm::retry::LlmError;
use crate::testgen::generator::{FixRequest, GenerateRequest, TestGenerator};

pub struct LlmGenerator<P> {
    provider: P,
    options: CompletionOptions,
}

impl<P: LlmProvider> LlmGenerator<P> {
    pub fn new(provider: P, options: CompletionOptions) -> Self {
        Self { provider, options }
    }

    fn ask(&self, prompt: &LlmPrompt, what: &str) -> Result<String> {
        let done = self.provider.complete(prompt, &self.options)?;
        tracing::debug!(
            provider = self.provider.name(),
            prompt = %&done.prompt_hash[..done.prompt_hash.len().min(12)],
            chars = done.text.len(),
            "{what} completed"
        );

        let code = extract_code(&done.text);
        if code.trim().is_empty() {
            return Err(LlmError::InvalidResponse(format!("{what}: empty code block")).into());
        }
        Ok(code)
    }
}

impl<P: LlmProvider> TestGenerator for LlmGenerator<P> {
    fn generate(&self, req: &GenerateRequest<'_>) -> Result<String> {
        self.ask(&build_generate_prompt(req), "generate")
    }

    fn fix(&self, req: &FixRequest<'_>) -> Result<String> {
        self.ask(&build_fix_prompt(req), "fix")
    }
}

/// Body of the longest fenced block, or the whole reply when unfenced.
pub fn extract_code(reply: &str) -> String {
    let mut blocks: Vec<String> = Vec::new();
    let mut current: Option<Vec<&str>> = None;

    for line in reply.lines() {
        if line.trim_start().starts_with("```") {
            match current.take() {
                Some(lines) => blocks.push(lines.join("\n")),
                None => current = Some(Vec::new()),
            }
        } else if let Some(lines) = current.as_mut() {
            lines.push(line);
        }
    }

    // An unterminated fence still carries code.
    if let Some(lines) = current {
        blocks.push(lines.join("\n"));
    }

    let best = blocks.into_iter().max_by_key(|b| b.len());
    let mut code = match best {
        Some(b) => b,
        None => reply.trim().to_string(),
    };
    if !code.ends_with('\n') {
        code.push('\n');
    }
    code
}
