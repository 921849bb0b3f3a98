pub mod backend;
pub mod client;
pub mod ollama;
pub mod orchestrator;
pub mod prompt;
pub mod retry;
