//! deltatest: unit tests for the functions a diff touched.
//!
//! Diff → changed zones → targets → generated, merged and validated test
//! files → run/repair loop → summary.

pub mod config;
pub mod detectors;
pub mod error;
pub mod git;
pub mod hooks;
pub mod llm;
pub mod logger;
pub mod pipeline;
pub mod state;
pub mod testgen;

pub use config::Config;
pub use error::{Error, Result};
pub use pipeline::{Collaborators, Pipeline};
pub use state::{RunContext, RunSummary, TestTarget};
