//! error.rs
//!
//! Error taxonomy for a generation run.

use std::io;
use std::path::PathBuf;

use crate::llm::retry::LlmError;

#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    #[error("malformed hunk header: {0}")]
    MalformedHunkHeader(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Diff(#[from] DiffError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not parse {0}")]
    Unparseable(String),

    #[error("command `{command}` failed: {message}")]
    Command { command: String, message: String },

    #[error("refusing to write {0}: content is not structurally valid")]
    InvalidContent(PathBuf),

    #[error("a test runner is required for this run but none is configured")]
    MissingRunner,

    #[error("no generation backend configured")]
    MissingGenerator,
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
