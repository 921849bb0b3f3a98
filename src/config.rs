// src/config.rs
//
// Run configuration: `deltatest.toml` in the repo root, then the user config
// dir, then defaults. Environment variables win for secrets.

use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::detectors::framework::TestFramework;
use crate::error::ConfigError;
use crate::llm::client::Provider;

pub const CONFIG_FILE: &str = "deltatest.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Forced framework; detected from package.json when unset.
    pub framework: Option<TestFramework>,
    pub test_location: TestLocation,
    pub test_dir: String,
    pub source_root: String,
    /// File name pattern for new test files, `{name}` and `{ext}` are expanded.
    pub test_pattern: String,
    pub max_targets: usize,
    pub max_fix_attempts: FixBudget,
    pub request_delay_ms: u64,
    pub coverage: bool,
    pub coverage_file: String,
    pub scaffold_only: bool,
    pub dry_run: bool,
    pub exclude: Vec<String>,
    pub extraction: ExtractionPolicy,
    pub runner: RunnerConfig,
    pub typecheck: TypecheckConfig,
    pub format_command: Option<String>,
    pub llm: LlmConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            framework: None,
            test_location: TestLocation::CoLocated,
            test_dir: "tests".into(),
            source_root: "src".into(),
            test_pattern: "{name}.test.{ext}".into(),
            max_targets: 25,
            max_fix_attempts: FixBudget::Limited(3),
            request_delay_ms: 0,
            coverage: false,
            coverage_file: "coverage/coverage-final.json".into(),
            scaffold_only: false,
            dry_run: false,
            exclude: vec!["**/*.d.ts".into(), "**/node_modules/**".into()],
            extraction: ExtractionPolicy::default(),
            runner: RunnerConfig::default(),
            typecheck: TypecheckConfig::default(),
            format_command: None,
            llm: LlmConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestLocation {
    CoLocated,
    Separate,
}

/// Thresholds deciding when a file is treated as whole-file work.
///
/// Both ratios are product policy rather than load-bearing constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionPolicy {
    pub test_all_exports: bool,
    /// One addition range spanning at least this share of the file.
    pub mostly_new_ratio: f64,
    /// All addition ranges together spanning at least this share.
    pub bulk_change_ratio: f64,
}

impl Default for ExtractionPolicy {
    fn default() -> Self {
        Self {
            test_all_exports: false,
            mostly_new_ratio: 0.90,
            bulk_change_ratio: 0.50,
        }
    }
}

/// Fix-loop attempt budget. `"infinite"` in the config file means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawBudget", into = "RawBudget")]
pub enum FixBudget {
    Limited(u32),
    Unbounded,
}

impl FixBudget {
    pub fn exhausted(self, attempts: u32) -> bool {
        match self {
            FixBudget::Limited(max) => attempts >= max,
            FixBudget::Unbounded => false,
        }
    }

    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inf" | "infinite" | "unbounded" => Ok(FixBudget::Unbounded),
            other => other
                .parse::<u32>()
                .map(FixBudget::Limited)
                .map_err(|_| ConfigError::Invalid {
                    field: "max_fix_attempts",
                    reason: format!("expected a number or \"infinite\", got {s:?}"),
                }),
        }
    }
}

impl fmt::Display for FixBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FixBudget::Limited(n) => write!(f, "{n}"),
            FixBudget::Unbounded => f.write_str("infinite"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawBudget {
    Count(u32),
    Word(String),
}

impl TryFrom<RawBudget> for FixBudget {
    type Error = ConfigError;

    fn try_from(raw: RawBudget) -> Result<Self, Self::Error> {
        match raw {
            RawBudget::Count(n) => Ok(FixBudget::Limited(n)),
            RawBudget::Word(w) => FixBudget::parse(&w),
        }
    }
}

impl From<FixBudget> for RawBudget {
    fn from(b: FixBudget) -> Self {
        match b {
            FixBudget::Limited(n) => RawBudget::Count(n),
            FixBudget::Unbounded => RawBudget::Word("infinite".into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub enabled: bool,
    /// Overrides the framework's default command. `{files}` and `{output}`
    /// (JSON report path) are expanded; paths are appended without `{files}`.
    pub command: Option<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TypecheckConfig {
    pub enabled: bool,
    pub command: String,
}

impl Default for TypecheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            command: "npx tsc --noEmit --pretty false --skipLibCheck".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: Provider,
    pub model: String,
    pub api_key: String,
    pub base_url: Option<String>,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub base_backoff_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: Provider::OpenAI,
            model: "gpt-5.2".into(),
            api_key: String::new(),
            base_url: None,
            max_tokens: 4096,
            timeout_secs: 120,
            max_retries: 3,
            base_backoff_ms: 1_000,
        }
    }
}

/* ============================================================
   Loading
   ============================================================ */

impl Config {
    /// Load config: explicit path, then `<repo>/deltatest.toml`, then the
    /// user config dir. Missing files fall back to defaults.
    pub fn load(repo_root: &Path, explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => [repo_root.join(CONFIG_FILE), user_config_path()]
                .into_iter()
                .find(|p| p.is_file()),
        };

        let mut cfg = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_toml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    fn apply_env(&mut self) {
        let key_var = match self.llm.provider {
            Provider::OpenAI => Some("OPENAI_API_KEY"),
            Provider::Anthropic => Some("ANTHROPIC_API_KEY"),
            Provider::Ollama => None,
        };

        if let Some(key) = key_var.and_then(|k| env::var(k).ok()) {
            if !key.trim().is_empty() {
                self.llm.api_key = key.trim().to_string();
            }
        }

        if let Ok(model) = env::var("DELTATEST_MODEL") {
            if !model.trim().is_empty() {
                self.llm.model = model.trim().to_string();
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_targets == 0 {
            return Err(ConfigError::Invalid {
                field: "max_targets",
                reason: "must be at least 1".into(),
            });
        }

        for (field, ratio) in [
            ("extraction.mostly_new_ratio", self.extraction.mostly_new_ratio),
            ("extraction.bulk_change_ratio", self.extraction.bulk_change_ratio),
        ] {
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{ratio} is outside (0, 1]"),
                });
            }
        }

        if !self.test_pattern.contains("{name}") {
            return Err(ConfigError::Invalid {
                field: "test_pattern",
                reason: "must contain {name}".into(),
            });
        }

        for pattern in &self.exclude {
            if let Err(e) = glob::Pattern::new(pattern) {
                return Err(ConfigError::Invalid {
                    field: "exclude",
                    reason: format!("{pattern}: {e}"),
                });
            }
        }

        Ok(())
    }

    /// True when `path` matches one of the `exclude` globs.
    pub fn is_excluded(&self, path: &str) -> bool {
        self.exclude
            .iter()
            .filter_map(|p| glob::Pattern::new(p).ok())
            .any(|p| p.matches(path))
    }

    pub fn needs_runner(&self) -> bool {
        !self.dry_run && (self.max_fix_attempts != FixBudget::Limited(0) || self.coverage)
    }
}

fn user_config_path() -> PathBuf {
    let mut dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    dir.push("deltatest");
    dir.push("config.toml");
    dir
}
