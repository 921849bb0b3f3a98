use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::logger::RunLog;
use crate::testgen::coverage::{CoverageDelta, CoverageSnapshot};

/// Consecutive syntax-class repair failures before a file is quarantined.
pub const SYNTAX_QUARANTINE_THRESHOLD: u32 = 3;

/// Consecutive non-syntax rejections before a file is given up on.
pub const REJECTION_LIMIT: u32 = 5;

/* ---------- change ranges ---------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeKind {
    Addition,
    Deletion,
}

/// 1-based inclusive line span. Deletions use pre-change numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangedRange {
    pub start: usize,
    pub end: usize,
    pub kind: RangeKind,
}

impl ChangedRange {
    pub fn addition(start: usize, end: usize) -> Self {
        Self { start, end, kind: RangeKind::Addition }
    }

    pub fn deletion(start: usize, end: usize) -> Self {
        Self { start, end, kind: RangeKind::Deletion }
    }

    pub fn len(&self) -> usize {
        self.end + 1 - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    pub fn intersects(&self, start: usize, end: usize) -> bool {
        self.start <= end && start <= self.end
    }
}

/* ---------- targets ---------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeclKind {
    Function,
    Arrow,
    ObjectMethod,
    ClassMethod,
}

impl fmt::Display for DeclKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeclKind::Function => "function",
            DeclKind::Arrow => "arrow function",
            DeclKind::ObjectMethod => "object method",
            DeclKind::ClassMethod => "class method",
        };
        f.write_str(s)
    }
}

/// One declaration selected for test generation.
///
/// Built once per extraction pass and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestTarget {
    pub file_path: String,
    pub decl_name: String,
    pub decl_kind: DeclKind,
    pub owner_class: Option<String>,
    pub is_private: bool,
    pub exported: bool,
    pub private_members: Vec<String>,
    pub source_snippet: String,
    pub surrounding_context: String,
    pub start_line: usize,
    pub end_line: usize,
    pub overlapping_ranges: Vec<ChangedRange>,
    pub existing_test_file_path: Option<String>,
}

impl TestTarget {
    /// `Owner.method` for class methods, the bare name otherwise.
    pub fn qualified_name(&self) -> String {
        match &self.owner_class {
            Some(owner) => format!("{owner}.{}", self.decl_name),
            None => self.decl_name.clone(),
        }
    }
}

/* ---------- per-file buffers ---------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileState {
    /// Written, not yet run.
    Pending,
    Passing,
    Failing,
    SyntaxQuarantine,
    Exhausted,
}

impl FileState {
    pub fn is_terminal(self) -> bool {
        matches!(self, FileState::Passing | FileState::SyntaxQuarantine | FileState::Exhausted)
    }
}

/// Outcome of feeding a syntax-class failure into a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntaxStrike {
    Counted(u32),
    /// Threshold reached; `content` now holds the last valid content.
    Quarantined,
}

/// Accumulated content for one destination test file.
#[derive(Debug, Clone)]
pub struct TestFileBuffer {
    pub path: String,
    pub content: String,
    pub target_names: Vec<String>,
    pub last_valid_content: Option<String>,
    pub syntax_failure_count: u32,
    pub rejection_count: u32,
    pub state: FileState,
    /// Private member names of every target in this file.
    pub private_members: BTreeSet<String>,
    /// Declaration sources, handed to repair requests.
    pub declaration_sources: Vec<String>,
}

impl TestFileBuffer {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            target_names: Vec::new(),
            last_valid_content: None,
            syntax_failure_count: 0,
            rejection_count: 0,
            state: FileState::Pending,
            private_members: BTreeSet::new(),
            declaration_sources: Vec::new(),
        }
    }

    pub fn add_target(&mut self, target: &TestTarget) {
        self.target_names.push(target.qualified_name());
        self.private_members
            .extend(target.private_members.iter().cloned());
        self.declaration_sources.push(target.source_snippet.clone());
    }

    /// Apply a runner verdict. Quarantined and exhausted files keep their state.
    pub fn record_run(&mut self, failed: usize) {
        if matches!(self.state, FileState::SyntaxQuarantine | FileState::Exhausted) {
            return;
        }
        self.state = if failed == 0 {
            FileState::Passing
        } else {
            FileState::Failing
        };
    }

    pub fn needs_repair(&self) -> bool {
        self.state == FileState::Failing
    }

    /// No runner result came back for this file; treat it as failing.
    pub fn record_missing_run(&mut self) {
        if !self.state.is_terminal() {
            self.state = FileState::Failing;
        }
    }

    /// A structurally valid repair: snapshot it and clear the strike counts.
    pub fn accept_repair(&mut self, content: String) {
        self.last_valid_content = Some(content.clone());
        self.content = content;
        self.syntax_failure_count = 0;
        self.rejection_count = 0;
    }

    /// A repair rejected for a non-syntax reason. Returns `false` once the
    /// file has hit `REJECTION_LIMIT` in a row and is exhausted.
    pub fn record_rejection(&mut self) -> bool {
        self.rejection_count += 1;
        if self.rejection_count < REJECTION_LIMIT {
            return true;
        }
        self.exhaust();
        false
    }

    pub fn record_syntax_failure(&mut self) -> SyntaxStrike {
        self.syntax_failure_count += 1;
        if self.syntax_failure_count < SYNTAX_QUARANTINE_THRESHOLD {
            return SyntaxStrike::Counted(self.syntax_failure_count);
        }

        if let Some(valid) = &self.last_valid_content {
            self.content = valid.clone();
        }
        self.state = FileState::SyntaxQuarantine;
        SyntaxStrike::Quarantined
    }

    pub fn exhaust(&mut self) {
        if self.state == FileState::Failing || self.state == FileState::Pending {
            self.state = FileState::Exhausted;
        }
    }
}

/* ---------- run summary ---------- */

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    /// Target name or file path the error belongs to.
    pub subject: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: Option<DateTime<Utc>>,
    pub targets_processed: usize,
    pub targets_dropped: usize,
    pub tests_generated: usize,
    pub tests_passed: usize,
    pub tests_failed: usize,
    pub tests_total: usize,
    pub test_files: Vec<String>,
    pub file_states: BTreeMap<String, FileState>,
    pub errors: Vec<RunError>,
    pub coverage_report: Option<CoverageSnapshot>,
    pub coverage_delta: Option<CoverageDelta>,
}

impl RunSummary {
    pub fn push_error(&mut self, subject: impl Into<String>, message: impl Into<String>) {
        self.errors.push(RunError {
            subject: subject.into(),
            message: message.into(),
        });
    }
}

/* ---------- run context ---------- */

/// Everything a run threads through its components. Built once per run.
#[derive(Debug)]
pub struct RunContext {
    pub config: Config,
    pub repo_root: PathBuf,
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub log: RunLog,
}

impl RunContext {
    pub fn new(config: Config, repo_root: impl Into<PathBuf>) -> Self {
        Self {
            config,
            repo_root: repo_root.into(),
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            log: RunLog::new(),
        }
    }
}
