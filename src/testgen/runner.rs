// Executes the project's test runner and parses its JSON report.
// No repair logic here.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::RunnerConfig;
use crate::detectors::framework::TestFramework;
use crate::error::{Error, Result};
use crate::hooks::{run_hook, shell_quote};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestFailure {
    pub test_name: String,
    pub message: String,
    pub stack: Option<String>,
}

/// One test file's outcome for one runner invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub test_file_path: String,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
    pub failures: Vec<TestFailure>,
}

impl RunResult {
    pub fn passing(path: impl Into<String>, passed: usize) -> Self {
        Self {
            test_file_path: path.into(),
            passed,
            failed: 0,
            total: passed,
            failures: Vec::new(),
        }
    }

    /// A file the runner could not load at all counts as one failure.
    fn suite_error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            test_file_path: path.into(),
            passed: 0,
            failed: 1,
            total: 1,
            failures: vec![TestFailure {
                test_name: "(test file failed to run)".into(),
                message: message.into(),
                stack: None,
            }],
        }
    }
}

pub trait TestRunner {
    /// One result per requested path, in request order.
    fn run(&self, test_files: &[String], framework: TestFramework, coverage: bool) -> Result<Vec<RunResult>>;
}

/* ============================================================
   Command runner
   ============================================================ */

/// `npx jest` / `npx vitest run` with a JSON report written to a temp file.
///
/// A custom command template may use `{files}` and `{output}`.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    repo_root: PathBuf,
    command: Option<String>,
}

impl CommandRunner {
    pub fn new(repo_root: impl Into<PathBuf>, cfg: &RunnerConfig) -> Self {
        Self {
            repo_root: repo_root.into(),
            command: cfg.command.clone(),
        }
    }

    fn template(&self, framework: TestFramework, coverage: bool) -> String {
        if let Some(cmd) = &self.command {
            if cmd.contains("{files}") {
                return cmd.clone();
            }
            return format!("{cmd} {{files}}");
        }

        match (framework, coverage) {
            (TestFramework::Jest, false) => "npx jest --json --outputFile={output} {files}".into(),
            (TestFramework::Jest, true) => {
                "npx jest --json --outputFile={output} --coverage --coverageReporters=json {files}".into()
            }
            (TestFramework::Vitest, false) => {
                "npx vitest run --reporter=json --outputFile={output} {files}".into()
            }
            (TestFramework::Vitest, true) => {
                "npx vitest run --reporter=json --outputFile={output} --coverage --coverage.reporter=json {files}".into()
            }
        }
    }
}

impl TestRunner for CommandRunner {
    fn run(&self, test_files: &[String], framework: TestFramework, coverage: bool) -> Result<Vec<RunResult>> {
        let report = tempfile::Builder::new()
            .prefix("deltatest-report-")
            .suffix(".json")
            .tempfile()
            .map_err(|e| Error::io(std::env::temp_dir(), e))?;
        let report_path = report.path().to_string_lossy().into_owned();

        let files = test_files
            .iter()
            .map(|f| shell_quote(f))
            .collect::<Vec<_>>()
            .join(" ");

        let template = self.template(framework, coverage);
        let out = run_hook(
            &self.repo_root,
            &template,
            &[("files", &files), ("output", &shell_quote(&report_path))],
            None,
        )?;

        // Failing tests exit non-zero; only a missing report is an error.
        let raw = std::fs::read_to_string(report.path()).unwrap_or_default();
        if raw.trim().is_empty() {
            return Err(Error::Command {
                command: out.command.clone(),
                message: format!("no JSON report produced ({})", out.summary()),
            });
        }

        parse_json_report(&raw, &self.repo_root, test_files).map_err(|e| Error::Command {
            command: out.command,
            message: format!("unparseable JSON report: {e}"),
        })
    }
}

/* ============================================================
   Report parsing (Jest and Vitest share the format)
   ============================================================ */

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonReport {
    #[serde(default)]
    test_results: Vec<JsonFileResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonFileResult {
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    assertion_results: Vec<JsonAssertion>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonAssertion {
    #[serde(default)]
    title: String,
    #[serde(default)]
    full_name: Option<String>,
    #[serde(default)]
    status: String,
    #[serde(default)]
    failure_messages: Vec<String>,
}

pub fn parse_json_report(
    raw: &str,
    repo_root: &Path,
    requested: &[String],
) -> std::result::Result<Vec<RunResult>, serde_json::Error> {
    let report: JsonReport = serde_json::from_str(raw)?;

    let results = requested
        .iter()
        .map(|path| {
            let abs = repo_root.join(path);
            let entry = report.test_results.iter().find(|r| {
                Path::new(&r.name) == abs.as_path() || r.name.ends_with(&format!("/{path}")) || r.name == *path
            });

            match entry {
                Some(entry) => file_result(path, entry),
                None => RunResult::suite_error(path, "runner reported no results for this file"),
            }
        })
        .collect();

    Ok(results)
}

fn file_result(path: &str, entry: &JsonFileResult) -> RunResult {
    if entry.assertion_results.is_empty() && entry.status == "failed" {
        return RunResult::suite_error(path, entry.message.trim());
    }

    let mut passed = 0;
    let mut failures = Vec::new();

    for a in &entry.assertion_results {
        match a.status.as_str() {
            "passed" => passed += 1,
            "failed" => {
                let (message, stack) = split_failure(&a.failure_messages.join("\n"));
                failures.push(TestFailure {
                    test_name: a.full_name.clone().unwrap_or_else(|| a.title.clone()),
                    message,
                    stack,
                });
            }
            _ => {}
        }
    }

    RunResult {
        test_file_path: path.to_string(),
        passed,
        failed: failures.len(),
        total: passed + failures.len(),
        failures,
    }
}

/// Message lines before the first `at ...` frame, and the frames.
fn split_failure(text: &str) -> (String, Option<String>) {
    let lines: Vec<&str> = text.lines().collect();
    let split = lines
        .iter()
        .position(|l| l.trim_start().starts_with("at "))
        .unwrap_or(lines.len());

    let message = lines[..split].join("\n").trim().to_string();
    let stack = lines[split..].join("\n").trim().to_string();

    (message, (!stack.is_empty()).then_some(stack))
}
