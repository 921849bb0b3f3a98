//! testgen/fix.rs
//!
//! Run → repair → validate → write, until every file passes, the budget is
//! spent, or an iteration changes nothing.
//!
//! Per-file states live on the buffer (`FileState`). A repair only reaches
//! disk after validation; three syntax-class rejections in a row quarantine
//! the file and restore its last valid content.

use std::collections::BTreeMap;

use similar::{ChangeTag, TextDiff};

use crate::config::Config;
use crate::detectors::framework::TestFramework;
use crate::logger::RunLog;
use crate::state::{FileState, RunSummary, SyntaxStrike, TestFileBuffer};
use crate::testgen::file::ContentSource;
use crate::testgen::format::{format_or_keep, Formatter};
use crate::testgen::generator::{FixRequest, TestGenerator};
use crate::testgen::merge::count_test_calls;
use crate::testgen::runner::{RunResult, TestFailure, TestRunner};
use crate::testgen::validate::FileValidator;

#[derive(Debug, Clone, Default)]
pub struct FixOutcome {
    pub runner_calls: u32,
    /// Repair attempts started (iterations that asked for fixes).
    pub attempts: u32,
    pub last_results: Vec<RunResult>,
    /// Something was written after the last runner call.
    pub dirty: bool,
    /// The runner errored; `last_results` is whatever came before.
    pub runner_failed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Repair {
    Written,
    /// Syntax strike below the quarantine threshold.
    Struck,
    /// Non-syntax rejection below the rejection limit.
    Rejected,
    Quarantined,
    Unchanged,
    Abandoned,
}

impl Repair {
    /// The file is still being worked on.
    fn is_progress(self) -> bool {
        matches!(self, Repair::Written | Repair::Struck | Repair::Rejected)
    }
}

pub struct FixLoop<'a> {
    config: &'a Config,
    framework: TestFramework,
    generator: &'a dyn TestGenerator,
    runner: &'a dyn TestRunner,
    files: &'a dyn ContentSource,
    validator: &'a FileValidator<'a>,
    formatter: Option<&'a dyn Formatter>,
}

impl<'a> FixLoop<'a> {
    pub fn new(
        config: &'a Config,
        framework: TestFramework,
        generator: &'a dyn TestGenerator,
        runner: &'a dyn TestRunner,
        files: &'a dyn ContentSource,
        validator: &'a FileValidator<'a>,
    ) -> Self {
        Self {
            config,
            framework,
            generator,
            runner,
            files,
            validator,
            formatter: None,
        }
    }

    pub fn with_formatter(mut self, formatter: Option<&'a dyn Formatter>) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn run(
        &self,
        buffers: &mut BTreeMap<String, TestFileBuffer>,
        log: &mut RunLog,
        summary: &mut RunSummary,
    ) -> FixOutcome {
        let budget = self.config.max_fix_attempts;
        let paths: Vec<String> = buffers.keys().cloned().collect();
        let mut outcome = FixOutcome::default();
        let mut rejections: BTreeMap<String, Vec<String>> = BTreeMap::new();

        if paths.is_empty() {
            return outcome;
        }

        loop {
            let results = match self.runner.run(&paths, self.framework, false) {
                Ok(r) => r,
                Err(e) => {
                    log.error(format!("test runner failed: {e}"));
                    summary.push_error("test runner", e.to_string());
                    outcome.runner_failed = true;
                    break;
                }
            };
            outcome.runner_calls += 1;
            outcome.dirty = false;

            apply_results(buffers, &results, log);
            outcome.last_results = results;

            let failing: Vec<String> = buffers
                .values()
                .filter(|b| b.needs_repair())
                .map(|b| b.path.clone())
                .collect();

            if failing.is_empty() {
                log.success(format!("fix loop settled after {} run(s)", outcome.runner_calls));
                break;
            }

            if budget.exhausted(outcome.attempts) {
                for path in &failing {
                    if let Some(buf) = buffers.get_mut(path) {
                        buf.exhaust();
                    }
                }
                log.warn(format!(
                    "fix budget of {budget} spent; {} file(s) still failing",
                    failing.len()
                ));
                break;
            }

            outcome.attempts += 1;
            let mut progress = false;

            for path in &failing {
                let Some(buf) = buffers.get_mut(path) else {
                    continue;
                };
                let failures = failures_for(&outcome.last_results, path);
                let previous = rejections.remove(path).unwrap_or_default();

                let step = self.repair(
                    buf,
                    &failures,
                    &previous,
                    outcome.attempts,
                    &mut rejections,
                    log,
                    summary,
                );
                if step == Repair::Written {
                    outcome.dirty = true;
                }
                progress |= step.is_progress();
            }

            if !progress {
                log.warn(format!(
                    "no file improved on attempt {}; stopping early",
                    outcome.attempts
                ));
                break;
            }
        }

        outcome
    }

    #[allow(clippy::too_many_arguments)]
    fn repair(
        &self,
        buf: &mut TestFileBuffer,
        failures: &[TestFailure],
        previous_rejection: &[String],
        attempt: u32,
        rejections: &mut BTreeMap<String, Vec<String>>,
        log: &mut RunLog,
        summary: &mut RunSummary,
    ) -> Repair {
        let path = buf.path.clone();
        let req = FixRequest {
            test_file_path: &path,
            framework: self.framework,
            current_content: &buf.content,
            declaration_sources: &buf.declaration_sources,
            failures,
            validation_errors: previous_rejection,
            private_members: &buf.private_members,
            attempt,
            max_attempts: self.config.max_fix_attempts,
        };

        let fixed = match self.generator.fix(&req) {
            Ok(text) => text,
            Err(e) => {
                log.error(format!("repair of {path} failed: {e}"));
                summary.push_error(&path, e.to_string());
                buf.exhaust();
                return Repair::Abandoned;
            }
        };

        let fixed = format_or_keep(self.formatter, &path, fixed, log);
        let (fixed, result) = self
            .validator
            .validate_with_autofix(&path, &fixed, &buf.private_members);

        if !result.valid {
            let messages = result.errors.iter().map(ToString::to_string).collect();
            rejections.insert(path.clone(), messages);

            if !result.has_syntax_errors() {
                log.warn(format!("repair of {path} rejected: {}", result.summary()));
                if buf.record_rejection() {
                    return Repair::Rejected;
                }
                log.warn(format!("{path} given up after {} rejected repairs", buf.rejection_count));
                summary.push_error(&path, format!("exhausted: {}", result.summary()));
                return Repair::Abandoned;
            }

            return match buf.record_syntax_failure() {
                SyntaxStrike::Counted(n) => {
                    log.warn(format!(
                        "repair of {path} is not valid syntax ({n} in a row): {}",
                        result.summary()
                    ));
                    Repair::Struck
                }
                SyntaxStrike::Quarantined => {
                    self.restore(buf, log, summary);
                    Repair::Quarantined
                }
            };
        }

        if fixed == buf.content {
            log.info(format!("repair of {path} changed nothing"));
            return Repair::Unchanged;
        }

        let before = count_test_calls(&buf.content);
        let after = count_test_calls(&fixed);
        if after < before {
            log.warn(format!("repair of {path} shrank test calls from {before} to {after}"));
        }

        if let Err(e) = self.files.write_file(&path, &fixed) {
            log.error(format!("write {path}: {e}"));
            summary.push_error(&path, e.to_string());
            buf.exhaust();
            return Repair::Abandoned;
        }

        let (added, removed) = line_stats(&buf.content, &fixed);
        log.info(format!("repaired {path} (attempt {attempt}, +{added} -{removed})"));

        buf.accept_repair(fixed);
        buf.state = FileState::Pending;
        Repair::Written
    }

    /// Put the last valid content back on disk if it differs.
    fn restore(&self, buf: &TestFileBuffer, log: &mut RunLog, summary: &mut RunSummary) {
        let path = &buf.path;
        let on_disk = self.files.read_file(path).ok().flatten();

        if buf.last_valid_content.is_some() && on_disk.as_deref() != Some(buf.content.as_str()) {
            if let Err(e) = self.files.write_file(path, &buf.content) {
                log.error(format!("restore {path}: {e}"));
            }
        }

        log.warn(format!("{path} quarantined after repeated syntax failures"));
        summary.push_error(path, "quarantined: repeated syntactically invalid repairs");
    }
}

/// Feed runner verdicts into the buffers. A file the runner did not report
/// on counts as failing.
pub(crate) fn apply_results(
    buffers: &mut BTreeMap<String, TestFileBuffer>,
    results: &[RunResult],
    log: &mut RunLog,
) {
    for (path, buf) in buffers.iter_mut() {
        let mut reported = results.iter().filter(|r| &r.test_file_path == path).peekable();
        if reported.peek().is_none() {
            log.warn(format!("no test result for {path}"));
            buf.record_missing_run();
            continue;
        }
        let failed: usize = reported.map(|r| r.failed).sum();
        buf.record_run(failed);
    }
}

fn failures_for(results: &[RunResult], path: &str) -> Vec<TestFailure> {
    results
        .iter()
        .filter(|r| r.test_file_path == path)
        .flat_map(|r| r.failures.iter().cloned())
        .collect()
}

fn line_stats(old: &str, new: &str) -> (usize, usize) {
    let diff = TextDiff::from_lines(old, new);
    diff.iter_all_changes()
        .fold((0, 0), |(a, d), c| match c.tag() {
            ChangeTag::Insert => (a + 1, d),
            ChangeTag::Delete => (a, d + 1),
            ChangeTag::Equal => (a, d),
        })
}
