//! pipeline.rs
//!
//! One run: diff → targets → buffers → initial write → fix loop → summary.

use std::collections::BTreeMap;

use crate::detectors::ast::targets::extract_targets;
use crate::detectors::diff_analyzer::{resolve_ranges, split_diff_by_file, FileStatus};
use crate::detectors::framework::{detect_framework, TestFramework};
use crate::detectors::language::is_source_file;
use crate::error::{Error, Result};
use crate::state::{RunContext, RunSummary, TestFileBuffer, TestTarget};
use crate::testgen::coverage::{read_snapshot, CoverageSnapshot};
use crate::testgen::file::ContentSource;
use crate::testgen::fix::{apply_results, FixLoop, FixOutcome};
use crate::testgen::format::Formatter;
use crate::testgen::generator::{GenerationCoordinator, TestGenerator};
use crate::testgen::runner::{RunResult, TestRunner};
use crate::testgen::typecheck::TypeChecker;
use crate::testgen::validate::FileValidator;

/// External pieces a run talks to.
pub struct Collaborators<'a> {
    pub generator: &'a dyn TestGenerator,
    /// Source files, existing tests and test writes.
    pub files: &'a dyn ContentSource,
    pub runner: Option<&'a dyn TestRunner>,
    pub type_checker: Option<&'a dyn TypeChecker>,
    pub formatter: Option<&'a dyn Formatter>,
}

pub struct Pipeline<'a> {
    ctx: RunContext,
    with: Collaborators<'a>,
    framework: TestFramework,
}

impl<'a> Pipeline<'a> {
    pub fn new(ctx: RunContext, with: Collaborators<'a>) -> Self {
        let framework = ctx
            .config
            .framework
            .or_else(|| detect_framework(&ctx.repo_root))
            .unwrap_or(TestFramework::Jest);

        Self {
            ctx,
            with,
            framework,
        }
    }

    pub fn framework(&self) -> TestFramework {
        self.framework
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Targets for every source file in `diff`, in diff order. Files that
    /// cannot be read or parsed are logged and skipped.
    pub fn targets(&mut self, diff: &str, summary: &mut RunSummary) -> Vec<TestTarget> {
        let cfg = &self.ctx.config;
        let log = &mut self.ctx.log;
        let mut out = Vec::new();

        for file in split_diff_by_file(diff) {
            if file.status == FileStatus::Removed
                || !is_source_file(&file.path)
                || cfg.is_excluded(&file.path)
            {
                continue;
            }

            let source = match self.with.files.read_file(&file.path) {
                Ok(Some(s)) => s,
                Ok(None) => {
                    log.warn(format!("{}: not found, skipped", file.path));
                    continue;
                }
                Err(e) => {
                    log.warn(format!("{}: {e}", file.path));
                    summary.push_error(&file.path, e.to_string());
                    continue;
                }
            };

            let ranges = match resolve_ranges(&file, Some(&source)) {
                Ok(r) => r,
                Err(e) => {
                    log.warn(format!("{}: {e}", file.path));
                    summary.push_error(&file.path, e.to_string());
                    continue;
                }
            };

            match extract_targets(&file.path, &source, &ranges, cfg, self.with.files) {
                Ok(targets) => {
                    tracing::debug!(
                        file = %file.path,
                        ranges = ranges.len(),
                        targets = targets.len(),
                        "extracted"
                    );
                    out.extend(targets);
                }
                Err(e) => {
                    log.warn(format!("{}: {e}", file.path));
                    summary.push_error(&file.path, e.to_string());
                }
            }
        }

        out
    }

    pub fn run(&mut self, diff: &str) -> Result<RunSummary> {
        let needs_runner = self.ctx.config.needs_runner();
        if needs_runner && self.with.runner.is_none() {
            return Err(Error::MissingRunner);
        }

        let mut summary = RunSummary {
            run_id: self.ctx.run_id.clone(),
            started_at: Some(self.ctx.started_at),
            ..RunSummary::default()
        };

        let targets = self.targets(diff, &mut summary);
        self.ctx.log.info(format!(
            "{} target(s), framework {}",
            targets.len(),
            self.framework
        ));
        if targets.is_empty() {
            return Ok(summary);
        }

        let baseline = self.baseline_coverage();

        let coordinator = GenerationCoordinator::new(
            &self.ctx.config,
            self.framework,
            self.with.generator,
            self.with.files,
        )
        .with_formatter(self.with.formatter);
        let mut buffers = coordinator.run(&targets, &mut self.ctx.log, &mut summary);

        if self.ctx.config.dry_run {
            summary.test_files = buffers.keys().cloned().collect();
            self.ctx.log.info(format!("dry run: {} file(s) not written", buffers.len()));
            finish(&mut summary, &buffers, &[]);
            return Ok(summary);
        }

        let validator = FileValidator::new(Some(self.framework), self.with.type_checker);
        self.write_initial(&mut buffers, &validator, &mut summary);

        let mut results = Vec::new();
        if let (true, Some(runner)) = (needs_runner, self.with.runner) {
            let fix = FixLoop::new(
                &self.ctx.config,
                self.framework,
                self.with.generator,
                runner,
                self.with.files,
                &validator,
            )
            .with_formatter(self.with.formatter);

            let outcome = fix.run(&mut buffers, &mut self.ctx.log, &mut summary);
            results = self.final_run(runner, &mut buffers, outcome, &mut summary);

            if let Some(base) = baseline {
                if let Some(current) = self.current_coverage(&mut summary) {
                    summary.coverage_delta = Some(current.delta_from(&base));
                }
            } else if self.ctx.config.coverage {
                summary.coverage_report = self.current_coverage(&mut summary);
            }
        }

        finish(&mut summary, &buffers, &results);
        self.ctx.log.success(format!(
            "{} generated, {} passed, {} failed across {} file(s)",
            summary.tests_generated,
            summary.tests_passed,
            summary.tests_failed,
            summary.test_files.len()
        ));
        Ok(summary)
    }

    /// Validate, auto-import, and write each buffer. Syntax-invalid buffers
    /// are dropped; other issues are left for the fix loop.
    fn write_initial(
        &mut self,
        buffers: &mut BTreeMap<String, TestFileBuffer>,
        validator: &FileValidator<'_>,
        summary: &mut RunSummary,
    ) {
        let log = &mut self.ctx.log;
        let mut dropped = Vec::new();

        for (path, buf) in buffers.iter_mut() {
            let (content, result) =
                validator.validate_with_autofix(path, &buf.content, &buf.private_members);

            if result.has_syntax_errors() {
                log.error(format!("{path} not written: {}", result.summary()));
                summary.push_error(path, format!("not written: {}", result.summary()));
                dropped.push(path.clone());
                continue;
            }
            if !result.valid {
                log.warn(format!("{path}: {}", result.summary()));
            }
            for w in &result.warnings {
                log.warn(format!("{path}: {w}"));
            }

            if let Err(e) = self.with.files.write_file(path, &content) {
                log.error(format!("write {path}: {e}"));
                summary.push_error(path, e.to_string());
                dropped.push(path.clone());
                continue;
            }

            buf.accept_repair(content);
            summary.test_files.push(path.clone());
            log.info(format!("wrote {path} ({} target(s))", buf.target_names.len()));
        }

        for path in dropped {
            buffers.remove(&path);
        }
    }

    /// Authoritative counts. Reuses the last loop run when nothing changed
    /// on disk and coverage is off, or when the runner already failed.
    fn final_run(
        &mut self,
        runner: &dyn TestRunner,
        buffers: &mut BTreeMap<String, TestFileBuffer>,
        outcome: FixOutcome,
        summary: &mut RunSummary,
    ) -> Vec<RunResult> {
        let coverage = self.ctx.config.coverage;
        if outcome.runner_failed || (!coverage && !outcome.dirty && outcome.runner_calls > 0) {
            return outcome.last_results;
        }

        let paths: Vec<String> = buffers.keys().cloned().collect();
        if paths.is_empty() {
            return outcome.last_results;
        }

        match runner.run(&paths, self.framework, coverage) {
            Ok(results) => {
                apply_results(buffers, &results, &mut self.ctx.log);
                results
            }
            Err(e) => {
                self.ctx.log.error(format!("final test run failed: {e}"));
                summary.push_error("test runner", e.to_string());
                outcome.last_results
            }
        }
    }

    fn coverage_path(&self) -> std::path::PathBuf {
        self.ctx.repo_root.join(&self.ctx.config.coverage_file)
    }

    fn baseline_coverage(&mut self) -> Option<CoverageSnapshot> {
        if !self.ctx.config.coverage {
            return None;
        }
        match read_snapshot(&self.coverage_path()) {
            Ok(snap) => snap,
            Err(e) => {
                self.ctx.log.warn(format!("baseline coverage ignored: {e}"));
                None
            }
        }
    }

    fn current_coverage(&mut self, summary: &mut RunSummary) -> Option<CoverageSnapshot> {
        match read_snapshot(&self.coverage_path()) {
            Ok(Some(snap)) => {
                summary.coverage_report = Some(snap);
                Some(snap)
            }
            Ok(None) => {
                self.ctx.log.warn("coverage requested but no report was produced");
                None
            }
            Err(e) => {
                self.ctx.log.warn(format!("coverage: {e}"));
                summary.push_error("coverage", e.to_string());
                None
            }
        }
    }
}

fn finish(
    summary: &mut RunSummary,
    buffers: &BTreeMap<String, TestFileBuffer>,
    results: &[RunResult],
) {
    summary.tests_passed = results.iter().map(|r| r.passed).sum();
    summary.tests_failed = results.iter().map(|r| r.failed).sum();
    summary.tests_total = results.iter().map(|r| r.total).sum();
    summary.file_states = buffers.iter().map(|(p, b)| (p.clone(), b.state)).collect();
}
