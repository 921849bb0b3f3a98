mod common;

use common::*;

use std::cell::Cell;

use deltatest::config::FixBudget;
use deltatest::detectors::framework::TestFramework;
use deltatest::state::{FileState, REJECTION_LIMIT};
use deltatest::testgen::generator::{FixRequest, GenerateRequest, TestGenerator};
use deltatest::testgen::runner::{RunResult, TestRunner};
use deltatest::testgen::validate::is_structurally_complete;
use deltatest::{Collaborators, Error, Pipeline, RunContext, RunSummary};

fn pipeline<'a>(
    cfg: deltatest::Config,
    root: &std::path::Path,
    gen: &'a FakeGenerator,
    fs: &'a MemFs,
    runner: Option<&'a ScriptedRunner>,
) -> Pipeline<'a> {
    pipeline_with(cfg, root, gen, fs, runner.map(|r| r as &dyn TestRunner))
}

fn pipeline_with<'a>(
    cfg: deltatest::Config,
    root: &std::path::Path,
    gen: &'a dyn TestGenerator,
    fs: &'a MemFs,
    runner: Option<&'a dyn TestRunner>,
) -> Pipeline<'a> {
    Pipeline::new(
        RunContext::new(cfg, root),
        Collaborators {
            generator: gen,
            files: fs,
            runner,
            type_checker: None,
            formatter: None,
        },
    )
}

#[test]
fn new_function_without_tests_gets_a_new_file() {
    let fs = MemFs::with(&[("src/math.ts", MATH_TS)]);
    let gen = FakeGenerator::new(FixMode::Valid);

    let summary = pipeline(config(FixBudget::Limited(0)), std::path::Path::new("."), &gen, &fs, None)
        .run(MATH_DIFF)
        .unwrap();

    assert_eq!(summary.targets_processed, 1);
    assert_eq!(summary.tests_generated, 1);
    assert_eq!(summary.test_files, vec!["src/math.test.ts"]);
    assert!(summary.errors.is_empty(), "{:?}", summary.errors);

    let written = fs.get("src/math.test.ts").unwrap();
    assert!(written.contains("describe('mul'"));
    assert!(written.contains("from './math'"));
    assert_eq!(fs.write_count(), 1);
}

#[test]
fn existing_block_for_target_is_not_regenerated() {
    let existing = "import { describe, expect, it } from 'vitest';\nimport { mul } from './math';\n\ndescribe('mul', () => {\n  it('multiplies', () => {\n    expect(mul(2, 3)).toBe(6);\n  });\n});\n";
    let fs = MemFs::with(&[("src/math.ts", MATH_TS), ("src/math.test.ts", existing)]);
    let gen = FakeGenerator::new(FixMode::Valid);

    let summary = pipeline(config(FixBudget::Limited(0)), std::path::Path::new("."), &gen, &fs, None)
        .run(MATH_DIFF)
        .unwrap();

    assert_eq!(summary.targets_processed, 1);
    assert_eq!(summary.tests_generated, 0);
    assert_eq!(gen.generate_calls.get(), 0);
    assert_eq!(fs.write_count(), 0);
    assert_eq!(fs.get("src/math.test.ts").as_deref(), Some(existing));
}

#[test]
fn fix_loop_stops_once_failures_clear() {
    let fs = MemFs::with(&[("src/math.ts", MATH_TS)]);
    let gen = FakeGenerator::new(FixMode::Valid);
    let runner = ScriptedRunner::new(&[2, 0]);

    let summary = pipeline(config(FixBudget::Limited(3)), std::path::Path::new("."), &gen, &fs, Some(&runner))
        .run(MATH_DIFF)
        .unwrap();

    assert_eq!(runner.calls.get(), 2);
    assert_eq!(gen.fix_calls.get(), 1);
    assert_eq!(summary.tests_failed, 0);
    assert_eq!(summary.tests_passed, 1);
    assert_eq!(summary.file_states["src/math.test.ts"], FileState::Passing);
    assert!(fs.get("src/math.test.ts").unwrap().contains("returns a number #1"));
}

#[test]
fn attempt_budget_caps_runner_calls() {
    let fs = MemFs::with(&[("src/math.ts", MATH_TS)]);
    let gen = FakeGenerator::new(FixMode::Valid);
    let runner = ScriptedRunner::new(&[1]);

    let summary = pipeline(config(FixBudget::Limited(3)), std::path::Path::new("."), &gen, &fs, Some(&runner))
        .run(MATH_DIFF)
        .unwrap();

    assert_eq!(runner.calls.get(), 4);
    assert_eq!(gen.fix_calls.get(), 3);
    assert_eq!(summary.tests_failed, 1);
    assert_eq!(summary.file_states["src/math.test.ts"], FileState::Exhausted);
}

#[test]
fn repeated_syntax_failures_quarantine_without_corrupting_disk() {
    let fs = MemFs::with(&[("src/math.ts", MATH_TS)]);
    let gen = FakeGenerator::new(FixMode::Broken);
    let runner = ScriptedRunner::new(&[1]);

    let summary = pipeline(config(FixBudget::Unbounded), std::path::Path::new("."), &gen, &fs, Some(&runner))
        .run(MATH_DIFF)
        .unwrap();

    assert_eq!(gen.fix_calls.get(), 3);
    assert_eq!(runner.calls.get(), 3);
    assert_eq!(summary.file_states["src/math.test.ts"], FileState::SyntaxQuarantine);

    let on_disk = fs.get("src/math.test.ts").unwrap();
    assert!(is_structurally_complete(&on_disk));
    assert!(on_disk.contains("describe('mul'"));
    // Only the initial write reached disk.
    assert_eq!(fs.write_count(), 1);
    assert!(summary.errors.iter().any(|e| e.message.contains("quarantined")));
}

#[test]
fn fix_loop_without_runner_is_fatal() {
    let fs = MemFs::with(&[("src/math.ts", MATH_TS)]);
    let gen = FakeGenerator::new(FixMode::Valid);

    let err = pipeline(config(FixBudget::Limited(3)), std::path::Path::new("."), &gen, &fs, None)
        .run(MATH_DIFF)
        .unwrap_err();

    assert!(matches!(err, Error::MissingRunner));
    assert_eq!(fs.write_count(), 0);
}

#[test]
fn dry_run_writes_nothing() {
    let fs = MemFs::with(&[("src/math.ts", MATH_TS)]);
    let gen = FakeGenerator::new(FixMode::Valid);
    let mut cfg = config(FixBudget::Limited(3));
    cfg.dry_run = true;

    let summary = pipeline(cfg, std::path::Path::new("."), &gen, &fs, None).run(MATH_DIFF).unwrap();

    assert_eq!(summary.tests_generated, 1);
    assert_eq!(summary.test_files, vec!["src/math.test.ts"]);
    assert_eq!(fs.write_count(), 0);
}

#[test]
fn coverage_delta_against_existing_report() {
    let dir = tempfile::tempdir().unwrap();
    let report = dir.path().join("coverage/coverage-summary.json");
    std::fs::create_dir_all(report.parent().unwrap()).unwrap();
    std::fs::write(&report, coverage_summary(70)).unwrap();

    let fs = MemFs::with(&[("src/math.ts", MATH_TS)]);
    let gen = FakeGenerator::new(FixMode::Valid);
    let mut runner = ScriptedRunner::new(&[0]);
    runner.coverage_artifact = Some((report.clone(), coverage_summary(82)));

    let mut cfg = config(FixBudget::Limited(3));
    cfg.coverage = true;
    cfg.coverage_file = "coverage/coverage-summary.json".into();

    let summary = pipeline(cfg, dir.path(), &gen, &fs, Some(&runner)).run(MATH_DIFF).unwrap();

    assert_eq!(runner.calls.get(), 2);
    assert_eq!(runner.coverage_calls.get(), 1);
    let delta = summary.coverage_delta.unwrap();
    assert!((delta.lines - 12.0).abs() < 0.05);
    assert_eq!(delta.statements, 0.0);
    assert_eq!(summary.coverage_report.unwrap().lines.pct, 82.0);
}

#[test]
fn extraction_is_repeatable() {
    let fs = MemFs::with(&[("src/math.ts", MATH_TS)]);
    let gen = FakeGenerator::new(FixMode::Valid);
    let mut p = pipeline(config(FixBudget::Limited(0)), std::path::Path::new("."), &gen, &fs, None);

    let first = p.targets(MATH_DIFF, &mut RunSummary::default());
    let second = p.targets(MATH_DIFF, &mut RunSummary::default());

    assert_eq!(first, second);
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].decl_name, "mul");
    assert_eq!((first[0].start_line, first[0].end_line), (18, 20));
}

#[test]
fn deletion_only_change_selects_nothing() {
    let diff = "diff --git a/src/math.ts b/src/math.ts
index 1111111..2222222 100644
--- a/src/math.ts
+++ b/src/math.ts
@@ -18,4 +18,3 @@ export function neg(n: number): number {
 export function mul(a: number, b: number): number {
-  // multiply
   return a * b;
 }
";
    let fs = MemFs::with(&[("src/math.ts", MATH_TS)]);
    let gen = FakeGenerator::new(FixMode::Valid);
    let mut p = pipeline(config(FixBudget::Limited(0)), std::path::Path::new("."), &gen, &fs, None);

    assert!(p.targets(diff, &mut RunSummary::default()).is_empty());
}

/// Repairs that use Jest mocks inside a Vitest file.
struct ForeignMockGenerator {
    inner: FakeGenerator,
}

impl TestGenerator for ForeignMockGenerator {
    fn generate(&self, req: &GenerateRequest<'_>) -> deltatest::Result<String> {
        self.inner.generate(req)
    }

    fn fix(&self, req: &FixRequest<'_>) -> deltatest::Result<String> {
        self.inner.fix_calls.set(self.inner.fix_calls.get() + 1);
        Ok(req.current_content.replacen("expect(", "jest.fn();\n    expect(", 1))
    }
}

#[test]
fn rejected_repairs_keep_trying_until_budget_is_spent() {
    let fs = MemFs::with(&[("src/math.ts", MATH_TS)]);
    let gen = ForeignMockGenerator {
        inner: FakeGenerator::new(FixMode::Valid),
    };
    let runner = ScriptedRunner::new(&[1]);

    let summary = pipeline_with(
        config(FixBudget::Limited(3)),
        std::path::Path::new("."),
        &gen,
        &fs,
        Some(&runner),
    )
    .run(MATH_DIFF)
    .unwrap();

    assert_eq!(gen.inner.fix_calls.get(), 3);
    assert_eq!(runner.calls.get(), 4);
    assert_eq!(summary.file_states["src/math.test.ts"], FileState::Exhausted);
    // Rejected repairs never reach disk.
    assert_eq!(fs.write_count(), 1);
    assert!(!fs.get("src/math.test.ts").unwrap().contains("jest.fn"));
}

#[test]
fn rejected_repairs_stop_at_the_limit_when_unbounded() {
    let fs = MemFs::with(&[("src/math.ts", MATH_TS)]);
    let gen = ForeignMockGenerator {
        inner: FakeGenerator::new(FixMode::Valid),
    };
    let runner = ScriptedRunner::new(&[1]);

    let summary = pipeline_with(
        config(FixBudget::Unbounded),
        std::path::Path::new("."),
        &gen,
        &fs,
        Some(&runner),
    )
    .run(MATH_DIFF)
    .unwrap();

    assert_eq!(gen.inner.fix_calls.get(), REJECTION_LIMIT);
    assert_eq!(runner.calls.get(), REJECTION_LIMIT);
    assert_eq!(summary.file_states["src/math.test.ts"], FileState::Exhausted);
    assert!(summary.errors.iter().any(|e| e.message.starts_with("exhausted")));
}

struct BrokenRunner {
    calls: Cell<u32>,
}

impl TestRunner for BrokenRunner {
    fn run(&self, _: &[String], _: TestFramework, _: bool) -> deltatest::Result<Vec<RunResult>> {
        self.calls.set(self.calls.get() + 1);
        Err(Error::Command {
            command: "npx vitest run".into(),
            message: "reporter output was not JSON".into(),
        })
    }
}

#[test]
fn runner_failure_is_recorded_and_run_still_summarizes() {
    let fs = MemFs::with(&[("src/math.ts", MATH_TS)]);
    let gen = FakeGenerator::new(FixMode::Valid);
    let runner = BrokenRunner { calls: Cell::new(0) };

    let summary = pipeline_with(
        config(FixBudget::Limited(3)),
        std::path::Path::new("."),
        &gen,
        &fs,
        Some(&runner),
    )
    .run(MATH_DIFF)
    .unwrap();

    assert_eq!(runner.calls.get(), 1);
    assert_eq!(gen.fix_calls.get(), 0);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].subject, "test runner");
    assert_eq!(summary.tests_generated, 1);
    assert_eq!(summary.test_files, vec!["src/math.test.ts"]);
    assert_eq!(summary.file_states["src/math.test.ts"], FileState::Pending);
}

/// Valid first repair, then broken ones while the file is edited behind
/// the run's back.
struct DriftingGenerator<'a> {
    inner: FakeGenerator,
    fs: &'a MemFs,
}

impl TestGenerator for DriftingGenerator<'_> {
    fn generate(&self, req: &GenerateRequest<'_>) -> deltatest::Result<String> {
        self.inner.generate(req)
    }

    fn fix(&self, req: &FixRequest<'_>) -> deltatest::Result<String> {
        if req.attempt == 1 {
            return self.inner.fix(req);
        }
        self.inner.fix_calls.set(self.inner.fix_calls.get() + 1);
        self.fs
            .files
            .borrow_mut()
            .insert(req.test_file_path.to_string(), "// edited elsewhere\n".into());
        Ok("describe('mul', () => {\n  it('x', () => {\n".into())
    }
}

#[test]
fn quarantine_restores_last_valid_repair_on_disk() {
    let fs = MemFs::with(&[("src/math.ts", MATH_TS)]);
    let gen = DriftingGenerator {
        inner: FakeGenerator::new(FixMode::Valid),
        fs: &fs,
    };
    let runner = ScriptedRunner::new(&[1]);

    let summary = pipeline_with(
        config(FixBudget::Unbounded),
        std::path::Path::new("."),
        &gen,
        &fs,
        Some(&runner),
    )
    .run(MATH_DIFF)
    .unwrap();

    assert_eq!(gen.inner.fix_calls.get(), 4);
    assert_eq!(runner.calls.get(), 4);
    assert_eq!(summary.file_states["src/math.test.ts"], FileState::SyntaxQuarantine);

    let on_disk = fs.get("src/math.test.ts").unwrap();
    assert!(on_disk.contains("returns a number #1"), "{on_disk}");
    assert!(is_structurally_complete(&on_disk));
    // initial write, accepted repair, rollback
    assert_eq!(fs.write_count(), 3);
}

/// Reports nothing on the first call, then passes.
struct SilentFirstRunner {
    calls: Cell<u32>,
}

impl TestRunner for SilentFirstRunner {
    fn run(&self, files: &[String], _: TestFramework, _: bool) -> deltatest::Result<Vec<RunResult>> {
        self.calls.set(self.calls.get() + 1);
        if self.calls.get() == 1 {
            return Ok(Vec::new());
        }
        Ok(files.iter().map(|f| RunResult::passing(f.clone(), 1)).collect())
    }
}

#[test]
fn file_without_a_result_is_repaired_not_settled() {
    let fs = MemFs::with(&[("src/math.ts", MATH_TS)]);
    let gen = FakeGenerator::new(FixMode::Valid);
    let runner = SilentFirstRunner { calls: Cell::new(0) };

    let summary = pipeline_with(
        config(FixBudget::Limited(3)),
        std::path::Path::new("."),
        &gen,
        &fs,
        Some(&runner),
    )
    .run(MATH_DIFF)
    .unwrap();

    assert_eq!(gen.fix_calls.get(), 1);
    assert_eq!(runner.calls.get(), 2);
    assert_eq!(summary.file_states["src/math.test.ts"], FileState::Passing);
    assert_eq!(summary.tests_failed, 0);
}
