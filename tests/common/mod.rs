#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;

use deltatest::config::{Config, FixBudget};
use deltatest::detectors::framework::TestFramework;
use deltatest::testgen::file::ContentSource;
use deltatest::testgen::generator::{FixRequest, GenerateRequest, TestGenerator};
use deltatest::testgen::runner::{RunResult, TestFailure, TestRunner};
use deltatest::Result;

/// 20-line module; `mul` (lines 18-20) is the only addition.
pub const MATH_TS: &str = "export function add(a: number, b: number): number {
  return a + b;
}

export function sub(a: number, b: number): number {
  return a - b;
}

// Rounds to two decimals.
export function round2(n: number): number {
  return Math.round(n * 100) / 100;
}

export function neg(n: number): number {
  return -n;
}

export function mul(a: number, b: number): number {
  return a * b;
}
";

pub const MATH_DIFF: &str = "diff --git a/src/math.ts b/src/math.ts
index 1111111..2222222 100644
--- a/src/math.ts
+++ b/src/math.ts
@@ -14,3 +14,7 @@ export function neg(n: number): number {
 export function neg(n: number): number {
   return -n;
 }
+
+export function mul(a: number, b: number): number {
+  return a * b;
+}
";

pub fn config(budget: FixBudget) -> Config {
    Config {
        framework: Some(TestFramework::Vitest),
        max_fix_attempts: budget,
        ..Config::default()
    }
}

/* ---------- files ---------- */

#[derive(Default)]
pub struct MemFs {
    pub files: RefCell<BTreeMap<String, String>>,
    pub writes: RefCell<Vec<String>>,
}

impl MemFs {
    pub fn with(files: &[(&str, &str)]) -> Self {
        let fs = MemFs::default();
        for (p, c) in files {
            fs.files.borrow_mut().insert(p.to_string(), c.to_string());
        }
        fs
    }

    pub fn get(&self, path: &str) -> Option<String> {
        self.files.borrow().get(path).cloned()
    }

    pub fn write_count(&self) -> usize {
        self.writes.borrow().len()
    }
}

impl ContentSource for MemFs {
    fn file_exists(&self, path: &str) -> bool {
        self.files.borrow().contains_key(path)
    }

    fn read_file(&self, path: &str) -> Result<Option<String>> {
        Ok(self.get(path))
    }

    fn write_file(&self, path: &str, content: &str) -> Result<()> {
        self.writes.borrow_mut().push(path.to_string());
        self.files.borrow_mut().insert(path.to_string(), content.to_string());
        Ok(())
    }
}

/* ---------- generator ---------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixMode {
    /// Valid, slightly different content each attempt.
    Valid,
    /// Unbalanced braces.
    Broken,
}

pub struct FakeGenerator {
    pub fix_mode: FixMode,
    pub generate_calls: Cell<u32>,
    pub fix_calls: Cell<u32>,
}

impl FakeGenerator {
    pub fn new(fix_mode: FixMode) -> Self {
        Self {
            fix_mode,
            generate_calls: Cell::new(0),
            fix_calls: Cell::new(0),
        }
    }
}

pub fn describe_for(name: &str, import_path: &str) -> String {
    format!(
        "import {{ describe, expect, it }} from 'vitest';\nimport {{ {name} }} from '{import_path}';\n\ndescribe('{name}', () => {{\n  it('returns a number', () => {{\n    expect(typeof {name}(2, 3)).toBe('number');\n  }});\n}});\n"
    )
}

impl TestGenerator for FakeGenerator {
    fn generate(&self, req: &GenerateRequest<'_>) -> Result<String> {
        self.generate_calls.set(self.generate_calls.get() + 1);
        Ok(describe_for(&req.target.decl_name, req.import_path))
    }

    fn fix(&self, req: &FixRequest<'_>) -> Result<String> {
        self.fix_calls.set(self.fix_calls.get() + 1);
        match self.fix_mode {
            FixMode::Valid => Ok(req.current_content.replacen(
                "it('returns a number",
                &format!("it('returns a number #{}", req.attempt),
                1,
            )),
            FixMode::Broken => Ok("describe('mul', () => {\n  it('x', () => {\n".into()),
        }
    }
}

/* ---------- runner ---------- */

/// Failure counts per call; the last entry repeats.
pub struct ScriptedRunner {
    failed: RefCell<VecDeque<usize>>,
    pub calls: Cell<u32>,
    pub coverage_calls: Cell<u32>,
    /// Written when a coverage run happens.
    pub coverage_artifact: Option<(PathBuf, String)>,
}

impl ScriptedRunner {
    pub fn new(failed: &[usize]) -> Self {
        Self {
            failed: RefCell::new(failed.iter().copied().collect()),
            calls: Cell::new(0),
            coverage_calls: Cell::new(0),
            coverage_artifact: None,
        }
    }
}

impl TestRunner for ScriptedRunner {
    fn run(&self, test_files: &[String], _: TestFramework, coverage: bool) -> Result<Vec<RunResult>> {
        self.calls.set(self.calls.get() + 1);

        let failed = {
            let mut q = self.failed.borrow_mut();
            if q.len() > 1 {
                q.pop_front().unwrap_or(0)
            } else {
                q.front().copied().unwrap_or(0)
            }
        };

        if coverage {
            self.coverage_calls.set(self.coverage_calls.get() + 1);
            if let Some((path, body)) = &self.coverage_artifact {
                std::fs::create_dir_all(path.parent().unwrap()).unwrap();
                std::fs::write(path, body).unwrap();
            }
        }

        Ok(test_files
            .iter()
            .map(|f| RunResult {
                test_file_path: f.clone(),
                passed: 1,
                failed,
                total: 1 + failed,
                failures: (0..failed)
                    .map(|i| TestFailure {
                        test_name: format!("mul case {i}"),
                        message: "expected 6 to be 5".into(),
                        stack: None,
                    })
                    .collect(),
            })
            .collect())
    }
}

pub fn coverage_summary(lines_covered: u64) -> String {
    format!(
        r#"{{"total": {{
            "lines": {{"total": 100, "covered": {lines_covered}, "skipped": 0, "pct": {lines_covered}}},
            "statements": {{"total": 10, "covered": 5, "skipped": 0, "pct": 50}},
            "functions": {{"total": 4, "covered": 2, "skipped": 0, "pct": 50}},
            "branches": {{"total": 0, "covered": 0, "skipped": 0, "pct": 100}}
        }}}}"#
    )
}
