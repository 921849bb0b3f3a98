//! generator.rs
//!
//! Target loop: destination, existing content, generation, merge and the
//! per-file buffers the fix loop starts from.

use std::collections::{BTreeMap, BTreeSet};
use std::thread;
use std::time::Duration;

use crate::config::{Config, FixBudget};
use crate::detectors::framework::TestFramework;
use crate::error::{Error, Result};
use crate::logger::RunLog;
use crate::state::{RunSummary, TestFileBuffer, TestTarget};
use crate::testgen::file::ContentSource;
use crate::testgen::format::{format_or_keep, Formatter};
use crate::testgen::merge::{has_block_for, merge_test_content};
use crate::testgen::resolve::{destination_path, import_path};
use crate::testgen::runner::TestFailure;
use crate::testgen::validate::is_structurally_complete;

/// Everything the generation backend sees for one target.
#[derive(Debug, Clone, Copy)]
pub struct GenerateRequest<'a> {
    pub target: &'a TestTarget,
    pub framework: TestFramework,
    /// Current content of the destination, if any.
    pub existing_content: Option<&'a str>,
    pub test_file_path: &'a str,
    pub import_path: &'a str,
    pub scaffold_only: bool,
}

/// A repair request. `current_content` is always the whole file.
#[derive(Debug, Clone, Copy)]
pub struct FixRequest<'a> {
    pub test_file_path: &'a str,
    pub framework: TestFramework,
    pub current_content: &'a str,
    pub declaration_sources: &'a [String],
    pub failures: &'a [TestFailure],
    /// Validation complaints about the previous repair, if it was rejected.
    pub validation_errors: &'a [String],
    pub private_members: &'a BTreeSet<String>,
    pub attempt: u32,
    pub max_attempts: FixBudget,
}

pub trait TestGenerator {
    fn generate(&self, req: &GenerateRequest<'_>) -> Result<String>;

    /// Must return the complete file, untouched blocks included.
    fn fix(&self, req: &FixRequest<'_>) -> Result<String>;
}

enum Processed {
    Generated(String),
    AlreadyTested(String),
}

pub struct GenerationCoordinator<'a> {
    config: &'a Config,
    framework: TestFramework,
    generator: &'a dyn TestGenerator,
    source: &'a dyn ContentSource,
    formatter: Option<&'a dyn Formatter>,
}

impl<'a> GenerationCoordinator<'a> {
    pub fn new(
        config: &'a Config,
        framework: TestFramework,
        generator: &'a dyn TestGenerator,
        source: &'a dyn ContentSource,
    ) -> Self {
        Self {
            config,
            framework,
            generator,
            source,
            formatter: None,
        }
    }

    pub fn with_formatter(mut self, formatter: Option<&'a dyn Formatter>) -> Self {
        self.formatter = formatter;
        self
    }

    /// Process targets in order, up to `max_targets`. Per-target failures
    /// land in `summary.errors` and never stop the loop.
    pub fn run(
        &self,
        targets: &[TestTarget],
        log: &mut RunLog,
        summary: &mut RunSummary,
    ) -> BTreeMap<String, TestFileBuffer> {
        let limit = self.config.max_targets;
        if targets.len() > limit {
            let dropped = targets.len() - limit;
            summary.targets_dropped = dropped;
            log.warn(format!(
                "{} targets found, limit is {}; dropping {} (last: {})",
                targets.len(),
                limit,
                dropped,
                targets[targets.len() - 1].qualified_name()
            ));
        }

        let delay = Duration::from_millis(self.config.request_delay_ms);
        let mut buffers = BTreeMap::new();

        for (i, target) in targets.iter().take(limit).enumerate() {
            if i > 0 && !delay.is_zero() {
                thread::sleep(delay);
            }

            summary.targets_processed += 1;
            let name = target.qualified_name();

            match self.process(target, &mut buffers, log) {
                Ok(Processed::Generated(dest)) => {
                    summary.tests_generated += 1;
                    log.success(format!("{name} ({}) -> {dest}", target.decl_kind));
                }
                Ok(Processed::AlreadyTested(dest)) => {
                    log.info(format!("{name} already has tests in {dest}; skipped"));
                }
                Err(e) => {
                    log.error(format!("{name}: {e}"));
                    summary.push_error(name, e.to_string());
                }
            }
        }

        buffers
    }

    fn process(
        &self,
        target: &TestTarget,
        buffers: &mut BTreeMap<String, TestFileBuffer>,
        log: &mut RunLog,
    ) -> Result<Processed> {
        let dest = target
            .existing_test_file_path
            .clone()
            .unwrap_or_else(|| destination_path(&target.file_path, self.config));

        let existing = match buffers.get(&dest) {
            Some(buf) => buf.content.clone(),
            None => self.source.read_file(&dest)?.unwrap_or_default(),
        };

        if has_block_for(&existing, &target.decl_name, target.owner_class.as_deref()) {
            return Ok(Processed::AlreadyTested(dest));
        }

        let import = import_path(&dest, &target.file_path);
        let req = GenerateRequest {
            target,
            framework: self.framework,
            existing_content: (!existing.trim().is_empty()).then_some(existing.as_str()),
            test_file_path: &dest,
            import_path: &import,
            scaffold_only: self.config.scaffold_only,
        };

        let generated = self.generator.generate(&req)?;
        let generated = format_or_keep(self.formatter, &dest, generated, log);

        let merged = merge_test_content(&existing, &generated);
        if !is_structurally_complete(&merged) {
            return Err(Error::InvalidContent(dest.into()));
        }

        let buf = buffers
            .entry(dest.clone())
            .or_insert_with(|| TestFileBuffer::new(dest.clone(), existing));
        buf.content = merged;
        buf.add_target(target);

        Ok(Processed::Generated(dest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ChangedRange, DeclKind};
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct MemFs(RefCell<HashMap<String, String>>);

    impl ContentSource for MemFs {
        fn file_exists(&self, path: &str) -> bool {
            self.0.borrow().contains_key(path)
        }
        fn read_file(&self, path: &str) -> Result<Option<String>> {
            Ok(self.0.borrow().get(path).cloned())
        }
        fn write_file(&self, path: &str, content: &str) -> Result<()> {
            self.0.borrow_mut().insert(path.into(), content.into());
            Ok(())
        }
    }

    /// Emits a describe block named after the target, or a broken one.
    struct Echo {
        broken_for: Option<&'static str>,
    }

    impl TestGenerator for Echo {
        fn generate(&self, req: &GenerateRequest<'_>) -> Result<String> {
            let name = req.target.decl_name.as_str();
            if self.broken_for == Some(name) {
                return Ok(format!("describe('{name}', () => {{\n  it('x', () => {{\n"));
            }
            Ok(format!(
                "import {{ {name} }} from '{}';\n\ndescribe('{name}', () => {{\n  it('works', () => {{\n    expect({name}()).toBeDefined();\n  }});\n}});\n",
                req.import_path
            ))
        }

        fn fix(&self, req: &FixRequest<'_>) -> Result<String> {
            Ok(req.current_content.to_string())
        }
    }

    fn target(name: &str) -> TestTarget {
        TestTarget {
            file_path: "src/math.ts".into(),
            decl_name: name.into(),
            decl_kind: DeclKind::Function,
            owner_class: None,
            is_private: false,
            exported: true,
            private_members: Vec::new(),
            source_snippet: format!("export function {name}() {{ return 1; }}"),
            surrounding_context: String::new(),
            start_line: 1,
            end_line: 1,
            overlapping_ranges: vec![ChangedRange::addition(1, 1)],
            existing_test_file_path: None,
        }
    }

    #[test]
    fn targets_for_one_file_share_a_buffer() {
        let cfg = Config::default();
        let fs = MemFs(RefCell::new(HashMap::new()));
        let gen = Echo { broken_for: None };
        let coord = GenerationCoordinator::new(&cfg, TestFramework::Vitest, &gen, &fs);

        let mut log = RunLog::new();
        let mut summary = RunSummary::default();
        let buffers = coord.run(&[target("add"), target("sub")], &mut log, &mut summary);

        assert_eq!(summary.targets_processed, 2);
        assert_eq!(summary.tests_generated, 2);
        let buf = &buffers["src/math.test.ts"];
        assert_eq!(buf.target_names, vec!["add", "sub"]);
        assert!(buf.content.contains("describe('add'"));
        assert!(buf.content.contains("describe('sub'"));
        assert!(buf.content.contains("from './math'"));
    }

    #[test]
    fn cap_drops_excess_targets_with_a_warning() {
        let cfg = Config {
            max_targets: 1,
            ..Config::default()
        };
        let fs = MemFs(RefCell::new(HashMap::new()));
        let gen = Echo { broken_for: None };
        let coord = GenerationCoordinator::new(&cfg, TestFramework::Jest, &gen, &fs);

        let mut log = RunLog::new();
        let mut summary = RunSummary::default();
        coord.run(&[target("a"), target("b"), target("c")], &mut log, &mut summary);

        assert_eq!(summary.targets_processed, 1);
        assert_eq!(summary.targets_dropped, 2);
        assert_eq!(log.count(crate::logger::LogLevel::Warn), 1);
    }

    #[test]
    fn invalid_merge_is_a_target_error_and_keeps_buffer() {
        let cfg = Config::default();
        let fs = MemFs(RefCell::new(HashMap::new()));
        let gen = Echo {
            broken_for: Some("sub"),
        };
        let coord = GenerationCoordinator::new(&cfg, TestFramework::Vitest, &gen, &fs);

        let mut log = RunLog::new();
        let mut summary = RunSummary::default();
        let buffers = coord.run(&[target("add"), target("sub")], &mut log, &mut summary);

        assert_eq!(summary.tests_generated, 1);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].subject, "sub");
        let buf = &buffers["src/math.test.ts"];
        assert!(!buf.content.contains("describe('sub'"));
        assert!(is_structurally_complete(&buf.content));
    }

    #[test]
    fn existing_block_skips_target() {
        let cfg = Config::default();
        let fs = MemFs(RefCell::new(HashMap::new()));
        fs.write_file(
            "src/math.test.ts",
            "describe('add', () => {\n  it('a', () => {});\n});\n",
        )
        .unwrap();
        let gen = Echo { broken_for: None };
        let coord = GenerationCoordinator::new(&cfg, TestFramework::Vitest, &gen, &fs);

        let mut log = RunLog::new();
        let mut summary = RunSummary::default();
        let buffers = coord.run(&[target("add")], &mut log, &mut summary);

        assert_eq!(summary.targets_processed, 1);
        assert_eq!(summary.tests_generated, 0);
        assert!(buffers.is_empty());
    }
}
