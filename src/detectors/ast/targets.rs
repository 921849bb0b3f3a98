//! detectors/ast/targets.rs
//!
//! Declarations + changed zones → ordered test targets.

use std::fmt;

use crate::config::{Config, ExtractionPolicy};
use crate::detectors::ast::ast::{analyze_source, Declaration, SourceStructure};
use crate::error::Error;
use crate::state::{ChangedRange, DeclKind, RangeKind, TestTarget};
use crate::testgen::file::ContentSource;
use crate::testgen::resolve::find_existing_test;

/// How declarations in one file are selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualifyMode {
    /// Only declarations overlapping an addition range.
    Overlap,
    AllExports,
    /// One addition range covers most of the file.
    MostlyNew,
    /// Additions together cover a large share of the file.
    BulkChange,
}

impl QualifyMode {
    pub fn is_whole_file(self) -> bool {
        self != QualifyMode::Overlap
    }
}

impl fmt::Display for QualifyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QualifyMode::Overlap => "overlap",
            QualifyMode::AllExports => "all exports",
            QualifyMode::MostlyNew => "mostly new file",
            QualifyMode::BulkChange => "bulk change",
        })
    }
}

pub fn qualify_mode(
    ranges: &[ChangedRange],
    line_count: usize,
    policy: &ExtractionPolicy,
) -> QualifyMode {
    if policy.test_all_exports {
        return QualifyMode::AllExports;
    }
    if line_count == 0 {
        return QualifyMode::Overlap;
    }

    let lines = line_count as f64;
    let additions = || ranges.iter().filter(|r| r.kind == RangeKind::Addition);

    if additions().any(|r| r.len() as f64 / lines >= policy.mostly_new_ratio) {
        return QualifyMode::MostlyNew;
    }

    let changed: usize = additions().map(ChangedRange::len).sum();
    if changed as f64 / lines >= policy.bulk_change_ratio {
        return QualifyMode::BulkChange;
    }

    QualifyMode::Overlap
}

/// Addition ranges that intersect `decl`. Deletions use pre-change line
/// numbers and never take part.
fn overlapping(decl: &Declaration, ranges: &[ChangedRange]) -> Vec<ChangedRange> {
    ranges
        .iter()
        .filter(|r| r.kind == RangeKind::Addition && r.intersects(decl.start_line, decl.end_line))
        .copied()
        .collect()
}

/* ============================================================
   Public entry
   ============================================================ */

/// Qualifying declarations of one file, in source order.
pub fn select_targets(
    path: &str,
    structure: &SourceStructure,
    ranges: &[ChangedRange],
    policy: &ExtractionPolicy,
) -> Vec<TestTarget> {
    let mode = qualify_mode(ranges, structure.line_count, policy);
    let imports = structure.imports.join("\n");

    structure
        .declarations
        .iter()
        .filter_map(|decl| {
            let hits = overlapping(decl, ranges);

            let qualifies = if mode.is_whole_file() {
                decl.exported
            } else {
                !hits.is_empty()
            };
            if !qualifies {
                return None;
            }

            let owner = decl
                .owner_class
                .as_deref()
                .and_then(|name| structure.class_named(name));

            let surrounding_context = match (decl.kind, owner) {
                (DeclKind::ClassMethod, Some(class)) if imports.is_empty() => class.outline.clone(),
                (DeclKind::ClassMethod, Some(class)) => format!("{imports}\n\n{}", class.outline),
                _ => imports.clone(),
            };

            Some(TestTarget {
                file_path: path.to_string(),
                decl_name: decl.name.clone(),
                decl_kind: decl.kind,
                owner_class: decl.owner_class.clone(),
                is_private: decl.is_private,
                exported: decl.exported,
                private_members: owner.map(|c| c.private_members()).unwrap_or_default(),
                source_snippet: decl.source.clone(),
                surrounding_context,
                start_line: decl.start_line,
                end_line: decl.end_line,
                overlapping_ranges: hits,
                existing_test_file_path: None,
            })
        })
        .collect()
}

/// Parse `source`, select targets and attach any existing test file.
pub fn extract_targets(
    path: &str,
    source: &str,
    ranges: &[ChangedRange],
    cfg: &Config,
    tests: &dyn ContentSource,
) -> Result<Vec<TestTarget>, Error> {
    let structure = analyze_source(path, source)?;
    let mut targets = select_targets(path, &structure, ranges, &cfg.extraction);

    if !targets.is_empty() {
        let existing = find_existing_test(path, cfg, tests);
        for t in &mut targets {
            t.existing_test_file_path = existing.clone();
        }
    }

    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testgen::file::LocalFs;

    fn source_with_body_at_10() -> String {
        let mut lines: Vec<String> = (1..=9).map(|i| format!("// filler {i}")).collect();
        lines.push("export function total(items: number[]): number {".into());
        for _ in 11..20 {
            lines.push("  items = items.filter(Boolean);".into());
        }
        lines.push("  return items.length; }".into());
        for i in 21..=60 {
            lines.push(format!("// tail {i}"));
        }
        lines.join("\n")
    }

    fn names(targets: &[TestTarget]) -> Vec<&str> {
        targets.iter().map(|t| t.decl_name.as_str()).collect()
    }

    #[test]
    fn addition_inside_span_selects() {
        let src = source_with_body_at_10();
        let s = analyze_source("src/a.ts", &src).unwrap();
        assert_eq!((s.declarations[0].start_line, s.declarations[0].end_line), (10, 20));

        let t = select_targets("src/a.ts", &s, &[ChangedRange::addition(15, 15)], &ExtractionPolicy::default());
        assert_eq!(names(&t), vec!["total"]);
        assert_eq!(t[0].overlapping_ranges, vec![ChangedRange::addition(15, 15)]);
    }

    #[test]
    fn deletion_alone_never_selects() {
        let src = source_with_body_at_10();
        let s = analyze_source("src/a.ts", &src).unwrap();
        let t = select_targets("src/a.ts", &s, &[ChangedRange::deletion(15, 15)], &ExtractionPolicy::default());
        assert!(t.is_empty());
    }

    #[test]
    fn modes_from_ratios() {
        let policy = ExtractionPolicy::default();
        assert_eq!(qualify_mode(&[ChangedRange::addition(1, 95)], 100, &policy), QualifyMode::MostlyNew);
        assert_eq!(
            qualify_mode(&[ChangedRange::addition(1, 30), ChangedRange::addition(40, 70)], 100, &policy),
            QualifyMode::BulkChange
        );
        assert_eq!(qualify_mode(&[ChangedRange::addition(1, 10)], 100, &policy), QualifyMode::Overlap);
        assert_eq!(qualify_mode(&[ChangedRange::deletion(1, 100)], 100, &policy), QualifyMode::Overlap);

        let all = ExtractionPolicy { test_all_exports: true, ..policy };
        assert_eq!(qualify_mode(&[], 100, &all), QualifyMode::AllExports);
    }

    #[test]
    fn whole_file_mode_takes_only_exports() {
        let src = "export function a() {}\nfunction b() {}\nexport const c = () => 1;\n";
        let s = analyze_source("src/x.ts", src).unwrap();
        let t = select_targets("src/x.ts", &s, &[ChangedRange::addition(1, 3)], &ExtractionPolicy::default());
        assert_eq!(names(&t), vec!["a", "c"]);
    }

    #[test]
    fn class_method_carries_owner_context() {
        let src = "import { Db } from './db';\n\nexport class Repo {\n  private cache = new Map();\n  constructor(private db: Db) {}\n  find(id: string) {\n    return this.db.get(id);\n  }\n}\n";
        let s = analyze_source("src/repo.ts", src).unwrap();
        let policy = ExtractionPolicy::default();
        let t = select_targets("src/repo.ts", &s, &[ChangedRange::addition(7, 7)], &policy);

        assert_eq!(names(&t), vec!["find"]);
        assert_eq!(t[0].owner_class.as_deref(), Some("Repo"));
        assert_eq!(t[0].private_members, vec!["cache".to_string(), "db".into()]);
        assert!(t[0].surrounding_context.starts_with("import { Db } from './db';"));
        assert!(t[0].surrounding_context.contains("find(id: string) {"));
    }

    #[test]
    fn extraction_is_idempotent_and_finds_existing_tests() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/__tests__")).unwrap();
        std::fs::write(dir.path().join("src/__tests__/a.spec.ts"), "").unwrap();
        let fs_src = LocalFs::new(dir.path());

        let src = source_with_body_at_10();
        let ranges = [ChangedRange::addition(12, 13)];
        let cfg = Config::default();

        let first = extract_targets("src/a.ts", &src, &ranges, &cfg, &fs_src).unwrap();
        let second = extract_targets("src/a.ts", &src, &ranges, &cfg, &fs_src).unwrap();

        assert_eq!(first, second);
        assert_eq!(first[0].existing_test_file_path.as_deref(), Some("src/__tests__/a.spec.ts"));
    }
}
