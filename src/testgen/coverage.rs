//! testgen/coverage.rs
//!
//! Istanbul coverage artifacts → aggregate totals, and before/after deltas.
//!
//! Two shapes are understood:
//! - summary form (`coverage-summary.json`): per file
//!   `{ lines|statements|functions|branches: { total, covered } }`
//! - hit-count form (`coverage-final.json`): per file
//!   `{ statementMap, s, f, b }`, lines derived from statement starts.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageMetric {
    pub total: u64,
    pub covered: u64,
    pub pct: f64,
}

impl CoverageMetric {
    pub fn new(total: u64, covered: u64) -> Self {
        let pct = if total == 0 {
            100.0
        } else {
            covered as f64 / total as f64 * 100.0
        };
        Self {
            total,
            covered,
            pct: round2(pct),
        }
    }

    fn add(self, other: CoverageMetric) -> Self {
        Self::new(self.total + other.total, self.covered + other.covered)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageSnapshot {
    pub lines: CoverageMetric,
    pub statements: CoverageMetric,
    pub functions: CoverageMetric,
    pub branches: CoverageMetric,
}

/// Percentage-point change per metric, current minus baseline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageDelta {
    pub lines: f64,
    pub statements: f64,
    pub functions: f64,
    pub branches: f64,
}

impl CoverageSnapshot {
    pub fn from_pcts(lines: f64, statements: f64, functions: f64, branches: f64) -> Self {
        let m = |pct: f64| CoverageMetric {
            total: 0,
            covered: 0,
            pct,
        };
        Self {
            lines: m(lines),
            statements: m(statements),
            functions: m(functions),
            branches: m(branches),
        }
    }

    pub fn delta_from(&self, baseline: &CoverageSnapshot) -> CoverageDelta {
        CoverageDelta {
            lines: round2(self.lines.pct - baseline.lines.pct),
            statements: round2(self.statements.pct - baseline.statements.pct),
            functions: round2(self.functions.pct - baseline.functions.pct),
            branches: round2(self.branches.pct - baseline.branches.pct),
        }
    }

    fn add(self, other: CoverageSnapshot) -> Self {
        Self {
            lines: self.lines.add(other.lines),
            statements: self.statements.add(other.statements),
            functions: self.functions.add(other.functions),
            branches: self.branches.add(other.branches),
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/* ============================================================
   Parsing
   ============================================================ */

/// Read a coverage artifact; `Ok(None)` when the file does not exist.
pub fn read_snapshot(path: &Path) -> Result<Option<CoverageSnapshot>> {
    if !path.is_file() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    parse_coverage(&raw)
        .map(Some)
        .ok_or_else(|| Error::Unparseable(path.display().to_string()))
}

/// Aggregate totals over every file in the report.
pub fn parse_coverage(raw: &str) -> Option<CoverageSnapshot> {
    let json: Value = serde_json::from_str(raw).ok()?;
    let files = json.as_object()?;

    // A summary report carries its own aggregate.
    if let Some(total) = files.get("total").and_then(summary_entry) {
        return Some(total);
    }

    let mut acc = CoverageSnapshot {
        lines: CoverageMetric::new(0, 0),
        statements: CoverageMetric::new(0, 0),
        functions: CoverageMetric::new(0, 0),
        branches: CoverageMetric::new(0, 0),
    };
    let mut seen = false;

    for entry in files.values() {
        let file = summary_entry(entry).or_else(|| hit_count_entry(entry));
        if let Some(file) = file {
            acc = acc.add(file);
            seen = true;
        }
    }

    seen.then_some(acc)
}

fn summary_entry(v: &Value) -> Option<CoverageSnapshot> {
    let metric = |key: &str| -> Option<CoverageMetric> {
        let m = v.get(key)?;
        Some(CoverageMetric::new(m.get("total")?.as_u64()?, m.get("covered")?.as_u64()?))
    };

    Some(CoverageSnapshot {
        lines: metric("lines")?,
        statements: metric("statements")?,
        functions: metric("functions")?,
        branches: metric("branches")?,
    })
}

#[derive(Debug, Deserialize)]
struct HitCounts {
    #[serde(rename = "statementMap", default)]
    statement_map: BTreeMap<String, Location>,
    s: BTreeMap<String, u64>,
    #[serde(default)]
    f: BTreeMap<String, u64>,
    #[serde(default)]
    b: BTreeMap<String, Vec<u64>>,
}

#[derive(Debug, Deserialize)]
struct Location {
    start: Position,
}

#[derive(Debug, Deserialize)]
struct Position {
    line: u64,
}

fn hit_count_entry(v: &Value) -> Option<CoverageSnapshot> {
    let hits: HitCounts = serde_json::from_value(v.clone()).ok()?;

    let count = |m: &BTreeMap<String, u64>| {
        CoverageMetric::new(m.len() as u64, m.values().filter(|h| **h > 0).count() as u64)
    };

    let arms: Vec<u64> = hits.b.values().flatten().copied().collect();
    let branches = CoverageMetric::new(arms.len() as u64, arms.iter().filter(|h| **h > 0).count() as u64);

    let mut all_lines = BTreeSet::new();
    let mut hit_lines = BTreeSet::new();
    for (id, loc) in &hits.statement_map {
        all_lines.insert(loc.start.line);
        if hits.s.get(id).is_some_and(|h| *h > 0) {
            hit_lines.insert(loc.start.line);
        }
    }

    Some(CoverageSnapshot {
        lines: CoverageMetric::new(all_lines.len() as u64, hit_lines.len() as u64),
        statements: count(&hits.s),
        functions: count(&hits.f),
        branches,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_is_current_minus_baseline() {
        let baseline = CoverageSnapshot::from_pcts(70.0, 65.0, 50.0, 40.0);
        let current = CoverageSnapshot::from_pcts(82.0, 65.0, 75.5, 38.25);

        let d = current.delta_from(&baseline);
        assert!((d.lines - 12.0).abs() < 0.05);
        assert_eq!(d.statements, 0.0);
        assert_eq!(d.functions, 25.5);
        assert_eq!(d.branches, -1.75);
    }

    #[test]
    fn empty_totals_are_fully_covered() {
        assert_eq!(CoverageMetric::new(0, 0).pct, 100.0);
        assert_eq!(CoverageMetric::new(3, 1).pct, 33.33);
    }

    #[test]
    fn parses_summary_total() {
        let raw = r#"{
          "total": {
            "lines": {"total": 10, "covered": 7, "skipped": 0, "pct": 70},
            "statements": {"total": 12, "covered": 9, "skipped": 0, "pct": 75},
            "functions": {"total": 4, "covered": 2, "skipped": 0, "pct": 50},
            "branches": {"total": 0, "covered": 0, "skipped": 0, "pct": 100}
          },
          "/repo/src/a.ts": {
            "lines": {"total": 10, "covered": 7, "skipped": 0, "pct": 70},
            "statements": {"total": 12, "covered": 9, "skipped": 0, "pct": 75},
            "functions": {"total": 4, "covered": 2, "skipped": 0, "pct": 50},
            "branches": {"total": 0, "covered": 0, "skipped": 0, "pct": 100}
          }
        }"#;

        let snap = parse_coverage(raw).unwrap();
        assert_eq!(snap.lines, CoverageMetric::new(10, 7));
        assert_eq!(snap.statements.pct, 75.0);
        assert_eq!(snap.branches.pct, 100.0);
    }

    #[test]
    fn parses_hit_counts_across_files() {
        let raw = r#"{
          "/repo/src/a.ts": {
            "path": "/repo/src/a.ts",
            "statementMap": {
              "0": {"start": {"line": 1, "column": 0}, "end": {"line": 1, "column": 10}},
              "1": {"start": {"line": 2, "column": 0}, "end": {"line": 2, "column": 10}},
              "2": {"start": {"line": 2, "column": 12}, "end": {"line": 2, "column": 20}}
            },
            "s": {"0": 1, "1": 0, "2": 3},
            "fnMap": {},
            "f": {"0": 1, "1": 0},
            "branchMap": {},
            "b": {"0": [1, 0]}
          },
          "/repo/src/b.ts": {
            "path": "/repo/src/b.ts",
            "statementMap": {
              "0": {"start": {"line": 5, "column": 0}, "end": {"line": 5, "column": 3}}
            },
            "s": {"0": 0},
            "f": {},
            "b": {}
          }
        }"#;

        let snap = parse_coverage(raw).unwrap();
        assert_eq!(snap.statements, CoverageMetric::new(4, 2));
        assert_eq!(snap.lines, CoverageMetric::new(3, 2));
        assert_eq!(snap.functions, CoverageMetric::new(2, 1));
        assert_eq!(snap.branches, CoverageMetric::new(2, 1));
    }

    #[test]
    fn missing_artifact_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_snapshot(&dir.path().join("nope.json")).unwrap(), None);
    }
}
