use std::path::Path;

use crate::config::{Config, TestLocation};
use crate::testgen::file::ContentSource;

const TEST_SUFFIXES: [&str; 2] = ["test", "spec"];

/* ============================================================
   Path pieces
   ============================================================ */

#[derive(Debug, Clone, PartialEq, Eq)]
struct SourcePath<'a> {
    /// Directory, empty for files at the repo root.
    dir: &'a str,
    stem: &'a str,
    ext: &'a str,
}

fn split_source(path: &str) -> SourcePath<'_> {
    let (dir, file) = match path.rfind('/') {
        Some(i) => (&path[..i], &path[i + 1..]),
        None => ("", path),
    };
    let (stem, ext) = match file.rfind('.') {
        Some(i) if i > 0 => (&file[..i], &file[i + 1..]),
        _ => (file, ""),
    };
    SourcePath { dir, stem, ext }
}

fn join(parts: &[&str]) -> String {
    parts
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("/")
}

/// Source directory with the configured source root stripped.
fn mirrored_dir<'a>(dir: &'a str, source_root: &str) -> &'a str {
    let root = source_root.trim_matches('/');
    if root.is_empty() {
        return dir;
    }
    if dir == root {
        return "";
    }
    dir.strip_prefix(root)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(dir)
}

/* ============================================================
   Public entry
   ============================================================ */

/// Every place an existing test for `source` may live, in lookup order.
pub fn candidate_test_paths(source: &str, cfg: &Config) -> Vec<String> {
    let sp = split_source(source);
    let mirrored = mirrored_dir(sp.dir, &cfg.source_root);
    let mut out = Vec::new();

    for suffix in TEST_SUFFIXES {
        let name = format!("{}.{suffix}.{}", sp.stem, sp.ext);
        out.push(join(&[sp.dir, &name]));
        out.push(join(&[sp.dir, "__tests__", &name]));
        out.push(join(&[&cfg.test_dir, mirrored, &name]));
        out.push(join(&["__tests__", &name]));
    }

    let mut seen = std::collections::HashSet::new();
    out.retain(|p| seen.insert(p.clone()));
    out
}

/// First candidate that exists in `source_files`.
pub fn find_existing_test(
    source: &str,
    cfg: &Config,
    source_files: &dyn ContentSource,
) -> Option<String> {
    candidate_test_paths(source, cfg)
        .into_iter()
        .find(|p| source_files.file_exists(p))
}

/// Where a new test file for `source` goes when none exists yet.
pub fn destination_path(source: &str, cfg: &Config) -> String {
    let sp = split_source(source);

    match cfg.test_location {
        TestLocation::CoLocated => join(&[sp.dir, &format!("{}.test.{}", sp.stem, sp.ext)]),
        TestLocation::Separate => {
            let name = cfg
                .test_pattern
                .replace("{name}", sp.stem)
                .replace("{ext}", sp.ext);
            join(&[&cfg.test_dir, mirrored_dir(sp.dir, &cfg.source_root), &name])
        }
    }
}

/// Module specifier that imports `source` from `test_file`.
///
/// Relative, extension stripped, always starting with `./` or `../`.
pub fn import_path(test_file: &str, source: &str) -> String {
    let test_dir = Path::new(test_file)
        .parent()
        .and_then(|p| p.to_str())
        .unwrap_or("");
    let from = components(test_dir);

    let sp = split_source(source);
    let to_dir = components(sp.dir);

    // Directories only; the stem never matches a directory.
    let common = from
        .iter()
        .zip(to_dir.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let ups = from.len() - common;
    let mut rest: Vec<&str> = to_dir[common..].to_vec();
    rest.push(sp.stem);
    let rest = rest.join("/");

    if ups == 0 {
        format!("./{rest}")
    } else {
        format!("{}{rest}", "../".repeat(ups))
    }
}

fn components(path: &str) -> Vec<&str> {
    path.split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn separate() -> Config {
        Config {
            test_location: TestLocation::Separate,
            ..Config::default()
        }
    }

    #[test]
    fn candidates_in_lookup_order() {
        let c = candidate_test_paths("src/a/b.ts", &Config::default());
        assert_eq!(
            &c[..4],
            &[
                "src/a/b.test.ts".to_string(),
                "src/a/__tests__/b.test.ts".into(),
                "tests/a/b.test.ts".into(),
                "__tests__/b.test.ts".into(),
            ]
        );
        assert_eq!(c[4], "src/a/b.spec.ts");
        assert_eq!(c.len(), 8);
    }

    #[test]
    fn destination_by_location() {
        assert_eq!(destination_path("src/a/b.ts", &Config::default()), "src/a/b.test.ts");
        assert_eq!(destination_path("src/a/b.ts", &separate()), "tests/a/b.test.ts");
        assert_eq!(destination_path("src/b.tsx", &separate()), "tests/b.test.tsx");
        assert_eq!(destination_path("lib/b.js", &separate()), "tests/lib/b.test.js");

        let cfg = Config {
            test_pattern: "{name}.spec.{ext}".into(),
            ..separate()
        };
        assert_eq!(destination_path("src/b.ts", &cfg), "tests/b.spec.ts");
    }

    #[test]
    fn import_paths_are_relative_and_extensionless() {
        assert_eq!(import_path("src/a/b.test.ts", "src/a/b.ts"), "./b");
        assert_eq!(import_path("src/a/__tests__/b.test.ts", "src/a/b.ts"), "../b");
        assert_eq!(import_path("tests/a/b.test.ts", "src/a/b.ts"), "../../src/a/b");
        assert_eq!(import_path("b.test.ts", "b.ts"), "./b");
        assert_eq!(import_path("__tests__/b.test.ts", "src/b.ts"), "../src/b");
        // directory named like the source stem
        assert_eq!(import_path("tests/tests.test.ts", "tests.ts"), "../tests");
        assert_eq!(import_path("tests/lib/lib.test.ts", "lib/lib.ts"), "../../lib/lib");
    }
}
