//! detectors/language.rs
//!
//! Source dialect from file extension.

use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Language {
    TypeScript,
    Tsx,
    JavaScript,
}

impl Language {
    pub fn from_path(path: &str) -> Option<Language> {
        if path.ends_with(".d.ts") || path.ends_with(".d.mts") || path.ends_with(".d.cts") {
            return None;
        }

        match Path::new(path).extension().and_then(|e| e.to_str())? {
            "ts" | "mts" | "cts" => Some(Language::TypeScript),
            "tsx" => Some(Language::Tsx),
            "js" | "jsx" | "mjs" | "cjs" => Some(Language::JavaScript),
            _ => None,
        }
    }
}

/// Files that are themselves tests are never targets.
pub fn is_test_file(path: &str) -> bool {
    let name = Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    name.contains(".test.")
        || name.contains(".spec.")
        || path.split('/').any(|c| c == "__tests__")
}

pub fn is_source_file(path: &str) -> bool {
    Language::from_path(path).is_some() && !is_test_file(path)
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Language::TypeScript => "typescript",
            Language::Tsx => "tsx",
            Language::JavaScript => "javascript",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_extensions() {
        assert_eq!(Language::from_path("src/a.ts"), Some(Language::TypeScript));
        assert_eq!(Language::from_path("src/a.tsx"), Some(Language::Tsx));
        assert_eq!(Language::from_path("src/a.mjs"), Some(Language::JavaScript));
        assert_eq!(Language::from_path("src/a.d.ts"), None);
        assert_eq!(Language::from_path("README.md"), None);
    }

    #[test]
    fn test_files_are_not_sources() {
        assert!(!is_source_file("src/a.test.ts"));
        assert!(!is_source_file("src/__tests__/a.ts"));
        assert!(!is_source_file("src/a.spec.js"));
        assert!(is_source_file("src/latest.ts"));
    }
}
