//! detectors/framework.rs
//!
//! Test framework detection and per-framework API markers.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestFramework {
    Jest,
    Vitest,
}

impl TestFramework {
    /// Module the globals are imported from.
    pub fn globals_module(self) -> &'static str {
        match self {
            TestFramework::Jest => "@jest/globals",
            TestFramework::Vitest => "vitest",
        }
    }

    /// Identifier of the framework's mock helper object.
    pub fn mock_object(self) -> &'static str {
        match self {
            TestFramework::Jest => "jest",
            TestFramework::Vitest => "vi",
        }
    }

    pub fn other(self) -> TestFramework {
        match self {
            TestFramework::Jest => TestFramework::Vitest,
            TestFramework::Vitest => TestFramework::Jest,
        }
    }

    /// Framework named by an import specifier, if any.
    pub fn from_module(module: &str) -> Option<TestFramework> {
        match module {
            "vitest" => Some(TestFramework::Vitest),
            "@jest/globals" | "jest" => Some(TestFramework::Jest),
            _ => None,
        }
    }
}

impl fmt::Display for TestFramework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TestFramework::Jest => "jest",
            TestFramework::Vitest => "vitest",
        })
    }
}

/* ============================================================
   Public API
   ============================================================ */

/// Detect from `package.json`; vitest wins when both are present.
pub fn detect_framework(root: &Path) -> Option<TestFramework> {
    if exists(root, "vitest.config.ts")
        || exists(root, "vitest.config.js")
        || exists(root, "vitest.config.mts")
    {
        return Some(TestFramework::Vitest);
    }

    let pkg = std::fs::read_to_string(root.join("package.json")).ok()?;
    framework_from_package_json(&pkg)
}

pub fn framework_from_package_json(raw: &str) -> Option<TestFramework> {
    let json: Value = serde_json::from_str(raw).ok()?;

    let has_dep = |name: &str| {
        ["dependencies", "devDependencies", "peerDependencies"]
            .iter()
            .any(|section| json.get(section).and_then(|d| d.get(name)).is_some())
    };

    let test_script = json
        .pointer("/scripts/test")
        .and_then(Value::as_str)
        .unwrap_or("");

    if has_dep("vitest") || test_script.contains("vitest") {
        Some(TestFramework::Vitest)
    } else if has_dep("jest") || has_dep("ts-jest") || test_script.contains("jest") {
        Some(TestFramework::Jest)
    } else {
        None
    }
}

/* ============================================================
   Helpers
   ============================================================ */

#[inline]
fn exists(root: &Path, file: &str) -> bool {
    root.join(file).exists()
}
