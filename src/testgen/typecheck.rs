// Optional compiler pass over a candidate test file.
// Only the diagnostic text is consumed; parsing lives in validate.rs.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::hooks::{run_hook, shell_quote};

pub trait TypeChecker {
    /// Raw diagnostics for `content` as if it were written to `path`.
    fn check(&self, path: &str, content: &str) -> Result<String>;
}

/// Runs `tsc` against a temporary sibling copy of the candidate file, so
/// relative imports resolve exactly as they will once written.
#[derive(Debug, Clone)]
pub struct TscChecker {
    repo_root: PathBuf,
    command: String,
}

impl TscChecker {
    pub fn new(repo_root: impl Into<PathBuf>, command: impl Into<String>) -> Self {
        Self {
            repo_root: repo_root.into(),
            command: command.into(),
        }
    }
}

impl TypeChecker for TscChecker {
    fn check(&self, path: &str, content: &str) -> Result<String> {
        let abs = self.repo_root.join(path);
        let dir = abs.parent().unwrap_or(Path::new(".")).to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;

        let ext = abs
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_default();

        let mut tmp = tempfile::Builder::new()
            .prefix(".deltatest-check-")
            .suffix(&ext)
            .tempfile_in(&dir)
            .map_err(|e| Error::io(&dir, e))?;
        tmp.write_all(content.as_bytes())
            .and_then(|_| tmp.flush())
            .map_err(|e| Error::io(tmp.path(), e))?;

        let file = tmp.path().to_string_lossy().into_owned();
        let template = if self.command.contains("{file}") {
            self.command.clone()
        } else {
            format!("{} {{file}}", self.command)
        };

        let out = run_hook(&self.repo_root, &template, &[("file", &shell_quote(&file))], None)?;
        Ok(out.combined())
    }
}
