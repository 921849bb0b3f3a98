// src/git.rs
//
// Thin `git` subprocess layer: diffs, base detection and file reads at a ref.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use crate::error::{Error, Result};
use crate::testgen::file::{ContentSource, LocalFs};

pub fn is_git_repo(root: &Path) -> bool {
    git(root, &["rev-parse", "--is-inside-work-tree"])
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// `git diff <base>`, or the working tree against the index when `base` is
/// `None`.
pub fn diff(root: &Path, base: Option<&str>) -> Result<String> {
    let mut args = vec!["diff", "--no-color", "--no-ext-diff", "-M"];
    if let Some(b) = base {
        args.push(b);
    }
    stdout_of(root, &args)
}

/// Staged changes only.
pub fn diff_cached(root: &Path) -> Result<String> {
    stdout_of(root, &["diff", "--cached", "--no-color", "--no-ext-diff", "-M"])
}

/* ============================================================
   Base branch detection
   ============================================================ */

pub fn detect_base_branch(root: &Path) -> String {
    if let Ok(o) = git(root, &["symbolic-ref", "refs/remotes/origin/HEAD"]) {
        let s = String::from_utf8_lossy(&o.stdout);
        if let Some(b) = s.trim().rsplit('/').next() {
            if o.status.success() && !b.is_empty() {
                return b.to_string();
            }
        }
    }

    let has_main = git(root, &["show-ref", "--verify", "--quiet", "refs/heads/main"])
        .map(|o| o.status.success())
        .unwrap_or(false);

    if has_main {
        "main".into()
    } else {
        "master".into()
    }
}

pub fn merge_base(root: &Path, base_branch: &str) -> Option<String> {
    let out = git(root, &["merge-base", base_branch, "HEAD"]).ok()?;
    let s = String::from_utf8_lossy(&out.stdout).trim().to_string();
    (out.status.success() && !s.is_empty()).then_some(s)
}

/* ============================================================
   Snapshots
   ============================================================ */

/// File content at `reference`; `Ok(None)` when the path is absent there.
pub fn show_file_at(root: &Path, reference: &str, path: &str) -> Result<Option<String>> {
    let out = git(root, &["show", &format!("{reference}:{path}")])?;
    if out.status.success() {
        Ok(Some(String::from_utf8_lossy(&out.stdout).into_owned()))
    } else {
        Ok(None)
    }
}

/// Reads come from a commit, writes go to the working tree.
#[derive(Debug, Clone)]
pub struct GitSource {
    root: PathBuf,
    reference: String,
    tree: LocalFs,
}

impl GitSource {
    pub fn new(root: impl Into<PathBuf>, reference: impl Into<String>) -> Self {
        let root = root.into();
        Self {
            tree: LocalFs::new(root.clone()),
            root,
            reference: reference.into(),
        }
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }
}

impl ContentSource for GitSource {
    fn file_exists(&self, path: &str) -> bool {
        git(&self.root, &["cat-file", "-e", &format!("{}:{path}", self.reference)])
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn read_file(&self, path: &str) -> Result<Option<String>> {
        show_file_at(&self.root, &self.reference, path)
    }

    fn write_file(&self, path: &str, content: &str) -> Result<()> {
        self.tree.write_file(path, content)
    }
}

/* ============================================================
   Helpers
   ============================================================ */

fn git(root: &Path, args: &[&str]) -> Result<Output> {
    Command::new("git")
        .args(args)
        .current_dir(root)
        .output()
        .map_err(|e| Error::Command {
            command: format!("git {}", args.join(" ")),
            message: e.to_string(),
        })
}

fn stdout_of(root: &Path, args: &[&str]) -> Result<String> {
    let out = git(root, args)?;
    if !out.status.success() {
        return Err(Error::Command {
            command: format!("git {}", args.join(" ")),
            message: String::from_utf8_lossy(&out.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&out.stdout).into_owned())
}
