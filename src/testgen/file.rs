// src/testgen/file.rs

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/* ============================================================
   Content source
   ============================================================ */

/// Where existing test content is read from and written to.
///
/// Paths are repo-relative with `/` separators.
pub trait ContentSource {
    fn file_exists(&self, path: &str) -> bool;

    /// `Ok(None)` when the file does not exist.
    fn read_file(&self, path: &str) -> Result<Option<String>>;

    fn write_file(&self, path: &str, content: &str) -> Result<()>;
}

/// The working tree.
#[derive(Debug, Clone)]
pub struct LocalFs {
    root: PathBuf,
}

impl LocalFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

impl ContentSource for LocalFs {
    fn file_exists(&self, path: &str) -> bool {
        self.resolve(path).is_file()
    }

    fn read_file(&self, path: &str) -> Result<Option<String>> {
        let abs = self.resolve(path);
        match fs::read_to_string(&abs) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(abs, e)),
        }
    }

    fn write_file(&self, path: &str, content: &str) -> Result<()> {
        write_atomic(&self.resolve(path), content)
    }
}

/* ============================================================
   Helpers
   ============================================================ */

/// Write through a temp file in the same directory, then rename over
/// `path`. Readers never see a half-written file.
pub fn write_atomic(path: &Path, content: &str) -> Result<()> {
    ensure_parent_dir(path)?;

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| Error::io(dir, e))?;
    tmp.write_all(content.as_bytes())
        .and_then(|_| tmp.flush())
        .map_err(|e| Error::io(tmp.path(), e))?;

    tmp.persist(path).map_err(|e| Error::io(path, e.error))?;
    Ok(())
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
    }
    Ok(())
}
