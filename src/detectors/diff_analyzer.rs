//! detectors/diff_analyzer.rs
//!
//! Unified diff → per-file changed zones.
//!
//! Ranges are deliberately fuzzy: same-kind ranges within two lines of each
//! other coalesce, so a declaration a few lines from an edit still counts.

use crate::error::DiffError;
use crate::state::{ChangedRange, RangeKind};

/// Same-kind ranges whose gap is at most this many lines are merged.
pub const COALESCE_GAP: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Added,
    Modified,
    Removed,
    Renamed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDiff {
    pub path: String,
    pub status: FileStatus,
    /// Hunks only, headers stripped.
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HunkHeader {
    pub old_start: usize,
    pub old_len: usize,
    pub new_start: usize,
    pub new_len: usize,
}

/* ============================================================
   Public entry
   ============================================================ */

/// Changed zones for one file.
///
/// Added files get a single addition range over `new_content`; removed
/// files get nothing.
pub fn resolve_ranges(
    file: &FileDiff,
    new_content: Option<&str>,
) -> Result<Vec<ChangedRange>, DiffError> {
    match file.status {
        FileStatus::Removed => Ok(Vec::new()),
        FileStatus::Added => match new_content {
            Some(src) => Ok(ranges_for_added_file(src)),
            None => changed_ranges(&file.body),
        },
        FileStatus::Modified | FileStatus::Renamed => changed_ranges(&file.body),
    }
}

pub fn ranges_for_added_file(content: &str) -> Vec<ChangedRange> {
    let lines = content.lines().count();
    if lines == 0 {
        return Vec::new();
    }
    vec![ChangedRange::addition(1, lines)]
}

/// Scan hunks, emit one range per `+`/`-` line, then coalesce.
pub fn changed_ranges(body: &str) -> Result<Vec<ChangedRange>, DiffError> {
    let mut raw = Vec::new();

    let mut old_line = 0usize;
    let mut new_line = 0usize;
    let mut old_left = 0usize;
    let mut new_left = 0usize;

    for line in body.lines() {
        if old_left == 0 && new_left == 0 {
            if line.starts_with("@@") {
                let h = parse_hunk_header(line)?;
                old_line = h.old_start;
                new_line = h.new_start;
                old_left = h.old_len;
                new_left = h.new_len;
            }
            continue;
        }

        match line.as_bytes().first() {
            Some(b'+') => {
                raw.push(ChangedRange::addition(new_line, new_line));
                new_line += 1;
                new_left = new_left.saturating_sub(1);
            }
            Some(b'-') => {
                raw.push(ChangedRange::deletion(old_line, old_line));
                old_line += 1;
                old_left = old_left.saturating_sub(1);
            }
            // "\ No newline at end of file"
            Some(b'\\') => {}
            _ => {
                old_line += 1;
                new_line += 1;
                old_left = old_left.saturating_sub(1);
                new_left = new_left.saturating_sub(1);
            }
        }
    }

    Ok(coalesce(raw))
}

/// Merge same-kind ranges that touch or sit within `COALESCE_GAP` lines.
pub fn coalesce(mut ranges: Vec<ChangedRange>) -> Vec<ChangedRange> {
    ranges.sort_by_key(|r| (r.kind == RangeKind::Deletion, r.start, r.end));

    let mut out: Vec<ChangedRange> = Vec::with_capacity(ranges.len());
    for r in ranges {
        match out.last_mut() {
            Some(prev) if prev.kind == r.kind && r.start <= prev.end + COALESCE_GAP => {
                prev.end = prev.end.max(r.end);
            }
            _ => out.push(r),
        }
    }

    out.sort_by_key(|r| (r.start, r.kind == RangeKind::Deletion, r.end));
    out
}

pub fn parse_hunk_header(line: &str) -> Result<HunkHeader, DiffError> {
    let bad = || DiffError::MalformedHunkHeader(line.to_string());

    let mut parts = line.split_whitespace();
    if parts.next() != Some("@@") {
        return Err(bad());
    }

    let old = parts.next().and_then(|p| p.strip_prefix('-')).ok_or_else(bad)?;
    let new = parts.next().and_then(|p| p.strip_prefix('+')).ok_or_else(bad)?;

    let (old_start, old_len) = parse_span(old).ok_or_else(bad)?;
    let (new_start, new_len) = parse_span(new).ok_or_else(bad)?;

    Ok(HunkHeader {
        old_start,
        old_len,
        new_start,
        new_len,
    })
}

fn parse_span(s: &str) -> Option<(usize, usize)> {
    let mut it = s.split(',');
    let start = it.next()?.parse().ok()?;
    let len = match it.next() {
        Some(n) => n.parse().ok()?,
        None => 1,
    };
    Some((start, len))
}

/* ============================================================
   Diff splitting
   ============================================================ */

/// Split a multi-file diff into per-file sections.
///
/// Understands `git diff` output and plain `---`/`+++` unified diffs.
pub fn split_diff_by_file(diff: &str) -> Vec<FileDiff> {
    let lines: Vec<&str> = diff.lines().collect();
    let git_style = lines.iter().any(|l| l.starts_with("diff --git "));

    let mut results = Vec::new();
    let mut current: Option<Section> = None;
    let mut in_hunk = Remaining::default();

    for (i, line) in lines.iter().enumerate() {
        let starts_file = if git_style {
            line.starts_with("diff --git ")
        } else {
            !in_hunk.active()
                && line.starts_with("--- ")
                && lines.get(i + 1).is_some_and(|n| n.starts_with("+++ "))
        };

        if starts_file {
            if let Some(sec) = current.take() {
                results.extend(sec.finish());
            }
            let mut sec = Section::default();
            if let Some(rest) = line.strip_prefix("diff --git ") {
                sec.path = parse_git_line(rest);
            }
            if !git_style {
                sec.header(line);
            }
            current = Some(sec);
            in_hunk = Remaining::default();
            continue;
        }

        let Some(sec) = current.as_mut() else {
            continue;
        };

        if in_hunk.active() {
            in_hunk.consume(line);
            sec.body.push_str(line);
            sec.body.push('\n');
        } else if line.starts_with("@@") {
            if let Ok(h) = parse_hunk_header(line) {
                in_hunk = Remaining {
                    old: h.old_len,
                    new: h.new_len,
                };
            }
            sec.body.push_str(line);
            sec.body.push('\n');
        } else {
            sec.header(line);
        }
    }

    if let Some(sec) = current {
        results.extend(sec.finish());
    }

    results
}

#[derive(Default)]
struct Remaining {
    old: usize,
    new: usize,
}

impl Remaining {
    fn active(&self) -> bool {
        self.old > 0 || self.new > 0
    }

    fn consume(&mut self, line: &str) {
        match line.as_bytes().first() {
            Some(b'+') => self.new = self.new.saturating_sub(1),
            Some(b'-') => self.old = self.old.saturating_sub(1),
            Some(b'\\') => {}
            _ => {
                self.old = self.old.saturating_sub(1);
                self.new = self.new.saturating_sub(1);
            }
        }
    }
}

#[derive(Default)]
struct Section {
    path: Option<String>,
    old_path: Option<String>,
    status: Option<FileStatus>,
    body: String,
}

impl Section {
    fn header(&mut self, line: &str) {
        if line.starts_with("new file mode") {
            self.status = Some(FileStatus::Added);
        } else if line.starts_with("deleted file mode") {
            self.status = Some(FileStatus::Removed);
        } else if let Some(p) = line.strip_prefix("rename to ") {
            self.status.get_or_insert(FileStatus::Renamed);
            self.path = Some(p.trim().to_string());
        } else if let Some(p) = line.strip_prefix("--- ") {
            match strip_side(p) {
                Some(p) => self.old_path = Some(p),
                None => {
                    self.status = Some(FileStatus::Added);
                }
            }
        } else if let Some(p) = line.strip_prefix("+++ ") {
            match strip_side(p) {
                Some(p) => self.path = Some(p),
                None => {
                    self.status = Some(FileStatus::Removed);
                }
            }
        }
    }

    fn finish(self) -> Option<FileDiff> {
        let status = self.status.unwrap_or(FileStatus::Modified);
        let path = match status {
            FileStatus::Removed => self.old_path.or(self.path),
            _ => self.path.or(self.old_path),
        }?;

        Some(FileDiff {
            path,
            status,
            body: self.body,
        })
    }
}

fn parse_git_line(rest: &str) -> Option<String> {
    let b = rest.split_whitespace().nth(1)?;
    strip_side(b)
}

/// `a/foo` / `b/foo` → `foo`; `/dev/null` → None.
fn strip_side(p: &str) -> Option<String> {
    let p = p.split('\t').next().unwrap_or(p).trim();
    if p == "/dev/null" || p.is_empty() {
        return None;
    }
    let p = p
        .strip_prefix("a/")
        .or_else(|| p.strip_prefix("b/"))
        .unwrap_or(p);
    Some(p.to_string())
}
