//! testgen/merge.rs
//!
//! Declaration-block merge of test files.
//!
//! A file is split into imports, other top-level code and named
//! describe-style blocks. Output order is fixed: sorted imports, other
//! code in first-seen order, then blocks sorted by name.

use std::collections::{BTreeMap, HashSet};

use regex::Regex;

use crate::testgen::scan::{code_start, scan};

const BLOCK_CALLEES: [&str; 6] = [
    "describe",
    "describe.only",
    "describe.skip",
    "describe.concurrent",
    "suite",
    "context",
];

const CASE_CALLEES: [&str; 10] = [
    "it",
    "test",
    "it.only",
    "it.skip",
    "it.todo",
    "it.concurrent",
    "test.only",
    "test.skip",
    "test.todo",
    "test.concurrent",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestFileParts {
    pub imports: Vec<String>,
    pub other: Vec<String>,
    pub blocks: BTreeMap<String, String>,
}

impl TestFileParts {
    pub fn parse(content: &str) -> Self {
        let mut parts = Self::default();
        let scanned = scan(content);

        for stmt in scanned.statements(content) {
            parts.add_statement(stmt.to_string());
        }

        parts
    }

    fn add_statement(&mut self, stmt: String) {
        let code = code_start(&stmt);

        if is_import(code) {
            let key = import_key(&stmt);
            if !self.imports.iter().any(|i| import_key(i) == key) {
                self.imports.push(stmt);
            }
            return;
        }

        if let Some((callee, name)) = call_title(code) {
            if BLOCK_CALLEES.contains(&callee) {
                let merged = match self.blocks.remove(&name) {
                    Some(existing) => splice_block(&existing, &stmt),
                    None => stmt,
                };
                self.blocks.insert(name, merged);
                return;
            }
        }

        if !self.other.contains(&stmt) {
            self.other.push(stmt);
        }
    }

    /// Union with `newer`. Same-named blocks are spliced, existing first.
    pub fn absorb(&mut self, newer: TestFileParts) {
        for i in newer.imports {
            self.add_statement(i);
        }
        for o in newer.other {
            self.add_statement(o);
        }
        for (_, block) in newer.blocks {
            self.add_statement(block);
        }
    }

    pub fn render(&self) -> String {
        let mut imports = self.imports.clone();
        imports.sort();

        let mut sections = Vec::new();
        if !imports.is_empty() {
            sections.push(imports.join("\n"));
        }
        if !self.other.is_empty() {
            sections.push(self.other.join("\n\n"));
        }
        if !self.blocks.is_empty() {
            sections.push(self.blocks.values().cloned().collect::<Vec<_>>().join("\n\n"));
        }

        if sections.is_empty() {
            return String::new();
        }
        format!("{}\n", sections.join("\n\n"))
    }

    pub fn block_names(&self) -> impl Iterator<Item = &str> {
        self.blocks.keys().map(String::as_str)
    }
}

/* ============================================================
   Public entry
   ============================================================ */

/// Merge newly generated test code into existing content.
pub fn merge_test_content(existing: &str, generated: &str) -> String {
    if existing.trim().is_empty() {
        return TestFileParts::parse(generated).render();
    }

    let mut base = TestFileParts::parse(existing);
    base.absorb(TestFileParts::parse(generated));
    base.render()
}

/// True when `content` already has a block for the declaration.
///
/// Matches `name`, `Owner.name`, `Owner#name` (with or without `()`), or an
/// `Owner` block containing a nested block for `name`.
pub fn has_block_for(content: &str, decl_name: &str, owner: Option<&str>) -> bool {
    let parts = TestFileParts::parse(content);

    let mut wanted: Vec<String> = vec![decl_name.to_string()];
    if let Some(owner) = owner {
        wanted.push(format!("{owner}.{decl_name}"));
        wanted.push(format!("{owner}#{decl_name}"));
    }
    let matches = |title: &str| {
        let title = title.trim().trim_end_matches("()");
        wanted.iter().any(|w| w == title)
    };

    if parts.block_names().any(matches) {
        return true;
    }

    let Some(owner) = owner else {
        return false;
    };

    parts
        .blocks
        .iter()
        .filter(|(name, _)| name.as_str() == owner)
        .any(|(_, block)| {
            block_body(block).is_some_and(|inner| {
                inner_titles(inner)
                    .into_iter()
                    .any(|(is_block, title)| {
                        is_block && {
                            let t = title.trim().trim_end_matches("()");
                            t == decl_name || t == format!("#{decl_name}") || t == format!(".{decl_name}")
                        }
                    })
            })
        })
}

/// Number of describe/it/test calls in `content`.
pub fn count_test_calls(content: &str) -> usize {
    let Ok(re) = Regex::new(r"(?:^|[^\w$.])(?:describe|it|test)(?:\.(?:only|skip|todo|each|concurrent))?\s*[(`]") else {
        return 0;
    };
    re.find_iter(&scan(content).masked).count()
}

/* ============================================================
   Statement classification
   ============================================================ */

fn is_import(code: &str) -> bool {
    code.strip_prefix("import")
        .is_some_and(|rest| rest.starts_with([' ', '{', '\'', '"', '*', '\n', '\t']))
}

fn import_key(stmt: &str) -> String {
    stmt.trim().trim_end_matches(';').trim_end().to_string()
}

/// `callee(` followed by a string literal: returns (callee, literal).
fn call_title(code: &str) -> Option<(&str, String)> {
    let callee_len = code
        .char_indices()
        .find(|(_, c)| !(c.is_alphanumeric() || *c == '_' || *c == '$' || *c == '.'))
        .map(|(i, _)| i)
        .unwrap_or(code.len());
    let callee = &code[..callee_len];
    if callee.is_empty() {
        return None;
    }

    let rest = code[callee_len..].trim_start().strip_prefix('(')?.trim_start();
    let quote = rest.chars().next().filter(|c| matches!(c, '\'' | '"' | '`'))?;

    let mut title = String::new();
    let mut chars = rest[1..].chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    title.push(next);
                }
            }
            c if c == quote => return Some((callee, title)),
            '$' if quote == '`' && chars.clone().next() == Some('{') => return None,
            c => title.push(c),
        }
    }
    None
}

/* ============================================================
   Block splicing
   ============================================================ */

/// Byte range of the callback body (between its braces) of a block call.
fn body_range(block: &str) -> Option<(usize, usize)> {
    scan(block)
        .pairs
        .iter()
        .filter(|p| p.ch == '{' && p.depth == 1)
        .max_by_key(|p| p.open)
        .map(|p| (p.open + 1, p.close))
}

fn block_body(block: &str) -> Option<&str> {
    body_range(block).map(|(start, end)| &block[start..end])
}

/// (is_block, title) for every titled call directly inside `inner`.
fn inner_titles(inner: &str) -> Vec<(bool, String)> {
    scan(inner)
        .statements(inner)
        .into_iter()
        .filter_map(|stmt| {
            let (callee, title) = call_title(code_start(stmt))?;
            if BLOCK_CALLEES.contains(&callee) {
                Some((true, title))
            } else if CASE_CALLEES.contains(&callee) {
                Some((false, title))
            } else {
                None
            }
        })
        .collect()
}

/// Splice `newer`'s body into `existing`, just before its closing brace.
/// Cases and nested blocks whose title already exists are dropped.
fn splice_block(existing: &str, newer: &str) -> String {
    let (Some((e_start, e_end)), Some((n_start, n_end))) = (body_range(existing), body_range(newer)) else {
        return existing.to_string();
    };

    let e_inner = &existing[e_start..e_end];
    let n_inner = &newer[n_start..n_end];

    let e_scan = scan(e_inner);
    let e_statements: HashSet<&str> = e_scan.statements(e_inner).into_iter().collect();
    let e_titles: HashSet<(bool, String)> = inner_titles(e_inner).into_iter().collect();

    let n_scan = scan(n_inner);
    let additions: Vec<&str> = n_scan
        .statement_spans(n_inner)
        .into_iter()
        .filter_map(|span| {
            let stmt = &n_inner[span.clone()];
            if e_statements.contains(stmt) {
                return None;
            }
            if let Some((callee, title)) = call_title(code_start(stmt)) {
                let is_block = BLOCK_CALLEES.contains(&callee);
                if (is_block || CASE_CALLEES.contains(&callee)) && e_titles.contains(&(is_block, title)) {
                    return None;
                }
            }
            // keep the statement's own indentation
            let line_start = n_inner[..span.start].rfind('\n').map(|i| i + 1).unwrap_or(span.start);
            let lead = &n_inner[line_start..span.start];
            let from = if lead.trim().is_empty() { line_start } else { span.start };
            Some(&n_inner[from..span.end])
        })
        .collect();

    if additions.is_empty() {
        return existing.to_string();
    }

    let head = existing[..e_end].trim_end();
    let close_line_start = existing[..e_end].rfind('\n').map(|i| i + 1).unwrap_or(e_end);
    let indent = &existing[close_line_start..e_end];
    let indent = if indent.trim().is_empty() { indent } else { "" };
    let gap = if head.ends_with('{') { "\n" } else { "\n\n" };

    format!(
        "{head}{gap}{}\n{indent}{}",
        additions.join("\n\n"),
        &existing[e_end..]
    )
}
