//! testgen/validate.rs
//!
//! Gate for every write: structural completeness, private-member
//! containment, framework consistency and an optional type-check pass.

use std::collections::BTreeSet;
use std::fmt;

use regex::Regex;

use crate::detectors::framework::TestFramework;
use crate::testgen::scan::{code_start, scan, Scan};
use crate::testgen::typecheck::TypeChecker;

/// Globals a missing-import diagnostic may be auto-fixed for.
pub const TEST_GLOBALS: [&str; 10] = [
    "describe", "it", "test", "expect", "beforeEach", "afterEach", "beforeAll", "afterAll", "vi",
    "jest",
];

const MOCK_HELPERS: [&str; 12] = [
    "fn", "mock", "spyOn", "unmock", "doMock", "mocked", "clearAllMocks", "resetAllMocks",
    "restoreAllMocks", "useFakeTimers", "useRealTimers", "advanceTimersByTime",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKind {
    Syntax,
    Truncation,
    PrivateAccess,
    FrameworkMismatch,
    Type,
}

impl IssueKind {
    pub fn is_syntax_class(self) -> bool {
        matches!(self, IssueKind::Syntax | IssueKind::Truncation)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub kind: IssueKind,
    pub message: String,
    pub line: Option<usize>,
    pub column: Option<usize>,
}

impl ValidationIssue {
    fn at(kind: IssueKind, message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            kind,
            message: message.into(),
            line: Some(line),
            column: Some(column),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.line, self.column) {
            (Some(l), Some(c)) => write!(f, "{}:{}: {}", l, c, self.message),
            (Some(l), None) => write!(f, "{}: {}", l, self.message),
            _ => f.write_str(&self.message),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<String>,
    pub missing_imports: Vec<String>,
}

impl ValidationResult {
    fn from_issues(errors: Vec<ValidationIssue>, warnings: Vec<String>, missing_imports: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
            missing_imports,
        }
    }

    pub fn has_syntax_errors(&self) -> bool {
        self.errors.iter().any(|e| e.kind.is_syntax_class())
    }

    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/* ============================================================
   Validator
   ============================================================ */

pub struct FileValidator<'a> {
    framework: Option<TestFramework>,
    type_checker: Option<&'a dyn TypeChecker>,
}

impl<'a> FileValidator<'a> {
    pub fn new(framework: Option<TestFramework>, type_checker: Option<&'a dyn TypeChecker>) -> Self {
        Self {
            framework,
            type_checker,
        }
    }

    pub fn validate(&self, path: &str, content: &str, private_members: &BTreeSet<String>) -> ValidationResult {
        let scanned = scan(content);
        let mut errors = structural_issues(content, &scanned);
        let mut warnings = Vec::new();
        let mut missing = Vec::new();

        errors.extend(private_access_issues(&scanned.masked, private_members));
        errors.extend(framework_issues(content, &scanned.masked, self.framework));

        if !has_test_calls(&scanned.masked) {
            warnings.push("no test cases found".to_string());
        }

        // A file that does not even balance is not worth compiling.
        if errors.iter().all(|e| !e.kind.is_syntax_class()) {
            if let Some(checker) = self.type_checker {
                match checker.check(path, content) {
                    Ok(raw) => {
                        let diag = parse_type_diagnostics(&raw);
                        missing = diag.missing_imports;
                        errors.extend(diag.errors);
                    }
                    Err(e) => warnings.push(format!("type-check skipped: {e}")),
                }
            }
        }

        ValidationResult::from_issues(errors, warnings, missing)
    }

    /// Validate; when the only complaint is missing framework globals,
    /// insert the import once and validate again.
    pub fn validate_with_autofix(
        &self,
        path: &str,
        content: &str,
        private_members: &BTreeSet<String>,
    ) -> (String, ValidationResult) {
        let first = self.validate(path, content, private_members);
        if first.missing_imports.is_empty() {
            return (content.to_string(), first);
        }

        let Some(framework) = declared_framework(content).or(self.framework) else {
            return (content.to_string(), first);
        };

        let fixed = insert_missing_imports(content, &first.missing_imports, framework);
        let second = self.validate(path, &fixed, private_members);
        (fixed, second)
    }
}

/// Delimiter balance plus the truncation heuristics.
pub fn is_structurally_complete(content: &str) -> bool {
    let scanned = scan(content);
    structural_issues(content, &scanned).is_empty()
}

/* ============================================================
   1. Structural completeness
   ============================================================ */

fn structural_issues(content: &str, scanned: &Scan) -> Vec<ValidationIssue> {
    let mut out = Vec::new();

    for m in &scanned.mismatches {
        let message = match m.open {
            Some(o) => format!(
                "unexpected `{}`; `{}` opened at {}:{} is still open",
                m.found, display_opener(o.ch), o.line, o.column
            ),
            None => format!("unexpected `{}` with nothing open", m.found),
        };
        out.push(ValidationIssue::at(IssueKind::Syntax, message, m.line, m.column));
    }

    for u in &scanned.unterminated {
        out.push(ValidationIssue::at(
            IssueKind::Syntax,
            format!("unterminated {}", u.what),
            u.line,
            u.column,
        ));
    }

    if let Some(oldest) = scanned.unclosed.first() {
        out.push(ValidationIssue::at(
            IssueKind::Syntax,
            format!(
                "unclosed `{}` ({} delimiter(s) open at end of file)",
                display_opener(oldest.ch),
                scanned.unclosed.len()
            ),
            oldest.line,
            oldest.column,
        ));
    }

    out.extend(truncation_issues(content, &scanned.masked));
    out
}

fn display_opener(ch: char) -> &'static str {
    match ch {
        '(' => "(",
        '[' => "[",
        '{' => "{",
        '`' => "`",
        _ => "${",
    }
}

/// Heuristics for output that stops mid-expression. Only lines at a
/// truncated tail are inspected: followed by EOF or a closing delimiter.
fn truncation_issues(content: &str, masked: &str) -> Vec<ValidationIssue> {
    let lines: Vec<&str> = masked.lines().collect();
    let originals: Vec<&str> = content.lines().collect();
    let mut out = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        let code = line.trim();
        if code.is_empty() {
            continue;
        }

        let next = lines[i + 1..].iter().map(|l| l.trim()).find(|l| !l.is_empty());
        let at_tail = match next {
            None => true,
            Some(n) => n.starts_with([')', ']', '}']),
        };
        if !at_tail {
            continue;
        }

        let reason = if let Some(op) = dangling_operator(code) {
            Some(format!("line ends with dangling operator `{op}`"))
        } else if ends_with_member_dot(code) {
            Some("line ends with a property access dot".to_string())
        } else if next.is_some_and(|n| !n.starts_with(')')) && unbalanced_call(code) {
            Some("call is missing its closing parenthesis".to_string())
        } else {
            bare_identifier_rhs(code).map(|rhs| format!("assignment from bare identifier `{rhs}` looks cut off"))
        };

        if let Some(reason) = reason {
            let column = originals
                .get(i)
                .map(|l| l.trim_end().chars().count())
                .unwrap_or(1)
                .max(1);
            out.push(ValidationIssue::at(IssueKind::Truncation, reason, i + 1, column));
        }
    }

    out
}

fn dangling_operator(code: &str) -> Option<&'static str> {
    const OPS: [&str; 14] = ["&&", "||", "??", "=>", "===", "!==", "==", "!=", "=", "+", "-", "*", "%", "|"];

    if code.ends_with("++") || code.ends_with("--") {
        return None;
    }
    OPS.iter().copied().find(|op| code.ends_with(op))
}

fn ends_with_member_dot(code: &str) -> bool {
    code.ends_with('.') && !code.ends_with("...")
}

fn unbalanced_call(code: &str) -> bool {
    let opens = code.matches('(').count();
    let closes = code.matches(')').count();
    opens > closes && !code.ends_with(['(', '{', '['])
}

/// `x = foo` / `const x = foo` with no semicolon and a non-literal RHS.
fn bare_identifier_rhs(code: &str) -> Option<&str> {
    const LITERALS: [&str; 7] = ["true", "false", "null", "undefined", "NaN", "Infinity", "this"];

    if code.ends_with(';') {
        return None;
    }

    let rest = ["const ", "let ", "var "]
        .iter()
        .find_map(|kw| code.strip_prefix(kw))
        .unwrap_or(code);

    let (lhs, rhs) = rest.split_once('=')?;
    let lhs = lhs.trim();
    let rhs = rhs.trim();

    if rhs.starts_with(['=', '>']) || lhs.ends_with(['!', '<', '>', '=', '+', '-', '*', '/', '|', '&', '?']) {
        return None;
    }

    let ident = |s: &str| {
        let mut chars = s.chars();
        chars
            .next()
            .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
            && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
    };
    let lhs_ok = !lhs.is_empty()
        && lhs
            .split('.')
            .all(|part| ident(part.trim()));

    (lhs_ok && ident(rhs) && !LITERALS.contains(&rhs)).then_some(rhs)
}

/* ============================================================
   2. Private-member containment
   ============================================================ */

fn private_access_issues(masked: &str, members: &BTreeSet<String>) -> Vec<ValidationIssue> {
    let mut out = Vec::new();

    for member in members {
        let name = member.trim_start_matches('#');
        if name.is_empty() {
            continue;
        }

        let pattern = format!(r"[A-Za-z_$][\w$]*\s*\??\.\s*#?{}\b", regex::escape(name));
        let Ok(re) = Regex::new(&pattern) else {
            continue;
        };

        if let Some(m) = re.find(masked) {
            let (line, column) = line_col(masked, m.start());
            out.push(ValidationIssue::at(
                IssueKind::PrivateAccess,
                format!("test touches private member `{member}`"),
                line,
                column,
            ));
        }
    }

    out
}

fn line_col(text: &str, offset: usize) -> (usize, usize) {
    let before = &text[..offset];
    let line = before.matches('\n').count() + 1;
    let column = before.rsplit('\n').next().map(|l| l.chars().count()).unwrap_or(0) + 1;
    (line, column)
}

/* ============================================================
   3. Framework consistency
   ============================================================ */

/// Framework named by the file's own imports.
pub fn declared_framework(content: &str) -> Option<TestFramework> {
    content.lines().find_map(|line| {
        let line = line.trim();
        if !line.starts_with("import") {
            return None;
        }
        let module = line
            .rsplit(['\'', '"'])
            .nth(1)?;
        TestFramework::from_module(module)
    })
}

fn framework_issues(content: &str, masked: &str, configured: Option<TestFramework>) -> Vec<ValidationIssue> {
    let Some(declared) = declared_framework(content).or(configured) else {
        return Vec::new();
    };

    let foreign = declared.other();
    match find_helper_use(masked, foreign.mock_object()) {
        Some(offset) => {
            let (line, column) = line_col(masked, offset);
            vec![ValidationIssue::at(
                IssueKind::FrameworkMismatch,
                format!(
                    "`{}.*` helpers used in a {declared} test file (use `{}.*`)",
                    foreign.mock_object(),
                    declared.mock_object()
                ),
                line,
                column,
            )]
        }
        None => Vec::new(),
    }
}

/// Offset of the first `<object>.<helper>` call in masked code.
fn find_helper_use(masked: &str, object: &str) -> Option<usize> {
    let prefix = format!("{object}.");
    let mut from = 0;

    while let Some(pos) = masked[from..].find(&prefix) {
        let at = from + pos;
        let preceded_by_ident = masked[..at]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '$' || c == '.');
        let rest = &masked[at + prefix.len()..];

        if !preceded_by_ident
            && MOCK_HELPERS.iter().any(|h| {
                rest.starts_with(h)
                    && !rest[h.len()..].starts_with(|c: char| c.is_alphanumeric() || c == '_')
            })
        {
            return Some(at);
        }
        from = at + prefix.len();
    }

    None
}

fn has_test_calls(masked: &str) -> bool {
    ["it(", "test(", "it.each", "test.each", "it.skip(", "test.skip(", "it.todo(", "test.todo("]
        .iter()
        .any(|p| masked.contains(p))
}

/* ============================================================
   4. Type-check diagnostics
   ============================================================ */

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeDiagnostics {
    pub missing_imports: Vec<String>,
    pub errors: Vec<ValidationIssue>,
}

/// tsc output: `file(12,5): error TS2304: Cannot find name 'describe'.`
pub fn parse_type_diagnostics(raw: &str) -> TypeDiagnostics {
    let mut diag = TypeDiagnostics::default();

    for line in raw.lines() {
        let Some(at) = line.find("error TS") else {
            continue;
        };

        let message = line[at..].trim().to_string();
        let missing = ["TS2304", "TS2582", "TS2593"].iter().any(|c| message.contains(c))
            && message.contains("Cannot find name '");

        if missing {
            if let Some(name) = quoted_name(&message) {
                if TEST_GLOBALS.contains(&name) {
                    if !diag.missing_imports.iter().any(|n| n == name) {
                        diag.missing_imports.push(name.to_string());
                    }
                    continue;
                }
            }
        }

        let (line_no, column) = tsc_position(&line[..at]);
        diag.errors.push(ValidationIssue {
            kind: IssueKind::Type,
            message,
            line: line_no,
            column,
        });
    }

    diag
}

fn quoted_name(message: &str) -> Option<&str> {
    let start = message.find("Cannot find name '")? + "Cannot find name '".len();
    let len = message[start..].find('\'')?;
    Some(&message[start..start + len])
}

/// `path(12,5): ` → (12, 5)
fn tsc_position(prefix: &str) -> (Option<usize>, Option<usize>) {
    let inner = prefix
        .rfind('(')
        .and_then(|open| prefix[open + 1..].split_once(')'))
        .map(|(inner, _)| inner);

    match inner.and_then(|i| i.split_once(',')) {
        Some((l, c)) => (l.trim().parse().ok(), c.trim().parse().ok()),
        None => (None, None),
    }
}

/// Add `names` to the framework's import, creating it if needed.
pub fn insert_missing_imports(content: &str, names: &[String], framework: TestFramework) -> String {
    let module = framework.globals_module();
    let scanned = scan(content);
    let spans = scanned.statement_spans(content);

    let existing = spans.iter().find(|r| {
        let stmt = code_start(&content[(*r).clone()]);
        stmt.starts_with("import")
            && !stmt.starts_with("import type")
            && (stmt.contains(&format!("'{module}'")) || stmt.contains(&format!("\"{module}\"")))
    });

    if let Some(span) = existing {
        let stmt = &content[span.clone()];
        if let (Some(open), Some(close)) = (stmt.find('{'), stmt.find('}')) {
            let mut current: Vec<String> = stmt[open + 1..close]
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            for n in names {
                if !current.contains(n) {
                    current.push(n.clone());
                }
            }
            let rebuilt = format!("{}{{ {} }}{}", &stmt[..open], current.join(", "), &stmt[close + 1..]);
            return format!("{}{}{}", &content[..span.start], rebuilt, &content[span.end..]);
        }
    }

    let line = format!("import {{ {} }} from '{module}';\n", names.join(", "));
    let last_import_end = spans
        .iter()
        .filter(|r| code_start(&content[(*r).clone()]).starts_with("import"))
        .map(|r| r.end)
        .last();

    match last_import_end {
        Some(end) => {
            let rest = content[end..].strip_prefix('\n').unwrap_or(&content[end..]);
            format!("{}\n{}{}", &content[..end], line, rest)
        }
        None => format!("{line}{content}"),
    }
}
