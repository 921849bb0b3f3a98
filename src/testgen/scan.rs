//! testgen/scan.rs
//!
//! Single-pass lexical scanner for generated JS/TS test code.
//!
//! Tracks string, template, regex and comment state so that delimiters
//! inside them are ignored. Produces:
//! - delimiter balance (unclosed openers, mismatched closers)
//! - a masked copy of the text (string/comment contents blanked, newlines kept)
//! - top-level statement boundaries
//! - matched delimiter pairs with their nesting depth

use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opener {
    /// `(`, `[`, `{`, `` ` `` or `$` for a `${` template expression.
    pub ch: char,
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mismatch {
    pub found: char,
    /// Innermost open delimiter at that point.
    pub open: Option<Opener>,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unterminated {
    pub what: &'static str,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pair {
    pub ch: char,
    pub open: usize,
    pub close: usize,
    /// Number of delimiters enclosing the opener.
    pub depth: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Scan {
    pub masked: String,
    /// Still open at EOF, outermost first.
    pub unclosed: Vec<Opener>,
    pub mismatches: Vec<Mismatch>,
    pub unterminated: Vec<Unterminated>,
    pub pairs: Vec<Pair>,
    statements: Vec<Range<usize>>,
}

impl Scan {
    pub fn is_balanced(&self) -> bool {
        self.unclosed.is_empty() && self.mismatches.is_empty() && self.unterminated.is_empty()
    }

    /// Top-level statements with their leading comments, trimmed.
    pub fn statements<'a>(&self, src: &'a str) -> Vec<&'a str> {
        self.statement_spans(src)
            .into_iter()
            .map(|r| &src[r])
            .collect()
    }

    /// Byte ranges of [`Scan::statements`] in `src`.
    pub fn statement_spans(&self, src: &str) -> Vec<Range<usize>> {
        self.statements
            .iter()
            .filter_map(|r| {
                let raw = &src[r.clone()];
                let start = r.start + (raw.len() - raw.trim_start().len());
                let end = r.start + raw.trim_end().len();
                (start < end).then_some(start..end)
            })
            .collect()
    }
}

pub fn scan(src: &str) -> Scan {
    let mut s = Scanner::new(src);
    s.run();
    s.finish()
}

/// `stmt` without its leading comments.
pub fn code_start(stmt: &str) -> &str {
    let mut rest = stmt.trim_start();
    loop {
        if let Some(r) = rest.strip_prefix("//") {
            rest = r.split_once('\n').map(|(_, t)| t).unwrap_or("").trim_start();
        } else if let Some(r) = rest.strip_prefix("/*") {
            rest = r.split_once("*/").map(|(_, t)| t).unwrap_or("").trim_start();
        } else {
            return rest;
        }
    }
}

/* ============================================================
   Scanner
   ============================================================ */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Code,
    Single,
    Double,
    Template,
    LineComment,
    BlockComment,
    Regex { in_class: bool },
}

const REGEX_AFTER: &str = "(,=:[!&|?{};+-*%<>~^";
const REGEX_AFTER_WORDS: [&str; 13] = [
    "return", "typeof", "case", "do", "else", "in", "of", "new", "delete", "void", "throw",
    "instanceof", "yield",
];
const CONTINUATION: &str = ".?:+-*/%&|^=,([<>`";
const CONTINUATION_WORDS: [&str; 3] = ["else", "catch", "finally"];

struct Scanner<'a> {
    src: &'a str,
    chars: Vec<(usize, char)>,
    i: usize,
    line: usize,
    column: usize,
    mode: Mode,
    stack: Vec<Opener>,
    scan: Scan,
    comment_start: (usize, usize),
    string_start: (usize, usize),

    // regex detection
    last_code: Option<char>,
    word: String,
    last_word: String,

    // statement splitting
    boundaries: Vec<usize>,
    stmt_has_code: bool,
    ends_value: bool,
    pending: Option<usize>,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.char_indices().collect(),
            i: 0,
            line: 1,
            column: 1,
            mode: Mode::Code,
            stack: Vec::new(),
            scan: Scan {
                masked: String::with_capacity(src.len()),
                ..Scan::default()
            },
            comment_start: (1, 1),
            string_start: (1, 1),
            last_code: None,
            word: String::new(),
            last_word: String::new(),
            boundaries: vec![0],
            stmt_has_code: false,
            ends_value: false,
            pending: None,
        }
    }

    fn peek(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.i + ahead).map(|(_, c)| *c)
    }

    fn offset(&self) -> usize {
        self.chars.get(self.i).map(|(o, _)| *o).unwrap_or(self.src.len())
    }

    fn advance(&mut self, c: char) {
        self.i += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
    }

    fn emit(&mut self, c: char) {
        self.scan.masked.push(c);
        self.advance(c);
    }

    fn mask(&mut self, c: char) {
        self.scan.masked.push(if c == '\n' { '\n' } else { ' ' });
        self.advance(c);
    }

    fn run(&mut self) {
        while let Some(c) = self.peek(0) {
            match self.mode {
                Mode::Code => self.code(c),
                Mode::Single => self.quoted(c, '\''),
                Mode::Double => self.quoted(c, '"'),
                Mode::Template => self.template(c),
                Mode::LineComment => {
                    if c == '\n' {
                        self.mode = Mode::Code;
                        self.code(c);
                    } else {
                        self.mask(c);
                    }
                }
                Mode::BlockComment => {
                    if c == '*' && self.peek(1) == Some('/') {
                        self.mask(c);
                        self.mask('/');
                        self.mode = Mode::Code;
                    } else {
                        self.mask(c);
                    }
                }
                Mode::Regex { in_class } => self.regex(c, in_class),
            }
        }
    }

    fn code(&mut self, c: char) {
        match c {
            '\n' => {
                self.end_word();
                self.newline_at_top();
                self.emit(c);
                return;
            }
            c if c.is_whitespace() => {
                self.end_word();
                self.emit(c);
                return;
            }
            '/' if self.peek(1) == Some('/') => {
                self.end_word();
                self.mode = Mode::LineComment;
                self.mask(c);
                self.mask('/');
                return;
            }
            '/' if self.peek(1) == Some('*') => {
                self.end_word();
                self.comment_start = (self.line, self.column);
                self.mode = Mode::BlockComment;
                self.mask(c);
                self.mask('*');
                return;
            }
            _ => {}
        }

        self.before_significant(c);
        let here = Opener {
            ch: c,
            offset: self.offset(),
            line: self.line,
            column: self.column,
        };

        if is_ident(c) {
            self.word.push(c);
        } else {
            self.end_word();
        }

        match c {
            '\'' | '"' => {
                self.string_start = (self.line, self.column);
                self.mode = if c == '\'' { Mode::Single } else { Mode::Double };
                self.emit(c);
                return;
            }
            '`' => {
                self.stack.push(here);
                self.mode = Mode::Template;
                self.emit(c);
                return;
            }
            '/' if self.regex_allowed() => {
                self.string_start = (self.line, self.column);
                self.mode = Mode::Regex { in_class: false };
                self.emit(c);
                return;
            }
            '(' | '[' | '{' => {
                self.stack.push(here);
                self.emit(c);
            }
            ')' | ']' | '}' => {
                let reopens_template = self.close(c, here);
                self.emit(c);
                if reopens_template {
                    self.mode = Mode::Template;
                    return;
                }
            }
            ';' => {
                self.emit(c);
                self.last_code = Some(c);
                if self.stack.is_empty() {
                    self.boundaries.push(here.offset + 1);
                    self.stmt_has_code = false;
                    self.ends_value = false;
                    self.pending = None;
                }
                return;
            }
            _ => self.emit(c),
        }

        self.last_code = Some(c);
        self.ends_value = is_ident(c) || matches!(c, ')' | ']' | '}');
    }

    /// Returns true when the closer ends a `${` expression.
    fn close(&mut self, c: char, at: Opener) -> bool {
        let want = match c {
            ')' => '(',
            ']' => '[',
            _ => '{',
        };

        match self.stack.last().copied() {
            Some(top) if top.ch == want || (c == '}' && top.ch == '$') => {
                self.stack.pop();
                self.scan.pairs.push(Pair {
                    ch: top.ch,
                    open: top.offset,
                    close: at.offset,
                    depth: self.stack.len(),
                });
                top.ch == '$'
            }
            top => {
                self.scan.mismatches.push(Mismatch {
                    found: c,
                    open: top,
                    line: at.line,
                    column: at.column,
                });
                false
            }
        }
    }

    fn quoted(&mut self, c: char, quote: char) {
        match c {
            '\\' => {
                self.mask(c);
                if let Some(next) = self.peek(0) {
                    self.mask(next);
                }
            }
            '\n' => {
                let (line, column) = self.string_start;
                self.scan.unterminated.push(Unterminated { what: "string literal", line, column });
                self.mode = Mode::Code;
                self.code(c);
            }
            c if c == quote => {
                self.emit(c);
                self.mode = Mode::Code;
                self.last_code = Some(c);
                self.ends_value = true;
            }
            _ => self.mask(c),
        }
    }

    fn template(&mut self, c: char) {
        match c {
            '\\' => {
                self.mask(c);
                if let Some(next) = self.peek(0) {
                    self.mask(next);
                }
            }
            '`' => {
                if let Some(top) = self.stack.pop() {
                    self.scan.pairs.push(Pair {
                        ch: '`',
                        open: top.offset,
                        close: self.offset(),
                        depth: self.stack.len(),
                    });
                }
                self.emit(c);
                self.mode = Mode::Code;
                self.last_code = Some(c);
                self.ends_value = true;
            }
            '$' if self.peek(1) == Some('{') => {
                let here = Opener {
                    ch: '$',
                    offset: self.offset(),
                    line: self.line,
                    column: self.column,
                };
                self.stack.push(here);
                self.emit(c);
                self.emit('{');
                self.mode = Mode::Code;
                self.last_code = Some('{');
            }
            _ => self.mask(c),
        }
    }

    fn regex(&mut self, c: char, in_class: bool) {
        match c {
            '\\' => {
                self.mask(c);
                if let Some(next) = self.peek(0) {
                    if next != '\n' {
                        self.mask(next);
                    }
                }
            }
            '\n' => {
                // Not a regex after all; resume as code.
                self.mode = Mode::Code;
                self.code(c);
            }
            '[' => {
                self.mode = Mode::Regex { in_class: true };
                self.mask(c);
            }
            ']' => {
                self.mode = Mode::Regex { in_class: false };
                self.mask(c);
            }
            '/' if !in_class => {
                self.emit(c);
                self.mode = Mode::Code;
                self.last_code = Some(c);
                self.ends_value = true;
            }
            _ => self.mask(c),
        }
    }

    fn end_word(&mut self) {
        if !self.word.is_empty() {
            self.last_word = std::mem::take(&mut self.word);
        }
    }

    fn regex_allowed(&self) -> bool {
        match self.last_code {
            None => true,
            Some(c) if REGEX_AFTER.contains(c) => true,
            Some(c) if is_ident(c) => REGEX_AFTER_WORDS.contains(&self.last_word.as_str()),
            _ => false,
        }
    }

    fn newline_at_top(&mut self) {
        if self.stack.is_empty() && self.stmt_has_code && self.ends_value && self.pending.is_none() {
            self.pending = Some(self.offset() + 1);
        }
    }

    fn before_significant(&mut self, c: char) {
        if self.stack.is_empty() {
            if let Some(at) = self.pending.take() {
                let rest = &self.src[self.offset()..];
                let continues = CONTINUATION.contains(c)
                    || CONTINUATION_WORDS
                        .iter()
                        .any(|w| rest.starts_with(w) && !rest[w.len()..].starts_with(is_ident));
                if !continues {
                    self.boundaries.push(at);
                    self.ends_value = false;
                }
            }
        }
        self.stmt_has_code = true;
    }

    fn finish(mut self) -> Scan {
        match self.mode {
            Mode::BlockComment => {
                let (line, column) = self.comment_start;
                self.scan.unterminated.push(Unterminated { what: "block comment", line, column });
            }
            Mode::Single | Mode::Double => {
                let (line, column) = self.string_start;
                self.scan.unterminated.push(Unterminated { what: "string literal", line, column });
            }
            _ => {}
        }

        self.boundaries.push(self.src.len());
        self.boundaries.dedup();
        self.scan.statements = self
            .boundaries
            .windows(2)
            .map(|w| w[0]..w[1])
            .collect();

        self.scan.unclosed = self.stack;
        self.scan
    }
}

fn is_ident(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delimiters_in_strings_and_comments_are_ignored() {
        let src = "const a = '{(['; // }}}\nconst b = \"]\"; /* ) */\nconst c = `x ${ {a: 1}.a } }`;\n";
        let s = scan(src);
        assert!(s.is_balanced(), "{s:?}");
    }

    #[test]
    fn reports_oldest_unclosed_opener() {
        let s = scan("describe('x', () => {\n  it('y', () => {\n    expect(1)\n");
        assert!(!s.is_balanced());
        assert_eq!(s.unclosed.len(), 4);
        assert_eq!((s.unclosed[0].ch, s.unclosed[0].line, s.unclosed[0].column), ('(', 1, 9));
    }

    #[test]
    fn mismatched_closer_is_reported() {
        let s = scan("foo(a, { b: 1 )");
        assert_eq!(s.mismatches.len(), 1);
        assert_eq!(s.mismatches[0].found, ')');
        assert_eq!(s.mismatches[0].open.map(|o| o.ch), Some('{'));
    }

    #[test]
    fn regex_literals_do_not_count() {
        assert!(scan("const r = /[(]+\\//g;\nconst d = a / b / c;\n").is_balanced());
        assert!(scan("function f() { return /}/.test(x); }").is_balanced());
    }

    #[test]
    fn masks_string_and_comment_contents() {
        let s = scan("a('this.x'); // this.y\nthis.z;");
        assert_eq!(s.masked.lines().next().unwrap().trim_end(), "a('      ');");
        assert!(s.masked.contains("this.z"));
        assert!(!s.masked.contains("this.y"));
    }

    #[test]
    fn splits_top_level_statements() {
        let src = "import { a } from './a'\nimport b from './b';\n\n// about x\ndescribe('x', () => {\n  it('y', () => {});\n})\n\nconst v = a\n  .map(f)\n  .filter(g)\n";
        let s = scan(src);
        assert_eq!(
            s.statements(src),
            vec![
                "import { a } from './a'",
                "import b from './b';",
                "// about x\ndescribe('x', () => {\n  it('y', () => {});\n})",
                "const v = a\n  .map(f)\n  .filter(g)",
            ]
        );
    }

    #[test]
    fn code_start_skips_leading_comments() {
        assert_eq!(code_start("// a\n/* b */\n  import x from 'x';"), "import x from 'x';");
        assert_eq!(code_start("// only"), "");
    }

    #[test]
    fn records_pairs_with_depth() {
        let s = scan("describe('x', () => { it(); })");
        let body = s.pairs.iter().find(|p| p.ch == '{').unwrap();
        assert_eq!(body.depth, 1);
        assert_eq!(&"describe('x', () => { it(); })"[body.open..=body.close], "{ it(); }");
    }

    #[test]
    fn unterminated_string_is_reported() {
        let s = scan("const a = 'oops\nconst b = 1;");
        assert_eq!(s.unterminated.len(), 1);
        assert_eq!(s.unterminated[0].line, 1);
    }
}
