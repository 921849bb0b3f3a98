//! detectors/ast/ast.rs
//!
//! Flattens a JS/TS syntax tree into a class index and a declaration list.
//! Nothing downstream sees tree-sitter nodes.

use std::cell::RefCell;
use std::collections::HashSet;

use tree_sitter::{Node, Parser, Tree};

use crate::detectors::language::Language;
use crate::error::Error;
use crate::state::DeclKind;

thread_local! {
    static TS_PARSER: RefCell<Option<Parser>> =
        RefCell::new(make_parser(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()));
    static TSX_PARSER: RefCell<Option<Parser>> =
        RefCell::new(make_parser(tree_sitter_typescript::LANGUAGE_TSX.into()));
    static JS_PARSER: RefCell<Option<Parser>> =
        RefCell::new(make_parser(tree_sitter_javascript::LANGUAGE.into()));
}

fn make_parser(language: tree_sitter::Language) -> Option<Parser> {
    let mut p = Parser::new();
    p.set_language(&language).ok()?;
    Some(p)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassInfo {
    pub name: String,
    pub start_byte: usize,
    pub end_byte: usize,
    pub private_properties: Vec<String>,
    pub private_methods: Vec<String>,
    pub exported: bool,
    /// Header plus the first line of every member.
    pub outline: String,
}

impl ClassInfo {
    pub fn private_members(&self) -> Vec<String> {
        let mut all: Vec<String> = self
            .private_properties
            .iter()
            .chain(self.private_methods.iter())
            .cloned()
            .collect();
        all.sort();
        all.dedup();
        all
    }

    fn contains(&self, byte: usize) -> bool {
        self.start_byte <= byte && byte < self.end_byte
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub name: String,
    pub kind: DeclKind,
    pub owner_class: Option<String>,
    pub is_private: bool,
    pub exported: bool,
    pub start_line: usize,
    pub end_line: usize,
    pub start_byte: usize,
    pub source: String,
}

#[derive(Debug, Clone, Default)]
pub struct SourceStructure {
    pub imports: Vec<String>,
    pub classes: Vec<ClassInfo>,
    pub declarations: Vec<Declaration>,
    pub line_count: usize,
}

impl SourceStructure {
    /// Innermost class whose body contains `byte`.
    pub fn class_at(&self, byte: usize) -> Option<&ClassInfo> {
        self.classes
            .iter()
            .filter(|c| c.contains(byte))
            .min_by_key(|c| c.end_byte - c.start_byte)
    }

    pub fn class_named(&self, name: &str) -> Option<&ClassInfo> {
        self.classes.iter().find(|c| c.name == name)
    }
}

/* ============================================================
   Public entry
   ============================================================ */

pub fn parse_source(path: &str, source: &str) -> Option<Tree> {
    let cell = match Language::from_path(path)? {
        Language::TypeScript => &TS_PARSER,
        Language::Tsx => &TSX_PARSER,
        Language::JavaScript => &JS_PARSER,
    };
    cell.with(|p| p.borrow_mut().as_mut()?.parse(source, None))
}

/// Parse `source` and flatten it. Syntax errors inside the tree are
/// tolerated; only a file the parser cannot handle at all is an error.
pub fn analyze_source(path: &str, source: &str) -> Result<SourceStructure, Error> {
    let tree = parse_source(path, source).ok_or_else(|| Error::Unparseable(path.to_string()))?;
    let root = tree.root_node();

    let exported_names = collect_export_clause_names(root, source);
    let classes = index_classes(root, source, &exported_names);

    let mut structure = SourceStructure {
        imports: collect_imports(root, source),
        classes,
        declarations: Vec::new(),
        line_count: source.lines().count(),
    };

    let mut decls = collect_declarations(root, source, &exported_names, &structure);
    decls.sort_by_key(|d| (d.start_line, d.start_byte));
    structure.declarations = decls;

    Ok(structure)
}

/* ============================================================
   Pass 0: imports and export clauses
   ============================================================ */

fn collect_imports(root: Node, src: &str) -> Vec<String> {
    let mut cursor = root.walk();
    let imports = root
        .named_children(&mut cursor)
        .filter(|n| n.kind() == "import_statement")
        .map(|n| text(n, src).to_string())
        .collect();
    imports
}

/// Names exported through `export { a, b as c }` or `export default a`.
fn collect_export_clause_names(root: Node, src: &str) -> HashSet<String> {
    let mut names = HashSet::new();
    let mut cursor = root.walk();

    for stmt in root.named_children(&mut cursor) {
        if stmt.kind() != "export_statement" || stmt.child_by_field_name("source").is_some() {
            continue;
        }

        if let Some(value) = stmt.child_by_field_name("value") {
            if value.kind() == "identifier" {
                names.insert(text(value, src).to_string());
            }
        }

        let mut c2 = stmt.walk();
        for child in stmt.named_children(&mut c2) {
            if child.kind() != "export_clause" {
                continue;
            }
            let mut c3 = child.walk();
            for item in child.named_children(&mut c3) {
                if let Some(name) = item.child_by_field_name("name") {
                    names.insert(text(name, src).to_string());
                }
            }
        }
    }

    names
}

/* ============================================================
   Pass 1: class index
   ============================================================ */

fn index_classes(root: Node, src: &str, exported_names: &HashSet<String>) -> Vec<ClassInfo> {
    let mut classes = Vec::new();

    for node in descendants(root) {
        if !matches!(
            node.kind(),
            "class_declaration" | "abstract_class_declaration" | "class"
        ) {
            continue;
        }

        let Some(name) = class_name(node, src) else {
            continue;
        };
        let Some(body) = node.child_by_field_name("body") else {
            continue;
        };

        let mut info = ClassInfo {
            exported: is_exported(node) || exported_names.contains(&name),
            name,
            start_byte: node.start_byte(),
            end_byte: node.end_byte(),
            private_properties: Vec::new(),
            private_methods: Vec::new(),
            outline: String::new(),
        };

        let mut outline = vec![first_line(text(node, src)).to_string()];

        let mut cursor = body.walk();
        for member in body.named_children(&mut cursor) {
            outline.push(format!("  {}", first_line(text(member, src))));

            match member.kind() {
                "method_definition" => {
                    let Some(member_name) = member_name(member, src) else {
                        continue;
                    };
                    if member_name == "constructor" {
                        info.private_properties
                            .extend(private_parameter_properties(member, src));
                    } else if is_private_member(member, src) {
                        info.private_methods.push(member_name);
                    }
                }
                "public_field_definition" | "field_definition" => {
                    if let Some(member_name) = member_name(member, src) {
                        if is_private_member(member, src) {
                            info.private_properties.push(member_name);
                        }
                    }
                }
                _ => {}
            }
        }

        outline.push("}".into());
        info.outline = outline.join("\n");
        classes.push(info);
    }

    classes
}

/// `constructor(private readonly repo: Repo)` style properties.
fn private_parameter_properties(ctor: Node, src: &str) -> Vec<String> {
    let Some(params) = ctor.child_by_field_name("parameters") else {
        return Vec::new();
    };

    let mut out = Vec::new();
    let mut cursor = params.walk();
    for param in params.named_children(&mut cursor) {
        if !has_private_modifier(param, src) {
            continue;
        }
        if let Some(pattern) = param.child_by_field_name("pattern") {
            out.push(text(pattern, src).to_string());
        }
    }
    out
}

fn class_name(node: Node, src: &str) -> Option<String> {
    if let Some(name) = node.child_by_field_name("name") {
        return Some(text(name, src).to_string());
    }

    // `const Foo = class { ... }`
    let parent = node.parent()?;
    if parent.kind() == "variable_declarator" {
        let name = parent.child_by_field_name("name")?;
        return Some(text(name, src).to_string());
    }
    None
}

/* ============================================================
   Pass 2: declarations
   ============================================================ */

fn collect_declarations(
    root: Node,
    src: &str,
    exported_names: &HashSet<String>,
    structure: &SourceStructure,
) -> Vec<Declaration> {
    let mut out = Vec::new();

    for node in descendants(root) {
        match node.kind() {
            "function_declaration" | "generator_function_declaration" => {
                if !is_top_level(node) {
                    continue;
                }
                let Some(name) = node.child_by_field_name("name").map(|n| text(n, src)) else {
                    continue;
                };
                let exported = is_exported(node) || exported_names.contains(name);
                out.push(declaration(
                    outer_statement(node),
                    src,
                    name.to_string(),
                    DeclKind::Function,
                    None,
                    false,
                    exported,
                ));
            }

            // `export default function () {}` / `export default () => {}`
            "export_statement" => {
                let Some(value) = node.child_by_field_name("value") else {
                    continue;
                };
                let kind = match value.kind() {
                    "arrow_function" => DeclKind::Arrow,
                    "function_expression" | "function" | "generator_function" => DeclKind::Function,
                    _ => continue,
                };
                let name = value
                    .child_by_field_name("name")
                    .map(|n| text(n, src).to_string())
                    .unwrap_or_else(|| "default".to_string());
                out.push(declaration(node, src, name, kind, None, false, true));
            }

            "variable_declarator" => {
                let Some(value) = node.child_by_field_name("value") else {
                    continue;
                };
                let kind = match value.kind() {
                    "arrow_function" => DeclKind::Arrow,
                    "function_expression" | "function" | "generator_function" => DeclKind::Function,
                    _ => continue,
                };
                let Some(stmt) = node.parent() else {
                    continue;
                };
                if !is_top_level(stmt) {
                    continue;
                }
                let Some(name) = node.child_by_field_name("name").map(|n| text(n, src)) else {
                    continue;
                };
                let exported = is_exported(stmt) || exported_names.contains(name);
                if !exported {
                    continue;
                }
                out.push(declaration(
                    outer_statement(stmt),
                    src,
                    name.to_string(),
                    kind,
                    None,
                    false,
                    true,
                ));
            }

            "method_definition" => {
                let Some(parent) = node.parent() else {
                    continue;
                };
                let Some(name) = member_name(node, src) else {
                    continue;
                };

                match parent.kind() {
                    "class_body" => {
                        if name == "constructor" {
                            continue;
                        }
                        let owner = structure.class_at(node.start_byte());
                        out.push(declaration(
                            node,
                            src,
                            name,
                            DeclKind::ClassMethod,
                            owner.map(|c| c.name.clone()),
                            is_private_member(node, src),
                            owner.is_some_and(|c| c.exported),
                        ));
                    }
                    "object" => {
                        // Only object literals bound at module level.
                        let Some(decl) = enclosing_declarator(parent) else {
                            continue;
                        };
                        let binding = decl
                            .child_by_field_name("name")
                            .map(|n| text(n, src))
                            .unwrap_or("");
                        let exported = decl.parent().is_some_and(is_exported)
                            || exported_names.contains(binding);
                        out.push(declaration(
                            node,
                            src,
                            name,
                            DeclKind::ObjectMethod,
                            None,
                            false,
                            exported,
                        ));
                    }
                    _ => {}
                }
            }

            // `handle = () => {}` inside a class body
            "public_field_definition" | "field_definition" => {
                let is_fn = node
                    .child_by_field_name("value")
                    .is_some_and(|v| matches!(v.kind(), "arrow_function" | "function_expression" | "function"));
                if !is_fn {
                    continue;
                }
                let Some(name) = member_name(node, src) else {
                    continue;
                };
                let owner = structure.class_at(node.start_byte());
                out.push(declaration(
                    node,
                    src,
                    name,
                    DeclKind::ClassMethod,
                    owner.map(|c| c.name.clone()),
                    is_private_member(node, src),
                    owner.is_some_and(|c| c.exported),
                ));
            }

            _ => {}
        }
    }

    out
}

fn declaration(
    node: Node,
    src: &str,
    name: String,
    kind: DeclKind,
    owner_class: Option<String>,
    is_private: bool,
    exported: bool,
) -> Declaration {
    Declaration {
        name,
        kind,
        owner_class,
        is_private,
        exported,
        start_line: node.start_position().row + 1,
        end_line: node.end_position().row + 1,
        start_byte: node.start_byte(),
        source: text(node, src).to_string(),
    }
}

/* ============================================================
   Node helpers
   ============================================================ */

/// Every node under `root`, depth first. Order is irrelevant to callers.
fn descendants(root: Node) -> Vec<Node> {
    let mut out = Vec::new();
    let mut stack = vec![root];

    while let Some(node) = stack.pop() {
        let mut cursor = node.walk();
        stack.extend(node.named_children(&mut cursor));
        out.push(node);
    }

    out
}

fn text<'a>(node: Node, src: &'a str) -> &'a str {
    node.utf8_text(src.as_bytes()).unwrap_or("")
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or("").trim_end()
}

fn member_name(node: Node, src: &str) -> Option<String> {
    node.child_by_field_name("name")
        .or_else(|| node.child_by_field_name("property"))
        .map(|n| text(n, src).to_string())
}

fn is_private_member(node: Node, src: &str) -> bool {
    let hash_name = node
        .child_by_field_name("name")
        .or_else(|| node.child_by_field_name("property"))
        .is_some_and(|n| n.kind() == "private_property_identifier");

    hash_name || has_private_modifier(node, src)
}

fn has_private_modifier(node: Node, src: &str) -> bool {
    let mut cursor = node.walk();
    let found = node
        .children(&mut cursor)
        .any(|c| c.kind() == "accessibility_modifier" && text(c, src) == "private");
    found
}

fn is_exported(node: Node) -> bool {
    node.parent().is_some_and(|p| p.kind() == "export_statement")
}

/// The `export` statement wrapping `node`, or `node` itself.
fn outer_statement(node: Node) -> Node {
    match node.parent() {
        Some(p) if p.kind() == "export_statement" => p,
        _ => node,
    }
}

fn is_top_level(node: Node) -> bool {
    match node.parent() {
        Some(p) if p.kind() == "program" => true,
        Some(p) if p.kind() == "export_statement" => {
            p.parent().is_some_and(|g| g.kind() == "program")
        }
        _ => false,
    }
}

/// The variable declarator an object literal is assigned to, if any.
fn enclosing_declarator(object: Node) -> Option<Node> {
    let parent = object.parent()?;
    if parent.kind() != "variable_declarator" {
        return None;
    }
    let stmt = parent.parent()?;
    if is_top_level(stmt) {
        Some(parent)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: &str = r#"import { db } from './db';

export function add(a: number, b: number): number {
  return a + b;
}

function helper() {
  return 1;
}

export const double = (x: number) => x * 2;

const local = () => 3;

export class Cart {
  private items: string[] = [];
  #secret = 1;

  constructor(private readonly store: Store) {}

  addItem(item: string) {
    this.items.push(item);
  }

  private recompute() {
    return this.items.length;
  }
}

export const api = {
  fetch() {
    return db.get();
  },
};
"#;

    fn find<'a>(s: &'a SourceStructure, name: &str) -> &'a Declaration {
        s.declarations
            .iter()
            .find(|d| d.name == name)
            .unwrap_or_else(|| panic!("missing {name}"))
    }

    #[test]
    fn flattens_declarations_in_source_order() {
        let s = analyze_source("src/cart.ts", SRC).unwrap();
        let names: Vec<&str> = s.declarations.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["add", "helper", "double", "addItem", "recompute", "fetch"]);
        assert_eq!(s.imports, vec!["import { db } from './db';".to_string()]);
    }

    #[test]
    fn tags_kinds_owners_and_exports() {
        let s = analyze_source("src/cart.ts", SRC).unwrap();

        let add = find(&s, "add");
        assert_eq!(add.kind, DeclKind::Function);
        assert!(add.exported);
        assert_eq!((add.start_line, add.end_line), (3, 5));

        assert!(!find(&s, "helper").exported);
        assert_eq!(find(&s, "double").kind, DeclKind::Arrow);

        let add_item = find(&s, "addItem");
        assert_eq!(add_item.kind, DeclKind::ClassMethod);
        assert_eq!(add_item.owner_class.as_deref(), Some("Cart"));
        assert!(add_item.exported);
        assert!(!add_item.is_private);
        assert!(find(&s, "recompute").is_private);

        let fetch = find(&s, "fetch");
        assert_eq!(fetch.kind, DeclKind::ObjectMethod);
        assert!(fetch.exported);
    }

    #[test]
    fn indexes_private_class_members() {
        let s = analyze_source("src/cart.ts", SRC).unwrap();
        let cart = s.class_named("Cart").unwrap();

        assert!(cart.exported);
        assert_eq!(
            cart.private_members(),
            vec!["#secret".to_string(), "items".into(), "recompute".into(), "store".into()]
        );
        assert!(cart.outline.starts_with("export class Cart {") || cart.outline.starts_with("class Cart {"));
    }

    #[test]
    fn export_clause_and_default_exports() {
        let src = "function a() {}\nconst b = () => 1;\nexport { a, b };\nexport default function () { return 2; }\n";
        let s = analyze_source("src/x.js", src).unwrap();

        assert!(find(&s, "a").exported);
        assert!(find(&s, "b").exported);
        let d = find(&s, "default");
        assert!(d.exported);
        assert_eq!(d.start_line, 4);
    }

    #[test]
    fn unsupported_extension_is_unparseable() {
        assert!(matches!(
            analyze_source("README.md", "# hi"),
            Err(Error::Unparseable(_))
        ));
    }
}
