//! TypeScript/JavaScript front end (§4.4): functions, classes, methods,
//! interfaces, type aliases, enums, plus the six universal edge kinds.

use tree_sitter::{Language, Node, Parser, Tree};

use common::error::{ColonyError, Result};
use model::edge::EdgeKind;
use model::node::NodeKind;

use crate::builtins::{is_denylisted_method, is_node_builtin, is_ts_builtin_type};
use crate::types::{ParsedFile, ParsedNode, RawEdge, RawEndpoint, RawTarget};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsDialect {
    TypeScript,
    Tsx,
    JavaScript,
}

impl TsDialect {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "ts" => Some(TsDialect::TypeScript),
            "tsx" => Some(TsDialect::Tsx),
            "js" | "jsx" => Some(TsDialect::JavaScript),
            _ => None,
        }
    }

    fn language(self) -> Language {
        match self {
            TsDialect::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            TsDialect::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            TsDialect::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
        }
    }

    fn language_tag(self) -> &'static str {
        match self {
            TsDialect::TypeScript | TsDialect::Tsx => "typescript",
            TsDialect::JavaScript => "javascript",
        }
    }
}

pub fn parse(source: &[u8], dialect: TsDialect) -> Result<ParsedFile> {
    let mut parser = Parser::new();
    parser
        .set_language(&dialect.language())
        .map_err(|e| ColonyError::fatal_msg("parse: ts/js", e))?;
    let tree = parser
        .parse(source, None)
        .ok_or_else(|| ColonyError::fatal_msg("parse: ts/js", "tree-sitter returned no tree"))?;

    let mut ctx = Walker::new(source, dialect, &tree);
    ctx.walk_top_level(tree.root_node());
    Ok(ctx.finish())
}

struct Walker<'a> {
    source: &'a [u8],
    dialect: TsDialect,
    nodes: Vec<ParsedNode>,
    edges: Vec<RawEdge>,
    _tree: &'a Tree,
}

impl<'a> Walker<'a> {
    fn new(source: &'a [u8], dialect: TsDialect, tree: &'a Tree) -> Self {
        Self { source, dialect, nodes: Vec::new(), edges: Vec::new(), _tree: tree }
    }

    fn finish(self) -> ParsedFile {
        ParsedFile { nodes: self.nodes, edges: self.edges }
    }

    fn text(&self, node: Node) -> String {
        node.utf8_text(self.source).unwrap_or_default().to_string()
    }

    fn line_of(&self, byte: usize) -> u32 {
        self.source[..byte.min(self.source.len())].iter().filter(|&&b| b == b'\n').count() as u32 + 1
    }

    fn docstring_before(&self, node: Node) -> Option<String> {
        // §4.4: accept a `/** */` block immediately preceding, or a run of
        // consecutive single-line `//` comments each on the line directly
        // above the next.
        let mut sibling = node.prev_sibling();
        let mut lines: Vec<String> = Vec::new();
        let mut expected_line = node.start_position().row;

        while let Some(s) = sibling {
            if s.kind() != "comment" {
                break;
            }
            if s.end_position().row + 1 != expected_line && !lines.is_empty() {
                break;
            }
            let text = self.text(s);
            if let Some(block) = text.strip_prefix("/**") {
                let block = block.strip_suffix("*/").unwrap_or(block);
                let cleaned: Vec<String> = block
                    .lines()
                    .map(|l| l.trim().trim_start_matches('*').trim().to_string())
                    .filter(|l| !l.is_empty())
                    .collect();
                return Some(cleaned.join("\n"));
            } else if let Some(line) = text.strip_prefix("//") {
                lines.push(line.trim().to_string());
                expected_line = s.start_position().row;
                sibling = s.prev_sibling();
                continue;
            } else {
                break;
            }
            #[allow(unreachable_code)]
            {
                sibling = s.prev_sibling();
            }
        }

        if lines.is_empty() {
            None
        } else {
            lines.reverse();
            Some(lines.join("\n"))
        }
    }

    /// Unwraps `export`/`export default` to the inner declaration, back-
    /// propagating the doc-comment attached to the export if the inner node
    /// has none of its own (§4.4).
    fn unwrap_export<'b>(&self, node: Node<'b>) -> (Node<'b>, Option<String>) {
        if node.kind() == "export_statement" {
            let export_doc = self.docstring_before(node);
            if let Some(decl) = node.child_by_field_name("declaration") {
                return (decl, export_doc);
            }
            // `export default <expr>` with no named declaration field: fall
            // through to the last named child, if any.
            let mut cursor = node.walk();
            if let Some(child) = node
                .children(&mut cursor)
                .find(|c| c.is_named() && c.kind() != "string")
            {
                return (child, export_doc);
            }
        }
        (node, None)
    }

    fn walk_top_level(&mut self, root: Node<'a>) {
        let mut cursor = root.walk();
        for child in root.children(&mut cursor) {
            self.visit_top_level_item(child, None);
        }
    }

    fn visit_top_level_item(&mut self, node: Node<'a>, _scope: Option<&str>) {
        let (decl, export_doc) = self.unwrap_export(node);
        match decl.kind() {
            "function_declaration" | "generator_function_declaration" => {
                self.visit_function(decl, None, export_doc);
            }
            "class_declaration" | "abstract_class_declaration" => {
                self.visit_class(decl, export_doc);
            }
            "interface_declaration" => self.visit_interface(decl, export_doc),
            "type_alias_declaration" => self.visit_type_alias(decl, export_doc),
            "enum_declaration" => self.visit_enum(decl, export_doc),
            "lexical_declaration" | "variable_declaration" => {
                self.visit_variable_declaration(decl, export_doc);
            }
            _ => {
                // Still walk into it for nested call expressions attributed
                // to the enclosing (anonymous/module) scope, imports, etc.
                self.scan_for_imports_and_calls(decl, None);
            }
        }
    }

    fn signature_line(&self, node: Node) -> String {
        let full = self.text(node);
        full.lines().next().unwrap_or(&full).trim_end_matches('{').trim().to_string()
    }

    fn visit_function(&mut self, node: Node<'a>, scope: Option<&str>, doc_override: Option<String>) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        // Overload signatures without bodies are dropped (§4.4).
        if node.child_by_field_name("body").is_none() {
            return;
        }
        let name = self.text(name_node);
        let qualified_name = model::identity::qualify(scope, &name);
        let docstring = doc_override.or_else(|| self.docstring_before(node));

        self.nodes.push(ParsedNode::new(
            &name,
            &qualified_name,
            NodeKind::Function,
            self.dialect.language_tag(),
            self.signature_line(node),
            self.line_of(node.start_byte()),
            self.line_of(node.end_byte()),
            &self.text(node),
            docstring,
        ));
        let idx = self.nodes.len() - 1;
        self.edges.push(RawEdge::new(RawEndpoint::File, EdgeKind::Contains, RawTarget::Node(idx), None));

        self.visit_uses_type(node, idx);
        if let Some(body) = node.child_by_field_name("body") {
            self.scan_for_imports_and_calls(body, Some(idx));
        }
    }

    fn visit_variable_declaration(&mut self, node: Node<'a>, doc_override: Option<String>) {
        let mut cursor = node.walk();
        for declarator in node.children(&mut cursor) {
            if declarator.kind() != "variable_declarator" {
                continue;
            }
            let Some(name_node) = declarator.child_by_field_name("name") else {
                continue;
            };
            let Some(value) = declarator.child_by_field_name("value") else {
                continue;
            };
            if !matches!(value.kind(), "arrow_function" | "function" | "generator_function") {
                continue;
            }
            let name = self.text(name_node);
            let docstring = doc_override
                .clone()
                .or_else(|| self.docstring_before(node));
            self.nodes.push(ParsedNode::new(
                &name,
                &name,
                NodeKind::Function,
                self.dialect.language_tag(),
                self.signature_line(declarator),
                self.line_of(node.start_byte()),
                self.line_of(node.end_byte()),
                &self.text(node),
                docstring,
            ));
            let idx = self.nodes.len() - 1;
            self.edges.push(RawEdge::new(RawEndpoint::File, EdgeKind::Contains, RawTarget::Node(idx), None));
            self.visit_uses_type(value, idx);
            if let Some(body) = value.child_by_field_name("body") {
                self.scan_for_imports_and_calls(body, Some(idx));
            }
        }
    }

    fn visit_class(&mut self, node: Node<'a>, doc_override: Option<String>) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let class_name = self.text(name_node);
        let docstring = doc_override.or_else(|| self.docstring_before(node));

        self.nodes.push(ParsedNode::new(
            &class_name,
            &class_name,
            NodeKind::Class,
            self.dialect.language_tag(),
            self.signature_line(node),
            self.line_of(node.start_byte()),
            self.line_of(node.end_byte()),
            &self.text(node),
            docstring,
        ));
        let class_idx = self.nodes.len() - 1;
        self.edges.push(RawEdge::new(RawEndpoint::File, EdgeKind::Contains, RawTarget::Node(class_idx), None));

        if let Some(heritage) = node.child_by_field_name("heritage") {
            self.visit_class_heritage(heritage, class_idx);
        }

        let Some(body) = node.child_by_field_name("body") else {
            return;
        };
        let mut cursor = body.walk();
        for member in body.children(&mut cursor) {
            if member.kind() != "method_definition" {
                continue;
            }
            self.visit_method(member, &class_name);
        }
    }

    fn visit_class_heritage(&mut self, heritage: Node<'a>, class_idx: usize) {
        let mut cursor = heritage.walk();
        for clause in heritage.children(&mut cursor) {
            match clause.kind() {
                "extends_clause" => {
                    let mut cc = clause.walk();
                    for value in clause.children(&mut cc) {
                        if value.kind() == "identifier" || value.kind() == "member_expression" {
                            let name = self.text(value);
                            let line = self.line_of(value.start_byte());
                            self.edges.push(
                                RawEdge::new(
                                    RawEndpoint::Node(class_idx),
                                    EdgeKind::Extends,
                                    RawTarget::Named(name),
                                    Some(line),
                                ),
                            );
                        }
                    }
                }
                "implements_clause" => {
                    let mut cc = clause.walk();
                    for value in clause.children(&mut cc) {
                        if value.kind() == "type_identifier" || value.kind() == "generic_type" {
                            let name = base_type_name(&self.text(value));
                            let line = self.line_of(value.start_byte());
                            self.edges.push(
                                RawEdge::new(
                                    RawEndpoint::Node(class_idx),
                                    EdgeKind::Implements,
                                    RawTarget::Named(name),
                                    Some(line),
                                ),
                            );
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn visit_method(&mut self, node: Node<'a>, class_name: &str) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        if node.child_by_field_name("body").is_none() {
            return; // overload signature without a body
        }
        let name = self.text(name_node);
        let qualified_name = model::identity::qualify(Some(class_name), &name);
        let docstring = self.docstring_before(node);

        self.nodes.push(ParsedNode::new(
            &name,
            &qualified_name,
            NodeKind::Method,
            self.dialect.language_tag(),
            self.signature_line(node),
            self.line_of(node.start_byte()),
            self.line_of(node.end_byte()),
            &self.text(node),
            docstring,
        ));
        let idx = self.nodes.len() - 1;
        let class_idx = self.nodes.iter().position(|n| n.qualified_name == class_name);
        if let Some(class_idx) = class_idx {
            self.edges.push(RawEdge::new(
                RawEndpoint::Node(class_idx),
                EdgeKind::Contains,
                RawTarget::Node(idx),
                None,
            ));
        } else {
            self.edges.push(RawEdge::new(RawEndpoint::File, EdgeKind::Contains, RawTarget::Node(idx), None));
        }

        self.visit_uses_type(node, idx);
        if let Some(body) = node.child_by_field_name("body") {
            self.scan_for_imports_and_calls(body, Some(idx));
        }
    }

    fn visit_interface(&mut self, node: Node<'a>, doc_override: Option<String>) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node);
        let docstring = doc_override.or_else(|| self.docstring_before(node));
        self.nodes.push(ParsedNode::new(
            &name,
            &name,
            NodeKind::Interface,
            self.dialect.language_tag(),
            self.signature_line(node),
            self.line_of(node.start_byte()),
            self.line_of(node.end_byte()),
            &self.text(node),
            docstring,
        ));
        let idx = self.nodes.len() - 1;
        self.edges.push(RawEdge::new(RawEndpoint::File, EdgeKind::Contains, RawTarget::Node(idx), None));
    }

    fn visit_type_alias(&mut self, node: Node<'a>, doc_override: Option<String>) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node);
        let docstring = doc_override.or_else(|| self.docstring_before(node));
        self.nodes.push(ParsedNode::new(
            &name,
            &name,
            NodeKind::TypeAlias,
            self.dialect.language_tag(),
            self.signature_line(node),
            self.line_of(node.start_byte()),
            self.line_of(node.end_byte()),
            &self.text(node),
            docstring,
        ));
        let idx = self.nodes.len() - 1;
        self.edges.push(RawEdge::new(RawEndpoint::File, EdgeKind::Contains, RawTarget::Node(idx), None));
    }

    fn visit_enum(&mut self, node: Node<'a>, doc_override: Option<String>) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node);
        let docstring = doc_override.or_else(|| self.docstring_before(node));
        self.nodes.push(ParsedNode::new(
            &name,
            &name,
            NodeKind::Enum,
            self.dialect.language_tag(),
            self.signature_line(node),
            self.line_of(node.start_byte()),
            self.line_of(node.end_byte()),
            &self.text(node),
            docstring,
        ));
        let idx = self.nodes.len() - 1;
        self.edges.push(RawEdge::new(RawEndpoint::File, EdgeKind::Contains, RawTarget::Node(idx), None));
    }

    /// `uses_type` (§4.4): referenced type identifiers in parameter and
    /// return-type annotations, excluding built-ins.
    fn visit_uses_type(&mut self, node: Node<'a>, owner_idx: usize) {
        if let Some(return_type) = node.child_by_field_name("return_type") {
            self.collect_type_identifiers(return_type, owner_idx);
        }
        if let Some(params) = node.child_by_field_name("parameters") {
            let mut cursor = params.walk();
            for param in params.children(&mut cursor) {
                if let Some(annotation) = param.child_by_field_name("type") {
                    self.collect_type_identifiers(annotation, owner_idx);
                }
            }
        }
    }

    fn collect_type_identifiers(&mut self, node: Node<'a>, owner_idx: usize) {
        if node.kind() == "type_identifier" {
            let name = self.text(node);
            if !is_ts_builtin_type(&name) {
                let line = self.line_of(node.start_byte());
                self.edges.push(RawEdge::new(
                    RawEndpoint::Node(owner_idx),
                    EdgeKind::UsesType,
                    RawTarget::Named(name),
                    Some(line),
                ));
            }
            return;
        }
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.collect_type_identifiers(child, owner_idx);
        }
    }

    /// Recursively scans a subtree for `import`/`call` expressions,
    /// attributing calls to the nearest enclosing named function (`owner`)
    /// per §4.4 ("nested arrow/function literals attributed to the
    /// enclosing named function").
    fn scan_for_imports_and_calls(&mut self, node: Node<'a>, owner: Option<usize>) {
        match node.kind() {
            "import_statement" => {
                self.visit_import(node);
                return;
            }
            "call_expression" => {
                self.visit_call(node, owner);
            }
            _ => {}
        }
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            // Nested named function/class declarations are handled by their
            // own visit_* pass when encountered at statement position;
            // inline arrow/function expressions keep the same owner.
            self.scan_for_imports_and_calls(child, owner);
        }
    }

    fn visit_import(&mut self, node: Node<'a>) {
        let Some(source_node) = node.child_by_field_name("source") else {
            return;
        };
        let specifier = strip_quotes(&self.text(source_node));
        if is_node_builtin(&specifier) {
            return;
        }
        let mut symbols = Vec::new();
        if let Some(clause) = node.child(1).filter(|c| c.kind() == "import_clause") {
            collect_import_symbols(clause, self.source, &mut symbols);
        }
        let line = self.line_of(node.start_byte());
        self.edges.push(
            RawEdge::new(RawEndpoint::File, EdgeKind::Imports, RawTarget::Named(specifier), Some(line))
                .with_symbols(symbols),
        );
    }

    fn visit_call(&mut self, node: Node<'a>, owner: Option<usize>) {
        let Some(owner) = owner else { return };
        let Some(function) = node.child_by_field_name("function") else {
            return;
        };
        let (callee, is_member_denylisted) = match function.kind() {
            "identifier" => (self.text(function), false),
            "member_expression" => {
                let Some(prop) = function.child_by_field_name("property") else {
                    return;
                };
                let method_name = self.text(prop);
                let denied = is_denylisted_method(&method_name);
                (method_name, denied)
            }
            _ => return,
        };
        if is_member_denylisted {
            return;
        }
        if is_node_builtin(&callee) {
            return;
        }
        let line = self.line_of(node.start_byte());
        self.edges.push(RawEdge::new(
            RawEndpoint::Node(owner),
            EdgeKind::Calls,
            RawTarget::Named(callee),
            Some(line),
        ));
    }
}

fn strip_quotes(s: &str) -> String {
    s.trim_matches(|c| c == '"' || c == '\'' || c == '`').to_string()
}

fn base_type_name(s: &str) -> String {
    s.split('<').next().unwrap_or(s).trim().to_string()
}

fn collect_import_symbols(clause: Node, source: &[u8], out: &mut Vec<String>) {
    let mut cursor = clause.walk();
    for child in clause.children(&mut cursor) {
        match child.kind() {
            "identifier" => {
                out.push(child.utf8_text(source).unwrap_or_default().to_string());
            }
            "named_imports" => {
                let mut nc = child.walk();
                for spec in child.children(&mut nc) {
                    if spec.kind() == "import_specifier"
                        && let Some(name) = spec.child_by_field_name("name")
                    {
                        out.push(name.utf8_text(source).unwrap_or_default().to_string());
                    }
                }
            }
            "namespace_import" => {
                out.push("*".to_string());
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_function_and_contains_edge() {
        let src = b"export function foo(): number {\n  return 1;\n}\n";
        let parsed = parse(src, TsDialect::TypeScript).unwrap();
        assert_eq!(parsed.nodes.len(), 1);
        assert_eq!(parsed.nodes[0].name, "foo");
        assert_eq!(parsed.nodes[0].kind, NodeKind::Function);
        assert!(parsed.edges.iter().any(|e| e.kind == EdgeKind::Contains));
    }

    #[test]
    fn extracts_class_with_methods() {
        let src = b"class Foo {\n  bar(): void {\n    this.baz();\n  }\n}\n";
        let parsed = parse(src, TsDialect::TypeScript).unwrap();
        let class = parsed.nodes.iter().find(|n| n.name == "Foo").unwrap();
        assert_eq!(class.kind, NodeKind::Class);
        let method = parsed.nodes.iter().find(|n| n.qualified_name == "Foo.bar").unwrap();
        assert_eq!(method.kind, NodeKind::Method);
    }

    #[test]
    fn drops_overload_signatures_without_body() {
        let src = b"function foo(x: number): number;\nfunction foo(x: string): string;\nfunction foo(x: any): any {\n  return x;\n}\n";
        let parsed = parse(src, TsDialect::TypeScript).unwrap();
        assert_eq!(parsed.nodes.len(), 1);
    }

    #[test]
    fn extracts_import_with_symbols() {
        let src = b"import { formatDate } from '@test/utils';\n";
        let parsed = parse(src, TsDialect::TypeScript).unwrap();
        let import = parsed.edges.iter().find(|e| e.kind == EdgeKind::Imports).unwrap();
        assert_eq!(import.target, RawTarget::Named("@test/utils".to_string()));
        assert_eq!(import.symbols, vec!["formatDate".to_string()]);
    }

    #[test]
    fn skips_node_builtin_imports() {
        let src = b"import fs from 'fs';\nimport { randomUUID } from 'node:crypto';\nimport { formatDate } from '@test/utils';\n";
        let parsed = parse(src, TsDialect::TypeScript).unwrap();
        let imports: Vec<_> = parsed.edges.iter().filter(|e| e.kind == EdgeKind::Imports).collect();
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].target, RawTarget::Named("@test/utils".to_string()));
    }

    #[test]
    fn docstring_picks_up_block_comment() {
        let src = b"/** Formats a date. */\nexport function formatDate(): string {\n  return '';\n}\n";
        let parsed = parse(src, TsDialect::TypeScript).unwrap();
        assert_eq!(parsed.nodes[0].docstring.as_deref(), Some("Formats a date."));
    }
}
