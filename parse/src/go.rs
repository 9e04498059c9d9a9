//! Go front end (§4.4): functions, methods (qualified `Receiver.Method` with
//! pointer receivers stripped), structs, interfaces, type aliases, and
//! `embeds` edges for struct embedding.

use tree_sitter::{Node, Parser};

use common::error::{ColonyError, Result};
use model::edge::EdgeKind;
use model::node::NodeKind;

use crate::builtins::{is_denylisted_method, is_go_builtin_type, is_go_stdlib};
use crate::types::{ParsedFile, ParsedNode, RawEdge, RawEndpoint, RawTarget};

pub fn parse(source: &[u8]) -> Result<ParsedFile> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_go::LANGUAGE.into())
        .map_err(|e| ColonyError::fatal_msg("parse: go", e))?;
    let tree = parser
        .parse(source, None)
        .ok_or_else(|| ColonyError::fatal_msg("parse: go", "tree-sitter returned no tree"))?;

    let mut ctx = Walker { source, nodes: Vec::new(), edges: Vec::new() };
    ctx.walk_top_level(tree.root_node());
    Ok(ParsedFile { nodes: ctx.nodes, edges: ctx.edges })
}

struct Walker<'a> {
    source: &'a [u8],
    nodes: Vec<ParsedNode>,
    edges: Vec<RawEdge>,
}

impl<'a> Walker<'a> {
    fn text(&self, node: Node) -> String {
        node.utf8_text(self.source).unwrap_or_default().to_string()
    }

    fn line_of(&self, byte: usize) -> u32 {
        self.source[..byte.min(self.source.len())].iter().filter(|&&b| b == b'\n').count() as u32 + 1
    }

    fn signature_line(&self, node: Node) -> String {
        let full = self.text(node);
        full.lines().next().unwrap_or(&full).trim_end_matches('{').trim().to_string()
    }

    /// A `//`-comment run immediately preceding the node, per Go's own
    /// doc-comment convention (no block-comment form considered, since
    /// idiomatic Go doc comments are always line comments).
    fn docstring_before(&self, node: Node) -> Option<String> {
        let mut lines = Vec::new();
        let mut sibling = node.prev_sibling();
        let mut expected_line = node.start_position().row;
        while let Some(s) = sibling {
            if s.kind() != "comment" {
                break;
            }
            if s.end_position().row + 1 != expected_line && !lines.is_empty() {
                break;
            }
            let text = self.text(s);
            let Some(stripped) = text.strip_prefix("//") else { break };
            lines.push(stripped.trim().to_string());
            expected_line = s.start_position().row;
            sibling = s.prev_sibling();
        }
        if lines.is_empty() {
            None
        } else {
            lines.reverse();
            Some(lines.join("\n"))
        }
    }

    fn walk_top_level(&mut self, root: Node<'a>) {
        let mut cursor = root.walk();
        for child in root.children(&mut cursor) {
            match child.kind() {
                "function_declaration" => self.visit_function(child),
                "method_declaration" => self.visit_method(child),
                "type_declaration" => self.visit_type_declaration(child),
                "import_declaration" => self.visit_import_declaration(child),
                _ => {}
            }
        }
    }

    fn visit_function(&mut self, node: Node<'a>) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        if node.child_by_field_name("body").is_none() {
            return;
        }
        let name = self.text(name_node);
        let docstring = self.docstring_before(node);
        self.nodes.push(ParsedNode::new(
            &name,
            &name,
            NodeKind::Function,
            "go",
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
            self.scan_for_calls(body, idx);
        }
    }

    fn visit_method(&mut self, node: Node<'a>) {
        let (Some(name_node), Some(receiver)) =
            (node.child_by_field_name("name"), node.child_by_field_name("receiver"))
        else {
            return;
        };
        if node.child_by_field_name("body").is_none() {
            return;
        }
        let receiver_type = receiver_type_name(&self.text(receiver));
        let name = self.text(name_node);
        let qualified_name = model::identity::qualify(Some(&receiver_type), &name);
        let docstring = self.docstring_before(node);
        self.nodes.push(ParsedNode::new(
            &name,
            &qualified_name,
            NodeKind::Method,
            "go",
            self.signature_line(node),
            self.line_of(node.start_byte()),
            self.line_of(node.end_byte()),
            &self.text(node),
            docstring,
        ));
        let idx = self.nodes.len() - 1;
        let owner_idx = self.nodes.iter().position(|n| n.name == receiver_type);
        if let Some(owner_idx) = owner_idx {
            self.edges.push(RawEdge::new(RawEndpoint::Node(owner_idx), EdgeKind::Contains, RawTarget::Node(idx), None));
        } else {
            self.edges.push(RawEdge::new(RawEndpoint::File, EdgeKind::Contains, RawTarget::Node(idx), None));
        }
        self.visit_uses_type(node, idx);
        if let Some(body) = node.child_by_field_name("body") {
            self.scan_for_calls(body, idx);
        }
    }

    fn visit_type_declaration(&mut self, node: Node<'a>) {
        let doc = self.docstring_before(node);
        let mut cursor = node.walk();
        for spec in node.children(&mut cursor) {
            if spec.kind() != "type_spec" {
                continue;
            }
            let Some(name_node) = spec.child_by_field_name("name") else {
                continue;
            };
            let Some(type_node) = spec.child_by_field_name("type") else {
                continue;
            };
            let name = self.text(name_node);
            match type_node.kind() {
                "struct_type" => self.visit_struct(&name, node, type_node, doc.clone()),
                "interface_type" => self.visit_interface(&name, node, type_node, doc.clone()),
                _ => self.visit_alias(&name, node, doc.clone()),
            }
        }
    }

    fn visit_struct(&mut self, name: &str, decl_node: Node<'a>, struct_type: Node<'a>, doc: Option<String>) {
        self.nodes.push(ParsedNode::new(
            name,
            name,
            NodeKind::Struct,
            "go",
            self.signature_line(decl_node),
            self.line_of(decl_node.start_byte()),
            self.line_of(decl_node.end_byte()),
            &self.text(decl_node),
            doc,
        ));
        let idx = self.nodes.len() - 1;
        self.edges.push(RawEdge::new(RawEndpoint::File, EdgeKind::Contains, RawTarget::Node(idx), None));

        let Some(field_list) = struct_type.child_by_field_name("body") else {
            return;
        };
        let mut cursor = field_list.walk();
        for field in field_list.children(&mut cursor) {
            if field.kind() != "field_declaration" {
                continue;
            }
            // Embedded fields carry no `name` field in the grammar; the
            // `type` child is itself the embedded type identifier.
            if field.child_by_field_name("name").is_none()
                && let Some(type_node) = field.child_by_field_name("type")
            {
                let embedded_name = base_identifier(&self.text(type_node));
                if !is_go_builtin_type(&embedded_name) {
                    let line = self.line_of(field.start_byte());
                    self.edges.push(RawEdge::new(
                        RawEndpoint::Node(idx),
                        EdgeKind::Embeds,
                        RawTarget::Named(embedded_name),
                        Some(line),
                    ));
                }
            }
        }
    }

    fn visit_interface(&mut self, name: &str, decl_node: Node<'a>, _interface_type: Node<'a>, doc: Option<String>) {
        self.nodes.push(ParsedNode::new(
            name,
            name,
            NodeKind::Interface,
            "go",
            self.signature_line(decl_node),
            self.line_of(decl_node.start_byte()),
            self.line_of(decl_node.end_byte()),
            &self.text(decl_node),
            doc,
        ));
        let idx = self.nodes.len() - 1;
        self.edges.push(RawEdge::new(RawEndpoint::File, EdgeKind::Contains, RawTarget::Node(idx), None));
    }

    fn visit_alias(&mut self, name: &str, decl_node: Node<'a>, doc: Option<String>) {
        self.nodes.push(ParsedNode::new(
            name,
            name,
            NodeKind::TypeAlias,
            "go",
            self.signature_line(decl_node),
            self.line_of(decl_node.start_byte()),
            self.line_of(decl_node.end_byte()),
            &self.text(decl_node),
            doc,
        ));
        let idx = self.nodes.len() - 1;
        self.edges.push(RawEdge::new(RawEndpoint::File, EdgeKind::Contains, RawTarget::Node(idx), None));
    }

    fn visit_uses_type(&mut self, node: Node<'a>, owner_idx: usize) {
        if let Some(result) = node.child_by_field_name("result") {
            self.collect_type_identifiers(result, owner_idx);
        }
        if let Some(params) = node.child_by_field_name("parameters") {
            let mut cursor = params.walk();
            for param in params.children(&mut cursor) {
                if let Some(type_node) = param.child_by_field_name("type") {
                    self.collect_type_identifiers(type_node, owner_idx);
                }
            }
        }
    }

    fn collect_type_identifiers(&mut self, node: Node<'a>, owner_idx: usize) {
        if node.kind() == "type_identifier" {
            let name = self.text(node);
            if !is_go_builtin_type(&name) {
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

    fn visit_import_declaration(&mut self, node: Node<'a>) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.visit_import_node(child);
        }
    }

    fn visit_import_node(&mut self, node: Node<'a>) {
        match node.kind() {
            "import_spec" => {
                let Some(path_node) = node.child_by_field_name("path") else {
                    return;
                };
                let specifier = strip_quotes(&self.text(path_node));
                if is_go_stdlib(&specifier) {
                    return;
                }
                let line = self.line_of(node.start_byte());
                self.edges.push(RawEdge::new(
                    RawEndpoint::File,
                    EdgeKind::Imports,
                    RawTarget::Named(specifier),
                    Some(line),
                ));
            }
            "import_spec_list" => {
                let mut cursor = node.walk();
                for child in node.children(&mut cursor) {
                    self.visit_import_node(child);
                }
            }
            _ => {}
        }
    }

    fn scan_for_calls(&mut self, node: Node<'a>, owner: usize) {
        if node.kind() == "call_expression"
            && let Some(function) = node.child_by_field_name("function")
        {
            let callee = match function.kind() {
                "identifier" => Some(self.text(function)),
                "selector_expression" => function
                    .child_by_field_name("field")
                    .map(|f| self.text(f)),
                _ => None,
            };
            if let Some(callee) = callee
                && !is_denylisted_method(&callee)
            {
                let line = self.line_of(node.start_byte());
                self.edges.push(RawEdge::new(
                    RawEndpoint::Node(owner),
                    EdgeKind::Calls,
                    RawTarget::Named(callee),
                    Some(line),
                ));
            }
        }
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.scan_for_calls(child, owner);
        }
    }
}

fn strip_quotes(s: &str) -> String {
    s.trim_matches('"').to_string()
}

fn base_identifier(s: &str) -> String {
    s.trim_start_matches('*').trim().to_string()
}

/// Extracts the receiver's type name from its raw text (e.g. `(s *Server)`
/// or `(s Server)`), stripping the pointer marker.
fn receiver_type_name(receiver_text: &str) -> String {
    let inner = receiver_text.trim_start_matches('(').trim_end_matches(')').trim();
    let ty = inner.split_whitespace().last().unwrap_or(inner);
    ty.trim_start_matches('*').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_function() {
        let src = b"package main\n\nfunc Add(a, b int) int {\n\treturn a + b\n}\n";
        let parsed = parse(src).unwrap();
        assert_eq!(parsed.nodes.len(), 1);
        assert_eq!(parsed.nodes[0].name, "Add");
        assert_eq!(parsed.nodes[0].kind, NodeKind::Function);
    }

    #[test]
    fn extracts_method_with_pointer_receiver() {
        let src = b"package main\n\ntype Server struct {\n\tPort int\n}\n\nfunc (s *Server) Start() error {\n\treturn nil\n}\n";
        let parsed = parse(src).unwrap();
        let method = parsed.nodes.iter().find(|n| n.qualified_name == "Server.Start").unwrap();
        assert_eq!(method.kind, NodeKind::Method);
    }

    #[test]
    fn extracts_struct_embedding() {
        let src = b"package main\n\ntype Base struct {\n\tID int\n}\n\ntype Derived struct {\n\tBase\n\tName string\n}\n";
        let parsed = parse(src).unwrap();
        let embeds = parsed.edges.iter().find(|e| e.kind == EdgeKind::Embeds).unwrap();
        assert_eq!(embeds.target, RawTarget::Named("Base".to_string()));
    }

    #[test]
    fn skips_stdlib_imports() {
        let src = b"package main\n\nimport (\n\t\"fmt\"\n\t\"github.com/test/util\"\n)\n\nfunc main() {}\n";
        let parsed = parse(src).unwrap();
        let imports: Vec<_> = parsed.edges.iter().filter(|e| e.kind == EdgeKind::Imports).collect();
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].target, RawTarget::Named("github.com/test/util".to_string()));
    }
}
