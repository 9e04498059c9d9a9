//! C4 language parsers and C5 import/call resolution.

pub mod builtins;
pub mod go;
pub mod resolver;
pub mod ts_js;
pub mod types;

pub use types::{ParsedFile, ParsedNode, RawEdge, RawEndpoint, RawTarget};

use common::error::Result;
use ts_js::TsDialect;

/// Registry keyed by file extension (§4.4): dispatches a file's bytes to the
/// language front end that owns its extension, or `None` when no parser
/// claims it (the caller falls back to treating the file as opaque).
pub fn parse_file(extension: &str, source: &[u8]) -> Option<Result<ParsedFile>> {
    if let Some(dialect) = TsDialect::from_extension(extension) {
        return Some(ts_js::parse(source, dialect));
    }
    if extension == "go" {
        return Some(go::parse(source));
    }
    None
}

/// Extensions claimed by a registered language parser.
pub fn supported_extensions() -> &'static [&'static str] {
    &["ts", "tsx", "js", "jsx", "go"]
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::node::NodeKind;

    #[test]
    fn dispatches_typescript() {
        let result = parse_file("ts", b"function foo() {}\n").unwrap().unwrap();
        assert_eq!(result.nodes[0].kind, NodeKind::Function);
    }

    #[test]
    fn dispatches_go() {
        let result = parse_file("go", b"package main\n\nfunc main() {}\n").unwrap().unwrap();
        assert_eq!(result.nodes[0].kind, NodeKind::Function);
    }

    #[test]
    fn unsupported_extension_returns_none() {
        assert!(parse_file("rs", b"fn main() {}").is_none());
    }
}
