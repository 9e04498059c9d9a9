//! Deterministic node identity (§3): `package-or-workspace-prefix /
//! file_path :: qualified_name`. Every writer derives a node's identity
//! through this function so reindexing an unchanged tree is a no-op upsert
//! rather than a fresh insert.

/// Builds the identity string for a node. `prefix` is the owning package's
/// relative path when one was resolved (§4.7 step 3's longest-prefix match),
/// or the workspace's own root marker (`"."`) when the node belongs to no
/// package.
pub fn node_identity(prefix: &str, file_path: &str, qualified_name: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() || prefix == "." {
        format!("{file_path}::{qualified_name}")
    } else {
        format!("{prefix}/{file_path}::{qualified_name}")
    }
}

/// Builds a node's qualified name from its enclosing scope (e.g. a class)
/// and its local name, matching the `Class.method` / `Receiver.Method`
/// convention of §4.4.
pub fn qualify(scope: Option<&str>, local_name: &str) -> String {
    match scope {
        Some(scope) if !scope.is_empty() => format!("{scope}.{local_name}"),
        _ => local_name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_without_package_prefix() {
        assert_eq!(node_identity(".", "src/a.ts", "foo"), "src/a.ts::foo");
        assert_eq!(node_identity("", "src/a.ts", "foo"), "src/a.ts::foo");
    }

    #[test]
    fn identity_with_package_prefix() {
        assert_eq!(
            node_identity("packages/utils", "src/index.ts", "formatDate"),
            "packages/utils/src/index.ts::formatDate"
        );
    }

    #[test]
    fn qualify_method_scope() {
        assert_eq!(qualify(Some("Foo"), "bar"), "Foo.bar");
        assert_eq!(qualify(None, "bar"), "bar");
    }
}
