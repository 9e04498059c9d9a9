//! Persisted graph schema (§6), C7 Graph Writer, and C8 Cross-Source
//! Resolver.

pub mod cross_source;
pub mod db;
pub mod reader;
pub mod types;
pub mod vector;
pub mod writer;

pub use cross_source::{CrossSourceSummary, resolve_cross_source};
pub use types::{EdgeInput, FileInput, GraphWriteInput, NodeInput, PackageInput, UnresolvedInput, WriteSummary};
pub use writer::write;

#[cfg(test)]
mod tests {
    use super::*;
    use model::edge::EdgeKind;
    use model::node::NodeKind;
    use model::workspace::{PackageManager, WorkspaceKind};
    use parse::resolver::NodeRef;

    fn base_input(project_id: i64, source_id: i64) -> GraphWriteInput {
        GraphWriteInput {
            project_id,
            source_id,
            workspace_kind: WorkspaceKind::Standalone,
            package_manager: PackageManager::None,
            packages: vec![],
            files: vec![FileInput {
                file_path: "a.ts".to_string(),
                language: "typescript".to_string(),
                source: "function foo() {}\n".to_string(),
            }],
            nodes: vec![NodeInput {
                file_path: "a.ts".to_string(),
                name: "foo".to_string(),
                qualified_name: "foo".to_string(),
                kind: NodeKind::Function,
                language: "typescript".to_string(),
                signature: "function foo()".to_string(),
                start_line: 1,
                end_line: 1,
                source: "function foo() {}".to_string(),
                docstring: None,
                body_hash: "hash1".to_string(),
                embedding: None,
            }],
            edges: vec![EdgeInput {
                source: NodeRef::file("a.ts"),
                kind: EdgeKind::Contains,
                target: NodeRef::node("a.ts", "foo"),
                weight: 1.0,
                line: None,
            }],
            unresolved: vec![],
            crawled_files: vec!["a.ts".to_string()],
        }
    }

    #[test]
    fn writes_a_single_file_node_and_function() {
        let mut conn = db::open_in_memory().unwrap();
        conn.execute("INSERT INTO projects (id, name) VALUES (1, 'p')", []).unwrap();
        conn.execute("INSERT INTO sources (id, project_id, path, alias) VALUES (1, 1, '/repo', 'main')", [])
            .unwrap();

        let input = base_input(1, 1);
        let summary = write(&mut conn, &input).unwrap();

        assert_eq!(summary.nodes_written, 2); // file node + foo
        assert_eq!(summary.edges_written, 1);

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM nodes", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn rerun_on_unchanged_tree_is_idempotent() {
        let mut conn = db::open_in_memory().unwrap();
        conn.execute("INSERT INTO projects (id, name) VALUES (1, 'p')", []).unwrap();
        conn.execute("INSERT INTO sources (id, project_id, path, alias) VALUES (1, 1, '/repo', 'main')", [])
            .unwrap();

        let input = base_input(1, 1);
        write(&mut conn, &input).unwrap();
        let summary = write(&mut conn, &input).unwrap();

        assert_eq!(summary.nodes_written, 2);
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM nodes", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 2);
        let edge_count: i64 = conn.query_row("SELECT COUNT(*) FROM edges", [], |r| r.get(0)).unwrap();
        assert_eq!(edge_count, 1);
    }

    #[test]
    fn stale_cleanup_removes_deleted_files() {
        let mut conn = db::open_in_memory().unwrap();
        conn.execute("INSERT INTO projects (id, name) VALUES (1, 'p')", []).unwrap();
        conn.execute("INSERT INTO sources (id, project_id, path, alias) VALUES (1, 1, '/repo', 'main')", [])
            .unwrap();

        let mut input = base_input(1, 1);
        input.files.push(FileInput {
            file_path: "b.ts".to_string(),
            language: "typescript".to_string(),
            source: "function bar() {}\n".to_string(),
        });
        input.nodes.push(NodeInput {
            file_path: "b.ts".to_string(),
            name: "bar".to_string(),
            qualified_name: "bar".to_string(),
            kind: NodeKind::Function,
            language: "typescript".to_string(),
            signature: "function bar()".to_string(),
            start_line: 1,
            end_line: 1,
            source: "function bar() {}".to_string(),
            docstring: None,
            body_hash: "hash2".to_string(),
            embedding: None,
        });
        input.crawled_files.push("b.ts".to_string());
        write(&mut conn, &input).unwrap();

        // Second run: b.ts deleted from the crawl.
        let mut second = base_input(1, 1);
        second.crawled_files = vec!["a.ts".to_string()];
        let summary = write(&mut conn, &second).unwrap();
        assert_eq!(summary.nodes_deleted, 2); // b.ts file node + bar

        let remaining: Vec<String> = conn
            .prepare("SELECT qualified_name FROM nodes ORDER BY qualified_name")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();
        assert_eq!(remaining, vec!["a.ts".to_string(), "foo".to_string()]);
    }
}
