//! C5 Import Resolver (§4.5): binds C4's raw symbolic references to actual
//! nodes, aggregates `depends_on` by package-prefix pairing, and falls back
//! to unresolved references for anything that stays unbound.

use std::collections::{HashMap, HashSet};

use model::edge::EdgeKind;

use crate::types::{ParsedFile, RawEndpoint, RawTarget};

/// A node reference usable before node ids exist, resolved against at graph-
/// write time. An empty `qualified_name` denotes the file-scoped pseudo-node
/// (I3's forest root) rather than one of the file's extracted symbols.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeRef {
    pub file_path: String,
    pub qualified_name: String,
}

impl NodeRef {
    pub fn file(file_path: impl Into<String>) -> Self {
        Self { file_path: file_path.into(), qualified_name: String::new() }
    }

    pub fn node(file_path: impl Into<String>, qualified_name: impl Into<String>) -> Self {
        Self { file_path: file_path.into(), qualified_name: qualified_name.into() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEdge {
    pub source: NodeRef,
    pub kind: EdgeKind,
    pub target: NodeRef,
    pub line: Option<u32>,
}

/// An import/call/type reference C5 could not bind to a node. Carries the
/// raw specifier so a later cross-source pass (C8, imports only) or a human
/// can still make sense of it.
#[derive(Debug, Clone, PartialEq)]
pub struct UnresolvedEdge {
    pub source: NodeRef,
    pub kind: EdgeKind,
    pub specifier: String,
    pub line: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedOutput {
    pub resolved: Vec<ResolvedEdge>,
    pub unresolved: Vec<UnresolvedEdge>,
}

/// One package discovered by C2, as much as C5 needs of it.
#[derive(Debug, Clone)]
pub struct PackageEntry {
    pub name: String,
    /// Relative path from the source root.
    pub root: String,
    /// Relative path to the package's resolved entry-point file, if any.
    pub entry_point: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FileRecord {
    pub file_path: String,
    pub parsed: ParsedFile,
}

pub struct ResolverInput<'a> {
    pub files: &'a [FileRecord],
    /// Package/module name -> relative root path (§4.5 tiers 2, 3, 6).
    pub alias_map: &'a HashMap<String, String>,
    pub packages: &'a [PackageEntry],
    /// `tsconfig.json` paths, source-relative, wildcard entries keep `/*`.
    pub tsconfig_paths: &'a HashMap<String, Vec<String>>,
    /// Every relative file path known to this source (§4.3's crawl output),
    /// used for extension probing and Go package-membership checks.
    pub file_set: &'a HashSet<String>,
}

const TS_JS_EXTS: [&str; 4] = ["ts", "tsx", "js", "jsx"];
const PACKAGE_PREFIX_DIRS: [&str; 7] =
    ["packages", "apps", "libs", "services", "internal", "cmd", "pkg"];

pub fn resolve(input: &ResolverInput) -> ResolvedOutput {
    let mut output = ResolvedOutput::default();

    // Global simple-name index for tier-3 call resolution and the
    // extends/implements/uses_type/embeds workspace-wide fallback.
    let mut global_by_name: HashMap<&str, Vec<(usize, &str)>> = HashMap::new();
    for (file_idx, file) in input.files.iter().enumerate() {
        for node in &file.parsed.nodes {
            global_by_name.entry(node.name.as_str()).or_default().push((file_idx, node.qualified_name.as_str()));
        }
    }

    for file in input.files {
        resolve_file(file, input, &global_by_name, &mut output);
    }

    output
}

fn resolve_file(
    file: &FileRecord,
    input: &ResolverInput,
    global_by_name: &HashMap<&str, Vec<(usize, &str)>>,
    output: &mut ResolvedOutput,
) {
    let language = language_of(&file.file_path);

    // Local name -> qualified name, first declaration wins, for same-file
    // lookups (call tier a, extends/implements/uses_type/embeds same-file).
    let mut local_by_name: HashMap<&str, &str> = HashMap::new();
    for node in &file.parsed.nodes {
        local_by_name.entry(node.name.as_str()).or_insert(node.qualified_name.as_str());
    }

    // Imported-symbol -> resolved target file, built as imports are resolved,
    // consulted by call tier (b).
    let mut imported_symbol_files: HashMap<&str, String> = HashMap::new();

    // Imports first: calls in the same pass may depend on them.
    for raw in &file.parsed.edges {
        if raw.kind != EdgeKind::Imports {
            continue;
        }
        let RawTarget::Named(specifier) = &raw.target else { continue };
        let source_ref = endpoint_ref(&file.file_path, raw.source, file);

        match resolve_import(specifier, &file.file_path, language, input) {
            Some(target_file) => {
                let target_ref = NodeRef::file(target_file.clone());
                output.resolved.push(ResolvedEdge {
                    source: source_ref.clone(),
                    kind: EdgeKind::Imports,
                    target: target_ref.clone(),
                    line: raw.line,
                });
                for symbol in &raw.symbols {
                    imported_symbol_files.insert(symbol.as_str(), target_file.clone());
                }
                if let (Some(source_prefix), Some(target_prefix)) =
                    (package_prefix(&file.file_path), package_prefix(&target_file))
                    && source_prefix != target_prefix
                {
                    output.resolved.push(ResolvedEdge {
                        source: source_ref,
                        kind: EdgeKind::DependsOn,
                        target: target_ref,
                        line: None,
                    });
                }
            }
            None => output.unresolved.push(UnresolvedEdge {
                source: source_ref,
                kind: EdgeKind::Imports,
                specifier: specifier.clone(),
                line: raw.line,
            }),
        }
    }

    for raw in &file.parsed.edges {
        let source_ref = endpoint_ref(&file.file_path, raw.source, file);
        match raw.kind {
            EdgeKind::Contains => {
                let RawTarget::Node(idx) = &raw.target else { continue };
                let Some(target_node) = file.parsed.nodes.get(*idx) else { continue };
                output.resolved.push(ResolvedEdge {
                    source: source_ref,
                    kind: EdgeKind::Contains,
                    target: NodeRef::node(&file.file_path, &target_node.qualified_name),
                    line: raw.line,
                });
            }
            EdgeKind::Calls => {
                let RawTarget::Named(callee) = &raw.target else { continue };
                resolve_call(
                    callee,
                    raw.line,
                    source_ref,
                    file,
                    &local_by_name,
                    &imported_symbol_files,
                    global_by_name,
                    input,
                    output,
                );
            }
            EdgeKind::Extends | EdgeKind::Implements | EdgeKind::UsesType | EdgeKind::Embeds => {
                let RawTarget::Named(name) = &raw.target else { continue };
                resolve_structural(raw.kind, name, raw.line, source_ref, &local_by_name, global_by_name, input.files, output);
            }
            EdgeKind::Imports | EdgeKind::DependsOn => {} // handled above
        }
    }
}

fn endpoint_ref(file_path: &str, endpoint: RawEndpoint, file: &FileRecord) -> NodeRef {
    match endpoint {
        RawEndpoint::File => NodeRef::file(file_path),
        RawEndpoint::Node(idx) => {
            let qualified = file.parsed.nodes.get(idx).map(|n| n.qualified_name.as_str()).unwrap_or("");
            NodeRef::node(file_path, qualified)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn resolve_call<'a>(
    callee: &str,
    line: Option<u32>,
    source_ref: NodeRef,
    file: &FileRecord,
    local_by_name: &HashMap<&str, &str>,
    imported_symbol_files: &HashMap<&str, String>,
    global_by_name: &HashMap<&str, Vec<(usize, &'a str)>>,
    input: &ResolverInput,
    output: &mut ResolvedOutput,
) {
    // Tier (a): same file.
    if let Some(qualified) = local_by_name.get(callee) {
        output.resolved.push(ResolvedEdge {
            source: source_ref,
            kind: EdgeKind::Calls,
            target: NodeRef::node(&file.file_path, *qualified),
            line,
        });
        return;
    }

    // Tier (b): imported into this file, mapped back to the imported file.
    if let Some(target_file) = imported_symbol_files.get(callee) {
        let target_file_nodes = input.files.iter().find(|f| &f.file_path == target_file);
        if let Some(target_file) = target_file_nodes
            && let Some(node) = target_file.parsed.nodes.iter().find(|n| n.name == callee)
        {
            output.resolved.push(ResolvedEdge {
                source: source_ref,
                kind: EdgeKind::Calls,
                target: NodeRef::node(&target_file.file_path, &node.qualified_name),
                line,
            });
            return;
        }
    }

    // Tier (c): unambiguous global match by simple name.
    if let Some(candidates) = global_by_name.get(callee)
        && candidates.len() == 1
    {
        let (idx, qualified) = candidates[0];
        let target_file = &input.files[idx].file_path;
        output.resolved.push(ResolvedEdge {
            source: source_ref,
            kind: EdgeKind::Calls,
            target: NodeRef::node(target_file.clone(), qualified.to_string()),
            line,
        });
        return;
    }

    output.unresolved.push(UnresolvedEdge {
        source: source_ref,
        kind: EdgeKind::Calls,
        specifier: callee.to_string(),
        line,
    });
}

fn resolve_structural<'a>(
    kind: EdgeKind,
    name: &str,
    line: Option<u32>,
    source_ref: NodeRef,
    local_by_name: &HashMap<&str, &str>,
    global_by_name: &HashMap<&str, Vec<(usize, &'a str)>>,
    files: &[FileRecord],
    output: &mut ResolvedOutput,
) {
    if let Some(qualified) = local_by_name.get(name) {
        let file_path = source_ref.file_path.clone();
        output.resolved.push(ResolvedEdge { source: source_ref, kind, target: NodeRef::node(file_path, *qualified), line });
        return;
    }

    if let Some(candidates) = global_by_name.get(name)
        && candidates.len() == 1
    {
        let (idx, qualified) = candidates[0];
        output.resolved.push(ResolvedEdge {
            source: source_ref,
            kind,
            target: NodeRef::node(files[idx].file_path.clone(), qualified.to_string()),
            line,
        });
        return;
    }

    output.unresolved.push(UnresolvedEdge { source: source_ref, kind, specifier: name.to_string(), line });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lang {
    TsJs,
    Go,
}

fn language_of(file_path: &str) -> Lang {
    match file_path.rsplit('.').next() {
        Some("go") => Lang::Go,
        _ => Lang::TsJs,
    }
}

fn resolve_import(specifier: &str, importing_file: &str, language: Lang, input: &ResolverInput) -> Option<String> {
    match language {
        Lang::TsJs => resolve_ts_js_import(specifier, importing_file, input),
        Lang::Go => resolve_go_import(specifier, input),
    }
}

fn resolve_ts_js_import(specifier: &str, importing_file: &str, input: &ResolverInput) -> Option<String> {
    // Tier 1: built-in skip (also filtered earlier, at parse time in
    // `ts_js.rs::visit_import`, so this never actually sees a builtin
    // specifier in practice; kept for symmetry with `resolve_go_import`'s
    // own `is_go_stdlib` guard below).
    if crate::builtins::is_node_builtin(specifier) {
        return None;
    }

    // Tier 5: relative.
    if specifier.starts_with('.') {
        let dir = parent_dir(importing_file);
        let joined = join_and_clean(dir, specifier);
        return probe_extensions(&joined, input.file_set);
    }

    // Tier 2: alias map exact.
    if let Some(package) = input.packages.iter().find(|p| p.name == specifier)
        && let Some(entry) = &package.entry_point
    {
        let candidate = join_and_clean(&package.root, entry);
        if input.file_set.contains(&candidate) {
            return Some(candidate);
        }
    }

    // Tier 3: alias map subpath (`alias/rest`).
    let mut best: Option<(&str, &str)> = None; // (alias_key, root)
    for (alias, root) in input.alias_map {
        if let Some(rest) = specifier.strip_prefix(alias.as_str())
            && rest.starts_with('/')
            && best.map(|(k, _)| k.len() < alias.len()).unwrap_or(true)
        {
            best = Some((alias, root));
        }
    }
    if let Some((alias, root)) = best {
        let rest = specifier[alias.len()..].trim_start_matches('/');
        let package_root = strip_src_lib_dist_suffix(root);
        if let Some(hit) = probe_extensions(&join_and_clean(&package_root, rest), input.file_set) {
            return Some(hit);
        }
        let via_src = format!("{package_root}/src");
        if let Some(hit) = probe_extensions(&join_and_clean(&via_src, rest), input.file_set) {
            return Some(hit);
        }
    }

    // Tier 4: tsconfig paths.
    for (pattern, targets) in input.tsconfig_paths {
        if let Some(prefix) = pattern.strip_suffix("/*") {
            if let Some(rest) = specifier.strip_prefix(prefix).and_then(|r| r.strip_prefix('/')) {
                for target in targets {
                    let Some(target_prefix) = target.strip_suffix("/*") else { continue };
                    if let Some(hit) = probe_extensions(&join_and_clean(target_prefix, rest), input.file_set) {
                        return Some(hit);
                    }
                }
            }
        } else if pattern == specifier {
            for target in targets {
                if let Some(hit) = probe_extensions(target, input.file_set) {
                    return Some(hit);
                }
            }
        }
    }

    None
}

fn resolve_go_import(specifier: &str, input: &ResolverInput) -> Option<String> {
    if crate::builtins::is_go_stdlib(specifier) {
        return None;
    }
    let mut best: Option<&str> = None;
    for alias in input.alias_map.keys() {
        if specifier == alias.as_str() || specifier.starts_with(&format!("{alias}/")) {
            if best.map(|b| b.len() < alias.len()).unwrap_or(true) {
                best = Some(alias);
            }
        }
    }
    let alias = best?;
    let root = input.alias_map.get(alias)?;
    let rest = specifier[alias.len()..].trim_start_matches('/');
    let dir = if rest.is_empty() { root.clone() } else { join_and_clean(root, rest) };
    let prefix = if dir == "." { String::new() } else { format!("{dir}/") };
    let mut candidates: Vec<&String> = input
        .file_set
        .iter()
        .filter(|f| {
            let in_dir = if prefix.is_empty() {
                !f.contains('/')
            } else {
                f.starts_with(&prefix) && f[prefix.len()..].find('/').is_none()
            };
            in_dir && f.ends_with(".go")
        })
        .collect();
    candidates.sort();
    candidates.first().map(|s| (*s).clone())
}

fn parent_dir(file_path: &str) -> &str {
    match file_path.rfind('/') {
        Some(idx) => &file_path[..idx],
        None => "",
    }
}

/// Joins `base` and `rest` with `/`, then lexically cleans `.`/`..` segments.
fn join_and_clean(base: &str, rest: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in base.split('/').chain(rest.split('/')) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

fn strip_src_lib_dist_suffix(root: &str) -> String {
    for marker in ["/src", "/lib", "/dist"] {
        if let Some(stripped) = root.strip_suffix(marker) {
            return stripped.to_string();
        }
    }
    root.to_string()
}

/// Extension probing (§4.5): exact path; `.ts/.tsx/.js/.jsx`;
/// `path/index.{ts,tsx,js,jsx}`; a `.js`-suffixed specifier additionally
/// tries a sibling `.ts`/`.tsx` first (ESM concession).
fn probe_extensions(base: &str, file_set: &HashSet<String>) -> Option<String> {
    if let Some(stem) = base.strip_suffix(".js") {
        for ext in ["ts", "tsx"] {
            let candidate = format!("{stem}.{ext}");
            if file_set.contains(&candidate) {
                return Some(candidate);
            }
        }
    }
    if file_set.contains(base) {
        return Some(base.to_string());
    }
    for ext in TS_JS_EXTS {
        let candidate = format!("{base}.{ext}");
        if file_set.contains(&candidate) {
            return Some(candidate);
        }
    }
    for ext in TS_JS_EXTS {
        let candidate = format!("{base}/index.{ext}");
        if file_set.contains(&candidate) {
            return Some(candidate);
        }
    }
    None
}

/// First `{packages|apps|libs|services|internal|cmd|pkg}/NAME` segment pair
/// in a relative path, or `None` when the path carries no such prefix.
fn package_prefix(file_path: &str) -> Option<String> {
    let segments: Vec<&str> = file_path.split('/').collect();
    for window in segments.windows(2) {
        if PACKAGE_PREFIX_DIRS.contains(&window[0]) {
            return Some(format!("{}/{}", window[0], window[1]));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ParsedNode, RawEdge};
    use model::node::NodeKind;

    fn file(path: &str, nodes: Vec<ParsedNode>, edges: Vec<RawEdge>) -> FileRecord {
        FileRecord { file_path: path.to_string(), parsed: ParsedFile { nodes, edges } }
    }

    fn func(name: &str) -> ParsedNode {
        ParsedNode::new(name, name, NodeKind::Function, "typescript", format!("function {name}()"), 1, 3, "body", None)
    }

    #[test]
    fn resolves_relative_import_with_extension_probe() {
        let files = vec![
            file(
                "src/a.ts",
                vec![],
                vec![RawEdge::new(RawEndpoint::File, EdgeKind::Imports, RawTarget::Named("./b".to_string()), Some(1))],
            ),
            file("src/b.ts", vec![func("helper")], vec![]),
        ];
        let file_set: HashSet<String> = files.iter().map(|f| f.file_path.clone()).collect();
        let input = ResolverInput {
            files: &files,
            alias_map: &HashMap::new(),
            packages: &[],
            tsconfig_paths: &HashMap::new(),
            file_set: &file_set,
        };
        let output = resolve(&input);
        assert!(output.unresolved.is_empty());
        assert!(output.resolved.iter().any(|e| e.kind == EdgeKind::Imports && e.target.file_path == "src/b.ts"));
    }

    #[test]
    fn unresolved_import_recorded_when_nothing_matches() {
        let files = vec![file(
            "src/a.ts",
            vec![],
            vec![RawEdge::new(RawEndpoint::File, EdgeKind::Imports, RawTarget::Named("totally-missing-pkg".to_string()), Some(1))],
        )];
        let file_set: HashSet<String> = files.iter().map(|f| f.file_path.clone()).collect();
        let input = ResolverInput {
            files: &files,
            alias_map: &HashMap::new(),
            packages: &[],
            tsconfig_paths: &HashMap::new(),
            file_set: &file_set,
        };
        let output = resolve(&input);
        assert_eq!(output.unresolved.len(), 1);
        assert_eq!(output.unresolved[0].specifier, "totally-missing-pkg");
    }

    #[test]
    fn resolves_monorepo_alias_with_depends_on() {
        let files = vec![
            file(
                "apps/web/index.ts",
                vec![],
                vec![RawEdge::new(RawEndpoint::File, EdgeKind::Imports, RawTarget::Named("@test/utils".to_string()), Some(1))],
            ),
            file("packages/utils/src/index.ts", vec![func("formatDate")], vec![]),
        ];
        let file_set: HashSet<String> = files.iter().map(|f| f.file_path.clone()).collect();
        let packages = vec![PackageEntry {
            name: "@test/utils".to_string(),
            root: "packages/utils".to_string(),
            entry_point: Some("src/index.ts".to_string()),
        }];
        let input = ResolverInput {
            files: &files,
            alias_map: &HashMap::new(),
            packages: &packages,
            tsconfig_paths: &HashMap::new(),
            file_set: &file_set,
        };
        let output = resolve(&input);
        assert!(output
            .resolved
            .iter()
            .any(|e| e.kind == EdgeKind::Imports && e.target.file_path == "packages/utils/src/index.ts"));
        assert!(output.resolved.iter().any(|e| e.kind == EdgeKind::DependsOn));
    }

    #[test]
    fn call_resolves_same_file_first() {
        let files = vec![file(
            "src/a.ts",
            vec![func("caller"), func("helper")],
            vec![RawEdge::new(RawEndpoint::Node(0), EdgeKind::Calls, RawTarget::Named("helper".to_string()), Some(2))],
        )];
        let file_set: HashSet<String> = files.iter().map(|f| f.file_path.clone()).collect();
        let input = ResolverInput {
            files: &files,
            alias_map: &HashMap::new(),
            packages: &[],
            tsconfig_paths: &HashMap::new(),
            file_set: &file_set,
        };
        let output = resolve(&input);
        assert!(output.resolved.iter().any(|e| e.kind == EdgeKind::Calls && e.target.qualified_name == "helper"));
    }
}
