//! Node ecosystem probe (§4.2): pnpm-workspace / `workspaces` field / lerna,
//! package-manager inference from lockfiles, glob package discovery with
//! negation, entry-point search, and a depth-limited `tsconfig.json`
//! `extends`-chain reader.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use model::workspace::PackageManager;
use serde_json::Value;

use super::{DetectedPackage, WorkspaceInfo, WorkspaceKindTag, find_entry_point};

pub fn probe(source_root: &Path) -> Option<WorkspaceInfo> {
    let root_manifest = read_json(&source_root.join("package.json"));

    let globs = pnpm_workspace_globs(source_root)
        .or_else(|| root_manifest.as_ref().and_then(workspaces_field_globs))
        .or_else(|| lerna_globs(source_root));

    let package_manager = infer_package_manager(source_root);

    let Some(globs) = globs else {
        // No monorepo manifest at the root; not a Node-ecosystem monorepo.
        // A bare package.json with no workspaces is not this probe's concern
        // either — it falls through to the standalone default, since the
        // spec reserves the Node-probe match for monorepo shape detection.
        return None;
    };

    let package_paths = expand_package_globs(source_root, &globs);
    let mut packages = Vec::new();
    let mut alias_map = HashMap::new();

    for rel_path in package_paths {
        let abs_path = source_root.join(&rel_path);
        let manifest_path = abs_path.join("package.json");
        let Some(manifest) = read_json(&manifest_path) else {
            continue;
        };
        let name = manifest
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| rel_path.clone());
        let version = manifest
            .get("version")
            .and_then(Value::as_str)
            .map(str::to_string);
        let manifest_entry = manifest
            .get("source")
            .or_else(|| manifest.get("module"))
            .or_else(|| manifest.get("main"))
            .and_then(Value::as_str);
        let entry_point = find_entry_point(&abs_path, manifest_entry)
            .map(|ep| format!("{rel_path}/{ep}").replace("./", ""));

        alias_map.insert(name.clone(), rel_path.clone());
        packages.push(DetectedPackage {
            name,
            path: rel_path,
            version,
            entry_point,
        });
    }

    let tsconfig_paths = read_tsconfig_paths(source_root);

    Some(WorkspaceInfo {
        workspace_type: WorkspaceKindTag::Monorepo,
        package_manager,
        packages,
        alias_map,
        tsconfig_paths,
    })
}

fn read_json(path: &Path) -> Option<Value> {
    let text = fs::read_to_string(path).ok()?;
    serde_json::from_str(&text).ok()
}

/// Minimal reader for the pnpm-style workspace manifest: a YAML document
/// whose only shape we rely on is a top-level `packages:` sequence of
/// glob strings.
fn pnpm_workspace_globs(source_root: &Path) -> Option<Vec<String>> {
    let text = fs::read_to_string(source_root.join("pnpm-workspace.yaml")).ok()?;
    Some(yaml_sequence_under(&text, "packages"))
}

fn yaml_sequence_under(text: &str, key: &str) -> Vec<String> {
    let mut in_section = false;
    let mut items = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with(&format!("{key}:")) {
            in_section = true;
            continue;
        }
        if in_section {
            if let Some(rest) = trimmed.strip_prefix('-') {
                let value = rest.trim().trim_matches(|c| c == '"' || c == '\'');
                items.push(value.to_string());
            } else if !trimmed.is_empty() && !trimmed.starts_with('#') {
                // Dedented to a new top-level key: section over.
                break;
            }
        }
    }
    items
}

fn workspaces_field_globs(manifest: &Value) -> Option<Vec<String>> {
    let field = manifest.get("workspaces")?;
    match field {
        Value::Array(arr) => Some(
            arr.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
        ),
        Value::Object(obj) => obj.get("packages").and_then(Value::as_array).map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        }),
        _ => None,
    }
}

fn lerna_globs(source_root: &Path) -> Option<Vec<String>> {
    let manifest = read_json(&source_root.join("lerna.json"))?;
    let packages = manifest.get("packages").and_then(Value::as_array);
    match packages {
        Some(arr) => Some(
            arr.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
        ),
        // lerna's own default when `packages` is unset.
        None => Some(vec!["packages/*".to_string()]),
    }
}

fn infer_package_manager(source_root: &Path) -> PackageManager {
    if source_root.join("pnpm-lock.yaml").is_file() {
        PackageManager::Pnpm
    } else if source_root.join("yarn.lock").is_file() {
        PackageManager::Yarn
    } else if source_root.join("package-lock.json").is_file() {
        PackageManager::Npm
    } else {
        PackageManager::None
    }
}

/// Expands workspace globs (with `!`-prefixed negation) against the
/// filesystem, returning relative paths (forward-slash) of directories that
/// contain a `package.json`.
fn expand_package_globs(source_root: &Path, globs: &[String]) -> Vec<String> {
    let mut included: Vec<String> = Vec::new();
    let mut negations: Vec<glob::Pattern> = Vec::new();

    for pattern in globs {
        if let Some(neg) = pattern.strip_prefix('!') {
            if let Ok(p) = glob::Pattern::new(neg) {
                negations.push(p);
            }
            continue;
        }
        let abs_pattern = source_root.join(pattern);
        let abs_pattern_str = abs_pattern.to_string_lossy().to_string();
        let Ok(paths) = glob::glob(&abs_pattern_str) else {
            continue;
        };
        for entry in paths.flatten() {
            if !entry.is_dir() {
                continue;
            }
            if !entry.join("package.json").is_file() {
                continue;
            }
            if let Ok(rel) = entry.strip_prefix(source_root) {
                included.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
    }

    included.sort();
    included.dedup();

    included
        .into_iter()
        .filter(|rel| !negations.iter().any(|p| p.matches(rel)))
        .collect()
}

/// Reads `tsconfig.json` (or the file an `extends` chain ultimately points
/// to), stripping `//` and `/* */` comments, following `extends` up to depth
/// 10, and merging `compilerOptions.paths`. Paths are returned re-rooted to
/// source-relative form (the directory of the tsconfig that declared them).
fn read_tsconfig_paths(source_root: &Path) -> HashMap<String, Vec<String>> {
    let mut merged = HashMap::new();
    let tsconfig_path = source_root.join("tsconfig.json");
    if !tsconfig_path.is_file() {
        return merged;
    }
    collect_tsconfig_paths(&tsconfig_path, source_root, 0, &mut merged);
    merged
}

fn collect_tsconfig_paths(
    path: &Path,
    source_root: &Path,
    depth: u32,
    merged: &mut HashMap<String, Vec<String>>,
) {
    if depth > 10 {
        return;
    }
    let Ok(raw) = fs::read_to_string(path) else {
        return;
    };
    let stripped = strip_json_comments(&raw);
    let Ok(value) = serde_json::from_str::<Value>(&stripped) else {
        return;
    };

    let base_url = value
        .get("compilerOptions")
        .and_then(|c| c.get("baseUrl"))
        .and_then(Value::as_str)
        .unwrap_or(".");
    let config_dir = path.parent().unwrap_or(source_root);
    let base_dir = config_dir.join(base_url);

    if let Some(paths) = value
        .get("compilerOptions")
        .and_then(|c| c.get("paths"))
        .and_then(Value::as_object)
    {
        for (pattern, targets) in paths {
            let Some(targets) = targets.as_array() else {
                continue;
            };
            let rerooted: Vec<String> = targets
                .iter()
                .filter_map(Value::as_str)
                .filter_map(|t| reroot(&base_dir, t, source_root))
                .collect();
            merged.entry(pattern.clone()).or_insert_with(Vec::new).extend(rerooted);
        }
    }

    // extends chain, followed after the current file's own paths so the
    // more specific (closer) tsconfig's entries win on key collision via
    // later-insert append order when the caller later dedups, matching the
    // typical tsc precedence of the extending file over its base.
    if let Some(extends) = value.get("extends").and_then(Value::as_str) {
        let mut extends_path = config_dir.join(extends);
        if extends_path.extension().is_none() {
            extends_path.set_extension("json");
        }
        if extends_path.is_file() {
            collect_tsconfig_paths(&extends_path, source_root, depth + 1, merged);
        }
    }
}

fn reroot(base_dir: &Path, target: &str, source_root: &Path) -> Option<String> {
    let joined = base_dir.join(target);
    let rel = joined.strip_prefix(source_root).ok()?;
    Some(rel.to_string_lossy().replace('\\', "/"))
}

/// Strips `//` line comments and `/* */` block comments from a JSONC string,
/// naively (no string-literal awareness beyond a simple quote toggle), which
/// suffices for the well-formed tsconfig files this probe reads.
fn strip_json_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if c == '\\' {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn detects_npm_workspaces_array() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("package.json"),
            r#"{"name":"root","workspaces":["packages/*"]}"#,
        )
        .unwrap();
        fs::create_dir_all(dir.path().join("packages/utils")).unwrap();
        fs::write(
            dir.path().join("packages/utils/package.json"),
            r#"{"name":"@test/utils","version":"1.0.0"}"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("packages/utils/index.ts"),
            "export function formatDate() {}",
        )
        .unwrap();

        let info = probe(dir.path()).unwrap();
        assert_eq!(info.packages.len(), 1);
        assert_eq!(info.packages[0].name, "@test/utils");
        assert_eq!(info.packages[0].entry_point.as_deref(), Some("packages/utils/index.ts"));
        assert_eq!(info.alias_map.get("@test/utils"), Some(&"packages/utils".to_string()));
    }

    #[test]
    fn pnpm_workspace_file_wins_priority() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("pnpm-workspace.yaml"), "packages:\n  - \"packages/*\"\n").unwrap();
        fs::write(dir.path().join("pnpm-lock.yaml"), "lockfileVersion: '6.0'").unwrap();
        fs::create_dir_all(dir.path().join("packages/a")).unwrap();
        fs::write(dir.path().join("packages/a/package.json"), r#"{"name":"a"}"#).unwrap();

        let info = probe(dir.path()).unwrap();
        assert_eq!(info.package_manager, PackageManager::Pnpm);
        assert_eq!(info.packages.len(), 1);
    }

    #[test]
    fn negated_globs_are_excluded() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("package.json"),
            r#"{"workspaces":["packages/*","!packages/skip"]}"#,
        )
        .unwrap();
        fs::create_dir_all(dir.path().join("packages/keep")).unwrap();
        fs::write(dir.path().join("packages/keep/package.json"), r#"{"name":"keep"}"#).unwrap();
        fs::create_dir_all(dir.path().join("packages/skip")).unwrap();
        fs::write(dir.path().join("packages/skip/package.json"), r#"{"name":"skip"}"#).unwrap();

        let info = probe(dir.path()).unwrap();
        let names: Vec<_> = info.packages.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["keep"]);
    }
}
