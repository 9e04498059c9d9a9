//! Go-module probe (§4.2): a workspace file for multi-module repos, then a
//! single module file; per-module package discovery skips `vendor/`,
//! `testdata/`, and hidden directories.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use model::workspace::PackageManager;

use super::{DetectedPackage, WorkspaceInfo, WorkspaceKindTag};

pub fn probe(source_root: &Path) -> Option<WorkspaceInfo> {
    let module_dirs = go_work_modules(source_root)
        .unwrap_or_else(|| {
            if source_root.join("go.mod").is_file() {
                vec![".".to_string()]
            } else {
                Vec::new()
            }
        });

    if module_dirs.is_empty() {
        return None;
    }

    let is_workspace = module_dirs.len() > 1 || module_dirs != vec![".".to_string()];
    let mut packages = Vec::new();
    let mut alias_map = HashMap::new();

    for module_dir in &module_dirs {
        let abs_module_dir = source_root.join(module_dir);
        let Some(module_path) = read_module_path(&abs_module_dir.join("go.mod")) else {
            continue;
        };
        alias_map.insert(module_path.clone(), module_dir.clone());

        for pkg_dir in discover_go_packages(source_root, &abs_module_dir) {
            let abs_pkg_dir = source_root.join(&pkg_dir);
            let rel_to_module = abs_pkg_dir
                .strip_prefix(&abs_module_dir)
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .unwrap_or_default();
            let import_path = if rel_to_module.is_empty() || rel_to_module == "." {
                module_path.clone()
            } else {
                format!("{module_path}/{rel_to_module}")
            };
            alias_map.entry(import_path.clone()).or_insert_with(|| pkg_dir.clone());
            packages.push(DetectedPackage {
                name: import_path,
                path: pkg_dir,
                version: None,
                entry_point: None,
            });
        }
    }

    if packages.is_empty() && alias_map.is_empty() {
        return None;
    }

    Some(WorkspaceInfo {
        workspace_type: if is_workspace {
            WorkspaceKindTag::LanguageWorkspace
        } else {
            WorkspaceKindTag::Monorepo
        },
        package_manager: PackageManager::Go,
        packages,
        alias_map,
        tsconfig_paths: HashMap::new(),
    })
}

/// Reads `go.work`'s `use` directives, resolving relative module
/// directories. Returns `None` when no workspace file exists.
fn go_work_modules(source_root: &Path) -> Option<Vec<String>> {
    let text = fs::read_to_string(source_root.join("go.work")).ok()?;
    let mut modules = Vec::new();
    let mut in_use_block = false;
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("use (") {
            in_use_block = true;
            continue;
        }
        if in_use_block && trimmed == ")" {
            in_use_block = false;
            continue;
        }
        if in_use_block {
            let dir = trimmed.trim_matches(|c| c == '"' || c == '\'');
            if !dir.is_empty() {
                modules.push(normalize_dir(dir));
            }
        } else if let Some(rest) = trimmed.strip_prefix("use ") {
            let dir = rest.trim().trim_matches(|c| c == '"' || c == '\'');
            modules.push(normalize_dir(dir));
        }
    }
    if modules.is_empty() { None } else { Some(modules) }
}

fn normalize_dir(dir: &str) -> String {
    dir.trim_start_matches("./").to_string()
}

fn read_module_path(go_mod: &Path) -> Option<String> {
    let text = fs::read_to_string(go_mod).ok()?;
    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("module ") {
            return Some(rest.trim().to_string());
        }
    }
    None
}

const SKIP_DIRS: [&str; 2] = ["vendor", "testdata"];

/// Enumerates directories (relative to `source_root`, not `module_root`)
/// containing at least one `.go` file, skipping vendor/testdata/hidden dirs.
fn discover_go_packages(source_root: &Path, module_root: &Path) -> Vec<String> {
    let mut packages = Vec::new();
    let mut stack = vec![module_root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        let mut has_go_file = false;
        for entry in entries.flatten() {
            let path = entry.path();
            let file_type = match entry.file_type() {
                Ok(ft) => ft,
                Err(_) => continue,
            };
            if file_type.is_dir() {
                let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
                if SKIP_DIRS.contains(&name.as_str()) || name.starts_with('.') {
                    continue;
                }
                stack.push(path);
            } else if path.extension().is_some_and(|e| e == "go") {
                has_go_file = true;
            }
        }
        if has_go_file {
            let rel = dir
                .strip_prefix(source_root)
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .unwrap_or_else(|_| dir.to_string_lossy().to_string());
            packages.push(if rel.is_empty() { ".".to_string() } else { rel });
        }
    }
    packages.sort();
    packages
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn single_module_standalone() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("go.mod"), "module github.com/test/proj\n\ngo 1.21\n").unwrap();
        fs::write(dir.path().join("main.go"), "package main\n").unwrap();
        fs::create_dir_all(dir.path().join("internal/util")).unwrap();
        fs::write(dir.path().join("internal/util/util.go"), "package util\n").unwrap();
        fs::create_dir_all(dir.path().join("vendor/foo")).unwrap();
        fs::write(dir.path().join("vendor/foo/foo.go"), "package foo\n").unwrap();

        let info = probe(dir.path()).unwrap();
        assert_eq!(info.package_manager, PackageManager::Go);
        let names: Vec<_> = info.packages.iter().map(|p| p.name.as_str()).collect();
        assert!(names.contains(&"github.com/test/proj"));
        assert!(names.contains(&"github.com/test/proj/internal/util"));
        assert!(!names.iter().any(|n| n.contains("vendor")));
    }

    #[test]
    fn no_go_mod_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(probe(dir.path()).is_none());
    }
}
