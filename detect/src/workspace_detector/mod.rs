//! C2 Workspace Detector (§4.2): identifies monorepo shape, package manager,
//! packages, and import aliases via a registry of language-specific probes
//! that run in a fixed priority order. The first match wins, except that the
//! Node probe always wins a tie over the Go probe when both match at the
//! root (richer alias semantics).

mod go_probe;
mod node_probe;

use std::collections::HashMap;
use std::path::Path;

use model::workspace::{PackageManager, WorkspaceKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectedPackage {
    pub name: String,
    /// Relative path from the source root, forward-slash form.
    pub path: String,
    pub version: Option<String>,
    /// Relative path to the package's resolved entry-point file, if any.
    pub entry_point: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkspaceInfo {
    pub workspace_type: WorkspaceKindTag,
    pub package_manager: PackageManager,
    pub packages: Vec<DetectedPackage>,
    /// Package/module name -> its relative root path. Covers both the
    /// JS-ecosystem monorepo alias and the Go module-path alias (§4.5 tier
    /// 6 scans this same map).
    pub alias_map: HashMap<String, String>,
    /// `tsconfig.json` `compilerOptions.paths`, re-rooted to source-relative
    /// form; wildcard entries keep their trailing `/*`.
    pub tsconfig_paths: HashMap<String, Vec<String>>,
}

/// Thin wrapper so `WorkspaceInfo` can derive `Default` while still mapping
/// 1:1 onto `model::workspace::WorkspaceKind`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum WorkspaceKindTag {
    #[default]
    Standalone,
    Monorepo,
    LanguageWorkspace,
}

impl From<WorkspaceKindTag> for WorkspaceKind {
    fn from(tag: WorkspaceKindTag) -> Self {
        match tag {
            WorkspaceKindTag::Standalone => WorkspaceKind::Standalone,
            WorkspaceKindTag::Monorepo => WorkspaceKind::Monorepo,
            WorkspaceKindTag::LanguageWorkspace => WorkspaceKind::LanguageWorkspace,
        }
    }
}

pub struct WorkspaceDetector;

impl WorkspaceDetector {
    pub fn detect(source_root: &Path) -> WorkspaceInfo {
        let node_result = node_probe::probe(source_root);
        if let Some(info) = node_result {
            return info;
        }
        if let Some(info) = go_probe::probe(source_root) {
            return info;
        }
        standalone_fallback()
    }
}

fn standalone_fallback() -> WorkspaceInfo {
    WorkspaceInfo {
        workspace_type: WorkspaceKindTag::Standalone,
        package_manager: PackageManager::None,
        packages: vec![DetectedPackage {
            name: ".".to_string(),
            path: ".".to_string(),
            version: None,
            entry_point: None,
        }],
        alias_map: HashMap::new(),
        tsconfig_paths: HashMap::new(),
    }
}

/// Candidate entry points tried in order for a package root (§4.2), relative
/// to the package root.
pub(crate) const ENTRY_POINT_CANDIDATES: [&str; 8] = [
    "src/index.ts",
    "src/index.tsx",
    "src/index.js",
    "src/index.jsx",
    "index.ts",
    "index.tsx",
    "index.js",
    "index.jsx",
];

pub(crate) fn find_entry_point(
    package_abs_root: &Path,
    manifest_entry: Option<&str>,
) -> Option<String> {
    for candidate in ENTRY_POINT_CANDIDATES {
        if package_abs_root.join(candidate).is_file() {
            return Some(candidate.to_string());
        }
    }
    if let Some(entry) = manifest_entry
        && package_abs_root.join(entry).is_file()
    {
        return Some(entry.trim_start_matches("./").to_string());
    }
    None
}
