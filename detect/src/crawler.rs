//! C3 File Crawler (§4.3): walks a source tree with ignore/size/extension
//! filters and emits platform-neutral relative paths.

use std::path::{Path, PathBuf};

use common::error::{ColonyError, Result};
use ignore::WalkBuilder;

use crate::is_code_extension;

/// Hardcoded junk directories skipped regardless of ignore files.
const JUNK_DIRS: [&str; 9] = [
    "node_modules",
    ".git",
    "dist",
    "build",
    ".next",
    "__pycache__",
    "vendor",
    "testdata",
    "bower_components",
];

/// Filenames never treated as code, independent of extension.
const LOCKFILES: [&str; 4] = [
    "package-lock.json",
    "pnpm-lock.yaml",
    "yarn.lock",
    "go.sum",
];

pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct CrawledFile {
    pub abs_path: PathBuf,
    /// Platform-neutral (forward-slash) relative path from the source root.
    pub rel_path: String,
    pub extension: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Default)]
pub struct CrawlResult {
    pub files: Vec<CrawledFile>,
    pub skipped_count: usize,
}

pub struct FileCrawler {
    pub code_only: bool,
    pub max_file_size: u64,
}

impl Default for FileCrawler {
    fn default() -> Self {
        Self {
            code_only: true,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl FileCrawler {
    pub fn new(code_only: bool, max_file_size: Option<u64>) -> Self {
        Self {
            code_only,
            max_file_size: max_file_size.unwrap_or(DEFAULT_MAX_FILE_SIZE),
        }
    }

    /// Walks `source_root`, applying the filter order of §4.3. The `ignore`
    /// crate's `WalkBuilder` already implements the walk-local
    /// push/pop-on-directory-boundary matcher stack for `.gitignore`-style
    /// files; we layer the hardcoded junk-dir, symlink, lockfile, size, and
    /// extension filters on top.
    pub fn crawl(&self, source_root: &Path) -> Result<CrawlResult> {
        let mut walker = WalkBuilder::new(source_root);
        walker
            .hidden(true) // skip hidden files/directories
            .git_ignore(true)
            .git_global(false)
            .git_exclude(true)
            .ignore(true) // honor plain .ignore files too
            .follow_links(false)
            .filter_entry(|entry| {
                let name = entry.file_name().to_string_lossy();
                !JUNK_DIRS.contains(&name.as_ref())
            });

        let mut result = CrawlResult::default();

        for entry in walker.build() {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => {
                    result.skipped_count += 1;
                    continue;
                }
            };

            let file_type = match entry.file_type() {
                Some(ft) => ft,
                None => continue,
            };

            // `ignore` resolves symlinks when classifying file_type; a
            // symlink entry reports as the type of its target unless we ask
            // otherwise, so check explicitly via metadata.
            if entry.path_is_symlink() {
                result.skipped_count += 1;
                continue;
            }

            if !file_type.is_file() {
                continue;
            }

            let abs_path = entry.path().to_path_buf();
            let file_name = abs_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();

            if LOCKFILES.contains(&file_name.as_str())
                || file_name.ends_with(".lock")
                || file_name.ends_with(".log")
            {
                result.skipped_count += 1;
                continue;
            }

            let metadata = match abs_path.metadata() {
                Ok(m) => m,
                Err(_) => {
                    result.skipped_count += 1;
                    continue;
                }
            };
            let size_bytes = metadata.len();
            if size_bytes > self.max_file_size {
                result.skipped_count += 1;
                continue;
            }

            let extension = abs_path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default();

            if self.code_only && !is_code_extension(&extension) {
                continue;
            }

            let rel_path = pathdiff(&abs_path, source_root)?;

            result.files.push(CrawledFile {
                abs_path,
                rel_path,
                extension,
                size_bytes,
            });
        }

        Ok(result)
    }
}

/// Relative path in platform-neutral (forward-slash) form, as the resolver
/// (C5) depends on.
fn pathdiff(abs_path: &Path, root: &Path) -> Result<String> {
    let rel = abs_path.strip_prefix(root).map_err(|e| {
        ColonyError::fatal_msg("crawler", format!("path {abs_path:?} not under root: {e}"))
    })?;
    let mut parts = Vec::new();
    for component in rel.components() {
        parts.push(component.as_os_str().to_string_lossy().to_string());
    }
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn skips_junk_dirs_and_lockfiles() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("node_modules")).unwrap();
        fs::write(dir.path().join("node_modules/x.ts"), "export const x = 1;").unwrap();
        fs::write(dir.path().join("pnpm-lock.yaml"), "lockfileVersion: 1").unwrap();
        fs::write(dir.path().join("a.ts"), "export function foo() {}").unwrap();

        let crawler = FileCrawler::default();
        let result = crawler.crawl(dir.path()).unwrap();
        let rels: Vec<_> = result.files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(rels, vec!["a.ts"]);
    }

    #[test]
    fn respects_size_cap() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("big.ts"), "x".repeat(200)).unwrap();
        let crawler = FileCrawler::new(true, Some(100));
        let result = crawler.crawl(dir.path()).unwrap();
        assert!(result.files.is_empty());
        assert_eq!(result.skipped_count, 1);
    }

    #[test]
    fn code_only_filters_extension() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("readme.md"), "hello").unwrap();
        fs::write(dir.path().join("main.go"), "package main").unwrap();
        let crawler = FileCrawler::default();
        let result = crawler.crawl(dir.path()).unwrap();
        let rels: Vec<_> = result.files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(rels, vec!["main.go"]);
    }
}
