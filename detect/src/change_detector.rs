//! C1 Change Detector (§4.1): classifies files as added/modified/deleted
//! since the last successful index of a source.

use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use common::error::{ColonyError, Result};
use git2::{Delta, DiffOptions, Repository};
use tracing::warn;

use crate::crawler::FileCrawler;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub is_git_repo: bool,
    pub current_commit: Option<String>,
    pub current_branch: Option<String>,
    pub previous_commit: Option<String>,
    pub is_full_index: bool,
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    /// Set when the filtered change count exceeds `max_auto_reindex_files`.
    /// The lists are *not* truncated; the orchestrator decides whether to
    /// abort (§4.1, §4.9).
    pub threshold_exceeded: bool,
}

impl ChangeSet {
    pub fn is_no_change(&self) -> bool {
        !self.is_full_index
            && self.added.is_empty()
            && self.modified.is_empty()
            && self.deleted.is_empty()
    }

    pub fn changed_count(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len()
    }
}

pub struct ChangeDetector {
    pub max_auto_reindex_files: usize,
}

impl ChangeDetector {
    pub fn new(max_auto_reindex_files: usize) -> Self {
        Self { max_auto_reindex_files }
    }

    pub fn detect(
        &self,
        source_path: &Path,
        previous_commit: Option<&str>,
        previous_indexed_at: Option<DateTime<Utc>>,
        force: bool,
    ) -> Result<ChangeSet> {
        if force {
            return self.full_index(source_path, previous_commit);
        }

        match Repository::open(source_path) {
            Ok(repo) => self.detect_git(&repo, source_path, previous_commit),
            Err(_) => self.detect_mtime(source_path, previous_indexed_at),
        }
    }

    fn full_index(&self, source_path: &Path, previous_commit: Option<&str>) -> Result<ChangeSet> {
        let (is_git_repo, current_commit, current_branch) = git_head_info(source_path);
        let crawl = FileCrawler::new(true, None).crawl(source_path)?;
        let added: Vec<String> = crawl.files.into_iter().map(|f| f.rel_path).collect();
        let threshold_exceeded = added.len() > self.max_auto_reindex_files;
        Ok(ChangeSet {
            is_git_repo,
            current_commit,
            current_branch,
            previous_commit: previous_commit.map(str::to_string),
            is_full_index: true,
            added,
            modified: Vec::new(),
            deleted: Vec::new(),
            threshold_exceeded,
        })
    }

    fn detect_git(
        &self,
        repo: &Repository,
        source_path: &Path,
        previous_commit: Option<&str>,
    ) -> Result<ChangeSet> {
        let head = repo
            .head()
            .map_err(|e| ColonyError::fatal("change detection", e))?;
        let current_commit = head.peel_to_commit().ok().map(|c| c.id().to_string());
        let current_branch = head.shorthand().map(str::to_string);

        let Some(current_commit) = current_commit else {
            // Unborn HEAD: nothing committed yet, treat as full index over
            // the working tree via mtime mode (there is no tree to diff).
            return self.detect_mtime(source_path, None);
        };

        let Some(previous) = previous_commit else {
            return self.filtered_full_index(source_path, true, Some(current_commit), current_branch, None);
        };

        if previous == current_commit {
            return Ok(ChangeSet {
                is_git_repo: true,
                current_commit: Some(current_commit),
                current_branch,
                previous_commit: Some(previous.to_string()),
                is_full_index: false,
                added: Vec::new(),
                modified: Vec::new(),
                deleted: Vec::new(),
                threshold_exceeded: false,
            });
        }

        match self.diff_commits(repo, previous, &current_commit) {
            Ok((added, modified, deleted)) => {
                let (added, modified, deleted) =
                    filter_code_paths(source_path, added, modified, deleted);
                let threshold_exceeded =
                    added.len() + modified.len() + deleted.len() > self.max_auto_reindex_files;
                Ok(ChangeSet {
                    is_git_repo: true,
                    current_commit: Some(current_commit),
                    current_branch,
                    previous_commit: Some(previous.to_string()),
                    is_full_index: false,
                    added,
                    modified,
                    deleted,
                    threshold_exceeded,
                })
            }
            Err(e) => {
                // Rewritten history / shallow clone: the previous commit is
                // no longer reachable. Fall back to a full index rather than
                // surfacing the error (§4.1 failure mode).
                warn!(error = %e, %previous, "change detection: previous commit unreachable, falling back to full index");
                self.filtered_full_index(
                    source_path,
                    true,
                    Some(current_commit),
                    current_branch,
                    Some(previous.to_string()),
                )
            }
        }
    }

    fn diff_commits(
        &self,
        repo: &Repository,
        previous: &str,
        current: &str,
    ) -> Result<(Vec<String>, Vec<String>, Vec<String>)> {
        let previous_oid = git2::Oid::from_str(previous)
            .map_err(|e| ColonyError::fatal("change detection", e))?;
        let previous_commit = repo
            .find_commit(previous_oid)
            .map_err(|e| ColonyError::fatal("change detection", e))?;
        let current_oid =
            git2::Oid::from_str(current).map_err(|e| ColonyError::fatal("change detection", e))?;
        let current_commit = repo
            .find_commit(current_oid)
            .map_err(|e| ColonyError::fatal("change detection", e))?;

        let previous_tree = previous_commit
            .tree()
            .map_err(|e| ColonyError::fatal("change detection", e))?;
        let current_tree = current_commit
            .tree()
            .map_err(|e| ColonyError::fatal("change detection", e))?;

        let mut opts = DiffOptions::new();
        opts.include_untracked(false);
        let diff = repo
            .diff_tree_to_tree(Some(&previous_tree), Some(&current_tree), Some(&mut opts))
            .map_err(|e| ColonyError::fatal("change detection", e))?;

        let mut added = Vec::new();
        let mut modified = Vec::new();
        let mut deleted = Vec::new();

        for delta in diff.deltas() {
            let old_path = delta.old_file().path().map(|p| p.to_string_lossy().replace('\\', "/"));
            let new_path = delta.new_file().path().map(|p| p.to_string_lossy().replace('\\', "/"));
            match delta.status() {
                Delta::Added | Delta::Copied => {
                    if let Some(p) = new_path {
                        added.push(p);
                    }
                }
                Delta::Deleted => {
                    if let Some(p) = old_path {
                        deleted.push(p);
                    }
                }
                Delta::Modified | Delta::Typechange => {
                    if let Some(p) = new_path {
                        modified.push(p);
                    }
                }
                // Rename decomposed into delete+add (§4.1).
                Delta::Renamed => {
                    if let Some(p) = old_path {
                        deleted.push(p);
                    }
                    if let Some(p) = new_path {
                        added.push(p);
                    }
                }
                _ => {}
            }
        }

        Ok((added, modified, deleted))
    }

    fn detect_mtime(
        &self,
        source_path: &Path,
        previous_indexed_at: Option<DateTime<Utc>>,
    ) -> Result<ChangeSet> {
        let crawl = FileCrawler::new(true, None).crawl(source_path)?;

        let Some(previous) = previous_indexed_at else {
            // Missing timestamp: treat as first index, all files added.
            let added: Vec<String> = crawl.files.into_iter().map(|f| f.rel_path).collect();
            let threshold_exceeded = added.len() > self.max_auto_reindex_files;
            return Ok(ChangeSet {
                is_git_repo: false,
                current_commit: None,
                current_branch: None,
                previous_commit: None,
                is_full_index: true,
                added,
                modified: Vec::new(),
                deleted: Vec::new(),
                threshold_exceeded,
            });
        };

        let mut added = Vec::new();
        for file in crawl.files {
            let mtime_newer = file
                .abs_path
                .metadata()
                .and_then(|m| m.modified())
                .map(|mtime| mtime > system_time_from_chrono(previous))
                .unwrap_or(true);
            if mtime_newer {
                added.push(file.rel_path);
            }
        }
        let threshold_exceeded = added.len() > self.max_auto_reindex_files;

        Ok(ChangeSet {
            is_git_repo: false,
            current_commit: None,
            current_branch: None,
            previous_commit: None,
            is_full_index: false,
            added,
            modified: Vec::new(),
            deleted: Vec::new(),
            threshold_exceeded,
        })
    }

    fn filtered_full_index(
        &self,
        source_path: &Path,
        is_git_repo: bool,
        current_commit: Option<String>,
        current_branch: Option<String>,
        previous_commit: Option<String>,
    ) -> Result<ChangeSet> {
        let crawl = FileCrawler::new(true, None).crawl(source_path)?;
        let added: Vec<String> = crawl.files.into_iter().map(|f| f.rel_path).collect();
        let threshold_exceeded = added.len() > self.max_auto_reindex_files;
        Ok(ChangeSet {
            is_git_repo,
            current_commit,
            current_branch,
            previous_commit,
            is_full_index: true,
            added,
            modified: Vec::new(),
            deleted: Vec::new(),
            threshold_exceeded,
        })
    }
}

fn system_time_from_chrono(dt: DateTime<Utc>) -> SystemTime {
    SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(dt.timestamp().max(0) as u64)
}

fn git_head_info(source_path: &Path) -> (bool, Option<String>, Option<String>) {
    match Repository::open(source_path) {
        Ok(repo) => match repo.head() {
            Ok(head) => {
                let commit = head.peel_to_commit().ok().map(|c| c.id().to_string());
                let branch = head.shorthand().map(str::to_string);
                (true, commit, branch)
            }
            Err(_) => (true, None, None),
        },
        Err(_) => (false, None, None),
    }
}

/// Passes git-diff results through the crawler's code-file filter (§4.3),
/// applied here by extension and junk-dir/lockfile name checks since the
/// paths no longer exist to be walked directly when deleted.
fn filter_code_paths(
    _source_path: &Path,
    added: Vec<String>,
    modified: Vec<String>,
    deleted: Vec<String>,
) -> (Vec<String>, Vec<String>, Vec<String>) {
    let filt = |paths: Vec<String>| -> Vec<String> {
        paths.into_iter().filter(|p| is_code_path(p)).collect()
    };
    (filt(added), filt(modified), filt(deleted))
}

fn is_code_path(path: &str) -> bool {
    const JUNK: [&str; 9] = [
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
    if path.split('/').any(|seg| JUNK.contains(&seg) || seg.starts_with('.')) {
        return false;
    }
    let file_name = path.rsplit('/').next().unwrap_or(path);
    const LOCKFILES: [&str; 4] =
        ["package-lock.json", "pnpm-lock.yaml", "yarn.lock", "go.sum"];
    if LOCKFILES.contains(&file_name) || file_name.ends_with(".lock") || file_name.ends_with(".log")
    {
        return false;
    }
    let ext = path.rsplit('.').next().unwrap_or("");
    crate::is_code_extension(ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn init_repo(dir: &Path) -> Repository {
        let repo = Repository::init(dir).unwrap();
        {
            let mut config = repo.config().unwrap();
            config.set_str("user.name", "Test").unwrap();
            config.set_str("user.email", "test@example.com").unwrap();
        }
        repo
    }

    fn commit_all(repo: &Repository, message: &str) -> String {
        let mut index = repo.index().unwrap();
        index.add_all(["."], git2::IndexAddOption::DEFAULT, None).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = repo.signature().unwrap();
        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        let oid = repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents).unwrap();
        oid.to_string()
    }

    #[test]
    fn force_yields_full_index() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.ts"), "export const a = 1;").unwrap();
        let detector = ChangeDetector::new(500);
        let cs = detector.detect(dir.path(), None, None, true).unwrap();
        assert!(cs.is_full_index);
        assert_eq!(cs.added, vec!["a.ts".to_string()]);
    }

    #[test]
    fn git_no_previous_commit_is_full_index() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.ts"), "export const a = 1;").unwrap();
        let repo = init_repo(dir.path());
        commit_all(&repo, "init");

        let detector = ChangeDetector::new(500);
        let cs = detector.detect(dir.path(), None, None, false).unwrap();
        assert!(cs.is_full_index);
        assert!(cs.is_git_repo);
        assert_eq!(cs.added, vec!["a.ts".to_string()]);
    }

    #[test]
    fn git_same_commit_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.ts"), "export const a = 1;").unwrap();
        let repo = init_repo(dir.path());
        let commit = commit_all(&repo, "init");

        let detector = ChangeDetector::new(500);
        let cs = detector.detect(dir.path(), Some(&commit), None, false).unwrap();
        assert!(cs.is_no_change());
    }

    #[test]
    fn git_incremental_modify() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.ts"), "export function foo() { return 1; }").unwrap();
        let repo = init_repo(dir.path());
        let first = commit_all(&repo, "init");

        fs::write(dir.path().join("a.ts"), "export function foo() { return 2; }").unwrap();
        commit_all(&repo, "modify");

        let detector = ChangeDetector::new(500);
        let cs = detector.detect(dir.path(), Some(&first), None, false).unwrap();
        assert!(!cs.is_full_index);
        assert_eq!(cs.modified, vec!["a.ts".to_string()]);
        assert!(cs.added.is_empty());
        assert!(cs.deleted.is_empty());
    }

    #[test]
    fn mtime_mode_on_non_git_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.ts"), "export const a = 1;").unwrap();
        let detector = ChangeDetector::new(500);
        let cs = detector.detect(dir.path(), None, None, false).unwrap();
        assert!(!cs.is_git_repo);
        assert!(cs.is_full_index);
        assert_eq!(cs.added, vec!["a.ts".to_string()]);
    }

    #[test]
    fn threshold_is_flagged_not_truncated() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            fs::write(dir.path().join(format!("f{i}.ts")), "export const x = 1;").unwrap();
        }
        let detector = ChangeDetector::new(2);
        let cs = detector.detect(dir.path(), None, None, false).unwrap();
        assert!(cs.threshold_exceeded);
        assert_eq!(cs.added.len(), 5);
    }
}
