//! C1 Change Detector, C2 Workspace Detector, C3 File Crawler (spec §4.1-4.3).

pub mod change_detector;
pub mod crawler;
pub mod workspace_detector;

pub use change_detector::{ChangeDetector, ChangeSet};
pub use crawler::{CrawlResult, CrawledFile, FileCrawler};
pub use workspace_detector::{DetectedPackage, WorkspaceDetector, WorkspaceInfo};

/// Code-file extensions recognised by the crawler's code-only filter and by
/// the change detector's post-filter (§4.3).
pub const CODE_EXTENSIONS: [&str; 5] = ["ts", "tsx", "js", "jsx", "go"];

pub(crate) fn is_code_extension(ext: &str) -> bool {
    CODE_EXTENSIONS.iter().any(|e| e.eq_ignore_ascii_case(ext))
}
