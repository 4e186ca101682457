//! Watched directory scanning.
//!
//! A scan lists the directory and keeps regular files modified strictly after
//! the current [`Watermark`]. The watermark only moves forward.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use thiserror::Error;
use tracing::{trace, warn};

/// Errors that can occur while scanning
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Directory {} unavailable: {source}", .path.display())]
    DirectoryUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A file found by a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub path: PathBuf,
    /// Last modification time
    pub modified: DateTime<Utc>,
}

/// Modification-time threshold below which files count as already processed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Watermark(DateTime<Utc>);

impl Watermark {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(at)
    }

    /// Starting point for a fresh monitor: now, or the epoch to back-fill
    /// files that are already in the directory.
    pub fn initial(process_existing: bool) -> Self {
        if process_existing {
            Self(DateTime::<Utc>::from(UNIX_EPOCH))
        } else {
            Self(Utc::now())
        }
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Whether a file modified at `modified` is past the watermark
    pub fn admits(&self, modified: DateTime<Utc>) -> bool {
        modified > self.0
    }

    /// Move to the newest modification time among `files`. Never regresses.
    /// Returns true if the watermark moved.
    pub fn advance(&mut self, files: &[ScannedFile]) -> bool {
        match files.iter().map(|f| f.modified).max() {
            Some(newest) if newest > self.0 => {
                self.0 = newest;
                true
            }
            _ => false,
        }
    }
}

/// List regular files in `directory` modified after `watermark`, sorted by path.
///
/// Failing to list the directory is `DirectoryUnavailable`. An entry that
/// vanishes or cannot be stat'ed between listing and reading is skipped.
pub async fn scan(directory: &Path, watermark: &Watermark) -> Result<Vec<ScannedFile>, ScanError> {
    let unavailable = |source: std::io::Error| ScanError::DirectoryUnavailable {
        path: directory.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(directory).await.map_err(unavailable)?;
    let mut files = Vec::new();

    while let Some(entry) = entries.next_entry().await.map_err(unavailable)? {
        let path = entry.path();

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }

        let modified = match metadata.modified() {
            Ok(modified) => DateTime::<Utc>::from(modified),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "No modification time for entry");
                continue;
            }
        };

        if watermark.admits(modified) {
            trace!(path = %path.display(), modified = %modified, "New file");
            files.push(ScannedFile { path, modified });
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}
