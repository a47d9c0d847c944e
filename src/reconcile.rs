//! Drop-directory reconciliation
//!
//! Files someone saved by hand into the drop directory go through the same
//! rule match and staging path as mail attachments. A file's modification
//! time stands in for the receive time, both for the window check and for the
//! canonical staging name.

use chrono::{DateTime, Local, NaiveDateTime};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::DirectoryScanConfig;
use crate::error::{IngestError, Result};
use crate::models::ChannelStats;
use crate::rules::RuleMatcher;
use crate::staging::{StagingSource, StagingWriter, WriteOutcome};
use crate::window::WindowBounds;

/// Sender label used in logs for files from the drop directory
pub const DIRECTORY_SENDER: &str = "directory";

/// A file in the drop directory with an accepted extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryCandidate {
    pub path: PathBuf,
    pub modified: NaiveDateTime,
}

impl DirectoryCandidate {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Result of walking the drop directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryListing {
    pub candidates: Vec<DirectoryCandidate>,
    /// Entries that could not be read or had no modification time
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct DirectoryReconciler {
    scan_path: PathBuf,
    recursive: bool,
    extensions: Vec<String>,
    exclude: Option<PathBuf>,
}

impl DirectoryReconciler {
    pub fn new(config: &DirectoryScanConfig) -> Self {
        Self {
            scan_path: config.scan_path.clone(),
            recursive: config.process_subdirs,
            extensions: config
                .file_extensions
                .iter()
                .map(|e| e.to_lowercase())
                .collect(),
            exclude: None,
        }
    }

    /// Never descend into `path`; used for a staging directory nested in the
    /// drop directory
    pub fn excluding(mut self, path: impl Into<PathBuf>) -> Self {
        self.exclude = Some(path.into());
        self
    }

    pub fn scan_path(&self) -> &Path {
        &self.scan_path
    }

    fn accepts_extension(&self, path: &Path) -> bool {
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_lowercase(),
            None => return false,
        };
        self.extensions.iter().any(|ext| name.ends_with(ext.as_str()))
    }

    /// Walk the drop directory. A missing scan directory yields an empty
    /// listing.
    pub async fn list(&self) -> Result<DirectoryListing> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.walk())
            .await
            .map_err(|e| IngestError::IoError(std::io::Error::new(std::io::ErrorKind::Other, e)))?
    }

    pub async fn candidates(&self) -> Result<Vec<DirectoryCandidate>> {
        Ok(self.list().await?.candidates)
    }

    fn walk(&self) -> Result<DirectoryListing> {
        let mut listing = DirectoryListing::default();
        if !self.scan_path.is_dir() {
            warn!(
                "Drop directory {} does not exist, nothing to reconcile",
                self.scan_path.display()
            );
            return Ok(listing);
        }

        let root = std::fs::canonicalize(&self.scan_path)?;
        let exclude = self
            .exclude
            .as_ref()
            .and_then(|p| std::fs::canonicalize(p).ok());
        let max_depth = if self.recursive { usize::MAX } else { 1 };

        let walker = WalkDir::new(&root)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| match &exclude {
                Some(excluded) => !entry.path().starts_with(excluded),
                None => true,
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable drop directory entry: {}", e);
                    listing.skipped += 1;
                    continue;
                }
            };
            if !entry.file_type().is_file() || !self.accepts_extension(entry.path()) {
                continue;
            }
            let modified = match entry.metadata().ok().and_then(|m| m.modified().ok()) {
                Some(modified) => DateTime::<Local>::from(modified).naive_local(),
                None => {
                    warn!("No modification time for {}", entry.path().display());
                    listing.skipped += 1;
                    continue;
                }
            };
            listing.candidates.push(DirectoryCandidate {
                path: entry.into_path(),
                modified,
            });
        }

        Ok(listing)
    }

    /// Stage every in-window candidate that matches a rule.
    ///
    /// Per-file failures are logged and counted; staged paths are appended
    /// to `staged`.
    pub async fn reconcile(
        &self,
        bounds: &WindowBounds,
        matcher: &RuleMatcher,
        writer: &StagingWriter,
        staged: &mut Vec<PathBuf>,
    ) -> ChannelStats {
        let mut stats = ChannelStats::default();

        let listing = match self.list().await {
            Ok(listing) => listing,
            Err(e) => {
                warn!("Cannot scan {}: {}", self.scan_path.display(), e);
                stats.errors += 1;
                return stats;
            }
        };
        stats.errors += listing.skipped;

        for candidate in listing.candidates {
            stats.items_seen += 1;
            if !bounds.contains(candidate.modified) {
                debug!(
                    "{} modified {} is outside {}",
                    candidate.path.display(),
                    candidate.modified,
                    bounds
                );
                stats.items_filtered += 1;
                continue;
            }

            let content = match tokio::fs::read(&candidate.path).await {
                Ok(content) => content,
                Err(e) => {
                    warn!("Cannot read {}: {}", candidate.path.display(), e);
                    stats.errors += 1;
                    continue;
                }
            };
            let filename = candidate.file_name();
            let source = StagingSource {
                filename: &filename,
                content: &content,
                sender: DIRECTORY_SENDER,
            };

            if let Some(outcome) = writer
                .stage_if_matched(matcher, &source, candidate.modified, &mut stats)
                .await
            {
                if !matches!(outcome, WriteOutcome::Duplicate(_)) {
                    staged.push(outcome.path().to_path_buf());
                }
            }
        }

        info!(
            "Drop directory {}: {} file(s) seen, {} staged, {} duplicate(s), {} error(s)",
            self.scan_path.display(),
            stats.items_seen,
            stats.staged,
            stats.duplicates,
            stats.errors
        );
        stats
    }
}
