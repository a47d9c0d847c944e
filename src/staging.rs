//! Staging directory writer
//!
//! Every ingested attachment lands in one flat directory under a canonical
//! name, `{base}__{YYYY-MM-DD_HHMM}{ext}`. The downstream transformer finds
//! files by the `__{date}` and `__{date}_{hour}` parts of that name, so the
//! format must not change.
//!
//! The directory doubles as the deduplication ledger: a name that already
//! exists is never overwritten. Creation goes through `create_new`, so two
//! writers racing for the same name cannot both succeed. When collision
//! disambiguation is on, a taken name whose bytes differ from the incoming
//! attachment gets a `-2`, `-3`, ... suffix instead of being dropped; equal
//! bytes always count as a duplicate.

use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::StagingConfig;
use crate::error::{IngestError, Result};
use crate::models::ChannelStats;
use crate::rules::RuleMatcher;

static UNSAFE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]+").unwrap());
static UNDERSCORE_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"_{2,}").unwrap());

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H%M";
const DEFAULT_EXTENSION: &str = ".csv";
const MAX_DISAMBIGUATOR: u32 = 999;

/// Bytes to stage plus what the logs should say about them
#[derive(Debug, Clone, Copy)]
pub struct StagingSource<'a> {
    /// Name the file had in the mail or drop directory
    pub filename: &'a str,
    pub content: &'a [u8],
    /// Mail sender, or a channel label for directory files
    pub sender: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// A new staging file was created
    Written(PathBuf),
    /// Same name (and same bytes, when disambiguating) already staged
    Duplicate(PathBuf),
    /// Dry run: this is where the file would go
    Planned(PathBuf),
}

impl WriteOutcome {
    pub fn path(&self) -> &Path {
        match self {
            WriteOutcome::Written(p) | WriteOutcome::Duplicate(p) | WriteOutcome::Planned(p) => p,
        }
    }
}

/// File-name-safe form of a rule base, `None` when nothing usable remains
pub fn safe_base(base: &str) -> Option<String> {
    let replaced = UNSAFE_CHARS.replace_all(base.trim(), "_");
    let collapsed = UNDERSCORE_RUNS.replace_all(&replaced, "_");
    let trimmed = collapsed.trim_matches(|c| c == '_' || c == '.');
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Make a rule base safe to use in a file name
pub fn sanitize(base: &str) -> String {
    safe_base(base).unwrap_or_else(|| "attachment".to_string())
}

/// Lowercased extension of a source file name, with its dot
pub fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

fn canonical_stem(rule_base: &str, timestamp: NaiveDateTime) -> String {
    format!("{}__{}", sanitize(rule_base), timestamp.format(TIMESTAMP_FORMAT))
}

/// `{safeBase}__{YYYY-MM-DD_HHMM}{ext}`
pub fn canonical_name(rule_base: &str, timestamp: NaiveDateTime, extension: &str) -> String {
    format!("{}{}", canonical_stem(rule_base, timestamp), extension)
}

fn disambiguated_name(canonical_stem: &str, attempt: u32, extension: &str) -> String {
    if attempt <= 1 {
        format!("{}{}", canonical_stem, extension)
    } else {
        format!("{}-{}{}", canonical_stem, attempt, extension)
    }
}

#[derive(Debug, Clone)]
pub struct StagingWriter {
    root: PathBuf,
    disambiguate: bool,
    dry_run: bool,
    /// Dry run only: names already planned in this run, with their bytes
    planned: Arc<Mutex<HashMap<PathBuf, Vec<u8>>>>,
}

impl StagingWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            disambiguate: true,
            dry_run: false,
            planned: Arc::default(),
        }
    }

    pub fn from_config(config: &StagingConfig, dry_run: bool) -> Self {
        Self {
            root: config.path.clone(),
            disambiguate: config.disambiguate_collisions,
            dry_run,
            planned: Arc::default(),
        }
    }

    pub fn with_disambiguation(mut self, enabled: bool) -> Self {
        self.disambiguate = enabled;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist one attachment under its canonical name.
    ///
    /// Never overwrites; an existing file yields [`WriteOutcome::Duplicate`].
    pub async fn write(
        &self,
        source: &StagingSource<'_>,
        timestamp: NaiveDateTime,
        rule_base: &str,
    ) -> Result<WriteOutcome> {
        let extension = extension_of(source.filename);
        let stem = canonical_stem(rule_base, timestamp);

        if !self.dry_run {
            tokio::fs::create_dir_all(&self.root).await?;
        }

        for attempt in 1..=MAX_DISAMBIGUATOR {
            let path = self.root.join(disambiguated_name(&stem, attempt, &extension));
            let mut planned_bytes = None;

            if self.dry_run {
                planned_bytes = self.planned_content(&path);
                if planned_bytes.is_none() && !tokio::fs::try_exists(&path).await? {
                    self.plan(&path, source.content);
                    return Ok(WriteOutcome::Planned(path));
                }
            } else {
                match tokio::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&path)
                    .await
                {
                    Ok(mut file) => {
                        if let Err(e) = persist(&mut file, source.content).await {
                            drop(file);
                            let _ = tokio::fs::remove_file(&path).await;
                            return Err(e);
                        }
                        info!(
                            filename = %source.filename,
                            sender = %source.sender,
                            timestamp = %timestamp.format("%Y-%m-%d %H:%M:%S"),
                            path = %path.display(),
                            "Saved attachment"
                        );
                        return Ok(WriteOutcome::Written(path));
                    }
                    Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                    Err(e) => return Err(e.into()),
                }
            }

            // Name is taken
            if !self.disambiguate {
                debug!("{} already staged, skipping", path.display());
                return Ok(WriteOutcome::Duplicate(path));
            }
            let existing = match planned_bytes {
                Some(bytes) => bytes,
                None => tokio::fs::read(&path).await?,
            };
            if existing == source.content {
                debug!("{} already staged with identical content", path.display());
                return Ok(WriteOutcome::Duplicate(path));
            }
            warn!(
                filename = %source.filename,
                taken = %path.display(),
                "Different content already staged for this minute, trying next name"
            );
        }

        Err(IngestError::StagingExhausted(stem))
    }

    /// Drop the names planned by earlier dry runs of this writer
    pub fn forget_plan(&self) {
        self.planned
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn planned_content(&self, path: &Path) -> Option<Vec<u8>> {
        let planned = self.planned.lock().unwrap_or_else(|e| e.into_inner());
        planned.get(path).cloned()
    }

    fn plan(&self, path: &Path, content: &[u8]) {
        let mut planned = self.planned.lock().unwrap_or_else(|e| e.into_inner());
        planned.insert(path.to_path_buf(), content.to_vec());
    }

    /// Match a source against the rules and stage it, updating `stats`.
    ///
    /// Per-item failures are logged and counted, never returned.
    pub async fn stage_if_matched(
        &self,
        matcher: &RuleMatcher,
        source: &StagingSource<'_>,
        timestamp: NaiveDateTime,
        stats: &mut ChannelStats,
    ) -> Option<WriteOutcome> {
        let rule = match matcher.match_filename(source.filename) {
            Ok(Some(rule)) => rule,
            Ok(None) => {
                debug!("{} matches no attachment rule", source.filename);
                stats.unmatched += 1;
                return None;
            }
            Err(e) => {
                warn!(filename = %source.filename, sender = %source.sender, "{}", e);
                stats.errors += 1;
                return None;
            }
        };

        match self.write(source, timestamp, &rule.base).await {
            Ok(outcome) => {
                match &outcome {
                    WriteOutcome::Written(_) | WriteOutcome::Planned(_) => stats.staged += 1,
                    WriteOutcome::Duplicate(path) => {
                        info!(
                            filename = %source.filename,
                            existing = %path.display(),
                            "Attachment already staged, skipped"
                        );
                        stats.duplicates += 1;
                    }
                }
                Some(outcome)
            }
            Err(e) => {
                tracing::error!(
                    filename = %source.filename,
                    sender = %source.sender,
                    "Failed to stage attachment: {}",
                    e
                );
                stats.errors += 1;
                None
            }
        }
    }
}

async fn persist(file: &mut tokio::fs::File, content: &[u8]) -> Result<()> {
    file.write_all(content).await?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuleConfig;
    use crate::rules::MatchPolicy;
    use chrono::NaiveDate;
    use indexmap::IndexMap;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 7, 27)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn source<'a>(filename: &'a str, content: &'a [u8]) -> StagingSource<'a> {
        StagingSource {
            filename,
            content,
            sender: "reports@company.com",
        }
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("IB_Calls"), "IB_Calls");
        assert_eq!(sanitize("Agent Stats (EU)"), "Agent_Stats_EU");
        assert_eq!(sanitize("a/b\\c:d"), "a_b_c_d");
        assert_eq!(sanitize("__weird__"), "weird");
        assert_eq!(sanitize("///"), "attachment");
    }

    #[test]
    fn test_safe_base_rejects_names_without_usable_chars() {
        assert_eq!(safe_base("IB_Calls").as_deref(), Some("IB_Calls"));
        assert_eq!(safe_base("???"), None);
        assert_eq!(safe_base(" _._ "), None);
        assert_eq!(sanitize("???"), "attachment");
    }

    #[test]
    fn test_canonical_name() {
        assert_eq!(
            canonical_name("IB_Calls", at(14, 30, 59), ".csv"),
            "IB_Calls__2025-07-27_1430.csv"
        );
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("IB_Calls.CSV"), ".csv");
        assert_eq!(extension_of("report.xlsx"), ".xlsx");
        assert_eq!(extension_of("no_extension"), ".csv");
    }

    #[tokio::test]
    async fn test_write_creates_canonical_file() {
        let dir = tempdir().unwrap();
        let writer = StagingWriter::new(dir.path().join("staging"));

        let outcome = writer
            .write(&source("ib_calls_extra.CSV", b"a,b\n"), at(14, 30, 12), "IB_Calls")
            .await
            .unwrap();

        let expected = dir.path().join("staging").join("IB_Calls__2025-07-27_1430.csv");
        assert_eq!(outcome, WriteOutcome::Written(expected.clone()));
        assert_eq!(std::fs::read(expected).unwrap(), b"a,b\n");
    }

    #[tokio::test]
    async fn test_write_same_minute_same_content_is_duplicate() {
        let dir = tempdir().unwrap();
        let writer = StagingWriter::new(dir.path());

        writer
            .write(&source("IB_Calls.csv", b"x"), at(14, 30, 0), "IB_Calls")
            .await
            .unwrap();
        let second = writer
            .write(&source("IB_Calls.csv", b"x"), at(14, 30, 45), "IB_Calls")
            .await
            .unwrap();

        assert!(matches!(second, WriteOutcome::Duplicate(_)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_write_never_overwrites_without_disambiguation() {
        let dir = tempdir().unwrap();
        let writer = StagingWriter::new(dir.path()).with_disambiguation(false);

        writer
            .write(&source("IB_Calls.csv", b"first"), at(14, 30, 0), "IB_Calls")
            .await
            .unwrap();
        let second = writer
            .write(&source("IB_Calls.csv", b"second"), at(14, 30, 0), "IB_Calls")
            .await
            .unwrap();

        assert!(matches!(second, WriteOutcome::Duplicate(_)));
        let staged = dir.path().join("IB_Calls__2025-07-27_1430.csv");
        assert_eq!(std::fs::read(staged).unwrap(), b"first");
    }

    #[tokio::test]
    async fn test_write_disambiguates_different_content() {
        let dir = tempdir().unwrap();
        let writer = StagingWriter::new(dir.path());

        writer
            .write(&source("IB_Calls.csv", b"first"), at(14, 30, 0), "IB_Calls")
            .await
            .unwrap();
        let second = writer
            .write(&source("IB_Calls.csv", b"second"), at(14, 30, 5), "IB_Calls")
            .await
            .unwrap();
        let again = writer
            .write(&source("IB_Calls.csv", b"second"), at(14, 30, 9), "IB_Calls")
            .await
            .unwrap();

        let sibling = dir.path().join("IB_Calls__2025-07-27_1430-2.csv");
        assert_eq!(second, WriteOutcome::Written(sibling.clone()));
        assert_eq!(again, WriteOutcome::Duplicate(sibling));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("staging");
        let writer = StagingWriter::new(&root).with_dry_run(true);

        let outcome = writer
            .write(&source("IB_Calls.csv", b"x"), at(9, 0, 0), "IB_Calls")
            .await
            .unwrap();

        assert!(matches!(outcome, WriteOutcome::Planned(_)));
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_dry_run_plans_each_name_once() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("staging");
        let writer = StagingWriter::new(&root).with_dry_run(true);
        let mut rules = IndexMap::new();
        rules.insert("IB_Calls.csv".to_string(), RuleConfig::default());
        let matcher = RuleMatcher::new(&rules, &[".csv".to_string()], MatchPolicy::Strict);
        let mut stats = ChannelStats::default();

        let first = writer
            .stage_if_matched(&matcher, &source("IB_Calls.csv", b"x"), at(9, 0, 0), &mut stats)
            .await
            .unwrap();
        let same = writer
            .stage_if_matched(&matcher, &source("IB_Calls.csv", b"x"), at(9, 0, 30), &mut stats)
            .await
            .unwrap();
        let other = writer
            .stage_if_matched(&matcher, &source("IB_Calls.csv", b"y"), at(9, 0, 45), &mut stats)
            .await
            .unwrap();

        assert_eq!(first, WriteOutcome::Planned(root.join("IB_Calls__2025-07-27_0900.csv")));
        assert_eq!(same, WriteOutcome::Duplicate(root.join("IB_Calls__2025-07-27_0900.csv")));
        assert_eq!(other, WriteOutcome::Planned(root.join("IB_Calls__2025-07-27_0900-2.csv")));
        assert_eq!(stats.staged, 2);
        assert_eq!(stats.duplicates, 1);
        assert!(!root.exists());

        writer.forget_plan();
        let again = writer
            .write(&source("IB_Calls.csv", b"x"), at(9, 0, 0), "IB_Calls")
            .await
            .unwrap();
        assert_eq!(again, first);
    }

    #[tokio::test]
    async fn test_stage_if_matched_counts() {
        let dir = tempdir().unwrap();
        let writer = StagingWriter::new(dir.path());
        let mut rules = IndexMap::new();
        rules.insert("IB_Calls.csv".to_string(), RuleConfig::default());
        let matcher = RuleMatcher::new(&rules, &[".csv".to_string()], MatchPolicy::Strict);
        let mut stats = ChannelStats::default();

        writer
            .stage_if_matched(&matcher, &source("IB_Calls.csv", b"x"), at(9, 0, 0), &mut stats)
            .await;
        writer
            .stage_if_matched(&matcher, &source("IB_Calls.csv", b"x"), at(9, 0, 0), &mut stats)
            .await;
        writer
            .stage_if_matched(&matcher, &source("invoice.pdf", b"%PDF"), at(9, 0, 0), &mut stats)
            .await;

        assert_eq!(stats.staged, 1);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.unmatched, 1);
        assert_eq!(stats.errors, 0);
    }

    proptest! {
        #[test]
        fn prop_sanitized_base_is_filesystem_safe(base in ".{0,40}") {
            let safe = sanitize(&base);
            prop_assert!(!safe.is_empty());
            prop_assert!(!safe.contains("__"));
            prop_assert!(safe
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'));
        }
    }
}
