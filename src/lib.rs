//! Report Ingestion
//!
//! Collects periodic CSV report attachments from two independent channels, a
//! mailbox and a filesystem drop directory, into one deduplicated staging
//! directory for the downstream transformer.
//!
//! # Overview
//!
//! - **Transports**: native mail namespace or IMAP, behind one trait
//! - **Windows**: full day, hour range or the last N hours
//! - **Policy**: sender allow-list, subject keywords, filename rules
//! - **Staging**: canonical `{base}__{YYYY-MM-DD_HHMM}.csv` names, never overwritten
//! - **Reconciliation**: the drop directory goes through the same rules
//!
//! # Example Usage
//!
//! ```no_run
//! use report_ingest::{cli, Config, FallbackCoordinator, TimeWindow};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml".as_ref()).await?;
//!     let transport = cli::build_transport(&config)?;
//!
//!     let coordinator = FallbackCoordinator::new(&config, transport, false);
//!     let now = chrono::Local::now().naive_local();
//!     let report = coordinator.run(&TimeWindow::RecentHours(1), now).await?;
//!
//!     println!("{} file(s) staged", report.staged_files.len());
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`transport`] - Mail transports, account resolution and MIME parsing
//! - [`window`] - Time windows and their resolved bounds
//! - [`filter`] - Sender and subject policy
//! - [`rules`] - Filename to ingestion rule matching
//! - [`staging`] - Canonical naming and idempotent writes
//! - [`reconcile`] - Drop directory scanning
//! - [`coordinator`] - Channel ordering and fallback
//! - [`cli`] - Command-line interface
//! - [`config`] - Configuration management
//! - [`error`] - Error types and result aliases
//! - [`models`] - Core data structures

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod filter;
pub mod models;
pub mod reconcile;
pub mod rules;
pub mod staging;
pub mod transport;
pub mod window;

// Re-export commonly used types for convenience
pub use error::{IngestError, Result};

// Core data models
pub use models::{Attachment, AttachmentOrigin, ChannelStats, Message};

// Config types
pub use config::{
    Config, DirectoryScanConfig, EmailConfig, GlobalFilterConfig, ImapConfig, ReconcilePolicy,
    RuleConfig, StagingConfig, TransportKind,
};

// Pipeline
pub use coordinator::{CoordinatorPhase, FallbackCoordinator, IngestReport};
pub use filter::{FilterVerdict, MessageFilter};
pub use reconcile::DirectoryReconciler;
pub use rules::{AttachmentRule, MatchPolicy, RuleMatcher};
pub use staging::{StagingSource, StagingWriter, WriteOutcome};
pub use window::{TimeWindow, WindowBounds};

// Transports
pub use transport::{
    AccountResolver, FetchRequest, ImapTransport, LocalNamespace, MailNamespace, MailStore,
    MailTransport, MessageStream, NativeTransport,
};

// CLI types (for binary usage)
pub use cli::{Cli, Commands, ProgressReporter};
