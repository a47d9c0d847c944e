//! One ingestion run across both channels
//!
//! The mail transport is attempted first. Depending on
//! [`ReconcilePolicy`], the drop directory is then scanned either always or
//! only when mail could not be read. Both channels share one window, one rule
//! matcher and one staging writer, so a report delivered both ways is staged
//! once.

use chrono::{DateTime, Local, NaiveDateTime};
use futures::StreamExt;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{Config, ReconcilePolicy};
use crate::error::Result;
use crate::filter::{FilterVerdict, MessageFilter};
use crate::models::ChannelStats;
use crate::reconcile::DirectoryReconciler;
use crate::rules::RuleMatcher;
use crate::staging::{StagingSource, StagingWriter, WriteOutcome};
use crate::transport::{FetchRequest, MailTransport};
use crate::window::{TimeWindow, WindowBounds};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorPhase {
    Idle,
    TransportAttempt,
    Success,
    TransportFailed,
    DirectoryScan,
    Done,
}

/// Outcome of one run
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Local>,
    pub completed_at: Option<DateTime<Local>>,
    pub window: TimeWindow,
    pub bounds: WindowBounds,
    pub dry_run: bool,
    /// Name of the mail transport, `None` when mail was disabled
    pub transport: Option<String>,
    pub phases: Vec<CoordinatorPhase>,
    pub mail: ChannelStats,
    /// `None` when the drop directory was not scanned
    pub directory: Option<ChannelStats>,
    pub transport_error: Option<String>,
    /// Files written (or planned, in a dry run) by this run
    pub staged_files: Vec<PathBuf>,
}

impl IngestReport {
    fn new(window: TimeWindow, bounds: WindowBounds, dry_run: bool) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Local::now(),
            completed_at: None,
            window,
            bounds,
            dry_run,
            transport: None,
            phases: vec![CoordinatorPhase::Idle],
            mail: ChannelStats::default(),
            directory: None,
            transport_error: None,
            staged_files: Vec::new(),
        }
    }

    pub fn transport_failed(&self) -> bool {
        self.phases.contains(&CoordinatorPhase::TransportFailed)
    }

    /// Both channels combined
    pub fn totals(&self) -> ChannelStats {
        let mut totals = self.mail.clone();
        if let Some(directory) = &self.directory {
            totals.merge(directory);
        }
        totals
    }
}

pub struct FallbackCoordinator {
    transport: Option<Box<dyn MailTransport>>,
    account: Option<String>,
    filter: MessageFilter,
    matcher: RuleMatcher,
    writer: StagingWriter,
    reconciler: Option<DirectoryReconciler>,
    policy: ReconcilePolicy,
    dry_run: bool,
}

impl FallbackCoordinator {
    /// `transport` is `None` when the mail channel is disabled; the drop
    /// directory then runs regardless of policy.
    pub fn new(config: &Config, transport: Option<Box<dyn MailTransport>>, dry_run: bool) -> Self {
        let writer = StagingWriter::from_config(&config.staging, dry_run);
        let reconciler = config.directory_scan.enabled.then(|| {
            DirectoryReconciler::new(&config.directory_scan).excluding(writer.root())
        });

        Self {
            transport,
            account: config.email.account.clone(),
            filter: MessageFilter::new(&config.global_filter),
            matcher: RuleMatcher::new(
                &config.attachment_rules,
                &config.directory_scan.file_extensions,
                config.rules.match_policy,
            ),
            writer,
            reconciler,
            policy: config.directory_scan.policy,
            dry_run,
        }
    }

    pub fn matcher(&self) -> &RuleMatcher {
        &self.matcher
    }

    /// Run both channels for `window`, resolved against `now`.
    ///
    /// Only an unresolvable window is an error; transport and per-item
    /// failures end up in the report.
    pub async fn run(&self, window: &TimeWindow, now: NaiveDateTime) -> Result<IngestReport> {
        let bounds = window.resolve(now)?;
        let mut report = IngestReport::new(*window, bounds, self.dry_run);
        self.writer.forget_plan();

        info!(run_id = %report.run_id, "Ingesting {} ({})", window, bounds);
        if self.matcher.is_empty() {
            warn!("No attachment rules configured; nothing will be staged");
        }

        let mail_available = match &self.transport {
            Some(transport) => {
                report.transport = Some(transport.name().to_string());
                report.phases.push(CoordinatorPhase::TransportAttempt);
                let mut staged = Vec::new();
                let result = self
                    .ingest_mail(transport.as_ref(), &bounds, &mut report.mail, &mut staged)
                    .await;
                report.staged_files.extend(staged);
                match result {
                    Ok(()) => {
                        report.phases.push(CoordinatorPhase::Success);
                        true
                    }
                    Err(e) => {
                        if e.is_transport_failure() {
                            warn!("Mail transport {} unavailable: {}", transport.name(), e);
                        } else {
                            error!("Mail transport {} failed: {}", transport.name(), e);
                        }
                        report.transport_error = Some(e.to_string());
                        report.phases.push(CoordinatorPhase::TransportFailed);
                        false
                    }
                }
            }
            None => {
                info!("Mail channel disabled");
                false
            }
        };

        if let Some(reconciler) = &self.reconciler {
            if self.policy == ReconcilePolicy::Always || !mail_available {
                report.phases.push(CoordinatorPhase::DirectoryScan);
                let mut staged = Vec::new();
                let stats = reconciler
                    .reconcile(&bounds, &self.matcher, &self.writer, &mut staged)
                    .await;
                report.staged_files.extend(staged);
                report.directory = Some(stats);
            } else {
                debug!("Mail succeeded, skipping drop directory scan");
            }
        } else if !mail_available {
            warn!("Mail unavailable and directory scanning disabled; nothing ingested");
        }

        report.phases.push(CoordinatorPhase::Done);
        report.completed_at = Some(Local::now());

        let totals = report.totals();
        info!(
            run_id = %report.run_id,
            "Run finished: {} staged, {} duplicate(s), {} unmatched, {} error(s)",
            totals.staged,
            totals.duplicates,
            totals.unmatched,
            totals.errors
        );
        Ok(report)
    }

    /// Fetch and stage mail. Only a failure to open the mailbox is returned.
    async fn ingest_mail(
        &self,
        transport: &dyn MailTransport,
        bounds: &WindowBounds,
        stats: &mut ChannelStats,
        staged: &mut Vec<PathBuf>,
    ) -> Result<()> {
        let request = FetchRequest {
            bounds: *bounds,
            account: self.account.clone(),
        };
        let mut messages = transport.fetch(&request).await?;

        while let Some(item) = messages.next().await {
            stats.items_seen += 1;
            let message = match item {
                Ok(message) => message,
                Err(e) => {
                    warn!("Skipping message: {}", e);
                    stats.errors += 1;
                    continue;
                }
            };

            if !bounds.contains(message.received) {
                debug!("{} received {} is outside the window", message.id, message.received);
                stats.items_filtered += 1;
                continue;
            }

            match self.filter.evaluate(&message) {
                FilterVerdict::Accepted => {}
                verdict => {
                    debug!(
                        sender = %message.sender,
                        subject = %message.subject,
                        "Message filtered out: {:?}",
                        verdict
                    );
                    stats.items_filtered += 1;
                    continue;
                }
            }

            if message.attachments.is_empty() {
                debug!("{} has no attachments", message.id);
            }

            for attachment in &message.attachments {
                let source = StagingSource {
                    filename: &attachment.filename,
                    content: attachment.content(),
                    sender: &attachment.origin.sender,
                };
                match self
                    .writer
                    .stage_if_matched(&self.matcher, &source, message.received, stats)
                    .await
                {
                    Some(WriteOutcome::Duplicate(_)) | None => {}
                    Some(outcome) => staged.push(outcome.path().to_path_buf()),
                }
            }
        }

        Ok(())
    }
}
