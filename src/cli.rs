//! Command-line interface

use chrono::Local;
use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::config::{Config, TransportKind};
use crate::coordinator::{FallbackCoordinator, IngestReport};
use crate::error::{IngestError, Result};
use crate::models::ChannelStats;
use crate::rules::RuleMatcher;
use crate::transport::{ImapTransport, LocalNamespace, MailTransport, NativeTransport};
use crate::window::TimeWindow;

#[derive(Parser, Debug)]
#[command(name = "report-ingest")]
#[command(version)]
#[command(
    about = "Collect report attachments from a mailbox and a drop directory into one staging area",
    long_about = None
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit log lines as JSON
    #[arg(long)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest attachments for one time window
    Run {
        /// Day to ingest (YYYY-MM-DD), today when omitted
        #[arg(long)]
        date: Option<String>,

        /// Hour or hour range on that day, e.g. 9 or 9-11
        #[arg(long)]
        hours: Option<String>,

        /// Ingest the last N hours instead of a calendar window
        #[arg(long, conflicts_with_all = ["date", "hours"])]
        recent_hours: Option<u32>,

        /// Report what would be staged without writing anything
        #[arg(long)]
        dry_run: bool,

        /// Skip the mail channel
        #[arg(long)]
        no_mail: bool,

        /// Skip the drop directory
        #[arg(long)]
        no_directory: bool,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },

    /// Load and validate the configuration, then print the rule set
    CheckConfig,
}

/// Options of the `run` command
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub date: Option<String>,
    pub hours: Option<String>,
    pub recent_hours: Option<u32>,
    pub dry_run: bool,
    pub no_mail: bool,
    pub no_directory: bool,
}

impl RunOptions {
    pub fn window(&self) -> Result<TimeWindow> {
        TimeWindow::from_parts(
            self.date.as_deref(),
            self.hours.as_deref(),
            self.recent_hours,
            Local::now().date_naive(),
        )
    }
}

/// Progress reporter using indicatif
pub struct ProgressReporter {
    multi: MultiProgress,
    spinner_style: ProgressStyle,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::with_multi_progress(MultiProgress::new())
    }

    /// Share a `MultiProgress` with the tracing writer so log lines print
    /// above the spinner
    pub fn with_multi_progress(multi: MultiProgress) -> Self {
        // Use {elapsed} for human-readable format (e.g., "1s", "234ms")
        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed:>6}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");

        Self {
            multi,
            spinner_style,
        }
    }

    pub fn multi_progress(&self) -> &MultiProgress {
        &self.multi
    }

    pub fn add_spinner(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(self.spinner_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Finish a spinner and clear it from the multi-progress display
    pub fn finish_spinner(&self, pb: &ProgressBar, msg: &str) {
        pb.finish_and_clear();
        let _ = self.multi.println(format!("  ✓ {}", msg));
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Mail transport selected by the configuration, `None` when mail is off
pub fn build_transport(config: &Config) -> Result<Option<Box<dyn MailTransport>>> {
    let transport: Box<dyn MailTransport> = match config.email.transport {
        TransportKind::Native => Box::new(NativeTransport::new(LocalNamespace::new(
            &config.email.native.root,
        ))),
        TransportKind::Imap => {
            let imap = config.email.imap.clone().ok_or_else(|| {
                IngestError::ConfigError("[email.imap] section is missing".to_string())
            })?;
            Box::new(ImapTransport::new(imap))
        }
        TransportKind::None => return Ok(None),
    };
    Ok(Some(transport))
}

/// Load the configuration and run one ingestion pass
pub async fn run_ingest(
    cli: &Cli,
    options: &RunOptions,
    multi: MultiProgress,
) -> Result<IngestReport> {
    let reporter = ProgressReporter::with_multi_progress(multi);

    let config_spinner = reporter.add_spinner("Loading configuration...");
    let mut config = Config::load(&cli.config).await?;
    if options.no_directory {
        config.directory_scan.enabled = false;
    }
    reporter.finish_spinner(
        &config_spinner,
        &format!("Configuration loaded from {:?}", cli.config),
    );

    let window = options.window()?;
    let transport = if options.no_mail {
        None
    } else {
        build_transport(&config)?
    };

    let coordinator = FallbackCoordinator::new(&config, transport, options.dry_run);

    let run_spinner = reporter.add_spinner(&format!("Ingesting {}...", window));
    let report = coordinator
        .run(&window, Local::now().naive_local())
        .await?;
    reporter.finish_spinner(
        &run_spinner,
        &format!("{} file(s) staged", report.staged_files.len()),
    );

    Ok(report)
}

fn channel_lines(out: &mut String, label: &str, stats: &ChannelStats) {
    let _ = writeln!(out, "{}:", label);
    let _ = writeln!(out, "  Items seen:      {}", stats.items_seen);
    let _ = writeln!(out, "  Filtered out:    {}", stats.items_filtered);
    let _ = writeln!(out, "  Staged:          {}", stats.staged);
    let _ = writeln!(out, "  Duplicates:      {}", stats.duplicates);
    let _ = writeln!(out, "  Unmatched:       {}", stats.unmatched);
    let _ = writeln!(out, "  Errors:          {}", stats.errors);
}

/// Human-readable run summary
pub fn render_summary(report: &IngestReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "========================================");
    if report.dry_run {
        let _ = writeln!(out, "Ingestion Summary (DRY RUN)");
    } else {
        let _ = writeln!(out, "Ingestion Summary");
    }
    let _ = writeln!(out, "========================================");
    let _ = writeln!(out, "Run ID: {}", report.run_id);
    let _ = writeln!(out, "Window: {} ({})", report.window, report.bounds);

    match (&report.transport, &report.transport_error) {
        (None, _) => {
            let _ = writeln!(out, "Mail: disabled");
        }
        (Some(name), Some(error)) => {
            let _ = writeln!(out, "Mail ({}): FAILED - {}", name, error);
        }
        (Some(name), None) => {
            channel_lines(&mut out, &format!("Mail ({})", name), &report.mail);
        }
    }

    match &report.directory {
        Some(stats) => channel_lines(&mut out, "Drop directory", stats),
        None => {
            let _ = writeln!(out, "Drop directory: not scanned");
        }
    }

    if !report.staged_files.is_empty() {
        let verb = if report.dry_run { "Would stage" } else { "Staged" };
        let _ = writeln!(out, "{}:", verb);
        for path in &report.staged_files {
            let _ = writeln!(out, "  {}", path.display());
        }
    }
    let _ = writeln!(out, "========================================");
    out
}

/// Rule set as resolved from the configuration
pub fn describe_rules(matcher: &RuleMatcher) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} attachment rule(s), policy {:?}",
        matcher.rules().len(),
        matcher.policy()
    );
    for rule in matcher.rules() {
        let _ = writeln!(out, "  {} -> base '{}'", rule.key, rule.base);
        if !rule.columns.is_empty() {
            let _ = writeln!(out, "    columns: {}", rule.columns.join(", "));
        }
    }
    out
}

/// Validate the configuration at `path` and describe it
pub async fn check_config(cli: &Cli) -> Result<String> {
    if !cli.config.exists() {
        return Err(IngestError::ConfigError(format!(
            "Configuration file not found at {:?}",
            cli.config
        )));
    }
    let config = Config::load(&cli.config).await?;
    info!("Configuration at {:?} is valid", cli.config);

    let matcher = RuleMatcher::new(
        &config.attachment_rules,
        &config.directory_scan.file_extensions,
        config.rules.match_policy,
    );

    let mut out = describe_rules(&matcher);
    let _ = writeln!(out, "Mail transport: {:?}", config.email.transport);
    if let Some(account) = &config.email.account {
        let _ = writeln!(out, "  account: {}", account);
    }
    if config.directory_scan.enabled {
        let _ = writeln!(
            out,
            "Drop directory: {} ({}, policy {:?})",
            config.directory_scan.scan_path.display(),
            if config.directory_scan.process_subdirs {
                "recursive"
            } else {
                "top level only"
            },
            config.directory_scan.policy
        );
    } else {
        let _ = writeln!(out, "Drop directory: disabled");
    }
    let _ = writeln!(out, "Staging: {}", config.staging.path.display());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuleConfig;
    use crate::coordinator::CoordinatorPhase;
    use crate::rules::MatchPolicy;
    use chrono::NaiveDate;
    use indexmap::IndexMap;
    use uuid::Uuid;

    fn report() -> IngestReport {
        let date = NaiveDate::from_ymd_opt(2025, 7, 27).unwrap();
        let window = TimeWindow::FullDay(date);
        IngestReport {
            run_id: Uuid::new_v4(),
            started_at: Local::now(),
            completed_at: Some(Local::now()),
            window,
            bounds: window.resolve(date.and_hms_opt(12, 0, 0).unwrap()).unwrap(),
            dry_run: false,
            transport: Some("imap".to_string()),
            phases: vec![
                CoordinatorPhase::Idle,
                CoordinatorPhase::TransportAttempt,
                CoordinatorPhase::TransportFailed,
                CoordinatorPhase::DirectoryScan,
                CoordinatorPhase::Done,
            ],
            mail: ChannelStats::default(),
            directory: Some(ChannelStats {
                items_seen: 3,
                staged: 1,
                ..ChannelStats::default()
            }),
            transport_error: Some("login refused".to_string()),
            staged_files: vec![PathBuf::from("staging/IB_Calls__2025-07-27_1430.csv")],
        }
    }

    #[test]
    fn test_cli_parses_run_flags() {
        let cli = Cli::parse_from([
            "report-ingest",
            "--config",
            "ingest.toml",
            "run",
            "--date",
            "2025-07-27",
            "--hours",
            "9-11",
            "--dry-run",
        ]);
        assert_eq!(cli.config, PathBuf::from("ingest.toml"));
        match cli.command {
            Commands::Run {
                date,
                hours,
                dry_run,
                recent_hours,
                ..
            } => {
                assert_eq!(date.as_deref(), Some("2025-07-27"));
                assert_eq!(hours.as_deref(), Some("9-11"));
                assert!(recent_hours.is_none());
                assert!(dry_run);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_cli_rejects_recent_hours_with_date() {
        let result = Cli::try_parse_from([
            "report-ingest",
            "run",
            "--recent-hours",
            "2",
            "--date",
            "2025-07-27",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_run_options_window() {
        let options = RunOptions {
            date: Some("2025-07-27".to_string()),
            hours: Some("9".to_string()),
            ..RunOptions::default()
        };
        assert_eq!(
            options.window().unwrap(),
            TimeWindow::HourRange {
                date: NaiveDate::from_ymd_opt(2025, 7, 27).unwrap(),
                from_hour: 9,
                to_hour: 9,
            }
        );
    }

    #[test]
    fn test_build_transport_none() {
        let mut config = Config::default();
        config.email.transport = TransportKind::None;
        assert!(build_transport(&config).unwrap().is_none());

        config.email.transport = TransportKind::Native;
        let transport = build_transport(&config).unwrap().unwrap();
        assert_eq!(transport.name(), "native");
    }

    #[test]
    fn test_render_summary_reports_failure_and_files() {
        let text = render_summary(&report());
        assert!(text.contains("Mail (imap): FAILED - login refused"));
        assert!(text.contains("Drop directory:"));
        assert!(text.contains("IB_Calls__2025-07-27_1430.csv"));
    }

    #[test]
    fn test_describe_rules() {
        let mut rules = IndexMap::new();
        rules.insert(
            "IB_Calls.csv".to_string(),
            RuleConfig {
                columns: vec!["Date".to_string(), "Calls".to_string()],
            },
        );
        let matcher = RuleMatcher::new(&rules, &[".csv".to_string()], MatchPolicy::Strict);
        let text = describe_rules(&matcher);
        assert!(text.contains("IB_Calls.csv -> base 'IB_Calls'"));
        assert!(text.contains("columns: Date, Calls"));
    }
}
