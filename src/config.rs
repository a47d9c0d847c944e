use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{IngestError, Result};
use crate::rules::{base_token, rule_suffixes, MatchPolicy};
use crate::staging::safe_base;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub global_filter: GlobalFilterConfig,
    /// Rule key (expected filename) -> downstream metadata, in file order
    #[serde(default)]
    pub attachment_rules: IndexMap<String, RuleConfig>,
    #[serde(default)]
    pub rules: RuleMatchingConfig,
    #[serde(default)]
    pub directory_scan: DirectoryScanConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub staging: StagingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GlobalFilterConfig {
    #[serde(default)]
    pub sender: Vec<String>,
    #[serde(default)]
    pub subject_contains: Vec<String>,
}

/// Opaque to ingestion; the column list is handed to the transformer as-is
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct RuleConfig {
    #[serde(default)]
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuleMatchingConfig {
    #[serde(default)]
    pub match_policy: MatchPolicy,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReconcilePolicy {
    /// Scan the drop directory after every mail attempt
    #[default]
    Always,
    /// Scan only when the mail transport could not be used
    OnTransportFailure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryScanConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_scan_path")]
    pub scan_path: PathBuf,
    #[serde(default)]
    pub process_subdirs: bool,
    #[serde(default = "default_file_extensions")]
    pub file_extensions: Vec<String>,
    #[serde(default)]
    pub policy: ReconcilePolicy,
}

impl Default for DirectoryScanConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            scan_path: default_scan_path(),
            process_subdirs: false,
            file_extensions: default_file_extensions(),
            policy: ReconcilePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Local mail namespace on this machine
    #[default]
    Native,
    /// Remote IMAP server
    Imap,
    /// Mail channel disabled
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EmailConfig {
    #[serde(default)]
    pub transport: TransportKind,
    /// Mailbox address to read; the default inbox when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(default)]
    pub native: NativeConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imap: Option<ImapConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeConfig {
    #[serde(default = "default_native_root")]
    pub root: PathBuf,
}

impl Default for NativeConfig {
    fn default() -> Self {
        Self {
            root: default_native_root(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImapConfig {
    pub host: String,
    #[serde(default = "default_imap_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
    #[serde(default = "default_fetch_chunk_size")]
    pub fetch_chunk_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingConfig {
    #[serde(default = "default_staging_path")]
    pub path: PathBuf,
    #[serde(default = "default_disambiguate")]
    pub disambiguate_collisions: bool,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            path: default_staging_path(),
            disambiguate_collisions: default_disambiguate(),
        }
    }
}

fn default_scan_path() -> PathBuf {
    PathBuf::from("drop")
}

fn default_file_extensions() -> Vec<String> {
    vec![".csv".to_string()]
}

fn default_native_root() -> PathBuf {
    PathBuf::from("mail")
}

fn default_imap_port() -> u16 {
    993
}

fn default_mailbox() -> String {
    "INBOX".to_string()
}

fn default_fetch_chunk_size() -> usize {
    50
}

fn default_staging_path() -> PathBuf {
    PathBuf::from("staging")
}

fn default_disambiguate() -> bool {
    true
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        // If file doesn't exist, return default config with warning
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| IngestError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| IngestError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                IngestError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| IngestError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| IngestError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.staging.path.as_os_str().is_empty() {
            return Err(IngestError::ConfigError(
                "staging.path cannot be empty".to_string(),
            ));
        }

        if self.directory_scan.file_extensions.is_empty() {
            return Err(IngestError::ConfigError(
                "directory_scan.file_extensions must list at least one extension".to_string(),
            ));
        }
        for extension in &self.directory_scan.file_extensions {
            if !extension.starts_with('.') || extension.len() < 2 {
                return Err(IngestError::ConfigError(format!(
                    "Invalid file extension '{}': must look like '.csv'",
                    extension
                )));
            }
        }

        if self.directory_scan.enabled && self.directory_scan.scan_path.as_os_str().is_empty() {
            return Err(IngestError::ConfigError(
                "directory_scan.scan_path cannot be empty when scanning is enabled".to_string(),
            ));
        }

        let suffixes = rule_suffixes(&self.directory_scan.file_extensions);
        for key in self.attachment_rules.keys() {
            let base = base_token(key, &suffixes);
            if base.trim().is_empty() {
                return Err(IngestError::ConfigError(format!(
                    "attachment_rules key '{}' has no name before its extension",
                    key
                )));
            }
            if safe_base(&base).is_none() {
                return Err(IngestError::ConfigError(format!(
                    "attachment_rules key '{}' has no characters usable in a file name",
                    key
                )));
            }
        }

        for sender in &self.global_filter.sender {
            if sender.trim().is_empty() {
                return Err(IngestError::ConfigError(
                    "global_filter.sender cannot contain empty strings".to_string(),
                ));
            }
        }

        if let Some(account) = &self.email.account {
            if account.trim().is_empty() {
                return Err(IngestError::ConfigError(
                    "email.account cannot be empty; remove it to read the default inbox"
                        .to_string(),
                ));
            }
        }

        if self.email.transport == TransportKind::Imap {
            let imap = self.email.imap.as_ref().ok_or_else(|| {
                IngestError::ConfigError(
                    "email.transport is 'imap' but the [email.imap] section is missing"
                        .to_string(),
                )
            })?;
            if imap.host.is_empty() {
                return Err(IngestError::ConfigError(
                    "email.imap.host cannot be empty".to_string(),
                ));
            }
            if imap.port == 0 {
                return Err(IngestError::ConfigError(
                    "email.imap.port must be greater than 0".to_string(),
                ));
            }
            if imap.fetch_chunk_size == 0 {
                return Err(IngestError::ConfigError(
                    "email.imap.fetch_chunk_size must be greater than 0".to_string(),
                ));
            }
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        let mut config = Self::default();
        config.attachment_rules.insert(
            "IB_Calls.csv".to_string(),
            RuleConfig {
                columns: vec!["Date".to_string(), "Agent".to_string(), "Calls".to_string()],
            },
        );
        config.directory_scan.enabled = true;
        config.save(path).await
    }
}
