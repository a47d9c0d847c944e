use thiserror::Error;

/// Type alias for Result with IngestError
pub type Result<T> = std::result::Result<T, IngestError>;

/// Error types for the attachment ingestion engine
#[derive(Error, Debug)]
pub enum IngestError {
    /// Configuration or window input could not be understood
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Mail transport could not be reached (connection refused, missing store, etc.)
    #[error("Mail transport unavailable: {0}")]
    TransportUnavailable(String),

    /// Mail server rejected the credentials
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// Mail server reported a protocol-level failure
    #[error("IMAP error: {0}")]
    Imap(String),

    /// A single message could not be parsed (bad timestamp, broken MIME)
    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),

    /// Strict rule matching found more than one rule for a filename
    #[error("Filename '{filename}' matches multiple rules: {}", .rules.join(", "))]
    AmbiguousRule {
        filename: String,
        rules: Vec<String>,
    },

    /// Staging directory ran out of disambiguated names for one slot
    #[error("Staging slot exhausted for {0}")]
    StagingExhausted(String),

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl IngestError {
    /// Whether the error means the mail channel is unreachable for this run.
    ///
    /// These never abort an invocation; the coordinator falls back to the
    /// drop directory instead.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            IngestError::TransportUnavailable(_) | IngestError::AuthError(_) | IngestError::Imap(_)
        )
    }

    /// Whether the error must abort the whole invocation
    pub fn is_fatal(&self) -> bool {
        matches!(self, IngestError::ConfigError(_))
    }
}
