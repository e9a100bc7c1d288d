//! Error types for bastion

use thiserror::Error;

/// Result type alias using bastion Error
pub type Result<T> = std::result::Result<T, Error>;

/// bastion error types
#[derive(Error, Debug)]
pub enum Error {
    // === Applicability Errors ===
    #[error("Invalid applicability descriptor: {0}")]
    Applicability(String),

    #[error("Invalid version range: {0}")]
    InvalidVersionRange(String),

    // === Rule Lifecycle Errors ===
    #[error("Inspection failed for {rule}: {message}")]
    Inspection { rule: String, message: String },

    #[error("Remediation failed for {rule}: {message}")]
    Remediation { rule: String, message: String },

    #[error("Reversal of event {event_id} failed: {message}")]
    Reversal { event_id: String, message: String },

    #[error("Rule not found: {name}")]
    RuleNotFound { name: String },

    // === Configuration Item Errors ===
    #[error("Invalid value for {key}: {message}")]
    Config { key: String, message: String },

    // === Program Configuration Errors ===
    #[error("Configuration error: {0}")]
    Configuration(String),

    // === Change Log Errors ===
    #[error("Change event not found: {event_id}")]
    EventNotFound { event_id: String },

    #[error("Backup missing or altered: {path}")]
    BackupInvalid { path: String },

    // === Execution Errors ===
    #[error("Command failed: {command} - {message}")]
    CommandFailed { command: String, message: String },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a configuration item rejection
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Check if this error is fatal (should stop the run rather than one rule)
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Configuration(_) | Error::PermissionDenied(_))
    }

    /// Get an error code for logging
    pub fn code(&self) -> &'static str {
        match self {
            Error::Applicability(_) => "APPLICABILITY_ERROR",
            Error::InvalidVersionRange(_) => "INVALID_VERSION_RANGE",
            Error::Inspection { .. } => "INSPECTION_ERROR",
            Error::Remediation { .. } => "REMEDIATION_ERROR",
            Error::Reversal { .. } => "REVERSAL_ERROR",
            Error::RuleNotFound { .. } => "RULE_NOT_FOUND",
            Error::Config { .. } => "CONFIG_ERROR",
            Error::Configuration(_) => "CONFIGURATION_ERROR",
            Error::EventNotFound { .. } => "EVENT_NOT_FOUND",
            Error::BackupInvalid { .. } => "BACKUP_INVALID",
            Error::CommandFailed { .. } => "COMMAND_FAILED",
            Error::PermissionDenied(_) => "PERMISSION_DENIED",
            Error::Io(_) => "IO_ERROR",
            Error::FileNotFound { .. } => "FILE_NOT_FOUND",
            Error::Json(_) => "JSON_ERROR",
            Error::Parse(_) => "PARSE_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Other(_) => "OTHER",
        }
    }
}
