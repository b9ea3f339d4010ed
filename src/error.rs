use std::path::PathBuf;
use thiserror::Error;

/// Fatal problems detected before any interaction can start
///
/// Raised when the source dataset is absent, unreadable or missing a required
/// column, or when the loaded configuration is unusable.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("source file not found: {0}")]
    SourceMissing(PathBuf),

    #[error("failed to read source file {path}: {message}")]
    SourceUnreadable { path: PathBuf, message: String },

    #[error("unsupported source format: {0}")]
    UnsupportedFormat(String),

    #[error("source is missing required column '{0}'")]
    MissingColumn(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Load(#[from] config::ConfigError),
}

/// Recoverable problems with a single submission; the respondent is re-prompted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("all items have already been reviewed")]
    SessionComplete,

    #[error("submission for item {actual} is stale; the current item is {expected}")]
    StaleSubmission { expected: usize, actual: usize },

    #[error("a revised capability statement is required when you disagree")]
    RevisionRequired,

    #[error("agreement must be Yes or No, got '{0}'")]
    InvalidAgree(String),
}

/// Writing the local export failed; the in-memory batch is untouched
#[derive(Debug, Error)]
#[error("failed to write {path}: {source}")]
pub struct LocalPersistenceError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Non-fatal failure talking to the remote ledger
#[derive(Debug, Error)]
pub enum RemotePersistenceError {
    #[error("ledger request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("ledger rejected request ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("ledger authentication failed: {0}")]
    Auth(String),

    #[error("ledger storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("invalid ledger tab name '{0}'")]
    InvalidName(String),
}

/// Problems loading or interpreting a persisted ledger for reporting
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to read ledger {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ledger is missing required column '{0}'")]
    MissingColumn(String),

    #[error(transparent)]
    Remote(#[from] RemotePersistenceError),
}
