use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum BulkError {
    #[error("missing config file nsrdb-bulk.json (looked in: {0})")]
    #[diagnostic(help("pass --config <path> or create nsrdb-bulk.json in the current directory"))]
    MissingConfig(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid grid: {0}")]
    InvalidGrid(String),

    #[error("missing credentials: {}", .0.join(", "))]
    #[diagnostic(help("set them in the environment or in a .env file"))]
    MissingCredentials(Vec<String>),

    #[error("NSRDB request failed: {0}")]
    NsrdbHttp(String),

    #[error("downloaded file does not look like an NSRDB CSV: {0}")]
    InvalidArtifact(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

/// Outcome tag of a single fetch attempt.
///
/// `Transient` failures are eligible for retry, `Fatal` ones are not.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("{0}")]
    Transient(String),

    #[error("{0}")]
    Fatal(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

impl From<BulkError> for FetchError {
    fn from(err: BulkError) -> Self {
        match err {
            BulkError::InvalidArtifact(_) | BulkError::NsrdbHttp(_) => {
                FetchError::Transient(err.to_string())
            }
            other => FetchError::Fatal(other.to_string()),
        }
    }
}
