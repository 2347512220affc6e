/// Fatal run errors
///
/// Anything in here aborts the whole run. Failures scoped to one project or one
/// volume are recorded in the run outcome instead and never become a `RunError`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Docker daemon is unreachable: {0}")]
    PlatformUnreachable(String),

    #[error("Root directory {path} is unavailable: {source}")]
    RootUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not a valid backup set: {reason}")]
    InvalidBackup { path: PathBuf, reason: String },

    #[error("No backup set found under {root}")]
    NoBackupFound { root: PathBuf },

    #[error("Failed to write {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type RunResult<T> = std::result::Result<T, RunError>;
