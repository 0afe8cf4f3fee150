//! Error types for settings streams.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for settings operations.
pub type SettingsResult<T> = Result<T, SettingsError>;

/// Errors produced by settings streams and the loaders above them.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// IO failure while touching a backing file.
    #[error("settings io failure")]
    Io {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Backing path involved in the failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// A stream name escaped the state root or was empty.
    #[error("invalid stream name")]
    InvalidStreamName {
        /// Offending name.
        name: String,
    },
    /// Serialisation of a settings document failed.
    #[error("settings serialisation failure")]
    Serialize {
        /// Stream the document was destined for.
        stream: &'static str,
        /// Underlying serialisation error.
        source: serde_json::Error,
    },
    /// A bounded optimistic-concurrency retry loop gave up.
    #[error("too many contended write attempts")]
    TooManyAttempts {
        /// Operation that kept losing the race.
        operation: &'static str,
    },
}
