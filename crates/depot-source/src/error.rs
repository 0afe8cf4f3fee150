//! Error types for source management.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use depot_index::IndexError;
use depot_policy::TogglePolicy;
use depot_settings::SettingsError;

/// Result type for source operations.
pub type SourceResult<T> = Result<T, SourceError>;

/// Errors produced by the source registry, factories, and catalogs.
#[derive(Debug, Error)]
pub enum SourceError {
    /// A machine policy prohibits the operation.
    #[error("operation blocked by policy")]
    PolicyBlocked {
        /// The policy that blocked the operation.
        policy: TogglePolicy,
    },
    /// A source with the same name already exists.
    #[error("source name already exists")]
    SourceNameExists {
        /// The conflicting name.
        name: String,
    },
    /// No source with the given name exists.
    #[error("source not found")]
    SourceNotFound {
        /// The requested name.
        name: String,
    },
    /// No factory is registered for the source type.
    #[error("unknown source type")]
    UnknownSourceType {
        /// The unrecognised type.
        source_type: String,
    },
    /// A field of the source details was rejected.
    #[error("invalid source details")]
    InvalidDetails {
        /// Field that failed validation.
        field: &'static str,
        /// Machine-readable reason.
        reason: &'static str,
    },
    /// The source argument does not point at a secure origin.
    #[error("source origin is not secure")]
    SourceNotSecure {
        /// The offending argument.
        arg: String,
    },
    /// The operation was cancelled through its progress token.
    #[error("operation cancelled")]
    Cancelled,
    /// Filesystem failure while managing source state.
    #[error("source io failure")]
    Io {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// Failure while reading the fetched source package archive.
    #[error("source package archive failure")]
    Archive {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Path of the archive.
        path: PathBuf,
        /// Underlying archive error.
        source: zip::result::ZipError,
    },
    /// A settings stream operation failed.
    #[error("source settings failure")]
    Settings {
        /// Underlying settings error.
        #[from]
        source: SettingsError,
    },
    /// An index operation failed.
    #[error("source index failure")]
    Index {
        /// Underlying index error.
        #[from]
        source: IndexError,
    },
    /// Serialisation of persisted source state failed.
    #[error("source serialisation failure")]
    Serialize {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Underlying serialisation error.
        source: serde_json::Error,
    },
    /// An external collaborator (fetcher, validator, client) failed.
    #[error("source collaborator failure")]
    External {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Collaborator-provided detail.
        message: String,
    },
    /// A bounded optimistic-concurrency retry loop gave up.
    #[error("too many contended write attempts")]
    TooManyAttempts {
        /// Operation that kept losing the race.
        operation: &'static str,
    },
}
