//! Error types for the manifest index.

use thiserror::Error;

use depot_core::CoreError;

use crate::schema::SchemaVersion;

/// Result type for index operations.
pub type IndexResult<T> = Result<T, IndexError>;

/// Errors produced by the manifest index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// A manifest with the same identity triple already exists.
    #[error("manifest already present in index")]
    ManifestAlreadyExists {
        /// Identifier of the manifest.
        id: String,
        /// Version of the manifest.
        version: String,
        /// Channel of the manifest.
        channel: String,
    },
    /// No manifest with the given identity triple exists.
    #[error("manifest not found in index")]
    ManifestNotFound {
        /// Identifier of the manifest.
        id: String,
        /// Version of the manifest.
        version: String,
        /// Channel of the manifest.
        channel: String,
    },
    /// The manifest's Add/Remove Programs range overlaps another version.
    #[error("declared version range overlaps another manifest in the index")]
    ArpVersionOverlap {
        /// Identifier of the package.
        id: String,
        /// The overlapping range already in the index.
        existing_range: String,
    },
    /// The opened index is newer than this implementation can write.
    #[error("cannot write to an up-level index")]
    CannotWriteUpLevel {
        /// Version found in the index.
        found: SchemaVersion,
        /// Newest version this implementation writes.
        latest: SchemaVersion,
    },
    /// The opened index version does not match the writable version.
    #[error("index schema requires migration before writing")]
    SchemaVersionMismatch {
        /// Version found in the index.
        found: SchemaVersion,
        /// Version required for writing.
        required: SchemaVersion,
    },
    /// A manifest failed model validation.
    #[error("manifest failed validation")]
    InvalidManifest {
        /// Underlying validation error.
        source: CoreError,
    },
    /// A store property value was rejected.
    #[error("invalid index property value")]
    InvalidProperty {
        /// Property that was being set.
        property: &'static str,
        /// Machine-readable reason for the rejection.
        reason: &'static str,
    },
    /// A wildcard pattern failed to compile.
    #[error("invalid wildcard pattern")]
    InvalidWildcard {
        /// Offending pattern.
        pattern: String,
        /// Underlying glob error.
        source: globset::Error,
    },
    /// Underlying database operation failed.
    #[error("index database operation failed")]
    Database {
        /// Operation identifier.
        operation: &'static str,
        /// Source database error.
        source: rusqlite::Error,
    },
    /// An internal invariant of the stored data was violated.
    #[error("index invariant violated")]
    Internal {
        /// Description of the violated invariant.
        detail: &'static str,
    },
}

impl IndexError {
    pub(crate) fn database(operation: &'static str) -> impl FnOnce(rusqlite::Error) -> Self {
        move |source| Self::Database { operation, source }
    }
}
