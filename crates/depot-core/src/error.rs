//! Error types for the core data model.

use thiserror::Error;

/// Result type for core data model operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors produced while constructing or validating core values.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A package identifier was empty or whitespace only.
    #[error("package identifier must not be empty")]
    EmptyPackageIdentifier,
    /// A version range was constructed with an inverted interval.
    #[error("version range minimum exceeds maximum")]
    InvalidVersionRange {
        /// Minimum bound supplied by the caller.
        min: String,
        /// Maximum bound supplied by the caller.
        max: String,
    },
    /// A manifest declared no installers.
    #[error("manifest declares no installers")]
    ManifestWithoutInstallers {
        /// Identifier of the offending manifest.
        id: String,
    },
}
