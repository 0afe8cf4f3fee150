#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

//! Core identity and value types shared across the Depot workspace.
//!
//! This crate defines the vocabulary of the package manager: package
//! identifiers, versions and version ranges, channels, locales and the
//! language-distance scoring, platform enumerations, and the manifest and
//! installer aggregates that the index, source, and selection layers all
//! operate on. Everything here is a plain value with no I/O.

mod error;
mod identifier;
mod locale;
mod manifest;
mod platform;
mod version;

pub use error::{CoreError, CoreResult};
pub use identifier::{Channel, NormalizedName, PackageIdentifier, fold_for_match};
pub use locale::{
    COMPATIBLE_MATCH_THRESHOLD, PERFECT_MATCH_THRESHOLD, UNKNOWN_LANGUAGE_DISTANCE, LanguageTag,
    language_distance,
};
pub use manifest::{AppsAndFeaturesEntry, Installer, Manifest, MarketInfo, PackageDependency};
pub use platform::{Architecture, InstallerType, Scope};
pub use version::{Version, VersionAndChannel, VersionRange};
