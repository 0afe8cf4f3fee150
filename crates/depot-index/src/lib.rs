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

//! Embedded relational index of package manifests.
//!
//! Each source materialises one index: a single-file SQLite database
//! holding the manifests the source offers, keyed by package identity.
//! The store owns schema creation and forward-only migration, enforces
//! the uniqueness of the `(id, version, channel)` triple and the
//! non-overlap of declared Add/Remove Programs version ranges, and
//! evaluates the structured search language over its rows.
//!
//! One mutex per store serialises every operation; every mutating public
//! operation additionally runs inside a savepoint so that any failure,
//! including a panic in the caller's thread, leaves the file unchanged.

mod arp;
mod error;
mod schema;
mod search;
mod store;

pub use error::{IndexError, IndexResult};
pub use schema::SchemaVersion;
pub use search::{
    FilterClause, IndexResultMatch, IndexSearchResult, MatchCriteria, MatchType,
    PackageMatchField, QueryClause, SearchRequest, value_matches,
};
pub use store::{
    IndexProperty, IndexStore, ManifestId, OpenDisposition, PackageRowId,
    PackageVersionMultiProperty, PackageVersionProperty, VersionKey,
};
