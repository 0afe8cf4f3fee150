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

//! Package sources: the durable registry, type factories, and catalogs.
//!
//! A *source* is a named origin of package manifests. The registry keeps
//! the user's configured sources in a secure settings stream, merges in
//! administrator-injected and built-in sources, and gates every mutation
//! on machine policy. Each source *type* registers a factory that fetches
//! and refreshes the source's data and connects it into a searchable
//! catalog.
//!
//! Catalogs compose: an aggregated catalog fans a search out over many
//! sources and merges the matches by match quality; a composite catalog
//! joins a remote catalog with the installed-packages catalog so callers
//! see the available and installed views of one logical package together.
//!
//! The network stack, package signature verification, the rest protocol
//! client, and installed-package enumeration are collaborator traits
//! implemented outside this crate.

mod catalog;
mod details;
mod error;
mod factory;
mod progress;
mod registry;

pub use catalog::{
    AggregatedCatalog, CompositeCatalog, CompositeSearchBehavior, IndexCatalog, InstalledCatalog,
    InstalledPackage, InstalledProvider, PackageCatalog, PackageEntry, ResultMatch, SearchResult,
    installed_version,
};
pub use details::{SourceDetails, SourceMetadata, SourceOrigin};
pub use error::{SourceError, SourceResult};
pub use factory::{
    PackageFetcher, PreIndexedFactory, RestClient, RestFactory, SignatureValidator, SourceFactory,
};
pub use progress::{ProgressToken, SourceProgress};
pub use registry::{CatalogReference, SourceRegistry};
