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

//! Machine policy gate.
//!
//! Administrators configure machine-wide policy through a hierarchical
//! key/value store. This crate reads that store once into an immutable
//! [`PolicyGate`] snapshot and answers typed queries: three-valued toggle
//! states, effective enablement, and structured value policies such as the
//! administrator-injected source lists. Read failures never propagate; a
//! value that cannot be read is simply not configured.
//!
//! The gate is an explicitly-constructed handle. Production code builds one
//! from the machine store at startup and passes it down; tests build their
//! own from a [`MemoryPolicyStore`].

mod gate;
mod source_descriptor;
mod store;

pub use gate::{
    AdditionalSources, AllowedSecurityZones, AllowedSources, PolicyGate, PolicyState,
    SecurityZone, SourceAutoUpdateIntervalMinutes, TogglePolicy, ValuePolicy,
};
pub use source_descriptor::SourceFromPolicy;
pub use store::{JsonPolicyStore, MemoryPolicyStore, PolicyStore};
