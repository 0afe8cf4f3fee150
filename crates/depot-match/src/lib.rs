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

//! Installer selection.
//!
//! Given a manifest's installer candidates and the caller's constraints,
//! the selection pipeline deterministically picks the single best installer
//! for this machine, or reports per-installer reasons when none qualifies.
//!
//! The pipeline is a list of *filters* (pure applicability checks) followed
//! by a priority-ordered list of *comparators* (filters that also rank two
//! applicable installers). Comparison results are three-valued: a strong
//! result is a non-overridable quality difference, a weak result only
//! breaks ties among otherwise-equivalent installers, and the comparator
//! order encodes which weak results matter first.

mod inapplicability;
mod options;
mod pipeline;
mod system;

pub use inapplicability::Inapplicability;
pub use options::InstallerSelectionOptions;
pub use pipeline::{Comparison, ManifestComparator, SelectionOutcome};
pub use system::SystemContext;
