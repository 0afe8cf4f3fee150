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

//! Durable named byte streams and the settings built on them.
//!
//! Process state lives in named streams grouped into three classes:
//! `Standard` (process-owned state), `UserFile` (human-editable files), and
//! `Secure` (modifiable only with elevated privileges). Streams are backed
//! by a filesystem state root and writes use optimistic concurrency: a
//! write observes whether the backing file changed since it was last read
//! and reports the conflict instead of clobbering it.
//!
//! On top of the raw streams sit the administrator settings (a flat
//! name-to-flag map in a secure stream) and the user settings loader
//! (`settings.json` with a backup fallback).

mod admin;
mod error;
mod streams;
mod user;

pub use admin::{AdminSetting, AdminSettings};
pub use error::{SettingsError, SettingsResult};
pub use streams::{
    ADMIN_SETTINGS, SOURCES_METADATA, SettingsRoot, Stream, StreamClass, StreamDefinition,
    USER_SETTINGS, USER_SETTINGS_BACKUP, USER_SOURCES,
};
pub use user::{
    InstallIntent, ProgressBarStyle, SourceSettings, UserSettings, UserSettingsOrigin,
    VisualSettings,
};
