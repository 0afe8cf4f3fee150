//! Caller-supplied constraints for installer selection.

use depot_core::{Architecture, InstallerType, Scope};

/// The options bundle handed to the selection pipeline.
///
/// Fields left unset fall back to the user's configured install behaviour
/// and finally to system defaults.
#[derive(Debug, Clone, Default)]
pub struct InstallerSelectionOptions {
    /// Ordered architecture preference. An `Unknown` element means "then
    /// any system-applicable architecture". Empty means system default.
    pub allowed_architectures: Vec<Architecture>,
    /// Skip checking architectures against what this machine can run.
    pub skip_applicability_check: bool,
    /// Hard installer-technology requirement.
    pub requested_installer_type: Option<InstallerType>,
    /// Technology of the existing install, for compatibility filtering.
    pub currently_installed_type: Option<InstallerType>,
    /// Hard scope requirement.
    pub requested_installer_scope: Option<Scope>,
    /// Scope of the existing install.
    pub currently_installed_scope: Option<Scope>,
    /// Let installers with an undeclared scope satisfy the requirement,
    /// with the requirement promoted to the preference.
    pub allow_unknown_scope: Option<bool>,
    /// Hard locale requirement.
    pub requested_installer_locale: Option<String>,
    /// Locale requirement derived from recorded install-time intent.
    pub previous_user_intent_locale: Option<String>,
    /// Locale of the existing install; a preference with a compatibility
    /// floor rather than a requirement.
    pub currently_installed_locale: Option<String>,
}
