//! The filter/comparator pipeline and the selection algorithm.

use tracing::{debug, error};

use depot_core::{
    Architecture, COMPATIBLE_MATCH_THRESHOLD, Installer, InstallerType, Manifest,
    PERFECT_MATCH_THRESHOLD, Scope, UNKNOWN_LANGUAGE_DISTANCE, Version, language_distance,
};
use depot_settings::UserSettings;

use crate::inapplicability::Inapplicability;
use crate::options::InstallerSelectionOptions;
use crate::system::SystemContext;

/// Outcome of ranking one installer against another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// The first installer is not better.
    Negative,
    /// The first installer is better, but a lower-priority distinction.
    WeakPositive,
    /// The first installer is better by a non-overridable distinction.
    StrongPositive,
}

/// A pure applicability check over one installer.
trait FilterField: Send + Sync {
    /// Diagnostic name of the field.
    fn name(&self) -> &'static str;

    /// The rejection reasons this field assigns, or none when applicable.
    fn applicability(&self, installer: &Installer) -> Inapplicability;

    /// Human-readable reason a rejected installer did not qualify.
    fn explain_inapplicable(&self, installer: &Installer) -> String;
}

/// A filter that also ranks two applicable installers.
trait ComparisonField: FilterField {
    /// Whether `first` is a better pick than `second`.
    fn is_first_better(&self, first: &Installer, second: &Installer) -> Comparison;
}

fn describe(installer: &Installer) -> String {
    format!(
        "[{},{},{},{}]",
        installer.architecture,
        installer.effective_installer_type(),
        installer.scope,
        installer.locale
    )
}

// ---------------------------------------------------------------------------
// Filters

struct OsVersionFilter {
    os_version: Version,
}

impl FilterField for OsVersionFilter {
    fn name(&self) -> &'static str {
        "OS Version"
    }

    fn applicability(&self, installer: &Installer) -> Inapplicability {
        match &installer.min_os_version {
            Some(minimum) if *minimum > self.os_version => Inapplicability::OS_VERSION,
            _ => Inapplicability::NONE,
        }
    }

    fn explain_inapplicable(&self, installer: &Installer) -> String {
        let minimum = installer
            .min_os_version
            .as_ref()
            .map_or_else(String::new, ToString::to_string);
        format!("current OS is lower than the required minimum {minimum}")
    }
}

/// Floor below which portable payloads cannot be virtualised.
const PORTABLE_MIN_OS: &str = "10.0.18362";

struct PortableInstallFilter {
    os_version: Version,
}

impl FilterField for PortableInstallFilter {
    fn name(&self) -> &'static str {
        "Portable Install"
    }

    fn applicability(&self, installer: &Installer) -> Inapplicability {
        if installer.effective_installer_type() == InstallerType::Portable
            && self.os_version < Version::parse(PORTABLE_MIN_OS)
        {
            return Inapplicability::OS_VERSION;
        }
        Inapplicability::NONE
    }

    fn explain_inapplicable(&self, _installer: &Installer) -> String {
        format!("current OS is lower than the minimum {PORTABLE_MIN_OS} for portable installs")
    }
}

struct InstalledScopeFilter {
    requirement: Scope,
}

impl InstalledScopeFilter {
    fn create(options: &InstallerSelectionOptions) -> Option<Box<dyn FilterField>> {
        match options.currently_installed_scope {
            Some(scope) if scope != Scope::Unknown => {
                Some(Box::new(Self { requirement: scope }))
            }
            _ => None,
        }
    }
}

impl FilterField for InstalledScopeFilter {
    fn name(&self) -> &'static str {
        "Installed Scope"
    }

    fn applicability(&self, installer: &Installer) -> Inapplicability {
        // An undeclared scope has to be assumed to match the installed
        // scope, or upgrades would stop working across whole catalogs.
        if installer.scope == Scope::Unknown
            || installer.scope == self.requirement
            || installer
                .effective_installer_type()
                .ignores_scope_from_manifest()
        {
            return Inapplicability::NONE;
        }
        Inapplicability::INSTALLED_SCOPE
    }

    fn explain_inapplicable(&self, installer: &Installer) -> String {
        format!(
            "installer scope {} does not match the installed scope {}",
            installer.scope, self.requirement
        )
    }
}

struct MarketFilter {
    market: String,
}

impl MarketFilter {
    fn market_in_list(&self, markets: &[String]) -> bool {
        markets
            .iter()
            .any(|market| market.eq_ignore_ascii_case(&self.market))
    }
}

impl FilterField for MarketFilter {
    fn name(&self) -> &'static str {
        "Market"
    }

    fn applicability(&self, installer: &Installer) -> Inapplicability {
        // When both lists are present only the allowed list matters.
        if !installer.markets.allowed.is_empty() {
            if !self.market_in_list(&installer.markets.allowed) {
                return Inapplicability::MARKET;
            }
        } else if !installer.markets.excluded.is_empty()
            && self.market_in_list(&installer.markets.excluded)
        {
            return Inapplicability::MARKET;
        }
        Inapplicability::NONE
    }

    fn explain_inapplicable(&self, installer: &Installer) -> String {
        format!(
            "current market '{}' does not match the installer markets (allowed: {:?}, excluded: {:?})",
            self.market, installer.markets.allowed, installer.markets.excluded
        )
    }
}

struct InstalledTypeFilter {
    installed_type: InstallerType,
}

impl InstalledTypeFilter {
    fn create(options: &InstallerSelectionOptions) -> Option<Box<dyn FilterField>> {
        match options.currently_installed_type {
            Some(installed) if installed != InstallerType::Unknown => {
                Some(Box::new(Self {
                    installed_type: installed,
                }))
            }
            _ => None,
        }
    }

    fn compatible(&self, installer: &Installer) -> bool {
        if installer
            .effective_installer_type()
            .is_compatible_with(self.installed_type)
        {
            return true;
        }
        installer.apps_and_features_entries.iter().any(|entry| {
            entry
                .installer_type
                .is_some_and(|kind| kind.is_compatible_with(self.installed_type))
        })
    }
}

impl FilterField for InstalledTypeFilter {
    fn name(&self) -> &'static str {
        "Installed Type"
    }

    fn applicability(&self, installer: &Installer) -> Inapplicability {
        if self.compatible(installer) {
            Inapplicability::NONE
        } else {
            Inapplicability::INSTALLED_TYPE
        }
    }

    fn explain_inapplicable(&self, installer: &Installer) -> String {
        format!(
            "installed package type '{}' is not compatible with installer type '{}'",
            self.installed_type,
            installer.effective_installer_type()
        )
    }
}

// ---------------------------------------------------------------------------
// Comparators

struct LocaleComparator {
    preference: Vec<String>,
    requirement: Vec<String>,
    is_installed_locale: bool,
}

impl LocaleComparator {
    fn create(
        options: &InstallerSelectionOptions,
        settings: &UserSettings,
        system: &SystemContext,
    ) -> Option<Box<dyn ComparisonField>> {
        let mut preference = Vec::new();
        let mut requirement = Vec::new();
        // Installed-locale handling keeps the locale a preference but
        // demands at least a compatible match.
        let mut is_installed_locale = false;

        // A requirement comes from the caller, then recorded intent, then
        // settings; recorded intent flips the installed-locale handling.
        if let Some(locale) = &options.requested_installer_locale {
            requirement.push(locale.clone());
        } else if let Some(locale) = &options.previous_user_intent_locale {
            requirement.push(locale.clone());
            is_installed_locale = true;
        } else if options.currently_installed_locale.is_none() {
            // On upgrade the installed locale governs; settings
            // requirements only apply to fresh installs.
            requirement = settings.requirements.locales.clone();
        }

        if let Some(locale) = &options.currently_installed_locale {
            preference.push(locale.clone());
            is_installed_locale = true;
        } else {
            preference = settings.preferences.locales.clone();
            if preference.is_empty() {
                preference = system.preferred_languages.clone();
            }
        }

        if preference.is_empty() && requirement.is_empty() {
            return None;
        }
        debug!(
            ?requirement,
            ?preference,
            is_installed_locale,
            "locale comparator created"
        );
        Some(Box::new(Self {
            preference,
            requirement,
            is_installed_locale,
        }))
    }

    const fn flag(&self) -> Inapplicability {
        if self.is_installed_locale {
            Inapplicability::INSTALLED_LOCALE
        } else {
            Inapplicability::LOCALE
        }
    }
}

impl FilterField for LocaleComparator {
    fn name(&self) -> &'static str {
        "Locale"
    }

    fn applicability(&self, installer: &Installer) -> Inapplicability {
        if !self.requirement.is_empty() {
            for required in &self.requirement {
                if language_distance(required, &installer.locale) >= PERFECT_MATCH_THRESHOLD {
                    return Inapplicability::NONE;
                }
            }
            return self.flag();
        }

        if self.is_installed_locale && !self.preference.is_empty() {
            for preferred in &self.preference {
                // An undeclared installer locale has to be assumed to
                // match the installed one, or upgrades would stop working.
                if installer.locale.is_empty()
                    || language_distance(preferred, &installer.locale)
                        >= COMPATIBLE_MATCH_THRESHOLD
                {
                    return Inapplicability::NONE;
                }
            }
            return self.flag();
        }

        Inapplicability::NONE
    }

    fn explain_inapplicable(&self, installer: &Installer) -> String {
        format!(
            "installer locale '{}' does not satisfy required locales {:?} or a compatible match for preferred locales {:?}",
            installer.locale, self.requirement, self.preference
        )
    }
}

impl ComparisonField for LocaleComparator {
    fn is_first_better(&self, first: &Installer, second: &Installer) -> Comparison {
        if self.preference.is_empty() {
            return Comparison::Negative;
        }

        for preferred in &self.preference {
            let first_score = if first.locale.is_empty() {
                UNKNOWN_LANGUAGE_DISTANCE
            } else {
                language_distance(preferred, &first.locale)
            };
            let second_score = if second.locale.is_empty() {
                UNKNOWN_LANGUAGE_DISTANCE
            } else {
                language_distance(preferred, &second.locale)
            };

            if first_score >= COMPATIBLE_MATCH_THRESHOLD
                || second_score >= COMPATIBLE_MATCH_THRESHOLD
            {
                return if first_score > second_score {
                    Comparison::StrongPositive
                } else {
                    Comparison::Negative
                };
            }
        }

        // Neither reaches a compatible match for any preference; prefer an
        // undeclared locale over a clearly wrong one.
        if first.locale.is_empty() && !second.locale.is_empty() {
            Comparison::WeakPositive
        } else {
            Comparison::Negative
        }
    }
}

struct ScopeComparator {
    preference: Scope,
    requirement: Scope,
    allow_unknown_in_addition_to_required: bool,
}

impl ScopeComparator {
    fn create(
        options: &InstallerSelectionOptions,
        settings: &UserSettings,
    ) -> Option<Box<dyn ComparisonField>> {
        // The preference always comes from settings; the requirement from
        // the caller, falling back to settings.
        let mut preference = settings.preferences.scope.unwrap_or_default();
        let requirement = options
            .requested_installer_scope
            .or(settings.requirements.scope)
            .unwrap_or_default();

        let mut allow_unknown_in_addition_to_required = false;
        if let Some(allow) = options.allow_unknown_scope {
            allow_unknown_in_addition_to_required = allow;
            // Keep the required scope preferred over an undeclared one.
            if requirement != Scope::Unknown {
                preference = requirement;
            }
        }

        if preference == Scope::Unknown && requirement == Scope::Unknown {
            return None;
        }
        Some(Box::new(Self {
            preference,
            requirement,
            allow_unknown_in_addition_to_required,
        }))
    }
}

impl FilterField for ScopeComparator {
    fn name(&self) -> &'static str {
        "Scope"
    }

    fn applicability(&self, installer: &Installer) -> Inapplicability {
        // Applicable when there is no requirement, the requirement is met,
        // an undeclared scope is explicitly allowed, or the technology
        // lets the caller control scope anyway.
        if self.requirement == Scope::Unknown
            || installer.scope == self.requirement
            || (installer.scope == Scope::Unknown && self.allow_unknown_in_addition_to_required)
            || installer
                .effective_installer_type()
                .ignores_scope_from_manifest()
        {
            return Inapplicability::NONE;
        }
        Inapplicability::SCOPE
    }

    fn explain_inapplicable(&self, installer: &Installer) -> String {
        format!(
            "installer scope {} does not match the required scope {}",
            installer.scope, self.requirement
        )
    }
}

impl ComparisonField for ScopeComparator {
    fn is_first_better(&self, first: &Installer, second: &Installer) -> Comparison {
        if self.preference != Scope::Unknown
            && first.scope == self.preference
            && second.scope != self.preference
        {
            // Against an undeclared scope the edge is weak; against the
            // opposite declared scope it is strong.
            return if second.scope == Scope::Unknown {
                Comparison::WeakPositive
            } else {
                Comparison::StrongPositive
            };
        }
        Comparison::Negative
    }
}

struct MachineArchitectureComparator {
    allowed: Vec<Architecture>,
    system_order: Vec<Architecture>,
    system_architecture: Architecture,
}

impl MachineArchitectureComparator {
    fn create(
        options: &InstallerSelectionOptions,
        settings: &UserSettings,
        system: &SystemContext,
    ) -> Box<dyn ComparisonField> {
        let system_order = system.applicable_architectures();

        // The caller's list wins over settings; both use the same shape.
        let requested = if options.allowed_architectures.is_empty() {
            settings.preferences.architectures.clone()
        } else {
            options.allowed_architectures.clone()
        };

        let mut allowed = Vec::new();
        if !requested.is_empty() {
            // Take elements until Unknown, which means "anything the
            // system can run from here on".
            let mut add_remaining = false;
            for architecture in requested {
                if architecture == Architecture::Unknown {
                    add_remaining = true;
                    break;
                }
                let applicable = options.skip_applicability_check
                    || system_order.contains(&architecture);
                if applicable && !allowed.contains(&architecture) {
                    allowed.push(architecture);
                }
            }
            if add_remaining {
                for architecture in &system_order {
                    if !allowed.contains(architecture) {
                        allowed.push(*architecture);
                    }
                }
            }
            debug!(?allowed, "architecture comparator created with allowed list");
        }

        Box::new(Self {
            allowed,
            system_order,
            system_architecture: system.architecture,
        })
    }

    /// Rank of an architecture in the effective allowed order; higher is
    /// better, `None` is inapplicable.
    fn rank(&self, architecture: Architecture) -> Option<usize> {
        let order = if self.allowed.is_empty() {
            &self.system_order
        } else {
            &self.allowed
        };
        order
            .iter()
            .position(|candidate| *candidate == architecture)
            .map(|position| order.len() - position)
    }

    fn strong_match(&self) -> Architecture {
        // With an explicit order the first entry is the strong match;
        // otherwise the native architecture is.
        self.allowed
            .first()
            .copied()
            .unwrap_or(self.system_architecture)
    }

    fn unsupported_by_installer(&self, installer: &Installer) -> bool {
        installer
            .unsupported_os_architectures
            .contains(&self.system_architecture)
    }
}

impl FilterField for MachineArchitectureComparator {
    fn name(&self) -> &'static str {
        "Machine Architecture"
    }

    fn applicability(&self, installer: &Installer) -> Inapplicability {
        if self.rank(installer.architecture).is_none() || self.unsupported_by_installer(installer)
        {
            return Inapplicability::MACHINE_ARCHITECTURE;
        }
        Inapplicability::NONE
    }

    fn explain_inapplicable(&self, installer: &Installer) -> String {
        if self.unsupported_by_installer(installer) {
            "system architecture is unsupported by the installer".to_string()
        } else if self
            .system_order
            .contains(&installer.architecture)
        {
            format!("architecture was excluded by the caller: {}", installer.architecture)
        } else {
            format!("machine is not compatible with {}", installer.architecture)
        }
    }
}

impl ComparisonField for MachineArchitectureComparator {
    fn is_first_better(&self, first: &Installer, second: &Installer) -> Comparison {
        let first_rank = self.rank(first.architecture);
        let second_rank = self.rank(second.architecture);

        if first_rank > second_rank {
            // A match with the primary architecture is strong.
            if first.architecture == self.strong_match() {
                Comparison::StrongPositive
            } else {
                Comparison::WeakPositive
            }
        } else {
            Comparison::Negative
        }
    }
}

struct InstallerTypeComparator {
    preference: Vec<InstallerType>,
    requirement: Vec<InstallerType>,
}

impl InstallerTypeComparator {
    fn create(
        options: &InstallerSelectionOptions,
        settings: &UserSettings,
    ) -> Option<Box<dyn ComparisonField>> {
        let mut preference = Vec::new();
        let requirement;

        if let Some(requested) = options.requested_installer_type {
            requirement = vec![requested];
        } else {
            preference = settings.preferences.installer_types.clone();
            requirement = settings.requirements.installer_types.clone();
        }

        if preference.is_empty() && requirement.is_empty() {
            return None;
        }
        debug!(?requirement, ?preference, "installer type comparator created");
        Some(Box::new(Self {
            preference,
            requirement,
        }))
    }

    fn matches(selection: &[InstallerType], installer: &Installer) -> bool {
        selection.contains(&installer.effective_installer_type())
            || selection.contains(&installer.base_installer_type)
    }
}

impl FilterField for InstallerTypeComparator {
    fn name(&self) -> &'static str {
        "Installer Type"
    }

    fn applicability(&self, installer: &Installer) -> Inapplicability {
        if self.requirement.is_empty() || Self::matches(&self.requirement, installer) {
            Inapplicability::NONE
        } else {
            Inapplicability::INSTALLER_TYPE
        }
    }

    fn explain_inapplicable(&self, installer: &Installer) -> String {
        format!(
            "installer type '{}' does not match the required types {:?}",
            installer.effective_installer_type(),
            self.requirement
        )
    }
}

impl ComparisonField for InstallerTypeComparator {
    fn is_first_better(&self, first: &Installer, second: &Installer) -> Comparison {
        for preferred in &self.preference {
            let first_preferred = first.effective_installer_type() == *preferred
                || first.base_installer_type == *preferred;
            let second_preferred = second.effective_installer_type() == *preferred
                || second.base_installer_type == *preferred;

            if first_preferred && second_preferred {
                return Comparison::Negative;
            }
            if first_preferred != second_preferred {
                // Weak: a requirement can pin the type when it matters.
                return if first_preferred {
                    Comparison::WeakPositive
                } else {
                    Comparison::Negative
                };
            }
        }
        Comparison::Negative
    }
}

// ---------------------------------------------------------------------------
// Pipeline

/// The selection result: the preferred installer when one qualifies, and
/// the per-installer rejection reasons for those that did not.
#[derive(Debug, Clone)]
pub struct SelectionOutcome {
    /// The preferred installer, when any candidate was applicable.
    pub installer: Option<Installer>,
    /// One entry per rejected installer, in manifest order.
    pub inapplicabilities: Vec<Inapplicability>,
}

/// The assembled selection pipeline.
pub struct ManifestComparator {
    filters: Vec<Box<dyn FilterField>>,
    comparators: Vec<Box<dyn ComparisonField>>,
}

impl ManifestComparator {
    /// Assemble the pipeline for one selection.
    ///
    /// Filter order does not matter; comparator order is the priority
    /// order of weak results.
    #[must_use]
    pub fn new(
        options: &InstallerSelectionOptions,
        settings: &UserSettings,
        system: &SystemContext,
    ) -> Self {
        let mut filters: Vec<Box<dyn FilterField>> = vec![
            Box::new(OsVersionFilter {
                os_version: system.os_version.clone(),
            }),
            Box::new(PortableInstallFilter {
                os_version: system.os_version.clone(),
            }),
        ];
        if let Some(filter) = InstalledScopeFilter::create(options) {
            filters.push(filter);
        }
        filters.push(Box::new(MarketFilter {
            market: system.market.clone(),
        }));
        if let Some(filter) = InstalledTypeFilter::create(options) {
            filters.push(filter);
        }

        let mut comparators: Vec<Box<dyn ComparisonField>> = Vec::new();
        if let Some(comparator) = LocaleComparator::create(options, settings, system) {
            comparators.push(comparator);
        }
        if let Some(comparator) = ScopeComparator::create(options, settings) {
            comparators.push(comparator);
        }
        comparators.push(MachineArchitectureComparator::create(options, settings, system));
        if let Some(comparator) = InstallerTypeComparator::create(options, settings) {
            comparators.push(comparator);
        }

        Self {
            filters,
            comparators,
        }
    }

    /// Pick the preferred installer from a manifest.
    #[must_use]
    pub fn select(&self, manifest: &Manifest) -> SelectionOutcome {
        debug!(id = %manifest.id, "starting installer selection");

        let mut result: Option<&Installer> = None;
        let mut inapplicabilities = Vec::new();

        for installer in &manifest.installers {
            let reasons = self.applicability(installer);
            if reasons.is_none() {
                if result.is_none_or(|best| self.is_first_better(installer, best)) {
                    debug!(installer = %describe(installer), "current best choice");
                    result = Some(installer);
                }
            } else {
                inapplicabilities.push(reasons);
            }
        }

        SelectionOutcome {
            installer: result.cloned(),
            inapplicabilities,
        }
    }

    /// The union of every field's rejection reasons for one installer.
    #[must_use]
    pub fn applicability(&self, installer: &Installer) -> Inapplicability {
        let mut reasons = Inapplicability::NONE;
        for filter in &self.filters {
            let inapplicability = filter.applicability(installer);
            if !inapplicability.is_none() {
                debug!(
                    installer = %describe(installer),
                    reason = %filter.explain_inapplicable(installer),
                    "installer not applicable"
                );
                reasons |= inapplicability;
            }
        }
        for comparator in &self.comparators {
            let inapplicability = comparator.applicability(installer);
            if !inapplicability.is_none() {
                debug!(
                    installer = %describe(installer),
                    reason = %comparator.explain_inapplicable(installer),
                    "installer not applicable"
                );
                reasons |= inapplicability;
            }
        }
        reasons
    }

    /// Whether `first` should be picked over `second`.
    ///
    /// # Panics
    ///
    /// Panics when any comparator claims both directions are strictly
    /// better; that is a comparator bug, not a data condition.
    #[must_use]
    pub fn is_first_better(&self, first: &Installer, second: &Installer) -> bool {
        // The comparator priority order breaks ties between weak results.
        let mut first_weak: Option<(&'static str, bool)> = None;

        for comparator in &self.comparators {
            let forward = comparator.is_first_better(first, second);
            let reverse = comparator.is_first_better(second, first);

            if forward != Comparison::Negative && reverse != Comparison::Negative {
                error!(
                    first = %describe(first),
                    second = %describe(second),
                    comparator = comparator.name(),
                    "comparator ranked both installers above each other"
                );
                panic!("comparator ranked both installers above each other");
            }

            if forward == Comparison::StrongPositive {
                debug!(
                    better = %describe(first),
                    worse = %describe(second),
                    comparator = comparator.name(),
                    "strong preference"
                );
                return true;
            }
            if reverse == Comparison::StrongPositive {
                debug!(
                    better = %describe(second),
                    worse = %describe(first),
                    comparator = comparator.name(),
                    "strong preference"
                );
                return false;
            }

            if first_weak.is_none() {
                if forward == Comparison::WeakPositive {
                    first_weak = Some((comparator.name(), true));
                } else if reverse == Comparison::WeakPositive {
                    first_weak = Some((comparator.name(), false));
                }
            }
        }

        if let Some((name, first_wins)) = first_weak {
            debug!(comparator = name, first_wins, "weak preference");
            return first_wins;
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_core::{AppsAndFeaturesEntry, Channel, PackageIdentifier};

    fn system_x64() -> SystemContext {
        SystemContext::new(
            Version::parse("10.0.22000"),
            Architecture::X64,
            "US",
            vec!["en-US".to_string()],
        )
    }

    fn installer(architecture: Architecture) -> Installer {
        Installer {
            architecture,
            base_installer_type: InstallerType::Msi,
            ..Installer::default()
        }
    }

    fn manifest(installers: Vec<Installer>) -> Manifest {
        Manifest {
            id: PackageIdentifier::new("Contoso.Widget").expect("valid id"),
            version: Version::parse("1.0"),
            channel: Channel::default(),
            name: "Widget".to_string(),
            publisher: "Contoso".to_string(),
            moniker: None,
            tags: Vec::new(),
            locale: String::new(),
            dependencies: Vec::new(),
            installers,
        }
    }

    fn comparator(options: &InstallerSelectionOptions) -> ManifestComparator {
        ManifestComparator::new(options, &UserSettings::default(), &system_x64())
    }

    #[test]
    fn caller_architecture_preference_wins_strongly() {
        // Allowed [arm64, Unknown] on an x64 machine with the
        // applicability check skipped: arm64 leads the allowed list and
        // the Unknown fall-through admits the system architectures.
        let options = InstallerSelectionOptions {
            allowed_architectures: vec![Architecture::Arm64, Architecture::Unknown],
            skip_applicability_check: true,
            ..InstallerSelectionOptions::default()
        };
        let pipeline = comparator(&options);
        let manifest = manifest(vec![
            installer(Architecture::X64),
            installer(Architecture::X86),
            installer(Architecture::Arm64),
        ]);

        let outcome = pipeline.select(&manifest);
        let selected = outcome.installer.expect("an installer should be selected");
        assert_eq!(selected.architecture, Architecture::Arm64);
        assert!(outcome.inapplicabilities.is_empty());
    }

    #[test]
    fn unmet_locale_requirement_rejects_every_installer() {
        let options = InstallerSelectionOptions {
            requested_installer_locale: Some("fr-FR".to_string()),
            ..InstallerSelectionOptions::default()
        };
        let pipeline = comparator(&options);
        let mut en = installer(Architecture::X64);
        en.locale = "en-US".to_string();
        let mut de = installer(Architecture::X64);
        de.locale = "de-DE".to_string();
        let manifest = manifest(vec![en, de]);

        let outcome = pipeline.select(&manifest);
        assert!(outcome.installer.is_none());
        assert_eq!(outcome.inapplicabilities.len(), 2);
        for reasons in outcome.inapplicabilities {
            assert!(reasons.contains(Inapplicability::LOCALE));
        }
    }

    #[test]
    fn native_architecture_beats_emulated() {
        let pipeline = comparator(&InstallerSelectionOptions::default());
        let manifest = manifest(vec![
            installer(Architecture::X86),
            installer(Architecture::X64),
        ]);

        let outcome = pipeline.select(&manifest);
        assert_eq!(
            outcome.installer.expect("selection expected").architecture,
            Architecture::X64
        );
    }

    #[test]
    fn inapplicable_architecture_is_flagged() {
        let pipeline = comparator(&InstallerSelectionOptions::default());
        let manifest = manifest(vec![installer(Architecture::Arm64)]);

        let outcome = pipeline.select(&manifest);
        assert!(outcome.installer.is_none());
        assert_eq!(outcome.inapplicabilities.len(), 1);
        assert!(outcome.inapplicabilities[0].contains(Inapplicability::MACHINE_ARCHITECTURE));
    }

    #[test]
    fn min_os_version_filters() {
        let pipeline = comparator(&InstallerSelectionOptions::default());
        let mut future = installer(Architecture::X64);
        future.min_os_version = Some(Version::parse("10.0.99999"));
        let manifest = manifest(vec![future]);

        let outcome = pipeline.select(&manifest);
        assert!(outcome.installer.is_none());
        assert!(outcome.inapplicabilities[0].contains(Inapplicability::OS_VERSION));
    }

    #[test]
    fn portable_needs_the_os_floor() {
        let old_system = SystemContext::new(
            Version::parse("10.0.17763"),
            Architecture::X64,
            "US",
            Vec::new(),
        );
        let pipeline = ManifestComparator::new(
            &InstallerSelectionOptions::default(),
            &UserSettings::default(),
            &old_system,
        );
        let mut portable = installer(Architecture::X64);
        portable.base_installer_type = InstallerType::Portable;

        let reasons = pipeline.applicability(&portable);
        assert!(reasons.contains(Inapplicability::OS_VERSION));
    }

    #[test]
    fn installed_scope_filters_but_unknown_and_agnostic_pass() {
        let options = InstallerSelectionOptions {
            currently_installed_scope: Some(Scope::Machine),
            ..InstallerSelectionOptions::default()
        };
        let pipeline = comparator(&options);

        let mut user_scoped = installer(Architecture::X64);
        user_scoped.scope = Scope::User;
        assert!(
            pipeline
                .applicability(&user_scoped)
                .contains(Inapplicability::INSTALLED_SCOPE)
        );

        let undeclared = installer(Architecture::X64);
        assert!(pipeline.applicability(&undeclared).is_none());

        let mut packaged = installer(Architecture::X64);
        packaged.scope = Scope::User;
        packaged.base_installer_type = InstallerType::Msix;
        assert!(pipeline.applicability(&packaged).is_none());
    }

    #[test]
    fn market_lists_filter_by_region() {
        let pipeline = comparator(&InstallerSelectionOptions::default());

        let mut allowed_elsewhere = installer(Architecture::X64);
        allowed_elsewhere.markets.allowed = vec!["DE".to_string(), "FR".to_string()];
        assert!(
            pipeline
                .applicability(&allowed_elsewhere)
                .contains(Inapplicability::MARKET)
        );

        let mut excluded_here = installer(Architecture::X64);
        excluded_here.markets.excluded = vec!["us".to_string()];
        assert!(
            pipeline
                .applicability(&excluded_here)
                .contains(Inapplicability::MARKET)
        );

        let mut allowed_here = installer(Architecture::X64);
        allowed_here.markets.allowed = vec!["US".to_string()];
        assert!(pipeline.applicability(&allowed_here).is_none());
    }

    #[test]
    fn installed_type_accepts_registration_overrides() {
        let options = InstallerSelectionOptions {
            currently_installed_type: Some(InstallerType::Msi),
            ..InstallerSelectionOptions::default()
        };
        let pipeline = comparator(&options);

        let mut incompatible = installer(Architecture::X64);
        incompatible.base_installer_type = InstallerType::Exe;
        assert!(
            pipeline
                .applicability(&incompatible)
                .contains(Inapplicability::INSTALLED_TYPE)
        );

        // The same executable qualifies when one of its registrations
        // declares a compatible technology.
        incompatible.apps_and_features_entries = vec![AppsAndFeaturesEntry {
            installer_type: Some(InstallerType::Wix),
            ..AppsAndFeaturesEntry::default()
        }];
        let reasons = pipeline.applicability(&incompatible);
        assert!(!reasons.contains(Inapplicability::INSTALLED_TYPE));
    }

    #[test]
    fn requested_scope_prefers_required_over_unknown_when_allowed() {
        let options = InstallerSelectionOptions {
            requested_installer_scope: Some(Scope::Machine),
            allow_unknown_scope: Some(true),
            ..InstallerSelectionOptions::default()
        };
        let pipeline = comparator(&options);

        let mut machine_scoped = installer(Architecture::X64);
        machine_scoped.scope = Scope::Machine;
        let undeclared = installer(Architecture::X64);

        assert!(pipeline.applicability(&undeclared).is_none());
        assert!(pipeline.is_first_better(&machine_scoped, &undeclared));
        assert!(!pipeline.is_first_better(&undeclared, &machine_scoped));
    }

    #[test]
    fn installed_locale_keeps_compatible_and_undeclared_installers() {
        let options = InstallerSelectionOptions {
            currently_installed_locale: Some("en-US".to_string()),
            ..InstallerSelectionOptions::default()
        };
        let pipeline = comparator(&options);

        let mut british = installer(Architecture::X64);
        british.locale = "en-GB".to_string();
        assert!(pipeline.applicability(&british).is_none());

        let undeclared = installer(Architecture::X64);
        assert!(pipeline.applicability(&undeclared).is_none());

        let mut german = installer(Architecture::X64);
        german.locale = "de-DE".to_string();
        assert!(
            pipeline
                .applicability(&german)
                .contains(Inapplicability::INSTALLED_LOCALE)
        );
    }

    #[test]
    fn undeclared_locale_beats_clearly_wrong_locale() {
        let mut settings = UserSettings::default();
        settings.preferences.locales = vec!["fr-FR".to_string()];
        let pipeline = ManifestComparator::new(
            &InstallerSelectionOptions::default(),
            &settings,
            &system_x64(),
        );

        let undeclared = installer(Architecture::X64);
        let mut wrong = installer(Architecture::X64);
        wrong.locale = "ja-JP".to_string();

        assert!(pipeline.is_first_better(&undeclared, &wrong));
        assert!(!pipeline.is_first_better(&wrong, &undeclared));
    }

    #[test]
    fn compatible_locale_beats_undeclared_strongly() {
        let mut settings = UserSettings::default();
        settings.preferences.locales = vec!["en-US".to_string()];
        let pipeline = ManifestComparator::new(
            &InstallerSelectionOptions::default(),
            &settings,
            &system_x64(),
        );

        let mut english = installer(Architecture::X64);
        english.locale = "en-US".to_string();
        let undeclared = installer(Architecture::X64);

        assert!(pipeline.is_first_better(&english, &undeclared));
    }

    #[test]
    fn installer_type_preference_breaks_ties_weakly() {
        let mut settings = UserSettings::default();
        settings.preferences.installer_types = vec![InstallerType::Msix];
        let pipeline = ManifestComparator::new(
            &InstallerSelectionOptions::default(),
            &settings,
            &system_x64(),
        );

        let mut packaged = installer(Architecture::X64);
        packaged.base_installer_type = InstallerType::Msix;
        let plain = installer(Architecture::X64);

        assert!(pipeline.is_first_better(&packaged, &plain));
        assert!(!pipeline.is_first_better(&plain, &packaged));
    }

    #[test]
    fn requested_installer_type_is_a_hard_requirement() {
        let options = InstallerSelectionOptions {
            requested_installer_type: Some(InstallerType::Msix),
            ..InstallerSelectionOptions::default()
        };
        let pipeline = comparator(&options);
        let manifest = manifest(vec![installer(Architecture::X64)]);

        let outcome = pipeline.select(&manifest);
        assert!(outcome.installer.is_none());
        assert!(outcome.inapplicabilities[0].contains(Inapplicability::INSTALLER_TYPE));
    }

    #[test]
    fn comparison_is_asymmetric_across_candidates() {
        let mut settings = UserSettings::default();
        settings.preferences.locales = vec!["en-US".to_string()];
        settings.preferences.installer_types = vec![InstallerType::Msi];
        let pipeline = ManifestComparator::new(
            &InstallerSelectionOptions::default(),
            &settings,
            &system_x64(),
        );

        let mut candidates = vec![
            installer(Architecture::X64),
            installer(Architecture::X86),
            installer(Architecture::Neutral),
        ];
        candidates[0].locale = "en-GB".to_string();
        candidates[1].locale = "en-US".to_string();
        candidates[2].base_installer_type = InstallerType::Exe;

        for a in &candidates {
            for b in &candidates {
                let forward = pipeline.is_first_better(a, b);
                let reverse = pipeline.is_first_better(b, a);
                assert!(!(forward && reverse), "ordering must be asymmetric");
            }
        }
    }

    #[test]
    fn equivalent_installers_keep_manifest_order() {
        let pipeline = comparator(&InstallerSelectionOptions::default());
        let first = installer(Architecture::X64);
        let second = installer(Architecture::X64);

        assert!(!pipeline.is_first_better(&first, &second));
        assert!(!pipeline.is_first_better(&second, &first));

        let mut left = installer(Architecture::X64);
        left.product_code = Some("first".to_string());
        let mut right = installer(Architecture::X64);
        right.product_code = Some("second".to_string());
        let outcome = pipeline.select(&manifest(vec![left, right]));
        assert_eq!(
            outcome.installer.expect("selection expected").product_code,
            Some("first".to_string())
        );
    }
}
