//! The immutable policy snapshot and its typed queries.

use std::collections::BTreeMap;
use std::fmt;

use tracing::warn;

use crate::source_descriptor::SourceFromPolicy;
use crate::store::PolicyStore;

/// The three-valued configuration state of a toggle policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyState {
    /// No value is present in the store.
    NotConfigured,
    /// The policy is configured on.
    Enabled,
    /// The policy is configured off.
    Disabled,
}

/// Machine toggle policies recognised by the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TogglePolicy {
    /// Disables the package manager entirely.
    DisablePackageManager,
    /// Disables the settings surface.
    DisableSettingsCommand,
    /// Disables experimental features.
    DisableExperimentalFeatures,
    /// Disables installing from local manifest files.
    DisableLocalManifestFiles,
    /// Permits overriding installer hash mismatches.
    EnableHashOverride,
    /// Removes the built-in default source.
    ExcludeDefaultSources,
    /// Removes the built-in store source.
    ExcludeStoreSource,
    /// Disables user source add/update/remove.
    DisableSourceConfiguration,
    /// Restricts user sources to an administrator allow-list.
    AllowedSources,
    /// Injects administrator-defined sources.
    AdditionalSources,
}

impl TogglePolicy {
    /// Every toggle policy, in declaration order.
    pub const ALL: [Self; 10] = [
        Self::DisablePackageManager,
        Self::DisableSettingsCommand,
        Self::DisableExperimentalFeatures,
        Self::DisableLocalManifestFiles,
        Self::EnableHashOverride,
        Self::ExcludeDefaultSources,
        Self::ExcludeStoreSource,
        Self::DisableSourceConfiguration,
        Self::AllowedSources,
        Self::AdditionalSources,
    ];

    /// The value name the policy is stored under.
    #[must_use]
    pub const fn value_name(self) -> &'static str {
        match self {
            Self::DisablePackageManager => "DisablePackageManager",
            Self::DisableSettingsCommand => "DisableSettingsCommand",
            Self::DisableExperimentalFeatures => "DisableExperimentalFeatures",
            Self::DisableLocalManifestFiles => "DisableLocalManifestFiles",
            Self::EnableHashOverride => "EnableHashOverride",
            Self::ExcludeDefaultSources => "ExcludeDefaultSources",
            Self::ExcludeStoreSource => "ExcludeStoreSource",
            Self::DisableSourceConfiguration => "DisableSourceConfiguration",
            Self::AllowedSources => "AllowedSources",
            Self::AdditionalSources => "AdditionalSources",
        }
    }

    /// Whether the policy counts as in effect when not configured.
    #[must_use]
    pub const fn default_is_enabled(self) -> bool {
        // Every recognised policy is opt-in: absent means not in effect.
        false
    }
}

impl fmt::Display for TogglePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.value_name())
    }
}

/// Security zones recognised by the zone allow-list policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SecurityZone {
    /// Content on the local machine.
    LocalMachine,
    /// Content on the local intranet.
    Intranet,
    /// Explicitly trusted sites.
    TrustedSites,
    /// The open internet.
    Internet,
    /// Explicitly distrusted sites.
    UntrustedSites,
}

impl SecurityZone {
    /// Parse a zone from its stored name, case-insensitively.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let folded = text.trim().to_lowercase();
        match folded.as_str() {
            "localmachine" => Some(Self::LocalMachine),
            "intranet" => Some(Self::Intranet),
            "trustedsites" => Some(Self::TrustedSites),
            "internet" => Some(Self::Internet),
            "untrustedsites" => Some(Self::UntrustedSites),
            _ => None,
        }
    }
}

/// Snapshot of every value policy, read once at gate construction.
#[derive(Debug, Clone, Default)]
struct ValuePolicyValues {
    source_auto_update_interval: Option<u32>,
    additional_sources: Option<Vec<SourceFromPolicy>>,
    allowed_sources: Option<Vec<SourceFromPolicy>>,
    allowed_security_zones: Option<BTreeMap<SecurityZone, bool>>,
}

/// A typed value policy readable through [`PolicyGate::value`].
pub trait ValuePolicy {
    /// The value type the policy yields.
    type Value: Clone;

    #[doc(hidden)]
    fn extract(values: &PolicyGate) -> Option<Self::Value>;
}

/// The source auto-update interval, in minutes.
pub struct SourceAutoUpdateIntervalMinutes;

impl ValuePolicy for SourceAutoUpdateIntervalMinutes {
    type Value = u32;

    fn extract(gate: &PolicyGate) -> Option<u32> {
        gate.values.source_auto_update_interval
    }
}

/// Administrator-injected sources, present for every user.
pub struct AdditionalSources;

impl ValuePolicy for AdditionalSources {
    type Value = Vec<SourceFromPolicy>;

    fn extract(gate: &PolicyGate) -> Option<Vec<SourceFromPolicy>> {
        gate.values.additional_sources.clone()
    }
}

/// The allow-list restricting which sources users may add.
pub struct AllowedSources;

impl ValuePolicy for AllowedSources {
    type Value = Vec<SourceFromPolicy>;

    fn extract(gate: &PolicyGate) -> Option<Vec<SourceFromPolicy>> {
        gate.values.allowed_sources.clone()
    }
}

/// Per-zone permissions for content origins.
pub struct AllowedSecurityZones;

impl ValuePolicy for AllowedSecurityZones {
    type Value = BTreeMap<SecurityZone, bool>;

    fn extract(gate: &PolicyGate) -> Option<BTreeMap<SecurityZone, bool>> {
        gate.values.allowed_security_zones.clone()
    }
}

/// Immutable snapshot of machine policy.
///
/// Constructed once from a [`PolicyStore`] and passed by handle; consulted
/// synchronously by every mutating operation in the workspace.
#[derive(Debug, Clone)]
pub struct PolicyGate {
    toggles: BTreeMap<TogglePolicy, PolicyState>,
    values: ValuePolicyValues,
}

impl PolicyGate {
    /// Snapshot the given store.
    #[must_use]
    pub fn from_store(store: &dyn PolicyStore) -> Self {
        let mut toggles = BTreeMap::new();
        for policy in TogglePolicy::ALL {
            toggles.insert(policy, read_toggle(store, policy));
        }

        let values = ValuePolicyValues {
            source_auto_update_interval: read_interval(store),
            additional_sources: read_source_list(store, TogglePolicy::AdditionalSources.value_name()),
            allowed_sources: read_source_list(store, TogglePolicy::AllowedSources.value_name()),
            allowed_security_zones: read_zones(store),
        };

        Self { toggles, values }
    }

    /// A gate with nothing configured; every toggle reads back its default.
    #[must_use]
    pub fn not_configured() -> Self {
        Self {
            toggles: TogglePolicy::ALL
                .into_iter()
                .map(|policy| (policy, PolicyState::NotConfigured))
                .collect(),
            values: ValuePolicyValues::default(),
        }
    }

    /// The raw three-valued state of a toggle policy.
    #[must_use]
    pub fn state(&self, policy: TogglePolicy) -> PolicyState {
        self.toggles
            .get(&policy)
            .copied()
            .unwrap_or(PolicyState::NotConfigured)
    }

    /// Whether a toggle policy is in effect: configured on, or not
    /// configured with an enabled default.
    #[must_use]
    pub fn is_enabled(&self, policy: TogglePolicy) -> bool {
        match self.state(policy) {
            PolicyState::Enabled => true,
            PolicyState::Disabled => false,
            PolicyState::NotConfigured => policy.default_is_enabled(),
        }
    }

    /// Read a typed value policy; `None` when absent or malformed.
    #[must_use]
    pub fn value<P: ValuePolicy>(&self) -> Option<P::Value> {
        P::extract(self)
    }
}

fn read_toggle(store: &dyn PolicyStore, policy: TogglePolicy) -> PolicyState {
    match store.integer(policy.value_name()) {
        None => PolicyState::NotConfigured,
        Some(0) => PolicyState::Disabled,
        Some(_) => PolicyState::Enabled,
    }
}

fn read_interval(store: &dyn PolicyStore) -> Option<u32> {
    let raw = store.integer("SourceAutoUpdateIntervalInMinutes")?;
    match u32::try_from(raw) {
        Ok(minutes) => Some(minutes),
        Err(_) => {
            warn!(value = raw, "source auto-update interval is out of range");
            None
        }
    }
}

fn read_source_list(store: &dyn PolicyStore, subkey: &str) -> Option<Vec<SourceFromPolicy>> {
    let payloads = store.string_list(subkey)?;
    Some(
        payloads
            .iter()
            .filter_map(|payload| SourceFromPolicy::from_json(payload))
            .collect(),
    )
}

fn read_zones(store: &dyn PolicyStore) -> Option<BTreeMap<SecurityZone, bool>> {
    let payloads = store.string_list("AllowedSecurityZones")?;
    let mut zones = BTreeMap::new();
    for payload in payloads {
        match serde_json::from_str::<serde_json::Value>(&payload) {
            Ok(value) => {
                let zone = value
                    .get("Zone")
                    .and_then(serde_json::Value::as_str)
                    .and_then(SecurityZone::parse);
                let allowed = value.get("Allowed").and_then(serde_json::Value::as_bool);
                if let (Some(zone), Some(allowed)) = (zone, allowed) {
                    zones.insert(zone, allowed);
                } else {
                    warn!("discarding security-zone entry with invalid payload");
                }
            }
            Err(error) => {
                warn!(%error, "discarding security-zone entry that is not JSON");
            }
        }
    }
    Some(zones)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryPolicyStore;

    #[test]
    fn absent_toggle_is_not_configured() {
        let gate = PolicyGate::from_store(&MemoryPolicyStore::new());
        assert_eq!(
            gate.state(TogglePolicy::DisableSourceConfiguration),
            PolicyState::NotConfigured
        );
        assert!(!gate.is_enabled(TogglePolicy::DisableSourceConfiguration));
    }

    #[test]
    fn integer_value_maps_to_state() {
        let store = MemoryPolicyStore::new()
            .with_integer("DisableSourceConfiguration", 1)
            .with_integer("DisableLocalManifestFiles", 0);
        let gate = PolicyGate::from_store(&store);

        assert_eq!(
            gate.state(TogglePolicy::DisableSourceConfiguration),
            PolicyState::Enabled
        );
        assert!(gate.is_enabled(TogglePolicy::DisableSourceConfiguration));
        assert_eq!(
            gate.state(TogglePolicy::DisableLocalManifestFiles),
            PolicyState::Disabled
        );
        assert!(!gate.is_enabled(TogglePolicy::DisableLocalManifestFiles));
    }

    #[test]
    fn state_and_enablement_are_consistent_for_all_policies() {
        let mut store = MemoryPolicyStore::new();
        for (index, policy) in TogglePolicy::ALL.into_iter().enumerate() {
            store = store.with_integer(policy.value_name(), i64::from(index % 2 == 0));
        }
        let gate = PolicyGate::from_store(&store);

        for policy in TogglePolicy::ALL {
            match gate.state(policy) {
                PolicyState::Enabled => assert!(gate.is_enabled(policy)),
                PolicyState::Disabled => assert!(!gate.is_enabled(policy)),
                PolicyState::NotConfigured => {
                    assert_eq!(gate.is_enabled(policy), policy.default_is_enabled());
                }
            }
        }
    }

    #[test]
    fn invalid_source_entries_are_dropped_individually() {
        let good = SourceFromPolicy {
            name: "corp".to_string(),
            source_type: "depot.preindexed".to_string(),
            arg: "https://packages.corp.example/".to_string(),
            data: String::new(),
            identifier: "corp-main".to_string(),
        };
        let store = MemoryPolicyStore::new().with_list(
            "AdditionalSources",
            [
                good.to_json_string(),
                r#"{"Name":"broken"}"#.to_string(),
                "not json".to_string(),
            ],
        );
        let gate = PolicyGate::from_store(&store);

        let sources = gate.value::<AdditionalSources>().expect("list expected");
        assert_eq!(sources, vec![good]);
    }

    #[test]
    fn interval_out_of_range_reads_as_absent() {
        let store = MemoryPolicyStore::new().with_integer("SourceAutoUpdateIntervalInMinutes", -5);
        let gate = PolicyGate::from_store(&store);
        assert_eq!(gate.value::<SourceAutoUpdateIntervalMinutes>(), None);
    }

    #[test]
    fn security_zones_parse_and_filter() {
        let store = MemoryPolicyStore::new().with_list(
            "AllowedSecurityZones",
            [
                r#"{"Zone":"Internet","Allowed":false}"#,
                r#"{"Zone":"Intranet","Allowed":true}"#,
                r#"{"Zone":"Nowhere","Allowed":true}"#,
            ],
        );
        let gate = PolicyGate::from_store(&store);

        let zones = gate.value::<AllowedSecurityZones>().expect("zones expected");
        assert_eq!(zones.get(&SecurityZone::Internet), Some(&false));
        assert_eq!(zones.get(&SecurityZone::Intranet), Some(&true));
        assert_eq!(zones.len(), 2);
    }

    #[test]
    fn alternative_gate_replaces_production_snapshot() {
        let production = PolicyGate::not_configured();
        let test_gate = PolicyGate::from_store(
            &MemoryPolicyStore::new().with_integer("DisablePackageManager", 1),
        );

        assert!(!production.is_enabled(TogglePolicy::DisablePackageManager));
        assert!(test_gate.is_enabled(TogglePolicy::DisablePackageManager));
    }
}
