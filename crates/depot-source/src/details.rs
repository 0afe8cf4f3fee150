//! Source descriptions and per-source metadata.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use depot_policy::SourceFromPolicy;

/// Where a listed source came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceOrigin {
    /// Shipped with the product.
    Default,
    /// Added by the user.
    User,
    /// Injected by administrator policy.
    Policy,
}

/// Description of one configured package source.
///
/// Registry callers receive immutable snapshots; the registry owns the
/// persisted records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SourceDetails {
    /// Display name, unique within the user's registry.
    pub name: String,
    /// Factory type the source is handled by.
    #[serde(rename = "Type")]
    pub source_type: String,
    /// Argument handed to the factory (usually a URL).
    pub arg: String,
    /// Extra data blob interpreted by the factory.
    #[serde(default)]
    pub data: String,
    /// Stable identifier; survives renames and keys on-disk state.
    #[serde(default)]
    pub identifier: String,
    /// Where the source came from.
    pub origin: SourceOrigin,
    /// When the source data was last fetched.
    #[serde(default)]
    pub last_update_time: Option<DateTime<Utc>>,
}

impl SourceDetails {
    /// A user-added source with the given name, type, and argument.
    #[must_use]
    pub fn user(
        name: impl Into<String>,
        source_type: impl Into<String>,
        arg: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source_type: source_type.into(),
            arg: arg.into(),
            data: String::new(),
            identifier: String::new(),
            origin: SourceOrigin::User,
            last_update_time: None,
        }
    }
}

impl From<SourceFromPolicy> for SourceDetails {
    fn from(source: SourceFromPolicy) -> Self {
        Self {
            name: source.name,
            source_type: source.source_type,
            arg: source.arg,
            data: source.data,
            identifier: source.identifier,
            origin: SourceOrigin::Policy,
            last_update_time: None,
        }
    }
}

/// Mutable per-source bookkeeping, keyed by identifier in the standard
/// metadata stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMetadata {
    /// When the source data was last refreshed.
    pub last_update_time: Option<DateTime<Utc>>,
    /// Whether the last background health check succeeded.
    pub last_check_succeeded: Option<bool>,
    /// Free-form tracking values owned by the factory.
    #[serde(default)]
    pub tracking: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_sources_serialise_with_stable_member_names() -> anyhow::Result<()> {
        let details = SourceDetails::user("corp", "depot.preindexed", "https://example.test/");
        let json = serde_json::to_string(&details)?;
        for member in ["\"Name\"", "\"Type\"", "\"Arg\"", "\"Data\"", "\"Identifier\""] {
            assert!(json.contains(member), "missing {member} in {json}");
        }
        let back: SourceDetails = serde_json::from_str(&json)?;
        assert_eq!(back, details);
        Ok(())
    }

    #[test]
    fn policy_descriptor_converts_to_details() {
        let policy_source = SourceFromPolicy {
            name: "corp".to_string(),
            source_type: "depot.preindexed".to_string(),
            arg: "https://packages.corp.example/".to_string(),
            data: String::new(),
            identifier: "corp-main".to_string(),
        };
        let details = SourceDetails::from(policy_source);
        assert_eq!(details.origin, SourceOrigin::Policy);
        assert_eq!(details.name, "corp");
        assert_eq!(details.identifier, "corp-main");
    }
}
