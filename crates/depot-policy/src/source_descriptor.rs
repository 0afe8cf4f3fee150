//! Source descriptors injected through policy.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// A package source configured by the administrator through policy.
///
/// Each descriptor is a JSON object with five required string members. A
/// descriptor that is missing a member or carries a wrong-typed member is
/// rejected as a whole, but does not invalidate the surrounding list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct SourceFromPolicy {
    /// Display name of the source.
    pub name: String,
    /// Factory type the source is created with.
    #[serde(rename = "Type")]
    pub source_type: String,
    /// Argument handed to the factory (usually a URL).
    pub arg: String,
    /// Extra data blob interpreted by the factory.
    pub data: String,
    /// Stable identifier of the source.
    pub identifier: String,
}

impl SourceFromPolicy {
    /// Parse a descriptor from its JSON payload. Returns `None` (with a
    /// warning log) for payloads that do not satisfy the schema.
    #[must_use]
    pub fn from_json(payload: &str) -> Option<Self> {
        match serde_json::from_str::<Self>(payload) {
            Ok(source) => Some(source),
            Err(error) => {
                warn!(%error, "discarding policy source descriptor with invalid payload");
                None
            }
        }
    }

    /// Serialise the descriptor back to its canonical JSON payload.
    ///
    /// # Panics
    ///
    /// Never panics: the descriptor contains only string members.
    #[must_use]
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).expect("descriptor serialisation cannot fail")
    }
}
