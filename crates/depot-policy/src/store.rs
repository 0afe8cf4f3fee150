//! Read-only views over the machine policy store.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;
use tracing::warn;

/// A read-only hierarchical key/value view of machine policy.
///
/// The store has one level of named values plus one level of sub-keys whose
/// child value *names* are irrelevant; only the payloads matter. A failed or
/// malformed read surfaces as `None` (with a log line from the concrete
/// store), never as an error.
pub trait PolicyStore: Send + Sync {
    /// Read an integer value by name.
    fn integer(&self, name: &str) -> Option<i64>;

    /// Read a string value by name.
    fn string(&self, name: &str) -> Option<String>;

    /// Read all child value payloads of a sub-key, in stored order.
    /// Returns `None` when the sub-key does not exist.
    fn string_list(&self, subkey: &str) -> Option<Vec<String>>;
}

/// Map-backed store used by tests and as the alternative-handle hook.
#[derive(Debug, Clone, Default)]
pub struct MemoryPolicyStore {
    integers: BTreeMap<String, i64>,
    strings: BTreeMap<String, String>,
    lists: BTreeMap<String, Vec<String>>,
}

impl MemoryPolicyStore {
    /// An empty store: every policy reads as not configured.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an integer value.
    #[must_use]
    pub fn with_integer(mut self, name: impl Into<String>, value: i64) -> Self {
        self.integers.insert(name.into(), value);
        self
    }

    /// Set a string value.
    #[must_use]
    pub fn with_string(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.strings.insert(name.into(), value.into());
        self
    }

    /// Set the child payloads of a sub-key.
    #[must_use]
    pub fn with_list<I, S>(mut self, subkey: impl Into<String>, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lists
            .insert(subkey.into(), items.into_iter().map(Into::into).collect());
        self
    }
}

impl PolicyStore for MemoryPolicyStore {
    fn integer(&self, name: &str) -> Option<i64> {
        self.integers.get(name).copied()
    }

    fn string(&self, name: &str) -> Option<String> {
        self.strings.get(name).cloned()
    }

    fn string_list(&self, subkey: &str) -> Option<Vec<String>> {
        self.lists.get(subkey).cloned()
    }
}

/// Production store reading a single machine-policies JSON document.
///
/// The document root is an object; scalar members are values, object
/// members are sub-keys whose child payloads are re-serialised to strings.
/// A missing or malformed document yields an empty store.
#[derive(Debug, Clone, Default)]
pub struct JsonPolicyStore {
    root: BTreeMap<String, Value>,
}

impl JsonPolicyStore {
    /// Load the policy document at `path`. Never fails: unreadable or
    /// malformed content is logged and treated as no policy configured.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(error) => {
                if error.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), %error, "failed to read policy document");
                }
                return Self::default();
            }
        };

        Self::from_document(&text)
    }

    /// Parse a policy document from text, with the same tolerance as
    /// [`Self::load`].
    #[must_use]
    pub fn from_document(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Self {
                root: map.into_iter().collect(),
            },
            Ok(_) => {
                warn!("policy document root is not an object");
                Self::default()
            }
            Err(error) => {
                warn!(%error, "policy document is not valid JSON");
                Self::default()
            }
        }
    }
}

impl PolicyStore for JsonPolicyStore {
    fn integer(&self, name: &str) -> Option<i64> {
        match self.root.get(name) {
            Some(Value::Number(number)) => {
                let value = number.as_i64();
                if value.is_none() {
                    warn!(policy = name, "policy value is not an integer");
                }
                value
            }
            Some(Value::Bool(flag)) => Some(i64::from(*flag)),
            Some(_) => {
                warn!(policy = name, "policy value does not have the expected type");
                None
            }
            None => None,
        }
    }

    fn string(&self, name: &str) -> Option<String> {
        match self.root.get(name) {
            Some(Value::String(text)) => Some(text.clone()),
            Some(_) => {
                warn!(policy = name, "policy value does not have the expected type");
                None
            }
            None => None,
        }
    }

    fn string_list(&self, subkey: &str) -> Option<Vec<String>> {
        match self.root.get(subkey) {
            Some(Value::Object(children)) => Some(
                children
                    .iter()
                    .map(|(_, child)| match child {
                        Value::String(text) => text.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
            ),
            Some(_) => {
                warn!(policy = subkey, "policy sub-key does not have the expected shape");
                None
            }
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trips() {
        let store = MemoryPolicyStore::new()
            .with_integer("DisableSourceConfiguration", 1)
            .with_list("AdditionalSources", ["{}"]);

        assert_eq!(store.integer("DisableSourceConfiguration"), Some(1));
        assert_eq!(store.integer("Missing"), None);
        assert_eq!(store.string_list("AdditionalSources"), Some(vec!["{}".to_string()]));
    }

    #[test]
    fn json_store_reads_scalars_and_subkeys() {
        let store = JsonPolicyStore::from_document(
            r#"{
                "SourceAutoUpdateIntervalInMinutes": 15,
                "DisableSourceConfiguration": 1,
                "AdditionalSources": {
                    "any-name": {"Name": "corp"},
                    "other": "literal"
                }
            }"#,
        );

        assert_eq!(store.integer("SourceAutoUpdateIntervalInMinutes"), Some(15));
        assert_eq!(store.integer("DisableSourceConfiguration"), Some(1));
        let list = store.string_list("AdditionalSources").expect("sub-key expected");
        assert_eq!(list.len(), 2);
        assert!(list.iter().any(|item| item.contains("corp")));
        assert!(list.contains(&"literal".to_string()));
    }

    #[test]
    fn malformed_document_reads_as_empty() {
        let store = JsonPolicyStore::from_document("not json at all {");
        assert_eq!(store.integer("Anything"), None);
        assert_eq!(store.string_list("Anything"), None);
    }

    #[test]
    fn non_object_root_reads_as_empty() {
        let store = JsonPolicyStore::from_document("[1, 2, 3]");
        assert_eq!(store.integer("Anything"), None);
    }
}
