//! Case-insensitive identifiers and the name normalisation rule.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Compares two strings by Unicode-lowercased characters without allocating.
fn folded_cmp(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
}

/// The unique identifier of a package within a source.
///
/// Identifiers are compared, ordered, and hashed case-insensitively while
/// preserving the original spelling for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageIdentifier(String);

impl PackageIdentifier {
    /// Construct an identifier, rejecting empty input.
    ///
    /// # Errors
    ///
    /// Returns an error if the identifier is empty or whitespace only.
    pub fn new(value: impl Into<String>) -> CoreResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(CoreError::EmptyPackageIdentifier);
        }
        Ok(Self(value))
    }

    /// View the identifier as it was originally spelled.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The lowercase form used as a lookup key.
    #[must_use]
    pub fn folded(&self) -> String {
        self.0.to_lowercase()
    }
}

impl fmt::Display for PackageIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq for PackageIdentifier {
    fn eq(&self, other: &Self) -> bool {
        folded_cmp(&self.0, &other.0) == Ordering::Equal
    }
}

impl Eq for PackageIdentifier {}

impl PartialOrd for PackageIdentifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageIdentifier {
    fn cmp(&self, other: &Self) -> Ordering {
        folded_cmp(&self.0, &other.0)
    }
}

impl Hash for PackageIdentifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for c in self.0.chars().flat_map(char::to_lowercase) {
            c.hash(state);
        }
    }
}

/// An optional release-track label partitioning the versions of a package.
///
/// The empty channel is the default track. Channels compare
/// case-insensitively.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Channel(String);

impl Channel {
    /// Construct a channel label; empty means the default track.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// View the channel label.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the default (unnamed) track.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq for Channel {
    fn eq(&self, other: &Self) -> bool {
        folded_cmp(&self.0, &other.0) == Ordering::Equal
    }
}

impl Eq for Channel {}

impl PartialOrd for Channel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Channel {
    fn cmp(&self, other: &Self) -> Ordering {
        folded_cmp(&self.0, &other.0)
    }
}

impl Hash for Channel {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for c in self.0.chars().flat_map(char::to_lowercase) {
            c.hash(state);
        }
    }
}

/// The normalised form of a package name and publisher.
///
/// This is the rule the index uses for fuzzy matching and for keying
/// dependency edges: lowercase, trivial accent folding, and removal of all
/// non-alphanumeric characters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NormalizedName {
    name: String,
    publisher: String,
}

impl NormalizedName {
    /// Normalise a name/publisher pair.
    #[must_use]
    pub fn new(name: &str, publisher: &str) -> Self {
        Self {
            name: normalize_field(name),
            publisher: normalize_field(publisher),
        }
    }

    /// The normalised package name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The normalised publisher.
    #[must_use]
    pub fn publisher(&self) -> &str {
        &self.publisher
    }
}

impl fmt::Display for NormalizedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.publisher, self.name)
    }
}

/// Folds a value for fuzzy comparison: lowercase, trivial accent folding,
/// and collapse of whitespace runs to a single space.
#[must_use]
pub fn fold_for_match(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    let mut pending_space = false;
    for c in value.trim().chars().flat_map(char::to_lowercase) {
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && !result.is_empty() {
            result.push(' ');
        }
        pending_space = false;
        result.push(fold_accent(c).unwrap_or(c));
    }
    result
}

/// Applies the shared normalisation rule to a single field.
#[must_use]
pub(crate) fn normalize_field(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars().flat_map(char::to_lowercase) {
        match fold_accent(c) {
            Some(ascii) => result.push(ascii),
            None => {
                if c.is_alphanumeric() {
                    result.push(c);
                }
            }
        }
    }
    result
}

/// Folds the common Latin-1 accented letters to ASCII.
const fn fold_accent(c: char) -> Option<char> {
    Some(match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'ç' => 'c',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'ñ' => 'n',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' => 'o',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'ý' | 'ÿ' => 'y',
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_compare_case_insensitively() -> anyhow::Result<()> {
        let a = PackageIdentifier::new("Contoso.Widget")?;
        let b = PackageIdentifier::new("contoso.widget")?;
        assert_eq!(a, b);
        assert_eq!(a.cmp(&b), Ordering::Equal);
        assert_eq!(a.as_str(), "Contoso.Widget");
        Ok(())
    }

    #[test]
    fn empty_identifier_is_rejected() {
        assert!(matches!(
            PackageIdentifier::new("   "),
            Err(CoreError::EmptyPackageIdentifier)
        ));
    }

    #[test]
    fn default_channel_is_empty() {
        let channel = Channel::default();
        assert!(channel.is_default());
        assert_eq!(channel, Channel::new(""));
    }

    #[test]
    fn normalisation_strips_punctuation_and_accents() {
        let normalized = NormalizedName::new("Crème Brûlée 2.0!", "Pâtisserie, Inc.");
        assert_eq!(normalized.name(), "cremebrulee20");
        assert_eq!(normalized.publisher(), "patisserieinc");
    }

    #[test]
    fn fold_for_match_collapses_whitespace() {
        assert_eq!(fold_for_match("  Visual   Studio\tCode "), "visual studio code");
        assert_eq!(fold_for_match("Café"), "cafe");
    }

    #[test]
    fn normalisation_is_idempotent() {
        let once = normalize_field("Fancy App (x64)");
        let twice = normalize_field(&once);
        assert_eq!(once, twice);
    }
}
