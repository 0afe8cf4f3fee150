//! Version parsing, ordering, and version ranges.

use std::cmp::Ordering;
use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{CoreError, CoreResult};
use crate::identifier::Channel;

/// A package version.
///
/// Versions are dotted numeric components, each with an optional trailing
/// non-numeric suffix. Ordering compares components numerically with the
/// suffix as tiebreaker; a component with a suffix orders before the same
/// numeric value without one (`1.0-rc < 1.0`). The empty version and the
/// literal `Latest` order above every concrete version, and `Unknown`
/// orders below every concrete version.
#[derive(Debug, Clone)]
pub struct Version {
    raw: String,
    parts: Vec<VersionPart>,
    special: Option<Special>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Special {
    Latest,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct VersionPart {
    number: u64,
    trailer: String,
}

impl VersionPart {
    const ZERO: Self = Self {
        number: 0,
        trailer: String::new(),
    };

    fn parse(text: &str) -> Self {
        let text = text.trim();
        let digits: String = text.chars().take_while(char::is_ascii_digit).collect();
        let number = digits.parse::<u64>().unwrap_or(0);
        let trailer = text[digits.len()..].to_string();
        Self { number, trailer }
    }
}

impl PartialOrd for VersionPart {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VersionPart {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.number.cmp(&other.number) {
            Ordering::Equal => match (self.trailer.is_empty(), other.trailer.is_empty()) {
                (true, true) => Ordering::Equal,
                // A bare numeric component orders above the same value with a trailer.
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => {
                    let a = self.trailer.to_lowercase();
                    let b = other.trailer.to_lowercase();
                    a.cmp(&b)
                }
            },
            other => other,
        }
    }
}

impl Version {
    /// Parse a version from its textual form.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        let special = if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("latest") {
            Some(Special::Latest)
        } else if trimmed.eq_ignore_ascii_case("unknown") {
            Some(Special::Unknown)
        } else {
            None
        };

        let parts = if special.is_some() {
            Vec::new()
        } else {
            trimmed.split('.').map(VersionPart::parse).collect()
        };

        Self {
            raw: text.to_string(),
            parts,
            special,
        }
    }

    /// The original text of the version.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether this version orders above every concrete version.
    #[must_use]
    pub fn is_latest(&self) -> bool {
        self.special == Some(Special::Latest)
    }

    /// Whether this version orders below every concrete version.
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        self.special == Some(Special::Unknown)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<&str> for Version {
    fn from(text: &str) -> Self {
        Self::parse(text)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.special, other.special) {
            (Some(a), Some(b)) if a == b => return Ordering::Equal,
            (Some(Special::Latest), _) => return Ordering::Greater,
            (_, Some(Special::Latest)) => return Ordering::Less,
            (Some(Special::Unknown), _) => return Ordering::Less,
            (_, Some(Special::Unknown)) => return Ordering::Greater,
            (None, None) => {}
        }

        let default = VersionPart::ZERO;
        let len = self.parts.len().max(other.parts.len());
        for i in 0..len {
            let a = self.parts.get(i).unwrap_or(&default);
            let b = other.parts.get(i).unwrap_or(&default);
            match a.cmp(b) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        if text.len() > 1024 {
            return Err(D::Error::custom("version text too long"));
        }
        Ok(Self::parse(&text))
    }
}

/// A closed interval of versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRange {
    min: Version,
    max: Version,
}

impl VersionRange {
    /// Construct a range, rejecting inverted intervals.
    ///
    /// # Errors
    ///
    /// Returns an error if `min` orders above `max`.
    pub fn new(min: Version, max: Version) -> CoreResult<Self> {
        if min > max {
            return Err(CoreError::InvalidVersionRange {
                min: min.as_str().to_string(),
                max: max.as_str().to_string(),
            });
        }
        Ok(Self { min, max })
    }

    /// The inclusive lower bound.
    #[must_use]
    pub const fn min(&self) -> &Version {
        &self.min
    }

    /// The inclusive upper bound.
    #[must_use]
    pub const fn max(&self) -> &Version {
        &self.max
    }

    /// Whether two closed intervals share at least one version.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        !(self.max < other.min || other.max < self.min)
    }

    /// Whether a version falls inside the interval.
    #[must_use]
    pub fn contains(&self, version: &Version) -> bool {
        &self.min <= version && version <= &self.max
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

/// The version key of a manifest: a version within a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionAndChannel {
    /// Version component of the key.
    pub version: Version,
    /// Channel component of the key.
    pub channel: Channel,
}

impl VersionAndChannel {
    /// Construct a version key.
    #[must_use]
    pub const fn new(version: Version, channel: Channel) -> Self {
        Self { version, channel }
    }

    /// Whether two keys have byte-equal raw version and channel text.
    ///
    /// Ordering treats `1.0` and `1.0.0` as equal; raw equality does not,
    /// which matters when excluding a manifest from its own validation.
    #[must_use]
    pub fn raw_eq(&self, other: &Self) -> bool {
        self.version.as_str() == other.version.as_str()
            && self.channel.as_str() == other.channel.as_str()
    }
}

impl fmt::Display for VersionAndChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.channel.is_default() {
            write!(f, "{}", self.version)
        } else {
            write!(f, "{} ({})", self.version, self.channel)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(text: &str) -> Version {
        Version::parse(text)
    }

    #[test]
    fn numeric_components_compare_numerically() {
        assert!(v("1.10.0") > v("1.9.0"));
        assert!(v("2.0") > v("1.99.99"));
        assert_eq!(v("1.0"), v("1.0.0"));
    }

    #[test]
    fn suffixed_component_orders_below_bare_component() {
        assert!(v("1.0-rc1") < v("1.0"));
        assert!(v("1.0-alpha") < v("1.0-beta"));
        assert!(v("13.9.8") > v("13.9.8-beta"));
    }

    #[test]
    fn empty_and_latest_order_above_everything() {
        assert!(v("") > v("999999.0"));
        assert!(v("Latest") > v("1.0"));
        assert_eq!(v(""), v("latest"));
    }

    #[test]
    fn unknown_orders_below_everything() {
        assert!(v("Unknown") < v("0.0.1"));
        assert!(v("unknown") < v(""));
    }

    #[test]
    fn range_rejects_inverted_bounds() {
        assert!(VersionRange::new(v("2.0"), v("1.0")).is_err());
    }

    #[test]
    fn range_overlap_is_closed_interval() -> anyhow::Result<()> {
        let a = VersionRange::new(v("1.0"), v("2.0"))?;
        let b = VersionRange::new(v("2.0"), v("3.0"))?;
        let c = VersionRange::new(v("2.1"), v("3.0"))?;
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));
        Ok(())
    }

    #[test]
    fn raw_equality_distinguishes_equivalent_spellings() {
        let a = VersionAndChannel::new(v("1.0"), Channel::default());
        let b = VersionAndChannel::new(v("1.0.0"), Channel::default());
        assert_eq!(a, b);
        assert!(!a.raw_eq(&b));
    }

    #[test]
    fn serde_round_trip_preserves_raw_text() -> anyhow::Result<()> {
        let version = v("1.2.3-beta");
        let json = serde_json::to_string(&version)?;
        let back: Version = serde_json::from_str(&json)?;
        assert_eq!(back.as_str(), "1.2.3-beta");
        Ok(())
    }
}
