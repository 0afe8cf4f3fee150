//! BCP-47 language tags and the language-distance score.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Distance score at or above which two tags are a perfect match.
pub const PERFECT_MATCH_THRESHOLD: f64 = 1.0;

/// Distance score at or above which two tags are a compatible match.
pub const COMPATIBLE_MATCH_THRESHOLD: f64 = 0.9;

/// Score assigned to an installer whose locale is not declared.
///
/// Sits strictly between no-match and the compatible threshold so that an
/// undeclared locale loses to a compatible one but beats a clear mismatch.
pub const UNKNOWN_LANGUAGE_DISTANCE: f64 = 0.5;

/// A parsed BCP-47 language tag.
///
/// Only the language, script, and region subtags participate in distance
/// scoring; any further subtags are retained in the raw text but ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageTag {
    raw: String,
    language: String,
    script: Option<String>,
    region: Option<String>,
}

impl LanguageTag {
    /// Parse a tag. Returns `None` for input without a plausible primary
    /// language subtag.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let raw = text.trim();
        if raw.is_empty() {
            return None;
        }

        let mut subtags = raw.split('-');
        let language = subtags.next()?.to_lowercase();
        if language.len() < 2 || language.len() > 3 || !language.chars().all(|c| c.is_ascii_alphabetic()) {
            return None;
        }

        let mut script = None;
        let mut region = None;
        for subtag in subtags {
            if script.is_none()
                && region.is_none()
                && subtag.len() == 4
                && subtag.chars().all(|c| c.is_ascii_alphabetic())
            {
                let mut folded = subtag.to_lowercase();
                if let Some(first) = folded.get_mut(0..1) {
                    first.make_ascii_uppercase();
                }
                script = Some(folded);
            } else if region.is_none()
                && ((subtag.len() == 2 && subtag.chars().all(|c| c.is_ascii_alphabetic()))
                    || (subtag.len() == 3 && subtag.chars().all(|c| c.is_ascii_digit())))
            {
                region = Some(subtag.to_uppercase());
            } else {
                break;
            }
        }

        Some(Self {
            raw: raw.to_string(),
            language,
            script,
            region,
        })
    }

    /// The raw tag text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The lowercase primary language subtag.
    #[must_use]
    pub fn language(&self) -> &str {
        &self.language
    }
}

impl fmt::Display for LanguageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Score the closeness of two language tags in `[0.0, 1.0]`.
///
/// Unparseable input scores 0.0 against everything. The scoring is
/// structural: primary-language mismatch is no match at all, a script
/// mismatch is nearly as bad, and region differences keep the pair above
/// the compatible threshold.
#[must_use]
pub fn language_distance(wanted: &str, actual: &str) -> f64 {
    let (Some(wanted), Some(actual)) = (LanguageTag::parse(wanted), LanguageTag::parse(actual))
    else {
        return 0.0;
    };

    if wanted.language != actual.language {
        return 0.0;
    }

    if let (Some(a), Some(b)) = (&wanted.script, &actual.script)
        && a != b
    {
        return 0.2;
    }

    match (&wanted.region, &actual.region) {
        (Some(a), Some(b)) if a == b => 1.0,
        (None, None) => 1.0,
        (Some(_), Some(_)) => 0.91,
        _ => 0.95,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_tags_are_a_perfect_match() {
        assert!(language_distance("en-US", "en-us") >= PERFECT_MATCH_THRESHOLD);
        assert!(language_distance("zh-Hans-CN", "zh-hans-cn") >= PERFECT_MATCH_THRESHOLD);
    }

    #[test]
    fn different_regions_are_compatible() {
        let score = language_distance("en-US", "en-GB");
        assert!(score >= COMPATIBLE_MATCH_THRESHOLD);
        assert!(score < PERFECT_MATCH_THRESHOLD);
    }

    #[test]
    fn missing_region_is_compatible() {
        assert!(language_distance("en", "en-US") >= COMPATIBLE_MATCH_THRESHOLD);
    }

    #[test]
    fn different_languages_do_not_match() {
        assert!(language_distance("fr-FR", "en-US") <= f64::EPSILON);
        assert!(language_distance("fr-FR", "de-DE") <= f64::EPSILON);
    }

    #[test]
    fn different_scripts_are_incompatible() {
        let score = language_distance("zh-Hans", "zh-Hant");
        assert!(score < COMPATIBLE_MATCH_THRESHOLD);
        assert!(score > 0.0);
    }

    #[test]
    fn garbage_scores_zero() {
        assert!(language_distance("", "en-US") <= f64::EPSILON);
        assert!(language_distance("en-US", "123-not-a-tag") <= f64::EPSILON);
    }

    #[test]
    fn unknown_score_sits_between_thresholds() {
        assert!(UNKNOWN_LANGUAGE_DISTANCE > 0.0);
        assert!(UNKNOWN_LANGUAGE_DISTANCE < COMPATIBLE_MATCH_THRESHOLD);
    }

    #[test]
    fn parse_extracts_subtags() {
        let tag = LanguageTag::parse("sr-Latn-RS").expect("tag should parse");
        assert_eq!(tag.language(), "sr");
        assert_eq!(tag.as_str(), "sr-Latn-RS");
    }
}
