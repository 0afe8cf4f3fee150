//! Structured search requests and the match evaluator.

use std::fmt;

use globset::GlobBuilder;
use serde::{Deserialize, Serialize};

use depot_core::fold_for_match;

use crate::error::{IndexError, IndexResult};

/// How a value is compared against a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MatchType {
    /// Byte-equal.
    Exact,
    /// Unicode case-folded equal.
    CaseInsensitive,
    /// Case-insensitive prefix.
    StartsWith,
    /// Equal after normalisation (accent folding, whitespace collapse).
    Fuzzy,
    /// Case-insensitive contains.
    Substring,
    /// Contains after normalisation.
    FuzzySubstring,
    /// Glob with `*` and `?`.
    Wildcard,
}

impl MatchType {
    /// Render the canonical name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::CaseInsensitive => "case-insensitive",
            Self::StartsWith => "starts-with",
            Self::Fuzzy => "fuzzy",
            Self::Substring => "substring",
            Self::FuzzySubstring => "fuzzy-substring",
            Self::Wildcard => "wildcard",
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The manifest field a clause applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PackageMatchField {
    /// Package identifier.
    Id,
    /// Display name.
    Name,
    /// Moniker.
    Moniker,
    /// Command made available by an installer.
    Command,
    /// Search tag.
    Tag,
    /// Package family name.
    PackageFamilyName,
    /// Product code.
    ProductCode,
}

impl PackageMatchField {
    /// The default field set a free-text query is applied across, in
    /// precedence order.
    pub const QUERY_FIELDS: [Self; 7] = [
        Self::Id,
        Self::Name,
        Self::Moniker,
        Self::Tag,
        Self::Command,
        Self::PackageFamilyName,
        Self::ProductCode,
    ];

    /// Render the canonical name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Name => "name",
            Self::Moniker => "moniker",
            Self::Command => "command",
            Self::Tag => "tag",
            Self::PackageFamilyName => "package-family-name",
            Self::ProductCode => "product-code",
        }
    }
}

impl fmt::Display for PackageMatchField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A free-text query applied across the default field set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryClause {
    /// Text to match.
    pub value: String,
    /// How to match it.
    pub match_type: MatchType,
}

impl QueryClause {
    /// Construct a query clause.
    #[must_use]
    pub fn new(value: impl Into<String>, match_type: MatchType) -> Self {
        Self {
            value: value.into(),
            match_type,
        }
    }
}

/// A single field filter; all filters in a request are ANDed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterClause {
    /// Field the filter applies to.
    pub field: PackageMatchField,
    /// How to match.
    pub match_type: MatchType,
    /// Text to match.
    pub value: String,
}

impl FilterClause {
    /// Construct a filter clause.
    #[must_use]
    pub fn new(field: PackageMatchField, match_type: MatchType, value: impl Into<String>) -> Self {
        Self {
            field,
            match_type,
            value: value.into(),
        }
    }
}

/// A search request against an index or a catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Optional free-text query, ORed across the default field set.
    pub query: Option<QueryClause>,
    /// Field filters, ANDed together.
    pub filters: Vec<FilterClause>,
    /// Maximum number of results; `0` means unbounded.
    pub maximum_results: usize,
}

impl SearchRequest {
    /// A request matching everything.
    #[must_use]
    pub fn everything() -> Self {
        Self::default()
    }

    /// Whether the request carries no constraints at all.
    #[must_use]
    pub fn is_unconstrained(&self) -> bool {
        self.query.is_none() && self.filters.is_empty()
    }
}

impl fmt::Display for SearchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(query) = &self.query {
            write!(f, "'{}'[{}]", query.value, query.match_type)?;
        }
        for filter in &self.filters {
            write!(f, " {}='{}'[{}]", filter.field, filter.value, filter.match_type)?;
        }
        write!(f, " max={}", self.maximum_results)
    }
}

/// Why a package matched: the field, the match type, and the value that hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchCriteria {
    /// Field that matched.
    pub field: PackageMatchField,
    /// Match type of the clause that hit.
    pub match_type: MatchType,
    /// The clause value.
    pub value: String,
}

/// One package matched by an index search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexResultMatch {
    /// Row of the matched package.
    pub package_row: i64,
    /// Why the package matched.
    pub criteria: MatchCriteria,
}

/// The result of an index search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexSearchResult {
    /// Matched packages, de-duplicated by package row.
    pub matches: Vec<IndexResultMatch>,
    /// Whether the result was cut at the requested maximum.
    pub truncated: bool,
}

/// Evaluate one clause value against one candidate field value.
///
/// # Errors
///
/// Returns an error if a wildcard pattern fails to compile.
pub fn value_matches(match_type: MatchType, clause: &str, candidate: &str) -> IndexResult<bool> {
    Ok(match match_type {
        MatchType::Exact => clause == candidate,
        MatchType::CaseInsensitive => clause.to_lowercase() == candidate.to_lowercase(),
        MatchType::StartsWith => candidate.to_lowercase().starts_with(&clause.to_lowercase()),
        MatchType::Fuzzy => fold_for_match(clause) == fold_for_match(candidate),
        MatchType::Substring => candidate.to_lowercase().contains(&clause.to_lowercase()),
        MatchType::FuzzySubstring => fold_for_match(candidate).contains(&fold_for_match(clause)),
        MatchType::Wildcard => {
            let glob = GlobBuilder::new(clause)
                .case_insensitive(true)
                .literal_separator(false)
                .build()
                .map_err(|source| IndexError::InvalidWildcard {
                    pattern: clause.to_string(),
                    source,
                })?;
            glob.compile_matcher().is_match(candidate)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(match_type: MatchType, clause: &str, candidate: &str) -> bool {
        value_matches(match_type, clause, candidate).expect("pattern should compile")
    }

    #[test]
    fn exact_is_byte_equal() {
        assert!(matches(MatchType::Exact, "Contoso.Widget", "Contoso.Widget"));
        assert!(!matches(MatchType::Exact, "contoso.widget", "Contoso.Widget"));
    }

    #[test]
    fn case_insensitive_folds_unicode() {
        assert!(matches(MatchType::CaseInsensitive, "WIDGET", "widget"));
        assert!(matches(MatchType::CaseInsensitive, "STRASSE", "strasse"));
    }

    #[test]
    fn starts_with_ignores_case() {
        assert!(matches(MatchType::StartsWith, "conto", "Contoso.Widget"));
        assert!(!matches(MatchType::StartsWith, "widget", "Contoso.Widget"));
    }

    #[test]
    fn fuzzy_folds_accents_and_whitespace() {
        assert!(matches(MatchType::Fuzzy, "visual  studio", "Visual Studio"));
        assert!(matches(MatchType::Fuzzy, "cafe", "Café"));
        assert!(!matches(MatchType::Fuzzy, "cafe", "Cafeteria"));
    }

    #[test]
    fn substring_variants_contain() {
        assert!(matches(MatchType::Substring, "widg", "Contoso.Widget"));
        assert!(matches(MatchType::FuzzySubstring, "cafe", "Le Café de Paris"));
    }

    #[test]
    fn wildcard_supports_star_and_question() {
        assert!(matches(MatchType::Wildcard, "Contoso.*", "contoso.widget"));
        assert!(matches(MatchType::Wildcard, "C?ntoso.Widget", "Contoso.Widget"));
        assert!(!matches(MatchType::Wildcard, "Fabrikam.*", "Contoso.Widget"));
    }

    #[test]
    fn invalid_wildcard_reports_error() {
        assert!(matches!(
            value_matches(MatchType::Wildcard, "a[", "anything"),
            Err(IndexError::InvalidWildcard { .. })
        ));
    }
}
