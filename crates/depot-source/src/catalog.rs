//! Catalogs: searchable views over package sources.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use depot_core::{InstallerType, Scope, Version, VersionAndChannel};
use depot_index::{
    FilterClause, IndexStore, MatchCriteria, MatchType, PackageMatchField, PackageVersionProperty,
    SearchRequest, value_matches,
};

use crate::details::{SourceDetails, SourceOrigin};
use crate::error::SourceResult;

/// A package installed on this machine, as reported by the installed-state
/// collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstalledPackage {
    /// Package identifier, when the install is correlated to a source.
    pub id: Option<String>,
    /// Display name from the installed registration.
    pub name: String,
    /// Installed version.
    pub version: String,
    /// Product codes registered by the install.
    pub product_codes: Vec<String>,
    /// Package family names registered by the install.
    pub package_family_names: Vec<String>,
    /// Technology the package was installed with.
    pub installer_type: InstallerType,
    /// Scope the package was installed under.
    pub scope: Scope,
    /// Locale the package was installed in, when recorded.
    pub locale: Option<String>,
}

/// One logical package surfaced by a catalog search: the available view,
/// and the installed view when a composite catalog correlated one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageEntry {
    /// Package identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Available versions, newest first. Empty for installed-only entries.
    pub versions: Vec<VersionAndChannel>,
    /// Package family names across available versions.
    pub package_family_names: Vec<String>,
    /// Product codes across available versions.
    pub product_codes: Vec<String>,
    /// The correlated installed state, when any.
    pub installed: Option<InstalledPackage>,
}

/// One search match, stamped with the source it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultMatch {
    /// The matched package.
    pub package: PackageEntry,
    /// Why it matched.
    pub criteria: MatchCriteria,
    /// Name of the source that produced the match.
    pub source_name: String,
}

/// The result of a catalog search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResult {
    /// The matches, ordered by match quality for aggregated catalogs.
    pub matches: Vec<ResultMatch>,
    /// Whether the result was cut at the requested maximum.
    pub truncated: bool,
}

/// A connected, searchable package source.
#[async_trait]
pub trait PackageCatalog: Send + Sync {
    /// The details of the source behind this catalog.
    fn details(&self) -> &SourceDetails;

    /// Execute a search against this catalog.
    async fn search(&self, request: &SearchRequest) -> SourceResult<SearchResult>;
}

/// Catalog over a materialised index.
pub struct IndexCatalog {
    details: SourceDetails,
    store: Arc<IndexStore>,
}

impl IndexCatalog {
    /// Wrap an opened index store.
    #[must_use]
    pub const fn new(details: SourceDetails, store: Arc<IndexStore>) -> Self {
        Self { details, store }
    }

    fn entry_for(&self, package_row: i64) -> SourceResult<PackageEntry> {
        let keys = self.store.get_version_keys_by_id(package_row)?;
        let mut entry = PackageEntry::default();
        if let Some(latest) = keys.first() {
            entry.id = self
                .store
                .get_property_by_primary_id(latest.manifest_id, PackageVersionProperty::Id)?
                .unwrap_or_default();
            entry.name = self
                .store
                .get_property_by_primary_id(latest.manifest_id, PackageVersionProperty::Name)?
                .unwrap_or_default();
        }
        for key in &keys {
            for pfn in self.store.get_multi_property_by_primary_id(
                key.manifest_id,
                depot_index::PackageVersionMultiProperty::PackageFamilyName,
            )? {
                if !entry.package_family_names.contains(&pfn) {
                    entry.package_family_names.push(pfn);
                }
            }
            for code in self.store.get_multi_property_by_primary_id(
                key.manifest_id,
                depot_index::PackageVersionMultiProperty::ProductCode,
            )? {
                if !entry.product_codes.contains(&code) {
                    entry.product_codes.push(code);
                }
            }
        }
        entry.versions = keys.into_iter().map(|key| key.key).collect();
        Ok(entry)
    }
}

#[async_trait]
impl PackageCatalog for IndexCatalog {
    fn details(&self) -> &SourceDetails {
        &self.details
    }

    async fn search(&self, request: &SearchRequest) -> SourceResult<SearchResult> {
        let raw = self.store.search(request)?;
        let mut matches = Vec::with_capacity(raw.matches.len());
        for raw_match in raw.matches {
            matches.push(ResultMatch {
                package: self.entry_for(raw_match.package_row)?,
                criteria: raw_match.criteria,
                source_name: self.details.name.clone(),
            });
        }
        Ok(SearchResult {
            matches,
            truncated: raw.truncated,
        })
    }
}

/// Collaborator supplying the machine's installed packages.
pub trait InstalledProvider: Send + Sync {
    /// Enumerate the currently installed packages.
    fn installed_packages(&self) -> Vec<InstalledPackage>;
}

/// The implicit catalog over installed packages.
pub struct InstalledCatalog {
    details: SourceDetails,
    packages: Vec<InstalledPackage>,
}

impl InstalledCatalog {
    /// Snapshot the provider's installed set.
    #[must_use]
    pub fn new(provider: &dyn InstalledProvider) -> Self {
        Self {
            details: SourceDetails {
                name: "installed".to_string(),
                source_type: "depot.installed".to_string(),
                arg: String::new(),
                data: String::new(),
                identifier: "Depot.Installed".to_string(),
                origin: SourceOrigin::Default,
                last_update_time: None,
            },
            packages: provider.installed_packages(),
        }
    }

    fn package_matches(
        package: &InstalledPackage,
        request: &SearchRequest,
    ) -> SourceResult<Option<MatchCriteria>> {
        let field_values = |field: PackageMatchField| -> Vec<&str> {
            match field {
                PackageMatchField::Id => {
                    package.id.as_deref().map(|id| vec![id]).unwrap_or_default()
                }
                PackageMatchField::Name => vec![package.name.as_str()],
                PackageMatchField::ProductCode => {
                    package.product_codes.iter().map(String::as_str).collect()
                }
                PackageMatchField::PackageFamilyName => package
                    .package_family_names
                    .iter()
                    .map(String::as_str)
                    .collect(),
                PackageMatchField::Moniker
                | PackageMatchField::Command
                | PackageMatchField::Tag => Vec::new(),
            }
        };

        let mut criteria: Option<MatchCriteria> = None;
        if let Some(query) = &request.query {
            let mut hit = None;
            for field in PackageMatchField::QUERY_FIELDS {
                if field_values(field)
                    .iter()
                    .map(|value| value_matches(query.match_type, &query.value, value))
                    .collect::<Result<Vec<_>, _>>()?
                    .into_iter()
                    .any(|matched| matched)
                {
                    hit = Some(MatchCriteria {
                        field,
                        match_type: query.match_type,
                        value: query.value.clone(),
                    });
                    break;
                }
            }
            match hit {
                Some(hit) => criteria = Some(hit),
                None => return Ok(None),
            }
        }

        for filter in &request.filters {
            let mut found = false;
            for value in field_values(filter.field) {
                if value_matches(filter.match_type, &filter.value, value)? {
                    found = true;
                    break;
                }
            }
            if !found {
                return Ok(None);
            }
            if criteria.is_none() {
                criteria = Some(MatchCriteria {
                    field: filter.field,
                    match_type: filter.match_type,
                    value: filter.value.clone(),
                });
            }
        }

        Ok(Some(criteria.unwrap_or(MatchCriteria {
            field: PackageMatchField::Id,
            match_type: MatchType::Wildcard,
            value: "*".to_string(),
        })))
    }
}

#[async_trait]
impl PackageCatalog for InstalledCatalog {
    fn details(&self) -> &SourceDetails {
        &self.details
    }

    async fn search(&self, request: &SearchRequest) -> SourceResult<SearchResult> {
        let mut matches = Vec::new();
        for package in &self.packages {
            if let Some(criteria) = Self::package_matches(package, request)? {
                matches.push(ResultMatch {
                    package: PackageEntry {
                        id: package.id.clone().unwrap_or_default(),
                        name: package.name.clone(),
                        versions: Vec::new(),
                        package_family_names: package.package_family_names.clone(),
                        product_codes: package.product_codes.clone(),
                        installed: Some(package.clone()),
                    },
                    criteria,
                    source_name: self.details.name.clone(),
                });
            }
        }

        let mut truncated = false;
        if request.maximum_results > 0 && matches.len() > request.maximum_results {
            matches.truncate(request.maximum_results);
            truncated = true;
        }
        Ok(SearchResult { matches, truncated })
    }
}

/// Stable sort of matches by match quality: match type first, then field,
/// ties keep insertion order.
pub(crate) fn sort_result_matches(matches: &mut [ResultMatch]) {
    matches.sort_by(|a, b| {
        a.criteria
            .match_type
            .cmp(&b.criteria.match_type)
            .then(a.criteria.field.cmp(&b.criteria.field))
    });
}

/// A catalog fanning a search out over several child catalogs.
pub struct AggregatedCatalog {
    details: SourceDetails,
    sources: Vec<Arc<dyn PackageCatalog>>,
}

impl AggregatedCatalog {
    /// Aggregate the given child catalogs.
    #[must_use]
    pub fn new(sources: Vec<Arc<dyn PackageCatalog>>) -> Self {
        Self {
            details: SourceDetails {
                name: "aggregated".to_string(),
                source_type: "depot.aggregated".to_string(),
                arg: String::new(),
                data: String::new(),
                identifier: "Depot.Aggregated".to_string(),
                origin: SourceOrigin::Default,
                last_update_time: None,
            },
            sources,
        }
    }
}

#[async_trait]
impl PackageCatalog for AggregatedCatalog {
    fn details(&self) -> &SourceDetails {
        &self.details
    }

    async fn search(&self, request: &SearchRequest) -> SourceResult<SearchResult> {
        let mut matches = Vec::new();
        for source in &self.sources {
            let child_result = source.search(request).await?;
            let source_name = source.details().name.clone();
            for mut entry in child_result.matches {
                entry.source_name = source_name.clone();
                matches.push(entry);
            }
        }

        sort_result_matches(&mut matches);

        let mut truncated = false;
        if request.maximum_results > 0 && matches.len() > request.maximum_results {
            matches.truncate(request.maximum_results);
            truncated = true;
        }
        debug!(matches = matches.len(), truncated, "aggregated search finished");
        Ok(SearchResult { matches, truncated })
    }
}

/// Which catalogs a composite search consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeSearchBehavior {
    /// Installed packages only, enriched with available data.
    LocalCatalogs,
    /// Available and installed packages.
    AllCatalogs,
}

/// A catalog joining an available (remote) catalog with the installed
/// catalog, correlating entries by product code, then package family
/// name, then identifier.
pub struct CompositeCatalog {
    details: SourceDetails,
    available: Arc<dyn PackageCatalog>,
    installed: Arc<dyn PackageCatalog>,
    behavior: CompositeSearchBehavior,
}

impl CompositeCatalog {
    /// Join an available catalog with the installed catalog.
    #[must_use]
    pub fn new(
        available: Arc<dyn PackageCatalog>,
        installed: Arc<dyn PackageCatalog>,
        behavior: CompositeSearchBehavior,
    ) -> Self {
        Self {
            details: SourceDetails {
                name: "composite".to_string(),
                source_type: "depot.composite".to_string(),
                arg: String::new(),
                data: String::new(),
                identifier: "Depot.Composite".to_string(),
                origin: SourceOrigin::Default,
                last_update_time: None,
            },
            available,
            installed,
            behavior,
        }
    }

    /// Locate the available-side entry correlated with an installed
    /// package: product code first, then package family name, then the
    /// identifier.
    async fn correlate(&self, installed: &InstalledPackage) -> SourceResult<Option<PackageEntry>> {
        for code in &installed.product_codes {
            if let Some(entry) = self
                .available_lookup(PackageMatchField::ProductCode, MatchType::CaseInsensitive, code)
                .await?
            {
                return Ok(Some(entry));
            }
        }
        for pfn in &installed.package_family_names {
            if let Some(entry) = self
                .available_lookup(
                    PackageMatchField::PackageFamilyName,
                    MatchType::CaseInsensitive,
                    pfn,
                )
                .await?
            {
                return Ok(Some(entry));
            }
        }
        if let Some(id) = &installed.id
            && let Some(entry) = self
                .available_lookup(PackageMatchField::Id, MatchType::CaseInsensitive, id)
                .await?
        {
            return Ok(Some(entry));
        }
        Ok(None)
    }

    async fn available_lookup(
        &self,
        field: PackageMatchField,
        match_type: MatchType,
        value: &str,
    ) -> SourceResult<Option<PackageEntry>> {
        let request = SearchRequest {
            filters: vec![FilterClause::new(field, match_type, value)],
            maximum_results: 1,
            ..SearchRequest::default()
        };
        let mut result = self.available.search(&request).await?;
        if result.matches.is_empty() {
            Ok(None)
        } else {
            Ok(Some(result.matches.remove(0).package))
        }
    }
}

#[async_trait]
impl PackageCatalog for CompositeCatalog {
    fn details(&self) -> &SourceDetails {
        &self.details
    }

    async fn search(&self, request: &SearchRequest) -> SourceResult<SearchResult> {
        let installed_result = self.installed.search(request).await?;
        let mut matches: Vec<ResultMatch> = Vec::new();

        for entry in installed_result.matches {
            let Some(installed) = entry.package.installed.clone() else {
                warn!("installed catalog produced an entry without installed state");
                continue;
            };
            let joined = match self.correlate(&installed).await? {
                Some(mut available_entry) => {
                    available_entry.installed = Some(installed);
                    available_entry
                }
                None => entry.package,
            };
            matches.push(ResultMatch {
                package: joined,
                criteria: entry.criteria,
                source_name: self.details.name.clone(),
            });
        }

        if self.behavior == CompositeSearchBehavior::AllCatalogs {
            let available_result = self.available.search(request).await?;
            for entry in available_result.matches {
                let already_joined = matches.iter().any(|existing| {
                    existing.package.id.eq_ignore_ascii_case(&entry.package.id)
                });
                if !already_joined {
                    matches.push(ResultMatch {
                        package: entry.package,
                        criteria: entry.criteria,
                        source_name: self.details.name.clone(),
                    });
                }
            }
        }

        let mut truncated = false;
        if request.maximum_results > 0 && matches.len() > request.maximum_results {
            matches.truncate(request.maximum_results);
            truncated = true;
        }
        Ok(SearchResult { matches, truncated })
    }
}

/// Parse the installed version of an entry, for callers comparing against
/// available versions.
#[must_use]
pub fn installed_version(entry: &PackageEntry) -> Option<Version> {
    entry
        .installed
        .as_ref()
        .map(|installed| Version::parse(&installed.version))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str) -> PackageEntry {
        PackageEntry {
            id: name.to_string(),
            name: name.to_string(),
            ..PackageEntry::default()
        }
    }

    fn result_match(
        name: &str,
        field: PackageMatchField,
        match_type: MatchType,
    ) -> ResultMatch {
        ResultMatch {
            package: entry(name),
            criteria: MatchCriteria {
                field,
                match_type,
                value: name.to_string(),
            },
            source_name: "test".to_string(),
        }
    }

    #[test]
    fn matches_sort_by_match_type_then_field() {
        let mut matches = vec![
            result_match("wildcard", PackageMatchField::Id, MatchType::Wildcard),
            result_match("tag-exact", PackageMatchField::Tag, MatchType::Exact),
            result_match("id-exact", PackageMatchField::Id, MatchType::Exact),
            result_match("substring", PackageMatchField::Name, MatchType::Substring),
            result_match("ci", PackageMatchField::Moniker, MatchType::CaseInsensitive),
        ];

        sort_result_matches(&mut matches);

        let order: Vec<&str> = matches.iter().map(|m| m.package.id.as_str()).collect();
        assert_eq!(order, vec!["id-exact", "tag-exact", "ci", "substring", "wildcard"]);
    }

    #[test]
    fn equal_criteria_keep_insertion_order() {
        let mut matches = vec![
            result_match("first", PackageMatchField::Name, MatchType::Substring),
            result_match("second", PackageMatchField::Name, MatchType::Substring),
        ];
        sort_result_matches(&mut matches);
        assert_eq!(matches[0].package.id, "first");
        assert_eq!(matches[1].package.id, "second");
    }

    #[test]
    fn installed_version_parses_from_installed_state() {
        let mut package = entry("Contoso.Widget");
        assert!(installed_version(&package).is_none());

        package.installed = Some(InstalledPackage {
            version: "1.2.3".to_string(),
            ..InstalledPackage::default()
        });
        assert_eq!(installed_version(&package), Some(Version::parse("1.2.3")));
    }
}
