//! The durable source registry and its lifecycle engine.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use depot_policy::{AdditionalSources, AllowedSources, PolicyGate, TogglePolicy};
use depot_settings::{SOURCES_METADATA, SettingsRoot, USER_SOURCES};

use crate::catalog::{AggregatedCatalog, PackageCatalog};
use crate::details::{SourceDetails, SourceMetadata, SourceOrigin};
use crate::error::{SourceError, SourceResult};
use crate::factory::{PreIndexedFactory, RestFactory, SourceFactory};
use crate::progress::ProgressToken;

/// How many times a contended persist is retried before giving up.
const SAVE_ATTEMPTS: usize = 10;

/// Built-in default source, unless excluded by policy.
fn default_source() -> SourceDetails {
    SourceDetails {
        name: "depot".to_string(),
        source_type: PreIndexedFactory::TYPE.to_string(),
        arg: "https://cdn.depot.example/cache/".to_string(),
        data: String::new(),
        identifier: "Depot.Default".to_string(),
        origin: SourceOrigin::Default,
        last_update_time: None,
    }
}

/// Built-in storefront source, unless excluded by policy.
fn store_source() -> SourceDetails {
    SourceDetails {
        name: "storefront".to_string(),
        source_type: RestFactory::TYPE.to_string(),
        arg: "https://storefront.depot.example/api/".to_string(),
        data: String::new(),
        identifier: "Depot.Storefront".to_string(),
        origin: SourceOrigin::Default,
        last_update_time: None,
    }
}

/// The registry of configured sources.
///
/// Owns the persisted user source list (a secure stream), per-source
/// metadata (a standard stream), the registered type factories, and the
/// policy gate consulted by every mutation.
pub struct SourceRegistry {
    gate: PolicyGate,
    settings: SettingsRoot,
    factories: BTreeMap<String, Arc<dyn SourceFactory>>,
}

impl SourceRegistry {
    /// Create a registry over the given policy gate and state root.
    #[must_use]
    pub fn new(gate: PolicyGate, settings: SettingsRoot) -> Self {
        Self {
            gate,
            settings,
            factories: BTreeMap::new(),
        }
    }

    /// Register a factory for its source type.
    #[must_use]
    pub fn with_factory(mut self, factory: Arc<dyn SourceFactory>) -> Self {
        self.factories
            .insert(factory.source_type().to_string(), factory);
        self
    }

    fn factory_for(&self, source_type: &str) -> SourceResult<Arc<dyn SourceFactory>> {
        self.factories
            .get(source_type)
            .cloned()
            .ok_or_else(|| SourceError::UnknownSourceType {
                source_type: source_type.to_string(),
            })
    }

    /// Every visible source: policy-injected sources first, then user
    /// sources, then built-ins, with same-named user and built-in entries
    /// masked by the policy entry.
    ///
    /// # Errors
    ///
    /// Fails when the persisted source list cannot be read.
    pub fn list(&self) -> SourceResult<Vec<SourceDetails>> {
        let mut result: Vec<SourceDetails> = Vec::new();
        let push_unmasked = |details: SourceDetails, result: &mut Vec<SourceDetails>| {
            let masked = result
                .iter()
                .any(|existing| existing.name.eq_ignore_ascii_case(&details.name));
            if masked {
                debug!(name = %details.name, "source masked by an earlier entry");
            } else {
                result.push(details);
            }
        };

        if let Some(policy_sources) = self.gate.value::<AdditionalSources>() {
            for source in policy_sources {
                push_unmasked(SourceDetails::from(source), &mut result);
            }
        }

        for details in self.load_user_sources()? {
            push_unmasked(details, &mut result);
        }

        if !self.gate.is_enabled(TogglePolicy::ExcludeDefaultSources) {
            push_unmasked(default_source(), &mut result);
        }
        if !self.gate.is_enabled(TogglePolicy::ExcludeStoreSource) {
            push_unmasked(store_source(), &mut result);
        }

        Ok(result)
    }

    /// Add a new user source: gate on policy, fetch its data through the
    /// type factory, and persist it.
    ///
    /// # Errors
    ///
    /// Fails on policy blocks, name collisions, factory errors, or
    /// persistence errors. Partial on-disk state is rolled back.
    pub async fn add(
        &self,
        mut details: SourceDetails,
        progress: &ProgressToken,
    ) -> SourceResult<SourceDetails> {
        if details.name.trim().is_empty() {
            return Err(SourceError::InvalidDetails {
                field: "name",
                reason: "name must not be empty",
            });
        }
        if details.arg.trim().is_empty() {
            return Err(SourceError::InvalidDetails {
                field: "arg",
                reason: "argument must not be empty",
            });
        }

        self.require_source_configuration_allowed()?;
        self.require_allowed_by_policy(&details)?;

        let exists = self
            .list()?
            .iter()
            .any(|existing| existing.name.eq_ignore_ascii_case(&details.name));
        if exists {
            return Err(SourceError::SourceNameExists { name: details.name });
        }

        details.origin = SourceOrigin::User;
        let factory = self.factory_for(&details.source_type)?;
        factory.add(&mut details, progress).await?;

        if let Err(error) = self.persist_added(&details) {
            // The fetch succeeded but the record cannot be kept; undo the
            // on-disk state so nothing orphaned remains.
            warn!(name = %details.name, %error, "rolling back source after persist failure");
            if let Err(cleanup) = factory.remove(&details, progress).await {
                warn!(name = %details.name, %cleanup, "rollback cleanup failed");
            }
            return Err(error);
        }

        self.record_metadata(&details)?;
        info!(name = %details.name, identifier = %details.identifier, "source added");
        Ok(details)
    }

    /// Refresh a source's data through its factory.
    ///
    /// Returns whether anything changed.
    ///
    /// # Errors
    ///
    /// Fails for unknown names, policy-owned sources, factory errors, or
    /// persistence errors.
    pub async fn update(&self, name: &str, progress: &ProgressToken) -> SourceResult<bool> {
        let listed = self.find(name)?;
        if listed.origin == SourceOrigin::Policy {
            return Err(SourceError::PolicyBlocked {
                policy: TogglePolicy::AdditionalSources,
            });
        }

        let mut details = listed;
        let factory = self.factory_for(&details.source_type)?;
        let changed = factory.update(&mut details, progress).await?;
        if changed && details.origin == SourceOrigin::User {
            self.persist_replaced(&details)?;
        }
        if changed {
            self.record_metadata(&details)?;
        }
        info!(name = %details.name, changed, "source update finished");
        Ok(changed)
    }

    /// Remove a user source. Removing an unknown name succeeds.
    ///
    /// # Errors
    ///
    /// Fails on policy blocks, factory cleanup errors, or persistence
    /// errors.
    pub async fn remove(&self, name: &str, progress: &ProgressToken) -> SourceResult<()> {
        self.require_source_configuration_allowed()?;

        let Ok(details) = self.find(name) else {
            debug!(name, "source to remove does not exist");
            return Ok(());
        };
        if details.origin == SourceOrigin::Policy {
            return Err(SourceError::PolicyBlocked {
                policy: TogglePolicy::AdditionalSources,
            });
        }

        let factory = self.factory_for(&details.source_type)?;
        factory.remove(&details, progress).await?;

        if details.origin == SourceOrigin::User {
            self.persist_removed(&details.name)?;
        }
        self.drop_metadata(&details.identifier)?;
        info!(name = %details.name, "source removed");
        Ok(())
    }

    /// Open a reference to one source, or to the aggregate of all sources
    /// when `name` is empty.
    ///
    /// # Errors
    ///
    /// Fails for unknown names.
    pub fn open(&self, name: &str) -> SourceResult<CatalogReference> {
        if name.is_empty() {
            let mut children = Vec::new();
            for details in self.list()? {
                match self.factory_for(&details.source_type) {
                    Ok(factory) => children.push((details, factory)),
                    Err(_) => {
                        warn!(
                            name = %details.name,
                            source_type = %details.source_type,
                            "skipping source with no registered factory"
                        );
                    }
                }
            }
            return Ok(CatalogReference::Aggregated { children });
        }

        let details = self.find(name)?;
        let factory = self.factory_for(&details.source_type)?;
        Ok(CatalogReference::Single { details, factory })
    }

    /// The recorded metadata of a source, when any.
    ///
    /// # Errors
    ///
    /// Fails when the metadata stream cannot be read.
    pub fn metadata(&self, identifier: &str) -> SourceResult<Option<SourceMetadata>> {
        Ok(self.load_metadata()?.remove(identifier))
    }

    fn find(&self, name: &str) -> SourceResult<SourceDetails> {
        self.list()?
            .into_iter()
            .find(|details| details.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| SourceError::SourceNotFound {
                name: name.to_string(),
            })
    }

    fn require_source_configuration_allowed(&self) -> SourceResult<()> {
        if self.gate.is_enabled(TogglePolicy::DisableSourceConfiguration) {
            return Err(SourceError::PolicyBlocked {
                policy: TogglePolicy::DisableSourceConfiguration,
            });
        }
        Ok(())
    }

    fn require_allowed_by_policy(&self, details: &SourceDetails) -> SourceResult<()> {
        if !self.gate.is_enabled(TogglePolicy::AllowedSources) {
            return Ok(());
        }
        let allowed = self.gate.value::<AllowedSources>().unwrap_or_default();
        let permitted = allowed.iter().any(|entry| {
            entry.name.eq_ignore_ascii_case(&details.name)
                && entry.source_type == details.source_type
                && entry.arg == details.arg
        });
        if permitted {
            Ok(())
        } else {
            Err(SourceError::PolicyBlocked {
                policy: TogglePolicy::AllowedSources,
            })
        }
    }

    fn load_user_sources(&self) -> SourceResult<Vec<SourceDetails>> {
        let mut stream = self.settings.stream(USER_SOURCES)?;
        let Some(bytes) = stream.get()? else {
            return Ok(Vec::new());
        };
        match serde_json::from_slice::<Vec<SourceDetails>>(&bytes) {
            Ok(sources) => Ok(sources),
            Err(error) => {
                warn!(%error, "user source list is malformed; treating as empty");
                Ok(Vec::new())
            }
        }
    }

    /// Persist a mutation of the user source list, retrying a bounded
    /// number of times when another writer races this one.
    fn persist_user_sources(
        &self,
        mutate: impl Fn(Vec<SourceDetails>) -> Vec<SourceDetails>,
    ) -> SourceResult<()> {
        let mut stream = self.settings.stream(USER_SOURCES)?;
        for _ in 0..SAVE_ATTEMPTS {
            let current = match stream.get()? {
                Some(bytes) => serde_json::from_slice::<Vec<SourceDetails>>(&bytes)
                    .unwrap_or_else(|error| {
                        warn!(%error, "user source list is malformed; rewriting");
                        Vec::new()
                    }),
                None => Vec::new(),
            };

            let updated = mutate(current);
            let bytes =
                serde_json::to_vec_pretty(&updated).map_err(|source| SourceError::Serialize {
                    operation: "sources.persist",
                    source,
                })?;
            if stream.set(&bytes)? {
                return Ok(());
            }
            debug!("user source list changed concurrently; retrying");
        }
        Err(SourceError::TooManyAttempts {
            operation: "sources.persist",
        })
    }

    fn persist_added(&self, details: &SourceDetails) -> SourceResult<()> {
        let details = details.clone();
        self.persist_user_sources(move |mut sources| {
            sources.push(details.clone());
            sources
        })
    }

    fn persist_replaced(&self, details: &SourceDetails) -> SourceResult<()> {
        let details = details.clone();
        self.persist_user_sources(move |mut sources| {
            for slot in &mut sources {
                if slot.name.eq_ignore_ascii_case(&details.name) {
                    *slot = details.clone();
                }
            }
            sources
        })
    }

    fn persist_removed(&self, name: &str) -> SourceResult<()> {
        let name = name.to_string();
        self.persist_user_sources(move |mut sources| {
            sources.retain(|slot| !slot.name.eq_ignore_ascii_case(&name));
            sources
        })
    }

    fn load_metadata(&self) -> SourceResult<BTreeMap<String, SourceMetadata>> {
        let mut stream = self.settings.stream(SOURCES_METADATA)?;
        let Some(bytes) = stream.get()? else {
            return Ok(BTreeMap::new());
        };
        match serde_json::from_slice::<BTreeMap<String, SourceMetadata>>(&bytes) {
            Ok(metadata) => Ok(metadata),
            Err(error) => {
                warn!(%error, "source metadata is malformed; treating as empty");
                Ok(BTreeMap::new())
            }
        }
    }

    fn save_metadata(&self, metadata: &BTreeMap<String, SourceMetadata>) -> SourceResult<()> {
        let mut stream = self.settings.stream(SOURCES_METADATA)?;
        // Observe the current content so the optimistic write succeeds.
        let _: Option<Vec<u8>> = stream.get()?;
        let bytes = serde_json::to_vec_pretty(metadata).map_err(|source| SourceError::Serialize {
            operation: "sources.metadata",
            source,
        })?;
        if !stream.set(&bytes)? {
            return Err(SourceError::TooManyAttempts {
                operation: "sources.metadata",
            });
        }
        Ok(())
    }

    fn record_metadata(&self, details: &SourceDetails) -> SourceResult<()> {
        let mut metadata = self.load_metadata()?;
        let entry = metadata.entry(details.identifier.clone()).or_default();
        entry.last_update_time = details.last_update_time;
        entry.last_check_succeeded = Some(true);
        self.save_metadata(&metadata)
    }

    fn drop_metadata(&self, identifier: &str) -> SourceResult<()> {
        let mut metadata = self.load_metadata()?;
        if metadata.remove(identifier).is_some() {
            self.save_metadata(&metadata)?;
        }
        Ok(())
    }
}

/// A reference to a source (or the aggregate of all sources) that can be
/// connected into a searchable catalog.
pub enum CatalogReference {
    /// One concrete source.
    Single {
        /// The source behind the reference.
        details: SourceDetails,
        /// The factory that connects it.
        factory: Arc<dyn SourceFactory>,
    },
    /// The aggregate over every visible source.
    Aggregated {
        /// The child sources and their factories.
        children: Vec<(SourceDetails, Arc<dyn SourceFactory>)>,
    },
}

impl CatalogReference {
    /// The details of the referenced source; `None` for the aggregate.
    #[must_use]
    pub const fn details(&self) -> Option<&SourceDetails> {
        match self {
            Self::Single { details, .. } => Some(details),
            Self::Aggregated { .. } => None,
        }
    }

    /// Connect the reference into a searchable catalog.
    ///
    /// # Errors
    ///
    /// Fails when the underlying factory cannot open the source data.
    pub async fn connect(&self) -> SourceResult<Arc<dyn PackageCatalog>> {
        match self {
            Self::Single { details, factory } => factory.create(details).await,
            Self::Aggregated { children } => {
                let mut catalogs: Vec<Arc<dyn PackageCatalog>> = Vec::new();
                for (details, factory) in children {
                    match factory.create(details).await {
                        Ok(catalog) => catalogs.push(catalog),
                        Err(error) => {
                            warn!(
                                name = %details.name,
                                %error,
                                "skipping source that failed to connect"
                            );
                        }
                    }
                }
                Ok(Arc::new(AggregatedCatalog::new(catalogs)))
            }
        }
    }
}
