//! Source type factories and their external collaborators.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;
use zip::ZipArchive;

use depot_index::{IndexStore, OpenDisposition};

use crate::catalog::{IndexCatalog, PackageCatalog};
use crate::details::SourceDetails;
use crate::error::{SourceError, SourceResult};
use crate::progress::{ProgressToken, SourceProgress};

/// File name of the fetched source package within the state directory.
const SOURCE_PACKAGE_FILE: &str = "source.msix";
/// Path of the index inside the source package.
const INDEX_ENTRY_PATH: &str = "Public/index.db";
/// File name of the extracted index within the state directory.
const INDEX_FILE: &str = "index.db";

/// Fetches a remote file to a local path. The network stack lives outside
/// the core; implementations observe the progress token at least once per
/// transfer.
#[async_trait]
pub trait PackageFetcher: Send + Sync {
    /// Download `url` into `destination`, replacing any existing file.
    async fn fetch(&self, url: &Url, destination: &Path, progress: &ProgressToken)
    -> SourceResult<()>;
}

/// Validates the signature of a fetched source package against the pinned
/// certificate chain. Verification internals live outside the core.
#[async_trait]
pub trait SignatureValidator: Send + Sync {
    /// Fail when the package at `path` is not acceptably signed.
    async fn validate(&self, path: &Path) -> SourceResult<()>;
}

/// Connects to a rest-protocol source. The protocol client lives outside
/// the core.
#[async_trait]
pub trait RestClient: Send + Sync {
    /// Open a catalog over the endpoint described by `details`.
    async fn connect(&self, details: &SourceDetails) -> SourceResult<Arc<dyn PackageCatalog>>;
}

/// Lifecycle handler for one source type.
#[async_trait]
pub trait SourceFactory: Send + Sync {
    /// The type string this factory handles.
    fn source_type(&self) -> &'static str;

    /// Open a catalog over an already-added source.
    async fn create(&self, details: &SourceDetails) -> SourceResult<Arc<dyn PackageCatalog>>;

    /// Perform the initial data fetch for a new source, filling in the
    /// identifier and timestamps.
    async fn add(&self, details: &mut SourceDetails, progress: &ProgressToken) -> SourceResult<()>;

    /// Refresh the source data; a no-op when nothing changed upstream.
    /// Returns whether anything changed.
    async fn update(&self, details: &mut SourceDetails, progress: &ProgressToken)
    -> SourceResult<bool>;

    /// Clean up everything the source left on this machine.
    async fn remove(&self, details: &SourceDetails, progress: &ProgressToken) -> SourceResult<()>;
}

/// Reject arguments that are remote but not https.
fn require_secure_url(arg: &str) -> SourceResult<Url> {
    let url = Url::parse(arg).map_err(|_| SourceError::InvalidDetails {
        field: "arg",
        reason: "argument must be a valid URL",
    })?;
    match url.scheme() {
        "https" | "file" => Ok(url),
        _ => Err(SourceError::SourceNotSecure {
            arg: arg.to_string(),
        }),
    }
}

fn io_error(operation: &'static str, path: &Path) -> impl FnOnce(io::Error) -> SourceError {
    let path = path.to_path_buf();
    move |source| SourceError::Io {
        operation,
        path,
        source,
    }
}

fn file_hash(path: &Path) -> SourceResult<Option<[u8; 32]>> {
    match fs::read(path) {
        Ok(bytes) => {
            let mut hasher = Sha256::new();
            hasher.update(&bytes);
            Ok(Some(hasher.finalize().into()))
        }
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(SourceError::Io {
            operation: "source.package.hash",
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Extract the index from a fetched source package (a zip container) into
/// the state directory.
fn extract_index(package: &Path, destination: &Path) -> SourceResult<()> {
    let file = File::open(package).map_err(io_error("source.package.open", package))?;
    let mut archive = ZipArchive::new(file).map_err(|source| SourceError::Archive {
        operation: "source.package.read",
        path: package.to_path_buf(),
        source,
    })?;
    let mut entry = archive
        .by_name(INDEX_ENTRY_PATH)
        .map_err(|source| SourceError::Archive {
            operation: "source.package.entry",
            path: package.to_path_buf(),
            source,
        })?;

    let staged = destination.with_extension("staged");
    let mut output = File::create(&staged).map_err(io_error("source.index.create", &staged))?;
    io::copy(&mut entry, &mut output).map_err(io_error("source.index.extract", &staged))?;
    drop(output);
    fs::rename(&staged, destination).map_err(io_error("source.index.commit", destination))?;
    Ok(())
}

/// Factory for sources distributing a signed, pre-indexed package.
pub struct PreIndexedFactory {
    sources_root: PathBuf,
    fetcher: Arc<dyn PackageFetcher>,
    validator: Arc<dyn SignatureValidator>,
}

impl PreIndexedFactory {
    /// The type string of pre-indexed sources.
    pub const TYPE: &'static str = "depot.preindexed";

    /// Create the factory over the per-source state root.
    #[must_use]
    pub fn new(
        sources_root: impl Into<PathBuf>,
        fetcher: Arc<dyn PackageFetcher>,
        validator: Arc<dyn SignatureValidator>,
    ) -> Self {
        Self {
            sources_root: sources_root.into(),
            fetcher,
            validator,
        }
    }

    fn state_dir(&self, details: &SourceDetails) -> PathBuf {
        self.sources_root.join(&details.identifier)
    }

    fn package_url(details: &SourceDetails) -> SourceResult<Url> {
        let mut location = details.arg.clone();
        if !location.ends_with('/') {
            location.push('/');
        }
        let base = require_secure_url(&location)?;
        base.join(SOURCE_PACKAGE_FILE)
            .map_err(|_| SourceError::InvalidDetails {
                field: "arg",
                reason: "argument cannot address the source package",
            })
    }

    /// Fetch, validate, and extract into the state directory. On failure
    /// the caller removes the directory.
    async fn refresh(&self, details: &SourceDetails, progress: &ProgressToken) -> SourceResult<bool> {
        let state_dir = self.state_dir(details);
        fs::create_dir_all(&state_dir).map_err(io_error("source.state.create", &state_dir))?;

        let package_path = state_dir.join(SOURCE_PACKAGE_FILE);
        let previous_hash = file_hash(&package_path)?;
        let url = Self::package_url(details)?;

        progress.check()?;
        progress.report(SourceProgress {
            current: 0,
            total: None,
            phase: "fetch",
        });
        self.fetcher.fetch(&url, &package_path, progress).await?;
        progress.check()?;

        if previous_hash.is_some() && file_hash(&package_path)? == previous_hash {
            debug!(name = %details.name, "source package unchanged");
            return Ok(false);
        }

        self.validator.validate(&package_path).await.map_err(|error| {
            warn!(name = %details.name, %error, "source package failed signature validation");
            SourceError::SourceNotSecure {
                arg: details.arg.clone(),
            }
        })?;
        progress.check()?;

        progress.report(SourceProgress {
            current: 1,
            total: Some(2),
            phase: "extract",
        });
        let index_path = state_dir.join(INDEX_FILE);
        extract_index(&package_path, &index_path)?;

        // The extracted index must at least open before the source is
        // considered usable.
        IndexStore::open(&index_path, OpenDisposition::ReadOnly)?;
        progress.report(SourceProgress {
            current: 2,
            total: Some(2),
            phase: "extract",
        });
        Ok(true)
    }

    fn cleanup_state_dir(&self, details: &SourceDetails) {
        let state_dir = self.state_dir(details);
        if let Err(error) = fs::remove_dir_all(&state_dir)
            && error.kind() != io::ErrorKind::NotFound
        {
            warn!(path = %state_dir.display(), %error, "failed to clean source state");
        }
    }
}

#[async_trait]
impl SourceFactory for PreIndexedFactory {
    fn source_type(&self) -> &'static str {
        Self::TYPE
    }

    async fn create(&self, details: &SourceDetails) -> SourceResult<Arc<dyn PackageCatalog>> {
        let index_path = self.state_dir(details).join(INDEX_FILE);
        let store = IndexStore::open(&index_path, OpenDisposition::ReadOnly)?;
        Ok(Arc::new(IndexCatalog::new(details.clone(), Arc::new(store))))
    }

    async fn add(&self, details: &mut SourceDetails, progress: &ProgressToken) -> SourceResult<()> {
        if details.source_type.is_empty() {
            details.source_type = Self::TYPE.to_string();
        } else if details.source_type != Self::TYPE {
            return Err(SourceError::InvalidDetails {
                field: "type",
                reason: "details were routed to the wrong factory",
            });
        }
        if details.identifier.is_empty() {
            details.identifier = Uuid::new_v4().to_string();
        }

        info!(name = %details.name, arg = %details.arg, "adding pre-indexed source");
        match self.refresh(details, progress).await {
            Ok(_) => {
                details.last_update_time = Some(Utc::now());
                Ok(())
            }
            Err(error) => {
                // Leave nothing behind for a source that never worked.
                self.cleanup_state_dir(details);
                Err(error)
            }
        }
    }

    async fn update(&self, details: &mut SourceDetails, progress: &ProgressToken)
    -> SourceResult<bool> {
        info!(name = %details.name, "updating pre-indexed source");
        let changed = self.refresh(details, progress).await?;
        if changed {
            details.last_update_time = Some(Utc::now());
        }
        Ok(changed)
    }

    async fn remove(&self, details: &SourceDetails, progress: &ProgressToken) -> SourceResult<()> {
        progress.check()?;
        info!(name = %details.name, "removing pre-indexed source");
        self.cleanup_state_dir(details);
        Ok(())
    }
}

/// Factory for rest-protocol sources; a thin wrapper over the protocol
/// client collaborator.
pub struct RestFactory {
    client: Arc<dyn RestClient>,
}

impl RestFactory {
    /// The type string of rest sources.
    pub const TYPE: &'static str = "depot.rest";

    /// Create the factory over a protocol client.
    #[must_use]
    pub fn new(client: Arc<dyn RestClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SourceFactory for RestFactory {
    fn source_type(&self) -> &'static str {
        Self::TYPE
    }

    async fn create(&self, details: &SourceDetails) -> SourceResult<Arc<dyn PackageCatalog>> {
        self.client.connect(details).await
    }

    async fn add(&self, details: &mut SourceDetails, progress: &ProgressToken) -> SourceResult<()> {
        if details.source_type.is_empty() {
            details.source_type = Self::TYPE.to_string();
        } else if details.source_type != Self::TYPE {
            return Err(SourceError::InvalidDetails {
                field: "type",
                reason: "details were routed to the wrong factory",
            });
        }
        require_secure_url(&details.arg)?;
        progress.check()?;

        // Probing the endpoint doubles as validation of the argument.
        let catalog = self.client.connect(details).await?;
        if details.identifier.is_empty() {
            details.identifier = catalog.details().identifier.clone();
        }
        if details.identifier.is_empty() {
            details.identifier = Uuid::new_v4().to_string();
        }
        details.last_update_time = Some(Utc::now());
        Ok(())
    }

    async fn update(&self, details: &mut SourceDetails, progress: &ProgressToken)
    -> SourceResult<bool> {
        // Rest sources hold no local data; the endpoint is always current.
        progress.check()?;
        details.last_update_time = Some(Utc::now());
        Ok(false)
    }

    async fn remove(&self, _details: &SourceDetails, progress: &ProgressToken) -> SourceResult<()> {
        progress.check()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_http_is_rejected() {
        assert!(matches!(
            require_secure_url("http://example.test/msix"),
            Err(SourceError::SourceNotSecure { .. })
        ));
        assert!(require_secure_url("https://example.test/msix").is_ok());
    }

    #[test]
    fn malformed_urls_are_invalid_details() {
        assert!(matches!(
            require_secure_url("not a url"),
            Err(SourceError::InvalidDetails { .. })
        ));
    }

    #[test]
    fn package_url_appends_the_package_name() -> anyhow::Result<()> {
        let details = SourceDetails::user("corp", PreIndexedFactory::TYPE, "https://example.test/root");
        let url = PreIndexedFactory::package_url(&details)?;
        assert_eq!(url.as_str(), "https://example.test/root/source.msix");
        Ok(())
    }
}
