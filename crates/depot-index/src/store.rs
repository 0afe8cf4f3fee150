//! The embedded manifest index.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use tracing::{debug, error, info, warn};

use depot_core::{Channel, Manifest, NormalizedName, Version, VersionAndChannel};

use crate::arp::validate_manifest_arp;
use crate::error::{IndexError, IndexResult};
use crate::schema::{self, SchemaVersion};
use crate::search::{
    IndexResultMatch, IndexSearchResult, MatchCriteria, PackageMatchField, SearchRequest,
    value_matches,
};

/// Opaque identifier of a manifest row.
pub type ManifestId = i64;

/// Opaque identifier of a package row.
pub type PackageRowId = i64;

const META_LAST_WRITE: &str = "lastwritetime";
const META_UPDATE_TRACKING: &str = "packageUpdateTrackingBaseTime";

/// How an index is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenDisposition {
    /// Read access only.
    ReadOnly,
    /// Full access; the schema must be writable by this implementation.
    ReadWrite,
}

/// Single-valued manifest properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageVersionProperty {
    /// Package identifier.
    Id,
    /// Display name.
    Name,
    /// Publisher.
    Publisher,
    /// Moniker.
    Moniker,
    /// Version text.
    Version,
    /// Channel text.
    Channel,
    /// Default-localization locale.
    Locale,
    /// Repository-relative path of the manifest file.
    RelativePath,
    /// Lower bound of the declared Add/Remove Programs range.
    ArpMinVersion,
    /// Upper bound of the declared Add/Remove Programs range.
    ArpMaxVersion,
}

/// Multi-valued manifest properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageVersionMultiProperty {
    /// Search tags.
    Tag,
    /// Commands made available by the installers.
    Command,
    /// Package family names.
    PackageFamilyName,
    /// Product codes.
    ProductCode,
}

/// Writable store properties.
#[derive(Debug, Clone)]
pub enum IndexProperty {
    /// Base time for package-update tracking.
    PackageUpdateTrackingBaseTime(String),
    /// Output directory for intermediate files produced while packaging.
    IntermediateFileOutputPath(PathBuf),
}

/// One version of a package as stored in the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionKey {
    /// Version and channel of the manifest.
    pub key: VersionAndChannel,
    /// Manifest row behind the key.
    pub manifest_id: ManifestId,
}

struct Inner {
    conn: Connection,
    version: SchemaVersion,
    disposition: OpenDisposition,
    intermediate_output: Option<PathBuf>,
}

/// The embedded relational index of manifests.
///
/// One mutex serialises every operation; mutations additionally run inside
/// a savepoint so any failure leaves the store unchanged.
pub struct IndexStore {
    inner: Mutex<Inner>,
}

impl fmt::Debug for IndexStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexStore").finish_non_exhaustive()
    }
}

impl IndexStore {
    /// Create a new index at `path`, overwriting any existing file.
    ///
    /// # Errors
    ///
    /// Returns an error if the requested version is outside the supported
    /// range or the database cannot be initialised.
    pub fn create_new(path: &Path, version: SchemaVersion) -> IndexResult<Self> {
        if version < SchemaVersion::EARLIEST || version > SchemaVersion::LATEST {
            return Err(IndexError::SchemaVersionMismatch {
                found: version,
                required: SchemaVersion::LATEST,
            });
        }

        info!(path = %path.display(), %version, "creating new index");
        if path.exists() {
            std::fs::remove_file(path).map_err(|_| IndexError::Internal {
                detail: "existing index file could not be replaced",
            })?;
        }

        let mut conn =
            Connection::open(path).map_err(IndexError::database("index.create.open"))?;
        configure(&conn)?;

        let savepoint = conn
            .savepoint_with_name("index_createnew")
            .map_err(IndexError::database("index.create.savepoint"))?;
        schema::create_tables(&savepoint, version)?;
        schema::write_version(&savepoint, version)?;
        touch_last_write(&savepoint)?;
        savepoint
            .commit()
            .map_err(IndexError::database("index.create.commit"))?;

        Ok(Self {
            inner: Mutex::new(Inner {
                conn,
                version,
                disposition: OpenDisposition::ReadWrite,
                intermediate_output: None,
            }),
        })
    }

    /// Open an existing index.
    ///
    /// # Errors
    ///
    /// Returns `CannotWriteUpLevel` for a read-write open of a newer
    /// schema, and a version-mismatch error for schemas older than the
    /// earliest supported.
    pub fn open(path: &Path, disposition: OpenDisposition) -> IndexResult<Self> {
        let flags = match disposition {
            OpenDisposition::ReadOnly => OpenFlags::SQLITE_OPEN_READ_ONLY,
            OpenDisposition::ReadWrite => {
                OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
            }
        };
        let conn = Connection::open_with_flags(path, flags)
            .map_err(IndexError::database("index.open"))?;
        configure(&conn)?;

        let version = schema::read_version(&conn)?;
        info!(path = %path.display(), %version, ?disposition, "opened index");

        if version < SchemaVersion::EARLIEST {
            return Err(IndexError::SchemaVersionMismatch {
                found: version,
                required: SchemaVersion::EARLIEST,
            });
        }
        if disposition == OpenDisposition::ReadWrite {
            if version > SchemaVersion::LATEST {
                return Err(IndexError::CannotWriteUpLevel {
                    found: version,
                    latest: SchemaVersion::LATEST,
                });
            }
            if version < SchemaVersion::LATEST {
                warn!(%version, "index schema is behind; migrate before mutating manifests");
            }
        }

        Ok(Self {
            inner: Mutex::new(Inner {
                conn,
                version,
                disposition,
                intermediate_output: None,
            }),
        })
    }

    /// Clone `source` into a new file at `path` and open the clone
    /// read-write.
    ///
    /// # Errors
    ///
    /// Returns an error if the clone or the subsequent open fails.
    pub fn copy_from(path: &Path, source: &Self) -> IndexResult<Self> {
        {
            let inner = source.lock();
            let target = path.to_string_lossy().into_owned();
            inner
                .conn
                .execute("VACUUM INTO ?1", [target])
                .map_err(IndexError::database("index.copy.vacuum"))?;
        }
        Self::open(path, OpenDisposition::ReadWrite)
    }

    /// The schema version of the opened index.
    #[must_use]
    pub fn version(&self) -> SchemaVersion {
        self.lock().version
    }

    /// The time of the last mutation, when recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata table cannot be read.
    pub fn last_write_time(&self) -> IndexResult<Option<DateTime<Utc>>> {
        let inner = self.lock();
        let raw: Option<String> = inner
            .conn
            .query_row(
                "SELECT value FROM metadata WHERE name = ?1",
                [META_LAST_WRITE],
                |row| row.get(0),
            )
            .optional()
            .map_err(IndexError::database("index.last_write.read"))?;
        Ok(raw
            .and_then(|text| text.parse::<i64>().ok())
            .and_then(|seconds| DateTime::<Utc>::from_timestamp(seconds, 0)))
    }

    /// Attempt to migrate the schema to `target` inside a savepoint.
    ///
    /// Returns `false` without changing the store when the target is
    /// behind the current version or unknown.
    ///
    /// # Errors
    ///
    /// Returns an error if the migration itself fails; the store is left
    /// unchanged in that case.
    pub fn migrate_to(&self, target: SchemaVersion) -> IndexResult<bool> {
        let mut inner = self.lock();
        inner.require_writable()?;
        let current = inner.version;

        let savepoint = inner
            .conn
            .savepoint_with_name("index_migrate_to")
            .map_err(IndexError::database("index.migrate.savepoint"))?;
        let migrated = schema::migrate(&savepoint, current, target)?;
        if migrated {
            touch_last_write(&savepoint)?;
            savepoint
                .commit()
                .map_err(IndexError::database("index.migrate.commit"))?;
            inner.version = target;
        }
        Ok(migrated)
    }

    /// Add a manifest to the index.
    ///
    /// # Errors
    ///
    /// Fails when the identity triple is already present, when the
    /// declared Add/Remove Programs range overlaps another version, or on
    /// database errors. On failure the store is unchanged.
    pub fn add_manifest(&self, manifest: &Manifest, relative_path: Option<&Path>) -> IndexResult<ManifestId> {
        let mut inner = self.lock();
        inner.require_current_schema()?;
        debug!(id = %manifest.id, version = %manifest.version, "adding manifest");

        let savepoint = inner
            .conn
            .savepoint_with_name("index_addmanifest")
            .map_err(IndexError::database("index.add.savepoint"))?;
        let id = add_manifest_tx(&savepoint, manifest, relative_path)?;
        touch_last_write(&savepoint)?;
        savepoint
            .commit()
            .map_err(IndexError::database("index.add.commit"))?;
        Ok(id)
    }

    /// Update the manifest with the matching identity triple.
    ///
    /// Returns whether any stored data changed.
    ///
    /// # Errors
    ///
    /// Fails when no such manifest exists, on range overlap, or on
    /// database errors.
    pub fn update_manifest(&self, manifest: &Manifest, relative_path: Option<&Path>) -> IndexResult<bool> {
        let mut inner = self.lock();
        inner.require_current_schema()?;
        debug!(id = %manifest.id, version = %manifest.version, "updating manifest");

        let savepoint = inner
            .conn
            .savepoint_with_name("index_updatemanifest")
            .map_err(IndexError::database("index.update.savepoint"))?;
        let changed = update_manifest_tx(&savepoint, manifest, relative_path)?;
        if changed {
            touch_last_write(&savepoint)?;
            savepoint
                .commit()
                .map_err(IndexError::database("index.update.commit"))?;
        }
        Ok(changed)
    }

    /// Add the manifest, or update it when the identity triple exists.
    ///
    /// Returns `true` when a new row was created.
    ///
    /// # Errors
    ///
    /// Fails on range overlap or database errors.
    pub fn add_or_update_manifest(&self, manifest: &Manifest, relative_path: Option<&Path>) -> IndexResult<bool> {
        let mut inner = self.lock();
        inner.require_current_schema()?;

        let savepoint = inner
            .conn
            .savepoint_with_name("index_addorupdate")
            .map_err(IndexError::database("index.upsert.savepoint"))?;
        let existing = manifest_id_by_manifest_tx(&savepoint, manifest)?;
        let added = if existing.is_some() {
            update_manifest_tx(&savepoint, manifest, relative_path)?;
            false
        } else {
            add_manifest_tx(&savepoint, manifest, relative_path)?;
            true
        };
        touch_last_write(&savepoint)?;
        savepoint
            .commit()
            .map_err(IndexError::database("index.upsert.commit"))?;
        Ok(added)
    }

    /// Remove the manifest with the matching identity triple and all rows
    /// that depend on it.
    ///
    /// # Errors
    ///
    /// Fails when no such manifest exists or on database errors.
    pub fn remove_manifest(&self, manifest: &Manifest) -> IndexResult<()> {
        let id = self
            .get_manifest_id_by_manifest(manifest)?
            .ok_or_else(|| IndexError::ManifestNotFound {
                id: manifest.id.as_str().to_string(),
                version: manifest.version.as_str().to_string(),
                channel: manifest.channel.as_str().to_string(),
            })?;
        self.remove_manifest_by_id(id)
    }

    /// Remove a manifest row by id; removing an absent row succeeds.
    ///
    /// # Errors
    ///
    /// Fails on database errors.
    pub fn remove_manifest_by_id(&self, manifest_id: ManifestId) -> IndexResult<()> {
        let mut inner = self.lock();
        inner.require_current_schema()?;
        debug!(manifest_id, "removing manifest");

        let savepoint = inner
            .conn
            .savepoint_with_name("index_removemanifest")
            .map_err(IndexError::database("index.remove.savepoint"))?;
        remove_manifest_tx(&savepoint, manifest_id)?;
        touch_last_write(&savepoint)?;
        savepoint
            .commit()
            .map_err(IndexError::database("index.remove.commit"))?;
        Ok(())
    }

    /// Execute a structured search.
    ///
    /// # Errors
    ///
    /// Fails on database errors or invalid wildcard patterns.
    pub fn search(&self, request: &SearchRequest) -> IndexResult<IndexSearchResult> {
        let inner = self.lock();
        debug!(request = %request, "index search");
        search_tx(&inner.conn, request)
    }

    /// The manifest id for a `(package row, version, channel)` key, by raw
    /// text equality.
    ///
    /// # Errors
    ///
    /// Fails on database errors.
    pub fn get_manifest_id_by_key(
        &self,
        package: PackageRowId,
        version: &str,
        channel: &str,
    ) -> IndexResult<Option<ManifestId>> {
        let inner = self.lock();
        manifest_id_by_key_tx(&inner.conn, package, version, channel)
    }

    /// The manifest id matching a manifest's identity triple.
    ///
    /// # Errors
    ///
    /// Fails on database errors.
    pub fn get_manifest_id_by_manifest(&self, manifest: &Manifest) -> IndexResult<Option<ManifestId>> {
        let inner = self.lock();
        manifest_id_by_manifest_tx(&inner.conn, manifest)
    }

    /// A single-valued property of a manifest row.
    ///
    /// # Errors
    ///
    /// Fails on database errors.
    pub fn get_property_by_primary_id(
        &self,
        manifest_id: ManifestId,
        property: PackageVersionProperty,
    ) -> IndexResult<Option<String>> {
        let inner = self.lock();
        property_tx(&inner.conn, manifest_id, property)
    }

    /// A repeated property of a manifest row.
    ///
    /// # Errors
    ///
    /// Fails on database errors.
    pub fn get_multi_property_by_primary_id(
        &self,
        manifest_id: ManifestId,
        property: PackageVersionMultiProperty,
    ) -> IndexResult<Vec<String>> {
        let inner = self.lock();
        let (table, column) = match property {
            PackageVersionMultiProperty::Tag => ("tags", "tag"),
            PackageVersionMultiProperty::Command => ("commands", "command"),
            PackageVersionMultiProperty::PackageFamilyName => ("pfn", "pfn"),
            PackageVersionMultiProperty::ProductCode => ("productcodes", "productcode"),
        };
        child_values_tx(&inner.conn, table, column, manifest_id)
    }

    /// All version keys of a package, newest first within each channel.
    ///
    /// # Errors
    ///
    /// Fails on database errors.
    pub fn get_version_keys_by_id(&self, package: PackageRowId) -> IndexResult<Vec<VersionKey>> {
        let inner = self.lock();
        version_keys_tx(&inner.conn, package)
    }

    /// The packages a manifest depends on, as `(package row, normalised
    /// dependency identifier)` pairs. Dependencies on packages absent from
    /// this index are skipped.
    ///
    /// # Errors
    ///
    /// Fails on database errors.
    pub fn get_dependencies_by_manifest_row_id(
        &self,
        manifest_id: ManifestId,
    ) -> IndexResult<BTreeSet<(PackageRowId, String)>> {
        let inner = self.lock();
        if inner.version < SchemaVersion::new(1, 1) {
            return Ok(BTreeSet::new());
        }

        let mut statement = inner
            .conn
            .prepare("SELECT package, normalized FROM deps WHERE manifest = ?1")
            .map_err(IndexError::database("index.deps.prepare"))?;
        let rows = statement
            .query_map([manifest_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(IndexError::database("index.deps.query"))?;

        let mut result = BTreeSet::new();
        for row in rows {
            let (package_id, normalized) =
                row.map_err(IndexError::database("index.deps.row"))?;
            match package_row_by_id_tx(&inner.conn, &package_id)? {
                Some(package_row) => {
                    result.insert((package_row, normalized));
                }
                None => {
                    debug!(%package_id, "dependency target not present in index");
                }
            }
        }
        Ok(result)
    }

    /// The manifests that depend on a package, as `(manifest row,
    /// normalised dependent name)` pairs.
    ///
    /// # Errors
    ///
    /// Fails on database errors.
    pub fn get_dependents_by_id(&self, package_id: &str) -> IndexResult<Vec<(ManifestId, String)>> {
        let inner = self.lock();
        if inner.version < SchemaVersion::new(1, 1) {
            return Ok(Vec::new());
        }

        let mut statement = inner
            .conn
            .prepare(
                "SELECT d.manifest, m.name, m.publisher FROM deps d \
                 JOIN manifests m ON m.rowid = d.manifest \
                 WHERE d.package = ?1 COLLATE NOCASE",
            )
            .map_err(IndexError::database("index.dependents.prepare"))?;
        let rows = statement
            .query_map([package_id], |row| {
                Ok((
                    row.get::<_, ManifestId>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(IndexError::database("index.dependents.query"))?;

        let mut result = Vec::new();
        for row in rows {
            let (manifest, name, publisher) =
                row.map_err(IndexError::database("index.dependents.row"))?;
            result.push((manifest, NormalizedName::new(&name, &publisher).to_string()));
        }
        Ok(result)
    }

    /// Attach side-band metadata to a manifest row.
    ///
    /// # Errors
    ///
    /// Fails on database errors or when the schema predates metadata.
    pub fn set_metadata_by_manifest_id(
        &self,
        manifest_id: ManifestId,
        name: &str,
        value: &str,
    ) -> IndexResult<()> {
        let mut inner = self.lock();
        inner.require_current_schema()?;

        let savepoint = inner
            .conn
            .savepoint_with_name("index_setmetadata")
            .map_err(IndexError::database("index.metadata.savepoint"))?;
        savepoint
            .execute(
                "INSERT INTO manifest_metadata (manifest, name, value) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(manifest, name) DO UPDATE SET value = excluded.value",
                (manifest_id, name, value),
            )
            .map_err(IndexError::database("index.metadata.write"))?;
        touch_last_write(&savepoint)?;
        savepoint
            .commit()
            .map_err(IndexError::database("index.metadata.commit"))?;
        Ok(())
    }

    /// Read all side-band metadata of a manifest row.
    ///
    /// # Errors
    ///
    /// Fails on database errors.
    pub fn get_metadata_by_manifest_id(
        &self,
        manifest_id: ManifestId,
    ) -> IndexResult<BTreeMap<String, String>> {
        let inner = self.lock();
        if inner.version < SchemaVersion::new(1, 1)
            || !table_exists(&inner.conn, "manifest_metadata")?
        {
            return Ok(BTreeMap::new());
        }

        let mut statement = inner
            .conn
            .prepare("SELECT name, value FROM manifest_metadata WHERE manifest = ?1")
            .map_err(IndexError::database("index.metadata.prepare"))?;
        let rows = statement
            .query_map([manifest_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(IndexError::database("index.metadata.query"))?;

        let mut result = BTreeMap::new();
        for row in rows {
            let (name, value) = row.map_err(IndexError::database("index.metadata.row"))?;
            result.insert(name, value);
        }
        Ok(result)
    }

    /// The identifier-normalisation rule used by the index.
    #[must_use]
    pub fn normalize_name(&self, name: &str, publisher: &str) -> NormalizedName {
        NormalizedName::new(name, publisher)
    }

    /// Drop data not needed by a published index, then compact the file.
    ///
    /// # Errors
    ///
    /// Fails on database errors.
    pub fn prepare_for_packaging(&self) -> IndexResult<()> {
        let mut inner = self.lock();
        inner.require_writable()?;
        info!("preparing index for packaging");

        let savepoint = inner
            .conn
            .savepoint_with_name("index_preparepackaging")
            .map_err(IndexError::database("index.packaging.savepoint"))?;
        savepoint
            .execute("DELETE FROM metadata WHERE name = ?1", [META_UPDATE_TRACKING])
            .map_err(IndexError::database("index.packaging.tracking"))?;
        savepoint
            .execute_batch("DROP TABLE IF EXISTS manifest_metadata")
            .map_err(IndexError::database("index.packaging.metadata"))?;
        savepoint
            .commit()
            .map_err(IndexError::database("index.packaging.commit"))?;

        inner
            .conn
            .execute_batch("VACUUM")
            .map_err(IndexError::database("index.packaging.vacuum"))?;
        Ok(())
    }

    /// Run a full referential integrity check.
    ///
    /// # Errors
    ///
    /// Fails on database errors; an inconsistent-but-readable index
    /// returns `Ok(false)`.
    pub fn check_consistency(&self, log: bool) -> IndexResult<bool> {
        let inner = self.lock();
        info!("checking index consistency");
        let result = check_consistency_tx(&inner.conn, inner.version, log)?;
        info!(consistent = result, "index consistency check finished");
        Ok(result)
    }

    /// Set a writable store property.
    ///
    /// # Errors
    ///
    /// Fails when the value is rejected or on database errors.
    pub fn set_property(&self, property: IndexProperty) -> IndexResult<()> {
        let mut inner = self.lock();
        match property {
            IndexProperty::PackageUpdateTrackingBaseTime(value) => {
                inner.require_writable()?;
                inner
                    .conn
                    .execute(
                        "INSERT INTO metadata (name, value) VALUES (?1, ?2) \
                         ON CONFLICT(name) DO UPDATE SET value = excluded.value",
                        (META_UPDATE_TRACKING, value),
                    )
                    .map_err(IndexError::database("index.property.tracking"))?;
                Ok(())
            }
            IndexProperty::IntermediateFileOutputPath(path) => {
                if path.as_os_str().is_empty() || path.is_relative() {
                    return Err(IndexError::InvalidProperty {
                        property: "IntermediateFileOutputPath",
                        reason: "path must be absolute",
                    });
                }
                inner.intermediate_output = Some(path);
                Ok(())
            }
        }
    }

    /// The configured intermediate output path, when set.
    #[must_use]
    pub fn intermediate_file_output_path(&self) -> Option<PathBuf> {
        self.lock().intermediate_output.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned mutex means a writer panicked mid-savepoint; the
        // savepoint rolled back, so the data is still coherent.
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Inner {
    fn require_writable(&self) -> IndexResult<()> {
        if self.disposition == OpenDisposition::ReadOnly {
            return Err(IndexError::Internal {
                detail: "store was opened read-only",
            });
        }
        Ok(())
    }

    fn require_current_schema(&self) -> IndexResult<()> {
        self.require_writable()?;
        if self.version != SchemaVersion::LATEST {
            return Err(IndexError::SchemaVersionMismatch {
                found: self.version,
                required: SchemaVersion::LATEST,
            });
        }
        Ok(())
    }
}

fn configure(conn: &Connection) -> IndexResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(IndexError::database("index.configure"))
}

fn touch_last_write(conn: &Connection) -> IndexResult<()> {
    conn.execute(
        "INSERT INTO metadata (name, value) VALUES (?1, ?2) \
         ON CONFLICT(name) DO UPDATE SET value = excluded.value",
        (META_LAST_WRITE, Utc::now().timestamp().to_string()),
    )
    .map_err(IndexError::database("index.last_write.touch"))?;
    Ok(())
}

fn package_row_by_id_tx(conn: &Connection, id: &str) -> IndexResult<Option<PackageRowId>> {
    conn.query_row(
        "SELECT rowid FROM packages WHERE id = ?1 COLLATE NOCASE",
        [id],
        |row| row.get(0),
    )
    .optional()
    .map_err(IndexError::database("index.package.lookup"))
}

fn manifest_id_by_key_tx(
    conn: &Connection,
    package: PackageRowId,
    version: &str,
    channel: &str,
) -> IndexResult<Option<ManifestId>> {
    conn.query_row(
        "SELECT m.rowid FROM versions v JOIN manifests m ON m.version_row = v.rowid \
         WHERE v.package = ?1 AND v.version = ?2 AND v.channel = ?3",
        (package, version, channel),
        |row| row.get(0),
    )
    .optional()
    .map_err(IndexError::database("index.manifest.lookup"))
}

fn manifest_id_by_manifest_tx(conn: &Connection, manifest: &Manifest) -> IndexResult<Option<ManifestId>> {
    let Some(package) = package_row_by_id_tx(conn, manifest.id.as_str())? else {
        return Ok(None);
    };
    manifest_id_by_key_tx(
        conn,
        package,
        manifest.version.as_str(),
        manifest.channel.as_str(),
    )
}

fn add_manifest_tx(conn: &Connection, manifest: &Manifest, relative_path: Option<&Path>) -> IndexResult<ManifestId> {
    manifest
        .validate()
        .map_err(|source| IndexError::InvalidManifest { source })?;

    let package = match package_row_by_id_tx(conn, manifest.id.as_str())? {
        Some(row) => row,
        None => {
            conn.execute(
                "INSERT INTO packages (id) VALUES (?1)",
                [manifest.id.as_str()],
            )
            .map_err(IndexError::database("index.package.insert"))?;
            conn.last_insert_rowid()
        }
    };

    if manifest_id_by_key_tx(
        conn,
        package,
        manifest.version.as_str(),
        manifest.channel.as_str(),
    )?
    .is_some()
    {
        return Err(IndexError::ManifestAlreadyExists {
            id: manifest.id.as_str().to_string(),
            version: manifest.version.as_str().to_string(),
            channel: manifest.channel.as_str().to_string(),
        });
    }

    validate_manifest_arp(conn, manifest, None)?;

    conn.execute(
        "INSERT INTO versions (package, version, channel) VALUES (?1, ?2, ?3)",
        (package, manifest.version.as_str(), manifest.channel.as_str()),
    )
    .map_err(IndexError::database("index.version.insert"))?;
    let version_row = conn.last_insert_rowid();

    let arp = manifest.arp_version_range();
    conn.execute(
        "INSERT INTO manifests (version_row, name, publisher, moniker, locale, relative_path, arp_min, arp_max) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        (
            version_row,
            &manifest.name,
            &manifest.publisher,
            manifest.moniker.as_deref(),
            &manifest.locale,
            relative_path.map(|p| p.to_string_lossy().into_owned()),
            arp.as_ref().map(|range| range.min().as_str()),
            arp.as_ref().map(|range| range.max().as_str()),
        ),
    )
    .map_err(IndexError::database("index.manifest.insert"))?;
    let manifest_id = conn.last_insert_rowid();

    insert_children_tx(conn, manifest_id, manifest)?;
    Ok(manifest_id)
}

fn update_manifest_tx(conn: &Connection, manifest: &Manifest, relative_path: Option<&Path>) -> IndexResult<bool> {
    manifest
        .validate()
        .map_err(|source| IndexError::InvalidManifest { source })?;

    let manifest_id = manifest_id_by_manifest_tx(conn, manifest)?.ok_or_else(|| {
        IndexError::ManifestNotFound {
            id: manifest.id.as_str().to_string(),
            version: manifest.version.as_str().to_string(),
            channel: manifest.channel.as_str().to_string(),
        }
    })?;

    validate_manifest_arp(conn, manifest, Some(&manifest.version_key()))?;

    let arp = manifest.arp_version_range();
    let new_row = ManifestRowData {
        name: manifest.name.clone(),
        publisher: manifest.publisher.clone(),
        moniker: manifest.moniker.clone(),
        locale: manifest.locale.clone(),
        relative_path: relative_path.map(|p| p.to_string_lossy().into_owned()),
        arp_min: arp.as_ref().map(|range| range.min().as_str().to_string()),
        arp_max: arp.as_ref().map(|range| range.max().as_str().to_string()),
    };
    let new_children = ChildRows::from_manifest(manifest);

    let current_row = manifest_row_data_tx(conn, manifest_id)?;
    let current_children = ChildRows::load(conn, manifest_id)?;
    if current_row == new_row && current_children == new_children {
        return Ok(false);
    }

    conn.execute(
        "UPDATE manifests SET name = ?2, publisher = ?3, moniker = ?4, locale = ?5, \
         relative_path = ?6, arp_min = ?7, arp_max = ?8 WHERE rowid = ?1",
        (
            manifest_id,
            &new_row.name,
            &new_row.publisher,
            new_row.moniker.as_deref(),
            &new_row.locale,
            new_row.relative_path.as_deref(),
            new_row.arp_min.as_deref(),
            new_row.arp_max.as_deref(),
        ),
    )
    .map_err(IndexError::database("index.manifest.update"))?;

    delete_children_tx(conn, manifest_id)?;
    insert_children_tx(conn, manifest_id, manifest)?;
    Ok(true)
}

fn remove_manifest_tx(conn: &Connection, manifest_id: ManifestId) -> IndexResult<()> {
    let version_row: Option<i64> = conn
        .query_row(
            "SELECT version_row FROM manifests WHERE rowid = ?1",
            [manifest_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(IndexError::database("index.remove.lookup"))?;
    let Some(version_row) = version_row else {
        debug!(manifest_id, "manifest already absent");
        return Ok(());
    };

    let package: PackageRowId = conn
        .query_row(
            "SELECT package FROM versions WHERE rowid = ?1",
            [version_row],
            |row| row.get(0),
        )
        .map_err(IndexError::database("index.remove.package"))?;

    delete_children_tx(conn, manifest_id)?;
    conn.execute("DELETE FROM manifests WHERE rowid = ?1", [manifest_id])
        .map_err(IndexError::database("index.remove.manifest"))?;
    conn.execute("DELETE FROM versions WHERE rowid = ?1", [version_row])
        .map_err(IndexError::database("index.remove.version"))?;

    let remaining: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM versions WHERE package = ?1",
            [package],
            |row| row.get(0),
        )
        .map_err(IndexError::database("index.remove.count"))?;
    if remaining == 0 {
        conn.execute("DELETE FROM packages WHERE rowid = ?1", [package])
            .map_err(IndexError::database("index.remove.empty_package"))?;
    }
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
struct ManifestRowData {
    name: String,
    publisher: String,
    moniker: Option<String>,
    locale: String,
    relative_path: Option<String>,
    arp_min: Option<String>,
    arp_max: Option<String>,
}

fn manifest_row_data_tx(conn: &Connection, manifest_id: ManifestId) -> IndexResult<ManifestRowData> {
    conn.query_row(
        "SELECT name, publisher, moniker, locale, relative_path, arp_min, arp_max \
         FROM manifests WHERE rowid = ?1",
        [manifest_id],
        |row| {
            Ok(ManifestRowData {
                name: row.get(0)?,
                publisher: row.get(1)?,
                moniker: row.get(2)?,
                locale: row.get(3)?,
                relative_path: row.get(4)?,
                arp_min: row.get(5)?,
                arp_max: row.get(6)?,
            })
        },
    )
    .map_err(IndexError::database("index.manifest.read"))
}

#[derive(Debug, Default, PartialEq, Eq)]
struct ChildRows {
    tags: BTreeSet<String>,
    commands: BTreeSet<String>,
    pfns: BTreeSet<String>,
    product_codes: BTreeSet<String>,
    dependencies: BTreeSet<(String, String, Option<String>)>,
}

impl ChildRows {
    fn from_manifest(manifest: &Manifest) -> Self {
        let mut rows = Self {
            tags: manifest.tags.iter().cloned().collect(),
            ..Self::default()
        };
        for installer in &manifest.installers {
            rows.commands.extend(installer.commands.iter().cloned());
            if let Some(pfn) = &installer.package_family_name {
                rows.pfns.insert(pfn.clone());
            }
            if let Some(code) = &installer.product_code {
                rows.product_codes.insert(code.clone());
            }
            for entry in &installer.apps_and_features_entries {
                if let Some(code) = &entry.product_code {
                    rows.product_codes.insert(code.clone());
                }
            }
        }
        for dependency in &manifest.dependencies {
            let normalized = NormalizedName::new(dependency.package_id.as_str(), "").to_string();
            rows.dependencies.insert((
                dependency.package_id.as_str().to_string(),
                normalized,
                dependency.min_version.as_ref().map(|v| v.as_str().to_string()),
            ));
        }
        rows
    }

    fn load(conn: &Connection, manifest_id: ManifestId) -> IndexResult<Self> {
        let mut rows = Self {
            tags: child_values_tx(conn, "tags", "tag", manifest_id)?
                .into_iter()
                .collect(),
            commands: child_values_tx(conn, "commands", "command", manifest_id)?
                .into_iter()
                .collect(),
            pfns: child_values_tx(conn, "pfn", "pfn", manifest_id)?
                .into_iter()
                .collect(),
            product_codes: child_values_tx(conn, "productcodes", "productcode", manifest_id)?
                .into_iter()
                .collect(),
            ..Self::default()
        };

        let mut statement = conn
            .prepare("SELECT package, normalized, min_version FROM deps WHERE manifest = ?1")
            .map_err(IndexError::database("index.children.deps"))?;
        let deps = statement
            .query_map([manifest_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })
            .map_err(IndexError::database("index.children.deps_query"))?;
        for dep in deps {
            rows.dependencies
                .insert(dep.map_err(IndexError::database("index.children.deps_row"))?);
        }
        Ok(rows)
    }
}

fn insert_children_tx(conn: &Connection, manifest_id: ManifestId, manifest: &Manifest) -> IndexResult<()> {
    let rows = ChildRows::from_manifest(manifest);

    for tag in &rows.tags {
        conn.execute("INSERT INTO tags (manifest, tag) VALUES (?1, ?2)", (manifest_id, tag))
            .map_err(IndexError::database("index.children.tag"))?;
    }
    for command in &rows.commands {
        conn.execute(
            "INSERT INTO commands (manifest, command) VALUES (?1, ?2)",
            (manifest_id, command),
        )
        .map_err(IndexError::database("index.children.command"))?;
    }
    for pfn in &rows.pfns {
        conn.execute("INSERT INTO pfn (manifest, pfn) VALUES (?1, ?2)", (manifest_id, pfn))
            .map_err(IndexError::database("index.children.pfn"))?;
    }
    for code in &rows.product_codes {
        conn.execute(
            "INSERT INTO productcodes (manifest, productcode) VALUES (?1, ?2)",
            (manifest_id, code),
        )
        .map_err(IndexError::database("index.children.productcode"))?;
    }
    for (package, normalized, min_version) in &rows.dependencies {
        conn.execute(
            "INSERT INTO deps (manifest, package, normalized, min_version) VALUES (?1, ?2, ?3, ?4)",
            (manifest_id, package, normalized, min_version.as_deref()),
        )
        .map_err(IndexError::database("index.children.dep"))?;
    }
    Ok(())
}

fn delete_children_tx(conn: &Connection, manifest_id: ManifestId) -> IndexResult<()> {
    for statement in [
        "DELETE FROM tags WHERE manifest = ?1",
        "DELETE FROM commands WHERE manifest = ?1",
        "DELETE FROM pfn WHERE manifest = ?1",
        "DELETE FROM productcodes WHERE manifest = ?1",
        "DELETE FROM deps WHERE manifest = ?1",
    ] {
        conn.execute(statement, [manifest_id])
            .map_err(IndexError::database("index.children.delete"))?;
    }
    if table_exists(conn, "manifest_metadata")? {
        conn.execute("DELETE FROM manifest_metadata WHERE manifest = ?1", [manifest_id])
            .map_err(IndexError::database("index.children.delete"))?;
    }
    Ok(())
}

fn child_values_tx(
    conn: &Connection,
    table: &str,
    column: &str,
    manifest_id: ManifestId,
) -> IndexResult<Vec<String>> {
    let mut statement = conn
        .prepare(&format!(
            "SELECT {column} FROM {table} WHERE manifest = ?1 ORDER BY {column}"
        ))
        .map_err(IndexError::database("index.children.prepare"))?;
    let rows = statement
        .query_map([manifest_id], |row| row.get::<_, String>(0))
        .map_err(IndexError::database("index.children.query"))?;

    let mut result = Vec::new();
    for row in rows {
        result.push(row.map_err(IndexError::database("index.children.row"))?);
    }
    Ok(result)
}

pub(crate) fn version_keys_tx(conn: &Connection, package: PackageRowId) -> IndexResult<Vec<VersionKey>> {
    let mut statement = conn
        .prepare(
            "SELECT v.version, v.channel, m.rowid FROM versions v \
             JOIN manifests m ON m.version_row = v.rowid WHERE v.package = ?1",
        )
        .map_err(IndexError::database("index.versions.prepare"))?;
    let rows = statement
        .query_map([package], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, ManifestId>(2)?,
            ))
        })
        .map_err(IndexError::database("index.versions.query"))?;

    let mut keys = Vec::new();
    for row in rows {
        let (version, channel, manifest_id) =
            row.map_err(IndexError::database("index.versions.row"))?;
        keys.push(VersionKey {
            key: VersionAndChannel::new(Version::parse(&version), Channel::new(channel)),
            manifest_id,
        });
    }

    keys.sort_by(|a, b| {
        a.key
            .channel
            .cmp(&b.key.channel)
            .then_with(|| b.key.version.cmp(&a.key.version))
    });
    Ok(keys)
}

fn property_tx(
    conn: &Connection,
    manifest_id: ManifestId,
    property: PackageVersionProperty,
) -> IndexResult<Option<String>> {
    let row = conn
        .query_row(
            "SELECT p.id, m.name, m.publisher, m.moniker, v.version, v.channel, m.locale, \
             m.relative_path, m.arp_min, m.arp_max \
             FROM manifests m \
             JOIN versions v ON m.version_row = v.rowid \
             JOIN packages p ON v.package = p.rowid \
             WHERE m.rowid = ?1",
            [manifest_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, Option<String>>(8)?,
                    row.get::<_, Option<String>>(9)?,
                ))
            },
        )
        .optional()
        .map_err(IndexError::database("index.property.read"))?;

    let Some((id, name, publisher, moniker, version, channel, locale, relative_path, arp_min, arp_max)) =
        row
    else {
        return Ok(None);
    };

    Ok(match property {
        PackageVersionProperty::Id => Some(id),
        PackageVersionProperty::Name => Some(name),
        PackageVersionProperty::Publisher => Some(publisher),
        PackageVersionProperty::Moniker => moniker,
        PackageVersionProperty::Version => Some(version),
        PackageVersionProperty::Channel => Some(channel),
        PackageVersionProperty::Locale => Some(locale),
        PackageVersionProperty::RelativePath => relative_path,
        PackageVersionProperty::ArpMinVersion => arp_min,
        PackageVersionProperty::ArpMaxVersion => arp_max,
    })
}

struct PackageRecord {
    package_row: PackageRowId,
    id: String,
    names: Vec<String>,
    monikers: Vec<String>,
    tags: Vec<String>,
    commands: Vec<String>,
    pfns: Vec<String>,
    product_codes: Vec<String>,
}

impl PackageRecord {
    fn field_values(&self, field: PackageMatchField) -> Box<dyn Iterator<Item = &str> + '_> {
        match field {
            PackageMatchField::Id => Box::new(std::iter::once(self.id.as_str())),
            PackageMatchField::Name => Box::new(self.names.iter().map(String::as_str)),
            PackageMatchField::Moniker => Box::new(self.monikers.iter().map(String::as_str)),
            PackageMatchField::Tag => Box::new(self.tags.iter().map(String::as_str)),
            PackageMatchField::Command => Box::new(self.commands.iter().map(String::as_str)),
            PackageMatchField::PackageFamilyName => Box::new(self.pfns.iter().map(String::as_str)),
            PackageMatchField::ProductCode => {
                Box::new(self.product_codes.iter().map(String::as_str))
            }
        }
    }
}

fn load_package_records(conn: &Connection) -> IndexResult<Vec<PackageRecord>> {
    let mut packages: Vec<PackageRecord> = Vec::new();
    let mut by_row: HashMap<PackageRowId, usize> = HashMap::new();

    let mut statement = conn
        .prepare("SELECT rowid, id FROM packages ORDER BY rowid")
        .map_err(IndexError::database("index.search.packages"))?;
    let rows = statement
        .query_map([], |row| {
            Ok((row.get::<_, PackageRowId>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(IndexError::database("index.search.packages_query"))?;
    for row in rows {
        let (package_row, id) = row.map_err(IndexError::database("index.search.packages_row"))?;
        by_row.insert(package_row, packages.len());
        packages.push(PackageRecord {
            package_row,
            id,
            names: Vec::new(),
            monikers: Vec::new(),
            tags: Vec::new(),
            commands: Vec::new(),
            pfns: Vec::new(),
            product_codes: Vec::new(),
        });
    }

    let mut statement = conn
        .prepare(
            "SELECT v.package, m.name, m.moniker FROM manifests m \
             JOIN versions v ON m.version_row = v.rowid",
        )
        .map_err(IndexError::database("index.search.manifests"))?;
    let rows = statement
        .query_map([], |row| {
            Ok((
                row.get::<_, PackageRowId>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })
        .map_err(IndexError::database("index.search.manifests_query"))?;
    for row in rows {
        let (package_row, name, moniker) =
            row.map_err(IndexError::database("index.search.manifests_row"))?;
        if let Some(&slot) = by_row.get(&package_row) {
            packages[slot].names.push(name);
            if let Some(moniker) = moniker {
                packages[slot].monikers.push(moniker);
            }
        }
    }

    let child_queries: [(&str, fn(&mut PackageRecord) -> &mut Vec<String>); 4] = [
        (
            "SELECT v.package, c.tag FROM tags c \
             JOIN manifests m ON m.rowid = c.manifest \
             JOIN versions v ON m.version_row = v.rowid",
            |record| &mut record.tags,
        ),
        (
            "SELECT v.package, c.command FROM commands c \
             JOIN manifests m ON m.rowid = c.manifest \
             JOIN versions v ON m.version_row = v.rowid",
            |record| &mut record.commands,
        ),
        (
            "SELECT v.package, c.pfn FROM pfn c \
             JOIN manifests m ON m.rowid = c.manifest \
             JOIN versions v ON m.version_row = v.rowid",
            |record| &mut record.pfns,
        ),
        (
            "SELECT v.package, c.productcode FROM productcodes c \
             JOIN manifests m ON m.rowid = c.manifest \
             JOIN versions v ON m.version_row = v.rowid",
            |record| &mut record.product_codes,
        ),
    ];

    for (query, select) in child_queries {
        let mut statement = conn
            .prepare(query)
            .map_err(IndexError::database("index.search.children"))?;
        let rows = statement
            .query_map([], |row| {
                Ok((row.get::<_, PackageRowId>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(IndexError::database("index.search.children_query"))?;
        for row in rows {
            let (package_row, value) =
                row.map_err(IndexError::database("index.search.children_row"))?;
            if let Some(&slot) = by_row.get(&package_row) {
                select(&mut packages[slot]).push(value);
            }
        }
    }

    Ok(packages)
}

fn search_tx(conn: &Connection, request: &SearchRequest) -> IndexResult<IndexSearchResult> {
    let records = load_package_records(conn)?;
    let mut matches = Vec::new();

    for record in &records {
        let mut criteria: Option<MatchCriteria> = None;

        if let Some(query) = &request.query {
            let mut hit = None;
            for field in PackageMatchField::QUERY_FIELDS {
                let mut found = false;
                for value in record.field_values(field) {
                    if value_matches(query.match_type, &query.value, value)? {
                        found = true;
                        break;
                    }
                }
                if found {
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
                None => continue,
            }
        }

        let mut all_filters_hit = true;
        for filter in &request.filters {
            let mut found = false;
            for value in record.field_values(filter.field) {
                if value_matches(filter.match_type, &filter.value, value)? {
                    found = true;
                    break;
                }
            }
            if !found {
                all_filters_hit = false;
                break;
            }
            if criteria.is_none() {
                criteria = Some(MatchCriteria {
                    field: filter.field,
                    match_type: filter.match_type,
                    value: filter.value.clone(),
                });
            }
        }
        if !all_filters_hit {
            continue;
        }

        let criteria = criteria.unwrap_or_else(|| MatchCriteria {
            field: PackageMatchField::Id,
            match_type: crate::search::MatchType::Wildcard,
            value: "*".to_string(),
        });
        matches.push(IndexResultMatch {
            package_row: record.package_row,
            criteria,
        });
    }

    let mut truncated = false;
    if request.maximum_results > 0 && matches.len() > request.maximum_results {
        matches.truncate(request.maximum_results);
        truncated = true;
    }

    Ok(IndexSearchResult { matches, truncated })
}

fn table_exists(conn: &Connection, table: &str) -> IndexResult<bool> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )
        .map_err(IndexError::database("index.consistency.table"))?;
    Ok(count > 0)
}

fn check_consistency_tx(conn: &Connection, version: SchemaVersion, log: bool) -> IndexResult<bool> {
    let mut consistent = true;
    let mut check = |description: &str, query: &str| -> IndexResult<()> {
        let count: i64 = conn
            .query_row(query, [], |row| row.get(0))
            .map_err(IndexError::database("index.consistency.check"))?;
        if count > 0 {
            consistent = false;
            if log {
                error!(count, "index inconsistency: {description}");
            }
        }
        Ok(())
    };

    check(
        "versions referencing a missing package",
        "SELECT COUNT(*) FROM versions v WHERE NOT EXISTS \
         (SELECT 1 FROM packages p WHERE p.rowid = v.package)",
    )?;
    check(
        "manifests referencing a missing version",
        "SELECT COUNT(*) FROM manifests m WHERE NOT EXISTS \
         (SELECT 1 FROM versions v WHERE v.rowid = m.version_row)",
    )?;
    check(
        "versions without a manifest",
        "SELECT COUNT(*) FROM versions v WHERE NOT EXISTS \
         (SELECT 1 FROM manifests m WHERE m.version_row = v.rowid)",
    )?;
    check(
        "packages without any version",
        "SELECT COUNT(*) FROM packages p WHERE NOT EXISTS \
         (SELECT 1 FROM versions v WHERE v.package = p.rowid)",
    )?;
    check(
        "manifests with one-sided version range bounds",
        "SELECT COUNT(*) FROM manifests WHERE (arp_min IS NULL) != (arp_max IS NULL)",
    )?;

    for (table, description) in [
        ("tags", "tags referencing a missing manifest"),
        ("commands", "commands referencing a missing manifest"),
        ("pfn", "family names referencing a missing manifest"),
        ("productcodes", "product codes referencing a missing manifest"),
    ] {
        check(
            description,
            &format!(
                "SELECT COUNT(*) FROM {table} c WHERE NOT EXISTS \
                 (SELECT 1 FROM manifests m WHERE m.rowid = c.manifest)"
            ),
        )?;
    }

    if version >= SchemaVersion::new(1, 1) {
        check(
            "dependencies referencing a missing manifest",
            "SELECT COUNT(*) FROM deps c WHERE NOT EXISTS \
             (SELECT 1 FROM manifests m WHERE m.rowid = c.manifest)",
        )?;
        if table_exists(conn, "manifest_metadata")? {
            check(
                "metadata referencing a missing manifest",
                "SELECT COUNT(*) FROM manifest_metadata c WHERE NOT EXISTS \
                 (SELECT 1 FROM manifests m WHERE m.rowid = c.manifest)",
            )?;
        }
    }

    Ok(consistent)
}
