//! Schema versioning and forward-only migration.

use std::fmt;

use rusqlite::Connection;
use tracing::info;

use crate::error::{IndexError, IndexResult};

const META_MAJOR: &str = "majorVersion";
const META_MINOR: &str = "minorVersion";

/// A semantic schema version `(major, minor)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SchemaVersion {
    /// Major component; incompatible shape changes.
    pub major: u32,
    /// Minor component; additive changes.
    pub minor: u32,
}

impl SchemaVersion {
    /// The oldest schema this implementation can read.
    pub const EARLIEST: Self = Self { major: 1, minor: 0 };

    /// The schema this implementation creates and writes.
    pub const LATEST: Self = Self { major: 1, minor: 1 };

    /// Construct an explicit version.
    #[must_use]
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Base tables present from schema 1.0 onward.
const BASE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS metadata (
    name TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
) WITHOUT ROWID;
CREATE TABLE IF NOT EXISTS packages (
    rowid INTEGER PRIMARY KEY,
    id TEXT NOT NULL UNIQUE COLLATE NOCASE
);
CREATE TABLE IF NOT EXISTS versions (
    rowid INTEGER PRIMARY KEY,
    package INTEGER NOT NULL REFERENCES packages(rowid),
    version TEXT NOT NULL,
    channel TEXT NOT NULL DEFAULT '',
    UNIQUE(package, version, channel)
);
CREATE TABLE IF NOT EXISTS manifests (
    rowid INTEGER PRIMARY KEY,
    version_row INTEGER NOT NULL UNIQUE REFERENCES versions(rowid),
    name TEXT NOT NULL,
    publisher TEXT NOT NULL DEFAULT '',
    moniker TEXT,
    locale TEXT NOT NULL DEFAULT '',
    relative_path TEXT,
    arp_min TEXT,
    arp_max TEXT
);
CREATE TABLE IF NOT EXISTS tags (
    manifest INTEGER NOT NULL REFERENCES manifests(rowid),
    tag TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS tags_by_manifest ON tags(manifest);
CREATE TABLE IF NOT EXISTS commands (
    manifest INTEGER NOT NULL REFERENCES manifests(rowid),
    command TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS commands_by_manifest ON commands(manifest);
CREATE TABLE IF NOT EXISTS pfn (
    manifest INTEGER NOT NULL REFERENCES manifests(rowid),
    pfn TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS pfn_by_manifest ON pfn(manifest);
CREATE TABLE IF NOT EXISTS productcodes (
    manifest INTEGER NOT NULL REFERENCES manifests(rowid),
    productcode TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS productcodes_by_manifest ON productcodes(manifest);
";

/// Tables added by schema 1.1.
const V1_1_TABLES: &str = "
CREATE TABLE IF NOT EXISTS deps (
    manifest INTEGER NOT NULL REFERENCES manifests(rowid),
    package TEXT NOT NULL,
    normalized TEXT NOT NULL,
    min_version TEXT
);
CREATE INDEX IF NOT EXISTS deps_by_manifest ON deps(manifest);
CREATE INDEX IF NOT EXISTS deps_by_package ON deps(package);
CREATE TABLE IF NOT EXISTS manifest_metadata (
    manifest INTEGER NOT NULL REFERENCES manifests(rowid),
    name TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY(manifest, name)
);
";

/// Create the tables for the requested schema version.
pub(crate) fn create_tables(conn: &Connection, version: SchemaVersion) -> IndexResult<()> {
    conn.execute_batch(BASE_TABLES)
        .map_err(IndexError::database("schema.create.base"))?;
    if version >= SchemaVersion::new(1, 1) {
        conn.execute_batch(V1_1_TABLES)
            .map_err(IndexError::database("schema.create.v1_1"))?;
    }
    Ok(())
}

/// Persist the schema version into the metadata table.
pub(crate) fn write_version(conn: &Connection, version: SchemaVersion) -> IndexResult<()> {
    let mut statement = conn
        .prepare("INSERT INTO metadata (name, value) VALUES (?1, ?2) ON CONFLICT(name) DO UPDATE SET value = excluded.value")
        .map_err(IndexError::database("schema.version.prepare"))?;
    statement
        .execute((META_MAJOR, version.major.to_string()))
        .map_err(IndexError::database("schema.version.major"))?;
    statement
        .execute((META_MINOR, version.minor.to_string()))
        .map_err(IndexError::database("schema.version.minor"))?;
    Ok(())
}

/// Read the schema version from the metadata table.
pub(crate) fn read_version(conn: &Connection) -> IndexResult<SchemaVersion> {
    let read = |name: &str| -> IndexResult<u32> {
        conn.query_row("SELECT value FROM metadata WHERE name = ?1", [name], |row| {
            row.get::<_, String>(0)
        })
        .map_err(IndexError::database("schema.version.read"))?
        .parse::<u32>()
        .map_err(|_| IndexError::Internal {
            detail: "schema version metadata is not numeric",
        })
    };

    Ok(SchemaVersion::new(read(META_MAJOR)?, read(META_MINOR)?))
}

/// Run the forward migrations from `from` up to `target`.
///
/// Returns `false` without touching the store when the target is behind the
/// current version or unknown to this implementation.
pub(crate) fn migrate(conn: &Connection, from: SchemaVersion, target: SchemaVersion) -> IndexResult<bool> {
    if target < from {
        return Ok(false);
    }
    if target > SchemaVersion::LATEST {
        return Ok(false);
    }
    if target == from {
        return Ok(true);
    }

    // Single registered step so far: 1.0 -> 1.1.
    if from == SchemaVersion::new(1, 0) && target >= SchemaVersion::new(1, 1) {
        info!(%from, %target, "migrating index schema");
        conn.execute_batch(V1_1_TABLES)
            .map_err(IndexError::database("schema.migrate.v1_1"))?;
    }

    write_version(conn, target)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_order_by_major_then_minor() {
        assert!(SchemaVersion::new(1, 1) > SchemaVersion::new(1, 0));
        assert!(SchemaVersion::new(2, 0) > SchemaVersion::new(1, 9));
        assert!(SchemaVersion::EARLIEST <= SchemaVersion::LATEST);
    }

    #[test]
    fn version_round_trips_through_metadata() -> anyhow::Result<()> {
        let conn = Connection::open_in_memory()?;
        create_tables(&conn, SchemaVersion::LATEST)?;
        write_version(&conn, SchemaVersion::new(1, 1))?;
        assert_eq!(read_version(&conn)?, SchemaVersion::new(1, 1));
        Ok(())
    }

    #[test]
    fn migration_refuses_backward_and_unknown_targets() -> anyhow::Result<()> {
        let conn = Connection::open_in_memory()?;
        create_tables(&conn, SchemaVersion::EARLIEST)?;
        write_version(&conn, SchemaVersion::EARLIEST)?;

        assert!(!migrate(&conn, SchemaVersion::new(1, 1), SchemaVersion::new(1, 0))?);
        assert!(!migrate(&conn, SchemaVersion::new(1, 0), SchemaVersion::new(9, 0))?);
        assert!(migrate(&conn, SchemaVersion::new(1, 0), SchemaVersion::new(1, 1))?);
        assert_eq!(read_version(&conn)?, SchemaVersion::new(1, 1));
        Ok(())
    }
}
