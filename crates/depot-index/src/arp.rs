//! Validation of declared Add/Remove Programs version ranges.
//!
//! A manifest may declare the version range its installers register in
//! Add/Remove Programs. Within a package, the ranges of distinct versions
//! must not overlap, or installed-package correlation becomes ambiguous;
//! a write that would introduce an overlap is rejected before it commits.

use rusqlite::Connection;
use tracing::error;

use depot_core::{Manifest, Version, VersionAndChannel, VersionRange};

use crate::error::{IndexError, IndexResult};
use crate::store::{PackageVersionProperty, version_keys_tx};

/// Reject `manifest` when its declared range overlaps the range of any
/// other version of the same package already in the index.
///
/// `exclude` names the version key being updated, compared by raw text so
/// that `1.0` and `1.0.0` stay distinct rows.
pub(crate) fn validate_manifest_arp(
    conn: &Connection,
    manifest: &Manifest,
    exclude: Option<&VersionAndChannel>,
) -> IndexResult<()> {
    let Some(range) = manifest.arp_version_range() else {
        return Ok(());
    };

    let package_row: Option<i64> = {
        use rusqlite::OptionalExtension;
        conn.query_row(
            "SELECT rowid FROM packages WHERE id = ?1 COLLATE NOCASE",
            [manifest.id.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(IndexError::database("arp.package.lookup"))?
    };
    let Some(package_row) = package_row else {
        return Ok(());
    };

    for key in version_keys_tx(conn, package_row)? {
        if let Some(excluded) = exclude
            && key.key.raw_eq(excluded)
        {
            continue;
        }

        let arp_min = manifest_property(conn, key.manifest_id, PackageVersionProperty::ArpMinVersion)?;
        let arp_max = manifest_property(conn, key.manifest_id, PackageVersionProperty::ArpMaxVersion)?;

        let existing = match (arp_min, arp_max) {
            (None, None) => continue,
            (Some(min), Some(max)) => {
                VersionRange::new(Version::parse(&min), Version::parse(&max)).map_err(|_| {
                    IndexError::Internal {
                        detail: "stored version range bounds are inverted",
                    }
                })?
            }
            _ => {
                return Err(IndexError::Internal {
                    detail: "stored version range bounds must be both present or both absent",
                });
            }
        };

        if range.overlaps(&existing) {
            error!(
                id = %manifest.id,
                version = %manifest.version,
                %existing,
                "declared version range overlaps an indexed manifest"
            );
            return Err(IndexError::ArpVersionOverlap {
                id: manifest.id.as_str().to_string(),
                existing_range: existing.to_string(),
            });
        }
    }

    Ok(())
}

fn manifest_property(
    conn: &Connection,
    manifest_id: i64,
    property: PackageVersionProperty,
) -> IndexResult<Option<String>> {
    use rusqlite::OptionalExtension;

    let column = match property {
        PackageVersionProperty::ArpMinVersion => "arp_min",
        PackageVersionProperty::ArpMaxVersion => "arp_max",
        _ => {
            return Err(IndexError::Internal {
                detail: "unexpected property during range validation",
            });
        }
    };

    conn.query_row(
        &format!("SELECT {column} FROM manifests WHERE rowid = ?1"),
        [manifest_id],
        |row| row.get(0),
    )
    .optional()
    .map_err(IndexError::database("arp.property.read"))
    .map(Option::flatten)
}
