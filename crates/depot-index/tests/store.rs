//! End-to-end tests over an on-disk index.

use std::path::PathBuf;

use anyhow::Result;
use tempfile::TempDir;

use depot_core::{AppsAndFeaturesEntry, Manifest, PackageDependency, PackageIdentifier, Version};
use depot_index::{
    FilterClause, IndexError, IndexStore, MatchType, OpenDisposition, PackageMatchField,
    PackageVersionMultiProperty, PackageVersionProperty, QueryClause, SchemaVersion,
    SearchRequest,
};
use depot_test_support::sample_manifest;

fn temp_dir() -> Result<TempDir> {
    Ok(depot_test_support::temp_dir("depot-index-")?)
}

fn index_path(dir: &TempDir, name: &str) -> PathBuf {
    dir.path().join(name)
}

fn with_arp_range(mut manifest: Manifest, min: &str, max: &str) -> Manifest {
    manifest.installers[0].apps_and_features_entries = vec![
        AppsAndFeaturesEntry {
            display_version: Some(Version::parse(min)),
            ..AppsAndFeaturesEntry::default()
        },
        AppsAndFeaturesEntry {
            display_version: Some(Version::parse(max)),
            ..AppsAndFeaturesEntry::default()
        },
    ];
    manifest
}

#[test]
fn create_add_and_search_round_trip() -> Result<()> {
    let dir = temp_dir()?;
    let store = IndexStore::create_new(&index_path(&dir, "index.db"), SchemaVersion::LATEST)?;

    let manifest = sample_manifest("Contoso.Widget", "1.0")?;
    let manifest_id = store.add_manifest(&manifest, None)?;

    let request = SearchRequest {
        filters: vec![FilterClause::new(
            PackageMatchField::Id,
            MatchType::Exact,
            "Contoso.Widget",
        )],
        ..SearchRequest::default()
    };
    let result = store.search(&request)?;
    assert_eq!(result.matches.len(), 1);
    assert!(!result.truncated);

    let package_row = result.matches[0].package_row;
    let keys = store.get_version_keys_by_id(package_row)?;
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].manifest_id, manifest_id);

    assert_eq!(
        store.get_property_by_primary_id(manifest_id, PackageVersionProperty::Name)?,
        Some("Widget".to_string())
    );
    assert_eq!(
        store.get_multi_property_by_primary_id(manifest_id, PackageVersionMultiProperty::Tag)?,
        vec!["test".to_string()]
    );
    Ok(())
}

#[test]
fn duplicate_identity_triple_is_rejected() -> Result<()> {
    let dir = temp_dir()?;
    let store = IndexStore::create_new(&index_path(&dir, "index.db"), SchemaVersion::LATEST)?;

    let manifest = sample_manifest("Contoso.Widget", "1.0")?;
    store.add_manifest(&manifest, None)?;
    assert!(matches!(
        store.add_manifest(&manifest, None),
        Err(IndexError::ManifestAlreadyExists { .. })
    ));
    Ok(())
}

#[test]
fn free_text_query_spans_default_fields() -> Result<()> {
    let dir = temp_dir()?;
    let store = IndexStore::create_new(&index_path(&dir, "index.db"), SchemaVersion::LATEST)?;
    store.add_manifest(&sample_manifest("Contoso.Widget", "1.0")?, None)?;
    let mut gizmo = sample_manifest("Fabrikam.Gizmo", "2.0")?;
    gizmo.moniker = Some("widget".to_string());
    store.add_manifest(&gizmo, None)?;

    // "widget" hits Contoso.Widget by id substring and Fabrikam.Gizmo
    // only through its moniker.
    let request = SearchRequest {
        query: Some(QueryClause::new("widget", MatchType::Substring)),
        ..SearchRequest::default()
    };
    let result = store.search(&request)?;
    assert_eq!(result.matches.len(), 2);

    // Criteria reports the highest-precedence field that matched.
    let by_id = result
        .matches
        .iter()
        .find(|entry| entry.criteria.field == PackageMatchField::Id);
    assert!(by_id.is_some());
    Ok(())
}

#[test]
fn filters_are_conjunctive() -> Result<()> {
    let dir = temp_dir()?;
    let store = IndexStore::create_new(&index_path(&dir, "index.db"), SchemaVersion::LATEST)?;
    store.add_manifest(&sample_manifest("Contoso.Widget", "1.0")?, None)?;

    let request = SearchRequest {
        filters: vec![
            FilterClause::new(PackageMatchField::Id, MatchType::CaseInsensitive, "contoso.widget"),
            FilterClause::new(PackageMatchField::Tag, MatchType::Exact, "no-such-tag"),
        ],
        ..SearchRequest::default()
    };
    assert!(store.search(&request)?.matches.is_empty());
    Ok(())
}

#[test]
fn wildcard_and_fuzzy_match_types() -> Result<()> {
    let dir = temp_dir()?;
    let store = IndexStore::create_new(&index_path(&dir, "index.db"), SchemaVersion::LATEST)?;
    store.add_manifest(&sample_manifest("Contoso.Widget", "1.0")?, None)?;

    let wildcard = SearchRequest {
        filters: vec![FilterClause::new(
            PackageMatchField::Id,
            MatchType::Wildcard,
            "contoso.*",
        )],
        ..SearchRequest::default()
    };
    assert_eq!(store.search(&wildcard)?.matches.len(), 1);

    let fuzzy = SearchRequest {
        filters: vec![FilterClause::new(
            PackageMatchField::Name,
            MatchType::Fuzzy,
            "  WIDGET ",
        )],
        ..SearchRequest::default()
    };
    assert_eq!(store.search(&fuzzy)?.matches.len(), 1);
    Ok(())
}

#[test]
fn maximum_results_truncates() -> Result<()> {
    let dir = temp_dir()?;
    let store = IndexStore::create_new(&index_path(&dir, "index.db"), SchemaVersion::LATEST)?;
    for name in ["Contoso.One", "Contoso.Two", "Contoso.Three"] {
        store.add_manifest(&sample_manifest(name, "1.0")?, None)?;
    }

    let request = SearchRequest {
        query: Some(QueryClause::new("Contoso", MatchType::Substring)),
        maximum_results: 2,
        ..SearchRequest::default()
    };
    let result = store.search(&request)?;
    assert_eq!(result.matches.len(), 2);
    assert!(result.truncated);
    Ok(())
}

#[test]
fn update_reports_whether_data_changed() -> Result<()> {
    let dir = temp_dir()?;
    let store = IndexStore::create_new(&index_path(&dir, "index.db"), SchemaVersion::LATEST)?;
    let manifest = sample_manifest("Contoso.Widget", "1.0")?;
    store.add_manifest(&manifest, None)?;

    assert!(!store.update_manifest(&manifest, None)?);

    let mut changed = manifest.clone();
    changed.name = "Widget Ultra".to_string();
    assert!(store.update_manifest(&changed, None)?);
    let id = store
        .get_manifest_id_by_manifest(&changed)?
        .expect("manifest expected");
    assert_eq!(
        store.get_property_by_primary_id(id, PackageVersionProperty::Name)?,
        Some("Widget Ultra".to_string())
    );
    Ok(())
}

#[test]
fn add_or_update_is_idempotent() -> Result<()> {
    let dir = temp_dir()?;
    let store = IndexStore::create_new(&index_path(&dir, "index.db"), SchemaVersion::LATEST)?;
    let manifest = sample_manifest("Contoso.Widget", "1.0")?;

    assert!(store.add_or_update_manifest(&manifest, None)?);
    assert!(!store.add_or_update_manifest(&manifest, None)?);

    let request = SearchRequest {
        filters: vec![FilterClause::new(
            PackageMatchField::Id,
            MatchType::Exact,
            "Contoso.Widget",
        )],
        ..SearchRequest::default()
    };
    assert_eq!(store.search(&request)?.matches.len(), 1);
    Ok(())
}

#[test]
fn remove_drops_package_with_last_version() -> Result<()> {
    let dir = temp_dir()?;
    let store = IndexStore::create_new(&index_path(&dir, "index.db"), SchemaVersion::LATEST)?;
    let one = sample_manifest("Contoso.Widget", "1.0")?;
    let two = sample_manifest("Contoso.Widget", "2.0")?;
    store.add_manifest(&one, None)?;
    store.add_manifest(&two, None)?;

    store.remove_manifest(&one)?;
    let request = SearchRequest {
        filters: vec![FilterClause::new(
            PackageMatchField::Id,
            MatchType::Exact,
            "Contoso.Widget",
        )],
        ..SearchRequest::default()
    };
    assert_eq!(store.search(&request)?.matches.len(), 1);

    store.remove_manifest(&two)?;
    assert!(store.search(&request)?.matches.is_empty());
    assert!(store.check_consistency(true)?);
    Ok(())
}

#[test]
fn arp_overlap_aborts_and_leaves_store_unchanged() -> Result<()> {
    let dir = temp_dir()?;
    let store = IndexStore::create_new(&index_path(&dir, "index.db"), SchemaVersion::LATEST)?;

    let first = with_arp_range(sample_manifest("X", "1.0")?, "1.0", "2.0");
    store.add_manifest(&first, None)?;

    let overlapping = with_arp_range(sample_manifest("X", "1.5")?, "1.8", "2.5");
    assert!(matches!(
        store.add_manifest(&overlapping, None),
        Err(IndexError::ArpVersionOverlap { .. })
    ));

    let request = SearchRequest {
        filters: vec![FilterClause::new(PackageMatchField::Id, MatchType::Exact, "X")],
        ..SearchRequest::default()
    };
    let result = store.search(&request)?;
    assert_eq!(result.matches.len(), 1);
    let keys = store.get_version_keys_by_id(result.matches[0].package_row)?;
    assert_eq!(keys.len(), 1);
    Ok(())
}

#[test]
fn arp_update_excludes_own_row() -> Result<()> {
    let dir = temp_dir()?;
    let store = IndexStore::create_new(&index_path(&dir, "index.db"), SchemaVersion::LATEST)?;

    let manifest = with_arp_range(sample_manifest("X", "1.0")?, "1.0", "2.0");
    store.add_manifest(&manifest, None)?;

    // Re-declaring an overlapping range on the same version row is fine.
    let updated = with_arp_range(sample_manifest("X", "1.0")?, "1.5", "2.5");
    assert!(store.update_manifest(&updated, None)?);
    Ok(())
}

#[test]
fn non_overlapping_ranges_coexist() -> Result<()> {
    let dir = temp_dir()?;
    let store = IndexStore::create_new(&index_path(&dir, "index.db"), SchemaVersion::LATEST)?;

    store.add_manifest(&with_arp_range(sample_manifest("X", "1.0")?, "1.0", "1.9"), None)?;
    store.add_manifest(&with_arp_range(sample_manifest("X", "2.0")?, "2.0", "2.9"), None)?;
    Ok(())
}

#[test]
fn dependencies_round_trip() -> Result<()> {
    let dir = temp_dir()?;
    let store = IndexStore::create_new(&index_path(&dir, "index.db"), SchemaVersion::LATEST)?;

    store.add_manifest(&sample_manifest("Contoso.Runtime", "1.0")?, None)?;

    let mut app = sample_manifest("Contoso.App", "1.0")?;
    app.dependencies = vec![PackageDependency {
        package_id: PackageIdentifier::new("Contoso.Runtime")?,
        min_version: Some(Version::parse("1.0")),
    }];
    let app_id = store.add_manifest(&app, None)?;

    let dependencies = store.get_dependencies_by_manifest_row_id(app_id)?;
    assert_eq!(dependencies.len(), 1);

    let dependents = store.get_dependents_by_id("contoso.runtime")?;
    assert_eq!(dependents.len(), 1);
    assert_eq!(dependents[0].0, app_id);
    Ok(())
}

#[test]
fn metadata_round_trips() -> Result<()> {
    let dir = temp_dir()?;
    let store = IndexStore::create_new(&index_path(&dir, "index.db"), SchemaVersion::LATEST)?;
    let id = store.add_manifest(&sample_manifest("Contoso.Widget", "1.0")?, None)?;

    store.set_metadata_by_manifest_id(id, "installedScope", "machine")?;
    store.set_metadata_by_manifest_id(id, "installedScope", "user")?;

    let metadata = store.get_metadata_by_manifest_id(id)?;
    assert_eq!(metadata.get("installedScope"), Some(&"user".to_string()));
    Ok(())
}

#[test]
fn open_rejects_uplevel_for_write() -> Result<()> {
    let dir = temp_dir()?;
    let path = index_path(&dir, "index.db");
    {
        // A schema stamped with a future version.
        let store = IndexStore::create_new(&path, SchemaVersion::LATEST)?;
        drop(store);
        let conn = rusqlite::Connection::open(&path)?;
        conn.execute(
            "UPDATE metadata SET value = '9' WHERE name = 'majorVersion'",
            [],
        )?;
    }

    assert!(matches!(
        IndexStore::open(&path, OpenDisposition::ReadWrite),
        Err(IndexError::CannotWriteUpLevel { .. })
    ));
    // Read-only open of an up-level index is allowed.
    assert!(IndexStore::open(&path, OpenDisposition::ReadOnly).is_ok());
    Ok(())
}

#[test]
fn migration_upgrades_oldest_schema() -> Result<()> {
    let dir = temp_dir()?;
    let path = index_path(&dir, "index.db");
    {
        let store = IndexStore::create_new(&path, SchemaVersion::EARLIEST)?;
        drop(store);
    }

    let store = IndexStore::open(&path, OpenDisposition::ReadWrite)?;
    assert_eq!(store.version(), SchemaVersion::EARLIEST);
    assert!(store.migrate_to(SchemaVersion::LATEST)?);
    assert_eq!(store.version(), SchemaVersion::LATEST);

    // After migration the store accepts writes.
    store.add_manifest(&sample_manifest("Contoso.Widget", "1.0")?, None)?;
    Ok(())
}

#[test]
fn copy_from_clones_contents() -> Result<()> {
    let dir = temp_dir()?;
    let store = IndexStore::create_new(&index_path(&dir, "index.db"), SchemaVersion::LATEST)?;
    store.add_manifest(&sample_manifest("Contoso.Widget", "1.0")?, None)?;

    let clone = IndexStore::copy_from(&index_path(&dir, "clone.db"), &store)?;
    let request = SearchRequest {
        filters: vec![FilterClause::new(
            PackageMatchField::Id,
            MatchType::Exact,
            "Contoso.Widget",
        )],
        ..SearchRequest::default()
    };
    assert_eq!(clone.search(&request)?.matches.len(), 1);
    Ok(())
}

#[test]
fn prepare_for_packaging_drops_sideband_data() -> Result<()> {
    let dir = temp_dir()?;
    let store = IndexStore::create_new(&index_path(&dir, "index.db"), SchemaVersion::LATEST)?;
    let id = store.add_manifest(&sample_manifest("Contoso.Widget", "1.0")?, None)?;
    store.set_metadata_by_manifest_id(id, "tracking", "value")?;

    store.prepare_for_packaging()?;
    assert_eq!(store.get_metadata_by_manifest_id(id)?.len(), 0);
    assert!(store.check_consistency(true)?);
    Ok(())
}

#[test]
fn last_write_time_advances_on_mutation() -> Result<()> {
    let dir = temp_dir()?;
    let store = IndexStore::create_new(&index_path(&dir, "index.db"), SchemaVersion::LATEST)?;
    assert!(store.last_write_time()?.is_some());
    Ok(())
}
