//! Canned manifests, installers, and policy gates.

use anyhow::Result;
use tempfile::TempDir;

use depot_core::{
    Architecture, Channel, Installer, InstallerType, Manifest, PackageIdentifier, Version,
};
use depot_policy::{MemoryPolicyStore, PolicyGate};

/// A temp directory for test state.
///
/// # Errors
///
/// Returns an error if the directory cannot be created.
pub fn temp_dir(prefix: &str) -> Result<TempDir> {
    Ok(tempfile::Builder::new().prefix(prefix).tempdir()?)
}

/// A 64-bit Windows Installer payload carrying a product code derived
/// from the package identifier.
#[must_use]
pub fn sample_installer(id: &str) -> Installer {
    Installer {
        architecture: Architecture::X64,
        base_installer_type: InstallerType::Msi,
        product_code: Some(format!("{{{id}}}")),
        package_family_name: Some(format!("{}_8wekyb3d8bbwe", id.replace('.', ""))),
        commands: vec![
            id.split('.')
                .next_back()
                .unwrap_or(id)
                .to_lowercase(),
        ],
        ..Installer::default()
    }
}

/// A one-installer manifest with the default-channel identity
/// `(id, version, "")`, a display name taken from the identifier's last
/// segment, and a couple of searchable tags.
///
/// # Errors
///
/// Returns an error if the identifier is rejected.
pub fn sample_manifest(id: &str, version: &str) -> Result<Manifest> {
    let name = id.split('.').next_back().unwrap_or(id).to_string();
    Ok(Manifest {
        id: PackageIdentifier::new(id)?,
        version: Version::parse(version),
        channel: Channel::default(),
        name,
        publisher: id.split('.').next().unwrap_or(id).to_string(),
        moniker: None,
        tags: vec!["test".to_string()],
        locale: "en-US".to_string(),
        dependencies: Vec::new(),
        installers: vec![sample_installer(id)],
    })
}

/// A policy gate built from a store customised by `configure`.
#[must_use]
pub fn gate_with(configure: impl FnOnce(MemoryPolicyStore) -> MemoryPolicyStore) -> PolicyGate {
    PolicyGate::from_store(&configure(MemoryPolicyStore::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_manifest_is_valid() -> Result<()> {
        let manifest = sample_manifest("Contoso.Widget", "1.0")?;
        manifest.validate()?;
        assert_eq!(manifest.name, "Widget");
        assert_eq!(manifest.publisher, "Contoso");
        Ok(())
    }

    #[test]
    fn gate_with_applies_configuration() {
        let gate = gate_with(|store| store.with_integer("DisablePackageManager", 1));
        assert!(gate.is_enabled(depot_policy::TogglePolicy::DisablePackageManager));
    }
}
