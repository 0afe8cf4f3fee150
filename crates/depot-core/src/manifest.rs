//! Manifest and installer aggregates.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::identifier::{Channel, PackageIdentifier};
use crate::platform::{Architecture, InstallerType, Scope};
use crate::version::{Version, VersionAndChannel, VersionRange};

/// One Add/Remove Programs registration an installer writes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppsAndFeaturesEntry {
    /// Display name registered by the installer.
    pub display_name: Option<String>,
    /// Publisher registered by the installer.
    pub publisher: Option<String>,
    /// Display version registered by the installer.
    pub display_version: Option<Version>,
    /// Product code registered by the installer.
    pub product_code: Option<String>,
    /// Installer technology override for this registration.
    pub installer_type: Option<InstallerType>,
}

/// Market restrictions declared by an installer.
///
/// When the allowed list is non-empty it takes precedence and the excluded
/// list is ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketInfo {
    /// Markets the installer may be offered in.
    #[serde(default)]
    pub allowed: Vec<String>,
    /// Markets the installer must not be offered in.
    #[serde(default)]
    pub excluded: Vec<String>,
}

impl MarketInfo {
    /// Whether no restriction is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty() && self.excluded.is_empty()
    }
}

/// One installer candidate within a manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Installer {
    /// Processor architecture of the payload.
    pub architecture: Architecture,
    /// Installer technology declared by the manifest.
    pub base_installer_type: InstallerType,
    /// Install scope declared by the manifest.
    #[serde(default)]
    pub scope: Scope,
    /// BCP-47 locale of the payload; empty when undeclared.
    #[serde(default)]
    pub locale: String,
    /// Minimum OS version required by the payload.
    pub min_os_version: Option<Version>,
    /// System architectures the payload refuses to run under.
    #[serde(default)]
    pub unsupported_os_architectures: Vec<Architecture>,
    /// Market restrictions for the payload.
    #[serde(default)]
    pub markets: MarketInfo,
    /// Add/Remove Programs registrations the payload writes.
    #[serde(default)]
    pub apps_and_features_entries: Vec<AppsAndFeaturesEntry>,
    /// Package family name for packaged payloads.
    pub package_family_name: Option<String>,
    /// Product code for Windows Installer payloads.
    pub product_code: Option<String>,
    /// Commands made available on the path after install.
    #[serde(default)]
    pub commands: Vec<String>,
}

impl Installer {
    /// The installer technology after applying Add/Remove Programs
    /// overrides: when every registration declares the same concrete type,
    /// that type wins over the base declaration.
    #[must_use]
    pub fn effective_installer_type(&self) -> InstallerType {
        let mut entries = self
            .apps_and_features_entries
            .iter()
            .filter_map(|entry| entry.installer_type)
            .filter(|kind| *kind != InstallerType::Unknown);

        match entries.next() {
            Some(first) if entries.all(|kind| kind == first) => first,
            _ => self.base_installer_type,
        }
    }
}

/// A dependency on another package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDependency {
    /// Identifier of the depended-on package.
    pub package_id: PackageIdentifier,
    /// Minimum acceptable version, when constrained.
    pub min_version: Option<Version>,
}

/// A package manifest: one version of one package, with its installer
/// candidates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Identifier of the package.
    pub id: PackageIdentifier,
    /// Version this manifest describes.
    pub version: Version,
    /// Release track this manifest belongs to.
    #[serde(default)]
    pub channel: Channel,
    /// Default-localization display name.
    pub name: String,
    /// Default-localization publisher.
    #[serde(default)]
    pub publisher: String,
    /// Alternate one-word name for the package.
    pub moniker: Option<String>,
    /// Search tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// BCP-47 locale of the default localization.
    #[serde(default)]
    pub locale: String,
    /// Packages this manifest depends on.
    #[serde(default)]
    pub dependencies: Vec<PackageDependency>,
    /// Installer candidates; at least one.
    pub installers: Vec<Installer>,
}

impl Manifest {
    /// Validate the manifest invariants that the type system cannot carry.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest declares no installers.
    pub fn validate(&self) -> CoreResult<()> {
        if self.installers.is_empty() {
            return Err(CoreError::ManifestWithoutInstallers {
                id: self.id.as_str().to_string(),
            });
        }
        Ok(())
    }

    /// The version key of this manifest.
    #[must_use]
    pub fn version_key(&self) -> VersionAndChannel {
        VersionAndChannel::new(self.version.clone(), self.channel.clone())
    }

    /// The Add/Remove Programs version range declared across all
    /// installers' registrations, when any registration declares a display
    /// version.
    #[must_use]
    pub fn arp_version_range(&self) -> Option<VersionRange> {
        let mut min: Option<Version> = None;
        let mut max: Option<Version> = None;

        for installer in &self.installers {
            for entry in &installer.apps_and_features_entries {
                let Some(version) = &entry.display_version else {
                    continue;
                };
                match &min {
                    Some(current) if current <= version => {}
                    _ => min = Some(version.clone()),
                }
                match &max {
                    Some(current) if current >= version => {}
                    _ => max = Some(version.clone()),
                }
            }
        }

        match (min, max) {
            (Some(min), Some(max)) => VersionRange::new(min, max).ok(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_with_versions(versions: &[&str]) -> Manifest {
        Manifest {
            id: PackageIdentifier::new("Contoso.Widget").expect("valid id"),
            version: Version::parse("1.0"),
            channel: Channel::default(),
            name: "Widget".to_string(),
            publisher: "Contoso".to_string(),
            moniker: None,
            tags: Vec::new(),
            locale: String::new(),
            dependencies: Vec::new(),
            installers: vec![Installer {
                architecture: Architecture::X64,
                base_installer_type: InstallerType::Msi,
                apps_and_features_entries: versions
                    .iter()
                    .map(|v| AppsAndFeaturesEntry {
                        display_version: Some(Version::parse(v)),
                        ..AppsAndFeaturesEntry::default()
                    })
                    .collect(),
                ..Installer::default()
            }],
        }
    }

    #[test]
    fn validate_requires_an_installer() {
        let mut manifest = manifest_with_versions(&[]);
        manifest.installers.clear();
        assert!(matches!(
            manifest.validate(),
            Err(CoreError::ManifestWithoutInstallers { .. })
        ));
    }

    #[test]
    fn arp_range_spans_all_display_versions() {
        let manifest = manifest_with_versions(&["1.5", "1.0", "2.0"]);
        let range = manifest.arp_version_range().expect("range expected");
        assert_eq!(range.min(), &Version::parse("1.0"));
        assert_eq!(range.max(), &Version::parse("2.0"));
    }

    #[test]
    fn arp_range_absent_without_display_versions() {
        let manifest = manifest_with_versions(&[]);
        assert!(manifest.arp_version_range().is_none());
    }

    #[test]
    fn effective_type_uses_agreeing_overrides() {
        let mut installer = Installer {
            base_installer_type: InstallerType::Exe,
            ..Installer::default()
        };
        installer.apps_and_features_entries = vec![
            AppsAndFeaturesEntry {
                installer_type: Some(InstallerType::Burn),
                ..AppsAndFeaturesEntry::default()
            },
            AppsAndFeaturesEntry {
                installer_type: Some(InstallerType::Burn),
                ..AppsAndFeaturesEntry::default()
            },
        ];
        assert_eq!(installer.effective_installer_type(), InstallerType::Burn);

        installer.apps_and_features_entries[1].installer_type = Some(InstallerType::Msi);
        assert_eq!(installer.effective_installer_type(), InstallerType::Exe);
    }
}
