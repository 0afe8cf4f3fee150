//! Platform enumerations: architecture, scope, and installer technology.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Processor architecture of an installer or of the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    /// Architecture-independent payload; applicable everywhere.
    Neutral,
    /// 32-bit x86.
    X86,
    /// 64-bit x86.
    X64,
    /// 32-bit ARM.
    Arm,
    /// 64-bit ARM.
    Arm64,
    /// Sentinel for an undeclared architecture.
    #[default]
    Unknown,
}

impl Architecture {
    /// Render the canonical lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Neutral => "neutral",
            Self::X86 => "x86",
            Self::X64 => "x64",
            Self::Arm => "arm",
            Self::Arm64 => "arm64",
            Self::Unknown => "unknown",
        }
    }

    /// Parse from the canonical name, case-insensitively.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        match text.trim().to_lowercase().as_str() {
            "neutral" => Self::Neutral,
            "x86" => Self::X86,
            "x64" => Self::X64,
            "arm" => Self::Arm,
            "arm64" => Self::Arm64,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a package installs for one user or the whole machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Scope not declared.
    #[default]
    Unknown,
    /// Installs into the current user's profile.
    User,
    /// Installs machine-wide.
    Machine,
}

impl Scope {
    /// Render the canonical lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::User => "user",
            Self::Machine => "machine",
        }
    }

    /// Parse from the canonical name, case-insensitively.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        match text.trim().to_lowercase().as_str() {
            "user" => Self::User,
            "machine" => Self::Machine,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Installer technology declared by a manifest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallerType {
    /// Technology not declared.
    #[default]
    Unknown,
    /// Windows Installer package.
    Msi,
    /// MSIX package.
    Msix,
    /// Plain executable installer.
    Exe,
    /// Inno Setup executable.
    Inno,
    /// Nullsoft (NSIS) executable.
    Nullsoft,
    /// WiX-built Windows Installer package.
    Wix,
    /// WiX Burn bundle executable.
    Burn,
    /// Standalone portable executable.
    Portable,
    /// Archive extracted in place.
    Zip,
    /// Font package.
    Font,
}

impl InstallerType {
    /// Render the canonical lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Msi => "msi",
            Self::Msix => "msix",
            Self::Exe => "exe",
            Self::Inno => "inno",
            Self::Nullsoft => "nullsoft",
            Self::Wix => "wix",
            Self::Burn => "burn",
            Self::Portable => "portable",
            Self::Zip => "zip",
            Self::Font => "font",
        }
    }

    /// Parse from the canonical name, case-insensitively.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        match text.trim().to_lowercase().as_str() {
            "msi" => Self::Msi,
            "msix" => Self::Msix,
            "exe" => Self::Exe,
            "inno" => Self::Inno,
            "nullsoft" => Self::Nullsoft,
            "wix" => Self::Wix,
            "burn" => Self::Burn,
            "portable" => Self::Portable,
            "zip" => Self::Zip,
            "font" => Self::Font,
            _ => Self::Unknown,
        }
    }

    /// Whether the caller controls scope for this technology, making the
    /// manifest-declared scope irrelevant during selection.
    #[must_use]
    pub const fn ignores_scope_from_manifest(self) -> bool {
        matches!(self, Self::Msix | Self::Portable | Self::Font)
    }

    /// Whether an installer of this type can service a package installed
    /// with the given technology.
    ///
    /// Types are compatible with themselves and within the Windows
    /// Installer family (`Msi`/`Wix`) and the self-extracting executable
    /// family (`Exe`/`Inno`/`Nullsoft`/`Burn`). `Unknown` is compatible
    /// with nothing.
    #[must_use]
    pub const fn is_compatible_with(self, installed: Self) -> bool {
        match (self, installed) {
            (Self::Unknown, _) | (_, Self::Unknown) => false,
            _ => {
                (self as u8 == installed as u8)
                    || (self.is_windows_installer_family() && installed.is_windows_installer_family())
                    || (self.is_executable_family() && installed.is_executable_family())
            }
        }
    }

    const fn is_windows_installer_family(self) -> bool {
        matches!(self, Self::Msi | Self::Wix)
    }

    const fn is_executable_family(self) -> bool {
        matches!(self, Self::Exe | Self::Inno | Self::Nullsoft | Self::Burn)
    }
}

impl fmt::Display for InstallerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_every_architecture() {
        for arch in [
            Architecture::Neutral,
            Architecture::X86,
            Architecture::X64,
            Architecture::Arm,
            Architecture::Arm64,
            Architecture::Unknown,
        ] {
            assert_eq!(Architecture::parse(arch.as_str()), arch);
        }
    }

    #[test]
    fn parse_round_trips_every_installer_type() {
        for kind in [
            InstallerType::Msi,
            InstallerType::Msix,
            InstallerType::Exe,
            InstallerType::Inno,
            InstallerType::Nullsoft,
            InstallerType::Wix,
            InstallerType::Burn,
            InstallerType::Portable,
            InstallerType::Zip,
            InstallerType::Font,
        ] {
            assert_eq!(InstallerType::parse(kind.as_str()), kind);
        }
    }

    #[test]
    fn installer_families_are_mutually_compatible() {
        assert!(InstallerType::Msi.is_compatible_with(InstallerType::Wix));
        assert!(InstallerType::Inno.is_compatible_with(InstallerType::Burn));
        assert!(InstallerType::Exe.is_compatible_with(InstallerType::Exe));
        assert!(!InstallerType::Msi.is_compatible_with(InstallerType::Exe));
        assert!(!InstallerType::Unknown.is_compatible_with(InstallerType::Unknown));
    }

    #[test]
    fn scope_agnostic_types() {
        assert!(InstallerType::Msix.ignores_scope_from_manifest());
        assert!(InstallerType::Portable.ignores_scope_from_manifest());
        assert!(!InstallerType::Msi.ignores_scope_from_manifest());
    }
}
