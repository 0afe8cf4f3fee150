//! Per-installer rejection reasons as a bit set.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// The reasons one installer was rejected, collected across all filters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Inapplicability(u16);

impl Inapplicability {
    /// No rejection; the installer is applicable.
    pub const NONE: Self = Self(0);
    /// Minimum OS version not met.
    pub const OS_VERSION: Self = Self(1);
    /// Architecture not runnable or excluded.
    pub const MACHINE_ARCHITECTURE: Self = Self(1 << 1);
    /// Installer technology not in the required set.
    pub const INSTALLER_TYPE: Self = Self(1 << 2);
    /// Incompatible with the installed technology.
    pub const INSTALLED_TYPE: Self = Self(1 << 3);
    /// Scope conflicts with the existing install.
    pub const INSTALLED_SCOPE: Self = Self(1 << 4);
    /// Scope conflicts with the requirement.
    pub const SCOPE: Self = Self(1 << 5);
    /// Locale requirement not met.
    pub const LOCALE: Self = Self(1 << 6);
    /// Locale incompatible with the existing install.
    pub const INSTALLED_LOCALE: Self = Self(1 << 7);
    /// Market restriction excludes this machine.
    pub const MARKET: Self = Self(1 << 8);

    const NAMES: [(Self, &'static str); 9] = [
        (Self::OS_VERSION, "os-version"),
        (Self::MACHINE_ARCHITECTURE, "machine-architecture"),
        (Self::INSTALLER_TYPE, "installer-type"),
        (Self::INSTALLED_TYPE, "installed-type"),
        (Self::INSTALLED_SCOPE, "installed-scope"),
        (Self::SCOPE, "scope"),
        (Self::LOCALE, "locale"),
        (Self::INSTALLED_LOCALE, "installed-locale"),
        (Self::MARKET, "market"),
    ];

    /// Whether no reason has been recorded.
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Whether every bit of `other` is present.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Inapplicability {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Inapplicability {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Inapplicability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return f.write_str("none");
        }
        let mut first = true;
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}
