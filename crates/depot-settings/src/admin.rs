//! Administrator settings: a flat flag map in a secure stream.

use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use depot_policy::{PolicyGate, PolicyState, TogglePolicy};

use crate::error::{SettingsError, SettingsResult};
use crate::streams::{ADMIN_SETTINGS, SettingsRoot, Stream};

const LOCAL_MANIFEST_FILES: &str = "LocalManifestFiles";
const BYPASS_STORE_CERTIFICATE_PINNING: &str = "BypassStoreCertificatePinning";

/// How many times a contended save is retried before giving up.
const SAVE_ATTEMPTS: usize = 10;

/// Settings only an administrator may change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminSetting {
    /// Permit installing from local manifest files.
    LocalManifestFiles,
    /// Skip certificate pinning when talking to the store source.
    BypassStoreCertificatePinning,
}

impl AdminSetting {
    /// The name the setting is stored under.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LocalManifestFiles => LOCAL_MANIFEST_FILES,
            Self::BypassStoreCertificatePinning => BYPASS_STORE_CERTIFICATE_PINNING,
        }
    }

    /// Parse a setting from its stored name, case-insensitively.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        if text.eq_ignore_ascii_case(LOCAL_MANIFEST_FILES) {
            Some(Self::LocalManifestFiles)
        } else if text.eq_ignore_ascii_case(BYPASS_STORE_CERTIFICATE_PINNING) {
            Some(Self::BypassStoreCertificatePinning)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct AdminSettingValues {
    local_manifest_files: bool,
    bypass_store_certificate_pinning: bool,
}

/// Handle over the administrator settings stream.
#[derive(Debug)]
pub struct AdminSettings {
    stream: Stream,
    values: AdminSettingValues,
}

impl AdminSettings {
    /// Open the administrator settings, tolerating absent or malformed
    /// content (everything reads as default).
    ///
    /// # Errors
    ///
    /// Returns an error only when the backing stream cannot be opened or
    /// read at the IO level.
    pub fn open(root: &SettingsRoot) -> SettingsResult<Self> {
        let mut stream = root.stream(ADMIN_SETTINGS)?;
        let values = load_values(&mut stream)?;
        Ok(Self { stream, values })
    }

    /// Whether a setting is in effect, honouring policy overrides.
    ///
    /// A configured `DisableLocalManifestFiles` policy wins over the stored
    /// local-manifest flag in either direction.
    #[must_use]
    pub fn is_enabled(&self, setting: AdminSetting, gate: &PolicyGate) -> bool {
        if matches!(setting, AdminSetting::LocalManifestFiles) {
            match gate.state(TogglePolicy::DisableLocalManifestFiles) {
                PolicyState::Enabled => return false,
                PolicyState::Disabled => return true,
                PolicyState::NotConfigured => {}
            }
        }

        match setting {
            AdminSetting::LocalManifestFiles => self.values.local_manifest_files,
            AdminSetting::BypassStoreCertificatePinning => {
                self.values.bypass_store_certificate_pinning
            }
        }
    }

    /// Persist a new value for a setting.
    ///
    /// Concurrent writers are tolerated by reloading and retrying a bounded
    /// number of times.
    ///
    /// # Errors
    ///
    /// Returns an error if saving fails at the IO level or the retry budget
    /// is exhausted.
    pub fn set(&mut self, setting: AdminSetting, enabled: bool) -> SettingsResult<()> {
        for _ in 0..SAVE_ATTEMPTS {
            match setting {
                AdminSetting::LocalManifestFiles => self.values.local_manifest_files = enabled,
                AdminSetting::BypassStoreCertificatePinning => {
                    self.values.bypass_store_certificate_pinning = enabled;
                }
            }

            if self.save()? {
                debug!(setting = setting.as_str(), enabled, "admin setting saved");
                return Ok(());
            }

            // Lost the race; pick up the other writer's state and go again.
            self.values = load_values(&mut self.stream)?;
        }

        Err(SettingsError::TooManyAttempts {
            operation: "admin_settings.set",
        })
    }

    fn save(&mut self) -> SettingsResult<bool> {
        let document = json!({
            LOCAL_MANIFEST_FILES: self.values.local_manifest_files,
            BYPASS_STORE_CERTIFICATE_PINNING: self.values.bypass_store_certificate_pinning,
        });
        let bytes = serde_json::to_vec_pretty(&document).map_err(|source| {
            SettingsError::Serialize {
                stream: ADMIN_SETTINGS.name,
                source,
            }
        })?;
        self.stream.set(&bytes)
    }
}

fn load_values(stream: &mut Stream) -> SettingsResult<AdminSettingValues> {
    let Some(bytes) = stream.get()? else {
        debug!("admin settings not present; using defaults");
        return Ok(AdminSettingValues::default());
    };

    let document: Map<String, Value> = match serde_json::from_slice(&bytes) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            warn!("admin settings did not contain the expected format; using defaults");
            return Ok(AdminSettingValues::default());
        }
        Err(error) => {
            warn!(%error, "admin settings contained invalid JSON; using defaults");
            return Ok(AdminSettingValues::default());
        }
    };

    let mut values = AdminSettingValues::default();
    if let Some(flag) = read_flag(&document, LOCAL_MANIFEST_FILES) {
        values.local_manifest_files = flag;
    }
    if let Some(flag) = read_flag(&document, BYPASS_STORE_CERTIFICATE_PINNING) {
        values.bypass_store_certificate_pinning = flag;
    }
    Ok(values)
}

fn read_flag(document: &Map<String, Value>, name: &str) -> Option<bool> {
    match document.get(name) {
        Some(Value::Bool(flag)) => Some(*flag),
        Some(_) => {
            warn!(setting = name, "admin setting did not contain the expected format");
            None
        }
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_policy::MemoryPolicyStore;
    use tempfile::TempDir;

    type TestResult<T> = anyhow::Result<T>;

    fn temp_root() -> TestResult<(TempDir, SettingsRoot)> {
        let dir = tempfile::Builder::new().prefix("depot-admin-").tempdir()?;
        let root = SettingsRoot::new(dir.path())?;
        Ok((dir, root))
    }

    #[test]
    fn defaults_are_disabled() -> TestResult<()> {
        let (_dir, root) = temp_root()?;
        let settings = AdminSettings::open(&root)?;
        let gate = PolicyGate::not_configured();
        assert!(!settings.is_enabled(AdminSetting::LocalManifestFiles, &gate));
        assert!(!settings.is_enabled(AdminSetting::BypassStoreCertificatePinning, &gate));
        Ok(())
    }

    #[test]
    fn set_persists_across_reopen() -> TestResult<()> {
        let (_dir, root) = temp_root()?;
        let gate = PolicyGate::not_configured();

        let mut settings = AdminSettings::open(&root)?;
        settings.set(AdminSetting::LocalManifestFiles, true)?;

        let reopened = AdminSettings::open(&root)?;
        assert!(reopened.is_enabled(AdminSetting::LocalManifestFiles, &gate));
        Ok(())
    }

    #[test]
    fn contended_write_retries_and_keeps_both_values() -> TestResult<()> {
        let (_dir, root) = temp_root()?;
        let gate = PolicyGate::not_configured();

        let mut first = AdminSettings::open(&root)?;
        let mut second = AdminSettings::open(&root)?;

        first.set(AdminSetting::LocalManifestFiles, true)?;
        // The second handle's save loses the first race, reloads, retries.
        second.set(AdminSetting::BypassStoreCertificatePinning, true)?;

        let reopened = AdminSettings::open(&root)?;
        assert!(reopened.is_enabled(AdminSetting::LocalManifestFiles, &gate));
        assert!(reopened.is_enabled(AdminSetting::BypassStoreCertificatePinning, &gate));
        Ok(())
    }

    #[test]
    fn malformed_content_reads_as_defaults() -> TestResult<()> {
        let (_dir, root) = temp_root()?;
        let mut stream = root.stream(ADMIN_SETTINGS)?;
        assert!(stream.set(b"not json")?);

        let settings = AdminSettings::open(&root)?;
        let gate = PolicyGate::not_configured();
        assert!(!settings.is_enabled(AdminSetting::LocalManifestFiles, &gate));
        Ok(())
    }

    #[test]
    fn policy_overrides_stored_value() -> TestResult<()> {
        let (_dir, root) = temp_root()?;
        let mut settings = AdminSettings::open(&root)?;
        settings.set(AdminSetting::LocalManifestFiles, true)?;

        let blocking = PolicyGate::from_store(
            &MemoryPolicyStore::new().with_integer("DisableLocalManifestFiles", 1),
        );
        assert!(!settings.is_enabled(AdminSetting::LocalManifestFiles, &blocking));

        let forcing = PolicyGate::from_store(
            &MemoryPolicyStore::new().with_integer("DisableLocalManifestFiles", 0),
        );
        settings.set(AdminSetting::LocalManifestFiles, false)?;
        assert!(settings.is_enabled(AdminSetting::LocalManifestFiles, &forcing));
        Ok(())
    }
}
