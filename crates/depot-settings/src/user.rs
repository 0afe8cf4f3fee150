//! The user settings file and its tolerant loader.

use std::fs;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use depot_core::{Architecture, InstallerType, Scope};

use crate::error::{SettingsError, SettingsResult};
use crate::streams::{SettingsRoot, USER_SETTINGS, USER_SETTINGS_BACKUP};

const SECTION_SOURCE: &str = "source";
const SECTION_VISUAL: &str = "visual";
const SECTION_INSTALL_BEHAVIOR: &str = "installBehavior";
const SCHEMA_KEY: &str = "$schema";

const DEFAULT_AUTO_UPDATE_MINUTES: u32 = 5;

/// Visual style of the progress bar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProgressBarStyle {
    /// System accent colour.
    #[default]
    Accent,
    /// Rainbow sweep.
    Rainbow,
    /// Plain retro characters.
    Retro,
}

impl ProgressBarStyle {
    fn parse(text: &str) -> Option<Self> {
        match text {
            "accent" => Some(Self::Accent),
            "rainbow" => Some(Self::Rainbow),
            "retro" => Some(Self::Retro),
            _ => None,
        }
    }
}

/// The `source` settings section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSettings {
    /// Minutes between automatic source data refreshes.
    pub auto_update_interval_minutes: u32,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            auto_update_interval_minutes: DEFAULT_AUTO_UPDATE_MINUTES,
        }
    }
}

/// The `visual` settings section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisualSettings {
    /// Progress bar style.
    pub progress_bar: ProgressBarStyle,
}

/// One side of the install-behaviour section: either the preferences or
/// the requirements the user configured for installer selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallIntent {
    /// Requested install scope.
    pub scope: Option<Scope>,
    /// Requested installer locales, in priority order.
    pub locales: Vec<String>,
    /// Requested installer technologies, in priority order.
    pub installer_types: Vec<InstallerType>,
    /// Requested architectures, in priority order.
    pub architectures: Vec<Architecture>,
}

/// Which file the settings were loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserSettingsOrigin {
    /// Neither file parsed; everything is default.
    Default,
    /// The primary file parsed.
    Standard,
    /// The primary failed and the backup parsed.
    Backup,
}

/// The loaded user settings.
///
/// Loading never fails: each unreadable layer falls back to the next and
/// every anomaly is collected as a warning for the caller to surface.
#[derive(Debug, Clone)]
pub struct UserSettings {
    /// Which file the settings came from.
    pub origin: UserSettingsOrigin,
    /// The `source` section.
    pub source: SourceSettings,
    /// The `visual` section.
    pub visual: VisualSettings,
    /// Selection preferences from `installBehavior.preferences`.
    pub preferences: InstallIntent,
    /// Selection requirements from `installBehavior.requirements`.
    pub requirements: InstallIntent,
    /// Anomalies encountered while loading.
    pub warnings: Vec<String>,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            origin: UserSettingsOrigin::Default,
            source: SourceSettings::default(),
            visual: VisualSettings::default(),
            preferences: InstallIntent::default(),
            requirements: InstallIntent::default(),
            warnings: Vec::new(),
        }
    }
}

impl UserSettings {
    /// Load the user settings from the primary file, falling back to the
    /// backup and then to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error only when a stream cannot be opened at the IO
    /// level; parse failures degrade with warnings instead.
    pub fn load(root: &SettingsRoot) -> SettingsResult<Self> {
        let mut warnings = Vec::new();

        let primary = parse_stream(root, USER_SETTINGS, &mut warnings)?;
        if let Some(document) = primary {
            let mut settings = Self::from_document(&document, warnings);
            settings.origin = UserSettingsOrigin::Standard;
            return Ok(settings);
        }

        let backup = parse_stream(root, USER_SETTINGS_BACKUP, &mut warnings)?;
        if let Some(document) = backup {
            warnings.push("loaded settings from backup file".to_string());
            let mut settings = Self::from_document(&document, warnings);
            settings.origin = UserSettingsOrigin::Backup;
            return Ok(settings);
        }

        debug!("no user settings file parsed; using defaults");
        Ok(Self {
            warnings,
            ..Self::default()
        })
    }

    /// Refresh the backup copy: when the primary file parsed, copy it over
    /// the backup so the next failed edit can be recovered from.
    ///
    /// # Errors
    ///
    /// Returns an error if the copy fails.
    pub fn prepare_backup(&self, root: &SettingsRoot) -> SettingsResult<()> {
        if self.origin != UserSettingsOrigin::Standard {
            return Ok(());
        }

        let from = root.path().join(USER_SETTINGS.name);
        let to = root.path().join(USER_SETTINGS_BACKUP.name);
        let staged = to.with_extension("staged");
        fs::copy(&from, &staged).map_err(|source| SettingsError::Io {
            operation: "user_settings.backup.stage",
            path: staged.clone(),
            source,
        })?;
        fs::rename(&staged, &to).map_err(|source| SettingsError::Io {
            operation: "user_settings.backup.commit",
            path: to.clone(),
            source,
        })?;
        Ok(())
    }

    fn from_document(document: &Map<String, Value>, mut warnings: Vec<String>) -> Self {
        let mut settings = Self::default();

        for (key, value) in document {
            match key.as_str() {
                SECTION_SOURCE => {
                    settings.source = parse_source_section(value, &mut warnings);
                }
                SECTION_VISUAL => {
                    settings.visual = parse_visual_section(value, &mut warnings);
                }
                SECTION_INSTALL_BEHAVIOR => {
                    let (preferences, requirements) =
                        parse_install_behavior(value, &mut warnings);
                    settings.preferences = preferences;
                    settings.requirements = requirements;
                }
                SCHEMA_KEY => {}
                other => {
                    warnings.push(format!("unrecognized settings key '{other}'"));
                }
            }
        }

        settings.warnings = warnings;
        settings
    }
}

fn parse_stream(
    root: &SettingsRoot,
    definition: crate::streams::StreamDefinition,
    warnings: &mut Vec<String>,
) -> SettingsResult<Option<Map<String, Value>>> {
    let mut stream = root.stream(definition)?;
    let Some(bytes) = stream.get()? else {
        return Ok(None);
    };

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Ok(Some(map)),
        Ok(_) => {
            warnings.push(format!("{}: settings root must be an object", definition.name));
            Ok(None)
        }
        Err(error) => {
            warn!(stream = definition.name, %error, "settings file failed to parse");
            warnings.push(format!("{}: {error}", definition.name));
            Ok(None)
        }
    }
}

fn parse_source_section(value: &Value, warnings: &mut Vec<String>) -> SourceSettings {
    let mut settings = SourceSettings::default();
    let Some(section) = expect_object(value, SECTION_SOURCE, warnings) else {
        return settings;
    };

    for (key, value) in section {
        match key.as_str() {
            "autoUpdateIntervalInMinutes" => {
                match value.as_u64().and_then(|raw| u32::try_from(raw).ok()) {
                    Some(minutes) => settings.auto_update_interval_minutes = minutes,
                    None => warnings.push(
                        "source.autoUpdateIntervalInMinutes must be an unsigned integer"
                            .to_string(),
                    ),
                }
            }
            other => warnings.push(format!("unrecognized settings key 'source.{other}'")),
        }
    }

    settings
}

fn parse_visual_section(value: &Value, warnings: &mut Vec<String>) -> VisualSettings {
    let mut settings = VisualSettings::default();
    let Some(section) = expect_object(value, SECTION_VISUAL, warnings) else {
        return settings;
    };

    for (key, value) in section {
        match key.as_str() {
            "progressBar" => match value.as_str().and_then(ProgressBarStyle::parse) {
                Some(style) => settings.progress_bar = style,
                None => warnings.push(
                    "visual.progressBar must be one of 'accent', 'rainbow', 'retro'".to_string(),
                ),
            },
            other => warnings.push(format!("unrecognized settings key 'visual.{other}'")),
        }
    }

    settings
}

fn parse_install_behavior(
    value: &Value,
    warnings: &mut Vec<String>,
) -> (InstallIntent, InstallIntent) {
    let mut preferences = InstallIntent::default();
    let mut requirements = InstallIntent::default();
    let Some(section) = expect_object(value, SECTION_INSTALL_BEHAVIOR, warnings) else {
        return (preferences, requirements);
    };

    for (key, value) in section {
        match key.as_str() {
            "preferences" => preferences = parse_intent(value, "preferences", warnings),
            "requirements" => requirements = parse_intent(value, "requirements", warnings),
            other => {
                warnings.push(format!("unrecognized settings key 'installBehavior.{other}'"));
            }
        }
    }

    (preferences, requirements)
}

fn parse_intent(value: &Value, side: &str, warnings: &mut Vec<String>) -> InstallIntent {
    let mut intent = InstallIntent::default();
    let Some(section) = expect_object(value, side, warnings) else {
        return intent;
    };

    for (key, value) in section {
        match key.as_str() {
            "scope" => match value.as_str() {
                Some(text) => intent.scope = Some(Scope::parse(text)),
                None => warnings.push(format!("installBehavior.{side}.scope must be a string")),
            },
            "locale" => intent.locales = parse_string_list(value, side, "locale", warnings),
            "installerTypes" => {
                intent.installer_types =
                    parse_string_list(value, side, "installerTypes", warnings)
                        .iter()
                        .map(|text| InstallerType::parse(text))
                        .collect();
            }
            "architectures" => {
                intent.architectures = parse_string_list(value, side, "architectures", warnings)
                    .iter()
                    .map(|text| Architecture::parse(text))
                    .collect();
            }
            other => {
                warnings.push(format!("unrecognized settings key 'installBehavior.{side}.{other}'"));
            }
        }
    }

    intent
}

fn parse_string_list(
    value: &Value,
    side: &str,
    field: &str,
    warnings: &mut Vec<String>,
) -> Vec<String> {
    match value.as_array() {
        Some(items) => items
            .iter()
            .filter_map(|item| match item.as_str() {
                Some(text) => Some(text.to_string()),
                None => {
                    warnings.push(format!(
                        "installBehavior.{side}.{field} entries must be strings"
                    ));
                    None
                }
            })
            .collect(),
        None => {
            warnings.push(format!("installBehavior.{side}.{field} must be an array"));
            Vec::new()
        }
    }
}

fn expect_object<'a>(
    value: &'a Value,
    section: &str,
    warnings: &mut Vec<String>,
) -> Option<&'a Map<String, Value>> {
    match value.as_object() {
        Some(map) => Some(map),
        None => {
            warnings.push(format!("settings section '{section}' must be an object"));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    type TestResult<T> = anyhow::Result<T>;

    fn temp_root() -> TestResult<(TempDir, SettingsRoot)> {
        let dir = tempfile::Builder::new().prefix("depot-user-").tempdir()?;
        let root = SettingsRoot::new(dir.path())?;
        Ok((dir, root))
    }

    fn write_stream(
        root: &SettingsRoot,
        definition: crate::streams::StreamDefinition,
        content: &str,
    ) -> TestResult<()> {
        let mut stream = root.stream(definition)?;
        assert!(stream.set(content.as_bytes())?);
        Ok(())
    }

    #[test]
    fn missing_files_yield_defaults() -> TestResult<()> {
        let (_dir, root) = temp_root()?;
        let settings = UserSettings::load(&root)?;
        assert_eq!(settings.origin, UserSettingsOrigin::Default);
        assert_eq!(settings.source.auto_update_interval_minutes, 5);
        assert_eq!(settings.visual.progress_bar, ProgressBarStyle::Accent);
        Ok(())
    }

    #[test]
    fn primary_file_is_preferred() -> TestResult<()> {
        let (_dir, root) = temp_root()?;
        write_stream(
            &root,
            USER_SETTINGS,
            r#"{"source": {"autoUpdateIntervalInMinutes": 30}, "visual": {"progressBar": "retro"}}"#,
        )?;

        let settings = UserSettings::load(&root)?;
        assert_eq!(settings.origin, UserSettingsOrigin::Standard);
        assert_eq!(settings.source.auto_update_interval_minutes, 30);
        assert_eq!(settings.visual.progress_bar, ProgressBarStyle::Retro);
        assert!(settings.warnings.is_empty());
        Ok(())
    }

    #[test]
    fn broken_primary_falls_back_to_backup() -> TestResult<()> {
        let (_dir, root) = temp_root()?;
        write_stream(&root, USER_SETTINGS, "{ this is not json")?;
        write_stream(
            &root,
            USER_SETTINGS_BACKUP,
            r#"{"source": {"autoUpdateIntervalInMinutes": 7}}"#,
        )?;

        let settings = UserSettings::load(&root)?;
        assert_eq!(settings.origin, UserSettingsOrigin::Backup);
        assert_eq!(settings.source.auto_update_interval_minutes, 7);
        assert!(!settings.warnings.is_empty());
        Ok(())
    }

    #[test]
    fn unknown_keys_warn_but_do_not_fail() -> TestResult<()> {
        let (_dir, root) = temp_root()?;
        write_stream(
            &root,
            USER_SETTINGS,
            r#"{"telemetry": {}, "visual": {"progressBar": "rainbow", "sparkle": true}}"#,
        )?;

        let settings = UserSettings::load(&root)?;
        assert_eq!(settings.visual.progress_bar, ProgressBarStyle::Rainbow);
        assert_eq!(settings.warnings.len(), 2);
        Ok(())
    }

    #[test]
    fn install_behavior_sections_parse() -> TestResult<()> {
        let (_dir, root) = temp_root()?;
        write_stream(
            &root,
            USER_SETTINGS,
            r#"{
                "installBehavior": {
                    "preferences": {"scope": "user", "locale": ["en-US", "fr-FR"]},
                    "requirements": {"installerTypes": ["msi", "wix"], "architectures": ["x64"]}
                }
            }"#,
        )?;

        let settings = UserSettings::load(&root)?;
        assert_eq!(settings.preferences.scope, Some(Scope::User));
        assert_eq!(settings.preferences.locales, vec!["en-US", "fr-FR"]);
        assert_eq!(
            settings.requirements.installer_types,
            vec![InstallerType::Msi, InstallerType::Wix]
        );
        assert_eq!(settings.requirements.architectures, vec![Architecture::X64]);
        Ok(())
    }

    #[test]
    fn prepare_backup_copies_primary() -> TestResult<()> {
        let (_dir, root) = temp_root()?;
        let content = r#"{"source": {"autoUpdateIntervalInMinutes": 12}}"#;
        write_stream(&root, USER_SETTINGS, content)?;

        let settings = UserSettings::load(&root)?;
        settings.prepare_backup(&root)?;

        let mut backup = root.stream(USER_SETTINGS_BACKUP)?;
        assert_eq!(backup.get()?, Some(content.as_bytes().to_vec()));
        Ok(())
    }

    #[test]
    fn invalid_interval_keeps_default_with_warning() -> TestResult<()> {
        let (_dir, root) = temp_root()?;
        write_stream(
            &root,
            USER_SETTINGS,
            r#"{"source": {"autoUpdateIntervalInMinutes": "soon"}}"#,
        )?;

        let settings = UserSettings::load(&root)?;
        assert_eq!(settings.source.auto_update_interval_minutes, 5);
        assert_eq!(settings.warnings.len(), 1);
        Ok(())
    }
}
