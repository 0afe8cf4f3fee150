//! Named byte streams over a filesystem state root.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{SettingsError, SettingsResult};

/// Placement class of a stream.
///
/// The class drives where a stream lives and who may write it; enforcement
/// of the `Secure` class is delegated to the deployment (directory ACLs on
/// the state root), the core only routes streams by class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamClass {
    /// Process-owned state.
    Standard,
    /// Human-editable files.
    UserFile,
    /// Modifiable only with elevated privileges.
    Secure,
}

/// A named stream definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamDefinition {
    /// File name of the stream within the state root.
    pub name: &'static str,
    /// Placement class.
    pub class: StreamClass,
}

/// The user-configured source list.
pub const USER_SOURCES: StreamDefinition = StreamDefinition {
    name: "user_sources",
    class: StreamClass::Secure,
};

/// Per-source metadata keyed by source identifier.
pub const SOURCES_METADATA: StreamDefinition = StreamDefinition {
    name: "sources_metadata",
    class: StreamClass::Standard,
};

/// The administrator settings map.
pub const ADMIN_SETTINGS: StreamDefinition = StreamDefinition {
    name: "admin_settings",
    class: StreamClass::Secure,
};

/// The primary user settings file.
pub const USER_SETTINGS: StreamDefinition = StreamDefinition {
    name: "settings.json",
    class: StreamClass::UserFile,
};

/// The backup user settings file.
pub const USER_SETTINGS_BACKUP: StreamDefinition = StreamDefinition {
    name: "settings.json.backup",
    class: StreamClass::UserFile,
};

/// The filesystem root under which all streams live.
#[derive(Debug, Clone)]
pub struct SettingsRoot {
    root: PathBuf,
}

impl SettingsRoot {
    /// Create a root, ensuring the directory exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(root: impl Into<PathBuf>) -> SettingsResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| SettingsError::Io {
            operation: "settings.root.create",
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    /// The state root directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Open a handle to a named stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream name is empty or escapes the root, or
    /// if the current content cannot be read.
    pub fn stream(&self, definition: StreamDefinition) -> SettingsResult<Stream> {
        let path = self.resolve(definition.name)?;
        let last_hash = hash_current(&path)?;
        Ok(Stream {
            definition,
            path,
            last_hash,
        })
    }

    fn resolve(&self, name: &str) -> SettingsResult<PathBuf> {
        let candidate = Path::new(name);
        let valid = !name.is_empty()
            && candidate
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !valid {
            return Err(SettingsError::InvalidStreamName {
                name: name.to_string(),
            });
        }
        Ok(self.root.join(candidate))
    }
}

/// A handle to one named stream.
///
/// The handle remembers the content it last observed; [`Stream::set`]
/// reports `false` instead of writing when the backing file has been
/// modified since, giving callers optimistic concurrency.
#[derive(Debug)]
pub struct Stream {
    definition: StreamDefinition,
    path: PathBuf,
    last_hash: Option<[u8; 32]>,
}

impl Stream {
    /// The stream definition this handle was opened for.
    #[must_use]
    pub const fn definition(&self) -> StreamDefinition {
        self.definition
    }

    /// The backing path of the stream.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current content; `None` when the stream does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing file exists but cannot be read.
    pub fn get(&mut self) -> SettingsResult<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(bytes) => {
                self.last_hash = Some(hash_bytes(&bytes));
                Ok(Some(bytes))
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                self.last_hash = None;
                Ok(None)
            }
            Err(source) => Err(SettingsError::Io {
                operation: "settings.stream.get",
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Write new content.
    ///
    /// Returns `false` without writing when the backing file changed since
    /// this handle last observed it.
    ///
    /// # Errors
    ///
    /// Returns an error if the write itself fails.
    pub fn set(&mut self, bytes: &[u8]) -> SettingsResult<bool> {
        if hash_current(&self.path)? != self.last_hash {
            debug!(
                stream = self.definition.name,
                "stream changed concurrently; refusing write"
            );
            return Ok(false);
        }

        let staged = self.path.with_extension("staged");
        fs::write(&staged, bytes).map_err(|source| SettingsError::Io {
            operation: "settings.stream.stage",
            path: staged.clone(),
            source,
        })?;
        fs::rename(&staged, &self.path).map_err(|source| SettingsError::Io {
            operation: "settings.stream.commit",
            path: self.path.clone(),
            source,
        })?;

        self.last_hash = Some(hash_bytes(bytes));
        Ok(true)
    }

    /// Delete the stream; deleting an absent stream succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing file exists but cannot be removed.
    pub fn remove(&mut self) -> SettingsResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                self.last_hash = None;
                Ok(())
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                self.last_hash = None;
                Ok(())
            }
            Err(source) => Err(SettingsError::Io {
                operation: "settings.stream.remove",
                path: self.path.clone(),
                source,
            }),
        }
    }
}

fn hash_bytes(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

fn hash_current(path: &Path) -> SettingsResult<Option<[u8; 32]>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(hash_bytes(&bytes))),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(SettingsError::Io {
            operation: "settings.stream.hash",
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    type TestResult<T> = anyhow::Result<T>;

    fn temp_root() -> TestResult<(TempDir, SettingsRoot)> {
        let dir = tempfile::Builder::new().prefix("depot-settings-").tempdir()?;
        let root = SettingsRoot::new(dir.path())?;
        Ok((dir, root))
    }

    #[test]
    fn absent_stream_reads_as_none() -> TestResult<()> {
        let (_dir, root) = temp_root()?;
        let mut stream = root.stream(USER_SOURCES)?;
        assert!(stream.get()?.is_none());
        Ok(())
    }

    #[test]
    fn set_then_get_round_trips() -> TestResult<()> {
        let (_dir, root) = temp_root()?;
        let mut stream = root.stream(USER_SOURCES)?;
        assert!(stream.set(b"[]")?);
        assert_eq!(stream.get()?, Some(b"[]".to_vec()));
        Ok(())
    }

    #[test]
    fn concurrent_modification_is_reported() -> TestResult<()> {
        let (_dir, root) = temp_root()?;
        let mut first = root.stream(USER_SOURCES)?;
        let mut second = root.stream(USER_SOURCES)?;

        assert!(first.set(b"one")?);
        // The second handle still believes the stream is absent.
        assert!(!second.set(b"two")?);
        // After re-reading, the write goes through.
        assert_eq!(second.get()?, Some(b"one".to_vec()));
        assert!(second.set(b"two")?);
        Ok(())
    }

    #[test]
    fn remove_is_idempotent() -> TestResult<()> {
        let (_dir, root) = temp_root()?;
        let mut stream = root.stream(ADMIN_SETTINGS)?;
        assert!(stream.set(b"{}")?);
        stream.remove()?;
        stream.remove()?;
        assert!(stream.get()?.is_none());
        Ok(())
    }

    #[test]
    fn stream_names_cannot_escape_the_root() -> TestResult<()> {
        let (_dir, root) = temp_root()?;
        let escape = StreamDefinition {
            name: "../outside",
            class: StreamClass::Standard,
        };
        assert!(matches!(
            root.stream(escape),
            Err(SettingsError::InvalidStreamName { .. })
        ));
        Ok(())
    }
}
