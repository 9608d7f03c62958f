//! The transient configuration file handed to the server.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::sidecar::config::ServerConfiguration;
use crate::sidecar::error::{Result, SidecarError};

const FILE_PREFIX: &str = "simple-jdbc-";
const FILE_SUFFIX: &str = ".yml";

/// A uniquely named YAML file holding a [`ServerConfiguration`].
///
/// The file is removed at most once; later calls to [`remove`](Self::remove)
/// are no-ops. Dropping the value does not remove the file.
#[derive(Debug)]
pub struct TempConfigFile {
    path: PathBuf,
    removed: AtomicBool,
}

impl TempConfigFile {
    /// Serialize `configuration` into a new file under `dir`.
    ///
    /// The file is flushed to disk before this returns. On any failure the
    /// partially written file is removed.
    pub fn materialize(dir: &Path, configuration: &ServerConfiguration) -> Result<Self> {
        let contents = serde_yml::to_string(configuration).map_err(|e| SidecarError::ConfigWrite {
            path: dir.to_path_buf(),
            reason: format!("failed to serialize configuration: {}", e),
        })?;

        let mut file = tempfile::Builder::new()
            .prefix(FILE_PREFIX)
            .suffix(FILE_SUFFIX)
            .tempfile_in(dir)
            .map_err(|e| SidecarError::ConfigWrite {
                path: dir.to_path_buf(),
                reason: format!("failed to create file: {}", e),
            })?;

        // On error `file` is dropped here, which deletes it.
        let written = file
            .write_all(contents.as_bytes())
            .and_then(|()| file.as_file().sync_all());
        if let Err(e) = written {
            return Err(SidecarError::ConfigWrite {
                path: file.path().to_path_buf(),
                reason: e.to_string(),
            });
        }

        let path = file
            .into_temp_path()
            .keep()
            .map_err(|e| SidecarError::ConfigWrite {
                path: dir.to_path_buf(),
                reason: format!("failed to persist file: {}", e),
            })?;

        tracing::debug!("Wrote sidecar configuration to {}", path.display());

        Ok(Self {
            path,
            removed: AtomicBool::new(false),
        })
    }

    /// Take over an existing file as if it had been materialized.
    #[cfg(test)]
    pub(crate) fn adopt(path: PathBuf) -> Self {
        Self {
            path,
            removed: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether [`remove`](Self::remove) has already run.
    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::SeqCst)
    }

    /// Delete the file. Returns `true` only for the call that performed the
    /// deletion. A file already gone from disk is not an error.
    pub fn remove(&self) -> bool {
        if self.removed.swap(true, Ordering::SeqCst) {
            return false;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!("Removed sidecar configuration {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                "Failed to remove sidecar configuration {}: {}",
                self.path.display(),
                e
            ),
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sidecar::config::DriverDescriptor;

    fn sample() -> ServerConfiguration {
        ServerConfiguration {
            host: "0.0.0.0".to_string(),
            port: 8000,
            drivers: vec![DriverDescriptor::new("/drv.jar", "org.x.Driver")],
        }
    }

    #[test]
    fn test_materialize_writes_yaml_document() {
        let dir = tempfile::tempdir().unwrap();
        let file = TempConfigFile::materialize(dir.path(), &sample()).unwrap();

        let text = std::fs::read_to_string(file.path()).unwrap();
        let doc: serde_yml::Value = serde_yml::from_str(&text).unwrap();
        let map = doc.as_mapping().unwrap();

        assert_eq!(map.len(), 3);
        assert_eq!(doc["host"].as_str(), Some("0.0.0.0"));
        assert_eq!(doc["port"].as_u64(), Some(8000));
        assert_eq!(doc["drivers"][0]["path"].as_str(), Some("/drv.jar"));
        assert_eq!(doc["drivers"][0]["className"].as_str(), Some("org.x.Driver"));
    }

    #[test]
    fn test_file_names_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let a = TempConfigFile::materialize(dir.path(), &sample()).unwrap();
        let b = TempConfigFile::materialize(dir.path(), &sample()).unwrap();

        assert_ne!(a.path(), b.path());
        let name = a.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with(FILE_PREFIX));
        assert!(name.ends_with(FILE_SUFFIX));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let file = TempConfigFile::materialize(dir.path(), &sample()).unwrap();

        assert!(file.remove());
        assert!(!file.path().exists());
        assert!(!file.remove());
        assert!(file.is_removed());
    }

    #[test]
    fn test_remove_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = TempConfigFile::materialize(dir.path(), &sample()).unwrap();
        std::fs::remove_file(file.path()).unwrap();

        assert!(file.remove());
    }

    #[test]
    fn test_missing_directory_is_config_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");

        let err = TempConfigFile::materialize(&missing, &sample()).unwrap_err();
        assert!(matches!(err, SidecarError::ConfigWrite { .. }));
    }

    #[test]
    fn test_round_trips_to_typed_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let file = TempConfigFile::materialize(dir.path(), &sample()).unwrap();

        let text = std::fs::read_to_string(file.path()).unwrap();
        let parsed: ServerConfiguration = serde_yml::from_str(&text).unwrap();
        pretty_assertions::assert_eq!(parsed, sample());
    }
}
