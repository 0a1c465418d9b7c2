//! Configuration storage for rig calibration data.
//!
//! Calibration results are specific to one controller (one arm, microscope,
//! and camera combination), so each controller gets its own directory.
//! All config is stored in ~/.autopatch/ by default.

use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

/// Configuration storage manager for rig calibration data.
///
/// Manages per-controller calibration directories and JSON settings files
/// under a single root (defaults to ~/.autopatch/).
#[derive(Debug, Clone)]
pub struct ConfigStorage {
    /// Root directory for all configuration (e.g., ~/.autopatch)
    root_path: PathBuf,
}

impl ConfigStorage {
    /// Create a new config storage with default path (~/.autopatch)
    pub fn new() -> std::io::Result<Self> {
        let home = std::env::var("HOME")
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::NotFound, "HOME not set"))?;
        let root_path = PathBuf::from(home).join(".autopatch");
        Ok(Self { root_path })
    }

    /// Create a new config storage with custom root path
    pub fn with_path(root_path: PathBuf) -> Self {
        Self { root_path }
    }

    /// Get the root configuration path
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Directory holding the calibration files for one controller.
    ///
    /// The directory is not created; see [`ConfigStorage::ensure_calibration_dir`].
    pub fn calibration_dir(&self, controller: &str) -> PathBuf {
        let safe = controller.replace([' ', '/', '\\'], "_");
        self.root_path.join(safe)
    }

    /// Create the calibration directory for `controller` if needed
    pub fn ensure_calibration_dir(&self, controller: &str) -> std::io::Result<PathBuf> {
        let dir = self.calibration_dir(controller);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Load a JSON settings file stored directly under the root.
    ///
    /// Returns None if the file does not exist.
    /// Returns Some(Err) if the file exists but cannot be parsed.
    pub fn get_json<T: DeserializeOwned>(&self, name: &str) -> Option<std::io::Result<T>> {
        let path = self.root_path.join(name);

        if !path.exists() {
            return None;
        }

        Some(load_json(&path))
    }

    /// Save a JSON settings file under the root, creating the root if needed.
    ///
    /// Returns the path written.
    pub fn save_json<T: Serialize>(&self, name: &str, value: &T) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.root_path)?;

        let path = self.root_path.join(name);
        save_json(&path, value)?;
        Ok(path)
    }

    /// List controllers that have a calibration directory
    pub fn list_controllers(&self) -> std::io::Result<Vec<String>> {
        if !self.root_path.exists() {
            return Ok(Vec::new());
        }

        let mut controllers = Vec::new();
        for entry in std::fs::read_dir(&self.root_path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    controllers.push(name.to_string());
                }
            }
        }
        controllers.sort();
        Ok(controllers)
    }
}

impl Default for ConfigStorage {
    fn default() -> Self {
        Self::new().unwrap_or_else(|e| {
            warn!("no home config directory ({e}), using ./.autopatch");
            Self::with_path(PathBuf::from(".autopatch"))
        })
    }
}

/// Read a JSON file into `T`, mapping parse failures to `InvalidData`
pub fn load_json<T: DeserializeOwned>(path: &Path) -> std::io::Result<T> {
    let reader = BufReader::new(File::open(path)?);
    serde_json::from_reader(reader)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// Write `value` as pretty-printed JSON
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    debug!("writing {}", path.display());
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, value)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}
