//! Store configuration via `unidb.toml`
//!
//! On first open, a default `unidb.toml` is created in the data directory.
//! To change settings, edit the file and reopen the store.

use serde::{Deserialize, Serialize};
use std::path::Path;
use unidb_core::{Error, Result, DEFAULT_FACILITY_NAME};

/// Config file name placed in the data directory.
pub const CONFIG_FILE_NAME: &str = "unidb.toml";

/// Default capacity ceiling of the fallback backend (5 MiB).
pub const DEFAULT_FALLBACK_CAPACITY: usize = 5 * 1024 * 1024;

/// Store configuration loaded from `unidb.toml`.
///
/// # Example
///
/// ```toml
/// fallback_capacity_bytes = 5242880
/// mirror_to_fallback = true
/// import_from_fallback = true
/// default_facility_name = "Default Facility"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Capacity ceiling of the synchronous fallback backend, in bytes.
    #[serde(default = "default_capacity")]
    pub fallback_capacity_bytes: usize,
    /// Mirror every committed save to the fallback's MAIN slot.
    #[serde(default = "default_true")]
    pub mirror_to_fallback: bool,
    /// Import the fallback's MAIN slot when the primary has none.
    #[serde(default = "default_true")]
    pub import_from_fallback: bool,
    /// Name given to the facility of a freshly created document.
    #[serde(default = "default_facility_name")]
    pub default_facility_name: String,
}

fn default_capacity() -> usize {
    DEFAULT_FALLBACK_CAPACITY
}

fn default_true() -> bool {
    true
}

fn default_facility_name() -> String {
    DEFAULT_FACILITY_NAME.to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            fallback_capacity_bytes: default_capacity(),
            mirror_to_fallback: true,
            import_from_fallback: true,
            default_facility_name: default_facility_name(),
        }
    }
}

impl StoreConfig {
    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns an error if the fallback capacity is zero or the default
    /// facility name is blank.
    pub fn validate(&self) -> Result<()> {
        if self.fallback_capacity_bytes == 0 {
            return Err(Error::config(
                "fallback_capacity_bytes must be greater than zero",
            ));
        }
        if self.default_facility_name.trim().is_empty() {
            return Err(Error::config("default_facility_name must not be empty"));
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# unidb store configuration
#
# Capacity ceiling of the synchronous fallback store, in bytes (default 5 MiB).
# Committed saves larger than this are not mirrored to the fallback.
fallback_capacity_bytes = 5242880

# Mirror every committed save to the fallback store (default: true)
mirror_to_fallback = true

# When the primary store holds no document, import the fallback's copy once
# and write it to the primary (default: true)
import_from_fallback = true

# Name of the facility created for a brand new document
default_facility_name = "Default Facility"
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: StoreConfig = toml::from_str(&content).map_err(|e| {
            Error::config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                Error::config(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
