//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and passed into [`crate::VaultService`].
//! Nothing in this crate reads environment variables while handling a request; binaries call
//! [`CoreConfig::from_env`] (after loading `.env`) and hand the result over.

use crate::constants::{
    DEFAULT_MAX_MANIFEST_BYTES, DEFAULT_MAX_MANIFEST_ENTRIES, DEFAULT_STAGING_DIR,
    DEFAULT_STORAGE_DIR,
};
use crate::{VaultError, VaultResult};
use std::path::{Path, PathBuf};

pub const STORAGE_DIR_ENV: &str = "VAULT_STORAGE_DIR";
pub const STAGING_DIR_ENV: &str = "VAULT_STAGING_DIR";
pub const MAX_MANIFEST_BYTES_ENV: &str = "VAULT_MAX_MANIFEST_BYTES";
pub const MAX_MANIFEST_ENTRIES_ENV: &str = "VAULT_MAX_MANIFEST_ENTRIES";

/// Bounds applied while decoding a restore manifest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ManifestLimits {
    pub max_bytes: usize,
    pub max_entries: usize,
}

impl Default for ManifestLimits {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_MANIFEST_BYTES,
            max_entries: DEFAULT_MAX_MANIFEST_ENTRIES,
        }
    }
}

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    storage_dir: PathBuf,
    staging_dir: PathBuf,
    manifest_limits: ManifestLimits,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::InvalidInput`] if the storage and staging directories are the same
    /// path, or if either manifest limit is zero.
    pub fn new(
        storage_dir: PathBuf,
        staging_dir: PathBuf,
        manifest_limits: ManifestLimits,
    ) -> VaultResult<Self> {
        if storage_dir.as_os_str().is_empty() || staging_dir.as_os_str().is_empty() {
            return Err(VaultError::InvalidInput(
                "storage and staging directories cannot be empty".into(),
            ));
        }
        if storage_dir == staging_dir {
            return Err(VaultError::InvalidInput(
                "staging directory must differ from the storage directory".into(),
            ));
        }
        if manifest_limits.max_bytes == 0 || manifest_limits.max_entries == 0 {
            return Err(VaultError::InvalidInput(
                "manifest limits must be greater than zero".into(),
            ));
        }

        Ok(Self {
            storage_dir,
            staging_dir,
            manifest_limits,
        })
    }

    /// Builds a config from raw, optional values as they come out of the environment.
    ///
    /// Missing or blank values fall back to the defaults in [`crate::constants`].
    pub fn from_env_values(
        storage_dir: Option<String>,
        staging_dir: Option<String>,
        max_manifest_bytes: Option<String>,
        max_manifest_entries: Option<String>,
    ) -> VaultResult<Self> {
        let storage_dir = non_blank(storage_dir)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR));
        let staging_dir = non_blank(staging_dir)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STAGING_DIR));

        let limits = ManifestLimits {
            max_bytes: limit_from_env_value(
                MAX_MANIFEST_BYTES_ENV,
                max_manifest_bytes,
                DEFAULT_MAX_MANIFEST_BYTES,
            )?,
            max_entries: limit_from_env_value(
                MAX_MANIFEST_ENTRIES_ENV,
                max_manifest_entries,
                DEFAULT_MAX_MANIFEST_ENTRIES,
            )?,
        };

        Self::new(storage_dir, staging_dir, limits)
    }

    /// Reads `VAULT_*` variables from the process environment.
    pub fn from_env() -> VaultResult<Self> {
        Self::from_env_values(
            std::env::var(STORAGE_DIR_ENV).ok(),
            std::env::var(STAGING_DIR_ENV).ok(),
            std::env::var(MAX_MANIFEST_BYTES_ENV).ok(),
            std::env::var(MAX_MANIFEST_ENTRIES_ENV).ok(),
        )
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn manifest_limits(&self) -> ManifestLimits {
        self.manifest_limits
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse a positive limit from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns `default`.
fn limit_from_env_value(name: &str, value: Option<String>, default: usize) -> VaultResult<usize> {
    match non_blank(value) {
        None => Ok(default),
        Some(v) => v.parse::<usize>().map_err(|_| {
            VaultError::InvalidInput(format!("{name} must be a positive integer, got: '{v}'"))
        }),
    }
}
