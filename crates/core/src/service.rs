//! The request-facing surface of the vault.

use crate::catalog_export;
use crate::config::CoreConfig;
use crate::error::storage_error;
use crate::manifest::RestoreManifest;
use crate::restore::{self, RestoreOutcome};
use crate::scanner::{self, CatalogEntry, MarkerFile};
use crate::upload::{self, StoredFile};
use crate::usage::{self, UsageReport};
use crate::VaultResult;
use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use vault_address::{customer_root, device_bucket, device_root};
use vault_archive::OutputArchive;
use vault_types::{DateToken, DeviceNumber};

/// Storage, catalog and restore operations for already-authenticated customers.
///
/// `customer_key` is the customer's unique identity (for example their email address). It is
/// hashed into a directory name and never stored.
#[derive(Clone, Debug)]
pub struct VaultService {
    cfg: Arc<CoreConfig>,
}

impl VaultService {
    pub fn new(cfg: Arc<CoreConfig>) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.cfg
    }

    pub fn customer_root(&self, customer_key: &str) -> PathBuf {
        customer_root(self.cfg.storage_dir(), customer_key)
    }

    fn device_root(&self, customer_key: &str, device: DeviceNumber) -> PathBuf {
        device_root(self.cfg.storage_dir(), customer_key, device)
    }

    /// Creates the customer's storage root. Safe to call again for an existing customer.
    pub fn provision_customer(&self, customer_key: &str) -> VaultResult<PathBuf> {
        let root = self.customer_root(customer_key);
        fs::create_dir_all(&root).map_err(storage_error(&root))?;
        tracing::debug!(path = %root.display(), "customer root ready");
        Ok(root)
    }

    pub fn devices(&self, customer_key: &str) -> VaultResult<Vec<DeviceNumber>> {
        usage::devices(&self.customer_root(customer_key))
    }

    /// Bytes used by one device, or by the whole customer when `device` is `None`.
    pub fn usage(&self, customer_key: &str, device: Option<DeviceNumber>) -> VaultResult<u64> {
        let root = self.customer_root(customer_key);
        match device {
            Some(device) => usage::usage(&root, device),
            None => usage::total_usage(&root),
        }
    }

    pub fn usage_report(&self, customer_key: &str) -> VaultResult<UsageReport> {
        usage::usage_report(&self.customer_root(customer_key))
    }

    /// Catalog entries of the device, ascending by date.
    pub fn list_catalog(
        &self,
        customer_key: &str,
        device: DeviceNumber,
    ) -> VaultResult<Vec<CatalogEntry>> {
        scanner::scan(&self.device_root(customer_key, device))
    }

    /// The newest date bucket of the device, if it has any.
    pub fn latest_backup(
        &self,
        customer_key: &str,
        device: DeviceNumber,
    ) -> VaultResult<Option<CatalogEntry>> {
        let Some((date, dir)) = scanner::date_buckets(&self.device_root(customer_key, device))?.pop()
        else {
            return Ok(None);
        };
        scanner::scan_bucket(date, &dir).map(Some)
    }

    /// Resolves one catalog marker of the device for download.
    pub fn catalog_file(
        &self,
        customer_key: &str,
        device: DeviceNumber,
        date: &DateToken,
        name: &str,
    ) -> VaultResult<Option<MarkerFile>> {
        scanner::find_marker(&self.device_root(customer_key, device), date, name)
    }

    /// Decodes `manifest_blob` and assembles the requested files into one archive.
    ///
    /// # Errors
    ///
    /// - [`crate::VaultError::DecodeManifest`] if the manifest is malformed; nothing is staged
    /// - [`crate::VaultError::Archive`] or [`crate::VaultError::Storage`] if a present entry
    ///   cannot be copied; the request directory is removed
    pub fn restore(
        &self,
        customer_key: &str,
        device: DeviceNumber,
        manifest_blob: &[u8],
    ) -> VaultResult<RestoreOutcome> {
        let manifest = RestoreManifest::decode(manifest_blob, self.cfg.manifest_limits())?;
        restore::assemble(
            &self.device_root(customer_key, device),
            &manifest,
            self.cfg.staging_dir(),
        )
    }

    /// Packages the device's catalog markers into one archive.
    ///
    /// Returns [`crate::VaultError::NoCatalog`] if the device has none.
    pub fn export_catalog(
        &self,
        customer_key: &str,
        device: DeviceNumber,
    ) -> VaultResult<OutputArchive> {
        catalog_export::export_catalog(
            &self.device_root(customer_key, device),
            self.cfg.staging_dir(),
        )
    }

    /// Stores one uploaded file into the device's bucket for `date`.
    pub fn store_upload(
        &self,
        customer_key: &str,
        device: DeviceNumber,
        date: &DateToken,
        file_name: &str,
        reader: impl Read,
    ) -> VaultResult<StoredFile> {
        let bucket = device_bucket(self.cfg.storage_dir(), customer_key, device, date);
        upload::store(&bucket, file_name, reader)
    }
}
