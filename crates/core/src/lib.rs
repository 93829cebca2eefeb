//! # Vault Core
//!
//! Storage accounting, catalog listing and selective restore for the per-customer backup vault.
//!
//! ```text
//! <storage_dir>/
//! └── <sha256(customer)>/
//!     └── <device>/
//!         └── <YYYYMMDD>/
//!             ├── <backup>-000001.tar
//!             └── <backup>.katalog.enc
//! ```
//!
//! Uploaded content is opaque: the client encrypts every file before archiving it, and nothing
//! here ever decrypts. Restores and catalog exports are written to their own request directory
//! under `<staging_dir>` and handed back by path.
//!
//! **No API concerns**: authentication, HTTP routing and customer/device records belong to the
//! layer that calls [`VaultService`].

pub mod catalog_export;
pub mod config;
pub mod constants;
pub mod error;
pub mod manifest;
pub mod restore;
pub mod scanner;
mod service;
pub mod staging;
pub mod upload;
pub mod usage;

pub use config::{CoreConfig, ManifestLimits};
pub use error::{VaultError, VaultResult};
pub use manifest::{ManifestEntry, ManifestError, RestoreManifest};
pub use restore::RestoreOutcome;
pub use scanner::{CatalogEntry, MarkerFile};
pub use service::VaultService;
pub use upload::StoredFile;
pub use usage::{DeviceUsage, UsageReport};

pub use vault_archive::OutputArchive;
pub use vault_types::{DateToken, DeviceNumber};
