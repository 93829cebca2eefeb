//! Storage addressing for the backup vault.
//!
//! Every customer owns one directory under the storage root, named by a one-way hash of the
//! customer's identity (normally their email address). Devices and backup dates nest below it:
//!
//! ```text
//! <storage_root>/
//! └── <customer_hash>/          # 64 lowercase hex characters, SHA-256 of the identity
//!     └── <device_number>/      # 1, 2, 3, ...
//!         └── <date_token>/     # YYYYMMDD
//!             ├── <backup-id>-000001.tar
//!             ├── <backup-id>-000002.tar
//!             └── <backup-id>.katalog.enc
//! ```
//!
//! All functions here are pure: they derive paths and never touch the filesystem. The hash
//! algorithm is fixed, so a given identity maps to the same directory across process restarts
//! and across deployments.
//!
//! This crate also provides [`RequestId`], the random identifier used to give each restore or
//! export request its own staging directory.

mod service;

pub use service::{customer_root, device_bucket, device_root, CustomerHash, RequestId};

/// Error type for addressing operations.
#[derive(Debug, thiserror::Error)]
pub enum AddressError {
    /// Invalid input provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for addressing operations.
pub type AddressResult<T> = Result<T, AddressError>;
