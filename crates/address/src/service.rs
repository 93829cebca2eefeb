//! Customer hashing, bucket path derivation and request identifiers.

use crate::{AddressError, AddressResult};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;
use vault_types::{DateToken, DeviceNumber};

/// The opaque directory name of a customer: lowercase hex SHA-256 of their identity.
///
/// # Construction
/// - [`CustomerHash::from_identity`] hashes a raw identity (for example an email address).
///   Any string is valid input, including the empty string.
/// - [`CustomerHash::parse`] validates a directory name that is already a hash.
///
/// The identity is never stored and cannot be recovered from the hash.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CustomerHash(String);

impl CustomerHash {
    /// Length of the hex digest.
    pub const LEN: usize = 64;

    /// Hashes `identity` as UTF-8 bytes with SHA-256.
    pub fn from_identity(identity: &str) -> Self {
        let digest = Sha256::digest(identity.as_bytes());
        Self(hex::encode(digest))
    }

    /// Validates a directory name that must already be in canonical hash form.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError::InvalidInput`] unless `input` is exactly 64 lowercase hex
    /// characters.
    pub fn parse(input: &str) -> AddressResult<Self> {
        if Self::is_canonical(input) {
            return Ok(Self(input.to_owned()));
        }
        Err(AddressError::InvalidInput(format!(
            "customer hash must be 64 lowercase hex characters, got: '{}'",
            input
        )))
    }

    /// Returns true if `input` is in canonical hash form.
    pub fn is_canonical(input: &str) -> bool {
        input.len() == Self::LEN
            && input
                .bytes()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `storage_root/<hash>`.
    pub fn root_dir(&self, storage_root: &Path) -> PathBuf {
        storage_root.join(&self.0)
    }
}

impl fmt::Display for CustomerHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CustomerHash {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CustomerHash::parse(s)
    }
}

/// Returns the storage root of the customer with `identity`.
pub fn customer_root(storage_root: &Path, identity: &str) -> PathBuf {
    CustomerHash::from_identity(identity).root_dir(storage_root)
}

/// Returns `customer_root/<device>`.
pub fn device_root(storage_root: &Path, identity: &str, device: DeviceNumber) -> PathBuf {
    customer_root(storage_root, identity).join(device.to_string())
}

/// Returns `customer_root/<device>/<YYYYMMDD>`.
pub fn device_bucket(
    storage_root: &Path,
    identity: &str,
    device: DeviceNumber,
    date: &DateToken,
) -> PathBuf {
    device_root(storage_root, identity, device).join(date.as_dir_name())
}

/// Identifier of a single restore or export request.
///
/// Displayed as 32 lowercase hex characters (the simple UUID form), which is safe to use as a
/// directory name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestId {
    /// Generates a fresh random (v4) identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }

    /// Returns `parent_dir/<request_id>`.
    pub fn dir(&self, parent_dir: &Path) -> PathBuf {
        parent_dir.join(self.to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}
