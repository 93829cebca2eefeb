//! Storing uploaded parts and markers into a date bucket.
//!
//! Stored files are immutable. Data is streamed to a hidden temporary file in the bucket and then
//! hard-linked to its final name, so a reader never sees a half-written part and an existing file
//! is never replaced.

use crate::error::storage_error;
use crate::{VaultError, VaultResult};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use vault_address::RequestId;
use vault_types::NonEmptyText;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// A file accepted into storage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StoredFile {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Lowercase hex SHA-256 of the stored bytes.
    pub sha256: String,
}

/// Reduces a client-supplied name to a safe final path component.
///
/// # Errors
///
/// Returns [`VaultError::InvalidInput`] if nothing usable remains, or if the name contains NUL.
pub fn sanitise_file_name(raw: &str) -> VaultResult<String> {
    if raw.contains('\0') {
        return Err(VaultError::InvalidInput(
            "file name must not contain NUL".into(),
        ));
    }
    let unusable = || VaultError::InvalidInput(format!("unusable file name: '{raw}'"));
    let last = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let name = NonEmptyText::new(last).map_err(|_| unusable())?;
    if matches!(name.as_str(), "." | "..") {
        return Err(unusable());
    }
    Ok(name.as_str().to_owned())
}

/// Streams `reader` into `bucket_dir/<file_name>`.
pub fn store(bucket_dir: &Path, file_name: &str, reader: impl Read) -> VaultResult<StoredFile> {
    let name = sanitise_file_name(file_name)?;
    fs::create_dir_all(bucket_dir).map_err(storage_error(bucket_dir))?;

    let final_path = bucket_dir.join(&name);
    if final_path.exists() {
        return Err(already_stored(&name));
    }

    let temp_path = bucket_dir.join(format!(".{name}.{}.partial", RequestId::new()));
    let result = write_then_link(&temp_path, &final_path, &name, reader);
    if temp_path.exists() {
        if let Err(e) = fs::remove_file(&temp_path) {
            tracing::warn!(path = %temp_path.display(), error = %e, "failed to remove partial upload");
        }
    }

    let stored = result?;
    tracing::info!(
        path = %stored.path.display(),
        size_bytes = stored.size_bytes,
        "stored upload"
    );
    Ok(stored)
}

fn write_then_link(
    temp_path: &Path,
    final_path: &Path,
    name: &str,
    mut reader: impl Read,
) -> VaultResult<StoredFile> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(temp_path)
        .map_err(storage_error(temp_path))?;

    let mut hasher = Sha256::new();
    let mut size_bytes = 0u64;
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(storage_error(temp_path)(e)),
        };
        hasher.update(&buf[..n]);
        file.write_all(&buf[..n]).map_err(storage_error(temp_path))?;
        size_bytes += n as u64;
    }
    file.sync_all().map_err(storage_error(temp_path))?;
    drop(file);

    match fs::hard_link(temp_path, final_path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Err(already_stored(name)),
        Err(e) => return Err(storage_error(final_path)(e)),
    }

    Ok(StoredFile {
        path: final_path.to_path_buf(),
        size_bytes,
        sha256: hex::encode(hasher.finalize()),
    })
}

fn already_stored(name: &str) -> VaultError {
    VaultError::InvalidInput(format!("'{name}' is already stored and cannot be replaced"))
}
