//! Bucket scanning.
//!
//! Walks one device root and reports, per date bucket, each catalog marker together with the
//! total size of the archive parts that belong to it.
//!
//! ```text
//! <device_root>/
//! ├── 20240101/
//! │   ├── 7f3a-000001.tar      ┐
//! │   ├── 7f3a-000002.tar      ├── constituents of "7f3a"
//! │   └── 7f3a.katalog.enc     ┘   (marker)
//! └── notes/                   # not a date token, skipped
//! ```
//!
//! A missing or unreadable device root is an empty result. Any other read or stat failure below
//! the root fails the scan with [`VaultError::Storage`].

use crate::constants::{BYTES_PER_MEGABYTE, CATALOG_MARKER_SUFFIX};
use crate::error::storage_error;
use crate::{VaultError, VaultResult};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fs::{self, ReadDir};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use vault_types::DateToken;

#[cfg(test)]
use std::collections::HashSet;
#[cfg(test)]
use std::sync::{LazyLock, Mutex};

/// Scan result for one date bucket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub date: DateToken,
    /// Marker file name to the summed size of its constituent parts, in bytes.
    #[serde(serialize_with = "serialize_marker_sizes")]
    pub markers: BTreeMap<String, u64>,
}

impl CatalogEntry {
    pub fn total_bytes(&self) -> u64 {
        self.markers.values().sum()
    }

    pub fn marker_megabytes(&self, marker: &str) -> Option<f64> {
        self.markers.get(marker).copied().map(bytes_to_megabytes)
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }
}

#[derive(Serialize)]
struct MarkerSize {
    bytes: u64,
    megabytes: f64,
}

fn serialize_marker_sizes<S: Serializer>(
    markers: &BTreeMap<String, u64>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_map(markers.iter().map(|(name, &bytes)| {
        (
            name,
            MarkerSize {
                bytes,
                megabytes: bytes_to_megabytes(bytes),
            },
        )
    }))
}

/// A catalog marker found under a device root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MarkerFile {
    pub date: DateToken,
    pub name: String,
    pub path: PathBuf,
}

pub fn bytes_to_megabytes(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MEGABYTE as f64
}

/// Returns true if `name` is a catalog marker.
pub fn is_marker(name: &str) -> bool {
    marker_base(name).is_some()
}

/// Returns the base name `X` of a marker `X.katalog.enc`.
pub fn marker_base(name: &str) -> Option<&str> {
    name.strip_suffix(CATALOG_MARKER_SUFFIX)
        .filter(|base| !base.is_empty())
}

/// Returns true if `name` is a constituent part of the marker with base name `base`.
///
/// The name must continue the base with `-` or `.`, which keeps `ab-000001.tar` out of `a`.
pub fn is_constituent(base: &str, name: &str) -> bool {
    if is_marker(name) {
        return false;
    }
    match name.strip_prefix(base) {
        Some(rest) => rest.starts_with('-') || rest.starts_with('.'),
        None => false,
    }
}

/// Scans every date bucket under `device_root`, ascending by date.
pub fn scan(device_root: &Path) -> VaultResult<Vec<CatalogEntry>> {
    date_buckets(device_root)?
        .into_iter()
        .map(|(date, dir)| scan_bucket(date, &dir))
        .collect()
}

/// Lists the date-token subdirectories of `device_root`, ascending by date.
pub fn date_buckets(device_root: &Path) -> VaultResult<Vec<(DateToken, PathBuf)>> {
    let read_dir = match fs::read_dir(device_root) {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            tracing::warn!(path = %device_root.display(), error = %e, "cannot read device root");
            return Ok(Vec::new());
        }
    };

    let mut buckets = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(storage_error(device_root))?;
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        let Ok(date) = DateToken::parse(&name) else {
            continue;
        };
        let file_type = entry.file_type().map_err(storage_error(entry.path()))?;
        if file_type.is_dir() {
            buckets.push((date, entry.path()));
        }
    }

    buckets.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(buckets)
}

/// Builds the catalog entry for one bucket directory.
pub fn scan_bucket(date: DateToken, bucket_dir: &Path) -> VaultResult<CatalogEntry> {
    let files = bucket_files(bucket_dir)?;

    let markers = files
        .iter()
        .filter_map(|(name, _, _)| marker_base(name).map(|base| (name, base)))
        .map(|(marker, base)| {
            let bytes: u64 = files
                .iter()
                .filter(|(name, _, _)| is_constituent(base, name))
                .map(|(_, _, size)| *size)
                .sum();
            (marker.clone(), bytes)
        })
        .collect();

    Ok(CatalogEntry { date, markers })
}

/// Every catalog marker under `device_root`, ordered by date and then name.
pub fn marker_files(device_root: &Path) -> VaultResult<Vec<MarkerFile>> {
    let mut markers = Vec::new();
    for (date, dir) in date_buckets(device_root)? {
        let mut in_bucket: Vec<MarkerFile> = bucket_files(&dir)?
            .into_iter()
            .filter(|(name, _, _)| is_marker(name))
            .map(|(name, path, _)| MarkerFile {
                date: date.clone(),
                name,
                path,
            })
            .collect();
        in_bucket.sort_by(|a, b| a.name.cmp(&b.name));
        markers.extend(in_bucket);
    }
    Ok(markers)
}

/// Looks up one catalog marker in the bucket for `date`.
///
/// Returns `None` if the bucket or the marker does not exist.
///
/// # Errors
///
/// Returns [`VaultError::InvalidInput`] if `name` is not a bare marker file name.
pub fn find_marker(
    device_root: &Path,
    date: &DateToken,
    name: &str,
) -> VaultResult<Option<MarkerFile>> {
    if !is_marker(name) || name.contains(['/', '\\']) {
        return Err(VaultError::InvalidInput(format!(
            "'{name}' is not a catalog file name"
        )));
    }

    let path = device_root.join(date.as_dir_name()).join(name);
    match fs::symlink_metadata(&path) {
        Ok(metadata) if metadata.is_file() => Ok(Some(MarkerFile {
            date: date.clone(),
            name: name.to_owned(),
            path,
        })),
        Ok(_) => Ok(None),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(storage_error(path)(e)),
    }
}

/// Regular files directly inside `dir` as (name, path, size).
fn bucket_files(dir: &Path) -> VaultResult<Vec<(String, PathBuf, u64)>> {
    let read_dir = read_bucket(dir).map_err(storage_error(dir))?;

    let mut files = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(storage_error(dir))?;
        let path = entry.path();
        let metadata = entry.metadata().map_err(storage_error(&path))?;
        if !metadata.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            files.push((name.to_owned(), path, metadata.len()));
        }
    }
    Ok(files)
}

#[cfg(test)]
static FORCE_BUCKET_READ_ERROR_FOR_THREADS: LazyLock<Mutex<HashSet<std::thread::ThreadId>>> =
    LazyLock::new(|| Mutex::new(HashSet::new()));

#[cfg(test)]
pub(crate) fn force_bucket_read_error_for_current_thread() {
    let mut guard = FORCE_BUCKET_READ_ERROR_FOR_THREADS
        .lock()
        .expect("FORCE_BUCKET_READ_ERROR_FOR_THREADS mutex poisoned");
    guard.insert(std::thread::current().id());
}

fn read_bucket(dir: &Path) -> io::Result<ReadDir> {
    #[cfg(test)]
    {
        let current_id = std::thread::current().id();
        let mut guard = FORCE_BUCKET_READ_ERROR_FOR_THREADS
            .lock()
            .expect("FORCE_BUCKET_READ_ERROR_FOR_THREADS mutex poisoned");

        if guard.remove(&current_id) {
            return Err(io::Error::new(
                ErrorKind::PermissionDenied,
                "forced bucket read failure (test hook)",
            ));
        }
    }

    fs::read_dir(dir)
}
