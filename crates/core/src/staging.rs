//! Per-request staging directories.
//!
//! Every restore or export writes into its own directory under the staging root, named by a fresh
//! [`RequestId`]:
//!
//! ```text
//! <staging_dir>/
//! └── 3f2b…c9/            # one request
//!     ├── scratch/        # extracted entries, removed before the request returns
//!     └── restore.tar     # handed to the delivery layer
//! ```
//!
//! [`RequestStaging`] is a guard. Unless [`RequestStaging::commit`] is called, the whole request
//! directory is removed when the guard goes away.

use crate::constants::SCRATCH_DIR_NAME;
use crate::error::storage_error;
use crate::{VaultError, VaultResult};
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use vault_address::RequestId;

#[cfg(test)]
use std::collections::HashSet;
#[cfg(test)]
use std::sync::{LazyLock, Mutex};

const ALLOCATION_ATTEMPTS: usize = 5;

#[derive(Debug)]
pub struct RequestStaging {
    request_id: RequestId,
    dir: PathBuf,
    scratch_dir: PathBuf,
    finished: bool,
}

impl RequestStaging {
    /// Allocates a new request directory (with its scratch subdirectory) under `staging_root`.
    pub fn create(staging_root: &Path) -> VaultResult<Self> {
        Self::create_with(staging_root, RequestId::new)
    }

    fn create_with(
        staging_root: &Path,
        mut id_source: impl FnMut() -> RequestId,
    ) -> VaultResult<Self> {
        fs::create_dir_all(staging_root).map_err(storage_error(staging_root))?;

        for _attempt in 0..ALLOCATION_ATTEMPTS {
            let request_id = id_source();
            let dir = request_id.dir(staging_root);

            match fs::create_dir(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(storage_error(&dir)(e)),
            }

            let staging = Self {
                request_id,
                scratch_dir: dir.join(SCRATCH_DIR_NAME),
                dir,
                finished: false,
            };
            fs::create_dir(&staging.scratch_dir).map_err(storage_error(&staging.scratch_dir))?;
            return Ok(staging);
        }

        Err(VaultError::StagingAllocation(staging_root.to_path_buf()))
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a named output file directly in the request directory.
    pub fn output_path(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    /// Path of the `n`th scratch file.
    pub fn scratch_file(&self, n: usize) -> PathBuf {
        self.scratch_dir.join(format!("{n:06}"))
    }

    /// Removes the scratch area and keeps the request directory for delivery.
    pub fn commit(mut self) -> VaultResult<PathBuf> {
        fs::remove_dir_all(&self.scratch_dir).map_err(storage_error(&self.scratch_dir))?;
        self.finished = true;
        Ok(self.dir.clone())
    }

    /// Removes the whole request directory.
    pub fn discard(mut self) -> io::Result<()> {
        self.finished = true;
        remove_request_dir(&self.dir)
    }
}

impl Drop for RequestStaging {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = remove_request_dir(&self.dir) {
            tracing::warn!(path = %self.dir.display(), error = %e, "failed to remove request directory");
        }
    }
}

/// Runs `request` against a fresh staging area and cleans up according to its outcome.
///
/// On success the scratch area is removed and the request directory stays. On failure the
/// request directory is removed; if that also fails, both errors are reported together.
pub(crate) fn run_staged<T>(
    staging_root: &Path,
    request: impl FnOnce(&RequestStaging) -> VaultResult<T>,
) -> VaultResult<T> {
    let staging = RequestStaging::create(staging_root)?;

    match request(&staging) {
        Ok(value) => {
            staging.commit()?;
            Ok(value)
        }
        Err(request_error) => {
            let path = staging.dir().to_path_buf();
            match staging.discard() {
                Ok(()) => Err(request_error),
                Err(cleanup_error) => Err(VaultError::CleanupAfterFailure {
                    path,
                    request_error: Box::new(request_error),
                    cleanup_error,
                }),
            }
        }
    }
}

#[cfg(test)]
static FORCE_CLEANUP_ERROR_FOR_THREADS: LazyLock<Mutex<HashSet<std::thread::ThreadId>>> =
    LazyLock::new(|| Mutex::new(HashSet::new()));

#[cfg(test)]
pub(crate) fn force_cleanup_error_for_current_thread() {
    let mut guard = FORCE_CLEANUP_ERROR_FOR_THREADS
        .lock()
        .expect("FORCE_CLEANUP_ERROR_FOR_THREADS mutex poisoned");
    guard.insert(std::thread::current().id());
}

fn remove_request_dir(dir: &Path) -> io::Result<()> {
    #[cfg(test)]
    {
        let current_id = std::thread::current().id();
        let mut guard = FORCE_CLEANUP_ERROR_FOR_THREADS
            .lock()
            .expect("FORCE_CLEANUP_ERROR_FOR_THREADS mutex poisoned");

        if guard.remove(&current_id) {
            return Err(io::Error::other("forced cleanup failure (test hook)"));
        }
    }

    fs::remove_dir_all(dir)
}
