//! Vault archive handling
//!
//! Backup data arrives as tar *parts*, one or more per date bucket, each holding client-encrypted
//! files. This crate reads those parts and writes the single tar handed back to a client:
//!
//! - [`ArchiveIndex`] lazily opens every part of a date bucket on first use, records where each
//!   entry's data lives, and keeps the handles open for extraction until released.
//! - [`ArchiveWriter`] appends entries to a fresh output tar and yields an [`OutputArchive`].
//!
//! ```text
//! <device_root>/
//! └── 20240101/
//!     ├── 7f3a…-000001.tar    # part 1
//!     ├── 7f3a…-000002.tar    # part 2
//!     └── 7f3a….katalog.enc   # not a part, ignored here
//! ```
//!
//! Parts are read-only for everything in this crate.

mod constants;
mod index;
mod output;

pub use constants::ARCHIVE_PART_SUFFIX;
pub use index::{ArchiveIndex, DateListing, EntryMeta};
pub use output::{ArchiveWriter, OutputArchive};

use std::path::PathBuf;

/// Errors that can occur while reading parts or writing output archives
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// A filesystem operation on `path` failed
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An archive part could not be parsed as tar
    #[error("Corrupt archive part {}: {source}", .path.display())]
    CorruptPart {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An entry ended before its recorded size
    #[error("Entry '{name}' in {} is truncated: expected {expected} bytes, read {actual}", .path.display())]
    TruncatedEntry {
        path: PathBuf,
        name: String,
        expected: u64,
        actual: u64,
    },

    /// The output archive path already exists
    #[error("Output archive already exists: {}", .0.display())]
    OutputExists(PathBuf),
}

/// Result type for archive operations
pub type ArchiveResult<T> = Result<T, ArchiveError>;

pub(crate) fn io_error(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> ArchiveError {
    let path = path.into();
    move |source| ArchiveError::Io { path, source }
}
