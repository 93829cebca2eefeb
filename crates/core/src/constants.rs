//! Constants used throughout the vault core crate.
//!
//! File naming conventions shared with the backup client live here, so that the scanner, the
//! restore assembler and the catalog exporter agree on what each file in a bucket is.

/// Default storage root when no explicit directory is configured.
pub const DEFAULT_STORAGE_DIR: &str = "storage";

/// Default root for per-request staging directories.
pub const DEFAULT_STAGING_DIR: &str = "staging";

/// Suffix of the catalog marker the client uploads next to each backup's parts.
pub const CATALOG_MARKER_SUFFIX: &str = ".katalog.enc";

/// Suffix the client appends to every file it encrypts before archiving it.
pub const ENCRYPTED_FILE_SUFFIX: &str = ".enc";

/// File name of the archive produced by a restore, inside its request directory.
pub const RESTORE_ARCHIVE_NAME: &str = "restore.tar";

/// File name of the archive produced by a catalog export, inside its request directory.
pub const CATALOG_ARCHIVE_NAME: &str = "catalog.tar";

/// Scratch subdirectory inside a request directory. Removed before the request returns.
pub const SCRATCH_DIR_NAME: &str = "scratch";

/// Decimal megabyte, the billing unit.
pub const BYTES_PER_MEGABYTE: u64 = 1000 * 1000;

/// Default upper bound on a decompressed restore manifest.
pub const DEFAULT_MAX_MANIFEST_BYTES: usize = 16 * 1024 * 1024;

/// Default upper bound on the number of entries in one restore manifest.
pub const DEFAULT_MAX_MANIFEST_ENTRIES: usize = 1_000_000;
