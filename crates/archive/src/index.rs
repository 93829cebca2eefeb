//! Lazy, per-date index over the archive parts of one device.
//!
//! A restore touches many date buckets, each holding one or more tar parts. Opening and listing a
//! part is the expensive step, so [`ArchiveIndex`] does it once per date bucket and keeps the
//! handles open. The listing records where each entry's data starts inside its part, so later
//! extraction is a seek plus a bounded read instead of another scan.
//!
//! # Lifetime of handles
//!
//! Handles belong to the [`DateListing`] for their date. They close when the listing is released
//! with [`ArchiveIndex::release`] or when the index itself is dropped, whichever comes first.
//! Callers that process dates one at a time release each date once they are done with it, which
//! bounds the number of open files by the largest bucket.

use crate::{io_error, ArchiveError, ArchiveResult, ARCHIVE_PART_SUFFIX};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use vault_types::DateToken;

/// Header fields of an entry that are carried into output archives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryMeta {
    pub size: u64,
    pub mode: u32,
    pub mtime: u64,
}

#[derive(Clone, Copy, Debug)]
struct EntryLocation {
    part: usize,
    data_offset: u64,
    meta: EntryMeta,
}

#[derive(Debug)]
struct OpenPart {
    path: PathBuf,
    file: File,
}

/// The open parts of one date bucket and the names they contain.
#[derive(Debug)]
pub struct DateListing {
    date: DateToken,
    parts: Vec<OpenPart>,
    entries: HashMap<String, EntryLocation>,
}

impl DateListing {
    /// Opens and lists every part in `bucket_dir`.
    ///
    /// A bucket that does not exist yields an empty listing. Entries are keyed by the final
    /// component of their path inside the tar; if the same name appears in several parts, the
    /// part that sorts first by file name wins.
    fn open(bucket_dir: &Path, date: DateToken) -> ArchiveResult<Self> {
        let part_paths = list_parts(bucket_dir)?;
        let mut parts = Vec::with_capacity(part_paths.len());
        let mut entries = HashMap::new();

        for (idx, path) in part_paths.into_iter().enumerate() {
            let file = File::open(&path).map_err(io_error(&path))?;
            index_part(&file, &path, idx, &mut entries)?;
            parts.push(OpenPart { path, file });
        }

        Ok(Self {
            date,
            parts,
            entries,
        })
    }

    pub fn date(&self) -> &DateToken {
        &self.date
    }

    /// Number of parts opened for this date.
    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    /// Number of distinct entry names across all parts.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn entry(&self, name: &str) -> Option<EntryMeta> {
        self.entries.get(name).map(|loc| loc.meta)
    }

    /// Returns a reader over the data of `name`, or `None` if no part holds it.
    ///
    /// The reader borrows the part's cached handle, so only one extraction per listing can be in
    /// flight at a time.
    pub fn extract(&mut self, name: &str) -> ArchiveResult<Option<(EntryMeta, io::Take<&File>)>> {
        let Some(loc) = self.entries.get(name).copied() else {
            return Ok(None);
        };
        let part = &mut self.parts[loc.part];
        part.file
            .seek(SeekFrom::Start(loc.data_offset))
            .map_err(io_error(&part.path))?;
        Ok(Some((loc.meta, Read::take(&part.file, loc.meta.size))))
    }

    /// Copies the data of `name` into a new file at `dest`.
    ///
    /// Returns `None` (and creates nothing) if no part holds `name`.
    ///
    /// # Errors
    ///
    /// - [`ArchiveError::Io`] if `dest` cannot be created or written, or the part cannot be read
    /// - [`ArchiveError::TruncatedEntry`] if the part ends before the entry's recorded size
    pub fn extract_to(&mut self, name: &str, dest: &Path) -> ArchiveResult<Option<EntryMeta>> {
        let part_path = match self.entries.get(name) {
            Some(loc) => self.parts[loc.part].path.clone(),
            None => return Ok(None),
        };
        let Some((meta, mut reader)) = self.extract(name)? else {
            return Ok(None);
        };

        let mut out = File::create(dest).map_err(io_error(dest))?;
        let copied = io::copy(&mut reader, &mut out).map_err(io_error(dest))?;
        if copied != meta.size {
            return Err(ArchiveError::TruncatedEntry {
                path: part_path,
                name: name.to_owned(),
                expected: meta.size,
                actual: copied,
            });
        }
        out.flush().map_err(io_error(dest))?;

        Ok(Some(meta))
    }
}

/// Name index over the date buckets of one device, opened on demand.
#[derive(Debug)]
pub struct ArchiveIndex {
    device_root: PathBuf,
    open: HashMap<DateToken, DateListing>,
    parts_opened: usize,
}

impl ArchiveIndex {
    /// Creates an empty index. Nothing is opened until [`Self::listing`] is called.
    pub fn new(device_root: impl Into<PathBuf>) -> Self {
        Self {
            device_root: device_root.into(),
            open: HashMap::new(),
            parts_opened: 0,
        }
    }

    pub fn device_root(&self) -> &Path {
        &self.device_root
    }

    /// Returns the listing for `date`, opening and listing its parts on first access.
    ///
    /// Later calls for the same date reuse the cached handles until the date is released.
    pub fn listing(&mut self, date: &DateToken) -> ArchiveResult<&mut DateListing> {
        match self.open.entry(date.clone()) {
            Entry::Occupied(slot) => Ok(slot.into_mut()),
            Entry::Vacant(slot) => {
                let bucket = self.device_root.join(date.as_dir_name());
                let listing = DateListing::open(&bucket, date.clone())?;
                tracing::debug!(
                    date = %date,
                    parts = listing.part_count(),
                    entries = listing.len(),
                    "opened date bucket"
                );
                self.parts_opened += listing.part_count();
                Ok(slot.insert(listing))
            }
        }
    }

    /// Closes the handles for `date`. Returns false if the date was not open.
    pub fn release(&mut self, date: &DateToken) -> bool {
        self.open.remove(date).is_some()
    }

    pub fn release_all(&mut self) {
        self.open.clear();
    }

    /// Number of dates whose handles are currently open.
    pub fn open_dates(&self) -> usize {
        self.open.len()
    }

    /// Total number of part opens performed over the lifetime of this index.
    pub fn parts_opened(&self) -> usize {
        self.parts_opened
    }
}

fn list_parts(bucket_dir: &Path) -> ArchiveResult<Vec<PathBuf>> {
    let iter = match fs::read_dir(bucket_dir) {
        Ok(iter) => iter,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_error(bucket_dir)(e)),
    };

    let mut parts = Vec::new();
    for entry in iter {
        let entry = entry.map_err(io_error(bucket_dir))?;
        let file_type = entry.file_type().map_err(io_error(entry.path()))?;
        if !file_type.is_file() {
            continue;
        }
        let is_part = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.ends_with(ARCHIVE_PART_SUFFIX));
        if is_part {
            parts.push(entry.path());
        }
    }
    parts.sort();
    Ok(parts)
}

fn index_part(
    file: &File,
    path: &Path,
    part: usize,
    entries: &mut HashMap<String, EntryLocation>,
) -> ArchiveResult<()> {
    let corrupt = |source: io::Error| ArchiveError::CorruptPart {
        path: path.to_path_buf(),
        source,
    };

    let mut archive = tar::Archive::new(file);
    for entry in archive.entries().map_err(corrupt)? {
        let entry = entry.map_err(corrupt)?;
        let header = entry.header();
        if !header.entry_type().is_file() {
            continue;
        }
        let entry_path = entry.path().map_err(corrupt)?;
        let Some(name) = entry_path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let meta = EntryMeta {
            size: entry.size(),
            mode: header.mode().unwrap_or(0o644),
            mtime: header.mtime().unwrap_or(0),
        };
        entries.entry(name.to_owned()).or_insert(EntryLocation {
            part,
            data_offset: entry.raw_file_position(),
            meta,
        });
    }
    Ok(())
}
