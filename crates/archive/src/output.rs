//! Append-only writer for the archive returned to a client.

use crate::{io_error, ArchiveError, ArchiveResult, EntryMeta};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

/// A finished output archive on disk.
///
/// The file is owned by whoever delivers it; nothing in this crate deletes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputArchive {
    path: PathBuf,
    entries: Vec<String>,
}

impl OutputArchive {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entry names in the order they were appended.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

/// Builds a tar file one entry at a time.
///
/// The target path must not exist; entries can only be appended. Call [`Self::finish`] to write
/// the end-of-archive marker and flush to disk.
pub struct ArchiveWriter {
    path: PathBuf,
    builder: tar::Builder<BufWriter<File>>,
    entries: Vec<String>,
}

impl ArchiveWriter {
    /// Creates a new, empty archive at `path`.
    ///
    /// # Errors
    ///
    /// - [`ArchiveError::OutputExists`] if something is already at `path`
    /// - [`ArchiveError::Io`] if the file cannot be created
    pub fn create(path: impl Into<PathBuf>) -> ArchiveResult<Self> {
        let path = path.into();
        let file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(ArchiveError::OutputExists(path));
            }
            Err(e) => return Err(io_error(&path)(e)),
        };

        Ok(Self {
            path,
            builder: tar::Builder::new(BufWriter::new(file)),
            entries: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Appends the contents of `source` as a regular file named `name`.
    ///
    /// The entry size comes from `source` itself; mode and mtime come from `meta`.
    pub fn append_file(&mut self, name: &str, source: &Path, meta: &EntryMeta) -> ArchiveResult<()> {
        let file = File::open(source).map_err(io_error(source))?;
        let len = file.metadata().map_err(io_error(source))?.len();

        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(len);
        header.set_mode(meta.mode);
        header.set_mtime(meta.mtime);

        self.builder
            .append_data(&mut header, name, file)
            .map_err(io_error(&self.path))?;
        self.entries.push(name.to_owned());
        Ok(())
    }

    /// Appends `source` under `name`, taking size, mode and mtime from the filesystem.
    pub fn append_path(&mut self, name: &str, source: &Path) -> ArchiveResult<()> {
        self.builder
            .append_path_with_name(source, name)
            .map_err(io_error(source))?;
        self.entries.push(name.to_owned());
        Ok(())
    }

    /// Writes the end-of-archive marker and syncs the file.
    pub fn finish(self) -> ArchiveResult<OutputArchive> {
        let Self {
            path,
            builder,
            entries,
        } = self;

        let mut writer = builder.into_inner().map_err(io_error(&path))?;
        writer.flush().map_err(io_error(&path))?;
        writer.get_ref().sync_all().map_err(io_error(&path))?;

        Ok(OutputArchive { path, entries })
    }
}
