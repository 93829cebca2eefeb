//! Manifest-driven restore assembly.
//!
//! Requested names are resolved date by date against an [`ArchiveIndex`]. Each hit is copied to
//! the request's scratch area, appended to the output tar and deleted again, so at most one
//! extracted entry sits on disk at a time. Names that no part holds are skipped. Names that
//! resolve to the same entry within a date are fetched once.

use crate::constants::RESTORE_ARCHIVE_NAME;
use crate::error::storage_error;
use crate::manifest::{stored_name, RestoreManifest};
use crate::staging::{run_staged, RequestStaging};
use crate::VaultResult;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use vault_archive::{ArchiveIndex, ArchiveWriter, OutputArchive};

#[cfg(test)]
use std::sync::{LazyLock, Mutex};

/// The result of a successful restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreOutcome {
    pub archive: OutputArchive,
    /// Distinct (date, entry) pairs that were looked up.
    pub requested: usize,
    /// Requested pairs that no archive part contained.
    pub skipped: usize,
}

impl RestoreOutcome {
    pub fn path(&self) -> &Path {
        self.archive.path()
    }
}

/// Final path component of a stored name; archive parts are indexed by it.
fn entry_name(stored: &str) -> &str {
    stored.rsplit('/').next().unwrap_or(stored)
}

/// Builds one output archive holding every manifest entry found under `device_root`.
///
/// The archive is written to a fresh request directory under `staging_root`. If any present entry
/// cannot be copied, the request directory is removed and the error is returned.
pub fn assemble(
    device_root: &Path,
    manifest: &RestoreManifest,
    staging_root: &Path,
) -> VaultResult<RestoreOutcome> {
    let result = run_staged(staging_root, |staging| {
        let mut index = ArchiveIndex::new(device_root);
        let mut writer = ArchiveWriter::create(staging.output_path(RESTORE_ARCHIVE_NAME))?;
        let mut requested = 0usize;
        let mut skipped = 0usize;

        for (date, names) in manifest.group_by_date() {
            let listing = index.listing(&date)?;
            let mut fetched: HashSet<String> = HashSet::new();

            for name in names {
                let stored = stored_name(name);
                let lookup = entry_name(&stored);
                if !fetched.insert(lookup.to_owned()) {
                    tracing::debug!(date = %date, name = %stored, "entry already requested");
                    continue;
                }
                let scratch = scratch_path(staging, requested)?;
                requested += 1;

                match listing.extract_to(lookup, &scratch)? {
                    Some(meta) => {
                        writer.append_file(lookup, &scratch, &meta)?;
                        fs::remove_file(&scratch).map_err(storage_error(&scratch))?;
                    }
                    None => {
                        tracing::debug!(date = %date, name = %stored, "manifest entry not found");
                        skipped += 1;
                    }
                }
            }

            index.release(&date);
        }

        let archive = writer.finish()?;
        Ok(RestoreOutcome {
            archive,
            requested,
            skipped,
        })
    });

    match &result {
        Ok(outcome) => tracing::info!(
            path = %outcome.path().display(),
            entries = outcome.archive.entry_count(),
            skipped = outcome.skipped,
            "restore archive assembled"
        ),
        Err(e) => tracing::error!(device_root = %device_root.display(), error = %e, "restore failed"),
    }
    result
}

#[cfg(test)]
static BLOCK_SCRATCH_FOR_THREADS: LazyLock<Mutex<HashSet<std::thread::ThreadId>>> =
    LazyLock::new(|| Mutex::new(HashSet::new()));

#[cfg(test)]
pub(crate) fn block_scratch_for_current_thread() {
    let mut guard = BLOCK_SCRATCH_FOR_THREADS
        .lock()
        .expect("BLOCK_SCRATCH_FOR_THREADS mutex poisoned");
    guard.insert(std::thread::current().id());
}

fn scratch_path(staging: &RequestStaging, n: usize) -> VaultResult<PathBuf> {
    let path = staging.scratch_file(n);

    #[cfg(test)]
    {
        let current_id = std::thread::current().id();
        let mut guard = BLOCK_SCRATCH_FOR_THREADS
            .lock()
            .expect("BLOCK_SCRATCH_FOR_THREADS mutex poisoned");

        if guard.remove(&current_id) {
            fs::create_dir(&path).map_err(storage_error(&path))?;
        }
    }

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VaultError;
    use std::fs::File;
    use std::io::Read;
    use tempfile::TempDir;
    use vault_archive::ArchiveError;

    fn write_part(path: &Path, files: &[(&str, &[u8])]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut builder = tar::Builder::new(File::create(path).unwrap());
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(data.len() as u64);
            header.set_mode(0o600);
            header.set_mtime(1_704_103_200);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.finish().unwrap();
    }

    fn read_entries(path: &Path) -> Vec<(String, Vec<u8>)> {
        let mut archive = tar::Archive::new(File::open(path).unwrap());
        archive
            .entries()
            .unwrap()
            .map(|e| {
                let mut e = e.unwrap();
                let name = e.path().unwrap().to_string_lossy().into_owned();
                let mut data = Vec::new();
                e.read_to_end(&mut data).unwrap();
                (name, data)
            })
            .collect()
    }

    fn manifest(text: &str) -> RestoreManifest {
        RestoreManifest::parse(text, 1000).unwrap()
    }

    fn count_dirs(path: &Path) -> usize {
        fs::read_dir(path).map(|r| r.count()).unwrap_or(0)
    }

    #[test]
    fn restores_requested_entries_across_dates() {
        let temp = TempDir::new().unwrap();
        let device = temp.path().join("storage/1");
        let staging = temp.path().join("staging");
        write_part(
            &device.join("20240101/b1-000001.tar"),
            &[("report.pdf.enc", b"R1"), ("other.enc", b"O")],
        );
        write_part(&device.join("20240102/b2-000001.tar"), &[("notes.txt.enc", b"N")]);

        let outcome = assemble(
            &device,
            &manifest("20240102;notes.txt|20240101 10:00:00;report.pdf|"),
            &staging,
        )
        .unwrap();

        assert_eq!(outcome.requested, 2);
        assert_eq!(outcome.skipped, 0);
        assert_eq!(
            read_entries(outcome.path()),
            [
                ("report.pdf.enc".to_string(), b"R1".to_vec()),
                ("notes.txt.enc".to_string(), b"N".to_vec()),
            ]
        );
        assert!(outcome.path().starts_with(&staging));
    }

    #[test]
    fn absent_entries_are_skipped() {
        let temp = TempDir::new().unwrap();
        let device = temp.path().join("storage/1");
        write_part(&device.join("20240101/b-000001.tar"), &[("b.enc", b"B")]);

        let outcome = assemble(
            &device,
            &manifest("20240101;a|20240101;b|20240301;c|"),
            &temp.path().join("staging"),
        )
        .unwrap();

        assert_eq!(outcome.skipped, 2);
        assert_eq!(outcome.archive.entries(), ["b.enc"]);
    }

    #[test]
    fn directory_in_name_is_matched_on_final_component() {
        let temp = TempDir::new().unwrap();
        let device = temp.path().join("storage/1");
        write_part(&device.join("20240101/b-000001.tar"), &[("home/u/todo.txt.enc", b"T")]);

        let outcome = assemble(
            &device,
            &manifest("20240101;docs/todo.txt|"),
            &temp.path().join("staging"),
        )
        .unwrap();
        assert_eq!(outcome.archive.entries(), ["todo.txt.enc"]);
    }

    #[test]
    fn scratch_area_is_gone_after_success() {
        let temp = TempDir::new().unwrap();
        let device = temp.path().join("storage/1");
        write_part(&device.join("20240101/b-000001.tar"), &[("a.enc", b"A")]);

        let outcome =
            assemble(&device, &manifest("20240101;a|"), &temp.path().join("staging")).unwrap();
        let request_dir = outcome.path().parent().unwrap();
        assert_eq!(count_dirs(request_dir), 1, "only the output archive remains");
    }

    #[test]
    fn corrupt_part_fails_and_leaves_nothing_behind() {
        let temp = TempDir::new().unwrap();
        let device = temp.path().join("storage/1");
        let staging = temp.path().join("staging");
        fs::create_dir_all(device.join("20240101")).unwrap();
        fs::write(device.join("20240101/bad-000001.tar"), vec![0xAB; 1024]).unwrap();

        let err = assemble(&device, &manifest("20240101;a|"), &staging).unwrap_err();
        assert!(matches!(err, VaultError::Archive(ArchiveError::CorruptPart { .. })));
        assert_eq!(count_dirs(&staging), 0);
    }

    #[test]
    fn repeated_runs_give_same_entries_in_distinct_dirs() {
        let temp = TempDir::new().unwrap();
        let device = temp.path().join("storage/1");
        let staging = temp.path().join("staging");
        write_part(&device.join("20240101/b-000001.tar"), &[("a.enc", b"A"), ("b.enc", b"B")]);
        let m = manifest("20240101;a|20240101;b|");

        let first = assemble(&device, &m, &staging).unwrap();
        let second = assemble(&device, &m, &staging).unwrap();
        assert_ne!(first.path(), second.path());
        assert_eq!(read_entries(first.path()), read_entries(second.path()));
    }

    #[test]
    fn names_resolving_to_one_entry_are_fetched_once() {
        let temp = TempDir::new().unwrap();
        let device = temp.path().join("storage/1");
        write_part(&device.join("20240101/b-000001.tar"), &[("x.enc", b"X")]);

        let outcome = assemble(
            &device,
            &manifest("20240101;a/x|20240101;b/x|20240101 12:00:00;x|"),
            &temp.path().join("staging"),
        )
        .unwrap();

        assert_eq!(outcome.requested, 1);
        assert_eq!(outcome.skipped, 0);
        assert_eq!(read_entries(outcome.path()), [("x.enc".to_string(), b"X".to_vec())]);
    }

    #[test]
    fn same_entry_on_two_dates_is_fetched_from_each() {
        let temp = TempDir::new().unwrap();
        let device = temp.path().join("storage/1");
        write_part(&device.join("20240101/b-000001.tar"), &[("x.enc", b"old")]);
        write_part(&device.join("20240102/b-000001.tar"), &[("x.enc", b"new")]);

        let outcome = assemble(
            &device,
            &manifest("20240101;a/x|20240102;b/x|"),
            &temp.path().join("staging"),
        )
        .unwrap();
        assert_eq!(outcome.requested, 2);
        assert_eq!(
            read_entries(outcome.path()),
            [
                ("x.enc".to_string(), b"old".to_vec()),
                ("x.enc".to_string(), b"new".to_vec()),
            ]
        );
    }

    #[test]
    fn failed_extraction_of_present_entry_leaves_nothing_behind() {
        let temp = TempDir::new().unwrap();
        let device = temp.path().join("storage/1");
        let staging = temp.path().join("staging");
        write_part(&device.join("20240101/b-000001.tar"), &[("a.enc", b"A")]);

        block_scratch_for_current_thread();
        let err = assemble(&device, &manifest("20240101;a|"), &staging).unwrap_err();
        assert!(matches!(err, VaultError::Archive(ArchiveError::Io { .. })));
        assert!(!err.is_client_error());
        assert_eq!(count_dirs(&staging), 0);
    }
}
