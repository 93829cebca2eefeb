//! Packages a device's catalog markers into one downloadable archive.

use crate::constants::CATALOG_ARCHIVE_NAME;
use crate::scanner::marker_files;
use crate::staging::run_staged;
use crate::{VaultError, VaultResult};
use std::path::Path;
use vault_archive::{ArchiveWriter, OutputArchive};

/// Writes every catalog marker under `device_root` into a fresh archive under `staging_root`.
///
/// Entries are named `<date>/<marker>`. A device without markers yields
/// [`VaultError::NoCatalog`] and creates nothing in the staging area.
pub fn export_catalog(device_root: &Path, staging_root: &Path) -> VaultResult<OutputArchive> {
    let markers = marker_files(device_root)?;
    if markers.is_empty() {
        return Err(VaultError::NoCatalog);
    }

    let result = run_staged(staging_root, |staging| {
        let mut writer = ArchiveWriter::create(staging.output_path(CATALOG_ARCHIVE_NAME))?;
        for marker in &markers {
            let name = format!("{}/{}", marker.date, marker.name);
            writer.append_path(&name, &marker.path)?;
        }
        Ok(writer.finish()?)
    });

    match &result {
        Ok(archive) => tracing::info!(
            path = %archive.path().display(),
            entries = archive.entry_count(),
            "catalog archive exported"
        ),
        Err(e) => {
            tracing::error!(device_root = %device_root.display(), error = %e, "catalog export failed")
        }
    }
    result
}
