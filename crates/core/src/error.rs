use crate::manifest::ManifestError;
use vault_archive::ArchiveError;

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("failed to decode restore manifest: {0}")]
    DecodeManifest(#[from] ManifestError),
    #[error("no catalog files found for device")]
    NoCatalog,
    #[error("storage error at {path}: {source}", path = path.display())]
    Storage {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),
    #[error("could not allocate a staging directory under {}", .0.display())]
    StagingAllocation(std::path::PathBuf),
    #[error(
        "request failed and cleanup also failed (path: {path}): request={request_error}; cleanup={cleanup_error}",
        path = path.display()
    )]
    CleanupAfterFailure {
        path: std::path::PathBuf,
        #[source]
        request_error: Box<VaultError>,
        cleanup_error: std::io::Error,
    },
}

impl VaultError {
    /// Returns true when the message is safe and useful to show to the requesting client.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            VaultError::InvalidInput(_) | VaultError::DecodeManifest(_) | VaultError::NoCatalog
        )
    }
}

pub type VaultResult<T> = std::result::Result<T, VaultError>;

pub(crate) fn storage_error(
    path: impl Into<std::path::PathBuf>,
) -> impl FnOnce(std::io::Error) -> VaultError {
    let path = path.into();
    move |source| VaultError::Storage { path, source }
}
