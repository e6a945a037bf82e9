use std::io;
use std::path::Path;
use thiserror::Error;

/// Faults raised at the file-operation boundary. Every backend maps its
/// native failures onto this taxonomy before returning; `std::io::Error`
/// never crosses the backend trait.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("copy failed: {0}")]
    CopyFailed(String),
    #[error("delete failed: {0}")]
    DeleteFailed(String),
    #[error("move failed: {0}")]
    MoveFailed(String),
    #[error("create directory failed: {0}")]
    CreateDirFailed(String),
    #[error("read failed: {0}")]
    ReadFailed(String),
    #[error("write failed: {0}")]
    WriteFailed(String),
    #[error("helper disconnected: {0}")]
    HelperDisconnected(String),
    #[error("file error: {0}")]
    Unknown(String),
}

impl FileError {
    /// Maps an io::Error onto the taxonomy for an operation against `path`.
    /// `fallback` picks the operation-specific variant for faults that are
    /// neither missing-file nor denied-access.
    pub fn from_io(err: io::Error, path: &Path, fallback: fn(String) -> FileError) -> FileError {
        let detail = format!("{}: {err}", path.display());
        match err.kind() {
            io::ErrorKind::NotFound => FileError::NotFound(path.display().to_string()),
            io::ErrorKind::PermissionDenied => {
                FileError::PermissionDenied(path.display().to_string())
            }
            _ => fallback(detail),
        }
    }
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("extract failed: {0}")]
    ExtractFailed(String),
    #[error("archive is encrypted and needs a password")]
    EncryptedNeedsPassword,
    #[error("wrong password")]
    WrongPassword,
    #[error("unsupported archive format: {0}")]
    UnsupportedFormat(String),
    #[error("archive is corrupted: {0}")]
    Corrupted(String),
    #[error("archive is empty")]
    Empty,
    #[error("archive item not found: {0}")]
    ItemNotFound(String),
    #[error("archive error: {0}")]
    Unknown(String),
}

#[derive(Debug, Error)]
pub enum ModError {
    #[error("mod descriptor parse failed: {0}")]
    ParseFailed(String),
    #[error("mod is encrypted and needs a password")]
    EncryptedNeedsPassword,
    #[error("wrong password")]
    WrongPassword,
    #[error("unsupported mod form: {0}")]
    UnsupportedForm(String),
    #[error("invalid mod structure: {0}")]
    InvalidStructure(String),
    #[error("enable failed: {0}")]
    EnableFailed(String),
    #[error("disable failed: {0}")]
    DisableFailed(String),
    #[error("backup failed: {0}")]
    BackupFailed(String),
    #[error("restore failed: {0}")]
    RestoreFailed(String),
    #[error("mod file missing: {0}")]
    FileMissing(String),
    #[error("md5 calculation failed: {0}")]
    Md5Failed(String),
    #[error("mod error: {0}")]
    Unknown(String),
}

#[derive(Debug, Error)]
pub enum PermissionError {
    #[error("privileged helper unavailable")]
    HelperUnavailable,
    #[error("privileged helper denied the request")]
    HelperDenied,
    #[error("storage access denied for {0}")]
    StorageDenied(String),
    #[error("no scoped tree granted for {0}")]
    ScopedTreeNotGranted(String),
}

#[derive(Debug, Error)]
pub enum GameConfigError {
    #[error("invalid game config: {0}")]
    InvalidConfig(String),
    #[error("saving game config failed: {0}")]
    SaveFailed(String),
}

impl From<FileError> for ModError {
    fn from(err: FileError) -> Self {
        match err {
            FileError::NotFound(path) => ModError::FileMissing(path),
            other => ModError::Unknown(other.to_string()),
        }
    }
}

impl From<ArchiveError> for ModError {
    fn from(err: ArchiveError) -> Self {
        match err {
            ArchiveError::EncryptedNeedsPassword => ModError::EncryptedNeedsPassword,
            ArchiveError::WrongPassword => ModError::WrongPassword,
            other => ModError::Unknown(other.to_string()),
        }
    }
}
