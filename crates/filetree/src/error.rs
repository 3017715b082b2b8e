use std::io;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    Exists(String),

    #[error("directory not empty: {0}")]
    NotEmpty(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("cross-device operation: {0}")]
    CrossDevice(String),

    #[error("io error: {0}")]
    Io(#[source] io::Error),

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("tree is read-only")]
    ReadOnly,
}

pub type Result<T> = std::result::Result<T, FsError>;

/// Maps an `io::Error` onto the adapter's error categories.
///
/// Unknown kinds collapse into [`FsError::Io`].
pub(crate) fn categorize(error: io::Error, path: &Path) -> FsError {
    let display = path.display().to_string();
    match error.kind() {
        io::ErrorKind::NotFound => FsError::NotFound(display),
        io::ErrorKind::PermissionDenied => FsError::Permission(display),
        io::ErrorKind::AlreadyExists => FsError::Exists(display),
        io::ErrorKind::DirectoryNotEmpty => FsError::NotEmpty(display),
        io::ErrorKind::CrossesDevices => FsError::CrossDevice(display),
        _ => FsError::Io(error),
    }
}
