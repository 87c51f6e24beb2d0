//! Domain error types
//!
//! [`FileError`] is the error half of every cache, metadata and loader
//! operation. Its variants are the error codes surfaced to external callers;
//! transport failures are carried verbatim in [`FileError::Service`].
//! [`DomainError`] covers validation of domain values.

use thiserror::Error;

use crate::ports::drive_service::ServiceError;

/// Result alias used across the cache, metadata and sync layers
pub type FileResult<T> = Result<T, FileError>;

/// Error codes surfaced by file system operations
///
/// `Clone` so that one coalesced result can be delivered to several waiters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FileError {
    /// The resource or path does not exist locally (or remotely, where checked)
    #[error("not found")]
    NotFound,

    /// An exclusive create collided with an existing entry
    #[error("already exists")]
    Exists,

    /// The entry is mounted or already open
    #[error("in use")]
    InUse,

    /// Writing would violate the free space threshold
    #[error("no space left")]
    NoSpace,

    /// A file was required but a directory was found
    #[error("not a file")]
    NotAFile,

    /// A directory was required but a file was found
    #[error("not a directory")]
    NotADirectory,

    /// A non-recursive operation hit a non-empty directory
    #[error("directory not empty")]
    NotEmpty,

    /// The operation does not apply to the entry in its current state
    #[error("invalid operation")]
    InvalidOperation,

    /// The task was cancelled before it could commit
    #[error("aborted")]
    Aborted,

    /// The remote service reported a failure
    #[error("service error: {0}")]
    Service(#[from] ServiceError),

    /// Generic failure (database, filesystem, internal channel)
    #[error("failed: {0}")]
    Failed(String),
}

impl FileError {
    /// Stable upper-case code, as written to logs and shown by the daemon
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::Exists => "EXISTS",
            Self::InUse => "IN_USE",
            Self::NoSpace => "NO_SPACE",
            Self::NotAFile => "NOT_A_FILE",
            Self::NotADirectory => "NOT_A_DIRECTORY",
            Self::NotEmpty => "NOT_EMPTY",
            Self::InvalidOperation => "INVALID_OPERATION",
            Self::Aborted => "ABORTED",
            Self::Service(ServiceError::NotFound) => "NOT_FOUND",
            Self::Service(ServiceError::NoConnection) => "NO_CONNECTION",
            Self::Service(_) => "FAILED",
            Self::Failed(_) => "FAILED",
        }
    }
}

impl From<std::io::Error> for FileError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound,
            std::io::ErrorKind::AlreadyExists => Self::Exists,
            _ if err.raw_os_error() == Some(28) => Self::NoSpace,
            _ => Self::Failed(err.to_string()),
        }
    }
}

/// Errors raised when constructing domain values
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid resource identifier
    #[error("Invalid resource ID: {0}")]
    InvalidResourceId(String),

    /// Invalid content hash
    #[error("Invalid content hash: {0}")]
    InvalidHash(String),

    /// Invalid drive path
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}
