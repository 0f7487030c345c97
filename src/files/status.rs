//! File operation status codes.
//!
//! The discriminants are the FAT library's result codes; they travel verbatim in
//! `fE,<code>` records, with 0 meaning success.

use std::io;
use thiserror::Error;

/// Result codes reported in `fE` records.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FileStatus {
    /// Low level disk error.
    #[error("low level disk error")]
    DiskErr = 1,
    /// Internal assertion failed.
    #[error("internal assertion failed")]
    IntErr = 2,
    /// Drive not ready.
    #[error("drive not ready")]
    NotReady = 3,
    /// File not found.
    #[error("file not found")]
    NoFile = 4,
    /// Path not found.
    #[error("path not found")]
    NoPath = 5,
    /// Invalid path name.
    #[error("invalid path name")]
    InvalidName = 6,
    /// Access denied.
    #[error("access denied")]
    Denied = 7,
    /// Object already exists.
    #[error("object already exists")]
    Exist = 8,
    /// Invalid file or directory object.
    #[error("invalid file or directory object")]
    InvalidObject = 9,
    /// Drive is write protected.
    #[error("drive is write protected")]
    WriteProtected = 10,
    /// Invalid drive number.
    #[error("invalid drive number")]
    InvalidDrive = 11,
    /// Volume has no work area.
    #[error("volume has no work area")]
    NotEnabled = 12,
    /// No valid FAT volume.
    #[error("no valid FAT volume")]
    NoFilesystem = 13,
    /// Format aborted.
    #[error("format aborted")]
    MkfsAborted = 14,
    /// Timed out waiting for the volume.
    #[error("timed out waiting for the volume")]
    Timeout = 15,
    /// Operation rejected by file sharing policy.
    #[error("operation rejected by file sharing policy")]
    Locked = 16,
    /// Working buffer could not be allocated.
    #[error("working buffer could not be allocated")]
    NotEnoughCore = 17,
    /// Too many open files.
    #[error("too many open files")]
    TooManyOpenFiles = 18,
    /// Invalid parameter.
    #[error("invalid parameter")]
    InvalidParameter = 19,
}

/// Result of a file operation.
pub type FileResult<T> = Result<T, FileStatus>;

impl FileStatus {
    /// Numeric code sent on the link.
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Wire code of an operation's outcome.
pub fn status_code<T>(result: &FileResult<T>) -> u8 {
    match result {
        Ok(_) => 0,
        Err(status) => status.code(),
    }
}

impl From<io::Error> for FileStatus {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => FileStatus::NoFile,
            io::ErrorKind::PermissionDenied => FileStatus::Denied,
            io::ErrorKind::AlreadyExists => FileStatus::Exist,
            io::ErrorKind::InvalidInput => FileStatus::InvalidName,
            io::ErrorKind::TimedOut => FileStatus::Timeout,
            io::ErrorKind::OutOfMemory => FileStatus::NotEnoughCore,
            _ => FileStatus::DiskErr,
        }
    }
}
