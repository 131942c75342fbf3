//! Error taxonomy for the FATX engine.

use core::fmt;
use std::io;

/// Stable error kind, independent of the underlying I/O failure.
///
/// Mirrors the per-module `*Error` enums the rest of this crate family uses
/// (`FatError`, `DirError`, `FileError`), but unified into one taxonomy so an
/// adapter only has to match once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Superblock magic did not decode as "FATX"/"XTAF" in either byte order.
    NotFatx,
    /// A path component does not exist.
    NotFound,
    /// A non-terminal path component is not a directory.
    NotDirectory,
    /// An operation that requires a file was given a directory.
    IsDirectory,
    /// `rmdir` on a directory that still has active entries.
    NotEmpty,
    /// `create`/`mkdir` target already exists.
    Exists,
    /// A basename is longer than 42 bytes.
    NameTooLong,
    /// No free cluster or directory slot remains.
    NoSpace,
    /// A mutation was attempted on a volume opened read-only.
    ReadOnly,
    /// A sentinel/bound violation was found in the FAT or a directory.
    Corrupt,
    /// The underlying block device failed.
    Io,
}

impl ErrorKind {
    /// POSIX errno an adapter would report for this kind.
    ///
    /// The engine never calls into libc itself; this is a convenience so an
    /// adapter does not have to re-derive the mapping from scratch.
    pub fn as_errno(self) -> i32 {
        match self {
            ErrorKind::NotFatx => libc_einval(),
            ErrorKind::NotFound => libc_enoent(),
            ErrorKind::NotDirectory => libc_enotdir(),
            ErrorKind::IsDirectory => libc_eisdir(),
            ErrorKind::NotEmpty => libc_enotempty(),
            ErrorKind::Exists => libc_eexist(),
            ErrorKind::NameTooLong => libc_enametoolong(),
            ErrorKind::NoSpace => libc_enospc(),
            ErrorKind::ReadOnly => libc_erofs(),
            ErrorKind::Corrupt | ErrorKind::Io => libc_eio(),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFatx => "not a FATX volume",
            ErrorKind::NotFound => "no such file or directory",
            ErrorKind::NotDirectory => "not a directory",
            ErrorKind::IsDirectory => "is a directory",
            ErrorKind::NotEmpty => "directory not empty",
            ErrorKind::Exists => "file exists",
            ErrorKind::NameTooLong => "name too long",
            ErrorKind::NoSpace => "no space left on volume",
            ErrorKind::ReadOnly => "volume is read-only",
            ErrorKind::Corrupt => "corrupt filesystem structure",
            ErrorKind::Io => "I/O error",
        };
        f.write_str(s)
    }
}

/// The crate's error type: a [`ErrorKind`] plus enough context to place it.
#[derive(Debug, thiserror::Error)]
#[error("{kind}{context}")]
pub struct Error {
    pub kind: ErrorKind,
    context: String,
    #[source]
    source: Option<io::Error>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: String::new(),
            source: None,
        }
    }

    pub fn with(kind: ErrorKind, context: impl fmt::Display) -> Self {
        Self {
            kind,
            context: format!(": {context}"),
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<io::Error> for Error {
    fn from(source: io::Error) -> Self {
        Self {
            kind: ErrorKind::Io,
            context: String::new(),
            source: Some(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// Small local constants so this crate does not pull in libc just to name
// errno values in `as_errno`.
fn libc_enoent() -> i32 {
    2
}
fn libc_eio() -> i32 {
    5
}
fn libc_enotdir() -> i32 {
    20
}
fn libc_eisdir() -> i32 {
    21
}
fn libc_einval() -> i32 {
    22
}
fn libc_enospc() -> i32 {
    28
}
fn libc_erofs() -> i32 {
    30
}
fn libc_enametoolong() -> i32 {
    36
}
fn libc_enotempty() -> i32 {
    39
}
fn libc_eexist() -> i32 {
    17
}
