//! Storage layer for browsing and editing Doom-engine WAD archives.
//!
//! The crate is built from three layers:
//!
//! * [`vfile`]: seekable byte streams backed by OS files, memory buffers, or
//!   restricted views onto a byte range of another stream.
//! * [`dir`]: a [`Directory`] abstraction that presents real directories and
//!   WAD archives through one interface, plus the [`FileSet`] used for
//!   multi-selections.
//! * [`wad`]: the WAD archive engine with append-only writes, a revision
//!   chain for undo/redo, and compaction.
//!
//! Everything is single-threaded: streams and archives use `Rc`/`RefCell`
//! internally and are neither `Send` nor `Sync`.

pub mod dir;
pub mod file_set;
mod glob;
pub mod vfile;
pub mod wad;

pub use dir::{Capabilities, DirEntry, Directory, DirectoryBackend, EntryRef, FileType};
pub use file_set::FileSet;
pub use vfile::{StreamBackend, VFile};
pub use wad::{SerialGenerator, WadEntry, WadFile, WadOpenOptions};

use std::io;
use thiserror::Error;

pub type Result<T, E = FsError> = std::result::Result<T, E>;

/// Broad classification of an [`FsError`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The archive (or a snapshot blob) is malformed or truncated.
    Format,
    /// The operation is not valid in the current state of the object.
    State,
    /// The underlying OS or backend failed.
    Io,
    /// A lookup by name or serial number missed.
    NotFound,
    /// An argument was outside the accepted range.
    InvalidInput,
    /// The backend does not implement the operation.
    Unsupported,
}

/// Error type for external users
#[derive(Error, Debug)]
pub enum FsError {
    /// The first four bytes of the file are neither `IWAD` nor `PWAD`
    #[error("bad WAD magic {0:?}")]
    InvalidMagic([u8; 4]),
    /// A header, directory table or lump header ended before it should have
    #[error("truncated {0}")]
    Truncated(&'static str),
    /// A directory entry references bytes past the end of the file
    #[error("lump {index} extends past the end of the file")]
    LumpOutOfBounds { index: usize },
    /// A snapshot blob could not be decoded or no longer matches the archive
    #[error("invalid or stale snapshot")]
    InvalidSnapshot,
    /// A lump is already open for rewriting
    #[error("another lump is already open for writing")]
    WriterBusy,
    /// Lumps are still open
    #[error("{0} lump(s) still open")]
    LumpsOpen(usize),
    /// Undo or redo went past the recorded history
    #[error("requested {requested} level(s) of history, only {available} available")]
    NoHistory { requested: usize, available: usize },
    /// The archive or directory is read-only
    #[error("read-only")]
    ReadOnly,
    /// The stream has already been closed
    #[error("stream is closed")]
    Closed,
    /// The archive would grow past what 32-bit offsets can address
    #[error("archive too large")]
    TooLarge,
    /// A seek or write fell outside the range of a restricted stream
    #[error("position out of range")]
    OutOfRange,
    /// A new entry name is empty or not a single path component
    #[error("invalid entry name {0:?}")]
    InvalidName(String),
    /// An entry index was outside the current table
    #[error("index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },
    /// The requested entry could not be found
    #[error("entry not found")]
    EntryNotFound,
    /// The backend does not support the operation
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    /// Something failed when doing IO
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl FsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FsError::InvalidMagic(_)
            | FsError::Truncated(_)
            | FsError::LumpOutOfBounds { .. }
            | FsError::InvalidSnapshot => ErrorKind::Format,
            FsError::WriterBusy
            | FsError::LumpsOpen(_)
            | FsError::NoHistory { .. }
            | FsError::ReadOnly
            | FsError::Closed
            | FsError::TooLarge => ErrorKind::State,
            FsError::OutOfRange | FsError::IndexOutOfRange { .. } | FsError::InvalidName(_) => {
                ErrorKind::InvalidInput
            }
            FsError::EntryNotFound => ErrorKind::NotFound,
            FsError::Unsupported(_) => ErrorKind::Unsupported,
            FsError::Io(_) => ErrorKind::Io,
        }
    }
}

impl From<FsError> for io::Error {
    fn from(val: FsError) -> Self {
        let kind = match val {
            FsError::Io(err) => return err,
            FsError::InvalidMagic(_) | FsError::LumpOutOfBounds { .. } | FsError::InvalidSnapshot => {
                io::ErrorKind::InvalidData
            }
            FsError::Truncated(_) => io::ErrorKind::UnexpectedEof,
            FsError::ReadOnly => io::ErrorKind::PermissionDenied,
            FsError::OutOfRange | FsError::IndexOutOfRange { .. } | FsError::InvalidName(_) => {
                io::ErrorKind::InvalidInput
            }
            FsError::EntryNotFound => io::ErrorKind::NotFound,
            FsError::Unsupported(_) => io::ErrorKind::Unsupported,
            FsError::WriterBusy | FsError::LumpsOpen(_) => io::ErrorKind::ResourceBusy,
            FsError::NoHistory { .. } | FsError::Closed | FsError::TooLarge => io::ErrorKind::Other,
        };
        io::Error::new(kind, val)
    }
}

/// Check that `index` addresses an element of a table of length `len`.
pub(crate) fn check_index(index: usize, len: usize) -> Result<()> {
    if index < len {
        Ok(())
    } else {
        Err(FsError::IndexOutOfRange { index, len })
    }
}
