//! Error types for the store.
//!
//! Every failure is local to the call that produced it. Structural edits
//! relink only after their allocations succeeded, so an error never leaves
//! a chain half-edited.

use crate::swap::FileId;
use crate::store::TextId;
use std::io;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// The main error type for store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The arena could not satisfy a request even after escalating compaction.
    #[error("arena exhausted: no region of {requested} bytes after compaction level {level}")]
    AllocatorExhausted {
        /// Number of bytes requested.
        requested: usize,
        /// Highest compaction level attempted.
        level: u32,
    },

    /// Reading or writing a backing file failed.
    #[error("I/O failure on file {file}: {source}")]
    Io {
        /// The backing file involved.
        file: FileId,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Writing to a caller-supplied sink failed.
    #[error("write to output failed: {0}")]
    Sink(#[source] io::Error),

    /// A source file was truncated or extended after it was opened.
    ///
    /// Resident copies of its text have been marked dirty, so they are now
    /// the only trusted copy of the affected ranges.
    #[error("source file {file} changed underfoot: length {expected} at open, now {actual}")]
    SourceChanged {
        /// The affected source file.
        file: FileId,
        /// Length recorded when the file was opened.
        expected: u64,
        /// Length observed now.
        actual: u64,
    },

    /// A structural invariant does not hold.
    #[error("consistency violation: {0}")]
    Consistency(String),

    /// The text handle does not name an open text object.
    #[error("unknown text object {0:?}")]
    UnknownText(TextId),

    /// The file handle does not name an open backing file.
    #[error("unknown backing file {0}")]
    UnknownFile(FileId),

    /// A rope handed in is not the first fragment of its chain.
    #[error("rope is not the head of a chain")]
    NotChainHead,

    /// A rope handed in was made by a different store.
    #[error("rope belongs to another store")]
    ForeignRope,
}

impl StoreError {
    /// Build a consistency violation from anything printable.
    pub(crate) fn consistency(what: impl Into<String>) -> Self {
        Self::Consistency(what.into())
    }

    /// Whether this error means the allocator gave up.
    pub const fn is_exhausted(&self) -> bool {
        matches!(self, Self::AllocatorExhausted { .. })
    }
}
