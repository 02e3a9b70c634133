//! Cursor: a text object's position and its Idle/Ready state machine.
//!
//! A cursor always sits on one fragment of its chain (pinned for as long
//! as it stays there) and knows where that fragment starts in the text.
//!
//! - **Idle**: the position is a plain offset from the fragment start.
//!   It may point outside the fragment until the next normalization.
//! - **Ready**: the fragment's memory region is attached as a window, with
//!   counts of bytes readable and writable ahead of the position.
//!
//! [`Pager::prepare`](crate::pager::Pager) moves a cursor into the state a
//! byte operation needs, paging text in or splitting fragments on the way.

mod edit;
mod prepare;

use crate::rope::FragId;

/// Reference point for [`Store::seek`](crate::Store::seek).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// From the start of the text.
    Start,
    /// From the current position.
    Current,
    /// From the end of the text.
    End,
}

/// What a byte operation is about to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    /// Read the byte after the position.
    ReadForward,
    /// Read the byte before the position.
    ReadBackward,
    /// Insert at the position.
    WriteForward,
    /// Land on the start of a fragment.
    DeleteForward,
    /// Land on the end of a fragment.
    DeleteBackward,
}

impl Mode {
    /// Whether a position on a fragment boundary resolves to the end of
    /// the earlier fragment rather than the start of the later one.
    pub(crate) const fn leans_back(self) -> bool {
        matches!(self, Self::ReadBackward | Self::WriteForward | Self::DeleteBackward)
    }
}

/// Outcome of preparing a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Prepared {
    /// The window is attached and good for the operation.
    Ready,
    /// Nothing to read in that direction.
    End,
    /// The position is on this fragment's boundary (delete modes).
    Boundary(FragId),
}

/// An attached memory window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Window {
    /// Offset of the position in the region.
    pub(crate) pos: usize,
    /// Bytes readable after the position.
    pub(crate) rleft: usize,
    /// Bytes writable after the position.
    pub(crate) wleft: usize,
    /// Inserting: the region's used count follows `pos`.
    pub(crate) writing: bool,
}

/// The state behind a text handle.
#[derive(Debug, Clone)]
pub(crate) struct Cursor {
    /// Current (pinned) fragment.
    pub(crate) cur: FragId,
    /// Text offset where `cur` starts.
    pub(crate) dot: u64,
    /// Idle position relative to `dot`.
    pub(crate) off: i64,
    /// Ready window, if attached.
    pub(crate) window: Option<Window>,
    /// Writes replace bytes instead of inserting.
    pub(crate) overwrite: bool,
}

impl Cursor {
    /// An idle cursor at the start of the chain headed by `head`.
    pub(crate) const fn new(head: FragId) -> Self {
        Self {
            cur: head,
            dot: 0,
            off: 0,
            window: None,
            overwrite: false,
        }
    }
}
