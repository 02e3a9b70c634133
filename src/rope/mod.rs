//! Rope: text as a chain of fragments.
//!
//! Each fragment holds a run of bytes in memory, on disk, in both, or
//! nowhere (an empty placeholder). Fragments are threaded on two
//! independent lists:
//!
//! - the logical list, whose order is the order of the text
//! - the physical list of a backing file, ordered by disk address
//!
//! Both lists link by [`FragId`] index, so either can be edited without
//! touching the other.

mod chain;
mod fragment;

pub(crate) use fragment::{Extent, FragFlags, FragId, Fragment};

/// An owned, detached chain of fragments.
///
/// Ropes come out of a [`Store`](crate::Store) (closing a text, excising,
/// copying, opening a file) and go back into the same store (opening a
/// text, inserting, discarding). A rope dropped without being handed back
/// keeps its fragments allocated until the store itself is dropped.
#[derive(Debug, PartialEq, Eq)]
pub struct Rope {
    /// The store whose fragments these are.
    pub(crate) store: u32,
    pub(crate) head: FragId,
}

impl Rope {
    pub(crate) const fn new(store: u32, head: FragId) -> Self {
        Self { store, head }
    }
}
