//! Fragment: one link of a rope.

use crate::arena::RegionId;
use crate::swap::FileId;
use bitflags::bitflags;

/// Handle on a fragment node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FragId(pub(crate) u32);

impl std::fmt::Debug for FragId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "f{}", self.0)
    }
}

bitflags! {
    /// Fragment state flags.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FragFlags: u8 {
        /// Current fragment of an open text object.
        const PIN = 0b0000_0001;
        /// Held by an internal operation that may allocate.
        const HOLD = 0b0000_0010;
        /// The memory copy is the only accurate copy.
        const DIRTY = 0b0000_0100;
        /// The disk extent may overlap another fragment's, after a copy.
        const SHARED = 0b0000_1000;
    }
}

impl std::fmt::Debug for FragFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        bitflags::parser::to_writer(self, f)
    }
}

impl FragFlags {
    /// Flags that keep compaction away.
    pub const LOCKS: Self = Self::PIN.union(Self::HOLD);
}

/// A byte range of a backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    /// The file holding the bytes.
    pub file: FileId,
    /// Byte offset in the file.
    pub addr: u64,
    /// Number of bytes.
    pub len: u64,
}

impl Extent {
    /// One past the last byte.
    #[inline]
    pub const fn end(&self) -> u64 {
        self.addr + self.len
    }

    /// Whether two extents share at least one byte.
    #[inline]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.addr < other.end() && other.addr < self.end()
    }
}

/// A fragment node.
///
/// Belongs to one logical list (its rope) and, while it has a disk
/// extent, to the physical list of that extent's file.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Fragment {
    /// Resident copy of the bytes.
    pub(crate) mem: Option<RegionId>,
    /// Copy on disk; never present on a dirty fragment.
    pub(crate) disk: Option<Extent>,
    /// Logical predecessor.
    pub(crate) prev: Option<FragId>,
    /// Logical successor.
    pub(crate) next: Option<FragId>,
    /// Physical predecessor (lower disk address).
    pub(crate) phys_prev: Option<FragId>,
    /// Physical successor.
    pub(crate) phys_next: Option<FragId>,
    /// State flags.
    pub(crate) flags: FragFlags,
}

impl Fragment {
    /// A fragment with no bytes anywhere.
    pub(crate) const fn empty() -> Self {
        Self {
            mem: None,
            disk: None,
            prev: None,
            next: None,
            phys_prev: None,
            phys_next: None,
            flags: FragFlags::empty(),
        }
    }

    /// A disk-only fragment covering `extent`.
    pub(crate) const fn on_disk(extent: Extent) -> Self {
        let mut frag = Self::empty();
        frag.disk = Some(extent);
        frag
    }

    #[inline]
    pub(crate) const fn is_locked(&self) -> bool {
        self.flags.intersects(FragFlags::LOCKS)
    }

    #[inline]
    pub(crate) const fn is_dirty(&self) -> bool {
        self.flags.contains(FragFlags::DIRTY)
    }

    /// Has an accurate copy on disk.
    #[inline]
    pub(crate) const fn is_pure(&self) -> bool {
        self.disk.is_some() && !self.is_dirty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extent_overlap() {
        let file = FileId(0);
        let a = Extent { file, addr: 0, len: 10 };
        let b = Extent { file, addr: 10, len: 5 };
        let c = Extent { file, addr: 9, len: 1 };
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(!b.overlaps(&c));
    }

    #[test]
    fn test_fragment_purity() {
        let mut frag = Fragment::on_disk(Extent { file: FileId(1), addr: 0, len: 4 });
        assert!(frag.is_pure());
        frag.flags |= FragFlags::DIRTY;
        assert!(!frag.is_pure());
        frag.flags |= FragFlags::HOLD;
        assert!(frag.is_locked());
    }
}
