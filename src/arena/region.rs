//! Region: one span of the arena's address range.

use bitflags::bitflags;

/// Handle on a region node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId(pub(crate) u32);

impl std::fmt::Debug for RegionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "r{}", self.0)
    }
}

bitflags! {
    /// Region state flags.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RegionFlags: u8 {
        /// Handed out to a caller.
        const IN_USE = 0b0000_0001;
        /// Placeholder for address space not yet committed.
        const NXM = 0b0000_0010;
        /// Holds a batch of region nodes.
        const REGION_NODES = 0b0000_0100;
        /// Holds a batch of fragment nodes.
        const FRAGMENT_NODES = 0b0000_1000;
    }
}

impl std::fmt::Debug for RegionFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        bitflags::parser::to_writer(self, f)
    }
}

/// One span of the arena.
///
/// Regions form a single address-ordered list covering the whole
/// address range, used and free alike.
#[derive(Debug, Clone)]
pub(crate) struct Region {
    /// Start address (offset into the arena).
    pub(crate) addr: usize,
    /// Length in bytes.
    pub(crate) len: usize,
    /// Bytes actually holding data; the rest is room to grow.
    pub(crate) used: usize,
    /// State flags.
    pub(crate) flags: RegionFlags,
    /// Address predecessor.
    pub(crate) prev: Option<RegionId>,
    /// Address successor.
    pub(crate) next: Option<RegionId>,
}

impl Region {
    /// A free span.
    pub(crate) const fn free(addr: usize, len: usize) -> Self {
        Self {
            addr,
            len,
            used: 0,
            flags: RegionFlags::empty(),
            prev: None,
            next: None,
        }
    }

    /// One past the last address.
    #[inline]
    pub(crate) const fn end(&self) -> usize {
        self.addr + self.len
    }

    /// Free and committed.
    #[inline]
    pub(crate) const fn is_free(&self) -> bool {
        !self
            .flags
            .intersects(RegionFlags::IN_USE.union(RegionFlags::NXM))
    }

    /// The uncommitted placeholder.
    #[inline]
    pub(crate) const fn is_nxm(&self) -> bool {
        self.flags.contains(RegionFlags::NXM)
    }

    /// Room left after the used bytes.
    #[inline]
    pub(crate) const fn room(&self) -> usize {
        self.len - self.used
    }
}
