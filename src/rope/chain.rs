//! Chain operations: split, relink, physical-list upkeep and copying.
//!
//! Every operation that may allocate holds the fragments it works on for
//! the duration of the call and relinks only after its allocations have
//! succeeded.

use super::fragment::{Extent, FragFlags, FragId, Fragment};
use crate::error::Result;
use crate::pager::Pager;
use crate::swap::FileId;

impl Pager {
    // === Logical list ===

    /// First fragment of the chain containing `id`.
    pub(crate) fn chain_head(&self, id: FragId) -> FragId {
        let mut id = id;
        while let Some(prev) = self.frag(id).prev {
            id = prev;
        }
        id
    }

    /// Last fragment of the chain starting at `id`.
    pub(crate) fn chain_tail(&self, id: FragId) -> FragId {
        let mut id = id;
        while let Some(next) = self.frag(id).next {
            id = next;
        }
        id
    }

    /// Total live length from `id` to the end of its chain.
    pub(crate) fn chain_len(&self, id: FragId) -> u64 {
        let mut len = 0;
        let mut cursor = Some(id);
        while let Some(id) = cursor {
            len += self.frag_len(id);
            cursor = self.frag(id).next;
        }
        len
    }

    /// Link `id` into the logical list right after `at`.
    pub(crate) fn link_after(&mut self, at: FragId, id: FragId) {
        let next = self.frag(at).next;
        {
            let frag = self.frag_mut(id);
            frag.prev = Some(at);
            frag.next = next;
        }
        self.frag_mut(at).next = Some(id);
        if let Some(next) = next {
            self.frag_mut(next).prev = Some(id);
        }
    }

    /// Join two chains: `tail` must end one and `head` start the other.
    pub(crate) fn join(&mut self, tail: FragId, head: FragId) {
        self.frag_mut(tail).next = Some(head);
        self.frag_mut(head).prev = Some(tail);
    }

    /// Free every fragment of the chain starting at `head`.
    pub(crate) fn discard_chain(&mut self, head: FragId) {
        let mut cursor = Some(head);
        while let Some(id) = cursor {
            cursor = self.delete(id);
        }
    }

    // === Physical lists ===

    /// Remove a fragment from its file's physical list and forget its
    /// disk extent.
    pub(crate) fn phys_unlink(&mut self, id: FragId) {
        let (extent, prev, next) = {
            let frag = self.frag(id);
            (frag.disk, frag.phys_prev, frag.phys_next)
        };
        let Some(extent) = extent else {
            return;
        };
        match prev {
            Some(prev) => self.frag_mut(prev).phys_next = next,
            None => {
                if let Some(file) = self.file_mut(extent.file) {
                    file.head = next;
                }
            }
        }
        if let Some(next) = next {
            self.frag_mut(next).phys_prev = prev;
        }
        let frag = self.frag_mut(id);
        frag.disk = None;
        frag.phys_prev = None;
        frag.phys_next = None;
    }

    /// Thread `id` (whose extent is set) into its file's physical list
    /// right after `after`, or at the front.
    pub(crate) fn phys_link_after(&mut self, file: FileId, after: Option<FragId>, id: FragId) {
        let next = match after {
            Some(after) => self.frag(after).phys_next,
            None => self.file(file).and_then(|f| f.head),
        };
        {
            let frag = self.frag_mut(id);
            frag.phys_prev = after;
            frag.phys_next = next;
        }
        match after {
            Some(after) => self.frag_mut(after).phys_next = Some(id),
            None => {
                if let Some(backing) = self.file_mut(file) {
                    backing.head = Some(id);
                }
            }
        }
        if let Some(next) = next {
            self.frag_mut(next).phys_prev = Some(id);
        }
    }

    /// Thread `id` into its file's physical list by address, scanning
    /// forward from `start` (or from the list head).
    pub(crate) fn phys_link_sorted(&mut self, start: Option<FragId>, id: FragId) {
        let Some(extent) = self.frag(id).disk else {
            return;
        };
        let mut after = start;
        let mut walk = match start {
            Some(start) => self.frag(start).phys_next,
            None => self.file(extent.file).and_then(|f| f.head),
        };
        while let Some(candidate) = walk {
            let addr = self.frag(candidate).disk.map_or(0, |d| d.addr);
            if addr >= extent.addr {
                break;
            }
            after = Some(candidate);
            walk = self.frag(candidate).phys_next;
        }
        self.phys_link_after(extent.file, after, id);
    }

    /// Mark a fragment's memory copy authoritative. Any disk extent is
    /// stale from now on and is dropped.
    pub(crate) fn mark_dirty(&mut self, id: FragId) {
        if self.frag(id).disk.is_some() {
            self.phys_unlink(id);
        }
        self.set_flag(id, FragFlags::DIRTY);
    }

    // === Split ===

    /// Split a fragment at byte `offset`; returns the second part.
    ///
    /// The first part keeps its identity (and any pin). An offset of zero
    /// moves everything into the second part and leaves the first empty;
    /// an offset at or past the end leaves the second part empty.
    pub(crate) fn split(&mut self, id: FragId, offset: u64) -> Result<FragId> {
        let was_held = self.hold(id);
        let result = self.split_held(id, offset);
        self.unhold(id, was_held);
        result
    }

    fn split_held(&mut self, id: FragId, offset: u64) -> Result<FragId> {
        let mut second = Fragment::empty();
        second.flags =
            (self.frag(id).flags & (FragFlags::DIRTY | FragFlags::SHARED)) | FragFlags::HOLD;
        let new = self.new_fragment(second)?;

        let len = self.frag_len(id);
        if offset == 0 {
            self.move_contents(id, new);
        } else if offset < len {
            if let Some(mem) = self.frag(id).mem {
                let tail = match self.with_reclaim(|pager| pager.arena.split(mem, offset as usize)) {
                    Ok(tail) => tail,
                    Err(e) => {
                        self.frags.put(new.0);
                        return Err(e);
                    }
                };
                self.frag_mut(new).mem = Some(tail);
            }
            if let Some(extent) = self.frag(id).disk {
                self.frag_mut(id).disk = Some(Extent { len: offset, ..extent });
                self.frag_mut(new).disk = Some(Extent {
                    addr: extent.addr + offset,
                    len: extent.len - offset,
                    ..extent
                });
                self.phys_link_sorted(Some(id), new);
            }
        }

        self.link_after(id, new);
        self.clear_flag(new, FragFlags::HOLD);
        Ok(new)
    }

    /// Move memory, disk extent and physical position from `from` to the
    /// detached fragment `to`.
    fn move_contents(&mut self, from: FragId, to: FragId) {
        let source = *self.frag(from);
        {
            let frag = self.frag_mut(to);
            frag.mem = source.mem;
            frag.disk = source.disk;
            frag.phys_prev = source.phys_prev;
            frag.phys_next = source.phys_next;
        }
        if let Some(extent) = source.disk {
            match source.phys_prev {
                Some(prev) => self.frag_mut(prev).phys_next = Some(to),
                None => {
                    if let Some(file) = self.file_mut(extent.file) {
                        file.head = Some(to);
                    }
                }
            }
            if let Some(next) = source.phys_next {
                self.frag_mut(next).phys_prev = Some(to);
            }
        }
        let frag = self.frag_mut(from);
        frag.mem = None;
        frag.disk = None;
        frag.phys_prev = None;
        frag.phys_next = None;
        frag.flags -= FragFlags::DIRTY;
    }

    // === Copy ===

    /// Copy the chain from `first` through `last` (or to the end).
    ///
    /// Resident bytes are copied; disk extents are shared, the copy going
    /// right after the original on the physical list. Both sides of a
    /// shared extent are flagged `SHARED`.
    pub(crate) fn copy_chain(&mut self, first: FragId, last: Option<FragId>) -> Result<FragId> {
        let mut head: Option<FragId> = None;
        let mut tail: Option<FragId> = None;
        let mut cursor = Some(first);

        while let Some(source) = cursor {
            let source_held = self.hold(source);
            let copied = self.copy_fragment(source);
            self.unhold(source, source_held);
            let copy = match copied {
                Ok(copy) => copy,
                Err(e) => {
                    if let Some(head) = head {
                        self.discard_chain(head);
                    }
                    return Err(e);
                }
            };
            match tail {
                Some(tail) => {
                    self.join(tail, copy);
                    self.clear_flag(tail, FragFlags::HOLD);
                }
                None => head = Some(copy),
            }
            tail = Some(copy);
            if Some(source) == last {
                break;
            }
            cursor = self.frag(source).next;
        }

        if let Some(tail) = tail {
            self.clear_flag(tail, FragFlags::HOLD);
        }
        match head {
            Some(head) => Ok(head),
            None => self.new_fragment(Fragment::empty()),
        }
    }

    /// Copy one fragment into a detached, held node.
    fn copy_fragment(&mut self, source: FragId) -> Result<FragId> {
        let original = *self.frag(source);
        let mut copy = Fragment::empty();
        copy.flags = (original.flags & FragFlags::DIRTY) | FragFlags::HOLD;
        copy.disk = original.disk;
        if original.disk.is_some() {
            copy.flags |= FragFlags::SHARED;
        }
        let id = self.new_fragment(copy)?;

        if let Some(extent) = original.disk {
            self.set_flag(source, FragFlags::SHARED);
            self.phys_link_after(extent.file, Some(source), id);
        }
        let Some(mem) = self.frag(source).mem else {
            return Ok(id);
        };
        let used = self.arena.used(mem);
        if used == 0 {
            return Ok(id);
        }
        match self.arena.acquire(used, used, crate::arena::RegionFlags::empty()) {
            Ok(region) => {
                self.arena.append_from(region, mem);
                self.frag_mut(id).mem = Some(region);
            }
            Err(_) => {
                if self.frag(id).is_dirty() {
                    // No room for a second resident copy: park it in swap.
                    if let Err(e) = self.flush_bytes_of(id, mem) {
                        self.delete(id);
                        return Err(e);
                    }
                }
            }
        }
        Ok(id)
    }
}
