//! Arena: a private word-aligned allocator over one contiguous address range.
//!
//! # Layout
//!
//! ```text
//! ┌──────────────┬─────────┬──────────┬───────────────┬─────────────────────┐
//! │ region nodes │ text    │ free     │ fragment nodes│ NXM (uncommitted)   │
//! │ IN_USE|RN    │ IN_USE  │          │ IN_USE|FN     │                     │
//! └──────────────┴─────────┴──────────┴───────────────┴─────────────────────┘
//! 0                                                   committed          limit
//! ```
//!
//! Every byte of the range belongs to exactly one region. The tail region
//! stands for address space that has not been committed yet; growing the
//! arena moves its start forward.
//!
//! Allocation never recurses into reclamation. When a request cannot be
//! met the arena returns [`Exhausted`] and the caller decides whether to
//! compact and retry.

mod pool;
mod region;

pub(crate) use pool::NodePool;
pub use region::{RegionFlags, RegionId};
pub(crate) use region::Region;

use crate::config::{round_up, StoreConfig, WORD};
use crate::error::{Result, StoreError};

/// Region nodes kept back so that fetching a new node batch never recurses.
const SPARE_NODES: usize = 1;

/// Bytes accounted per region node.
const REGION_NODE_BYTES: usize = std::mem::size_of::<Region>();

/// The arena could not supply a region; the caller should reclaim and retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exhausted {
    /// Bytes that were asked for.
    pub requested: usize,
}

/// Usage statistics for an arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaStats {
    /// Bytes committed so far.
    pub committed: usize,
    /// Total address space the arena may commit.
    pub limit: usize,
    /// Bytes in free regions.
    pub free_bytes: usize,
    /// Bytes in regions handed out (including node batches).
    pub in_use_bytes: usize,
    /// Number of regions, the placeholder included.
    pub regions: usize,
    /// Number of free regions.
    pub free_regions: usize,
    /// Region nodes on the free-list.
    pub free_nodes: usize,
    /// Region node batches.
    pub node_batches: usize,
}

/// The arena allocator.
#[derive(Debug)]
pub struct Arena {
    /// Committed bytes.
    memory: Vec<u8>,
    /// Address space limit.
    limit: usize,
    /// Minimum growth step.
    grow_chunk: usize,
    /// Region nodes.
    nodes: NodePool<Region>,
    /// First region (address 0).
    head: RegionId,
    /// The uncommitted placeholder, always last.
    tail: RegionId,
}

impl Arena {
    /// Create an arena sized by `config`.
    ///
    /// The first node batch describes itself: region 0 holds the nodes,
    /// one of which is region 0.
    pub fn new(config: &StoreConfig) -> Self {
        let batch = config.region_batch.max(4);
        let batch_bytes = round_up(batch * REGION_NODE_BYTES);
        let limit = (config.arena_limit & !(WORD - 1)).max(batch_bytes);
        let committed = round_up(config.arena_initial)
            .clamp(batch_bytes, limit);

        let mut nodes = NodePool::new(batch);
        let first = nodes.add_batch(None);
        let mut arena = Self {
            memory: vec![0; committed],
            limit,
            grow_chunk: round_up(config.arena_grow_chunk.max(WORD)),
            nodes,
            head: RegionId(0),
            tail: RegionId(0),
        };

        let mut own = Region::free(0, batch_bytes);
        own.flags = RegionFlags::IN_USE | RegionFlags::REGION_NODES;
        own.used = batch_bytes;
        let head = arena.raw_node(own).unwrap_or(RegionId(0));
        arena.nodes.set_backing(first, head);

        let mut last = head;
        if committed > batch_bytes {
            let rest = Region::free(batch_bytes, committed - batch_bytes);
            if let Some(id) = arena.raw_node(rest) {
                arena.link_after(last, id);
                last = id;
            }
        }
        let mut nxm = Region::free(committed, limit - committed);
        nxm.flags = RegionFlags::NXM;
        let tail = arena.raw_node(nxm).unwrap_or(head);
        arena.link_after(last, tail);
        arena.head = head;
        arena.tail = tail;
        arena
    }

    // === Region access ===

    #[inline]
    fn node(&self, id: RegionId) -> &Region {
        match self.nodes.get(id.0) {
            Some(region) => region,
            None => panic!("dangling region handle {id:?}"),
        }
    }

    #[inline]
    fn node_mut(&mut self, id: RegionId) -> &mut Region {
        match self.nodes.get_mut(id.0) {
            Some(region) => region,
            None => panic!("dangling region handle {id:?}"),
        }
    }

    /// Whether `id` names a live region.
    pub fn contains(&self, id: RegionId) -> bool {
        self.nodes.is_live(id.0)
    }

    /// Length of a region.
    #[inline]
    pub fn len(&self, id: RegionId) -> usize {
        self.node(id).len
    }

    /// Bytes of a region holding data.
    #[inline]
    pub fn used(&self, id: RegionId) -> usize {
        self.node(id).used
    }

    /// Set the number of bytes holding data.
    #[inline]
    pub fn set_used(&mut self, id: RegionId, used: usize) {
        let region = self.node_mut(id);
        debug_assert!(used <= region.len, "used beyond region length");
        region.used = used.min(region.len);
    }

    /// Start address of a region.
    #[inline]
    pub fn addr(&self, id: RegionId) -> usize {
        self.node(id).addr
    }

    /// Flags of a region.
    #[inline]
    pub fn flags(&self, id: RegionId) -> RegionFlags {
        self.node(id).flags
    }

    /// The address successor of a region, if it is committed.
    pub fn successor(&self, id: RegionId) -> Option<RegionId> {
        self.node(id).next.filter(|&next| !self.node(next).is_nxm())
    }

    /// The data bytes of a region.
    #[inline]
    pub fn bytes(&self, id: RegionId) -> &[u8] {
        let region = self.node(id);
        &self.memory[region.addr..region.addr + region.used]
    }

    /// The whole span of a region, room included.
    #[inline]
    pub fn span_mut(&mut self, id: RegionId) -> &mut [u8] {
        let (addr, len) = {
            let region = self.node(id);
            (region.addr, region.len)
        };
        &mut self.memory[addr..addr + len]
    }

    /// One byte of a region.
    #[inline]
    pub fn byte(&self, id: RegionId, pos: usize) -> u8 {
        self.memory[self.node(id).addr + pos]
    }

    /// Store one byte into a region.
    #[inline]
    pub fn set_byte(&mut self, id: RegionId, pos: usize, byte: u8) {
        let addr = self.node(id).addr;
        self.memory[addr + pos] = byte;
    }

    /// Append the data bytes of `src` to the data of `dst`.
    ///
    /// `dst` must have room for them.
    pub fn append_from(&mut self, dst: RegionId, src: RegionId) {
        let (src_addr, count) = {
            let region = self.node(src);
            (region.addr, region.used)
        };
        let (dst_addr, dst_used) = {
            let region = self.node(dst);
            debug_assert!(region.room() >= count, "append overflows region");
            (region.addr, region.used)
        };
        self.memory
            .copy_within(src_addr..src_addr + count, dst_addr + dst_used);
        self.node_mut(dst).used += count;
    }

    /// Move `count` bytes from address `src` to `dst`; the spans may overlap.
    pub fn move_bytes(&mut self, src: usize, dst: usize, count: usize) {
        self.memory.copy_within(src..src + count, dst);
    }

    // === Node management ===

    /// Take a region node from the free-list without refilling it.
    fn raw_node(&mut self, region: Region) -> Option<RegionId> {
        self.nodes.take(region).map(RegionId)
    }

    /// Make sure `count` nodes are available beyond the spare.
    fn ensure_nodes(&mut self, count: usize) -> std::result::Result<(), Exhausted> {
        while self.nodes.free_count() < SPARE_NODES + count {
            self.refill_nodes()?;
        }
        Ok(())
    }

    /// Carve a new batch of region nodes out of the arena.
    ///
    /// At most one node is consumed doing so, and it comes from the spare.
    fn refill_nodes(&mut self) -> std::result::Result<(), Exhausted> {
        let bytes = round_up(self.nodes.per_batch() * REGION_NODE_BYTES);
        let spot = match self.first_fit(bytes) {
            Some(spot) => Some(spot),
            None => {
                let tail_free = self.tail_free().map_or(0, |id| self.node(id).len);
                self.commit(bytes - tail_free.min(bytes))
            }
        };
        let Some(spot) = spot else {
            return Err(Exhausted { requested: bytes });
        };
        let id = self.carve(spot, bytes, RegionFlags::REGION_NODES);
        let used = self.node(id).len;
        self.node_mut(id).used = used;
        let batch = self.nodes.add_batch(Some(id));
        tracing::trace!(batch, region = ?id, "region node batch added");
        Ok(())
    }

    fn release_node(&mut self, id: RegionId) {
        self.nodes.put(id.0);
    }

    /// Move a node the arena owns into the lowest free slot, if that slot
    /// is lower. Returns the node's handle afterwards.
    fn relocate(&mut self, id: RegionId) -> RegionId {
        if self.nodes.lowest_free().map_or(true, |slot| slot >= id.0) {
            return id;
        }
        let region = self.node(id).clone();
        let Some(moved) = self.raw_node(region.clone()) else {
            return id;
        };
        if let Some(prev) = region.prev {
            self.node_mut(prev).next = Some(moved);
        }
        if let Some(next) = region.next {
            self.node_mut(next).prev = Some(moved);
        }
        self.release_node(id);
        if self.head == id {
            self.head = moved;
        }
        if self.tail == id {
            self.tail = moved;
        }
        if region.flags.contains(RegionFlags::REGION_NODES) {
            self.nodes.rebind_backing(id, moved);
        }
        moved
    }

    /// Pack free spans, the placeholder and region node batches into the
    /// lowest free slots. Nobody outside the arena holds their handles.
    fn settle_nodes(&mut self) {
        let mut cursor = Some(self.head);
        while let Some(id) = cursor {
            let region = self.node(id);
            let owned = region.is_free()
                || region.is_nxm()
                || region.flags.contains(RegionFlags::REGION_NODES);
            let id = if owned { self.relocate(id) } else { id };
            cursor = self.node(id).next;
        }
    }

    // === List plumbing ===

    fn link_after(&mut self, at: RegionId, id: RegionId) {
        let next = self.node(at).next;
        {
            let region = self.node_mut(id);
            region.prev = Some(at);
            region.next = next;
        }
        self.node_mut(at).next = Some(id);
        if let Some(next) = next {
            self.node_mut(next).prev = Some(id);
        }
    }

    fn unlink(&mut self, id: RegionId) {
        let (prev, next) = {
            let region = self.node(id);
            (region.prev, region.next)
        };
        if let Some(prev) = prev {
            self.node_mut(prev).next = next;
        }
        if let Some(next) = next {
            self.node_mut(next).prev = prev;
        }
        self.release_node(id);
    }

    /// The free region just before the placeholder, if any.
    fn tail_free(&self) -> Option<RegionId> {
        self.node(self.tail)
            .prev
            .filter(|&id| self.node(id).is_free())
    }

    /// First free region (by address) with at least `len` bytes.
    fn first_fit(&self, len: usize) -> Option<RegionId> {
        let mut cursor = Some(self.head);
        while let Some(id) = cursor {
            let region = self.node(id);
            if region.is_free() && region.len >= len {
                return Some(id);
            }
            cursor = region.next;
        }
        None
    }

    /// Largest free region with at least `min` bytes.
    fn largest_fit(&self, min: usize) -> Option<RegionId> {
        let mut best: Option<(RegionId, usize)> = None;
        let mut cursor = Some(self.head);
        while let Some(id) = cursor {
            let region = self.node(id);
            if region.is_free() && region.len >= min && best.map_or(true, |(_, len)| region.len > len)
            {
                best = Some((id, region.len));
            }
            cursor = region.next;
        }
        best.map(|(id, _)| id)
    }

    /// Commit `amount` more bytes; returns the free region now ending at
    /// the committed boundary.
    fn commit(&mut self, amount: usize) -> Option<RegionId> {
        let amount = round_up(amount);
        let (start, available, prev) = {
            let nxm = self.node(self.tail);
            (nxm.addr, nxm.len, nxm.prev)
        };
        if amount == 0 || amount > available {
            return None;
        }
        let prev = prev?;
        let id = if self.node(prev).is_free() {
            self.node_mut(prev).len += amount;
            prev
        } else {
            let id = self.raw_node(Region::free(start, amount))?;
            self.link_after(prev, id);
            id
        };
        let nxm = self.node_mut(self.tail);
        nxm.addr += amount;
        nxm.len -= amount;
        self.memory.resize(start + amount, 0);
        tracing::trace!(amount, committed = start + amount, "arena grew");
        Some(id)
    }

    /// Grow so that the tail free region holds at least `len` bytes.
    fn grow_for(&mut self, len: usize) -> Option<RegionId> {
        let tail_free = self.tail_free().map_or(0, |id| self.node(id).len);
        let need = len.saturating_sub(tail_free);
        if need == 0 {
            return self.tail_free();
        }
        let available = self.node(self.tail).len;
        if round_up(need) > available {
            return None;
        }
        let amount = need.max(self.grow_chunk).min(available);
        self.commit(amount)
    }

    /// Mark a free region in use, splitting off any remainder of a word or
    /// more. Nodes for the split must already be available.
    fn carve(&mut self, id: RegionId, size: usize, tag: RegionFlags) -> RegionId {
        let (addr, len) = {
            let region = self.node(id);
            (region.addr, region.len)
        };
        if len >= size + WORD {
            if let Some(rest) = self.raw_node(Region::free(addr + size, len - size)) {
                self.link_after(id, rest);
                self.node_mut(id).len = size;
            }
        }
        let region = self.node_mut(id);
        region.flags = RegionFlags::IN_USE | tag;
        region.used = 0;
        id
    }

    // === Allocation ===

    /// Acquire a region of `min..=max` bytes (both rounded up to words).
    ///
    /// Tries, in order: the first free region big enough for `max`,
    /// growing the committed range, then the largest free region that
    /// still meets `min`.
    pub fn acquire(
        &mut self,
        min: usize,
        max: usize,
        tag: RegionFlags,
    ) -> std::result::Result<RegionId, Exhausted> {
        let min = round_up(min.max(1));
        let max = round_up(max).max(min);
        self.ensure_nodes(2)?;

        if let Some(id) = self.first_fit(max) {
            return Ok(self.carve(id, max, tag));
        }
        if let Some(id) = self.grow_for(max) {
            if self.node(id).len >= max {
                return Ok(self.carve(id, max, tag));
            }
        }
        if let Some(id) = self.largest_fit(min) {
            let size = self.node(id).len.min(max);
            return Ok(self.carve(id, size, tag));
        }
        Err(Exhausted { requested: max })
    }

    /// Release a region, coalescing it with free neighbours.
    pub fn release(&mut self, id: RegionId) {
        {
            let region = self.node_mut(id);
            debug_assert!(!region.is_nxm(), "releasing the placeholder");
            region.flags = RegionFlags::empty();
            region.used = 0;
        }
        let mut id = id;
        let prev = self.node(id).prev;

        match prev {
            Some(prev) if self.node(prev).is_free() => {
                let len = self.node(id).len;
                self.node_mut(prev).len += len;
                self.unlink(id);
                id = prev;
            }
            Some(prev) => {
                // Free regions start on a word boundary; hand the odd
                // leading bytes to the predecessor.
                let misaligned = self.node(id).addr % WORD;
                if misaligned != 0 {
                    let pad = WORD - misaligned;
                    let len = self.node(id).len;
                    if len <= pad {
                        self.node_mut(prev).len += len;
                        self.unlink(id);
                        return;
                    }
                    self.node_mut(prev).len += pad;
                    let region = self.node_mut(id);
                    region.addr += pad;
                    region.len -= pad;
                }
            }
            None => {}
        }

        if let Some(next) = self.node(id).next {
            if self.node(next).is_free() {
                let len = self.node(next).len;
                self.node_mut(id).len += len;
                self.unlink(next);
            }
        }
    }

    /// Try to extend a region in place by at least `extra` bytes, taking
    /// them from a free successor (committing more space if the region
    /// borders the uncommitted tail).
    pub fn grow_in_place(&mut self, id: RegionId, extra: usize) -> bool {
        let extra = round_up(extra);
        if extra == 0 {
            return true;
        }
        let Some(mut next) = self.node(id).next else {
            return false;
        };
        if self.node(next).is_nxm() {
            if self.ensure_nodes(1).is_err() {
                return false;
            }
            let amount = extra.max(self.grow_chunk).min(self.node(self.tail).len);
            if amount < extra || self.commit(amount).is_none() {
                return false;
            }
            let Some(after) = self.node(id).next else {
                return false;
            };
            next = after;
        }
        if !self.node(next).is_free() {
            return false;
        }
        if self.node(next).len < extra && self.node(next).next == Some(self.tail) {
            let short = extra - self.node(next).len;
            let amount = short.max(self.grow_chunk).min(self.node(self.tail).len);
            if amount >= short {
                self.commit(amount);
            }
        }
        if self.node(next).len < extra {
            return false;
        }
        if self.node(next).len < extra + WORD {
            let len = self.node(next).len;
            self.node_mut(id).len += len;
            self.unlink(next);
        } else {
            let successor = self.node_mut(next);
            successor.addr += extra;
            successor.len -= extra;
            self.node_mut(id).len += extra;
        }
        true
    }

    /// Take up to `want` bytes from a free address successor.
    ///
    /// A successor that would be left with less than a word is absorbed
    /// whole. Returns the number of bytes gained.
    pub fn steal(&mut self, id: RegionId, want: usize) -> usize {
        let want = round_up(want);
        let Some(next) = self.node(id).next else {
            return 0;
        };
        if want == 0 || !self.node(next).is_free() {
            return 0;
        }
        let available = self.node(next).len;
        if available < want + WORD {
            self.node_mut(id).len += available;
            self.unlink(next);
            return available;
        }
        let successor = self.node_mut(next);
        successor.addr += want;
        successor.len -= want;
        self.node_mut(id).len += want;
        want
    }

    /// Resize a region to hold at least `len` bytes.
    ///
    /// Grows in place when possible, otherwise moves the data to a fresh
    /// region and releases the old one. Returns the (possibly new) handle.
    pub fn resize(&mut self, id: RegionId, len: usize) -> std::result::Result<RegionId, Exhausted> {
        let current = self.node(id).len;
        if len <= current || self.grow_in_place(id, len - current) {
            return Ok(id);
        }
        let tag = self.node(id).flags - RegionFlags::IN_USE;
        let fresh = self.acquire(len, len, tag)?;
        let (src, used) = {
            let region = self.node(id);
            (region.addr, region.used)
        };
        let dst = self.node(fresh).addr;
        self.memory.copy_within(src..src + used, dst);
        self.node_mut(fresh).used = used;
        self.release(id);
        Ok(fresh)
    }

    /// Split an in-use region at `offset`; returns the second half.
    ///
    /// Data bytes past `offset` move with the second half.
    pub fn split(&mut self, id: RegionId, offset: usize) -> std::result::Result<RegionId, Exhausted> {
        self.ensure_nodes(1)?;
        let (addr, len, used, flags) = {
            let region = self.node(id);
            debug_assert!(!region.is_free(), "splitting a free region");
            (region.addr, region.len, region.used, region.flags)
        };
        let offset = offset.min(len);
        let mut second = Region::free(addr + offset, len - offset);
        second.flags = flags;
        second.used = used.saturating_sub(offset);
        let second = self
            .raw_node(second)
            .ok_or(Exhausted { requested: REGION_NODE_BYTES })?;
        self.link_after(id, second);
        let region = self.node_mut(id);
        region.len = offset;
        region.used = used.min(offset);
        Ok(second)
    }

    /// Merge a region with its address successor. The first region's
    /// data count is kept; the successor's span becomes room.
    pub fn merge(&mut self, id: RegionId) -> bool {
        let Some(next) = self.node(id).next else {
            return false;
        };
        if self.node(next).is_nxm() {
            return false;
        }
        let len = self.node(next).len;
        self.node_mut(id).len += len;
        self.unlink(next);
        true
    }

    /// Return fully free node batches to the arena. Returns the number of
    /// batches released.
    ///
    /// A batch's own region is described by a node in an older batch, so
    /// releasing one batch can empty another; passes repeat until none
    /// comes free.
    pub fn reclaim_node_batches(&mut self) -> usize {
        let mut total = 0;
        loop {
            self.settle_nodes();
            let released = self.nodes.reclaim_empty(SPARE_NODES + 2);
            if released.is_empty() {
                return total;
            }
            for &id in &released {
                self.release(id);
            }
            total += released.len();
        }
    }

    // === Inspection ===

    /// Usage statistics.
    pub fn stats(&self) -> ArenaStats {
        let mut stats = ArenaStats {
            committed: self.memory.len(),
            limit: self.limit,
            free_bytes: 0,
            in_use_bytes: 0,
            regions: 0,
            free_regions: 0,
            free_nodes: self.nodes.free_count(),
            node_batches: self.nodes.batch_count(),
        };
        let mut cursor = Some(self.head);
        while let Some(id) = cursor {
            let region = self.node(id);
            stats.regions += 1;
            if region.is_free() {
                stats.free_regions += 1;
                stats.free_bytes += region.len;
            } else if !region.is_nxm() {
                stats.in_use_bytes += region.len;
            }
            cursor = region.next;
        }
        stats
    }

    /// Walk the address list and the node free-list, reporting the first
    /// structural inconsistency found.
    pub fn verify(&self) -> Result<()> {
        self.nodes
            .check_free_list()
            .map_err(|e| StoreError::consistency(format!("region nodes: {e}")))?;

        let live = self.nodes.live_count();
        let mut count = 0usize;
        let mut expected_addr = 0usize;
        let mut prev: Option<RegionId> = None;
        let mut prev_free = false;
        let mut cursor = Some(self.head);

        while let Some(id) = cursor {
            count += 1;
            if count > live {
                return Err(StoreError::consistency("region list has a cycle"));
            }
            let Some(region) = self.nodes.get(id.0) else {
                return Err(StoreError::consistency(format!("region list reaches dead node {id:?}")));
            };
            if region.prev != prev {
                return Err(StoreError::consistency(format!("{id:?} has a wrong back link")));
            }
            if region.addr != expected_addr {
                return Err(StoreError::consistency(format!(
                    "{id:?} starts at {} but previous region ends at {expected_addr}",
                    region.addr
                )));
            }
            if region.used > region.len {
                return Err(StoreError::consistency(format!("{id:?} uses more than its length")));
            }
            if region.is_nxm() && region.next.is_some() {
                return Err(StoreError::consistency("placeholder is not the last region"));
            }
            if region.is_free() {
                if region.addr % WORD != 0 {
                    return Err(StoreError::consistency(format!("free {id:?} is not word aligned")));
                }
                if prev_free {
                    return Err(StoreError::consistency(format!("free {id:?} was not coalesced")));
                }
            }
            prev_free = region.is_free();
            expected_addr = region.end();
            prev = Some(id);
            cursor = region.next;
        }

        if prev != Some(self.tail) {
            return Err(StoreError::consistency("region list does not end at the placeholder"));
        }
        if expected_addr != self.limit {
            return Err(StoreError::consistency("regions do not cover the address range"));
        }
        if self.node(self.tail).addr != self.memory.len() {
            return Err(StoreError::consistency("placeholder does not start at the commit boundary"));
        }
        if count != live {
            return Err(StoreError::consistency(format!(
                "{live} live region nodes but {count} on the address list"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_arena() -> Arena {
        let config = StoreConfig::default()
            .with_arena_limit(64 * 1024)
            .with_arena_initial(4096)
            .with_grow_chunk(1024);
        Arena::new(&config)
    }

    #[test]
    fn test_arena_bootstrap_is_consistent() {
        let arena = small_arena();
        arena.verify().unwrap();
        let stats = arena.stats();
        assert_eq!(stats.committed, 4096);
        assert_eq!(stats.node_batches, 1);
        assert_eq!(stats.regions, 3);
    }

    #[test]
    fn test_acquire_and_release_coalesce() {
        let mut arena = small_arena();
        let a = arena.acquire(100, 100, RegionFlags::empty()).unwrap();
        let b = arena.acquire(100, 100, RegionFlags::empty()).unwrap();
        let c = arena.acquire(100, 100, RegionFlags::empty()).unwrap();
        assert_eq!(arena.len(a), round_up(100));
        arena.verify().unwrap();

        arena.release(a);
        arena.release(c);
        arena.verify().unwrap();
        arena.release(b);
        arena.verify().unwrap();
        assert_eq!(arena.stats().free_regions, 1);
    }

    #[test]
    fn test_acquire_grows_then_exhausts() {
        let config = StoreConfig::default()
            .with_arena_limit(8192)
            .with_arena_initial(2048)
            .with_grow_chunk(1024);
        let mut arena = Arena::new(&config);
        let big = arena.acquire(4000, 4000, RegionFlags::empty()).unwrap();
        assert!(arena.stats().committed > 2048);
        arena.verify().unwrap();

        let err = arena.acquire(8000, 8000, RegionFlags::empty()).unwrap_err();
        assert_eq!(err.requested, 8000);

        arena.release(big);
        arena.verify().unwrap();
    }

    #[test]
    fn test_acquire_falls_back_to_min() {
        let config = StoreConfig::default()
            .with_arena_limit(4096)
            .with_arena_initial(4096);
        let mut arena = Arena::new(&config);
        let free = arena.stats().free_bytes;
        let id = arena.acquire(64, free * 2, RegionFlags::empty()).unwrap();
        assert!(arena.len(id) >= 64);
        assert!(arena.len(id) <= free);
        arena.verify().unwrap();
    }

    #[test]
    fn test_split_moves_data_tail() {
        let mut arena = small_arena();
        let id = arena.acquire(32, 32, RegionFlags::empty()).unwrap();
        arena.span_mut(id)[..10].copy_from_slice(b"helloworld");
        arena.set_used(id, 10);

        let second = arena.split(id, 5).unwrap();
        assert_eq!(arena.bytes(id), b"hello");
        assert_eq!(arena.bytes(second), b"world");
        arena.verify().unwrap();

        // Releasing the unaligned half keeps free regions aligned.
        arena.release(second);
        arena.verify().unwrap();
    }

    #[test]
    fn test_resize_in_place_and_by_copy() {
        let mut arena = small_arena();
        let a = arena.acquire(16, 16, RegionFlags::empty()).unwrap();
        arena.span_mut(a)[..3].copy_from_slice(b"abc");
        arena.set_used(a, 3);

        // Successor is free: grows in place.
        let same = arena.resize(a, 64).unwrap();
        assert_eq!(same, a);
        assert!(arena.len(a) >= 64);

        // Block the successor, then grow again: data moves.
        let _blocker = arena.acquire(16, 16, RegionFlags::empty()).unwrap();
        let moved = arena.resize(a, 512).unwrap();
        assert_ne!(moved, a);
        assert_eq!(arena.bytes(moved), b"abc");
        arena.verify().unwrap();
    }

    #[test]
    fn test_steal_from_free_successor() {
        let mut arena = small_arena();
        let a = arena.acquire(16, 16, RegionFlags::empty()).unwrap();
        assert_eq!(arena.steal(a, 40), 40);
        assert_eq!(arena.len(a), 56);
        arena.verify().unwrap();

        let b = arena.acquire(16, 16, RegionFlags::empty()).unwrap();
        assert_eq!(arena.successor(a), Some(b));
        assert_eq!(arena.steal(a, 40), 0);
    }

    #[test]
    fn test_merge_with_successor() {
        let mut arena = small_arena();
        let a = arena.acquire(16, 16, RegionFlags::empty()).unwrap();
        let b = arena.acquire(16, 16, RegionFlags::empty()).unwrap();
        assert_eq!(arena.successor(a), Some(b));
        assert!(arena.merge(a));
        assert_eq!(arena.len(a), 32);
        assert!(!arena.contains(b));
        arena.verify().unwrap();
    }

    #[test]
    fn test_node_batches_refill_and_reclaim() {
        let mut arena = small_arena();
        let mut held = Vec::new();
        for _ in 0..100 {
            held.push(arena.acquire(8, 8, RegionFlags::empty()).unwrap());
        }
        assert!(arena.stats().node_batches > 1);
        arena.verify().unwrap();

        for id in held {
            arena.release(id);
        }
        arena.verify().unwrap();
        let batches = arena.stats().node_batches;
        let reclaimed = arena.reclaim_node_batches();
        assert!(reclaimed > 0);
        assert_eq!(arena.stats().node_batches, batches - reclaimed);
        arena.verify().unwrap();

        // Only the self-describing first batch is left, and the arena is
        // one free span again.
        assert_eq!(arena.stats().node_batches, 1);
        assert_eq!(arena.stats().free_regions, 1);
        assert!(arena.acquire(8, 8, RegionFlags::empty()).is_ok());
        arena.verify().unwrap();
    }

    #[test]
    fn test_live_regions_keep_their_batch() {
        let mut arena = small_arena();
        let mut held = Vec::new();
        for _ in 0..100 {
            held.push(arena.acquire(8, 8, RegionFlags::empty()).unwrap());
        }
        let last = held.pop().unwrap();
        for id in held {
            arena.release(id);
        }
        arena.reclaim_node_batches();
        arena.verify().unwrap();
        assert!(arena.contains(last));
        assert_eq!(arena.flags(last), RegionFlags::IN_USE);
        assert_eq!(arena.len(last), 8);
    }
}
