//! Pager: the allocator context shared by every text object.
//!
//! Owns the arena, the fragment node pool and the backing-file table.
//! Allocation requests that the arena cannot meet come back here; the
//! pager answers them by compacting at increasing levels and retrying.

use crate::arena::{Arena, Exhausted, NodePool, RegionFlags, RegionId};
use crate::config::{round_up, StoreConfig};
use crate::error::{Result, StoreError};
use crate::rope::{FragFlags, FragId, Fragment};
use crate::swap::{BackingFile, FileId};

/// Bytes accounted per fragment node.
const FRAGMENT_NODE_BYTES: usize = std::mem::size_of::<Fragment>();

/// The allocator context.
#[derive(Debug)]
pub(crate) struct Pager {
    pub(crate) config: StoreConfig,
    pub(crate) arena: Arena,
    pub(crate) frags: NodePool<Fragment>,
    pub(crate) files: Vec<Option<BackingFile>>,
    /// The anonymous swap file, once created.
    pub(crate) swap: Option<FileId>,
    /// Compaction passes run so far.
    pub(crate) compactions: u64,
}

impl Pager {
    pub(crate) fn new(config: StoreConfig) -> Self {
        let arena = Arena::new(&config);
        let frags = NodePool::new(config.fragment_batch.max(2));
        Self {
            config,
            arena,
            frags,
            files: Vec::new(),
            swap: None,
            compactions: 0,
        }
    }

    // === Fragment access ===

    #[inline]
    pub(crate) fn frag(&self, id: FragId) -> &Fragment {
        match self.frags.get(id.0) {
            Some(frag) => frag,
            None => panic!("dangling fragment handle {id:?}"),
        }
    }

    #[inline]
    pub(crate) fn frag_mut(&mut self, id: FragId) -> &mut Fragment {
        match self.frags.get_mut(id.0) {
            Some(frag) => frag,
            None => panic!("dangling fragment handle {id:?}"),
        }
    }

    /// Whether `id` names a live fragment.
    pub(crate) fn is_live(&self, id: FragId) -> bool {
        self.frags.is_live(id.0)
    }

    /// Live length: resident bytes if any, else the disk extent.
    #[inline]
    pub(crate) fn frag_len(&self, id: FragId) -> u64 {
        let frag = self.frag(id);
        match (frag.mem, frag.disk) {
            (Some(mem), _) => self.arena.used(mem) as u64,
            (None, Some(extent)) => extent.len,
            (None, None) => 0,
        }
    }

    pub(crate) fn set_flag(&mut self, id: FragId, flag: FragFlags) {
        self.frag_mut(id).flags |= flag;
    }

    pub(crate) fn clear_flag(&mut self, id: FragId, flag: FragFlags) {
        self.frag_mut(id).flags -= flag;
    }

    /// Set `HOLD`, reporting whether it was already set.
    pub(crate) fn hold(&mut self, id: FragId) -> bool {
        let frag = self.frag_mut(id);
        let was = frag.flags.contains(FragFlags::HOLD);
        frag.flags |= FragFlags::HOLD;
        was
    }

    /// Undo a [`hold`](Self::hold).
    pub(crate) fn unhold(&mut self, id: FragId, was_held: bool) {
        if !was_held && self.is_live(id) {
            self.clear_flag(id, FragFlags::HOLD);
        }
    }

    // === Allocation ===

    /// Run `attempt` until it succeeds, compacting at increasing levels
    /// between tries.
    pub(crate) fn with_reclaim<T>(
        &mut self,
        mut attempt: impl FnMut(&mut Self) -> std::result::Result<T, Exhausted>,
    ) -> Result<T> {
        let mut level = 0;
        loop {
            match attempt(self) {
                Ok(value) => return Ok(value),
                Err(Exhausted { requested }) => {
                    if level >= self.config.compaction_max_level {
                        return Err(StoreError::AllocatorExhausted { requested, level });
                    }
                    self.compact(requested, level)?;
                    level += 1;
                }
            }
        }
    }

    /// Acquire a region of `min..=max` bytes for text, compacting as needed.
    pub(crate) fn acquire(&mut self, min: usize, max: usize) -> Result<RegionId> {
        self.with_reclaim(|pager| pager.arena.acquire(min, max, RegionFlags::empty()))
    }

    /// Take a fragment node without compacting.
    fn try_new_fragment(&mut self, frag: Fragment) -> std::result::Result<FragId, Exhausted> {
        if self.frags.free_count() == 0 {
            let bytes = round_up(self.frags.per_batch() * FRAGMENT_NODE_BYTES);
            let region = self.arena.acquire(bytes, bytes, RegionFlags::FRAGMENT_NODES)?;
            let len = self.arena.len(region);
            self.arena.set_used(region, len);
            let batch = self.frags.add_batch(Some(region));
            tracing::trace!(batch, ?region, "fragment node batch added");
        }
        self.frags
            .take(frag)
            .map(FragId)
            .ok_or(Exhausted { requested: FRAGMENT_NODE_BYTES })
    }

    /// Allocate a fragment node holding `frag`, compacting as needed.
    pub(crate) fn new_fragment(&mut self, frag: Fragment) -> Result<FragId> {
        self.with_reclaim(|pager| pager.try_new_fragment(frag))
    }

    /// Release a fragment's memory copy, if any.
    pub(crate) fn drop_mem(&mut self, id: FragId) {
        if let Some(mem) = self.frag_mut(id).mem.take() {
            self.arena.release(mem);
        }
    }

    /// Free a fragment: its memory, its physical and logical links and its
    /// node. Returns the logical successor.
    pub(crate) fn delete(&mut self, id: FragId) -> Option<FragId> {
        self.drop_mem(id);
        let (prev, next) = {
            let frag = self.frag(id);
            (frag.prev, frag.next)
        };
        if let Some(prev) = prev {
            self.frag_mut(prev).next = next;
        }
        if let Some(next) = next {
            self.frag_mut(next).prev = prev;
        }
        self.phys_unlink(id);
        self.frags.put(id.0);
        next
    }

    /// Return fully free node batches, fragment and region alike.
    pub(crate) fn reclaim_node_batches(&mut self) -> usize {
        let regions = self.frags.reclaim_empty(1);
        let fragment_batches = regions.len();
        for region in regions {
            self.arena.release(region);
        }
        fragment_batches + self.arena.reclaim_node_batches()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhaustion_stops_at_ceiling() {
        let config = StoreConfig::default()
            .with_arena_limit(8 * 1024)
            .with_arena_initial(8 * 1024)
            .with_compaction_max_level(2);
        let mut pager = Pager::new(config);
        let err = pager.acquire(64 * 1024, 64 * 1024).unwrap_err();
        assert!(matches!(err, StoreError::AllocatorExhausted { level: 2, .. }));
        assert_eq!(pager.compactions, 2);
        pager.verify().unwrap();
    }

    #[test]
    fn test_fragment_batches_return_to_arena() {
        let mut pager = Pager::new(StoreConfig::default().with_batches(8, 8));
        let ids: Vec<FragId> = (0..40)
            .map(|_| pager.new_fragment(Fragment::empty()).unwrap())
            .collect();
        let batches = pager.frags.batch_count();
        assert!(batches >= 5);
        let in_use = pager.arena.stats().in_use_bytes;

        for id in ids {
            pager.delete(id);
        }
        assert!(pager.reclaim_node_batches() >= batches - 2);
        assert!(pager.frags.batch_count() < batches);
        assert!(pager.arena.stats().in_use_bytes < in_use);
        pager.verify().unwrap();
    }
}
