//! Node pools: fixed-size bookkeeping nodes handed out from batches.
//!
//! Both region nodes and fragment nodes live in pools. Each batch of
//! nodes is accounted against an arena region, so bookkeeping competes
//! with text for the same address space. Free slots sit on a private
//! free-list that hands out the lowest slot first, so live nodes gather in
//! the oldest batches and the newer ones drain; a batch whose nodes are all
//! free can be handed back.

use super::region::RegionId;
use std::collections::BTreeSet;

/// One slot of a pool.
#[derive(Debug)]
enum Slot<T> {
    /// Holds a live node.
    Live(T),
    /// On the free-list.
    Free,
    /// Belongs to a batch that was returned to the arena.
    Vacant,
}

/// A batch of contiguous slots.
#[derive(Debug, Clone, Copy)]
struct Batch {
    /// Arena region accounting for this batch.
    backing: Option<RegionId>,
    /// Number of live nodes in the batch.
    live: usize,
}

/// A typed node pool with a free-list.
#[derive(Debug)]
pub(crate) struct NodePool<T> {
    slots: Vec<Slot<T>>,
    free: BTreeSet<u32>,
    batches: Vec<Option<Batch>>,
    per_batch: usize,
}

impl<T> NodePool<T> {
    /// Create an empty pool whose batches hold `per_batch` nodes.
    pub(crate) const fn new(per_batch: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: BTreeSet::new(),
            batches: Vec::new(),
            per_batch,
        }
    }

    /// Nodes per batch.
    #[inline]
    pub(crate) const fn per_batch(&self) -> usize {
        self.per_batch
    }

    /// Number of nodes on the free-list.
    #[inline]
    pub(crate) fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Number of live nodes.
    pub(crate) fn live_count(&self) -> usize {
        self.batches.iter().flatten().map(|b| b.live).sum()
    }

    /// Number of batches currently backed.
    pub(crate) fn batch_count(&self) -> usize {
        self.batches.iter().flatten().count()
    }

    /// Add a batch of free slots; returns the batch index.
    ///
    /// A vacated batch index is reused before the pool is extended.
    pub(crate) fn add_batch(&mut self, backing: Option<RegionId>) -> usize {
        let batch = Batch { backing, live: 0 };
        let index = if let Some(i) = self.batches.iter().position(Option::is_none) {
            self.batches[i] = Some(batch);
            i
        } else {
            self.batches.push(Some(batch));
            self.slots
                .extend((0..self.per_batch).map(|_| Slot::Vacant));
            self.batches.len() - 1
        };
        let first = index * self.per_batch;
        for slot in first..first + self.per_batch {
            self.slots[slot] = Slot::Free;
            self.free.insert(slot as u32);
        }
        index
    }

    /// Record the region backing a batch.
    pub(crate) fn set_backing(&mut self, batch: usize, backing: RegionId) {
        if let Some(Some(b)) = self.batches.get_mut(batch) {
            b.backing = Some(backing);
        }
    }

    /// Re-point the batch backed by `old` at `new`.
    pub(crate) fn rebind_backing(&mut self, old: RegionId, new: RegionId) {
        for batch in self.batches.iter_mut().flatten() {
            if batch.backing == Some(old) {
                batch.backing = Some(new);
            }
        }
    }

    /// The lowest free slot.
    #[inline]
    pub(crate) fn lowest_free(&self) -> Option<u32> {
        self.free.first().copied()
    }

    /// Take the lowest free node and store `value` in it.
    pub(crate) fn take(&mut self, value: T) -> Option<u32> {
        let index = self.free.pop_first()?;
        self.slots[index as usize] = Slot::Live(value);
        if let Some(Some(batch)) = self.batches.get_mut(index as usize / self.per_batch) {
            batch.live += 1;
        }
        Some(index)
    }

    /// Return a live node to the free-list.
    pub(crate) fn put(&mut self, index: u32) -> Option<T> {
        let slot = self.slots.get_mut(index as usize)?;
        if !matches!(slot, Slot::Live(_)) {
            return None;
        }
        let Slot::Live(value) = std::mem::replace(slot, Slot::Free) else {
            return None;
        };
        if let Some(Some(batch)) = self.batches.get_mut(index as usize / self.per_batch) {
            batch.live -= 1;
        }
        self.free.insert(index);
        Some(value)
    }

    /// Borrow a live node.
    #[inline]
    pub(crate) fn get(&self, index: u32) -> Option<&T> {
        match self.slots.get(index as usize) {
            Some(Slot::Live(value)) => Some(value),
            _ => None,
        }
    }

    /// Mutably borrow a live node.
    #[inline]
    pub(crate) fn get_mut(&mut self, index: u32) -> Option<&mut T> {
        match self.slots.get_mut(index as usize) {
            Some(Slot::Live(value)) => Some(value),
            _ => None,
        }
    }

    /// Whether `index` names a live node.
    #[inline]
    pub(crate) fn is_live(&self, index: u32) -> bool {
        matches!(self.slots.get(index as usize), Some(Slot::Live(_)))
    }

    /// Indices of all live nodes, in slot order.
    pub(crate) fn live_indices(&self) -> Vec<u32> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| matches!(slot, Slot::Live(_)))
            .map(|(i, _)| i as u32)
            .collect()
    }

    /// Detach every batch with no live nodes, as long as at least
    /// `min_free` free nodes remain. Returns the regions that backed them.
    pub(crate) fn reclaim_empty(&mut self, min_free: usize) -> Vec<RegionId> {
        let mut released = Vec::new();
        for index in 0..self.batches.len() {
            let Some(batch) = self.batches[index] else {
                continue;
            };
            if batch.live != 0 || self.free.len() < min_free + self.per_batch {
                continue;
            }
            let first = index * self.per_batch;
            let range = first..first + self.per_batch;
            for slot in range.clone() {
                self.slots[slot] = Slot::Vacant;
            }
            self.free.retain(|&i| !range.contains(&(i as usize)));
            self.batches[index] = None;
            if let Some(backing) = batch.backing {
                released.push(backing);
            }
        }
        released
    }

    /// Check the free-list: every entry is a free slot and every free
    /// slot is listed.
    pub(crate) fn check_free_list(&self) -> Result<(), String> {
        for &index in &self.free {
            if !matches!(self.slots.get(index as usize), Some(Slot::Free)) {
                return Err(format!("free-list entry {index} is not a free slot"));
            }
        }
        let free_slots = self
            .slots
            .iter()
            .filter(|slot| matches!(slot, Slot::Free))
            .count();
        if free_slots != self.free.len() {
            return Err(format!(
                "{free_slots} free slots but free-list holds {}",
                self.free.len()
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_take_and_put() {
        let mut pool: NodePool<u64> = NodePool::new(4);
        pool.add_batch(None);
        assert_eq!(pool.free_count(), 4);

        let a = pool.take(10).unwrap();
        let b = pool.take(20).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(pool.get(a), Some(&10));
        assert_eq!(pool.live_count(), 2);

        assert_eq!(pool.put(a), Some(10));
        assert!(!pool.is_live(a));
        assert_eq!(pool.put(a), None);
        assert!(pool.check_free_list().is_ok());
    }

    #[test]
    fn test_pool_exhausts_without_batches() {
        let mut pool: NodePool<u8> = NodePool::new(2);
        assert!(pool.take(1).is_none());
        pool.add_batch(None);
        assert!(pool.take(1).is_some());
        assert!(pool.take(2).is_some());
        assert!(pool.take(3).is_none());
    }

    #[test]
    fn test_pool_reclaims_empty_batches() {
        let mut pool: NodePool<u8> = NodePool::new(2);
        pool.add_batch(Some(RegionId(7)));
        pool.add_batch(Some(RegionId(9)));
        let a = pool.take(1).unwrap();
        let b = pool.take(2).unwrap();
        assert_eq!(pool.batch_count(), 2);

        // Only one of the two emptied batches can go; the other keeps
        // the free-list above the minimum.
        pool.put(a);
        pool.put(b);
        let released = pool.reclaim_empty(1);
        assert_eq!(released.len(), 1);
        assert_eq!(pool.batch_count(), 1);
        assert!(pool.check_free_list().is_ok());

        // Reuses the vacated batch index.
        let index = pool.add_batch(None);
        assert!(index < 2);
        assert_eq!(pool.free_count(), 4);
    }

    #[test]
    fn test_pool_hands_out_lowest_slot_first() {
        let mut pool: NodePool<u8> = NodePool::new(2);
        pool.add_batch(None);
        pool.add_batch(Some(RegionId(5)));
        let a = pool.take(1).unwrap();
        let b = pool.take(2).unwrap();
        let c = pool.take(3).unwrap();
        assert_eq!((a, b, c), (0, 1, 2));

        // A slot freed in the first batch is reused before the second
        // batch's last slot, leaving that batch to drain.
        pool.put(a);
        assert_eq!(pool.lowest_free(), Some(0));
        assert_eq!(pool.take(4), Some(0));
        pool.put(c);
        assert_eq!(pool.reclaim_empty(0), vec![RegionId(5)]);
        assert_eq!(pool.batch_count(), 1);
    }
}
