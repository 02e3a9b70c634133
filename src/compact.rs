//! Compaction: reclaim arena space at increasing levels of effort.
//!
//! | level | action |
//! |-------|--------|
//! | 0 | cull empty fragments, drop large pure memory copies, merge disk-adjacent pure fragments |
//! | 1 | merge small adjacent memory copies |
//! | 2 | level 1, then write dirty copies to swap and drop the large ones |
//! | 3 | level 2, dropping every pure memory copy |
//! | 4+ | write each unlocked run to swap and collapse it to one fragment |
//!
//! Locked fragments (pinned by a cursor or held by an operation in
//! progress) are never touched. Every pass ends by handing fully free node
//! batches back to the arena.

use crate::config::round_up;
use crate::error::{Result, StoreError};
use crate::pager::Pager;
use crate::rope::{FragFlags, FragId};

impl Pager {
    /// Run one compaction pass at `level` on behalf of a request for
    /// `target` bytes.
    pub(crate) fn compact(&mut self, target: usize, level: u32) -> Result<()> {
        if level >= self.config.compaction_max_level {
            return Err(StoreError::AllocatorExhausted { requested: target, level });
        }
        if level > self.config.compaction_warn_level {
            tracing::warn!(level, target, "compaction escalating without freeing enough space");
        }
        self.compactions += 1;
        let free_before = self.arena.stats().free_bytes;
        let fragments_before = self.frags.live_count();

        for index in self.frags.live_indices() {
            let id = FragId(index);
            if !self.is_live(id) || self.frag(id).is_locked() {
                continue;
            }
            match level {
                0 => self.collect_light(id)?,
                1 => self.merge_resident(id),
                2 | 3 => {
                    self.merge_resident(id);
                    self.flush_and_purge(id, level)?;
                }
                _ => self.collect_run(id)?,
            }
        }
        let batches = self.reclaim_node_batches();

        let stats = self.arena.stats();
        tracing::debug!(
            level,
            target,
            freed = stats.free_bytes.saturating_sub(free_before),
            fragments_removed = fragments_before.saturating_sub(self.frags.live_count()),
            batches,
            "compaction pass"
        );
        Ok(())
    }

    /// Level 0 on one fragment.
    fn collect_light(&mut self, id: FragId) -> Result<()> {
        let mut id = id;
        if !self.is_live(id) {
            return Ok(());
        }
        let frag = *self.frag(id);
        if self.frag_len(id) == 0 && frag.prev.is_some() {
            // Zero-length fragment with a predecessor: the chain survives it.
            let Some(next) = self.delete(id) else {
                return Ok(());
            };
            if self.frag(next).is_locked() {
                return Ok(());
            }
            id = next;
        } else if let Some(mem) = frag.mem {
            if frag.is_pure() && self.arena.used(mem) > self.config.purge_min {
                self.drop_mem(id);
            }
        }
        self.merge_disk_adjacent(id)
    }

    /// Fold pure logical successors that continue `id` on disk.
    fn merge_disk_adjacent(&mut self, id: FragId) -> Result<()> {
        loop {
            let frag = *self.frag(id);
            let (Some(next), Some(extent)) = (frag.next, frag.disk) else {
                return Ok(());
            };
            if !frag.is_pure() {
                return Ok(());
            }
            let successor = *self.frag(next);
            let Some(next_extent) = successor.disk else {
                return Ok(());
            };
            if successor.is_locked() || next_extent.file != extent.file || next_extent.addr != extent.end() {
                return Ok(());
            }
            self.check_pure(id)?;
            self.check_pure(next)?;
            let shared = successor.flags & FragFlags::SHARED;
            self.delete(next);
            self.set_flag(id, shared);
            self.drop_mem(id);
            if let Some(disk) = self.frag_mut(id).disk.as_mut() {
                disk.len += next_extent.len;
            }
        }
    }

    /// Level 1: pull small resident successors into `id`'s region.
    fn merge_resident(&mut self, id: FragId) {
        let merge_limit = self.config.merge_limit;
        let slop = self.config.slop;
        loop {
            if !self.is_live(id) {
                return;
            }
            let frag = *self.frag(id);
            let (Some(mut mem), Some(next)) = (frag.mem, frag.next) else {
                return;
            };
            let successor = *self.frag(next);
            let Some(next_mem) = successor.mem else {
                return;
            };
            if successor.is_locked() {
                return;
            }
            let used = self.arena.used(mem);
            let more = used + self.arena.used(next_mem);
            if more >= merge_limit {
                return;
            }

            let contiguous = self.arena.successor(mem) == Some(next_mem);
            if !contiguous && more > self.arena.len(mem) {
                match self.arena.resize(mem, more) {
                    Ok(grown) => {
                        mem = grown;
                        self.frag_mut(id).mem = Some(grown);
                    }
                    Err(_) => return,
                }
            }

            if contiguous {
                // Slide the successor's bytes down against ours, then take
                // its region over.
                let src = self.arena.addr(next_mem);
                let count = self.arena.used(next_mem);
                let dst = self.arena.addr(mem) + used;
                self.arena.move_bytes(src, dst, count);
                self.frag_mut(next).mem = None;
                self.arena.merge(mem);
                self.arena.set_used(mem, more);
                if self.arena.len(mem) > round_up(more) + slop {
                    if let Ok(spare) = self.arena.split(mem, round_up(more)) {
                        self.arena.release(spare);
                    }
                }
            } else {
                self.arena.append_from(mem, next_mem);
                self.drop_mem(next);
            }
            self.mark_dirty(id);
            self.delete(next);
        }
    }

    /// Levels 2 and 3 on one fragment.
    fn flush_and_purge(&mut self, id: FragId, level: u32) -> Result<()> {
        if !self.is_live(id) {
            return Ok(());
        }
        let frag = *self.frag(id);
        let Some(mem) = frag.mem else {
            return Ok(());
        };
        if frag.is_dirty() && self.arena.used(mem) > 0 {
            self.flush_single(id)?;
        }
        if !self.is_live(id) {
            return Ok(());
        }
        let frag = *self.frag(id);
        if let Some(mem) = frag.mem {
            if frag.is_pure() && (level >= 3 || self.arena.used(mem) > self.config.purge_min) {
                self.drop_mem(id);
            }
        }
        Ok(())
    }

    /// Level 4: back up to the start of the unlocked run holding `id` and
    /// write it out.
    fn collect_run(&mut self, id: FragId) -> Result<()> {
        let mut first = id;
        while let Some(prev) = self.frag(first).prev {
            if self.frag(prev).is_locked() {
                break;
            }
            first = prev;
        }
        let single = self
            .frag(first)
            .next
            .map_or(true, |next| self.frag(next).is_locked());
        if !single {
            return self.flush_run(first);
        }
        if self.frag(first).mem.is_some() {
            if self.frag(first).is_dirty() {
                self.flush_single(first)?;
            }
            self.drop_mem(first);
        }
        Ok(())
    }
}
