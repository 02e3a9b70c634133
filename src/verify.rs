//! Consistency checks over fragments, chains and physical lists.
//!
//! These walk every structure and report the first violation found. They
//! are meant for tests and for callers that want to audit a store between
//! operations; nothing on the hot path calls them.

use crate::arena::RegionFlags;
use crate::error::{Result, StoreError};
use crate::pager::Pager;
use crate::rope::{FragFlags, FragId};
use crate::swap::{FileId, FileKind};
use std::collections::HashSet;

impl Pager {
    /// Arena structure plus every fragment-level invariant.
    pub(crate) fn verify(&self) -> Result<()> {
        self.arena.verify()?;
        self.verify_chains()
    }

    /// Check one fragment claimed to be pure: it has a disk extent, is not
    /// dirty, and any memory copy is exactly as long as the extent.
    pub(crate) fn check_pure(&self, id: FragId) -> Result<()> {
        let frag = self.frag(id);
        let Some(extent) = frag.disk else {
            return Err(StoreError::consistency(format!("{id:?} is treated as pure but has no extent")));
        };
        if frag.is_dirty() {
            return Err(StoreError::consistency(format!("{id:?} is dirty but keeps an extent")));
        }
        if let Some(mem) = frag.mem {
            let used = self.arena.used(mem) as u64;
            if used != extent.len {
                return Err(StoreError::consistency(format!(
                    "pure {id:?} holds {used} bytes for an extent of {}",
                    extent.len
                )));
            }
        }
        Ok(())
    }

    /// Walk every live fragment, chain and physical list.
    pub(crate) fn verify_chains(&self) -> Result<()> {
        self.frags
            .check_free_list()
            .map_err(|e| StoreError::consistency(format!("fragment nodes: {e}")))?;

        let live = self.frags.live_indices();
        let mut regions = HashSet::new();
        let mut extents = 0usize;
        for &index in &live {
            let id = FragId(index);
            self.verify_fragment(id, &mut regions)?;
            if self.frag(id).disk.is_some() {
                extents += 1;
            }
        }

        // Every fragment sits on exactly one chain: walking from the heads
        // must reach all of them, and a cycle has no head.
        let mut reached = 0usize;
        for &index in &live {
            let id = FragId(index);
            if self.frag(id).prev.is_some() {
                continue;
            }
            let mut walk = Some(id);
            while let Some(id) = walk {
                reached += 1;
                if reached > live.len() {
                    return Err(StoreError::consistency("logical list has a cycle"));
                }
                walk = self.frag(id).next;
            }
        }
        if reached != live.len() {
            return Err(StoreError::consistency(format!(
                "{} live fragments but {reached} reachable from chain heads",
                live.len()
            )));
        }

        let mut threaded = 0usize;
        for (slot, backing) in self.files.iter().enumerate() {
            if backing.is_some() {
                threaded += self.verify_physical(FileId(slot as u32), extents)?;
            }
        }
        if threaded != extents {
            return Err(StoreError::consistency(format!(
                "{extents} fragments have extents but {threaded} are on physical lists"
            )));
        }
        Ok(())
    }

    fn verify_fragment(&self, id: FragId, regions: &mut HashSet<crate::arena::RegionId>) -> Result<()> {
        let frag = self.frag(id);
        for (link, back) in [(frag.next, true), (frag.prev, false)] {
            let Some(other) = link else {
                continue;
            };
            if !self.is_live(other) {
                return Err(StoreError::consistency(format!("{id:?} links to dead {other:?}")));
            }
            let reciprocal = if back { self.frag(other).prev } else { self.frag(other).next };
            if reciprocal != Some(id) {
                return Err(StoreError::consistency(format!("{id:?} and {other:?} disagree on their link")));
            }
        }
        if frag.flags.contains(FragFlags::HOLD) {
            return Err(StoreError::consistency(format!("{id:?} is still held")));
        }

        if let Some(mem) = frag.mem {
            if !self.arena.contains(mem) {
                return Err(StoreError::consistency(format!("{id:?} owns dead region {mem:?}")));
            }
            let flags = self.arena.flags(mem);
            if !flags.contains(RegionFlags::IN_USE)
                || flags.intersects(RegionFlags::REGION_NODES | RegionFlags::FRAGMENT_NODES)
            {
                return Err(StoreError::consistency(format!("{id:?} owns {mem:?} flagged {flags:?}")));
            }
            if !regions.insert(mem) {
                return Err(StoreError::consistency(format!("{mem:?} is owned twice")));
            }
        }

        match (frag.mem, frag.disk) {
            (_, Some(extent)) => {
                if frag.is_dirty() {
                    return Err(StoreError::consistency(format!("dirty {id:?} keeps an extent")));
                }
                let Some(backing) = self.file(extent.file) else {
                    return Err(StoreError::consistency(format!("{id:?} refers to closed file {}", extent.file)));
                };
                if backing.kind == FileKind::Source && extent.end() > backing.len {
                    return Err(StoreError::consistency(format!("{id:?} reaches past the end of {}", extent.file)));
                }
                self.check_pure(id)?;
            }
            (Some(mem), None) => {
                if self.arena.used(mem) > 0 && !frag.is_dirty() {
                    return Err(StoreError::consistency(format!("{id:?} holds unbacked text but is clean")));
                }
            }
            (None, None) => {}
        }
        Ok(())
    }

    /// Walk one physical list; returns its length.
    ///
    /// Extents must not overlap unless both sides are `SHARED`. The list is
    /// sorted, so it is enough to track how far earlier extents reach.
    fn verify_physical(&self, file: FileId, bound: usize) -> Result<usize> {
        let mut count = 0usize;
        let mut prev: Option<FragId> = None;
        let mut last_addr = 0u64;
        // Furthest end of any extent, and of unshared extents only.
        let mut reach = 0u64;
        let mut reach_unshared = 0u64;
        let mut walk = self.file(file).and_then(|b| b.head);
        while let Some(id) = walk {
            count += 1;
            if count > bound {
                return Err(StoreError::consistency(format!("physical list of {file} has a cycle")));
            }
            if !self.is_live(id) {
                return Err(StoreError::consistency(format!("physical list of {file} reaches dead {id:?}")));
            }
            let frag = self.frag(id);
            let Some(extent) = frag.disk else {
                return Err(StoreError::consistency(format!("{id:?} on a physical list without an extent")));
            };
            if extent.file != file {
                return Err(StoreError::consistency(format!("{id:?} on the list of {file} lives in {}", extent.file)));
            }
            if frag.phys_prev != prev {
                return Err(StoreError::consistency(format!("{id:?} has a wrong physical back link")));
            }
            if extent.addr < last_addr {
                return Err(StoreError::consistency(format!("physical list of {file} is out of order at {id:?}")));
            }
            if extent.len > 0 {
                let shared = frag.flags.contains(FragFlags::SHARED);
                let limit = if shared { reach_unshared } else { reach };
                if extent.addr < limit {
                    return Err(StoreError::consistency(format!(
                        "{id:?} at {}+{} overlaps another extent of {file}",
                        extent.addr, extent.len
                    )));
                }
                reach = reach.max(extent.end());
                if !shared {
                    reach_unshared = reach_unshared.max(extent.end());
                }
            }
            last_addr = extent.addr;
            prev = Some(id);
            walk = frag.phys_next;
        }
        Ok(count)
    }
}
