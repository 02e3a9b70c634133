//! The transition function: bring a cursor into the state a byte
//! operation needs.

use super::{Cursor, Mode, Prepared, Window};
use crate::arena::RegionId;
use crate::error::{Result, StoreError};
use crate::pager::Pager;
use crate::rope::{FragFlags, FragId};

impl Pager {
    /// Prepare `cursor` for `mode`.
    ///
    /// A window that already serves the mode is kept. Otherwise the cursor
    /// is detached, normalized onto one fragment, and the fragment is read
    /// in (read modes), split around a fresh region (write) or split to a
    /// clean boundary (delete modes).
    pub(crate) fn prepare(&mut self, cursor: &mut Cursor, mode: Mode) -> Result<Prepared> {
        if let Some(window) = cursor.window {
            match mode {
                Mode::ReadForward => {
                    if window.rleft > 0 {
                        return Ok(Prepared::Ready);
                    }
                    self.disconnect(cursor);
                    if self.advance(cursor).is_none() {
                        return Ok(Prepared::End);
                    }
                }
                Mode::ReadBackward => {
                    if window.pos > 0 {
                        if let Some(w) = cursor.window.as_mut() {
                            w.writing = false;
                            w.wleft = 0;
                        }
                        return Ok(Prepared::Ready);
                    }
                    self.disconnect(cursor);
                }
                Mode::WriteForward => {
                    if window.rleft == 0 {
                        let room = self.window_room(cursor.cur, window.pos);
                        if let Some(w) = cursor.window.as_mut() {
                            w.wleft = room;
                        }
                        if room > 0 {
                            return Ok(Prepared::Ready);
                        }
                    }
                    self.disconnect(cursor);
                }
                Mode::DeleteForward => {
                    self.disconnect(cursor);
                    if window.rleft == 0 {
                        if let Some(next) = self.advance(cursor) {
                            return Ok(Prepared::Boundary(next));
                        }
                    } else if window.pos == 0 {
                        return Ok(Prepared::Boundary(cursor.cur));
                    }
                }
                Mode::DeleteBackward => {
                    self.disconnect(cursor);
                    if window.rleft == 0 {
                        return Ok(Prepared::Boundary(cursor.cur));
                    }
                }
            }
        }

        self.normalize(cursor, mode.leans_back());
        match mode {
            Mode::ReadForward | Mode::ReadBackward => self.prepare_read(cursor, mode),
            Mode::WriteForward => {
                self.prepare_write(cursor)?;
                Ok(Prepared::Ready)
            }
            Mode::DeleteForward => {
                if cursor.off == 0 {
                    return Ok(Prepared::Boundary(cursor.cur));
                }
                self.split(cursor.cur, cursor.off as u64)?;
                let next = self
                    .advance(cursor)
                    .ok_or_else(|| StoreError::consistency("split left no second part"))?;
                Ok(Prepared::Boundary(next))
            }
            Mode::DeleteBackward => {
                let cur = cursor.cur;
                if cursor.off as u64 != self.frag_len(cur) {
                    self.split(cur, cursor.off as u64)?;
                }
                Ok(Prepared::Boundary(cur))
            }
        }
    }

    fn window_room(&self, id: FragId, pos: usize) -> usize {
        self.frag(id)
            .mem
            .map_or(0, |mem| self.arena.len(mem).saturating_sub(pos))
    }

    /// Drop the window, keeping the position as an idle offset.
    pub(crate) fn disconnect(&mut self, cursor: &mut Cursor) {
        if let Some(window) = cursor.window.take() {
            cursor.off = window.pos as i64;
        }
    }

    /// Attach the current fragment's region as the window.
    fn attach(&mut self, cursor: &mut Cursor) -> Result<()> {
        let mem = self
            .frag(cursor.cur)
            .mem
            .ok_or_else(|| StoreError::consistency("attaching a fragment with no memory"))?;
        let used = self.arena.used(mem);
        let pos = (cursor.off.max(0) as usize).min(used);
        let rleft = used - pos;
        let wleft = if rleft == 0 { self.arena.len(mem) - used } else { 0 };
        cursor.window = Some(Window {
            pos,
            rleft,
            wleft,
            writing: false,
        });
        Ok(())
    }

    /// Move the pin from one fragment to another.
    pub(crate) fn move_pin(&mut self, cursor: &mut Cursor, to: FragId) {
        if self.is_live(cursor.cur) {
            self.clear_flag(cursor.cur, FragFlags::PIN);
        }
        self.set_flag(to, FragFlags::PIN);
        cursor.cur = to;
    }

    /// Step to the start of the next fragment.
    pub(crate) fn advance(&mut self, cursor: &mut Cursor) -> Option<FragId> {
        let next = self.frag(cursor.cur).next?;
        cursor.dot += self.frag_len(cursor.cur);
        cursor.off = 0;
        self.move_pin(cursor, next);
        Some(next)
    }

    /// Walk an idle cursor until its offset falls within the current
    /// fragment.
    ///
    /// Zero-length fragments are skipped. A position on a boundary lands
    /// on the end of the earlier fragment when `lean_back` is set and on
    /// the start of the later one otherwise. Offsets beyond either end of
    /// the text are clamped.
    pub(crate) fn normalize(&mut self, cursor: &mut Cursor, lean_back: bool) {
        let mut id = cursor.cur;
        let mut off = cursor.off;
        let mut dot = cursor.dot as i64;
        let floor = i64::from(lean_back);

        if off >= floor {
            loop {
                let len = self.frag_len(id) as i64;
                if off < len || (lean_back && off == len) {
                    break;
                }
                match self.frag(id).next {
                    Some(next) => {
                        off -= len;
                        dot += len;
                        id = next;
                    }
                    None => {
                        off = len;
                        break;
                    }
                }
            }
        } else {
            loop {
                let Some(prev) = self.frag(id).prev else {
                    off = 0;
                    dot = 0;
                    break;
                };
                id = prev;
                let len = self.frag_len(id) as i64;
                dot -= len;
                off += len;
                if off > 0 || (!lean_back && off == 0) {
                    break;
                }
            }
        }

        if id != cursor.cur {
            self.move_pin(cursor, id);
        }
        cursor.off = off;
        cursor.dot = dot.max(0) as u64;
    }

    fn prepare_read(&mut self, cursor: &mut Cursor, mode: Mode) -> Result<Prepared> {
        let backward = mode == Mode::ReadBackward;
        let len = self.frag_len(cursor.cur);
        let off = cursor.off.max(0) as u64;
        if (backward && off == 0) || (!backward && off >= len) {
            return Ok(Prepared::End);
        }
        if self.frag(cursor.cur).mem.is_none() {
            let mut region = None;
            let result = self.read_in(cursor, backward, &mut region);
            if result.is_err() {
                if let Some(region) = region {
                    self.arena.release(region);
                }
            }
            result?;
        }
        self.attach(cursor)?;
        Ok(Prepared::Ready)
    }

    /// Page in a bounded window of the current (disk-only) fragment
    /// around the position, splitting off what lies beyond it.
    fn read_in(&mut self, cursor: &mut Cursor, backward: bool, region: &mut Option<RegionId>) -> Result<()> {
        let window = self.config.window_size as u64;
        let mut slop = self.config.slop as u64;
        let (mut before, mut after) = if backward { (window, 0) } else { (0, window) };
        let mut shrunk = false;

        loop {
            if cursor.off as u64 > before + slop {
                self.split(cursor.cur, cursor.off as u64 - before)?;
                self.advance(cursor);
                cursor.off = before as i64;
            }
            let off = cursor.off as u64;
            if self.frag_len(cursor.cur) > off + after + slop {
                self.split(cursor.cur, off + after)?;
            }

            let want = self.frag_len(cursor.cur) as usize;
            let got = match *region {
                Some(got) => got,
                None => {
                    let got = self.acquire(slop as usize, want)?;
                    *region = Some(got);
                    got
                }
            };
            let have = self.arena.len(got);
            if have < want {
                // Short region: narrow the window to fit it and go again.
                if shrunk {
                    return Err(StoreError::consistency(format!(
                        "read window of {want} bytes does not fit region of {have}"
                    )));
                }
                shrunk = true;
                slop = 0;
                (before, after) = if backward { (have as u64, 0) } else { (0, have as u64) };
                continue;
            }

            let extent = self
                .frag(cursor.cur)
                .disk
                .ok_or_else(|| StoreError::consistency("paging in a fragment with no extent"))?;
            self.read_into(got, extent)?;
            self.frag_mut(cursor.cur).mem = region.take();
            return Ok(());
        }
    }

    /// Set up a write window at the position: append in place when the
    /// region has room (or can get some), otherwise split down to an empty
    /// fragment and give it a fresh region.
    fn prepare_write(&mut self, cursor: &mut Cursor) -> Result<()> {
        let cur = cursor.cur;
        let off = cursor.off.max(0) as u64;
        let window = self.config.window_size;

        match self.frag(cur).mem {
            None => {
                if self.frag_len(cur) > 0 {
                    if off > 0 {
                        self.split(cur, off)?;
                        self.advance(cursor);
                    }
                    if self.frag_len(cursor.cur) > 0 {
                        self.split(cursor.cur, 0)?;
                    }
                }
            }
            Some(mem) => {
                let used = self.arena.used(mem) as u64;
                if off == used {
                    let len = self.arena.len(mem);
                    if len > used as usize {
                        return self.attach(cursor);
                    }
                    // Grow a dirty region into free space, up to the window size.
                    if self.frag(cur).is_dirty() && len < window && self.arena.steal(mem, window - len) > 0 {
                        return self.attach(cursor);
                    }
                    // An empty resident successor is as good as a new region.
                    if let Some(next) = self.frag(cur).next {
                        if let Some(next_mem) = self.frag(next).mem {
                            if self.arena.used(next_mem) == 0 && self.arena.len(next_mem) > 0 {
                                self.advance(cursor);
                                return self.attach(cursor);
                            }
                        }
                    }
                }
                self.split(cur, off)?;
                if self.frag(cur).mem.is_some() {
                    self.advance(cursor);
                    if self.frag(cursor.cur).mem.is_some() {
                        self.split(cursor.cur, 0)?;
                    }
                }
            }
        }

        let region = self.acquire(self.config.slop, window)?;
        self.frag_mut(cursor.cur).mem = Some(region);
        self.attach(cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::rope::Fragment;

    fn chain_of(pager: &mut Pager, lens: &[usize]) -> Vec<FragId> {
        let mut ids: Vec<FragId> = Vec::new();
        for &len in lens {
            let mut frag = Fragment::empty();
            if len > 0 {
                let region = pager.acquire(len, len).unwrap();
                pager.arena.set_used(region, len);
                frag.mem = Some(region);
                frag.flags = FragFlags::DIRTY;
            }
            let id = pager.new_fragment(frag).unwrap();
            if let Some(&prev) = ids.last() {
                pager.join(prev, id);
            }
            ids.push(id);
        }
        ids
    }

    #[test]
    fn test_normalize_boundaries() {
        let mut pager = Pager::new(StoreConfig::default());
        let ids = chain_of(&mut pager, &[5, 0, 5]);
        let mut cursor = Cursor::new(ids[0]);
        pager.set_flag(ids[0], FragFlags::PIN);

        // Forward lean skips the empty fragment to the start of the third.
        cursor.off = 5;
        pager.normalize(&mut cursor, false);
        assert_eq!((cursor.cur, cursor.dot, cursor.off), (ids[2], 5, 0));

        // Backward lean resolves the same boundary to the end of the first.
        pager.normalize(&mut cursor, true);
        assert_eq!((cursor.cur, cursor.dot, cursor.off), (ids[0], 0, 5));
        assert!(pager.frag(ids[0]).flags.contains(FragFlags::PIN));
        assert!(!pager.frag(ids[2]).flags.contains(FragFlags::PIN));
    }

    #[test]
    fn test_normalize_clamps() {
        let mut pager = Pager::new(StoreConfig::default());
        let ids = chain_of(&mut pager, &[3, 4]);
        let mut cursor = Cursor::new(ids[1]);
        cursor.dot = 3;
        pager.set_flag(ids[1], FragFlags::PIN);

        cursor.off = -100;
        pager.normalize(&mut cursor, false);
        assert_eq!((cursor.cur, cursor.dot, cursor.off), (ids[0], 0, 0));

        cursor.off = 100;
        pager.normalize(&mut cursor, false);
        assert_eq!((cursor.cur, cursor.dot, cursor.off), (ids[1], 3, 4));
    }

    #[test]
    fn test_prepare_delete_splits_to_boundary() {
        let mut pager = Pager::new(StoreConfig::default());
        let ids = chain_of(&mut pager, &[10]);
        let mut cursor = Cursor::new(ids[0]);
        pager.set_flag(ids[0], FragFlags::PIN);
        cursor.off = 4;

        let Prepared::Boundary(second) = pager.prepare(&mut cursor, Mode::DeleteForward).unwrap() else {
            panic!("expected a boundary");
        };
        assert_ne!(second, ids[0]);
        assert_eq!(pager.frag_len(ids[0]), 4);
        assert_eq!(pager.frag_len(second), 6);
        assert_eq!((cursor.cur, cursor.dot, cursor.off), (second, 4, 0));
    }

    #[test]
    fn test_prepare_write_gets_room() {
        let mut pager = Pager::new(StoreConfig::default());
        let ids = chain_of(&mut pager, &[8]);
        let mut cursor = Cursor::new(ids[0]);
        pager.set_flag(ids[0], FragFlags::PIN);
        cursor.off = 3;

        assert_eq!(pager.prepare(&mut cursor, Mode::WriteForward).unwrap(), Prepared::Ready);
        let window = cursor.window.unwrap();
        assert_eq!(window.pos, 0);
        assert!(window.wleft > 0);
        assert_eq!(cursor.dot, 3);
        assert_eq!(pager.chain_len(ids[0]), 8);
    }
}
