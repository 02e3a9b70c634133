//! Byte-level and structural operations on a cursor.

use super::{Cursor, Mode, Prepared, Whence};
use crate::error::{Result, StoreError};
use crate::pager::Pager;
use crate::rope::{FragFlags, FragId, Fragment};

impl Pager {
    // === Position ===

    /// Absolute position of the cursor in its text.
    pub(crate) fn tell(&self, cursor: &Cursor) -> u64 {
        match cursor.window {
            Some(window) => cursor.dot + window.pos as u64,
            None => (cursor.dot as i64 + cursor.off).max(0) as u64,
        }
    }

    /// Bytes between the cursor and the end of its text.
    pub(crate) fn remaining(&self, cursor: &Cursor) -> u64 {
        let ahead = self.chain_len(cursor.cur) as i64;
        let pos = cursor.window.map_or(cursor.off, |w| w.pos as i64);
        (ahead - pos).max(0) as u64
    }

    /// Move to the start of the text.
    pub(crate) fn rewind(&mut self, cursor: &mut Cursor) {
        cursor.window = None;
        let head = self.chain_head(cursor.cur);
        if head != cursor.cur {
            self.move_pin(cursor, head);
        }
        cursor.dot = 0;
        cursor.off = 0;
    }

    /// Reposition the cursor; the result is clamped to the text.
    pub(crate) fn seek(&mut self, cursor: &mut Cursor, offset: i64, whence: Whence) {
        if let Some(window) = cursor.window {
            let pos = window.pos as i64;
            let rel = match whence {
                Whence::Start => offset - self.tell(cursor) as i64,
                Whence::Current => offset,
                Whence::End => offset + self.remaining(cursor) as i64,
            };
            if -pos <= rel && rel <= window.rleft as i64 {
                if let Some(w) = cursor.window.as_mut() {
                    w.pos = (pos + rel) as usize;
                    w.rleft = (window.rleft as i64 - rel) as usize;
                    w.wleft = 0;
                    w.writing = false;
                }
                return;
            }
            cursor.window = None;
            cursor.off = pos + rel;
        } else {
            match whence {
                Whence::Start => {
                    if offset == 0 {
                        self.rewind(cursor);
                        return;
                    }
                    cursor.off = offset - cursor.dot as i64;
                }
                Whence::Current => cursor.off += offset,
                Whence::End => cursor.off += self.remaining(cursor) as i64 + offset,
            }
        }
        self.normalize(cursor, false);
    }

    // === Bytes ===

    /// Read the byte after the cursor and step over it.
    pub(crate) fn get_char(&mut self, cursor: &mut Cursor) -> Result<Option<u8>> {
        if self.prepare(cursor, Mode::ReadForward)? != Prepared::Ready {
            return Ok(None);
        }
        let (Some(window), Some(mem)) = (cursor.window.as_mut(), self.frag(cursor.cur).mem) else {
            return Err(StoreError::consistency("ready cursor without a window"));
        };
        let byte = self.arena.byte(mem, window.pos);
        window.pos += 1;
        window.rleft -= 1;
        window.wleft = 0;
        window.writing = false;
        Ok(Some(byte))
    }

    /// Read the byte before the cursor and step back over it.
    pub(crate) fn back_up(&mut self, cursor: &mut Cursor) -> Result<Option<u8>> {
        if self.prepare(cursor, Mode::ReadBackward)? != Prepared::Ready {
            return Ok(None);
        }
        let (Some(window), Some(mem)) = (cursor.window.as_mut(), self.frag(cursor.cur).mem) else {
            return Err(StoreError::consistency("ready cursor without a window"));
        };
        window.pos -= 1;
        window.rleft += 1;
        Ok(Some(self.arena.byte(mem, window.pos)))
    }

    /// Read the byte after the cursor without moving.
    pub(crate) fn peek_char(&mut self, cursor: &mut Cursor) -> Result<Option<u8>> {
        let byte = self.get_char(cursor)?;
        if byte.is_some() {
            if let Some(window) = cursor.window.as_mut() {
                window.pos -= 1;
                window.rleft += 1;
            }
        }
        Ok(byte)
    }

    /// Write one byte at the cursor: insert, or replace the next byte in
    /// overwrite mode (appending at the end of the text).
    pub(crate) fn put_char(&mut self, cursor: &mut Cursor, byte: u8) -> Result<()> {
        if let Some(window) = cursor.window {
            if window.writing && window.wleft > 0 {
                return self.append_in_window(cursor, byte);
            }
        }

        if cursor.overwrite {
            if self.prepare(cursor, Mode::ReadForward)? == Prepared::Ready {
                let (Some(window), Some(mem)) = (cursor.window.as_mut(), self.frag(cursor.cur).mem) else {
                    return Err(StoreError::consistency("ready cursor without a window"));
                };
                let pos = window.pos;
                window.pos += 1;
                window.rleft -= 1;
                self.arena.set_byte(mem, pos, byte);
                self.mark_dirty(cursor.cur);
                return Ok(());
            }
        }

        self.prepare(cursor, Mode::WriteForward)?;
        self.mark_dirty(cursor.cur);
        if let Some(window) = cursor.window.as_mut() {
            window.writing = true;
        }
        self.append_in_window(cursor, byte)
    }

    fn append_in_window(&mut self, cursor: &mut Cursor, byte: u8) -> Result<()> {
        let (Some(window), Some(mem)) = (cursor.window.as_mut(), self.frag(cursor.cur).mem) else {
            return Err(StoreError::consistency("write window lost its region"));
        };
        if window.wleft == 0 {
            return Err(StoreError::consistency("write window has no room"));
        }
        self.arena.set_byte(mem, window.pos, byte);
        window.pos += 1;
        window.wleft -= 1;
        self.arena.set_used(mem, window.pos);
        Ok(())
    }

    /// Delete the byte before the cursor.
    pub(crate) fn delete_back(&mut self, cursor: &mut Cursor) -> Result<bool> {
        if let Some(window) = cursor.window {
            // Inside a region whose text ends at the cursor: just shorten it.
            if window.pos > 0 && window.rleft == 0 {
                if let Some(mem) = self.frag(cursor.cur).mem {
                    if let Some(w) = cursor.window.as_mut() {
                        w.pos -= 1;
                        w.wleft += 1;
                    }
                    self.arena.set_used(mem, window.pos - 1);
                    self.mark_dirty(cursor.cur);
                    return Ok(true);
                }
            }
        }
        match self.excise(cursor, -1)? {
            Some(first) => {
                self.discard_chain(first);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Switch between insert and overwrite mode.
    pub(crate) fn set_overwrite(&mut self, cursor: &mut Cursor, on: bool) {
        cursor.overwrite = on;
        if let Some(window) = cursor.window.as_mut() {
            window.writing = false;
            window.wleft = 0;
        }
    }

    // === Structure ===

    /// Clamp a signed span to the text around the cursor.
    fn clamp_span(&self, cursor: &Cursor, num: i64) -> i64 {
        if num >= 0 {
            num.min(self.remaining(cursor) as i64)
        } else {
            -((-num).min(self.tell(cursor) as i64))
        }
    }

    /// Split out the `num` bytes after (or, if negative, before) the cursor
    /// and return the ends of that run, both held. The cursor is left on
    /// the far end of the run.
    fn span_bounds(&mut self, cursor: &mut Cursor, num: i64) -> Result<(FragId, FragId, u64)> {
        let backward = num < 0;
        let (near_mode, far_mode) = if backward {
            (Mode::DeleteBackward, Mode::DeleteForward)
        } else {
            (Mode::DeleteForward, Mode::DeleteBackward)
        };
        let Prepared::Boundary(near) = self.prepare(cursor, near_mode)? else {
            return Err(StoreError::consistency("delete preparation found no boundary"));
        };
        self.hold(near);
        let start = cursor.dot;
        cursor.off += num;
        let far = match self.prepare(cursor, far_mode) {
            Ok(Prepared::Boundary(far)) => far,
            Ok(_) => {
                self.unhold(near, false);
                return Err(StoreError::consistency("delete preparation found no boundary"));
            }
            Err(e) => {
                self.unhold(near, false);
                return Err(e);
            }
        };
        self.hold(far);

        if !backward {
            return Ok((near, far, start));
        }
        if self.frag(near).next == Some(far) {
            // The whole run came out of `near` itself, split off its tail.
            self.unhold(near, false);
            Ok((far, far, start))
        } else {
            Ok((far, near, start))
        }
    }

    fn release_span(&mut self, first: FragId, last: FragId) {
        self.unhold(first, false);
        self.unhold(last, false);
    }

    /// Cut the `num` bytes after (or before) the cursor out of the text.
    ///
    /// Returns the head of the detached run, or `None` when there was
    /// nothing to cut. The cursor ends up where the run used to start.
    pub(crate) fn excise(&mut self, cursor: &mut Cursor, num: i64) -> Result<Option<FragId>> {
        let num = self.clamp_span(cursor, num);
        if num == 0 {
            return Ok(None);
        }
        let (first, last, start) = self.span_bounds(cursor, num)?;
        let before = self.frag(first).prev;
        let after = self.frag(last).next;

        // A text is never left without a fragment.
        let fresh = if before.is_none() && after.is_none() {
            match self.new_fragment(Fragment::empty()) {
                Ok(id) => Some(id),
                Err(e) => {
                    self.release_span(first, last);
                    return Err(e);
                }
            }
        } else {
            None
        };

        if num > 0 {
            cursor.dot = start;
        }
        cursor.window = None;
        self.clear_flag(cursor.cur, FragFlags::PIN);
        let (cur, off) = match (after, before, fresh) {
            (Some(after), _, _) => (after, 0),
            (None, Some(before), _) => {
                let len = self.frag_len(before);
                cursor.dot -= len;
                (before, len as i64)
            }
            (None, None, Some(fresh)) => {
                cursor.dot = 0;
                (fresh, 0)
            }
            (None, None, None) => return Err(StoreError::consistency("excised run has no neighbours")),
        };

        if let Some(before) = before {
            self.frag_mut(before).next = after;
        }
        if let Some(after) = after {
            self.frag_mut(after).prev = before;
        }
        self.frag_mut(first).prev = None;
        self.frag_mut(last).next = None;

        cursor.cur = cur;
        cursor.off = off;
        self.set_flag(cur, FragFlags::PIN);
        self.release_span(first, last);
        Ok(Some(first))
    }

    /// Copy the `num` bytes after (or before) the cursor into a new chain.
    /// The cursor does not move.
    pub(crate) fn copy_span(&mut self, cursor: &mut Cursor, num: i64) -> Result<Option<FragId>> {
        let num = self.clamp_span(cursor, num);
        if num == 0 {
            return Ok(None);
        }
        let (first, last, _) = self.span_bounds(cursor, num)?;
        let copied = self.copy_chain(first, Some(last));
        self.release_span(first, last);
        self.seek(cursor, -num, Whence::Current);
        copied.map(Some)
    }

    /// Splice the chain headed by `head` in at the cursor, which ends up
    /// after the inserted text.
    pub(crate) fn insert_chain(&mut self, cursor: &mut Cursor, head: FragId) -> Result<()> {
        if self.frag(head).prev.is_some() {
            return Err(StoreError::NotChainHead);
        }
        let Prepared::Boundary(at) = self.prepare(cursor, Mode::DeleteBackward)? else {
            return Err(StoreError::consistency("insert preparation found no boundary"));
        };
        let len = self.chain_len(head);
        let tail = self.chain_tail(head);
        let after = self.frag(at).next;
        self.join(at, head);
        match after {
            Some(after) => self.join(tail, after),
            None => self.frag_mut(tail).next = None,
        }
        cursor.off += len as i64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;

    fn setup(text: &[u8]) -> (Pager, Cursor) {
        let mut pager = Pager::new(StoreConfig::default().with_window_size(8).with_slop(4));
        let head = pager.new_fragment(Fragment::empty()).unwrap();
        pager.set_flag(head, FragFlags::PIN);
        let mut cursor = Cursor::new(head);
        for &byte in text {
            pager.put_char(&mut cursor, byte).unwrap();
        }
        pager.rewind(&mut cursor);
        (pager, cursor)
    }

    fn contents(pager: &mut Pager, cursor: &Cursor) -> Vec<u8> {
        let head = pager.chain_head(cursor.cur);
        let mut out = Vec::new();
        pager.write_chain(head, &mut out).unwrap();
        out
    }

    fn read_all(pager: &mut Pager, cursor: &mut Cursor) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(byte) = pager.get_char(cursor).unwrap() {
            out.push(byte);
        }
        out
    }

    #[test]
    fn test_put_and_get_across_windows() {
        let (mut pager, mut cursor) = setup(b"the quick brown fox jumps");
        assert_eq!(pager.remaining(&cursor), 25);
        assert_eq!(read_all(&mut pager, &mut cursor), b"the quick brown fox jumps");
        assert_eq!(pager.tell(&cursor), 25);
        assert_eq!(pager.get_char(&mut cursor).unwrap(), None);
        pager.verify().unwrap();
    }

    #[test]
    fn test_insert_in_the_middle() {
        let (mut pager, mut cursor) = setup(b"helloworld");
        pager.seek(&mut cursor, 5, Whence::Start);
        for &byte in b", " {
            pager.put_char(&mut cursor, byte).unwrap();
        }
        assert_eq!(pager.tell(&cursor), 7);
        assert_eq!(contents(&mut pager, &cursor), b"hello, world");
        assert_eq!(pager.get_char(&mut cursor).unwrap(), Some(b'w'));
        pager.verify().unwrap();
    }

    #[test]
    fn test_back_up_and_peek() {
        let (mut pager, mut cursor) = setup(b"abc");
        pager.seek(&mut cursor, 0, Whence::End);
        assert_eq!(pager.back_up(&mut cursor).unwrap(), Some(b'c'));
        assert_eq!(pager.peek_char(&mut cursor).unwrap(), Some(b'c'));
        assert_eq!(pager.tell(&cursor), 2);
        pager.rewind(&mut cursor);
        assert_eq!(pager.back_up(&mut cursor).unwrap(), None);
    }

    #[test]
    fn test_seek_clamps() {
        let (mut pager, mut cursor) = setup(b"0123456789");
        pager.seek(&mut cursor, 100, Whence::Start);
        assert_eq!(pager.tell(&cursor), 10);
        pager.seek(&mut cursor, -3, Whence::Current);
        assert_eq!(pager.tell(&cursor), 7);
        assert_eq!(pager.get_char(&mut cursor).unwrap(), Some(b'7'));
        pager.seek(&mut cursor, -100, Whence::End);
        assert_eq!(pager.tell(&cursor), 0);
    }

    #[test]
    fn test_overwrite_replaces_then_appends() {
        let (mut pager, mut cursor) = setup(b"abcd");
        pager.set_overwrite(&mut cursor, true);
        pager.seek(&mut cursor, 2, Whence::Start);
        for &byte in b"XYZ" {
            pager.put_char(&mut cursor, byte).unwrap();
        }
        assert_eq!(contents(&mut pager, &cursor), b"abXYZ");
        pager.verify().unwrap();
    }

    #[test]
    fn test_delete_back() {
        let (mut pager, mut cursor) = setup(b"abcdef");
        pager.seek(&mut cursor, 3, Whence::Start);
        assert!(pager.delete_back(&mut cursor).unwrap());
        assert_eq!(pager.tell(&cursor), 2);
        assert_eq!(contents(&mut pager, &cursor), b"abdef");
        pager.rewind(&mut cursor);
        assert!(!pager.delete_back(&mut cursor).unwrap());
        pager.verify().unwrap();
    }

    #[test]
    fn test_excise_forward_and_backward() {
        let (mut pager, mut cursor) = setup(b"0123456789");
        pager.seek(&mut cursor, 2, Whence::Start);
        let cut = pager.excise(&mut cursor, 3).unwrap().unwrap();
        let mut out = Vec::new();
        pager.write_chain(cut, &mut out).unwrap();
        assert_eq!(out, b"234");
        assert_eq!(pager.tell(&cursor), 2);
        assert_eq!(contents(&mut pager, &cursor), b"0156789");

        pager.seek(&mut cursor, 6, Whence::Start);
        let cut = pager.excise(&mut cursor, -2).unwrap().unwrap();
        let mut out = Vec::new();
        pager.write_chain(cut, &mut out).unwrap();
        assert_eq!(out, b"78");
        assert_eq!(pager.tell(&cursor), 4);
        assert_eq!(contents(&mut pager, &cursor), b"01569");
        pager.discard_chain(cut);
        pager.verify().unwrap();
    }

    #[test]
    fn test_excise_everything_leaves_a_fragment() {
        let (mut pager, mut cursor) = setup(b"gone");
        let cut = pager.excise(&mut cursor, 100).unwrap().unwrap();
        assert_eq!(pager.chain_len(cut), 4);
        assert_eq!(pager.remaining(&cursor), 0);
        assert!(pager.frag(cursor.cur).flags.contains(FragFlags::PIN));
        assert_eq!(pager.excise(&mut cursor, 5).unwrap(), None);
        pager.put_char(&mut cursor, b'x').unwrap();
        assert_eq!(contents(&mut pager, &cursor), b"x");
    }

    #[test]
    fn test_copy_leaves_cursor_and_text() {
        let (mut pager, mut cursor) = setup(b"abcdefgh");
        pager.seek(&mut cursor, 3, Whence::Start);
        let copy = pager.copy_span(&mut cursor, -3).unwrap().unwrap();
        assert_eq!(pager.tell(&cursor), 3);
        let mut out = Vec::new();
        pager.write_chain(copy, &mut out).unwrap();
        assert_eq!(out, b"abc");
        assert_eq!(contents(&mut pager, &cursor), b"abcdefgh");

        pager.seek(&mut cursor, 0, Whence::End);
        pager.insert_chain(&mut cursor, copy).unwrap();
        assert_eq!(pager.tell(&cursor), 11);
        assert_eq!(contents(&mut pager, &cursor), b"abcdefghabc");
        pager.verify().unwrap();
    }

    #[test]
    fn test_insert_rejects_inner_fragment() {
        let (mut pager, mut cursor) = setup(b"abcdef");
        pager.seek(&mut cursor, 3, Whence::Start);
        let Prepared::Boundary(_) = pager.prepare(&mut cursor, Mode::DeleteForward).unwrap() else {
            panic!("expected a boundary");
        };
        let inner = cursor.cur;
        let mut other = Cursor::new(pager.chain_head(inner));
        assert!(matches!(
            pager.insert_chain(&mut other, inner),
            Err(StoreError::NotChainHead)
        ));
    }
}
