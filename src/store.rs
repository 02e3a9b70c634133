//! Store: the public face of the pager.
//!
//! A [`Store`] owns every text object, rope and backing file it hands
//! out. Text objects are addressed by [`TextId`]; detached chains travel as
//! [`Rope`] values that must come back to the same store.

use crate::arena::ArenaStats;
use crate::config::StoreConfig;
use crate::cursor::{Cursor, Whence};
use crate::error::{Result, StoreError};
use crate::pager::Pager;
use crate::rope::{FragFlags, FragId, Fragment, Rope};
use crate::swap::FileId;
use std::fs::File;
use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};

/// Source of store identities, stamped on every rope a store hands out.
static NEXT_STORE: AtomicU32 = AtomicU32::new(0);

/// Handle on an open text object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextId(pub(crate) u32);

impl std::fmt::Display for TextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Usage statistics for a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Arena figures.
    pub arena: ArenaStats,
    /// Live fragments.
    pub fragments: usize,
    /// Fragments with a memory copy.
    pub resident_fragments: usize,
    /// Text bytes held in memory.
    pub resident_bytes: usize,
    /// Fragments whose memory copy is the only one.
    pub dirty_fragments: usize,
    /// Open text objects.
    pub open_texts: usize,
    /// Open backing files, swap included.
    pub open_files: usize,
    /// Bytes of text parked in the swap file.
    pub swap_bytes: u64,
    /// Compaction passes run so far.
    pub compactions: u64,
}

/// A paged text store.
///
/// # Example
///
/// ```
/// use pagerope::{Store, Whence};
///
/// let mut store = Store::new();
/// let text = store.open(None)?;
/// for &byte in b"hello world" {
///     store.put_char(text, byte)?;
/// }
/// store.seek(text, 0, Whence::Start)?;
/// assert_eq!(store.get_char(text)?, Some(b'h'));
/// assert_eq!(store.remaining(text)?, 10);
/// # Ok::<(), pagerope::StoreError>(())
/// ```
#[derive(Debug)]
pub struct Store {
    id: u32,
    pager: Pager,
    texts: Vec<Option<Cursor>>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// Create a store with the default configuration.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Create a store with a custom configuration.
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            id: NEXT_STORE.fetch_add(1, Ordering::Relaxed),
            pager: Pager::new(config),
            texts: Vec::new(),
        }
    }

    /// The configuration in use.
    pub const fn config(&self) -> &StoreConfig {
        &self.pager.config
    }

    /// The head of a rope this store handed out.
    const fn own(&self, rope: &Rope) -> Result<FragId> {
        if rope.store == self.id {
            Ok(rope.head)
        } else {
            Err(StoreError::ForeignRope)
        }
    }

    fn cursor(&self, text: TextId) -> Result<&Cursor> {
        self.texts
            .get(text.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(StoreError::UnknownText(text))
    }

    fn parts(&mut self, text: TextId) -> Result<(&mut Pager, &mut Cursor)> {
        let Self { pager, texts, .. } = self;
        let cursor = texts
            .get_mut(text.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(StoreError::UnknownText(text))?;
        Ok((pager, cursor))
    }

    // === Text objects ===

    /// Open a text object on `rope`, or on an empty text. The cursor
    /// starts at the beginning.
    pub fn open(&mut self, rope: Option<Rope>) -> Result<TextId> {
        let head = match rope {
            Some(rope) => {
                let head = self.own(&rope)?;
                if self.pager.frag(head).prev.is_some() {
                    return Err(StoreError::NotChainHead);
                }
                head
            }
            None => self.pager.new_fragment(Fragment::empty())?,
        };
        self.pager.set_flag(head, FragFlags::PIN);
        let cursor = Cursor::new(head);
        let slot = match self.texts.iter().position(Option::is_none) {
            Some(slot) => {
                self.texts[slot] = Some(cursor);
                slot
            }
            None => {
                self.texts.push(Some(cursor));
                self.texts.len() - 1
            }
        };
        let text = TextId(slot as u32);
        tracing::debug!(%text, ?head, "text opened");
        Ok(text)
    }

    /// Close a text object and hand its text back as a rope.
    pub fn close(&mut self, text: TextId) -> Result<Rope> {
        let (pager, cursor) = self.parts(text)?;
        pager.rewind(cursor);
        let head = cursor.cur;
        pager.clear_flag(head, FragFlags::PIN);
        self.texts[text.0 as usize] = None;
        tracing::debug!(%text, "text closed");
        Ok(Rope::new(self.id, head))
    }

    /// Read the byte after the cursor and step over it. `None` at the end.
    pub fn get_char(&mut self, text: TextId) -> Result<Option<u8>> {
        let (pager, cursor) = self.parts(text)?;
        pager.get_char(cursor)
    }

    /// Write a byte at the cursor, inserting or (in overwrite mode)
    /// replacing the next byte.
    pub fn put_char(&mut self, text: TextId, byte: u8) -> Result<()> {
        let (pager, cursor) = self.parts(text)?;
        pager.put_char(cursor, byte)
    }

    /// Write every byte of `bytes` at the cursor.
    pub fn put_bytes(&mut self, text: TextId, bytes: &[u8]) -> Result<()> {
        let (pager, cursor) = self.parts(text)?;
        for &byte in bytes {
            pager.put_char(cursor, byte)?;
        }
        Ok(())
    }

    /// Read the byte after the cursor without moving.
    pub fn peek_char(&mut self, text: TextId) -> Result<Option<u8>> {
        let (pager, cursor) = self.parts(text)?;
        pager.peek_char(cursor)
    }

    /// Read the byte before the cursor and step back over it. `None` at
    /// the start.
    pub fn back_up(&mut self, text: TextId) -> Result<Option<u8>> {
        let (pager, cursor) = self.parts(text)?;
        pager.back_up(cursor)
    }

    /// Move the cursor. Positions outside the text are clamped to it.
    pub fn seek(&mut self, text: TextId, offset: i64, whence: Whence) -> Result<()> {
        let (pager, cursor) = self.parts(text)?;
        pager.seek(cursor, offset, whence);
        Ok(())
    }

    /// Move the cursor to the start of the text.
    pub fn rewind(&mut self, text: TextId) -> Result<()> {
        let (pager, cursor) = self.parts(text)?;
        pager.rewind(cursor);
        Ok(())
    }

    /// The cursor's position from the start of the text.
    pub fn tell(&self, text: TextId) -> Result<u64> {
        Ok(self.pager.tell(self.cursor(text)?))
    }

    /// Bytes from the cursor to the end of the text.
    pub fn remaining(&self, text: TextId) -> Result<u64> {
        Ok(self.pager.remaining(self.cursor(text)?))
    }

    /// Total length of the text.
    pub fn len(&self, text: TextId) -> Result<u64> {
        let cursor = self.cursor(text)?;
        Ok(self.pager.chain_len(self.pager.chain_head(cursor.cur)))
    }

    /// Whether the text is empty.
    pub fn is_empty(&self, text: TextId) -> Result<bool> {
        self.len(text).map(|len| len == 0)
    }

    /// Switch between insert and overwrite mode.
    pub fn set_overwrite(&mut self, text: TextId, on: bool) -> Result<()> {
        let (pager, cursor) = self.parts(text)?;
        pager.set_overwrite(cursor, on);
        Ok(())
    }

    /// Cut `num` bytes after the cursor (before it, if negative) out of the
    /// text. The count is clamped to the text; nothing to cut gives `None`.
    pub fn excise(&mut self, text: TextId, num: i64) -> Result<Option<Rope>> {
        let id = self.id;
        let (pager, cursor) = self.parts(text)?;
        Ok(pager.excise(cursor, num)?.map(|head| Rope::new(id, head)))
    }

    /// Copy `num` bytes after the cursor (before it, if negative). The
    /// cursor does not move.
    pub fn copy(&mut self, text: TextId, num: i64) -> Result<Option<Rope>> {
        let id = self.id;
        let (pager, cursor) = self.parts(text)?;
        Ok(pager.copy_span(cursor, num)?.map(|head| Rope::new(id, head)))
    }

    /// Insert a rope at the cursor; the cursor ends up after it.
    pub fn insert(&mut self, text: TextId, rope: Rope) -> Result<()> {
        let head = self.own(&rope)?;
        let (pager, cursor) = self.parts(text)?;
        pager.insert_chain(cursor, head)
    }

    /// Delete `num` bytes after the cursor (before it, if negative).
    /// Returns the number of bytes deleted.
    pub fn delete(&mut self, text: TextId, num: i64) -> Result<u64> {
        let (pager, cursor) = self.parts(text)?;
        let Some(first) = pager.excise(cursor, num)? else {
            return Ok(0);
        };
        let len = pager.chain_len(first);
        pager.discard_chain(first);
        Ok(len)
    }

    /// Delete the byte before the cursor. Returns `false` at the start.
    pub fn delete_back(&mut self, text: TextId) -> Result<bool> {
        let (pager, cursor) = self.parts(text)?;
        pager.delete_back(cursor)
    }

    /// Write the whole text to `sink`. The cursor does not move.
    pub fn flush_to(&mut self, text: TextId, sink: &mut impl Write) -> Result<u64> {
        let (pager, cursor) = self.parts(text)?;
        let head = pager.chain_head(cursor.cur);
        pager.write_chain(head, sink)
    }

    // === Ropes ===

    /// Length of a detached rope.
    pub fn rope_len(&self, rope: &Rope) -> Result<u64> {
        Ok(self.pager.chain_len(self.own(rope)?))
    }

    /// Free a detached rope.
    pub fn discard(&mut self, rope: Rope) -> Result<()> {
        let head = self.own(&rope)?;
        self.pager.discard_chain(head);
        Ok(())
    }

    /// Join two ropes into one.
    pub fn append(&mut self, front: Rope, back: Rope) -> Result<Rope> {
        let head = self.own(&front)?;
        let back = self.own(&back)?;
        let tail = self.pager.chain_tail(head);
        self.pager.join(tail, back);
        Ok(front)
    }

    /// Copy a detached rope.
    pub fn duplicate(&mut self, rope: &Rope) -> Result<Rope> {
        let head = self.own(rope)?;
        let pager = &mut self.pager;
        let was_held = pager.hold(head);
        let copied = pager.copy_chain(head, None);
        pager.unhold(head, was_held);
        copied.map(|copy| Rope::new(self.id, copy))
    }

    /// Build a rope holding `bytes`.
    pub fn rope_from_bytes(&mut self, bytes: &[u8]) -> Result<Rope> {
        let pager = &mut self.pager;
        let head = pager.new_fragment(Fragment::empty())?;
        pager.set_flag(head, FragFlags::PIN);
        let mut cursor = Cursor::new(head);
        for &byte in bytes {
            if let Err(e) = pager.put_char(&mut cursor, byte) {
                pager.clear_flag(cursor.cur, FragFlags::PIN);
                pager.discard_chain(head);
                return Err(e);
            }
        }
        pager.rewind(&mut cursor);
        pager.clear_flag(head, FragFlags::PIN);
        Ok(Rope::new(self.id, head))
    }

    /// The bytes of a detached rope.
    pub fn rope_bytes(&mut self, rope: &Rope) -> Result<Vec<u8>> {
        let head = self.own(rope)?;
        let mut out = Vec::with_capacity(self.pager.chain_len(head) as usize);
        self.pager.write_chain(head, &mut out)?;
        Ok(out)
    }

    // === Files ===

    /// Take over an open file as a rope of its whole contents. Text is
    /// read in lazily, a window at a time.
    pub fn open_file(&mut self, file: File) -> Result<(FileId, Rope)> {
        let (id, head) = self.pager.open_source(file)?;
        Ok((id, Rope::new(self.id, head)))
    }

    /// Close a file that no text refers to any more and hand it back.
    /// Returns `None` while it is still in use.
    pub fn close_file(&mut self, file: FileId) -> Result<Option<File>> {
        self.pager.close_file(file)
    }

    /// Whether any part of the text still lives in `file`.
    pub fn file_in_use(&self, text: TextId, file: FileId) -> Result<bool> {
        let cursor = self.cursor(text)?;
        Ok(self.pager.chain_uses_file(cursor.cur, file))
    }

    /// Close every source file nothing refers to. Returns how many were
    /// closed.
    pub fn sweep_files(&mut self) -> usize {
        self.pager.sweep_files()
    }

    // === Maintenance ===

    /// Run one compaction pass at `level`.
    ///
    /// Level 0 culls empty fragments and drops large pure copies, level 1
    /// merges small resident neighbours, levels 2 and 3 also write dirty
    /// text to swap, and level 4 and up collapse every unlocked run into
    /// a single swap extent.
    pub fn compact(&mut self, level: u32) -> Result<()> {
        self.pager.compact(0, level)
    }

    /// Check every structural invariant, reporting the first violation.
    pub fn verify(&self) -> Result<()> {
        self.pager.verify()?;

        let mut pinned = 0usize;
        for index in self.pager.frags.live_indices() {
            if self.pager.frag(FragId(index)).flags.contains(FragFlags::PIN) {
                pinned += 1;
            }
        }
        let mut open = 0usize;
        for (slot, cursor) in self.texts.iter().enumerate() {
            let Some(cursor) = cursor else {
                continue;
            };
            open += 1;
            self.verify_cursor(TextId(slot as u32), cursor)?;
        }
        if pinned != open {
            return Err(StoreError::consistency(format!(
                "{pinned} pinned fragments for {open} open texts"
            )));
        }
        Ok(())
    }

    fn verify_cursor(&self, text: TextId, cursor: &Cursor) -> Result<()> {
        let pager = &self.pager;
        if !pager.is_live(cursor.cur) {
            return Err(StoreError::consistency(format!("{text} sits on dead {:?}", cursor.cur)));
        }
        if !pager.frag(cursor.cur).flags.contains(FragFlags::PIN) {
            return Err(StoreError::consistency(format!("{text} sits on unpinned {:?}", cursor.cur)));
        }
        let head = pager.chain_head(cursor.cur);
        let before = pager.chain_len(head) - pager.chain_len(cursor.cur);
        if cursor.dot != before {
            return Err(StoreError::consistency(format!(
                "{text} thinks its fragment starts at {} but it starts at {before}",
                cursor.dot
            )));
        }
        let Some(window) = cursor.window else {
            return Ok(());
        };
        let Some(mem) = pager.frag(cursor.cur).mem else {
            return Err(StoreError::consistency(format!("{text} has a window on a fragment with no memory")));
        };
        let used = pager.arena.used(mem);
        let len = pager.arena.len(mem);
        if window.pos + window.rleft != used || window.pos + window.wleft > len {
            return Err(StoreError::consistency(format!(
                "{text} window {window:?} does not fit region of {used}/{len} bytes"
            )));
        }
        Ok(())
    }

    /// Usage statistics.
    pub fn stats(&self) -> StoreStats {
        let pager = &self.pager;
        let mut stats = StoreStats {
            arena: pager.arena.stats(),
            fragments: 0,
            resident_fragments: 0,
            resident_bytes: 0,
            dirty_fragments: 0,
            open_texts: self.texts.iter().flatten().count(),
            open_files: pager.files.iter().flatten().count(),
            swap_bytes: 0,
            compactions: pager.compactions,
        };
        for index in pager.frags.live_indices() {
            let frag = pager.frag(FragId(index));
            stats.fragments += 1;
            if let Some(mem) = frag.mem {
                stats.resident_fragments += 1;
                stats.resident_bytes += pager.arena.used(mem);
            }
            if frag.is_dirty() {
                stats.dirty_fragments += 1;
            }
            if let Some(extent) = frag.disk {
                if Some(extent.file) == pager.swap {
                    stats.swap_bytes += extent.len;
                }
            }
        }
        stats
    }
}
