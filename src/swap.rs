//! Swap: backing files and the anonymous swap file.
//!
//! Every file that holds text extents has a [`BackingFile`] record owning
//! the head of its physical list. Source files are opened by the caller
//! and never written. The swap file is created on first use and serves as
//! a first-fit free-space pool: a gap between the extents on its physical
//! list is free space.

use crate::arena::RegionId;
use crate::config::WORD;
use crate::error::{Result, StoreError};
use crate::pager::Pager;
use crate::rope::{Extent, FragFlags, FragId, Fragment};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

/// Handle on a backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub(crate) u32);

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a backing file is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FileKind {
    /// Opened by the caller; read-only to the store.
    Source,
    /// The store's own overflow file.
    Swap,
}

/// One open backing file.
#[derive(Debug)]
pub(crate) struct BackingFile {
    pub(crate) file: File,
    pub(crate) kind: FileKind,
    /// Length when opened (source files only).
    pub(crate) len: u64,
    /// First fragment on the physical list.
    pub(crate) head: Option<FragId>,
}

/// Round a disk address up to a word boundary.
#[inline]
const fn align_up(addr: u64) -> u64 {
    let word = WORD as u64;
    (addr + word - 1) & !(word - 1)
}

fn read_at(mut file: &File, addr: u64, buf: &mut [u8]) -> io::Result<()> {
    file.seek(SeekFrom::Start(addr))?;
    file.read_exact(buf)
}

fn write_at(mut file: &File, addr: u64, bytes: &[u8]) -> io::Result<()> {
    file.seek(SeekFrom::Start(addr))?;
    file.write_all(bytes)
}

impl Pager {
    // === File table ===

    pub(crate) fn file(&self, id: FileId) -> Option<&BackingFile> {
        self.files.get(id.0 as usize).and_then(Option::as_ref)
    }

    pub(crate) fn file_mut(&mut self, id: FileId) -> Option<&mut BackingFile> {
        self.files.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    fn register(&mut self, backing: BackingFile) -> FileId {
        if let Some(slot) = self.files.iter().position(Option::is_none) {
            self.files[slot] = Some(backing);
            FileId(slot as u32)
        } else {
            self.files.push(Some(backing));
            FileId((self.files.len() - 1) as u32)
        }
    }

    fn io_error(file: FileId) -> impl FnOnce(io::Error) -> StoreError {
        move |source| StoreError::Io { file, source }
    }

    /// Treat a whole file as one lazily paged fragment.
    pub(crate) fn open_source(&mut self, file: File) -> Result<(FileId, FragId)> {
        let metadata = file.metadata();
        let id = self.register(BackingFile {
            file,
            kind: FileKind::Source,
            len: 0,
            head: None,
        });
        let len = match metadata {
            Ok(metadata) => metadata.len(),
            Err(source) => {
                self.files[id.0 as usize] = None;
                return Err(StoreError::Io { file: id, source });
            }
        };
        if let Some(backing) = self.file_mut(id) {
            backing.len = len;
        }

        let frag = if len > 0 {
            Fragment::on_disk(Extent { file: id, addr: 0, len })
        } else {
            Fragment::empty()
        };
        let head = match self.new_fragment(frag) {
            Ok(head) => head,
            Err(e) => {
                self.files[id.0 as usize] = None;
                return Err(e);
            }
        };
        if len > 0 {
            self.phys_link_after(id, None, head);
        }
        tracing::info!(file = %id, len, "source file opened");
        Ok((id, head))
    }

    /// Close a file no fragment refers to any more.
    ///
    /// Returns `None` while the file is still in use, and always for the
    /// swap file.
    pub(crate) fn close_file(&mut self, id: FileId) -> Result<Option<File>> {
        let backing = self.file(id).ok_or(StoreError::UnknownFile(id))?;
        if backing.kind == FileKind::Swap || backing.head.is_some() {
            return Ok(None);
        }
        let closed = self.files[id.0 as usize].take().map(|b| b.file);
        tracing::info!(file = %id, "source file closed");
        Ok(closed)
    }

    /// Close every source file no fragment refers to. Returns how many
    /// were closed.
    pub(crate) fn sweep_files(&mut self) -> usize {
        let mut closed = 0;
        for slot in &mut self.files {
            let unused = slot
                .as_ref()
                .is_some_and(|b| b.kind == FileKind::Source && b.head.is_none());
            if unused {
                *slot = None;
                closed += 1;
            }
        }
        if closed > 0 {
            tracing::info!(closed, "unused source files swept");
        }
        closed
    }

    /// Whether any fragment of the chain holding `id` lives in `file`.
    pub(crate) fn chain_uses_file(&self, id: FragId, file: FileId) -> bool {
        let mut cursor = Some(self.chain_head(id));
        while let Some(id) = cursor {
            let frag = self.frag(id);
            if frag.disk.is_some_and(|d| d.file == file) {
                return true;
            }
            cursor = frag.next;
        }
        false
    }

    // === Swap space ===

    /// The swap file, created on first use.
    pub(crate) fn swap_file(&mut self) -> Result<FileId> {
        if let Some(id) = self.swap {
            return Ok(id);
        }
        let created = match &self.config.swap_dir {
            Some(dir) => tempfile::tempfile_in(dir),
            None => tempfile::tempfile(),
        };
        let file = created.map_err(|source| StoreError::Io {
            file: FileId(self.files.len() as u32),
            source,
        })?;
        let id = self.register(BackingFile {
            file,
            kind: FileKind::Swap,
            len: 0,
            head: None,
        });
        self.swap = Some(id);
        tracing::info!(file = %id, "swap file created");
        Ok(id)
    }

    /// Find the first gap of `len` bytes on `file`'s physical list.
    ///
    /// Returns a word-aligned address and the fragment the new extent
    /// should follow on the list.
    pub(crate) fn reserve(&self, file: FileId, len: u64) -> Result<(u64, Option<FragId>)> {
        let head = self.file(file).ok_or(StoreError::UnknownFile(file))?.head;
        let mut addr = 0u64;
        let mut after = None;
        let mut walk = head;
        while let Some(id) = walk {
            let Some(extent) = self.frag(id).disk else {
                return Err(StoreError::consistency(format!("{id:?} on a physical list without an extent")));
            };
            if addr < extent.addr && len <= extent.addr - addr {
                break;
            }
            if addr < extent.end() {
                addr = align_up(extent.end());
            }
            after = Some(id);
            walk = self.frag(id).phys_next;
        }

        let wanted = Extent { file, addr, len };
        let mut walk = head;
        while let Some(id) = walk {
            let frag = self.frag(id);
            if let Some(extent) = frag.disk {
                if len > 0 && wanted.overlaps(&extent) {
                    return Err(StoreError::consistency(format!(
                        "reservation {addr}+{len} on file {file} overlaps {id:?}"
                    )));
                }
            }
            walk = frag.phys_next;
        }
        Ok((addr, after))
    }

    // === Reads ===

    /// Read an extent into `buf` (which must be exactly as long).
    pub(crate) fn read_extent(&mut self, extent: Extent, buf: &mut [u8]) -> Result<()> {
        let backing = self.file(extent.file).ok_or(StoreError::UnknownFile(extent.file))?;
        match read_at(&backing.file, extent.addr, buf) {
            Ok(()) => Ok(()),
            Err(source) => Err(self.read_failed(extent.file, source)),
        }
    }

    /// Read a fragment's disk extent into a region; sets the region's
    /// used count.
    pub(crate) fn read_into(&mut self, region: RegionId, extent: Extent) -> Result<()> {
        let len = extent.len as usize;
        let result = {
            let Self { arena, files, .. } = self;
            let backing = files
                .get(extent.file.0 as usize)
                .and_then(Option::as_ref)
                .ok_or(StoreError::UnknownFile(extent.file))?;
            read_at(&backing.file, extent.addr, &mut arena.span_mut(region)[..len])
        };
        match result {
            Ok(()) => {
                self.arena.set_used(region, len);
                Ok(())
            }
            Err(source) => Err(self.read_failed(extent.file, source)),
        }
    }

    /// Classify a failed read. A source file whose length changed since
    /// it was opened gets its resident copies marked dirty.
    fn read_failed(&mut self, file: FileId, source: io::Error) -> StoreError {
        let changed = self.file(file).and_then(|backing| {
            if backing.kind != FileKind::Source {
                return None;
            }
            let actual = backing.file.metadata().ok()?.len();
            (actual != backing.len).then_some((backing.len, actual))
        });
        match changed {
            Some((expected, actual)) => {
                let saved = self.unpurify(file);
                tracing::warn!(file = %file, expected, actual, saved, "source file changed underfoot");
                StoreError::SourceChanged { file, expected, actual }
            }
            None => StoreError::Io { file, source },
        }
    }

    /// Mark every resident copy of `file`'s text dirty. Returns how many
    /// fragments were affected.
    pub(crate) fn unpurify(&mut self, file: FileId) -> usize {
        let mut count = 0;
        for index in self.frags.live_indices() {
            let id = FragId(index);
            let frag = self.frag(id);
            if frag.mem.is_some() && frag.disk.is_some_and(|d| d.file == file) {
                self.mark_dirty(id);
                count += 1;
            }
        }
        count
    }

    // === Writes ===

    /// Copy an extent to `dst` at `addr` through a bounded buffer.
    fn copy_extent(&mut self, src: Extent, dst: FileId, addr: u64) -> Result<()> {
        let mut buf = vec![0; self.config.window_size.max(WORD)];
        let mut done = 0u64;
        while done < src.len {
            let n = (src.len - done).min(buf.len() as u64) as usize;
            let piece = Extent { addr: src.addr + done, len: n as u64, ..src };
            self.read_extent(piece, &mut buf[..n])?;
            let backing = self.file(dst).ok_or(StoreError::UnknownFile(dst))?;
            write_at(&backing.file, addr + done, &buf[..n]).map_err(Self::io_error(dst))?;
            done += n as u64;
        }
        Ok(())
    }

    /// Write the bytes of `mem` to swap as the disk copy of `id`, which
    /// becomes pure.
    pub(crate) fn flush_bytes_of(&mut self, id: FragId, mem: RegionId) -> Result<()> {
        let len = self.arena.used(mem) as u64;
        if len == 0 {
            self.clear_flag(id, FragFlags::DIRTY);
            return Ok(());
        }
        let swap = self.swap_file()?;
        let (addr, after) = self.reserve(swap, len)?;
        {
            let Self { arena, files, .. } = self;
            let backing = files
                .get(swap.0 as usize)
                .and_then(Option::as_ref)
                .ok_or(StoreError::UnknownFile(swap))?;
            write_at(&backing.file, addr, arena.bytes(mem)).map_err(Self::io_error(swap))?;
        }
        self.phys_unlink(id);
        {
            let frag = self.frag_mut(id);
            frag.disk = Some(Extent { file: swap, addr, len });
            frag.flags -= FragFlags::DIRTY | FragFlags::SHARED;
        }
        self.phys_link_after(swap, after, id);
        Ok(())
    }

    /// Write one dirty resident fragment to swap, then fold in a logical
    /// successor that is pure and continues it on disk.
    pub(crate) fn flush_single(&mut self, id: FragId) -> Result<()> {
        let frag = *self.frag(id);
        let Some(mem) = frag.mem else {
            return Ok(());
        };
        if !frag.is_dirty() {
            return Ok(());
        }
        self.flush_bytes_of(id, mem)?;

        let (Some(next), Some(extent)) = (self.frag(id).next, self.frag(id).disk) else {
            return Ok(());
        };
        let successor = *self.frag(next);
        let Some(next_extent) = successor.disk else {
            return Ok(());
        };
        if self.frag(id).is_locked()
            || successor.is_locked()
            || !successor.is_pure()
            || next_extent.file != extent.file
            || next_extent.addr != extent.end()
        {
            return Ok(());
        }
        self.check_pure(next)?;
        self.drop_mem(id);
        self.delete(next);
        self.set_flag(id, successor.flags & FragFlags::SHARED);
        if let Some(disk) = self.frag_mut(id).disk.as_mut() {
            disk.len += next_extent.len;
        }
        Ok(())
    }

    /// Write a maximal unlocked run starting at `first` to swap in one
    /// pass and collapse it into `first`.
    pub(crate) fn flush_run(&mut self, first: FragId) -> Result<()> {
        let mut run = Vec::new();
        let mut total = 0u64;
        let mut walk = Some(first);
        while let Some(id) = walk {
            if self.frag(id).is_locked() {
                break;
            }
            total += self.frag_len(id);
            run.push(id);
            walk = self.frag(id).next;
        }
        if run.is_empty() {
            return Ok(());
        }

        let swap = self.swap_file()?;
        let (addr, _) = self.reserve(swap, total)?;
        let mut out = addr;
        for &id in &run {
            let frag = *self.frag(id);
            if let Some(mem) = frag.mem {
                let Self { arena, files, .. } = self;
                let backing = files
                    .get(swap.0 as usize)
                    .and_then(Option::as_ref)
                    .ok_or(StoreError::UnknownFile(swap))?;
                write_at(&backing.file, out, arena.bytes(mem)).map_err(Self::io_error(swap))?;
            } else if let Some(extent) = frag.disk {
                self.copy_extent(extent, swap, out)?;
            }
            out += self.frag_len(id);
        }

        // Everything is on disk; relink.
        for &id in &run[1..] {
            self.delete(id);
        }
        self.drop_mem(first);
        self.phys_unlink(first);
        self.clear_flag(first, FragFlags::DIRTY | FragFlags::SHARED);
        if total > 0 {
            self.frag_mut(first).disk = Some(Extent { file: swap, addr, len: total });
            self.phys_link_sorted(None, first);
        }
        tracing::trace!(fragments = run.len(), bytes = total, addr, "run written to swap");
        Ok(())
    }

    /// Write the text of the chain starting at `head` to `sink`.
    pub(crate) fn write_chain(&mut self, head: FragId, sink: &mut impl Write) -> Result<u64> {
        let mut written = 0u64;
        let mut buf = Vec::new();
        let mut cursor = Some(head);
        while let Some(id) = cursor {
            let frag = *self.frag(id);
            if let Some(mem) = frag.mem {
                sink.write_all(self.arena.bytes(mem)).map_err(StoreError::Sink)?;
                written += self.arena.used(mem) as u64;
            } else if let Some(extent) = frag.disk {
                let chunk = self.config.window_size.max(WORD) as u64;
                let mut done = 0u64;
                while done < extent.len {
                    let n = (extent.len - done).min(chunk) as usize;
                    buf.resize(n, 0);
                    let piece = Extent { addr: extent.addr + done, len: n as u64, ..extent };
                    self.read_extent(piece, &mut buf)?;
                    sink.write_all(&buf).map_err(StoreError::Sink)?;
                    done += n as u64;
                }
                written += extent.len;
            }
            cursor = frag.next;
        }
        Ok(written)
    }
}
