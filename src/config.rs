//! Store configuration.

use std::path::PathBuf;

/// Machine word size; free regions and swap reservations align to it.
pub const WORD: usize = std::mem::size_of::<usize>();

/// Configuration for a [`Store`](crate::Store).
///
/// The defaults mirror the sizes the store was tuned with: 512-byte read
/// windows, 16 bytes of write slop, pure copies above 64 bytes dropped
/// first under pressure.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Total address space the arena may ever commit, in bytes.
    pub arena_limit: usize,
    /// Bytes committed when the arena is created.
    pub arena_initial: usize,
    /// Minimum number of bytes committed each time the arena grows.
    pub arena_grow_chunk: usize,
    /// Largest window read in from disk around the cursor.
    pub window_size: usize,
    /// Extra room requested beyond the minimum for reads and writes.
    pub slop: usize,
    /// Pure memory copies larger than this are dropped at level 0.
    pub purge_min: usize,
    /// Adjacent memory copies are merged only while their total stays below this.
    pub merge_limit: usize,
    /// Region nodes per bookkeeping batch.
    pub region_batch: usize,
    /// Fragment nodes per bookkeeping batch.
    pub fragment_batch: usize,
    /// Compaction level past which each escalation is logged as a warning.
    pub compaction_warn_level: u32,
    /// Compaction level at which an allocation gives up.
    pub compaction_max_level: u32,
    /// Directory for the anonymous swap file (system temp dir if `None`).
    pub swap_dir: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            arena_limit: 64 * 1024 * 1024,
            arena_initial: 16 * 1024,
            arena_grow_chunk: 16 * 1024,
            window_size: 512,
            slop: 16,
            purge_min: 64,
            merge_limit: 512,
            region_batch: 32,
            fragment_batch: 32,
            compaction_warn_level: 10,
            compaction_max_level: 100,
            swap_dir: None,
        }
    }
}

impl StoreConfig {
    /// Cap the arena's address space.
    pub fn with_arena_limit(mut self, bytes: usize) -> Self {
        self.arena_limit = bytes;
        self.arena_initial = self.arena_initial.min(bytes);
        self
    }

    /// Set the initial commit size.
    pub fn with_arena_initial(mut self, bytes: usize) -> Self {
        self.arena_initial = bytes;
        self
    }

    /// Set the growth chunk.
    pub fn with_grow_chunk(mut self, bytes: usize) -> Self {
        self.arena_grow_chunk = bytes.max(WORD);
        self
    }

    /// Set the read window size.
    pub fn with_window_size(mut self, bytes: usize) -> Self {
        self.window_size = bytes.max(2 * WORD);
        self
    }

    /// Set the write slop.
    pub fn with_slop(mut self, bytes: usize) -> Self {
        self.slop = bytes.max(1);
        self
    }

    /// Set the node batch sizes.
    pub fn with_batches(mut self, regions: usize, fragments: usize) -> Self {
        self.region_batch = regions.max(4);
        self.fragment_batch = fragments.max(2);
        self
    }

    /// Set the compaction ceiling.
    pub fn with_compaction_max_level(mut self, level: u32) -> Self {
        self.compaction_max_level = level;
        self
    }

    /// Put the swap file in a specific directory.
    pub fn with_swap_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.swap_dir = Some(dir.into());
        self
    }
}

/// Round `n` up to a multiple of [`WORD`].
#[inline]
pub const fn round_up(n: usize) -> usize {
    (n + WORD - 1) & !(WORD - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(0), 0);
        assert_eq!(round_up(1), WORD);
        assert_eq!(round_up(WORD), WORD);
        assert_eq!(round_up(WORD + 1), 2 * WORD);
    }

    #[test]
    fn test_builder_clamps_initial_to_limit() {
        let config = StoreConfig::default().with_arena_limit(4096);
        assert_eq!(config.arena_limit, 4096);
        assert!(config.arena_initial <= 4096);
    }
}
