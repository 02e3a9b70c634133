//! # Pagerope
//!
//! A paged rope text store for editors.
//!
//! Text lives in chains of fragments. A fragment's bytes may sit in a
//! private arena, in a backing file, or in both; the store pages bounded
//! windows in as a cursor moves and pushes text out to an anonymous swap
//! file when the arena runs short.
//!
//! ## Core Concepts
//!
//! - **Arena**: one address range carved into regions, grown on demand up
//!   to a fixed limit
//! - **Fragments**: linked both in text order and, per backing file, in
//!   disk-address order
//! - **Cursors**: idle (a plain offset) or ready (a window on one region);
//!   byte operations run on the window until it is used up
//! - **Compaction**: allocation failures trigger reclamation passes of
//!   increasing effort, never touching fragments a cursor is on
//!
//! ## Example
//!
//! ```rust
//! use pagerope::{Store, Whence};
//!
//! let mut store = Store::new();
//! let text = store.open(None)?;
//! store.put_bytes(text, b"hello world")?;
//!
//! // Cut "hello " and put it back at the end.
//! store.seek(text, 0, Whence::Start)?;
//! let hello = store.excise(text, 6)?.expect("six bytes to cut");
//! store.seek(text, 0, Whence::End)?;
//! store.put_char(text, b' ')?;
//! store.insert(text, hello)?;
//!
//! let mut out = Vec::new();
//! store.flush_to(text, &mut out)?;
//! assert_eq!(out, b"world hello ");
//! # Ok::<(), pagerope::StoreError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod error;

mod arena;
mod compact;
mod cursor;
mod pager;
mod rope;
mod store;
mod swap;
mod verify;

// Re-exports for convenience
pub use arena::ArenaStats;
pub use config::StoreConfig;
pub use cursor::Whence;
pub use error::{Result, StoreError};
pub use rope::Rope;
pub use store::{Store, StoreStats, TextId};
pub use swap::FileId;
