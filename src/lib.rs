//! tidepool - a fixed-size buffer pool for disk-backed storage engines.
//!
//! The pool pins pages into a fixed array of frames on demand, writes
//! dirty pages back on eviction, and picks victims with an LRU-K
//! policy. Page residency is resolved through an extendible hash table
//! mapping page ids to frame slots.
//!
//! ```text
//!        fetch / new / unpin / flush / delete
//!                        │
//!                        ▼
//!              ┌──────────────────┐
//!              │ BufferPoolManager│
//!              │  ┌────────────┐  │      ┌─────────────┐
//!              │  │ PageTable  │  │      │ DiskManager │
//!              │  │(ext. hash) │  │ ◀──▶ │  (file I/O) │
//!              │  ├────────────┤  │      └─────────────┘
//!              │  │ LruKReplacer│ │
//!              │  └────────────┘  │
//!              └──────────────────┘
//! ```
//!
//! # Example
//! ```no_run
//! use tidepool::{BufferPoolManager, DiskManager};
//!
//! let dm = DiskManager::create("pool.db").unwrap();
//! let pool = BufferPoolManager::new(64, dm, 2);
//!
//! let page_id = {
//!     let mut guard = pool.new_page().unwrap();
//!     guard.as_mut_slice()[0] = 0xAB;
//!     guard.page_id()
//! }; // guard drops: page marked dirty, unpinned
//!
//! let guard = pool.fetch_page_read(page_id).unwrap();
//! assert_eq!(guard.as_slice()[0], 0xAB);
//! ```

pub mod buffer;
pub mod common;
pub mod container;
pub mod storage;

pub use buffer::{
    BufferPoolManager, BufferPoolStats, Frame, PageReadGuard, PageWriteGuard, StatsSnapshot,
};
pub use common::config::PAGE_SIZE;
pub use common::{Error, FrameId, PageId, Result};
pub use container::ExtendibleHashTable;
pub use storage::{DiskManager, Page};
