//! Buffer pool manager - the page caching layer.
//!
//! The [`BufferPoolManager`] owns a fixed array of frames and moves
//! pages between them and disk on demand:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                    BufferPoolManager                      │
//! │  ┌───────────────────┐   ┌─────────────────────────────┐  │
//! │  │ page_table        │   │      frames: Vec<Frame>     │  │
//! │  │ PageId → FrameId  │──▶│  [F0] [F1] [F2] [F3] ...    │  │
//! │  │ (extendible hash) │   └─────────────────────────────┘  │
//! │  └───────────────────┘                                    │
//! │  ┌───────────────────┐   ┌──────────────┐  ┌───────────┐  │
//! │  │ replacer (LRU-K)  │   │  free_list   │  │   disk    │  │
//! │  └───────────────────┘   └──────────────┘  └───────────┘  │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! A fetch first consults the page table; on a hit the frame is pinned
//! and the access recorded with the replacer. On a miss a frame comes
//! from the free list or, failing that, from the replacer's victim
//! choice; a dirty victim is written back before the frame is reused.
//! Unpinning to a pin count of zero makes the frame evictable again.
//!
//! Every public method holds the pool latch for its entire body, disk
//! I/O included - correctness over throughput. The page table and
//! replacer carry their own latches but are only entered while the pool
//! latch is held; neither ever calls back into the pool, so the lock
//! order is acyclic.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;

use log::debug;
use parking_lot::{Mutex, MutexGuard};

use crate::buffer::replacer::LruKReplacer;
use crate::buffer::{BufferPoolStats, Frame, PageReadGuard, PageWriteGuard};
use crate::common::config::BUCKET_SIZE;
use crate::common::{Error, FrameId, PageId, Result};
use crate::container::ExtendibleHashTable;
use crate::storage::DiskManager;

/// State guarded by the pool latch. The page table, replacer, frame
/// metadata and disk manager are also only touched while this latch is
/// held, even though they live outside it.
struct PoolState {
    /// Frames holding no page, in ascending id order at startup.
    free_list: VecDeque<FrameId>,
    /// Next page id to hand out; ids are never reused.
    next_page_id: u32,
}

/// A fixed-size pool of page frames backed by a disk manager.
pub struct BufferPoolManager {
    pool_size: usize,
    frames: Vec<Frame>,
    page_table: ExtendibleHashTable<PageId, FrameId>,
    replacer: LruKReplacer,
    latch: Mutex<PoolState>,
    disk_manager: Mutex<DiskManager>,
    stats: BufferPoolStats,
}

impl BufferPoolManager {
    /// Create a pool of `pool_size` frames over `disk_manager`, using
    /// LRU-`replacer_k` eviction.
    ///
    /// # Panics
    /// Panics if `pool_size` is 0 or `replacer_k` is 0.
    pub fn new(pool_size: usize, disk_manager: DiskManager, replacer_k: usize) -> Self {
        assert!(pool_size > 0, "pool_size must be > 0");

        let frames: Vec<Frame> = (0..pool_size).map(|_| Frame::new()).collect();
        let free_list: VecDeque<FrameId> = (0..pool_size).map(FrameId::new).collect();

        debug!("buffer pool ready: {} frames, lru-{}", pool_size, replacer_k);

        Self {
            pool_size,
            frames,
            page_table: ExtendibleHashTable::new(BUCKET_SIZE),
            replacer: LruKReplacer::new(pool_size, replacer_k),
            latch: Mutex::new(PoolState {
                free_list,
                next_page_id: 0,
            }),
            disk_manager: Mutex::new(disk_manager),
            stats: BufferPoolStats::new(),
        }
    }

    // ------------------------------------------------------------------
    // Public API
    // ------------------------------------------------------------------

    /// Allocate a fresh page and pin it in a frame, returning a write
    /// guard over its zeroed bytes.
    ///
    /// # Errors
    /// - `Error::PoolExhausted` if every frame is pinned
    /// - `Error::Io` from writing back a dirty victim
    pub fn new_page(&self) -> Result<PageWriteGuard<'_>> {
        let mut state = self.latch.lock();

        let frame_id = self.acquire_frame(&mut state)?;
        let page_id = allocate_page(&mut state);

        // Frames from the free list or the eviction path arrive zeroed.
        let frame = &self.frames[frame_id.0];
        frame.set_page_id(page_id);
        frame.clear_dirty();
        frame.pin();

        self.replacer.record_access(frame_id)?;
        self.replacer.set_evictable(frame_id, false)?;
        self.page_table.insert(page_id, frame_id);

        drop(state);
        let lock = frame.page_mut();
        Ok(PageWriteGuard::new(self, frame_id, page_id, lock))
    }

    /// Fetch a page for shared reading, loading it from disk on a miss.
    ///
    /// # Errors
    /// - `Error::PoolExhausted` if every frame is pinned
    /// - `Error::Io` from the disk read or a victim write-back
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<PageReadGuard<'_>> {
        let frame_id = self.fetch_and_pin(page_id)?;
        let lock = self.frames[frame_id.0].page();
        Ok(PageReadGuard::new(self, frame_id, page_id, lock))
    }

    /// Fetch a page for exclusive writing, loading it from disk on a
    /// miss. The page is marked dirty when the guard drops.
    ///
    /// # Errors
    /// - `Error::PoolExhausted` if every frame is pinned
    /// - `Error::Io` from the disk read or a victim write-back
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<PageWriteGuard<'_>> {
        let frame_id = self.fetch_and_pin(page_id)?;
        let lock = self.frames[frame_id.0].page_mut();
        Ok(PageWriteGuard::new(self, frame_id, page_id, lock))
    }

    /// Drop one pin on a page. At pin count zero the frame becomes
    /// evictable. `is_dirty` is OR-ed into the frame's dirty flag,
    /// never cleared by this path.
    ///
    /// Returns `false` if the page is not resident or already unpinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let _state = self.latch.lock();

        let Some(frame_id) = self.page_table.find(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id.0];
        if frame.pin_count() == 0 {
            return false;
        }

        if frame.unpin() == 0 {
            self.replacer
                .set_evictable(frame_id, true)
                .expect("pool frame ids are within replacer range");
        }
        if is_dirty {
            frame.mark_dirty();
        }

        true
    }

    /// Write a page's frame through to disk and clear its dirty flag,
    /// without evicting it. The write is unconditional: a clean page is
    /// written again.
    ///
    /// Returns `Ok(false)` for the invalid sentinel or a page that is
    /// not resident.
    ///
    /// # Errors
    /// `Error::Io` from the disk write.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let _state = self.latch.lock();

        if !page_id.is_valid() {
            return Ok(false);
        }
        let Some(frame_id) = self.page_table.find(&page_id) else {
            return Ok(false);
        };

        self.write_back(&self.frames[frame_id.0], page_id)?;
        Ok(true)
    }

    /// Write every resident page through to disk, clearing dirty flags.
    ///
    /// # Errors
    /// `Error::Io` from a disk write.
    pub fn flush_all_pages(&self) -> Result<()> {
        let _state = self.latch.lock();

        for frame in &self.frames {
            let page_id = frame.page_id();
            if page_id.is_valid() {
                self.write_back(frame, page_id)?;
            }
        }
        Ok(())
    }

    /// Drop a page from the pool and tell the disk manager its id is
    /// free.
    ///
    /// Returns `Ok(true)` if the page is absent (nothing to do, no disk
    /// side effects) and `Ok(false)` if the page is pinned.
    ///
    /// # Errors
    /// `Error::Io` from flushing a dirty page before the drop.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut state = self.latch.lock();

        let Some(frame_id) = self.page_table.find(&page_id) else {
            return Ok(true);
        };
        let frame = &self.frames[frame_id.0];
        if frame.is_pinned() {
            return Ok(false);
        }

        if frame.is_dirty() {
            self.write_back(frame, page_id)?;
        }

        // The replacer refuses to drop a pinned-down frame; the pin
        // count is zero here, so lift the flag before removing.
        self.replacer.set_evictable(frame_id, true)?;
        self.replacer.remove(frame_id)?;
        self.page_table.remove(&page_id);
        frame.reset();
        state.free_list.push_back(frame_id);
        self.disk_manager.lock().deallocate_page(page_id);

        debug!("deleted {}", page_id);
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Number of frames in the pool.
    #[inline]
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Number of pages currently resident.
    pub fn page_count(&self) -> usize {
        let _state = self.latch.lock();
        self.page_table.len()
    }

    /// Number of frames on the free list.
    pub fn free_frame_count(&self) -> usize {
        self.latch.lock().free_list.len()
    }

    /// Pin count of a resident page, `None` if not resident.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let _state = self.latch.lock();
        let frame_id = self.page_table.find(&page_id)?;
        Some(self.frames[frame_id.0].pin_count())
    }

    /// Whether a page is currently resident.
    pub fn contains_page(&self, page_id: PageId) -> bool {
        let _state = self.latch.lock();
        self.page_table.find(&page_id).is_some()
    }

    /// Pool counters.
    pub fn stats(&self) -> &BufferPoolStats {
        &self.stats
    }

    // ------------------------------------------------------------------
    // Internals (pool latch held by the caller)
    // ------------------------------------------------------------------

    /// Pin `page_id`'s frame, loading the page on a miss. Returns the
    /// frame id with the frame pinned and marked non-evictable.
    fn fetch_and_pin(&self, page_id: PageId) -> Result<FrameId> {
        let mut state = self.latch.lock();

        if let Some(frame_id) = self.page_table.find(&page_id) {
            self.frames[frame_id.0].pin();
            self.replacer.record_access(frame_id)?;
            self.replacer.set_evictable(frame_id, false)?;
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(frame_id);
        }

        self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);
        let frame_id = self.acquire_frame(&mut state)?;
        let frame = &self.frames[frame_id.0];

        {
            let mut page = frame.page_mut();
            if let Err(e) = self.disk_manager.lock().read_page(page_id, &mut page) {
                // The frame never became visible; scrub the partial
                // read and hand it back.
                drop(page);
                frame.reset();
                state.free_list.push_front(frame_id);
                return Err(e);
            }
        }
        self.stats.pages_read.fetch_add(1, Ordering::Relaxed);

        frame.set_page_id(page_id);
        frame.clear_dirty();
        frame.pin();
        self.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id)?;
        self.replacer.set_evictable(frame_id, false)?;

        Ok(frame_id)
    }

    /// Produce an empty frame: the free list first, then the replacer.
    /// An evicted victim is written back if dirty, unmapped, and reset.
    fn acquire_frame(&self, state: &mut MutexGuard<'_, PoolState>) -> Result<FrameId> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = self.replacer.evict().ok_or(Error::PoolExhausted)?;
        self.stats.evictions.fetch_add(1, Ordering::Relaxed);

        let frame = &self.frames[frame_id.0];
        let old_page_id = frame.page_id();
        debug!("evicting {} from {}", old_page_id, frame_id);

        if frame.is_dirty() {
            self.write_back(frame, old_page_id)?;
        }
        if old_page_id.is_valid() {
            self.page_table.remove(&old_page_id);
        }
        frame.reset();

        Ok(frame_id)
    }

    /// Write a frame's page to disk and clear its dirty flag.
    ///
    /// Only called under the pool latch for frames whose page lock
    /// cannot be write-held indefinitely by a latch-waiter (guard drops
    /// release the page lock before taking the latch).
    fn write_back(&self, frame: &Frame, page_id: PageId) -> Result<()> {
        {
            let page = frame.page();
            self.disk_manager.lock().write_page(page_id, &page)?;
        }
        frame.clear_dirty();
        self.stats.pages_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn allocate_page(state: &mut MutexGuard<'_, PoolState>) -> PageId {
    let page_id = PageId::new(state.next_page_id);
    state.next_page_id += 1;
    page_id
}
