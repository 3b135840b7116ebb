//! Frame - a slot in the buffer pool.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::common::PageId;
use crate::storage::Page;

/// One slot of the buffer pool's frame array.
///
/// Holds the page bytes plus the metadata the pool needs: which page is
/// loaded (`PageId::INVALID` when empty), a pin count, and a dirty flag.
/// All fields use interior mutability so guards can keep the page lock
/// after the pool latch is released:
/// - `data`: `RwLock` - shared readers or one writer
/// - `page_id`, `pin_count`: atomics
/// - `is_dirty`: atomic flag, set by writers, cleared on write-back
pub struct Frame {
    data: RwLock<Page>,
    page_id: AtomicU32,
    pin_count: AtomicU32,
    is_dirty: AtomicBool,
}

impl Frame {
    /// Create an empty frame.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(Page::new()),
            page_id: AtomicU32::new(PageId::INVALID.0),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
        }
    }

    /// Acquire a shared lock on the page bytes.
    #[inline]
    pub fn page(&self) -> RwLockReadGuard<'_, Page> {
        self.data.read()
    }

    /// Acquire an exclusive lock on the page bytes.
    #[inline]
    pub fn page_mut(&self) -> RwLockWriteGuard<'_, Page> {
        self.data.write()
    }

    /// Id of the loaded page, `PageId::INVALID` if the frame is empty.
    #[inline]
    pub fn page_id(&self) -> PageId {
        PageId(self.page_id.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn set_page_id(&self, page_id: PageId) {
        self.page_id.store(page_id.0, Ordering::Relaxed);
    }

    /// Increment the pin count, returning the new value.
    #[inline]
    pub fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Decrement the pin count, returning the new value.
    ///
    /// # Panics
    /// Panics on underflow; the pool checks the count before unpinning.
    #[inline]
    pub fn unpin(&self) -> u32 {
        let old = self.pin_count.fetch_sub(1, Ordering::Relaxed);
        assert!(old > 0, "pin count underflow");
        old - 1
    }

    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    #[inline]
    pub fn mark_dirty(&self) {
        self.is_dirty.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn clear_dirty(&self) {
        self.is_dirty.store(false, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Relaxed)
    }

    /// Return the frame to its empty state: zeroed bytes, invalid page
    /// id, unpinned, clean.
    pub fn reset(&self) {
        self.page_mut().reset();
        self.set_page_id(PageId::INVALID);
        self.pin_count.store(0, Ordering::Relaxed);
        self.is_dirty.store(false, Ordering::Relaxed);
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}
