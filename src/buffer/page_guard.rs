//! RAII guards for page access.
//!
//! A guard pins its page for as long as it lives: the buffer pool never
//! evicts a pinned frame, so the bytes behind the guard stay valid. On
//! drop the guard releases the page lock *first* and only then unpins.
//! Unpinning takes the pool latch, and pool operations holding the
//! latch may wait on page locks, so a drop that kept its page lock
//! while waiting for the latch could deadlock against them.

use std::ops::{Deref, DerefMut};

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::buffer::buffer_pool_manager::BufferPoolManager;
use crate::common::{FrameId, PageId};
use crate::storage::Page;

/// Shared read access to a pinned page. Several read guards may exist
/// for the same page at once; the page unpins when the guard drops.
pub struct PageReadGuard<'a> {
    pool: &'a BufferPoolManager,
    frame_id: FrameId,
    page_id: PageId,
    /// `Some` until drop; released before the unpin.
    lock: Option<RwLockReadGuard<'a, Page>>,
}

impl<'a> PageReadGuard<'a> {
    pub(crate) fn new(
        pool: &'a BufferPoolManager,
        frame_id: FrameId,
        page_id: PageId,
        lock: RwLockReadGuard<'a, Page>,
    ) -> Self {
        Self {
            pool,
            frame_id,
            page_id,
            lock: Some(lock),
        }
    }

    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }
}

impl Deref for PageReadGuard<'_> {
    type Target = Page;

    #[inline]
    fn deref(&self) -> &Page {
        self.lock.as_ref().expect("page lock held until drop")
    }
}

impl Drop for PageReadGuard<'_> {
    fn drop(&mut self) {
        self.lock = None;
        self.pool.unpin_page(self.page_id, false);
    }
}

/// Exclusive write access to a pinned page. The page is marked dirty
/// and unpinned when the guard drops.
pub struct PageWriteGuard<'a> {
    pool: &'a BufferPoolManager,
    frame_id: FrameId,
    page_id: PageId,
    /// `Some` until drop; released before the unpin.
    lock: Option<RwLockWriteGuard<'a, Page>>,
}

impl<'a> PageWriteGuard<'a> {
    pub(crate) fn new(
        pool: &'a BufferPoolManager,
        frame_id: FrameId,
        page_id: PageId,
        lock: RwLockWriteGuard<'a, Page>,
    ) -> Self {
        Self {
            pool,
            frame_id,
            page_id,
            lock: Some(lock),
        }
    }

    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }
}

impl Deref for PageWriteGuard<'_> {
    type Target = Page;

    #[inline]
    fn deref(&self) -> &Page {
        self.lock.as_ref().expect("page lock held until drop")
    }
}

impl DerefMut for PageWriteGuard<'_> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Page {
        self.lock.as_mut().expect("page lock held until drop")
    }
}

impl Drop for PageWriteGuard<'_> {
    fn drop(&mut self) {
        self.lock = None;
        self.pool.unpin_page(self.page_id, true);
    }
}
