//! LRU-K replacement policy.
//!
//! Ranks frames by the timestamp of their K-th most recent access and
//! evicts the frame whose K-th access is oldest. Frames with fewer than
//! K accesses have infinite K-distance and are evicted first, in FIFO
//! order of their first access. A one-shot scan therefore never reaches
//! its K-th access and cannot displace pages with a real re-reference
//! pattern, which plain LRU gets wrong.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::common::{Error, FrameId, Result};

/// Per-frame bookkeeping.
struct FrameEntry {
    access_count: usize,
    evictable: bool,
    /// Ring of the most recent access timestamps, at most `k` long.
    /// Once the frame reaches the cache phase its front is the K-th
    /// most recent access.
    history: VecDeque<u64>,
}

impl FrameEntry {
    fn new(k: usize) -> Self {
        Self {
            access_count: 0,
            // A freshly tracked frame counts toward `size()` until the
            // pool pins it; the pool pairs every first `record_access`
            // with `set_evictable(false)`.
            evictable: true,
            history: VecDeque::with_capacity(k),
        }
    }
}

struct ReplacerInner {
    current_timestamp: u64,
    /// Number of tracked frames with `evictable == true`.
    curr_size: usize,
    frames: HashMap<FrameId, FrameEntry>,
    /// Frames with fewer than `k` accesses, keyed by first-access
    /// timestamp. Front is the newest; eviction scans from the back.
    history_list: VecDeque<(u64, FrameId)>,
    /// Frames with at least `k` accesses, ascending by K-th-access
    /// timestamp. Kept sorted on insert so eviction is a front scan.
    cache_list: Vec<(u64, FrameId)>,
}

impl ReplacerInner {
    fn remove_from_history(&mut self, frame_id: FrameId) {
        if let Some(pos) = self.history_list.iter().position(|&(_, f)| f == frame_id) {
            self.history_list.remove(pos);
        }
    }

    fn remove_from_cache(&mut self, frame_id: FrameId) {
        if let Some(pos) = self.cache_list.iter().position(|&(_, f)| f == frame_id) {
            self.cache_list.remove(pos);
        }
    }

    /// Insert into the cache list keeping it sorted; frames with equal
    /// K-th timestamps stay in insertion order.
    fn insert_into_cache(&mut self, kth_timestamp: u64, frame_id: FrameId) {
        let pos = self.cache_list.partition_point(|&(ts, _)| ts <= kth_timestamp);
        self.cache_list.insert(pos, (kth_timestamp, frame_id));
    }
}

/// LRU-K replacer over a fixed range of frame ids.
///
/// Tracks up to `capacity` frames (ids `0..capacity`). Every public
/// method holds the replacer's latch for its full body; the buffer pool
/// only calls in while additionally holding the pool latch.
pub struct LruKReplacer {
    capacity: usize,
    k: usize,
    inner: Mutex<ReplacerInner>,
}

impl LruKReplacer {
    /// Create a replacer for frame ids `0..capacity` with parameter `k`.
    ///
    /// `k = 1` degenerates to plain LRU.
    ///
    /// # Panics
    /// Panics if `k` is 0.
    pub fn new(capacity: usize, k: usize) -> Self {
        assert!(k >= 1, "k must be >= 1");

        Self {
            capacity,
            k,
            inner: Mutex::new(ReplacerInner {
                current_timestamp: 0,
                curr_size: 0,
                frames: HashMap::new(),
                history_list: VecDeque::new(),
                cache_list: Vec::new(),
            }),
        }
    }

    /// Record an access to `frame_id` at the next timestamp.
    ///
    /// # Errors
    /// `Error::InvalidFrameId` if `frame_id` is outside `[0, capacity)`.
    pub fn record_access(&self, frame_id: FrameId) -> Result<()> {
        if frame_id.0 >= self.capacity {
            return Err(Error::InvalidFrameId(frame_id.0));
        }

        let mut inner = self.inner.lock();
        inner.current_timestamp += 1;
        let now = inner.current_timestamp;
        let k = self.k;

        let entry = inner
            .frames
            .entry(frame_id)
            .or_insert_with(|| FrameEntry::new(k));
        entry.access_count += 1;
        entry.history.push_back(now);
        let count = entry.access_count;
        let newly_tracked = count == 1;
        let evictable = entry.evictable;

        if newly_tracked && evictable {
            inner.curr_size += 1;
        }

        if count < k {
            if newly_tracked {
                inner.history_list.push_front((now, frame_id));
            }
            // Later history-phase accesses don't change the frame's
            // position: the list orders by first access.
            return Ok(());
        }

        // K-th or later access: the frame (re-)enters the cache list at
        // its new K-distance.
        if count == k {
            inner.remove_from_history(frame_id);
        } else {
            inner.remove_from_cache(frame_id);
        }

        let kth = inner
            .frames
            .get_mut(&frame_id)
            .and_then(|e| e.history.pop_front())
            .expect("cache-phase frame has a recorded access");
        inner.insert_into_cache(kth, frame_id);

        Ok(())
    }

    /// Mark `frame_id` evictable or pinned-down.
    ///
    /// A no-op for frames the replacer is not tracking.
    ///
    /// # Errors
    /// `Error::InvalidFrameId` if `frame_id` is outside `[0, capacity)`.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) -> Result<()> {
        if frame_id.0 >= self.capacity {
            return Err(Error::InvalidFrameId(frame_id.0));
        }

        let mut inner = self.inner.lock();
        if let Some(entry) = inner.frames.get_mut(&frame_id) {
            match (entry.evictable, evictable) {
                (true, false) => {
                    entry.evictable = false;
                    inner.curr_size -= 1;
                }
                (false, true) => {
                    entry.evictable = true;
                    inner.curr_size += 1;
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Evict the frame with the largest K-distance, dropping it from
    /// the replacer entirely.
    ///
    /// History-phase frames (infinite K-distance) are checked first,
    /// oldest first access first; then cache-phase frames by ascending
    /// K-th timestamp. Returns `None` when no tracked frame is
    /// evictable.
    pub fn evict(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();

        let victim = inner
            .history_list
            .iter()
            .rev()
            .map(|&(_, f)| f)
            .find(|f| inner.frames[f].evictable)
            .or_else(|| {
                inner
                    .cache_list
                    .iter()
                    .map(|&(_, f)| f)
                    .find(|f| inner.frames[f].evictable)
            })?;

        inner.remove_from_history(victim);
        inner.remove_from_cache(victim);
        inner.frames.remove(&victim);
        inner.curr_size -= 1;

        Some(victim)
    }

    /// Stop tracking `frame_id` regardless of its K-distance.
    ///
    /// Untracked frames are a no-op.
    ///
    /// # Errors
    /// `Error::FrameNotEvictable` if the frame is tracked but pinned.
    pub fn remove(&self, frame_id: FrameId) -> Result<()> {
        let mut inner = self.inner.lock();

        let Some(entry) = inner.frames.get(&frame_id) else {
            return Ok(());
        };
        if !entry.evictable {
            return Err(Error::FrameNotEvictable(frame_id.0));
        }

        inner.remove_from_history(frame_id);
        inner.remove_from_cache(frame_id);
        inner.frames.remove(&frame_id);
        inner.curr_size -= 1;

        Ok(())
    }

    /// Number of tracked, evictable frames.
    pub fn size(&self) -> usize {
        self.inner.lock().curr_size
    }
}
