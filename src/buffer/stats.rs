//! Buffer pool statistics.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters tracked by the buffer pool.
///
/// All counters are atomic and updated with relaxed ordering: they only
/// need atomicity, not ordering against each other.
#[derive(Debug, Default)]
pub struct BufferPoolStats {
    /// Fetches satisfied from a resident frame.
    pub cache_hits: AtomicU64,
    /// Fetches that had to go to disk.
    pub cache_misses: AtomicU64,
    /// Frames reclaimed through the replacer.
    pub evictions: AtomicU64,
    /// Pages read from disk.
    pub pages_read: AtomicU64,
    /// Pages written to disk (eviction write-back and flushes).
    pub pages_written: AtomicU64,
}

impl BufferPoolStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-atomic copy of the current counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            pages_read: self.pages_read.load(Ordering::Relaxed),
            pages_written: self.pages_written.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`BufferPoolStats`], safe to compare and
/// print.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub evictions: u64,
    pub pages_read: u64,
    pub pages_written: u64,
}

impl StatsSnapshot {
    /// Fraction of fetches served without disk I/O, 0.0 when idle.
    pub fn hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits: {}, misses: {}, evictions: {}, hit rate: {:.2}%",
            self.cache_hits,
            self.cache_misses,
            self.evictions,
            self.hit_rate() * 100.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let stats = BufferPoolStats::new();
        assert_eq!(stats.snapshot().hit_rate(), 0.0);

        stats.cache_hits.fetch_add(3, Ordering::Relaxed);
        stats.cache_misses.fetch_add(1, Ordering::Relaxed);
        assert_eq!(stats.snapshot().hit_rate(), 0.75);
    }

    #[test]
    fn test_display() {
        let stats = BufferPoolStats::new();
        stats.cache_hits.fetch_add(8, Ordering::Relaxed);
        stats.cache_misses.fetch_add(2, Ordering::Relaxed);

        let rendered = format!("{}", stats.snapshot());
        assert!(rendered.contains("hits: 8"));
        assert!(rendered.contains("80.00%"));
    }
}
