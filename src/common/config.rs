//! Configuration constants for tidepool.

/// Size of a page in bytes (4KB).
///
/// Matches the OS page size on most systems; frames, disk offsets and
/// page buffers are all multiples of this.
pub const PAGE_SIZE: usize = 4096;

/// Maximum number of entries in a page-table bucket before it splits.
///
/// Splits copy directory pointers, not entries, so small buckets are
/// cheap and keep lookups at a handful of key comparisons.
pub const BUCKET_SIZE: usize = 4;

/// Default `k` for the LRU-K replacer.
///
/// One-shot scans never reach their second access, so with `k = 2` they
/// stay in the history phase and are evicted before any page with a real
/// re-reference pattern.
pub const DEFAULT_REPLACER_K: usize = 2;
