//! Error types for tidepool.

use std::fmt;

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// All possible errors in tidepool.
///
/// Non-fatal conditions (unpinning an unknown page, deleting a pinned
/// page, flushing an unmapped page) are reported through boolean returns
/// on the buffer pool itself; this enum covers the conditions a caller
/// cannot recover from locally.
#[derive(Debug)]
pub enum Error {
    /// I/O error from the disk manager. Fatal to the operation that hit
    /// it; the pool propagates it unchanged.
    Io(std::io::Error),

    /// Every frame is pinned: no free frame and no evictable victim.
    PoolExhausted,

    /// A replacer call named a frame id outside `[0, capacity)`.
    InvalidFrameId(usize),

    /// A replacer `remove` named a tracked frame that is not evictable.
    FrameNotEvictable(usize),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::PoolExhausted => write!(f, "buffer pool exhausted: all frames are pinned"),
            Error::InvalidFrameId(fid) => write!(f, "frame id {} out of range", fid),
            Error::FrameNotEvictable(fid) => write!(f, "frame {} is not evictable", fid),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}
