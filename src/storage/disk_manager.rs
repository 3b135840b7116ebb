//! Disk manager - page-granular file I/O.
//!
//! The [`DiskManager`] owns the backing file and reads/writes whole
//! pages at `page_id * PAGE_SIZE` offsets. The buffer pool hands out
//! page ids from a monotonic counter, so the file grows lazily: a write
//! extends it as needed, and a read past the current end yields a zeroed
//! page rather than an error.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::common::config::PAGE_SIZE;
use crate::common::{PageId, Result};
use crate::storage::page::Page;

/// Manages disk I/O for a single database file.
///
/// Pages are laid out sequentially: page `n` lives at byte offset
/// `n * PAGE_SIZE`.
///
/// `DiskManager` is single-threaded; the buffer pool serializes access
/// to it behind its own latch.
pub struct DiskManager {
    file: File,
    /// Page ids reported free via [`deallocate_page`]. Ids are never
    /// reused; the set exists so a later compaction pass knows which
    /// slots are garbage.
    ///
    /// [`deallocate_page`]: DiskManager::deallocate_page
    freed: HashSet<u32>,
}

impl DiskManager {
    /// Create a new database file. Fails if the file already exists.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        Ok(Self {
            file,
            freed: HashSet::new(),
        })
    }

    /// Open an existing database file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        Ok(Self {
            file,
            freed: HashSet::new(),
        })
    }

    /// Open an existing database file, or create it if missing.
    pub fn open_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::open(path)
        } else {
            Self::create(path)
        }
    }

    /// Read a page from disk into `page`.
    ///
    /// A read past the end of the file zero-fills the buffer: an id the
    /// pool has allocated but never flushed is an all-zero page, not an
    /// error.
    pub fn read_page(&mut self, page_id: PageId, page: &mut Page) -> Result<()> {
        let offset = u64::from(page_id.0) * PAGE_SIZE as u64;
        let len = self.file.metadata()?.len();

        if offset >= len {
            page.reset();
            return Ok(());
        }

        self.file.seek(SeekFrom::Start(offset))?;

        let buf = page.as_mut_slice();
        let mut read = 0;
        while read < PAGE_SIZE {
            let n = self.file.read(&mut buf[read..])?;
            if n == 0 {
                // Short file: the tail of the page was never written.
                buf[read..].fill(0);
                break;
            }
            read += n;
        }

        Ok(())
    }

    /// Write a page to disk, extending the file if needed.
    ///
    /// The write is followed by `fsync` so an acknowledged flush is
    /// durable.
    pub fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<()> {
        let offset = u64::from(page_id.0) * PAGE_SIZE as u64;

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(page.as_slice())?;
        self.file.sync_all()?;

        Ok(())
    }

    /// Mark a page id as deallocated.
    ///
    /// Ids are not reused and the file is not shrunk.
    pub fn deallocate_page(&mut self, page_id: PageId) {
        if page_id.is_valid() {
            self.freed.insert(page_id.0);
        }
    }

    /// Whether an id has been reported free.
    #[inline]
    pub fn is_deallocated(&self, page_id: PageId) -> bool {
        self.freed.contains(&page_id.0)
    }

    /// Number of pages the backing file currently holds.
    pub fn page_capacity(&self) -> Result<u32> {
        let len = self.file.metadata()?.len();
        Ok((len / PAGE_SIZE as u64) as u32)
    }
}
