//! Page - the fixed-size unit of storage.
//!
//! A [`Page`] is a raw byte buffer of [`PAGE_SIZE`] bytes, the unit of
//! I/O between disk and memory. The buffer pool holds these in frames;
//! what the bytes mean is the access methods' business, not ours.

use crate::common::config::PAGE_SIZE;

/// A page of data (4KB, 4KB-aligned).
///
/// Aligned to the page size so the buffer can later be handed to
/// O_DIRECT-style I/O without copying.
///
/// `Page` does not implement `Clone` outside tests: copying 4KB should
/// be an explicit decision in production paths.
#[repr(align(4096))]
pub struct Page {
    data: [u8; PAGE_SIZE],
}

impl Page {
    /// Create a new zeroed page.
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0u8; PAGE_SIZE],
        }
    }

    /// Immutable view of the page bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Mutable view of the page bytes.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Zero out the entire page.
    pub fn reset(&mut self) {
        self.data.fill(0);
    }

    /// Size of a page in bytes.
    #[inline]
    pub const fn size() -> usize {
        PAGE_SIZE
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl Clone for Page {
    fn clone(&self) -> Self {
        let mut page = Page::new();
        page.data.copy_from_slice(&self.data);
        page
    }
}
