#![forbid(unsafe_code)]
//! Shared identifiers and the crate-wide error type.

use std::fmt;

/// Identifier of a fixed-size page inside a [`PageStorage`](crate::primitives::pager::PageStorage).
///
/// Ids are dense and start at zero.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct PageId(pub u32);

impl PageId {
    /// Byte offset of this page in a store with `page_size` byte pages.
    pub fn offset(self, page_size: usize) -> u64 {
        u64::from(self.0) * page_size as u64
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for PageId {
    fn from(value: u32) -> Self {
        PageId(value)
    }
}

impl From<PageId> for u32 {
    fn from(value: PageId) -> Self {
        value.0
    }
}

/// Errors surfaced by the storage layers and the B+ tree.
#[derive(thiserror::Error, Debug)]
pub enum StrataError {
    /// Failure reading, writing or syncing the backing medium.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// On-page bytes that cannot be interpreted.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// A caller supplied an argument the operation cannot accept.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// The operation contradicts the current contents (duplicate insert, missing replace).
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// The operation exists in the API but is not implemented.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    /// A page id at or beyond the current page count.
    #[error("page {page} out of range (store has {num_pages} pages)")]
    PageOutOfRange {
        /// Requested page.
        page: PageId,
        /// Page count at the time of the request.
        num_pages: u32,
    },
    /// Another thread failed to load this page into the cache.
    #[error("page {0} failed to initialize")]
    PageInitFailed(PageId),
    /// The store has been closed.
    #[error("page storage closed")]
    Closed,
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StrataError>;
