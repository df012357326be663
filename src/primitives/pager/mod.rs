#![forbid(unsafe_code)]

mod cache;
mod file;
mod memory;
mod overflow;

pub use cache::{CacheOptions, CachedPage, CachingPageStorage};
pub use file::FilePageStorage;
pub use memory::MemoryPageStorage;
pub use overflow::OverflowPageStorage;

use crate::types::{PageId, Result, StrataError};

/// Default page size in bytes.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// A block device of fixed-size pages addressed by a dense id space `[0, num_pages)`.
///
/// Pages are only ever created, never freed. Methods take `&self`; implementations
/// provide their own interior locking so a store can sit behind an `Arc` shared by a
/// cache and its callers.
pub trait PageStorage: Send + Sync {
    /// Size of every page in bytes.
    fn page_size(&self) -> usize;
    /// Appends a page and returns its id. Its contents are undefined until written.
    fn create_page(&self) -> Result<PageId>;
    /// Number of pages created so far.
    fn num_pages(&self) -> u32;
    /// Overwrites page `id` with `buf` (exactly one page long).
    fn write_page(&self, id: PageId, buf: &[u8]) -> Result<()>;
    /// Copies page `id` into `buf` (exactly one page long).
    fn read_page(&self, id: PageId, buf: &mut [u8]) -> Result<()>;
    /// Durability barrier for a single page.
    fn fsync_page(&self, id: PageId) -> Result<()>;
    /// Durability barrier for the whole store.
    fn fsync(&self) -> Result<()>;
    /// Releases the store's resources. Later calls fail with [`StrataError::Closed`].
    fn close(&self) -> Result<()>;
}

/// Shared argument validation for page reads and writes.
pub(crate) fn check_page_access(
    id: PageId,
    num_pages: u32,
    buf_len: usize,
    page_size: usize,
) -> Result<()> {
    if id.0 >= num_pages {
        return Err(StrataError::PageOutOfRange {
            page: id,
            num_pages,
        });
    }
    if buf_len != page_size {
        return Err(StrataError::Invalid("buffer length differs from page size"));
    }
    Ok(())
}
