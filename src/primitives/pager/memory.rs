use parking_lot::RwLock;

use super::{check_page_access, PageStorage};
use crate::types::{PageId, Result, StrataError};

/// Page store backed by heap buffers.
pub struct MemoryPageStorage {
    page_size: usize,
    pages: RwLock<Option<Vec<Box<[u8]>>>>,
}

impl MemoryPageStorage {
    /// Creates an empty store with `page_size` byte pages.
    pub fn new(page_size: usize) -> Self {
        assert!(page_size > 0, "page size must be non-zero");
        Self {
            page_size,
            pages: RwLock::new(Some(Vec::new())),
        }
    }
}

impl PageStorage for MemoryPageStorage {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn create_page(&self) -> Result<PageId> {
        let mut guard = self.pages.write();
        let pages = guard.as_mut().ok_or(StrataError::Closed)?;
        let id = u32::try_from(pages.len())
            .map_err(|_| StrataError::Invalid("page id space exhausted"))?;
        pages.push(vec![0u8; self.page_size].into_boxed_slice());
        Ok(PageId(id))
    }

    fn num_pages(&self) -> u32 {
        self.pages.read().as_ref().map_or(0, |pages| pages.len() as u32)
    }

    fn write_page(&self, id: PageId, buf: &[u8]) -> Result<()> {
        let mut guard = self.pages.write();
        let pages = guard.as_mut().ok_or(StrataError::Closed)?;
        check_page_access(id, pages.len() as u32, buf.len(), self.page_size)?;
        pages[id.0 as usize].copy_from_slice(buf);
        Ok(())
    }

    fn read_page(&self, id: PageId, buf: &mut [u8]) -> Result<()> {
        let guard = self.pages.read();
        let pages = guard.as_ref().ok_or(StrataError::Closed)?;
        check_page_access(id, pages.len() as u32, buf.len(), self.page_size)?;
        buf.copy_from_slice(&pages[id.0 as usize]);
        Ok(())
    }

    fn fsync_page(&self, id: PageId) -> Result<()> {
        let guard = self.pages.read();
        let pages = guard.as_ref().ok_or(StrataError::Closed)?;
        if id.0 >= pages.len() as u32 {
            return Err(StrataError::PageOutOfRange {
                page: id,
                num_pages: pages.len() as u32,
            });
        }
        Ok(())
    }

    fn fsync(&self) -> Result<()> {
        if self.pages.read().is_none() {
            return Err(StrataError::Closed);
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.pages.write().take();
        Ok(())
    }
}
