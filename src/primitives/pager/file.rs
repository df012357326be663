use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::{check_page_access, PageStorage};
use crate::primitives::io::{FileIo, StdFileIo};
use crate::types::{PageId, Result, StrataError};

/// Page store mapping page `i` to bytes `[i * page_size, (i + 1) * page_size)` of one file.
///
/// New pages are written out as zeros, whatever the file held at that offset.
///
/// `fsync` issues a real `sync_all`; nothing reaches the disk in a guaranteed order
/// before that call.
pub struct FilePageStorage {
    io: Arc<dyn FileIo>,
    page_size: usize,
    num_pages: AtomicU32,
    grow: Mutex<()>,
    closed: AtomicBool,
}

impl FilePageStorage {
    /// Opens (or creates) the file at `path`.
    ///
    /// Existing whole blocks become pages; a trailing partial block is ignored.
    pub fn open(path: impl AsRef<Path>, page_size: usize) -> Result<Self> {
        let io = StdFileIo::open(path.as_ref())?;
        Self::with_io(Arc::new(io), page_size)
    }

    /// Builds a store over an already opened [`FileIo`].
    pub fn with_io(io: Arc<dyn FileIo>, page_size: usize) -> Result<Self> {
        if page_size == 0 {
            return Err(StrataError::Invalid("page size must be non-zero"));
        }
        let len = io.len()?;
        let pages = len / page_size as u64;
        let num_pages =
            u32::try_from(pages).map_err(|_| StrataError::Corruption("file holds too many pages"))?;
        debug!(num_pages, page_size, "file page storage opened");
        Ok(Self {
            io,
            page_size,
            num_pages: AtomicU32::new(num_pages),
            grow: Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(AtomicOrdering::Acquire) {
            return Err(StrataError::Closed);
        }
        Ok(())
    }
}

impl PageStorage for FilePageStorage {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn create_page(&self) -> Result<PageId> {
        self.ensure_open()?;
        let _grow = self.grow.lock();
        let id = self.num_pages.load(AtomicOrdering::Acquire);
        let next = id
            .checked_add(1)
            .ok_or(StrataError::Invalid("page id space exhausted"))?;
        // Leftover bytes past the last whole block would otherwise show through.
        let zeros = vec![0u8; self.page_size];
        self.io.write_at(PageId(id).offset(self.page_size), &zeros)?;
        self.num_pages.store(next, AtomicOrdering::Release);
        Ok(PageId(id))
    }

    fn num_pages(&self) -> u32 {
        self.num_pages.load(AtomicOrdering::Acquire)
    }

    fn write_page(&self, id: PageId, buf: &[u8]) -> Result<()> {
        self.ensure_open()?;
        check_page_access(id, self.num_pages(), buf.len(), self.page_size)?;
        self.io.write_at(id.offset(self.page_size), buf)
    }

    fn read_page(&self, id: PageId, buf: &mut [u8]) -> Result<()> {
        self.ensure_open()?;
        check_page_access(id, self.num_pages(), buf.len(), self.page_size)?;
        self.io.read_at(id.offset(self.page_size), buf)
    }

    fn fsync_page(&self, id: PageId) -> Result<()> {
        self.ensure_open()?;
        if id.0 >= self.num_pages() {
            return Err(StrataError::PageOutOfRange {
                page: id,
                num_pages: self.num_pages(),
            });
        }
        self.io.sync_all()
    }

    fn fsync(&self) -> Result<()> {
        self.ensure_open()?;
        self.io.sync_all()
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, AtomicOrdering::AcqRel) {
            return Ok(());
        }
        self.io.sync_all()
    }
}
