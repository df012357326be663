//! Bounded write-back page cache.
//!
//! Locking follows two levels:
//!
//! * the structural lock guards only the `known` and `resident` maps;
//! * every [`PageCell`] has its own lock over its bytes, dirty flag and
//!   initialization state.
//!
//! The structural lock is never requested while a page lock is held, and the
//! backing store is never called while the structural lock is held. Page reads on
//! first creation and write-backs on eviction therefore happen after the
//! structural lock has been released; threads that find a page another thread is
//! still loading wait on that page's condition variable.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use lru::LruCache;
use parking_lot::{Condvar, Mutex};
use serde::Deserialize;
use tracing::{debug, warn};

use super::PageStorage;
use crate::types::{PageId, Result, StrataError};

/// Tuning knobs for [`CachingPageStorage`].
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CacheOptions {
    /// Maximum number of resident pages. Zero makes the cache a pass-through.
    pub cache_pages: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self { cache_pages: 128 }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum InitState {
    Pending,
    Ready,
    Failed,
}

struct PageState {
    data: Box<[u8]>,
    dirty: bool,
    init: InitState,
}

struct PageCell {
    id: PageId,
    state: Mutex<PageState>,
    ready: Condvar,
}

impl PageCell {
    fn new(id: PageId, page_size: usize) -> Self {
        Self {
            id,
            state: Mutex::new(PageState {
                data: vec![0u8; page_size].into_boxed_slice(),
                dirty: false,
                init: InitState::Pending,
            }),
            ready: Condvar::new(),
        }
    }

    fn wait_ready(&self) -> Result<()> {
        let mut state = self.state.lock();
        loop {
            match state.init {
                InitState::Ready => return Ok(()),
                InitState::Failed => return Err(StrataError::PageInitFailed(self.id)),
                InitState::Pending => self.ready.wait(&mut state),
            }
        }
    }
}

struct CacheMaps {
    /// Every page object still alive, resident or not.
    known: HashMap<PageId, Weak<PageCell>>,
    /// Resident pages in access order.
    resident: LruCache<PageId, Arc<PageCell>>,
    capacity: usize,
}

struct CacheShared {
    inner: Arc<dyn PageStorage>,
    page_size: usize,
    maps: Mutex<CacheMaps>,
}

impl CacheShared {
    /// Finds or allocates the page object for `id`; `true` means this caller created it
    /// and must initialize it.
    fn lookup_or_insert(&self, id: PageId) -> (Arc<PageCell>, bool) {
        let mut maps = self.maps.lock();
        if let Some(cell) = maps.resident.get(&id) {
            return (Arc::clone(cell), false);
        }
        if let Some(cell) = maps.known.get(&id).and_then(Weak::upgrade) {
            maps.resident.put(id, Arc::clone(&cell));
            return (cell, false);
        }
        let cell = Arc::new(PageCell::new(id, self.page_size));
        maps.known.insert(id, Arc::downgrade(&cell));
        maps.resident.put(id, Arc::clone(&cell));
        (cell, true)
    }

    fn initialize(&self, cell: &Arc<PageCell>, read_through: bool) -> Result<()> {
        let mut state = cell.state.lock();
        let outcome = if read_through {
            self.inner.read_page(cell.id, &mut state.data)
        } else {
            Ok(())
        };
        match outcome {
            Ok(()) => {
                state.init = InitState::Ready;
                cell.ready.notify_all();
                Ok(())
            }
            Err(err) => {
                state.init = InitState::Failed;
                cell.ready.notify_all();
                drop(state);
                warn!(page = cell.id.0, error = %err, "page cache failed to load page");
                self.forget(cell);
                Err(err)
            }
        }
    }

    fn forget(&self, cell: &Arc<PageCell>) {
        let mut maps = self.maps.lock();
        if maps
            .resident
            .peek(&cell.id)
            .is_some_and(|resident| Arc::ptr_eq(resident, cell))
        {
            maps.resident.pop(&cell.id);
        }
        if maps
            .known
            .get(&cell.id)
            .and_then(Weak::upgrade)
            .is_some_and(|known| Arc::ptr_eq(&known, cell))
        {
            maps.known.remove(&cell.id);
        }
    }

    fn admit(&self, cell: &Arc<PageCell>) {
        let mut maps = self.maps.lock();
        maps.resident.put(cell.id, Arc::clone(cell));
        let stale = maps
            .known
            .get(&cell.id)
            .map_or(true, |known| known.strong_count() == 0);
        if stale {
            maps.known.insert(cell.id, Arc::downgrade(cell));
        }
    }

    fn flush_cell(&self, cell: &PageCell) -> Result<()> {
        let mut state = cell.state.lock();
        if state.dirty {
            self.inner.write_page(cell.id, &state.data)?;
            state.dirty = false;
        }
        Ok(())
    }

    /// Evicts least-recently-touched pages until the resident set fits the capacity.
    ///
    /// Each pass pops victims under the structural lock, then writes them back with the
    /// lock released; passes repeat until one finds nothing to evict.
    fn evict_excess(&self) -> Result<()> {
        loop {
            let victims: Vec<Arc<PageCell>> = {
                let mut maps = self.maps.lock();
                let mut victims = Vec::new();
                while maps.resident.len() > maps.capacity {
                    match maps.resident.pop_lru() {
                        Some((_, cell)) => victims.push(cell),
                        None => break,
                    }
                }
                victims
            };
            if victims.is_empty() {
                return Ok(());
            }
            for (pos, cell) in victims.iter().enumerate() {
                if let Err(err) = self.flush_cell(cell) {
                    for unflushed in &victims[pos..] {
                        self.admit(unflushed);
                    }
                    return Err(err);
                }
            }
            let ids: Vec<PageId> = victims.iter().map(|cell| cell.id).collect();
            drop(victims);
            let mut maps = self.maps.lock();
            for id in ids {
                if maps
                    .known
                    .get(&id)
                    .is_some_and(|known| known.strong_count() == 0)
                {
                    maps.known.remove(&id);
                }
            }
        }
    }
}

/// Handle to a cached page.
///
/// Handles are cheap to clone and keep the page bytes alive even after the cache
/// evicts the page; [`CachedPage::touch`] re-admits it.
#[derive(Clone)]
pub struct CachedPage {
    cell: Arc<PageCell>,
    shared: Arc<CacheShared>,
}

impl CachedPage {
    /// The page this handle refers to.
    pub fn id(&self) -> PageId {
        self.cell.id
    }

    /// Marks the page most recently used, re-admitting it if it was evicted.
    ///
    /// May evict other pages to stay within the cache bound.
    pub fn touch(&self) -> Result<()> {
        self.shared.admit(&self.cell);
        self.shared.evict_excess()
    }

    /// Marks the page as modified.
    pub fn set_dirty(&self) {
        self.cell.state.lock().dirty = true;
    }

    /// Whether the page holds writes not yet pushed to the backing store.
    pub fn is_dirty(&self) -> bool {
        self.cell.state.lock().dirty
    }

    /// Writes the page through to the backing store if it is dirty.
    pub fn flush(&self) -> Result<()> {
        self.shared.flush_cell(&self.cell)
    }

    /// Runs `f` over the page bytes with the page lock held.
    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let state = self.cell.state.lock();
        f(&state.data)
    }

    /// Runs `f` over the mutable page bytes with the page lock held and marks the page dirty.
    pub fn with_data_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut state = self.cell.state.lock();
        state.dirty = true;
        f(&mut state.data)
    }
}

/// Bounded read/write-back cache in front of any [`PageStorage`].
#[derive(Clone)]
pub struct CachingPageStorage {
    shared: Arc<CacheShared>,
}

impl CachingPageStorage {
    /// Wraps `inner` with a cache configured by `options`.
    pub fn new(inner: Arc<dyn PageStorage>, options: CacheOptions) -> Self {
        let page_size = inner.page_size();
        Self {
            shared: Arc::new(CacheShared {
                inner,
                page_size,
                maps: Mutex::new(CacheMaps {
                    known: HashMap::new(),
                    resident: LruCache::unbounded(),
                    capacity: options.cache_pages,
                }),
            }),
        }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &Arc<dyn PageStorage> {
        &self.shared.inner
    }

    /// Returns the page object for `id`.
    ///
    /// A page object seen for the first time is read from the backing store only when
    /// `read_through` is set; otherwise its bytes start zeroed. If another thread is
    /// still loading the page, this call blocks until that load completes.
    pub fn get_page(&self, id: PageId, read_through: bool) -> Result<CachedPage> {
        let num_pages = self.shared.inner.num_pages();
        if id.0 >= num_pages {
            return Err(StrataError::PageOutOfRange {
                page: id,
                num_pages,
            });
        }
        let (cell, fresh) = self.shared.lookup_or_insert(id);
        if fresh {
            self.shared.initialize(&cell, read_through)?;
        } else {
            cell.wait_ready()?;
        }
        self.shared.evict_excess()?;
        Ok(CachedPage {
            cell,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Changes the resident-set bound, evicting pages as needed.
    pub fn set_cache_size(&self, pages: usize) -> Result<()> {
        self.shared.maps.lock().capacity = pages;
        debug!(pages, "page cache resized");
        self.shared.evict_excess()
    }

    /// Current resident-set bound.
    pub fn cache_size(&self) -> usize {
        self.shared.maps.lock().capacity
    }

    /// Number of pages currently resident.
    pub fn resident_pages(&self) -> usize {
        self.shared.maps.lock().resident.len()
    }

    /// Writes back every resident dirty page.
    pub fn flush_all(&self) -> Result<()> {
        let snapshot: Vec<Arc<PageCell>> = {
            let maps = self.shared.maps.lock();
            maps.resident.iter().map(|(_, cell)| Arc::clone(cell)).collect()
        };
        for cell in &snapshot {
            self.shared.flush_cell(cell)?;
        }
        Ok(())
    }
}

impl PageStorage for CachingPageStorage {
    fn page_size(&self) -> usize {
        self.shared.page_size
    }

    fn create_page(&self) -> Result<PageId> {
        self.shared.inner.create_page()
    }

    fn num_pages(&self) -> u32 {
        self.shared.inner.num_pages()
    }

    /// Write-through: the bytes reach the backing store before this returns.
    fn write_page(&self, id: PageId, buf: &[u8]) -> Result<()> {
        if buf.len() != self.shared.page_size {
            return Err(StrataError::Invalid("buffer length differs from page size"));
        }
        let page = self.get_page(id, false)?;
        page.with_data_mut(|data| data.copy_from_slice(buf));
        page.flush()
    }

    fn read_page(&self, id: PageId, buf: &mut [u8]) -> Result<()> {
        if buf.len() != self.shared.page_size {
            return Err(StrataError::Invalid("buffer length differs from page size"));
        }
        let page = self.get_page(id, true)?;
        page.with_data(|data| buf.copy_from_slice(data));
        Ok(())
    }

    fn fsync_page(&self, id: PageId) -> Result<()> {
        let cached = {
            let maps = self.shared.maps.lock();
            maps.known.get(&id).and_then(Weak::upgrade)
        };
        if let Some(cell) = cached {
            self.shared.flush_cell(&cell)?;
        }
        self.shared.inner.fsync_page(id)
    }

    fn fsync(&self) -> Result<()> {
        self.flush_all()?;
        self.shared.inner.fsync()
    }

    fn close(&self) -> Result<()> {
        self.flush_all()?;
        {
            let mut maps = self.shared.maps.lock();
            maps.resident.clear();
            maps.known.clear();
        }
        self.shared.inner.close()
    }
}
