use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use super::PageStorage;
use crate::types::{PageId, Result, StrataError};

/// Starts in a small, fast store and migrates wholesale to a large, slow one.
///
/// Once creating another page would push the first store past `high_water_bytes`,
/// every existing page is copied to the second store, the first store is closed,
/// and all later calls go to the second store. The migration happens at most once.
///
/// A migration that fails partway leaves pages in both stores, so it is terminal:
/// the error is returned once and every later call fails with
/// [`StrataError::InvalidState`]. Only `num_pages` and `close` still reach the
/// first store.
pub struct OverflowPageStorage {
    high_water_bytes: u64,
    page_size: usize,
    state: RwLock<Backing>,
    large: Arc<dyn PageStorage>,
}

enum Backing {
    Small(Arc<dyn PageStorage>),
    Large,
    Failed(Arc<dyn PageStorage>),
}

fn migration_failed() -> StrataError {
    StrataError::InvalidState("overflow migration failed; store is unusable".into())
}

impl OverflowPageStorage {
    /// Wraps `small` and `large`; `large` must be empty and share `small`'s page size.
    pub fn new(
        small: Arc<dyn PageStorage>,
        large: Arc<dyn PageStorage>,
        high_water_bytes: u64,
    ) -> Result<Self> {
        if small.page_size() != large.page_size() {
            return Err(StrataError::Invalid("overflow stores disagree on page size"));
        }
        if large.num_pages() != 0 {
            return Err(StrataError::Invalid("overflow target store must start empty"));
        }
        Ok(Self {
            high_water_bytes,
            page_size: small.page_size(),
            state: RwLock::new(Backing::Small(small)),
            large,
        })
    }

    /// Whether the one-way migration to the large store has happened.
    pub fn has_overflowed(&self) -> bool {
        matches!(*self.state.read(), Backing::Large)
    }

    /// Runs `f` against the active store with the state lock held shared.
    fn with_current<R>(&self, f: impl FnOnce(&dyn PageStorage) -> Result<R>) -> Result<R> {
        let state = self.state.read();
        match &*state {
            Backing::Small(small) => f(small.as_ref()),
            Backing::Large => f(self.large.as_ref()),
            Backing::Failed(_) => Err(migration_failed()),
        }
    }

    fn migrate(&self, small: &Arc<dyn PageStorage>) -> Result<()> {
        let count = small.num_pages();
        let mut buf = vec![0u8; self.page_size];
        for raw in 0..count {
            let id = PageId(raw);
            small.read_page(id, &mut buf)?;
            let copied = self.large.create_page()?;
            if copied != id {
                return Err(StrataError::Corruption("overflow target allocated unexpected page id"));
            }
            self.large.write_page(id, &buf)?;
        }
        small.close()?;
        info!(
            pages = count,
            high_water_bytes = self.high_water_bytes,
            "page storage overflowed into secondary store"
        );
        Ok(())
    }
}

impl PageStorage for OverflowPageStorage {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn create_page(&self) -> Result<PageId> {
        let mut state = self.state.write();
        match &*state {
            Backing::Small(small) => {
                let next_bytes =
                    PageId(small.num_pages()).offset(self.page_size) + self.page_size as u64;
                if next_bytes <= self.high_water_bytes {
                    return small.create_page();
                }
                let small = Arc::clone(small);
                if let Err(err) = self.migrate(&small) {
                    warn!(error = %err, "overflow migration failed");
                    *state = Backing::Failed(small);
                    return Err(err);
                }
                *state = Backing::Large;
            }
            Backing::Large => {}
            Backing::Failed(_) => return Err(migration_failed()),
        }
        drop(state);
        self.large.create_page()
    }

    fn num_pages(&self) -> u32 {
        match &*self.state.read() {
            Backing::Small(small) | Backing::Failed(small) => small.num_pages(),
            Backing::Large => self.large.num_pages(),
        }
    }

    fn write_page(&self, id: PageId, buf: &[u8]) -> Result<()> {
        self.with_current(|store| store.write_page(id, buf))
    }

    fn read_page(&self, id: PageId, buf: &mut [u8]) -> Result<()> {
        self.with_current(|store| store.read_page(id, buf))
    }

    fn fsync_page(&self, id: PageId) -> Result<()> {
        self.with_current(|store| store.fsync_page(id))
    }

    fn fsync(&self) -> Result<()> {
        self.with_current(|store| store.fsync())
    }

    fn close(&self) -> Result<()> {
        if let Backing::Failed(small) = &*self.state.read() {
            return match small.close() {
                Err(StrataError::Closed) => Ok(()),
                other => other,
            };
        }
        self.with_current(|store| store.close())
    }
}
