#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use strata::{
    CacheOptions, CachingPageStorage, FilePageStorage, PageId, PageStorage, Result, StrataError,
};
use tempfile::tempdir;

const PAGE_SIZE: usize = 128;

#[test]
fn shared_cache_keeps_page_counters_exact_under_contention() -> Result<()> {
    let dir = tempdir().map_err(StrataError::Io)?;
    let file: Arc<dyn PageStorage> =
        Arc::new(FilePageStorage::open(dir.path().join("counters.strata"), PAGE_SIZE)?);
    let cache = CachingPageStorage::new(Arc::clone(&file), CacheOptions { cache_pages: 3 });
    let pages: Vec<PageId> = (0..10).map(|_| cache.create_page()).collect::<Result<_>>()?;

    const THREADS: u64 = 6;
    const ROUNDS: u64 = 500;
    let outcomes: Vec<Result<()>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|worker| {
                let cache = cache.clone();
                let pages = &pages;
                scope.spawn(move || -> Result<()> {
                    let mut rng = ChaCha8Rng::seed_from_u64(worker);
                    for _ in 0..ROUNDS {
                        let id = pages[rng.gen_range(0..pages.len())];
                        let page = cache.get_page(id, true)?;
                        page.with_data_mut(|data| {
                            let count = u64::from_be_bytes(data[..8].try_into().expect("eight bytes"));
                            data[..8].copy_from_slice(&(count + 1).to_be_bytes());
                        });
                        page.touch()?;
                    }
                    Ok(())
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("worker thread"))
            .collect()
    });
    outcomes.into_iter().collect::<Result<()>>()?;

    cache.fsync()?;
    let mut buf = vec![0u8; PAGE_SIZE];
    let mut total = 0;
    for id in &pages {
        file.read_page(*id, &mut buf)?;
        total += u64::from_be_bytes(buf[..8].try_into().expect("eight bytes"));
    }
    assert_eq!(total, THREADS * ROUNDS);
    assert!(cache.resident_pages() <= 3);
    Ok(())
}

#[test]
fn resizing_the_cache_flushes_and_rebounds() -> Result<()> {
    let dir = tempdir().map_err(StrataError::Io)?;
    let file: Arc<dyn PageStorage> =
        Arc::new(FilePageStorage::open(dir.path().join("resize.strata"), PAGE_SIZE)?);
    let cache = CachingPageStorage::new(Arc::clone(&file), CacheOptions { cache_pages: 32 });
    for fill in 0..20u8 {
        let id = cache.create_page()?;
        let page = cache.get_page(id, false)?;
        page.with_data_mut(|data| data.fill(fill));
        page.touch()?;
    }
    assert_eq!(cache.resident_pages(), 20);

    cache.set_cache_size(5)?;
    assert_eq!(cache.resident_pages(), 5);
    let mut buf = vec![0u8; PAGE_SIZE];
    for fill in 0..15u8 {
        file.read_page(PageId(u32::from(fill)), &mut buf)?;
        assert!(buf.iter().all(|byte| *byte == fill));
    }

    cache.close()?;
    assert!(matches!(file.fsync(), Err(StrataError::Closed)));
    Ok(())
}
