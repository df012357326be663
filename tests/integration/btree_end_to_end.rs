#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use strata::storage::btree::{PairCount, ValueSum};
use strata::{
    BTree, BTreeOptions, CacheOptions, CachingPageStorage, FilePageStorage, MemoryPageStorage,
    OverflowPageStorage, PageStorage, Result, StrataError,
};
use tempfile::tempdir;

const PAGE_SIZE: usize = 256;

#[test]
fn overflow_store_carries_a_growing_tree_to_disk() -> Result<()> {
    let dir = tempdir().map_err(StrataError::Io)?;
    let small: Arc<dyn PageStorage> = Arc::new(MemoryPageStorage::new(PAGE_SIZE));
    let large: Arc<dyn PageStorage> =
        Arc::new(FilePageStorage::open(dir.path().join("spill.strata"), PAGE_SIZE)?);
    let overflow = Arc::new(OverflowPageStorage::new(small, large, 16 * PAGE_SIZE as u64)?);
    let cache = CachingPageStorage::new(overflow.clone(), CacheOptions { cache_pages: 8 });
    let mut tree = BTree::<u64, u64, ValueSum>::new(cache, BTreeOptions::default(), Some(ValueSum))?;

    let mut rng = ChaCha8Rng::seed_from_u64(0xA11CE);
    let mut reference = BTreeMap::new();
    let mut duplicates = 0;
    while reference.len() < 3_000 {
        let key = rng.gen_range(0..1_000_000u64);
        let value = rng.gen_range(0..10_000u64);
        if let Some(kept) = reference.get(&key) {
            assert!(matches!(tree.insert(&key, &value), Err(StrataError::InvalidState(_))));
            assert_eq!(tree.get(&key)?, Some(*kept));
            duplicates += 1;
            continue;
        }
        reference.insert(key, value);
        tree.insert(&key, &value)?;
    }
    assert!(duplicates > 0, "seed should draw at least one repeated key");
    tree.sync()?;
    assert!(overflow.has_overflowed());

    for (ord, (key, value)) in reference.iter().enumerate().step_by(17) {
        assert_eq!(tree.get(key)?, Some(*value));
        assert_eq!(tree.ordinal_of(key)?, Some(ord));
        assert_eq!(tree.entry_at(ord)?, Some((*key, *value)));
    }
    let window: u64 = reference.range(250_000..750_000).map(|(_, v)| v).sum();
    assert_eq!(tree.summarize_range(250_000..750_000)?, window);

    let report = tree.verify()?;
    assert!(report.is_ok(), "{:?}", report.findings);
    assert_eq!(report.entries, 3_000);
    Ok(())
}

#[test]
fn file_tree_pages_reach_disk_on_sync() -> Result<()> {
    let dir = tempdir().map_err(StrataError::Io)?;
    let path = dir.path().join("tree.strata");
    let file: Arc<dyn PageStorage> = Arc::new(FilePageStorage::open(&path, PAGE_SIZE)?);
    let cache = CachingPageStorage::new(Arc::clone(&file), CacheOptions { cache_pages: 4 });
    let mut tree = BTree::<u32, u32>::create(cache.clone(), BTreeOptions::default())?;
    for key in (0..2_000u32).rev() {
        tree.insert(&key, &(key * 2))?;
    }
    tree.sync()?;
    let pages = file.num_pages();
    assert_eq!(cache.num_pages(), pages);

    let on_disk = FilePageStorage::open(&path, PAGE_SIZE)?;
    assert_eq!(on_disk.num_pages(), pages);
    let mut cached = vec![0u8; PAGE_SIZE];
    let mut raw = vec![0u8; PAGE_SIZE];
    for id in 0..pages {
        cache.read_page(id.into(), &mut cached)?;
        on_disk.read_page(id.into(), &mut raw)?;
        assert_eq!(cached, raw, "page {id} differs on disk after sync");
    }
    Ok(())
}

#[test]
fn ordinal_and_neighbour_queries_agree() -> Result<()> {
    let inner: Arc<dyn PageStorage> = Arc::new(MemoryPageStorage::new(PAGE_SIZE));
    let cache = CachingPageStorage::new(inner, CacheOptions { cache_pages: 16 });
    let mut tree = BTree::<i64, u64, PairCount>::new(cache, BTreeOptions::default(), Some(PairCount))?;
    let keys: Vec<i64> = (-500..500).map(|k| k * 4).collect();
    for (idx, key) in keys.iter().enumerate() {
        tree.insert(key, &(idx as u64))?;
    }

    assert_eq!(tree.key_at(0)?, Some(-2_000));
    assert_eq!(tree.get_floor(&-1)?, Some((-4, 499)));
    assert_eq!(tree.get_ceiling(&-1)?, Some((0, 500)));
    assert_eq!(tree.ordinal_floor(&-1)?, Some(499));
    assert_eq!(tree.ordinal_ceiling(&-1)?, Some(500));
    assert_eq!(tree.get_ceiling(&1_997)?, None);
    assert_eq!(tree.get_floor(&-2_001)?, None);

    assert_eq!(tree.count_range(-8..=8)?, 5);
    assert_eq!(tree.summarize_range(-8..=8)?, 5);
    assert_eq!(tree.count_range(..0)?, 500);
    assert_eq!(tree.summarize_range(1..)?, 499);
    Ok(())
}
