use super::cursor::{is_leaf_page, InteriorNodeCursor, LeafNodeCursor, NodeCursor, NodeLayout};
use super::{BTree, BTreeOptions, Monoid, PairCount, ValueMax, ValueSum};
use crate::primitives::pager::{
    CacheOptions, CachingPageStorage, FilePageStorage, MemoryPageStorage, PageStorage,
};
use crate::types::{PageId, Result, StrataError};
use proptest::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use tempfile::tempdir;

/// u64 keys and values: 6 records per leaf, 8 children per interior node.
const SMALL_PAGE: usize = 128;

fn memory_cache(page_size: usize, cache_pages: usize) -> CachingPageStorage {
    let inner: Arc<dyn PageStorage> = Arc::new(MemoryPageStorage::new(page_size));
    CachingPageStorage::new(inner, CacheOptions { cache_pages })
}

fn memory_tree(page_size: usize, options: BTreeOptions) -> Result<BTree<u64, u64>> {
    BTree::create(memory_cache(page_size, 64), options)
}

fn summed_tree(page_size: usize) -> Result<BTree<u64, u64, ValueSum>> {
    BTree::new(memory_cache(page_size, 64), BTreeOptions::default(), Some(ValueSum))
}

fn no_fast_path() -> BTreeOptions {
    BTreeOptions { fast_append: false }
}

fn shuffled_keys(count: u64, seed: u64) -> Vec<u64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut keys: Vec<u64> = (0..count).map(|k| k * 3 + 1).collect();
    for idx in (1..keys.len()).rev() {
        let other = rng.gen_range(0..=idx);
        keys.swap(idx, other);
    }
    keys
}

fn assert_verified<K, V, M>(tree: &BTree<K, V, M>) -> Result<()>
where
    K: super::KeyCodec,
    V: super::ValCodec,
    M: Monoid,
{
    let report = tree.verify()?;
    assert!(report.is_ok(), "tree failed verification: {:?}", report.findings);
    Ok(())
}

/// Keys of every leaf, left to right.
fn leaf_key_lists(store: &CachingPageStorage, layout: &NodeLayout, root: PageId) -> Result<Vec<Vec<u64>>> {
    let mut leaves = Vec::new();
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        let page = store.get_page(id, true)?;
        page.with_data(|data| {
            if is_leaf_page(data) {
                let leaf = LeafNodeCursor::new(data, layout);
                let keys = (0..leaf.num_buckets())
                    .map(|idx| u64::from_be_bytes(leaf.key(idx).try_into().expect("u64 key")))
                    .collect();
                leaves.push(keys);
            } else {
                let node = InteriorNodeCursor::new(data, layout);
                for idx in (0..node.num_buckets()).rev() {
                    stack.push(node.child(idx));
                }
            }
        });
    }
    Ok(leaves)
}

#[test]
fn empty_tree_lookups_return_none() -> Result<()> {
    let tree = memory_tree(SMALL_PAGE, BTreeOptions::default())?;
    assert!(tree.is_empty());
    assert_eq!(tree.get(&42)?, None);
    assert_eq!(tree.get_floor(&42)?, None);
    assert_eq!(tree.get_ceiling(&42)?, None);
    assert_eq!(tree.ordinal_of(&42)?, None);
    assert_eq!(tree.val_at(0)?, None);
    assert_eq!(tree.count_range(..)?, 0);
    assert_verified(&tree)
}

#[test]
fn insert_and_get_roundtrip() -> Result<()> {
    let mut tree = memory_tree(SMALL_PAGE, BTreeOptions::default())?;
    let keys = shuffled_keys(500, 7);
    for key in &keys {
        tree.insert(key, &(key * 10))?;
    }
    assert_eq!(tree.len(), keys.len());
    for key in &keys {
        assert_eq!(tree.get(key)?, Some(key * 10));
        assert_eq!(tree.get(&(key + 1))?, None);
    }
    assert_verified(&tree)
}

#[test]
fn duplicate_insert_leaves_tree_untouched() -> Result<()> {
    let mut tree = memory_tree(SMALL_PAGE, no_fast_path())?;
    for key in 0u64..40 {
        tree.insert(&key, &key)?;
    }
    for key in [0u64, 17, 39] {
        let err = tree.insert(&key, &999).unwrap_err();
        assert!(matches!(err, StrataError::InvalidState(_)), "unexpected error {err:?}");
    }
    assert_eq!(tree.len(), 40);
    assert_eq!(tree.get(&17)?, Some(17));
    assert_eq!(tree.ordinal_of(&39)?, Some(39));
    assert_verified(&tree)
}

#[test]
fn replace_returns_previous_value() -> Result<()> {
    let mut tree = memory_tree(SMALL_PAGE, BTreeOptions::default())?;
    for key in 0u64..50 {
        tree.insert(&key, &key)?;
    }
    assert_eq!(tree.replace(&20, &2_000)?, 20);
    assert_eq!(tree.get(&20)?, Some(2_000));
    let err = tree.replace(&500, &1).unwrap_err();
    assert!(matches!(err, StrataError::InvalidState(_)));
    assert_eq!(tree.len(), 50);
    assert_verified(&tree)
}

#[test]
fn ordinals_are_consistent() -> Result<()> {
    let mut tree = memory_tree(SMALL_PAGE, BTreeOptions::default())?;
    for key in shuffled_keys(400, 11) {
        tree.insert(&key, &(key + 1))?;
    }
    let mut previous = None;
    for ord in 0..tree.len() {
        let key = tree.key_at(ord)?.expect("ordinal in range");
        if let Some(previous) = previous {
            assert!(previous < key, "ordinal {ord} out of order");
        }
        assert_eq!(tree.ordinal_of(&key)?, Some(ord));
        assert_eq!(tree.val_at(ord)?, Some(key + 1));
        previous = Some(key);
    }
    assert_eq!(tree.key_at(tree.len())?, None);
    Ok(())
}

#[test]
fn floor_and_ceiling_match_reference() -> Result<()> {
    let mut tree = memory_tree(SMALL_PAGE, BTreeOptions::default())?;
    let mut reference = BTreeMap::new();
    for key in shuffled_keys(300, 3) {
        tree.insert(&key, &(key * 2))?;
        reference.insert(key, key * 2);
    }
    for query in 0u64..950 {
        let floor = reference.range(..=query).next_back().map(|(k, v)| (*k, *v));
        let ceiling = reference.range(query..).next().map(|(k, v)| (*k, *v));
        assert_eq!(tree.get_floor(&query)?, floor, "floor of {query}");
        assert_eq!(tree.get_ceiling(&query)?, ceiling, "ceiling of {query}");
        let below = reference.range(..query).count();
        assert_eq!(tree.ordinal_floor(&query)?, floor.map(|_| reference.range(..=query).count() - 1));
        assert_eq!(tree.ordinal_ceiling(&query)?, ceiling.map(|_| below));
    }
    Ok(())
}

#[test]
fn ceiling_past_the_largest_key_is_none() -> Result<()> {
    let mut tree = memory_tree(SMALL_PAGE, BTreeOptions::default())?;
    for key in [10u64, 20, 30] {
        tree.insert(&key, &key)?;
    }
    assert_eq!(tree.get_ceiling(&30)?, Some((30, 30)));
    assert_eq!(tree.get_ceiling(&31)?, None);
    assert_eq!(tree.ordinal_ceiling(&31)?, None);
    assert_eq!(tree.get_floor(&9)?, None);
    Ok(())
}

#[test]
fn small_page_scenario() -> Result<()> {
    // 52-byte pages: two records per leaf, three children per interior node.
    let mut tree = memory_tree(52, BTreeOptions::default())?;
    assert_eq!(tree.layout().leaf_max_buckets(), 2);
    for key in [5u64, 3, 8, 1, 9, 2, 7] {
        tree.insert(&key, &(key * 100))?;
    }
    assert!(tree.stats_snapshot().leaf_splits >= 2);
    assert_eq!(tree.val_at(0)?, Some(100));
    assert_eq!(tree.ordinal_of(&7)?, Some(4));
    assert_eq!(tree.count_range(2..=8)?, 5);
    assert_verified(&tree)
}

#[test]
fn increasing_inserts_take_the_fast_path() -> Result<()> {
    let mut tree = memory_tree(4096, BTreeOptions::default())?;
    let leaf_max = tree.layout().leaf_max_buckets() as u64;
    for key in 0u64..10_000 {
        tree.insert(&key, &key)?;
    }
    let stats = tree.stats_snapshot();
    // Rightmost splits leave full left halves, so each leaf keeps leaf_max - 1 keys.
    assert!(stats.leaf_splits >= 10_000 / leaf_max - 1, "{stats:?}");
    assert!(stats.leaf_splits <= 10_000 / (leaf_max - 1) + 1, "{stats:?}");
    assert_eq!(stats.even_splits, 0);
    assert!(stats.slow_path_inserts <= stats.leaf_splits + 1, "{stats:?}");
    assert_eq!(stats.fast_path_inserts + stats.slow_path_inserts, 10_000);
    assert_eq!(tree.ordinal_of(&9_999)?, Some(9_999));
    assert_verified(&tree)
}

#[test]
fn fast_path_places_keys_like_a_full_descent() -> Result<()> {
    let fast_store = memory_cache(SMALL_PAGE, 16);
    let slow_store = memory_cache(SMALL_PAGE, 16);
    let mut fast = BTree::<u64, u64>::create(fast_store.clone(), BTreeOptions::default())?;
    let mut slow = BTree::<u64, u64>::create(slow_store.clone(), no_fast_path())?;
    for key in 0u64..1_000 {
        fast.insert(&key, &(key ^ 0xff))?;
        slow.insert(&key, &(key ^ 0xff))?;
    }
    assert!(fast.stats_snapshot().fast_path_inserts > 0);
    assert_eq!(slow.stats_snapshot().fast_path_inserts, 0);
    let fast_leaves = leaf_key_lists(&fast_store, fast.layout(), fast.root_page())?;
    let slow_leaves = leaf_key_lists(&slow_store, slow.layout(), slow.root_page())?;
    assert_eq!(fast_leaves, slow_leaves);
    for ord in (0..1_000).step_by(37) {
        assert_eq!(fast.entry_at(ord)?, slow.entry_at(ord)?);
    }
    assert_verified(&fast)?;
    assert_verified(&slow)
}

#[test]
fn random_inserts_keep_nodes_within_capacity() -> Result<()> {
    let mut tree = memory_tree(SMALL_PAGE, BTreeOptions::default())?;
    for key in shuffled_keys(2_000, 99) {
        tree.insert(&key, &key)?;
    }
    let report = tree.verify()?;
    assert!(report.is_ok(), "{:?}", report.findings);
    assert_eq!(report.entries, 2_000);
    assert!(report.depth >= 3);
    let stats = tree.stats_snapshot();
    assert!(stats.interior_splits > 0);
    assert!(stats.even_splits > 0);
    Ok(())
}

#[test]
fn summaries_track_inserts_and_replaces() -> Result<()> {
    let mut tree = summed_tree(SMALL_PAGE)?;
    let mut reference = BTreeMap::new();
    let mut rng = ChaCha8Rng::seed_from_u64(5);
    for key in shuffled_keys(600, 21) {
        let value = rng.gen_range(0..1_000u64);
        tree.insert(&key, &value)?;
        reference.insert(key, value);
    }
    for key in shuffled_keys(600, 8).into_iter().take(150) {
        let value = rng.gen_range(0..1_000u64);
        let old = tree.replace(&key, &value)?;
        assert_eq!(reference.insert(key, value), Some(old));
    }
    assert_verified(&tree)?;

    let total: u64 = reference.values().sum();
    assert_eq!(tree.summarize_range(..)?, total);
    let ranges = [(0u64, 100u64), (5, 1_798), (301, 302), (1_000, 5_000), (40, 39)];
    for (lo, hi) in ranges {
        let inclusive: u64 = reference
            .iter()
            .filter(|(k, _)| (lo..=hi).contains(*k))
            .map(|(_, v)| v)
            .sum();
        assert_eq!(tree.summarize_range(lo..=hi)?, inclusive, "sum over {lo}..={hi}");
        let exclusive: u64 = reference
            .iter()
            .filter(|(k, _)| **k > lo && **k < hi)
            .map(|(_, v)| v)
            .sum();
        assert_eq!(
            tree.summarize_range((Bound::Excluded(lo), Bound::Excluded(hi)))?,
            exclusive,
            "sum over ({lo}, {hi})"
        );
    }
    Ok(())
}

#[test]
fn max_summary_over_increasing_inserts() -> Result<()> {
    let mut tree =
        BTree::<u64, u64, ValueMax>::new(memory_cache(SMALL_PAGE, 8), BTreeOptions::default(), Some(ValueMax))?;
    for key in 0u64..500 {
        tree.insert(&key, &((key * 7919) % 1_000))?;
    }
    assert_verified(&tree)?;
    let expected = (100u64..=250).map(|key| (key * 7919) % 1_000).max();
    assert_eq!(Some(tree.summarize_range(100..=250)?), expected);
    Ok(())
}

#[test]
fn count_range_matches_reference() -> Result<()> {
    let mut tree = BTree::<u64, u64, PairCount>::new(
        memory_cache(SMALL_PAGE, 32),
        BTreeOptions::default(),
        Some(PairCount),
    )?;
    let mut reference = BTreeMap::new();
    for key in shuffled_keys(700, 4) {
        tree.insert(&key, &0)?;
        reference.insert(key, 0u64);
    }
    for (lo, hi) in [(0u64, 2_100u64), (10, 20), (11, 11), (500, 499), (2_000, 9_000)] {
        let expected = reference.keys().filter(|k| (lo..=hi).contains(*k)).count();
        assert_eq!(tree.count_range(lo..=hi)?, expected);
        assert_eq!(tree.summarize_range(lo..=hi)?, expected as u64);
        let half_open = reference.keys().filter(|k| (lo..hi).contains(*k)).count();
        assert_eq!(tree.count_range(lo..hi)?, half_open);
    }
    assert_eq!(tree.count_range(..)?, 700);
    Ok(())
}

/// Keeps the first value seen; order matters, so it is not commutative.
struct FirstValue;

impl Monoid for FirstValue {
    type Summary = u64;

    fn width(&self) -> usize {
        9
    }

    fn is_commutative(&self) -> bool {
        false
    }

    fn identity(&self, out: &mut [u8]) {
        out.fill(0);
    }

    fn summarize(&self, _key: &[u8], val: &[u8], out: &mut [u8]) {
        out[0] = 1;
        out[1..9].copy_from_slice(&val[..8]);
    }

    fn combine(&self, acc: &mut [u8], other: &[u8]) {
        if acc[0] == 0 {
            acc.copy_from_slice(other);
        }
    }

    fn decode(&self, src: &[u8]) -> Result<u64> {
        Ok(u64::from_be_bytes(src[1..9].try_into().expect("nine bytes")))
    }
}

#[test]
fn non_commutative_monoid_is_rejected() {
    let result = BTree::<u64, u64, FirstValue>::new(
        memory_cache(SMALL_PAGE, 4),
        BTreeOptions::default(),
        Some(FirstValue),
    );
    assert!(matches!(result, Err(StrataError::Invalid(_))));
}

#[test]
fn monoid_value_width_is_checked() {
    let result = BTree::<u64, u32, ValueSum>::new(
        memory_cache(SMALL_PAGE, 4),
        BTreeOptions::default(),
        Some(ValueSum),
    );
    assert!(matches!(result, Err(StrataError::Invalid(_))));
}

#[test]
fn value_monoids_reject_signed_values() {
    let sum = BTree::<u64, i64, ValueSum>::new(memory_cache(SMALL_PAGE, 4), BTreeOptions::default(), Some(ValueSum));
    assert!(matches!(sum, Err(StrataError::Invalid(_))));
    let max = BTree::<u64, i64, ValueMax>::new(memory_cache(SMALL_PAGE, 4), BTreeOptions::default(), Some(ValueMax));
    assert!(matches!(max, Err(StrataError::Invalid(_))));
    let bytes = BTree::<u64, [u8; 8], ValueSum>::new(
        memory_cache(SMALL_PAGE, 4),
        BTreeOptions::default(),
        Some(ValueSum),
    );
    assert!(matches!(bytes, Err(StrataError::Invalid(_))));
}

#[test]
fn pair_count_accepts_signed_values() -> Result<()> {
    let mut tree = BTree::<u64, i64, PairCount>::new(
        memory_cache(SMALL_PAGE, 16),
        BTreeOptions::default(),
        Some(PairCount),
    )?;
    for (key, value) in [(1u64, 5i64), (2, -3), (3, 1)] {
        tree.insert(&key, &value)?;
    }
    assert_eq!(tree.summarize_range(..)?, 3);
    assert_eq!(tree.get(&2)?, Some(-3));
    Ok(())
}

#[test]
fn key_and_ordinal_descents_agree_on_a_deep_tree() -> Result<()> {
    let mut tree = memory_tree(SMALL_PAGE, no_fast_path())?;
    let keys = shuffled_keys(400, 0xD1CE);
    for key in &keys {
        tree.insert(key, &(key * 10))?;
    }
    assert!(tree.verify()?.depth >= 3);
    let mut sorted = keys.clone();
    sorted.sort_unstable();
    for (ord, key) in sorted.iter().enumerate() {
        assert_eq!(tree.key_at(ord)?, Some(*key));
        assert_eq!(tree.ordinal_of(key)?, Some(ord));
    }
    assert_eq!(tree.key_at(sorted.len())?, None);

    // Write descents share the walk but are not counted as searches.
    let searches = tree.stats_snapshot().searches;
    assert!(matches!(tree.insert(&sorted[7], &0), Err(StrataError::InvalidState(_))));
    assert_eq!(tree.replace(&sorted[9], &1)?, sorted[9] * 10);
    assert_eq!(tree.stats_snapshot().searches, searches);
    assert_eq!(tree.len(), 400);
    assert_eq!(tree.ordinal_of(&sorted[9])?, Some(9));
    assert_verified(&tree)
}

#[test]
fn tiny_pages_are_rejected() {
    let result = memory_tree(40, BTreeOptions::default());
    assert!(matches!(result, Err(StrataError::Invalid(_))));
}

#[test]
fn unsupported_operations_error() -> Result<()> {
    let mut tree = memory_tree(SMALL_PAGE, BTreeOptions::default())?;
    tree.insert(&1, &1)?;
    assert!(matches!(tree.remove(&1), Err(StrataError::Unsupported(_))));
    assert!(matches!(tree.remove_range(0..5), Err(StrataError::Unsupported(_))));
    assert!(matches!(tree.clear(), Err(StrataError::Unsupported(_))));
    assert!(matches!(tree.next_key(&1), Err(StrataError::Unsupported(_))));
    assert!(matches!(tree.prev_key(&1), Err(StrataError::Unsupported(_))));
    assert!(matches!(tree.summarize_range(..), Err(StrataError::Unsupported(_))));
    assert_eq!(tree.get(&1)?, Some(1));
    Ok(())
}

#[test]
fn tree_survives_a_tiny_cache_over_a_file() -> Result<()> {
    let dir = tempdir().map_err(StrataError::Io)?;
    let path = dir.path().join("btree.pages");
    let file: Arc<dyn PageStorage> = Arc::new(FilePageStorage::open(&path, SMALL_PAGE)?);
    let store = CachingPageStorage::new(Arc::clone(&file), CacheOptions { cache_pages: 2 });
    let mut tree = BTree::<u64, u64, ValueSum>::new(store.clone(), BTreeOptions::default(), Some(ValueSum))?;
    let keys = shuffled_keys(1_500, 12);
    for key in &keys {
        tree.insert(key, &(key % 97))?;
    }
    tree.sync()?;
    for key in keys.iter().step_by(11) {
        assert_eq!(tree.get(key)?, Some(key % 97));
    }
    assert!(store.resident_pages() <= 2);
    assert_eq!(tree.summarize_range(..)?, keys.iter().map(|key| key % 97).sum::<u64>());
    assert_verified(&tree)
}

#[test]
fn pass_through_cache_still_works() -> Result<()> {
    let mut tree = BTree::<u64, u64>::create(memory_cache(SMALL_PAGE, 0), BTreeOptions::default())?;
    for key in shuffled_keys(300, 77) {
        tree.insert(&key, &key)?;
    }
    assert_eq!(tree.count_range(..)?, 300);
    assert_verified(&tree)
}

#[test]
fn stats_emit_tracing_and_snapshot() -> Result<()> {
    let mut tree = memory_tree(SMALL_PAGE, BTreeOptions::default())?;
    for key in 0u64..20 {
        tree.insert(&key, &key)?;
    }
    tree.get(&3)?;
    tree.emit_stats();
    let stats = tree.stats();
    assert_eq!(stats.snapshot(), tree.stats_snapshot());
    assert!(stats.searches() >= 1);
    assert_eq!(stats.fast_path_inserts() + stats.slow_path_inserts(), 20);
    Ok(())
}

#[derive(Clone, Debug)]
enum PropOp {
    Insert(u64, u64),
    Replace(u64, u64),
}

fn op_strategy() -> impl Strategy<Value = PropOp> {
    let key_range = 0u64..256;
    let value_range = 0u64..512;
    prop_oneof![
        3 => (key_range.clone(), value_range.clone()).prop_map(|(k, v)| PropOp::Insert(k, v)),
        1 => (key_range, value_range).prop_map(|(k, v)| PropOp::Replace(k, v)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]
    #[test]
    fn btree_matches_btreemap_random_ops(
        ops in prop::collection::vec(op_strategy(), 1..200),
        fast_append in any::<bool>(),
    ) {
        let mut tree = BTree::<u64, u64, ValueSum>::new(
            memory_cache(SMALL_PAGE, 4),
            BTreeOptions { fast_append },
            Some(ValueSum),
        ).expect("create tree");
        let mut reference = BTreeMap::new();

        for op in ops {
            match op {
                PropOp::Insert(key, value) => {
                    let result = tree.insert(&key, &value);
                    if reference.contains_key(&key) {
                        prop_assert!(matches!(result, Err(StrataError::InvalidState(_))));
                    } else {
                        prop_assert!(result.is_ok());
                        reference.insert(key, value);
                    }
                }
                PropOp::Replace(key, value) => {
                    let result = tree.replace(&key, &value);
                    match reference.insert(key, value) {
                        Some(old) => prop_assert_eq!(result.expect("replace"), old),
                        None => {
                            reference.remove(&key);
                            prop_assert!(matches!(result, Err(StrataError::InvalidState(_))));
                        }
                    }
                }
            }
        }

        prop_assert_eq!(tree.len(), reference.len());
        for (ord, (key, value)) in reference.iter().enumerate() {
            prop_assert_eq!(tree.get(key).expect("get"), Some(*value));
            prop_assert_eq!(tree.ordinal_of(key).expect("ordinal"), Some(ord));
        }
        prop_assert_eq!(tree.summarize_range(..).expect("sum"), reference.values().sum::<u64>());
        let report = tree.verify().expect("verify");
        prop_assert!(report.is_ok(), "{:?}", report.findings);
    }
}
