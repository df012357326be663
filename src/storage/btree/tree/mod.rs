//! Order-statistic B+ tree over raw pages.
//!
//! Interior nodes record how many values sit below each child (except the last
//! one) so ordinals can be computed on the way down, and optionally a monoid
//! summary per child for range aggregation. Full nodes are split on the way down,
//! so an insert never has to walk back up.

use std::marker::PhantomData;
use std::ops::RangeBounds;
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use super::codecs::{encoded_key, encoded_val, KeyCodec, ValCodec};
use super::cursor::{LeafNodeCursor, NodeLayout};
use super::monoid::{Monoid, NoSummary};
use super::stats::{BTreeStats, BTreeStatsSnapshot};
use crate::primitives::pager::{CachingPageStorage, PageStorage};
use crate::types::{PageId, Result, StrataError};

mod range;
mod verify;
mod walk;

pub use verify::VerifyReport;

/// Configuration knobs for the B+ tree.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BTreeOptions {
    /// Append keys larger than every stored key directly to the last leaf.
    pub fast_append: bool,
}

impl Default for BTreeOptions {
    fn default() -> Self {
        Self { fast_append: true }
    }
}

/// Largest key inserted so far and the leaf holding it.
struct Largest {
    key: Vec<u8>,
    page: PageId,
}

/// A B+ tree mapping fixed-width keys to fixed-width values, with ordinal lookups
/// and optional monoid summaries.
///
/// The tree has no internal synchronization; mutations take `&mut self`. Pages are
/// reached through a [`CachingPageStorage`] which may be shared with other users.
pub struct BTree<K: KeyCodec, V: ValCodec, M: Monoid = NoSummary> {
    store: CachingPageStorage,
    layout: NodeLayout,
    root: PageId,
    size: usize,
    largest: Option<Largest>,
    monoid: Option<M>,
    options: BTreeOptions,
    stats: Arc<BTreeStats>,
    _marker: PhantomData<(K, V)>,
}

impl<K: KeyCodec, V: ValCodec> BTree<K, V> {
    /// Creates an empty tree without summaries.
    pub fn create(store: CachingPageStorage, options: BTreeOptions) -> Result<Self> {
        Self::new(store, options, None)
    }
}

impl<K: KeyCodec, V: ValCodec, M: Monoid> BTree<K, V, M> {
    /// Creates an empty tree whose root is a freshly allocated leaf.
    ///
    /// Fails with [`StrataError::Invalid`] if `monoid` is not commutative, cannot
    /// read pairs of this key and value type, or if a page cannot hold two leaf
    /// records and three interior buckets.
    pub fn new(store: CachingPageStorage, options: BTreeOptions, monoid: Option<M>) -> Result<Self> {
        let summary_width = match &monoid {
            Some(monoid) => {
                if !monoid.is_commutative() {
                    return Err(StrataError::Invalid("monoid must be commutative"));
                }
                monoid.validate(K::WIDTH, V::WIDTH, V::ENCODING)?;
                monoid.width()
            }
            None => 0,
        };
        let layout = NodeLayout::new(
            store.page_size(),
            K::WIDTH,
            V::WIDTH,
            summary_width,
            K::compare_encoded,
        )?;
        let root = store.create_page()?;
        let page = store.get_page(root, false)?;
        page.with_data_mut(|data| {
            LeafNodeCursor::init(data, &layout, true);
        });
        page.touch()?;
        debug!(
            root = root.0,
            leaf_max = layout.leaf_max_buckets(),
            interior_max = layout.interior_max_buckets(),
            "created btree"
        );
        Ok(Self {
            store,
            layout,
            root,
            size: 0,
            largest: None,
            monoid,
            options,
            stats: Arc::new(BTreeStats::default()),
            _marker: PhantomData,
        })
    }

    /// Number of key/value pairs stored.
    pub fn len(&self) -> usize {
        self.size
    }

    /// Whether the tree holds no pairs.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Return the root page identifier.
    pub fn root_page(&self) -> PageId {
        self.root
    }

    /// Node geometry derived from the page size and codec widths.
    pub fn layout(&self) -> &NodeLayout {
        &self.layout
    }

    /// Access the live statistics counters for this tree.
    pub fn stats(&self) -> Arc<BTreeStats> {
        Arc::clone(&self.stats)
    }

    /// Snapshot the current statistics counters.
    pub fn stats_snapshot(&self) -> BTreeStatsSnapshot {
        self.stats.snapshot()
    }

    /// Emit the current statistics to the tracing sink.
    pub fn emit_stats(&self) {
        self.stats.emit_tracing();
    }

    /// Pushes every dirty page to the backing store and issues its durability barrier.
    pub fn sync(&self) -> Result<()> {
        self.store.fsync()
    }

    /// Inserts a new pair. Fails with [`StrataError::InvalidState`] if `key` is present.
    pub fn insert(&mut self, key: &K, val: &V) -> Result<()> {
        let key = encoded_key(key);
        let val = encoded_val(val);
        if self.options.fast_append && self.try_append(&key, &val)? {
            self.stats.inc_fast_path_inserts();
            return Ok(());
        }
        self.stats.inc_slow_path_inserts();
        self.insert_slow(&key, &val)
    }

    /// Overwrites the value of an existing key and returns the previous value.
    ///
    /// Fails with [`StrataError::InvalidState`] if `key` is absent.
    pub fn replace(&mut self, key: &K, val: &V) -> Result<V> {
        let key = encoded_key(key);
        let val = encoded_val(val);
        let old = self.replace_encoded(&key, &val)?;
        V::decode_val(&old)
    }

    /// Value stored under `key`.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        let key = encoded_key(key);
        let found = self.locate_key(&key)?;
        if !found.exact() {
            return Ok(None);
        }
        found.leaf.with_data(|data| {
            let leaf = LeafNodeCursor::new(data, &self.layout);
            V::decode_val(leaf.val(found.idx as usize)).map(Some)
        })
    }

    /// Pair with the largest key `<= key`.
    pub fn get_floor(&self, key: &K) -> Result<Option<(K, V)>> {
        let key = encoded_key(key);
        let found = self.locate_key(&key)?;
        if found.idx < 0 {
            return Ok(None);
        }
        found.leaf.with_data(|data| {
            let leaf = LeafNodeCursor::new(data, &self.layout);
            let idx = found.idx as usize;
            Ok(Some((K::decode_key(leaf.key(idx))?, V::decode_val(leaf.val(idx))?)))
        })
    }

    /// Pair with the smallest key `>= key`, `None` if every key is smaller.
    pub fn get_ceiling(&self, key: &K) -> Result<Option<(K, V)>> {
        match self.ordinal_ceiling(key)? {
            Some(ord) => self.entry_at(ord),
            None => Ok(None),
        }
    }

    /// Number of keys smaller than `key`, if `key` is present.
    pub fn ordinal_of(&self, key: &K) -> Result<Option<usize>> {
        let key = encoded_key(key);
        let found = self.locate_key(&key)?;
        Ok(found.exact().then(|| found.rank_le() - 1))
    }

    /// Ordinal of the largest key `<= key`.
    pub fn ordinal_floor(&self, key: &K) -> Result<Option<usize>> {
        let key = encoded_key(key);
        let found = self.locate_key(&key)?;
        Ok(found.rank_le().checked_sub(1))
    }

    /// Ordinal of the smallest key `>= key`.
    pub fn ordinal_ceiling(&self, key: &K) -> Result<Option<usize>> {
        let key = encoded_key(key);
        let rank = self.locate_key(&key)?.rank_lt();
        Ok((rank < self.size).then_some(rank))
    }

    /// Value with ordinal `ord`.
    pub fn val_at(&self, ord: usize) -> Result<Option<V>> {
        Ok(self.entry_at(ord)?.map(|(_, val)| val))
    }

    /// Key with ordinal `ord`.
    pub fn key_at(&self, ord: usize) -> Result<Option<K>> {
        Ok(self.entry_at(ord)?.map(|(key, _)| key))
    }

    /// Pair with ordinal `ord`.
    pub fn entry_at(&self, ord: usize) -> Result<Option<(K, V)>> {
        if ord >= self.size {
            return Ok(None);
        }
        let Some((leaf, idx)) = self.locate_ordinal(ord)? else {
            return Ok(None);
        };
        leaf.with_data(|data| {
            let leaf = LeafNodeCursor::new(data, &self.layout);
            Ok(Some((K::decode_key(leaf.key(idx))?, V::decode_val(leaf.val(idx))?)))
        })
    }

    /// Number of keys inside `range`.
    pub fn count_range<R: RangeBounds<K>>(&self, range: R) -> Result<usize> {
        let (lower, upper) = range::encode_bounds(&range);
        let start = self.rank_of_lower(&lower)?;
        let end = self.rank_of_upper(&upper)?;
        Ok(end.saturating_sub(start))
    }

    /// Monoid product of every pair whose key lies inside `range`.
    ///
    /// Fails with [`StrataError::Unsupported`] if the tree was built without a monoid.
    pub fn summarize_range<R: RangeBounds<K>>(&self, range: R) -> Result<M::Summary> {
        let Some(monoid) = self.monoid.as_ref() else {
            return Err(StrataError::Unsupported("range summaries need a monoid"));
        };
        let (lower, upper) = range::encode_bounds(&range);
        let product = self.summarize_encoded(monoid, &lower, &upper)?;
        monoid.decode(&product)
    }

    /// Deletion is not supported.
    pub fn remove(&mut self, _key: &K) -> Result<V> {
        Err(StrataError::Unsupported("remove"))
    }

    /// Deletion is not supported.
    pub fn remove_range<R: RangeBounds<K>>(&mut self, _range: R) -> Result<usize> {
        Err(StrataError::Unsupported("remove_range"))
    }

    /// Deletion is not supported.
    pub fn clear(&mut self) -> Result<()> {
        Err(StrataError::Unsupported("clear"))
    }

    /// Successor iteration is not supported; use [`BTree::ordinal_ceiling`] and
    /// [`BTree::key_at`].
    pub fn next_key(&self, _key: &K) -> Result<Option<K>> {
        Err(StrataError::Unsupported("next_key"))
    }

    /// Predecessor iteration is not supported; use [`BTree::ordinal_floor`] and
    /// [`BTree::key_at`].
    pub fn prev_key(&self, _key: &K) -> Result<Option<K>> {
        Err(StrataError::Unsupported("prev_key"))
    }
}
