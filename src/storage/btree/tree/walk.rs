//! Root-to-leaf descents.
//!
//! Page locks are only held inside `with_data` / `with_data_mut` closures, and no
//! closure calls back into the cache: fetching or creating a page may evict and
//! flush another one, which takes that page's lock. Every handle a closure needs
//! is therefore fetched before the closure runs, and every mutated page is touched
//! afterwards so eviction writes it back.

use std::cmp::Ordering;

use smallvec::SmallVec;
use tracing::{debug, trace};

use super::{BTree, Largest};
use crate::primitives::pager::{CachedPage, PageStorage};
use crate::storage::btree::codecs::{KeyCodec, ValCodec};
use crate::storage::btree::cursor::{
    is_leaf_page, InteriorNodeCursor, LeafNodeCursor, NodeCursor, NodeCursorMut, NodeLayout,
};
use crate::storage::btree::monoid::Monoid;
use crate::types::{PageId, Result, StrataError};

/// What a descent steers by.
#[derive(Clone, Copy)]
pub(super) enum Target<'k> {
    /// The leaf responsible for an encoded key.
    Key(&'k [u8]),
    /// The leaf holding an ordinal.
    Ordinal(usize),
}

/// Reads only look. Writes stop at the first full node so it can be split, and
/// remember the interior path for the count and summary updates that follow.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Read,
    Write,
}

/// Where a descent ended.
pub(super) struct Located {
    pub(super) leaf: CachedPage,
    /// For keys, the largest leaf record `<= key` (`-1` if none); for ordinals,
    /// the slot the ordinal falls on.
    pub(super) idx: isize,
    /// Values stored in leaves left of this one.
    pub(super) base: usize,
    /// The key is stored, or the ordinal slot exists.
    exact: bool,
    /// Interior steps taken; only recorded by write descents.
    path: Path,
}

impl Located {
    pub(super) fn exact(&self) -> bool {
        self.exact
    }

    /// Number of keys `<= key`.
    pub(super) fn rank_le(&self) -> usize {
        (self.base as isize + self.idx + 1) as usize
    }

    /// Number of keys `< key`.
    pub(super) fn rank_lt(&self) -> usize {
        self.rank_le() - usize::from(self.exact)
    }
}

/// An interior node passed on the way down and the bucket taken.
struct PathStep {
    page: CachedPage,
    idx: usize,
}

type Path = SmallVec<[PathStep; 8]>;

enum Step {
    Leaf { idx: isize, exact: bool },
    Descend { idx: usize, child: PageId, skipped: usize },
    Full,
}

enum Walk {
    Reached(Located),
    /// A write descent met a full node. `parent` is the step above it, `None` at the root.
    Full { parent: Option<PathStep>, node: CachedPage },
}

/// Monoid product of every bucket of the node in `page`.
pub(super) fn node_product<M: Monoid>(page: &[u8], layout: &NodeLayout, monoid: &M, out: &mut [u8]) {
    if is_leaf_page(page) {
        let node = LeafNodeCursor::new(page, layout);
        node.summary_product(monoid, 0..node.num_buckets(), out);
    } else {
        let node = InteriorNodeCursor::new(page, layout);
        node.summary_product(monoid, 0..node.num_buckets(), out);
    }
}

/// Bucket whose subtree holds the `remaining`-th value of this node; the last
/// bucket takes whatever the recorded counts leave over.
fn bucket_for_ordinal(node: &InteriorNodeCursor<'_, &[u8]>, remaining: usize) -> usize {
    let last = node.num_buckets() - 1;
    let mut idx = 0;
    let mut skipped = 0;
    while idx < last {
        let below = node.num_vals_below_bucket(idx) as usize;
        if remaining - skipped < below {
            break;
        }
        skipped += below;
        idx += 1;
    }
    idx
}

/// Values below the buckets left of `idx`.
fn count_before(node: &InteriorNodeCursor<'_, &[u8]>, idx: usize) -> usize {
    (0..idx).map(|bucket| node.num_vals_below_bucket(bucket) as usize).sum()
}

impl<K: KeyCodec, V: ValCodec, M: Monoid> BTree<K, V, M> {
    fn page(&self, id: PageId) -> Result<CachedPage> {
        self.store.get_page(id, true)
    }

    fn fresh_page(&self) -> Result<CachedPage> {
        let id = self.store.create_page()?;
        self.store.get_page(id, false)
    }

    /// The one root-to-leaf loop. Every key and ordinal operation, read or
    /// write, descends through here.
    fn walk(&self, target: Target<'_>, mode: Mode) -> Result<Walk> {
        if mode == Mode::Read {
            self.stats.inc_searches();
        }
        let mut path = Path::new();
        let mut current = self.page(self.root)?;
        let mut base = 0usize;
        loop {
            let step = current.with_data(|data| self.step(data, target, base, mode));
            match step {
                Step::Full => {
                    return Ok(Walk::Full {
                        parent: path.pop(),
                        node: current,
                    })
                }
                Step::Leaf { idx, exact } => {
                    return Ok(Walk::Reached(Located {
                        leaf: current,
                        idx,
                        base,
                        exact,
                        path,
                    }))
                }
                Step::Descend { idx, child, skipped } => {
                    trace!(
                        target: "strata::btree::search",
                        page = current.id().0,
                        child = child.0,
                        "descending"
                    );
                    base += skipped;
                    if mode == Mode::Write {
                        path.push(PathStep { page: current, idx });
                    }
                    current = self.page(child)?;
                }
            }
        }
    }

    /// Decides the next move inside one node. `base` counts the values left of it.
    fn step(&self, data: &[u8], target: Target<'_>, base: usize, mode: Mode) -> Step {
        if is_leaf_page(data) {
            let leaf = LeafNodeCursor::new(data, &self.layout);
            if mode == Mode::Write && leaf.is_full() {
                return Step::Full;
            }
            return match target {
                Target::Key(key) => {
                    let idx = leaf.search(key);
                    Step::Leaf {
                        idx,
                        exact: idx >= 0 && leaf.compare(key, idx) == Ordering::Equal,
                    }
                }
                Target::Ordinal(ord) => {
                    let slot = ord - base;
                    Step::Leaf {
                        idx: slot as isize,
                        exact: slot < leaf.num_buckets(),
                    }
                }
            };
        }
        let node = InteriorNodeCursor::new(data, &self.layout);
        if mode == Mode::Write && node.is_full() {
            return Step::Full;
        }
        let idx = match target {
            Target::Key(key) => node.search(key) as usize,
            Target::Ordinal(ord) => bucket_for_ordinal(&node, ord - base),
        };
        Step::Descend {
            idx,
            child: node.child(idx),
            skipped: count_before(&node, idx),
        }
    }

    /// Descends to the leaf responsible for `key`, summing the counts skipped on the way.
    pub(super) fn locate_key(&self, key: &[u8]) -> Result<Located> {
        match self.walk(Target::Key(key), Mode::Read)? {
            Walk::Reached(found) => Ok(found),
            Walk::Full { .. } => unreachable!("read descents never stop at full nodes"),
        }
    }

    /// Descends to the leaf holding ordinal `ord`, if the tree has that many values.
    pub(super) fn locate_ordinal(&self, ord: usize) -> Result<Option<(CachedPage, usize)>> {
        match self.walk(Target::Ordinal(ord), Mode::Read)? {
            Walk::Reached(found) => Ok(found.exact.then_some((found.leaf, found.idx as usize))),
            Walk::Full { .. } => unreachable!("read descents never stop at full nodes"),
        }
    }

    /// Descends towards `key` for a write, splitting each full node met and
    /// restarting from the root, until a leaf with room is reached.
    fn descend_for_write(&mut self, key: &[u8]) -> Result<Located> {
        loop {
            match self.walk(Target::Key(key), Mode::Write)? {
                Walk::Reached(found) => return Ok(found),
                Walk::Full { parent, node } => self.split_child(parent, &node)?,
            }
        }
    }

    /// Appends to the largest-key leaf if `key` extends the tree and the leaf has room.
    pub(super) fn try_append(&mut self, key: &[u8], val: &[u8]) -> Result<bool> {
        let Some(largest) = self.largest.as_ref() else {
            return Ok(false);
        };
        if self.layout.compare_keys(key, &largest.key) != Ordering::Greater {
            return Ok(false);
        }
        let page = self.page(largest.page)?;
        let full = page.with_data(|data| LeafNodeCursor::new(data, &self.layout).is_full());
        if full {
            return Ok(false);
        }
        page.with_data_mut(|data| {
            let mut leaf = LeafNodeCursor::new(data, &self.layout);
            let end = leaf.num_buckets();
            leaf.insert_val(end, key, val);
        });
        page.touch()?;
        self.size += 1;
        self.largest = Some(Largest {
            key: key.to_vec(),
            page: page.id(),
        });
        Ok(true)
    }

    pub(super) fn insert_slow(&mut self, key: &[u8], val: &[u8]) -> Result<()> {
        let found = self.descend_for_write(key)?;
        if found.exact {
            return Err(StrataError::InvalidState("key already present".into()));
        }
        let slot = (found.idx + 1) as usize;
        let Located { leaf, path, .. } = found;
        leaf.with_data_mut(|data| {
            LeafNodeCursor::new(data, &self.layout).insert_val(slot, key, val);
        });
        leaf.touch()?;
        self.record_insert_on_path(&path, key, val)?;
        self.size += 1;
        let new_max = match &self.largest {
            Some(largest) => self.layout.compare_keys(key, &largest.key) == Ordering::Greater,
            None => true,
        };
        if new_max {
            self.largest = Some(Largest {
                key: key.to_vec(),
                page: leaf.id(),
            });
        }
        Ok(())
    }

    /// Bumps the counts and folds the new pair into the summaries along `path`.
    ///
    /// Runs only once the leaf has accepted the pair, so a restart after a split or a
    /// rejected duplicate never leaves ancestors counting a value twice.
    fn record_insert_on_path(&self, path: &Path, key: &[u8], val: &[u8]) -> Result<()> {
        let pair = self.monoid.as_ref().map(|monoid| {
            let mut summary = vec![0u8; monoid.width()];
            monoid.summarize(key, val, &mut summary);
            summary
        });
        for step in path {
            step.page.with_data_mut(|data| {
                let mut node = InteriorNodeCursor::new(data, &self.layout);
                if step.idx + 1 < node.num_buckets() {
                    let below = node.num_vals_below_bucket(step.idx);
                    node.set_num_vals_below_bucket(step.idx, below + 1);
                }
                if let (Some(monoid), Some(pair)) = (self.monoid.as_ref(), pair.as_deref()) {
                    if node.has_stored_summary(step.idx) {
                        node.combine_summary(monoid, step.idx, pair);
                    }
                }
            });
            step.page.touch()?;
        }
        Ok(())
    }

    pub(super) fn replace_encoded(&mut self, key: &[u8], val: &[u8]) -> Result<Vec<u8>> {
        let found = self.descend_for_write(key)?;
        if !found.exact {
            return Err(StrataError::InvalidState("key not present".into()));
        }
        let slot = found.idx as usize;
        let Located { leaf, path, .. } = found;
        let old = leaf.with_data_mut(|data| LeafNodeCursor::new(data, &self.layout).set_val(slot, val));
        leaf.touch()?;
        if let Some(monoid) = self.monoid.as_ref() {
            self.refresh_path_summaries(monoid, &leaf, &path)?;
        }
        Ok(old)
    }

    /// Recomputes the summaries along `path` bottom-up after a leaf value changed.
    fn refresh_path_summaries(&self, monoid: &M, leaf: &CachedPage, path: &Path) -> Result<()> {
        let mut child = vec![0u8; monoid.width()];
        leaf.with_data(|data| node_product(data, &self.layout, monoid, &mut child));
        for step in path.iter().rev() {
            step.page.with_data_mut(|data| {
                let mut node = InteriorNodeCursor::new(&mut *data, &self.layout);
                if node.has_stored_summary(step.idx) {
                    node.set_summary(step.idx, &child);
                }
                if !node.is_rightmost() {
                    node_product(data, &self.layout, monoid, &mut child);
                }
            });
            step.page.touch()?;
        }
        Ok(())
    }

    /// Splits the full `node`, hanging the new right half off `parent` right after
    /// the node's own bucket. Without a parent the node is the root and a new root
    /// is grown above it first.
    fn split_child(&mut self, parent: Option<PathStep>, node: &CachedPage) -> Result<()> {
        let (parent, idx) = match parent {
            Some(PathStep { page, idx }) => (page, idx),
            None => {
                let root = self.fresh_page()?;
                root.with_data_mut(|data| {
                    InteriorNodeCursor::init_root(data, &self.layout, node.id());
                });
                root.touch()?;
                debug!(old_root = self.root.0, new_root = root.id().0, "btree root grew");
                self.root = root.id();
                (root, 0)
            }
        };
        let right = self.fresh_page()?;
        let layout = self.layout;
        let monoid = self.monoid.as_ref();
        let summary_width = layout.summary_width();

        let old_below = parent.with_data(|data| {
            let node = InteriorNodeCursor::new(data, &layout);
            (idx + 1 < node.num_buckets()).then(|| node.num_vals_below_bucket(idx))
        });

        let mut separator = vec![0u8; layout.key_width()];
        let mut left_summary = vec![0u8; summary_width];
        let mut right_summary = vec![0u8; summary_width];
        let outcome = node.with_data_mut(|node_buf| {
            right.with_data_mut(|right_buf| {
                let outcome = if is_leaf_page(node_buf) {
                    let mut left = LeafNodeCursor::new(&mut *node_buf, &layout);
                    split_node(&mut left, right_buf, &mut separator, true)
                } else {
                    let mut left = InteriorNodeCursor::new(&mut *node_buf, &layout);
                    split_node(&mut left, right_buf, &mut separator, false)
                };
                if let Some(monoid) = monoid {
                    node_product(node_buf, &layout, monoid, &mut left_summary);
                    if outcome.even {
                        node_product(right_buf, &layout, monoid, &mut right_summary);
                    }
                }
                outcome
            })
        });
        node.touch()?;
        right.touch()?;

        parent.with_data_mut(|data| {
            let mut parent = InteriorNodeCursor::new(data, &layout);
            parent.insert_new_bucket_at(idx + 1);
            parent.set_num_vals_below_bucket(idx, outcome.left_count);
            if let Some(old_below) = old_below {
                parent.set_num_vals_below_bucket(idx + 1, old_below - outcome.left_count);
            }
            parent.separator_mut(idx + 1).copy_from_slice(&separator);
            parent.set_child(idx + 1, right.id());
            if monoid.is_some() {
                parent.set_summary(idx, &left_summary);
                if parent.has_stored_summary(idx + 1) {
                    parent.set_summary(idx + 1, &right_summary);
                }
            }
        });
        parent.touch()?;

        if let Some(largest) = self.largest.as_mut() {
            if largest.page == node.id() {
                largest.page = right.id();
            }
        }
        self.stats.inc_split(outcome.leaf, outcome.even);
        debug!(
            page = node.id().0,
            right = right.id().0,
            parent = parent.id().0,
            leaf = outcome.leaf,
            split_point = outcome.split_point,
            "split btree node"
        );
        Ok(())
    }
}

struct SplitOutcome {
    leaf: bool,
    /// Midpoint split; otherwise only the last bucket of a rightmost node moved.
    even: bool,
    split_point: usize,
    left_count: u32,
}

/// Splits at the midpoint, or just before the last bucket for nodes on the
/// rightmost path so increasing inserts leave their left halves full.
fn split_node<C: NodeCursorMut>(
    node: &mut C,
    right: &mut [u8],
    separator: &mut [u8],
    leaf: bool,
) -> SplitOutcome {
    let even = !node.is_rightmost();
    let split_point = if even {
        node.max_buckets() / 2
    } else {
        node.num_buckets() - 1
    };
    let left_count = node.split(right, split_point, separator);
    SplitOutcome {
        leaf,
        even,
        split_point,
        left_count,
    }
}
