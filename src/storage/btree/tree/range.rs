//! Key-range counting and aggregation.

use std::cmp::Ordering;
use std::ops::{Bound, RangeBounds};

use super::BTree;
use crate::storage::btree::codecs::{encoded_key, KeyCodec, ValCodec};
use crate::storage::btree::cursor::{
    is_leaf_page, InteriorNodeCursor, LeafNodeCursor, NodeCursor, NodeLayout,
};
use crate::storage::btree::monoid::Monoid;
use crate::types::{PageId, Result};

/// Encodes both ends of `range`.
pub(super) fn encode_bounds<K: KeyCodec, R: RangeBounds<K>>(range: &R) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
    let encode = |bound: Bound<&K>| match bound {
        Bound::Included(key) => Bound::Included(encoded_key(key)),
        Bound::Excluded(key) => Bound::Excluded(encoded_key(key)),
        Bound::Unbounded => Bound::Unbounded,
    };
    (encode(range.start_bound()), encode(range.end_bound()))
}

/// Whether `key` and everything above it clears the lower bound.
fn above_lower(layout: &NodeLayout, lower: &Bound<Vec<u8>>, key: &[u8]) -> bool {
    match lower {
        Bound::Included(bound) => layout.compare_keys(key, bound) != Ordering::Less,
        Bound::Excluded(bound) => layout.compare_keys(key, bound) == Ordering::Greater,
        Bound::Unbounded => true,
    }
}

/// Whether `key` and everything below it clears the upper bound.
fn below_upper(layout: &NodeLayout, upper: &Bound<Vec<u8>>, key: &[u8]) -> bool {
    match upper {
        Bound::Included(bound) => layout.compare_keys(key, bound) != Ordering::Greater,
        Bound::Excluded(bound) => layout.compare_keys(key, bound) == Ordering::Less,
        Bound::Unbounded => true,
    }
}

/// Whether `limit` is at or below the key of `bound`.
fn limit_at_or_below(layout: &NodeLayout, limit: &[u8], bound: &Bound<Vec<u8>>) -> bool {
    match bound {
        Bound::Included(bound) | Bound::Excluded(bound) => {
            layout.compare_keys(limit, bound) != Ordering::Greater
        }
        Bound::Unbounded => false,
    }
}

/// Subtree still to aggregate, and which bounds can still cut it.
struct Pending {
    page: PageId,
    check_lower: bool,
    check_upper: bool,
}

impl<K: KeyCodec, V: ValCodec, M: Monoid> BTree<K, V, M> {
    /// Number of keys that fall below the lower bound.
    pub(super) fn rank_of_lower(&self, lower: &Bound<Vec<u8>>) -> Result<usize> {
        Ok(match lower {
            Bound::Included(key) => self.locate_key(key)?.rank_lt(),
            Bound::Excluded(key) => self.locate_key(key)?.rank_le(),
            Bound::Unbounded => 0,
        })
    }

    /// Number of keys that satisfy the upper bound.
    pub(super) fn rank_of_upper(&self, upper: &Bound<Vec<u8>>) -> Result<usize> {
        Ok(match upper {
            Bound::Included(key) => self.locate_key(key)?.rank_le(),
            Bound::Excluded(key) => self.locate_key(key)?.rank_lt(),
            Bound::Unbounded => self.size,
        })
    }

    /// Folds stored summaries of buckets that lie wholly inside the bounds and
    /// descends into the rest. Only the two boundary paths and unstored rightmost
    /// buckets are opened.
    pub(super) fn summarize_encoded(
        &self,
        monoid: &M,
        lower: &Bound<Vec<u8>>,
        upper: &Bound<Vec<u8>>,
    ) -> Result<Vec<u8>> {
        let layout = &self.layout;
        let mut acc = vec![0u8; monoid.width()];
        monoid.identity(&mut acc);
        let mut one = vec![0u8; monoid.width()];
        let mut stack = vec![Pending {
            page: self.root,
            check_lower: true,
            check_upper: true,
        }];
        while let Some(pending) = stack.pop() {
            let page = self.store.get_page(pending.page, true)?;
            page.with_data(|data| {
                if is_leaf_page(data) {
                    let leaf = LeafNodeCursor::new(data, layout);
                    for idx in 0..leaf.num_buckets() {
                        let key = leaf.key(idx);
                        if (!pending.check_lower || above_lower(layout, lower, key))
                            && (!pending.check_upper || below_upper(layout, upper, key))
                        {
                            leaf.summary(monoid, idx, &mut one);
                            monoid.combine(&mut acc, &one);
                        }
                    }
                    return;
                }
                let node = InteriorNodeCursor::new(data, layout);
                let buckets = node.num_buckets();
                for idx in 0..buckets {
                    let floor = node.boundary_key(idx);
                    let limit = (idx + 1 < buckets).then(|| node.separator(idx + 1));
                    if pending.check_upper {
                        if let Some(floor) = floor {
                            if !below_upper(layout, upper, floor) {
                                break;
                            }
                        }
                    }
                    if pending.check_lower {
                        if let Some(limit) = limit {
                            if limit_at_or_below(layout, limit, lower) {
                                continue;
                            }
                        }
                    }
                    let lower_clear = !pending.check_lower
                        || floor.is_some_and(|floor| above_lower(layout, lower, floor))
                        || matches!(lower, Bound::Unbounded);
                    let upper_clear = !pending.check_upper
                        || limit.is_some_and(|limit| limit_at_or_below(layout, limit, upper))
                        || matches!(upper, Bound::Unbounded);
                    if lower_clear && upper_clear && node.has_stored_summary(idx) {
                        monoid.combine(&mut acc, node.stored_summary(idx));
                    } else {
                        stack.push(Pending {
                            page: node.child(idx),
                            check_lower: !lower_clear,
                            check_upper: !upper_clear,
                        });
                    }
                }
            });
        }
        Ok(acc)
    }
}
