//! Views that interpret a raw page buffer as a B+ tree node.
//!
//! A cursor borrows the page bytes for the duration of one call and keeps no state
//! of its own; the tree attaches a fresh view to whatever page it is visiting.
//!
//! Every node is a sequence of *buckets* separated by *boundary keys*. In a leaf
//! each bucket is one `(key, value)` record whose boundary key is the record's
//! key. In an interior node bucket 0 has the implicit boundary `-inf` and bucket
//! `i > 0` has the separator stored with it. Comparisons treat an index below
//! zero as "query is larger" and an index past the last bucket as "query is
//! smaller", which keeps the binary search free of end-of-array branches.
//!
//! Page layouts (all integers 4-byte big-endian):
//!
//! ```text
//! leaf:     [rightmost][0][unused][unused][buckets] ([key][value])*
//! interior: [rightmost][buckets][child0][summary0]
//!           ([count below previous child][separator][child][summary])*
//! ```
//!
//! The second header integer distinguishes the two kinds: a leaf stores zero
//! there, an interior node always has at least one bucket.

use std::cmp::Ordering;
use std::ops::Range;

use super::monoid::Monoid;
use crate::primitives::bytes::int::{self, INT_LEN};
use crate::types::{Result, StrataError};

mod interior;
mod leaf;

pub use interior::InteriorNodeCursor;
pub use leaf::LeafNodeCursor;

/// Offset of the rightmost flag, shared by both layouts.
pub(crate) const RIGHTMOST_OFFSET: usize = 0;
/// Offset of the integer that is zero for leaves and the bucket count for interior nodes.
pub(crate) const KIND_OFFSET: usize = INT_LEN;

/// Fewest records a leaf must hold for splits to make progress.
pub const MIN_LEAF_BUCKETS: usize = 2;
/// Fewest children an interior node must hold for splits to make progress.
pub const MIN_INTERIOR_BUCKETS: usize = 3;

/// Comparator over encoded keys.
pub type KeyCompare = fn(&[u8], &[u8]) -> Ordering;

/// Widths and capacities shared by every node of one tree.
#[derive(Clone, Copy, Debug)]
pub struct NodeLayout {
    page_size: usize,
    key_width: usize,
    val_width: usize,
    summary_width: usize,
    leaf_max: usize,
    interior_max: usize,
    compare: KeyCompare,
}

impl NodeLayout {
    /// Derives node capacities for the given page size and field widths.
    pub fn new(
        page_size: usize,
        key_width: usize,
        val_width: usize,
        summary_width: usize,
        compare: KeyCompare,
    ) -> Result<Self> {
        if key_width == 0 {
            return Err(StrataError::Invalid("keys must have a non-zero width"));
        }
        let leaf_record = key_width + val_width;
        let leaf_max = page_size.saturating_sub(leaf::HEADER_LEN) / leaf_record;
        let interior_header = interior::FIXED_HEADER_LEN + summary_width;
        let interior_record = 2 * INT_LEN + key_width + summary_width;
        let interior_max = if page_size < interior_header {
            0
        } else {
            1 + (page_size - interior_header) / interior_record
        };
        if leaf_max < MIN_LEAF_BUCKETS {
            return Err(StrataError::Invalid("page too small for two leaf records"));
        }
        if interior_max < MIN_INTERIOR_BUCKETS {
            return Err(StrataError::Invalid("page too small for three interior buckets"));
        }
        Ok(Self {
            page_size,
            key_width,
            val_width,
            summary_width,
            leaf_max,
            interior_max,
            compare,
        })
    }

    /// Page size in bytes.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Encoded key width.
    pub fn key_width(&self) -> usize {
        self.key_width
    }

    /// Encoded value width.
    pub fn val_width(&self) -> usize {
        self.val_width
    }

    /// Encoded summary width, zero when the tree has no monoid.
    pub fn summary_width(&self) -> usize {
        self.summary_width
    }

    /// Records per leaf.
    pub fn leaf_max_buckets(&self) -> usize {
        self.leaf_max
    }

    /// Children per interior node.
    pub fn interior_max_buckets(&self) -> usize {
        self.interior_max
    }

    /// Compares two encoded keys.
    pub fn compare_keys(&self, a: &[u8], b: &[u8]) -> Ordering {
        (self.compare)(a, b)
    }
}

/// Returns true if `page` holds a leaf node.
pub fn is_leaf_page(page: &[u8]) -> bool {
    int::read_u32(page, KIND_OFFSET) == 0
}

/// Read access shared by leaf and interior cursors.
pub trait NodeCursor {
    /// Layout of the tree this node belongs to.
    fn layout(&self) -> &NodeLayout;

    /// Number of buckets currently in the node.
    fn num_buckets(&self) -> usize;

    /// Capacity of this kind of node.
    fn max_buckets(&self) -> usize;

    /// Whether this node lies on the path root -> last child -> ... -> last leaf.
    fn is_rightmost(&self) -> bool;

    /// Whether the node is a leaf.
    fn is_leaf(&self) -> bool;

    /// Explicit boundary key before bucket `idx`, `None` for an implicit `-inf`.
    fn boundary_key(&self, idx: usize) -> Option<&[u8]>;

    /// Values stored below bucket `idx`.
    fn num_vals_below_bucket(&self, idx: usize) -> u32;

    /// Writes the summary of bucket `idx` into `out`.
    fn summary<M: Monoid>(&self, monoid: &M, idx: usize, out: &mut [u8]);

    /// Whether the node holds as many buckets as it can.
    fn is_full(&self) -> bool {
        self.num_buckets() >= self.max_buckets()
    }

    /// Compares `key` against the boundary key of bucket `idx`.
    ///
    /// Indices below zero compare as smaller than any key and indices past the end
    /// as larger than any key.
    fn compare(&self, key: &[u8], idx: isize) -> Ordering {
        if idx < 0 {
            return Ordering::Greater;
        }
        if idx as usize >= self.num_buckets() {
            return Ordering::Less;
        }
        match self.boundary_key(idx as usize) {
            Some(boundary) => self.layout().compare_keys(key, boundary),
            None => Ordering::Greater,
        }
    }

    /// Largest bucket index whose boundary key is `<= key`, or `-1` if there is none.
    fn search(&self, key: &[u8]) -> isize {
        let mut lo: isize = -1;
        let mut hi = self.num_buckets() as isize;
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            if self.compare(key, mid) == Ordering::Less {
                hi = mid;
            } else {
                lo = mid;
            }
        }
        lo
    }

    /// Folds the summaries of `buckets` into `out`, starting from the identity.
    fn summary_product<M: Monoid>(&self, monoid: &M, buckets: Range<usize>, out: &mut [u8]) {
        monoid.identity(out);
        let mut one = vec![0u8; monoid.width()];
        for idx in buckets {
            self.summary(monoid, idx, &mut one);
            monoid.combine(out, &one);
        }
    }
}

/// Structural mutation shared by leaf and interior cursors.
pub trait NodeCursorMut: NodeCursor {
    /// Moves buckets `split_point..` to the front of the fresh page `right`, leaves
    /// `..split_point` in place and writes the least key governing the right half
    /// into `separator_out`. The right half inherits the rightmost flag; the left half
    /// loses it.
    fn move_tail(&mut self, right: &mut [u8], split_point: usize, separator_out: &mut [u8]);

    /// Splits a full node at `split_point` and returns how many values stay on the left.
    ///
    /// # Panics
    ///
    /// Panics if the node is not full or `split_point` would leave either half empty.
    fn split(&mut self, right: &mut [u8], split_point: usize, separator_out: &mut [u8]) -> u32 {
        let buckets = self.num_buckets();
        assert!(self.is_full(), "split of a node that is not full ({buckets} buckets)");
        assert!(
            split_point > 0 && split_point < buckets,
            "split point {split_point} leaves an empty half of {buckets} buckets"
        );
        let left_count = (0..split_point)
            .map(|idx| self.num_vals_below_bucket(idx))
            .sum();
        self.move_tail(right, split_point, separator_out);
        left_count
    }
}
