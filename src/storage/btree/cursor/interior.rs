use super::{NodeCursor, NodeCursorMut, NodeLayout, KIND_OFFSET, RIGHTMOST_OFFSET};
use crate::primitives::bytes::int::{self, INT_LEN};
use crate::storage::btree::monoid::Monoid;
use crate::types::PageId;

const BUCKETS_OFFSET: usize = KIND_OFFSET;
const FIRST_CHILD_OFFSET: usize = 2 * INT_LEN;
const FIRST_SUMMARY_OFFSET: usize = 3 * INT_LEN;
/// Header length before the variable-width first summary.
pub(super) const FIXED_HEADER_LEN: usize = 3 * INT_LEN;

/// View over an interior page.
///
/// Bucket `i` owns child `i`. The number of values below bucket `i` is stored in
/// the record of bucket `i + 1`, so the last bucket never has one; callers derive
/// it from the parent. Summaries are stored for every bucket but the tree only
/// maintains the last one when the node is not on the rightmost path.
pub struct InteriorNodeCursor<'a, B> {
    buf: B,
    layout: &'a NodeLayout,
}

impl<'a, B: AsRef<[u8]>> InteriorNodeCursor<'a, B> {
    /// Attaches to an already initialized interior page.
    pub fn new(buf: B, layout: &'a NodeLayout) -> Self {
        debug_assert!(!super::is_leaf_page(buf.as_ref()), "interior cursor over a leaf page");
        Self { buf, layout }
    }

    fn record_len(&self) -> usize {
        2 * INT_LEN + self.layout.key_width() + self.layout.summary_width()
    }

    /// Start of the record for bucket `idx >= 1`.
    fn record_offset(&self, idx: usize) -> usize {
        debug_assert!(idx >= 1);
        FIXED_HEADER_LEN + self.layout.summary_width() + (idx - 1) * self.record_len()
    }

    fn child_offset(&self, idx: usize) -> usize {
        if idx == 0 {
            FIRST_CHILD_OFFSET
        } else {
            self.record_offset(idx) + INT_LEN + self.layout.key_width()
        }
    }

    fn summary_offset(&self, idx: usize) -> usize {
        if idx == 0 {
            FIRST_SUMMARY_OFFSET
        } else {
            self.record_offset(idx) + 2 * INT_LEN + self.layout.key_width()
        }
    }

    fn count_offset(&self, idx: usize) -> usize {
        let buckets = self.num_buckets();
        assert!(
            idx + 1 < buckets,
            "count of bucket {idx} requested but the last of {buckets} buckets stores none"
        );
        self.record_offset(idx + 1)
    }

    /// Page holding child `idx`.
    pub fn child(&self, idx: usize) -> PageId {
        assert!(idx < self.num_buckets(), "child {idx} out of range");
        PageId(int::read_u32(self.buf.as_ref(), self.child_offset(idx)))
    }

    /// Separator key stored before bucket `idx` (`idx >= 1`).
    pub fn separator(&self, idx: usize) -> &[u8] {
        assert!(idx >= 1 && idx < self.num_buckets(), "separator {idx} out of range");
        let off = self.record_offset(idx) + INT_LEN;
        &self.buf.as_ref()[off..off + self.layout.key_width()]
    }

    /// Stored summary bytes of bucket `idx`.
    pub fn stored_summary(&self, idx: usize) -> &[u8] {
        assert!(idx < self.num_buckets(), "summary {idx} out of range");
        let off = self.summary_offset(idx);
        &self.buf.as_ref()[off..off + self.layout.summary_width()]
    }

    /// Whether the summary of bucket `idx` is maintained.
    ///
    /// Only the last bucket of a rightmost node goes unmaintained.
    pub fn has_stored_summary(&self, idx: usize) -> bool {
        idx + 1 < self.num_buckets() || !self.is_rightmost()
    }
}

impl<'a, B: AsRef<[u8]> + AsMut<[u8]>> InteriorNodeCursor<'a, B> {
    /// Formats `buf` as a new root with a single child.
    pub fn init_root(mut buf: B, layout: &'a NodeLayout, first_child: PageId) -> Self {
        let page = buf.as_mut();
        int::write_flag(page, RIGHTMOST_OFFSET, true);
        int::write_u32(page, BUCKETS_OFFSET, 1);
        int::write_u32(page, FIRST_CHILD_OFFSET, first_child.0);
        page[FIRST_SUMMARY_OFFSET..FIRST_SUMMARY_OFFSET + layout.summary_width()].fill(0);
        Self { buf, layout }
    }

    fn set_num_buckets(&mut self, buckets: usize) {
        int::write_u32(self.buf.as_mut(), BUCKETS_OFFSET, buckets as u32);
    }

    /// Points bucket `idx` at `child`.
    pub fn set_child(&mut self, idx: usize, child: PageId) {
        assert!(idx < self.num_buckets(), "child {idx} out of range");
        let off = self.child_offset(idx);
        int::write_u32(self.buf.as_mut(), off, child.0);
    }

    /// Mutable separator key before bucket `idx` (`idx >= 1`).
    pub fn separator_mut(&mut self, idx: usize) -> &mut [u8] {
        assert!(idx >= 1 && idx < self.num_buckets(), "separator {idx} out of range");
        let off = self.record_offset(idx) + INT_LEN;
        let key_width = self.layout.key_width();
        &mut self.buf.as_mut()[off..off + key_width]
    }

    /// Stores the number of values below bucket `idx`.
    ///
    /// # Panics
    ///
    /// Panics if `idx` is the last bucket.
    pub fn set_num_vals_below_bucket(&mut self, idx: usize, count: u32) {
        let off = self.count_offset(idx);
        int::write_u32(self.buf.as_mut(), off, count);
    }

    /// Overwrites the summary of bucket `idx`.
    pub fn set_summary(&mut self, idx: usize, summary: &[u8]) {
        assert!(idx < self.num_buckets(), "summary {idx} out of range");
        let width = self.layout.summary_width();
        let off = self.summary_offset(idx);
        self.buf.as_mut()[off..off + width].copy_from_slice(&summary[..width]);
    }

    /// Folds `other` into the summary of bucket `idx`.
    pub fn combine_summary<M: Monoid>(&mut self, monoid: &M, idx: usize, other: &[u8]) {
        assert!(idx < self.num_buckets(), "summary {idx} out of range");
        let width = self.layout.summary_width();
        let off = self.summary_offset(idx);
        monoid.combine(&mut self.buf.as_mut()[off..off + width], other);
    }

    /// Opens an empty bucket at `idx`, shifting buckets `idx..` right by one.
    ///
    /// The new record is zeroed. Because the count of bucket `i` lives in record
    /// `i + 1`, the caller must rewrite the counts of buckets `idx - 1` and `idx`
    /// afterwards.
    ///
    /// # Panics
    ///
    /// Panics if the node is full or `idx` is not in `1..=buckets`.
    pub fn insert_new_bucket_at(&mut self, idx: usize) {
        let buckets = self.num_buckets();
        assert!(!self.is_full(), "insert into a full interior node");
        assert!(idx >= 1 && idx <= buckets, "bucket insert at {idx} outside 1..={buckets}");
        let record_len = self.record_len();
        let start = self.record_offset(idx);
        let end = self.record_offset(buckets);
        let page = self.buf.as_mut();
        page.copy_within(start..end, start + record_len);
        page[start..start + record_len].fill(0);
        self.set_num_buckets(buckets + 1);
    }
}

impl<B: AsRef<[u8]>> NodeCursor for InteriorNodeCursor<'_, B> {
    fn layout(&self) -> &NodeLayout {
        self.layout
    }

    fn num_buckets(&self) -> usize {
        int::read_u32(self.buf.as_ref(), BUCKETS_OFFSET) as usize
    }

    fn max_buckets(&self) -> usize {
        self.layout.interior_max_buckets()
    }

    fn is_rightmost(&self) -> bool {
        int::read_flag(self.buf.as_ref(), RIGHTMOST_OFFSET)
    }

    fn is_leaf(&self) -> bool {
        false
    }

    fn boundary_key(&self, idx: usize) -> Option<&[u8]> {
        if idx == 0 {
            None
        } else {
            Some(self.separator(idx))
        }
    }

    fn num_vals_below_bucket(&self, idx: usize) -> u32 {
        int::read_u32(self.buf.as_ref(), self.count_offset(idx))
    }

    fn summary<M: Monoid>(&self, _monoid: &M, idx: usize, out: &mut [u8]) {
        out[..self.layout.summary_width()].copy_from_slice(self.stored_summary(idx));
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> NodeCursorMut for InteriorNodeCursor<'_, B> {
    fn move_tail(&mut self, right: &mut [u8], split_point: usize, separator_out: &mut [u8]) {
        let buckets = self.num_buckets();
        let rightmost = self.is_rightmost();
        let summary_width = self.layout.summary_width();
        separator_out[..self.layout.key_width()].copy_from_slice(self.separator(split_point));

        let mut tail = InteriorNodeCursor::init_root(&mut *right, self.layout, self.child(split_point));
        int::write_flag(&mut *tail.buf, RIGHTMOST_OFFSET, rightmost);
        tail.buf[FIRST_SUMMARY_OFFSET..FIRST_SUMMARY_OFFSET + summary_width]
            .copy_from_slice(self.stored_summary(split_point));
        if split_point + 1 < buckets {
            let start = self.record_offset(split_point + 1);
            let end = self.record_offset(buckets);
            let dest = tail.record_offset(1);
            tail.buf[dest..dest + (end - start)].copy_from_slice(&self.buf.as_ref()[start..end]);
        }
        tail.set_num_buckets(buckets - split_point);

        int::write_flag(self.buf.as_mut(), RIGHTMOST_OFFSET, false);
        self.set_num_buckets(split_point);
    }
}
