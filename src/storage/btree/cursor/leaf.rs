use super::{NodeCursor, NodeCursorMut, NodeLayout, KIND_OFFSET, RIGHTMOST_OFFSET};
use crate::primitives::bytes::int::{self, INT_LEN};
use crate::storage::btree::monoid::Monoid;

const UNUSED_A_OFFSET: usize = 2 * INT_LEN;
const UNUSED_B_OFFSET: usize = 3 * INT_LEN;
const BUCKETS_OFFSET: usize = 4 * INT_LEN;
pub(super) const HEADER_LEN: usize = 5 * INT_LEN;

/// View over a leaf page: sorted `(key, value)` records.
pub struct LeafNodeCursor<'a, B> {
    buf: B,
    layout: &'a NodeLayout,
}

impl<'a, B: AsRef<[u8]>> LeafNodeCursor<'a, B> {
    /// Attaches to an already initialized leaf page.
    pub fn new(buf: B, layout: &'a NodeLayout) -> Self {
        debug_assert!(super::is_leaf_page(buf.as_ref()), "leaf cursor over an interior page");
        Self { buf, layout }
    }

    fn record_offset(&self, idx: usize) -> usize {
        HEADER_LEN + idx * (self.layout.key_width() + self.layout.val_width())
    }

    /// Encoded key of record `idx`.
    pub fn key(&self, idx: usize) -> &[u8] {
        assert!(idx < self.num_buckets(), "leaf key {idx} out of range");
        let off = self.record_offset(idx);
        &self.buf.as_ref()[off..off + self.layout.key_width()]
    }

    /// Encoded value of record `idx`.
    pub fn val(&self, idx: usize) -> &[u8] {
        assert!(idx < self.num_buckets(), "leaf value {idx} out of range");
        let off = self.record_offset(idx) + self.layout.key_width();
        &self.buf.as_ref()[off..off + self.layout.val_width()]
    }
}

impl<'a, B: AsRef<[u8]> + AsMut<[u8]>> LeafNodeCursor<'a, B> {
    /// Formats `buf` as an empty leaf.
    pub fn init(mut buf: B, layout: &'a NodeLayout, rightmost: bool) -> Self {
        let page = buf.as_mut();
        int::write_flag(page, RIGHTMOST_OFFSET, rightmost);
        int::write_u32(page, KIND_OFFSET, 0);
        int::write_u32(page, UNUSED_A_OFFSET, 0);
        int::write_u32(page, UNUSED_B_OFFSET, 0);
        int::write_u32(page, BUCKETS_OFFSET, 0);
        Self { buf, layout }
    }

    fn set_num_buckets(&mut self, buckets: usize) {
        int::write_u32(self.buf.as_mut(), BUCKETS_OFFSET, buckets as u32);
    }

    /// Inserts a record at `idx`, shifting later records right.
    ///
    /// # Panics
    ///
    /// Panics if the leaf is full or `idx` is past the end.
    pub fn insert_val(&mut self, idx: usize, key: &[u8], val: &[u8]) {
        let buckets = self.num_buckets();
        assert!(!self.is_full(), "insert into a full leaf");
        assert!(idx <= buckets, "leaf insert at {idx} past {buckets} records");
        let key_width = self.layout.key_width();
        let val_width = self.layout.val_width();
        let start = self.record_offset(idx);
        let end = self.record_offset(buckets);
        let page = self.buf.as_mut();
        page.copy_within(start..end, start + key_width + val_width);
        page[start..start + key_width].copy_from_slice(&key[..key_width]);
        page[start + key_width..start + key_width + val_width].copy_from_slice(&val[..val_width]);
        self.set_num_buckets(buckets + 1);
    }

    /// Overwrites the value of record `idx` and returns the previous bytes.
    pub fn set_val(&mut self, idx: usize, val: &[u8]) -> Vec<u8> {
        let old = self.val(idx).to_vec();
        let val_width = self.layout.val_width();
        let off = self.record_offset(idx) + self.layout.key_width();
        self.buf.as_mut()[off..off + val_width].copy_from_slice(&val[..val_width]);
        old
    }
}

impl<B: AsRef<[u8]>> NodeCursor for LeafNodeCursor<'_, B> {
    fn layout(&self) -> &NodeLayout {
        self.layout
    }

    fn num_buckets(&self) -> usize {
        int::read_u32(self.buf.as_ref(), BUCKETS_OFFSET) as usize
    }

    fn max_buckets(&self) -> usize {
        self.layout.leaf_max_buckets()
    }

    fn is_rightmost(&self) -> bool {
        int::read_flag(self.buf.as_ref(), RIGHTMOST_OFFSET)
    }

    fn is_leaf(&self) -> bool {
        true
    }

    fn boundary_key(&self, idx: usize) -> Option<&[u8]> {
        Some(self.key(idx))
    }

    fn num_vals_below_bucket(&self, idx: usize) -> u32 {
        u32::from(idx < self.num_buckets())
    }

    fn summary<M: Monoid>(&self, monoid: &M, idx: usize, out: &mut [u8]) {
        monoid.summarize(self.key(idx), self.val(idx), out);
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> NodeCursorMut for LeafNodeCursor<'_, B> {
    fn move_tail(&mut self, right: &mut [u8], split_point: usize, separator_out: &mut [u8]) {
        let buckets = self.num_buckets();
        let rightmost = self.is_rightmost();
        let key_width = self.layout.key_width();
        let start = self.record_offset(split_point);
        let end = self.record_offset(buckets);
        separator_out[..key_width].copy_from_slice(self.key(split_point));

        let mut tail = LeafNodeCursor::init(&mut *right, self.layout, rightmost);
        tail.buf[HEADER_LEN..HEADER_LEN + (end - start)]
            .copy_from_slice(&self.buf.as_ref()[start..end]);
        tail.set_num_buckets(buckets - split_point);

        int::write_flag(self.buf.as_mut(), RIGHTMOST_OFFSET, false);
        self.set_num_buckets(split_point);
    }
}
