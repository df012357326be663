//! Subtree summaries.
//!
//! A [`Monoid`] turns every `(key, value)` pair into a fixed-width summary and
//! combines summaries associatively. Interior nodes keep one summary per child so
//! any contiguous key range can be aggregated in logarithmic time. Once a leaf
//! accepts a new pair, its summary is folded into each ancestor's stored summary
//! out of key order, so the combine step must also be commutative;
//! [`BTree::new`](super::BTree::new) rejects monoids that do not declare it.

use super::codecs::ValueEncoding;
use crate::primitives::bytes::ord;
use crate::types::{Result, StrataError};

/// An associative combine over fixed-width summaries of `(key, value)` pairs.
///
/// All methods work on encoded bytes, the same representation the pages store.
pub trait Monoid: Send + Sync {
    /// Decoded summary handed back to callers.
    type Summary;

    /// Encoded width of one summary.
    fn width(&self) -> usize;

    /// Whether `combine` is commutative. Only commutative monoids are accepted.
    fn is_commutative(&self) -> bool;

    /// Writes the identity element into `out`.
    fn identity(&self, out: &mut [u8]);

    /// Writes the summary of a single encoded pair into `out`.
    fn summarize(&self, key: &[u8], val: &[u8], out: &mut [u8]);

    /// Folds `other` into `acc`.
    fn combine(&self, acc: &mut [u8], other: &[u8]);

    /// Decodes a summary.
    fn decode(&self, src: &[u8]) -> Result<Self::Summary>;

    /// Checks the monoid can read pairs with the given key width and value layout.
    fn validate(&self, key_width: usize, val_width: usize, val_encoding: ValueEncoding) -> Result<()> {
        let _ = (key_width, val_width, val_encoding);
        Ok(())
    }
}

/// Placeholder monoid type for trees without summaries. It has no values.
#[derive(Debug, Clone, Copy)]
pub enum NoSummary {}

impl Monoid for NoSummary {
    type Summary = ();

    fn width(&self) -> usize {
        match *self {}
    }

    fn is_commutative(&self) -> bool {
        match *self {}
    }

    fn identity(&self, _out: &mut [u8]) {
        match *self {}
    }

    fn summarize(&self, _key: &[u8], _val: &[u8], _out: &mut [u8]) {
        match *self {}
    }

    fn combine(&self, _acc: &mut [u8], _other: &[u8]) {
        match *self {}
    }

    fn decode(&self, _src: &[u8]) -> Result<Self::Summary> {
        match *self {}
    }
}

const U64_LEN: usize = 8;

/// Value monoids read values in place, so only plain big-endian `u64` values qualify.
fn require_u64_values(val_width: usize, val_encoding: ValueEncoding) -> Result<()> {
    if val_width != U64_LEN {
        return Err(StrataError::Invalid("monoid expects 8-byte u64 values"));
    }
    if val_encoding != ValueEncoding::UnsignedBe {
        return Err(StrataError::Invalid("monoid expects unsigned big-endian values"));
    }
    Ok(())
}

/// Wrapping sum of `u64` values.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueSum;

impl Monoid for ValueSum {
    type Summary = u64;

    fn width(&self) -> usize {
        U64_LEN
    }

    fn is_commutative(&self) -> bool {
        true
    }

    fn identity(&self, out: &mut [u8]) {
        ord::put_u64_be(out, 0);
    }

    fn summarize(&self, _key: &[u8], val: &[u8], out: &mut [u8]) {
        out[..U64_LEN].copy_from_slice(&val[..U64_LEN]);
    }

    fn combine(&self, acc: &mut [u8], other: &[u8]) {
        let sum = ord::get_u64_be(acc).wrapping_add(ord::get_u64_be(other));
        ord::put_u64_be(acc, sum);
    }

    fn decode(&self, src: &[u8]) -> Result<u64> {
        Ok(ord::get_u64_be(src))
    }

    fn validate(&self, _key_width: usize, val_width: usize, val_encoding: ValueEncoding) -> Result<()> {
        require_u64_values(val_width, val_encoding)
    }
}

/// Largest `u64` value; the identity is `0`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueMax;

impl Monoid for ValueMax {
    type Summary = u64;

    fn width(&self) -> usize {
        U64_LEN
    }

    fn is_commutative(&self) -> bool {
        true
    }

    fn identity(&self, out: &mut [u8]) {
        ord::put_u64_be(out, 0);
    }

    fn summarize(&self, _key: &[u8], val: &[u8], out: &mut [u8]) {
        out[..U64_LEN].copy_from_slice(&val[..U64_LEN]);
    }

    fn combine(&self, acc: &mut [u8], other: &[u8]) {
        let max = ord::get_u64_be(acc).max(ord::get_u64_be(other));
        ord::put_u64_be(acc, max);
    }

    fn decode(&self, src: &[u8]) -> Result<u64> {
        Ok(ord::get_u64_be(src))
    }

    fn validate(&self, _key_width: usize, val_width: usize, val_encoding: ValueEncoding) -> Result<()> {
        require_u64_values(val_width, val_encoding)
    }
}

/// Smallest `u64` value; the identity is `u64::MAX`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueMin;

impl Monoid for ValueMin {
    type Summary = u64;

    fn width(&self) -> usize {
        U64_LEN
    }

    fn is_commutative(&self) -> bool {
        true
    }

    fn identity(&self, out: &mut [u8]) {
        ord::put_u64_be(out, u64::MAX);
    }

    fn summarize(&self, _key: &[u8], val: &[u8], out: &mut [u8]) {
        out[..U64_LEN].copy_from_slice(&val[..U64_LEN]);
    }

    fn combine(&self, acc: &mut [u8], other: &[u8]) {
        let min = ord::get_u64_be(acc).min(ord::get_u64_be(other));
        ord::put_u64_be(acc, min);
    }

    fn decode(&self, src: &[u8]) -> Result<u64> {
        Ok(ord::get_u64_be(src))
    }

    fn validate(&self, _key_width: usize, val_width: usize, val_encoding: ValueEncoding) -> Result<()> {
        require_u64_values(val_width, val_encoding)
    }
}

/// Number of pairs, independent of key and value types.
#[derive(Debug, Clone, Copy, Default)]
pub struct PairCount;

impl Monoid for PairCount {
    type Summary = u64;

    fn width(&self) -> usize {
        U64_LEN
    }

    fn is_commutative(&self) -> bool {
        true
    }

    fn identity(&self, out: &mut [u8]) {
        ord::put_u64_be(out, 0);
    }

    fn summarize(&self, _key: &[u8], _val: &[u8], out: &mut [u8]) {
        ord::put_u64_be(out, 1);
    }

    fn combine(&self, acc: &mut [u8], other: &[u8]) {
        let sum = ord::get_u64_be(acc) + ord::get_u64_be(other);
        ord::put_u64_be(acc, sum);
    }

    fn decode(&self, src: &[u8]) -> Result<u64> {
        Ok(ord::get_u64_be(src))
    }
}
