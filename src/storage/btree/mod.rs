#![forbid(unsafe_code)]

//! Order-statistic B+ tree stored directly in fixed-size pages.

/// Encoding and decoding utilities for keys and values.
pub mod codecs;
/// Page layouts for leaf and interior nodes.
pub mod cursor;
/// Subtree summaries for range aggregation.
pub mod monoid;
mod stats;
mod tree;

pub use codecs::{KeyCodec, ValCodec, ValueEncoding};
pub use monoid::{Monoid, NoSummary, PairCount, ValueMax, ValueMin, ValueSum};
pub use stats::{BTreeStats, BTreeStatsSnapshot};
pub use tree::{BTree, BTreeOptions, VerifyReport};

#[cfg(test)]
mod tests;
