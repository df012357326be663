//! Data structures persisted in pages.

/// B-tree data structure implementation.
///
/// Ordered key/value storage with ordinal lookups and monoid range summaries.
pub mod btree;
