//! Strata: a paged B+ tree storage engine.
//!
//! Layers, bottom up:
//!
//! * [`primitives::pager`]: fixed-size page stores (memory, file, overflow) and a
//!   bounded write-back cache in front of any of them;
//! * [`storage::btree`]: an order-statistic B+ tree laid out directly in pages,
//!   with floor/ceiling lookups, ordinal queries and optional monoid summaries.

#![warn(missing_docs)]

pub mod primitives;
pub mod storage;
pub mod types;

pub use primitives::pager::{
    CacheOptions, CachedPage, CachingPageStorage, FilePageStorage, MemoryPageStorage,
    OverflowPageStorage, PageStorage, DEFAULT_PAGE_SIZE,
};
pub use storage::btree::{BTree, BTreeOptions, KeyCodec, Monoid, ValCodec};
pub use types::{PageId, Result, StrataError};
