//! Building blocks below the tree: integer encoders, positioned file access
//! and the page stores.

/// Order-preserving integer encoders and the 4-byte header integers of node pages.
pub mod bytes;

/// Positioned reads and writes over a single file.
pub mod io;

/// Page stores and the bounded write-back cache in front of them.
pub mod pager;
