use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Snapshot of B+ tree statistics at a point in time.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BTreeStatsSnapshot {
    /// Inserts appended straight onto the largest-key leaf
    pub fast_path_inserts: u64,
    /// Inserts that walked down from the root
    pub slow_path_inserts: u64,
    /// Splits at the midpoint of a node
    pub even_splits: u64,
    /// Splits that moved only the last bucket of a rightmost node
    pub uneven_splits: u64,
    /// Number of leaf page splits performed
    pub leaf_splits: u64,
    /// Number of interior page splits performed
    pub interior_splits: u64,
    /// Root-to-leaf descents for lookups
    pub searches: u64,
}

/// Thread-safe statistics tracking for B+ tree operations.
#[derive(Default)]
pub struct BTreeStats {
    fast_path_inserts: AtomicU64,
    slow_path_inserts: AtomicU64,
    even_splits: AtomicU64,
    uneven_splits: AtomicU64,
    leaf_splits: AtomicU64,
    interior_splits: AtomicU64,
    searches: AtomicU64,
}

impl BTreeStats {
    /// Returns the number of inserts served by the rightmost-append fast path.
    pub fn fast_path_inserts(&self) -> u64 {
        self.fast_path_inserts.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of inserts that descended from the root.
    pub fn slow_path_inserts(&self) -> u64 {
        self.slow_path_inserts.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of midpoint splits.
    pub fn even_splits(&self) -> u64 {
        self.even_splits.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of rightmost-path splits.
    pub fn uneven_splits(&self) -> u64 {
        self.uneven_splits.load(AtomicOrdering::Relaxed)
    }

    /// Returns the current count of leaf page splits.
    pub fn leaf_splits(&self) -> u64 {
        self.leaf_splits.load(AtomicOrdering::Relaxed)
    }

    /// Returns the current count of interior page splits.
    pub fn interior_splits(&self) -> u64 {
        self.interior_splits.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of read-only descents.
    pub fn searches(&self) -> u64 {
        self.searches.load(AtomicOrdering::Relaxed)
    }

    pub(crate) fn inc_fast_path_inserts(&self) {
        self.fast_path_inserts.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_slow_path_inserts(&self) {
        self.slow_path_inserts.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_split(&self, leaf: bool, even: bool) {
        if leaf {
            self.leaf_splits.fetch_add(1, AtomicOrdering::Relaxed);
        } else {
            self.interior_splits.fetch_add(1, AtomicOrdering::Relaxed);
        }
        if even {
            self.even_splits.fetch_add(1, AtomicOrdering::Relaxed);
        } else {
            self.uneven_splits.fetch_add(1, AtomicOrdering::Relaxed);
        }
    }

    pub(crate) fn inc_searches(&self) {
        self.searches.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Creates a snapshot of all current statistics.
    pub fn snapshot(&self) -> BTreeStatsSnapshot {
        BTreeStatsSnapshot {
            fast_path_inserts: self.fast_path_inserts(),
            slow_path_inserts: self.slow_path_inserts(),
            even_splits: self.even_splits(),
            uneven_splits: self.uneven_splits(),
            leaf_splits: self.leaf_splits(),
            interior_splits: self.interior_splits(),
            searches: self.searches(),
        }
    }

    /// Emits current statistics to the tracing infrastructure.
    pub fn emit_tracing(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            target: "strata::btree::stats",
            fast_path_inserts = snapshot.fast_path_inserts,
            slow_path_inserts = snapshot.slow_path_inserts,
            even_splits = snapshot.even_splits,
            uneven_splits = snapshot.uneven_splits,
            leaf_splits = snapshot.leaf_splits,
            interior_splits = snapshot.interior_splits,
            searches = snapshot.searches,
            "btree stats snapshot"
        );
    }
}
