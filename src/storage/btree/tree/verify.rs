use std::cmp::Ordering;

use super::BTree;
use crate::storage::btree::codecs::{KeyCodec, ValCodec};
use crate::storage::btree::cursor::{
    is_leaf_page, InteriorNodeCursor, LeafNodeCursor, NodeCursor, NodeLayout,
};
use crate::storage::btree::monoid::Monoid;
use crate::types::{PageId, Result};

/// Result of a structural check over every page of a tree.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Leaf pages reached from the root.
    pub leaf_pages: u64,
    /// Interior pages reached from the root.
    pub interior_pages: u64,
    /// Levels from the root down to the leaves.
    pub depth: u32,
    /// Pairs found in leaves.
    pub entries: u64,
    /// Human-readable description of every violated invariant.
    pub findings: Vec<String>,
}

impl VerifyReport {
    /// Whether no invariant was violated.
    pub fn is_ok(&self) -> bool {
        self.findings.is_empty()
    }
}

/// A node to check, with what its parent says about it.
struct Frame {
    page: PageId,
    /// Least key the subtree may hold, and must hold when set.
    lower: Option<Vec<u8>>,
    /// Every key must be strictly below this.
    upper: Option<Vec<u8>>,
    count: Option<u64>,
    summary: Option<Vec<u8>>,
    rightmost: bool,
    depth: u32,
}

struct NodeCheck<'a, M> {
    layout: &'a NodeLayout,
    monoid: Option<&'a M>,
    report: &'a mut VerifyReport,
    leaf_depth: &'a mut Option<u32>,
}

impl<M: Monoid> NodeCheck<'_, M> {
    fn finding(&mut self, page: PageId, message: impl std::fmt::Display) {
        self.report.findings.push(format!("page {page}: {message}"));
    }

    fn check_product<C: NodeCursor>(&mut self, page: PageId, node: &C, frame: &Frame) {
        let (Some(monoid), Some(expected)) = (self.monoid, frame.summary.as_deref()) else {
            return;
        };
        let mut product = vec![0u8; monoid.width()];
        node.summary_product(monoid, 0..node.num_buckets(), &mut product);
        if product != expected {
            self.finding(page, "stored summary differs from subtree product");
        }
    }

    fn leaf(&mut self, frame: &Frame, data: &[u8]) {
        let page = frame.page;
        let leaf = LeafNodeCursor::new(data, self.layout);
        let buckets = leaf.num_buckets();
        self.report.leaf_pages += 1;
        self.report.entries += buckets as u64;
        let seen_depth = *self.leaf_depth;
        match seen_depth {
            Some(depth) if depth != frame.depth => {
                self.finding(page, format_args!("leaf at depth {} instead of {depth}", frame.depth))
            }
            Some(_) => {}
            None => *self.leaf_depth = Some(frame.depth),
        }
        if leaf.is_rightmost() != frame.rightmost {
            self.finding(page, "rightmost flag disagrees with position");
        }
        if buckets > leaf.max_buckets() {
            self.finding(page, format_args!("{buckets} records exceed capacity"));
        }
        if let Some(count) = frame.count {
            if count != buckets as u64 {
                self.finding(page, format_args!("parent counts {count} values, leaf has {buckets}"));
            }
        }
        for idx in 1..buckets {
            if self.layout.compare_keys(leaf.key(idx - 1), leaf.key(idx)) != Ordering::Less {
                self.finding(page, format_args!("record {idx} out of order"));
            }
        }
        if let Some(lower) = frame.lower.as_deref() {
            if buckets == 0 || self.layout.compare_keys(leaf.key(0), lower) != Ordering::Equal {
                self.finding(page, "first key differs from its separator");
            }
        }
        if let Some(upper) = frame.upper.as_deref().filter(|_| buckets > 0) {
            if self.layout.compare_keys(leaf.key(buckets - 1), upper) != Ordering::Less {
                self.finding(page, "last key not below the next separator");
            }
        }
        self.check_product(page, &leaf, frame);
    }

    fn interior(&mut self, frame: &Frame, data: &[u8]) -> Vec<Frame> {
        let page = frame.page;
        let node = InteriorNodeCursor::new(data, self.layout);
        let buckets = node.num_buckets();
        self.report.interior_pages += 1;
        if node.is_rightmost() != frame.rightmost {
            self.finding(page, "rightmost flag disagrees with position");
        }
        if buckets > node.max_buckets() {
            self.finding(page, format_args!("{buckets} buckets exceed capacity"));
        }
        for idx in 2..buckets {
            if self.layout.compare_keys(node.separator(idx - 1), node.separator(idx)) != Ordering::Less {
                self.finding(page, format_args!("separator {idx} out of order"));
            }
        }
        if buckets > 1 {
            if let Some(lower) = frame.lower.as_deref() {
                if self.layout.compare_keys(node.separator(1), lower) != Ordering::Greater {
                    self.finding(page, "first separator not above the subtree floor");
                }
            }
            if let Some(upper) = frame.upper.as_deref() {
                if self.layout.compare_keys(node.separator(buckets - 1), upper) != Ordering::Less {
                    self.finding(page, "last separator not below the subtree limit");
                }
            }
        }
        self.check_product(page, &node, frame);

        let stored: u64 = (0..buckets.saturating_sub(1))
            .map(|idx| u64::from(node.num_vals_below_bucket(idx)))
            .sum();
        let last_count = match frame.count {
            Some(count) if count < stored => {
                self.finding(page, format_args!("bucket counts {stored} exceed parent count {count}"));
                None
            }
            Some(count) => Some(count - stored),
            None => None,
        };
        (0..buckets)
            .map(|idx| {
                let last = idx + 1 == buckets;
                Frame {
                    page: node.child(idx),
                    lower: match idx {
                        0 => frame.lower.clone(),
                        _ => Some(node.separator(idx).to_vec()),
                    },
                    upper: if last {
                        frame.upper.clone()
                    } else {
                        Some(node.separator(idx + 1).to_vec())
                    },
                    count: if last {
                        last_count
                    } else {
                        Some(u64::from(node.num_vals_below_bucket(idx)))
                    },
                    summary: (self.monoid.is_some() && node.has_stored_summary(idx))
                        .then(|| node.stored_summary(idx).to_vec()),
                    rightmost: frame.rightmost && last,
                    depth: frame.depth + 1,
                }
            })
            .collect()
    }
}

impl<K: KeyCodec, V: ValCodec, M: Monoid> BTree<K, V, M> {
    /// Walks every page reachable from the root and checks ordering, counts,
    /// summaries, rightmost flags and leaf depth.
    ///
    /// Violations are collected in the report; only storage errors fail the call.
    pub fn verify(&self) -> Result<VerifyReport> {
        let mut report = VerifyReport::default();
        let mut leaf_depth = None;
        let mut stack = vec![Frame {
            page: self.root,
            lower: None,
            upper: None,
            count: Some(self.size as u64),
            summary: None,
            rightmost: true,
            depth: 1,
        }];
        while let Some(frame) = stack.pop() {
            let page = self.store.get_page(frame.page, true)?;
            let mut check = NodeCheck {
                layout: &self.layout,
                monoid: self.monoid.as_ref(),
                report: &mut report,
                leaf_depth: &mut leaf_depth,
            };
            let children = page.with_data(|data| {
                if is_leaf_page(data) {
                    check.leaf(&frame, data);
                    Vec::new()
                } else {
                    check.interior(&frame, data)
                }
            });
            stack.extend(children.into_iter().rev());
        }
        report.depth = leaf_depth.unwrap_or(1);
        if report.entries != self.size as u64 {
            report
                .findings
                .push(format!("leaves hold {} pairs, tree reports {}", report.entries, self.size));
        }
        Ok(report)
    }
}
