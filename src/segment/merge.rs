//! Merge policies
//!
//! A policy looks only at segment metadata and splits the active segments
//! into those kept as they are, those folded into the segment being written,
//! and those dropped outright.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::toc::SegmentMeta;
use super::types::SegmentId;

/// Which merge to run at commit
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeType {
    /// Keep every existing segment
    NoMerge,
    /// Fold the smallest segments while their combined size stays under a
    /// Fibonacci bound
    #[default]
    MergeSmall,
    /// Fold every segment into one
    Optimize,
    /// Drop every existing segment
    Clear,
}

/// Outcome of a merge policy
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergePlan {
    pub keep: Vec<SegmentId>,
    pub merge: Vec<SegmentId>,
    pub discard: Vec<SegmentId>,
}

impl MergePlan {
    pub fn is_noop(&self) -> bool {
        self.merge.is_empty() && self.discard.is_empty()
    }
}

/// fib(1) = 1, fib(2) = 2, fib(n) = fib(n - 1) + fib(n - 2)
pub fn fib(n: usize) -> u64 {
    let (mut a, mut b) = (1u64, 2u64);
    match n {
        0 => 0,
        1 => 1,
        _ => {
            for _ in 2..n {
                let next = a.saturating_add(b);
                a = b;
                b = next;
            }
            b
        }
    }
}

impl MergeType {
    pub fn plan(&self, segments: &[SegmentMeta]) -> MergePlan {
        let mut plan = MergePlan::default();
        match self {
            MergeType::NoMerge => {
                plan.keep = segments.iter().map(|s| s.id).collect();
            }
            MergeType::Clear => {
                plan.discard = segments.iter().map(|s| s.id).collect();
            }
            MergeType::Optimize => {
                for segment in segments {
                    if segment.doc_count() == 0 {
                        plan.discard.push(segment.id);
                    } else {
                        plan.merge.push(segment.id);
                    }
                }
            }
            MergeType::MergeSmall => {
                let mut sorted: Vec<&SegmentMeta> = Vec::with_capacity(segments.len());
                for segment in segments {
                    if segment.doc_count() == 0 {
                        plan.discard.push(segment.id);
                    } else {
                        sorted.push(segment);
                    }
                }
                sorted.sort_by_key(|s| (s.doc_count_all, s.id));

                let mut total = 0u64;
                let mut folding = true;
                for (i, segment) in sorted.into_iter().enumerate() {
                    total += segment.doc_count_all as u64;
                    if folding && total < fib(i + 5) {
                        plan.merge.push(segment.id);
                    } else {
                        folding = false;
                        plan.keep.push(segment.id);
                    }
                }
            }
        }
        debug!(
            policy = ?self,
            keep = plan.keep.len(),
            merge = plan.merge.len(),
            discard = plan.discard.len(),
            "Merge plan"
        );
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roaring::RoaringBitmap;

    fn segments(sizes: &[u32]) -> Vec<SegmentMeta> {
        sizes
            .iter()
            .enumerate()
            .map(|(i, &n)| SegmentMeta::new(SegmentId::new(i as u64), 1, n))
            .collect()
    }

    #[test]
    fn test_fib() {
        let values: Vec<u64> = (1..=8).map(fib).collect();
        assert_eq!(values, vec![1, 2, 3, 5, 8, 13, 21, 34]);
    }

    #[test]
    fn test_merge_small_is_stable_on_fibonacci_sizes() {
        let segs = segments(&[55, 13, 34, 21]);
        let plan = MergeType::MergeSmall.plan(&segs);
        assert!(plan.is_noop());
        assert_eq!(plan.keep.len(), 4);
    }

    #[test]
    fn test_merge_small_folds_small_prefix() {
        let segs = segments(&[100, 1, 2, 1]);
        let plan = MergeType::MergeSmall.plan(&segs);
        assert_eq!(
            plan.merge,
            vec![SegmentId::new(1), SegmentId::new(3), SegmentId::new(2)]
        );
        assert_eq!(plan.keep, vec![SegmentId::new(0)]);
    }

    #[test]
    fn test_merge_small_stops_at_first_break() {
        // running totals 6, 13, 20: 13 >= fib(6) stops folding even though
        // 20 < fib(7)
        let segs = segments(&[7, 6, 7]);
        let plan = MergeType::MergeSmall.plan(&segs);
        assert_eq!(plan.merge, vec![SegmentId::new(1)]);
        assert_eq!(plan.keep, vec![SegmentId::new(0), SegmentId::new(2)]);
    }

    #[test]
    fn test_fully_deleted_segments_are_discarded() {
        let mut segs = segments(&[3, 4]);
        let mut all = RoaringBitmap::new();
        all.insert_range(0..3);
        segs[0].set_deleted(&all).unwrap();

        for policy in [MergeType::MergeSmall, MergeType::Optimize] {
            let plan = policy.plan(&segs);
            assert_eq!(plan.discard, vec![SegmentId::new(0)]);
            assert_eq!(plan.merge, vec![SegmentId::new(1)]);
        }
        assert_eq!(MergeType::NoMerge.plan(&segs).keep.len(), 2);
        assert_eq!(MergeType::Clear.plan(&segs).discard.len(), 2);
    }
}
