//! Reciprocal Rank Fusion: score = Σ 1/(k + rank_i)
//!
//! Combines the semantic and lexical rankings without normalising their raw
//! scores. Ranks are 1-based within each list.

use std::collections::HashMap;

use super::ChunkId;

/// A chunk after fusion.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedCandidate {
    pub id: ChunkId,
    pub score: f64,
    pub semantic_rank: Option<usize>,
    pub lexical_rank: Option<usize>,
}

impl FusedCandidate {
    /// Lowest (best) rank across the lists the chunk appeared in.
    pub fn best_rank(&self) -> usize {
        match (self.semantic_rank, self.lexical_rank) {
            (Some(s), Some(l)) => s.min(l),
            (Some(r), None) | (None, Some(r)) => r,
            (None, None) => usize::MAX,
        }
    }
}

/// One RRF term for a 1-based `rank`.
pub fn rrf_term(k: f64, rank: usize) -> f64 {
    1.0 / (k + rank as f64)
}

/// Fuse the semantic and lexical rankings.
///
/// Output is sorted by fused score descending, then best individual rank,
/// then chunk id, so identical inputs always give identical output. A chunk
/// repeated within one list only counts at its first position.
pub fn reciprocal_rank_fusion(semantic: &[ChunkId], lexical: &[ChunkId], k: f64) -> Vec<FusedCandidate> {
    let mut fused: HashMap<&ChunkId, FusedCandidate> = HashMap::new();

    for (i, id) in semantic.iter().enumerate() {
        let rank = i + 1;
        let entry = fused.entry(id).or_insert_with(|| FusedCandidate {
            id: id.clone(),
            score: 0.0,
            semantic_rank: None,
            lexical_rank: None,
        });
        if entry.semantic_rank.is_none() {
            entry.semantic_rank = Some(rank);
            entry.score += rrf_term(k, rank);
        }
    }

    for (i, id) in lexical.iter().enumerate() {
        let rank = i + 1;
        let entry = fused.entry(id).or_insert_with(|| FusedCandidate {
            id: id.clone(),
            score: 0.0,
            semantic_rank: None,
            lexical_rank: None,
        });
        if entry.lexical_rank.is_none() {
            entry.lexical_rank = Some(rank);
            entry.score += rrf_term(k, rank);
        }
    }

    let mut candidates: Vec<FusedCandidate> = fused.into_values().collect();
    candidates.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.best_rank().cmp(&b.best_rank()))
            .then_with(|| a.id.cmp(&b.id))
    });
    candidates
}

/// Lost-in-the-middle reorder of a best-first list.
///
/// Places the 1st item first, the 2nd last, the 3rd second, the 4th
/// second-to-last, and so on, so the strongest evidence sits at both edges.
/// Membership is unchanged.
pub fn edge_interleave<T>(ranked: Vec<T>) -> Vec<T> {
    let n = ranked.len();
    let mut slots: Vec<Option<T>> = (0..n).map(|_| None).collect();
    let mut left = 0;
    let mut right = n.saturating_sub(1);

    for (i, item) in ranked.into_iter().enumerate() {
        if i % 2 == 0 {
            slots[left] = Some(item);
            left += 1;
        } else {
            slots[right] = Some(item);
            right = right.saturating_sub(1);
        }
    }

    slots.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<ChunkId> {
        names.iter().map(|n| ChunkId::from(*n)).collect()
    }

    #[test]
    fn test_single_list_first_rank_score() {
        let fused = reciprocal_rank_fusion(&ids(&["a"]), &[], 60.0);
        assert_eq!(fused.len(), 1);
        assert!((fused[0].score - 1.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn test_chunk_in_both_lists_ranks_above_single_list() {
        // "a" is 1st semantically only; "b" is 1st in lexical and 2nd semantically.
        let fused = reciprocal_rank_fusion(&ids(&["a", "b"]), &ids(&["b"]), 60.0);
        assert_eq!(fused[0].id.as_str(), "b");
        assert!((fused[0].score - (1.0 / 62.0 + 1.0 / 61.0)).abs() < 1e-12);
        assert!((fused[1].score - 1.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn test_first_in_both_lists_scores_double() {
        let fused = reciprocal_rank_fusion(&ids(&["x", "a"]), &ids(&["x"]), 60.0);
        assert_eq!(fused[0].id.as_str(), "x");
        assert!((fused[0].score - 2.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn test_ties_break_by_best_rank_then_id() {
        // "s" is semantic rank 1, "l" is lexical rank 1: equal scores, equal best rank.
        // "z" is semantic rank 2 and "m" lexical rank 2.
        let fused = reciprocal_rank_fusion(&ids(&["s", "z"]), &ids(&["l", "m"]), 60.0);
        let order: Vec<&str> = fused.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(order, vec!["l", "s", "m", "z"]);
    }

    #[test]
    fn test_fusion_is_deterministic() {
        let semantic = ids(&["c", "a", "d", "b", "e"]);
        let lexical = ids(&["b", "e", "f"]);
        let first = reciprocal_rank_fusion(&semantic, &lexical, 60.0);
        for _ in 0..20 {
            assert_eq!(reciprocal_rank_fusion(&semantic, &lexical, 60.0), first);
        }
    }

    #[test]
    fn test_duplicate_within_list_counts_once() {
        let fused = reciprocal_rank_fusion(&ids(&["a", "a"]), &[], 60.0);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].semantic_rank, Some(1));
        assert!((fused[0].score - 1.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn test_edge_interleave_order() {
        assert_eq!(edge_interleave(vec![1, 2, 3, 4, 5, 6]), vec![1, 3, 5, 6, 4, 2]);
        assert_eq!(edge_interleave(vec![1, 2, 3]), vec![1, 3, 2]);
        assert_eq!(edge_interleave(vec![1, 2]), vec![1, 2]);
        assert_eq!(edge_interleave(vec![1]), vec![1]);
        assert!(edge_interleave(Vec::<u8>::new()).is_empty());
    }
}
