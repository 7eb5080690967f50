//! Reciprocal Rank Fusion (RRF) of the retrieval and rerank orderings.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use qa_core::{FusedResult, QaError, RerankCandidate, Result, RetrievalCandidate};

/// RRF constant (commonly 60).
/// Higher values flatten the difference between top and lower ranks.
pub const DEFAULT_FUSION_CONSTANT: f64 = 60.0;

/// 1-based rank per document id.
pub type RankMap = HashMap<String, usize>;

/// Fuse any number of rankings using Reciprocal Rank Fusion.
///
/// RRF score = Σ 1 / (c + rank_i) over the rankings that contain the id;
/// an id missing from a ranking simply gets no term from it.
///
/// Sorted by fused score descending. Ties go to the better rank in the
/// first ranking (ids absent from it last), then to the smaller id, so the
/// result is fully deterministic.
pub fn reciprocal_rank_fusion(rankings: &[&RankMap], c: f64) -> Vec<(String, f64)> {
    let mut scores: HashMap<&str, f64> = HashMap::new();

    for ranking in rankings {
        for (id, &rank) in ranking.iter() {
            *scores.entry(id.as_str()).or_default() += 1.0 / (c + rank as f64);
        }
    }

    let first = rankings.first();
    let lead_rank = |id: &str| {
        first
            .and_then(|r| r.get(id).copied())
            .unwrap_or(usize::MAX)
    };

    let mut fused: Vec<(String, f64)> = scores
        .into_iter()
        .map(|(id, score)| (id.to_string(), score))
        .collect();

    fused.sort_by(|a, b| {
        b.1.total_cmp(&a.1)
            .then_with(|| lead_rank(&a.0).cmp(&lead_rank(&b.0)))
            .then_with(|| a.0.cmp(&b.0))
    });

    fused
}

/// Rank map of the vector store ordering.
pub fn initial_ranks(candidates: &[RetrievalCandidate]) -> RankMap {
    candidates
        .iter()
        .map(|c| (c.document.id.clone(), c.rank))
        .collect()
}

/// Order candidates by reranker score.
///
/// `scores[i]` belongs to `candidates[i]`. Higher scores rank first; equal
/// scores keep the input order; NaN scores rank after every real score.
pub fn rerank(candidates: &[RetrievalCandidate], scores: &[f32]) -> Result<Vec<RerankCandidate>> {
    if scores.len() != candidates.len() {
        return Err(QaError::rerank(format!(
            "Reranker returned {} scores for {} candidates",
            scores.len(),
            candidates.len()
        )));
    }

    let mut order: Vec<usize> = (0..candidates.len()).collect();
    // sort_by is stable, so ties keep input order
    order.sort_by(|&a, &b| compare_scores(scores[a], scores[b]));

    Ok(order
        .into_iter()
        .enumerate()
        .map(|(pos, i)| RerankCandidate {
            document: candidates[i].document.clone(),
            rank: pos + 1,
            score: scores[i],
        })
        .collect())
}

/// Rank map of the reranker ordering.
pub fn rerank_ranks(reranked: &[RerankCandidate]) -> RankMap {
    reranked
        .iter()
        .map(|c| (c.document.id.clone(), c.rank))
        .collect()
}

/// Descending, NaN last.
fn compare_scores(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.total_cmp(&a),
    }
}

/// Select the `top_k` candidates by fused rank.
///
/// Both rank maps must cover exactly the candidate ids.
pub fn fuse(
    candidates: &[RetrievalCandidate],
    initial: &RankMap,
    rerank: &RankMap,
    fusion_constant: f64,
    top_k: usize,
) -> Result<Vec<FusedResult>> {
    if top_k < 1 {
        return Err(QaError::invalid_argument("top_k must be at least 1"));
    }
    if !fusion_constant.is_finite() || fusion_constant < 0.0 {
        return Err(QaError::invalid_argument(format!(
            "fusion constant must be a non-negative number, got {}",
            fusion_constant
        )));
    }

    let mut documents = HashMap::with_capacity(candidates.len());
    for candidate in candidates {
        if documents
            .insert(candidate.document.id.as_str(), candidate)
            .is_some()
        {
            return Err(QaError::invalid_argument(format!(
                "duplicate candidate id: {}",
                candidate.document.id
            )));
        }
    }

    let ids: HashSet<&str> = documents.keys().copied().collect();
    let initial_ids: HashSet<&str> = initial.keys().map(String::as_str).collect();
    let rerank_ids: HashSet<&str> = rerank.keys().map(String::as_str).collect();
    if initial_ids != ids || rerank_ids != ids {
        return Err(QaError::invalid_argument(
            "rank mappings must cover exactly the candidate ids",
        ));
    }

    let fused = reciprocal_rank_fusion(&[initial, rerank], fusion_constant)
        .into_iter()
        .take(top_k)
        .filter_map(|(id, score)| {
            let candidate = documents.get(id.as_str())?;
            Some(FusedResult {
                document: candidate.document.clone(),
                score,
                initial_rank: initial[&id],
                rerank_rank: rerank[&id],
            })
        })
        .collect();

    Ok(fused)
}

#[cfg(test)]
mod tests {
    use super::*;
    use qa_core::Document;

    fn candidates(n: usize) -> Vec<RetrievalCandidate> {
        (1..=n)
            .map(|rank| RetrievalCandidate {
                document: Document::new(&format!("doc-{:02}", rank), "text", Vec::new()),
                rank,
                similarity: 1.0 - rank as f32 / 100.0,
            })
            .collect()
    }

    fn ranked(cands: &[RetrievalCandidate], scores: &[f32]) -> RankMap {
        rerank_ranks(&rerank(cands, scores).unwrap())
    }

    fn ids(results: &[FusedResult]) -> Vec<&str> {
        results.iter().map(|r| r.document.id.as_str()).collect()
    }

    #[test]
    fn test_rrf_single_list() {
        let ranking: RankMap = [("a", 1), ("b", 2), ("c", 3)]
            .into_iter()
            .map(|(id, r)| (id.to_string(), r))
            .collect();

        let fused = reciprocal_rank_fusion(&[&ranking], DEFAULT_FUSION_CONSTANT);

        assert_eq!(fused.len(), 3);
        assert_eq!(fused[0].0, "a");
        assert!((fused[0].1 - 1.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn test_rrf_missing_entry_gets_single_term() {
        let first: RankMap = [("a".to_string(), 1), ("b".to_string(), 2)].into();
        let second: RankMap = [("b".to_string(), 1)].into();

        let fused = reciprocal_rank_fusion(&[&first, &second], 60.0);

        assert_eq!(fused[0].0, "b");
        assert!((fused[0].1 - (1.0 / 62.0 + 1.0 / 61.0)).abs() < 1e-12);
        assert!((fused[1].1 - 1.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn test_top_in_both_rankings_scores_two_over_61() {
        let cands = candidates(5);
        let initial = initial_ranks(&cands);
        let rerank = ranked(&cands, &[0.9, 0.5, 0.4, 0.3, 0.2]);

        let fused = fuse(&cands, &initial, &rerank, 60.0, 3).unwrap();

        assert_eq!(fused[0].document.id, "doc-01");
        assert!((fused[0].score - 2.0 / 61.0).abs() < 1e-12);
        assert_eq!((fused[0].initial_rank, fused[0].rerank_rank), (1, 1));
    }

    #[test]
    fn test_truncates_to_top_k_strictly_descending() {
        let cands = candidates(25);
        let scores: Vec<f32> = (0..25).map(|i| 1.0 - i as f32 * 0.01).collect();
        let initial = initial_ranks(&cands);
        let rerank = ranked(&cands, &scores);

        let fused = fuse(&cands, &initial, &rerank, 60.0, 3).unwrap();

        assert_eq!(fused.len(), 3);
        assert!(fused.windows(2).all(|w| w[0].score > w[1].score));
    }

    #[test]
    fn test_fewer_candidates_than_top_k() {
        let cands = candidates(2);
        let initial = initial_ranks(&cands);
        let rerank = ranked(&cands, &[0.1, 0.2]);

        assert_eq!(fuse(&cands, &initial, &rerank, 60.0, 10).unwrap().len(), 2);
    }

    #[test]
    fn test_deterministic() {
        let cands = candidates(25);
        let scores: Vec<f32> = (0..25).map(|i| ((i * 7) % 11) as f32).collect();
        let initial = initial_ranks(&cands);
        let rerank = ranked(&cands, &scores);

        let first = fuse(&cands, &initial, &rerank, 60.0, 10).unwrap();
        for _ in 0..10 {
            let again = fuse(&cands, &initial, &rerank, 60.0, 10).unwrap();
            assert_eq!(ids(&first), ids(&again));
        }
    }

    #[test]
    fn test_ties_broken_by_initial_rank() {
        // doc-01 is (1, 2) and doc-02 is (2, 1): equal fused scores
        let cands = candidates(2);
        let initial = initial_ranks(&cands);
        let rerank = ranked(&cands, &[0.1, 0.9]);

        let fused = fuse(&cands, &initial, &rerank, 60.0, 2).unwrap();

        assert_eq!(fused[0].score, fused[1].score);
        assert_eq!(ids(&fused), vec!["doc-01", "doc-02"]);
    }

    #[test]
    fn test_rerank_ties_keep_input_order_and_nan_last() {
        let cands = candidates(4);
        let rerank = ranked(&cands, &[0.5, f32::NAN, 0.5, 0.7]);

        assert_eq!(rerank["doc-04"], 1);
        assert_eq!(rerank["doc-01"], 2);
        assert_eq!(rerank["doc-03"], 3);
        assert_eq!(rerank["doc-02"], 4);
    }

    #[test]
    fn test_rerank_orders_candidates_with_scores() {
        let cands = candidates(3);
        let reranked = rerank(&cands, &[0.2, 0.9, 0.4]).unwrap();

        let order: Vec<(&str, usize, f32)> = reranked
            .iter()
            .map(|c| (c.document.id.as_str(), c.rank, c.score))
            .collect();
        assert_eq!(
            order,
            vec![("doc-02", 1, 0.9), ("doc-03", 2, 0.4), ("doc-01", 3, 0.2)]
        );
    }

    #[test]
    fn test_rerank_score_count_mismatch() {
        let cands = candidates(3);
        let err = rerank(&cands, &[0.1, 0.2]).unwrap_err();
        assert_eq!(err.error_code(), "RERANK_ERROR");
    }

    #[test]
    fn test_rejects_invalid_arguments() {
        let cands = candidates(3);
        let initial = initial_ranks(&cands);
        let rerank = ranked(&cands, &[0.3, 0.2, 0.1]);

        assert!(fuse(&cands, &initial, &rerank, 60.0, 0).is_err());
        assert!(fuse(&cands, &initial, &rerank, f64::NAN, 3).is_err());
        assert!(fuse(&cands, &initial, &rerank, -1.0, 3).is_err());

        let mut partial = rerank.clone();
        partial.remove("doc-02");
        let err = fuse(&cands, &initial, &partial, 60.0, 3).unwrap_err();
        assert!(err.is_client_error());

        let mut extra = initial.clone();
        extra.insert("doc-99".to_string(), 4);
        assert!(fuse(&cands, &extra, &rerank, 60.0, 3).is_err());
    }

    #[test]
    fn test_rejects_duplicate_candidates() {
        let mut cands = candidates(2);
        cands.push(cands[0].clone());
        let initial = initial_ranks(&cands);
        let rerank = initial.clone();

        assert!(fuse(&cands, &initial, &rerank, 60.0, 3).is_err());
    }
}
