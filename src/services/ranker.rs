//! Cosine-similarity top-K over the in-memory corpus.

use crate::{
    error::{ApiError, Result},
    services::corpus::CorpusIndex,
};
use rayon::prelude::*;
use serde::Serialize;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RankedResult {
    pub index: usize,
    pub score: f32,
}

/// Cosine similarity in [-1, 1]. A zero-norm side yields 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    normalized_score(dot(a, b), l2_norm(a), l2_norm(b))
}

/// Dot product accumulated in f64. Squares of finite f32 values cannot
/// overflow there.
#[inline]
pub(crate) fn dot<'a>(
    a: impl IntoIterator<Item = &'a f32>,
    b: impl IntoIterator<Item = &'a f32>,
) -> f64 {
    a.into_iter()
        .zip(b)
        .map(|(x, y)| f64::from(*x) * f64::from(*y))
        .sum()
}

#[inline]
pub(crate) fn l2_norm<'a>(v: impl IntoIterator<Item = &'a f32>) -> f64 {
    v.into_iter()
        .map(|x| f64::from(*x) * f64::from(*x))
        .sum::<f64>()
        .sqrt()
}

#[inline]
fn normalized_score(dot: f64, norm_a: f64, norm_b: f64) -> f32 {
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let ratio = dot / (norm_a * norm_b);
    if !ratio.is_finite() {
        return 0.0;
    }
    // `+ 0.0` folds -0.0 into 0.0 so equal scores compare equal under total_cmp.
    ratio.clamp(-1.0, 1.0) as f32 + 0.0
}

/// Descending score, then ascending index.
fn by_rank(a: &RankedResult, b: &RankedResult) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.index.cmp(&b.index))
}

/// Score every corpus row against `query` and return the best `min(k, N)`.
pub fn rank(query: &[f32], corpus: &CorpusIndex, k: usize) -> Result<Vec<RankedResult>> {
    if k == 0 {
        return Err(ApiError::InvalidK(0));
    }

    if query.len() != corpus.dim() {
        return Err(ApiError::EmbeddingFailure(format!(
            "Query embedding has dimension {}, corpus has {}",
            query.len(),
            corpus.dim()
        )));
    }

    let query_norm = l2_norm(query);

    let mut scored: Vec<RankedResult> = (0..corpus.len())
        .into_par_iter()
        .map(|index| RankedResult {
            index,
            score: normalized_score(
                dot(corpus.row(index), query),
                query_norm,
                corpus.norm(index),
            ),
        })
        .collect();

    let k = k.min(scored.len());
    if k < scored.len() {
        scored.select_nth_unstable_by(k - 1, by_rank);
        scored.truncate(k);
    }
    scored.sort_unstable_by(by_rank);

    Ok(scored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn corpus(rows: Vec<Vec<f32>>) -> CorpusIndex {
        CorpusIndex::from_rows(rows, None).unwrap()
    }

    #[test]
    fn test_cosine_similarity_bounds() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-3.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 5.0]), 0.0);
    }

    #[test]
    fn test_zero_vectors_score_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 1.0], &[0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_rank_orders_by_descending_score() {
        let corpus = corpus(vec![
            vec![0.0, 1.0],
            vec![1.0, 0.0],
            vec![1.0, 1.0],
            vec![-1.0, 0.0],
        ]);

        let results = rank(&[1.0, 0.0], &corpus, 3).unwrap();
        let indices: Vec<usize> = results.iter().map(|r| r.index).collect();

        assert_eq!(indices, vec![1, 2, 0]);
    }

    #[test]
    fn test_ties_break_by_ascending_index() {
        let corpus = corpus(vec![
            vec![2.0, 0.0],
            vec![0.0, 1.0],
            vec![1.0, 0.0],
            vec![5.0, 0.0],
        ]);

        let results = rank(&[1.0, 0.0], &corpus, 4).unwrap();
        let indices: Vec<usize> = results.iter().map(|r| r.index).collect();

        assert_eq!(indices, vec![0, 2, 3, 1]);
    }

    #[test]
    fn test_k_larger_than_corpus_returns_everything() {
        let results = rank(&[1.0], &corpus(vec![vec![1.0], vec![-1.0]]), 10).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_zero_k_is_rejected() {
        let result = rank(&[1.0], &corpus(vec![vec![1.0]]), 0);
        assert!(matches!(result, Err(ApiError::InvalidK(0))));
    }

    #[test]
    fn test_dimension_mismatch_is_embedding_failure() {
        let result = rank(&[1.0, 2.0, 3.0], &corpus(vec![vec![1.0, 0.0]]), 1);
        assert!(matches!(result, Err(ApiError::EmbeddingFailure(_))));
    }

    #[test]
    fn test_zero_query_scores_zero_everywhere() {
        let corpus = corpus(vec![vec![1.0, 2.0], vec![-3.0, 0.5], vec![0.0, 0.0]]);
        let results = rank(&[0.0, 0.0], &corpus, 3).unwrap();

        assert!(results.iter().all(|r| r.score == 0.0));
        let indices: Vec<usize> = results.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_huge_finite_components_keep_scores_in_range() {
        let corpus = corpus(vec![vec![1e20, 0.0], vec![0.0, 1.0]]);
        let results = rank(&[1e20, 0.0], &corpus, 2).unwrap();

        assert_eq!(results[0].index, 0);
        assert!((results[0].score - 1.0).abs() < 1e-6);
        assert_eq!(results[1], RankedResult { index: 1, score: 0.0 });
    }

    #[test]
    fn test_max_magnitude_vectors_are_finite() {
        let max = f32::MAX;
        assert!((cosine_similarity(&[max, max], &[max, max]) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&[max, -max], &[-max, max]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_rank_agrees_with_cosine_similarity() {
        let rows = vec![vec![0.3, -1.2, 4.0], vec![2.5, 0.1, -0.7], vec![-1.0, -1.0, 1.0]];
        let query = [1.5, -0.4, 2.2];
        let results = rank(&query, &corpus(rows.clone()), 3).unwrap();

        for result in results {
            assert_eq!(result.score, cosine_similarity(&query, &rows[result.index]));
        }
    }

    proptest! {
        #[test]
        fn rank_is_bounded_ordered_and_deterministic(
            rows in prop::collection::vec(prop::collection::vec(-4i8..4, 3), 1..40),
            query in prop::collection::vec(-4i8..4, 3),
            k in 1usize..50,
        ) {
            // Small integer components produce plenty of exact ties.
            let rows: Vec<Vec<f32>> = rows
                .into_iter()
                .map(|row| row.into_iter().map(f32::from).collect())
                .collect();
            let query: Vec<f32> = query.into_iter().map(f32::from).collect();
            let n = rows.len();
            let corpus = corpus(rows);

            let results = rank(&query, &corpus, k).unwrap();

            prop_assert_eq!(results.len(), k.min(n));
            for result in &results {
                prop_assert!((-1.0..=1.0).contains(&result.score));
            }
            for pair in results.windows(2) {
                prop_assert!(
                    pair[0].score > pair[1].score
                        || (pair[0].score == pair[1].score && pair[0].index < pair[1].index)
                );
            }
            prop_assert_eq!(rank(&query, &corpus, k).unwrap(), results);
        }
    }
}
