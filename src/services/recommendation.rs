use crate::error::{ApiError, Result};
use crate::{
    ml::{
        embedder::Embedder,
        features::{
            FeatureEncoder, AUTHORS_KEY, AVERAGE_RATING_KEY, AVERAGE_REVIEW_RATING_KEY,
            CATEGORIES_KEY, DEFAULT_AUTHOR, DEFAULT_CATEGORY, DEFAULT_PUBLISHER, DEFAULT_RATING,
            PUBLISHED_YEAR_KEY, PUBLISHER_KEY,
        },
    },
    models::{FavoriteBook, FavoriteRecommendation},
    services::{
        corpus::CorpusIndex,
        ranker::{self, RankedResult},
    },
};
use regex::Regex;
use serde_json::{json, Map, Value};
use std::{
    collections::HashSet,
    sync::{Arc, LazyLock},
};
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

/// Brackets and quotes of a stored list literal such as `"['A', 'B']"`.
static LIST_LITERAL_NOISE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\[\]']+").unwrap());

/// Publication year assumed for a query aggregated from favorites.
const FAVORITES_YEAR: &str = "2010";

/// Drives encoder → embedding model → ranker for a single request.
///
/// Vocabulary and corpus are shared read-only across all clones; only the
/// embedding call is gated, by a semaphore sized to the model's capacity.
#[derive(Clone)]
pub struct RecommendationService {
    encoder: FeatureEncoder,
    embedder: Arc<dyn Embedder>,
    corpus: Arc<CorpusIndex>,
    inference_permits: Arc<Semaphore>,
}

impl RecommendationService {
    pub fn new(
        encoder: FeatureEncoder,
        embedder: Arc<dyn Embedder>,
        corpus: Arc<CorpusIndex>,
        max_concurrent_inferences: usize,
    ) -> Self {
        Self {
            encoder,
            embedder,
            corpus,
            inference_permits: Arc::new(Semaphore::new(max_concurrent_inferences.max(1))),
        }
    }

    pub fn corpus(&self) -> &CorpusIndex {
        &self.corpus
    }

    /// Recommend the `k` corpus rows most similar to a raw JSON query.
    pub async fn recommend(&self, body: &Value, k: i64) -> Result<Vec<RankedResult>> {
        let request = body.as_object().ok_or_else(|| {
            ApiError::InvalidFormat(format!("expected a JSON object, got {}", json_kind(body)))
        })?;
        let k = validate_k(k)?;

        self.run_pipeline(request, k).await
    }

    /// Recommend books for a user from their favorites, excluding the
    /// favorites themselves.
    pub async fn recommend_for_favorites(
        &self,
        favorites: &[FavoriteBook],
        limit: i64,
    ) -> Result<Vec<FavoriteRecommendation>> {
        let limit = validate_k(limit)?;
        let meta_query = build_meta_query(favorites).ok_or_else(|| {
            ApiError::InvalidInput("at least one favorite book is required".to_string())
        })?;
        debug!(
            "Meta-query built from {} favorites: {:?}",
            favorites.len(),
            meta_query
        );

        let ranked = self.run_pipeline(&meta_query, limit + favorites.len()).await?;

        let favorite_ids: HashSet<i64> = favorites.iter().map(|book| book.id).collect();
        let mut seen = HashSet::new();
        let recommendations: Vec<FavoriteRecommendation> = ranked
            .into_iter()
            .filter_map(|result| {
                self.corpus
                    .catalog_id(result.index)
                    .map(|book_id| FavoriteRecommendation {
                        index: result.index,
                        book_id,
                        score: result.score,
                    })
            })
            .filter(|rec| !favorite_ids.contains(&rec.book_id) && seen.insert(rec.book_id))
            .take(limit)
            .collect();

        info!(
            "Recommended {} books from {} favorites",
            recommendations.len(),
            favorites.len()
        );
        Ok(recommendations)
    }

    async fn run_pipeline(
        &self,
        request: &Map<String, Value>,
        k: usize,
    ) -> Result<Vec<RankedResult>> {
        let features = self.encoder.encode(request);
        debug!("Encoded features: {:?}", features);

        let embedding = {
            let _permit = self.inference_permits.acquire().await.map_err(|e| {
                ApiError::InternalError(format!("Inference pool unavailable: {}", e))
            })?;
            self.embedder.embed(&features).await.map_err(|e| {
                error!("Embedding call failed: {}", e);
                match e {
                    ApiError::EmbeddingFailure(_) => e,
                    other => ApiError::EmbeddingFailure(other.to_string()),
                }
            })?
        };

        if embedding.iter().any(|value| !value.is_finite()) {
            return Err(ApiError::EmbeddingFailure(
                "Model returned non-finite embedding values".to_string(),
            ));
        }

        let corpus = Arc::clone(&self.corpus);
        let ranked = tokio::task::spawn_blocking(move || ranker::rank(&embedding, &corpus, k))
            .await
            .map_err(|e| ApiError::InternalError(format!("Ranking task failed: {}", e)))??;

        debug!("Ranked {} results (k = {})", ranked.len(), k);
        Ok(ranked)
    }
}

fn validate_k(k: i64) -> Result<usize> {
    if k <= 0 {
        return Err(ApiError::InvalidK(k));
    }
    usize::try_from(k).map_err(|_| ApiError::InvalidK(k))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Aggregate favorites into one synthetic query. `None` when there are no favorites.
pub fn build_meta_query(favorites: &[FavoriteBook]) -> Option<Map<String, Value>> {
    if favorites.is_empty() {
        return None;
    }

    let authors =
        unique_list_entries(favorites.iter().filter_map(|book| book.authors.as_deref()));
    let categories =
        unique_list_entries(favorites.iter().filter_map(|book| book.categories.as_deref()));

    let scores: Vec<f64> = favorites
        .iter()
        .filter_map(|book| book.average_score)
        .filter(|score| score.is_finite())
        .collect();
    let rating = if scores.is_empty() {
        DEFAULT_RATING as f64
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    };

    let authors = if authors.is_empty() {
        vec![DEFAULT_AUTHOR.to_string()]
    } else {
        authors
    };
    let categories = if categories.is_empty() {
        vec![DEFAULT_CATEGORY.to_string()]
    } else {
        categories
    };

    let mut query = Map::new();
    query.insert(AUTHORS_KEY.to_string(), json!(authors));
    query.insert(CATEGORIES_KEY.to_string(), json!(categories));
    query.insert(PUBLISHER_KEY.to_string(), json!(DEFAULT_PUBLISHER));
    query.insert(PUBLISHED_YEAR_KEY.to_string(), json!(FAVORITES_YEAR));
    query.insert(AVERAGE_RATING_KEY.to_string(), json!(rating));
    query.insert(AVERAGE_REVIEW_RATING_KEY.to_string(), json!(rating));
    Some(query)
}

/// Split list literals into trimmed entries, de-duplicated in first-seen order.
fn unique_list_entries<'a>(literals: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut entries = Vec::new();

    for literal in literals {
        let cleaned = LIST_LITERAL_NOISE.replace_all(literal, "");
        for entry in cleaned.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            if seen.insert(entry.to_string()) {
                entries.push(entry.to_string());
            }
        }
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::{
        features::{EncodedFeatures, SequenceLengths},
        vocabulary::VocabularyStore,
    };
    use futures::future::BoxFuture;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };
    use tokio::sync::Notify;

    /// Returns a fixed vector and counts calls.
    struct FixedEmbedder {
        vector: Vec<f32>,
        calls: AtomicUsize,
    }

    impl Embedder for FixedEmbedder {
        fn embed<'a>(&'a self, _features: &'a EncodedFeatures) -> BoxFuture<'a, Result<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let vector = self.vector.clone();
            Box::pin(async move { Ok(vector) })
        }
    }

    struct FailingEmbedder;

    impl Embedder for FailingEmbedder {
        fn embed<'a>(&'a self, _features: &'a EncodedFeatures) -> BoxFuture<'a, Result<Vec<f32>>> {
            Box::pin(async { Err(ApiError::InternalError("accelerator out of memory".into())) })
        }
    }

    /// Holds every call open until released, recording how many overlap.
    #[derive(Default)]
    struct GatedEmbedder {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        completed: AtomicUsize,
        release: Notify,
    }

    impl Embedder for GatedEmbedder {
        fn embed<'a>(&'a self, _features: &'a EncodedFeatures) -> BoxFuture<'a, Result<Vec<f32>>> {
            Box::pin(async move {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                self.release.notified().await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                self.completed.fetch_add(1, Ordering::SeqCst);
                Ok(vec![1.0, 0.0])
            })
        }
    }

    fn encoder() -> FeatureEncoder {
        let vocabulary = VocabularyStore::from_json(
            r#"{"authors": {}, "categories": {}, "publisher": {}, "year": {}}"#,
        )
        .unwrap();
        FeatureEncoder::new(
            Arc::new(vocabulary),
            SequenceLengths {
                authors: 4,
                categories: 2,
            },
        )
    }

    fn service(embedder: Arc<dyn Embedder>, ids: Option<Vec<Option<i64>>>) -> RecommendationService {
        let corpus = CorpusIndex::from_rows(
            vec![
                vec![1.0, 0.0],
                vec![0.9, 0.1],
                vec![0.0, 1.0],
                vec![0.7, 0.3],
                vec![-1.0, 0.0],
            ],
            ids,
        )
        .unwrap();
        RecommendationService::new(encoder(), embedder, Arc::new(corpus), 2)
    }

    fn fixed(vector: Vec<f32>) -> Arc<FixedEmbedder> {
        Arc::new(FixedEmbedder {
            vector,
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_recommend_returns_top_k() {
        let embedder = fixed(vec![1.0, 0.0]);
        let service = service(embedder.clone(), None);

        let results = service.recommend(&json!({}), 3).await.unwrap();
        let indices: Vec<usize> = results.iter().map(|r| r.index).collect();

        assert_eq!(indices, vec![0, 1, 3]);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_embedding_calls_are_capped_by_inference_permits() {
        const REQUESTS: usize = 6;
        let embedder = Arc::new(GatedEmbedder::default());
        let service = service(embedder.clone(), None);

        let handles: Vec<_> = (0..REQUESTS)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move { service.recommend(&json!({}), 2).await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(embedder.in_flight.load(Ordering::SeqCst), 2);

        while embedder.completed.load(Ordering::SeqCst) < REQUESTS {
            embedder.release.notify_one();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(embedder.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_object_body_is_format_error() {
        let service = service(fixed(vec![1.0, 0.0]), None);
        let result = service.recommend(&json!(["Jane Doe"]), 3).await;
        assert!(matches!(result, Err(ApiError::InvalidFormat(_))));
    }

    #[tokio::test]
    async fn test_invalid_k_rejected_before_embedding() {
        let embedder = fixed(vec![1.0, 0.0]);
        let service = service(embedder.clone(), None);

        assert!(matches!(
            service.recommend(&json!({}), 0).await,
            Err(ApiError::InvalidK(0))
        ));
        assert!(matches!(
            service.recommend(&json!({}), -3).await,
            Err(ApiError::InvalidK(-3))
        ));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_embedder_errors_become_embedding_failures() {
        let service = service(Arc::new(FailingEmbedder), None);
        let result = service.recommend(&json!({}), 3).await;

        match result {
            Err(ApiError::EmbeddingFailure(message)) => {
                assert!(message.contains("accelerator out of memory"))
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_finite_embedding_is_rejected() {
        let service = service(fixed(vec![f32::NAN, 0.0]), None);
        let result = service.recommend(&json!({}), 3).await;
        assert!(matches!(result, Err(ApiError::EmbeddingFailure(_))));
    }

    #[tokio::test]
    async fn test_wrong_dimension_embedding_is_rejected() {
        let service = service(fixed(vec![1.0, 0.0, 0.0]), None);
        let result = service.recommend(&json!({}), 3).await;
        assert!(matches!(result, Err(ApiError::EmbeddingFailure(_))));
    }

    #[tokio::test]
    async fn test_favorites_exclude_favorited_and_duplicate_books() {
        let ids = Some(vec![Some(10), Some(11), Some(12), Some(11), None]);
        let service = service(fixed(vec![1.0, 0.0]), ids);
        let favorites = vec![FavoriteBook {
            id: 10,
            authors: Some("['Jane Austen']".into()),
            categories: None,
            average_score: Some(4.0),
        }];

        let recommendations = service
            .recommend_for_favorites(&favorites, 5)
            .await
            .unwrap();
        let book_ids: Vec<i64> = recommendations.iter().map(|r| r.book_id).collect();

        assert_eq!(book_ids, vec![11, 12]);
        assert_eq!(recommendations[0].index, 1);
    }

    #[tokio::test]
    async fn test_favorites_respect_limit() {
        let ids = Some(vec![Some(1), Some(2), Some(3), Some(4), Some(5)]);
        let service = service(fixed(vec![1.0, 0.0]), ids);
        let favorites = vec![FavoriteBook {
            id: 99,
            ..FavoriteBook::default()
        }];

        let recommendations = service
            .recommend_for_favorites(&favorites, 2)
            .await
            .unwrap();

        assert_eq!(recommendations.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_favorites_are_rejected() {
        let service = service(fixed(vec![1.0, 0.0]), None);
        let result = service.recommend_for_favorites(&[], 5).await;
        assert!(matches!(result, Err(ApiError::InvalidInput(_))));
    }

    #[test]
    fn test_meta_query_aggregates_favorites() {
        let favorites = vec![
            FavoriteBook {
                id: 1,
                authors: Some("['Jane Austen', 'Charlotte Bronte']".into()),
                categories: Some("['Fiction']".into()),
                average_score: Some(4.0),
            },
            FavoriteBook {
                id: 2,
                authors: Some("['Jane Austen']".into()),
                categories: Some("['Romance', 'Fiction']".into()),
                average_score: Some(5.0),
            },
        ];

        let query = build_meta_query(&favorites).unwrap();

        assert_eq!(query[AUTHORS_KEY], json!(["Jane Austen", "Charlotte Bronte"]));
        assert_eq!(query[CATEGORIES_KEY], json!(["Fiction", "Romance"]));
        assert_eq!(query[PUBLISHER_KEY], json!("Unknown"));
        assert_eq!(query[PUBLISHED_YEAR_KEY], json!("2010"));
        assert_eq!(query[AVERAGE_RATING_KEY], json!(4.5));
        assert_eq!(query[AVERAGE_REVIEW_RATING_KEY], json!(4.5));
    }

    #[test]
    fn test_meta_query_defaults_without_metadata() {
        let favorites = vec![FavoriteBook {
            id: 1,
            authors: Some("[]".into()),
            ..FavoriteBook::default()
        }];

        let query = build_meta_query(&favorites).unwrap();

        assert_eq!(query[AUTHORS_KEY], json!(["Unknown"]));
        assert_eq!(query[CATEGORIES_KEY], json!(["General"]));
        assert_eq!(query[AVERAGE_RATING_KEY], json!(3.5));
    }

    #[test]
    fn test_meta_query_requires_favorites() {
        assert!(build_meta_query(&[]).is_none());
    }
}
