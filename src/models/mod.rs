use serde::{Deserialize, Serialize};

pub use book::CatalogRecord;

pub mod book;

/// Query-string parameters of `POST /predict`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PredictParams {
    /// Number of recommendations; the configured default applies when omitted.
    pub k: Option<i64>,
}

/// A single ranked corpus row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub index: usize,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictResponse {
    pub recommendations: Vec<Recommendation>,
}

/// A favorited book as stored in the catalog database. List-valued columns
/// hold their list literal form, e.g. `"['Jane Austen']"`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FavoriteBook {
    pub id: i64,
    #[serde(default)]
    pub authors: Option<String>,
    #[serde(default)]
    pub categories: Option<String>,
    #[serde(default)]
    pub average_score: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FavoritesRequest {
    pub favorites: Vec<FavoriteBook>,
    #[serde(default = "default_favorites_limit")]
    pub limit: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FavoriteRecommendation {
    pub index: usize,
    pub book_id: i64,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FavoritesResponse {
    pub recommendations: Vec<FavoriteRecommendation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub corpus_size: usize,
    pub embedding_dim: usize,
    pub timestamp: String,
}

fn default_favorites_limit() -> i64 {
    10
}
