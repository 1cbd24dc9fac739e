//! Precomputed catalog embeddings, loaded once and shared read-only.

use crate::{
    error::{ApiError, Result},
    models::book::read_catalog,
    services::ranker::l2_norm,
};
use ndarray::{Array2, ArrayView1};
use std::{fs, path::Path};
use tracing::info;

#[derive(Debug, Clone)]
pub struct CorpusIndex {
    embeddings: Array2<f32>,
    norms: Vec<f64>,
    catalog_ids: Vec<Option<i64>>,
}

impl CorpusIndex {
    /// Build a corpus from embedding rows. Without catalog ids, row indices are used.
    pub fn from_rows(rows: Vec<Vec<f32>>, catalog_ids: Option<Vec<Option<i64>>>) -> Result<Self> {
        let dim = match rows.first() {
            Some(row) if !row.is_empty() => row.len(),
            Some(_) => {
                return Err(ApiError::ArtifactLoad(
                    "Corpus embeddings have zero dimension".to_string(),
                ))
            }
            None => return Err(ApiError::ArtifactLoad("Corpus is empty".to_string())),
        };

        let count = rows.len();
        let mut flat = Vec::with_capacity(count * dim);
        for (index, row) in rows.into_iter().enumerate() {
            if row.len() != dim {
                return Err(ApiError::ArtifactLoad(format!(
                    "Corpus row {} has dimension {}, expected {}",
                    index,
                    row.len(),
                    dim
                )));
            }
            if row.iter().any(|value| !value.is_finite()) {
                return Err(ApiError::ArtifactLoad(format!(
                    "Corpus row {} contains non-finite values",
                    index
                )));
            }
            flat.extend(row);
        }

        let catalog_ids = match catalog_ids {
            Some(ids) if ids.len() != count => {
                return Err(ApiError::ArtifactLoad(format!(
                    "Catalog has {} rows but corpus has {} embeddings",
                    ids.len(),
                    count
                )))
            }
            Some(ids) => ids,
            None => (0..count as i64).map(Some).collect(),
        };

        let embeddings = Array2::from_shape_vec((count, dim), flat)?;
        let norms = embeddings
            .outer_iter()
            .map(|row| l2_norm(row.iter()))
            .collect();

        Ok(Self {
            embeddings,
            norms,
            catalog_ids,
        })
    }

    /// Load the embedding matrix (a JSON array of rows) and optionally the
    /// catalog export that supplies each row's catalog id.
    pub fn load(embeddings_path: &Path, catalog_path: Option<&Path>) -> Result<Self> {
        let content = fs::read_to_string(embeddings_path).map_err(|e| {
            ApiError::ArtifactLoad(format!(
                "Failed to read corpus {}: {}",
                embeddings_path.display(),
                e
            ))
        })?;
        let rows: Vec<Vec<f32>> = serde_json::from_str(&content)?;

        let catalog_ids = match catalog_path {
            Some(path) => {
                let records = read_catalog(path)?;
                info!("Loaded {} catalog rows from {}", records.len(), path.display());
                Some(records.into_iter().map(|record| record.id).collect())
            }
            None => None,
        };

        let corpus = Self::from_rows(rows, catalog_ids)?;
        info!(
            "Loaded corpus from {}: {} embeddings of dimension {}",
            embeddings_path.display(),
            corpus.len(),
            corpus.dim()
        );
        Ok(corpus)
    }

    pub fn len(&self) -> usize {
        self.embeddings.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dim(&self) -> usize {
        self.embeddings.ncols()
    }

    pub fn row(&self, index: usize) -> ArrayView1<'_, f32> {
        self.embeddings.row(index)
    }

    pub fn norm(&self, index: usize) -> f64 {
        self.norms[index]
    }

    /// Catalog id of a row, if the catalog export carried one.
    pub fn catalog_id(&self, index: usize) -> Option<i64> {
        self.catalog_ids.get(index).copied().flatten()
    }
}
