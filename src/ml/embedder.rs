use crate::{
    error::{ApiError, Result},
    ml::features::{EncodedFeatures, SequenceLengths},
};
use futures::future::BoxFuture;
use log::{debug, error, info};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, time::Duration};

/// The pretrained embedding model, seen from the outside.
///
/// Implementations receive exactly the shapes produced by the feature encoder
/// and return one dense vector per call.
pub trait Embedder: Send + Sync {
    fn embed<'a>(&'a self, features: &'a EncodedFeatures) -> BoxFuture<'a, Result<Vec<f32>>>;
}

/// Input contract reported by the model server.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelMetadata {
    pub sequence_lengths: SequenceLengths,
    pub embedding_dim: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct MetadataResponse {
    input_shapes: HashMap<String, Vec<Option<usize>>>,
    #[serde(default)]
    embedding_dim: Option<usize>,
}

/// Client for a model server exposing `GET /metadata` and `POST /embed`.
#[derive(Clone)]
pub struct HttpEmbedder {
    client: Client,
    base_url: String,
}

impl HttpEmbedder {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .build()
            .map_err(|e| ApiError::InternalError(format!("Failed to create HTTP client: {}", e)))?;

        let base_url = base_url.trim_end_matches('/').to_string();
        info!("Embedding model endpoint: {}", base_url);

        Ok(Self { client, base_url })
    }

    /// Fetch the model's declared input shapes. Called once at startup.
    pub async fn fetch_metadata(&self) -> Result<ModelMetadata> {
        let url = format!("{}/metadata", self.base_url);
        let response = self.client.get(&url).send().await.map_err(|e| {
            ApiError::ArtifactLoad(format!("Failed to reach model metadata at {}: {}", url, e))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::ArtifactLoad(format!(
                "Model metadata returned {}: {}",
                status, text
            )));
        }

        let text = response.text().await.map_err(|e| {
            ApiError::ArtifactLoad(format!("Failed to read model metadata: {}", e))
        })?;
        parse_metadata(&text)
    }
}

impl Embedder for HttpEmbedder {
    fn embed<'a>(&'a self, features: &'a EncodedFeatures) -> BoxFuture<'a, Result<Vec<f32>>> {
        Box::pin(async move {
            #[derive(Serialize)]
            struct Request<'r> {
                instances: [&'r EncodedFeatures; 1],
            }

            let url = format!("{}/embed", self.base_url);
            let response = self
                .client
                .post(&url)
                .json(&Request {
                    instances: [features],
                })
                .send()
                .await
                .map_err(|e| {
                    ApiError::EmbeddingFailure(format!("Failed to send request to model: {}", e))
                })?;

            if !response.status().is_success() {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                error!("Embedding model returned {}: {}", status, text);
                return Err(ApiError::EmbeddingFailure(format!(
                    "Model returned non-success status: {} - {}",
                    status, text
                )));
            }

            let text = response.text().await.map_err(|e| {
                ApiError::EmbeddingFailure(format!("Failed to get response text: {}", e))
            })?;
            let embedding = parse_embedding(&text)?;
            debug!("Got embedding of size {} from model", embedding.len());
            Ok(embedding)
        })
    }
}

fn parse_metadata(text: &str) -> Result<ModelMetadata> {
    let parsed: MetadataResponse = serde_json::from_str(text)
        .map_err(|e| ApiError::ArtifactLoad(format!("Invalid model metadata: {}", e)))?;

    let sequence_length = |name: &str| -> Result<usize> {
        let shape = parsed.input_shapes.get(name).ok_or_else(|| {
            ApiError::ArtifactLoad(format!("Model metadata has no input shape for '{}'", name))
        })?;
        match shape.last() {
            Some(Some(len)) if *len > 0 => Ok(*len),
            _ => Err(ApiError::ArtifactLoad(format!(
                "Input shape for '{}' has no fixed sequence length: {:?}",
                name, shape
            ))),
        }
    };

    Ok(ModelMetadata {
        sequence_lengths: SequenceLengths {
            authors: sequence_length("authors")?,
            categories: sequence_length("categories")?,
        },
        embedding_dim: parsed.embedding_dim,
    })
}

/// Accepts `{"embeddings": [[..]]}`, `{"embedding": [..]}`, `[[..]]` or `[..]`.
fn parse_embedding(text: &str) -> Result<Vec<f32>> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum EmbeddingResponse {
        Batch { embeddings: Vec<Vec<f32>> },
        Single { embedding: Vec<f32> },
        Nested(Vec<Vec<f32>>),
        Flat(Vec<f32>),
    }

    let parsed: EmbeddingResponse = serde_json::from_str(text)
        .map_err(|e| ApiError::EmbeddingFailure(format!("Failed to parse model response: {}", e)))?;

    let embedding = match parsed {
        EmbeddingResponse::Batch { embeddings } | EmbeddingResponse::Nested(embeddings) => {
            embeddings.into_iter().next().unwrap_or_default()
        }
        EmbeddingResponse::Single { embedding } | EmbeddingResponse::Flat(embedding) => embedding,
    };

    if embedding.is_empty() {
        return Err(ApiError::EmbeddingFailure(
            "Model response contained no embedding".to_string(),
        ));
    }

    Ok(embedding)
}
