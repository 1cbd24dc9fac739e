use crate::{
    config::Config,
    error::{ApiError, Result},
    ml::{
        embedder::HttpEmbedder,
        features::{FeatureEncoder, SequenceLengths},
        vocabulary::VocabularyStore,
    },
    routes::api_routes,
    services::{CorpusIndex, RecommendationService},
};
use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Context;
use log::info;
use std::{net::TcpListener, sync::Arc};

pub struct Application {
    port: u16,
    host: String,
    config: Config,
}

impl Application {
    /// Create a new application instance
    pub fn new(config: &Config) -> Self {
        Self {
            port: config.port,
            host: config.host.clone(),
            config: config.clone(),
        }
    }

    /// Build and run the server
    pub async fn run(&self) -> Result<()> {
        let bind_address = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&bind_address)?;
        info!("Starting server at http://{}", bind_address);

        self.run_with_listener(listener).await
    }

    /// Run the server with a specific TCP listener
    pub async fn run_with_listener(&self, listener: TcpListener) -> Result<()> {
        let recommendation_service = web::Data::new(self.load_service().await?);
        let config = web::Data::new(self.config.clone());

        HttpServer::new(move || {
            let cors = Cors::default()
                .allow_any_origin()
                .allow_any_method()
                .allow_any_header();

            App::new()
                .wrap(cors)
                .wrap(Logger::default())
                .app_data(config.clone())
                .app_data(recommendation_service.clone())
                .configure(api_routes)
        })
        .listen(listener)?
        .run()
        .await?;

        Ok(())
    }

    /// Load every startup artifact once. The returned service owns the only
    /// copies of the vocabulary and corpus for the lifetime of the process.
    pub async fn load_service(&self) -> Result<RecommendationService> {
        let config = &self.config;

        let vocabulary = VocabularyStore::load(&config.vocabulary_path)
            .context("Failed to load vocabulary")?;
        let corpus = CorpusIndex::load(&config.corpus_path, config.catalog_path.as_deref())
            .context("Failed to load corpus embeddings")?;
        let embedder = HttpEmbedder::new(&config.model_url, config.model_timeout_secs)?;

        let lengths = match (config.authors_max_len, config.categories_max_len) {
            (Some(authors), Some(categories)) => {
                info!("Using configured sequence lengths");
                SequenceLengths {
                    authors,
                    categories,
                }
            }
            (authors, categories) => {
                let metadata = embedder
                    .fetch_metadata()
                    .await
                    .context("Failed to fetch model input shapes")?;

                if let Some(dim) = metadata.embedding_dim {
                    if dim != corpus.dim() {
                        return Err(ApiError::ArtifactLoad(format!(
                            "Model produces {}-dimensional embeddings but corpus has {}",
                            dim,
                            corpus.dim()
                        )));
                    }
                }

                SequenceLengths {
                    authors: authors.unwrap_or(metadata.sequence_lengths.authors),
                    categories: categories.unwrap_or(metadata.sequence_lengths.categories),
                }
            }
        };
        info!(
            "Sequence lengths: authors={}, categories={}",
            lengths.authors, lengths.categories
        );

        let encoder = FeatureEncoder::new(Arc::new(vocabulary), lengths);
        Ok(RecommendationService::new(
            encoder,
            Arc::new(embedder),
            Arc::new(corpus),
            config.max_concurrent_inferences,
        ))
    }
}
