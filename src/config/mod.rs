use crate::error::{ApiError, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Service configuration.
///
/// Loaded in order:
/// 1. `config/default.{toml,json,yaml}` if present
/// 2. Environment variables prefixed with `APP_` (e.g. `APP_PORT`, `APP_CORPUS_PATH`)
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_vocabulary_path")]
    pub vocabulary_path: PathBuf,
    #[serde(default = "default_corpus_path")]
    pub corpus_path: PathBuf,
    /// Catalog CSV aligned row-for-row with the corpus. Row indices double as ids when unset.
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
    #[serde(default = "default_model_url")]
    pub model_url: String,
    #[serde(default = "default_model_timeout_secs")]
    pub model_timeout_secs: u64,
    #[serde(default = "default_max_concurrent_inferences")]
    pub max_concurrent_inferences: usize,
    #[serde(default = "default_top_k")]
    pub default_top_k: i64,
    /// Overrides the authors input length reported by the model.
    #[serde(default)]
    pub authors_max_len: Option<usize>,
    /// Overrides the categories input length reported by the model.
    #[serde(default)]
    pub categories_max_len: Option<usize>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let config: Config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::Environment::with_prefix("APP"))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_inferences == 0 {
            return Err(ApiError::Config(
                "max_concurrent_inferences must be greater than 0".into(),
            ));
        }

        if self.default_top_k <= 0 {
            return Err(ApiError::Config(
                "default_top_k must be greater than 0".into(),
            ));
        }

        if self.authors_max_len == Some(0) || self.categories_max_len == Some(0) {
            return Err(ApiError::Config(
                "configured sequence lengths must be greater than 0".into(),
            ));
        }

        if self.model_url.trim().is_empty() {
            return Err(ApiError::Config("model_url must not be empty".into()));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            vocabulary_path: default_vocabulary_path(),
            corpus_path: default_corpus_path(),
            catalog_path: None,
            model_url: default_model_url(),
            model_timeout_secs: default_model_timeout_secs(),
            max_concurrent_inferences: default_max_concurrent_inferences(),
            default_top_k: default_top_k(),
            authors_max_len: None,
            categories_max_len: None,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_vocabulary_path() -> PathBuf {
    PathBuf::from("model_components/vocabulary.json")
}

fn default_corpus_path() -> PathBuf {
    PathBuf::from("model_components/embeddings.json")
}

fn default_model_url() -> String {
    "http://localhost:8501".to_string()
}

fn default_model_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent_inferences() -> usize {
    4
}

fn default_top_k() -> i64 {
    10
}
