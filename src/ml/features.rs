//! Raw request → model input tensors.
//!
//! Encoding is total. Missing or malformed attributes are replaced by the
//! documented defaults and unseen tokens resolve to the unknown id, so every
//! JSON object produces a well-shaped [`EncodedFeatures`].

use crate::ml::vocabulary::{Field, VocabularyStore, UNKNOWN_ID};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

pub const AUTHORS_KEY: &str = "authors";
pub const CATEGORIES_KEY: &str = "categories";
pub const PUBLISHER_KEY: &str = "publisher";
pub const PUBLISHED_YEAR_KEY: &str = "published_year";
pub const AVERAGE_RATING_KEY: &str = "average_rating";
pub const AVERAGE_REVIEW_RATING_KEY: &str = "average_review_rating";

pub const DEFAULT_AUTHOR: &str = "Unknown";
pub const DEFAULT_CATEGORY: &str = "General";
pub const DEFAULT_PUBLISHER: &str = "Unknown";
pub const DEFAULT_YEAR: &str = "2000";
pub const DEFAULT_RATING: f32 = 3.5;

/// Fixed sequence lengths of the model's multi-valued inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceLengths {
    pub authors: usize,
    pub categories: usize,
}

/// Model-ready features for a single query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncodedFeatures {
    pub authors: Vec<u32>,
    pub categories: Vec<u32>,
    pub publisher: u32,
    pub year: u32,
    pub average_rating: f32,
    pub average_review_rating: f32,
}

#[derive(Debug, Clone)]
pub struct FeatureEncoder {
    vocabulary: Arc<VocabularyStore>,
    lengths: SequenceLengths,
}

impl FeatureEncoder {
    pub fn new(vocabulary: Arc<VocabularyStore>, lengths: SequenceLengths) -> Self {
        Self {
            vocabulary,
            lengths,
        }
    }

    pub fn lengths(&self) -> SequenceLengths {
        self.lengths
    }

    pub fn encode(&self, raw: &Map<String, Value>) -> EncodedFeatures {
        let authors = string_list(raw, AUTHORS_KEY, DEFAULT_AUTHOR);
        let categories = string_list(raw, CATEGORIES_KEY, DEFAULT_CATEGORY);
        let publisher = publisher_token(raw);
        let year = year_token(raw);

        EncodedFeatures {
            authors: pad_or_truncate(
                self.vocabulary.lookup_all(Field::Authors, &authors),
                self.lengths.authors,
            ),
            categories: pad_or_truncate(
                self.vocabulary.lookup_all(Field::Categories, &categories),
                self.lengths.categories,
            ),
            publisher: self.vocabulary.lookup(Field::Publisher, &publisher),
            year: self.vocabulary.lookup(Field::Year, &year),
            average_rating: rating(raw, AVERAGE_RATING_KEY),
            average_review_rating: rating(raw, AVERAGE_REVIEW_RATING_KEY),
        }
    }
}

/// Truncate from the end or right-pad with the unknown id to exactly `len`.
pub fn pad_or_truncate(mut ids: Vec<u32>, len: usize) -> Vec<u32> {
    ids.resize(len, UNKNOWN_ID);
    ids
}

fn string_list(raw: &Map<String, Value>, key: &str, default: &str) -> Vec<String> {
    let values = match raw.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(single)) => vec![single.clone()],
        _ => Vec::new(),
    };

    if values.is_empty() {
        debug!("No usable '{}' in request, defaulting to [{:?}]", key, default);
        vec![default.to_string()]
    } else {
        values
    }
}

fn publisher_token(raw: &Map<String, Value>) -> String {
    match raw.get(PUBLISHER_KEY) {
        Some(Value::String(publisher)) => publisher.clone(),
        _ => {
            debug!(
                "No usable '{}' in request, defaulting to {:?}",
                PUBLISHER_KEY, DEFAULT_PUBLISHER
            );
            DEFAULT_PUBLISHER.to_string()
        }
    }
}

fn year_token(raw: &Map<String, Value>) -> String {
    match raw.get(PUBLISHED_YEAR_KEY) {
        None | Some(Value::Null) => {
            debug!(
                "No '{}' in request, defaulting to {:?}",
                PUBLISHED_YEAR_KEY, DEFAULT_YEAR
            );
            DEFAULT_YEAR.to_string()
        }
        Some(Value::String(year)) => year.clone(),
        // Numbers and any other JSON type go through the normal integer parse;
        // whatever does not parse lands on the unknown id.
        Some(other) => other.to_string(),
    }
}

fn rating(raw: &Map<String, Value>, key: &str) -> f32 {
    let parsed = match raw.get(key) {
        Some(Value::Number(number)) => number.as_f64().map(|value| value as f32),
        Some(Value::String(text)) => text.trim().parse::<f32>().ok(),
        _ => None,
    };

    match parsed.filter(|value| value.is_finite()) {
        Some(value) => value,
        None => {
            debug!("No usable '{}' in request, defaulting to {}", key, DEFAULT_RATING);
            DEFAULT_RATING
        }
    }
}
