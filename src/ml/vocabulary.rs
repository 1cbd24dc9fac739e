//! Token vocabularies for the categorical model inputs.
//!
//! Every lookup is total: a token missing from its field's mapping resolves
//! to [`UNKNOWN_ID`], which also doubles as the padding id for sequences.

use crate::error::{ApiError, Result};
use serde::{Deserialize, Deserializer};
use std::{collections::HashMap, fmt, fs, path::Path};
use tracing::{info, warn};

/// Reserved id for out-of-vocabulary tokens and sequence padding.
pub const UNKNOWN_ID: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Authors,
    Categories,
    Publisher,
    Year,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Field::Authors => "authors",
            Field::Categories => "categories",
            Field::Publisher => "publisher",
            Field::Year => "year",
        };
        f.write_str(name)
    }
}

/// A field mapping as it appears in the artifact: either a tokenizer word
/// index (`{"token": id}`) or the ordered classes of a label encoder.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawMapping {
    Index(HashMap<String, u32>),
    Classes(Vec<String>),
}

impl RawMapping {
    fn into_index(self, field: Field) -> Result<HashMap<String, u32>> {
        match self {
            RawMapping::Index(index) => {
                if let Some((token, _)) = index.iter().find(|(_, id)| **id == UNKNOWN_ID) {
                    return Err(ApiError::ArtifactLoad(format!(
                        "{} vocabulary maps '{}' to the reserved unknown id {}",
                        field, token, UNKNOWN_ID
                    )));
                }
                Ok(index)
            }
            RawMapping::Classes(classes) => Ok(classes
                .into_iter()
                .enumerate()
                .map(|(position, token)| (token, position as u32 + 1))
                .collect()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawVocabulary {
    authors: RawMapping,
    categories: RawMapping,
    publisher: RawMapping,
    year: RawMapping,
}

/// Immutable token → id mappings, one per categorical field.
#[derive(Debug, Clone, Default)]
pub struct VocabularyStore {
    authors: HashMap<String, u32>,
    categories: HashMap<String, u32>,
    publisher: HashMap<String, u32>,
    year: HashMap<i32, u32>,
}

impl<'de> Deserialize<'de> for VocabularyStore {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawVocabulary::deserialize(deserializer)?;
        VocabularyStore::from_raw(raw).map_err(serde::de::Error::custom)
    }
}

impl VocabularyStore {
    /// Load the vocabulary artifact from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            ApiError::ArtifactLoad(format!(
                "Failed to read vocabulary {}: {}",
                path.display(),
                e
            ))
        })?;

        let store = Self::from_json(&content)?;
        info!(
            "Loaded vocabulary from {}: {} authors, {} categories, {} publishers, {} years",
            path.display(),
            store.authors.len(),
            store.categories.len(),
            store.publisher.len(),
            store.year.len()
        );
        Ok(store)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| ApiError::ArtifactLoad(format!("Invalid vocabulary artifact: {}", e)))
    }

    fn from_raw(raw: RawVocabulary) -> Result<Self> {
        let mut year = HashMap::new();
        for (token, id) in raw.year.into_index(Field::Year)? {
            match normalize_year(&token) {
                Some(value) => {
                    year.insert(value, id);
                }
                None => warn!("Skipping non-integer year vocabulary key '{}'", token),
            }
        }

        Ok(Self {
            authors: raw.authors.into_index(Field::Authors)?,
            categories: raw.categories.into_index(Field::Categories)?,
            publisher: raw.publisher.into_index(Field::Publisher)?,
            year,
        })
    }

    /// Resolve a token to its id. Never fails; unseen tokens map to [`UNKNOWN_ID`].
    pub fn lookup(&self, field: Field, token: &str) -> u32 {
        let token = token.trim();
        let id = match field {
            Field::Authors => self.authors.get(token),
            Field::Categories => self.categories.get(token),
            Field::Publisher => self.publisher.get(token),
            Field::Year => {
                return normalize_year(token)
                    .and_then(|year| self.year.get(&year).copied())
                    .unwrap_or(UNKNOWN_ID)
            }
        };
        id.copied().unwrap_or(UNKNOWN_ID)
    }

    /// Resolve every token of a multi-valued field, preserving input order.
    pub fn lookup_all<S: AsRef<str>>(&self, field: Field, tokens: &[S]) -> Vec<u32> {
        tokens
            .iter()
            .map(|token| self.lookup(field, token.as_ref()))
            .collect()
    }

    pub fn len(&self, field: Field) -> usize {
        match field {
            Field::Authors => self.authors.len(),
            Field::Categories => self.categories.len(),
            Field::Publisher => self.publisher.len(),
            Field::Year => self.year.len(),
        }
    }
}

/// Parse a year token as an integer. `"1999"` and `"1999.0"` both yield 1999.
fn normalize_year(raw: &str) -> Option<i32> {
    let raw = raw.trim();
    if let Ok(year) = raw.parse::<i32>() {
        return Some(year);
    }

    let value = raw.parse::<f64>().ok()?;
    if value.is_finite() && value.fract() == 0.0 && value.abs() <= i32::MAX as f64 {
        Some(value as i32)
    } else {
        None
    }
}
