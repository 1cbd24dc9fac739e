use crate::error::{ApiError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One row of the flat catalog export. Row position is the recommendation index.
#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow)]
pub struct CatalogRecord {
    pub id: Option<i64>,
    #[serde(alias = "Title")]
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(alias = "Authors")]
    pub authors: Option<String>,
    pub image: Option<String>,
    pub previewlink: Option<String>,
    pub publisher: Option<String>,
    pub publisheddate: Option<String>,
    pub infolink: Option<String>,
    pub categories: Option<String>,
    pub price: Option<f64>,
    pub average_score: Option<f64>,
    pub reviews_count: Option<i64>,
}

/// Read every catalog row, in file order.
pub fn read_catalog(path: &Path) -> Result<Vec<CatalogRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| {
            ApiError::ArtifactLoad(format!("Failed to open catalog {}: {}", path.display(), e))
        })?;

    let mut records = Vec::new();
    for (row, record) in reader.deserialize::<CatalogRecord>().enumerate() {
        let record = record.map_err(|e| {
            ApiError::ArtifactLoad(format!("Invalid catalog row {}: {}", row, e))
        })?;
        records.push(record);
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_catalog_keeps_row_order() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "id,Title,authors,average_score").unwrap();
        writeln!(file, "42,Dune,\"['Frank Herbert']\",4.5").unwrap();
        writeln!(file, ",Untitled,,").unwrap();
        writeln!(file, "7,Emma,\"['Jane Austen']\",4.1").unwrap();

        let records = read_catalog(file.path()).unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].id, Some(42));
        assert_eq!(records[0].title.as_deref(), Some("Dune"));
        assert_eq!(records[1].id, None);
        assert_eq!(records[2].id, Some(7));
        assert_eq!(records[2].average_score, Some(4.1));
    }

    #[test]
    fn test_missing_catalog_is_artifact_error() {
        let result = read_catalog(Path::new("/nonexistent/df_books.csv"));
        assert!(matches!(result, Err(ApiError::ArtifactLoad(_))));
    }
}
