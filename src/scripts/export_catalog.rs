//! Export the `books` table to the flat catalog CSV.
//!
//! Rows are written in ascending id order; the row position in the output is
//! the recommendation index the corpus embeddings are aligned with.
//!
//! Usage: `DATABASE_URL=postgres://... export-catalog [output.csv]`

use anyhow::{Context, Result};
use book_recommender::models::CatalogRecord;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use sqlx::postgres::PgPoolOptions;
use std::{env, fs, path::PathBuf};

const DEFAULT_OUTPUT_PATH: &str = "model_components/df_books.csv";

const CATALOG_QUERY: &str = r#"
    SELECT
        id::int8 AS id,
        title::text AS title,
        description::text AS description,
        authors::text AS authors,
        image::text AS image,
        previewlink::text AS previewlink,
        publisher::text AS publisher,
        publisheddate::text AS publisheddate,
        infolink::text AS infolink,
        categories::text AS categories,
        price::float8 AS price,
        average_score::float8 AS average_score,
        reviews_count::int8 AS reviews_count
    FROM books
    ORDER BY id ASC
"#;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let output = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_PATH));
    let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

    info!("🚀 Exporting catalog to {}", output.display());

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&database_url)
        .await
        .context("Failed to connect to the catalog database")?;

    let records: Vec<CatalogRecord> = sqlx::query_as(CATALOG_QUERY)
        .fetch_all(&pool)
        .await
        .context("Failed to query books")?;
    info!("📚 {} books found in the database", records.len());

    if records.is_empty() {
        warn!("⚠️  No books found; writing a header-only catalog");
    }

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let mut writer = csv::Writer::from_path(&output)
        .with_context(|| format!("Failed to create {}", output.display()))?;

    let progress = ProgressBar::new(records.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} rows")
            .progress_chars("=>-"),
    );

    let mut missing_ids = 0usize;
    for record in &records {
        if record.id.is_none() {
            missing_ids += 1;
        }
        writer.serialize(record)?;
        progress.inc(1);
    }
    writer.flush()?;
    progress.finish();

    if missing_ids > 0 {
        warn!("⚠️  {} rows have no id and cannot be mapped back", missing_ids);
    }
    info!("✅ Catalog written to {}", output.display());

    Ok(())
}
