//! Print the catalog rows behind recommendation indices.
//!
//! Usage: `lookup <catalog.csv> <index> [<index> ...]`

use anyhow::{bail, Context, Result};
use book_recommender::models::book::read_catalog;
use console::style;
use std::{env, path::PathBuf};

fn main() -> Result<()> {
    let mut args = env::args().skip(1);
    let catalog_path = match args.next() {
        Some(path) => PathBuf::from(path),
        None => bail!("usage: lookup <catalog.csv> <index> [<index> ...]"),
    };

    let indices = args
        .map(|arg| {
            arg.parse::<usize>()
                .with_context(|| format!("'{}' is not a row index", arg))
        })
        .collect::<Result<Vec<_>>>()?;
    if indices.is_empty() {
        bail!("no indices given");
    }

    let catalog = read_catalog(&catalog_path)
        .with_context(|| format!("Failed to read {}", catalog_path.display()))?;

    println!("{}", style("--- Catalog rows by recommendation index ---").bold());
    for index in indices {
        match catalog.get(index) {
            Some(book) => println!(
                "{} {}: {} by {}",
                style("Index").cyan(),
                index,
                book.title.as_deref().unwrap_or("<untitled>"),
                book.authors.as_deref().unwrap_or("<unknown authors>")
            ),
            None => println!(
                "{} {}: {}",
                style("Index").cyan(),
                index,
                style(format!("not found ({} rows in catalog)", catalog.len())).red()
            ),
        }
    }

    Ok(())
}
