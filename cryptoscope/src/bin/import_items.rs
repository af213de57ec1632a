//! Load pre-labeled news items from a JSON file into the item store.
//!
//! Input: a JSON array of `{title, url, sentiment, keyword, createdAt?}` objects.
//! Items without `createdAt` are stamped with the import time.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Deserialize;
use tracing::info;

use common::{init_db_pool, Config};
use cryptoscope::models::{NewsItem, Sentiment};
use cryptoscope::storage;

#[derive(Parser, Debug)]
#[command(name = "import_items", about = "Import labeled news items into the Cryptoscope DB")]
struct Args {
    /// JSON file with the items
    input: PathBuf,

    /// Path to config.toml (database location)
    #[arg(long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportItem {
    title: String,
    url: String,
    sentiment: Sentiment,
    keyword: String,
    created_at: Option<DateTime<Utc>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();
    let config = Config::from_file(&args.config).await?;

    let raw = tokio::fs::read_to_string(&args.input)
        .await
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let items: Vec<ImportItem> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", args.input.display()))?;

    let pool = init_db_pool(&config.database.path).await?;
    storage::ensure_schema(&pool).await?;

    let now = Utc::now();
    for item in &items {
        let item = NewsItem {
            title: item.title.clone(),
            url: item.url.clone(),
            sentiment: item.sentiment,
            keyword: item.keyword.clone(),
            created_at: item.created_at.unwrap_or(now),
        };
        storage::insert_news_item(&pool, &item).await?;
    }

    info!(count = items.len(), db = %config.database.path, "news items imported");
    Ok(())
}
