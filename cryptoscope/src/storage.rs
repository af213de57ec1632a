use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};

use crate::models::{AnalysisResult, AnalysisStats, NewsItem, Sentiment, Source};

/// Read side: pre-labeled news items filled by the ingestion job.
#[async_trait::async_trait]
pub trait ItemStore: Send + Sync {
    /// Items whose keyword contains `keyword` (case-insensitive) created at or after `since`.
    async fn items_since(&self, keyword: &str, since: DateTime<Utc>) -> Result<Vec<NewsItem>>;
}

/// Append-only log of analysis results.
#[async_trait::async_trait]
pub trait ResultStore: Send + Sync {
    async fn save_analysis(&self, result: &AnalysisResult) -> Result<i64>;

    /// Newest first, exact match on `cryptocurrency`.
    async fn recent_analyses(&self, cryptocurrency: &str, limit: i64) -> Result<Vec<AnalysisResult>>;
}

/// SQLite implementation of both stores.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

}

/// Create the tables and indexes if they do not exist yet.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    info!("storage: ensuring DB schema (CREATE TABLE IF NOT EXISTS ...)");

    let stmts = [
        r#"
        CREATE TABLE IF NOT EXISTS news_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            url TEXT NOT NULL,
            sentiment TEXT NOT NULL,
            keyword TEXT NOT NULL,
            keyword_folded TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        "#,
        "CREATE INDEX IF NOT EXISTS idx_news_items_created_at ON news_items (created_at);",
        r#"
        CREATE TABLE IF NOT EXISTS analyses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            cryptocurrency TEXT NOT NULL,
            sentiment TEXT NOT NULL,
            confidence REAL NOT NULL,
            recommendation TEXT NOT NULL,
            reasons_json TEXT NOT NULL,
            total_news INTEGER NOT NULL DEFAULT 0,
            positive_news INTEGER NOT NULL DEFAULT 0,
            negative_news INTEGER NOT NULL DEFAULT 0,
            sources_json TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        "#,
        "CREATE INDEX IF NOT EXISTS idx_analyses_crypto_created ON analyses (cryptocurrency, created_at);",
    ];

    for s in &stmts {
        sqlx::query(s)
            .execute(pool)
            .await
            .context("failed to ensure schema")?;
    }

    info!("storage: DB schema ensured");
    Ok(())
}

/// Insert one labeled news item. Returns the row id.
pub async fn insert_news_item(pool: &SqlitePool, item: &NewsItem) -> Result<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO news_items (title, url, sentiment, keyword, keyword_folded, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(&item.title)
    .bind(&item.url)
    .bind(item.sentiment.as_str())
    .bind(&item.keyword)
    .bind(fold_case(&item.keyword))
    .bind(item.created_at.timestamp_millis())
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to insert news item {}", item.url))?;

    Ok(id)
}

#[async_trait::async_trait]
impl ItemStore for SqliteStore {
    async fn items_since(&self, keyword: &str, since: DateTime<Utc>) -> Result<Vec<NewsItem>> {
        // SQLite LIKE only folds ASCII, so both sides are lowercased in Rust.
        let pattern = format!("%{}%", escape_like(&fold_case(keyword)));

        let rows = sqlx::query(
            r#"
            SELECT title, url, sentiment, keyword, created_at
            FROM news_items
            WHERE keyword_folded LIKE ? ESCAPE '\' AND created_at >= ?
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(&pattern)
        .bind(since.timestamp_millis())
        .fetch_all(&self.pool)
        .await
        .context("failed to query news items")?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let url: String = row.get("url");
            let label: String = row.get("sentiment");
            let sentiment = match label.parse::<Sentiment>() {
                Ok(s) => s,
                Err(e) => {
                    warn!(url = %url, label = %label, "storage: skipping news item: {}", e);
                    continue;
                }
            };

            items.push(NewsItem {
                title: row.get("title"),
                url,
                sentiment,
                keyword: row.get("keyword"),
                created_at: from_millis(row.get("created_at"))?,
            });
        }

        debug!(keyword = %keyword, count = items.len(), "storage: news items loaded");
        Ok(items)
    }
}

#[async_trait::async_trait]
impl ResultStore for SqliteStore {
    async fn save_analysis(&self, result: &AnalysisResult) -> Result<i64> {
        let reasons_json = serde_json::to_string(&result.reasons)
            .context("failed to serialize reasons")?;
        let sources_json = serde_json::to_string(&result.sources)
            .context("failed to serialize sources")?;

        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO analyses
            (cryptocurrency, sentiment, confidence, recommendation, reasons_json,
             total_news, positive_news, negative_news, sources_json, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&result.cryptocurrency)
        .bind(result.sentiment.as_str())
        .bind(result.confidence)
        .bind(result.recommendation.as_str())
        .bind(&reasons_json)
        .bind(result.stats.total_news as i64)
        .bind(result.stats.positive_news as i64)
        .bind(result.stats.negative_news as i64)
        .bind(&sources_json)
        .bind(result.created_at.timestamp_millis())
        .fetch_one(&self.pool)
        .await
        .context("failed to insert analysis")?;

        Ok(id)
    }

    async fn recent_analyses(&self, cryptocurrency: &str, limit: i64) -> Result<Vec<AnalysisResult>> {
        let rows = sqlx::query(
            r#"
            SELECT cryptocurrency, sentiment, confidence, recommendation, reasons_json,
                   total_news, positive_news, negative_news, sources_json, created_at
            FROM analyses
            WHERE cryptocurrency = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(cryptocurrency)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("failed to query analyses")?;

        rows.into_iter()
            .map(|row| -> Result<AnalysisResult> {
                let reasons: Vec<String> = serde_json::from_str(&row.get::<String, _>("reasons_json"))
                    .context("failed to parse stored reasons")?;
                let sources: Vec<Source> = serde_json::from_str(&row.get::<String, _>("sources_json"))
                    .context("failed to parse stored sources")?;

                Ok(AnalysisResult {
                    cryptocurrency: row.get("cryptocurrency"),
                    sentiment: row.get::<String, _>("sentiment").parse()?,
                    confidence: row.get("confidence"),
                    recommendation: row.get::<String, _>("recommendation").parse()?,
                    reasons,
                    stats: AnalysisStats {
                        total_news: row.get::<i64, _>("total_news") as usize,
                        positive_news: row.get::<i64, _>("positive_news") as usize,
                        negative_news: row.get::<i64, _>("negative_news") as usize,
                    },
                    sources,
                    created_at: from_millis(row.get("created_at"))?,
                })
            })
            .collect()
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .with_context(|| format!("invalid stored timestamp: {}", ms))
}

fn fold_case(keyword: &str) -> String {
    keyword.to_lowercase()
}

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("btc"), "btc");
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
    }

    #[test]
    fn millis_round_trip_keeps_precision() {
        let ts = Utc.timestamp_millis_opt(1_700_000_123_456).single().unwrap();
        assert_eq!(from_millis(ts.timestamp_millis()).unwrap(), ts);
    }
}
