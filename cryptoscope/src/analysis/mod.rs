use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::models::{AnalysisResult, AnalysisStats, Recommendation, Sentiment, Source};
use crate::storage::{ItemStore, ResultStore};

pub mod recommend;
pub mod sentiment;

pub const INSUFFICIENT_DATA_REASON: &str = "insufficient data";

/// Source of "now" for the trailing window
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock backed by `Utc::now`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Composes item lookup, aggregation, recommendation and persistence.
pub struct Analyzer {
    items: Arc<dyn ItemStore>,
    results: Arc<dyn ResultStore>,
    clock: Arc<dyn Clock>,
    window: Duration,
}

impl Analyzer {
    pub fn new(items: Arc<dyn ItemStore>, results: Arc<dyn ResultStore>) -> Self {
        Self {
            items,
            results,
            clock: Arc::new(SystemClock),
            window: Duration::hours(24),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub async fn analyze(&self, cryptocurrency: &str) -> Result<AnalysisResult> {
        self.analyze_at(cryptocurrency, self.clock.now()).await
    }

    /// Analyze the items seen in the window ending at `now` and append the result.
    pub async fn analyze_at(&self, cryptocurrency: &str, now: DateTime<Utc>) -> Result<AnalysisResult> {
        let since = now
            .checked_sub_signed(self.window)
            .with_context(|| {
                format!("analysis window {} reaches before the supported date range", self.window)
            })?;
        info!(key = %cryptocurrency, since = %since, "analysis: querying news items");

        let mut items = self
            .items
            .items_since(cryptocurrency, since)
            .await
            .with_context(|| format!("failed to query news items for {}", cryptocurrency))?;
        // Window is [now - window, now]; later items belong to a later analysis.
        items.retain(|item| item.created_at <= now);
        debug!(key = %cryptocurrency, count = items.len(), "analysis: items matched");

        let result = if items.is_empty() {
            info!(key = %cryptocurrency, "analysis: no items in window");
            insufficient_data(cryptocurrency, now)
        } else {
            let agg = sentiment::aggregate(&items);
            let advice = recommend::recommend(agg.sentiment, agg.confidence);
            AnalysisResult {
                cryptocurrency: cryptocurrency.to_string(),
                sentiment: agg.sentiment,
                confidence: agg.confidence,
                recommendation: advice.action,
                reasons: advice.reasons,
                stats: AnalysisStats::from(agg.counts),
                sources: items.iter().map(Source::from).collect(),
                created_at: now,
            }
        };

        let id = self
            .results
            .save_analysis(&result)
            .await
            .with_context(|| format!("failed to persist analysis for {}", cryptocurrency))?;

        info!(
            key = %cryptocurrency,
            id,
            sentiment = %result.sentiment,
            confidence = result.confidence,
            recommendation = %result.recommendation,
            "analysis: stored"
        );
        Ok(result)
    }

    pub async fn history(&self, cryptocurrency: &str, limit: i64) -> Result<Vec<AnalysisResult>> {
        self.results
            .recent_analyses(cryptocurrency, limit)
            .await
            .with_context(|| format!("failed to load analysis history for {}", cryptocurrency))
    }
}

fn insufficient_data(cryptocurrency: &str, now: DateTime<Utc>) -> AnalysisResult {
    AnalysisResult {
        cryptocurrency: cryptocurrency.to_string(),
        sentiment: Sentiment::Neutral,
        confidence: 0.0,
        recommendation: Recommendation::Hold,
        reasons: vec![INSUFFICIENT_DATA_REASON.to_string()],
        stats: AnalysisStats::default(),
        sources: Vec::new(),
        created_at: now,
    }
}
