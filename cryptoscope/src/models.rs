use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentiment label attached to a news item upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Neutral => "neutral",
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sentiment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "positive" => Ok(Sentiment::Positive),
            "negative" => Ok(Sentiment::Negative),
            "neutral" => Ok(Sentiment::Neutral),
            other => anyhow::bail!("unknown sentiment label: {}", other),
        }
    }
}

/// Discrete action derived from (sentiment, confidence)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recommendation {
    Buy,
    Sell,
    Hold,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::Buy => "buy",
            Recommendation::Sell => "sell",
            Recommendation::Hold => "hold",
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Recommendation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" => Ok(Recommendation::Buy),
            "sell" => Ok(Recommendation::Sell),
            "hold" => Ok(Recommendation::Hold),
            other => anyhow::bail!("unknown recommendation: {}", other),
        }
    }
}

/// Pre-labeled news item produced by the ingestion side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsItem {
    pub title: String,
    pub url: String,
    pub sentiment: Sentiment,
    pub keyword: String,
    pub created_at: DateTime<Utc>,
}

/// Per-label tallies for one analysis run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SentimentCounts {
    pub positive: usize,
    pub negative: usize,
    pub neutral: usize,
}

impl SentimentCounts {
    pub fn total(&self) -> usize {
        self.positive + self.negative + self.neutral
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisStats {
    pub total_news: usize,
    pub positive_news: usize,
    pub negative_news: usize,
}

impl From<SentimentCounts> for AnalysisStats {
    fn from(counts: SentimentCounts) -> Self {
        Self {
            total_news: counts.total(),
            positive_news: counts.positive,
            negative_news: counts.negative,
        }
    }
}

/// Denormalized reference to a news item that fed an analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    pub url: String,
    pub sentiment: Sentiment,
}

impl From<&NewsItem> for Source {
    fn from(item: &NewsItem) -> Self {
        Self {
            title: item.title.clone(),
            url: item.url.clone(),
            sentiment: item.sentiment,
        }
    }
}

/// Persisted outcome of one analysis call. Never updated once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub cryptocurrency: String,
    pub sentiment: Sentiment,
    pub confidence: f64,
    pub recommendation: Recommendation,
    pub reasons: Vec<String>,
    pub stats: AnalysisStats,
    pub sources: Vec<Source>,
    pub created_at: DateTime<Utc>,
}
