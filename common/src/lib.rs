/*!
common/src/lib.rs

Shared configuration types and DB helper functions for Cryptoscope.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader merging a default and an override config file
- A helper to initialize an SQLite connection pool
*/

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

/// Database configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the sqlite database file (e.g. "data/cryptoscope.db")
    pub path: String,
}

/// HTTP listener overrides merged into Rocket's figment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: Option<String>,
    pub port: Option<u16>,
}

/// External news API (CryptoPanic-compatible) and throttling policy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewsApiConfig {
    pub api_url: Option<String>,
    /// Name of the environment variable holding the API token
    pub api_key_env: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub min_interval_ms: Option<u64>,
    pub cooldown_seconds: Option<u64>,
    pub max_attempts: Option<u32>,
    pub retry_budget_seconds: Option<u64>,
    /// Comma-separated currency codes used by the keyword analysis route
    pub currencies: Option<String>,
}

/// Accepted `analysis.window_hours` values: one hour up to one year.
pub const WINDOW_HOURS_RANGE: std::ops::RangeInclusive<i64> = 1..=8760;

/// Sentiment analysis window and history defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub window_hours: Option<i64>,
    pub history_default_limit: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

/// Admin / maintenance config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    pub auto_migrate: Option<bool>,
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: Option<ServerConfig>,
    pub news_api: Option<NewsApiConfig>,
    pub analysis: Option<AnalysisConfig>,
    pub cors: Option<CorsConfig>,
    pub admin: Option<AdminConfig>,
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    ///
    /// Example:
    ///   let cfg = Config::from_file("config.toml").await?;
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(default_path: Option<&Path>, override_path: Option<&Path>) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        for (label, path) in [("default", default_path), ("override", override_path)] {
            let Some(path) = path else { continue };
            if !path.exists() {
                continue;
            }
            let data = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {} config: {}", label, path.display()))?;
            let val: toml::Value = toml::from_str(&data)
                .with_context(|| format!("Failed to parse {} configuration", label))?;
            merge_toml(&mut config_value, val);
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values that are out of range for the services using them.
    pub fn validate(&self) -> Result<()> {
        if let Some(hours) = self.analysis().window_hours {
            if !WINDOW_HOURS_RANGE.contains(&hours) {
                bail!(
                    "analysis.window_hours must be within {}..={}, got {}",
                    WINDOW_HOURS_RANGE.start(),
                    WINDOW_HOURS_RANGE.end(),
                    hours
                );
            }
        }
        Ok(())
    }

    pub fn news_api(&self) -> NewsApiConfig {
        self.news_api.clone().unwrap_or_default()
    }

    pub fn analysis(&self) -> AnalysisConfig {
        self.analysis.clone().unwrap_or_default()
    }

    pub fn auto_migrate(&self) -> bool {
        self.admin.as_ref().and_then(|a| a.auto_migrate).unwrap_or(false)
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Initialize an SQLite connection pool.
///
/// This function will create the parent directory if necessary, ensure the DB file exists
/// (attempting to create it if missing), and return a configured `SqlitePool`:
/// - max_connections: 5
/// - WAL journal mode
///
/// Schema creation is left to the caller (see `cryptoscope::storage::ensure_schema`).
///
/// Example:
///   let pool = init_db_pool("data/cryptoscope.db").await?;
pub async fn init_db_pool(path: &str) -> Result<SqlitePool> {
    if let Some(parent) = Path::new(path).parent() {
        tokio::fs::create_dir_all(parent).await.with_context(|| {
            format!("Failed to create DB parent directory: {}", parent.display())
        })?;
    }

    // Surface filesystem permission or path issues before the SQLite connection attempt.
    tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to create or open DB file: {}", path))?;

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to sqlite database at path: {}", path))?;

    Ok(pool)
}
