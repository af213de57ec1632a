/*
cryptoscope - main.rs
Starts the Rocket HTTP server exposing the sentiment analysis and the throttled news proxy.
*/

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use common::{init_db_pool, Config};
use cryptoscope::analysis::Analyzer;
use cryptoscope::news::NewsClient;
use cryptoscope::server::{self, AppState};
use cryptoscope::storage::{self, SqliteStore};

#[derive(Parser, Debug)]
#[command(name = "cryptoscope", about = "Crypto news sentiment analyzer")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Create the DB schema and exit
    #[arg(long)]
    schema_only: bool,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let default_path = PathBuf::from("config.default.toml");
    let override_path = if let Some(p) = args.config {
        if !p.exists() {
            error!(path = ?p, "specified config file not found");
            return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
        }
        Some(p)
    } else {
        let p = PathBuf::from("config.toml");
        if p.exists() { Some(p) } else { None }
    };

    let config = match Config::load_with_defaults(
        if default_path.exists() { Some(&default_path) } else { None },
        override_path.as_deref(),
    )
    .await
    {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("failed to load configuration: {:#}", e);
            return Err(e);
        }
    };
    info!(default = ?default_path, override = ?override_path, "configuration loaded");

    let db_path = config.database.path.clone();
    let pool = match init_db_pool(&db_path).await {
        Ok(p) => p,
        Err(e) => {
            error!(db_path = %db_path, "failed to initialize database pool: {:#}", e);
            return Err(e);
        }
    };
    info!(db_path = %db_path, "database pool ready");

    if args.schema_only || config.auto_migrate() {
        storage::ensure_schema(&pool).await?;
    }
    if args.schema_only {
        info!("schema ensured; exiting (--schema-only)");
        return Ok(());
    }

    let news = match NewsClient::from_config(&config.news_api()) {
        Ok(client) => {
            info!("news API client initialized");
            Some(Arc::new(client))
        }
        Err(e) => {
            warn!("news API disabled: {:#}", e);
            None
        }
    };

    let store = Arc::new(SqliteStore::new(pool));
    let mut analyzer = Analyzer::new(store.clone(), store);
    if let Some(hours) = config.analysis().window_hours {
        analyzer = analyzer.with_window(chrono::Duration::hours(hours));
    }

    let state = AppState::new(Arc::new(analyzer), news).with_config(&config);

    info!("Launching Rocket HTTP server");
    if let Err(e) = server::launch_rocket(state, &config).await {
        error!("Rocket server failed: {:#}", e);
        return Err(e);
    }

    info!("Shutdown complete");
    Ok(())
}
