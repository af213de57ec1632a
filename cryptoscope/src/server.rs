use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rocket::data::Data;
use rocket::fairing::{Fairing, Info, Kind};
use rocket::figment::Figment;
use rocket::http::{Header, Status};
use rocket::serde::json::Json;
use rocket::{catch, catchers, get, options, routes, Build, Request, Response, Rocket, State};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};

use common::Config;

use crate::analysis::Analyzer;
use crate::models::AnalysisResult;
use crate::news::{FetchError, NewsClient, NewsQuery};

pub const DEFAULT_CURRENCIES: &str = "BTC,ETH";
pub const DEFAULT_HISTORY_LIMIT: i64 = 10;
const MAX_HISTORY_LIMIT: i64 = 100;

pub const DEFAULT_CORS_ORIGINS: [&str; 2] = ["http://localhost:3000", "http://localhost:3005"];

/// Application state stored inside Rocket managed state.
pub struct AppState {
    pub started_at: DateTime<Utc>,
    pub analyzer: Arc<Analyzer>,
    /// `None` when no API token is configured; news routes then answer 503.
    pub news: Option<Arc<NewsClient>>,
    pub currencies: String,
    pub history_default_limit: i64,
}

impl AppState {
    pub fn new(analyzer: Arc<Analyzer>, news: Option<Arc<NewsClient>>) -> Self {
        Self {
            started_at: Utc::now(),
            analyzer,
            news,
            currencies: DEFAULT_CURRENCIES.to_string(),
            history_default_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    /// Apply `[news_api].currencies` and `[analysis].history_default_limit`.
    pub fn with_config(mut self, config: &Config) -> Self {
        if let Some(currencies) = config.news_api().currencies {
            self.currencies = currencies;
        }
        if let Some(limit) = config.analysis().history_default_limit {
            self.history_default_limit = limit.clamp(1, MAX_HISTORY_LIMIT);
        }
        self
    }
}

/// JSON body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub details: String,
}

type ApiError = (Status, Json<ErrorBody>);
type ApiResult<T> = Result<Json<T>, ApiError>;

fn api_error(status: Status, error: impl Into<String>, details: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: error.into(),
            details: details.into(),
        }),
    )
}

fn fetch_failed(operation: &'static str, e: FetchError) -> ApiError {
    error!(operation, status = ?e.status(), "news fetch failed: {}", e);
    let status = e
        .status()
        .and_then(Status::from_code)
        .unwrap_or(Status::InternalServerError);
    api_error(status, "upstream error", e.details())
}

fn news_client(state: &AppState) -> Result<&NewsClient, ApiError> {
    state.news.as_deref().ok_or_else(|| {
        api_error(
            Status::ServiceUnavailable,
            "news API not configured",
            "no API token available for the external news API",
        )
    })
}

#[derive(Serialize)]
struct AnalyzeResponse {
    cryptocurrency: String,
    analysis: AnalysisResult,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_seconds: i64,
    news_api: bool,
}

#[get("/health")]
async fn health(state: &State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
        news_api: state.news.is_some(),
    })
}

/// Latest news, proxied through the throttled client.
#[get("/news")]
async fn latest_news(state: &State<AppState>) -> ApiResult<Value> {
    let client = news_client(state)?;
    client
        .fetch(&NewsQuery::news())
        .await
        .map(Json)
        .map_err(|e| fetch_failed("news", e))
}

/// Important news for the configured currency set.
#[get("/analyze?<keyword>")]
async fn important_news(state: &State<AppState>, keyword: Option<String>) -> ApiResult<Value> {
    let keyword = keyword.filter(|k| !k.trim().is_empty()).ok_or_else(|| {
        api_error(Status::BadRequest, "keyword is required", "missing query parameter 'keyword'")
    })?;

    let client = news_client(state)?;
    info!(keyword = %keyword, currencies = %state.currencies, "fetching important news");
    client
        .fetch(&NewsQuery::important(state.currencies.clone()))
        .await
        .map(Json)
        .map_err(|e| fetch_failed("important_news", e))
}

#[get("/analyze/<cryptocurrency>")]
async fn analyze(state: &State<AppState>, cryptocurrency: &str) -> ApiResult<AnalyzeResponse> {
    info!(key = %cryptocurrency, "analysis requested");
    match state.analyzer.analyze(cryptocurrency).await {
        Ok(analysis) => Ok(Json(AnalyzeResponse {
            cryptocurrency: cryptocurrency.to_string(),
            analysis,
        })),
        Err(e) => {
            error!(key = %cryptocurrency, "analysis failed: {:#}", e);
            Err(api_error(Status::InternalServerError, "analysis failed", format!("{:#}", e)))
        }
    }
}

#[get("/history/<cryptocurrency>?<limit>")]
async fn history(
    state: &State<AppState>,
    cryptocurrency: &str,
    limit: Option<i64>,
) -> ApiResult<Vec<AnalysisResult>> {
    let limit = limit
        .unwrap_or(state.history_default_limit)
        .clamp(1, MAX_HISTORY_LIMIT);

    state
        .analyzer
        .history(cryptocurrency, limit)
        .await
        .map(Json)
        .map_err(|e| {
            error!(key = %cryptocurrency, limit, "history lookup failed: {:#}", e);
            api_error(Status::InternalServerError, "history lookup failed", format!("{:#}", e))
        })
}

/// CORS preflight for any path.
#[options("/<_..>")]
fn preflight() -> Status {
    Status::NoContent
}

#[catch(default)]
fn default_catcher(status: Status, req: &Request<'_>) -> Json<ErrorBody> {
    Json(ErrorBody {
        error: status.reason_lossy().to_string(),
        details: format!("{} {}", req.method(), req.uri()),
    })
}

/// Adds CORS headers for allowed origins.
pub struct Cors {
    allowed_origins: Vec<String>,
}

impl Cors {
    pub fn new(allowed_origins: Vec<String>) -> Self {
        Self { allowed_origins }
    }

    pub fn from_config(config: &Config) -> Self {
        match config.cors.as_ref() {
            Some(c) if !c.allowed_origins.is_empty() => Self::new(c.allowed_origins.clone()),
            _ => Self::default(),
        }
    }

    fn allows(&self, origin: &str) -> bool {
        self.allowed_origins.iter().any(|o| o == "*" || o == origin)
    }
}

impl Default for Cors {
    fn default() -> Self {
        Self::new(DEFAULT_CORS_ORIGINS.iter().map(|o| o.to_string()).collect())
    }
}

#[rocket::async_trait]
impl Fairing for Cors {
    fn info(&self) -> Info {
        Info {
            name: "CORS headers",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, req: &'r Request<'_>, res: &mut Response<'r>) {
        let Some(origin) = req.headers().get_one("Origin") else {
            return;
        };
        if !self.allows(origin) {
            return;
        }
        res.set_header(Header::new("Access-Control-Allow-Origin", origin.to_string()));
        res.set_header(Header::new("Vary", "Origin"));
        res.set_header(Header::new(
            "Access-Control-Allow-Methods",
            "GET, POST, PUT, DELETE, OPTIONS",
        ));
        res.set_header(Header::new(
            "Access-Control-Allow-Headers",
            "Content-Type, Authorization",
        ));
    }
}

/// Logs method and URI of every incoming request.
pub struct RequestLogger;

#[rocket::async_trait]
impl Fairing for RequestLogger {
    fn info(&self) -> Info {
        Info {
            name: "Request logger",
            kind: Kind::Request,
        }
    }

    async fn on_request(&self, req: &mut Request<'_>, _data: &mut Data<'_>) {
        info!(method = %req.method(), uri = %req.uri(), "request");
    }
}

/// Assemble the Rocket instance without launching it.
pub fn build_rocket(figment: Figment, state: AppState, cors: Cors) -> Rocket<Build> {
    rocket::custom(figment)
        .manage(state)
        .attach(RequestLogger)
        .attach(cors)
        .mount("/", routes![health, preflight])
        .mount(
            "/api/crypto",
            routes![latest_news, important_news, analyze, history],
        )
        .register("/", catchers![default_catcher])
}

/// Build and launch the Rocket server, applying `[server].bind` and `[server].port`.
///
/// This function blocks until the Rocket server shuts down and returns an error if
/// Rocket fails to start.
pub async fn launch_rocket(state: AppState, config: &Config) -> Result<()> {
    let mut fig = rocket::Config::figment();
    if let Some(server) = config.server.as_ref() {
        if let Some(bind) = server.bind.as_deref() {
            fig = fig.merge(("address", bind.to_string()));
        }
        if let Some(port) = server.port {
            fig = fig.merge(("port", port));
        }
    }

    let rocket = build_rocket(fig, state, Cors::from_config(config));

    tracing::info!("Starting Rocket HTTP server");
    rocket
        .launch()
        .await
        .map_err(|e| anyhow!("Rocket failed: {}", e))?;

    tracing::info!("Rocket HTTP server has shut down");
    Ok(())
}
