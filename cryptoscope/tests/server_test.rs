use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cryptoscope::analysis::Analyzer;
use cryptoscope::models::{NewsItem, Sentiment};
use cryptoscope::news::{FetchPolicy, NewsClient, RateLimiter};
use cryptoscope::server::{build_rocket, AppState, Cors};
use cryptoscope::storage::{self, SqliteStore};
use mockito::Matcher;
use rocket::http::{Header, Status};
use rocket::local::asynchronous::Client;
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

async fn setup_test_db() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory sqlite pool");
    storage::ensure_schema(&pool).await.expect("ensure schema");
    pool
}

async fn client_with(pool: &SqlitePool, news: Option<NewsClient>) -> Client {
    let store = Arc::new(SqliteStore::new(pool.clone()));
    let analyzer = Arc::new(Analyzer::new(store.clone(), store));
    let state = AppState::new(analyzer, news.map(Arc::new));
    let rocket = build_rocket(rocket::Config::figment(), state, Cors::default());
    Client::tracked(rocket).await.expect("valid rocket instance")
}

fn news_client(server: &mockito::Server) -> NewsClient {
    let url = format!("{}/api/v1/posts/", server.url());
    NewsClient::new(&url, "test-token", Arc::new(RateLimiter::new(Duration::from_millis(10))))
        .expect("build news client")
        .with_policy(FetchPolicy {
            timeout: Duration::from_secs(5),
            cooldown: Duration::from_millis(20),
            max_attempts: 2,
            retry_budget: Duration::from_secs(10),
        })
}

#[tokio::test]
async fn test_analyze_route_wraps_result() {
    let pool = setup_test_db().await;
    for i in 0..4 {
        let item = NewsItem {
            title: format!("BTC headline {}", i),
            url: format!("https://news.example/btc/{}", i),
            sentiment: Sentiment::Positive,
            keyword: "bitcoin".into(),
            created_at: Utc::now() - chrono::Duration::hours(1),
        };
        storage::insert_news_item(&pool, &item).await.unwrap();
    }
    let client = client_with(&pool, None).await;

    let response = client.get("/api/crypto/analyze/bitcoin").dispatch().await;
    assert_eq!(response.status(), Status::Ok);

    let body: Value = response.into_json().await.expect("json body");
    assert_eq!(body["cryptocurrency"], "bitcoin");
    assert_eq!(body["analysis"]["sentiment"], "positive");
    assert_eq!(body["analysis"]["recommendation"], "buy");
    assert_eq!(body["analysis"]["confidence"], 0.7);
    assert_eq!(body["analysis"]["stats"]["totalNews"], 4);
    assert_eq!(body["analysis"]["sources"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn test_history_route_returns_newest_first_with_limit() {
    let pool = setup_test_db().await;
    let client = client_with(&pool, None).await;

    for _ in 0..3 {
        let r = client.get("/api/crypto/analyze/ethereum").dispatch().await;
        assert_eq!(r.status(), Status::Ok);
    }

    let response = client.get("/api/crypto/history/ethereum?limit=2").dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    let body: Value = response.into_json().await.expect("json body");
    let entries = body.as_array().expect("array");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["reasons"][0], "insufficient data");

    let all: Value = client
        .get("/api/crypto/history/ethereum")
        .dispatch()
        .await
        .into_json()
        .await
        .expect("json body");
    assert_eq!(all.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_keyword_is_required() {
    let pool = setup_test_db().await;
    let client = client_with(&pool, None).await;

    for uri in ["/api/crypto/analyze", "/api/crypto/analyze?keyword=%20"] {
        let response = client.get(uri).dispatch().await;
        assert_eq!(response.status(), Status::BadRequest);
        let body: Value = response.into_json().await.expect("json body");
        assert_eq!(body["error"], "keyword is required");
        assert!(body["details"].is_string());
    }
}

#[tokio::test]
async fn test_news_routes_without_token_are_unavailable() {
    let pool = setup_test_db().await;
    let client = client_with(&pool, None).await;

    let response = client.get("/api/crypto/news").dispatch().await;
    assert_eq!(response.status(), Status::ServiceUnavailable);
}

#[tokio::test]
async fn test_news_route_proxies_upstream() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/api/v1/posts/")
        .match_query(Matcher::UrlEncoded("kind".into(), "news".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"results": [{"title": "ETH upgrade"}]}"#)
        .create_async()
        .await;

    let pool = setup_test_db().await;
    let client = client_with(&pool, Some(news_client(&server))).await;

    let response = client.get("/api/crypto/news").dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    let body: Value = response.into_json().await.expect("json body");
    assert_eq!(body["results"][0]["title"], "ETH upgrade");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_important_news_uses_fixed_currency_set() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/api/v1/posts/")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("currencies".into(), "BTC,ETH".into()),
            Matcher::UrlEncoded("filter".into(), "important".into()),
        ]))
        .with_status(200)
        .with_body(r#"{"results": []}"#)
        .create_async()
        .await;

    let pool = setup_test_db().await;
    let client = client_with(&pool, Some(news_client(&server))).await;

    let response = client.get("/api/crypto/analyze?keyword=bitcoin").dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_upstream_status_is_mirrored() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/api/v1/posts/")
        .match_query(Matcher::Any)
        .with_status(401)
        .with_body(r#"{"info": "invalid token"}"#)
        .create_async()
        .await;

    let pool = setup_test_db().await;
    let client = client_with(&pool, Some(news_client(&server))).await;

    let response = client.get("/api/crypto/news").dispatch().await;
    assert_eq!(response.status(), Status::Unauthorized);
    let body: Value = response.into_json().await.expect("json body");
    assert_eq!(body["error"], "upstream error");
    assert!(body["details"].as_str().unwrap().contains("invalid token"));
}

#[tokio::test]
async fn test_cors_headers_for_allowed_origin() {
    let pool = setup_test_db().await;
    let client = client_with(&pool, None).await;

    let response = client
        .options("/api/crypto/analyze/bitcoin")
        .header(Header::new("Origin", "http://localhost:3000"))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::NoContent);
    assert_eq!(
        response.headers().get_one("Access-Control-Allow-Origin"),
        Some("http://localhost:3000")
    );

    let response = client
        .get("/health")
        .header(Header::new("Origin", "http://evil.example"))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    assert!(response.headers().get_one("Access-Control-Allow-Origin").is_none());
}

#[tokio::test]
async fn test_unknown_route_has_error_body() {
    let pool = setup_test_db().await;
    let client = client_with(&pool, None).await;

    let response = client.get("/api/crypto/nope/a/b").dispatch().await;
    assert_eq!(response.status(), Status::NotFound);
    let body: Value = response.into_json().await.expect("json body");
    assert!(body["error"].is_string());
    assert!(body["details"].is_string());
}
