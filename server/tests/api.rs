//! End-to-end tests against the HTTP API: a real server on a random port,
//! an in-memory store, and a static token table.

use moonrace_engine::{mocks, MemoryStore, Store};
use moonrace_server::{Api, AuthResolver, Server, ServerConfig};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use uuid::Uuid;

struct TestContext {
    server: Arc<Server>,
    base_url: String,
    client: reqwest::Client,
    server_handle: tokio::task::JoinHandle<()>,
}

impl TestContext {
    async fn new() -> Self {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let config = ServerConfig {
            settlement_interval_secs: 0,
            ..ServerConfig::default()
        };
        let auth = AuthResolver::static_tokens(&[("token-a", "user-a"), ("token-b", "user-b")]);
        let server = Arc::new(Server::new(store, config, auth).unwrap());
        let router = Api::new(Arc::clone(&server)).router();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let server_handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        sleep(Duration::from_millis(50)).await;

        Self {
            server,
            base_url,
            client: reqwest::Client::new(),
            server_handle,
        }
    }

    /// Seeds a price snapshot directly, bypassing the ingest endpoint.
    fn seed_prices(&self, fetched_at_ms: u64) {
        self.server
            .store()
            .put_prices(&mocks::snapshot_at(fetched_at_ms))
            .unwrap();
    }

    async fn get(&self, path: &str, token: Option<&str>) -> reqwest::Response {
        let mut request = self.client.get(format!("{}{}", self.base_url, path));
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        request.send().await.unwrap()
    }

    async fn post(&self, path: &str, token: Option<&str>, body: Value) -> reqwest::Response {
        let mut request = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(&body);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        request.send().await.unwrap()
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        self.server_handle.abort();
    }
}

async fn json_body(response: reqwest::Response) -> Value {
    response.json().await.unwrap()
}

fn ingest_body(prices: Value, fetched_at_ms: u64) -> Value {
    json!({ "prices": prices, "fetchedAtMs": fetched_at_ms })
}

#[tokio::test]
async fn test_healthz() {
    let ctx = TestContext::new().await;
    let response = ctx.get("/healthz", None).await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "ok": true }));
}

#[tokio::test]
async fn test_health_reports_store_and_prices() {
    let ctx = TestContext::new().await;

    let body = json_body(ctx.get("/health", None).await).await;
    assert_eq!(body["healthy"], json!(true));
    assert_eq!(body["storeReachable"], json!(true));
    assert_eq!(body["hasPrices"], json!(false));

    ctx.seed_prices(1_000);
    let body = json_body(ctx.get("/health", None).await).await;
    assert_eq!(body["hasPrices"], json!(true));
    assert_eq!(body["version"], json!(env!("CARGO_PKG_VERSION")));
}

#[tokio::test]
async fn test_rejects_missing_and_invalid_tokens() {
    let ctx = TestContext::new().await;

    let body = json!({ "durationDays": 30, "allocation": { "BTC": 10 } });
    let response = ctx.post("/games", None, body.clone()).await;
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"], json!("Unauthorized"));

    let response = ctx.post("/games", Some("not-a-token"), body).await;
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);

    let response = ctx.get("/me/games", None).await;
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_create_join_and_leaderboard_flow() {
    let ctx = TestContext::new().await;

    // Ingest a snapshot over HTTP.
    let response = ctx
        .post(
            "/prices",
            None,
            ingest_body(json!({ "BTC": 60000.0, "ETH": 2500.0, "SOL": 150.0 }), 1_000),
        )
        .await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["stored"], json!(3));
    assert_eq!(body["fetchedAtMs"], json!(1_000));

    let snapshot = json_body(ctx.get("/prices", None).await).await;
    assert_eq!(snapshot["prices"]["BTC"], json!(60000.0));
    assert_eq!(snapshot["fetchedAtMs"], json!(1_000));

    // user-a creates a game and gets the creation receipt back.
    let response = ctx
        .post(
            "/games",
            Some("token-a"),
            json!({ "durationDays": 30, "allocation": { "BTC": 6, "ETH": 4 } }),
        )
        .await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let created = json_body(response).await;
    let game_id = created["gameId"].as_str().unwrap().to_string();
    let code = created["gameCode"].as_str().unwrap().to_string();
    assert_eq!(code.len(), 4);
    assert_eq!(created["durationDays"], json!(30));
    assert_eq!(created["entrySnapshot"]["prices"]["BTC"], json!(60000.0));
    let ends_at = created["endsAt"].as_u64().unwrap();

    // Looking up by code returns the full record.
    let found = json_body(ctx.get(&format!("/games/code/{code}"), Some("token-b")).await).await;
    assert_eq!(found["id"].as_str().unwrap(), game_id);
    assert_eq!(found["creator"], json!("user-a"));
    assert_eq!(found["participantCount"], json!(1));
    assert_eq!(found["isComplete"], json!(false));
    assert_eq!(found["endsAtMs"], json!(ends_at));
    assert!((found["currentValue"].as_f64().unwrap() - 10_000_000.0).abs() < 1e-6);

    // Joins in the same millisecond would tie on join order.
    sleep(Duration::from_millis(5)).await;

    // user-b joins with a different allocation.
    let response = ctx
        .post(
            "/games/join",
            Some("token-b"),
            json!({ "gameId": game_id, "allocation": { "ETH": 10 } }),
        )
        .await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let joined = json_body(response).await;
    assert_eq!(joined["gameCode"].as_str().unwrap(), code);
    assert_eq!(joined["participantCount"], json!(2));
    assert_eq!(joined["endsAt"], json!(ends_at));
    assert!(joined["participantId"]
        .as_str()
        .unwrap()
        .parse::<Uuid>()
        .is_ok());

    // Joining twice is rejected, and so is the creator joining again.
    let response = ctx
        .post(
            "/games/join",
            Some("token-b"),
            json!({ "gameId": game_id, "allocation": { "ETH": 10 } }),
        )
        .await;
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], json!("AlreadyJoined"));

    let response = ctx
        .post(
            "/games/join",
            Some("token-a"),
            json!({ "gameId": game_id, "allocation": { "BTC": 10 } }),
        )
        .await;
    assert_eq!(json_body(response).await["error"], json!("AlreadyJoined"));

    // Both portfolios are worth the starting balance, so the earlier join
    // (the creator) ranks first.
    let board = json_body(
        ctx.get(&format!("/games/{game_id}/leaderboard"), Some("token-a"))
            .await,
    )
    .await;
    let board = board.as_array().unwrap();
    assert_eq!(board.len(), 2);
    assert_eq!(board[0]["rank"], json!(1));
    assert_eq!(board[0]["userId"], json!("user-a"));
    assert_eq!(board[1]["rank"], json!(2));
    assert_eq!(board[1]["userId"], json!("user-b"));

    // Game details carry both participants in join order.
    let details = json_body(ctx.get(&format!("/games/{game_id}"), Some("token-b")).await).await;
    let participants = details["participants"].as_array().unwrap();
    assert_eq!(participants.len(), 2);
    assert_eq!(participants[0]["userId"], json!("user-a"));
    assert_eq!(participants[0]["isOriginalCreator"], json!(true));
    assert_eq!(participants[1]["userId"], json!("user-b"));
    assert_eq!(participants[1]["isOriginalCreator"], json!(false));

    // Each user sees the game in their list.
    let mine = json_body(ctx.get("/me/games", Some("token-b")).await).await;
    assert_eq!(mine.as_array().unwrap().len(), 1);
    assert_eq!(mine[0]["id"].as_str().unwrap(), game_id);
}

#[tokio::test]
async fn test_rejects_unbalanced_allocation() {
    let ctx = TestContext::new().await;
    ctx.seed_prices(1_000);

    let response = ctx
        .post(
            "/games",
            Some("token-a"),
            json!({ "durationDays": 30, "allocation": { "BTC": 5 } }),
        )
        .await;
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], json!("InvalidAllocation"));
}

#[tokio::test]
async fn test_rejects_unsupported_duration() {
    let ctx = TestContext::new().await;
    ctx.seed_prices(1_000);

    let response = ctx
        .post(
            "/games",
            Some("token-a"),
            json!({ "durationDays": 45, "allocation": { "BTC": 10 } }),
        )
        .await;
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], json!("InvalidDuration"));
}

#[tokio::test]
async fn test_join_unknown_game() {
    let ctx = TestContext::new().await;
    ctx.seed_prices(1_000);

    let response = ctx
        .post(
            "/games/join",
            Some("token-a"),
            json!({ "gameId": Uuid::new_v4(), "allocation": { "BTC": 10 } }),
        )
        .await;
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], json!("GameNotFound"));
}

#[tokio::test]
async fn test_preview() {
    let ctx = TestContext::new().await;

    // No prices yet: retryable, not a client error.
    let body = json!({ "allocation": { "ETH": 10 } });
    let response = ctx.post("/portfolio/preview", Some("token-a"), body.clone()).await;
    assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["error"], json!("PriceUnavailable"));

    ctx.seed_prices(1_000);
    let response = ctx.post("/portfolio/preview", Some("token-a"), body).await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let preview = json_body(response).await;
    assert!((preview["value"].as_f64().unwrap() - 10_000_000.0).abs() < 1e-6);
    assert_eq!(preview["pricedAtMs"], json!(1_000));

    // An explicit entry overrides the snapshot: entering ETH at 1000 and
    // valuing at the seeded 3000 triples the stake.
    let response = ctx
        .post(
            "/portfolio/preview",
            Some("token-a"),
            json!({ "allocation": { "ETH": 10 }, "entryPrices": { "ETH": 1000.0 } }),
        )
        .await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let preview = json_body(response).await;
    assert!((preview["value"].as_f64().unwrap() - 30_000_000.0).abs() < 1e-6);

    // An entry map that skips an allocated ticker is a client error.
    let response = ctx
        .post(
            "/portfolio/preview",
            Some("token-a"),
            json!({ "allocation": { "ETH": 10 }, "entryPrices": { "BTC": 60000.0 } }),
        )
        .await;
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], json!("MissingEntryPrice"));
}

#[tokio::test]
async fn test_ingest_validation() {
    let ctx = TestContext::new().await;

    let response = ctx
        .post("/prices", None, ingest_body(json!({ "XYZ": 1.0 }), 1_000))
        .await;
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    assert!(response.text().await.unwrap().contains("unsupported ticker"));

    let response = ctx.post("/prices", None, ingest_body(json!({}), 1_000)).await;
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    let response = ctx
        .post("/prices", None, ingest_body(json!({ "BTC": -1.0 }), 1_000))
        .await;
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    assert!(response.text().await.unwrap().contains("must be positive"));

    // Nothing was stored.
    let response = ctx.get("/prices", None).await;
    assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_settlement_run_and_history() {
    let ctx = TestContext::new().await;
    ctx.seed_prices(1_000);

    let response = ctx
        .post(
            "/games",
            Some("token-a"),
            json!({ "durationDays": 30, "allocation": { "BTC": 6, "ETH": 4 } }),
        )
        .await;
    let created = json_body(response).await;
    let game_id = created["gameId"].as_str().unwrap().to_string();

    let response = ctx.post("/settlement/run", None, json!({})).await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let report = json_body(response).await;
    assert_eq!(report["skipped"], json!(false));
    assert_eq!(report["gamesSeen"], json!(1));
    assert_eq!(report["gamesValued"], json!(1));
    assert_eq!(report["participantsValued"], json!(1));
    assert_eq!(report["totalRuns"], json!(1));

    // The first pass samples history: one game-level row plus one per
    // participant.
    let history = json_body(
        ctx.get(&format!("/games/{game_id}/history"), Some("token-a"))
            .await,
    )
    .await;
    assert_eq!(history.as_array().unwrap().len(), 2);
    assert!(history[0]["prices"].is_object() || history[1]["prices"].is_object());

    let response = ctx.post("/settlement/run", None, json!({})).await;
    let report = json_body(response).await;
    assert_eq!(report["totalRuns"], json!(2));

    let metrics = json_body(ctx.get("/metrics/settlement", None).await).await;
    assert_eq!(metrics["runs"], json!(2));
    assert_eq!(metrics["failures"], json!(0));
}

#[tokio::test]
async fn test_settlement_run_without_prices() {
    let ctx = TestContext::new().await;

    let response = ctx.post("/settlement/run", None, json!({})).await;
    assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["error"], json!("NoPriceData"));
}

#[tokio::test]
async fn test_http_metrics_counts() {
    let ctx = TestContext::new().await;
    ctx.seed_prices(1_000);

    // One rejected request, one successful create.
    ctx.post("/games", None, json!({ "durationDays": 30, "allocation": { "BTC": 10 } }))
        .await;
    let response = ctx
        .post(
            "/games",
            Some("token-a"),
            json!({ "durationDays": 30, "allocation": { "BTC": 10 } }),
        )
        .await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let metrics = json_body(ctx.get("/metrics/http", None).await).await;
    assert!(metrics["createGame"]["count"].as_u64().unwrap() >= 2);
    assert!(metrics["rejectedUnauthorized"].as_u64().unwrap() >= 1);
    assert_eq!(metrics["lookup"]["count"], json!(0));
}

#[tokio::test]
async fn test_config_endpoint() {
    let ctx = TestContext::new().await;
    let config = json_body(ctx.get("/config", None).await).await;
    assert_eq!(config["settlementIntervalSecs"], json!(0));
    assert_eq!(config["lifecycle"]["startingBalance"], json!(10_000_000.0));
    assert_eq!(config["settlement"]["historySampleEvery"], json!(4));
}
