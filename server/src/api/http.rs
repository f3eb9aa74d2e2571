use axum::{
    extract::State as AxumState,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use moonrace_engine::JoinedGame;
use moonrace_types::{Game, GameError, PriceSnapshot, Ticker};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::Server;

/// Simple health response for liveness probes.
#[derive(Serialize)]
struct HealthzResponse {
    ok: bool,
}

/// Detailed health response for monitoring dashboards.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DetailedHealthResponse {
    healthy: bool,
    store_reachable: bool,
    has_prices: bool,
    active_games: usize,
    settlement: crate::metrics::SettlementMetricsSnapshot,
    version: &'static str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CreateGameRequest {
    duration_days: u32,
    allocation: BTreeMap<String, f64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct JoinGameRequest {
    game_id: Uuid,
    allocation: BTreeMap<String, f64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct PreviewRequest {
    allocation: BTreeMap<String, f64>,
    /// Optional hypothetical entry prices; defaults to the latest snapshot.
    #[serde(default)]
    entry_prices: Option<BTreeMap<Ticker, f64>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct IngestPricesRequest {
    prices: BTreeMap<String, f64>,
    #[serde(default)]
    fetched_at_ms: Option<u64>,
}

/// Write endpoints answer with these trimmed receipts; the read endpoints
/// serve the full records.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateGameResponse {
    game_id: Uuid,
    game_code: String,
    entry_snapshot: PriceSnapshot,
    duration_days: u32,
    ends_at: u64,
}

impl From<Game> for CreateGameResponse {
    fn from(game: Game) -> Self {
        Self {
            game_id: game.id,
            game_code: game.code,
            entry_snapshot: game.entry_prices,
            duration_days: game.duration_days,
            ends_at: game.ends_at_ms,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JoinGameResponse {
    participant_id: Uuid,
    game_code: String,
    entry_snapshot: PriceSnapshot,
    duration_days: u32,
    ends_at: u64,
    participant_count: u32,
}

impl From<JoinedGame> for JoinGameResponse {
    fn from(joined: JoinedGame) -> Self {
        Self {
            participant_id: joined.participant.id,
            game_code: joined.game.code,
            entry_snapshot: joined.game.entry_prices,
            duration_days: joined.game.duration_days,
            ends_at: joined.game.ends_at_ms,
            participant_count: joined.game.participant_count,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IngestPricesResponse {
    stored: usize,
    fetched_at_ms: u64,
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

/// Wraps [`GameError`] so handlers can use `?` and still produce the wire
/// mapping: 401 for unauthorized, 503 for retryable conditions, 500 with a
/// redacted body for internal faults, 400 for everything else.
pub(super) struct ApiError(GameError);

impl From<GameError> for ApiError {
    fn from(err: GameError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = if matches!(err, GameError::Unauthorized) {
            StatusCode::UNAUTHORIZED
        } else if err.is_retryable() {
            StatusCode::SERVICE_UNAVAILABLE
        } else if matches!(err, GameError::Internal(_)) {
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            StatusCode::BAD_REQUEST
        };
        let message = match &err {
            GameError::Internal(detail) => {
                tracing::error!(detail = %detail, "internal error");
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        (
            status,
            Json(ErrorBody {
                error: err.kind(),
                message,
            }),
        )
            .into_response()
    }
}

/// Resolves the bearer token in `Authorization` to a user id.
async fn resolve_user(server: &Arc<Server>, headers: &HeaderMap) -> Result<String, ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(ApiError(GameError::Unauthorized))?;
    server.auth().resolve(token).await.map_err(ApiError::from)
}

/// Runs a store-touching closure on the blocking pool.
async fn blocking<T, F>(server: Arc<Server>, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Server) -> Result<T, GameError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&server))
        .await
        .map_err(|err| ApiError(GameError::Internal(format!("blocking task: {err}"))))?
        .map_err(ApiError::from)
}

/// Validates price-ingest authentication via the x-ingest-token header.
/// Uses the PRICE_INGEST_TOKEN environment variable; when unset the
/// endpoint is open (development mode).
fn ingest_auth_error(headers: &HeaderMap) -> Option<StatusCode> {
    let token = std::env::var("PRICE_INGEST_TOKEN").unwrap_or_default();
    if token.is_empty() {
        return None;
    }
    let header_token = headers
        .get("x-ingest-token")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    if header_token.as_deref() == Some(token.as_str()) {
        None
    } else {
        Some(StatusCode::UNAUTHORIZED)
    }
}

/// Validates metrics authentication via x-metrics-token header or Bearer
/// token. Uses the METRICS_AUTH_TOKEN environment variable; when unset the
/// endpoints are open.
fn metrics_auth_error(headers: &HeaderMap) -> Option<StatusCode> {
    let token = std::env::var("METRICS_AUTH_TOKEN").unwrap_or_default();
    if token.is_empty() {
        return None;
    }
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string);
    let header_token = headers
        .get("x-metrics-token")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    if bearer.as_deref() == Some(token.as_str()) || header_token.as_deref() == Some(token.as_str())
    {
        None
    } else {
        Some(StatusCode::UNAUTHORIZED)
    }
}

pub(super) async fn healthz() -> Response {
    Json(HealthzResponse { ok: true }).into_response()
}

pub(super) async fn health(AxumState(server): AxumState<Arc<Server>>) -> Response {
    let worker = Arc::clone(&server);
    let probe = tokio::task::spawn_blocking(move || {
        let prices = worker.store().latest_prices();
        let active = worker.store().active_games();
        (prices, active)
    })
    .await;

    let (store_reachable, has_prices, active_games) = match probe {
        Ok((Ok(prices), Ok(active))) => (true, prices.is_some(), active.len()),
        Ok((prices, _)) => (false, matches!(prices, Ok(Some(_))), 0),
        Err(_) => (false, false, 0),
    };

    let response = DetailedHealthResponse {
        healthy: store_reachable,
        store_reachable,
        has_prices,
        active_games,
        settlement: server.settlement_metrics().snapshot(),
        version: env!("CARGO_PKG_VERSION"),
    };
    let http_status = if response.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (http_status, Json(response)).into_response()
}

pub(super) async fn config(AxumState(server): AxumState<Arc<Server>>) -> Response {
    Json(server.config().clone()).into_response()
}

pub(super) async fn create_game(
    AxumState(server): AxumState<Arc<Server>>,
    headers: HeaderMap,
    Json(request): Json<CreateGameRequest>,
) -> Response {
    let start = Instant::now();
    let response = match handle_create_game(&server, &headers, request).await {
        Ok(game) => Json(game).into_response(),
        Err(err) => err.into_response(),
    };
    server.http_metrics().record_create_game(start.elapsed());
    response
}

async fn handle_create_game(
    server: &Arc<Server>,
    headers: &HeaderMap,
    request: CreateGameRequest,
) -> Result<CreateGameResponse, ApiError> {
    let user = resolve_user(server, headers).await?;
    let game = blocking(Arc::clone(server), move |server| {
        let mut rng = rand::thread_rng();
        server.games().create_game(
            &mut rng,
            &user,
            request.duration_days,
            &request.allocation,
            crate::now_ms(),
        )
    })
    .await?;
    Ok(game.into())
}

pub(super) async fn join_game(
    AxumState(server): AxumState<Arc<Server>>,
    headers: HeaderMap,
    Json(request): Json<JoinGameRequest>,
) -> Response {
    let start = Instant::now();
    let response = match handle_join_game(&server, &headers, request).await {
        Ok(joined) => Json(joined).into_response(),
        Err(err) => err.into_response(),
    };
    server.http_metrics().record_join_game(start.elapsed());
    response
}

async fn handle_join_game(
    server: &Arc<Server>,
    headers: &HeaderMap,
    request: JoinGameRequest,
) -> Result<JoinGameResponse, ApiError> {
    let user = resolve_user(server, headers).await?;
    let joined = blocking(Arc::clone(server), move |server| {
        server
            .games()
            .join_game(&user, request.game_id, &request.allocation, crate::now_ms())
    })
    .await?;
    Ok(joined.into())
}

pub(super) async fn game_by_code(
    AxumState(server): AxumState<Arc<Server>>,
    headers: HeaderMap,
    axum::extract::Path(code): axum::extract::Path<String>,
) -> Response {
    let start = Instant::now();
    let response = match handle_game_by_code(&server, &headers, code).await {
        Ok(game) => Json(game).into_response(),
        Err(err) => err.into_response(),
    };
    server.http_metrics().record_lookup(start.elapsed());
    response
}

async fn handle_game_by_code(
    server: &Arc<Server>,
    headers: &HeaderMap,
    code: String,
) -> Result<Game, ApiError> {
    resolve_user(server, headers).await?;
    blocking(Arc::clone(server), move |server| {
        server.games().find_game_by_code(&code)
    })
    .await
}

pub(super) async fn game_details(
    AxumState(server): AxumState<Arc<Server>>,
    headers: HeaderMap,
    axum::extract::Path(id): axum::extract::Path<Uuid>,
) -> Response {
    let start = Instant::now();
    let response = match handle_game_details(&server, &headers, id).await {
        Ok(details) => Json(details).into_response(),
        Err(err) => err.into_response(),
    };
    server.http_metrics().record_lookup(start.elapsed());
    response
}

async fn handle_game_details(
    server: &Arc<Server>,
    headers: &HeaderMap,
    id: Uuid,
) -> Result<moonrace_engine::GameDetails, ApiError> {
    resolve_user(server, headers).await?;
    blocking(Arc::clone(server), move |server| {
        server.games().game_details(id)
    })
    .await
}

pub(super) async fn leaderboard(
    AxumState(server): AxumState<Arc<Server>>,
    headers: HeaderMap,
    axum::extract::Path(id): axum::extract::Path<Uuid>,
) -> Response {
    let start = Instant::now();
    let response = match handle_leaderboard(&server, &headers, id).await {
        Ok(entries) => Json(entries).into_response(),
        Err(err) => err.into_response(),
    };
    server.http_metrics().record_lookup(start.elapsed());
    response
}

async fn handle_leaderboard(
    server: &Arc<Server>,
    headers: &HeaderMap,
    id: Uuid,
) -> Result<Vec<moonrace_types::LeaderboardEntry>, ApiError> {
    resolve_user(server, headers).await?;
    blocking(Arc::clone(server), move |server| {
        server.games().leaderboard(id)
    })
    .await
}

pub(super) async fn value_history(
    AxumState(server): AxumState<Arc<Server>>,
    headers: HeaderMap,
    axum::extract::Path(id): axum::extract::Path<Uuid>,
) -> Response {
    let start = Instant::now();
    let response = match handle_value_history(&server, &headers, id).await {
        Ok(entries) => Json(entries).into_response(),
        Err(err) => err.into_response(),
    };
    server.http_metrics().record_lookup(start.elapsed());
    response
}

async fn handle_value_history(
    server: &Arc<Server>,
    headers: &HeaderMap,
    id: Uuid,
) -> Result<Vec<moonrace_types::ValueHistoryEntry>, ApiError> {
    resolve_user(server, headers).await?;
    blocking(Arc::clone(server), move |server| {
        server.games().value_history(id)
    })
    .await
}

pub(super) async fn my_games(
    AxumState(server): AxumState<Arc<Server>>,
    headers: HeaderMap,
) -> Response {
    let start = Instant::now();
    let response = match handle_my_games(&server, &headers).await {
        Ok(games) => Json(games).into_response(),
        Err(err) => err.into_response(),
    };
    server.http_metrics().record_lookup(start.elapsed());
    response
}

async fn handle_my_games(
    server: &Arc<Server>,
    headers: &HeaderMap,
) -> Result<Vec<Game>, ApiError> {
    let user = resolve_user(server, headers).await?;
    blocking(Arc::clone(server), move |server| {
        server.games().games_for_user(&user)
    })
    .await
}

pub(super) async fn preview(
    AxumState(server): AxumState<Arc<Server>>,
    headers: HeaderMap,
    Json(request): Json<PreviewRequest>,
) -> Response {
    let start = Instant::now();
    let response = match handle_preview(&server, &headers, request).await {
        Ok(preview) => Json(preview).into_response(),
        Err(err) => err.into_response(),
    };
    server.http_metrics().record_preview(start.elapsed());
    response
}

async fn handle_preview(
    server: &Arc<Server>,
    headers: &HeaderMap,
    request: PreviewRequest,
) -> Result<moonrace_engine::PortfolioPreview, ApiError> {
    resolve_user(server, headers).await?;
    blocking(Arc::clone(server), move |server| {
        // A hypothetical entry's timestamp is never read; only the latest
        // snapshot's fetchedAtMs reaches the response.
        let entry = request
            .entry_prices
            .map(|prices| PriceSnapshot::new(prices, 0));
        server.games().preview(&request.allocation, entry.as_ref())
    })
    .await
}

pub(super) async fn latest_prices(AxumState(server): AxumState<Arc<Server>>) -> Response {
    let start = Instant::now();
    let response = match blocking(Arc::clone(&server), |server| {
        let snapshot = server.store().latest_prices()?;
        snapshot.ok_or(GameError::PriceUnavailable)
    })
    .await
    {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(err) => err.into_response(),
    };
    server.http_metrics().record_prices(start.elapsed());
    response
}

pub(super) async fn ingest_prices(
    AxumState(server): AxumState<Arc<Server>>,
    headers: HeaderMap,
    Json(request): Json<IngestPricesRequest>,
) -> Response {
    let start = Instant::now();
    let response = handle_ingest_prices(&server, &headers, request).await;
    server.http_metrics().record_prices(start.elapsed());
    response
}

async fn handle_ingest_prices(
    server: &Arc<Server>,
    headers: &HeaderMap,
    request: IngestPricesRequest,
) -> Response {
    if let Some(status) = ingest_auth_error(headers) {
        return status.into_response();
    }

    let mut prices = BTreeMap::new();
    for (symbol, price) in &request.prices {
        match symbol.parse::<Ticker>() {
            Ok(ticker) => {
                prices.insert(ticker, *price);
            }
            Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
        }
    }
    let snapshot = PriceSnapshot::new(
        prices,
        request.fetched_at_ms.unwrap_or_else(crate::now_ms),
    );
    if let Err(err) = snapshot.validate() {
        return (StatusCode::BAD_REQUEST, err.to_string()).into_response();
    }

    let stored = snapshot.prices.len();
    let fetched_at_ms = snapshot.fetched_at_ms;
    match blocking(Arc::clone(server), move |server| {
        server.store().put_prices(&snapshot)?;
        Ok(())
    })
    .await
    {
        Ok(()) => Json(IngestPricesResponse {
            stored,
            fetched_at_ms,
        })
        .into_response(),
        Err(err) => err.into_response(),
    }
}

pub(super) async fn run_settlement(
    AxumState(server): AxumState<Arc<Server>>,
    headers: HeaderMap,
) -> Response {
    if let Some(status) = ingest_auth_error(&headers) {
        return status.into_response();
    }
    let worker = Arc::clone(&server);
    match tokio::task::spawn_blocking(move || worker.run_settlement(crate::now_ms())).await {
        Ok(Ok(report)) => Json(report).into_response(),
        Ok(Err(err)) => ApiError::from(err).into_response(),
        Err(err) => {
            ApiError(GameError::Internal(format!("settlement task: {err}"))).into_response()
        }
    }
}

pub(super) async fn http_metrics(
    headers: HeaderMap,
    AxumState(server): AxumState<Arc<Server>>,
) -> Response {
    if let Some(status) = metrics_auth_error(&headers) {
        return status.into_response();
    }
    Json(server.http_metrics().snapshot()).into_response()
}

pub(super) async fn settlement_metrics(
    headers: HeaderMap,
    AxumState(server): AxumState<Arc<Server>>,
) -> Response {
    if let Some(status) = metrics_auth_error(&headers) {
        return status.into_response();
    }
    Json(server.settlement_metrics().snapshot()).into_response()
}
