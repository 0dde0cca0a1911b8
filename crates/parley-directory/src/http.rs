//! REST API of the directory service.
//!
//! Gateways register, heartbeat and report bans; browsing clients list and
//! inspect listings. Everything is JSON; error bodies carry a single
//! `error` string with the status derived from the error class.

use crate::store::ServerStore;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parley_core::directory_api::{
    BanReport, PingRequest, RegisterRequest, RegisterResponse, ServerListResponse, ServerSummary,
    SortKey, StatsOverview,
};
use parley_core::ParleyError;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::info;

pub fn router(store: Arc<ServerStore>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/servers/register", post(register))
        .route("/servers", get(list))
        .route("/servers/stats/overview", get(stats))
        .route("/servers/{id}", get(get_server).delete(remove))
        .route("/servers/{id}/ping", post(ping))
        .route("/servers/{id}/ban", post(report_ban))
        .with_state(store)
}

/// Serve the REST API until the process exits.
pub async fn serve(store: Arc<ServerStore>, bind_addr: SocketAddr) -> parley_core::ParleyResult<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, "HTTP listener started");
    axum::serve(listener, router(store))
        .await
        .map_err(|e| ParleyError::Transport(format!("HTTP server failed: {e}")))
}

struct ApiError(ParleyError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = axum::http::StatusCode::from_u16(self.0.http_status())
            .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

impl From<ParleyError> for ApiError {
    fn from(e: ParleyError) -> Self {
        Self(e)
    }
}

type ApiResult<T> = Result<T, ApiError>;

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn register(
    State(store): State<Arc<ServerStore>>,
    Json(body): Json<RegisterRequest>,
) -> ApiResult<(axum::http::StatusCode, Json<RegisterResponse>)> {
    let server_id = store.register(body, SystemTime::now()).await?;
    Ok((
        axum::http::StatusCode::CREATED,
        Json(RegisterResponse { server_id }),
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    #[serde(default)]
    sort: SortKey,
    #[serde(default = "default_page")]
    page: u32,
    #[serde(default = "default_limit")]
    limit: u32,
    #[serde(default)]
    include_offline: bool,
}

fn default_page() -> u32 {
    1
}
fn default_limit() -> u32 {
    20
}

async fn list(
    State(store): State<Arc<ServerStore>>,
    Query(query): Query<ListQuery>,
) -> Json<ServerListResponse> {
    Json(
        store
            .list(query.sort, query.page, query.limit, query.include_offline)
            .await,
    )
}

async fn get_server(
    State(store): State<Arc<ServerStore>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ServerSummary>> {
    Ok(Json(store.get(&id).await?))
}

async fn remove(
    State(store): State<Arc<ServerStore>>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    store.remove(&id).await?;
    Ok(Json(serde_json::json!({ "removed": id })))
}

async fn ping(
    State(store): State<Arc<ServerStore>>,
    Path(id): Path<String>,
    Json(body): Json<PingRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    store.heartbeat(&id, &body, SystemTime::now()).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn report_ban(
    State(store): State<Arc<ServerStore>>,
    Path(id): Path<String>,
    Json(body): Json<BanReport>,
) -> ApiResult<Json<serde_json::Value>> {
    store
        .report_ban(
            &id,
            &body.device_id,
            &body.reason,
            body.duration_minutes,
            SystemTime::now(),
        )
        .await?;
    Ok(Json(serde_json::json!({ "recorded": true })))
}

async fn stats(State(store): State<Arc<ServerStore>>) -> Json<StatsOverview> {
    Json(store.stats().await)
}
