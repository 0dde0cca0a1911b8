//! HTTP surface of the gateway.
//!
//! Auth endpoints issue the tokens that the WebSocket side verifies, and the
//! `/admin` routes give the operator moderation controls. Admin routes
//! require the configured operator key in `x-operator-key`; with no key
//! configured the whole admin surface answers 403.

use crate::server::GatewayServer;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use parley_core::{ChatMessage, ParleyError, ServerFrame, UserSummary};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::info;

const DEFAULT_MUTE_MINUTES: u64 = 5;
const DEFAULT_BAN_MINUTES: u64 = 60;

pub fn router(server: Arc<GatewayServer>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/auth/server-info", get(server_info))
        .route("/auth/connect", post(connect))
        .route("/auth/guest", post(guest))
        .route("/auth/verify", post(verify))
        .route("/admin/stats", get(admin_stats))
        .route("/admin/users", get(admin_users))
        .route("/admin/kick", post(admin_kick))
        .route("/admin/mute", post(admin_mute))
        .route("/admin/unmute", post(admin_unmute))
        .route("/admin/bans", get(admin_list_bans).post(admin_ban))
        .route("/admin/bans/mass-unban", post(admin_mass_unban))
        .route("/admin/bans/{device_id}", delete(admin_unban))
        .route("/admin/messages", get(admin_search_messages))
        .route("/admin/messages/{message_id}", delete(admin_delete_message))
        .route("/admin/broadcast", post(admin_broadcast))
        .with_state(server)
}

/// Serve the HTTP API until the process exits.
pub async fn serve(server: Arc<GatewayServer>, bind_addr: SocketAddr) -> parley_core::ParleyResult<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, "HTTP listener started");
    axum::serve(listener, router(server))
        .await
        .map_err(|e| ParleyError::Transport(format!("HTTP server failed: {e}")))
}

/// JSON error body with the status derived from the error class.
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

fn require_operator(server: &GatewayServer, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = &server.config.operator_key else {
        return Err(ApiError(ParleyError::Forbidden(
            "admin surface disabled".into(),
        )));
    };
    let provided = headers
        .get("x-operator-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if provided != expected {
        return Err(ApiError(ParleyError::Forbidden("invalid operator key".into())));
    }
    Ok(())
}

// ---- public endpoints ----

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    current_users: usize,
}

async fn health(State(server): State<Arc<GatewayServer>>) -> Json<HealthResponse> {
    let uptime_secs = SystemTime::now()
        .duration_since(server.started_at)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    Json(HealthResponse {
        status: "ok",
        uptime_secs,
        current_users: server.sessions.count().await,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServerInfoResponse {
    name: String,
    description: String,
    password_required: bool,
    current_users: usize,
    max_users: usize,
    ws_port: u16,
}

async fn server_info(State(server): State<Arc<GatewayServer>>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: server.config.name.clone(),
        description: server.config.description.clone(),
        password_required: server.config.password_required(),
        current_users: server.sessions.count().await,
        max_users: server.config.max_users,
        ws_port: server.config.ws_port(),
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectRequest {
    username: String,
    device_id: String,
    #[serde(default)]
    password: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GuestRequest {
    #[serde(default)]
    username: Option<String>,
    device_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    token: String,
    user_id: String,
    username: String,
    expires_at: u64,
}

/// Shared entry checks: ban status first, then the gateway password. A
/// wrong password feeds the failed-login streak and can auto-ban.
async fn entry_checks(
    server: &GatewayServer,
    device_id: &str,
    password: Option<&str>,
    now: SystemTime,
) -> Result<(), ApiError> {
    if device_id.trim().is_empty() {
        return Err(ApiError(ParleyError::Validation("device id required".into())));
    }

    let mut moderation = server.moderation.lock().await;
    if let Some(status) = moderation.bans.status(device_id, now) {
        return Err(ApiError(ParleyError::Forbidden(format!(
            "banned: {} ({}m remaining)",
            status.reason,
            status.remaining.as_secs().div_ceil(60)
        ))));
    }

    if !server.config.password_matches(password) {
        if let Some(ban) = moderation.track_failed_login(device_id, now) {
            server.report_ban_async(&ban.device_id, &ban.reason, ban.duration_minutes);
        }
        return Err(ApiError(ParleyError::Auth("invalid password".into())));
    }
    moderation.failed_logins.clear(device_id);
    Ok(())
}

async fn connect(
    State(server): State<Arc<GatewayServer>>,
    Json(body): Json<ConnectRequest>,
) -> ApiResult<Json<TokenResponse>> {
    let now = SystemTime::now();
    entry_checks(&server, &body.device_id, body.password.as_deref(), now).await?;

    let (token, claims) = server.issue_access_token(&body.username, &body.device_id, false)?;
    info!(username = %claims.username, "access token issued");
    Ok(Json(TokenResponse {
        token,
        user_id: claims.user_id,
        username: claims.username,
        expires_at: claims.expires_at,
    }))
}

async fn guest(
    State(server): State<Arc<GatewayServer>>,
    Json(body): Json<GuestRequest>,
) -> ApiResult<Json<TokenResponse>> {
    if server.config.password_required() {
        return Err(ApiError(ParleyError::Forbidden(
            "guest access disabled on password-protected gateways".into(),
        )));
    }
    let now = SystemTime::now();
    entry_checks(&server, &body.device_id, None, now).await?;

    let username = body
        .username
        .unwrap_or_else(|| format!("guest-{}", &parley_core::generate_id()[..6]));
    let (token, claims) = server.issue_access_token(&username, &body.device_id, true)?;
    Ok(Json(TokenResponse {
        token,
        user_id: claims.user_id,
        username: claims.username,
        expires_at: claims.expires_at,
    }))
}

#[derive(Deserialize)]
struct VerifyRequest {
    token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyResponse {
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<u64>,
}

async fn verify(
    State(server): State<Arc<GatewayServer>>,
    Json(body): Json<VerifyRequest>,
) -> Json<VerifyResponse> {
    match server.verify_access_token(&body.token) {
        Ok(claims) => Json(VerifyResponse {
            valid: true,
            username: Some(claims.username),
            user_id: Some(claims.user_id),
            expires_at: Some(claims.expires_at),
        }),
        Err(_) => Json(VerifyResponse {
            valid: false,
            username: None,
            user_id: None,
            expires_at: None,
        }),
    }
}

// ---- admin endpoints ----

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    name: String,
    uptime_secs: u64,
    current_users: usize,
    max_users: usize,
    total_messages: u64,
    buffered_messages: usize,
    active_bans: usize,
    directory_server_id: Option<String>,
}

async fn admin_stats(
    State(server): State<Arc<GatewayServer>>,
    headers: HeaderMap,
) -> ApiResult<Json<StatsResponse>> {
    require_operator(&server, &headers)?;
    let now = SystemTime::now();
    let uptime_secs = now
        .duration_since(server.started_at)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let history = server.history.lock().await;
    let active_bans = server.moderation.lock().await.bans.list(now).len();
    let directory_server_id = match &server.directory {
        Some(client) => client.server_id().await,
        None => None,
    };
    Ok(Json(StatsResponse {
        name: server.config.name.clone(),
        uptime_secs,
        current_users: server.sessions.count().await,
        max_users: server.config.max_users,
        total_messages: history.total_messages(),
        buffered_messages: history.len(),
        active_bans,
        directory_server_id,
    }))
}

async fn admin_users(
    State(server): State<Arc<GatewayServer>>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<UserSummary>>> {
    require_operator(&server, &headers)?;
    Ok(Json(server.sessions.list_users().await))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct KickRequest {
    user_id: String,
    #[serde(default)]
    reason: Option<String>,
}

async fn admin_kick(
    State(server): State<Arc<GatewayServer>>,
    headers: HeaderMap,
    Json(body): Json<KickRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    require_operator(&server, &headers)?;
    let reason = body.reason.unwrap_or_else(|| "kicked by operator".into());
    let session = server
        .sessions
        .kick(&body.user_id, &reason)
        .await
        .ok_or_else(|| ParleyError::NotFound("user not connected".into()))?;
    Ok(Json(serde_json::json!({
        "kicked": session.username,
        "reason": reason,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MuteRequest {
    user_id: String,
    #[serde(default)]
    duration_minutes: Option<u64>,
}

async fn admin_mute(
    State(server): State<Arc<GatewayServer>>,
    headers: HeaderMap,
    Json(body): Json<MuteRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    require_operator(&server, &headers)?;
    let minutes = body.duration_minutes.unwrap_or(DEFAULT_MUTE_MINUTES);
    let muted = server
        .sessions
        .mute(&body.user_id, Duration::from_secs(minutes * 60), SystemTime::now())
        .await;
    if !muted {
        return Err(ApiError(ParleyError::NotFound("user not connected".into())));
    }
    Ok(Json(serde_json::json!({
        "muted": body.user_id,
        "durationMinutes": minutes,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnmuteRequest {
    user_id: String,
}

async fn admin_unmute(
    State(server): State<Arc<GatewayServer>>,
    headers: HeaderMap,
    Json(body): Json<UnmuteRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    require_operator(&server, &headers)?;
    if !server.sessions.unmute(&body.user_id).await {
        return Err(ApiError(ParleyError::NotFound("user not connected".into())));
    }
    Ok(Json(serde_json::json!({ "unmuted": body.user_id })))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BanEntry {
    device_id: String,
    reason: String,
    duration_minutes: u64,
    remaining_secs: u64,
    banned_by: String,
}

async fn admin_list_bans(
    State(server): State<Arc<GatewayServer>>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<BanEntry>>> {
    require_operator(&server, &headers)?;
    let now = SystemTime::now();
    let bans = server
        .moderation
        .lock()
        .await
        .bans
        .list(now)
        .into_iter()
        .map(|ban| BanEntry {
            remaining_secs: ban
                .expires_at
                .duration_since(now)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            device_id: ban.device_id,
            reason: ban.reason,
            duration_minutes: ban.duration_minutes,
            banned_by: ban.banned_by,
        })
        .collect();
    Ok(Json(bans))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BanRequest {
    device_id: String,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    duration_minutes: Option<u64>,
}

async fn admin_ban(
    State(server): State<Arc<GatewayServer>>,
    headers: HeaderMap,
    Json(body): Json<BanRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    require_operator(&server, &headers)?;
    let reason = body.reason.unwrap_or_else(|| "banned by operator".into());
    let minutes = body.duration_minutes.unwrap_or(DEFAULT_BAN_MINUTES);
    let now = SystemTime::now();

    let ban = server
        .moderation
        .lock()
        .await
        .bans
        .ban(&body.device_id, &reason, minutes, "operator", now);
    server.report_ban_async(&ban.device_id, &ban.reason, ban.duration_minutes);

    // Disconnect any live session on that device.
    server.disconnect_device(&body.device_id, &reason, minutes).await;

    Ok(Json(serde_json::json!({
        "banned": body.device_id,
        "reason": reason,
        "durationMinutes": minutes,
    })))
}

async fn admin_unban(
    State(server): State<Arc<GatewayServer>>,
    headers: HeaderMap,
    Path(device_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    require_operator(&server, &headers)?;
    let removed = server.moderation.lock().await.bans.unban(&device_id);
    Ok(Json(serde_json::json!({ "removed": removed })))
}

async fn admin_mass_unban(
    State(server): State<Arc<GatewayServer>>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    require_operator(&server, &headers)?;
    let removed = server.moderation.lock().await.bans.mass_unban();
    Ok(Json(serde_json::json!({ "removed": removed })))
}

#[derive(Deserialize)]
struct SearchQuery {
    q: String,
    #[serde(default = "default_search_limit")]
    limit: usize,
}

fn default_search_limit() -> usize {
    50
}

async fn admin_search_messages(
    State(server): State<Arc<GatewayServer>>,
    headers: HeaderMap,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<Vec<ChatMessage>>> {
    require_operator(&server, &headers)?;
    Ok(Json(
        server.history.lock().await.search(&query.q, query.limit),
    ))
}

async fn admin_delete_message(
    State(server): State<Arc<GatewayServer>>,
    headers: HeaderMap,
    Path(message_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    require_operator(&server, &headers)?;
    let removed = server.history.lock().await.delete(&message_id);
    match removed {
        Some(message) => Ok(Json(serde_json::json!({ "deleted": message.id }))),
        None => Err(ApiError(ParleyError::NotFound("message not found".into()))),
    }
}

#[derive(Deserialize)]
struct BroadcastRequest {
    message: String,
}

async fn admin_broadcast(
    State(server): State<Arc<GatewayServer>>,
    headers: HeaderMap,
    Json(body): Json<BroadcastRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    require_operator(&server, &headers)?;
    let now = SystemTime::now();
    let message = server.history.lock().await.push_system(
        &body.message,
        parley_core::MessageKind::System,
        now,
    );
    server
        .sessions
        .broadcast(&ServerFrame::Message(message), None)
        .await;
    Ok(Json(serde_json::json!({ "broadcast": true })))
}
