//! REST types shared by the directory service and the gateway's embedded
//! directory client.

use serde::{Deserialize, Serialize};

/// `POST /servers/register` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub name: String,
    pub ip_address: String,
    pub port: u16,
    #[serde(default)]
    pub password_present: bool,
    #[serde(default = "default_max_users")]
    pub max_users: u32,
    #[serde(default)]
    pub description: String,
}

fn default_max_users() -> u32 {
    100
}

/// `POST /servers/register` success response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub server_id: String,
}

/// `POST /servers/:id/ping` request body. All fields optional; absent fields
/// leave the stored value unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingRequest {
    #[serde(default)]
    pub current_users: Option<u32>,
    #[serde(default)]
    pub total_messages: Option<u64>,
    /// Set on the final heartbeat of a shutting-down gateway.
    #[serde(default)]
    pub shutting_down: bool,
}

/// `POST /servers/:id/ban` request body. Informational: the directory only
/// records the ban on the reporting server's record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BanReport {
    pub device_id: String,
    pub reason: String,
    pub duration_minutes: u64,
}

/// Sort orders accepted by `GET /servers`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    Popular,
    Newest,
    Name,
}

impl Default for SortKey {
    fn default() -> Self {
        SortKey::Popular
    }
}

/// A server record as exposed by the listing endpoints. The stored password
/// flag is public; the banned-device list is not.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSummary {
    pub id: String,
    pub name: String,
    pub ip_address: String,
    pub port: u16,
    pub password_present: bool,
    pub max_users: u32,
    pub current_users: u32,
    pub online: bool,
    pub description: String,
    pub total_connections: u64,
    pub total_messages: u64,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
    /// Milliseconds since the Unix epoch.
    pub last_heartbeat_at: u64,
}

/// Pagination envelope for `GET /servers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub pages: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerListResponse {
    pub servers: Vec<ServerSummary>,
    pub pagination: Pagination,
}

/// `GET /servers/stats/overview` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsOverview {
    pub total_servers: u64,
    pub online_servers: u64,
    pub offline_servers: u64,
    pub total_active_users: u64,
}
