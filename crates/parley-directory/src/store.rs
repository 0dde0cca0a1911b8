//! In-memory server registry.
//!
//! One record per listed gateway, keyed by id with a secondary index on
//! `ip:port` so address uniqueness is decided under the same write lock as
//! the insert. Liveness is heartbeat-driven: records go stale when their
//! last ping ages past the threshold and the sweeper marks them offline.

use parley_core::directory_api::{
    Pagination, PingRequest, RegisterRequest, ServerListResponse, ServerSummary, SortKey,
    StatsOverview,
};
use parley_core::{generate_id, ParleyError, ParleyResult};
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Heartbeats older than this mark a record stale.
pub const STALE_AFTER: Duration = Duration::from_secs(10 * 60);

const MAX_NAME_LEN: usize = 50;
const MAX_DESCRIPTION_LEN: usize = 500;
const MAX_LISTED_USERS: u32 = 1000;

/// A ban reported by a gateway, kept for operator visibility.
#[derive(Debug, Clone)]
pub struct ReportedBan {
    pub device_id: String,
    pub reason: String,
    pub expires_at: SystemTime,
}

/// One listed gateway.
#[derive(Debug, Clone)]
pub struct ServerRecord {
    pub id: String,
    pub name: String,
    pub ip_address: String,
    pub port: u16,
    pub password_present: bool,
    pub max_users: u32,
    pub description: String,
    pub current_users: u32,
    pub total_connections: u64,
    pub total_messages: u64,
    pub online: bool,
    pub created_at: SystemTime,
    pub last_heartbeat_at: SystemTime,
    pub reported_bans: Vec<ReportedBan>,
}

impl ServerRecord {
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip_address, self.port)
    }

    pub fn summary(&self) -> ServerSummary {
        ServerSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            ip_address: self.ip_address.clone(),
            port: self.port,
            password_present: self.password_present,
            max_users: self.max_users,
            current_users: self.current_users,
            online: self.online,
            description: self.description.clone(),
            total_connections: self.total_connections,
            total_messages: self.total_messages,
            created_at: unix_millis(self.created_at),
            last_heartbeat_at: unix_millis(self.last_heartbeat_at),
        }
    }
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, ServerRecord>,
    /// `ip:port` -> server id.
    by_address: HashMap<String, String>,
}

/// Registry of listed gateways.
#[derive(Default)]
pub struct ServerStore {
    inner: RwLock<Inner>,
}

impl ServerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a gateway. The address must be unique among live records;
    /// re-registering the same address after its record was removed is fine.
    pub async fn register(&self, req: RegisterRequest, now: SystemTime) -> ParleyResult<String> {
        let name = req.name.trim().to_string();
        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(ParleyError::Validation(format!(
                "server name must be 1-{MAX_NAME_LEN} characters"
            )));
        }
        if req.ip_address.trim().is_empty() {
            return Err(ParleyError::Validation("ip address required".into()));
        }
        if req.port == 0 {
            return Err(ParleyError::Validation("port required".into()));
        }
        if req.description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(ParleyError::Validation(format!(
                "description exceeds {MAX_DESCRIPTION_LEN} characters"
            )));
        }
        let max_users = req.max_users.clamp(1, MAX_LISTED_USERS);

        let record = ServerRecord {
            id: generate_id(),
            name,
            ip_address: req.ip_address.trim().to_string(),
            port: req.port,
            password_present: req.password_present,
            max_users,
            description: req.description,
            current_users: 0,
            total_connections: 0,
            total_messages: 0,
            online: true,
            created_at: now,
            last_heartbeat_at: now,
            reported_bans: Vec::new(),
        };
        let address = record.address();

        // Uniqueness is decided under the write lock: of two racing
        // registrations for one address, exactly one wins.
        let mut inner = self.inner.write().await;
        if inner.by_address.contains_key(&address) {
            return Err(ParleyError::Conflict(format!(
                "address {address} is already registered"
            )));
        }
        let id = record.id.clone();
        inner.by_address.insert(address, id.clone());
        info!(server_id = %id, name = %record.name, "server registered");
        inner.records.insert(id.clone(), record);
        Ok(id)
    }

    /// Apply a heartbeat. Unknown ids are NotFound so the gateway knows to
    /// re-register. Reported user counts are clamped to `[0, max_users]`.
    pub async fn heartbeat(
        &self,
        server_id: &str,
        ping: &PingRequest,
        now: SystemTime,
    ) -> ParleyResult<()> {
        let mut inner = self.inner.write().await;
        let record = inner
            .records
            .get_mut(server_id)
            .ok_or_else(|| ParleyError::NotFound(format!("server {server_id} not registered")))?;

        record.last_heartbeat_at = now;
        if let Some(users) = ping.current_users {
            let users = users.min(record.max_users);
            if users > record.current_users {
                record.total_connections += u64::from(users - record.current_users);
            }
            record.current_users = users;
        }
        if let Some(messages) = ping.total_messages {
            record.total_messages = record.total_messages.max(messages);
        }
        if ping.shutting_down {
            record.online = false;
            record.current_users = 0;
            info!(server_id, "server announced shutdown");
        } else {
            record.online = true;
        }
        Ok(())
    }

    pub async fn get(&self, server_id: &str) -> ParleyResult<ServerSummary> {
        self.inner
            .read()
            .await
            .records
            .get(server_id)
            .map(ServerRecord::summary)
            .ok_or_else(|| ParleyError::NotFound(format!("server {server_id} not registered")))
    }

    /// Remove a listing entirely, freeing its address.
    pub async fn remove(&self, server_id: &str) -> ParleyResult<()> {
        let mut inner = self.inner.write().await;
        let record = inner
            .records
            .remove(server_id)
            .ok_or_else(|| ParleyError::NotFound(format!("server {server_id} not registered")))?;
        inner.by_address.remove(&record.address());
        info!(server_id, name = %record.name, "server removed");
        Ok(())
    }

    /// Record a gateway-reported ban on that gateway's listing.
    pub async fn report_ban(
        &self,
        server_id: &str,
        device_id: &str,
        reason: &str,
        duration_minutes: u64,
        now: SystemTime,
    ) -> ParleyResult<()> {
        let mut inner = self.inner.write().await;
        let record = inner
            .records
            .get_mut(server_id)
            .ok_or_else(|| ParleyError::NotFound(format!("server {server_id} not registered")))?;

        record.reported_bans.retain(|b| b.device_id != device_id);
        record.reported_bans.push(ReportedBan {
            device_id: device_id.to_string(),
            reason: reason.to_string(),
            expires_at: now + Duration::from_secs(duration_minutes * 60),
        });
        debug!(
            server_id,
            device = %parley_core::short_device(device_id),
            "ban reported"
        );
        Ok(())
    }

    /// Paginated listing. Offline records are excluded unless asked for.
    pub async fn list(
        &self,
        sort: SortKey,
        page: u32,
        limit: u32,
        include_offline: bool,
    ) -> ServerListResponse {
        let inner = self.inner.read().await;
        let mut servers: Vec<ServerSummary> = inner
            .records
            .values()
            .filter(|r| include_offline || r.online)
            .map(ServerRecord::summary)
            .collect();

        match sort {
            SortKey::Popular => servers.sort_by(|a, b| {
                b.current_users
                    .cmp(&a.current_users)
                    .then(b.total_connections.cmp(&a.total_connections))
                    .then(a.name.cmp(&b.name))
            }),
            SortKey::Newest => servers.sort_by(|a, b| {
                b.created_at.cmp(&a.created_at).then(a.name.cmp(&b.name))
            }),
            SortKey::Name => {
                servers.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
            }
        }

        let page = page.max(1);
        let limit = limit.clamp(1, 100);
        let total = servers.len() as u64;
        let pages = total.div_ceil(u64::from(limit)).max(1);
        let start = ((page - 1) as usize) * (limit as usize);
        let servers = if start >= servers.len() {
            Vec::new()
        } else {
            servers
                .into_iter()
                .skip(start)
                .take(limit as usize)
                .collect()
        };

        ServerListResponse {
            servers,
            pagination: Pagination {
                page,
                limit,
                total,
                pages,
            },
        }
    }

    pub async fn stats(&self) -> StatsOverview {
        let inner = self.inner.read().await;
        let total_servers = inner.records.len() as u64;
        let online_servers = inner.records.values().filter(|r| r.online).count() as u64;
        let total_active_users = inner
            .records
            .values()
            .filter(|r| r.online)
            .map(|r| u64::from(r.current_users))
            .sum();
        StatsOverview {
            total_servers,
            online_servers,
            offline_servers: total_servers - online_servers,
            total_active_users,
        }
    }

    /// Mark records with no recent heartbeat offline and drop expired
    /// reported bans. Returns how many records were newly marked offline.
    pub async fn sweep_stale(&self, now: SystemTime) -> usize {
        let mut inner = self.inner.write().await;
        let mut marked = 0;
        for record in inner.records.values_mut() {
            record.reported_bans.retain(|b| b.expires_at > now);
            if !record.online {
                continue;
            }
            let stale = now
                .duration_since(record.last_heartbeat_at)
                .map_or(false, |age| age > STALE_AFTER);
            if stale {
                record.online = false;
                record.current_users = 0;
                marked += 1;
                info!(server_id = %record.id, name = %record.name, "server marked offline");
            }
        }
        marked
    }

    /// Force a record's online flag (used by the health prober).
    pub async fn set_online(&self, server_id: &str, online: bool) {
        let mut inner = self.inner.write().await;
        if let Some(record) = inner.records.get_mut(server_id) {
            if record.online != online {
                info!(server_id, online, "server liveness updated by probe");
            }
            record.online = online;
            if !online {
                record.current_users = 0;
            }
        }
    }

    /// Snapshot of online records for the health prober.
    pub async fn online_servers(&self) -> Vec<ServerRecord> {
        self.inner
            .read()
            .await
            .records
            .values()
            .filter(|r| r.online)
            .cloned()
            .collect()
    }
}

fn unix_millis(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn t0() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_000_000)
    }

    fn request(name: &str, ip: &str, port: u16) -> RegisterRequest {
        RegisterRequest {
            name: name.to_string(),
            ip_address: ip.to_string(),
            port,
            password_present: false,
            max_users: 100,
            description: String::new(),
        }
    }

    #[tokio::test]
    async fn register_and_get() {
        let store = ServerStore::new();
        let id = store.register(request("lobby", "10.0.0.1", 8100), t0()).await.unwrap();
        let summary = store.get(&id).await.unwrap();
        assert_eq!(summary.name, "lobby");
        assert!(summary.online);
        assert_eq!(summary.current_users, 0);
    }

    #[tokio::test]
    async fn duplicate_address_conflicts() {
        let store = ServerStore::new();
        store.register(request("a", "10.0.0.1", 8100), t0()).await.unwrap();
        let err = store
            .register(request("b", "10.0.0.1", 8100), t0())
            .await
            .unwrap_err();
        assert!(matches!(err, ParleyError::Conflict(_)));
        // Same host, different port is a different address.
        store.register(request("b", "10.0.0.1", 8200), t0()).await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_registration_has_one_winner() {
        let store = Arc::new(ServerStore::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .register(request(&format!("racer-{i}"), "10.0.0.9", 8100), t0())
                    .await
            }));
        }
        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn address_is_reusable_after_removal() {
        let store = ServerStore::new();
        let id = store.register(request("a", "10.0.0.1", 8100), t0()).await.unwrap();
        store.remove(&id).await.unwrap();
        store.register(request("b", "10.0.0.1", 8100), t0()).await.unwrap();
    }

    #[tokio::test]
    async fn heartbeat_clamps_user_count() {
        let store = ServerStore::new();
        let id = store.register(request("a", "10.0.0.1", 8100), t0()).await.unwrap();

        let ping = PingRequest {
            current_users: Some(5000),
            total_messages: Some(12),
            shutting_down: false,
        };
        store.heartbeat(&id, &ping, t0()).await.unwrap();
        let summary = store.get(&id).await.unwrap();
        assert_eq!(summary.current_users, 100);
        assert_eq!(summary.total_messages, 12);
    }

    #[tokio::test]
    async fn heartbeat_unknown_id_is_not_found() {
        let store = ServerStore::new();
        let err = store
            .heartbeat("nope", &PingRequest::default(), t0())
            .await
            .unwrap_err();
        assert!(matches!(err, ParleyError::NotFound(_)));
    }

    #[tokio::test]
    async fn shutdown_ping_goes_offline() {
        let store = ServerStore::new();
        let id = store.register(request("a", "10.0.0.1", 8100), t0()).await.unwrap();
        store
            .heartbeat(
                &id,
                &PingRequest {
                    current_users: Some(0),
                    total_messages: None,
                    shutting_down: true,
                },
                t0(),
            )
            .await
            .unwrap();
        let summary = store.get(&id).await.unwrap();
        assert!(!summary.online);
        assert_eq!(summary.current_users, 0);
    }

    #[tokio::test]
    async fn sweep_marks_stale_records_offline() {
        let store = ServerStore::new();
        let stale = store.register(request("stale", "10.0.0.1", 8100), t0()).await.unwrap();
        let fresh = store.register(request("fresh", "10.0.0.2", 8100), t0()).await.unwrap();

        let later = t0() + Duration::from_secs(11 * 60);
        store
            .heartbeat(&fresh, &PingRequest::default(), later)
            .await
            .unwrap();

        assert_eq!(store.sweep_stale(later).await, 1);
        assert!(!store.get(&stale).await.unwrap().online);
        assert!(store.get(&fresh).await.unwrap().online);
        // Already-offline records are not re-marked.
        assert_eq!(store.sweep_stale(later + Duration::from_secs(60)).await, 0);
    }

    #[tokio::test]
    async fn list_sorts_and_paginates() {
        let store = ServerStore::new();
        let busy = store.register(request("busy", "10.0.0.1", 8100), t0()).await.unwrap();
        store.register(request("alpha", "10.0.0.2", 8100), t0()).await.unwrap();
        let id3 = store
            .register(request("zeta", "10.0.0.3", 8100), t0() + Duration::from_secs(10))
            .await
            .unwrap();

        store
            .heartbeat(
                &busy,
                &PingRequest {
                    current_users: Some(7),
                    ..PingRequest::default()
                },
                t0(),
            )
            .await
            .unwrap();

        let popular = store.list(SortKey::Popular, 1, 10, false).await;
        assert_eq!(popular.servers[0].name, "busy");

        let newest = store.list(SortKey::Newest, 1, 10, false).await;
        assert_eq!(newest.servers[0].id, id3);

        let by_name = store.list(SortKey::Name, 1, 10, false).await;
        assert_eq!(by_name.servers[0].name, "alpha");

        let page2 = store.list(SortKey::Name, 2, 2, false).await;
        assert_eq!(page2.servers.len(), 1);
        assert_eq!(page2.pagination.total, 3);
        assert_eq!(page2.pagination.pages, 2);

        // Past the last page: empty, not an error.
        let page9 = store.list(SortKey::Name, 9, 2, false).await;
        assert!(page9.servers.is_empty());
    }

    #[tokio::test]
    async fn offline_servers_hidden_by_default() {
        let store = ServerStore::new();
        let id = store.register(request("a", "10.0.0.1", 8100), t0()).await.unwrap();
        store.set_online(&id, false).await;

        assert!(store.list(SortKey::Popular, 1, 10, false).await.servers.is_empty());
        assert_eq!(store.list(SortKey::Popular, 1, 10, true).await.servers.len(), 1);

        let stats = store.stats().await;
        assert_eq!(stats.total_servers, 1);
        assert_eq!(stats.online_servers, 0);
        assert_eq!(stats.offline_servers, 1);
    }

    #[tokio::test]
    async fn invalid_registrations_rejected() {
        let store = ServerStore::new();
        assert!(store.register(request("  ", "10.0.0.1", 8100), t0()).await.is_err());
        assert!(store.register(request("a", "", 8100), t0()).await.is_err());
        assert!(store.register(request("a", "10.0.0.1", 0), t0()).await.is_err());
        let long_name = "x".repeat(51);
        assert!(store.register(request(&long_name, "10.0.0.1", 8100), t0()).await.is_err());
    }

    #[tokio::test]
    async fn reported_bans_expire_on_sweep() {
        let store = ServerStore::new();
        let id = store.register(request("a", "10.0.0.1", 8100), t0()).await.unwrap();
        store.report_ban(&id, "device-1", "spam", 60, t0()).await.unwrap();

        // Heartbeat keeps the record fresh through the sweep.
        let later = t0() + Duration::from_secs(2 * 60 * 60);
        store.heartbeat(&id, &PingRequest::default(), later).await.unwrap();
        store.sweep_stale(later).await;

        let records = store.online_servers().await;
        assert!(records[0].reported_bans.is_empty());
    }
}
