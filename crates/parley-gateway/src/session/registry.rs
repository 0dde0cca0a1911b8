//! Session registry.
//!
//! Canonical map of live sessions, indexed by connection id and by device
//! id. Capacity, one-session-per-device and username uniqueness are all
//! decided under one write lock so two racing connections cannot both win.

use super::{Outbound, Session};
use parley_core::{ParleyError, ParleyResult, ServerFrame, UserSummary};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Default)]
struct Inner {
    by_conn: HashMap<u64, Session>,
    /// device id -> conn id, for duplicate detection and targeted moderation.
    by_device: HashMap<String, u64>,
}

/// Live sessions for one gateway.
pub struct SessionRegistry {
    inner: RwLock<Inner>,
    next_conn_id: AtomicU64,
    max_users: usize,
}

impl SessionRegistry {
    pub fn new(max_users: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            next_conn_id: AtomicU64::new(1),
            max_users,
        }
    }

    /// Allocate a connection id for a socket that has not authenticated yet.
    pub fn next_conn_id(&self) -> u64 {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Admit a session. Capacity, one-session-per-device and username
    /// uniqueness are all checked before anything is inserted, so a
    /// rejected session leaves no trace.
    pub async fn insert(&self, session: Session) -> ParleyResult<()> {
        let mut inner = self.inner.write().await;

        if inner.by_device.contains_key(&session.device_id) {
            return Err(ParleyError::Forbidden(
                "this device already has a live session".into(),
            ));
        }
        if inner.by_conn.len() >= self.max_users {
            return Err(ParleyError::Forbidden("server is full".into()));
        }

        let wanted = session.username.to_lowercase();
        if inner
            .by_conn
            .values()
            .any(|s| s.username.to_lowercase() == wanted)
        {
            return Err(ParleyError::Validation(format!(
                "username '{}' is already in use",
                session.username
            )));
        }

        inner
            .by_device
            .insert(session.device_id.clone(), session.conn_id);
        info!(
            conn_id = session.conn_id,
            user_id = %session.user_id,
            username = %session.username,
            guest = session.is_guest,
            "session created"
        );
        inner.by_conn.insert(session.conn_id, session);
        Ok(())
    }

    /// Remove a session. Idempotent.
    pub async fn remove(&self, conn_id: u64) -> Option<Session> {
        let mut inner = self.inner.write().await;
        let session = inner.by_conn.remove(&conn_id)?;
        if inner.by_device.get(&session.device_id) == Some(&conn_id) {
            inner.by_device.remove(&session.device_id);
        }
        info!(conn_id, user_id = %session.user_id, "session removed");
        Some(session)
    }

    pub async fn get(&self, conn_id: u64) -> Option<Session> {
        self.inner.read().await.by_conn.get(&conn_id).cloned()
    }

    pub async fn find_by_device(&self, device_id: &str) -> Option<Session> {
        let inner = self.inner.read().await;
        let conn_id = inner.by_device.get(device_id)?;
        inner.by_conn.get(conn_id).cloned()
    }

    pub async fn find_by_user(&self, user_id: &str) -> Option<Session> {
        self.inner
            .read()
            .await
            .by_conn
            .values()
            .find(|s| s.user_id == user_id)
            .cloned()
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.by_conn.len()
    }

    pub async fn list_users(&self) -> Vec<UserSummary> {
        let inner = self.inner.read().await;
        let mut users: Vec<UserSummary> = inner.by_conn.values().map(Session::summary).collect();
        users.sort_by(|a, b| a.joined_at.cmp(&b.joined_at));
        users
    }

    /// Queue a frame to every session, optionally skipping one connection.
    pub async fn broadcast(&self, frame: &ServerFrame, skip_conn: Option<u64>) {
        let inner = self.inner.read().await;
        for session in inner.by_conn.values() {
            if Some(session.conn_id) == skip_conn {
                continue;
            }
            if !session.send(frame.clone()) {
                warn!(conn_id = session.conn_id, "outbox full, frame dropped");
            }
        }
    }

    /// Queue a frame to one user. Returns false if they are not connected.
    pub async fn send_to_user(&self, user_id: &str, frame: ServerFrame) -> bool {
        match self.find_by_user(user_id).await {
            Some(session) => session.send(frame),
            None => false,
        }
    }

    /// Force-close a user's connection. Returns the session that was kicked.
    pub async fn kick(&self, user_id: &str, reason: &str) -> Option<Session> {
        let session = self.find_by_user(user_id).await?;
        let _ = session.outbox.try_send(Outbound::Close {
            reason: reason.to_string(),
        });
        info!(user_id = %session.user_id, reason, "session kicked");
        Some(session)
    }

    /// Queue a close for every session. Best effort; a full outbox means the
    /// connection is torn down by process exit instead.
    pub async fn close_all(&self, reason: &str) {
        let inner = self.inner.read().await;
        for session in inner.by_conn.values() {
            let _ = session.outbox.try_send(Outbound::Close {
                reason: reason.to_string(),
            });
        }
    }

    /// Mute a user for a duration. Returns false if they are not connected.
    pub async fn mute(&self, user_id: &str, duration: Duration, now: SystemTime) -> bool {
        let mut inner = self.inner.write().await;
        for session in inner.by_conn.values_mut() {
            if session.user_id == user_id {
                session.muted_until = Some(now + duration);
                info!(user_id, secs = duration.as_secs(), "user muted");
                return true;
            }
        }
        false
    }

    pub async fn unmute(&self, user_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        for session in inner.by_conn.values_mut() {
            if session.user_id == user_id {
                session.muted_until = None;
                return true;
            }
        }
        false
    }

    /// Whether a connection is muted at `now`, clearing expired mutes.
    pub async fn check_muted(&self, conn_id: u64, now: SystemTime) -> bool {
        let mut inner = self.inner.write().await;
        let Some(session) = inner.by_conn.get_mut(&conn_id) else {
            return false;
        };
        match session.muted_until {
            Some(until) if until > now => true,
            Some(_) => {
                session.muted_until = None;
                false
            }
            None => false,
        }
    }

    /// Bump a connection's activity clock.
    pub async fn touch(&self, conn_id: u64, now: SystemTime) {
        let mut inner = self.inner.write().await;
        if let Some(session) = inner.by_conn.get_mut(&conn_id) {
            session.last_activity = now;
        }
    }
}
