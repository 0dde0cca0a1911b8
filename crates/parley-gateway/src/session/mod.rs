//! Connected-user sessions.
//!
//! A [`Session`] is one authenticated WebSocket connection. The registry
//! owns the canonical map and enforces capacity and uniqueness; frames
//! reach a connection through its outbox channel, so broadcast never
//! blocks on a slow socket.

pub mod permissions;
pub mod registry;

pub use permissions::Permission;
pub use registry::SessionRegistry;

use parley_core::{ServerFrame, UserSummary};
use std::time::SystemTime;
use tokio::sync::mpsc;

/// Frames flowing from the server to one connection's writer task.
#[derive(Debug)]
pub enum Outbound {
    /// A protocol frame to serialize and send.
    Frame(ServerFrame),
    /// Close the connection after flushing, with a reason for the log.
    Close { reason: String },
}

/// One authenticated connection.
#[derive(Debug, Clone)]
pub struct Session {
    /// Connection id, unique per gateway process.
    pub conn_id: u64,
    pub user_id: String,
    pub username: String,
    pub device_id: String,
    pub is_guest: bool,
    pub permissions: Vec<Permission>,
    pub joined_at: SystemTime,
    pub last_activity: SystemTime,
    /// Mute in effect until this instant, if any.
    pub muted_until: Option<SystemTime>,
    pub outbox: mpsc::Sender<Outbound>,
}

impl Session {
    pub fn can(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    /// Whether a mute is in effect at `now`. Expired mutes read as unmuted;
    /// the registry evicts them lazily.
    pub fn is_muted(&self, now: SystemTime) -> bool {
        self.muted_until.is_some_and(|until| until > now)
    }

    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.user_id.clone(),
            username: self.username.clone(),
            is_guest: self.is_guest,
            joined_at: crate::history::unix_millis(self.joined_at),
        }
    }

    /// Queue a frame, dropping it if the outbox is full or closed.
    pub fn send(&self, frame: ServerFrame) -> bool {
        self.outbox.try_send(Outbound::Frame(frame)).is_ok()
    }
}
