//! Bounded in-memory message history.
//!
//! Holds the most recent messages for replay to newly authenticated
//! sessions. Oldest entries are evicted past the capacity, and a periodic
//! cleanup drops entries older than the retention window. Nothing here is
//! durable.

use parley_core::{ChatMessage, MessageKind};
use std::collections::VecDeque;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Default history capacity, in messages.
pub const DEFAULT_CAPACITY: usize = 1000;
/// Default retention window.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Ring of recent messages plus a lifetime counter for heartbeat reporting.
#[derive(Debug)]
pub struct MessageHistory {
    messages: VecDeque<ChatMessage>,
    capacity: usize,
    retention: Duration,
    total_messages: u64,
}

impl MessageHistory {
    pub fn new(capacity: usize, retention: Duration) -> Self {
        Self {
            messages: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            capacity,
            retention,
            total_messages: 0,
        }
    }

    /// Build and append a message, evicting the oldest entry when full.
    pub fn push(
        &mut self,
        sender_id: &str,
        sender_name: &str,
        content: &str,
        kind: MessageKind,
        now: SystemTime,
    ) -> ChatMessage {
        let message = ChatMessage {
            id: parley_core::generate_id(),
            sender_id: sender_id.to_string(),
            sender_name: sender_name.to_string(),
            content: content.to_string(),
            kind,
            timestamp: unix_millis(now),
        };
        if self.capacity > 0 {
            if self.messages.len() == self.capacity {
                self.messages.pop_front();
            }
            self.messages.push_back(message.clone());
        }
        self.total_messages += 1;
        message
    }

    /// Append a system message attributed to the gateway itself.
    pub fn push_system(&mut self, content: &str, kind: MessageKind, now: SystemTime) -> ChatMessage {
        self.push("system", "System", content, kind, now)
    }

    /// The newest `limit` messages in chronological order.
    pub fn recent(&self, limit: usize) -> Vec<ChatMessage> {
        let skip = self.messages.len().saturating_sub(limit);
        self.messages.iter().skip(skip).cloned().collect()
    }

    /// Case-insensitive substring search over content and sender names.
    pub fn search(&self, query: &str, limit: usize) -> Vec<ChatMessage> {
        let needle = query.to_lowercase();
        self.messages
            .iter()
            .filter(|m| {
                m.content.to_lowercase().contains(&needle)
                    || m.sender_name.to_lowercase().contains(&needle)
            })
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    /// Remove a message by id. Returns the removed message.
    pub fn delete(&mut self, message_id: &str) -> Option<ChatMessage> {
        let idx = self.messages.iter().position(|m| m.id == message_id)?;
        self.messages.remove(idx)
    }

    /// Drop messages older than the retention window, returning the count.
    pub fn prune(&mut self, now: SystemTime) -> usize {
        let cutoff = unix_millis(now).saturating_sub(self.retention.as_millis() as u64);
        let before = self.messages.len();
        while self
            .messages
            .front()
            .is_some_and(|m| m.timestamp <= cutoff)
        {
            self.messages.pop_front();
        }
        let removed = before - self.messages.len();
        if removed > 0 {
            debug!(removed, "pruned old messages");
        }
        removed
    }

    /// Messages currently buffered.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Messages accepted over the gateway's lifetime (reported in heartbeats).
    pub fn total_messages(&self) -> u64 {
        self.total_messages
    }
}

impl Default for MessageHistory {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_RETENTION)
    }
}

/// Milliseconds since the Unix epoch.
pub fn unix_millis(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_000_000)
    }

    #[test]
    fn push_and_recent() {
        let mut history = MessageHistory::default();
        history.push("u1", "alice", "first", MessageKind::Text, t0());
        history.push("u1", "alice", "second", MessageKind::Text, t0());

        let recent = history.recent(50);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "first");
        assert_eq!(recent[1].content, "second");
    }

    #[test]
    fn content_is_preserved_verbatim() {
        let mut history = MessageHistory::default();
        let content = "mixed CASE,  spaces   and ünïcode 🙂";
        history.push("u1", "alice", content, MessageKind::Text, t0());
        assert_eq!(history.recent(1)[0].content, content);
    }

    #[test]
    fn capacity_evicts_oldest_first() {
        let mut history = MessageHistory::new(3, DEFAULT_RETENTION);
        for i in 0..5 {
            history.push("u1", "alice", &format!("m{i}"), MessageKind::Text, t0());
        }
        let recent = history.recent(10);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].content, "m2");
        assert_eq!(recent[2].content, "m4");
        assert_eq!(history.total_messages(), 5);
    }

    #[test]
    fn recent_limits_from_the_tail() {
        let mut history = MessageHistory::default();
        for i in 0..10 {
            history.push("u1", "alice", &format!("m{i}"), MessageKind::Text, t0());
        }
        let recent = history.recent(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].content, "m7");
    }

    #[test]
    fn prune_drops_expired_entries() {
        let mut history = MessageHistory::default();
        history.push("u1", "alice", "old", MessageKind::Text, t0());
        history.push(
            "u1",
            "alice",
            "fresh",
            MessageKind::Text,
            t0() + Duration::from_secs(23 * 60 * 60),
        );

        let removed = history.prune(t0() + Duration::from_secs(25 * 60 * 60));
        assert_eq!(removed, 1);
        assert_eq!(history.recent(10)[0].content, "fresh");
    }

    #[test]
    fn delete_by_id() {
        let mut history = MessageHistory::default();
        let msg = history.push("u1", "alice", "target", MessageKind::Text, t0());
        history.push("u1", "alice", "other", MessageKind::Text, t0());

        assert!(history.delete(&msg.id).is_some());
        assert!(history.delete(&msg.id).is_none());
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn search_is_case_insensitive() {
        let mut history = MessageHistory::default();
        history.push("u1", "Alice", "Hello World", MessageKind::Text, t0());
        history.push("u2", "bob", "unrelated", MessageKind::Text, t0());

        assert_eq!(history.search("hello", 10).len(), 1);
        assert_eq!(history.search("ALICE", 10).len(), 1);
        assert!(history.search("missing", 10).is_empty());
    }
}
