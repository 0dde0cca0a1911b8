//! Session permissions.

use serde::{Deserialize, Serialize};

/// What a session is allowed to do on this gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Send chat messages.
    Chat,
    /// Receive messages and user-list updates.
    Read,
    /// Kick, mute, ban.
    Moderate,
}

impl Permission {
    /// Default grant for guests and plain registered users.
    pub fn defaults() -> Vec<Permission> {
        vec![Permission::Chat, Permission::Read]
    }

    /// Parse claim strings, dropping anything unknown or repeated.
    pub fn from_claims(names: &[String]) -> Vec<Permission> {
        let mut perms: Vec<Permission> = Vec::new();
        for name in names {
            let perm = match name.as_str() {
                "chat" => Permission::Chat,
                "read" => Permission::Read,
                "moderate" => Permission::Moderate,
                _ => continue,
            };
            if !perms.contains(&perm) {
                perms.push(perm);
            }
        }
        if perms.is_empty() {
            perms = Permission::defaults();
        }
        perms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_claims_are_dropped() {
        let perms = Permission::from_claims(&[
            "chat".to_string(),
            "fly".to_string(),
            "moderate".to_string(),
        ]);
        assert_eq!(perms, vec![Permission::Chat, Permission::Moderate]);
    }

    #[test]
    fn empty_claims_fall_back_to_defaults() {
        assert_eq!(Permission::from_claims(&[]), Permission::defaults());
    }

    #[test]
    fn repeated_claims_grant_once() {
        let perms = Permission::from_claims(&[
            "chat".to_string(),
            "read".to_string(),
            "chat".to_string(),
        ]);
        assert_eq!(perms, vec![Permission::Chat, Permission::Read]);
    }
}
