//! HMAC access tokens.
//!
//! A token is `base64url(claims_json) . base64url(hmac_sha256(claims_json))`,
//! signed with a per-gateway secret. Verification checks the signature first,
//! then the embedded expiry, and returns the claims so callers can derive
//! permissions from them.

use crate::error::{ParleyError, ParleyResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::hmac;
use serde::{Deserialize, Serialize};

/// Claims carried inside an access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub user_id: String,
    pub username: String,
    pub device_id: String,
    #[serde(default)]
    pub is_guest: bool,
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Seconds since the Unix epoch.
    pub expires_at: u64,
}

impl AccessClaims {
    pub fn expired_at(&self, now_secs: u64) -> bool {
        now_secs >= self.expires_at
    }
}

/// Sign a set of claims into a token string.
pub fn issue_token(secret: &[u8], claims: &AccessClaims) -> ParleyResult<String> {
    let body = serde_json::to_vec(claims)
        .map_err(|e| ParleyError::Internal(format!("claims encode: {e}")))?;
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    let tag = hmac::sign(&key, &body);
    Ok(format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(&body),
        URL_SAFE_NO_PAD.encode(tag.as_ref())
    ))
}

/// Verify a token's signature and expiry, returning its claims.
pub fn verify_token(secret: &[u8], token: &str) -> ParleyResult<AccessClaims> {
    let (body_b64, sig_b64) = token
        .split_once('.')
        .ok_or_else(|| ParleyError::Token("malformed token".into()))?;

    let body = URL_SAFE_NO_PAD
        .decode(body_b64)
        .map_err(|_| ParleyError::Token("malformed token body".into()))?;
    let sig = URL_SAFE_NO_PAD
        .decode(sig_b64)
        .map_err(|_| ParleyError::Token("malformed token signature".into()))?;

    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    hmac::verify(&key, &body, &sig)
        .map_err(|_| ParleyError::Token("invalid token signature".into()))?;

    let claims: AccessClaims = serde_json::from_slice(&body)
        .map_err(|_| ParleyError::Token("malformed claims".into()))?;

    let now = unix_now_secs();
    if claims.expired_at(now) {
        return Err(ParleyError::Token("token expired".into()));
    }

    Ok(claims)
}

/// Generate a random signing secret (32 bytes).
pub fn generate_secret() -> Vec<u8> {
    use ring::rand::{SecureRandom, SystemRandom};
    let rng = SystemRandom::new();
    let mut secret = vec![0u8; 32];
    rng.fill(&mut secret).expect("RNG failure");
    secret
}

/// Seconds since the Unix epoch.
pub fn unix_now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(expires_at: u64) -> AccessClaims {
        AccessClaims {
            user_id: "u1".into(),
            username: "alice".into(),
            device_id: "device-0001".into(),
            is_guest: false,
            permissions: vec!["chat".into(), "read".into()],
            expires_at,
        }
    }

    #[test]
    fn issue_and_verify() {
        let secret = generate_secret();
        let token = issue_token(&secret, &claims(unix_now_secs() + 3600)).unwrap();
        let verified = verify_token(&secret, &token).unwrap();
        assert_eq!(verified.username, "alice");
        assert_eq!(verified.permissions, vec!["chat", "read"]);
    }

    #[test]
    fn wrong_secret() {
        let token = issue_token(&generate_secret(), &claims(unix_now_secs() + 3600)).unwrap();
        assert!(verify_token(&generate_secret(), &token).is_err());
    }

    #[test]
    fn expired_token() {
        let secret = generate_secret();
        let token = issue_token(&secret, &claims(unix_now_secs().saturating_sub(10))).unwrap();
        assert!(verify_token(&secret, &token).is_err());
    }

    #[test]
    fn tampered_body() {
        let secret = generate_secret();
        let token = issue_token(&secret, &claims(unix_now_secs() + 3600)).unwrap();
        let (body, sig) = token.split_once('.').unwrap();
        let forged_claims = claims(unix_now_secs() + 999_999);
        let forged_body =
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged_claims).unwrap());
        assert_ne!(body, forged_body);
        assert!(verify_token(&secret, &format!("{forged_body}.{sig}")).is_err());
    }

    #[test]
    fn malformed_tokens() {
        let secret = generate_secret();
        assert!(verify_token(&secret, "no-separator").is_err());
        assert!(verify_token(&secret, "!!!.###").is_err());
    }
}
