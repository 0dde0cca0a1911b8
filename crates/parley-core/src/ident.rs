//! Identity helpers: random ids, username validation, device-id shortening.

use crate::error::{ParleyError, ParleyResult};

/// Generate a random id (hex-encoded, 16 bytes = 32 hex chars).
pub fn generate_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..16).map(|_| rng.gen()).collect();
    hex::encode(bytes)
}

/// Validate a username: 3–20 characters, letters/digits/underscore/dash.
///
/// Case-insensitive uniqueness among live sessions is the session
/// registry's concern, not this function's.
pub fn validate_username(username: &str) -> ParleyResult<()> {
    let len = username.chars().count();
    if !(3..=20).contains(&len) {
        return Err(ParleyError::Validation(
            "username must be 3-20 characters".into(),
        ));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ParleyError::Validation(
            "username may only contain letters, digits, underscore and dash".into(),
        ));
    }
    Ok(())
}

/// Shorten a device id for log output (first 8 chars).
///
/// Device ids are client-supplied, so truncation happens on a char
/// boundary, never a byte offset.
pub fn short_device(device_id: &str) -> &str {
    match device_id.char_indices().nth(8) {
        Some((idx, _)) => &device_id[..idx],
        None => device_id,
    }
}
