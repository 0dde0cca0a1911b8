//! parley-core: Shared protocol library for parley.
//!
//! Provides the JSON wire frames spoken between chat clients and gateways,
//! the REST types shared by the directory service and its embedded client,
//! the error taxonomy, HMAC access tokens, and id/username helpers.

pub mod directory_api;
pub mod error;
pub mod ident;
pub mod messages;
pub mod token;

// Re-export commonly used items at crate root.
pub use error::{ParleyError, ParleyResult};
pub use ident::{generate_id, short_device, validate_username};
pub use messages::{
    ChatMessage, ClientFrame, MessageKind, ServerFrame, UserSummary, MAX_FRAME_SIZE,
    MAX_MESSAGE_LEN,
};
pub use token::{generate_secret, issue_token, verify_token, AccessClaims};
