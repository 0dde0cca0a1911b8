//! Client-facing transport.

pub mod websocket;

pub use websocket::{start_listener, ws_recv_frame, ws_send_frame, WebSocketConnection};
