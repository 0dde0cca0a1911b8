//! WebSocket listener using tokio-tungstenite.
//!
//! The chat protocol is JSON over text frames, one frame per protocol
//! message. Accepted connections are handed to the server over a channel;
//! the listener itself never parses chat traffic.

use futures_util::{SinkExt, StreamExt};
use parley_core::{ClientFrame, ParleyError, ParleyResult, ServerFrame, MAX_FRAME_SIZE};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// A handle to an accepted WebSocket connection.
pub struct WebSocketConnection {
    pub ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
    pub remote_addr: SocketAddr,
}

/// Start the WebSocket listener.
///
/// Returns a receiver that yields accepted connections.
pub async fn start_listener(
    bind_addr: SocketAddr,
) -> ParleyResult<mpsc::Receiver<WebSocketConnection>> {
    let tcp_listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| ParleyError::Transport(format!("WS bind failed: {e}")))?;

    info!(addr = %bind_addr, "WebSocket listener started");

    let (tx, rx) = mpsc::channel::<WebSocketConnection>(64);

    tokio::spawn(async move {
        loop {
            match tcp_listener.accept().await {
                Ok((stream, addr)) => {
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        match tokio_tungstenite::accept_async(stream).await {
                            Ok(ws_stream) => {
                                debug!(remote = %addr, "WebSocket connection accepted");
                                let conn = WebSocketConnection {
                                    ws_stream,
                                    remote_addr: addr,
                                };
                                if tx.send(conn).await.is_err() {
                                    warn!("WebSocket connection channel closed");
                                }
                            }
                            Err(e) => {
                                warn!(remote = %addr, error = %e, "WebSocket handshake failed");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "TCP accept failed");
                }
            }
        }
    });

    Ok(rx)
}

/// Serialize and send one protocol frame.
pub async fn ws_send_frame(
    ws: &mut tokio_tungstenite::WebSocketStream<TcpStream>,
    frame: &ServerFrame,
) -> ParleyResult<()> {
    let json = serde_json::to_string(frame)?;
    ws.send(Message::Text(json.into()))
        .await
        .map_err(|e| ParleyError::Transport(format!("WS send failed: {e}")))
}

/// Receive the next protocol frame.
///
/// Returns `None` when the connection closes. Binary frames are ignored,
/// pings are answered in place, oversized and malformed frames are errors
/// so the caller can close the connection.
pub async fn ws_recv_frame(
    ws: &mut tokio_tungstenite::WebSocketStream<TcpStream>,
) -> ParleyResult<Option<ClientFrame>> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                if text.len() > MAX_FRAME_SIZE {
                    return Err(ParleyError::Validation(format!(
                        "frame too large: {} bytes (max {MAX_FRAME_SIZE})",
                        text.len()
                    )));
                }
                let frame: ClientFrame = serde_json::from_str(&text)
                    .map_err(|e| ParleyError::Validation(format!("malformed frame: {e}")))?;
                return Ok(Some(frame));
            }
            Some(Ok(Message::Close(_))) => return Ok(None),
            Some(Ok(Message::Ping(payload))) => {
                let _ = ws.send(Message::Pong(payload)).await;
            }
            Some(Ok(_)) => {
                // Ignore binary, pong and other message types.
                continue;
            }
            Some(Err(e)) => {
                return Err(ParleyError::Transport(format!("WS recv failed: {e}")));
            }
            None => return Ok(None),
        }
    }
}
