//! Gateway server core.
//!
//! Owns the shared state (sessions, moderation, history, directory client)
//! and drives the WebSocket side of the protocol: a connection gets one
//! authentication window, then a relay loop that applies moderation to
//! every inbound message before broadcasting it.

use crate::config::GatewayConfig;
use crate::directory::DirectoryClient;
use crate::history::MessageHistory;
use crate::moderation::ModerationLedger;
use crate::session::{Outbound, Permission, Session, SessionRegistry};
use crate::transport::{self, WebSocketConnection};
use parley_core::{
    generate_id, issue_token, validate_username, verify_token, AccessClaims, ClientFrame,
    MessageKind, ParleyResult, ServerFrame, MAX_MESSAGE_LEN,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// How long an accepted socket may sit unauthenticated.
const AUTH_TIMEOUT: Duration = Duration::from_secs(30);
/// Access token lifetime.
const TOKEN_TTL_SECS: u64 = 24 * 60 * 60;
/// Per-connection outbox depth before frames are dropped.
const OUTBOX_DEPTH: usize = 64;
/// Messages replayed to a newly authenticated session.
const HISTORY_REPLAY: usize = 50;
/// Background sweep cadence.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct GatewayServer {
    pub config: GatewayConfig,
    secret: Vec<u8>,
    pub sessions: SessionRegistry,
    pub moderation: Mutex<ModerationLedger>,
    pub history: Mutex<MessageHistory>,
    pub directory: Option<Arc<DirectoryClient>>,
    pub started_at: SystemTime,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig) -> Arc<Self> {
        let directory = DirectoryClient::new(&config).map(Arc::new);
        Arc::new(Self {
            sessions: SessionRegistry::new(config.max_users),
            moderation: Mutex::new(ModerationLedger::new(config.spam.clone())),
            history: Mutex::new(MessageHistory::default()),
            secret: parley_core::generate_secret(),
            directory,
            started_at: SystemTime::now(),
            config,
        })
    }

    /// Issue an access token for a user that already passed the entry checks.
    pub fn issue_access_token(
        &self,
        username: &str,
        device_id: &str,
        is_guest: bool,
    ) -> ParleyResult<(String, AccessClaims)> {
        validate_username(username)?;
        let claims = AccessClaims {
            user_id: generate_id(),
            username: username.to_string(),
            device_id: device_id.to_string(),
            is_guest,
            permissions: vec!["chat".into(), "read".into()],
            expires_at: parley_core::token::unix_now_secs() + TOKEN_TTL_SECS,
        };
        let token = issue_token(&self.secret, &claims)?;
        Ok((token, claims))
    }

    pub fn verify_access_token(&self, token: &str) -> ParleyResult<AccessClaims> {
        verify_token(&self.secret, token)
    }

    /// Bind the WebSocket listener and serve connections until the process
    /// exits.
    pub async fn run_ws(self: Arc<Self>, bind_addr: SocketAddr) -> ParleyResult<()> {
        let mut connections = transport::start_listener(bind_addr).await?;
        let server = self;
        tokio::spawn(async move {
            while let Some(conn) = connections.recv().await {
                let server = Arc::clone(&server);
                tokio::spawn(async move {
                    server.handle_connection(conn).await;
                });
            }
        });
        Ok(())
    }

    /// Spawn the periodic moderation/history sweeper and, when a directory
    /// is configured, the registration and heartbeat tasks.
    pub fn spawn_background(self: Arc<Self>) {
        let server = Arc::clone(&self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let now = SystemTime::now();
                server.moderation.lock().await.sweep(now);
                server.history.lock().await.prune(now);
            }
        });

        if let Some(directory) = self.directory.clone() {
            let server = self;
            tokio::spawn(async move {
                directory.register_with_retry().await;
                let mut ticker = tokio::time::interval(server.config.heartbeat_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    let users = server.sessions.count().await as u32;
                    let messages = server.history.lock().await.total_messages();
                    directory.tick(users, messages).await;
                }
            });
        }
    }

    /// Best-effort goodbye: notify connected sessions, then the directory.
    /// Called once on shutdown; never blocks on a slow peer.
    pub async fn shutdown(&self) {
        self.sessions
            .broadcast(&error_frame("server shutting down"), None)
            .await;
        self.sessions.close_all("server shutting down").await;
        if let Some(directory) = &self.directory {
            let messages = self.history.lock().await.total_messages();
            directory.shutdown(messages).await;
        }
    }

    async fn handle_connection(self: Arc<Self>, conn: WebSocketConnection) {
        let mut ws = conn.ws_stream;
        let remote = conn.remote_addr;
        let conn_id = self.sessions.next_conn_id();

        // Authentication phase. Typed rejections keep the connection open so
        // the client can retry, bounded by one overall deadline.
        let deadline = tokio::time::Instant::now() + AUTH_TIMEOUT;
        let (claims, mut rx, summary) = loop {
            let frame =
                match tokio::time::timeout_at(deadline, transport::ws_recv_frame(&mut ws)).await {
                    Ok(Ok(Some(frame))) => frame,
                    Ok(Ok(None)) => return,
                    Ok(Err(e)) => {
                        debug!(remote = %remote, error = %e, "pre-auth recv failed");
                        return;
                    }
                    Err(_) => {
                        debug!(remote = %remote, "authentication timed out");
                        return;
                    }
                };

            let ClientFrame::Auth {
                token,
                username,
                device_id,
            } = frame
            else {
                self.reply(
                    &mut ws,
                    ServerFrame::AuthError {
                        message: "authenticate first".into(),
                    },
                )
                .await;
                continue;
            };

            let now = SystemTime::now();
            let claims = match self
                .authenticate_connection(token.as_deref(), username.as_deref(), &device_id, now)
                .await
            {
                Ok(claims) => claims,
                Err(message) => {
                    self.reply(&mut ws, ServerFrame::AuthError { message }).await;
                    continue;
                }
            };

            let (tx, rx) = mpsc::channel::<Outbound>(OUTBOX_DEPTH);
            let session = Session {
                conn_id,
                user_id: claims.user_id.clone(),
                username: claims.username.clone(),
                device_id: claims.device_id.clone(),
                is_guest: claims.is_guest,
                permissions: Permission::from_claims(&claims.permissions),
                joined_at: now,
                last_activity: now,
                muted_until: None,
                outbox: tx,
            };
            let summary = session.summary();

            match self.sessions.insert(session).await {
                Ok(()) => break (claims, rx, summary),
                Err(e) => {
                    self.reply(
                        &mut ws,
                        ServerFrame::AuthError {
                            message: e.to_string(),
                        },
                    )
                    .await;
                }
            }
        };

        // Welcome sequence: identity, roster, recent history.
        let users = self.sessions.list_users().await;
        let recent = self.history.lock().await.recent(HISTORY_REPLAY);
        let welcome = [
            ServerFrame::AuthSuccess {
                user_id: claims.user_id.clone(),
                username: claims.username.clone(),
            },
            ServerFrame::UserList { users },
            ServerFrame::MessageHistory { messages: recent },
        ];
        for frame in welcome {
            if transport::ws_send_frame(&mut ws, &frame).await.is_err() {
                self.sessions.remove(conn_id).await;
                return;
            }
        }

        self.history.lock().await.push_system(
            &format!("{} joined", claims.username),
            MessageKind::Join,
            SystemTime::now(),
        );
        self.sessions
            .broadcast(&ServerFrame::UserJoined { user: summary }, Some(conn_id))
            .await;

        // Relay loop.
        let mut close_reason: Option<String> = None;
        loop {
            tokio::select! {
                outbound = rx.recv() => match outbound {
                    Some(Outbound::Frame(frame)) => {
                        if transport::ws_send_frame(&mut ws, &frame).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Close { reason }) => {
                        close_reason = Some(reason);
                        break;
                    }
                    None => break,
                },
                inbound = transport::ws_recv_frame(&mut ws) => match inbound {
                    Ok(Some(frame)) => {
                        if let Flow::Close(reason) = self.handle_frame(conn_id, frame).await {
                            close_reason = Some(reason);
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!(conn_id, error = %e, "recv failed, closing");
                        break;
                    }
                },
            }
        }

        if let Some(reason) = &close_reason {
            info!(conn_id, reason, "connection closed by server");
        }
        let _ = ws.close(None).await;

        if let Some(session) = self.sessions.remove(conn_id).await {
            let now = SystemTime::now();
            self.history.lock().await.push_system(
                &format!("{} left", session.username),
                MessageKind::Leave,
                now,
            );
            self.sessions
                .broadcast(
                    &ServerFrame::UserLeft {
                        user_id: session.user_id,
                        reason: close_reason.unwrap_or_else(|| "disconnected".to_string()),
                    },
                    None,
                )
                .await;
        }
    }

    /// Entry checks for a new connection: ban status, then token or guest
    /// credentials. The error string goes into an `auth_error` frame.
    async fn authenticate_connection(
        &self,
        token: Option<&str>,
        username: Option<&str>,
        device_id: &str,
        now: SystemTime,
    ) -> Result<AccessClaims, String> {
        if device_id.trim().is_empty() {
            return Err("device id required".into());
        }

        if let Some(status) = self.moderation.lock().await.bans.status(device_id, now) {
            return Err(format!(
                "banned: {} ({}m remaining)",
                status.reason,
                status.remaining.as_secs().div_ceil(60)
            ));
        }

        if let Some(token) = token {
            let claims = self.verify_access_token(token).map_err(|e| e.to_string())?;
            if claims.device_id != device_id {
                return Err("token bound to another device".into());
            }
            return Ok(claims);
        }

        // Tokenless guest entry, only on open gateways.
        if self.config.password_required() {
            return Err("this gateway requires a password; connect via /auth/connect".into());
        }
        let name = match username {
            Some(name) => name.to_string(),
            None => format!("guest-{}", &generate_id()[..6]),
        };
        let (_token, claims) = self
            .issue_access_token(&name, device_id, true)
            .map_err(|e| e.to_string())?;
        Ok(claims)
    }

    /// Dispatch one post-auth frame. Replies to the sender go through its
    /// outbox so nothing here ever waits on the socket.
    async fn handle_frame(&self, conn_id: u64, frame: ClientFrame) -> Flow {
        let now = SystemTime::now();
        self.sessions.touch(conn_id, now).await;

        match frame {
            ClientFrame::Auth { .. } => {
                if let Some(session) = self.sessions.get(conn_id).await {
                    session.send(error_frame("already authenticated"));
                }
                Flow::Continue
            }
            ClientFrame::Message { content, kind } => {
                self.handle_message(conn_id, content, kind, now).await
            }
            ClientFrame::TypingStart | ClientFrame::TypingStop => {
                let typing = matches!(frame, ClientFrame::TypingStart);
                if let Some(session) = self.sessions.get(conn_id).await {
                    self.sessions
                        .broadcast(
                            &ServerFrame::UserTyping {
                                user_id: session.user_id,
                                typing,
                            },
                            Some(conn_id),
                        )
                        .await;
                }
                Flow::Continue
            }
        }
    }

    async fn handle_message(
        &self,
        conn_id: u64,
        content: String,
        kind: MessageKind,
        now: SystemTime,
    ) -> Flow {
        let Some(session) = self.sessions.get(conn_id).await else {
            return Flow::Close("session vanished".into());
        };

        if !session.can(Permission::Chat) {
            session.send(error_frame("no chat permission"));
            return Flow::Continue;
        }
        if !matches!(kind, MessageKind::Text) {
            session.send(error_frame("only text messages accepted"));
            return Flow::Continue;
        }

        let content = content.trim().to_string();
        if content.is_empty() {
            session.send(error_frame("empty message"));
            return Flow::Continue;
        }
        if content.chars().count() > MAX_MESSAGE_LEN {
            session.send(error_frame(&format!(
                "message exceeds {MAX_MESSAGE_LEN} characters"
            )));
            return Flow::Continue;
        }

        if self.sessions.check_muted(conn_id, now).await {
            session.send(error_frame("you are muted"));
            return Flow::Continue;
        }

        // Moderation gate: ban check, then the spam verdict. Frames are
        // built while the lock is held but only queued after it is released.
        let verdict = {
            let mut moderation = self.moderation.lock().await;
            if let Some(status) = moderation.bans.status(&session.device_id, now) {
                let frame = ServerFrame::Banned {
                    reason: status.reason,
                    duration_minutes: status.remaining.as_secs().div_ceil(60),
                };
                drop(moderation);
                session.send(frame);
                return Flow::Close("banned".into());
            }
            let verdict = moderation.spam.check(&session.device_id, &content, now);
            if verdict.should_ban {
                let minutes = moderation.spam.config().ban_minutes;
                moderation
                    .bans
                    .ban(&session.device_id, "spam", minutes, "system", now);
                moderation.spam.reset(&session.device_id);
            }
            verdict
        };

        if verdict.should_ban {
            let minutes = self.config.spam.ban_minutes;
            warn!(
                user_id = %session.user_id,
                count = verdict.message_count,
                "spam ban applied"
            );
            self.report_ban_async(&session.device_id, "spam", minutes);
            session.send(ServerFrame::Banned {
                reason: "spam".into(),
                duration_minutes: minutes,
            });
            return Flow::Close("spam".into());
        }
        if verdict.over_limit {
            session.send(error_frame("sending too fast, message dropped"));
            return Flow::Continue;
        }
        if verdict.should_warn {
            session.send(ServerFrame::Warning {
                message: format!(
                    "slow down: {} messages left before the limit",
                    verdict.remaining
                ),
            });
        }

        let message = self.history.lock().await.push(
            &session.user_id,
            &session.username,
            &content,
            MessageKind::Text,
            now,
        );
        self.sessions
            .broadcast(&ServerFrame::Message(message), None)
            .await;
        Flow::Continue
    }

    /// Tell a banned device's live session about the ban, then close it.
    pub async fn disconnect_device(&self, device_id: &str, reason: &str, minutes: u64) {
        if let Some(session) = self.sessions.find_by_device(device_id).await {
            session.send(ServerFrame::Banned {
                reason: reason.to_string(),
                duration_minutes: minutes,
            });
            let _ = session.outbox.try_send(Outbound::Close {
                reason: reason.to_string(),
            });
        }
    }

    /// Forward a ban to the directory without holding up the caller.
    pub fn report_ban_async(&self, device_id: &str, reason: &str, minutes: u64) {
        let Some(directory) = self.directory.clone() else {
            return;
        };
        let device_id = device_id.to_string();
        let reason = reason.to_string();
        tokio::spawn(async move {
            directory.report_ban(&device_id, &reason, minutes).await;
        });
    }

    async fn reply(
        &self,
        ws: &mut tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
        frame: ServerFrame,
    ) {
        let _ = transport::ws_send_frame(ws, &frame).await;
    }
}

enum Flow {
    Continue,
    Close(String),
}

fn error_frame(message: &str) -> ServerFrame {
    ServerFrame::Error {
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_server() -> Arc<GatewayServer> {
        let config = GatewayConfig::load(None, None, None, None, None).unwrap();
        GatewayServer::new(config)
    }

    async fn join(
        server: &GatewayServer,
        username: &str,
        device: &str,
    ) -> (u64, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(OUTBOX_DEPTH);
        let now = SystemTime::now();
        let session = Session {
            conn_id: server.sessions.next_conn_id(),
            user_id: format!("id-{username}"),
            username: username.to_string(),
            device_id: device.to_string(),
            is_guest: false,
            permissions: Permission::defaults(),
            joined_at: now,
            last_activity: now,
            muted_until: None,
            outbox: tx,
        };
        let conn_id = session.conn_id;
        server.sessions.insert(session).await.unwrap();
        (conn_id, rx)
    }

    #[tokio::test]
    async fn oversized_message_never_enters_history() {
        let server = test_server();
        let (conn_id, mut rx) = join(&server, "alice", "d1").await;

        let content = "x".repeat(MAX_MESSAGE_LEN + 1);
        let flow = server
            .handle_message(conn_id, content, MessageKind::Text, SystemTime::now())
            .await;
        assert!(matches!(flow, Flow::Continue));
        assert_eq!(server.history.lock().await.len(), 0);
        assert_eq!(server.history.lock().await.total_messages(), 0);
        match rx.try_recv() {
            Ok(Outbound::Frame(ServerFrame::Error { .. })) => {}
            other => panic!("expected error frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn accepted_message_reaches_history_and_sender() {
        let server = test_server();
        let (conn_id, mut rx) = join(&server, "alice", "d1").await;

        let flow = server
            .handle_message(conn_id, "hello".into(), MessageKind::Text, SystemTime::now())
            .await;
        assert!(matches!(flow, Flow::Continue));
        assert_eq!(server.history.lock().await.len(), 1);
        match rx.try_recv() {
            Ok(Outbound::Frame(ServerFrame::Message(m))) => assert_eq!(m.content, "hello"),
            other => panic!("expected message frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn banned_device_gets_frame_and_close() {
        let server = test_server();
        let (conn_id, mut rx) = join(&server, "alice", "d1").await;

        let now = SystemTime::now();
        server
            .moderation
            .lock()
            .await
            .bans
            .ban("d1", "spam", 60, "operator", now);

        let flow = server
            .handle_message(conn_id, "hi".into(), MessageKind::Text, now)
            .await;
        assert!(matches!(flow, Flow::Close(_)));
        assert_eq!(server.history.lock().await.len(), 0);
        // The frame was queued after the moderation lock was released.
        assert!(server.moderation.lock().await.bans.status("d1", now).is_some());
        match rx.try_recv() {
            Ok(Outbound::Frame(ServerFrame::Banned { .. })) => {}
            other => panic!("expected banned frame, got {other:?}"),
        }
    }
}

