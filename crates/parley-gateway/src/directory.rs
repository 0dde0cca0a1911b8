//! Directory client.
//!
//! Keeps one gateway's listing in the directory service alive: an initial
//! bounded-retry registration, a periodic heartbeat, and a best-effort
//! goodbye on shutdown. Registration state is a small machine; a heartbeat
//! answered with 401 or 404 means the directory no longer knows us, so the
//! client falls back to `Unregistered` and re-registers on a later tick.

use crate::config::GatewayConfig;
use parley_core::directory_api::{BanReport, PingRequest, RegisterRequest, RegisterResponse};
use parley_core::{ParleyError, ParleyResult};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Unregistered,
    Registering,
    Registered { server_id: String },
}

struct ClientState {
    phase: Phase,
    attempts: u32,
}

/// Handle to this gateway's directory listing.
pub struct DirectoryClient {
    http: reqwest::Client,
    base_url: String,
    config: GatewayConfig,
    state: Mutex<ClientState>,
}

impl DirectoryClient {
    /// Returns `None` when no directory URL is configured; the gateway then
    /// runs unlisted.
    pub fn new(config: &GatewayConfig) -> Option<Self> {
        let base_url = config.directory_url.clone()?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .ok()?;
        Some(Self {
            http,
            base_url,
            config: config.clone(),
            state: Mutex::new(ClientState {
                phase: Phase::Unregistered,
                attempts: 0,
            }),
        })
    }

    pub async fn server_id(&self) -> Option<String> {
        match &self.state.lock().await.phase {
            Phase::Registered { server_id } => Some(server_id.clone()),
            _ => None,
        }
    }

    fn register_request(&self) -> RegisterRequest {
        RegisterRequest {
            name: self.config.name.clone(),
            ip_address: self.config.public_host.clone(),
            port: self.config.port,
            password_present: self.config.password_required(),
            max_users: self.config.max_users as u32,
            description: self.config.description.clone(),
        }
    }

    /// One registration attempt.
    async fn register_once(&self) -> ParleyResult<String> {
        let url = format!("{}/servers/register", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&self.register_request())
            .send()
            .await
            .map_err(|e| ParleyError::Transient(format!("directory unreachable: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::CONFLICT {
            return Err(ParleyError::Conflict("address already registered".into()));
        }
        if !status.is_success() {
            return Err(ParleyError::Transient(format!(
                "registration rejected: {status}"
            )));
        }
        let body: RegisterResponse = response
            .json()
            .await
            .map_err(|e| ParleyError::Transient(format!("bad registration response: {e}")))?;
        Ok(body.server_id)
    }

    /// Startup registration: a bounded number of attempts with a fixed delay
    /// between them. Gives up (leaving the gateway unlisted) after the last
    /// attempt fails; a later heartbeat tick will try again.
    pub async fn register_with_retry(&self) {
        {
            let mut state = self.state.lock().await;
            if matches!(state.phase, Phase::Registered { .. }) {
                return;
            }
            state.phase = Phase::Registering;
            state.attempts = 0;
        }

        for attempt in 1..=self.config.register_attempts {
            match self.register_once().await {
                Ok(server_id) => {
                    info!(server_id = %server_id, attempt, "registered with directory");
                    let mut state = self.state.lock().await;
                    state.phase = Phase::Registered { server_id };
                    state.attempts = 0;
                    return;
                }
                Err(e) => {
                    self.state.lock().await.attempts = attempt;
                    warn!(
                        attempt,
                        max = self.config.register_attempts,
                        error = %e,
                        "directory registration failed"
                    );
                    if attempt < self.config.register_attempts {
                        tokio::time::sleep(self.config.register_delay).await;
                    }
                }
            }
        }

        warn!("directory registration exhausted, running unlisted");
        self.state.lock().await.phase = Phase::Unregistered;
    }

    /// Heartbeat tick. Registered gateways ping their listing; an
    /// unregistered gateway uses the tick to re-register opportunistically.
    pub async fn tick(&self, current_users: u32, total_messages: u64) {
        let phase = self.state.lock().await.phase.clone();
        match phase {
            Phase::Registered { server_id } => {
                if let Err(e) = self.ping(&server_id, current_users, total_messages, false).await {
                    match e {
                        ParleyError::Auth(_) | ParleyError::NotFound(_) => {
                            warn!(server_id = %server_id, error = %e, "listing lost, re-registering");
                            self.state.lock().await.phase = Phase::Unregistered;
                        }
                        _ => debug!(error = %e, "heartbeat failed, keeping registration"),
                    }
                }
            }
            Phase::Unregistered => match self.register_once().await {
                Ok(server_id) => {
                    info!(server_id = %server_id, "re-registered with directory");
                    self.state.lock().await.phase = Phase::Registered { server_id };
                }
                Err(e) => debug!(error = %e, "opportunistic re-registration failed"),
            },
            Phase::Registering => {}
        }
    }

    async fn ping(
        &self,
        server_id: &str,
        current_users: u32,
        total_messages: u64,
        shutting_down: bool,
    ) -> ParleyResult<()> {
        let url = format!("{}/servers/{server_id}/ping", self.base_url);
        let body = PingRequest {
            current_users: Some(current_users),
            total_messages: Some(total_messages),
            shutting_down,
        };
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ParleyError::Transient(format!("directory unreachable: {e}")))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status == reqwest::StatusCode::UNAUTHORIZED {
            Err(ParleyError::Auth("heartbeat rejected".into()))
        } else if status == reqwest::StatusCode::NOT_FOUND {
            Err(ParleyError::NotFound("listing not found".into()))
        } else {
            Err(ParleyError::Transient(format!("heartbeat failed: {status}")))
        }
    }

    /// Forward a local ban to the directory. Best effort.
    pub async fn report_ban(&self, device_id: &str, reason: &str, duration_minutes: u64) {
        let Some(server_id) = self.server_id().await else {
            return;
        };
        let url = format!("{}/servers/{server_id}/ban", self.base_url);
        let body = BanReport {
            device_id: device_id.to_string(),
            reason: reason.to_string(),
            duration_minutes,
        };
        match self.http.post(&url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(device = %parley_core::short_device(device_id), "ban reported to directory");
            }
            Ok(response) => {
                debug!(status = %response.status(), "directory rejected ban report");
            }
            Err(e) => debug!(error = %e, "ban report failed"),
        }
    }

    /// Best-effort goodbye: a final ping with zero users so the listing
    /// shows empty until the sweep marks it offline.
    pub async fn shutdown(&self, total_messages: u64) {
        let Some(server_id) = self.server_id().await else {
            return;
        };
        if let Err(e) = self.ping(&server_id, 0, total_messages, true).await {
            debug!(error = %e, "shutdown ping failed");
        } else {
            info!(server_id = %server_id, "directory notified of shutdown");
        }
    }
}
