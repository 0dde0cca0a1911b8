//! Background liveness sweeper.
//!
//! Marks records offline once their heartbeat goes stale and, when probing
//! is enabled, cross-checks online records against their `/health` endpoint
//! so a crashed gateway disappears before its heartbeat ages out.

use crate::config::DirectoryConfig;
use crate::store::ServerStore;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub fn spawn(store: Arc<ServerStore>, config: DirectoryConfig) {
    let prober = if config.probe_health {
        reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .map_err(|e| warn!(error = %e, "health prober disabled: client build failed"))
            .ok()
    } else {
        None
    };

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let marked = store.sweep_stale(SystemTime::now()).await;
            if marked > 0 {
                debug!(marked, "sweep marked stale servers offline");
            }
            if let Some(client) = &prober {
                probe_online(&store, client).await;
            }
        }
    });
}

async fn probe_online(store: &ServerStore, client: &reqwest::Client) {
    for record in store.online_servers().await {
        let url = format!("http://{}/health", record.address());
        let healthy = match client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(server_id = %record.id, error = %e, "health probe failed");
                false
            }
        };
        if !healthy {
            store.set_online(&record.id, false).await;
        }
    }
}
