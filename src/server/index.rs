//! Index page request pipeline
//!
//! Every `/` request runs the same ordered steps:
//!
//! 1. Count the hit
//! 2. Maybe abort with an injected failure
//! 3. Sample readiness
//! 4. Collect caller address and headers
//! 5. Read the config file
//! 6. Refresh the cluster snapshot
//! 7. List the persistent data directory
//!
//! Steps 5-7 degrade to a warning on the page instead of failing the request.

use super::render;
use crate::cluster::ResourceSnapshot;
use crate::failure::InjectedFailure;
use crate::lifecycle::Phase;
use crate::state::{EnvVar, ProcessState, SharedState};
use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// A request header; repeated values are joined by a space
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Everything the index page shows
#[derive(Debug, Clone)]
pub struct IndexView {
    pub hostname: String,
    pub command: String,
    pub color: String,
    pub hits: u64,
    pub redis_host: Option<String>,
    pub redis_key: Option<String>,
    pub redis_error: Option<String>,
    pub failure_probability: f64,
    pub ready: bool,
    pub phase: Phase,
    /// Caller IP, port dropped
    pub remote_addr: String,
    pub headers: Vec<Header>,
    pub config_path: String,
    pub config_file: Option<String>,
    pub config_error: Option<String>,
    pub namespace: String,
    pub kubernetes_host: Option<String>,
    pub kubernetes_error: Option<String>,
    pub resources: Arc<ResourceSnapshot>,
    pub persistent_dir: String,
    pub persistent_files: Vec<String>,
    pub env: Vec<EnvVar>,
}

impl IntoResponse for InjectedFailure {
    fn into_response(self) -> Response {
        (StatusCode::BAD_GATEWAY, self.to_string()).into_response()
    }
}

pub async fn root_handler(
    State(state): State<SharedState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Html<String>, InjectedFailure> {
    let view = build_index(&state, remote, &headers).await?;
    Ok(Html(render::index_page(&view)))
}

/// Run the pipeline for one request
///
/// The only hard failure is an injected one; it is returned before any
/// later step runs.
pub async fn build_index(
    state: &ProcessState,
    remote: SocketAddr,
    headers: &HeaderMap,
) -> Result<IndexView, InjectedFailure> {
    let config = &state.config;

    let increment = state.counter.increment().await;

    if let Some(failure) = state.injector.should_fail() {
        warn!(remote = %remote, error = %failure, "Injected failure");
        state.metrics.record_injected_failure();
        return Err(failure);
    }

    let ready = state.readiness.check().is_ready();

    let headers = collect_headers(headers);

    let (config_file, config_error) = match tokio::fs::read_to_string(&config.config_file).await {
        Ok(content) => (Some(content), None),
        Err(e) => {
            debug!(path = %config.config_file.display(), error = %e, "Config file not readable");
            (None, Some(format!("Unable to read {}: {}", config.config_file.display(), e)))
        }
    };

    let kubernetes_error = match state.resources.refresh().await {
        Ok(()) => None,
        Err(e) => {
            warn!(error = %e, "Kubernetes refresh failed");
            Some(e.to_string())
        }
    };

    let persistent_files = list_persistent_files(&config.data_dir).await;

    Ok(IndexView {
        hostname: state.host.hostname.clone(),
        command: state.host.command.clone(),
        color: config.color.clone(),
        hits: increment.hits,
        redis_host: state.counter.remote_address().map(str::to_string),
        redis_key: state
            .counter
            .remote_address()
            .map(|_| state.counter.key().to_string()),
        redis_error: increment.error.map(|e| e.to_string()),
        failure_probability: state.injector.probability(),
        ready,
        phase: state.lifecycle.phase(),
        remote_addr: remote.ip().to_string(),
        headers,
        config_path: config.config_file.display().to_string(),
        config_file,
        config_error,
        namespace: state.resources.namespace().to_string(),
        kubernetes_host: state.resources.host(),
        kubernetes_error,
        resources: state.resources.snapshot(),
        persistent_dir: config.data_dir.display().to_string(),
        persistent_files,
        env: state.host.env.clone(),
    })
}

/// Headers sorted by name, repeated values joined by a space
pub fn collect_headers(headers: &HeaderMap) -> Vec<Header> {
    let mut merged: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        merged
            .entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }

    merged
        .into_iter()
        .map(|(name, values)| Header {
            name,
            value: values.join(" "),
        })
        .collect()
}

/// Sorted entries of the data directory, directories suffixed with " (d)"
///
/// A missing or unreadable directory yields an empty list.
pub async fn list_persistent_files(dir: &Path) -> Vec<String> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            debug!(path = %dir.display(), error = %e, "Data directory not readable");
            return Vec::new();
        }
    };

    let mut files = Vec::new();
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                let mut name = entry.file_name().to_string_lossy().into_owned();
                if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                    name.push_str(" (d)");
                }
                files.push(name);
            }
            Ok(None) => break,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "Data directory listing interrupted");
                break;
            }
        }
    }
    files.sort();
    files
}

#[cfg(test)]
#[path = "index_test.rs"]
mod tests;
