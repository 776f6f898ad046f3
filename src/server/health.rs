//! Health check endpoints for Kubernetes probes
//!
//! - `/check/live` - Liveness: Is the process alive?
//! - `/check/ready` - Readiness: Should the instance receive traffic?
//!
//! Readiness combines an internal flag, cleared by terminate, with a sentinel
//! file an operator can create to take the pod out of rotation.

use crate::state::SharedState;
use axum::{extract::State, http::StatusCode, response::IntoResponse};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Outcome of a readiness check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// The sentinel file exists
    SentinelPresent(PathBuf),
    /// Terminate was requested
    Draining,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready)
    }
}

/// Readiness flag plus sentinel file
#[derive(Debug)]
pub struct ReadinessGate {
    sentinel: PathBuf,
    ready: AtomicBool,
}

impl ReadinessGate {
    /// Starts ready; only the sentinel can hold it back
    pub fn new(sentinel: impl Into<PathBuf>) -> Self {
        Self {
            sentinel: sentinel.into(),
            ready: AtomicBool::new(true),
        }
    }

    pub fn sentinel(&self) -> &Path {
        &self.sentinel
    }

    /// True iff the sentinel file does not exist, checked on every call
    pub fn is_ready(&self) -> bool {
        !self.sentinel.exists()
    }

    /// Internal flag, false once terminate ran
    pub fn flag(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// One-way transition to not ready
    pub fn mark_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    pub fn check(&self) -> Readiness {
        if !self.is_ready() {
            Readiness::SentinelPresent(self.sentinel.clone())
        } else if self.flag() {
            Readiness::Ready
        } else {
            Readiness::Draining
        }
    }
}

/// Liveness probe handler
///
/// Always returns 200 OK - if this responds, the process is alive.
pub async fn live_handler() -> &'static str {
    "OK"
}

/// Readiness probe handler
///
/// Returns 200 OK if ready, 404 Not Found with the reason otherwise.
pub async fn ready_handler(State(state): State<SharedState>) -> impl IntoResponse {
    match state.readiness.check() {
        Readiness::Ready => (StatusCode::OK, "OK".to_string()),
        Readiness::SentinelPresent(path) => {
            debug!(sentinel = %path.display(), "Readiness held back by sentinel");
            (
                StatusCode::NOT_FOUND,
                format!("NOT ready, {} exists", path.display()),
            )
        }
        Readiness::Draining => (StatusCode::NOT_FOUND, "NOT ready".to_string()),
    }
}
