//! Process lifecycle: listeners, drain and exit
//!
//! `Starting -> Serving -> Draining -> Exiting`
//!
//! Both listeners and the drain timer race to deliver onto a single-slot exit
//! channel. The coordinator consumes the first delivery; later ones are dropped
//! by the producer without blocking.

use crate::server;
use crate::state::SharedState;
use axum::Router;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    Starting = 0,
    Serving = 1,
    Draining = 2,
    Exiting = 3,
}

impl Phase {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Phase::Starting,
            1 => Phase::Serving,
            2 => Phase::Draining,
            _ => Phase::Exiting,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Starting => "Starting",
            Phase::Serving => "Serving",
            Phase::Draining => "Draining",
            Phase::Exiting => "Exiting",
        }
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{listener} listener failed to bind {address}: {source}")]
    Bind {
        listener: &'static str,
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{listener} listener stopped: {source}")]
    Serve {
        listener: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Why the process is exiting
#[derive(Debug)]
pub enum ExitReason {
    /// Drain timer fired after terminate
    Terminated,
    Listener(LifecycleError),
}

/// Producer side of the exit channel
#[derive(Debug, Clone)]
pub struct ExitSignal {
    tx: mpsc::Sender<ExitReason>,
}

/// Consumer side of the exit channel, owned by the coordinator
#[derive(Debug)]
pub struct ExitReceiver {
    rx: mpsc::Receiver<ExitReason>,
}

pub fn exit_channel() -> (ExitSignal, ExitReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (ExitSignal { tx }, ExitReceiver { rx })
}

impl ExitSignal {
    /// Never blocks; returns false when a signal is already pending
    pub fn deliver(&self, reason: ExitReason) -> bool {
        match self.tx.try_send(reason) {
            Ok(()) => true,
            Err(e) => {
                debug!(reason = ?e.into_inner(), "Exit already signalled, dropping");
                false
            }
        }
    }
}

impl ExitReceiver {
    /// First delivered reason; a channel with no producers left counts as terminated
    pub async fn wait(&mut self) -> ExitReason {
        self.rx.recv().await.unwrap_or(ExitReason::Terminated)
    }
}

pub struct Lifecycle {
    phase: AtomicU8,
    terminating: AtomicBool,
    terminate_delay: Duration,
    exit: ExitSignal,
}

impl Lifecycle {
    pub fn new(terminate_delay: Duration) -> (Self, ExitReceiver) {
        let (exit, rx) = exit_channel();
        let lifecycle = Self {
            phase: AtomicU8::new(Phase::Starting as u8),
            terminating: AtomicBool::new(false),
            terminate_delay,
            exit,
        };
        (lifecycle, rx)
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub fn set_phase(&self, phase: Phase) {
        let previous = Phase::from_u8(self.phase.swap(phase as u8, Ordering::SeqCst));
        if previous != phase {
            info!(from = previous.as_str(), to = phase.as_str(), "Lifecycle transition");
        }
    }

    /// Starting -> Serving; a drain requested during startup wins
    pub fn mark_serving(&self) {
        if self
            .phase
            .compare_exchange(
                Phase::Starting as u8,
                Phase::Serving as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        {
            info!(to = Phase::Serving.as_str(), "Lifecycle transition");
        }
    }

    pub fn exit_signal(&self) -> ExitSignal {
        self.exit.clone()
    }

    /// Enter Draining and arm the delayed exit, once
    ///
    /// Returns true for the call that armed the timer.
    pub fn begin_drain(&self) -> bool {
        if self.terminating.swap(true, Ordering::SeqCst) {
            debug!("Terminate already in progress");
            return false;
        }

        self.set_phase(Phase::Draining);
        let exit = self.exit.clone();
        let delay = self.terminate_delay;
        info!(delay_secs = delay.as_secs_f64(), "Exit scheduled");
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            exit.deliver(ExitReason::Terminated);
        });
        true
    }
}

/// Bind and serve one listener; any termination is delivered as an exit reason
pub fn spawn_listener(
    name: &'static str,
    address: String,
    router: Router,
    exit: ExitSignal,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let bound = TcpListener::bind(address.as_str()).await;
        let err = match bound {
            Ok(listener) => {
                info!(listener = name, socket = %address, "Listening");
                let served = axum::serve(
                    listener,
                    router.into_make_service_with_connect_info::<SocketAddr>(),
                )
                .await;
                LifecycleError::Serve {
                    listener: name,
                    source: served
                        .err()
                        .unwrap_or_else(|| std::io::Error::other("server returned")),
                }
            }
            Err(source) => LifecycleError::Bind {
                listener: name,
                address,
                source,
            },
        };

        error!(error = %err, "Listener terminated");
        exit.deliver(ExitReason::Listener(err));
    })
}

/// Serve both listeners until the first exit signal, then wait the exit delay
pub async fn run(state: SharedState, mut exit: ExitReceiver) -> Result<(), LifecycleError> {
    let config = &state.config;

    let client = spawn_listener(
        "client",
        config.listen.clone(),
        server::client_router(state.clone()),
        state.lifecycle.exit_signal(),
    );
    let admin = spawn_listener(
        "admin",
        config.listen_admin.clone(),
        server::admin_router(state.clone()),
        state.lifecycle.exit_signal(),
    );
    state.lifecycle.mark_serving();

    let reason = exit.wait().await;
    state.lifecycle.set_phase(Phase::Exiting);

    let result = match reason {
        ExitReason::Terminated => {
            info!("Terminating on request");
            Ok(())
        }
        ExitReason::Listener(e) => {
            error!(error = %e, "Terminating with error");
            Err(e)
        }
    };

    if !config.exit_delay.is_zero() {
        info!(
            seconds = config.exit_delay.as_secs(),
            "Waiting before exiting"
        );
        tokio::time::sleep(config.exit_delay).await;
    }

    client.abort();
    admin.abort();
    result
}

#[cfg(test)]
#[path = "lifecycle_test.rs"]
mod tests;
