//! Process-wide shared state
//!
//! One [`ProcessState`] is built at startup and shared by `Arc` with both
//! listeners and every request task. Each component synchronizes its own
//! fields; there is no lock spanning components.

use crate::cluster::{ControlPlane, KubeControlPlane, SnapshotService};
use crate::config::Config;
use crate::counter::{CounterError, CounterStore, RedisCounter, RemoteCounter};
use crate::failure::{FailureInjector, Sampler, ThreadRngSampler};
use crate::lifecycle::{ExitReceiver, Lifecycle};
use crate::server::health::ReadinessGate;
use crate::server::metrics::{create_metrics, SharedMetrics};
use std::sync::Arc;
use tracing::info;

pub type SharedState = Arc<ProcessState>;

/// An environment variable as shown on the index page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
    /// Looks like a credential
    pub dangerous: bool,
}

impl EnvVar {
    pub fn new(name: &str, value: &str) -> Self {
        let probe = format!("{}{}", name, value).to_lowercase();
        let dangerous = ["pass", "user", "token", "key"]
            .iter()
            .any(|marker| probe.contains(marker));

        Self {
            name: name.to_string(),
            value: value.to_string(),
            dangerous,
        }
    }
}

/// Process environment, non UTF-8 bytes replaced
pub fn env_vars() -> impl Iterator<Item = (String, String)> {
    std::env::vars_os().map(|(name, value)| {
        (
            name.to_string_lossy().into_owned(),
            value.to_string_lossy().into_owned(),
        )
    })
}

/// Facts about the process captured once at startup
#[derive(Debug, Clone, Default)]
pub struct HostInfo {
    pub hostname: String,
    pub command: String,
    /// Sorted by name
    pub env: Vec<EnvVar>,
}

impl HostInfo {
    pub fn capture(config: &Config) -> Self {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Unable to read hostname");
                String::new()
            });

        let mut env: Vec<EnvVar> = env_vars()
            .map(|(name, value)| EnvVar::new(&name, &value))
            .collect();
        env.push(EnvVar::new("listen", &config.listen));
        env.push(EnvVar::new("listenAdmin", &config.listen_admin));
        env.sort_by(|a, b| a.name.cmp(&b.name));

        Self {
            hostname,
            command: std::env::args().collect::<Vec<_>>().join(" "),
            env,
        }
    }
}

/// Pluggable backends behind the core
pub struct Collaborators {
    pub control_plane: Arc<dyn ControlPlane>,
    pub remote_counter: Option<Arc<dyn RemoteCounter>>,
    pub sampler: Arc<dyn Sampler>,
}

impl Collaborators {
    /// Production backends: kube-rs, Redis when configured, thread RNG
    pub fn from_config(config: &Config) -> Result<Self, CounterError> {
        let remote_counter = match &config.redis_server {
            Some(address) => {
                info!(address = %address, "Using Redis hit counter");
                Some(Arc::new(RedisCounter::new(address)?) as Arc<dyn RemoteCounter>)
            }
            None => {
                info!("Redis server not used, counting hits in process");
                None
            }
        };

        Ok(Self {
            control_plane: Arc::new(KubeControlPlane::new(
                config.kubeconfig.clone(),
                config.kube_timeout,
            )),
            remote_counter,
            sampler: Arc::new(ThreadRngSampler),
        })
    }
}

pub struct ProcessState {
    pub config: Config,
    pub host: HostInfo,
    pub counter: CounterStore,
    pub injector: FailureInjector,
    pub readiness: ReadinessGate,
    pub resources: SnapshotService,
    pub lifecycle: Lifecycle,
    pub metrics: SharedMetrics,
}

impl ProcessState {
    pub fn new(
        config: Config,
        host: HostInfo,
        collaborators: Collaborators,
    ) -> Result<(SharedState, ExitReceiver), prometheus::Error> {
        let metrics = create_metrics()?;

        let counter = match collaborators.remote_counter {
            Some(remote) => CounterStore::remote(remote, config.cluster.as_deref(), metrics.clone()),
            None => CounterStore::in_process(metrics.clone()),
        };
        let injector =
            FailureInjector::with_sampler(config.failure_probability, collaborators.sampler);
        let readiness = ReadinessGate::new(config.ready_file.clone());
        let resources = SnapshotService::new(
            collaborators.control_plane,
            &config.namespace,
            config.kube_timeout,
        );
        let (lifecycle, exit) = Lifecycle::new(config.terminate_delay);

        let state = Arc::new(Self {
            config,
            host,
            counter,
            injector,
            readiness,
            resources,
            lifecycle,
            metrics,
        });
        Ok((state, exit))
    }

    /// Stop reporting ready and arm the delayed exit
    ///
    /// Returns true for the call that armed the timer.
    pub fn terminate(&self) -> bool {
        self.readiness.mark_not_ready();
        self.lifecycle.begin_drain()
    }
}
