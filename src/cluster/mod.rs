//! Cluster resource snapshot and mutation
//!
//! Lists pods, services, deployments and replica sets of one namespace and
//! keeps the last complete listing for the index page. Deletes resources by
//! kind and name.
//!
//! The API server is reached through [`ControlPlane`] so the snapshot logic can
//! be exercised without a cluster.

mod client;

pub use client::KubeControlPlane;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Can't connect to kubernetes: {0}")]
    Connect(String),

    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    #[error("Missing resource type")]
    MissingKind,

    #[error("Missing resource name")]
    MissingName,

    #[error("Unknown resource type {0:?}")]
    UnknownKind(String),

    #[error("Kubernetes did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Unable to serialize {0}: {1}")]
    Serialize(String, String),
}

impl ClusterError {
    /// Errors caused by the request itself, raised before any API call
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ClusterError::MissingKind | ClusterError::MissingName | ClusterError::UnknownKind(_)
        )
    }
}

/// Workload kinds shown on the index page and accepted for deletion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ResourceKind {
    Pod,
    Service,
    Deployment,
    ReplicaSet,
}

impl ResourceKind {
    /// Listing order of a refresh
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Pod,
        ResourceKind::Service,
        ResourceKind::Deployment,
        ResourceKind::ReplicaSet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Pod => "pod",
            ResourceKind::Service => "service",
            ResourceKind::Deployment => "deployment",
            ResourceKind::ReplicaSet => "replicaset",
        }
    }

    /// Short form used in delete links
    pub fn short_name(&self) -> &'static str {
        match self {
            ResourceKind::Pod => "pod",
            ResourceKind::Service => "svc",
            ResourceKind::Deployment => "deploy",
            ResourceKind::ReplicaSet => "rs",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Err(ClusterError::MissingKind),
            "pod" | "po" | "pods" => Ok(ResourceKind::Pod),
            "svc" | "service" | "services" => Ok(ResourceKind::Service),
            "deploy" | "deployment" | "deployments" => Ok(ResourceKind::Deployment),
            "rs" | "replicaset" | "replicasets" => Ok(ResourceKind::ReplicaSet),
            other => Err(ClusterError::UnknownKind(other.to_string())),
        }
    }
}

/// Lightweight description of one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceSummary {
    pub name: String,
    pub namespace: String,
    /// Short state, e.g. pod phase or `2/3` ready replicas
    pub status: String,
    /// Secondary details (IPs, ports, restarts)
    pub detail: String,
}

/// One complete listing of the namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResourceSnapshot {
    pub pods: Vec<ResourceSummary>,
    pub services: Vec<ResourceSummary>,
    pub deployments: Vec<ResourceSummary>,
    pub replica_sets: Vec<ResourceSummary>,
}

impl ResourceSnapshot {
    pub fn get(&self, kind: ResourceKind) -> &[ResourceSummary] {
        match kind {
            ResourceKind::Pod => &self.pods,
            ResourceKind::Service => &self.services,
            ResourceKind::Deployment => &self.deployments,
            ResourceKind::ReplicaSet => &self.replica_sets,
        }
    }

    fn set(&mut self, kind: ResourceKind, items: Vec<ResourceSummary>) {
        match kind {
            ResourceKind::Pod => self.pods = items,
            ResourceKind::Service => self.services = items,
            ResourceKind::Deployment => self.deployments = items,
            ResourceKind::ReplicaSet => self.replica_sets = items,
        }
    }

    pub fn is_empty(&self) -> bool {
        ResourceKind::ALL.iter().all(|k| self.get(*k).is_empty())
    }
}

/// Builds sessions against the API server
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn ClusterSession>, ClusterError>;
}

/// An authenticated connection to the API server
#[async_trait]
pub trait ClusterSession: Send + Sync {
    /// API server URL
    fn host(&self) -> String;

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
    ) -> Result<Vec<ResourceSummary>, ClusterError>;

    /// Delete with a one second grace period and background propagation
    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), ClusterError>;

    /// All readable secrets, keyed `namespace/name`, serialized as JSON
    async fn list_secrets(&self) -> Result<BTreeMap<String, String>, ClusterError>;
}

/// Cached view of the namespace plus delete access
pub struct SnapshotService {
    control_plane: Arc<dyn ControlPlane>,
    namespace: String,
    timeout: Duration,
    snapshot: RwLock<Arc<ResourceSnapshot>>,
    last_error: Mutex<Option<String>>,
    host: Mutex<Option<String>>,
}

impl SnapshotService {
    pub fn new(control_plane: Arc<dyn ControlPlane>, namespace: &str, timeout: Duration) -> Self {
        Self {
            control_plane,
            namespace: namespace.to_string(),
            timeout,
            snapshot: RwLock::new(Arc::new(ResourceSnapshot::default())),
            last_error: Mutex::new(None),
            host: Mutex::new(None),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Last complete listing
    pub fn snapshot(&self) -> Arc<ResourceSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// API server of the last established session
    pub fn host(&self) -> Option<String> {
        self.host
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Re-list all kinds; the cached snapshot changes only if every list succeeds
    pub async fn refresh(&self) -> Result<(), ClusterError> {
        match self.bounded(self.fetch()).await {
            Ok(next) => {
                debug!(
                    namespace = %self.namespace,
                    pods = next.pods.len(),
                    services = next.services.len(),
                    deployments = next.deployments.len(),
                    replica_sets = next.replica_sets.len(),
                    "Resource snapshot refreshed"
                );
                *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
                *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = None;
                Ok(())
            }
            Err(e) => {
                warn!(namespace = %self.namespace, error = %e, "Resource snapshot refresh failed");
                *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(e.to_string());
                Err(e)
            }
        }
    }

    async fn fetch(&self) -> Result<ResourceSnapshot, ClusterError> {
        let session = self.connect().await?;

        let mut next = ResourceSnapshot::default();
        for kind in ResourceKind::ALL {
            let items = session.list(kind, &self.namespace).await?;
            next.set(kind, items);
        }
        Ok(next)
    }

    /// Delete `name` of `kind`; validation errors never reach the API server
    pub async fn delete(&self, kind: &str, name: &str) -> Result<ResourceKind, ClusterError> {
        if kind.is_empty() {
            return Err(ClusterError::MissingKind);
        }
        if name.is_empty() {
            return Err(ClusterError::MissingName);
        }
        let kind: ResourceKind = kind.parse()?;

        self.bounded(async {
            let session = self.connect().await?;
            session.delete(kind, &self.namespace, name).await
        })
        .await?;

        info!(kind = %kind, name = %name, namespace = %self.namespace, "Deleted resource");
        Ok(kind)
    }

    /// Cluster-wide secret dump for the exfiltration demo
    pub async fn secrets(&self) -> Result<BTreeMap<String, String>, ClusterError> {
        self.bounded(async {
            let session = self.connect().await?;
            session.list_secrets().await
        })
        .await
    }

    async fn connect(&self) -> Result<Box<dyn ClusterSession>, ClusterError> {
        let session = self.control_plane.connect().await?;
        *self.host.lock().unwrap_or_else(PoisonError::into_inner) = Some(session.host());
        Ok(session)
    }

    async fn bounded<T>(
        &self,
        op: impl std::future::Future<Output = Result<T, ClusterError>>,
    ) -> Result<T, ClusterError> {
        tokio::time::timeout(self.timeout, op)
            .await
            .unwrap_or(Err(ClusterError::Timeout(self.timeout)))
    }
}

#[cfg(test)]
#[path = "snapshot_test.rs"]
mod tests;
