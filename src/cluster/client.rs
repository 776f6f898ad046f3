//! Kubernetes API access via kube-rs
//!
//! A fresh client is built for every session, from the kubeconfig file when
//! one is configured and from in-cluster credentials otherwise.

use super::{ClusterError, ClusterSession, ControlPlane, ResourceKind, ResourceSummary};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::{Pod, Secret, Service};
use kube::api::{Api, DeleteParams, ListParams, PropagationPolicy};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, ResourceExt};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Grace period applied to every delete
const DELETE_GRACE_PERIOD_SECS: u32 = 1;

/// Control plane backed by a real API server
#[derive(Debug, Clone)]
pub struct KubeControlPlane {
    kubeconfig: Option<PathBuf>,
    timeout: Duration,
}

impl KubeControlPlane {
    pub fn new(kubeconfig: Option<PathBuf>, timeout: Duration) -> Self {
        Self {
            kubeconfig,
            timeout,
        }
    }

    async fn config(&self) -> Result<kube::Config, ClusterError> {
        let mut config = match &self.kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                    ClusterError::Connect(format!("reading {}: {}", path.display(), e))
                })?;
                kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| ClusterError::Connect(e.to_string()))?
            }
            None => kube::Config::incluster().map_err(|e| ClusterError::Connect(e.to_string()))?,
        };

        config.connect_timeout = Some(self.timeout);
        config.read_timeout = Some(self.timeout);
        config.write_timeout = Some(self.timeout);
        Ok(config)
    }
}

#[async_trait]
impl ControlPlane for KubeControlPlane {
    async fn connect(&self) -> Result<Box<dyn ClusterSession>, ClusterError> {
        let config = self.config().await?;
        let host = config.cluster_url.to_string();
        let client = Client::try_from(config).map_err(|e| ClusterError::Connect(e.to_string()))?;

        debug!(host = %host, "Kubernetes client built");
        Ok(Box::new(KubeSession { client, host }))
    }
}

struct KubeSession {
    client: Client,
    host: String,
}

fn delete_params() -> DeleteParams {
    DeleteParams {
        grace_period_seconds: Some(DELETE_GRACE_PERIOD_SECS),
        propagation_policy: Some(PropagationPolicy::Background),
        ..DeleteParams::default()
    }
}

#[async_trait]
impl ClusterSession for KubeSession {
    fn host(&self) -> String {
        self.host.clone()
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
    ) -> Result<Vec<ResourceSummary>, ClusterError> {
        let lp = ListParams::default();
        let client = self.client.clone();

        let items = match kind {
            ResourceKind::Pod => Api::<Pod>::namespaced(client, namespace)
                .list(&lp)
                .await?
                .items
                .iter()
                .map(summarize_pod)
                .collect(),
            ResourceKind::Service => Api::<Service>::namespaced(client, namespace)
                .list(&lp)
                .await?
                .items
                .iter()
                .map(summarize_service)
                .collect(),
            ResourceKind::Deployment => Api::<Deployment>::namespaced(client, namespace)
                .list(&lp)
                .await?
                .items
                .iter()
                .map(summarize_deployment)
                .collect(),
            ResourceKind::ReplicaSet => Api::<ReplicaSet>::namespaced(client, namespace)
                .list(&lp)
                .await?
                .items
                .iter()
                .map(summarize_replica_set)
                .collect(),
        };

        Ok(items)
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), ClusterError> {
        let dp = delete_params();
        let client = self.client.clone();

        match kind {
            ResourceKind::Pod => {
                Api::<Pod>::namespaced(client, namespace)
                    .delete(name, &dp)
                    .await?;
            }
            ResourceKind::Service => {
                Api::<Service>::namespaced(client, namespace)
                    .delete(name, &dp)
                    .await?;
            }
            ResourceKind::Deployment => {
                Api::<Deployment>::namespaced(client, namespace)
                    .delete(name, &dp)
                    .await?;
            }
            ResourceKind::ReplicaSet => {
                Api::<ReplicaSet>::namespaced(client, namespace)
                    .delete(name, &dp)
                    .await?;
            }
        }

        Ok(())
    }

    async fn list_secrets(&self) -> Result<BTreeMap<String, String>, ClusterError> {
        let secrets = Api::<Secret>::all(self.client.clone())
            .list(&ListParams::default())
            .await?;

        let mut out = BTreeMap::new();
        for secret in &secrets.items {
            let key = format!(
                "{}/{}",
                secret.namespace().unwrap_or_default(),
                secret.name_any()
            );
            let json = serde_json::to_string(secret)
                .map_err(|e| ClusterError::Serialize(key.clone(), e.to_string()))?;
            out.insert(key, json);
        }
        Ok(out)
    }
}

pub fn summarize_pod(pod: &Pod) -> ResourceSummary {
    let status = pod.status.as_ref();
    let containers = status
        .and_then(|s| s.container_statuses.as_deref())
        .unwrap_or_default();
    let ready = containers.iter().filter(|c| c.ready).count();
    let restarts: i32 = containers.iter().map(|c| c.restart_count).sum();
    let total = pod
        .spec
        .as_ref()
        .map(|s| s.containers.len())
        .unwrap_or(containers.len());

    let mut detail = format!("ready {}/{}, restarts {}", ready, total, restarts);
    if let Some(ip) = status.and_then(|s| s.pod_ip.as_deref()) {
        detail.push_str(&format!(", ip {}", ip));
    }
    if let Some(node) = pod.spec.as_ref().and_then(|s| s.node_name.as_deref()) {
        detail.push_str(&format!(", node {}", node));
    }

    ResourceSummary {
        name: pod.name_any(),
        namespace: pod.namespace().unwrap_or_default(),
        status: status
            .and_then(|s| s.phase.clone())
            .unwrap_or_else(|| "Unknown".to_string()),
        detail,
    }
}

pub fn summarize_service(svc: &Service) -> ResourceSummary {
    let spec = svc.spec.as_ref();
    let ports = spec
        .and_then(|s| s.ports.as_deref())
        .unwrap_or_default()
        .iter()
        .map(|p| format!("{}/{}", p.port, p.protocol.as_deref().unwrap_or("TCP")))
        .collect::<Vec<_>>()
        .join(",");

    ResourceSummary {
        name: svc.name_any(),
        namespace: svc.namespace().unwrap_or_default(),
        status: spec
            .and_then(|s| s.type_.clone())
            .unwrap_or_else(|| "ClusterIP".to_string()),
        detail: format!(
            "ip {}, ports {}",
            spec.and_then(|s| s.cluster_ip.as_deref()).unwrap_or("-"),
            if ports.is_empty() { "-" } else { ports.as_str() }
        ),
    }
}

pub fn summarize_deployment(deploy: &Deployment) -> ResourceSummary {
    let desired = deploy.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let status = deploy.status.as_ref();

    ResourceSummary {
        name: deploy.name_any(),
        namespace: deploy.namespace().unwrap_or_default(),
        status: format!(
            "{}/{}",
            status.and_then(|s| s.ready_replicas).unwrap_or(0),
            desired
        ),
        detail: format!(
            "updated {}, available {}",
            status.and_then(|s| s.updated_replicas).unwrap_or(0),
            status.and_then(|s| s.available_replicas).unwrap_or(0)
        ),
    }
}

pub fn summarize_replica_set(rs: &ReplicaSet) -> ResourceSummary {
    let desired = rs.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let status = rs.status.as_ref();
    let owner = rs
        .metadata
        .owner_references
        .as_deref()
        .and_then(|o| o.first())
        .map(|o| format!("owner {}/{}", o.kind, o.name))
        .unwrap_or_else(|| "no owner".to_string());

    ResourceSummary {
        name: rs.name_any(),
        namespace: rs.namespace().unwrap_or_default(),
        status: format!(
            "{}/{}",
            status.and_then(|s| s.ready_replicas).unwrap_or(0),
            desired
        ),
        detail: format!(
            "current {}, {}",
            status.map(|s| s.replicas).unwrap_or(0),
            owner
        ),
    }
}
