//! Tests for the resource snapshot service

use super::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Scripted control plane that records every call
#[derive(Default)]
struct FakeCluster {
    listing: Mutex<ResourceSnapshot>,
    fail_on: Mutex<Option<ResourceKind>>,
    refuse_connect: AtomicBool,
    stall: Mutex<Option<Duration>>,
    connects: AtomicUsize,
    lists: AtomicUsize,
    deletes: Mutex<Vec<(ResourceKind, String, String)>>,
}

struct FakeSession(Arc<FakeCluster>);

#[async_trait]
impl ControlPlane for Arc<FakeCluster> {
    async fn connect(&self) -> Result<Box<dyn ClusterSession>, ClusterError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse_connect.load(Ordering::SeqCst) {
            return Err(ClusterError::Connect("no credentials".to_string()));
        }
        Ok(Box::new(FakeSession(self.clone())))
    }
}

#[async_trait]
impl ClusterSession for FakeSession {
    fn host(&self) -> String {
        "https://fake-apiserver:6443".to_string()
    }

    async fn list(
        &self,
        kind: ResourceKind,
        _namespace: &str,
    ) -> Result<Vec<ResourceSummary>, ClusterError> {
        self.0.lists.fetch_add(1, Ordering::SeqCst);
        let stall = *self.0.stall.lock().unwrap();
        if let Some(stall) = stall {
            tokio::time::sleep(stall).await;
        }
        if *self.0.fail_on.lock().unwrap() == Some(kind) {
            return Err(ClusterError::Connect(format!("listing {} refused", kind)));
        }
        Ok(self.0.listing.lock().unwrap().get(kind).to_vec())
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), ClusterError> {
        self.0
            .deletes
            .lock()
            .unwrap()
            .push((kind, namespace.to_string(), name.to_string()));
        Ok(())
    }

    async fn list_secrets(&self) -> Result<BTreeMap<String, String>, ClusterError> {
        Ok(BTreeMap::from([(
            "kad/db".to_string(),
            r#"{"data":{"password":"aHVudGVyMg=="}}"#.to_string(),
        )]))
    }
}

fn summary(name: &str, status: &str) -> ResourceSummary {
    ResourceSummary {
        name: name.to_string(),
        namespace: "kad".to_string(),
        status: status.to_string(),
        detail: String::new(),
    }
}

fn generation(tag: &str) -> ResourceSnapshot {
    ResourceSnapshot {
        pods: vec![summary(&format!("pod-{}", tag), "Running")],
        services: vec![summary(&format!("svc-{}", tag), "ClusterIP")],
        deployments: vec![summary(&format!("deploy-{}", tag), "1/1")],
        replica_sets: vec![summary(&format!("rs-{}", tag), "1/1")],
    }
}

fn service(fake: &Arc<FakeCluster>) -> SnapshotService {
    SnapshotService::new(Arc::new(fake.clone()), "kad", Duration::from_secs(5))
}

#[test]
fn test_resource_kind_parsing() {
    assert_eq!("pod".parse::<ResourceKind>().unwrap(), ResourceKind::Pod);
    assert_eq!("deploy".parse::<ResourceKind>().unwrap(), ResourceKind::Deployment);
    assert_eq!("rs".parse::<ResourceKind>().unwrap(), ResourceKind::ReplicaSet);
    assert_eq!("svc".parse::<ResourceKind>().unwrap(), ResourceKind::Service);
    assert_eq!("replicaset".parse::<ResourceKind>().unwrap(), ResourceKind::ReplicaSet);
    assert!(matches!(
        "unknown".parse::<ResourceKind>(),
        Err(ClusterError::UnknownKind(k)) if k == "unknown"
    ));
}

#[tokio::test]
async fn test_refresh_replaces_all_kinds() {
    let fake = Arc::new(FakeCluster::default());
    *fake.listing.lock().unwrap() = generation("a");
    let svc = service(&fake);

    assert!(svc.snapshot().is_empty());
    svc.refresh().await.expect("refresh should succeed");

    assert_eq!(*svc.snapshot(), generation("a"));
    assert_eq!(fake.connects.load(Ordering::SeqCst), 1, "one client per refresh");
    assert_eq!(fake.lists.load(Ordering::SeqCst), 4);
    assert_eq!(svc.host().as_deref(), Some("https://fake-apiserver:6443"));
    assert!(svc.last_error().is_none());
}

#[tokio::test]
async fn test_failure_on_any_list_keeps_previous_snapshot() {
    for failing in ResourceKind::ALL {
        let fake = Arc::new(FakeCluster::default());
        *fake.listing.lock().unwrap() = generation("old");
        let svc = service(&fake);
        svc.refresh().await.unwrap();
        let before = svc.snapshot();

        // ARRANGE: new generation available, but one kind fails
        *fake.listing.lock().unwrap() = generation("new");
        *fake.fail_on.lock().unwrap() = Some(failing);

        // ACT
        let result = svc.refresh().await;

        // ASSERT: nothing from the new generation leaked in
        assert!(result.is_err(), "refresh should fail when {} fails", failing);
        assert_eq!(*svc.snapshot(), *before, "partial update for {}", failing);
        assert!(svc.last_error().unwrap().contains(failing.as_str()));
    }
}

#[tokio::test]
async fn test_refresh_aborts_at_first_failure() {
    let fake = Arc::new(FakeCluster::default());
    *fake.fail_on.lock().unwrap() = Some(ResourceKind::Service);
    let svc = service(&fake);

    let _ = svc.refresh().await;

    assert_eq!(
        fake.lists.load(Ordering::SeqCst),
        2,
        "deployments and replica sets must not be listed"
    );
}

#[tokio::test]
async fn test_success_clears_previous_error() {
    let fake = Arc::new(FakeCluster::default());
    fake.refuse_connect.store(true, Ordering::SeqCst);
    let svc = service(&fake);

    let err = svc.refresh().await.unwrap_err();
    assert!(matches!(err, ClusterError::Connect(_)));
    assert!(svc.last_error().is_some());

    fake.refuse_connect.store(false, Ordering::SeqCst);
    svc.refresh().await.unwrap();
    assert!(svc.last_error().is_none());
}

#[tokio::test]
async fn test_refresh_timeout_keeps_snapshot() {
    let fake = Arc::new(FakeCluster::default());
    *fake.listing.lock().unwrap() = generation("a");
    let svc = SnapshotService::new(Arc::new(fake.clone()), "kad", Duration::from_millis(50));
    svc.refresh().await.unwrap();

    *fake.listing.lock().unwrap() = generation("b");
    *fake.stall.lock().unwrap() = Some(Duration::from_secs(5));

    let err = svc.refresh().await.unwrap_err();
    assert!(matches!(err, ClusterError::Timeout(_)));
    assert_eq!(*svc.snapshot(), generation("a"));
}

#[tokio::test]
async fn test_delete_unknown_kind_makes_no_call() {
    let fake = Arc::new(FakeCluster::default());
    let svc = service(&fake);

    let err = svc.delete("unknown", "web").await.unwrap_err();

    assert!(matches!(err, ClusterError::UnknownKind(_)));
    assert!(err.is_client_error());
    assert_eq!(fake.connects.load(Ordering::SeqCst), 0);
    assert!(fake.deletes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_missing_parts_are_client_errors() {
    let fake = Arc::new(FakeCluster::default());
    let svc = service(&fake);

    assert!(matches!(
        svc.delete("", "web").await,
        Err(ClusterError::MissingKind)
    ));
    assert!(matches!(
        svc.delete("deploy", "").await,
        Err(ClusterError::MissingName)
    ));
    assert_eq!(fake.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_delete_dispatches_kind_and_namespace() {
    let fake = Arc::new(FakeCluster::default());
    let svc = service(&fake);

    let kind = svc.delete("deploy", "web").await.unwrap();
    assert_eq!(kind, ResourceKind::Deployment);
    svc.delete("pod", "web-1").await.unwrap();

    let deletes = fake.deletes.lock().unwrap().clone();
    assert_eq!(
        deletes,
        vec![
            (ResourceKind::Deployment, "kad".to_string(), "web".to_string()),
            (ResourceKind::Pod, "kad".to_string(), "web-1".to_string()),
        ]
    );
    assert_eq!(fake.lists.load(Ordering::SeqCst), 0, "delete does not refresh");
}

#[tokio::test]
async fn test_delete_connect_failure_surfaces() {
    let fake = Arc::new(FakeCluster::default());
    fake.refuse_connect.store(true, Ordering::SeqCst);
    let svc = service(&fake);

    let err = svc.delete("pod", "web-1").await.unwrap_err();
    assert!(matches!(err, ClusterError::Connect(_)));
    assert!(!err.is_client_error());
}

#[tokio::test]
async fn test_secrets_are_keyed_by_namespace_and_name() {
    let fake = Arc::new(FakeCluster::default());
    let svc = service(&fake);

    let secrets = svc.secrets().await.unwrap();
    assert!(secrets.contains_key("kad/db"));
}
