//! Tests for the client listener routes

use super::*;
use crate::cluster::{ClusterError, ClusterSession, ControlPlane};
use crate::config::Config;
use crate::failure::Sampler;
use crate::lifecycle::{exit_channel, spawn_listener, ExitReceiver};
use crate::state::{Collaborators, HostInfo, ProcessState};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

struct NoCluster;

#[async_trait]
impl ControlPlane for NoCluster {
    async fn connect(&self) -> Result<Box<dyn ClusterSession>, ClusterError> {
        Err(ClusterError::Connect("no cluster in tests".to_string()))
    }
}

struct FixedSample(f64);

impl Sampler for FixedSample {
    fn sample(&self) -> f64 {
        self.0
    }
}

fn test_state(config: Config) -> (SharedState, ExitReceiver) {
    let collaborators = Collaborators {
        control_plane: Arc::new(NoCluster),
        remote_counter: None,
        sampler: Arc::new(FixedSample(0.5)),
    };
    ProcessState::new(config, HostInfo::default(), collaborators).expect("state")
}

async fn serve(config: Config, port: u16) -> (SharedState, tokio::task::JoinHandle<()>, reqwest::Client) {
    let (state, _exit) = test_state(config);
    let (signal, _rx) = exit_channel();
    let server = spawn_listener(
        "client",
        format!("127.0.0.1:{}", port),
        client_router(state.clone()),
        signal,
    );
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();

    let mut delay = Duration::from_millis(10);
    for attempt in 1..=10 {
        let probe = client
            .get(format!("http://127.0.0.1:{}/check/live", port))
            .timeout(Duration::from_millis(100))
            .send()
            .await;
        match probe {
            Ok(_) => break,
            Err(e) if attempt == 10 => panic!("Server not ready: {}", e),
            Err(_) => {
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, Duration::from_millis(200));
            }
        }
    }
    (state, server, client)
}

async fn get(client: &reqwest::Client, port: u16, path: &str) -> (u16, String) {
    let response = client
        .get(format!("http://127.0.0.1:{}{}", port, path))
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .expect("request should reach the server");
    let status = response.status().as_u16();
    (status, response.text().await.expect("body"))
}

#[tokio::test]
async fn test_delete_validation_messages() {
    let port = 18631;
    let (_state, server, client) = serve(Config::default(), port).await;

    assert_eq!(
        get(&client, port, "/kubernetes/delete").await,
        (400, "Missing resource type".to_string())
    );
    assert_eq!(
        get(&client, port, "/kubernetes/delete/").await,
        (400, "Missing resource type".to_string())
    );
    assert_eq!(
        get(&client, port, "/kubernetes/delete/deploy").await,
        (400, "Missing resource name".to_string())
    );
    assert_eq!(
        get(&client, port, "/kubernetes/delete/deploy/").await,
        (400, "Missing resource name".to_string())
    );
    assert_eq!(
        get(&client, port, "/kubernetes/delete/unknown/web").await,
        (400, "Unknown resource".to_string())
    );

    let (status, body) = get(&client, port, "/kubernetes/delete/pod/web-1").await;
    assert_eq!(status, 400);
    assert!(body.starts_with("Can't connect to kubernetes"), "{}", body);

    server.abort();
}

#[tokio::test]
async fn test_root_returns_bad_gateway_on_injected_failure() {
    let port = 18632;
    let config = Config {
        failure_probability: 1.0,
        ..Config::default()
    };
    let (state, server, client) = serve(config, port).await;

    let (status, body) = get(&client, port, "/").await;

    assert_eq!(status, 502);
    assert_eq!(
        body,
        "Failing due to probability set to 1.00, got 0.50. Retry your request."
    );
    assert_eq!(state.counter.hits(), 1);

    server.abort();
}

#[tokio::test]
async fn test_root_renders_page_with_cluster_warning() {
    let port = 18633;
    let (_state, server, client) = serve(Config::default(), port).await;

    let (status, body) = get(&client, port, "/").await;

    assert_eq!(status, 200);
    assert!(body.contains("Page hits: 1"));
    assert!(body.contains("Can&#39;t connect to kubernetes"));

    server.abort();
}

#[tokio::test]
async fn test_hostname_is_decorated() {
    let port = 18634;
    let config = Config {
        cluster: Some("c1".to_string()),
        region: Some("eu".to_string()),
        ..Config::default()
    };
    let (_state, server, client) = serve(config, port).await;

    let (status, body) = get(&client, port, "/hostname").await;

    assert_eq!(status, 200);
    assert!(body.starts_with("eu/c1/"), "{}", body);

    server.abort();
}

#[tokio::test]
async fn test_metrics_count_matched_routes() {
    let port = 18635;
    let (_state, server, client) = serve(Config::default(), port).await;

    get(&client, port, "/kubernetes/delete/pod").await;
    let (status, body) = get(&client, port, "/metrics").await;

    assert_eq!(status, 200);
    assert!(body.contains("kad_http_requests_total{endpoint=\"/check/live\",method=\"GET\"}"));
    assert!(body.contains(
        "kad_http_requests_total{endpoint=\"/kubernetes/delete/{*target}\",method=\"GET\"} 1"
    ));

    server.abort();
}
