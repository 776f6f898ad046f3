//! End-to-end scenarios against both listeners started by `lifecycle::run`

use async_trait::async_trait;
use kad::cluster::{ClusterError, ClusterSession, ControlPlane};
use kad::config::Config;
use kad::failure::Sampler;
use kad::lifecycle::{self, Phase};
use kad::state::{Collaborators, HostInfo, ProcessState, SharedState};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

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

struct Running {
    state: SharedState,
    runner: JoinHandle<Result<(), lifecycle::LifecycleError>>,
    client: reqwest::Client,
    client_port: u16,
    admin_port: u16,
}

impl Running {
    async fn get(&self, port: u16, path: &str) -> (u16, String) {
        let response = self
            .client
            .get(format!("http://127.0.0.1:{}{}", port, path))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .expect("request should reach the server");
        let status = response.status().as_u16();
        (status, response.text().await.expect("body"))
    }
}

/// Start the full process on fixed ports and wait until both listeners answer
async fn start(client_port: u16, mut config: Config, sample: f64) -> Running {
    let admin_port = client_port + 1;
    config.listen = format!("127.0.0.1:{}", client_port);
    config.listen_admin = format!("127.0.0.1:{}", admin_port);
    config.exit_delay = Duration::ZERO;

    let collaborators = Collaborators {
        control_plane: Arc::new(NoCluster),
        remote_counter: None,
        sampler: Arc::new(FixedSample(sample)),
    };
    let (state, exit) =
        ProcessState::new(config, HostInfo::default(), collaborators).expect("state");
    let runner = tokio::spawn(lifecycle::run(state.clone(), exit));

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("client");

    for port in [client_port, admin_port] {
        let mut delay = Duration::from_millis(10);
        for attempt in 1..=10 {
            let probe = client
                .get(format!("http://127.0.0.1:{}/check/live", port))
                .timeout(Duration::from_millis(100))
                .send()
                .await;
            match probe {
                Ok(_) => break,
                Err(e) if attempt == 10 => panic!("Server not ready on {}: {}", port, e),
                Err(_) => {
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, Duration::from_millis(200));
                }
            }
        }
    }

    Running {
        state,
        runner,
        client,
        client_port,
        admin_port,
    }
}

#[tokio::test]
async fn test_ready_then_sentinel_then_ready() {
    // ARRANGE
    let dir = tempfile::tempdir().unwrap();
    let sentinel = dir.path().join("notready");
    let config = Config {
        ready_file: sentinel.clone(),
        ..Config::default()
    };
    let app = start(18641, config, 0.5).await;

    // ACT + ASSERT: sentinel absent
    assert_eq!(app.get(app.client_port, "/check/ready").await, (200, "OK".to_string()));

    // sentinel created
    std::fs::write(&sentinel, "").unwrap();
    let (status, body) = app.get(app.client_port, "/check/ready").await;
    assert_eq!(status, 404);
    assert!(body.contains(&sentinel.display().to_string()));

    app.runner.abort();
}

#[tokio::test]
async fn test_terminate_drains_then_exits() {
    // ARRANGE
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        ready_file: dir.path().join("notready"),
        terminate_delay: Duration::from_millis(500),
        ..Config::default()
    };
    let app = start(18643, config, 0.5).await;
    assert_eq!(app.state.lifecycle.phase(), Phase::Serving);

    // ACT
    let reply = app.get(app.admin_port, "/action/terminate").await;
    let ready = app.get(app.client_port, "/check/ready").await;

    // ASSERT: not ready before the delay elapses, then a clean exit
    assert_eq!(reply, (200, "OK".to_string()));
    assert_eq!(ready.0, 404);
    assert_eq!(app.state.lifecycle.phase(), Phase::Draining);

    let result = tokio::time::timeout(Duration::from_secs(5), app.runner)
        .await
        .expect("process should exit after the terminate delay")
        .expect("run task should not panic");
    assert!(result.is_ok());
    assert_eq!(app.state.lifecycle.phase(), Phase::Exiting);
}

#[tokio::test]
async fn test_injected_failure_reports_probability_and_sample() {
    // ARRANGE
    let config = Config {
        failure_probability: 1.0,
        ..Config::default()
    };
    let app = start(18645, config, 0.25).await;

    // ACT
    let (status, body) = app.get(app.client_port, "/").await;

    // ASSERT
    assert_eq!(status, 502);
    assert!(body.contains("1.00"), "{}", body);
    assert!(body.contains("0.25"), "{}", body);
    assert_eq!(app.state.counter.hits(), 1, "only the pre-gate increment counts");
    assert!(app.state.resources.snapshot().is_empty());

    app.runner.abort();
}

#[tokio::test]
async fn test_delete_without_name_is_rejected() {
    let app = start(18647, Config::default(), 0.5).await;

    let reply = app.get(app.client_port, "/kubernetes/delete/deploy/").await;

    assert_eq!(reply, (400, "Missing resource name".to_string()));

    app.runner.abort();
}

#[tokio::test]
async fn test_admin_routes_stay_off_client_listener() {
    let app = start(18649, Config::default(), 0.5).await;

    assert_eq!(app.get(app.client_port, "/malware").await.0, 404);
    assert_eq!(app.get(app.client_port, "/action/terminate").await.0, 404);
    assert_eq!(app.state.lifecycle.phase(), Phase::Serving);

    app.runner.abort();
}
