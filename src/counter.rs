//! Page hit counter
//!
//! Two interchangeable backends, chosen once at startup:
//! - in-process: an atomic counter that resets with the process
//! - remote: Redis `INCR`, shared by every replica and kept across restarts
//!
//! A remote failure never fails the request. The caller gets the previous
//! value back together with the error and shows it as a warning.

use crate::server::metrics::SharedMetrics;
use async_trait::async_trait;
use redis::AsyncCommands;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Upper bound for one remote increment, connect included
pub const REMOTE_TIMEOUT: Duration = Duration::from_millis(300);

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CounterError {
    #[error("Unable to inc hits in redis: {0}")]
    Remote(String),

    #[error("Unable to inc hits in redis: no answer within {0:?}")]
    Timeout(Duration),

    #[error("Redis returned a negative hit count: {0}")]
    Negative(i64),
}

/// Remote key-increment service
#[async_trait]
pub trait RemoteCounter: Send + Sync {
    /// Where the counter lives, for display
    fn address(&self) -> &str;

    /// Increment `key` by one and return the new value
    async fn incr(&self, key: &str) -> Result<i64, CounterError>;
}

/// Redis-backed counter
pub struct RedisCounter {
    address: String,
    client: redis::Client,
}

impl RedisCounter {
    /// Accepts either `host:port` or a full `redis://` URL
    pub fn new(address: &str) -> Result<Self, CounterError> {
        let url = if address.contains("://") {
            address.to_string()
        } else {
            format!("redis://{}/", address)
        };
        let client =
            redis::Client::open(url.as_str()).map_err(|e| CounterError::Remote(e.to_string()))?;

        Ok(Self {
            address: address.to_string(),
            client,
        })
    }
}

#[async_trait]
impl RemoteCounter for RedisCounter {
    fn address(&self) -> &str {
        &self.address
    }

    async fn incr(&self, key: &str) -> Result<i64, CounterError> {
        let mut con = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CounterError::Remote(e.to_string()))?;

        let hits: i64 = con
            .incr(key, 1)
            .await
            .map_err(|e| CounterError::Remote(e.to_string()))?;

        Ok(hits)
    }
}

/// Result of one increment
#[derive(Debug, Clone, PartialEq)]
pub struct Increment {
    /// Count to display; the previous value when `error` is set
    pub hits: u64,
    pub error: Option<CounterError>,
}

/// Key under which hits are stored remotely
pub fn counter_key(cluster: Option<&str>) -> String {
    match cluster {
        Some(cluster) if !cluster.is_empty() => format!("hits-{}", cluster),
        _ => "hits".to_string(),
    }
}

pub struct CounterStore {
    hits: AtomicU64,
    remote: Option<Arc<dyn RemoteCounter>>,
    key: String,
    timeout: Duration,
    last_error: Mutex<Option<String>>,
    metrics: SharedMetrics,
}

impl CounterStore {
    pub fn in_process(metrics: SharedMetrics) -> Self {
        Self {
            hits: AtomicU64::new(0),
            remote: None,
            key: counter_key(None),
            timeout: REMOTE_TIMEOUT,
            last_error: Mutex::new(None),
            metrics,
        }
    }

    pub fn remote(
        remote: Arc<dyn RemoteCounter>,
        cluster: Option<&str>,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            remote: Some(remote),
            key: counter_key(cluster),
            ..Self::in_process(metrics)
        }
    }

    /// Override the remote timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn remote_address(&self) -> Option<&str> {
        self.remote.as_ref().map(|r| r.address())
    }

    /// Last displayed count
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::SeqCst)
    }

    /// Error of the most recent increment, cleared by the next success
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn increment(&self) -> Increment {
        let Some(remote) = &self.remote else {
            let hits = self.hits.fetch_add(1, Ordering::SeqCst) + 1;
            self.record_success(hits);
            return Increment { hits, error: None };
        };

        let outcome = match tokio::time::timeout(self.timeout, remote.incr(&self.key)).await {
            Ok(Ok(value)) if value < 0 => Err(CounterError::Negative(value)),
            Ok(Ok(value)) => Ok(value as u64),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CounterError::Timeout(self.timeout)),
        };

        match outcome {
            Ok(value) => {
                // Keep the displayed count monotonic even if the remote key was reset
                let previous = self.hits.fetch_max(value, Ordering::SeqCst);
                let hits = previous.max(value);
                debug!(key = %self.key, hits, "Remote hit counter incremented");
                self.record_success(hits);
                Increment { hits, error: None }
            }
            Err(error) => {
                warn!(key = %self.key, error = %error, "Hit counter unavailable");
                *self
                    .last_error
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(error.to_string());
                Increment {
                    hits: self.hits(),
                    error: Some(error),
                }
            }
        }
    }

    fn record_success(&self, hits: u64) {
        *self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self.metrics.set_page_hits(hits);
    }
}

#[cfg(test)]
#[path = "counter_test.rs"]
mod tests;
