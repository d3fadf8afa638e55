//! Fastest RPC endpoint selection
//!
//! Every candidate is probed concurrently with a liveness request; errors
//! and non-success statuses count as infinitely slow. When nothing answers
//! the first configured endpoint is used.

use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

const LIVENESS_PATH: &str = "/v1/chain/get_info";

/// Result of probing one endpoint
#[derive(Debug, Clone)]
pub struct EndpointProbe {
    pub endpoint: String,
    /// `None` when the endpoint failed
    pub latency: Option<Duration>,
}

pub struct EndpointSelector {
    client: reqwest::Client,
    endpoints: Vec<String>,
    ttl: Duration,
    chosen: RwLock<Option<(String, Instant)>>,
}

impl EndpointSelector {
    pub fn new(endpoints: Vec<String>, ttl: Duration, probe_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(probe_timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build endpoint check client: {}", e)))?;

        Ok(Self {
            client,
            endpoints,
            ttl,
            chosen: RwLock::new(None),
        })
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    fn default_endpoint(&self) -> String {
        self.endpoints.first().cloned().unwrap_or_default()
    }

    async fn probe(&self, endpoint: &str) -> Option<Duration> {
        let url = format!("{}{}", endpoint.trim_end_matches('/'), LIVENESS_PATH);
        let start = Instant::now();

        let response = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!("Probe {} failed: {}", endpoint, e);
                return None;
            }
        };

        if !response.status().is_success() {
            debug!("Probe {} returned {}", endpoint, response.status());
            return None;
        }

        match response.json::<serde_json::Value>().await {
            Ok(_) => Some(start.elapsed()),
            Err(e) => {
                debug!("Probe {} returned invalid JSON: {}", endpoint, e);
                None
            }
        }
    }

    /// Probe all endpoints concurrently
    pub async fn probe_all(&self) -> Vec<EndpointProbe> {
        let probes = self.endpoints.iter().map(|endpoint| async move {
            EndpointProbe {
                endpoint: endpoint.clone(),
                latency: self.probe(endpoint).await,
            }
        });
        join_all(probes).await
    }

    /// Lowest-latency endpoint, or the first one when all probes fail
    pub async fn select_fastest_endpoint(&self) -> String {
        let probes = self.probe_all().await;

        let fastest = probes
            .into_iter()
            .filter_map(|p| p.latency.map(|l| (p.endpoint, l)))
            .min_by_key(|(_, latency)| *latency);

        match fastest {
            Some((endpoint, latency)) => {
                info!("Selected RPC endpoint {} ({}ms)", endpoint, latency.as_millis());
                endpoint
            }
            None => {
                let fallback = self.default_endpoint();
                warn!("All RPC endpoints failed, falling back to {}", fallback);
                fallback
            }
        }
    }

    /// Cached pick, re-probed once the TTL lapses
    pub async fn current(&self) -> String {
        {
            let guard = self.chosen.read().await;
            if let Some((endpoint, chosen_at)) = guard.as_ref() {
                if chosen_at.elapsed() < self.ttl {
                    return endpoint.clone();
                }
            }
        }

        let mut guard = self.chosen.write().await;
        // Another task may have refreshed while we waited
        if let Some((endpoint, chosen_at)) = guard.as_ref() {
            if chosen_at.elapsed() < self.ttl {
                return endpoint.clone();
            }
        }

        let endpoint = self.select_fastest_endpoint().await;
        *guard = Some((endpoint.clone(), Instant::now()));
        endpoint
    }

    /// Forget the cached pick so the next call re-probes. Called when the
    /// chosen endpoint stops answering.
    pub async fn invalidate(&self) {
        *self.chosen.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn server_with(template: ResponseTemplate) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(LIVENESS_PATH))
            .respond_with(template)
            .mount(&server)
            .await;
        server
    }

    fn ok_info() -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_string(r#"{"head_block_num":1}"#)
    }

    #[tokio::test]
    async fn test_selects_only_healthy_fast_endpoint() {
        let failing = server_with(ResponseTemplate::new(500)).await;
        let fast = server_with(ok_info()).await;
        let slow = server_with(ok_info().set_delay(Duration::from_secs(3))).await;

        let selector = EndpointSelector::new(
            vec![failing.uri(), fast.uri(), slow.uri()],
            Duration::from_secs(60),
            Duration::from_millis(500),
        )
        .unwrap();

        assert_eq!(selector.select_fastest_endpoint().await, fast.uri());
    }

    #[tokio::test]
    async fn test_all_failing_falls_back_to_first() {
        let a = server_with(ResponseTemplate::new(503)).await;
        let b = server_with(ResponseTemplate::new(200).set_body_string("not json")).await;

        let selector = EndpointSelector::new(
            vec![a.uri(), b.uri()],
            Duration::from_secs(60),
            Duration::from_millis(500),
        )
        .unwrap();

        assert_eq!(selector.select_fastest_endpoint().await, a.uri());
    }

    #[tokio::test]
    async fn test_current_is_cached() {
        let server = server_with(ok_info()).await;
        let selector = EndpointSelector::new(
            vec!["http://127.0.0.1:1".to_string(), server.uri()],
            Duration::from_secs(60),
            Duration::from_millis(500),
        )
        .unwrap();

        let first = selector.current().await;
        assert_eq!(first, server.uri());

        // Cached pick survives the endpoint going away
        drop(server);
        assert_eq!(selector.current().await, first);

        selector.invalidate().await;
        assert_eq!(selector.current().await, "http://127.0.0.1:1");
    }

    #[tokio::test]
    async fn test_slow_endpoint_times_out() {
        let slow = server_with(ok_info().set_delay(Duration::from_secs(2))).await;

        let selector = EndpointSelector::new(
            vec!["http://127.0.0.1:1".to_string(), slow.uri()],
            Duration::from_secs(60),
            Duration::from_millis(200),
        )
        .unwrap();

        let probes = selector.probe_all().await;
        assert!(probes.iter().all(|p| p.latency.is_none()));
        assert_eq!(selector.select_fastest_endpoint().await, "http://127.0.0.1:1");
    }
}
