//! Coordination client
//!
//! Every runner (coordinator included) talks to the coordination server through
//! this client. Waiting operations poll with a fixed interval; see [`retry`].

pub mod retry;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::CoordError;
use crate::server::routes::{
    API_PREFIX, DOES_CLUSTER_SYNCHRONIZED, GET_CACHE_BY_NAME, GET_SCENARIO_EXECUTORS_COUNT_BY_NAME, READINESS_PROBE,
    REGISTER_AGENT, REGISTER_SCENARIO_BY_NAME, SET_CACHE_BY_NAME,
};

pub use retry::{RetryPolicy, poll_fixed};

/// Default timeout for a single HTTP exchange
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for the coordination server
///
/// Clones share the process-local synchronized flag, so once any clone has
/// observed the barrier every clone short-circuits.
#[derive(Debug, Clone)]
pub struct CoordinationClient {
    http: Client,
    base_url: String,
    known_scenarios: Arc<HashSet<String>>,
    synchronized: Arc<AtomicBool>,
}

impl CoordinationClient {
    /// Create a client for the coordinator at `coordinator_url`
    pub fn new(coordinator_url: &str) -> Result<Self, CoordError> {
        Self::with_timeout(coordinator_url, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a client with a custom per-request timeout
    pub fn with_timeout(coordinator_url: &str, timeout: Duration) -> Result<Self, CoordError> {
        debug!(%coordinator_url, ?timeout, "CoordinationClient::with_timeout: called");
        let parsed =
            Url::parse(coordinator_url).map_err(|e| CoordError::InvalidUrl(format!("{}: {}", coordinator_url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(CoordError::InvalidUrl(format!(
                "{}: scheme must be http or https",
                coordinator_url
            )));
        }

        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: format!("{}{}", coordinator_url.trim_end_matches('/'), API_PREFIX),
            known_scenarios: Arc::new(HashSet::new()),
            synchronized: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Set the statically configured scenario names
    pub fn with_known_scenarios<I, S>(mut self, scenarios: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_scenarios = Arc::new(scenarios.into_iter().map(Into::into).collect());
        self
    }

    /// Base URL including the API prefix
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether this process has observed the barrier as satisfied
    pub fn is_synchronized(&self) -> bool {
        self.synchronized.load(Ordering::SeqCst)
    }

    /// Record the barrier as satisfied without polling
    ///
    /// Used by a coordinator that expects no agents.
    pub fn mark_synchronized(&self) {
        debug!("CoordinationClient::mark_synchronized: called");
        self.synchronized.store(true, Ordering::SeqCst);
    }

    /// Poll the readiness probe until the server answers
    pub async fn wait_until_ready(&self, policy: &RetryPolicy) -> Result<(), CoordError> {
        info!("Wait for the cluster context to be ready...");
        let ready = poll_fixed(policy, |_| self.probe_once()).await?;
        match ready {
            Some(()) => {
                info!("Cluster context is ready");
                Ok(())
            }
            None => Err(CoordError::Timeout {
                operation: "cluster context readiness",
                attempts: policy.attempts(),
                waited: policy.budget(),
            }),
        }
    }

    async fn probe_once(&self) -> Result<Option<()>, CoordError> {
        let status = self.http.get(self.url(READINESS_PROBE)).send().await?.status().as_u16();
        match status {
            200 => Ok(Some(())),
            other => Err(CoordError::UnexpectedStatus {
                operation: "readiness probe",
                status: other,
            }),
        }
    }

    /// Register this process as an agent
    ///
    /// Fails with [`CoordError::CapacityExceeded`] when the cluster is already
    /// full, which means more agents were launched than the coordinator expects.
    pub async fn register_agent(&self) -> Result<(), CoordError> {
        debug!("CoordinationClient::register_agent: called");
        let status = self.http.post(self.url(REGISTER_AGENT)).send().await?.status().as_u16();
        match status {
            200 => {
                info!("Agent has been registered");
                Ok(())
            }
            204 => Err(CoordError::CapacityExceeded),
            other => Err(CoordError::UnexpectedStatus {
                operation: "agent registration",
                status: other,
            }),
        }
    }

    /// Store a raw value under `key`
    pub async fn set_value(&self, key: &str, value: impl Into<String>) -> Result<(), CoordError> {
        debug!(%key, "CoordinationClient::set_value: called");
        let request = self
            .named(self.http.post(self.url(SET_CACHE_BY_NAME)), key)
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(value.into());
        let status = request.send().await?.status().as_u16();
        match status {
            200 => Ok(()),
            other => Err(CoordError::UnexpectedStatus {
                operation: "set value",
                status: other,
            }),
        }
    }

    /// Fetch the value under `key` once; `None` if it is not set yet
    pub async fn try_get_value(&self, key: &str) -> Result<Option<String>, CoordError> {
        debug!(%key, "CoordinationClient::try_get_value: called");
        let response = self.named(self.http.get(self.url(GET_CACHE_BY_NAME)), key).send().await?;
        match response.status().as_u16() {
            200 => Ok(Some(response.text().await?)),
            204 => Ok(None),
            other => Err(CoordError::UnexpectedStatus {
                operation: "get value",
                status: other,
            }),
        }
    }

    /// Poll until a value appears under `key`
    ///
    /// The producer may be a peer that has not written yet, so callers should
    /// pass a generous policy.
    pub async fn get_value(&self, key: &str, policy: &RetryPolicy) -> Result<String, CoordError> {
        debug!(%key, ?policy, "CoordinationClient::get_value: called");
        poll_fixed(policy, |_| self.try_get_value(key))
            .await?
            .ok_or_else(|| CoordError::NotFound {
                key: key.to_string(),
                waited: policy.budget(),
            })
    }

    /// Store `payload` as JSON under `key`
    pub async fn set_data<T>(&self, key: &str, payload: &T) -> Result<(), CoordError>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_string(payload).map_err(|source| CoordError::InvalidPayload {
            key: key.to_string(),
            source,
        })?;
        self.set_value(key, body).await
    }

    /// Poll for a JSON value under `key` and deserialize it
    ///
    /// A stored JSON `null` counts as not found.
    pub async fn wait_and_get_data<T>(&self, key: &str, policy: &RetryPolicy) -> Result<T, CoordError>
    where
        T: DeserializeOwned,
    {
        let raw = self.get_value(key, policy).await?;
        let parsed: Option<T> = serde_json::from_str(&raw).map_err(|source| CoordError::InvalidPayload {
            key: key.to_string(),
            source,
        })?;
        parsed.ok_or_else(|| CoordError::NotFound {
            key: key.to_string(),
            waited: policy.budget(),
        })
    }

    /// Poll the barrier until every expected agent has registered
    ///
    /// The first satisfied observation is cached; later calls return at once.
    pub async fn wait_for_barrier(&self, policy: &RetryPolicy) -> Result<(), CoordError> {
        if self.is_synchronized() {
            debug!("CoordinationClient::wait_for_barrier: already synchronized");
            return Ok(());
        }

        let satisfied = poll_fixed(policy, |_| self.barrier_once()).await?;
        match satisfied {
            Some(()) => {
                self.mark_synchronized();
                Ok(())
            }
            None => Err(CoordError::Timeout {
                operation: "cluster synchronization",
                attempts: policy.attempts(),
                waited: policy.budget(),
            }),
        }
    }

    async fn barrier_once(&self) -> Result<Option<()>, CoordError> {
        let status = self
            .http
            .get(self.url(DOES_CLUSTER_SYNCHRONIZED))
            .send()
            .await?
            .status()
            .as_u16();
        match status {
            200 => Ok(Some(())),
            204 => Ok(None),
            other => Err(CoordError::UnexpectedStatus {
                operation: "barrier status",
                status: other,
            }),
        }
    }

    /// Count this process as one more executor of `scenario`
    pub async fn register_scenario_interest(&self, scenario: &str) -> Result<(), CoordError> {
        debug!(%scenario, "CoordinationClient::register_scenario_interest: called");
        let status = self
            .named(self.http.post(self.url(REGISTER_SCENARIO_BY_NAME)), scenario)
            .send()
            .await?
            .status()
            .as_u16();
        match status {
            200 => Ok(()),
            other => Err(CoordError::UnexpectedStatus {
                operation: "scenario registration",
                status: other,
            }),
        }
    }

    /// Number of runners registered to execute `scenario`
    ///
    /// Only valid after the barrier; the name must be one of the configured
    /// scenarios. A configured scenario nobody registered counts as 0.
    pub async fn get_scenario_executor_count(&self, scenario: &str) -> Result<u64, CoordError> {
        debug!(%scenario, "CoordinationClient::get_scenario_executor_count: called");
        if !self.is_synchronized() {
            return Err(CoordError::ValidationError(
                "Cluster has not been synchronized yet in order to provide scenario details. \
                 Make sure to synchronize the cluster when min-agents-count > 0"
                    .to_string(),
            ));
        }
        if !self.known_scenarios.contains(scenario) {
            return Err(CoordError::UnknownScenario(scenario.to_string()));
        }

        let response = self
            .named(self.http.get(self.url(GET_SCENARIO_EXECUTORS_COUNT_BY_NAME)), scenario)
            .send()
            .await?;
        match response.status().as_u16() {
            200 => {
                let body = response.text().await?;
                serde_json::from_str(body.trim()).map_err(|source| CoordError::InvalidPayload {
                    key: scenario.to_string(),
                    source,
                })
            }
            204 => Ok(0),
            other => Err(CoordError::UnexpectedStatus {
                operation: "scenario executor count",
                status: other,
            }),
        }
    }

    fn url(&self, route: &str) -> String {
        format!("{}{}", self.base_url, route)
    }

    fn named(&self, request: RequestBuilder, name: &str) -> RequestBuilder {
        request.query(&[("name", name)])
    }
}
