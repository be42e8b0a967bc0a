//! Cluster context: the coordination handle a runner process holds
//!
//! A [`Cluster`] is built explicitly from [`ClusterSettings`] and passed down to
//! whatever needs it; there is no process-wide instance. Several independent
//! clusters can live in one process, which is what the tests rely on.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::client::CoordinationClient;
use crate::config::{ClusterSettings, RunnerRole};
use crate::error::CoordError;
use crate::registry::{KeyValueStore, Registries};
use crate::server::CoordinationServer;

/// Coordination context for one runner process
#[derive(Debug)]
pub struct Cluster {
    settings: ClusterSettings,
    client: CoordinationClient,
    server: Option<CoordinationServer>,
}

impl Cluster {
    /// Create the cluster context for this process
    ///
    /// A coordinator starts the coordination server, registers its own
    /// scenarios and, when no agents are expected, treats the barrier as
    /// satisfied. Every role then waits for the server to become ready.
    pub async fn connect(settings: ClusterSettings) -> Result<Self, CoordError> {
        debug!(role = %settings.runner.role, "Cluster::connect: called");
        settings
            .validate()
            .map_err(|e| CoordError::ValidationError(format!("{:#}", e)))?;
        info!("Cluster settings:\n{}", settings.to_readable_string());

        let (client_url, server) = match settings.runner.role {
            RunnerRole::Coordinator => {
                let registries = Registries::new(settings.min_agents_count);
                let server = CoordinationServer::start(&settings.bind_address, registries).await?;
                (loopback_url(server.local_addr()), Some(server))
            }
            RunnerRole::Agent => (settings.coordinator_url.clone(), None),
        };

        let client = CoordinationClient::new(&client_url)?.with_known_scenarios(settings.all_scenario_names());

        if let Some(server) = &server {
            for scenario in &settings.coordinator_scenarios {
                server.registries().scenarios.register_interest(scenario)?;
            }
            if settings.min_agents_count == 0 {
                client.mark_synchronized();
            }
            info!(scenarios = ?settings.coordinator_scenarios, "Coordinator has registered own scenarios");
        }

        client.wait_until_ready(&settings.retry.readiness()).await?;
        info!("Cluster context has been created");

        Ok(Self {
            settings,
            client,
            server,
        })
    }

    /// Join the cluster and wait for the barrier
    ///
    /// Agents register themselves and their group's target scenarios first.
    /// Calling this again after the barrier was observed does nothing.
    pub async fn synchronize(&self) -> Result<(), CoordError> {
        debug!(role = %self.role(), "Cluster::synchronize: called");
        if self.client.is_synchronized() {
            debug!("Cluster::synchronize: already synchronized");
            return Ok(());
        }

        if self.role() == RunnerRole::Agent {
            self.client.register_agent().await?;

            let group = self.settings.runner.agent_group.as_deref().unwrap_or_default();
            let scenarios = self.settings.target_scenarios(group);
            info!(agent_group = %group, ?scenarios, "Agent will register scenarios");
            for scenario in scenarios {
                self.client.register_scenario_interest(scenario).await?;
            }
        }

        info!("Starting the cluster synchronization...");
        self.client.wait_for_barrier(&self.settings.retry.barrier()).await?;
        info!("Cluster synchronization has been completed successfully");

        if let Some(store) = self.store() {
            info!("Cluster context after synchronization:\n{}", render_snapshot(&store.snapshot()));
        }
        Ok(())
    }

    /// Store `payload` as JSON under `key`
    pub async fn set_data<T>(&self, key: &str, payload: &T) -> Result<(), CoordError>
    where
        T: Serialize + ?Sized,
    {
        self.client.set_data(key, payload).await
    }

    /// Wait for a JSON value under `key`, using the configured value policy
    pub async fn wait_and_get_data<T>(&self, key: &str) -> Result<T, CoordError>
    where
        T: DeserializeOwned,
    {
        self.client.wait_and_get_data(key, &self.settings.retry.value()).await
    }

    /// Executors registered for `scenario`; requires a synchronized cluster
    pub async fn scenario_executors_count(&self, scenario: &str) -> Result<u64, CoordError> {
        self.client.get_scenario_executor_count(scenario).await
    }

    pub fn settings(&self) -> &ClusterSettings {
        &self.settings
    }

    pub fn client(&self) -> &CoordinationClient {
        &self.client
    }

    pub fn role(&self) -> RunnerRole {
        self.settings.runner.role
    }

    pub fn is_synchronized(&self) -> bool {
        self.client.is_synchronized()
    }

    /// Authoritative store; only the coordinator holds one
    pub fn store(&self) -> Option<&Arc<KeyValueStore>> {
        self.server.as_ref().map(|s| &s.registries().store)
    }

    /// Server address; only the coordinator listens
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(CoordinationServer::local_addr)
    }

    /// Stop the coordination server if this process hosts one
    pub async fn shutdown(self) {
        debug!("Cluster::shutdown: called");
        if let Some(server) = self.server {
            server.shutdown().await;
        }
    }
}

/// URL the coordinator uses to reach its own server
fn loopback_url(addr: SocketAddr) -> String {
    let ip = if addr.ip().is_unspecified() {
        match addr.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
        }
    } else {
        addr.ip()
    };
    format!("http://{}", SocketAddr::new(ip, addr.port()))
}

/// Pretty JSON rendering of the store for logs
pub fn render_snapshot(snapshot: &BTreeMap<String, String>) -> String {
    serde_json::to_string_pretty(snapshot).unwrap_or_else(|e| format!("<unprintable snapshot: {}>", e))
}
