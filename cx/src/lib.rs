//! ClusterCtx - coordination service for distributed load-test runners
//!
//! A fixed-size group of agent processes joins one coordinator process. The
//! coordinator hosts an in-memory registry over HTTP; agents register with it
//! and poll a barrier so the whole group starts executing scenarios together.
//!
//! # Modules
//!
//! - [`registry`] - Shared store, agent membership and scenario counters
//! - [`server`] - HTTP endpoints over the registries (coordinator only)
//! - [`client`] - Polling client every runner uses
//! - [`cluster`] - Per-process coordination context
//! - [`config`] - Cluster settings types and loading
//! - [`cli`] - Command-line interface
//!
//! # Example
//!
//! ```ignore
//! use clusterctx::{Cluster, ClusterSettings};
//!
//! let settings = ClusterSettings::load(None)?;
//! let cluster = Cluster::connect(settings).await?;
//! cluster.synchronize().await?;
//! cluster.set_data("orders-placed", &1_250u64).await?;
//! ```

pub mod cli;
pub mod client;
pub mod cluster;
pub mod config;
pub mod error;
pub mod registry;
pub mod server;

// Re-export commonly used types
pub use client::{CoordinationClient, RetryPolicy};
pub use cluster::Cluster;
pub use config::{AgentGroup, ClusterSettings, RetrySettings, RunnerRole, RunnerSettings};
pub use error::CoordError;
pub use registry::{KeyValueStore, MembershipRegistry, Registration, Registries, ScenarioRegistry, StoreError};
pub use server::CoordinationServer;
