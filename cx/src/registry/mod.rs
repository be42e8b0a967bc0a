//! In-memory coordination state
//!
//! Three views over one shared store:
//! - **KeyValueStore:** arbitrary named values exchanged between runners
//! - **MembershipRegistry:** agent count and the barrier
//! - **ScenarioRegistry:** executors registered per scenario

mod membership;
mod scenario;
mod store;

use std::sync::Arc;

pub use membership::{MembershipRegistry, REGISTERED_AGENTS_KEY, Registration, is_reserved_key};
pub use scenario::ScenarioRegistry;
pub use store::{KeyValueStore, StoreError};

/// The registries a coordinator serves, all backed by the same store
#[derive(Debug, Clone)]
pub struct Registries {
    pub store: Arc<KeyValueStore>,
    pub membership: MembershipRegistry,
    pub scenarios: ScenarioRegistry,
}

impl Registries {
    /// Fresh state for a cluster expecting `expected_agents` agents
    pub fn new(expected_agents: u64) -> Self {
        let store = Arc::new(KeyValueStore::new());
        Self {
            membership: MembershipRegistry::new(Arc::clone(&store), expected_agents),
            scenarios: ScenarioRegistry::new(Arc::clone(&store)),
            store,
        }
    }
}
