//! Per-scenario executor counters

use std::sync::Arc;

use tracing::{debug, info};

use super::membership::is_reserved_key;
use super::store::{KeyValueStore, StoreError, read_counter};

/// Counts how many runner processes registered to execute each scenario
///
/// Counters share the key space of the underlying store, keyed by scenario name.
/// There is no upper bound: every call counts one more executor.
#[derive(Debug, Clone)]
pub struct ScenarioRegistry {
    store: Arc<KeyValueStore>,
}

impl ScenarioRegistry {
    pub fn new(store: Arc<KeyValueStore>) -> Self {
        Self { store }
    }

    /// Record one more executor for `scenario`, returning the new count
    pub fn register_interest(&self, scenario: &str) -> Result<u64, StoreError> {
        debug!(%scenario, "ScenarioRegistry::register_interest: called");
        if is_reserved_key(scenario) {
            return Err(StoreError::ReservedKey(scenario.to_string()));
        }
        let count = self.store.increment(scenario)?;
        info!(%scenario, executors = count, "Scenario executor registered");
        Ok(count)
    }

    /// Executor count for `scenario`; `None` if nobody ever registered it
    pub fn get_count(&self, scenario: &str) -> Result<Option<u64>, StoreError> {
        debug!(%scenario, "ScenarioRegistry::get_count: called");
        self.store.with_entries(|entries| read_counter(entries, scenario))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_scenario_is_absent() {
        let reg = ScenarioRegistry::new(Arc::new(KeyValueStore::new()));
        assert_eq!(reg.get_count("checkout").unwrap(), None);
    }

    #[test]
    fn test_each_registration_counts() {
        let reg = ScenarioRegistry::new(Arc::new(KeyValueStore::new()));
        for expected in 1..=3 {
            assert_eq!(reg.register_interest("checkout").unwrap(), expected);
        }
        assert_eq!(reg.get_count("checkout").unwrap(), Some(3));
        assert_eq!(reg.get_count("login").unwrap(), None);
    }

    #[test]
    fn test_membership_key_is_not_a_scenario() {
        let store = Arc::new(KeyValueStore::new());
        let reg = ScenarioRegistry::new(Arc::clone(&store));
        assert_eq!(
            reg.register_interest("registeredAgents"),
            Err(StoreError::ReservedKey("registeredAgents".to_string()))
        );
        assert_eq!(store.get("registeredAgents"), None);
    }

    #[test]
    fn test_counter_visible_through_store() {
        let store = Arc::new(KeyValueStore::new());
        let reg = ScenarioRegistry::new(Arc::clone(&store));
        reg.register_interest("search").unwrap();
        assert_eq!(store.get("search").as_deref(), Some("1"));
    }
}
