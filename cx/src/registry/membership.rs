//! Agent membership tracking and the synchronization barrier

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::store::{KeyValueStore, StoreError, increment_entry, read_counter};

/// Store key holding the number of registered agents
pub const REGISTERED_AGENTS_KEY: &str = "registeredAgents";

/// Whether `key` holds membership state that only registration may change
pub fn is_reserved_key(key: &str) -> bool {
    key == REGISTERED_AGENTS_KEY
}

/// Outcome of a registration attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The agent was counted; `ordinal` is its 1-based position in join order
    Accepted { ordinal: u64 },
    /// The cluster is already full
    Rejected,
}

impl Registration {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Registration::Accepted { .. })
    }
}

/// Counts registered agents against the expected cluster size
///
/// The registry is Open while fewer than `expected` agents have registered and
/// Closed once the count reaches `expected`. Closing is one-way.
#[derive(Debug, Clone)]
pub struct MembershipRegistry {
    store: Arc<KeyValueStore>,
    expected: u64,
}

impl MembershipRegistry {
    /// Create a registry over `store`, seeding the counter to 0 if absent
    pub fn new(store: Arc<KeyValueStore>, expected: u64) -> Self {
        debug!(expected, "MembershipRegistry::new: called");
        store.with_entries(|entries| {
            entries
                .entry(REGISTERED_AGENTS_KEY.to_string())
                .or_insert_with(|| "0".to_string());
        });
        Self { store, expected }
    }

    /// Expected cluster size
    pub fn expected(&self) -> u64 {
        self.expected
    }

    /// Try to count one more agent
    ///
    /// The read, the capacity check and the increment happen under one store
    /// lock, so concurrent callers racing the boundary can never push the
    /// counter past `expected`.
    pub fn try_register(&self) -> Result<Registration, StoreError> {
        debug!(expected = self.expected, "MembershipRegistry::try_register: called");
        let outcome = self.store.with_entries(|entries| {
            let current = read_counter(entries, REGISTERED_AGENTS_KEY)?.unwrap_or(0);
            if current >= self.expected {
                return Ok(Registration::Rejected);
            }
            let ordinal = increment_entry(entries, REGISTERED_AGENTS_KEY, 1)?;
            Ok(Registration::Accepted { ordinal })
        })?;

        match outcome {
            Registration::Accepted { ordinal } => {
                info!(ordinal, expected = self.expected, "Agent registered");
                if ordinal == self.expected {
                    info!(expected = self.expected, "All expected agents registered, barrier satisfied");
                }
            }
            Registration::Rejected => {
                warn!(expected = self.expected, "Agent registration rejected, cluster is full");
            }
        }
        Ok(outcome)
    }

    /// Number of agents registered so far
    pub fn registered(&self) -> Result<u64, StoreError> {
        self.store
            .with_entries(|entries| read_counter(entries, REGISTERED_AGENTS_KEY))
            .map(|count| count.unwrap_or(0))
    }

    /// True once the registered count equals the expected cluster size
    pub fn is_closed(&self) -> bool {
        match self.registered() {
            Ok(count) => count == self.expected,
            Err(e) => {
                warn!(error = %e, "Membership counter is corrupt, reporting barrier as pending");
                false
            }
        }
    }
}
