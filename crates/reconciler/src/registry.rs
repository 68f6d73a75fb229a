//! Server registry: the in-memory cache of known server descriptors.
//!
//! Populated by the Server reconciler as server objects converge and evicted
//! when they are finalized. Bucket and User passes only read from it.

use bucketeer_core::ServerDescriptor;
use dashmap::DashMap;
use itertools::Itertools;

/// Concurrent map from server name to connection descriptor.
#[derive(Debug, Default)]
pub struct ServerRegistry {
    servers: DashMap<String, ServerDescriptor>,
}

impl ServerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Descriptor of `name`, if the server has been observed.
    pub fn get(&self, name: &str) -> Option<ServerDescriptor> {
        self.servers.get(name).map(|entry| entry.value().clone())
    }

    /// Insert or replace a descriptor, returning the previous one.
    pub fn upsert(&self, descriptor: ServerDescriptor) -> Option<ServerDescriptor> {
        self.servers.insert(descriptor.name.clone(), descriptor)
    }

    /// Evict `name`, returning the removed descriptor.
    pub fn remove(&self, name: &str) -> Option<ServerDescriptor> {
        self.servers.remove(name).map(|(_, descriptor)| descriptor)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.servers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Names of every known server, sorted.
    pub fn names(&self) -> Vec<String> {
        self.servers
            .iter()
            .map(|entry| entry.key().clone())
            .sorted()
            .collect_vec()
    }
}
