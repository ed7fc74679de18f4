//! State store - durable record of what actually exists
//!
//! The provisioner writes an entry on every lifecycle transition, so after
//! a crash the store reflects the last thing the provider confirmed.

use crate::error::{Error, Result};
use crate::types::NodeState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Persisted record of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    pub graph_id: String,
    pub node_id: String,
    /// Resource kind, kept so orphaned entries can still be deleted
    pub kind: String,
    /// Set once the provider has created the resource
    pub physical_id: Option<String>,
    /// Hash of the config last confirmed by the provider
    pub config_hash: String,
    pub last_applied_state: NodeState,
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl StateEntry {
    /// Fresh entry for a node that has never been applied
    pub fn new(graph_id: impl Into<String>, node_id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            graph_id: graph_id.into(),
            node_id: node_id.into(),
            kind: kind.into(),
            physical_id: None,
            config_hash: String::new(),
            last_applied_state: NodeState::Pending,
            outputs: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Move to a new lifecycle state and refresh the timestamp
    pub fn transition(&mut self, state: NodeState) {
        log::debug!(
            "{}/{}: {} -> {}",
            self.graph_id,
            self.node_id,
            self.last_applied_state,
            state
        );
        self.last_applied_state = state;
        self.timestamp = Utc::now();
    }

    /// Check if the provider confirmed the recorded config
    pub fn is_created(&self) -> bool {
        self.last_applied_state == NodeState::Created
    }

    /// Check if a live resource may exist for this entry
    pub fn holds_resource(&self) -> bool {
        self.physical_id.is_some()
    }
}

/// Key-value store of state entries, keyed by graph id and node id.
///
/// `put` must be atomic for a single key: a concurrent reader sees either
/// the previous entry or the new one, never a mix.
pub trait StateStore: Send + Sync {
    /// Read one entry
    fn get(&self, graph_id: &str, node_id: &str) -> Result<Option<StateEntry>>;

    /// Insert or replace an entry
    fn put(&self, entry: &StateEntry) -> Result<()>;

    /// Delete an entry; deleting a missing entry is not an error
    fn remove(&self, graph_id: &str, node_id: &str) -> Result<()>;

    /// All entries of a graph, ordered by node id
    fn entries(&self, graph_id: &str) -> Result<Vec<StateEntry>>;

    /// Ids of graphs with at least one entry
    fn graphs(&self) -> Result<Vec<String>>;
}

/// In-process state store
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: RwLock<BTreeMap<(String, String), StateEntry>>,
}

impl MemoryStateStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&BTreeMap<(String, String), StateEntry>) -> T) -> T {
        match self.entries.read() {
            Ok(guard) => f(&guard),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    fn write<T>(&self, f: impl FnOnce(&mut BTreeMap<(String, String), StateEntry>) -> T) -> T {
        match self.entries.write() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, graph_id: &str, node_id: &str) -> Result<Option<StateEntry>> {
        let key = (graph_id.to_string(), node_id.to_string());
        Ok(self.read(|entries| entries.get(&key).cloned()))
    }

    fn put(&self, entry: &StateEntry) -> Result<()> {
        if entry.graph_id.is_empty() || entry.node_id.is_empty() {
            return Err(Error::state("state entry needs a graph id and a node id"));
        }
        let key = (entry.graph_id.clone(), entry.node_id.clone());
        self.write(|entries| entries.insert(key, entry.clone()));
        Ok(())
    }

    fn remove(&self, graph_id: &str, node_id: &str) -> Result<()> {
        let key = (graph_id.to_string(), node_id.to_string());
        self.write(|entries| entries.remove(&key));
        Ok(())
    }

    fn entries(&self, graph_id: &str) -> Result<Vec<StateEntry>> {
        Ok(self.read(|entries| {
            entries
                .values()
                .filter(|e| e.graph_id == graph_id)
                .cloned()
                .collect()
        }))
    }

    fn graphs(&self) -> Result<Vec<String>> {
        Ok(self.read(|entries| {
            let mut graphs: Vec<String> = entries.keys().map(|(g, _)| g.clone()).collect();
            graphs.dedup();
            graphs
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn created(graph: &str, node: &str) -> StateEntry {
        let mut entry = StateEntry::new(graph, node, "queue");
        entry.physical_id = Some(format!("{node}-1"));
        entry.config_hash = "abc".into();
        entry.transition(NodeState::Created);
        entry
    }

    #[test]
    fn test_put_get_remove() {
        let store = MemoryStateStore::new();
        assert!(store.get("g", "a").unwrap().is_none());

        store.put(&created("g", "a")).unwrap();
        let entry = store.get("g", "a").unwrap().unwrap();
        assert!(entry.is_created());
        assert!(entry.holds_resource());

        store.remove("g", "a").unwrap();
        assert!(store.get("g", "a").unwrap().is_none());
        store.remove("g", "a").unwrap();
    }

    #[test]
    fn test_put_replaces_entry() {
        let store = MemoryStateStore::new();
        let mut entry = created("g", "a");
        store.put(&entry).unwrap();

        entry.transition(NodeState::Updating);
        store.put(&entry).unwrap();

        let stored = store.get("g", "a").unwrap().unwrap();
        assert_eq!(stored.last_applied_state, NodeState::Updating);
        assert_eq!(store.entries("g").unwrap().len(), 1);
    }

    #[test]
    fn test_entries_scoped_by_graph() {
        let store = MemoryStateStore::new();
        store.put(&created("g1", "b")).unwrap();
        store.put(&created("g1", "a")).unwrap();
        store.put(&created("g2", "a")).unwrap();

        let ids: Vec<_> = store
            .entries("g1")
            .unwrap()
            .into_iter()
            .map(|e| e.node_id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(store.graphs().unwrap(), vec!["g1", "g2"]);
    }

    #[test]
    fn test_put_rejects_unkeyed_entry() {
        let store = MemoryStateStore::new();
        let entry = StateEntry::new("", "a", "queue");
        assert!(store.put(&entry).is_err());
    }

    #[test]
    fn test_new_entry_is_pending() {
        let entry = StateEntry::new("g", "a", "queue");
        assert_eq!(entry.last_applied_state, NodeState::Pending);
        assert!(!entry.is_created());
        assert!(!entry.holds_resource());
    }
}
