//! Cross-stack bindings - outputs of one graph fed into another
//!
//! A binding is recorded while graphs are declared, long before the
//! producer exists. It is resolved against the state store when the
//! consumer node is about to be provisioned, and the value is cached
//! until the producer graph is destroyed.

use crate::error::{Error, Result};
use crate::node::OutputRef;
use crate::state::StateStore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::RwLock;

/// Handle returned by [`CrossStackBinder::bind`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BindingId(usize);

impl BindingId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for BindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A producer output wired to a consumer input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossStackBinding {
    pub producer_graph: String,
    pub output: OutputRef,
    pub consumer_graph: String,
    /// Consumer node and the config key the value is written to
    pub consumer_input: OutputRef,
}

impl fmt::Display for CrossStackBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} -> {}/{}",
            self.producer_graph, self.output, self.consumer_graph, self.consumer_input
        )
    }
}

#[derive(Debug, Default)]
struct BinderState {
    /// Slot per issued id; `None` once replaced by a re-bind
    bindings: Vec<Option<CrossStackBinding>>,
    resolved: BTreeMap<BindingId, String>,
}

/// Registry of deferred cross-graph references
#[derive(Debug, Default)]
pub struct CrossStackBinder {
    state: RwLock<BinderState>,
}

impl CrossStackBinder {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&BinderState) -> T) -> T {
        match self.state.read() {
            Ok(guard) => f(&guard),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    fn write<T>(&self, f: impl FnOnce(&mut BinderState) -> T) -> T {
        match self.state.write() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    /// Record a pending binding.
    ///
    /// Binding an input that is already bound replaces the earlier
    /// binding; its id stops resolving.
    pub fn bind(
        &self,
        producer_graph: impl Into<String>,
        output: OutputRef,
        consumer_graph: impl Into<String>,
        consumer_input: OutputRef,
    ) -> BindingId {
        let binding = CrossStackBinding {
            producer_graph: producer_graph.into(),
            output,
            consumer_graph: consumer_graph.into(),
            consumer_input,
        };
        log::debug!("bind {binding}");

        self.write(|state| {
            for (idx, slot) in state.bindings.iter_mut().enumerate() {
                let same_input = slot.as_ref().is_some_and(|b| {
                    b.consumer_graph == binding.consumer_graph
                        && b.consumer_input == binding.consumer_input
                });
                if same_input {
                    *slot = None;
                    state.resolved.remove(&BindingId(idx));
                }
            }
            state.bindings.push(Some(binding));
            BindingId(state.bindings.len() - 1)
        })
    }

    /// Look up a binding by id
    pub fn binding(&self, id: BindingId) -> Result<CrossStackBinding> {
        self.read(|state| state.bindings.get(id.0).cloned().flatten())
            .ok_or(Error::UnknownBinding { id: id.0 })
    }

    /// Resolve a binding to the producer's output value.
    ///
    /// Fails with [`Error::UnresolvedOutput`] until the producer node is
    /// recorded as created with the output present. Resolved values are
    /// cached and served without touching the store.
    pub fn resolve(&self, id: BindingId, store: &dyn StateStore) -> Result<String> {
        if let Some(value) = self.read(|state| state.resolved.get(&id).cloned()) {
            return Ok(value);
        }

        let binding = self.binding(id)?;
        let unresolved = || Error::UnresolvedOutput {
            graph: binding.producer_graph.clone(),
            node: binding.output.node.clone(),
            output: binding.output.key.clone(),
        };

        let entry = store
            .get(&binding.producer_graph, &binding.output.node)?
            .filter(|e| e.is_created())
            .ok_or_else(unresolved)?;
        let value = entry
            .outputs
            .get(&binding.output.key)
            .cloned()
            .ok_or_else(unresolved)?;

        self.write(|state| {
            // A re-bind may have retired the id while we were reading.
            if state.bindings.get(id.0).is_some_and(Option::is_some) {
                state.resolved.insert(id, value.clone());
            }
        });
        Ok(value)
    }

    /// Check if a binding has a cached value
    pub fn is_resolved(&self, id: BindingId) -> bool {
        self.read(|state| state.resolved.contains_key(&id))
    }

    /// Bindings feeding `node` of `consumer_graph`, with the input key
    /// each one fills
    pub fn bindings_for(&self, consumer_graph: &str, node: &str) -> Vec<(BindingId, String)> {
        self.read(|state| {
            state
                .bindings
                .iter()
                .enumerate()
                .filter_map(|(idx, slot)| {
                    let b = slot.as_ref()?;
                    (b.consumer_graph == consumer_graph && b.consumer_input.node == node)
                        .then(|| (BindingId(idx), b.consumer_input.key.clone()))
                })
                .collect()
        })
    }

    /// Graphs whose outputs `consumer_graph` consumes
    pub fn producers_of(&self, consumer_graph: &str) -> BTreeSet<String> {
        self.read(|state| {
            state
                .bindings
                .iter()
                .flatten()
                .filter(|b| b.consumer_graph == consumer_graph && b.producer_graph != consumer_graph)
                .map(|b| b.producer_graph.clone())
                .collect()
        })
    }

    /// All live bindings
    pub fn bindings(&self) -> Vec<(BindingId, CrossStackBinding)> {
        self.read(|state| {
            state
                .bindings
                .iter()
                .enumerate()
                .filter_map(|(idx, slot)| slot.clone().map(|b| (BindingId(idx), b)))
                .collect()
        })
    }

    /// Drop cached values produced by `producer_graph`
    pub fn invalidate(&self, producer_graph: &str) {
        self.write(|state| {
            let stale: Vec<BindingId> = state
                .resolved
                .keys()
                .copied()
                .filter(|id| {
                    state.bindings[id.0]
                        .as_ref()
                        .is_some_and(|b| b.producer_graph == producer_graph)
                })
                .collect();
            for id in stale {
                state.resolved.remove(&id);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{MemoryStateStore, StateEntry};
    use crate::types::NodeState;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn created_collection(store: &dyn StateStore) {
        let mut entry = StateEntry::new("vectors", "collection", "collection");
        entry.physical_id = Some("collection-1".into());
        entry
            .outputs
            .insert("endpoint".into(), "https://abc.aoss".into());
        entry.transition(NodeState::Created);
        store.put(&entry).unwrap();
    }

    fn bind_endpoint(binder: &CrossStackBinder) -> BindingId {
        binder.bind(
            "vectors",
            OutputRef::new("collection", "endpoint"),
            "ingestion",
            OutputRef::new("indexer", "opensearch_endpoint"),
        )
    }

    /// Store wrapper counting reads
    struct CountingStore {
        inner: MemoryStateStore,
        reads: AtomicUsize,
    }

    impl StateStore for CountingStore {
        fn get(&self, graph_id: &str, node_id: &str) -> Result<Option<StateEntry>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.get(graph_id, node_id)
        }
        fn put(&self, entry: &StateEntry) -> Result<()> {
            self.inner.put(entry)
        }
        fn remove(&self, graph_id: &str, node_id: &str) -> Result<()> {
            self.inner.remove(graph_id, node_id)
        }
        fn entries(&self, graph_id: &str) -> Result<Vec<StateEntry>> {
            self.inner.entries(graph_id)
        }
        fn graphs(&self) -> Result<Vec<String>> {
            self.inner.graphs()
        }
    }

    #[test]
    fn test_resolve_before_producer_exists() {
        let binder = CrossStackBinder::new();
        let store = MemoryStateStore::new();
        let id = bind_endpoint(&binder);

        match binder.resolve(id, &store) {
            Err(Error::UnresolvedOutput { graph, node, output }) => {
                assert_eq!(graph, "vectors");
                assert_eq!(node, "collection");
                assert_eq!(output, "endpoint");
            }
            other => panic!("expected unresolved output, got {other:?}"),
        }
        assert!(!binder.is_resolved(id));
    }

    #[test]
    fn test_resolve_requires_created_state() {
        let binder = CrossStackBinder::new();
        let store = MemoryStateStore::new();
        let id = bind_endpoint(&binder);

        let mut entry = StateEntry::new("vectors", "collection", "collection");
        entry.outputs.insert("endpoint".into(), "https://abc.aoss".into());
        entry.transition(NodeState::Creating);
        store.put(&entry).unwrap();

        assert!(binder.resolve(id, &store).is_err());
    }

    #[test]
    fn test_resolve_caches_value() {
        let binder = CrossStackBinder::new();
        let store = CountingStore {
            inner: MemoryStateStore::new(),
            reads: AtomicUsize::new(0),
        };
        created_collection(&store);
        let id = bind_endpoint(&binder);

        assert_eq!(binder.resolve(id, &store).unwrap(), "https://abc.aoss");
        assert_eq!(binder.resolve(id, &store).unwrap(), "https://abc.aoss");
        assert_eq!(store.reads.load(Ordering::SeqCst), 1);
        assert!(binder.is_resolved(id));

        binder.invalidate("vectors");
        assert!(!binder.is_resolved(id));
    }

    #[test]
    fn test_rebind_replaces_binding() {
        let binder = CrossStackBinder::new();
        let first = bind_endpoint(&binder);
        let second = binder.bind(
            "vectors-v2",
            OutputRef::new("collection", "endpoint"),
            "ingestion",
            OutputRef::new("indexer", "opensearch_endpoint"),
        );

        assert_ne!(first, second);
        assert!(matches!(
            binder.binding(first),
            Err(Error::UnknownBinding { .. })
        ));
        assert_eq!(binder.bindings().len(), 1);
        assert_eq!(
            binder.producers_of("ingestion").into_iter().collect::<Vec<_>>(),
            vec!["vectors-v2"]
        );
    }

    #[test]
    fn test_bindings_for_node() {
        let binder = CrossStackBinder::new();
        let id = bind_endpoint(&binder);
        binder.bind(
            "vectors",
            OutputRef::new("vector-index", "index_name"),
            "ingestion",
            OutputRef::new("indexer", "index_name"),
        );

        let bound = binder.bindings_for("ingestion", "indexer");
        assert_eq!(bound.len(), 2);
        assert_eq!(bound[0], (id, "opensearch_endpoint".to_string()));
        assert!(binder.bindings_for("ingestion", "queue").is_empty());
        assert!(binder.producers_of("vectors").is_empty());
    }

    #[test]
    fn test_unknown_binding() {
        let binder = CrossStackBinder::new();
        let store = MemoryStateStore::new();
        assert!(matches!(
            binder.resolve(BindingId(7), &store),
            Err(Error::UnknownBinding { id: 7 })
        ));
    }
}
