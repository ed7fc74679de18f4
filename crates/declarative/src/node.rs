//! Resource nodes - the declarative unit of a graph
//!
//! A node names a resource kind, carries its desired configuration and
//! declares which other nodes it depends on. Values produced by other
//! nodes are wired in through inputs, which imply a dependency.

use crate::state::StateEntry;
use crate::types::NodeState;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Desired configuration of a node: an ordered map of JSON values.
///
/// Ordering matters: the config hash is computed over the serialized map.
pub type Config = BTreeMap<String, Value>;

/// Reference to a named output of a node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutputRef {
    pub node: String,
    pub key: String,
}

impl OutputRef {
    /// Create a reference to `node`'s output `key`
    pub fn new(node: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            key: key.into(),
        }
    }

    /// Parse "node.key"
    pub fn parse(value: &str) -> Option<Self> {
        let (node, key) = value.split_once('.')?;
        if node.is_empty() || key.is_empty() {
            return None;
        }
        Some(Self::new(node, key))
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.key)
    }
}

/// A single declarative unit of infrastructure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceNode {
    id: String,
    kind: String,
    desired_config: Config,
    depends_on: BTreeSet<String>,
    inputs: BTreeMap<String, OutputRef>,

    /// Last observed lifecycle state
    pub state: NodeState,
    /// Provider-assigned identifier, once created
    pub physical_id: Option<String>,
    /// Outputs reported by the provider
    pub outputs: BTreeMap<String, String>,
}

impl ResourceNode {
    /// Create a pending node with an empty configuration
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            desired_config: Config::new(),
            depends_on: BTreeSet::new(),
            inputs: BTreeMap::new(),
            state: NodeState::Pending,
            physical_id: None,
            outputs: BTreeMap::new(),
        }
    }

    /// Set a configuration value
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.desired_config.insert(key.into(), value.into());
        self
    }

    /// Declare a dependency on another node in the same graph
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.depends_on.insert(id.into());
        self
    }

    /// Feed another node's output into this node's configuration under
    /// `key`. The producer becomes a dependency.
    pub fn with_input(mut self, key: impl Into<String>, source: OutputRef) -> Self {
        self.depends_on.insert(source.node.clone());
        self.inputs.insert(key.into(), source);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn desired_config(&self) -> &Config {
        &self.desired_config
    }

    pub fn dependencies(&self) -> &BTreeSet<String> {
        &self.depends_on
    }

    pub fn inputs(&self) -> &BTreeMap<String, OutputRef> {
        &self.inputs
    }

    pub(crate) fn add_dependency(&mut self, id: String) {
        self.depends_on.insert(id);
    }

    /// Desired config with resolved input values merged in.
    ///
    /// Resolved values win over literal config entries with the same key.
    pub fn resolved_config(&self, resolved: &BTreeMap<String, String>) -> Config {
        let mut config = self.desired_config.clone();
        for (key, value) in resolved {
            config.insert(key.clone(), Value::String(value.clone()));
        }
        config
    }

    /// Copy the observed lifecycle fields from a state entry
    pub fn observe(&mut self, entry: &StateEntry) {
        self.state = entry.last_applied_state;
        self.physical_id = entry.physical_id.clone();
        self.outputs = entry.outputs.clone();
    }
}

/// Hash a node's kind and resolved config.
///
/// The same kind and config always produce the same hash, independent of
/// insertion order, because [`Config`] is ordered.
pub fn config_hash(kind: &str, config: &Config) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(kind.as_bytes());
    hasher.update(&[0]);
    // Serializing a BTreeMap of serde_json values cannot fail.
    let bytes = serde_json::to_vec(config).unwrap_or_default();
    hasher.update(&bytes);
    hasher.finalize().to_hex().to_string()
}
