//! Diff computation - what an apply or destroy would do

use crate::node::ResourceNode;
use crate::state::StateEntry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Planned action for one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// No resource recorded, provider create
    Create,
    /// Recorded resource with a different config hash
    Update,
    /// Recorded config matches, or nothing to delete
    NoChange,
    /// Depends on outputs that do not exist yet
    Pending,
    /// Recorded resource will be deleted
    Delete,
}

impl ChangeKind {
    /// Symbol used when rendering a plan
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Create => "+",
            Self::Update => "~",
            Self::NoChange => "=",
            Self::Pending => "?",
            Self::Delete => "-",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::NoChange => "no change",
            Self::Pending => "pending",
            Self::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// A planned change to a single node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedChange {
    pub node_id: String,
    pub kind: String,
    pub change: ChangeKind,
    /// Why the change is needed, for display
    pub reason: Option<String>,
}

impl PlannedChange {
    /// Compare a node's desired config hash with its recorded entry
    pub fn for_apply(node: &ResourceNode, entry: Option<&StateEntry>, desired_hash: &str) -> Self {
        let (change, reason) = match entry {
            Some(e) if e.is_created() && e.config_hash == desired_hash => {
                (ChangeKind::NoChange, None)
            }
            Some(e) if e.holds_resource() => (
                ChangeKind::Update,
                Some(if e.is_created() {
                    "configuration changed".to_string()
                } else {
                    format!("last recorded state is {}", e.last_applied_state)
                }),
            ),
            Some(e) => (
                ChangeKind::Create,
                Some(format!("last recorded state is {}", e.last_applied_state)),
            ),
            None => (ChangeKind::Create, None),
        };
        Self::new(node, change, reason)
    }

    /// Plan for a node whose inputs are not known yet
    pub fn pending(node: &ResourceNode, reason: impl Into<String>) -> Self {
        Self::new(node, ChangeKind::Pending, Some(reason.into()))
    }

    /// Plan for tearing a node down
    pub fn for_destroy(node: &ResourceNode, entry: Option<&StateEntry>) -> Self {
        match entry.and_then(|e| e.physical_id.as_ref()) {
            Some(physical_id) => Self::new(node, ChangeKind::Delete, Some(physical_id.clone())),
            None => Self::new(node, ChangeKind::NoChange, None),
        }
    }

    fn new(node: &ResourceNode, change: ChangeKind, reason: Option<String>) -> Self {
        Self {
            node_id: node.id().to_string(),
            kind: node.kind().to_string(),
            change,
            reason,
        }
    }

    /// Check if applying this plan touches the provider
    pub fn is_change(&self) -> bool {
        !matches!(self.change, ChangeKind::NoChange)
    }
}

/// Plan summary statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
    pub unchanged: usize,
    pub pending: usize,
}

impl PlanSummary {
    /// Create a summary from a list of planned changes
    pub fn from_changes(changes: &[PlannedChange]) -> Self {
        let mut summary = Self::default();
        for change in changes {
            match change.change {
                ChangeKind::Create => summary.creates += 1,
                ChangeKind::Update => summary.updates += 1,
                ChangeKind::Delete => summary.deletes += 1,
                ChangeKind::NoChange => summary.unchanged += 1,
                ChangeKind::Pending => summary.pending += 1,
            }
        }
        summary
    }

    /// Total number of changes, counting pending nodes
    pub fn total(&self) -> usize {
        self.creates + self.updates + self.deletes + self.pending
    }

    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }

    /// Add another summary's counts to this one
    pub fn merge(&mut self, other: &PlanSummary) {
        self.creates += other.creates;
        self.updates += other.updates;
        self.deletes += other.deletes;
        self.unchanged += other.unchanged;
        self.pending += other.pending;
    }
}

/// Group planned changes by resource kind
pub fn group_by_kind(changes: &[PlannedChange]) -> BTreeMap<&str, Vec<&PlannedChange>> {
    let mut groups: BTreeMap<&str, Vec<&PlannedChange>> = BTreeMap::new();
    for change in changes {
        groups.entry(change.kind.as_str()).or_default().push(change);
    }
    groups
}
