//! Core types for graph provisioning

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Lifecycle state of a single node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Declared, nothing done yet
    Pending,
    /// Create call in flight
    Creating,
    /// Provider confirmed the resource exists with the recorded config
    Created,
    /// Update call in flight
    Updating,
    /// Delete call in flight
    Deleting,
    /// Provider confirmed the resource is gone
    Deleted,
    /// Last provider call for this node failed
    Failed,
}

impl NodeState {
    /// Stable lowercase name, used in persisted state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Creating => "creating",
            Self::Created => "created",
            Self::Updating => "updating",
            Self::Deleting => "deleting",
            Self::Deleted => "deleted",
            Self::Failed => "failed",
        }
    }

    /// Parse a name produced by [`NodeState::as_str`].
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "creating" => Some(Self::Creating),
            "created" => Some(Self::Created),
            "updating" => Some(Self::Updating),
            "deleting" => Some(Self::Deleting),
            "deleted" => Some(Self::Deleted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether a provider call is in flight in this state.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Creating | Self::Updating | Self::Deleting)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which direction a run reconciles in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Apply,
    Destroy,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Apply => f.write_str("apply"),
            Self::Destroy => f.write_str("destroy"),
        }
    }
}

/// Result of processing one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeOutcome {
    /// Resource was created
    Created,
    /// Resource was updated in place
    Updated,
    /// Recorded config hash matched, no provider call
    Unchanged,
    /// Resource was deleted
    Deleted,
    /// Nothing to delete
    Absent,
    /// Provider or binding failure
    Failed { error: String },
    /// Not attempted (blocked by a failed neighbour or cancelled)
    Skipped { reason: String },
}

impl NodeOutcome {
    /// Check if the node ended in its target state
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. } | Self::Skipped { .. })
    }

    /// Check if the outcome represents an external change
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Created | Self::Updated | Self::Deleted)
    }

    /// Check if the outcome is a failure
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Short label for display
    pub fn label(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
            Self::Deleted => "deleted",
            Self::Absent => "absent",
            Self::Failed { .. } => "failed",
            Self::Skipped { .. } => "skipped",
        }
    }
}

/// Per-node entry of a [`RunReport`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeReport {
    pub id: String,
    pub kind: String,
    pub outcome: NodeOutcome,
}

/// Overall status of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Every node reached its target state
    Succeeded,
    /// Some nodes failed or were not attempted
    Partial { failed: usize, skipped: usize },
    /// Nothing was attempted
    Aborted { reason: String },
}

/// Aggregate result of an apply or destroy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub graph_id: String,
    pub operation: Operation,
    /// Nodes in the order they were processed
    pub nodes: Vec<NodeReport>,
    /// Set when the run was refused before touching anything
    pub aborted: Option<String>,
}

impl RunReport {
    /// Create an empty report
    pub fn new(graph_id: impl Into<String>, operation: Operation) -> Self {
        Self {
            graph_id: graph_id.into(),
            operation,
            nodes: Vec::new(),
            aborted: None,
        }
    }

    /// Create a report for a run refused before any change
    pub fn aborted(
        graph_id: impl Into<String>,
        operation: Operation,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            aborted: Some(reason.into()),
            ..Self::new(graph_id, operation)
        }
    }

    /// Record a node outcome
    pub fn push(&mut self, id: impl Into<String>, kind: impl Into<String>, outcome: NodeOutcome) {
        self.nodes.push(NodeReport {
            id: id.into(),
            kind: kind.into(),
            outcome,
        });
    }

    /// Outcome recorded for a node
    pub fn outcome(&self, id: &str) -> Option<&NodeOutcome> {
        self.nodes.iter().find(|n| n.id == id).map(|n| &n.outcome)
    }

    fn ids_where(&self, pred: impl Fn(&NodeOutcome) -> bool) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| pred(&n.outcome))
            .map(|n| n.id.as_str())
            .collect()
    }

    /// Nodes that were changed externally
    pub fn succeeded(&self) -> Vec<&str> {
        self.ids_where(NodeOutcome::is_change)
    }

    /// Nodes that needed no provider call
    pub fn unchanged(&self) -> Vec<&str> {
        self.ids_where(|o| matches!(o, NodeOutcome::Unchanged | NodeOutcome::Absent))
    }

    /// Nodes that were not attempted
    pub fn skipped(&self) -> Vec<&str> {
        self.ids_where(|o| matches!(o, NodeOutcome::Skipped { .. }))
    }

    /// Nodes that failed
    pub fn failed(&self) -> Vec<&str> {
        self.ids_where(NodeOutcome::is_failure)
    }

    /// Overall status
    pub fn status(&self) -> RunStatus {
        if let Some(reason) = &self.aborted {
            return RunStatus::Aborted {
                reason: reason.clone(),
            };
        }
        let failed = self.failed().len();
        let skipped = self.skipped().len();
        if failed == 0 && skipped == 0 {
            RunStatus::Succeeded
        } else {
            RunStatus::Partial { failed, skipped }
        }
    }

    /// Check if every node reached its target state
    pub fn is_success(&self) -> bool {
        self.status() == RunStatus::Succeeded
    }

    /// Count outcomes
    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for node in &self.nodes {
            summary.add_outcome(&node.outcome);
        }
        summary
    }
}

/// Outcome counts of one or more runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RunSummary {
    /// Total number of external changes
    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.deleted
    }

    /// Total number of nodes processed
    pub fn total(&self) -> usize {
        self.total_changes() + self.unchanged + self.skipped + self.failed
    }

    /// Check if no node failed or was skipped
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }

    /// Merge another summary into this one
    pub fn merge(&mut self, other: &RunSummary) {
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.unchanged += other.unchanged;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }

    /// Add an outcome to the summary
    pub fn add_outcome(&mut self, outcome: &NodeOutcome) {
        match outcome {
            NodeOutcome::Created => self.created += 1,
            NodeOutcome::Updated => self.updated += 1,
            NodeOutcome::Deleted => self.deleted += 1,
            NodeOutcome::Unchanged | NodeOutcome::Absent => self.unchanged += 1,
            NodeOutcome::Skipped { .. } => self.skipped += 1,
            NodeOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with custom settings.
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            ..Default::default()
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// Options for a provisioning run
#[derive(Debug, Clone)]
pub struct ProvisionOptions {
    /// Number of nodes provisioned in parallel within a wave
    pub jobs: usize,
    /// Retry policy for transient provider errors
    pub retry: RetryConfig,
    /// Timeout passed to every provider call
    pub call_timeout: Duration,
}

impl Default for ProvisionOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            retry: RetryConfig::default(),
            call_timeout: Duration::from_secs(300),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_state_round_trips_names() {
        for state in [
            NodeState::Pending,
            NodeState::Creating,
            NodeState::Created,
            NodeState::Updating,
            NodeState::Deleting,
            NodeState::Deleted,
            NodeState::Failed,
        ] {
            assert_eq!(NodeState::parse(state.as_str()), Some(state));
        }
        assert_eq!(NodeState::parse("gone"), None);
    }

    #[test]
    fn test_report_status() {
        let mut report = RunReport::new("g", Operation::Apply);
        report.push("a", "queue", NodeOutcome::Created);
        report.push("b", "queue", NodeOutcome::Unchanged);
        assert_eq!(report.status(), RunStatus::Succeeded);
        assert_eq!(report.succeeded(), vec!["a"]);
        assert_eq!(report.unchanged(), vec!["b"]);

        report.push(
            "c",
            "function",
            NodeOutcome::Failed {
                error: "denied".into(),
            },
        );
        report.push(
            "d",
            "function",
            NodeOutcome::Skipped {
                reason: "blocked by c".into(),
            },
        );
        assert_eq!(
            report.status(),
            RunStatus::Partial {
                failed: 1,
                skipped: 1
            }
        );
        assert_eq!(report.failed(), vec!["c"]);
        assert_eq!(report.skipped(), vec!["d"]);
        assert!(!report.is_success());
    }

    #[test]
    fn test_aborted_report() {
        let report = RunReport::aborted("g", Operation::Destroy, "cycle");
        assert_eq!(
            report.status(),
            RunStatus::Aborted {
                reason: "cycle".into()
            }
        );
        assert!(report.nodes.is_empty());
    }

    #[test]
    fn test_summary_counts() {
        let mut report = RunReport::new("g", Operation::Destroy);
        report.push("a", "k", NodeOutcome::Deleted);
        report.push("b", "k", NodeOutcome::Absent);
        report.push("c", "k", NodeOutcome::Failed { error: "x".into() });

        let summary = report.summary();
        assert_eq!(summary.deleted, 1);
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.total(), 3);
        assert_eq!(summary.total_changes(), 1);

        let mut total = RunSummary::default();
        total.merge(&summary);
        total.merge(&summary);
        assert_eq!(total.deleted, 2);
        assert!(!total.is_success());
    }

    #[test]
    fn test_retry_config_delay_calculation() {
        let config = RetryConfig::new(5, Duration::from_secs(2), 2.0);

        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(8));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(16));
    }

    #[test]
    fn test_retry_config_max_delay() {
        let config = RetryConfig {
            max_delay: Duration::from_secs(10),
            ..RetryConfig::new(5, Duration::from_secs(4), 2.0)
        };

        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(8));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(10));
    }
}
