use std::collections::BTreeSet;

use crate::error::Result;
use crate::types::BudgetRule;

pub mod memory;

/// Backend trait for budget rules and their notification channels
///
/// This trait abstracts where rules live, allowing us to:
/// - Keep rules in a local ledger database
/// - Talk to a billing service
/// - Mock for testing
pub trait BudgetBackend: Send + Sync {
    /// Look up a rule by name within the backend's scope
    fn find_rule(&self, name: &str) -> Result<Option<BudgetRule>>;

    /// Create a rule; fails with `RuleExists` if the name is taken
    fn create_rule(&self, rule: &BudgetRule) -> Result<()>;

    /// Add graphs to an existing rule's attachment set
    fn attach_graphs(&self, name: &str, graph_ids: &BTreeSet<String>) -> Result<()>;

    /// Notification channel of a rule, created on first use
    fn create_channel(&self, rule_name: &str) -> Result<String>;

    /// Subscribe a receiver to a channel
    fn subscribe(&self, channel: &str, subscriber: &str) -> Result<()>;
}
