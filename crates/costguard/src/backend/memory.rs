//! In-process budget backend

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use super::BudgetBackend;
use crate::error::{Error, Result};
use crate::types::BudgetRule;

#[derive(Debug, Default)]
struct Inner {
    rules: BTreeMap<String, BudgetRule>,
    /// Rules that exist but are outside the lookup scope
    hidden: BTreeSet<String>,
    channels: BTreeMap<String, String>,
    subscriptions: BTreeMap<String, Vec<String>>,
}

/// Budget backend holding everything in memory
#[derive(Debug, Default)]
pub struct MemoryBackend {
    inner: Mutex<Inner>,
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a rule that exists but that `find_rule` cannot see, as
    /// when it was created under another account scope
    pub fn with_hidden_rule(self, name: impl Into<String>) -> Self {
        self.lock().hidden.insert(name.into());
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Number of rules created through this backend
    pub fn rule_count(&self) -> usize {
        self.lock().rules.len()
    }

    /// Subscribers of a channel
    pub fn subscribers(&self, channel: &str) -> Vec<String> {
        self.lock()
            .subscriptions
            .get(channel)
            .cloned()
            .unwrap_or_default()
    }
}

impl BudgetBackend for MemoryBackend {
    fn find_rule(&self, name: &str) -> Result<Option<BudgetRule>> {
        Ok(self.lock().rules.get(name).cloned())
    }

    fn create_rule(&self, rule: &BudgetRule) -> Result<()> {
        let mut inner = self.lock();
        if inner.rules.contains_key(&rule.name) || inner.hidden.contains(&rule.name) {
            return Err(Error::RuleExists {
                name: rule.name.clone(),
            });
        }
        inner.rules.insert(rule.name.clone(), rule.clone());
        Ok(())
    }

    fn attach_graphs(&self, name: &str, graph_ids: &BTreeSet<String>) -> Result<()> {
        let mut inner = self.lock();
        let rule = inner
            .rules
            .get_mut(name)
            .ok_or_else(|| Error::backend(format!("no rule named {name}")))?;
        rule.attached_graph_ids.extend(graph_ids.iter().cloned());
        Ok(())
    }

    fn create_channel(&self, rule_name: &str) -> Result<String> {
        let mut inner = self.lock();
        let channel = inner
            .channels
            .entry(rule_name.to_string())
            .or_insert_with(|| format!("{rule_name}-alerts"))
            .clone();
        Ok(channel)
    }

    fn subscribe(&self, channel: &str, subscriber: &str) -> Result<()> {
        let mut inner = self.lock();
        let subscribers = inner.subscriptions.entry(channel.to_string()).or_default();
        if !subscribers.iter().any(|s| s == subscriber) {
            subscribers.push(subscriber.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Period;

    #[test]
    fn test_create_rule_once() {
        let backend = MemoryBackend::new();
        let rule = BudgetRule::new("b", 10.0, "USD", Period::Daily);

        backend.create_rule(&rule).unwrap();
        assert!(backend.create_rule(&rule).unwrap_err().is_conflict());
        assert_eq!(backend.find_rule("b").unwrap(), Some(rule));
    }

    #[test]
    fn test_hidden_rule_conflicts_but_is_not_found() {
        let backend = MemoryBackend::new().with_hidden_rule("b");
        let rule = BudgetRule::new("b", 10.0, "USD", Period::Daily);

        assert!(backend.find_rule("b").unwrap().is_none());
        assert!(backend.create_rule(&rule).unwrap_err().is_conflict());
    }

    #[test]
    fn test_channel_is_stable() {
        let backend = MemoryBackend::new();
        let first = backend.create_channel("b").unwrap();
        assert_eq!(backend.create_channel("b").unwrap(), first);

        backend.subscribe(&first, "s1").unwrap();
        backend.subscribe(&first, "s1").unwrap();
        backend.subscribe(&first, "s2").unwrap();
        assert_eq!(backend.subscribers(&first), vec!["s1", "s2"]);
    }
}
