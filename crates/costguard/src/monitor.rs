//! Budget monitor - registry of rules and threshold-triggered teardown

use crate::backend::BudgetBackend;
use crate::error::{Error, Result};
use crate::types::{
    BudgetAlert, BudgetRule, GraphTeardown, MonitorOptions, MonitorState, Registration,
    TeardownOutcome, TriggerReport,
};
use declarative::RunReport;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Destroys a graph when a budget is exceeded.
///
/// Implemented for closures, so a provisioner can be wrapped inline:
///
/// ```ignore
/// let hook = Arc::new(move |graph_id: &str| deployment.destroy_graph(graph_id));
/// ```
pub trait TeardownHook: Send + Sync {
    /// Destroy every node of `graph_id`
    fn teardown(&self, graph_id: &str) -> declarative::Result<RunReport>;

    /// Graphs that tearing down `graph_id` destroys, itself included.
    ///
    /// Hooks that also destroy consumer graphs must list them here; the
    /// monitor holds the lock of every listed graph during the teardown.
    fn affected(&self, graph_id: &str) -> BTreeSet<String> {
        BTreeSet::from([graph_id.to_string()])
    }
}

impl<F> TeardownHook for F
where
    F: Fn(&str) -> declarative::Result<RunReport> + Send + Sync,
{
    fn teardown(&self, graph_id: &str) -> declarative::Result<RunReport> {
        self(graph_id)
    }
}

/// Identifier of one registration against a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(usize);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscriber-{}", self.0)
    }
}

#[derive(Clone)]
struct Subscriber {
    id: SubscriberId,
    graph_ids: BTreeSet<String>,
    hook: Arc<dyn TeardownHook>,
}

impl Subscriber {
    /// Name recorded in the backend; stable across processes
    fn label(&self) -> String {
        if self.graph_ids.is_empty() {
            return self.id.to_string();
        }
        let graphs: Vec<&str> = self.graph_ids.iter().map(String::as_str).collect();
        format!("teardown:{}", graphs.join(","))
    }
}

struct RuleEntry {
    rule: BudgetRule,
    state: MonitorState,
    /// Channel in the backend; `None` for unverified rules
    channel: Option<String>,
    subscribers: Vec<Subscriber>,
}

/// Registry of budget rules that tears down attached graphs on breach.
///
/// The monitor is `Send + Sync`. Alerts may be delivered from several
/// threads at once; destroys of the same graph id never overlap.
pub struct BudgetMonitor {
    backend: Arc<dyn BudgetBackend>,
    options: MonitorOptions,
    rules: Mutex<BTreeMap<String, RuleEntry>>,
    graph_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    next_subscriber: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl BudgetMonitor {
    /// Create a monitor over a backend with default options
    pub fn new(backend: Arc<dyn BudgetBackend>) -> Self {
        Self::with_options(backend, MonitorOptions::default())
    }

    /// Create a monitor with explicit options
    pub fn with_options(backend: Arc<dyn BudgetBackend>, options: MonitorOptions) -> Self {
        Self {
            backend,
            options,
            rules: Mutex::new(BTreeMap::new()),
            graph_locks: Mutex::new(HashMap::new()),
            next_subscriber: AtomicUsize::new(0),
        }
    }

    /// Register `hook` for the graphs attached to `rule`.
    ///
    /// If a rule with the same name is already known, locally or to the
    /// backend, the hook is attached to it and the graph sets are merged;
    /// the existing threshold stays. Otherwise the rule, its notification
    /// channel and the subscription are created.
    pub fn register(&self, rule: BudgetRule, hook: Arc<dyn TeardownHook>) -> Result<Registration> {
        rule.validate()?;
        let subscriber = Subscriber {
            id: SubscriberId(self.next_subscriber.fetch_add(1, Ordering::SeqCst)),
            graph_ids: rule.attached_graph_ids.clone(),
            hook,
        };

        let mut rules = lock(&self.rules);

        if let Some(entry) = rules.get_mut(&rule.name) {
            if let Some(channel) = &entry.channel {
                self.backend.attach_graphs(&rule.name, &rule.attached_graph_ids)?;
                self.backend.subscribe(channel, &subscriber.label())?;
            }
            entry
                .rule
                .attached_graph_ids
                .extend(rule.attached_graph_ids.iter().cloned());
            entry.subscribers.push(subscriber);
            log::info!("Attached to registered budget {}", rule.name);
            return Ok(Registration::Attached);
        }

        let (registration, stored, channel) = match self.backend.find_rule(&rule.name)? {
            Some(mut existing) => {
                if (existing.threshold_amount - rule.threshold_amount).abs() > f64::EPSILON {
                    log::warn!(
                        "Budget {} already exists with threshold {} {}; keeping it",
                        existing.name,
                        existing.threshold_amount,
                        existing.currency
                    );
                }
                self.backend.attach_graphs(&rule.name, &rule.attached_graph_ids)?;
                existing
                    .attached_graph_ids
                    .extend(rule.attached_graph_ids.iter().cloned());
                let channel = self.backend.create_channel(&rule.name)?;
                (Registration::Attached, existing, Some(channel))
            }
            None => match self.backend.create_rule(&rule) {
                Ok(()) => {
                    let channel = self.backend.create_channel(&rule.name)?;
                    (Registration::Created, rule.clone(), Some(channel))
                }
                Err(Error::RuleExists { name }) if !self.options.strict => {
                    log::warn!(
                        "Budget {name} exists but could not be looked up; tracking it locally, \
                         alerts must be delivered to this process"
                    );
                    (Registration::Unverified, rule.clone(), None)
                }
                Err(e) => return Err(e),
            },
        };

        if let Some(channel) = &channel {
            self.backend.subscribe(channel, &subscriber.label())?;
        }

        log::info!("Registered budget {} ({:?})", stored.name, registration);
        rules.insert(
            stored.name.clone(),
            RuleEntry {
                rule: stored,
                state: MonitorState::Registered,
                channel,
                subscribers: vec![subscriber],
            },
        );
        Ok(registration)
    }

    /// Handle a budget alert.
    ///
    /// Amounts at or below the threshold do nothing. Above it, the rule
    /// becomes [`MonitorState::Triggered`] and every subscriber's graphs
    /// are destroyed. Teardown failures are reported, not returned as
    /// errors.
    pub fn notify(&self, alert: &BudgetAlert) -> Result<TriggerReport> {
        let (threshold_amount, subscribers) = {
            let mut rules = lock(&self.rules);
            let entry = rules
                .get_mut(&alert.budget_name)
                .ok_or_else(|| Error::UnknownBudget {
                    name: alert.budget_name.clone(),
                })?;

            if !entry.rule.is_exceeded_by(alert.actual_amount) {
                log::debug!(
                    "Budget {}: {} within threshold {}",
                    alert.budget_name,
                    alert.actual_amount,
                    entry.rule.threshold_amount
                );
                return Ok(TriggerReport {
                    budget_name: alert.budget_name.clone(),
                    actual_amount: alert.actual_amount,
                    threshold_amount: entry.rule.threshold_amount,
                    teardowns: Vec::new(),
                });
            }

            entry.state = MonitorState::Triggered;
            (entry.rule.threshold_amount, entry.subscribers.clone())
        };

        log::warn!(
            "Budget {} exceeded: {} > {}, tearing down attached graphs",
            alert.budget_name,
            alert.actual_amount,
            threshold_amount
        );

        let mut teardowns = Vec::new();
        for subscriber in &subscribers {
            for graph_id in &subscriber.graph_ids {
                teardowns.push(self.teardown_graph(subscriber, graph_id));
            }
        }

        Ok(TriggerReport {
            budget_name: alert.budget_name.clone(),
            actual_amount: alert.actual_amount,
            threshold_amount,
            teardowns,
        })
    }

    fn teardown_graph(&self, subscriber: &Subscriber, graph_id: &str) -> GraphTeardown {
        let mut affected = subscriber.hook.affected(graph_id);
        affected.insert(graph_id.to_string());
        let graph_locks: Vec<Arc<Mutex<()>>> = {
            let mut locks = lock(&self.graph_locks);
            affected
                .iter()
                .map(|id| {
                    locks
                        .entry(id.clone())
                        .or_insert_with(|| Arc::new(Mutex::new(())))
                        .clone()
                })
                .collect()
        };
        // Acquired in sorted id order so overlapping teardowns cannot deadlock.
        let _guards: Vec<MutexGuard<'_, ()>> = graph_locks.iter().map(|m| lock(m)).collect();

        log::info!("{}: destroying {}", subscriber.id, graph_id);
        let outcome = match subscriber.hook.teardown(graph_id) {
            Ok(report) => {
                if !report.is_success() {
                    log::error!("Teardown of {graph_id} incomplete: {:?}", report.status());
                }
                TeardownOutcome::Destroyed(report)
            }
            Err(e) => {
                log::error!("Teardown of {graph_id} failed: {e}");
                TeardownOutcome::Error(e.to_string())
            }
        };

        GraphTeardown {
            graph_id: graph_id.to_string(),
            outcome,
        }
    }

    /// State of a rule
    pub fn state(&self, name: &str) -> MonitorState {
        lock(&self.rules)
            .get(name)
            .map_or(MonitorState::Unregistered, |entry| entry.state)
    }

    /// A registered rule, with the union of attached graphs
    pub fn rule(&self, name: &str) -> Option<BudgetRule> {
        lock(&self.rules).get(name).map(|entry| entry.rule.clone())
    }

    /// All registered rules
    pub fn rules(&self) -> Vec<BudgetRule> {
        lock(&self.rules)
            .values()
            .map(|entry| entry.rule.clone())
            .collect()
    }

    /// Number of registrations attached to a rule
    pub fn subscriber_count(&self, name: &str) -> usize {
        lock(&self.rules)
            .get(name)
            .map_or(0, |entry| entry.subscribers.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::types::Period;
    use declarative::{NodeOutcome, Operation};
    use std::thread;
    use std::time::Duration;

    fn rule(graph: &str) -> BudgetRule {
        BudgetRule::new("rag-budget", 100.0, "USD", Period::Daily).attach(graph)
    }

    fn destroyed(graph_id: &str) -> declarative::Result<RunReport> {
        let mut report = RunReport::new(graph_id, Operation::Destroy);
        report.push("node", "kind", NodeOutcome::Deleted);
        Ok(report)
    }

    /// Hook recording the graphs it destroyed
    #[derive(Default)]
    struct RecordingHook {
        destroyed: Mutex<Vec<String>>,
    }

    impl TeardownHook for RecordingHook {
        fn teardown(&self, graph_id: &str) -> declarative::Result<RunReport> {
            lock(&self.destroyed).push(graph_id.to_string());
            destroyed(graph_id)
        }
    }

    #[test]
    fn test_register_twice_one_rule_two_subscribers() {
        let backend = Arc::new(MemoryBackend::new());
        let monitor = BudgetMonitor::new(backend.clone());

        let first = monitor.register(rule("rag-compute"), Arc::new(destroyed)).unwrap();
        let second = monitor
            .register(rule("rag-ingestion"), Arc::new(destroyed))
            .unwrap();

        assert_eq!(first, Registration::Created);
        assert_eq!(second, Registration::Attached);
        assert_eq!(backend.rule_count(), 1);
        assert_eq!(monitor.subscriber_count("rag-budget"), 2);
        assert_eq!(backend.subscribers("rag-budget-alerts").len(), 2);

        let stored = backend.find_rule("rag-budget").unwrap().unwrap();
        assert_eq!(stored.attached_graph_ids.len(), 2);
        assert_eq!(monitor.state("rag-budget"), MonitorState::Registered);
    }

    #[test]
    fn test_register_attaches_to_backend_rule() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .create_rule(&BudgetRule::new("rag-budget", 50.0, "USD", Period::Monthly))
            .unwrap();

        // Fresh process: nothing registered locally yet
        let monitor = BudgetMonitor::new(backend.clone());
        let registration = monitor
            .register(rule("rag-compute"), Arc::new(destroyed))
            .unwrap();

        assert_eq!(registration, Registration::Attached);
        assert_eq!(backend.rule_count(), 1);
        // Existing threshold wins
        assert_eq!(monitor.rule("rag-budget").unwrap().threshold_amount, 50.0);
    }

    #[test]
    fn test_undiscoverable_rule_warns_and_tracks_locally() {
        let backend = Arc::new(MemoryBackend::new().with_hidden_rule("rag-budget"));
        let monitor = BudgetMonitor::new(backend.clone());

        let registration = monitor
            .register(rule("rag-compute"), Arc::new(destroyed))
            .unwrap();

        assert_eq!(registration, Registration::Unverified);
        assert_eq!(monitor.state("rag-budget"), MonitorState::Registered);
        assert!(backend.subscribers("rag-budget-alerts").is_empty());

        let report = monitor
            .notify(&BudgetAlert::new("rag-budget", 150.0))
            .unwrap();
        assert_eq!(report.teardowns.len(), 1);
    }

    #[test]
    fn test_undiscoverable_rule_strict_fails() {
        let backend = Arc::new(MemoryBackend::new().with_hidden_rule("rag-budget"));
        let monitor = BudgetMonitor::with_options(backend, MonitorOptions { strict: true });

        let err = monitor
            .register(rule("rag-compute"), Arc::new(destroyed))
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(monitor.state("rag-budget"), MonitorState::Unregistered);
    }

    #[test]
    fn test_invalid_rule_rejected() {
        let monitor = BudgetMonitor::new(Arc::new(MemoryBackend::new()));
        let bad = BudgetRule::new("rag-budget", -1.0, "USD", Period::Daily);
        assert!(matches!(
            monitor.register(bad, Arc::new(destroyed)),
            Err(Error::InvalidRule { .. })
        ));
    }

    #[test]
    fn test_notify_unknown_budget() {
        let monitor = BudgetMonitor::new(Arc::new(MemoryBackend::new()));
        assert!(matches!(
            monitor.notify(&BudgetAlert::new("nope", 1.0)),
            Err(Error::UnknownBudget { .. })
        ));
    }

    #[test]
    fn test_notify_within_threshold_does_nothing() {
        let monitor = BudgetMonitor::new(Arc::new(MemoryBackend::new()));
        let hook = Arc::new(RecordingHook::default());
        monitor.register(rule("rag-compute"), hook.clone()).unwrap();

        let report = monitor
            .notify(&BudgetAlert::new("rag-budget", 100.0))
            .unwrap();

        assert!(!report.triggered());
        assert!(report.teardowns.is_empty());
        assert!(lock(&hook.destroyed).is_empty());
        assert_eq!(monitor.state("rag-budget"), MonitorState::Registered);
    }

    #[test]
    fn test_notify_over_threshold_tears_down_all_subscribers() {
        let monitor = BudgetMonitor::new(Arc::new(MemoryBackend::new()));
        let compute = Arc::new(RecordingHook::default());
        let ingestion = Arc::new(RecordingHook::default());
        monitor.register(rule("rag-compute"), compute.clone()).unwrap();
        monitor
            .register(rule("rag-ingestion"), ingestion.clone())
            .unwrap();

        let report = monitor
            .notify(&BudgetAlert::new("rag-budget", 120.0))
            .unwrap();

        assert!(report.triggered());
        assert!(report.is_success());
        assert_eq!(*lock(&compute.destroyed), vec!["rag-compute"]);
        assert_eq!(*lock(&ingestion.destroyed), vec!["rag-ingestion"]);
        assert_eq!(monitor.state("rag-budget"), MonitorState::Triggered);
    }

    #[test]
    fn test_teardown_errors_are_reported() {
        let monitor = BudgetMonitor::new(Arc::new(MemoryBackend::new()));
        let failing = |_: &str| -> declarative::Result<RunReport> {
            Err(declarative::Error::state("database is locked"))
        };
        monitor.register(rule("rag-compute"), Arc::new(failing)).unwrap();

        let report = monitor
            .notify(&BudgetAlert::new("rag-budget", 500.0))
            .unwrap();

        assert_eq!(report.failed_graphs(), vec!["rag-compute"]);
        // The monitor keeps working
        assert!(monitor.notify(&BudgetAlert::new("rag-budget", 600.0)).is_ok());
    }

    #[test]
    fn test_concurrent_alerts_serialize_per_graph() {
        struct SlowHook {
            active: AtomicUsize,
            max_active: AtomicUsize,
            calls: AtomicUsize,
        }

        impl TeardownHook for SlowHook {
            fn teardown(&self, graph_id: &str) -> declarative::Result<RunReport> {
                let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_active.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(20));
                self.active.fetch_sub(1, Ordering::SeqCst);
                self.calls.fetch_add(1, Ordering::SeqCst);
                destroyed(graph_id)
            }
        }

        let monitor = BudgetMonitor::new(Arc::new(MemoryBackend::new()));
        let hook = Arc::new(SlowHook {
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        });
        monitor.register(rule("rag-compute"), hook.clone()).unwrap();

        thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    monitor
                        .notify(&BudgetAlert::new("rag-budget", 200.0))
                        .unwrap();
                });
            }
        });

        assert_eq!(hook.calls.load(Ordering::SeqCst), 4);
        assert_eq!(hook.max_active.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_teardown_of_producer_serializes_with_consumer() {
        /// Destroys "consumer" along with "producer", like a deployment
        /// tearing down dependents first
        #[derive(Default)]
        struct CascadingHook {
            active: Mutex<BTreeSet<String>>,
            overlaps: AtomicUsize,
            calls: AtomicUsize,
        }

        impl TeardownHook for CascadingHook {
            fn teardown(&self, graph_id: &str) -> declarative::Result<RunReport> {
                let touched = self.affected(graph_id);
                for id in &touched {
                    if !lock(&self.active).insert(id.clone()) {
                        self.overlaps.fetch_add(1, Ordering::SeqCst);
                    }
                }
                thread::sleep(Duration::from_millis(20));
                for id in &touched {
                    lock(&self.active).remove(id);
                }
                self.calls.fetch_add(1, Ordering::SeqCst);
                destroyed(graph_id)
            }

            fn affected(&self, graph_id: &str) -> BTreeSet<String> {
                let mut ids = BTreeSet::from([graph_id.to_string()]);
                if graph_id == "producer" {
                    ids.insert("consumer".to_string());
                }
                ids
            }
        }

        let monitor = BudgetMonitor::new(Arc::new(MemoryBackend::new()));
        let hook = Arc::new(CascadingHook::default());
        let producer = BudgetRule::new("producer-budget", 10.0, "USD", Period::Daily).attach("producer");
        let consumer = BudgetRule::new("consumer-budget", 10.0, "USD", Period::Daily).attach("consumer");
        monitor.register(producer, hook.clone()).unwrap();
        monitor.register(consumer, hook.clone()).unwrap();

        for _ in 0..5 {
            thread::scope(|scope| {
                scope.spawn(|| {
                    monitor
                        .notify(&BudgetAlert::new("producer-budget", 20.0))
                        .unwrap()
                });
                scope.spawn(|| {
                    monitor
                        .notify(&BudgetAlert::new("consumer-budget", 20.0))
                        .unwrap()
                });
            });
        }

        assert_eq!(hook.calls.load(Ordering::SeqCst), 10);
        assert_eq!(hook.overlaps.load(Ordering::SeqCst), 0);
    }
}
