//! # costguard
//!
//! Budget rules that tear infrastructure down when spend crosses a
//! threshold.
//!
//! A rule is identified by name. Registering a rule that already exists
//! does not create a second one: the new subscriber is attached to the
//! existing rule and its graphs join the rule's attachment set. When an
//! alert reports spend above the threshold, every subscriber's graphs are
//! destroyed through its [`TeardownHook`].
//!
//! ## Example
//!
//! ```ignore
//! use costguard::{BudgetAlert, BudgetMonitor, BudgetRule, MemoryBackend, Period};
//! use std::sync::Arc;
//!
//! let monitor = BudgetMonitor::new(Arc::new(MemoryBackend::new()));
//! let rule = BudgetRule::new("rag-budget", 100.0, "USD", Period::Daily).attach("rag-compute");
//! monitor.register(rule, Arc::new(|graph: &str| provisioner.destroy(&graphs[graph])))?;
//!
//! let report = monitor.notify(&BudgetAlert::new("rag-budget", 120.0))?;
//! assert!(report.triggered());
//! ```
//!
//! ## Backends
//!
//! - `MemoryBackend`: in-process, for tests and single-run tooling
//! - the `ledger` crate stores rules in SQLite

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Backend implementations for budget rules.
pub mod backend;
/// Error types for budget operations.
pub mod error;
/// The budget monitor.
pub mod monitor;
/// Rules, alerts and reports.
pub mod types;

pub use backend::BudgetBackend;
pub use backend::memory::MemoryBackend;
pub use error::{Error, Result};
pub use monitor::{BudgetMonitor, SubscriberId, TeardownHook};
pub use types::{
    BudgetAlert, BudgetRule, GraphTeardown, MonitorOptions, MonitorState, Period, Registration,
    TeardownOutcome, TriggerReport,
};
