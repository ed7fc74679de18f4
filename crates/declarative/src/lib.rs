//! # Declarative
//!
//! A vendor-agnostic engine for declarative infrastructure.
//!
//! Resources are declared as nodes of a dependency graph. The engine
//! validates the graph, converges it against a [`Provider`] with
//! idempotent apply and destroy, and records what exists in a
//! [`StateStore`].
//!
//! ## Core Concepts
//!
//! - **ResourceNode**: one declarative unit (kind, desired config, dependencies)
//! - **DependencyGraph**: nodes and edges; `validate()` yields a [`ValidatedGraph`]
//! - **Provisioner**: applies or destroys a validated graph wave by wave
//! - **StateStore**: durable per-node record (physical id, config hash, outputs)
//! - **CrossStackBinder**: deferred references from one graph's outputs to another's inputs
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{
//!     DependencyGraph, MemoryStateStore, OutputRef, Provisioner, ResourceNode,
//! };
//! use std::sync::Arc;
//!
//! let mut graph = DependencyGraph::new("ingestion");
//! graph.add_node(ResourceNode::new("queue", "queue"))?;
//! graph.add_node(
//!     ResourceNode::new("indexer", "function")
//!         .with_config("memory", 512)
//!         .with_input("queue_arn", OutputRef::new("queue", "arn")),
//! )?;
//! let graph = graph.validate()?;
//!
//! let provisioner = Provisioner::new(Arc::new(my_provider), Arc::new(MemoryStateStore::new()));
//! let report = provisioner.apply(&graph)?;
//! assert!(report.is_success());
//!
//! // Nothing changed, so no provider calls this time
//! let again = provisioner.apply(&graph)?;
//! assert_eq!(again.summary().total_changes(), 0);
//! ```
//!
//! ## Extension Traits
//!
//! - [`Provider`]: creates, updates and deletes resources of a kind
//! - [`StateStore`]: persists state entries
//! - [`ProgressCallback`]: receives progress updates
//! - [`RetryCallback`]: observes retries of transient provider errors

pub mod binder;
pub mod context;
pub mod diff;
pub mod error;
pub mod graph;
pub mod node;
pub mod provider;
pub mod provisioner;
pub mod retry;
pub mod state;
pub mod types;

// Re-export main types at crate root
pub use binder::{BindingId, CrossStackBinder, CrossStackBinding};
pub use context::{CancelToken, NoProgress, ProgressCallback};
pub use diff::{ChangeKind, PlanSummary, PlannedChange, group_by_kind};
pub use error::{Error, ErrorClass, Result};
pub use graph::{DependencyGraph, ValidatedGraph};
pub use node::{Config, OutputRef, ResourceNode, config_hash};
pub use provider::{CallContext, ErrorCategory, Provider, ProviderError, Provisioned};
pub use provisioner::Provisioner;
pub use retry::{LogCallback, NoCallback, RetryCallback, with_retry};
pub use state::{MemoryStateStore, StateEntry, StateStore};
pub use types::{
    NodeOutcome, NodeReport, NodeState, Operation, ProvisionOptions, RetryConfig, RunReport,
    RunStatus, RunSummary,
};
