//! Provisioning engine - converges a validated graph wave by wave
//!
//! Nodes of one wave have no dependencies on each other and run in
//! parallel on a bounded rayon pool. A failed node only stops its own
//! dependent subtree; unrelated nodes keep going.

use crate::binder::CrossStackBinder;
use crate::context::{CancelToken, NoProgress, ProgressCallback};
use crate::diff::{ChangeKind, PlannedChange};
use crate::error::{Error, Result};
use crate::graph::ValidatedGraph;
use crate::node::{ResourceNode, config_hash};
use crate::provider::{CallContext, Provider, ProviderError};
use crate::retry::{LogCallback, with_retry};
use crate::state::{StateEntry, StateStore};
use crate::types::{NodeOutcome, NodeState, Operation, ProvisionOptions, RunReport};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Drives provider calls for validated graphs and records every
/// transition in the state store.
pub struct Provisioner {
    provider: Arc<dyn Provider>,
    store: Arc<dyn StateStore>,
    binder: Option<Arc<CrossStackBinder>>,
    options: ProvisionOptions,
    cancel: CancelToken,
}

impl Provisioner {
    /// Create a provisioner with default options
    pub fn new(provider: Arc<dyn Provider>, store: Arc<dyn StateStore>) -> Self {
        Self {
            provider,
            store,
            binder: None,
            options: ProvisionOptions::default(),
            cancel: CancelToken::new(),
        }
    }

    /// Resolve cross-graph inputs through `binder`
    pub fn with_binder(mut self, binder: Arc<CrossStackBinder>) -> Self {
        self.binder = Some(binder);
        self
    }

    pub fn with_options(mut self, options: ProvisionOptions) -> Self {
        self.options = options;
        self
    }

    /// Share an existing cancellation token
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels runs of this provisioner
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn binder(&self) -> Option<&Arc<CrossStackBinder>> {
        self.binder.as_ref()
    }

    pub fn options(&self) -> &ProvisionOptions {
        &self.options
    }

    /// Create or update every node of `graph`
    pub fn apply(&self, graph: &ValidatedGraph) -> Result<RunReport> {
        self.apply_with_progress(graph, &NoProgress)
    }

    /// Create or update every node of `graph`, reporting progress.
    ///
    /// Returns `Err` only for pre-flight problems; node failures are
    /// recorded in the report.
    pub fn apply_with_progress(
        &self,
        graph: &ValidatedGraph,
        progress: &dyn ProgressCallback,
    ) -> Result<RunReport> {
        let pool = self.pool()?;
        let mut report = RunReport::new(graph.id(), Operation::Apply);
        let mut done: HashMap<String, NodeOutcome> = HashMap::new();

        for (idx, wave) in graph.waves().iter().enumerate() {
            progress.on_wave_start(Operation::Apply, idx + 1, wave.len());
            let outcomes: Vec<NodeOutcome> = pool.install(|| {
                wave.par_iter()
                    .map(|node| self.apply_node(graph, node, &done, progress))
                    .collect()
            });
            for (node, outcome) in wave.iter().zip(outcomes) {
                report.push(node.id(), node.kind(), outcome.clone());
                done.insert(node.id().to_string(), outcome);
            }
        }

        // Consumers must not see outputs cached before this run.
        if let Some(binder) = &self.binder
            && report.summary().total_changes() > 0
        {
            binder.invalidate(graph.id());
        }

        progress.on_run_complete(&report);
        Ok(report)
    }

    /// Delete every node of `graph` that holds a resource
    pub fn destroy(&self, graph: &ValidatedGraph) -> Result<RunReport> {
        self.destroy_with_progress(graph, &NoProgress)
    }

    /// Delete every node of `graph`, dependents first, reporting progress
    pub fn destroy_with_progress(
        &self,
        graph: &ValidatedGraph,
        progress: &dyn ProgressCallback,
    ) -> Result<RunReport> {
        let pool = self.pool()?;
        let mut report = RunReport::new(graph.id(), Operation::Destroy);
        let mut done: HashMap<String, NodeOutcome> = HashMap::new();

        for (idx, wave) in graph.reverse_waves().iter().enumerate() {
            progress.on_wave_start(Operation::Destroy, idx + 1, wave.len());
            let outcomes: Vec<NodeOutcome> = pool.install(|| {
                wave.par_iter()
                    .map(|node| self.destroy_node(graph, node, &done, progress))
                    .collect()
            });
            for (node, outcome) in wave.iter().zip(outcomes) {
                report.push(node.id(), node.kind(), outcome.clone());
                done.insert(node.id().to_string(), outcome);
            }
        }

        if let Some(binder) = &self.binder {
            binder.invalidate(graph.id());
        }

        progress.on_run_complete(&report);
        Ok(report)
    }

    /// Preview what [`Provisioner::apply`] would do, without provider calls
    pub fn plan(&self, graph: &ValidatedGraph) -> Result<Vec<PlannedChange>> {
        let mut planned: HashMap<&str, ChangeKind> = HashMap::new();
        let mut changes = Vec::with_capacity(graph.len());

        for id in graph.topological_order() {
            let Some(node) = graph.node(id) else { continue };

            let changing_source = node.inputs().values().find(|source| {
                planned
                    .get(source.node.as_str())
                    .is_some_and(|c| *c != ChangeKind::NoChange)
            });

            let change = if let Some(source) = changing_source {
                PlannedChange::pending(node, format!("waits for {source}"))
            } else {
                match self.resolve_inputs(graph, node) {
                    Ok(resolved) => {
                        let hash = config_hash(node.kind(), &node.resolved_config(&resolved));
                        let entry = self.store.get(graph.id(), id)?;
                        PlannedChange::for_apply(node, entry.as_ref(), &hash)
                    }
                    Err(err @ Error::UnresolvedOutput { .. }) => {
                        PlannedChange::pending(node, err.to_string())
                    }
                    Err(err) => return Err(err),
                }
            };

            planned.insert(id, change.change);
            changes.push(change);
        }
        Ok(changes)
    }

    /// Preview what [`Provisioner::destroy`] would do
    pub fn plan_destroy(&self, graph: &ValidatedGraph) -> Result<Vec<PlannedChange>> {
        graph
            .reverse_order()
            .into_iter()
            .filter_map(|id| graph.node(id))
            .map(|node| -> Result<PlannedChange> {
                let entry = self.store.get(graph.id(), node.id())?;
                Ok(PlannedChange::for_destroy(node, entry.as_ref()))
            })
            .collect()
    }

    fn pool(&self) -> Result<rayon::ThreadPool> {
        if self.options.jobs == 0 {
            return Err(Error::config("provisioner.jobs", "must be at least 1"));
        }
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.jobs)
            .build()
            .map_err(|e| Error::config("provisioner.jobs", format!("failed to create thread pool: {e}")))
    }

    fn apply_node(
        &self,
        graph: &ValidatedGraph,
        node: &ResourceNode,
        done: &HashMap<String, NodeOutcome>,
        progress: &dyn ProgressCallback,
    ) -> NodeOutcome {
        let blocked_by = graph
            .dependencies(node.id())
            .into_iter()
            .find(|dep| !done.get(*dep).is_some_and(NodeOutcome::is_success));

        let outcome = if self.cancel.is_cancelled() {
            skipped("cancelled")
        } else if let Some(dep) = blocked_by {
            skipped(format!("blocked by {dep}"))
        } else {
            progress.on_node_start(graph.id(), node.id(), node.kind());
            self.converge(graph, node).unwrap_or_else(|err| NodeOutcome::Failed {
                error: err.to_string(),
            })
        };

        log_outcome(graph, node, &outcome);
        progress.on_node_complete(graph.id(), node.id(), &outcome);
        outcome
    }

    fn converge(&self, graph: &ValidatedGraph, node: &ResourceNode) -> Result<NodeOutcome> {
        let resolved = self.resolve_inputs(graph, node)?;
        let config = node.resolved_config(&resolved);
        let hash = config_hash(node.kind(), &config);

        let existing = self.store.get(graph.id(), node.id())?;
        if let Some(entry) = &existing
            && entry.is_created()
            && entry.config_hash == hash
        {
            return Ok(NodeOutcome::Unchanged);
        }

        let mut entry =
            existing.unwrap_or_else(|| StateEntry::new(graph.id(), node.id(), node.kind()));
        entry.kind = node.kind().to_string();
        let physical_id = entry.physical_id.clone();
        entry.transition(if physical_id.is_some() {
            NodeState::Updating
        } else {
            NodeState::Creating
        });
        self.store.put(&entry)?;

        let ctx = CallContext::new(graph.id(), node.id(), self.options.call_timeout);
        let create = || {
            with_retry(&self.options.retry, node.id(), Some(&LogCallback), |attempt| {
                self.provider
                    .create(node.kind(), &config, &ctx.with_attempt(attempt))
            })
        };

        let mut updating = physical_id.is_some();
        let mut result = match &physical_id {
            Some(id) => with_retry(&self.options.retry, node.id(), Some(&LogCallback), |attempt| {
                self.provider
                    .update(node.kind(), id, &config, &ctx.with_attempt(attempt))
            }),
            None => create(),
        };

        // Deleted outside rigger: the recorded id is stale, create it again.
        if updating
            && let Err(err) = &result
            && err.provider_error().is_some_and(ProviderError::is_not_found)
        {
            log::warn!(
                "{}/{}: {} no longer exists, creating it again",
                graph.id(),
                node.id(),
                physical_id.as_deref().unwrap_or_default()
            );
            updating = false;
            entry.physical_id = None;
            entry.outputs.clear();
            entry.transition(NodeState::Creating);
            self.store.put(&entry)?;
            result = create();
        }

        match result {
            Ok(provisioned) => {
                entry.physical_id = Some(provisioned.physical_id);
                entry.outputs = provisioned.outputs;
                entry.config_hash = hash;
                entry.transition(NodeState::Created);
                self.store.put(&entry)?;
                Ok(if updating {
                    NodeOutcome::Updated
                } else {
                    NodeOutcome::Created
                })
            }
            Err(err) => {
                entry.transition(NodeState::Failed);
                self.store.put(&entry)?;
                Err(err)
            }
        }
    }

    /// Input values from dependency outputs and cross-graph bindings
    fn resolve_inputs(
        &self,
        graph: &ValidatedGraph,
        node: &ResourceNode,
    ) -> Result<BTreeMap<String, String>> {
        let mut resolved = BTreeMap::new();

        for (key, source) in node.inputs() {
            let value = self
                .store
                .get(graph.id(), &source.node)?
                .filter(StateEntry::is_created)
                .and_then(|entry| entry.outputs.get(&source.key).cloned())
                .ok_or_else(|| Error::UnresolvedOutput {
                    graph: graph.id().to_string(),
                    node: source.node.clone(),
                    output: source.key.clone(),
                })?;
            resolved.insert(key.clone(), value);
        }

        if let Some(binder) = &self.binder {
            for (id, key) in binder.bindings_for(graph.id(), node.id()) {
                let value = binder.resolve(id, self.store.as_ref())?;
                resolved.insert(key, value);
            }
        }

        Ok(resolved)
    }

    fn destroy_node(
        &self,
        graph: &ValidatedGraph,
        node: &ResourceNode,
        done: &HashMap<String, NodeOutcome>,
        progress: &dyn ProgressCallback,
    ) -> NodeOutcome {
        let blocked_by = graph
            .dependents(node.id())
            .into_iter()
            .find(|dependent| !done.get(*dependent).is_some_and(NodeOutcome::is_success));

        let outcome = if self.cancel.is_cancelled() {
            skipped("cancelled")
        } else if let Some(dependent) = blocked_by {
            skipped(format!("dependent {dependent} still exists"))
        } else {
            progress.on_node_start(graph.id(), node.id(), node.kind());
            self.teardown(graph, node).unwrap_or_else(|err| NodeOutcome::Failed {
                error: err.to_string(),
            })
        };

        log_outcome(graph, node, &outcome);
        progress.on_node_complete(graph.id(), node.id(), &outcome);
        outcome
    }

    fn teardown(&self, graph: &ValidatedGraph, node: &ResourceNode) -> Result<NodeOutcome> {
        let Some(mut entry) = self.store.get(graph.id(), node.id())? else {
            return Ok(NodeOutcome::Absent);
        };
        let Some(physical_id) = entry.physical_id.clone() else {
            // Never confirmed by the provider, nothing to delete.
            self.store.remove(graph.id(), node.id())?;
            return Ok(NodeOutcome::Absent);
        };

        let kind = if entry.kind.is_empty() {
            node.kind().to_string()
        } else {
            entry.kind.clone()
        };
        entry.transition(NodeState::Deleting);
        self.store.put(&entry)?;

        let ctx = CallContext::new(graph.id(), node.id(), self.options.call_timeout);
        let result = with_retry(&self.options.retry, node.id(), Some(&LogCallback), |attempt| {
            match self.provider.delete(&kind, &physical_id, &ctx.with_attempt(attempt)) {
                Err(err) if err.is_not_found() => Ok(()),
                other => other,
            }
        });

        match result {
            Ok(()) => {
                entry.transition(NodeState::Deleted);
                self.store.remove(graph.id(), node.id())?;
                Ok(NodeOutcome::Deleted)
            }
            Err(err) => {
                entry.transition(NodeState::Failed);
                self.store.put(&entry)?;
                Err(err)
            }
        }
    }
}

fn skipped(reason: impl Into<String>) -> NodeOutcome {
    NodeOutcome::Skipped {
        reason: reason.into(),
    }
}

fn log_outcome(graph: &ValidatedGraph, node: &ResourceNode, outcome: &NodeOutcome) {
    match outcome {
        NodeOutcome::Failed { error } => {
            log::error!("{}/{} ({}): {}", graph.id(), node.id(), node.kind(), error);
        }
        NodeOutcome::Skipped { reason } => {
            log::info!("{}/{}: skipped, {}", graph.id(), node.id(), reason);
        }
        other => log::info!("{}/{}: {}", graph.id(), node.id(), other.label()),
    }
}
