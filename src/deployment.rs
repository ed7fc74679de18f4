//! Ordering and driving a deployment's graphs
//!
//! Graphs are ordered among themselves with the same dependency graph the
//! engine uses for nodes: a graph depends on every graph it consumes
//! outputs from. Apply walks that order forward, destroy walks it
//! backwards. A graph whose producer (apply) or consumer (destroy) did not
//! finish cleanly is not attempted.

use declarative::{
    CrossStackBinder, DependencyGraph, Error, Operation, ProgressCallback, Provisioner,
    ResourceNode, Result, RunReport, RunSummary, ValidatedGraph,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::blueprint::Blueprint;
use crate::config::DeployConfig;

const GRAPH_KIND: &str = "graph";

pub struct Deployment {
    blueprint: Blueprint,
    binder: Arc<CrossStackBinder>,
    /// Graph ids, producers first
    order: Vec<String>,
}

impl Deployment {
    /// Declare the deployment and order its graphs
    pub fn new(config: &DeployConfig) -> Result<Self> {
        let binder = Arc::new(CrossStackBinder::new());
        let blueprint = Blueprint::build(config, &binder)?;
        Self::from_blueprint(blueprint, binder)
    }

    /// Order the graphs of `blueprint` by the bindings registered in
    /// `binder`
    pub fn from_blueprint(blueprint: Blueprint, binder: Arc<CrossStackBinder>) -> Result<Self> {
        let known: BTreeSet<&str> = blueprint.graphs().iter().map(ValidatedGraph::id).collect();
        let mut stacks = DependencyGraph::new("deployment");

        for graph in blueprint.graphs() {
            let mut node = ResourceNode::new(graph.id(), GRAPH_KIND);
            for producer in binder.producers_of(graph.id()) {
                if !known.contains(producer.as_str()) {
                    return Err(Error::UnknownNode { id: producer });
                }
                node = node.depends_on(producer);
            }
            stacks.add_node(node)?;
        }

        let order = stacks
            .validate()?
            .topological_order()
            .into_iter()
            .map(str::to_string)
            .collect();

        Ok(Self {
            blueprint,
            binder,
            order,
        })
    }

    pub fn binder(&self) -> Arc<CrossStackBinder> {
        Arc::clone(&self.binder)
    }

    pub fn blueprint(&self) -> &Blueprint {
        &self.blueprint
    }

    /// Graph ids in apply order
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn graph(&self, id: &str) -> Option<&ValidatedGraph> {
        self.blueprint.graph(id)
    }

    /// Graphs to operate on, in apply order.
    ///
    /// `only` accepts a full graph id or its suffix after the deployment
    /// name (`compute` for `rag-demo-compute`).
    pub fn select(&self, only: Option<&str>) -> Result<Vec<&ValidatedGraph>> {
        let graphs: Vec<&ValidatedGraph> = self
            .order
            .iter()
            .filter_map(|id| self.blueprint.graph(id))
            .collect();

        let Some(wanted) = only else {
            return Ok(graphs);
        };
        let suffix = format!("-{wanted}");
        let selected: Vec<&ValidatedGraph> = graphs
            .into_iter()
            .filter(|g| g.id() == wanted || g.id().ends_with(&suffix))
            .collect();

        if selected.is_empty() {
            return Err(Error::config(
                "graph",
                format!("no graph named '{wanted}' (known: {})", self.order.join(", ")),
            ));
        }
        Ok(selected)
    }

    fn consumers_of(&self, producer: &str) -> Vec<&str> {
        self.order
            .iter()
            .filter(|id| self.binder.producers_of(id).contains(producer))
            .map(String::as_str)
            .collect()
    }

    /// Apply the selected graphs, producers first
    pub fn apply(
        &self,
        provisioner: &Provisioner,
        only: Option<&str>,
        progress: &dyn ProgressCallback,
    ) -> Result<Vec<RunReport>> {
        let graphs = self.select(only)?;
        let mut finished: HashMap<&str, bool> = HashMap::new();
        let mut reports = Vec::with_capacity(graphs.len());

        for graph in graphs {
            let blocked_by = self
                .binder
                .producers_of(graph.id())
                .into_iter()
                .find(|producer| finished.get(producer.as_str()) == Some(&false));

            let report = if let Some(producer) = blocked_by {
                log::warn!("Not applying {}: {producer} did not apply cleanly", graph.id());
                RunReport::aborted(
                    graph.id(),
                    Operation::Apply,
                    format!("producer graph {producer} did not apply cleanly"),
                )
            } else {
                log::info!("Applying graph {}", graph.id());
                provisioner.apply_with_progress(graph, progress)?
            };

            finished.insert(graph.id(), report.is_success());
            reports.push(report);
        }
        Ok(reports)
    }

    /// Destroy the selected graphs, consumers first.
    ///
    /// A graph is kept while any consumer graph still holds resources.
    pub fn destroy(
        &self,
        provisioner: &Provisioner,
        only: Option<&str>,
        progress: &dyn ProgressCallback,
    ) -> Result<Vec<RunReport>> {
        let mut graphs = self.select(only)?;
        graphs.reverse();
        let mut reports = Vec::with_capacity(graphs.len());

        for graph in graphs {
            let mut blocked_by = None;
            for consumer in self.consumers_of(graph.id()) {
                let holds_resources = provisioner
                    .store()
                    .entries(consumer)?
                    .iter()
                    .any(|entry| entry.holds_resource());
                if holds_resources {
                    blocked_by = Some(consumer);
                    break;
                }
            }

            let report = if let Some(consumer) = blocked_by {
                log::warn!("Not destroying {}: {consumer} still holds resources", graph.id());
                RunReport::aborted(
                    graph.id(),
                    Operation::Destroy,
                    format!("consumer graph {consumer} still holds resources"),
                )
            } else {
                log::info!("Destroying graph {}", graph.id());
                provisioner.destroy_with_progress(graph, progress)?
            };
            reports.push(report);
        }
        Ok(reports)
    }

    /// `graph_id` and every graph consuming it, transitively
    pub fn teardown_scope(&self, graph_id: &str) -> BTreeSet<String> {
        let mut scope = BTreeSet::from([graph_id.to_string()]);
        for id in &self.order {
            if self
                .binder
                .producers_of(id)
                .iter()
                .any(|producer| scope.contains(producer))
            {
                scope.insert(id.clone());
            }
        }
        scope
    }

    /// Destroy one graph after every graph consuming it, transitively.
    ///
    /// Returns the report of `graph_id`; it is aborted when a consumer
    /// could not be destroyed completely.
    pub fn teardown(
        &self,
        provisioner: &Provisioner,
        graph_id: &str,
        progress: &dyn ProgressCallback,
    ) -> Result<RunReport> {
        let graph = self
            .graph(graph_id)
            .ok_or_else(|| Error::UnknownNode {
                id: graph_id.to_string(),
            })?;

        let affected = self.teardown_scope(graph_id);
        for consumer in self.order.iter().rev().filter(|id| *id != graph_id) {
            if !affected.contains(consumer) {
                continue;
            }
            let Some(consumer_graph) = self.graph(consumer) else {
                continue;
            };
            log::info!("Destroying {consumer} before {graph_id}");
            let report = provisioner.destroy_with_progress(consumer_graph, progress)?;
            if !report.is_success() {
                return Ok(RunReport::aborted(
                    graph_id,
                    Operation::Destroy,
                    format!("consumer graph {consumer} could not be destroyed"),
                ));
            }
        }

        provisioner.destroy_with_progress(graph, progress)
    }
}

/// Outcome counts across several runs
pub fn summarize(reports: &[RunReport]) -> RunSummary {
    let mut summary = RunSummary::default();
    for report in reports {
        summary.merge(&report.summary());
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigFile, EnvOverrides};
    use crate::provider::SandboxProvider;
    use declarative::{MemoryStateStore, NoProgress, NodeOutcome, OutputRef, RunStatus, StateStore};
    use std::path::Path;

    const ECS: &str = r#"
[deployment]
name = "rag"
region = "us-east-1"
domain_name = "rag.example.com"
hosted_zone_id = "Z0123456789"

[identity]
enabled = true

[provisioner]
jobs = 2
"#;

    fn deployment(content: &str) -> (Deployment, Provisioner, Arc<SandboxProvider>) {
        let file = ConfigFile::parse(content).unwrap();
        let config = DeployConfig::resolve(file, &EnvOverrides::default(), Path::new(".")).unwrap();
        let deployment = Deployment::new(&config).unwrap();
        let sandbox = Arc::new(SandboxProvider::in_memory("us-east-1"));
        let provisioner = Provisioner::new(sandbox.clone(), Arc::new(MemoryStateStore::new()))
            .with_binder(deployment.binder())
            .with_options(config.provisioner);
        (deployment, provisioner, sandbox)
    }

    #[test]
    fn test_graph_order_follows_bindings() {
        let (deployment, _, _) = deployment(ECS);
        let order = deployment.order();
        let position = |id: &str| order.iter().position(|g| g == id).unwrap();

        assert!(position("rag-vector-store") < position("rag-ingestion"));
        assert!(position("rag-ingestion") < position("rag-compute"));
        assert!(position("rag-identity") < position("rag-compute"));
    }

    #[test]
    fn test_select_by_suffix() {
        let (deployment, _, _) = deployment(ECS);
        let selected = deployment.select(Some("compute")).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id(), "rag-compute");

        assert!(deployment.select(Some("rag-ingestion")).is_ok());
        assert!(deployment.select(Some("storage")).unwrap_err().is_preflight());
    }

    #[test]
    fn test_apply_then_destroy_everything() {
        let (deployment, provisioner, sandbox) = deployment(ECS);

        let reports = deployment.apply(&provisioner, None, &NoProgress).unwrap();
        assert_eq!(reports.len(), 4);
        assert!(reports.iter().all(RunReport::is_success));
        assert!(!sandbox.resources().is_empty());

        // The service received the index coordinates from other graphs.
        let service = provisioner.store().get("rag-compute", "service").unwrap().unwrap();
        let resource = &sandbox.resources()[service.physical_id.as_deref().unwrap()];
        assert_eq!(resource.config["index_name"], serde_json::json!("rag-index"));
        assert!(resource.config["queue_url"].as_str().unwrap().starts_with("https://queue-"));

        let again = deployment.apply(&provisioner, None, &NoProgress).unwrap();
        assert_eq!(summarize(&again).total_changes(), 0);

        let reports = deployment.destroy(&provisioner, None, &NoProgress).unwrap();
        assert_eq!(reports[0].graph_id, "rag-compute");
        assert!(reports.iter().all(RunReport::is_success));
        assert!(sandbox.resources().is_empty());
        assert!(provisioner.store().graphs().unwrap().is_empty());
    }

    #[test]
    fn test_consumer_fails_without_producer() {
        let (deployment, provisioner, sandbox) = deployment(ECS);

        let reports = deployment
            .apply(&provisioner, Some("ingestion"), &NoProgress)
            .unwrap();
        let report = &reports[0];
        assert!(matches!(
            report.outcome("indexer-function"),
            Some(NodeOutcome::Failed { .. })
        ));
        assert!(matches!(
            report.outcome("queue-trigger"),
            Some(NodeOutcome::Skipped { .. })
        ));
        assert_eq!(report.outcome("document-queue"), Some(&NodeOutcome::Created));
        assert!(sandbox.resources().keys().any(|id| id.starts_with("queue-")));
    }

    #[test]
    fn test_failed_producer_blocks_consumers() {
        let (deployment, provisioner, _) = deployment(ECS);
        // A binding to an output nobody publishes makes ingestion fail.
        deployment.binder().bind(
            "rag-vector-store",
            OutputRef::new("collection", "missing"),
            "rag-ingestion",
            OutputRef::new("indexer-function", "collection_endpoint"),
        );

        let reports = deployment.apply(&provisioner, None, &NoProgress).unwrap();
        let status = |id: &str| reports.iter().find(|r| r.graph_id == id).unwrap().status();

        assert_eq!(status("rag-vector-store"), RunStatus::Succeeded);
        assert!(matches!(status("rag-ingestion"), RunStatus::Partial { .. }));
        assert!(matches!(status("rag-compute"), RunStatus::Aborted { .. }));
        assert_eq!(status("rag-identity"), RunStatus::Succeeded);
    }

    #[test]
    fn test_teardown_destroys_consumers_first() {
        let (deployment, provisioner, sandbox) = deployment(ECS);
        deployment.apply(&provisioner, None, &NoProgress).unwrap();

        let report = deployment
            .teardown(&provisioner, "rag-vector-store", &NoProgress)
            .unwrap();
        assert!(report.is_success());
        assert_eq!(report.graph_id, "rag-vector-store");
        for graph in ["rag-vector-store", "rag-ingestion", "rag-compute"] {
            assert!(provisioner.store().entries(graph).unwrap().is_empty(), "{graph}");
        }
        // Identity does not consume the vector store.
        assert!(!provisioner.store().entries("rag-identity").unwrap().is_empty());
        assert!(sandbox.resources().keys().any(|id| id.starts_with("user-pool")));

        // Tearing down a consumer afterwards finds nothing left.
        let report = deployment
            .teardown(&provisioner, "rag-compute", &NoProgress)
            .unwrap();
        assert!(report.is_success());
        assert_eq!(report.summary().deleted, 0);
    }

    #[test]
    fn test_teardown_scope_includes_transitive_consumers() {
        let (deployment, _, _) = deployment(ECS);

        let scope: Vec<String> = deployment
            .teardown_scope("rag-vector-store")
            .into_iter()
            .collect();
        assert_eq!(scope, vec!["rag-compute", "rag-ingestion", "rag-vector-store"]);

        let scope = deployment.teardown_scope("rag-compute");
        assert_eq!(scope.len(), 1);
        assert!(scope.contains("rag-compute"));
    }

    #[test]
    fn test_cancelled_apply_changes_nothing() {
        let (deployment, provisioner, sandbox) = deployment(ECS);
        provisioner.cancel_token().cancel();

        let reports = deployment.apply(&provisioner, None, &NoProgress).unwrap();

        assert!(reports.iter().all(|r| !r.is_success()));
        assert!(sandbox.resources().is_empty());
        assert!(provisioner.store().graphs().unwrap().is_empty());
    }

    #[test]
    fn test_producer_kept_while_consumer_holds_resources() {
        let (deployment, provisioner, _) = deployment(ECS);
        deployment.apply(&provisioner, None, &NoProgress).unwrap();

        let reports = deployment
            .destroy(&provisioner, Some("vector-store"), &NoProgress)
            .unwrap();
        assert!(matches!(reports[0].status(), RunStatus::Aborted { .. }));
        assert!(!provisioner.store().entries("rag-vector-store").unwrap().is_empty());

        let reports = deployment
            .destroy(&provisioner, Some("compute"), &NoProgress)
            .unwrap();
        assert!(reports[0].is_success());
    }
}
