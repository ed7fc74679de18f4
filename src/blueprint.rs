//! The RAG demo environment as resource graphs
//!
//! A deployment named `<n>` is split into up to four graphs:
//!
//! - `<n>-vector-store`: roles, collection policies, the vector collection
//!   and its index
//! - `<n>-ingestion`: document queue and the indexer function it triggers
//! - `<n>-identity`: user pool, domain and client (only when enabled)
//! - `<n>-compute`: the application on ECS or EKS
//!
//! Values flowing between graphs are registered as cross-stack bindings;
//! the budget rule, when configured, is attached to every graph.

use costguard::BudgetRule;
use declarative::{
    CrossStackBinder, DependencyGraph, OutputRef, ResourceNode, Result, ValidatedGraph,
};

use crate::config::{Architecture, DeployConfig, PlatformConfig};
use crate::kind::ResourceKind;

pub const VECTOR_STORE: &str = "vector-store";
pub const INGESTION: &str = "ingestion";
pub const IDENTITY: &str = "identity";
pub const COMPUTE: &str = "compute";

const EMBEDDING_DIMENSIONS: i64 = 1024;
const VECTOR_FIELD: &str = "vector_field";

fn node(id: &str, kind: ResourceKind) -> ResourceNode {
    ResourceNode::new(id, kind.as_str())
}

fn input(node: &str, key: &str) -> OutputRef {
    OutputRef::new(node, key)
}

/// Graphs and budget rule of one deployment
#[derive(Debug)]
pub struct Blueprint {
    graphs: Vec<ValidatedGraph>,
    budget: Option<BudgetRule>,
}

impl Blueprint {
    /// Declare the deployment's graphs and register their bindings with
    /// `binder`
    pub fn build(config: &DeployConfig, binder: &CrossStackBinder) -> Result<Self> {
        let builder = Builder { config, binder };

        let mut graphs = vec![builder.vector_store()?, builder.ingestion()?];
        if config.identity.enabled {
            graphs.push(builder.identity()?);
        }
        graphs.push(builder.compute()?);

        let budget = config.budget.clone().map(|rule| {
            graphs
                .iter()
                .fold(rule, |rule, graph| rule.attach(graph.id()))
        });

        Ok(Self { graphs, budget })
    }

    /// Graphs in declaration order
    pub fn graphs(&self) -> &[ValidatedGraph] {
        &self.graphs
    }

    pub fn graph(&self, id: &str) -> Option<&ValidatedGraph> {
        self.graphs.iter().find(|g| g.id() == id)
    }

    /// Budget rule with every graph attached
    pub fn budget(&self) -> Option<&BudgetRule> {
        self.budget.as_ref()
    }
}

struct Builder<'a> {
    config: &'a DeployConfig,
    binder: &'a CrossStackBinder,
}

impl Builder<'_> {
    fn id(&self, suffix: &str) -> String {
        self.config.graph_id(suffix)
    }

    /// Resource name scoped to the deployment
    fn name(&self, suffix: &str) -> String {
        format!("{}-{}", self.config.name, suffix)
    }

    fn bind(&self, producer: &str, output: OutputRef, consumer: &str, consumer_input: OutputRef) {
        self.binder
            .bind(self.id(producer), output, self.id(consumer), consumer_input);
    }

    fn vector_store(&self) -> Result<ValidatedGraph> {
        let collection_name = self.name("vectors");
        let mut graph = DependencyGraph::new(self.id(VECTOR_STORE));

        graph.add_node(
            node("access-role", ResourceKind::Role)
                .with_config("name", self.name("collection-access"))
                .with_config("service", "aoss.amazonaws.com"),
        )?;
        graph.add_node(
            node("index-function-role", ResourceKind::Role)
                .with_config("name", self.name("index-function"))
                .with_config("service", "lambda.amazonaws.com"),
        )?;
        graph.add_node(
            node("encryption-policy", ResourceKind::EncryptionPolicy)
                .with_config("name", self.name("encryption"))
                .with_config("collection", collection_name.as_str())
                .with_config("aws_owned_key", true),
        )?;
        graph.add_node(
            node("network-policy", ResourceKind::NetworkPolicy)
                .with_config("name", self.name("network"))
                .with_config("collection", collection_name.as_str())
                .with_config("allow_from_public", true),
        )?;
        graph.add_node(
            node("data-access-policy", ResourceKind::DataAccessPolicy)
                .with_config("name", self.name("data-access"))
                .with_config("collection", collection_name.as_str())
                .with_input("access_role_arn", input("access-role", "arn"))
                .with_input("index_role_arn", input("index-function-role", "arn")),
        )?;

        let mut collection = node("collection", ResourceKind::Collection)
            .with_config("name", collection_name.as_str())
            .with_config("type", "VECTORSEARCH")
            .depends_on("encryption-policy")
            .depends_on("network-policy")
            .depends_on("data-access-policy");

        if self.config.identity.enabled
            && let Some(metadata) = &self.config.identity.saml_metadata
        {
            graph.add_node(
                node("saml-config", ResourceKind::SamlConfig)
                    .with_config("name", self.name("saml"))
                    .with_config("metadata", metadata.as_str()),
            )?;
            collection = collection.depends_on("saml-config");
        }
        graph.add_node(collection)?;

        graph.add_node(
            node("index-function", ResourceKind::Function)
                .with_config("name", self.name("create-index"))
                .with_config("runtime", "python3.12")
                .with_config("handler", "index.handler")
                .with_input("role_arn", input("index-function-role", "arn")),
        )?;
        graph.add_node(
            node("vector-index", ResourceKind::VectorIndex)
                .with_config("index_name", self.name("index"))
                .with_config("field_name", VECTOR_FIELD)
                .with_config("dimensions", EMBEDDING_DIMENSIONS)
                .with_input("collection_endpoint", input("collection", "endpoint"))
                .with_input("function_arn", input("index-function", "arn")),
        )?;

        graph.validate()
    }

    /// Bind the vector-store outputs every consumer of the index needs
    fn bind_index(&self, consumer: &str, consumer_node: &str) {
        let outputs = [
            ("collection", "endpoint", "collection_endpoint"),
            ("vector-index", "index_name", "index_name"),
            ("vector-index", "field_name", "field_name"),
        ];
        for (producer_node, key, input_key) in outputs {
            self.bind(
                VECTOR_STORE,
                input(producer_node, key),
                consumer,
                input(consumer_node, input_key),
            );
        }
    }

    fn ingestion(&self) -> Result<ValidatedGraph> {
        let mut graph = DependencyGraph::new(self.id(INGESTION));

        graph.add_node(
            node("document-queue", ResourceKind::Queue)
                .with_config("name", self.name("documents"))
                .with_config("visibility_timeout_secs", 900),
        )?;
        graph.add_node(
            node("indexer-role", ResourceKind::Role)
                .with_config("name", self.name("indexer"))
                .with_config("service", "lambda.amazonaws.com"),
        )?;
        graph.add_node(
            node("indexer-function", ResourceKind::Function)
                .with_config("name", self.name("indexer"))
                .with_config("runtime", "python3.12")
                .with_config("handler", "indexer.handler")
                .with_config("region", self.config.region.as_str())
                .with_input("role_arn", input("indexer-role", "arn")),
        )?;
        self.bind_index(INGESTION, "indexer-function");

        graph.add_node(
            node("queue-trigger", ResourceKind::EventSourceMapping)
                .with_config("batch_size", 10)
                .with_input("queue_arn", input("document-queue", "arn"))
                .with_input("function_arn", input("indexer-function", "arn")),
        )?;

        graph.validate()
    }

    fn identity(&self) -> Result<ValidatedGraph> {
        let mut graph = DependencyGraph::new(self.id(IDENTITY));

        graph.add_node(
            node("user-pool", ResourceKind::UserPool)
                .with_config("name", self.name("users"))
                .with_config("self_sign_up", false),
        )?;
        graph.add_node(
            node("user-pool-domain", ResourceKind::UserPoolDomain)
                .with_config("prefix", self.config.identity.user_pool_domain_prefix.as_str())
                .with_input("user_pool_id", input("user-pool", "id")),
        )?;

        let mut client = node("user-pool-client", ResourceKind::UserPoolClient)
            .with_config("name", self.name("app"))
            .with_config("generate_secret", true)
            .with_input("user_pool_id", input("user-pool", "id"));
        if let PlatformConfig::Ecs { domain_name, .. } = &self.config.platform {
            client = client.with_config(
                "callback_url",
                format!("https://{domain_name}/oauth2/idpresponse"),
            );
        }
        graph.add_node(client)?;

        graph.validate()
    }

    fn compute(&self) -> Result<ValidatedGraph> {
        let mut graph = DependencyGraph::new(self.id(COMPUTE));

        graph.add_node(
            node("vpc", ResourceKind::Vpc)
                .with_config("cidr", "10.0.0.0/16")
                .with_config("max_azs", 2),
        )?;

        match &self.config.platform {
            PlatformConfig::Ecs {
                domain_name,
                hosted_zone_id,
            } => self.ecs(&mut graph, domain_name, hosted_zone_id)?,
            PlatformConfig::Eks {
                masters_role_arn,
                user_role_arn,
            } => self.eks(&mut graph, masters_role_arn, user_role_arn.as_deref())?,
        }

        graph.validate()
    }

    fn ecs(&self, graph: &mut DependencyGraph, domain_name: &str, hosted_zone_id: &str) -> Result<()> {
        let arch = self.config.architecture;

        graph.add_node(
            node("cluster", ResourceKind::EcsCluster)
                .with_config("name", self.name("cluster"))
                .with_input("vpc_id", input("vpc", "id")),
        )?;
        graph.add_node(
            node("certificate", ResourceKind::Certificate)
                .with_config("domain_name", domain_name)
                .with_config("hosted_zone_id", hosted_zone_id),
        )?;
        graph.add_node(
            node("app-image", ResourceKind::ContainerImage)
                .with_config("repository", self.name("app"))
                .with_config("platform", container_platform(arch)),
        )?;
        graph.add_node(
            node("service", ResourceKind::FargateService)
                .with_config("name", self.name("app"))
                .with_config("cpu", 1024)
                .with_config("memory_mib", 2048)
                .with_config("desired_count", 1)
                .with_config("architecture", arch.as_str())
                .with_config("region", self.config.region.as_str())
                .with_config("domain_name", domain_name)
                .with_input("cluster_arn", input("cluster", "arn"))
                .with_input("certificate_arn", input("certificate", "arn"))
                .with_input("image_uri", input("app-image", "uri")),
        )?;
        self.bind_index(COMPUTE, "service");
        self.bind(
            INGESTION,
            input("document-queue", "url"),
            COMPUTE,
            input("service", "queue_url"),
        );

        if self.config.identity.enabled {
            graph.add_node(
                node("listener-rule", ResourceKind::ListenerRule)
                    .with_config("priority", 10)
                    .with_config("action", "authenticate-cognito")
                    .with_input("listener_arn", input("service", "listener_arn")),
            )?;
            let outputs = [
                ("user-pool", "arn", "user_pool_arn"),
                ("user-pool-client", "client_id", "user_pool_client_id"),
                ("user-pool-domain", "domain", "user_pool_domain"),
            ];
            for (producer_node, key, input_key) in outputs {
                self.bind(
                    IDENTITY,
                    input(producer_node, key),
                    COMPUTE,
                    input("listener-rule", input_key),
                );
            }
        }
        Ok(())
    }

    fn eks(
        &self,
        graph: &mut DependencyGraph,
        masters_role_arn: &str,
        user_role_arn: Option<&str>,
    ) -> Result<()> {
        let arch = self.config.architecture;

        let mut cluster = node("cluster", ResourceKind::EksCluster)
            .with_config("name", self.name("cluster"))
            .with_config("version", "1.30")
            .with_config("masters_role_arn", masters_role_arn)
            .with_input("vpc_id", input("vpc", "id"));
        if let Some(arn) = user_role_arn {
            cluster = cluster.with_config("user_role_arn", arn);
        }
        graph.add_node(cluster)?;

        let (instance_type, ami_type) = match arch {
            Architecture::X86_64 => ("m5.large", "AL2_x86_64"),
            Architecture::Arm64 => ("m6g.large", "AL2_ARM_64"),
        };
        graph.add_node(
            node("nodegroup", ResourceKind::Nodegroup)
                .with_config("instance_type", instance_type)
                .with_config("ami_type", ami_type)
                .with_config("desired_size", 2)
                .with_input("cluster_name", input("cluster", "name")),
        )?;
        graph.add_node(
            node("service-account", ResourceKind::ServiceAccount)
                .with_config("name", "rag-app")
                .with_config("namespace", "default")
                .with_config(
                    "actions",
                    serde_json::json!(["bedrock:InvokeModel", "sqs:SendMessage"]),
                )
                .with_input("cluster_name", input("cluster", "name")),
        )?;
        self.bind(
            INGESTION,
            input("document-queue", "arn"),
            COMPUTE,
            input("service-account", "queue_arn"),
        );

        graph.add_node(
            node("app-deployment", ResourceKind::K8sDeployment)
                .with_config("name", self.name("app"))
                .with_config("replicas", 2)
                .with_config("platform", container_platform(arch))
                .with_config("region", self.config.region.as_str())
                .depends_on("nodegroup")
                .with_input("cluster_endpoint", input("cluster", "endpoint"))
                .with_input("service_account", input("service-account", "name")),
        )?;
        self.bind_index(COMPUTE, "app-deployment");
        self.bind(
            INGESTION,
            input("document-queue", "url"),
            COMPUTE,
            input("app-deployment", "queue_url"),
        );
        Ok(())
    }
}

fn container_platform(arch: Architecture) -> &'static str {
    match arch {
        Architecture::X86_64 => "linux/amd64",
        Architecture::Arm64 => "linux/arm64",
    }
}
