//! Resource kinds declared by the blueprint
//!
//! The engine treats a kind as an opaque name; this enum is the closed set
//! the binary declares, with the outputs each kind publishes.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Role,
    EncryptionPolicy,
    NetworkPolicy,
    DataAccessPolicy,
    SamlConfig,
    Collection,
    Function,
    VectorIndex,
    Queue,
    EventSourceMapping,
    UserPool,
    UserPoolDomain,
    UserPoolClient,
    Vpc,
    EcsCluster,
    Certificate,
    ContainerImage,
    FargateService,
    ListenerRule,
    EksCluster,
    Nodegroup,
    ServiceAccount,
    K8sDeployment,
}

impl ResourceKind {
    pub const ALL: [Self; 23] = [
        Self::Role,
        Self::EncryptionPolicy,
        Self::NetworkPolicy,
        Self::DataAccessPolicy,
        Self::SamlConfig,
        Self::Collection,
        Self::Function,
        Self::VectorIndex,
        Self::Queue,
        Self::EventSourceMapping,
        Self::UserPool,
        Self::UserPoolDomain,
        Self::UserPoolClient,
        Self::Vpc,
        Self::EcsCluster,
        Self::Certificate,
        Self::ContainerImage,
        Self::FargateService,
        Self::ListenerRule,
        Self::EksCluster,
        Self::Nodegroup,
        Self::ServiceAccount,
        Self::K8sDeployment,
    ];

    /// Canonical name passed to the engine and the provider
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Role => "role",
            Self::EncryptionPolicy => "encryption-policy",
            Self::NetworkPolicy => "network-policy",
            Self::DataAccessPolicy => "data-access-policy",
            Self::SamlConfig => "saml-config",
            Self::Collection => "collection",
            Self::Function => "function",
            Self::VectorIndex => "vector-index",
            Self::Queue => "queue",
            Self::EventSourceMapping => "event-source-mapping",
            Self::UserPool => "user-pool",
            Self::UserPoolDomain => "user-pool-domain",
            Self::UserPoolClient => "user-pool-client",
            Self::Vpc => "vpc",
            Self::EcsCluster => "ecs-cluster",
            Self::Certificate => "certificate",
            Self::ContainerImage => "container-image",
            Self::FargateService => "fargate-service",
            Self::ListenerRule => "listener-rule",
            Self::EksCluster => "eks-cluster",
            Self::Nodegroup => "nodegroup",
            Self::ServiceAccount => "service-account",
            Self::K8sDeployment => "k8s-deployment",
        }
    }

    /// Output keys a resource of this kind publishes once created
    pub fn outputs(&self) -> &'static [&'static str] {
        match self {
            Self::Role => &["arn", "name"],
            Self::EncryptionPolicy | Self::NetworkPolicy | Self::DataAccessPolicy => &["name"],
            Self::SamlConfig => &["id"],
            Self::Collection => &["arn", "name", "endpoint"],
            Self::Function => &["arn", "name"],
            Self::VectorIndex => &["index_name", "field_name"],
            Self::Queue => &["arn", "url", "name"],
            Self::EventSourceMapping => &["id"],
            Self::UserPool => &["id", "arn"],
            Self::UserPoolDomain => &["domain"],
            Self::UserPoolClient => &["client_id"],
            Self::Vpc => &["id"],
            Self::EcsCluster => &["arn", "name"],
            Self::Certificate => &["arn"],
            Self::ContainerImage => &["uri"],
            Self::FargateService => &["arn", "url", "listener_arn"],
            Self::ListenerRule => &["arn"],
            Self::EksCluster => &["arn", "name", "endpoint"],
            Self::Nodegroup => &["arn"],
            Self::ServiceAccount => &["name", "role_arn"],
            Self::K8sDeployment => &["name", "url"],
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown resource kind '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for kind in ResourceKind::ALL {
            assert_eq!(kind.as_str().parse::<ResourceKind>().unwrap(), kind);
            assert!(!kind.outputs().is_empty());
        }
        assert!("bucket".parse::<ResourceKind>().is_err());
    }
}
