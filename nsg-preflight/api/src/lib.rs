//! Wire types for the cloud control API and the [`ControlApi`] boundary used by discovery,
//! validation and remediation.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod cluster;
pub mod network;
pub mod security_rule;
mod snapshot;

pub use self::{
    cluster::{Cluster, NodePool},
    network::{NetworkSecurityGroup, Subnet},
    security_rule::{RuleConversionError, SecurityRule},
    snapshot::{Snapshot, SnapshotApi},
};
use anyhow::Result;

/// Models the cloud control API: read-only lookups of clusters, node pools, subnets and security
/// groups, plus the single rule-creation mutation.
#[async_trait::async_trait]
pub trait ControlApi: Send + Sync {
    async fn get_cluster(&self, cluster_id: &str) -> Result<Cluster>;

    async fn list_node_pools(&self, cluster_id: &str) -> Result<Vec<NodePool>>;

    async fn get_subnet(&self, subnet_id: &str) -> Result<Subnet>;

    async fn get_network_security_group(&self, nsg_id: &str) -> Result<NetworkSecurityGroup>;

    async fn list_security_rules(&self, nsg_id: &str) -> Result<Vec<SecurityRule>>;

    /// Adds rules to a security group, returning the rules as created.
    ///
    /// Not idempotent: callers must not submit the same rule twice.
    async fn add_security_rules(
        &self,
        nsg_id: &str,
        rules: Vec<SecurityRule>,
    ) -> Result<Vec<SecurityRule>>;
}

#[async_trait::async_trait]
impl<A: ControlApi + ?Sized> ControlApi for std::sync::Arc<A> {
    async fn get_cluster(&self, cluster_id: &str) -> Result<Cluster> {
        (**self).get_cluster(cluster_id).await
    }

    async fn list_node_pools(&self, cluster_id: &str) -> Result<Vec<NodePool>> {
        (**self).list_node_pools(cluster_id).await
    }

    async fn get_subnet(&self, subnet_id: &str) -> Result<Subnet> {
        (**self).get_subnet(subnet_id).await
    }

    async fn get_network_security_group(&self, nsg_id: &str) -> Result<NetworkSecurityGroup> {
        (**self).get_network_security_group(nsg_id).await
    }

    async fn list_security_rules(&self, nsg_id: &str) -> Result<Vec<SecurityRule>> {
        (**self).list_security_rules(nsg_id).await
    }

    async fn add_security_rules(
        &self,
        nsg_id: &str,
        rules: Vec<SecurityRule>,
    ) -> Result<Vec<SecurityRule>> {
        (**self).add_security_rules(nsg_id, rules).await
    }
}
