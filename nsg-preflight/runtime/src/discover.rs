use crate::call::{CallError, CallOptions};
use nsg_preflight_api::{Cluster, ControlApi, NodePool};
use nsg_preflight_core::{
    topology::{Fact, TopologyFact},
    ClusterNetworkTopology, IpNet, PodNetworking, Role, SecurityGroupContext,
};
use std::{future::Future, sync::Arc};
use tracing::{debug, info, instrument};

/// Caller-supplied facts that take precedence over discovered ones.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TopologyHints {
    pub cluster_id: String,

    /// Security groups the new node will carry. When empty, the node pool's groups are used.
    pub worker_nsgs: Vec<String>,

    /// Pod security groups the new node will attach with native pod networking. When empty and
    /// no worker groups are supplied, the node pool's pod groups are used.
    pub pod_nsgs: Vec<String>,

    /// The new node's subnet. When unset, the node pool's first placement subnet is used.
    pub worker_subnet: Option<String>,

    /// The node pool, by id or name, the new node joins. When unset, the first pool is used.
    pub node_pool: Option<String>,

    pub services_network: Option<String>,
}

/// Resolves a cluster's network topology from the control API.
///
/// Lookup failures leave the affected fact unresolved and are recorded as gaps; discovery only
/// stops early when a call is cancelled or times out, returning what was resolved so far.
#[derive(Clone)]
pub struct Discovery {
    api: Arc<dyn ControlApi>,
    options: CallOptions,
}

type Lookup<T> = Result<anyhow::Result<T>, CallError>;

// === impl Discovery ===

impl Discovery {
    pub fn new(api: Arc<dyn ControlApi>, options: CallOptions) -> Self {
        Self { api, options }
    }

    #[instrument(skip(self, hints), fields(cluster = %hints.cluster_id))]
    pub async fn discover(&self, hints: &TopologyHints) -> ClusterNetworkTopology {
        let mut topology = ClusterNetworkTopology::new(&hints.cluster_id);
        topology.services_network = hints.services_network.clone();

        match self.discover_into(&mut topology, hints).await {
            Ok(()) => topology.record_unresolved("not discovered"),
            Err(error) => {
                tracing::warn!(%error, "Discovery interrupted");
                topology.record_unresolved(&format!("discovery interrupted: {}", error));
            }
        }

        info!(
            control_plane = topology.control_plane.len(),
            workers = topology.workers.len(),
            pod_networking = %topology.pod_networking,
            gaps = topology.gaps.len(),
            "Discovered topology"
        );
        topology
    }

    async fn discover_into(
        &self,
        topology: &mut ClusterNetworkTopology,
        hints: &TopologyHints,
    ) -> Result<(), CallError> {
        match self.lookup(self.api.get_cluster(&hints.cluster_id)).await? {
            Ok(cluster) => self.discover_control_plane(topology, &cluster).await?,
            Err(error) => topology.record_gap(TopologyFact::Cluster, error),
        }

        let pools = match self
            .lookup(self.api.list_node_pools(&hints.cluster_id))
            .await?
        {
            Ok(pools) => pools,
            Err(error) => {
                topology.record_gap(TopologyFact::NodePools, error);
                vec![]
            }
        };

        let pool = match &hints.node_pool {
            Some(selector) => {
                let pool = pools.iter().find(|pool| {
                    pool.id == *selector || pool.name.as_deref() == Some(selector.as_str())
                });
                if pool.is_none() {
                    topology.record_gap(
                        TopologyFact::NodePools,
                        format!("node pool {} not found", selector),
                    );
                }
                pool
            }
            None => pools.first(),
        };
        if let Some(pool) = pool {
            debug!(pool = %pool.display_name(), "Selected node pool");
        }

        self.discover_workers(topology, hints, pool).await?;

        if topology.pod_networking == PodNetworking::Native {
            discover_pods(topology, &pools);
        }
        topology.node_pod_security_groups = if !hints.pod_nsgs.is_empty() {
            hints.pod_nsgs.clone()
        } else if hints.worker_nsgs.is_empty()
            && topology.pod_networking == PodNetworking::Native
        {
            pool.and_then(NodePool::pod_network)
                .map(|pod| pod.pod_nsg_ids.clone())
                .unwrap_or_default()
        } else {
            vec![]
        };

        Ok(())
    }

    async fn discover_control_plane(
        &self,
        topology: &mut ClusterNetworkTopology,
        cluster: &Cluster,
    ) -> Result<(), CallError> {
        let config = cluster.endpoint_config.clone().unwrap_or_default();

        topology.control_plane = self.resolve_groups(&config.nsg_ids, Role::ControlPlane).await?;
        if topology.control_plane.is_empty() {
            topology.record_gap(
                TopologyFact::ControlPlaneSecurityGroups,
                "the cluster endpoint has no security groups",
            );
        }

        topology.endpoint = cluster.private_endpoint_addr();
        if topology.endpoint.is_none() {
            topology.record_gap(TopologyFact::Endpoint, "the cluster has no private endpoint");
        }

        let cidr = match &config.subnet_id {
            Some(subnet) => self.subnet_cidr(subnet).await?,
            None => Err("the cluster endpoint has no subnet".to_string()),
        };
        topology.control_plane_cidr = match (cidr, topology.endpoint) {
            (Ok(net), _) => Fact::Known(net),
            (Err(reason), Some(endpoint)) => {
                topology.record_gap(
                    TopologyFact::ControlPlaneCidr,
                    format!("{}; using the endpoint address {}", reason, endpoint),
                );
                Fact::Degraded(IpNet::from(endpoint))
            }
            (Err(reason), None) => {
                topology.record_gap(TopologyFact::ControlPlaneCidr, reason);
                Fact::Missing
            }
        };

        match cluster.cni_type() {
            Some(cni_type) => {
                topology.pod_networking = PodNetworking::from_cni_type(cni_type);
                if topology.pod_networking == PodNetworking::Unknown {
                    topology.record_gap(
                        TopologyFact::PodNetworking,
                        format!("unrecognized CNI type {}", cni_type),
                    );
                }
            }
            None => topology.record_gap(
                TopologyFact::PodNetworking,
                "the cluster has no pod network options",
            ),
        }

        Ok(())
    }

    async fn discover_workers(
        &self,
        topology: &mut ClusterNetworkTopology,
        hints: &TopologyHints,
        pool: Option<&NodePool>,
    ) -> Result<(), CallError> {
        let nsgs = if hints.worker_nsgs.is_empty() {
            pool.map(|pool| pool.node_nsg_ids().to_vec())
                .unwrap_or_default()
        } else {
            hints.worker_nsgs.clone()
        };
        topology.workers = self.resolve_groups(&nsgs, Role::Worker).await?;
        if topology.workers.is_empty() {
            topology.record_gap(
                TopologyFact::WorkerSecurityGroups,
                "no worker security groups were supplied or found on a node pool",
            );
        }

        let subnet = hints
            .worker_subnet
            .clone()
            .or_else(|| pool.and_then(|pool| pool.subnet_ids().next().map(str::to_string)));
        topology.worker_cidr = match subnet {
            Some(subnet) => match self.subnet_cidr(&subnet).await? {
                Ok(net) => Fact::Known(net),
                Err(reason) => {
                    topology.record_gap(TopologyFact::WorkerCidr, reason);
                    Fact::Missing
                }
            },
            None => {
                topology.record_gap(
                    TopologyFact::WorkerCidr,
                    "no worker subnet was supplied or found on a node pool",
                );
                Fact::Missing
            }
        };

        Ok(())
    }

    /// Resolves display names for each group. A failed lookup keeps the id as the display name.
    async fn resolve_groups(
        &self,
        ids: &[String],
        role: Role,
    ) -> Result<Vec<SecurityGroupContext>, CallError> {
        let mut groups = Vec::with_capacity(ids.len());
        for id in ids {
            if groups.iter().any(|g: &SecurityGroupContext| g.id == *id) {
                continue;
            }
            let display_name = match self
                .lookup(self.api.get_network_security_group(id))
                .await?
            {
                Ok(nsg) => nsg.display_name().to_string(),
                Err(error) => {
                    debug!(nsg = %id, %error, "Security group lookup failed");
                    id.clone()
                }
            };
            groups.push(SecurityGroupContext {
                id: id.clone(),
                display_name,
                role,
            });
        }
        Ok(groups)
    }

    async fn subnet_cidr(&self, subnet: &str) -> Result<Result<IpNet, String>, CallError> {
        let cidr = match self.lookup(self.api.get_subnet(subnet)).await? {
            Ok(subnet) => subnet.cidr().map_err(|error| error.to_string()),
            Err(error) => Err(format!("subnet {} lookup failed: {}", subnet, error)),
        };
        Ok(cidr)
    }

    /// Separates API failures, which leave a fact unresolved, from interrupted calls, which stop
    /// discovery.
    async fn lookup<T>(&self, call: impl Future<Output = anyhow::Result<T>>) -> Lookup<T> {
        match self.options.call(call).await {
            Ok(value) => Ok(Ok(value)),
            Err(CallError::Api(error)) => Ok(Err(error)),
            Err(error) => Err(error),
        }
    }
}

fn discover_pods(topology: &mut ClusterNetworkTopology, pools: &[NodePool]) {
    for pod in pools.iter().filter_map(NodePool::pod_network) {
        for nsg in &pod.pod_nsg_ids {
            if !topology.pod_security_groups.contains(nsg) {
                topology.pod_security_groups.push(nsg.clone());
            }
        }
        for subnet in &pod.pod_subnet_ids {
            if !topology.pod_subnets.contains(subnet) {
                topology.pod_subnets.push(subnet.clone());
            }
        }
    }
    if topology.pod_security_groups.is_empty() {
        topology.record_gap(
            TopologyFact::PodSecurityGroups,
            "no node pool has pod security groups",
        );
    }
}
