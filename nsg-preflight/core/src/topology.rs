use crate::requirement::Role;
use ipnet::IpNet;
use serde::Serialize;
use std::{fmt, net::IpAddr};

/// A network security group under test.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct SecurityGroupContext {
    pub id: String,
    pub display_name: String,
    pub role: Role,
}

/// Describes where pod addresses come from.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PodNetworking {
    /// Pods receive addresses from the VCN and need their own security groups and subnets.
    Native,

    /// Pods are addressed on an overlay network.
    Overlay,

    #[default]
    Unknown,
}

/// A discovered value and how much it can be trusted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Fact<T> {
    Known(T),

    /// A value derived from a fallback source after the primary lookup failed.
    Degraded(T),

    Missing,
}

/// Identifies a topology fact that discovery could not fully resolve.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TopologyFact {
    Cluster,
    ControlPlaneSecurityGroups,
    ControlPlaneCidr,
    Endpoint,
    WorkerSecurityGroups,
    WorkerCidr,
    NodePools,
    PodNetworking,
    PodSecurityGroups,
}

/// A DiscoveryPartial condition: a fact that could not be resolved, and why.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DiscoveryGap {
    pub fact: TopologyFact,
    pub reason: String,
}

/// Network facts about a cluster. Built once by discovery and read-only thereafter.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ClusterNetworkTopology {
    pub cluster_id: String,
    pub control_plane: Vec<SecurityGroupContext>,
    pub control_plane_cidr: Fact<IpNet>,
    pub endpoint: Option<IpAddr>,
    pub workers: Vec<SecurityGroupContext>,
    pub worker_cidr: Fact<IpNet>,
    pub pod_networking: PodNetworking,

    /// Pod security group ids recovered from existing node pools. Only populated for
    /// [`PodNetworking::Native`].
    pub pod_security_groups: Vec<String>,

    /// Pod subnet ids recovered from existing node pools.
    pub pod_subnets: Vec<String>,

    /// Pod security group ids the new node will attach to its pods. These are candidates for
    /// the pod networking check but are not validated against worker requirements.
    pub node_pod_security_groups: Vec<String>,

    /// A service range label accepted in place of the catch-all CIDR for TLS egress.
    pub services_network: Option<String>,

    pub gaps: Vec<DiscoveryGap>,
}

// === impl PodNetworking ===

impl PodNetworking {
    pub fn from_cni_type(cni_type: &str) -> Self {
        match cni_type {
            "OCI_VCN_IP_NATIVE" => Self::Native,
            "FLANNEL_OVERLAY" => Self::Overlay,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for PodNetworking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native => "NATIVE".fmt(f),
            Self::Overlay => "OVERLAY".fmt(f),
            Self::Unknown => "UNKNOWN".fmt(f),
        }
    }
}

// === impl Fact ===

impl<T> Fact<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Known(v) | Self::Degraded(v) => Some(v),
            Self::Missing => None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded(_))
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }
}

impl<T> Default for Fact<T> {
    fn default() -> Self {
        Self::Missing
    }
}

impl<T: fmt::Display> fmt::Display for Fact<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(v) => v.fmt(f),
            Self::Degraded(v) => write!(f, "{} (degraded)", v),
            Self::Missing => "unknown".fmt(f),
        }
    }
}

// === impl TopologyFact ===

impl fmt::Display for TopologyFact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cluster => "cluster".fmt(f),
            Self::ControlPlaneSecurityGroups => "control-plane security groups".fmt(f),
            Self::ControlPlaneCidr => "control-plane subnet CIDR".fmt(f),
            Self::Endpoint => "control-plane endpoint".fmt(f),
            Self::WorkerSecurityGroups => "worker security groups".fmt(f),
            Self::WorkerCidr => "worker subnet CIDR".fmt(f),
            Self::NodePools => "node pools".fmt(f),
            Self::PodNetworking => "pod networking mode".fmt(f),
            Self::PodSecurityGroups => "pod security groups".fmt(f),
        }
    }
}

// === impl ClusterNetworkTopology ===

impl ClusterNetworkTopology {
    pub fn new(cluster_id: impl ToString) -> Self {
        Self {
            cluster_id: cluster_id.to_string(),
            ..Default::default()
        }
    }

    /// All security groups under test, control-plane groups first.
    pub fn contexts(&self) -> impl Iterator<Item = &SecurityGroupContext> {
        self.control_plane.iter().chain(self.workers.iter())
    }

    pub fn contexts_for(&self, role: Role) -> &[SecurityGroupContext] {
        match role {
            Role::ControlPlane => &self.control_plane,
            Role::Worker => &self.workers,
        }
    }

    /// The security group ids the new node will carry: worker groups, then pod groups.
    pub fn cni_candidates(&self) -> Vec<String> {
        let mut candidates = self
            .workers
            .iter()
            .map(|group| group.id.clone())
            .collect::<Vec<_>>();
        for id in &self.node_pod_security_groups {
            if !candidates.contains(id) {
                candidates.push(id.clone());
            }
        }
        candidates
    }

    pub fn cidr_for(&self, role: Role) -> &Fact<IpNet> {
        match role {
            Role::ControlPlane => &self.control_plane_cidr,
            Role::Worker => &self.worker_cidr,
        }
    }

    /// Records a gap. Each fact is reported at most once; the first reason wins.
    pub fn record_gap(&mut self, fact: TopologyFact, reason: impl ToString) {
        if self.gaps.iter().any(|gap| gap.fact == fact) {
            return;
        }
        tracing::warn!(%fact, reason = %reason.to_string(), "Topology fact unresolved");
        self.gaps.push(DiscoveryGap {
            fact,
            reason: reason.to_string(),
        });
    }

    pub fn has_gap(&self, fact: &TopologyFact) -> bool {
        self.gaps.iter().any(|gap| gap.fact == *fact)
    }

    /// Records a gap for every required fact that is still unresolved.
    pub fn record_unresolved(&mut self, reason: &str) {
        if self.control_plane.is_empty() {
            self.record_gap(TopologyFact::ControlPlaneSecurityGroups, reason);
        }
        if self.control_plane_cidr.is_missing() {
            self.record_gap(TopologyFact::ControlPlaneCidr, reason);
        }
        if self.workers.is_empty() {
            self.record_gap(TopologyFact::WorkerSecurityGroups, reason);
        }
        if self.worker_cidr.is_missing() {
            self.record_gap(TopologyFact::WorkerCidr, reason);
        }
        if self.pod_networking == PodNetworking::Unknown {
            self.record_gap(TopologyFact::PodNetworking, reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gaps_are_recorded_once_per_fact() {
        let mut topology = ClusterNetworkTopology::new("cluster");
        topology.record_gap(TopologyFact::WorkerCidr, "subnet lookup failed");
        topology.record_gap(TopologyFact::WorkerCidr, "not discovered");
        topology.record_unresolved("not discovered");

        let worker_cidr = topology
            .gaps
            .iter()
            .filter(|gap| gap.fact == TopologyFact::WorkerCidr)
            .collect::<Vec<_>>();
        assert_eq!(worker_cidr.len(), 1);
        assert_eq!(worker_cidr[0].reason, "subnet lookup failed");
        assert!(topology.has_gap(&TopologyFact::ControlPlaneSecurityGroups));
        assert!(topology.has_gap(&TopologyFact::PodNetworking));
    }

    #[test]
    fn cni_candidates_include_pod_groups_once() {
        let mut topology = ClusterNetworkTopology::new("cluster");
        topology.workers = vec![SecurityGroupContext {
            id: "worker-nsg".to_string(),
            display_name: "workers".to_string(),
            role: Role::Worker,
        }];
        topology.node_pod_security_groups = vec!["pod-nsg".to_string(), "worker-nsg".to_string()];
        assert_eq!(topology.cni_candidates(), ["worker-nsg", "pod-nsg"]);
    }

    #[test]
    fn cni_types() {
        assert_eq!(
            PodNetworking::from_cni_type("OCI_VCN_IP_NATIVE"),
            PodNetworking::Native
        );
        assert_eq!(
            PodNetworking::from_cni_type("FLANNEL_OVERLAY"),
            PodNetworking::Overlay
        );
        assert_eq!(PodNetworking::from_cni_type(""), PodNetworking::Unknown);
    }
}
