//! The table of rules a node needs in order to join a cluster.
//!
//! Requirements are declared as [`Template`]s that reference topology facts symbolically (e.g.
//! "the worker subnet CIDR") and are resolved against a [`ClusterNetworkTopology`] once per run.
//! Adding a requirement is a matter of adding a template; neither matching nor discovery need to
//! change.

use crate::{
    ports::PortRange,
    requirement::{Criticality, Role, RuleRequirement, Subject},
    rule::{Direction, IcmpOptions, Protocol, Target},
    topology::{ClusterNetworkTopology, Fact},
};
use serde::Serialize;

pub const API_SERVER_PORT: u16 = 6443;
pub const BOOTSTRAP_PORT: u16 = 12250;
pub const KUBELET_PORT: u16 = 10250;
pub const HTTPS_PORT: u16 = 443;
pub const NODE_PORT_RANGE: (u16, u16) = (30000, 32767);

/// ICMP "destination unreachable"/"fragmentation needed", used for path MTU discovery.
pub const PATH_MTU: IcmpOptions = IcmpOptions {
    icmp_type: 3,
    code: Some(4),
};

/// A symbolic reference to a requirement's peer, resolved from the topology.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TargetRef {
    /// The subnet CIDR of the nodes with the given role.
    SubnetOf(Role),

    /// `0.0.0.0/0`.
    CatchAll,

    /// Each security group of the peer role. The template expands to one requirement per
    /// (security group, peer security group) pair.
    PeerGroups,

    Literal(Target),
}

/// A requirement declaration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Template {
    pub label: String,
    pub role: Role,
    pub direction: Direction,
    pub protocol: Protocol,
    pub target: TargetRef,
    pub ports: Option<(u16, u16)>,
    pub icmp: Option<IcmpOptions>,
    pub criticality: Criticality,

    /// Accept rules referencing the peer role's security groups in place of the target.
    pub accept_peer_groups: bool,

    /// Accept rules referencing the topology's services network in place of the target.
    pub accept_services_network: bool,
}

/// An ordered set of templates.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Catalog {
    templates: Vec<Template>,
}

#[derive(Debug, Default)]
pub struct CatalogBuilder {
    templates: Vec<Template>,
}

/// The requirements resolved from a catalog for one topology.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Instantiated {
    pub requirements: Vec<RuleRequirement>,
    pub skipped: Vec<InvalidRequirement>,
}

/// A template that could not be resolved. It is skipped rather than evaluated against an empty or
/// wildcard value, which could produce a false pass.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InvalidRequirement {
    pub label: String,
    pub reason: String,
}

// === impl Catalog ===

impl Catalog {
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::default()
    }

    /// The rules a managed (OKE) cluster needs between its control plane and worker nodes.
    pub fn oke() -> Self {
        use self::TargetRef::{CatchAll, PeerGroups, SubnetOf};
        use crate::{
            requirement::Role::{ControlPlane, Worker},
            rule::Protocol::{All, Icmp, Tcp},
        };

        Self::builder()
            // Control plane
            .require(
                Template::ingress(
                    ControlPlane,
                    "Kubernetes API from worker nodes",
                    Tcp,
                    SubnetOf(Worker),
                )
                .port(API_SERVER_PORT)
                .accept_peer_groups(),
            )
            .require(
                Template::ingress(
                    ControlPlane,
                    "Node bootstrap from worker nodes",
                    Tcp,
                    SubnetOf(Worker),
                )
                .port(BOOTSTRAP_PORT)
                .accept_peer_groups(),
            )
            .require(
                Template::egress(ControlPlane, "Kubelet on worker nodes", Tcp, SubnetOf(Worker))
                    .port(KUBELET_PORT)
                    .accept_peer_groups()
                    .advisory(),
            )
            .require(
                Template::ingress(
                    ControlPlane,
                    "Path MTU discovery from worker nodes",
                    Icmp,
                    SubnetOf(Worker),
                )
                .icmp(PATH_MTU)
                .advisory(),
            )
            .require(
                Template::egress(
                    ControlPlane,
                    "Path MTU discovery to worker nodes",
                    Icmp,
                    SubnetOf(Worker),
                )
                .icmp(PATH_MTU)
                .advisory(),
            )
            // Workers
            .require(
                Template::egress(
                    Worker,
                    "Kubernetes API on the control plane",
                    Tcp,
                    SubnetOf(ControlPlane),
                )
                .port(API_SERVER_PORT)
                .accept_peer_groups(),
            )
            .require(
                Template::egress(
                    Worker,
                    "Node bootstrap on the control plane",
                    Tcp,
                    SubnetOf(ControlPlane),
                )
                .port(BOOTSTRAP_PORT)
                .accept_peer_groups(),
            )
            .require(
                Template::ingress(
                    Worker,
                    "Kubelet health checks from the control plane",
                    Tcp,
                    SubnetOf(ControlPlane),
                )
                .port(KUBELET_PORT)
                .accept_peer_groups(),
            )
            .require(
                Template::egress(
                    Worker,
                    "TLS egress to registries and platform services",
                    Tcp,
                    CatchAll,
                )
                .port(HTTPS_PORT)
                .accept_services_network()
                .advisory(),
            )
            .require(
                Template::ingress(Worker, "NodePort services", Tcp, CatchAll)
                    .ports(NODE_PORT_RANGE.0, NODE_PORT_RANGE.1)
                    .advisory(),
            )
            .require(
                Template::ingress(Worker, "Traffic between worker nodes", All, SubnetOf(Worker))
                    .advisory(),
            )
            .require(
                Template::ingress(
                    Worker,
                    "Path MTU discovery from the control plane",
                    Icmp,
                    SubnetOf(ControlPlane),
                )
                .icmp(PATH_MTU)
                .advisory(),
            )
            .require(
                Template::egress(
                    Worker,
                    "Path MTU discovery to the control plane",
                    Icmp,
                    SubnetOf(ControlPlane),
                )
                .icmp(PATH_MTU)
                .advisory(),
            )
            // Security group references are a secondary way to satisfy the CIDR rules above, so
            // they stay advisory even when the CIDR rule is missing.
            .require(
                Template::ingress(
                    ControlPlane,
                    "Kubernetes API from worker security group",
                    Tcp,
                    PeerGroups,
                )
                .port(API_SERVER_PORT)
                .advisory(),
            )
            .require(
                Template::ingress(
                    ControlPlane,
                    "Node bootstrap from worker security group",
                    Tcp,
                    PeerGroups,
                )
                .port(BOOTSTRAP_PORT)
                .advisory(),
            )
            .require(
                Template::egress(
                    Worker,
                    "Kubernetes API on control-plane security group",
                    Tcp,
                    PeerGroups,
                )
                .port(API_SERVER_PORT)
                .advisory(),
            )
            .require(
                Template::egress(
                    Worker,
                    "Node bootstrap on control-plane security group",
                    Tcp,
                    PeerGroups,
                )
                .port(BOOTSTRAP_PORT)
                .advisory(),
            )
            .require(
                Template::ingress(
                    Worker,
                    "Kubelet from control-plane security group",
                    Tcp,
                    PeerGroups,
                )
                .port(KUBELET_PORT)
                .advisory(),
            )
            .build()
    }

    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Resolves every template against `topology`, in catalog order.
    pub fn instantiate(&self, topology: &ClusterNetworkTopology) -> Instantiated {
        let mut instantiated = Instantiated::default();
        for template in &self.templates {
            match template.instantiate(topology) {
                Ok(requirements) => instantiated.requirements.extend(requirements),
                Err(reason) => {
                    tracing::warn!(label = %template.label, %reason, "Skipping requirement");
                    instantiated.skipped.push(InvalidRequirement {
                        label: template.label.clone(),
                        reason,
                    });
                }
            }
        }
        instantiated
    }
}

// === impl CatalogBuilder ===

impl CatalogBuilder {
    pub fn require(mut self, template: Template) -> Self {
        self.templates.push(template);
        self
    }

    pub fn extend(mut self, catalog: Catalog) -> Self {
        self.templates.extend(catalog.templates);
        self
    }

    pub fn build(self) -> Catalog {
        Catalog {
            templates: self.templates,
        }
    }
}

// === impl Template ===

impl Template {
    pub fn new(
        role: Role,
        label: impl ToString,
        direction: Direction,
        protocol: Protocol,
        target: TargetRef,
    ) -> Self {
        Self {
            label: label.to_string(),
            role,
            direction,
            protocol,
            target,
            ports: None,
            icmp: None,
            criticality: Criticality::Critical,
            accept_peer_groups: false,
            accept_services_network: false,
        }
    }

    pub fn ingress(role: Role, label: impl ToString, protocol: Protocol, from: TargetRef) -> Self {
        Self::new(role, label, Direction::Ingress, protocol, from)
    }

    pub fn egress(role: Role, label: impl ToString, protocol: Protocol, to: TargetRef) -> Self {
        Self::new(role, label, Direction::Egress, protocol, to)
    }

    pub fn port(self, port: u16) -> Self {
        self.ports(port, port)
    }

    pub fn ports(mut self, min: u16, max: u16) -> Self {
        self.ports = Some((min, max));
        self
    }

    pub fn icmp(mut self, icmp: IcmpOptions) -> Self {
        self.icmp = Some(icmp);
        self
    }

    pub fn advisory(mut self) -> Self {
        self.criticality = Criticality::Advisory;
        self
    }

    pub fn accept_peer_groups(mut self) -> Self {
        self.accept_peer_groups = true;
        self
    }

    pub fn accept_services_network(mut self) -> Self {
        self.accept_services_network = true;
        self
    }

    fn instantiate(
        &self,
        topology: &ClusterNetworkTopology,
    ) -> Result<Vec<RuleRequirement>, String> {
        let ports = self.resolve_ports()?;

        let groups = topology.contexts_for(self.role);
        if groups.is_empty() {
            return Err(format!("no {} security groups were discovered", self.role));
        }
        let peers = topology.contexts_for(self.role.peer());

        let mut criticality = self.criticality;
        let target = match &self.target {
            TargetRef::PeerGroups => {
                if peers.is_empty() {
                    return Err(format!(
                        "no {} security groups were discovered",
                        self.role.peer()
                    ));
                }

                let requirements = groups
                    .iter()
                    .flat_map(|group| {
                        peers.iter().map(move |peer| RuleRequirement {
                            label: format!("{} ({})", self.label, peer.display_name),
                            subject: Subject::Group {
                                id: group.id.clone(),
                                role: self.role,
                            },
                            direction: self.direction,
                            protocol: self.protocol,
                            target: Target::SecurityGroup(peer.id.clone()),
                            alternates: vec![],
                            ports,
                            icmp: self.icmp,
                            criticality,
                        })
                    })
                    .collect();
                return Ok(requirements);
            }

            TargetRef::SubnetOf(role) => match topology.cidr_for(*role) {
                Fact::Known(net) => Target::Cidr(*net),
                Fact::Degraded(net) => {
                    criticality = Criticality::Advisory;
                    Target::Cidr(*net)
                }
                Fact::Missing => return Err(format!("the {} subnet CIDR is unresolved", role)),
            },

            TargetRef::CatchAll => Target::catch_all(),

            TargetRef::Literal(target) => target.clone(),
        };

        let mut alternates = Vec::new();
        if self.accept_peer_groups {
            alternates.extend(
                peers
                    .iter()
                    .map(|peer| Target::SecurityGroup(peer.id.clone())),
            );
        }
        if self.accept_services_network {
            if let Some(label) = &topology.services_network {
                alternates.push(Target::ServiceRange(label.clone()));
            }
        }

        Ok(vec![RuleRequirement {
            label: self.label.clone(),
            subject: Subject::Role(self.role),
            direction: self.direction,
            protocol: self.protocol,
            target,
            alternates,
            ports,
            icmp: self.icmp,
            criticality,
        }])
    }

    fn resolve_ports(&self) -> Result<Option<PortRange>, String> {
        match (self.protocol, self.ports, self.icmp) {
            (Protocol::Tcp | Protocol::Udp, Some((min, max)), None) => PortRange::new(min, max)
                .map(Some)
                .map_err(|error| error.to_string()),
            (Protocol::Tcp | Protocol::Udp, None, None) => Ok(None),
            (Protocol::Icmp, None, _) => Ok(None),
            (Protocol::All, None, None) => Ok(None),
            (protocol, Some(_), _) => {
                Err(format!("ports cannot be required for {} rules", protocol))
            }
            (protocol, None, Some(_)) => {
                Err(format!("ICMP options cannot be required for {} rules", protocol))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::SecurityGroupContext;
    use crate::Ipv4Net;

    fn mk_group(id: &str, role: Role) -> SecurityGroupContext {
        SecurityGroupContext {
            id: id.to_string(),
            display_name: format!("{}-name", id),
            role,
        }
    }

    fn mk_topology() -> ClusterNetworkTopology {
        ClusterNetworkTopology {
            control_plane: vec![mk_group("cp-nsg-1", Role::ControlPlane)],
            control_plane_cidr: Fact::Known("10.0.0.0/28".parse::<Ipv4Net>().unwrap().into()),
            workers: vec![
                mk_group("worker-nsg-1", Role::Worker),
                mk_group("worker-nsg-2", Role::Worker),
            ],
            worker_cidr: Fact::Known("10.0.1.0/24".parse::<Ipv4Net>().unwrap().into()),
            ..ClusterNetworkTopology::new("cluster")
        }
    }

    #[test]
    fn oke_catalog_resolves_against_full_topology() {
        let topology = mk_topology();
        let instantiated = Catalog::oke().instantiate(&topology);
        assert!(instantiated.skipped.is_empty(), "{:?}", instantiated.skipped);

        let api = instantiated
            .requirements
            .iter()
            .find(|r| r.label == "Kubernetes API from worker nodes")
            .expect("API requirement must exist");
        assert_eq!(api.subject, Subject::Role(Role::ControlPlane));
        assert_eq!(api.direction, Direction::Ingress);
        assert_eq!(api.target, Target::cidr("10.0.1.0/24").unwrap());
        assert_eq!(api.ports, Some(PortRange::new(6443, 6443).unwrap()));
        assert_eq!(api.criticality, Criticality::Critical);
        assert_eq!(
            api.alternates,
            vec![
                Target::security_group("worker-nsg-1"),
                Target::security_group("worker-nsg-2"),
            ]
        );
    }

    #[test]
    fn peer_group_templates_expand_per_pair() {
        let topology = mk_topology();
        let catalog = Catalog::builder()
            .require(
                Template::ingress(
                    Role::ControlPlane,
                    "API from workers",
                    Protocol::Tcp,
                    TargetRef::PeerGroups,
                )
                .port(API_SERVER_PORT)
                .advisory(),
            )
            .build();
        let instantiated = catalog.instantiate(&topology);
        assert_eq!(instantiated.requirements.len(), 2);
        for (req, peer) in instantiated.requirements.iter().zip(&topology.workers) {
            assert_eq!(
                req.subject,
                Subject::Group {
                    id: "cp-nsg-1".to_string(),
                    role: Role::ControlPlane,
                }
            );
            assert_eq!(req.target, Target::security_group(&peer.id));
            assert_eq!(req.criticality, Criticality::Advisory);
            assert_eq!(req.label, format!("API from workers ({})", peer.display_name));
        }
    }

    #[test]
    fn degraded_cidr_downgrades_to_advisory() {
        let topology = ClusterNetworkTopology {
            control_plane_cidr: Fact::Degraded("10.0.0.5/32".parse::<Ipv4Net>().unwrap().into()),
            ..mk_topology()
        };
        let instantiated = Catalog::oke().instantiate(&topology);
        let api = instantiated
            .requirements
            .iter()
            .find(|r| r.label == "Kubernetes API on the control plane")
            .expect("API requirement must exist");
        assert_eq!(api.criticality, Criticality::Advisory);
        assert_eq!(api.target, Target::cidr("10.0.0.5/32").unwrap());
    }

    #[test]
    fn unresolved_placeholders_are_skipped() {
        let topology = ClusterNetworkTopology {
            worker_cidr: Fact::Missing,
            ..mk_topology()
        };
        let instantiated = Catalog::oke().instantiate(&topology);
        assert!(instantiated
            .skipped
            .iter()
            .any(|s| s.label == "Kubernetes API from worker nodes"));
        assert!(instantiated
            .requirements
            .iter()
            .all(|r| r.label != "Kubernetes API from worker nodes"));
    }

    #[test]
    fn templates_for_undiscovered_roles_are_skipped() {
        let topology = ClusterNetworkTopology {
            workers: vec![],
            ..mk_topology()
        };
        let instantiated = Catalog::oke().instantiate(&topology);
        assert!(instantiated
            .requirements
            .iter()
            .all(|r| r.subject == Subject::Role(Role::ControlPlane)));
        assert!(instantiated
            .skipped
            .iter()
            .any(|s| s.label == "Kubelet health checks from the control plane"));
    }

    #[test]
    fn services_network_is_accepted_for_tls_egress() {
        let label = "all-iad-services-in-oracle-services-network";
        let topology = ClusterNetworkTopology {
            services_network: Some(label.to_string()),
            ..mk_topology()
        };
        let instantiated = Catalog::oke().instantiate(&topology);
        let tls = instantiated
            .requirements
            .iter()
            .find(|r| r.ports == Some(PortRange::new(443, 443).unwrap()))
            .expect("TLS requirement must exist");
        assert_eq!(tls.target, Target::catch_all());
        assert_eq!(tls.alternates, vec![Target::service_range(label)]);
    }

    #[test]
    fn invalid_templates_are_skipped() {
        let catalog = Catalog::builder()
            .require(
                Template::ingress(Role::Worker, "backwards", Protocol::Tcp, TargetRef::CatchAll)
                    .ports(2000, 1000),
            )
            .require(
                Template::ingress(Role::Worker, "icmp ports", Protocol::Icmp, TargetRef::CatchAll)
                    .port(443),
            )
            .build();
        let instantiated = catalog.instantiate(&mk_topology());
        assert!(instantiated.requirements.is_empty());
        assert_eq!(instantiated.skipped.len(), 2);
    }
}
