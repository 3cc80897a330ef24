//! Network security group preflight core
//!
//! Decides whether the firewall rules attached to a managed Kubernetes cluster's control-plane and
//! worker network security groups (NSGs) allow a new node to bootstrap and join the cluster, and
//! plans the rule additions needed when they do not.
//!
//! ```text
//! [ Topology ] -> [ Catalog ] -> [ RuleRequirement ] -> [ rule_match ] <- [ ActualRule ]
//!                                                             |
//!                                              [ ValidationReport ] -> [ RemediationRequest ]
//! ```
//!
//! Everything in this crate is pure: rules are fetched and written by the runtime crate.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod catalog;
pub mod cni;
mod ports;
pub mod remediation;
pub mod report;
mod requirement;
mod rule;
pub mod rule_match;
pub mod topology;

pub use self::{
    catalog::Catalog,
    ports::{parse_port_range, PortRange},
    requirement::{Criticality, Role, RuleRequirement, Subject},
    rule::{ActualRule, Direction, IcmpOptions, ParseError, Protocol, Target, TargetKind},
    topology::{ClusterNetworkTopology, PodNetworking, SecurityGroupContext},
};
pub use ipnet::{IpNet, Ipv4Net, Ipv6Net};
