use crate::{
    ports::PortRange,
    rule::{Direction, IcmpOptions, Protocol, Target},
    topology::SecurityGroupContext,
};
use serde::Serialize;
use std::fmt;

/// How an unmet requirement affects the run: a critical miss fails validation, an advisory miss
/// only warns.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Criticality {
    Critical,
    Advisory,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    ControlPlane,
    Worker,
}

/// The security groups a requirement is evaluated against.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Subject {
    /// Every security group with this role.
    Role(Role),

    /// A single security group, by id, when it is under test in this role.
    Group { id: String, role: Role },
}

/// A rule that must be present on a security group for a node to join the cluster.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RuleRequirement {
    pub label: String,
    pub subject: Subject,
    pub direction: Direction,
    pub protocol: Protocol,
    pub target: Target,

    /// Other targets that satisfy this requirement when referenced by an actual rule, e.g. the
    /// security groups of the peer role for a CIDR-based requirement.
    pub alternates: Vec<Target>,

    /// Required destination ports. `None` requires every port.
    pub ports: Option<PortRange>,

    /// Required ICMP type. `None` requires every type.
    pub icmp: Option<IcmpOptions>,

    pub criticality: Criticality,
}

// === impl Criticality ===

impl fmt::Display for Criticality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Critical => "CRITICAL".fmt(f),
            Self::Advisory => "ADVISORY".fmt(f),
        }
    }
}

// === impl Role ===

impl Role {
    pub fn peer(&self) -> Self {
        match self {
            Self::ControlPlane => Self::Worker,
            Self::Worker => Self::ControlPlane,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ControlPlane => "control-plane".fmt(f),
            Self::Worker => "worker".fmt(f),
        }
    }
}

// === impl RuleRequirement ===

impl RuleRequirement {
    pub fn applies_to(&self, group: &SecurityGroupContext) -> bool {
        match &self.subject {
            Subject::Role(role) => group.role == *role,
            Subject::Group { id, role } => group.id == *id && group.role == *role,
        }
    }

    /// All targets an actual rule may reference to satisfy this requirement.
    pub fn accepted_targets(&self) -> impl Iterator<Item = &Target> {
        std::iter::once(&self.target).chain(self.alternates.iter())
    }
}

impl fmt::Display for RuleRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let preposition = match self.direction {
            Direction::Ingress => "from",
            Direction::Egress => "to",
        };
        write!(f, "{} {}", self.direction, self.protocol)?;
        if let Some(ports) = self.ports {
            write!(f, "/{}", ports)?;
        }
        if let Some(icmp) = self.icmp {
            write!(f, " type {}", icmp.icmp_type)?;
        }
        write!(f, " {} {}", preposition, self.target)
    }
}
