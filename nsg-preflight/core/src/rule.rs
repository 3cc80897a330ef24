use crate::ports::PortRange;
use ipnet::IpNet;
use serde::Serialize;
use std::{fmt, net::IpAddr};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Ingress,
    Egress,
}

/// The IP protocol a rule applies to. `All` matches every protocol.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    All,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetKind {
    Cidr,
    SecurityGroup,
    ServiceRange,
}

/// The peer of a rule: the source of an ingress rule or the destination of an egress rule.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Target {
    Cidr(IpNet),

    /// A reference to another network security group, by id.
    SecurityGroup(String),

    /// A platform service range label, e.g. `all-iad-services-in-oracle-services-network`.
    ServiceRange(String),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct IcmpOptions {
    #[serde(rename = "type")]
    pub icmp_type: u8,
    pub code: Option<u8>,
}

/// A firewall rule as configured on a network security group.
///
/// A TCP/UDP rule without `ports`, or an ICMP rule without `icmp`, is unrestricted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ActualRule {
    pub id: Option<String>,
    pub direction: Direction,
    pub protocol: Protocol,
    pub target: Target,
    pub ports: Option<PortRange>,
    pub icmp: Option<IcmpOptions>,
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid direction: {0:?}")]
    InvalidDirection(String),

    #[error("invalid protocol: {0:?}")]
    InvalidProtocol(String),

    #[error("invalid port: {0:?}")]
    InvalidPort(String),

    #[error("port 0 is not a valid destination port")]
    ZeroPort,

    #[error("port range must be increasing: {min}-{max}")]
    DecreasingPortRange { min: u16, max: u16 },

    #[error("not a valid CIDR or IP address: {0:?}")]
    InvalidCidr(String),
}

// === impl Direction ===

impl std::str::FromStr for Direction {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("ingress") {
            Ok(Self::Ingress)
        } else if s.eq_ignore_ascii_case("egress") {
            Ok(Self::Egress)
        } else {
            Err(ParseError::InvalidDirection(s.to_string()))
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ingress => "INGRESS".fmt(f),
            Self::Egress => "EGRESS".fmt(f),
        }
    }
}

// === impl Protocol ===

impl Protocol {
    /// The protocol as the platform encodes it: an IANA protocol number or `all`.
    pub fn number(&self) -> &'static str {
        match self {
            Self::Tcp => "6",
            Self::Udp => "17",
            Self::Icmp => "1",
            Self::All => "all",
        }
    }
}

/// Accepts both protocol names and IANA protocol numbers.
impl std::str::FromStr for Protocol {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "6" | "tcp" => Ok(Self::Tcp),
            "17" | "udp" => Ok(Self::Udp),
            "1" | "icmp" => Ok(Self::Icmp),
            "all" => Ok(Self::All),
            _ => Err(ParseError::InvalidProtocol(s.to_string())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => "TCP".fmt(f),
            Self::Udp => "UDP".fmt(f),
            Self::Icmp => "ICMP".fmt(f),
            Self::All => "ALL".fmt(f),
        }
    }
}

// === impl Target ===

impl Target {
    /// Parses a CIDR, treating a bare address as a host network.
    pub fn cidr(s: &str) -> Result<Self, ParseError> {
        if let Ok(net) = s.parse::<IpNet>() {
            return Ok(Self::Cidr(net));
        }

        if let Ok(addr) = s.parse::<IpAddr>() {
            return Ok(Self::Cidr(IpNet::from(addr)));
        }

        Err(ParseError::InvalidCidr(s.to_string()))
    }

    pub fn security_group(id: impl ToString) -> Self {
        Self::SecurityGroup(id.to_string())
    }

    pub fn service_range(label: impl ToString) -> Self {
        Self::ServiceRange(label.to_string())
    }

    /// `0.0.0.0/0`
    pub fn catch_all() -> Self {
        Self::Cidr(IpNet::V4(Default::default()))
    }

    pub fn kind(&self) -> TargetKind {
        match self {
            Self::Cidr(_) => TargetKind::Cidr,
            Self::SecurityGroup(_) => TargetKind::SecurityGroup,
            Self::ServiceRange(_) => TargetKind::ServiceRange,
        }
    }

    pub fn is_catch_all(&self) -> bool {
        matches!(self, Self::Cidr(net) if net.prefix_len() == 0)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cidr(net) => net.fmt(f),
            Self::SecurityGroup(id) => id.fmt(f),
            Self::ServiceRange(label) => label.fmt(f),
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cidr => "CIDR".fmt(f),
            Self::SecurityGroup => "SECURITY_GROUP".fmt(f),
            Self::ServiceRange => "SERVICE_RANGE".fmt(f),
        }
    }
}

// === impl ActualRule ===

impl ActualRule {
    pub fn new(direction: Direction, protocol: Protocol, target: Target) -> Self {
        Self {
            id: None,
            direction,
            protocol,
            target,
            ports: None,
            icmp: None,
            description: None,
        }
    }

    pub fn with_ports(mut self, ports: PortRange) -> Self {
        self.ports = Some(ports);
        self
    }

    pub fn with_icmp(mut self, icmp_type: u8, code: Option<u8>) -> Self {
        self.icmp = Some(IcmpOptions { icmp_type, code });
        self
    }

    pub fn with_description(mut self, description: impl ToString) -> Self {
        self.description = Some(description.to_string());
        self
    }
}
