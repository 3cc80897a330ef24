use nsg_preflight_core::{
    remediation::RemediationRequest, ActualRule, Direction, IcmpOptions as CoreIcmpOptions,
    ParseError, PortRange, Protocol, Target,
};
use serde::{Deserialize, Serialize};

pub const CIDR_BLOCK: &str = "CIDR_BLOCK";
pub const NETWORK_SECURITY_GROUP: &str = "NETWORK_SECURITY_GROUP";
pub const SERVICE_CIDR_BLOCK: &str = "SERVICE_CIDR_BLOCK";

/// A security rule as the control API encodes it.
///
/// Ingress rules reference their peer as `source`, egress rules as `destination`. Protocols are
/// IANA numbers (`"6"`, `"17"`, `"1"`) or `"all"`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityRule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub direction: String,
    pub protocol: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp_options: Option<PortOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub udp_options: Option<PortOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icmp_options: Option<IcmpOptions>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub is_stateless: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_port_range: Option<PortRangeSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_port_range: Option<PortRangeSpec>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct PortRangeSpec {
    pub min: u16,
    pub max: u16,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct IcmpOptions {
    #[serde(rename = "type")]
    pub icmp_type: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RuleConversionError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("{direction} rule has no {field}")]
    MissingTarget {
        direction: Direction,
        field: &'static str,
    },

    #[error("unsupported target type: {0:?}")]
    UnsupportedTargetType(String),

    #[error("source port ranges are not supported")]
    SourcePortRange,
}

// === impl SecurityRule ===

impl SecurityRule {
    /// The rule's peer and its type, as encoded for the rule's direction.
    fn peer(&self, direction: Direction) -> Result<(&str, Option<&str>), RuleConversionError> {
        let (target, kind, field) = match direction {
            Direction::Ingress => (&self.source, &self.source_type, "source"),
            Direction::Egress => (&self.destination, &self.destination_type, "destination"),
        };
        let target = target
            .as_deref()
            .ok_or(RuleConversionError::MissingTarget { direction, field })?;
        Ok((target, kind.as_deref()))
    }
}

impl TryFrom<&SecurityRule> for ActualRule {
    type Error = RuleConversionError;

    fn try_from(rule: &SecurityRule) -> Result<Self, Self::Error> {
        let direction = rule.direction.parse::<Direction>()?;
        let protocol = rule.protocol.parse::<Protocol>()?;

        let (peer, kind) = rule.peer(direction)?;
        let target = match kind {
            None | Some(CIDR_BLOCK) => Target::cidr(peer)?,
            Some(NETWORK_SECURITY_GROUP) => Target::security_group(peer),
            Some(SERVICE_CIDR_BLOCK) => Target::service_range(peer),
            Some(kind) => {
                return Err(RuleConversionError::UnsupportedTargetType(
                    kind.to_string(),
                ))
            }
        };

        let port_options = match protocol {
            Protocol::Tcp => rule.tcp_options.as_ref(),
            Protocol::Udp => rule.udp_options.as_ref(),
            Protocol::Icmp | Protocol::All => None,
        };
        // A rule restricted by source port cannot be assumed to admit node traffic.
        if port_options.map_or(false, |opts| opts.source_port_range.is_some()) {
            return Err(RuleConversionError::SourcePortRange);
        }
        let ports = port_options
            .and_then(|opts| opts.destination_port_range)
            .map(|range| PortRange::new(range.min, range.max))
            .transpose()?;

        let icmp = match protocol {
            Protocol::Icmp => rule.icmp_options.map(|icmp| CoreIcmpOptions {
                icmp_type: icmp.icmp_type,
                code: icmp.code,
            }),
            _ => None,
        };

        Ok(ActualRule {
            id: rule.id.clone(),
            direction,
            protocol,
            target,
            ports,
            icmp,
            description: rule.description.clone(),
        })
    }
}

impl From<&RemediationRequest> for SecurityRule {
    fn from(request: &RemediationRequest) -> Self {
        let (target, kind) = match &request.target {
            Target::Cidr(net) => (net.to_string(), CIDR_BLOCK),
            Target::SecurityGroup(id) => (id.clone(), NETWORK_SECURITY_GROUP),
            Target::ServiceRange(label) => (label.clone(), SERVICE_CIDR_BLOCK),
        };

        let port_options = request.ports.map(|ports| PortOptions {
            destination_port_range: Some(PortRangeSpec {
                min: ports.min(),
                max: ports.max(),
            }),
            source_port_range: None,
        });

        let mut rule = SecurityRule {
            direction: request.direction.to_string(),
            protocol: request.protocol.number().to_string(),
            description: Some(request.description.clone()),
            is_stateless: false,
            ..Default::default()
        };
        match request.direction {
            Direction::Ingress => {
                rule.source = Some(target);
                rule.source_type = Some(kind.to_string());
            }
            Direction::Egress => {
                rule.destination = Some(target);
                rule.destination_type = Some(kind.to_string());
            }
        }
        match request.protocol {
            Protocol::Tcp => rule.tcp_options = port_options,
            Protocol::Udp => rule.udp_options = port_options,
            Protocol::Icmp => {
                rule.icmp_options = request.icmp.map(|icmp| IcmpOptions {
                    icmp_type: icmp.icmp_type,
                    code: icmp.code,
                })
            }
            Protocol::All => {}
        }
        rule
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nsg_preflight_core::{
        remediation, report::OutcomeStatus, report::ValidationOutcome, rule_match, Criticality,
        Role, RuleRequirement, SecurityGroupContext, Subject,
    };

    fn parse(json: serde_json::Value) -> SecurityRule {
        serde_json::from_value(json).expect("rule must parse")
    }

    #[test]
    fn converts_tcp_ingress() {
        let rule = parse(serde_json::json!({
            "id": "rule-1",
            "direction": "INGRESS",
            "protocol": "6",
            "source": "10.0.1.0/24",
            "sourceType": "CIDR_BLOCK",
            "tcpOptions": { "destinationPortRange": { "min": 6443, "max": 6443 } },
            "description": "api",
            "isStateless": false
        }));
        let actual = ActualRule::try_from(&rule).expect("rule must convert");
        assert_eq!(actual.id.as_deref(), Some("rule-1"));
        assert_eq!(actual.direction, Direction::Ingress);
        assert_eq!(actual.protocol, Protocol::Tcp);
        assert_eq!(actual.target, Target::cidr("10.0.1.0/24").unwrap());
        assert_eq!(actual.ports, PortRange::new(6443, 6443).ok());
        assert_eq!(actual.description.as_deref(), Some("api"));
    }

    #[test]
    fn converts_egress_to_security_group_and_service() {
        let nsg = parse(serde_json::json!({
            "direction": "EGRESS",
            "protocol": "all",
            "destination": "ocid1.networksecuritygroup.oc1..cp",
            "destinationType": "NETWORK_SECURITY_GROUP"
        }));
        let actual = ActualRule::try_from(&nsg).unwrap();
        assert_eq!(
            actual.target,
            Target::security_group("ocid1.networksecuritygroup.oc1..cp")
        );
        assert_eq!(actual.protocol, Protocol::All);

        let service = parse(serde_json::json!({
            "direction": "EGRESS",
            "protocol": "6",
            "destination": "all-iad-services-in-oracle-services-network",
            "destinationType": "SERVICE_CIDR_BLOCK"
        }));
        let actual = ActualRule::try_from(&service).unwrap();
        assert_eq!(
            actual.target,
            Target::service_range("all-iad-services-in-oracle-services-network")
        );
        assert_eq!(actual.ports, None);
    }

    #[test]
    fn converts_icmp() {
        let rule = parse(serde_json::json!({
            "direction": "INGRESS",
            "protocol": "1",
            "source": "0.0.0.0/0",
            "icmpOptions": { "type": 3, "code": 4 }
        }));
        let actual = ActualRule::try_from(&rule).unwrap();
        assert_eq!(
            actual.icmp,
            Some(CoreIcmpOptions {
                icmp_type: 3,
                code: Some(4)
            })
        );
    }

    #[test]
    fn rejects_malformed_rules() {
        let missing_source = parse(serde_json::json!({
            "direction": "INGRESS",
            "protocol": "6",
            "destination": "10.0.0.0/16"
        }));
        assert_eq!(
            ActualRule::try_from(&missing_source),
            Err(RuleConversionError::MissingTarget {
                direction: Direction::Ingress,
                field: "source"
            })
        );

        let gre = parse(serde_json::json!({
            "direction": "INGRESS",
            "protocol": "47",
            "source": "10.0.0.0/16"
        }));
        assert!(matches!(
            ActualRule::try_from(&gre),
            Err(RuleConversionError::Parse(ParseError::InvalidProtocol(_)))
        ));

        let source_ports = parse(serde_json::json!({
            "direction": "INGRESS",
            "protocol": "6",
            "source": "10.0.0.0/16",
            "tcpOptions": { "sourcePortRange": { "min": 1024, "max": 1024 } }
        }));
        assert_eq!(
            ActualRule::try_from(&source_ports),
            Err(RuleConversionError::SourcePortRange)
        );
    }

    #[test]
    fn remediation_requests_round_trip_through_the_wire_format() {
        let group = SecurityGroupContext {
            id: "worker-nsg".to_string(),
            display_name: "workers".to_string(),
            role: Role::Worker,
        };
        let outcome = ValidationOutcome {
            requirement: RuleRequirement {
                label: "Kubelet from control plane".to_string(),
                subject: Subject::Role(Role::Worker),
                direction: Direction::Ingress,
                protocol: Protocol::Tcp,
                target: Target::cidr("10.0.0.0/28").unwrap(),
                alternates: vec![],
                ports: PortRange::new(10250, 10250).ok(),
                icmp: None,
                criticality: Criticality::Critical,
            },
            security_group: group,
            status: OutcomeStatus::Missing,
        };
        let request = &remediation::plan(&[outcome.clone()])[0];

        let wire = SecurityRule::from(request);
        assert_eq!(wire.protocol, "6");
        assert_eq!(wire.source_type.as_deref(), Some(CIDR_BLOCK));
        assert_eq!(
            wire.tcp_options
                .as_ref()
                .and_then(|opts| opts.destination_port_range),
            Some(PortRangeSpec {
                min: 10250,
                max: 10250
            })
        );

        let actual = ActualRule::try_from(&wire).unwrap();
        assert!(rule_match::is_satisfied(&outcome.requirement, &[actual]));
    }
}
