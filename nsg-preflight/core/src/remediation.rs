//! Plans the rule additions that close the gaps in a validation report.

use crate::{
    ports::PortRange,
    report::ValidationOutcome,
    requirement::{Criticality, RuleRequirement, Subject},
    rule::{ActualRule, Direction, IcmpOptions, Protocol, Target},
    topology::SecurityGroupContext,
};
use serde::Serialize;
use std::fmt;

/// The longest rule description the platform accepts.
pub const MAX_DESCRIPTION_LEN: usize = 255;

const DESCRIPTION_SUFFIX: &str = " (added by nsg-preflight)";

/// A rule to add to a security group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RemediationRequest {
    pub security_group: SecurityGroupContext,
    pub label: String,
    pub direction: Direction,
    pub protocol: Protocol,
    pub target: Target,
    pub ports: Option<PortRange>,
    pub icmp: Option<IcmpOptions>,
    pub description: String,
    pub criticality: Criticality,
}

/// Produces one request per missing rule, preserving the backlog's order.
pub fn plan(backlog: &[ValidationOutcome]) -> Vec<RemediationRequest> {
    backlog.iter().map(RemediationRequest::from_outcome).collect()
}

// === impl RemediationRequest ===

impl RemediationRequest {
    pub fn from_outcome(outcome: &ValidationOutcome) -> Self {
        let requirement = &outcome.requirement;
        Self {
            security_group: outcome.security_group.clone(),
            label: requirement.label.clone(),
            direction: requirement.direction,
            protocol: requirement.protocol,
            target: requirement.target.clone(),
            ports: requirement.ports,
            icmp: requirement.icmp,
            description: describe(&requirement.label),
            criticality: requirement.criticality,
        }
    }

    /// The requirement this request satisfies, scoped to its security group.
    pub fn as_requirement(&self) -> RuleRequirement {
        RuleRequirement {
            label: self.label.clone(),
            subject: Subject::Group {
                id: self.security_group.id.clone(),
                role: self.security_group.role,
            },
            direction: self.direction,
            protocol: self.protocol,
            target: self.target.clone(),
            alternates: vec![],
            ports: self.ports,
            icmp: self.icmp,
            criticality: self.criticality,
        }
    }

    /// The rule this request adds.
    pub fn as_rule(&self) -> ActualRule {
        ActualRule {
            id: None,
            direction: self.direction,
            protocol: self.protocol,
            target: self.target.clone(),
            ports: self.ports,
            icmp: self.icmp,
            description: Some(self.description.clone()),
        }
    }
}

impl fmt::Display for RemediationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} on {}: {}",
            self.criticality,
            self.security_group.display_name,
            self.as_requirement()
        )?;
        if let Some(code) = self.icmp.and_then(|icmp| icmp.code) {
            write!(f, " code {}", code)?;
        }
        Ok(())
    }
}

fn describe(label: &str) -> String {
    let description = format!("{}{}", label, DESCRIPTION_SUFFIX);
    if description.chars().count() <= MAX_DESCRIPTION_LEN {
        return description;
    }
    description.chars().take(MAX_DESCRIPTION_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{report::OutcomeStatus, requirement::Role, rule_match};

    fn cp_group() -> SecurityGroupContext {
        SecurityGroupContext {
            id: "ocid1.networksecuritygroup.oc1..cp".to_string(),
            display_name: "cp-nsg".to_string(),
            role: Role::ControlPlane,
        }
    }

    fn api_miss() -> ValidationOutcome {
        ValidationOutcome {
            requirement: RuleRequirement {
                label: "Kubernetes API from workers".to_string(),
                subject: Subject::Role(Role::ControlPlane),
                direction: Direction::Ingress,
                protocol: Protocol::Tcp,
                target: Target::cidr("10.0.1.0/24").unwrap(),
                alternates: vec![],
                ports: Some(PortRange::new(6443, 6443).unwrap()),
                icmp: None,
                criticality: Criticality::Critical,
            },
            security_group: cp_group(),
            status: OutcomeStatus::Missing,
        }
    }

    #[test]
    fn plan_preserves_the_requirement() {
        let requests = plan(&[api_miss()]);
        assert_eq!(requests.len(), 1);

        let request = &requests[0];
        assert_eq!(request.security_group, cp_group());
        assert_eq!(request.direction, Direction::Ingress);
        assert_eq!(request.protocol, Protocol::Tcp);
        assert_eq!(request.target, Target::cidr("10.0.1.0/24").unwrap());
        assert_eq!(request.ports, PortRange::new(6443, 6443).ok());
        assert_eq!(
            request.description,
            "Kubernetes API from workers (added by nsg-preflight)"
        );
    }

    #[test]
    fn applied_request_closes_the_gap() {
        let outcome = api_miss();
        let existing = vec![ActualRule::new(
            Direction::Egress,
            Protocol::All,
            Target::catch_all(),
        )];
        assert!(!rule_match::is_satisfied(&outcome.requirement, &existing));

        let request = &plan(&[outcome.clone()])[0];
        let mut updated = existing;
        updated.push(request.as_rule());
        assert!(rule_match::is_satisfied(&outcome.requirement, &updated));
        assert!(rule_match::is_satisfied(&request.as_requirement(), &updated));
    }

    #[test]
    fn descriptions_are_truncated() {
        let mut outcome = api_miss();
        outcome.requirement.label = "é".repeat(300);
        let request = RemediationRequest::from_outcome(&outcome);
        assert_eq!(request.description.chars().count(), MAX_DESCRIPTION_LEN);
        assert!(request.description.starts_with('é'));
    }

    #[test]
    fn display() {
        let request = RemediationRequest::from_outcome(&api_miss());
        assert_eq!(
            request.to_string(),
            "CRITICAL on cp-nsg: INGRESS TCP/6443 from 10.0.1.0/24"
        );
    }
}
