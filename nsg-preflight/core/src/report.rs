use crate::{
    catalog::{Instantiated, InvalidRequirement},
    cni::{self, Finding},
    requirement::{Criticality, RuleRequirement},
    rule::ActualRule,
    rule_match,
    topology::{ClusterNetworkTopology, DiscoveryGap, SecurityGroupContext},
};
use ahash::AHashMap as HashMap;
use serde::Serialize;
use std::{fmt, sync::Arc};

/// The rules fetched for each security group, by id. A failed fetch holds the error message.
pub type RuleSets = HashMap<String, Result<Arc<[ActualRule]>, String>>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    Satisfied,

    /// The group's rules were fetched and none satisfy the requirement.
    Missing,

    /// The group's rules could not be fetched.
    Unverified { error: String },
}

/// The result of evaluating one requirement against one security group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ValidationOutcome {
    pub requirement: RuleRequirement,
    pub security_group: SecurityGroupContext,
    #[serde(flatten)]
    pub status: OutcomeStatus,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub cluster_id: String,
    pub passed: usize,

    /// Unsatisfied or unverified critical checks.
    pub failed: usize,

    /// Unsatisfied or unverified advisory checks.
    pub warned: usize,

    /// Requirements missing from a group's rules, in catalog order. This is the remediation input.
    pub backlog: Vec<ValidationOutcome>,

    /// Requirements that could not be checked because the group's rules could not be fetched.
    pub unverified: Vec<ValidationOutcome>,

    pub skipped: Vec<InvalidRequirement>,
    pub gaps: Vec<DiscoveryGap>,
    pub findings: Vec<Finding>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    Pass,
    Warn,
    Fail,
}

/// Evaluates every instantiated requirement against the rules of each security group it applies
/// to and folds in the pod networking check.
///
/// Evaluation is pure: the same inputs always produce the same report.
pub fn evaluate(
    topology: &ClusterNetworkTopology,
    instantiated: &Instantiated,
    rules: &RuleSets,
) -> ValidationReport {
    let mut report = ValidationReport {
        cluster_id: topology.cluster_id.clone(),
        skipped: instantiated.skipped.clone(),
        gaps: topology.gaps.clone(),
        ..Default::default()
    };

    for requirement in &instantiated.requirements {
        for group in topology.contexts().filter(|g| requirement.applies_to(g)) {
            let status = match rules.get(&group.id) {
                Some(Ok(rules)) => {
                    if rule_match::is_satisfied(requirement, rules) {
                        OutcomeStatus::Satisfied
                    } else {
                        OutcomeStatus::Missing
                    }
                }
                Some(Err(error)) => OutcomeStatus::Unverified {
                    error: error.clone(),
                },
                None => OutcomeStatus::Unverified {
                    error: "rules were not fetched".to_string(),
                },
            };
            tracing::debug!(nsg = %group.id, %requirement, ?status);
            report.record(ValidationOutcome {
                requirement: requirement.clone(),
                security_group: group.clone(),
                status,
            });
        }
    }

    let findings = cni::check_cni_compatibility(topology, &topology.cni_candidates());
    if findings.is_empty() {
        report.passed += 1;
    }
    for finding in findings {
        report.record_finding(finding);
    }

    report
}

// === impl ValidationOutcome ===

impl ValidationOutcome {
    pub fn is_satisfied(&self) -> bool {
        self.status == OutcomeStatus::Satisfied
    }

    pub fn criticality(&self) -> Criticality {
        self.requirement.criticality
    }
}

impl fmt::Display for ValidationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} on {} ({})",
            self.requirement.label, self.security_group.display_name, self.requirement
        )
    }
}

// === impl ValidationReport ===

impl ValidationReport {
    pub fn record(&mut self, outcome: ValidationOutcome) {
        match outcome.status {
            OutcomeStatus::Satisfied => {
                self.passed += 1;
                return;
            }
            OutcomeStatus::Missing => {
                tracing::info!(
                    nsg = %outcome.security_group.id,
                    label = %outcome.requirement.label,
                    "Rule missing"
                );
            }
            OutcomeStatus::Unverified { ref error } => {
                tracing::warn!(
                    nsg = %outcome.security_group.id,
                    label = %outcome.requirement.label,
                    %error,
                    "Rule unverified"
                );
            }
        }

        match outcome.criticality() {
            Criticality::Critical => self.failed += 1,
            Criticality::Advisory => self.warned += 1,
        }
        match outcome.status {
            OutcomeStatus::Missing => self.backlog.push(outcome),
            _ => self.unverified.push(outcome),
        }
    }

    pub fn record_finding(&mut self, finding: Finding) {
        match finding.criticality {
            Criticality::Critical => self.failed += 1,
            Criticality::Advisory => self.warned += 1,
        }
        self.findings.push(finding);
    }

    /// Fails when any critical check failed; warns when any advisory check failed or when part of
    /// the topology or catalog could not be resolved.
    pub fn status(&self) -> ReportStatus {
        if self.failed > 0 {
            ReportStatus::Fail
        } else if self.warned > 0 || !self.skipped.is_empty() || !self.gaps.is_empty() {
            ReportStatus::Warn
        } else {
            ReportStatus::Pass
        }
    }
}

// === impl ReportStatus ===

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => "PASS".fmt(f),
            Self::Warn => "WARN".fmt(f),
            Self::Fail => "FAIL".fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        catalog::{self, Catalog, Template, TargetRef},
        requirement::Role,
        rule::{Direction, Protocol, Target},
        topology::{Fact, PodNetworking},
        PortRange,
    };

    fn mk_group(id: &str, role: Role) -> SecurityGroupContext {
        SecurityGroupContext {
            id: id.to_string(),
            display_name: id.to_string(),
            role,
        }
    }

    fn mk_topology() -> ClusterNetworkTopology {
        ClusterNetworkTopology {
            control_plane: vec![mk_group("cp-nsg", Role::ControlPlane)],
            control_plane_cidr: Fact::Known("10.0.0.0/28".parse().unwrap()),
            workers: vec![mk_group("worker-nsg", Role::Worker)],
            worker_cidr: Fact::Known("10.0.1.0/24".parse().unwrap()),
            pod_networking: PodNetworking::Overlay,
            ..ClusterNetworkTopology::new("cluster")
        }
    }

    fn api_ingress() -> Catalog {
        Catalog::builder()
            .require(
                Template::ingress(
                    Role::ControlPlane,
                    "API server from workers",
                    Protocol::Tcp,
                    TargetRef::SubnetOf(Role::Worker),
                )
                .port(catalog::API_SERVER_PORT),
            )
            .require(
                Template::ingress(
                    Role::Worker,
                    "Node ports",
                    Protocol::Tcp,
                    TargetRef::CatchAll,
                )
                .ports(30000, 32767)
                .advisory(),
            )
            .build()
    }

    fn rule_sets(sets: Vec<(&str, Result<Vec<ActualRule>, &str>)>) -> RuleSets {
        sets.into_iter()
            .map(|(id, rules)| {
                let rules: Result<Arc<[ActualRule]>, String> =
                    rules.map(Arc::from).map_err(str::to_string);
                (id.to_string(), rules)
            })
            .collect()
    }

    fn api_rule() -> ActualRule {
        ActualRule::new(
            Direction::Ingress,
            Protocol::Tcp,
            Target::cidr("10.0.1.0/24").unwrap(),
        )
        .with_ports(PortRange::new(6443, 6443).unwrap())
    }

    #[test]
    fn missing_rules_are_split_by_criticality() {
        let topology = mk_topology();
        let instantiated = api_ingress().instantiate(&topology);
        let rules = rule_sets(vec![("cp-nsg", Ok(vec![])), ("worker-nsg", Ok(vec![]))]);

        let report = evaluate(&topology, &instantiated, &rules);
        assert_eq!(report.failed, 1);
        assert_eq!(report.warned, 1);
        // The overlay CNI check passes.
        assert_eq!(report.passed, 1);
        assert_eq!(report.backlog.len(), 2);
        assert_eq!(report.backlog[0].requirement.label, "API server from workers");
        assert_eq!(report.status(), ReportStatus::Fail);
    }

    #[test]
    fn satisfied_rules_pass() {
        let topology = mk_topology();
        let instantiated = api_ingress().instantiate(&topology);
        let node_ports = ActualRule::new(Direction::Ingress, Protocol::Tcp, Target::catch_all());
        let rules = rule_sets(vec![
            ("cp-nsg", Ok(vec![api_rule()])),
            ("worker-nsg", Ok(vec![node_ports])),
        ]);

        let report = evaluate(&topology, &instantiated, &rules);
        assert_eq!((report.passed, report.failed, report.warned), (3, 0, 0));
        assert!(report.backlog.is_empty());
        assert_eq!(report.status(), ReportStatus::Pass);
    }

    #[test]
    fn fetch_failures_are_unverified_not_backlogged() {
        let topology = mk_topology();
        let instantiated = api_ingress().instantiate(&topology);
        let rules = rule_sets(vec![
            ("cp-nsg", Err("service unavailable")),
            ("worker-nsg", Ok(vec![])),
        ]);

        let report = evaluate(&topology, &instantiated, &rules);
        assert_eq!(report.failed, 1);
        assert_eq!(report.unverified.len(), 1);
        assert_eq!(
            report.unverified[0].status,
            OutcomeStatus::Unverified {
                error: "service unavailable".to_string()
            }
        );
        assert_eq!(report.backlog.len(), 1);
        assert_eq!(report.backlog[0].security_group.id, "worker-nsg");
    }

    #[test]
    fn evaluation_is_idempotent() {
        let topology = mk_topology();
        let instantiated = Catalog::oke().instantiate(&topology);
        let rules = rule_sets(vec![
            ("cp-nsg", Ok(vec![api_rule()])),
            ("worker-nsg", Err("timed out")),
        ]);

        let first = evaluate(&topology, &instantiated, &rules);
        let second = evaluate(&topology, &instantiated, &rules);
        assert_eq!(first, second);
    }

    #[test]
    fn critical_cni_findings_fail_the_report() {
        let topology = ClusterNetworkTopology {
            pod_networking: PodNetworking::Native,
            pod_security_groups: vec!["pod-nsg-1".to_string()],
            ..mk_topology()
        };
        let report = evaluate(&topology, &Instantiated::default(), &RuleSets::default());
        assert_eq!(report.passed, 0);
        assert_eq!(report.failed, 1);
        // A single candidate group also warns.
        assert_eq!(report.warned, 1);
        assert_eq!(report.findings.len(), 2);
        assert_eq!(report.status(), ReportStatus::Fail);
    }

    #[test]
    fn attached_pod_groups_satisfy_native_networking() {
        let topology = ClusterNetworkTopology {
            pod_networking: PodNetworking::Native,
            pod_security_groups: vec!["pod-nsg".to_string()],
            node_pod_security_groups: vec!["pod-nsg".to_string()],
            ..mk_topology()
        };
        let instantiated = api_ingress().instantiate(&topology);
        let node_ports = ActualRule::new(Direction::Ingress, Protocol::Tcp, Target::catch_all());
        let rules = rule_sets(vec![
            ("cp-nsg", Ok(vec![api_rule()])),
            ("worker-nsg", Ok(vec![node_ports])),
        ]);

        let report = evaluate(&topology, &instantiated, &rules);
        assert!(report.findings.is_empty(), "{:?}", report.findings);
        // The pod group is not held to worker requirements.
        assert!(report.backlog.is_empty() && report.unverified.is_empty());
        assert_eq!((report.passed, report.failed, report.warned), (3, 0, 0));
        assert_eq!(report.status(), ReportStatus::Pass);
    }

    #[test]
    fn shared_groups_are_checked_once_per_peer() {
        let topology = ClusterNetworkTopology {
            control_plane: vec![mk_group("shared-nsg", Role::ControlPlane)],
            workers: vec![
                mk_group("shared-nsg", Role::Worker),
                mk_group("worker-nsg", Role::Worker),
            ],
            ..mk_topology()
        };
        let catalog = Catalog::builder()
            .require(
                Template::ingress(
                    Role::ControlPlane,
                    "API from workers",
                    Protocol::Tcp,
                    TargetRef::PeerGroups,
                )
                .port(catalog::API_SERVER_PORT)
                .advisory(),
            )
            .build();
        let instantiated = catalog.instantiate(&topology);
        assert_eq!(instantiated.requirements.len(), 2);

        let rules = rule_sets(vec![("shared-nsg", Ok(vec![])), ("worker-nsg", Ok(vec![]))]);
        let report = evaluate(&topology, &instantiated, &rules);
        assert_eq!(report.backlog.len(), 2);
        assert!(report
            .backlog
            .iter()
            .all(|outcome| outcome.security_group.role == Role::ControlPlane));
        assert_eq!(report.warned, 2);
    }

    #[test]
    fn gaps_and_skipped_requirements_warn() {
        let mut topology = mk_topology();
        topology.worker_cidr = Fact::Missing;
        topology.record_gap(crate::topology::TopologyFact::WorkerCidr, "lookup failed");
        let instantiated = api_ingress().instantiate(&topology);
        assert_eq!(instantiated.skipped.len(), 1);

        let node_ports = ActualRule::new(Direction::Ingress, Protocol::All, Target::catch_all());
        let rules = rule_sets(vec![("cp-nsg", Ok(vec![])), ("worker-nsg", Ok(vec![node_ports]))]);
        let report = evaluate(&topology, &instantiated, &rules);
        assert_eq!(report.failed, 0);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.gaps.len(), 1);
        assert_eq!(report.status(), ReportStatus::Warn);
    }
}
