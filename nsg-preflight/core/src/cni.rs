//! Checks that a node's security groups suit the cluster's pod networking mode.

use crate::{
    requirement::Criticality,
    topology::{ClusterNetworkTopology, PodNetworking},
};
use serde::Serialize;
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub criticality: Criticality,
    pub message: String,

    /// The security group the finding refers to, if any.
    pub security_group: Option<String>,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.criticality, self.message)
    }
}

/// Cross-references the pod networking mode against the security groups a node will carry.
///
/// With native pod networking, every pod security group used by existing node pools must be among
/// the candidates. With overlay networking, pod security groups are unnecessary. When the mode is
/// unknown, nothing can be checked.
pub fn check_cni_compatibility(
    topology: &ClusterNetworkTopology,
    candidates: &[String],
) -> Vec<Finding> {
    let mut findings = Vec::new();
    match topology.pod_networking {
        PodNetworking::Native => {
            if topology.pod_security_groups.is_empty() {
                findings.push(Finding {
                    criticality: Criticality::Advisory,
                    message: "native pod networking is enabled but no pod security groups were \
                              recovered from existing node pools"
                        .to_string(),
                    security_group: None,
                });
            }

            for pod_nsg in &topology.pod_security_groups {
                if !candidates.contains(pod_nsg) {
                    findings.push(Finding {
                        criticality: Criticality::Critical,
                        message: format!(
                            "pod security group {} is not attached; pods on this node will not \
                             be reachable",
                            pod_nsg
                        ),
                        security_group: Some(pod_nsg.clone()),
                    });
                }
            }

            if candidates.len() < 2 {
                findings.push(Finding {
                    criticality: Criticality::Advisory,
                    message: format!(
                        "native pod networking usually needs separate node and pod security \
                         groups, but only {} candidate(s) were supplied",
                        candidates.len()
                    ),
                    security_group: None,
                });
            }
        }

        PodNetworking::Overlay => {
            for pod_nsg in &topology.pod_security_groups {
                if candidates.contains(pod_nsg) {
                    findings.push(Finding {
                        criticality: Criticality::Advisory,
                        message: format!(
                            "pod security group {} is unnecessary with overlay pod networking",
                            pod_nsg
                        ),
                        security_group: Some(pod_nsg.clone()),
                    });
                }
            }
        }

        PodNetworking::Unknown => findings.push(Finding {
            criticality: Criticality::Advisory,
            message: "pod networking mode is unknown; pod security groups were not checked"
                .to_string(),
            security_group: None,
        }),
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn native(pod_nsgs: &[&str]) -> ClusterNetworkTopology {
        ClusterNetworkTopology {
            pod_networking: PodNetworking::Native,
            pod_security_groups: pod_nsgs.iter().map(|s| s.to_string()).collect(),
            ..ClusterNetworkTopology::new("cluster")
        }
    }

    fn critical(findings: &[Finding]) -> Vec<&Finding> {
        findings
            .iter()
            .filter(|f| f.criticality == Criticality::Critical)
            .collect()
    }

    #[test]
    fn native_requires_pod_groups() {
        let topology = native(&["pod-nsg-1"]);

        let findings = check_cni_compatibility(&topology, &["worker-nsg-1".to_string()]);
        let missing = critical(&findings);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].security_group.as_deref(), Some("pod-nsg-1"));

        let findings = check_cni_compatibility(
            &topology,
            &["worker-nsg-1".to_string(), "pod-nsg-1".to_string()],
        );
        assert!(findings.is_empty(), "{:?}", findings);
    }

    #[test]
    fn native_with_a_single_candidate_warns() {
        let topology = native(&[]);
        let findings = check_cni_compatibility(&topology, &["nsg".to_string()]);
        assert!(findings
            .iter()
            .all(|f| f.criticality == Criticality::Advisory));
        assert_eq!(findings.len(), 2);
    }

    #[test]
    fn overlay_flags_unnecessary_pod_groups() {
        let topology = ClusterNetworkTopology {
            pod_networking: PodNetworking::Overlay,
            ..native(&["pod-nsg-1"])
        };
        assert!(check_cni_compatibility(&topology, &["worker-nsg-1".to_string()]).is_empty());

        let findings = check_cni_compatibility(&topology, &["pod-nsg-1".to_string()]);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].criticality, Criticality::Advisory);
    }

    #[test]
    fn unknown_mode_yields_a_single_advisory() {
        let topology = ClusterNetworkTopology::new("cluster");
        let findings = check_cni_compatibility(&topology, &[]);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].criticality, Criticality::Advisory);
    }
}
