//! Decides whether a security group's actual rules satisfy a requirement.
//!
//! Configured rules are frequently broader than what a requirement asks for: a catch-all CIDR, an
//! `ALL` protocol rule or an unrestricted port range all subsume narrower requirements. Matching
//! therefore checks for containment rather than equality:
//!
//! 1. Candidates must have the requirement's direction and either its protocol or `ALL`.
//! 2. Candidates must reference an accepted target (see [`target_matches`]).
//! 3. Any `ALL` candidate satisfies the requirement.
//! 4. TCP/UDP: an unrestricted candidate or one whose port range contains the required range.
//! 5. ICMP: an unrestricted candidate or one with the required ICMP type.

use crate::{
    ports::PortRange,
    requirement::RuleRequirement,
    rule::{ActualRule, Protocol, Target},
};


/// Returns true if any of `rules` satisfies `requirement`.
#[inline]
pub fn is_satisfied(requirement: &RuleRequirement, rules: &[ActualRule]) -> bool {
    find_satisfying(requirement, rules).is_some()
}

/// Returns the first rule that satisfies `requirement`, preferring `ALL` protocol rules.
pub fn find_satisfying<'r>(
    requirement: &RuleRequirement,
    rules: &'r [ActualRule],
) -> Option<&'r ActualRule> {
    let candidates = rules
        .iter()
        .filter(|rule| rule.direction == requirement.direction)
        .filter(|rule| rule.protocol == requirement.protocol || rule.protocol == Protocol::All)
        .filter(|rule| {
            requirement
                .accepted_targets()
                .any(|target| target_matches(target, &rule.target))
        })
        .collect::<Vec<_>>();

    if let Some(rule) = candidates
        .iter()
        .copied()
        .find(|rule| rule.protocol == Protocol::All)
    {
        return Some(rule);
    }

    match requirement.protocol {
        Protocol::Tcp | Protocol::Udp => {
            let required = requirement.ports.unwrap_or(PortRange::ALL);
            candidates
                .into_iter()
                .find(|rule| rule.ports.map_or(true, |ports| ports.contains(&required)))
        }
        Protocol::Icmp => candidates
            .into_iter()
            .find(|rule| match (rule.icmp, requirement.icmp) {
                (None, _) => true,
                (Some(_), None) => false,
                (Some(actual), Some(required)) => actual.icmp_type == required.icmp_type,
            }),
        Protocol::All => candidates.into_iter().next(),
    }
}

/// Returns true if an actual rule referencing `actual` covers the `required` peer.
///
/// A CIDR covers any network it contains, so the catch-all CIDR covers every network of its
/// address family. The catch-all CIDR also covers security group and service range peers, since
/// their traffic originates from addresses within it. References to security groups and service
/// ranges only cover themselves.
pub fn target_matches(required: &Target, actual: &Target) -> bool {
    match (required, actual) {
        (Target::Cidr(required), Target::Cidr(actual)) => actual.contains(required),
        (_, Target::Cidr(actual)) => actual.prefix_len() == 0,
        (Target::SecurityGroup(required), Target::SecurityGroup(actual)) => required == actual,
        (Target::ServiceRange(required), Target::ServiceRange(actual)) => {
            required.eq_ignore_ascii_case(actual)
        }
        _ => false,
    }
}
