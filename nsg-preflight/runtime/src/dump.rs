use crate::cache::RuleCache;
use nsg_preflight_core::{ActualRule, Protocol};
use std::fmt::Write;

const HEADER: [&str; 5] = ["DIRECTION", "PROTOCOL", "TARGET", "PORTS", "DESCRIPTION"];

/// Renders the rules of each group as a table. No matching is performed.
pub async fn dump_rules(cache: &RuleCache, nsgs: &[String]) -> String {
    let rules = cache.fetch_all(nsgs.iter().map(String::as_str)).await;

    let mut out = String::new();
    for nsg in nsgs {
        let _ = writeln!(out, "{}", nsg);
        match rules.get(nsg) {
            Some(Ok(rules)) if rules.is_empty() => out.push_str("  (no rules)\n"),
            Some(Ok(rules)) => out.push_str(&render_table(rules)),
            Some(Err(error)) => {
                let _ = writeln!(out, "  error: {}", error);
            }
            None => out.push_str("  (not fetched)\n"),
        }
        out.push('\n');
    }
    out
}

pub fn render_table(rules: &[ActualRule]) -> String {
    let rows = rules.iter().map(row).collect::<Vec<_>>();

    let mut widths = HEADER.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let mut out = String::new();
    let header = HEADER.map(str::to_string);
    for cells in std::iter::once(&header).chain(&rows) {
        let mut line = String::from(" ");
        for (cell, width) in cells.iter().zip(widths) {
            let _ = write!(line, " {:<width$}", cell, width = width);
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

fn row(rule: &ActualRule) -> [String; 5] {
    [
        rule.direction.to_string(),
        rule.protocol.to_string(),
        rule.target.to_string(),
        ports(rule),
        rule.description.clone().unwrap_or_default(),
    ]
}

fn ports(rule: &ActualRule) -> String {
    match rule.protocol {
        Protocol::Tcp | Protocol::Udp => rule
            .ports
            .map(|ports| ports.to_string())
            .unwrap_or_else(|| "all".to_string()),
        Protocol::Icmp => match rule.icmp {
            Some(icmp) => match icmp.code {
                Some(code) => format!("{}/{}", icmp.icmp_type, code),
                None => icmp.icmp_type.to_string(),
            },
            None => "all".to_string(),
        },
        Protocol::All => "all".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nsg_preflight_core::{Direction, PortRange, Target};

    #[test]
    fn renders_rules() {
        let rules = [
            ActualRule::new(
                Direction::Ingress,
                Protocol::Tcp,
                Target::cidr("10.0.1.0/24").unwrap(),
            )
            .with_ports(PortRange::new(6443, 6443).unwrap())
            .with_description("api"),
            ActualRule::new(Direction::Egress, Protocol::Icmp, Target::catch_all())
                .with_icmp(3, Some(4)),
            ActualRule::new(
                Direction::Egress,
                Protocol::All,
                Target::security_group("nsg-2"),
            ),
        ];

        let table = render_table(&rules);
        let lines = table.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "  DIRECTION PROTOCOL TARGET      PORTS DESCRIPTION");
        assert_eq!(lines[1], "  INGRESS   TCP      10.0.1.0/24 6443  api");
        assert_eq!(lines[2], "  EGRESS    ICMP     0.0.0.0/0   3/4");
        assert_eq!(lines[3], "  EGRESS    ALL      nsg-2       all");
    }
}
