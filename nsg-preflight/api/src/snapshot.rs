use crate::{Cluster, ControlApi, NetworkSecurityGroup, NodePool, SecurityRule, Subnet};
use anyhow::{bail, Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::Path};

/// A point-in-time export of the control API's state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub clusters: Vec<Cluster>,

    #[serde(default)]
    pub node_pools: Vec<NodePool>,

    #[serde(default)]
    pub subnets: Vec<Subnet>,

    #[serde(default)]
    pub network_security_groups: Vec<NetworkSecurityGroup>,

    /// Security rules, by security group id.
    #[serde(default)]
    pub security_rules: BTreeMap<String, Vec<SecurityRule>>,
}

const RULE_ID_PREFIX: &str = "snapshot-rule-";

/// Serves the control API from a [`Snapshot`]. Added rules are kept in memory and may be written
/// back with [`SnapshotApi::save`].
#[derive(Debug)]
pub struct SnapshotApi {
    state: RwLock<State>,
}

#[derive(Debug)]
struct State {
    snapshot: Snapshot,
    next_rule_id: usize,
}

// === impl SnapshotApi ===

impl SnapshotApi {
    /// Serves `snapshot`. Ids for added rules continue after the highest id already assigned.
    pub fn new(snapshot: Snapshot) -> Self {
        let next_rule_id = snapshot
            .security_rules
            .values()
            .flatten()
            .filter_map(|rule| {
                let id = rule.id.as_deref()?.strip_prefix(RULE_ID_PREFIX)?;
                id.parse::<usize>().ok()
            })
            .max()
            .map_or(1, |id| id + 1);
        Self {
            state: RwLock::new(State {
                snapshot,
                next_rule_id,
            }),
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read snapshot {}", path.display()))?;
        let snapshot = serde_json::from_slice::<Snapshot>(&bytes)
            .with_context(|| format!("failed to parse snapshot {}", path.display()))?;
        tracing::debug!(
            path = %path.display(),
            clusters = snapshot.clusters.len(),
            nsgs = snapshot.network_security_groups.len(),
            "Loaded snapshot"
        );
        Ok(Self::new(snapshot))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_vec_pretty(&self.snapshot())?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write snapshot {}", path.display()))?;
        tracing::info!(path = %path.display(), "Saved snapshot");
        Ok(())
    }

    pub fn snapshot(&self) -> Snapshot {
        self.state.read().snapshot.clone()
    }
}

#[async_trait::async_trait]
impl ControlApi for SnapshotApi {
    async fn get_cluster(&self, cluster_id: &str) -> Result<Cluster> {
        let state = self.state.read();
        match state.snapshot.clusters.iter().find(|c| c.id == cluster_id) {
            Some(cluster) => Ok(cluster.clone()),
            None => bail!("cluster {} not found", cluster_id),
        }
    }

    async fn list_node_pools(&self, cluster_id: &str) -> Result<Vec<NodePool>> {
        let state = self.state.read();
        Ok(state
            .snapshot
            .node_pools
            .iter()
            .filter(|pool| pool.cluster_id == cluster_id)
            .cloned()
            .collect())
    }

    async fn get_subnet(&self, subnet_id: &str) -> Result<Subnet> {
        let state = self.state.read();
        match state.snapshot.subnets.iter().find(|s| s.id == subnet_id) {
            Some(subnet) => Ok(subnet.clone()),
            None => bail!("subnet {} not found", subnet_id),
        }
    }

    async fn get_network_security_group(&self, nsg_id: &str) -> Result<NetworkSecurityGroup> {
        let state = self.state.read();
        match state
            .snapshot
            .network_security_groups
            .iter()
            .find(|nsg| nsg.id == nsg_id)
        {
            Some(nsg) => Ok(nsg.clone()),
            None => bail!("network security group {} not found", nsg_id),
        }
    }

    async fn list_security_rules(&self, nsg_id: &str) -> Result<Vec<SecurityRule>> {
        let state = self.state.read();
        if let Some(rules) = state.snapshot.security_rules.get(nsg_id) {
            return Ok(rules.clone());
        }
        if state
            .snapshot
            .network_security_groups
            .iter()
            .any(|nsg| nsg.id == nsg_id)
        {
            return Ok(vec![]);
        }
        bail!("network security group {} not found", nsg_id)
    }

    async fn add_security_rules(
        &self,
        nsg_id: &str,
        rules: Vec<SecurityRule>,
    ) -> Result<Vec<SecurityRule>> {
        let mut state = self.state.write();
        let known = state.snapshot.security_rules.contains_key(nsg_id)
            || state
                .snapshot
                .network_security_groups
                .iter()
                .any(|nsg| nsg.id == nsg_id);
        if !known {
            bail!("network security group {} not found", nsg_id);
        }

        let mut added = Vec::with_capacity(rules.len());
        for mut rule in rules {
            rule.id = Some(format!("{}{}", RULE_ID_PREFIX, state.next_rule_id));
            state.next_rule_id += 1;
            added.push(rule);
        }
        state
            .snapshot
            .security_rules
            .entry(nsg_id.to_string())
            .or_default()
            .extend(added.iter().cloned());
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_snapshot() -> Snapshot {
        serde_json::from_value(serde_json::json!({
            "clusters": [{ "id": "cluster-1" }],
            "nodePools": [
                { "id": "pool-1", "clusterId": "cluster-1" },
                { "id": "pool-2", "clusterId": "cluster-2" }
            ],
            "networkSecurityGroups": [
                { "id": "nsg-1", "displayName": "workers" },
                { "id": "nsg-2" }
            ],
            "securityRules": {
                "nsg-1": [{
                    "direction": "INGRESS",
                    "protocol": "all",
                    "source": "0.0.0.0/0",
                    "sourceType": "CIDR_BLOCK"
                }]
            }
        }))
        .expect("snapshot must parse")
    }

    #[tokio::test]
    async fn lookups() {
        let api = SnapshotApi::new(mk_snapshot());
        assert_eq!(api.get_cluster("cluster-1").await.unwrap().id, "cluster-1");
        assert!(api.get_cluster("cluster-2").await.is_err());

        let pools = api.list_node_pools("cluster-1").await.unwrap();
        assert_eq!(pools.len(), 1);
        assert_eq!(pools[0].id, "pool-1");

        assert_eq!(api.list_security_rules("nsg-1").await.unwrap().len(), 1);
        assert!(api.list_security_rules("nsg-2").await.unwrap().is_empty());
        assert!(api.list_security_rules("nsg-3").await.is_err());
        assert!(api.get_subnet("subnet-1").await.is_err());
    }

    #[tokio::test]
    async fn added_rules_are_assigned_ids_and_persisted() {
        let api = SnapshotApi::new(mk_snapshot());
        let rule = SecurityRule {
            direction: "EGRESS".to_string(),
            protocol: "6".to_string(),
            destination: Some("10.0.0.0/28".to_string()),
            destination_type: Some("CIDR_BLOCK".to_string()),
            ..Default::default()
        };

        let added = api
            .add_security_rules("nsg-2", vec![rule.clone()])
            .await
            .unwrap();
        assert_eq!(added[0].id.as_deref(), Some("snapshot-rule-1"));
        assert_eq!(api.list_security_rules("nsg-2").await.unwrap(), added);
        assert!(api.add_security_rules("nsg-3", vec![rule]).await.is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        api.save(&path).unwrap();
        let reloaded = SnapshotApi::from_path(&path).unwrap();
        assert_eq!(reloaded.snapshot(), api.snapshot());
    }

    #[tokio::test]
    async fn reloaded_snapshots_continue_rule_ids() {
        let mut snapshot = mk_snapshot();
        let rules = snapshot.security_rules.get_mut("nsg-1").unwrap();
        rules[0].id = Some("snapshot-rule-7".to_string());
        rules.push(SecurityRule {
            id: Some("ocid1.securityrule.oc1..aaaa".to_string()),
            ..rules[0].clone()
        });
        let api = SnapshotApi::new(snapshot);

        let rule = SecurityRule {
            direction: "INGRESS".to_string(),
            protocol: "all".to_string(),
            ..Default::default()
        };
        let added = api
            .add_security_rules("nsg-2", vec![rule.clone(), rule])
            .await
            .unwrap();
        let ids = added
            .iter()
            .map(|rule| rule.id.as_deref().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(ids, ["snapshot-rule-8", "snapshot-rule-9"]);

        // A snapshot with no assigned ids starts from the beginning.
        let api = SnapshotApi::new(Snapshot::default());
        assert_eq!(api.state.read().next_rule_id, 1);
    }
}
