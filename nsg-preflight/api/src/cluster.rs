use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub id: String,
    pub name: Option<String>,
    pub vcn_id: Option<String>,
    pub endpoint_config: Option<ClusterEndpointConfig>,
    pub endpoints: Option<ClusterEndpoints>,

    #[serde(default)]
    pub cluster_pod_network_options: Vec<ClusterPodNetworkOption>,
}

/// Placement of the control-plane endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterEndpointConfig {
    pub subnet_id: Option<String>,

    #[serde(default)]
    pub nsg_ids: Vec<String>,

    pub is_public_ip_enabled: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterEndpoints {
    pub kubernetes: Option<String>,

    /// The private endpoint, as `address:port`.
    pub private_endpoint: Option<String>,

    pub public_endpoint: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPodNetworkOption {
    pub cni_type: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePool {
    pub id: String,
    pub name: Option<String>,
    pub cluster_id: String,
    pub node_config_details: Option<NodePoolNodeConfigDetails>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolNodeConfigDetails {
    #[serde(default)]
    pub nsg_ids: Vec<String>,

    #[serde(default)]
    pub placement_configs: Vec<PlacementConfig>,

    pub node_pool_pod_network_option_details: Option<PodNetworkOptionDetails>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementConfig {
    pub availability_domain: Option<String>,
    pub subnet_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodNetworkOptionDetails {
    pub cni_type: String,

    #[serde(default)]
    pub pod_nsg_ids: Vec<String>,

    #[serde(default)]
    pub pod_subnet_ids: Vec<String>,
}

// === impl Cluster ===

impl Cluster {
    /// The cluster's pod networking CNI type, if configured.
    pub fn cni_type(&self) -> Option<&str> {
        self.cluster_pod_network_options
            .first()
            .map(|opt| opt.cni_type.as_str())
    }

    /// The address of the control plane's private endpoint, without its port.
    pub fn private_endpoint_addr(&self) -> Option<std::net::IpAddr> {
        let endpoint = self.endpoints.as_ref()?.private_endpoint.as_deref()?;
        if let Ok(addr) = endpoint.parse::<std::net::SocketAddr>() {
            return Some(addr.ip());
        }
        endpoint.parse().ok()
    }
}

// === impl NodePool ===

impl NodePool {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn node_nsg_ids(&self) -> &[String] {
        self.node_config_details
            .as_ref()
            .map(|details| details.nsg_ids.as_slice())
            .unwrap_or_default()
    }

    pub fn subnet_ids(&self) -> impl Iterator<Item = &str> {
        self.node_config_details
            .iter()
            .flat_map(|details| details.placement_configs.iter())
            .map(|placement| placement.subnet_id.as_str())
    }

    pub fn pod_network(&self) -> Option<&PodNetworkOptionDetails> {
        self.node_config_details
            .as_ref()?
            .node_pool_pod_network_option_details
            .as_ref()
    }
}
