use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subnet {
    pub id: String,
    pub display_name: Option<String>,
    pub cidr_block: String,
    pub vcn_id: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSecurityGroup {
    pub id: String,
    pub display_name: Option<String>,
    pub vcn_id: Option<String>,
}

// === impl Subnet ===

impl Subnet {
    pub fn cidr(&self) -> Result<nsg_preflight_core::IpNet, nsg_preflight_core::ParseError> {
        match nsg_preflight_core::Target::cidr(&self.cidr_block)? {
            nsg_preflight_core::Target::Cidr(net) => Ok(net),
            _ => Err(nsg_preflight_core::ParseError::InvalidCidr(
                self.cidr_block.clone(),
            )),
        }
    }
}

// === impl NetworkSecurityGroup ===

impl NetworkSecurityGroup {
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }
}
