use crate::cache::RuleCache;
use nsg_preflight_core::{
    report::{self, ValidationReport},
    Catalog, ClusterNetworkTopology,
};
use std::sync::Arc;
use tracing::{info, instrument};

/// Evaluates a catalog against the rules currently configured on a cluster's security groups.
#[derive(Clone, Debug)]
pub struct Validator {
    catalog: Arc<Catalog>,
    cache: Arc<RuleCache>,
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("no security groups were found or supplied for cluster {cluster_id}")]
    NoSecurityGroups { cluster_id: String },
}

// === impl Validator ===

impl Validator {
    pub fn new(catalog: Arc<Catalog>, cache: Arc<RuleCache>) -> Self {
        Self { catalog, cache }
    }

    #[instrument(skip_all, fields(cluster = %topology.cluster_id))]
    pub async fn validate(
        &self,
        topology: &ClusterNetworkTopology,
    ) -> Result<ValidationReport, ValidationError> {
        if topology.contexts().next().is_none() {
            return Err(ValidationError::NoSecurityGroups {
                cluster_id: topology.cluster_id.clone(),
            });
        }

        let instantiated = self.catalog.instantiate(topology);
        let rules = self
            .cache
            .fetch_all(topology.contexts().map(|group| group.id.as_str()))
            .await;
        let report = report::evaluate(topology, &instantiated, &rules);

        info!(
            status = %report.status(),
            passed = report.passed,
            failed = report.failed,
            warned = report.warned,
            unverified = report.unverified.len(),
            skipped = report.skipped.len(),
            "Validated"
        );
        Ok(report)
    }
}
