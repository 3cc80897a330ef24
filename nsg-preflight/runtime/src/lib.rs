#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use nsg_preflight_api as api;
pub use nsg_preflight_core as core;

mod args;
mod cache;
mod call;
mod discover;
mod dump;
mod output;
mod remediate;
mod validate;


pub use self::{
    args::Args,
    cache::{FetchError, RuleCache},
    call::{CallError, CallOptions},
    discover::{Discovery, TopologyHints},
    dump::render_table,
    output::OutputFormat,
    remediate::{
        Applied, ApplyError, Approval, AutoApprove, ConfirmationProvider, DryRun, FailedRequest,
        Prompt, RemediationOutcome, Remediator,
    },
    validate::{ValidationError, Validator},
};

use self::{
    api::ControlApi,
    core::{report::ValidationReport, Catalog, ClusterNetworkTopology},
};
use std::sync::Arc;

/// Discovers a cluster's topology, validates its security group rules and remediates the gaps,
/// sharing one rule cache across the run.
#[derive(Clone)]
pub struct Preflight {
    cache: Arc<RuleCache>,
    discovery: Discovery,
    validator: Validator,
    remediator: Remediator,
}

// === impl Preflight ===

impl Preflight {
    pub fn new(api: Arc<dyn ControlApi>, catalog: Catalog, options: CallOptions) -> Self {
        let cache = Arc::new(RuleCache::new(api.clone(), options.clone()));
        Self {
            discovery: Discovery::new(api.clone(), options.clone()),
            validator: Validator::new(Arc::new(catalog), cache.clone()),
            remediator: Remediator::new(api, cache.clone(), options),
            cache,
        }
    }

    pub async fn discover(&self, hints: &TopologyHints) -> ClusterNetworkTopology {
        self.discovery.discover(hints).await
    }

    pub async fn validate(
        &self,
        topology: &ClusterNetworkTopology,
    ) -> Result<ValidationReport, ValidationError> {
        self.validator.validate(topology).await
    }

    /// Discovers the cluster described by `hints` and validates it.
    pub async fn run_validation(
        &self,
        hints: &TopologyHints,
    ) -> Result<ValidationReport, ValidationError> {
        let topology = self.discover(hints).await;
        self.validate(&topology).await
    }

    /// Applies the rules missing from `report`, asking on stdin before each one unless
    /// `auto_approve` is set.
    pub async fn run_remediation(
        &self,
        report: &ValidationReport,
        auto_approve: bool,
    ) -> RemediationOutcome {
        if auto_approve {
            self.run_remediation_with(report, &AutoApprove).await
        } else {
            self.run_remediation_with(report, &Prompt::stdio()).await
        }
    }

    pub async fn run_remediation_with(
        &self,
        report: &ValidationReport,
        confirm: &dyn ConfirmationProvider,
    ) -> RemediationOutcome {
        self.remediator.run(report, confirm).await
    }

    pub async fn dump_rules(&self, nsgs: &[String]) -> String {
        dump::dump_rules(&self.cache, nsgs).await
    }

    pub fn cache(&self) -> &RuleCache {
        &self.cache
    }
}
