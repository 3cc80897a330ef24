use crate::call::{CallError, CallOptions};
use ahash::AHashMap as HashMap;
use nsg_preflight_api::ControlApi;
use nsg_preflight_core::{report::RuleSets, ActualRule};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Memoizes each security group's rules for the lifetime of a run.
///
/// Fetches for distinct groups may run concurrently. When two fetches for the same group race, the
/// first to complete is kept.
pub struct RuleCache {
    api: Arc<dyn ControlApi>,
    options: CallOptions,
    rules: Mutex<HashMap<String, Arc<[ActualRule]>>>,
}

#[derive(Debug, thiserror::Error)]
#[error("failed to list rules for {nsg}: {source}")]
pub struct FetchError {
    pub nsg: String,
    #[source]
    pub source: CallError,
}

// === impl RuleCache ===

impl RuleCache {
    pub fn new(api: Arc<dyn ControlApi>, options: CallOptions) -> Self {
        Self {
            api,
            options,
            rules: Mutex::new(HashMap::default()),
        }
    }

    #[instrument(skip(self))]
    pub async fn fetch(&self, nsg: &str) -> Result<Arc<[ActualRule]>, FetchError> {
        if let Some(rules) = self.rules.lock().get(nsg) {
            return Ok(rules.clone());
        }

        let listed = self
            .options
            .call(self.api.list_security_rules(nsg))
            .await
            .map_err(|source| FetchError {
                nsg: nsg.to_string(),
                source,
            })?;

        // A rule that cannot be read cannot satisfy a requirement.
        let rules = listed
            .iter()
            .filter_map(|rule| match ActualRule::try_from(rule) {
                Ok(rule) => Some(rule),
                Err(error) => {
                    warn!(%nsg, rule = ?rule.id, %error, "Ignoring unreadable rule");
                    None
                }
            })
            .collect::<Arc<[_]>>();
        debug!(%nsg, rules = rules.len(), "Fetched rules");

        Ok(self
            .rules
            .lock()
            .entry(nsg.to_string())
            .or_insert(rules)
            .clone())
    }

    /// Fetches the rules of every listed group concurrently.
    pub async fn fetch_all<'a>(&self, nsgs: impl IntoIterator<Item = &'a str>) -> RuleSets {
        let mut ids = nsgs.into_iter().collect::<Vec<_>>();
        ids.sort_unstable();
        ids.dedup();

        let results = futures::future::join_all(ids.iter().map(|nsg| self.fetch(nsg))).await;
        ids.into_iter()
            .zip(results)
            .map(|(nsg, res)| {
                let res = res.map_err(|error| {
                    warn!(%error, "Rules unavailable");
                    error.source.to_string()
                });
                (nsg.to_string(), res)
            })
            .collect()
    }

    pub fn invalidate(&self, nsg: &str) {
        if self.rules.lock().remove(nsg).is_some() {
            debug!(%nsg, "Invalidated cached rules");
        }
    }

    pub fn is_cached(&self, nsg: &str) -> bool {
        self.rules.lock().contains_key(nsg)
    }
}

impl std::fmt::Debug for RuleCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleCache")
            .field("options", &self.options)
            .field("groups", &self.rules.lock().len())
            .finish()
    }
}
