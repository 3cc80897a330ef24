use crate::{
    cache::RuleCache,
    call::{CallError, CallOptions},
};
use nsg_preflight_api::{ControlApi, SecurityRule};
use nsg_preflight_core::{
    remediation::{self, RemediationRequest},
    report::ValidationReport,
    rule_match,
};
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tokio::{
    io::{
        AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines, Stderr, Stdin,
    },
    sync::Mutex,
};
use tracing::{debug, info, instrument, warn};

/// Decides whether a planned rule is applied.
#[async_trait::async_trait]
pub trait ConfirmationProvider: Send + Sync {
    async fn confirm(&self, request: &RemediationRequest) -> anyhow::Result<Approval>;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Approval {
    Approve,
    Decline,

    /// Approve this and every remaining request.
    ApproveRemaining,

    /// Decline this and every remaining request.
    DeclineRemaining,
}

/// Approves every request.
#[derive(Copy, Clone, Debug, Default)]
pub struct AutoApprove;

/// Presents every request without applying any.
#[derive(Copy, Clone, Debug, Default)]
pub struct DryRun;

/// Asks before each request, reading one answer per line.
///
/// Answers are read from a single buffered reader, so several answers may arrive at once (for
/// instance, when piped).
pub struct Prompt<R = BufReader<Stdin>, W = Stderr> {
    io: Mutex<PromptIo<R, W>>,
}

struct PromptIo<R, W> {
    answers: Lines<R>,
    out: W,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ApplyError {
    #[error("{nsg} rejected the rule: {message}")]
    Rejected { nsg: String, message: String },

    #[error("cancelled before the rule was added")]
    Cancelled,

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Applied {
    Added,

    /// The group's current rules already satisfy the request.
    AlreadySatisfied,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RemediationOutcome {
    pub applied: Vec<RemediationRequest>,
    pub already_satisfied: Vec<RemediationRequest>,
    pub declined: Vec<RemediationRequest>,
    pub failed: Vec<FailedRequest>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FailedRequest {
    pub request: RemediationRequest,
    #[serde(serialize_with = "serialize_display")]
    pub error: ApplyError,
}

/// Writes planned rules to their security groups.
///
/// Requests are applied one at a time. Each is re-checked against its group's current rules
/// immediately before the write, so a request that is already satisfied, including a duplicate of
/// one applied earlier in the batch, is never submitted.
#[derive(Clone)]
pub struct Remediator {
    api: Arc<dyn ControlApi>,
    cache: Arc<RuleCache>,
    options: CallOptions,
}

// === impl Remediator ===

impl Remediator {
    pub fn new(api: Arc<dyn ControlApi>, cache: Arc<RuleCache>, options: CallOptions) -> Self {
        Self {
            api,
            cache,
            options,
        }
    }

    /// Plans a request for each missing rule in `report` and applies the approved ones.
    #[instrument(skip_all, fields(cluster = %report.cluster_id))]
    pub async fn run(
        &self,
        report: &ValidationReport,
        confirm: &dyn ConfirmationProvider,
    ) -> RemediationOutcome {
        let requests = remediation::plan(&report.backlog);
        info!(requests = requests.len(), "Planned remediation");

        let mut outcome = RemediationOutcome::default();
        let mut remaining = None;
        for request in requests {
            let approval = match remaining {
                Some(approval) => approval,
                None => match confirm.confirm(&request).await {
                    Ok(approval) => approval,
                    Err(error) => {
                        warn!(%error, %request, "Confirmation failed");
                        Approval::DeclineRemaining
                    }
                },
            };

            let approved = match approval {
                Approval::Approve => true,
                Approval::Decline => false,
                Approval::ApproveRemaining => {
                    remaining = Some(Approval::Approve);
                    true
                }
                Approval::DeclineRemaining => {
                    remaining = Some(Approval::Decline);
                    false
                }
            };
            if !approved {
                debug!(%request, "Declined");
                outcome.declined.push(request);
                continue;
            }

            match self.apply(&request).await {
                Ok(Applied::Added) => outcome.applied.push(request),
                Ok(Applied::AlreadySatisfied) => outcome.already_satisfied.push(request),
                Err(error) => {
                    warn!(%error, %request, "Failed to add rule");
                    outcome.failed.push(FailedRequest { request, error });
                }
            }
        }

        info!(
            applied = outcome.applied.len(),
            already_satisfied = outcome.already_satisfied.len(),
            declined = outcome.declined.len(),
            failed = outcome.failed.len(),
            "Remediation complete"
        );
        outcome
    }

    /// Adds a single rule unless the group's current rules already satisfy it. No retries.
    #[instrument(skip_all, fields(nsg = %request.security_group.id, label = %request.label))]
    pub async fn apply(&self, request: &RemediationRequest) -> Result<Applied, ApplyError> {
        let nsg = &request.security_group.id;
        match self.cache.fetch(nsg).await {
            Ok(rules) => {
                if rule_match::is_satisfied(&request.as_requirement(), &rules) {
                    debug!("Rule already present");
                    return Ok(Applied::AlreadySatisfied);
                }
            }
            Err(error) if error.source.is_interrupted() => {
                return Err(ApplyError::from_call(nsg, error.source))
            }
            Err(error) => warn!(%error, "Could not re-check rules before adding"),
        }

        let rule = SecurityRule::from(request);
        self.options
            .call(self.api.add_security_rules(nsg, vec![rule]))
            .await
            .map_err(|error| ApplyError::from_call(nsg, error))?;
        self.cache.invalidate(nsg);

        info!("Added rule");
        Ok(Applied::Added)
    }
}

// === impl ApplyError ===

impl ApplyError {
    fn from_call(nsg: &str, error: CallError) -> Self {
        match error {
            CallError::Cancelled => Self::Cancelled,
            CallError::Timeout(timeout) => Self::Timeout(timeout),
            CallError::Api(error) => Self::Rejected {
                nsg: nsg.to_string(),
                message: format!("{:#}", error),
            },
        }
    }
}

// === impl RemediationOutcome ===

impl RemediationOutcome {
    /// True if every planned request was applied or found to be unnecessary.
    pub fn is_complete(&self) -> bool {
        self.declined.is_empty() && self.failed.is_empty()
    }

    pub fn requests(&self) -> usize {
        self.applied.len() + self.already_satisfied.len() + self.declined.len() + self.failed.len()
    }
}

// === impl AutoApprove ===

#[async_trait::async_trait]
impl ConfirmationProvider for AutoApprove {
    async fn confirm(&self, request: &RemediationRequest) -> anyhow::Result<Approval> {
        info!(%request, "Approved");
        Ok(Approval::Approve)
    }
}

// === impl DryRun ===

#[async_trait::async_trait]
impl ConfirmationProvider for DryRun {
    async fn confirm(&self, request: &RemediationRequest) -> anyhow::Result<Approval> {
        info!(%request, "Would add rule");
        Ok(Approval::Decline)
    }
}

// === impl Prompt ===

impl Prompt {
    /// Asks on stderr and reads answers from stdin.
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stderr())
    }
}

impl<R, W> Prompt<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(answers: R, out: W) -> Self {
        Self {
            io: Mutex::new(PromptIo {
                answers: answers.lines(),
                out,
            }),
        }
    }
}

#[async_trait::async_trait]
impl<R, W> ConfirmationProvider for Prompt<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn confirm(&self, request: &RemediationRequest) -> anyhow::Result<Approval> {
        let mut io = self.io.lock().await;
        io.out
            .write_all(format!("Add {}? [y]es/[n]o/[a]ll/[q]uit: ", request).as_bytes())
            .await?;
        io.out.flush().await?;

        match io.answers.next_line().await? {
            Some(line) => Ok(parse_answer(&line)),
            None => anyhow::bail!("no answer; input closed"),
        }
    }
}

fn parse_answer(answer: &str) -> Approval {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Approval::Approve,
        "a" | "all" => Approval::ApproveRemaining,
        "q" | "quit" => Approval::DeclineRemaining,
        _ => Approval::Decline,
    }
}

fn serialize_display<T: std::fmt::Display, S: serde::Serializer>(
    value: &T,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}
