use crate::{
    api::SnapshotApi,
    core::{remediation, report::ReportStatus, Catalog},
    AutoApprove, CallOptions, ConfirmationProvider, DryRun, OutputFormat, Preflight, Prompt,
    TopologyHints,
};
use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::info;

// Returned when a critical requirement is unmet.
const FAILURE_EXIT_CODE: i32 = 1;

#[derive(Debug, Parser)]
#[clap(
    name = "nsg-preflight",
    version,
    about = "Checks that a cluster's network security groups allow new nodes to join"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "nsg_preflight=info,warn",
        env = "NSG_PREFLIGHT_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    /// A JSON export of the control API's state.
    #[clap(long, env = "NSG_PREFLIGHT_SNAPSHOT")]
    snapshot: PathBuf,

    /// Writes rules added by remediation back to the snapshot.
    #[clap(long)]
    persist: bool,

    #[clap(long, env = "NSG_PREFLIGHT_CLUSTER_ID")]
    cluster_id: Option<String>,

    /// A security group the new node will carry. May be repeated.
    #[clap(long = "worker-nsg")]
    worker_nsgs: Vec<String>,

    /// A pod security group the new node will attach with native pod networking. May be
    /// repeated.
    #[clap(long = "pod-nsg")]
    pod_nsgs: Vec<String>,

    /// The subnet the new node will be placed in.
    #[clap(long)]
    worker_subnet: Option<String>,

    /// The node pool, by id or name, the new node will join.
    #[clap(long)]
    node_pool: Option<String>,

    /// A service range label accepted in place of 0.0.0.0/0 for TLS egress.
    #[clap(long)]
    services_network: Option<String>,

    /// Deadline for each control API call.
    #[clap(long, default_value = "30s", value_parser = parse_timeout)]
    timeout: Duration,

    #[clap(long, value_enum, default_value = "plain")]
    output: OutputFormat,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Reports the rules a new node needs that are missing.
    Validate,

    /// Adds the missing rules and validates again.
    Remediate {
        /// Applies every planned rule without asking.
        #[clap(long)]
        yes: bool,

        /// Shows the planned rules without applying them.
        #[clap(long, conflicts_with = "yes")]
        dry_run: bool,
    },

    /// Prints the rules configured on security groups.
    Rules {
        #[clap(long = "nsg", required = true)]
        nsgs: Vec<String>,
    },
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        if Self::parse().run().await? == ReportStatus::Fail {
            std::process::exit(FAILURE_EXIT_CODE);
        }
        Ok(())
    }

    pub async fn run(self) -> Result<ReportStatus> {
        let Self {
            log_level,
            log_format,
            snapshot,
            persist,
            cluster_id,
            worker_nsgs,
            pod_nsgs,
            worker_subnet,
            node_pool,
            services_network,
            timeout,
            output,
            command,
        } = self;

        log_format.try_init(log_level)?;

        let api = Arc::new(SnapshotApi::from_path(&snapshot)?);

        let (shutdown_tx, shutdown_rx) = drain::channel();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted; cancelling in-flight calls");
                shutdown_tx.drain().await;
            }
        });
        let options = CallOptions::new(timeout).with_cancel(shutdown_rx);
        let preflight = Preflight::new(api.clone(), Catalog::oke(), options);

        let hints = || -> Result<TopologyHints> {
            Ok(TopologyHints {
                cluster_id: cluster_id
                    .clone()
                    .ok_or_else(|| anyhow!("--cluster-id is required"))?,
                worker_nsgs: worker_nsgs.clone(),
                pod_nsgs: pod_nsgs.clone(),
                worker_subnet: worker_subnet.clone(),
                node_pool: node_pool.clone(),
                services_network: services_network.clone(),
            })
        };

        match command {
            Command::Validate => {
                let report = preflight.run_validation(&hints()?).await?;
                println!("{}", output.report(&report)?);
                Ok(report.status())
            }

            Command::Remediate { yes, dry_run } => {
                let topology = preflight.discover(&hints()?).await;
                let report = preflight.validate(&topology).await?;
                println!("{}", output.report(&report)?);
                println!("{}", output.plan(&remediation::plan(&report.backlog))?);
                if report.backlog.is_empty() {
                    return Ok(report.status());
                }

                let prompt;
                let confirm: &dyn ConfirmationProvider = if dry_run {
                    &DryRun
                } else if yes {
                    &AutoApprove
                } else {
                    prompt = Prompt::stdio();
                    &prompt
                };
                let outcome = preflight.run_remediation_with(&report, confirm).await;
                println!("{}", output.remediation(&outcome)?);

                if persist && !outcome.applied.is_empty() {
                    api.save(&snapshot).context("failed to persist remediation")?;
                }

                if dry_run {
                    return Ok(report.status());
                }
                let report = preflight.validate(&topology).await?;
                println!("{}", output.report(&report)?);
                Ok(report.status())
            }

            Command::Rules { nsgs } => {
                print!("{}", preflight.dump_rules(&nsgs).await);
                Ok(ReportStatus::Pass)
            }
        }
    }
}

/// Parses a whole number followed by a unit: `ms`, `s`, `m`, `h` or `d`. A bare `0` disables
/// the deadline.
pub(crate) fn parse_timeout(s: &str) -> Result<Duration> {
    let s = s.trim();
    let (count, unit) = s.split_at(s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len()));
    if count.is_empty() {
        bail!("timeout {:?} must start with a number", s);
    }
    let count = count
        .parse::<u64>()
        .with_context(|| format!("timeout {:?} is out of range", s))?;

    let unit_ms: u64 = match unit {
        "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        "" if count == 0 => 0,
        "" => bail!("timeout {:?} needs a unit: ms, s, m, h or d", s),
        unit => bail!("timeout {:?} has an unknown unit {:?}", s, unit),
    };
    count
        .checked_mul(unit_ms)
        .map(Duration::from_millis)
        .ok_or_else(|| anyhow!("timeout {:?} is out of range", s))
}
