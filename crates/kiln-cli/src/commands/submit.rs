//! The `kiln submit` command.
//!
//! Assembles one immutable `SubmissionConfig` by layering, in order: the
//! embedded defaults, each `--config` file left to right, and finally the
//! command-line flags. The assembled config is handed to the dispatcher;
//! the process exit code mirrors the job outcome.

use anyhow::{Context, bail};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::error;

use kiln_core::{PoolConfig, SubmissionConfig, add_option};
use kiln_provider::{GcloudControl, GsutilStorage};
use kiln_submitter::Dispatcher;

/// Baked-in base layer; every field can be overridden by files or flags.
const DEFAULT_CONFIG: &str = include_str!("../../default.json");

#[derive(Args)]
pub struct SubmitArgs {
    /// JSON configuration files, layered left to right.
    #[arg(long = "config", value_name = "FILE")]
    pub configs: Vec<PathBuf>,

    /// Client id owning the submission and its cluster pool.
    #[arg(long)]
    pub client_id: Option<String>,

    /// Job type, e.g. hadoop, spark, pyspark.
    #[arg(long)]
    pub job_type: Option<String>,

    #[arg(long)]
    pub region: Option<String>,

    /// Bucket receiving job logs and history files.
    #[arg(long)]
    pub log_bucket: Option<String>,

    /// Metrics backend tag (logging, null).
    #[arg(long)]
    pub metrics: Option<String>,

    /// Log the provider commands without executing them.
    #[arg(long)]
    pub dry_run: bool,

    /// Pool size; requires --pool-max-age.
    #[arg(long)]
    pub pool_limit: Option<u32>,

    /// Pooled cluster lifetime, e.g. "1h"; requires --pool-limit.
    #[arg(long, value_parser = humantime::parse_duration)]
    pub pool_max_age: Option<Duration>,

    /// Reuse a prior job with the same dedup id at most this old, e.g. "6h".
    #[arg(long, value_parser = humantime::parse_duration)]
    pub dedup_max_age: Option<Duration>,

    /// Liveness stamp interval, e.g. "60s".
    #[arg(long, value_parser = humantime::parse_duration)]
    pub heartbeat_interval: Option<Duration>,

    /// Cluster create option, KEY=VALUE, repeatable. List-valued keys
    /// (labels, metadata, properties, ...) accumulate.
    #[arg(long = "cluster-option", value_name = "KEY=VALUE")]
    pub cluster_options: Vec<String>,

    /// Job submit option, KEY=VALUE, repeatable.
    #[arg(long = "submit-option", value_name = "KEY=VALUE")]
    pub submit_options: Vec<String>,

    /// Arguments passed through to the job, after `--`.
    #[arg(last = true)]
    pub job_args: Vec<String>,
}

pub async fn run(args: SubmitArgs) -> anyhow::Result<()> {
    let config = assemble(&args)?;

    let tag = config.metrics.as_deref().unwrap_or("logging");
    let Some(metrics) = kiln_metrics::for_tag(tag) else {
        bail!("unknown metrics backend: {tag}");
    };
    let client_id = config.client_id.clone().unwrap_or_default();

    let dispatcher = Dispatcher::new(
        Arc::new(GcloudControl::new(config.dry_run)),
        Arc::new(GsutilStorage::new(config.dry_run)),
        metrics.clone(),
    );

    match dispatcher.run(&config).await {
        Ok(true) => {
            metrics.execution_result(&client_id, true);
            metrics.flush();
            Ok(())
        }
        Ok(false) => {
            error!("job failed");
            metrics.execution_result(&client_id, false);
            metrics.flush();
            std::process::exit(1);
        }
        Err(err) => {
            metrics.fatal_error(&client_id, &err.to_string());
            metrics.execution_result(&client_id, false);
            metrics.flush();
            Err(err.into())
        }
    }
}

fn assemble(args: &SubmitArgs) -> anyhow::Result<SubmissionConfig> {
    let mut config: SubmissionConfig =
        serde_json::from_str(DEFAULT_CONFIG).context("embedded default configuration")?;
    for path in &args.configs {
        let layer = SubmissionConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?;
        config = config.layered(&layer);
    }
    Ok(config.layered(&flags_overlay(args)?))
}

/// Turn the command-line flags into one more configuration layer.
fn flags_overlay(args: &SubmitArgs) -> anyhow::Result<SubmissionConfig> {
    let mut overlay = SubmissionConfig {
        client_id: args.client_id.clone(),
        job_type: args.job_type.clone(),
        region: args.region.clone(),
        log_bucket: args.log_bucket.clone(),
        metrics: args.metrics.clone(),
        dry_run: args.dry_run,
        dedup_max_age_secs: args.dedup_max_age.map(|d| d.as_secs()),
        heartbeat_interval_secs: args.heartbeat_interval.map(|d| d.as_secs()),
        ..Default::default()
    };

    overlay.pooling = match (args.pool_limit, args.pool_max_age) {
        (Some(limit), Some(max_age)) => Some(PoolConfig {
            limit,
            max_age_secs: max_age.as_secs(),
        }),
        (None, None) => None,
        _ => bail!("--pool-limit and --pool-max-age must be given together"),
    };

    for entry in &args.cluster_options {
        let (key, value) = split_pair(entry)?;
        add_option(&mut overlay.cluster.options, key, value);
    }
    for entry in &args.submit_options {
        let (key, value) = split_pair(entry)?;
        add_option(&mut overlay.submit.options, key, value);
    }
    overlay.submit.job_args = args.job_args.clone();

    Ok(overlay)
}

fn split_pair(entry: &str) -> anyhow::Result<(&str, &str)> {
    entry
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("expected KEY=VALUE, got {entry:?}"))
}
