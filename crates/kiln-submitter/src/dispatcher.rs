//! Top-level submission coordination.
//!
//! One entry point, `Dispatcher::run`: validate the configuration, pick the
//! strategy the invocation mode calls for, and drive the submission to a
//! boolean outcome. Static and on-premise submissions go straight to the
//! provider. Dynamic submissions first check the deduplicator, then hold a
//! cluster lease (pooled or ephemeral) around the actual submit, with the
//! heartbeat running for exactly that window and release guaranteed.

use std::sync::Arc;

use tracing::{info, warn};

use kiln_core::config::{OPTION_CLUSTER, OPTION_PROJECT, OPTION_REGION};
use kiln_core::{InvocationMode, SubmissionConfig, required_field, validate};
use kiln_metrics::Metrics;
use kiln_provider::control::{ClusterControl, StorageCount};
use kiln_provider::model::Job;

use crate::dedup::Deduplicator;
use crate::error::{SubmitterError, SubmitterResult};
use crate::heartbeat::Heartbeat;
use crate::lifecycle::{ClusterLease, ClusterTarget, EphemeralSubmitter};
use crate::pool::PooledSubmitter;

pub struct Dispatcher {
    control: Arc<dyn ClusterControl>,
    storage: Arc<dyn StorageCount>,
    metrics: Arc<dyn Metrics>,
}

impl Dispatcher {
    pub fn new(
        control: Arc<dyn ClusterControl>,
        storage: Arc<dyn StorageCount>,
        metrics: Arc<dyn Metrics>,
    ) -> Self {
        Self {
            control,
            storage,
            metrics,
        }
    }

    /// Run one submission to completion. `Ok(true)` means the job finished
    /// successfully; `Ok(false)` means the job itself failed.
    pub async fn run(&self, config: &SubmissionConfig) -> SubmitterResult<bool> {
        let mode = validate(config)?;
        info!(?mode, "dispatching submission");
        match mode {
            InvocationMode::OnPremise | InvocationMode::Static => {
                self.submit_direct(config).await
            }
            InvocationMode::Dynamic => self.submit_dynamic(config).await,
        }
    }

    /// Static and on-premise targets take the submission as-is; only the
    /// dynamic path dedups, acquires, and releases.
    async fn submit_direct(&self, config: &SubmissionConfig) -> SubmitterResult<bool> {
        let job_type = required_field(config.job_type.as_deref(), "job_type")?;
        let region = required_field(
            config
                .region
                .as_deref()
                .or(config.submit.options.get(OPTION_REGION).map(String::as_str)),
            "region",
        )?;
        let ok = self
            .control
            .submit_job(job_type, region, &config.submit.options, &config.submit.job_args)
            .await?;
        self.report_submission(config, job_type, ok);
        Ok(ok)
    }

    async fn submit_dynamic(&self, config: &SubmissionConfig) -> SubmitterResult<bool> {
        if let Some(job) = self.dedup().find_reusable(config).await? {
            return self.attach(config, &job).await;
        }

        let lease: Box<dyn ClusterLease> = if config.pooling_enabled() {
            Box::new(PooledSubmitter::new(
                self.control.clone(),
                self.storage.clone(),
                self.metrics.clone(),
            ))
        } else {
            Box::new(EphemeralSubmitter::new(
                self.control.clone(),
                self.storage.clone(),
                self.metrics.clone(),
            ))
        };

        let target = lease.acquire(config).await?;
        let heartbeat = Heartbeat::start(
            self.control.clone(),
            target.clone(),
            config.heartbeat_interval(),
        );

        let submitted = self.submit_to(config, &target).await;
        heartbeat.stop().await;
        let released = lease.release(config, &target).await;

        let ok = match submitted {
            Ok(ok) => ok,
            Err(error) => {
                if let Err(release_error) = released {
                    warn!(%release_error, "cluster release failed");
                }
                return Err(error);
            }
        };

        // Losing history files fails an otherwise-successful submission;
        // every other release failure is left to the reaper.
        match released {
            Ok(()) => Ok(ok),
            Err(error @ SubmitterError::HistoryDrainTimeout { .. }) => Err(error),
            Err(error) => {
                warn!(%error, "cluster release failed");
                Ok(ok)
            }
        }
    }

    /// Submit against a resolved target, overriding the cluster and project
    /// the submit options would otherwise carry.
    async fn submit_to(
        &self,
        config: &SubmissionConfig,
        target: &ClusterTarget,
    ) -> SubmitterResult<bool> {
        let job_type = required_field(config.job_type.as_deref(), "job_type")?;
        let mut options = config.submit.options.clone();
        options.insert(OPTION_CLUSTER.to_string(), target.cluster_name.clone());
        options.insert(OPTION_PROJECT.to_string(), target.project.clone());

        let ok = self
            .control
            .submit_job(job_type, &target.region, &options, &config.submit.job_args)
            .await?;
        self.report_submission(config, job_type, ok);
        Ok(ok)
    }

    /// Attach to a prior job found by the deduplicator.
    async fn attach(&self, config: &SubmissionConfig, job: &Job) -> SubmitterResult<bool> {
        let region = required_field(config.region.as_deref(), "region")?;
        info!(job_id = %job.reference.job_id, "waiting on a prior job instead of submitting");
        Ok(self
            .control
            .wait_for_job_output(region, &job.reference.job_id)
            .await?)
    }

    fn dedup(&self) -> Deduplicator {
        Deduplicator::new(self.control.clone())
    }

    fn report_submission(&self, config: &SubmissionConfig, job_type: &str, ok: bool) {
        let client_id = config.client_id.as_deref().unwrap_or_default();
        self.metrics.job_submission(client_id, job_type, ok);
    }
}
