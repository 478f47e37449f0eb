//! Job deduplication by submission label.
//!
//! Submissions carrying a dedup id first look for the most recent job with
//! the same id. A hit that finished successfully or is still making progress
//! is reused: the dispatcher attaches to its output instead of submitting
//! again. Failed, cancelled, or too-old jobs fall through to a fresh
//! submission; the stale job itself is left alone.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use tracing::{debug, info};

use kiln_core::config::{DEDUP_LABEL, FILTER_LABEL_PREFIX, OPTION_PROJECT};
use kiln_core::{SubmissionConfig, required_field};
use kiln_provider::control::{ClusterControl, ListJobsQuery};
use kiln_provider::model::Job;

use crate::error::SubmitterResult;

/// Sort key returning the newest job first.
const NEWEST_FIRST: &str = "~status.stateStartTime";

pub struct Deduplicator {
    control: Arc<dyn ClusterControl>,
    now: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl Deduplicator {
    pub fn new(control: Arc<dyn ClusterControl>) -> Self {
        Self {
            control,
            now: Arc::new(Utc::now),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_clock(
        control: Arc<dyn ClusterControl>,
        now: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    ) -> Self {
        Self { control, now }
    }

    /// The job this submission duplicates, if one is worth reusing.
    pub async fn find_reusable(&self, config: &SubmissionConfig) -> SubmitterResult<Option<Job>> {
        let Some(dedup_id) = config.submit.dedup_id() else {
            return Ok(None);
        };

        let project = required_field(
            config
                .submit
                .options
                .get(OPTION_PROJECT)
                .map(String::as_str)
                .or_else(|| config.cluster_project()),
            "project",
        )?;
        let region = required_field(config.region.as_deref(), "region")?;

        let query = ListJobsQuery {
            label_filters: [(format!("{FILTER_LABEL_PREFIX}{DEDUP_LABEL}"), dedup_id.clone())]
                .into_iter()
                .collect(),
            limit: Some(1),
            sort_by: Some(NEWEST_FIRST.to_string()),
        };
        let jobs = self.control.list_jobs(project, region, &query).await?;

        let Some(job) = jobs.into_iter().next() else {
            debug!(dedup_id, "no prior job with this dedup id");
            return Ok(None);
        };

        if !job.status.state.is_reusable() {
            info!(
                dedup_id,
                job_id = %job.reference.job_id,
                state = ?job.status.state,
                "prior job is terminal and failed, submitting anew"
            );
            return Ok(None);
        }

        if let Some(max_age) = config.dedup_max_age() {
            let fresh_enough = job
                .status
                .state_start_time
                .is_some_and(|started| ((self.now)() - started).to_std().unwrap_or_default() <= max_age);
            if !fresh_enough {
                info!(
                    dedup_id,
                    job_id = %job.reference.job_id,
                    "prior job exceeds the dedup max age, submitting anew"
                );
                return Ok(None);
            }
        }

        info!(dedup_id, job_id = %job.reference.job_id, "reusing prior job");
        Ok(Some(job))
    }
}
