//! Waiting for job history files to drain before cluster deletion.
//!
//! The history server moves finished-job files out of the intermediate
//! directory on the log bucket. Deleting the cluster while files are still
//! in flight loses them, so release waits until the intermediate prefix is
//! empty, polling once a second against a monotonic deadline.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use kiln_core::SubmissionConfig;
use kiln_provider::StorageCount;

use crate::error::{SubmitterError, SubmitterResult};

/// Cluster property naming the intermediate history directory.
pub const INTERMEDIATE_DONE_DIR_PROPERTY: &str = "mapred:mapreduce.jobhistory.intermediate-done-dir";

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Block until no objects remain under the intermediate history prefix.
///
/// Skipped entirely on dry-run, on a non-positive timeout, and when the
/// configuration does not name an intermediate directory. A timeout is an
/// error; the caller still deletes the cluster afterwards.
pub async fn wait_for_history_drain(
    storage: &dyn StorageCount,
    config: &SubmissionConfig,
) -> SubmitterResult<()> {
    if config.dry_run {
        return Ok(());
    }
    let timeout_secs = config.history_timeout_secs.unwrap_or(0);
    if timeout_secs <= 0 {
        return Ok(());
    }
    let Some(directory) = config.cluster.properties().get(INTERMEDIATE_DONE_DIR_PROPERTY).cloned()
    else {
        debug!("no intermediate history directory configured, nothing to drain");
        return Ok(());
    };
    let Some((bucket, prefix)) = parse_gs_uri(&directory) else {
        warn!(%directory, "intermediate history directory is not a gs:// uri, skipping drain");
        return Ok(());
    };

    let deadline = Instant::now() + Duration::from_secs(timeout_secs as u64);
    info!(%bucket, %prefix, "waiting for history files to be moved");
    loop {
        let remaining = storage.count_objects_under_prefix(&bucket, &prefix).await?;
        if remaining == 0 {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(SubmitterError::HistoryDrainTimeout {
                waited_secs: timeout_secs as u64,
            });
        }
        debug!(remaining, "history files still in flight");
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Split `gs://bucket/some/prefix` into bucket and prefix.
fn parse_gs_uri(uri: &str) -> Option<(String, String)> {
    let rest = uri.strip_prefix("gs://")?;
    let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
    if bucket.is_empty() {
        return None;
    }
    Some((bucket.to_string(), prefix.trim_matches('/').to_string()))
}
