//! Liveness heartbeat for ephemeral clusters.
//!
//! While a job runs, a background task stamps the cluster's master metadata
//! with the current time under the `heartbeat` key. The reaper that collects
//! orphaned clusters treats a stale stamp as an abandoned client. Failures to
//! stamp are logged and retried on the next tick so a flaky metadata write
//! never kills a running submission.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use kiln_provider::ClusterControl;

use crate::lifecycle::ClusterTarget;

/// Metadata key carrying the liveness timestamp.
pub const HEARTBEAT_METADATA_KEY: &str = "heartbeat";
/// Metadata key advertising the reaper threshold, minutes.
pub const COLLECTOR_TIMEOUT_METADATA_KEY: &str = "collector-timeout";

/// The timestamp format written into cluster metadata, UTC with
/// microsecond precision.
pub fn timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// A running heartbeat task. Dropping without `stop` leaves the task to be
/// aborted by the runtime at shutdown; prefer `stop` for a clean handoff.
pub struct Heartbeat {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
    grace: Duration,
}

impl Heartbeat {
    /// Spawn the stamping loop. The first stamp is written immediately.
    pub fn start(
        control: Arc<dyn ClusterControl>,
        target: ClusterTarget,
        interval: Duration,
    ) -> Self {
        let (stop, mut stopped) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let result = control
                            .update_cluster_metadata(
                                &target.cluster_name,
                                &target.project,
                                &target.region,
                                HEARTBEAT_METADATA_KEY,
                                &timestamp(),
                            )
                            .await;
                        match result {
                            Ok(_) => debug!(cluster = %target.cluster_name, "heartbeat stamped"),
                            Err(error) => warn!(
                                cluster = %target.cluster_name,
                                %error,
                                "failed to stamp heartbeat"
                            ),
                        }
                    }
                    _ = stopped.changed() => break,
                }
            }
        });
        Self {
            stop,
            task,
            grace: interval,
        }
    }

    /// Signal the loop to exit and wait for it, bounded by one interval.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if tokio::time::timeout(self.grace, self.task).await.is_err() {
            warn!("heartbeat task did not stop in time");
        }
    }
}
