//! Ephemeral cluster lifecycle: acquire once, release unconditionally.
//!
//! Acquire creates a single-use cluster under a random unique name, stamped
//! with the pool-membership label, initial liveness metadata, the reaper
//! threshold, and autoscaler parameters when configured. The resolved target
//! is returned as a value; the submission configuration itself stays
//! untouched. Release drains job history to the log bucket and then deletes
//! the cluster no matter how the drain went.

use async_trait::async_trait;
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use tracing::{info, warn};

use kiln_core::config::{OPTION_LABELS, OPTION_METADATA, OPTION_PROJECT, OPTION_ZONE};
use kiln_core::{AutoscalerConfig, SubmissionConfig, add_option, required_field};
use kiln_metrics::Metrics;
use kiln_provider::control::{ClusterControl, ProviderError, StorageCount};
use kiln_provider::model::Cluster;

use crate::CLUSTER_LABEL;
use crate::error::SubmitterResult;
use crate::heartbeat::{COLLECTOR_TIMEOUT_METADATA_KEY, HEARTBEAT_METADATA_KEY, timestamp};
use crate::history::wait_for_history_drain;

const CLUSTER_NAME_PREFIX: &str = "kiln";

/// Where a submission ended up: the resolved cluster coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterTarget {
    pub cluster_name: String,
    pub zone: String,
    pub project: String,
    pub region: String,
}

impl ClusterTarget {
    pub(crate) fn from_cluster(cluster: &Cluster, project: &str, region: &str) -> Self {
        Self {
            cluster_name: cluster.cluster_name.clone(),
            zone: cluster.zone().to_string(),
            project: project.to_string(),
            region: region.to_string(),
        }
    }
}

/// Holding a cluster for the duration of one submission.
///
/// Once `acquire` succeeds, `release` must run regardless of how the
/// submission itself fares.
#[async_trait]
pub trait ClusterLease: Send + Sync {
    async fn acquire(&self, config: &SubmissionConfig) -> SubmitterResult<ClusterTarget>;
    async fn release(
        &self,
        config: &SubmissionConfig,
        target: &ClusterTarget,
    ) -> SubmitterResult<()>;
}

/// Single-use cluster per submission.
pub struct EphemeralSubmitter {
    control: Arc<dyn ClusterControl>,
    storage: Arc<dyn StorageCount>,
    metrics: Arc<dyn Metrics>,
}

impl EphemeralSubmitter {
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

    fn generate_name() -> String {
        format!("{CLUSTER_NAME_PREFIX}-{}", Uuid::new_v4())
    }

    /// The full option map for a create call: configured options plus the
    /// membership label, liveness metadata, autoscaler parameters, and a
    /// zone fallback.
    fn create_options(
        &self,
        config: &SubmissionConfig,
        extra_labels: &[(String, String)],
    ) -> BTreeMap<String, String> {
        let mut options = config.cluster.options.clone();
        add_option(&mut options, OPTION_LABELS, &format!("{CLUSTER_LABEL}=1"));
        for (key, value) in extra_labels {
            add_option(&mut options, OPTION_LABELS, &format!("{key}={value}"));
        }
        add_option(
            &mut options,
            OPTION_METADATA,
            &format!("{HEARTBEAT_METADATA_KEY}={}", timestamp()),
        );
        if let Some(minutes) = config.collector_timeout_mins {
            add_option(
                &mut options,
                OPTION_METADATA,
                &format!("{COLLECTOR_TIMEOUT_METADATA_KEY}={minutes}"),
            );
        }
        if let Some(autoscaler) = &config.autoscaler {
            add_option(&mut options, OPTION_METADATA, &autoscaler_metadata(autoscaler));
        }
        if !options.contains_key(OPTION_ZONE) && !config.default_zones.is_empty() {
            let index = rand::rng().random_range(0..config.default_zones.len());
            options.insert(OPTION_ZONE.to_string(), config.default_zones[index].clone());
        }
        options
    }

    /// Create a cluster under a fixed name. Pool placement calls this with
    /// its deterministic name and placement labels.
    pub(crate) async fn create_cluster(
        &self,
        config: &SubmissionConfig,
        name: &str,
        extra_labels: &[(String, String)],
    ) -> SubmitterResult<Cluster> {
        let region = required_field(config.region.as_deref(), "region")?;
        let client_id = required_field(config.client_id.as_deref(), "client_id")?;
        let options = self.create_options(config, extra_labels);

        let result = self.control.create_cluster(name, region, &options).await;
        match &result {
            Ok(cluster) => {
                info!(cluster = %name, zone = %cluster.zone(), "created cluster");
                self.metrics.cluster_creation(client_id, cluster.zone(), true);
            }
            // Losing a name race is not a failed creation.
            Err(ProviderError::AlreadyExists(_)) => {}
            Err(error) => {
                warn!(cluster = %name, %error, "cluster creation failed");
                let zone = options.get(OPTION_ZONE).map(String::as_str).unwrap_or("");
                self.metrics.cluster_creation(client_id, zone, false);
            }
        }
        Ok(result?)
    }

    pub(crate) async fn drain_and_delete(
        &self,
        config: &SubmissionConfig,
        target: &ClusterTarget,
    ) -> SubmitterResult<()> {
        let drained = wait_for_history_drain(self.storage.as_ref(), config).await;

        let options = BTreeMap::from([(OPTION_PROJECT.to_string(), target.project.clone())]);
        let deleted = self
            .control
            .delete_cluster(&target.cluster_name, &target.region, &options)
            .await;
        let client_id = config.client_id.as_deref().unwrap_or_default();
        match deleted {
            Ok(true) => {
                info!(cluster = %target.cluster_name, "deleted cluster");
                self.metrics.cluster_deletion(client_id, true);
            }
            Ok(false) => {
                warn!(cluster = %target.cluster_name, "cluster deletion reported failure");
                self.metrics.cluster_deletion(client_id, false);
            }
            Err(error) => {
                warn!(cluster = %target.cluster_name, %error, "cluster deletion failed");
                self.metrics.cluster_deletion(client_id, false);
            }
        }

        drained
    }
}

#[async_trait]
impl ClusterLease for EphemeralSubmitter {
    async fn acquire(&self, config: &SubmissionConfig) -> SubmitterResult<ClusterTarget> {
        let project = required_field(config.cluster_project(), "cluster.options.project")?;
        let region = required_field(config.region.as_deref(), "region")?;
        let name = Self::generate_name();
        let cluster = self.create_cluster(config, &name, &[]).await?;
        Ok(ClusterTarget::from_cluster(&cluster, project, region))
    }

    async fn release(
        &self,
        config: &SubmissionConfig,
        target: &ClusterTarget,
    ) -> SubmitterResult<()> {
        self.drain_and_delete(config, target).await
    }
}

fn autoscaler_metadata(autoscaler: &AutoscalerConfig) -> String {
    let mode = if autoscaler.downscale { "downscale" } else { "upscale" };
    let downscale_timeout = if autoscaler.downscale {
        autoscaler.downscale_timeout_secs
    } else {
        0
    };
    [
        format!("autoscaler-interval={}", autoscaler.interval_secs),
        format!("autoscaler-max={}", autoscaler.max),
        format!("autoscaler-factor={}", autoscaler.factor),
        format!("autoscaler-mode={mode}"),
        format!("autoscaler-downscale-timeout={downscale_timeout}"),
    ]
    .join(",")
}
