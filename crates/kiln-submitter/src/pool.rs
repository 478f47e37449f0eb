//! Fixed-size rotating cluster pool.
//!
//! Every client derives the same placement tokens from wall-clock time, so
//! the pool needs no shared state: a submission picks a slot, reuses the
//! cluster holding that slot's token, or creates it under the deterministic
//! name `kiln-{client_id}-{token}`. When many clients race to fill the same
//! slot, create-by-name lets exactly one win; the rest re-read and attach to
//! the winner. Clusters whose token fell out of the current window are left
//! for the reaper.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use kiln_core::config::FILTER_LABEL_PREFIX;
use kiln_core::{ConfigError, SubmissionConfig, required_field};
use kiln_metrics::Metrics;
use kiln_provider::control::{ClusterControl, ProviderError, StorageCount};
use kiln_provider::model::{Cluster, ClusterState};

use crate::error::{SubmitterError, SubmitterResult};
use crate::lifecycle::{ClusterLease, ClusterTarget, EphemeralSubmitter};
use crate::picker::{PlacementPicker, RandomPicker};
use crate::placement::{ClusterPlacement, TimeSource, all_placements, filter_clusters};
use crate::{CLUSTER_LABEL, PLACEMENT_TOKEN_LABEL, POOL_CLIENT_ID_LABEL};

/// Pool scheduler: find-or-create over the current placement window.
pub struct PooledSubmitter {
    inner: EphemeralSubmitter,
    control: Arc<dyn ClusterControl>,
    picker: Box<dyn PlacementPicker>,
    time_source: TimeSource,
}

impl PooledSubmitter {
    pub fn new(
        control: Arc<dyn ClusterControl>,
        storage: Arc<dyn StorageCount>,
        metrics: Arc<dyn Metrics>,
    ) -> Self {
        Self::with_parts(
            control,
            storage,
            metrics,
            Box::new(RandomPicker),
            Arc::new(|| chrono::Utc::now().timestamp()),
        )
    }

    pub fn with_parts(
        control: Arc<dyn ClusterControl>,
        storage: Arc<dyn StorageCount>,
        metrics: Arc<dyn Metrics>,
        picker: Box<dyn PlacementPicker>,
        time_source: TimeSource,
    ) -> Self {
        Self {
            inner: EphemeralSubmitter::new(control.clone(), storage, metrics),
            control,
            picker,
            time_source,
        }
    }

    /// Deterministic name shared by every client targeting this placement.
    pub fn pooled_name(client_id: &str, token: &str) -> String {
        format!("kiln-{client_id}-{token}")
    }

    async fn create_placed(
        &self,
        config: &SubmissionConfig,
        placement: ClusterPlacement,
    ) -> SubmitterResult<Cluster> {
        let client_id = required_field(config.client_id.as_deref(), "client_id")?;
        let project = required_field(config.cluster_project(), "cluster.options.project")?;
        let region = required_field(config.region.as_deref(), "region")?;

        let token = placement.token();
        let name = Self::pooled_name(client_id, &token);
        let labels = [
            (POOL_CLIENT_ID_LABEL.to_string(), client_id.to_string()),
            (PLACEMENT_TOKEN_LABEL.to_string(), token.clone()),
        ];

        match self.inner.create_cluster(config, &name, &labels).await {
            Ok(cluster) => Ok(cluster),
            Err(SubmitterError::Provider(ProviderError::AlreadyExists(_))) => {
                // Lost the slot race. The winner's cluster must be there now.
                info!(cluster = %name, "placement already taken, attaching to the winner");
                let filters =
                    BTreeMap::from([("clusterName".to_string(), name.clone())]);
                let mut existing =
                    self.control.list_clusters(project, region, &filters).await?;
                let found = existing.len();
                match existing.pop() {
                    Some(cluster) if found == 1 => Ok(cluster),
                    _ => Err(SubmitterError::PoolInconsistency {
                        cluster: name,
                        found,
                    }),
                }
            }
            Err(error) => Err(error),
        }
    }

    fn pool_filters(client_id: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            (format!("{FILTER_LABEL_PREFIX}{CLUSTER_LABEL}"), String::new()),
            (
                format!("{FILTER_LABEL_PREFIX}{POOL_CLIENT_ID_LABEL}"),
                client_id.to_string(),
            ),
        ])
    }
}

#[async_trait]
impl ClusterLease for PooledSubmitter {
    async fn acquire(&self, config: &SubmissionConfig) -> SubmitterResult<ClusterTarget> {
        let pool = config.pooling.ok_or_else(|| {
            ConfigError::Invalid("pooling is not configured".to_string())
        })?;
        let client_id = required_field(config.client_id.as_deref(), "client_id")?;
        let project = required_field(config.cluster_project(), "cluster.options.project")?;
        let region = required_field(config.region.as_deref(), "region")?;

        let existing = self
            .control
            .list_clusters(project, region, &Self::pool_filters(client_id))
            .await?;
        let placements = all_placements((self.time_source)(), &pool);
        let candidates = filter_clusters(existing, &placements);
        info!(
            candidates = candidates.len(),
            slots = placements.len(),
            "pool state before placement"
        );

        let placement = self.picker.pick(&placements).ok_or_else(|| {
            ConfigError::Invalid("pooling.limit must be > 0".to_string())
        })?;

        let cluster = match placement.find_in(&candidates) {
            Some(cluster) => {
                info!(cluster = %cluster.cluster_name, "reusing pooled cluster");
                cluster.clone()
            }
            None => self.create_placed(config, placement).await?,
        };
        Ok(ClusterTarget::from_cluster(&cluster, project, region))
    }

    /// Pooled clusters outlive the submission; only a broken one is
    /// collected early, since it may not be able to self-destruct.
    async fn release(
        &self,
        config: &SubmissionConfig,
        target: &ClusterTarget,
    ) -> SubmitterResult<()> {
        let filters = BTreeMap::from([
            ("clusterName".to_string(), target.cluster_name.clone()),
            ("status.state".to_string(), "ERROR".to_string()),
        ]);
        let broken = self
            .control
            .list_clusters(&target.project, &target.region, &filters)
            .await?
            .iter()
            .any(|cluster| cluster.status.state == ClusterState::Error);

        if broken {
            warn!(cluster = %target.cluster_name, "pooled cluster is in ERROR, collecting it");
            self.inner.drain_and_delete(config, target).await
        } else {
            Ok(())
        }
    }
}
