//! The `ClusterControl` capability consumed by the submitter core.
//!
//! Create-by-name is the only synchronization primitive the core relies on:
//! at most one caller's create succeeds for a given name, every other caller
//! observes `ProviderError::AlreadyExists`.

use async_trait::async_trait;
use std::collections::BTreeMap;

use thiserror::Error;

use crate::model::{Cluster, Job};

/// Errors surfaced by the cluster provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// A cluster with the requested name already exists. Recoverable: the
    /// caller re-reads state instead of failing.
    #[error("cluster already exists: {0}")]
    AlreadyExists(String),

    #[error("provider call failed: {0}")]
    CallFailed(String),

    #[error("failed to parse provider output: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("i/o error talking to provider: {0}")]
    Io(#[from] std::io::Error),
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Query parameters for listing jobs.
#[derive(Debug, Clone, Default)]
pub struct ListJobsQuery {
    /// Server-side label filters (`labels.<key>` → value).
    pub label_filters: BTreeMap<String, String>,
    /// Maximum number of jobs to return.
    pub limit: Option<u32>,
    /// Provider sort key, e.g. `~status.stateStartTime` for newest first.
    pub sort_by: Option<String>,
}

/// Remote cluster lifecycle and job submission, as offered by the provider.
#[async_trait]
pub trait ClusterControl: Send + Sync {
    /// Create a cluster. Fails with `AlreadyExists` if the name is taken.
    async fn create_cluster(
        &self,
        name: &str,
        region: &str,
        options: &BTreeMap<String, String>,
    ) -> ProviderResult<Cluster>;

    async fn delete_cluster(
        &self,
        name: &str,
        region: &str,
        options: &BTreeMap<String, String>,
    ) -> ProviderResult<bool>;

    /// List clusters matching server-side filters (`labels.<key>`,
    /// `clusterName`, `status.state`, ...).
    async fn list_clusters(
        &self,
        project: &str,
        region: &str,
        filters: &BTreeMap<String, String>,
    ) -> ProviderResult<Vec<Cluster>>;

    async fn submit_job(
        &self,
        job_type: &str,
        region: &str,
        options: &BTreeMap<String, String>,
        job_args: &[String],
    ) -> ProviderResult<bool>;

    async fn list_jobs(
        &self,
        project: &str,
        region: &str,
        query: &ListJobsQuery,
    ) -> ProviderResult<Vec<Job>>;

    /// Block until the job reaches a terminal state, streaming its output.
    async fn wait_for_job_output(&self, region: &str, job_id: &str) -> ProviderResult<bool>;

    /// Write a metadata key on the cluster's master instance.
    async fn update_cluster_metadata(
        &self,
        cluster: &str,
        project: &str,
        region: &str,
        key: &str,
        value: &str,
    ) -> ProviderResult<bool>;
}

/// Object counting under a storage prefix, used by the history-drain wait.
#[async_trait]
pub trait StorageCount: Send + Sync {
    async fn count_objects_under_prefix(&self, bucket: &str, prefix: &str) -> ProviderResult<u64>;
}
