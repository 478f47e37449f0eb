//! In-memory provider doubles shared by the coordinator tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use kiln_core::config::{OPTION_LABELS, OPTION_PROJECT, OPTION_ZONE};
use kiln_core::{ClusterType, SubmissionConfig};
use kiln_provider::control::{
    ClusterControl, ListJobsQuery, ProviderError, ProviderResult, StorageCount,
};
use kiln_provider::model::{
    Cluster, ClusterConfig, ClusterState, ClusterStatus, GceClusterConfig, Job, JobReference,
    JobState, JobStatus, MasterConfig,
};

use crate::picker::PlacementPicker;
use crate::placement::ClusterPlacement;
use crate::{CLUSTER_LABEL, PLACEMENT_TOKEN_LABEL, POOL_CLIENT_ID_LABEL};

pub(crate) const TEST_ZONE: &str = "europe-west1-b";

pub(crate) fn labeled_cluster(name: &str, token: &str) -> Cluster {
    cluster_in_state(name, token, ClusterState::Running)
}

pub(crate) fn cluster_in_state(name: &str, token: &str, state: ClusterState) -> Cluster {
    Cluster {
        cluster_name: name.to_string(),
        labels: BTreeMap::from([
            (CLUSTER_LABEL.to_string(), "1".to_string()),
            (POOL_CLIENT_ID_LABEL.to_string(), "etl".to_string()),
            (PLACEMENT_TOKEN_LABEL.to_string(), token.to_string()),
        ]),
        status: ClusterStatus {
            state,
            state_start_time: None,
        },
        config: ClusterConfig {
            gce_cluster_config: GceClusterConfig {
                zone_uri: TEST_ZONE.to_string(),
                metadata: BTreeMap::new(),
            },
            master_config: MasterConfig {
                instance_names: vec![format!("{name}-m")],
            },
        },
    }
}

pub(crate) fn job_in_state(id: &str, state: JobState, started: Option<DateTime<Utc>>) -> Job {
    Job {
        reference: JobReference {
            job_id: id.to_string(),
        },
        status: JobStatus {
            state,
            state_start_time: started,
        },
    }
}

/// A dynamic-mode configuration that passes validation.
pub(crate) fn dynamic_config() -> SubmissionConfig {
    let mut config = SubmissionConfig {
        client_id: Some("etl".to_string()),
        log_bucket: Some("logs".to_string()),
        region: Some("europe-west1".to_string()),
        cluster_type: Some(ClusterType::Dataproc),
        job_type: Some("hadoop".to_string()),
        history_timeout_secs: Some(0),
        heartbeat_interval_secs: Some(1),
        collector_timeout_mins: Some(20),
        ..Default::default()
    };
    config
        .cluster
        .options
        .insert(OPTION_PROJECT.to_string(), "my-project".to_string());
    config
        .cluster
        .options
        .insert(OPTION_ZONE.to_string(), TEST_ZONE.to_string());
    config
}

/// Deterministic stand-in for the random picker.
pub(crate) struct FixedPicker(pub u32);

impl PlacementPicker for FixedPicker {
    fn pick(&self, placements: &[ClusterPlacement]) -> Option<ClusterPlacement> {
        placements.iter().copied().find(|p| p.slot == self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    CreateCluster(String),
    DeleteCluster(String),
    ListClusters(BTreeMap<String, String>),
    SubmitJob(BTreeMap<String, String>),
    ListJobs,
    WaitForJobOutput(String),
    UpdateMetadata {
        cluster: String,
        key: String,
        value: String,
    },
}

/// Scriptable `ClusterControl` with call recording.
pub(crate) struct StubControl {
    pub clusters: Mutex<Vec<Cluster>>,
    pub jobs: Mutex<Vec<Job>>,
    /// Force the next create calls to report a name conflict.
    pub conflict_on_create: Mutex<bool>,
    pub submit_ok: Mutex<bool>,
    /// Fail `submit_job` outright instead of reporting a job result.
    pub fail_submit: Mutex<bool>,
    /// Fail `list_clusters` once this many list calls have succeeded.
    pub fail_lists_after: Mutex<Option<usize>>,
    pub wait_ok: Mutex<bool>,
    pub calls: Mutex<Vec<Call>>,
}

impl Default for StubControl {
    fn default() -> Self {
        Self {
            clusters: Mutex::new(Vec::new()),
            jobs: Mutex::new(Vec::new()),
            conflict_on_create: Mutex::new(false),
            submit_ok: Mutex::new(true),
            fail_submit: Mutex::new(false),
            fail_lists_after: Mutex::new(None),
            wait_ok: Mutex::new(true),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl StubControl {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_clusters(clusters: Vec<Cluster>) -> Self {
        let stub = Self::default();
        *stub.clusters.lock().unwrap() = clusters;
        stub
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn created(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::CreateCluster(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn deleted(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::DeleteCluster(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn submissions(&self) -> Vec<BTreeMap<String, String>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::SubmitJob(options) => Some(options),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

fn matches_filter(cluster: &Cluster, key: &str, value: &str) -> bool {
    if key == "clusterName" {
        return cluster.cluster_name == value;
    }
    if key == "status.state" {
        return state_name(cluster.status.state) == value;
    }
    if let Some(label) = key.strip_prefix("labels.") {
        return match cluster.labels.get(label) {
            Some(actual) => value.is_empty() || actual == value,
            None => false,
        };
    }
    false
}

fn state_name(state: ClusterState) -> &'static str {
    match state {
        ClusterState::Creating => "CREATING",
        ClusterState::Running => "RUNNING",
        ClusterState::Error => "ERROR",
        ClusterState::Deleting => "DELETING",
        ClusterState::Updating => "UPDATING",
        ClusterState::Unknown => "UNKNOWN",
    }
}

fn parse_label_option(options: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    if let Some(raw) = options.get(OPTION_LABELS) {
        for entry in raw.split(',') {
            if let Some((key, value)) = entry.split_once('=') {
                labels.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
    }
    labels
}

#[async_trait]
impl ClusterControl for StubControl {
    async fn create_cluster(
        &self,
        name: &str,
        _region: &str,
        options: &BTreeMap<String, String>,
    ) -> ProviderResult<Cluster> {
        self.record(Call::CreateCluster(name.to_string()));
        let exists = self
            .clusters
            .lock()
            .unwrap()
            .iter()
            .any(|c| c.cluster_name == name);
        if exists || *self.conflict_on_create.lock().unwrap() {
            return Err(ProviderError::AlreadyExists(name.to_string()));
        }
        let cluster = Cluster {
            cluster_name: name.to_string(),
            labels: parse_label_option(options),
            status: ClusterStatus {
                state: ClusterState::Running,
                state_start_time: None,
            },
            config: ClusterConfig {
                gce_cluster_config: GceClusterConfig {
                    zone_uri: options.get(OPTION_ZONE).cloned().unwrap_or_default(),
                    metadata: BTreeMap::new(),
                },
                master_config: MasterConfig {
                    instance_names: vec![format!("{name}-m")],
                },
            },
        };
        self.clusters.lock().unwrap().push(cluster.clone());
        Ok(cluster)
    }

    async fn delete_cluster(
        &self,
        name: &str,
        _region: &str,
        _options: &BTreeMap<String, String>,
    ) -> ProviderResult<bool> {
        self.record(Call::DeleteCluster(name.to_string()));
        self.clusters
            .lock()
            .unwrap()
            .retain(|c| c.cluster_name != name);
        Ok(true)
    }

    async fn list_clusters(
        &self,
        _project: &str,
        _region: &str,
        filters: &BTreeMap<String, String>,
    ) -> ProviderResult<Vec<Cluster>> {
        let prior = self
            .calls()
            .iter()
            .filter(|call| matches!(call, Call::ListClusters(_)))
            .count();
        self.record(Call::ListClusters(filters.clone()));
        if let Some(limit) = *self.fail_lists_after.lock().unwrap() {
            if prior >= limit {
                return Err(ProviderError::CallFailed(
                    "transient list failure".to_string(),
                ));
            }
        }
        let clusters = self.clusters.lock().unwrap();
        Ok(clusters
            .iter()
            .filter(|cluster| {
                filters
                    .iter()
                    .all(|(key, value)| matches_filter(cluster, key, value))
            })
            .cloned()
            .collect())
    }

    async fn submit_job(
        &self,
        _job_type: &str,
        _region: &str,
        options: &BTreeMap<String, String>,
        _job_args: &[String],
    ) -> ProviderResult<bool> {
        self.record(Call::SubmitJob(options.clone()));
        if *self.fail_submit.lock().unwrap() {
            return Err(ProviderError::CallFailed("submit refused".to_string()));
        }
        Ok(*self.submit_ok.lock().unwrap())
    }

    async fn list_jobs(
        &self,
        _project: &str,
        _region: &str,
        query: &ListJobsQuery,
    ) -> ProviderResult<Vec<Job>> {
        self.record(Call::ListJobs);
        let jobs = self.jobs.lock().unwrap();
        let limit = query.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        Ok(jobs.iter().take(limit).cloned().collect())
    }

    async fn wait_for_job_output(&self, _region: &str, job_id: &str) -> ProviderResult<bool> {
        self.record(Call::WaitForJobOutput(job_id.to_string()));
        Ok(*self.wait_ok.lock().unwrap())
    }

    async fn update_cluster_metadata(
        &self,
        cluster: &str,
        _project: &str,
        _region: &str,
        key: &str,
        value: &str,
    ) -> ProviderResult<bool> {
        self.record(Call::UpdateMetadata {
            cluster: cluster.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        });
        Ok(true)
    }
}

/// Scripted object counts, one per poll; empty means drained.
#[derive(Default)]
pub(crate) struct StubStorage {
    pub counts: Mutex<VecDeque<u64>>,
    pub polls: Mutex<Vec<String>>,
    pub fail: Mutex<bool>,
}

impl StubStorage {
    pub(crate) fn with_counts(counts: Vec<u64>) -> Self {
        Self {
            counts: Mutex::new(counts.into()),
            ..Self::default()
        }
    }

    pub(crate) fn failing() -> Self {
        let storage = Self::default();
        *storage.fail.lock().unwrap() = true;
        storage
    }
}

#[async_trait]
impl StorageCount for StubStorage {
    async fn count_objects_under_prefix(&self, _bucket: &str, prefix: &str) -> ProviderResult<u64> {
        self.polls.lock().unwrap().push(prefix.to_string());
        if *self.fail.lock().unwrap() {
            return Err(ProviderError::CallFailed("storage outage".to_string()));
        }
        Ok(self.counts.lock().unwrap().pop_front().unwrap_or(0))
    }
}
