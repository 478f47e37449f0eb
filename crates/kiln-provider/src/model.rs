//! Provider-side entities, deserialized from the provider's JSON output.
//!
//! Field names follow the provider's camelCase wire format. Unknown fields
//! are ignored so new provider attributes never break parsing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lifecycle state of a remote cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterState {
    Creating,
    Running,
    Error,
    Deleting,
    Updating,
    Unknown,
}

/// Lifecycle state of a remote job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    StateUnspecified,
    Pending,
    SetupDone,
    Running,
    CancelPending,
    CancelStarted,
    Cancelled,
    Done,
    Error,
    AttemptFailure,
}

impl JobState {
    /// States in which a prior job's outcome is still worth waiting for:
    /// finished successfully, or not yet terminal.
    pub fn is_reusable(self) -> bool {
        matches!(
            self,
            JobState::Done
                | JobState::Pending
                | JobState::SetupDone
                | JobState::Running
                | JobState::CancelPending
                | JobState::CancelStarted
        )
    }
}

/// A remote cluster as reported by list/describe/create calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub cluster_name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub status: ClusterStatus,
    #[serde(default)]
    pub config: ClusterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    pub state: ClusterState,
    pub state_start_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    #[serde(default)]
    pub gce_cluster_config: GceClusterConfig,
    #[serde(default)]
    pub master_config: MasterConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GceClusterConfig {
    #[serde(default)]
    pub zone_uri: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterConfig {
    #[serde(default)]
    pub instance_names: Vec<String>,
}

impl Cluster {
    /// The zone name without the provider's URI prefix.
    pub fn zone(&self) -> &str {
        self.config
            .gce_cluster_config
            .zone_uri
            .rsplit('/')
            .next()
            .unwrap_or_default()
    }
}

/// A remote job as reported by list calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub reference: JobReference,
    pub status: JobStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReference {
    pub job_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub state: JobState,
    pub state_start_time: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_parses_from_provider_json() {
        let json = r#"{
            "clusterName": "kiln-etl-0-12",
            "labels": {"kiln-cluster": "1", "kiln-placement-token": "0-12"},
            "status": {"state": "RUNNING", "stateStartTime": "2024-05-01T10:00:00Z"},
            "config": {
                "gceClusterConfig": {
                    "zoneUri": "https://compute/v1/projects/p/zones/europe-west1-b"
                },
                "masterConfig": {"instanceNames": ["kiln-etl-0-12-m"]}
            },
            "somethingNew": true
        }"#;
        let cluster: Cluster = serde_json::from_str(json).unwrap();
        assert_eq!(cluster.cluster_name, "kiln-etl-0-12");
        assert_eq!(cluster.status.state, ClusterState::Running);
        assert_eq!(cluster.zone(), "europe-west1-b");
        assert_eq!(
            cluster.labels.get("kiln-placement-token").map(String::as_str),
            Some("0-12")
        );
    }

    #[test]
    fn job_parses_from_provider_json() {
        let json = r#"{
            "reference": {"jobId": "job-1"},
            "status": {"state": "CANCEL_PENDING", "stateStartTime": "2024-05-01T10:00:00Z"}
        }"#;
        let job: Job = serde_json::from_str(json).unwrap();
        assert_eq!(job.reference.job_id, "job-1");
        assert_eq!(job.status.state, JobState::CancelPending);
    }

    #[test]
    fn reusable_states() {
        for state in [
            JobState::Done,
            JobState::Pending,
            JobState::SetupDone,
            JobState::Running,
            JobState::CancelPending,
            JobState::CancelStarted,
        ] {
            assert!(state.is_reusable(), "{state:?} should be reusable");
        }
        for state in [
            JobState::Error,
            JobState::Cancelled,
            JobState::AttemptFailure,
            JobState::StateUnspecified,
        ] {
            assert!(!state.is_reusable(), "{state:?} should not be reusable");
        }
    }

    #[test]
    fn zone_handles_bare_names() {
        let cluster: Cluster = serde_json::from_str(
            r#"{
                "clusterName": "c",
                "status": {"state": "RUNNING", "stateStartTime": null},
                "config": {"gceClusterConfig": {"zoneUri": "europe-west1-b"}}
            }"#,
        )
        .unwrap();
        assert_eq!(cluster.zone(), "europe-west1-b");
    }
}
