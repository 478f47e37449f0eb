//! kiln-provider — the cluster control API surface.
//!
//! The submitter core treats the cluster provider as a black box behind the
//! `ClusterControl` trait: create/delete/list clusters, submit/list/wait
//! jobs, update cluster metadata. The shipped implementation shells out to
//! the `gcloud` CLI and parses its JSON output; a dry-run mode reports the
//! intended invocation and treats it as trivially successful.
//!
//! `StorageCount` is the one storage capability the core needs: counting
//! objects under a prefix for the history-drain wait.

pub mod control;
pub mod gcloud;
pub mod model;

pub use control::{ClusterControl, ListJobsQuery, ProviderError, ProviderResult, StorageCount};
pub use gcloud::{GcloudControl, GsutilStorage};
pub use model::{Cluster, ClusterState, Job, JobState};
