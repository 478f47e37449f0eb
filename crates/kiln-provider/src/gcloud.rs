//! gcloud-CLI-backed implementation of the provider traits.
//!
//! Every call is a `gcloud` subprocess; JSON-returning calls pass
//! `--format=json` and deserialize stdout. In dry-run mode the intended
//! command line is logged and the call reports success without executing.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use kiln_core::config::{OPTION_METADATA, OPTION_PROJECT, OPTION_REGION, OPTION_ZONE};

use crate::control::{ClusterControl, ListJobsQuery, ProviderError, ProviderResult, StorageCount};
use crate::model::{
    Cluster, ClusterConfig, ClusterState, ClusterStatus, GceClusterConfig, Job, MasterConfig,
};

const DEFAULT_GCLOUD_COMMAND: &str = "gcloud";

/// Shells out to the `gcloud` CLI.
pub struct GcloudControl {
    base_command: String,
    dry_run: bool,
}

impl GcloudControl {
    pub fn new(dry_run: bool) -> Self {
        Self::with_command(DEFAULT_GCLOUD_COMMAND, dry_run)
    }

    pub fn with_command(base_command: &str, dry_run: bool) -> Self {
        Self {
            base_command: base_command.to_string(),
            dry_run,
        }
    }

    fn build_args(
        subcommand: &[&str],
        options: &BTreeMap<String, String>,
        job_args: &[String],
    ) -> Vec<String> {
        let mut args: Vec<String> = subcommand.iter().map(|s| s.to_string()).collect();
        args.push("--quiet".to_string());
        for (key, value) in options {
            args.push(render_option(key, value));
        }
        if !job_args.is_empty() {
            args.push("--".to_string());
            args.extend(job_args.iter().cloned());
        }
        args
    }

    /// Run a command for its exit status.
    async fn execute(&self, args: Vec<String>) -> ProviderResult<bool> {
        if self.dry_run {
            info!(command = %format_command(&self.base_command, &args), "dry-run: not executing");
            return Ok(true);
        }
        debug!(command = %format_command(&self.base_command, &args), "executing");
        let status = Command::new(&self.base_command)
            .args(&args)
            .stdin(Stdio::null())
            .status()
            .await?;
        Ok(status.success())
    }

    /// Run a command and capture stdout for JSON parsing.
    async fn execute_for_output(&self, args: Vec<String>) -> ProviderResult<String> {
        debug!(command = %format_command(&self.base_command, &args), "executing for output");
        let output = Command::new(&self.base_command)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            return Err(classify_failure(stderr));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn describe_cluster(
        &self,
        name: &str,
        project: &str,
        region: &str,
    ) -> ProviderResult<Cluster> {
        let options = BTreeMap::from([
            (OPTION_PROJECT.to_string(), project.to_string()),
            (OPTION_REGION.to_string(), region.to_string()),
        ]);
        let args = Self::build_args(
            &["--format=json", "dataproc", "clusters", "describe", name],
            &options,
            &[],
        );
        let json = self.execute_for_output(args).await?;
        Ok(serde_json::from_str(&json)?)
    }
}

#[async_trait]
impl ClusterControl for GcloudControl {
    async fn create_cluster(
        &self,
        name: &str,
        region: &str,
        options: &BTreeMap<String, String>,
    ) -> ProviderResult<Cluster> {
        let mut create_options = options.clone();
        create_options.insert(OPTION_REGION.to_string(), region.to_string());
        let args = Self::build_args(
            &["--format=json", "dataproc", "clusters", "create", name],
            &create_options,
            &[],
        );

        if self.dry_run {
            info!(command = %format_command(&self.base_command, &args), "dry-run: not creating cluster");
            return Ok(synthesized_cluster(name, options));
        }

        let json = self.execute_for_output(args).await?;
        Ok(serde_json::from_str(&json)?)
    }

    async fn delete_cluster(
        &self,
        name: &str,
        region: &str,
        options: &BTreeMap<String, String>,
    ) -> ProviderResult<bool> {
        let mut delete_options = options.clone();
        delete_options.insert(OPTION_REGION.to_string(), region.to_string());
        let args = Self::build_args(
            &["dataproc", "clusters", "delete", name, "--async"],
            &delete_options,
            &[],
        );
        self.execute(args).await
    }

    async fn list_clusters(
        &self,
        project: &str,
        region: &str,
        filters: &BTreeMap<String, String>,
    ) -> ProviderResult<Vec<Cluster>> {
        let mut options = BTreeMap::from([
            (OPTION_PROJECT.to_string(), project.to_string()),
            (OPTION_REGION.to_string(), region.to_string()),
        ]);
        if !filters.is_empty() {
            options.insert("filter".to_string(), render_filter(filters));
        }
        let args = Self::build_args(
            &["--format=json", "dataproc", "clusters", "list"],
            &options,
            &[],
        );

        if self.dry_run {
            info!(command = %format_command(&self.base_command, &args), "dry-run: listing no clusters");
            return Ok(Vec::new());
        }

        let json = self.execute_for_output(args).await?;
        Ok(serde_json::from_str(&json)?)
    }

    async fn submit_job(
        &self,
        job_type: &str,
        region: &str,
        options: &BTreeMap<String, String>,
        job_args: &[String],
    ) -> ProviderResult<bool> {
        let mut submit_options = options.clone();
        submit_options.insert(OPTION_REGION.to_string(), region.to_string());
        let args = Self::build_args(
            &["dataproc", "jobs", "submit", job_type],
            &submit_options,
            job_args,
        );
        self.execute(args).await
    }

    async fn list_jobs(
        &self,
        project: &str,
        region: &str,
        query: &ListJobsQuery,
    ) -> ProviderResult<Vec<Job>> {
        let mut options = BTreeMap::from([
            (OPTION_PROJECT.to_string(), project.to_string()),
            (OPTION_REGION.to_string(), region.to_string()),
        ]);
        if !query.label_filters.is_empty() {
            options.insert("filter".to_string(), render_filter(&query.label_filters));
        }
        if let Some(limit) = query.limit {
            options.insert("limit".to_string(), limit.to_string());
        }
        if let Some(sort_by) = &query.sort_by {
            options.insert("sort-by".to_string(), sort_by.clone());
        }
        let args = Self::build_args(&["--format=json", "dataproc", "jobs", "list"], &options, &[]);

        if self.dry_run {
            info!(command = %format_command(&self.base_command, &args), "dry-run: listing no jobs");
            return Ok(Vec::new());
        }

        let json = self.execute_for_output(args).await?;
        Ok(serde_json::from_str(&json)?)
    }

    async fn wait_for_job_output(&self, region: &str, job_id: &str) -> ProviderResult<bool> {
        let options = BTreeMap::from([(OPTION_REGION.to_string(), region.to_string())]);
        let args = Self::build_args(&["dataproc", "jobs", "wait", job_id], &options, &[]);
        self.execute(args).await
    }

    async fn update_cluster_metadata(
        &self,
        cluster: &str,
        project: &str,
        region: &str,
        key: &str,
        value: &str,
    ) -> ProviderResult<bool> {
        if self.dry_run {
            info!(%cluster, key, "dry-run: not updating cluster metadata");
            return Ok(true);
        }

        let described = self.describe_cluster(cluster, project, region).await?;
        let master = described
            .config
            .master_config
            .instance_names
            .first()
            .ok_or_else(|| {
                ProviderError::CallFailed(format!("cluster {cluster} has no master instance"))
            })?
            .clone();

        let options = BTreeMap::from([
            (OPTION_PROJECT.to_string(), project.to_string()),
            (OPTION_ZONE.to_string(), described.zone().to_string()),
            (OPTION_METADATA.to_string(), format!("{key}={value}")),
        ]);
        let args = Self::build_args(
            &["compute", "instances", "add-metadata", &master],
            &options,
            &[],
        );
        self.execute(args).await
    }
}

/// Counts storage objects by listing them through `gcloud storage`.
pub struct GsutilStorage {
    base_command: String,
    dry_run: bool,
}

impl GsutilStorage {
    pub fn new(dry_run: bool) -> Self {
        Self {
            base_command: DEFAULT_GCLOUD_COMMAND.to_string(),
            dry_run,
        }
    }
}

#[async_trait]
impl StorageCount for GsutilStorage {
    async fn count_objects_under_prefix(&self, bucket: &str, prefix: &str) -> ProviderResult<u64> {
        let url = format!("gs://{bucket}/{}/**", prefix.trim_matches('/'));
        if self.dry_run {
            info!(%url, "dry-run: not counting storage objects");
            return Ok(0);
        }
        let output = Command::new(&self.base_command)
            .args(["storage", "ls", &url])
            .stdin(Stdio::null())
            .output()
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // An empty prefix lists as "matched no objects", which counts as 0.
            if stderr.contains("matched no objects") || stderr.contains("One or more URLs") {
                return Ok(0);
            }
            return Err(ProviderError::CallFailed(stderr.into_owned()));
        }
        let count = String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|line| !line.trim().is_empty())
            .count() as u64;
        Ok(count)
    }
}

fn render_option(key: &str, value: &str) -> String {
    if value.is_empty() {
        format!("--{key}")
    } else {
        format!("--{key}={value}")
    }
}

fn render_filter(filters: &BTreeMap<String, String>) -> String {
    filters
        .iter()
        .map(|(key, value)| {
            if value.is_empty() {
                // Presence check for label keys.
                format!("{key}:*")
            } else {
                format!("{key}={value}")
            }
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn format_command(base: &str, args: &[String]) -> String {
    let mut parts = vec![base.to_string()];
    parts.extend(args.iter().cloned());
    parts.join(" ")
}

fn classify_failure(stderr: String) -> ProviderError {
    let lowered = stderr.to_lowercase();
    if lowered.contains("already_exists") || lowered.contains("already exists") {
        ProviderError::AlreadyExists(stderr)
    } else {
        ProviderError::CallFailed(stderr)
    }
}

/// Stand-in for the cluster a dry-run create would have produced.
fn synthesized_cluster(name: &str, options: &BTreeMap<String, String>) -> Cluster {
    Cluster {
        cluster_name: name.to_string(),
        labels: BTreeMap::new(),
        status: ClusterStatus {
            state: ClusterState::Running,
            state_start_time: None,
        },
        config: ClusterConfig {
            gce_cluster_config: GceClusterConfig {
                zone_uri: options.get(OPTION_ZONE).cloned().unwrap_or_default(),
                metadata: BTreeMap::new(),
            },
            master_config: MasterConfig::default(),
        },
    }
}
