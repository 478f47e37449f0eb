//! The submission configuration value.
//!
//! Assembled once per invocation by layering JSON config files and CLI flags,
//! then treated as immutable. Provider option maps use the same list-aware
//! merge semantics the provider CLI expects: options that accept comma
//! separated lists (labels, metadata, properties, ...) are joined, everything
//! else is overwritten by the later layer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};

pub const OPTION_PROJECT: &str = "project";
pub const OPTION_REGION: &str = "region";
pub const OPTION_ZONE: &str = "zone";
pub const OPTION_METADATA: &str = "metadata";
pub const OPTION_CLUSTER: &str = "cluster";
pub const OPTION_LABELS: &str = "labels";
pub const OPTION_PROPERTIES: &str = "properties";
pub const OPTION_JARS: &str = "jars";
pub const OPTION_FILES: &str = "files";
pub const OPTION_INIT_ACTIONS: &str = "initialization-actions";
pub const OPTION_SCOPES: &str = "scopes";
pub const OPTION_TAGS: &str = "tags";
pub const OPTION_MAX_IDLE: &str = "max-idle";
pub const OPTION_NAME: &str = "name";

/// Prefix for server-side label filters on list calls.
pub const FILTER_LABEL_PREFIX: &str = "labels.";
/// Job label identifying logically-equivalent submissions.
pub const DEDUP_LABEL: &str = "kiln-dedup-id";

/// Which kind of cluster a submission targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterType {
    Dataproc,
    OnPremise,
}

/// Autoscaler parameters, encoded into cluster metadata at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoscalerConfig {
    /// Evaluation interval in seconds.
    pub interval_secs: u64,
    /// Maximum number of workers.
    pub max: u32,
    /// Scaling factor applied per evaluation.
    pub factor: f64,
    /// Whether the autoscaler may also scale down.
    #[serde(default)]
    pub downscale: bool,
    /// Idle timeout before downscaling, seconds.
    #[serde(default)]
    pub downscale_timeout_secs: u64,
}

/// Pool sizing for pooled submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of pool slots (maximum live clusters per client).
    pub limit: u32,
    /// Lifetime after which a pooled cluster is considered stale, seconds.
    pub max_age_secs: u64,
}

impl PoolConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

/// Options passed to cluster create/delete calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterOptions {
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl ClusterOptions {
    /// Parse the comma-separated `properties` option into a key/value map.
    pub fn properties(&self) -> BTreeMap<String, String> {
        parse_pairs(self.options.get(OPTION_PROPERTIES))
    }
}

/// Options and arguments for the job submit call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmitOptions {
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    #[serde(default)]
    pub job_args: Vec<String>,
}

impl SubmitOptions {
    /// Parse the comma-separated `labels` option into a key/value map.
    pub fn labels(&self) -> BTreeMap<String, String> {
        parse_pairs(self.options.get(OPTION_LABELS))
    }

    /// The dedup label value, if the submission carries one.
    pub fn dedup_id(&self) -> Option<String> {
        self.labels().get(DEDUP_LABEL).cloned()
    }
}

/// The full configuration for one submission. Immutable once assembled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmissionConfig {
    pub client_id: Option<String>,
    pub log_bucket: Option<String>,
    pub region: Option<String>,
    pub cluster_type: Option<ClusterType>,
    pub job_type: Option<String>,
    /// Metrics backend tag, resolved through the metrics registry.
    pub metrics: Option<String>,
    /// History-drain wait budget, seconds. Non-positive disables the wait.
    pub history_timeout_secs: Option<i64>,
    pub heartbeat_interval_secs: Option<u64>,
    /// Reaper threshold advertised in cluster metadata, minutes.
    pub collector_timeout_mins: Option<u64>,
    #[serde(default)]
    pub dry_run: bool,
    /// Zones to pick from at random when no explicit zone is configured.
    #[serde(default)]
    pub default_zones: Vec<String>,
    pub autoscaler: Option<AutoscalerConfig>,
    pub pooling: Option<PoolConfig>,
    pub dedup_max_age_secs: Option<u64>,
    #[serde(default)]
    pub cluster: ClusterOptions,
    #[serde(default)]
    pub submit: SubmitOptions,
}

impl SubmissionConfig {
    /// Load a (possibly partial) configuration from a JSON file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Layer `over` on top of `self`: scalar fields from `over` win when set,
    /// option maps merge with list-aware semantics.
    pub fn layered(&self, over: &SubmissionConfig) -> SubmissionConfig {
        let mut merged = self.clone();

        merge_field(&mut merged.client_id, &over.client_id);
        merge_field(&mut merged.log_bucket, &over.log_bucket);
        merge_field(&mut merged.region, &over.region);
        merge_field(&mut merged.cluster_type, &over.cluster_type);
        merge_field(&mut merged.job_type, &over.job_type);
        merge_field(&mut merged.metrics, &over.metrics);
        merge_field(&mut merged.history_timeout_secs, &over.history_timeout_secs);
        merge_field(
            &mut merged.heartbeat_interval_secs,
            &over.heartbeat_interval_secs,
        );
        merge_field(
            &mut merged.collector_timeout_mins,
            &over.collector_timeout_mins,
        );
        merge_field(&mut merged.autoscaler, &over.autoscaler);
        merge_field(&mut merged.pooling, &over.pooling);
        merge_field(&mut merged.dedup_max_age_secs, &over.dedup_max_age_secs);

        merged.dry_run = self.dry_run || over.dry_run;
        if !over.default_zones.is_empty() {
            merged.default_zones = over.default_zones.clone();
        }

        for (key, value) in &over.cluster.options {
            add_option(&mut merged.cluster.options, key, value);
        }
        for (key, value) in &over.submit.options {
            add_option(&mut merged.submit.options, key, value);
        }
        if !over.submit.job_args.is_empty() {
            merged.submit.job_args = over.submit.job_args.clone();
        }

        merged
    }

    pub fn pooling_enabled(&self) -> bool {
        self.pooling.is_some()
    }

    pub fn dedup_max_age(&self) -> Option<Duration> {
        self.dedup_max_age_secs.map(Duration::from_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.unwrap_or(60))
    }

    /// The project the cluster lives in, once configured.
    pub fn cluster_project(&self) -> Option<&str> {
        self.cluster.options.get(OPTION_PROJECT).map(String::as_str)
    }
}

/// Unwrap a field that validation guarantees, reporting it as missing
/// instead of panicking if the guarantee does not hold.
pub fn required_field<'a>(value: Option<&'a str>, field: &'static str) -> ConfigResult<&'a str> {
    value.ok_or(ConfigError::MissingField(field))
}

/// Insert an option, joining values with a comma for list-valued keys.
pub fn add_option(options: &mut BTreeMap<String, String>, key: &str, value: &str) {
    if is_list_option(key) {
        match options.get_mut(key) {
            Some(existing) if !existing.is_empty() => {
                if !value.is_empty() {
                    existing.push(',');
                    existing.push_str(value);
                }
            }
            _ => {
                options.insert(key.to_string(), value.to_string());
            }
        }
    } else {
        options.insert(key.to_string(), value.to_string());
    }
}

fn is_list_option(key: &str) -> bool {
    matches!(
        key,
        OPTION_INIT_ACTIONS
            | OPTION_SCOPES
            | OPTION_METADATA
            | OPTION_LABELS
            | OPTION_TAGS
            | OPTION_PROPERTIES
            | OPTION_JARS
            | OPTION_FILES
    )
}

fn merge_field<T: Clone>(into: &mut Option<T>, over: &Option<T>) {
    if let Some(value) = over {
        *into = Some(value.clone());
    }
}

fn parse_pairs(raw: Option<&String>) -> BTreeMap<String, String> {
    let mut pairs = BTreeMap::new();
    if let Some(raw) = raw {
        for entry in raw.split(',') {
            if let Some((key, value)) = entry.split_once('=') {
                pairs.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_option_joins_list_values() {
        let mut options = BTreeMap::new();
        add_option(&mut options, OPTION_LABELS, "a=1");
        add_option(&mut options, OPTION_LABELS, "b=2");
        assert_eq!(options.get(OPTION_LABELS), Some(&"a=1,b=2".to_string()));
    }

    #[test]
    fn add_option_overwrites_scalar_values() {
        let mut options = BTreeMap::new();
        add_option(&mut options, OPTION_ZONE, "europe-west1-b");
        add_option(&mut options, OPTION_ZONE, "us-east1-c");
        assert_eq!(options.get(OPTION_ZONE), Some(&"us-east1-c".to_string()));
    }

    #[test]
    fn layered_scalars_prefer_the_overlay() {
        let base = SubmissionConfig {
            client_id: Some("base".to_string()),
            region: Some("europe-west1".to_string()),
            ..Default::default()
        };
        let over = SubmissionConfig {
            client_id: Some("over".to_string()),
            ..Default::default()
        };

        let merged = base.layered(&over);
        assert_eq!(merged.client_id.as_deref(), Some("over"));
        assert_eq!(merged.region.as_deref(), Some("europe-west1"));
    }

    #[test]
    fn layered_merges_option_maps() {
        let mut base = SubmissionConfig::default();
        base.cluster
            .options
            .insert(OPTION_LABELS.to_string(), "team=data".to_string());
        let mut over = SubmissionConfig::default();
        over.cluster
            .options
            .insert(OPTION_LABELS.to_string(), "env=prod".to_string());

        let merged = base.layered(&over);
        assert_eq!(
            merged.cluster.options.get(OPTION_LABELS),
            Some(&"team=data,env=prod".to_string())
        );
    }

    #[test]
    fn submit_labels_parse_and_expose_dedup_id() {
        let mut submit = SubmitOptions::default();
        submit.options.insert(
            OPTION_LABELS.to_string(),
            format!("{DEDUP_LABEL}=run-42, owner=etl"),
        );
        assert_eq!(submit.labels().get("owner").map(String::as_str), Some("etl"));
        assert_eq!(submit.dedup_id().as_deref(), Some("run-42"));
    }

    #[test]
    fn cluster_properties_parse() {
        let mut cluster = ClusterOptions::default();
        cluster.options.insert(
            OPTION_PROPERTIES.to_string(),
            "mapred:dir=gs://b/tmp,yarn:x=1".to_string(),
        );
        let props = cluster.properties();
        assert_eq!(props.get("mapred:dir").map(String::as_str), Some("gs://b/tmp"));
        assert_eq!(props.get("yarn:x").map(String::as_str), Some("1"));
    }

    #[test]
    fn partial_json_deserializes() {
        let cfg: SubmissionConfig = serde_json::from_str(
            r#"{
                "client_id": "etl-pipeline",
                "pooling": {"limit": 4, "max_age_secs": 3600},
                "cluster": {"options": {"project": "my-project"}}
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.client_id.as_deref(), Some("etl-pipeline"));
        assert_eq!(cfg.pooling.unwrap().limit, 4);
        assert_eq!(cfg.cluster_project(), Some("my-project"));
        assert!(!cfg.dry_run);
    }
}
