//! Invocation-mode detection and fail-fast validation.
//!
//! Validation runs before any remote call. A submission is either
//! on-premise (non-managed cluster), static (user supplied an existing
//! managed cluster) or dynamic (kiln provisions the cluster itself).

use crate::config::{
    ClusterType, OPTION_CLUSTER, OPTION_FILES, OPTION_JARS, OPTION_NAME, OPTION_PROJECT,
    OPTION_ZONE, SubmissionConfig,
};
use crate::error::{ConfigError, ConfigResult};

/// How a submission reaches its cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationMode {
    /// Submit to a non-managed, on-premise cluster.
    OnPremise,
    /// Submit to an existing managed cluster named by the user.
    Static,
    /// Provision an ephemeral cluster for this job.
    Dynamic,
}

/// Classify the submission. The user naming a target cluster in the submit
/// options makes it static; anything on-premise stays on-premise.
pub fn invocation_mode(config: &SubmissionConfig) -> InvocationMode {
    if config.cluster_type == Some(ClusterType::OnPremise) {
        InvocationMode::OnPremise
    } else if config.submit.options.contains_key(OPTION_CLUSTER) {
        InvocationMode::Static
    } else {
        InvocationMode::Dynamic
    }
}

/// Check all required fields for the detected mode. Must be called before
/// any provider interaction.
pub fn validate(config: &SubmissionConfig) -> ConfigResult<InvocationMode> {
    let mode = invocation_mode(config);

    config
        .cluster_type
        .ok_or(ConfigError::MissingField("cluster_type"))?;
    config
        .job_type
        .as_ref()
        .ok_or(ConfigError::MissingField("job_type"))?;

    match mode {
        InvocationMode::Dynamic => {
            config
                .client_id
                .as_ref()
                .ok_or(ConfigError::MissingField("client_id"))?;
            config
                .log_bucket
                .as_ref()
                .ok_or(ConfigError::MissingField("log_bucket"))?;
            config
                .region
                .as_ref()
                .ok_or(ConfigError::MissingField("region"))?;
            config
                .heartbeat_interval_secs
                .ok_or(ConfigError::MissingField("heartbeat_interval_secs"))?;
            config
                .collector_timeout_mins
                .ok_or(ConfigError::MissingField("collector_timeout_mins"))?;
            config
                .history_timeout_secs
                .ok_or(ConfigError::MissingField("history_timeout_secs"))?;
            if config.cluster_project().is_none() {
                return Err(ConfigError::MissingField("cluster.options.project"));
            }
            // Names are assigned by the coordinators (unique or pool-deterministic).
            if config.cluster.options.contains_key(OPTION_NAME) {
                return Err(ConfigError::Invalid(
                    "the cluster name cannot be set by the user".to_string(),
                ));
            }
            if config.region.as_deref() == Some("global")
                && !config.cluster.options.contains_key(OPTION_ZONE)
                && config.default_zones.is_empty()
            {
                return Err(ConfigError::Invalid(
                    "region global requires cluster.options.zone or default_zones".to_string(),
                ));
            }
        }
        InvocationMode::Static => {
            if !config.submit.options.contains_key(OPTION_PROJECT) {
                return Err(ConfigError::MissingField("submit.options.project"));
            }
        }
        InvocationMode::OnPremise => {
            if config.submit.options.contains_key(OPTION_JARS) {
                return Err(ConfigError::Invalid(
                    "the jars option is not supported for on-premise submissions".to_string(),
                ));
            }
            if config.submit.options.contains_key(OPTION_FILES) {
                return Err(ConfigError::Invalid(
                    "the files option is not supported for on-premise submissions".to_string(),
                ));
            }
        }
    }

    if let Some(autoscaler) = &config.autoscaler {
        if autoscaler.downscale && autoscaler.downscale_timeout_secs == 0 {
            return Err(ConfigError::MissingField(
                "autoscaler.downscale_timeout_secs",
            ));
        }
    }

    if let Some(pooling) = &config.pooling {
        if pooling.limit == 0 {
            return Err(ConfigError::Invalid("pooling.limit must be > 0".to_string()));
        }
        if pooling.max_age_secs == 0 {
            return Err(ConfigError::Invalid(
                "pooling.max_age_secs must be > 0".to_string(),
            ));
        }
    }

    Ok(mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;

    fn dynamic_config() -> SubmissionConfig {
        let mut config = SubmissionConfig {
            client_id: Some("etl".to_string()),
            log_bucket: Some("gs://logs".to_string()),
            region: Some("europe-west1".to_string()),
            cluster_type: Some(ClusterType::Dataproc),
            job_type: Some("hadoop".to_string()),
            history_timeout_secs: Some(300),
            heartbeat_interval_secs: Some(30),
            collector_timeout_mins: Some(20),
            ..Default::default()
        };
        config
            .cluster
            .options
            .insert(OPTION_PROJECT.to_string(), "my-project".to_string());
        config
    }

    #[test]
    fn dynamic_config_validates() {
        assert_eq!(validate(&dynamic_config()).unwrap(), InvocationMode::Dynamic);
    }

    #[test]
    fn missing_client_id_is_rejected() {
        let mut config = dynamic_config();
        config.client_id = None;
        assert!(matches!(
            validate(&config),
            Err(ConfigError::MissingField("client_id"))
        ));
    }

    #[test]
    fn missing_project_is_rejected() {
        let mut config = dynamic_config();
        config.cluster.options.clear();
        assert!(matches!(
            validate(&config),
            Err(ConfigError::MissingField("cluster.options.project"))
        ));
    }

    #[test]
    fn user_supplied_cluster_name_is_rejected() {
        let mut config = dynamic_config();
        config
            .cluster
            .options
            .insert(OPTION_NAME.to_string(), "my-cluster".to_string());
        assert!(matches!(validate(&config), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn static_target_switches_mode() {
        let mut config = dynamic_config();
        config
            .submit
            .options
            .insert(OPTION_CLUSTER.to_string(), "shared-cluster".to_string());
        // Static requires the submit project, not the cluster project.
        assert!(matches!(
            validate(&config),
            Err(ConfigError::MissingField("submit.options.project"))
        ));

        config
            .submit
            .options
            .insert(OPTION_PROJECT.to_string(), "my-project".to_string());
        assert_eq!(validate(&config).unwrap(), InvocationMode::Static);
    }

    #[test]
    fn on_premise_rejects_jars() {
        let mut config = dynamic_config();
        config.cluster_type = Some(ClusterType::OnPremise);
        config
            .submit
            .options
            .insert(OPTION_JARS.to_string(), "gs://a.jar".to_string());
        assert!(matches!(validate(&config), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn zero_pool_limit_is_rejected() {
        let mut config = dynamic_config();
        config.pooling = Some(PoolConfig {
            limit: 0,
            max_age_secs: 3600,
        });
        assert!(matches!(validate(&config), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn zero_pool_max_age_is_rejected() {
        let mut config = dynamic_config();
        config.pooling = Some(PoolConfig {
            limit: 2,
            max_age_secs: 0,
        });
        assert!(matches!(validate(&config), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn global_region_needs_a_zone_source() {
        let mut config = dynamic_config();
        config.region = Some("global".to_string());
        assert!(matches!(validate(&config), Err(ConfigError::Invalid(_))));

        config.default_zones = vec!["europe-west1-b".to_string()];
        assert!(validate(&config).is_ok());
    }
}
