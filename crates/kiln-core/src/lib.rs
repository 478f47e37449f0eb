//! kiln-core — submission configuration model, merging, and validation.
//!
//! The `SubmissionConfig` is assembled once per invocation (CLI flags layered
//! over JSON config files) and is immutable afterwards. Coordinators that
//! resolve a target cluster return an explicit resolution value instead of
//! mutating the config.
//!
//! # Components
//!
//! - **`config`** — the typed configuration value and option-map merging
//! - **`validate`** — invocation-mode detection and fail-fast validation
//! - **`error`** — configuration error taxonomy

pub mod config;
pub mod error;
pub mod validate;

pub use config::{
    AutoscalerConfig, ClusterOptions, ClusterType, PoolConfig, SubmissionConfig, SubmitOptions,
    add_option, required_field,
};
pub use error::{ConfigError, ConfigResult};
pub use validate::{InvocationMode, invocation_mode, validate};
