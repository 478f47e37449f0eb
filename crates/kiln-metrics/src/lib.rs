//! kiln-metrics — submission outcome reporting.
//!
//! Coordinators report cluster creations/deletions, job submissions, fatal
//! errors and the final execution result through the `Metrics` trait. The
//! backend is chosen by an ordinary string tag from configuration through
//! `for_tag` — plain construction, nothing dynamic.

use std::sync::Arc;

use tracing::{error, info};

/// Sink for submission lifecycle events.
pub trait Metrics: Send + Sync {
    fn cluster_creation(&self, client_id: &str, zone: &str, success: bool);
    fn cluster_deletion(&self, client_id: &str, success: bool);
    fn job_submission(&self, client_id: &str, kind: &str, success: bool);
    fn execution_result(&self, client_id: &str, success: bool);
    fn fatal_error(&self, client_id: &str, message: &str);
    /// Flush buffered events before process exit.
    fn flush(&self);
}

/// Default backend: structured log lines, one per event.
#[derive(Debug, Default)]
pub struct LoggingMetrics;

impl Metrics for LoggingMetrics {
    fn cluster_creation(&self, client_id: &str, zone: &str, success: bool) {
        info!(client_id, zone, success, "metric: cluster creation");
    }

    fn cluster_deletion(&self, client_id: &str, success: bool) {
        info!(client_id, success, "metric: cluster deletion");
    }

    fn job_submission(&self, client_id: &str, kind: &str, success: bool) {
        info!(client_id, kind, success, "metric: job submission");
    }

    fn execution_result(&self, client_id: &str, success: bool) {
        info!(client_id, success, "metric: execution result");
    }

    fn fatal_error(&self, client_id: &str, message: &str) {
        error!(client_id, message, "metric: fatal error");
    }

    fn flush(&self) {}
}

/// Discards every event. Useful under test.
#[derive(Debug, Default)]
pub struct NullMetrics;

impl Metrics for NullMetrics {
    fn cluster_creation(&self, _: &str, _: &str, _: bool) {}
    fn cluster_deletion(&self, _: &str, _: bool) {}
    fn job_submission(&self, _: &str, _: &str, _: bool) {}
    fn execution_result(&self, _: &str, _: bool) {}
    fn fatal_error(&self, _: &str, _: &str) {}
    fn flush(&self) {}
}

/// Resolve a metrics backend by its configuration tag.
pub fn for_tag(tag: &str) -> Option<Arc<dyn Metrics>> {
    match tag {
        "logging" => Some(Arc::new(LoggingMetrics)),
        "null" => Some(Arc::new(NullMetrics)),
        _ => None,
    }
}
