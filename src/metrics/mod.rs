//! Prometheus metrics module
//!
//! Recording goes through the global `metrics` macros; without an installed
//! recorder (tests) every call is a no-op.

use crate::error::ManagerError;
use metrics::{counter, describe_counter, describe_gauge, gauge, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;

/// Manager metrics collector
#[derive(Clone, Default)]
pub struct ManagerMetrics {
    handle: Option<Arc<PrometheusHandle>>,
}

impl ManagerMetrics {
    /// Install the Prometheus recorder and return the collector
    pub fn install() -> Result<Self, ManagerError> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| ManagerError::Config(format!("failed to install metrics recorder: {e}")))?;

        Self::register_metrics();

        Ok(Self {
            handle: Some(Arc::new(handle)),
        })
    }

    /// Collector that records nothing and renders an empty page
    pub fn disabled() -> Self {
        Self { handle: None }
    }

    /// Register metric descriptions
    fn register_metrics() {
        describe_counter!(
            "manager_worker_lifecycle_total",
            Unit::Count,
            "Worker lifecycle transitions (created, ready, errored, terminated)"
        );
        describe_counter!(
            "manager_worker_call_failures_total",
            Unit::Count,
            "Worker command calls that failed or timed out"
        );
        describe_counter!(
            "manager_job_runs_total",
            Unit::Count,
            "Scheduled job executions by outcome"
        );
        describe_counter!(
            "manager_job_skipped_total",
            Unit::Count,
            "Scheduled job ticks skipped because the previous run was still in flight"
        );
        describe_counter!(
            "manager_moderation_notices_total",
            Unit::Count,
            "Moderation notices by delivery outcome"
        );
        describe_counter!("manager_errors_total", Unit::Count, "Total manager errors");

        describe_gauge!(
            "manager_workers_ready",
            Unit::Count,
            "Number of workers that reached the ready state"
        );
        describe_gauge!(
            "manager_guilds_total",
            Unit::Count,
            "Distinct guilds across the fleet (server count job)"
        );
    }

    /// Record a worker lifecycle transition
    pub fn record_lifecycle(&self, shard_id: u32, transition: &'static str) {
        counter!(
            "manager_worker_lifecycle_total",
            "shard_id" => shard_id.to_string(),
            "transition" => transition
        )
        .increment(1);
    }

    /// Record a failed worker call
    pub fn record_call_failure(&self, shard_id: u32, command: &'static str) {
        counter!(
            "manager_worker_call_failures_total",
            "shard_id" => shard_id.to_string(),
            "command" => command
        )
        .increment(1);
    }

    /// Record a job execution
    pub fn record_job_run(&self, job: &str, success: bool) {
        counter!(
            "manager_job_runs_total",
            "job" => job.to_string(),
            "outcome" => if success { "success" } else { "failure" }
        )
        .increment(1);
    }

    /// Record a skipped job tick
    pub fn record_job_skipped(&self, job: &str) {
        counter!("manager_job_skipped_total", "job" => job.to_string()).increment(1);
    }

    /// Record a moderation notice outcome
    pub fn record_notice(&self, outcome: &'static str) {
        counter!("manager_moderation_notices_total", "outcome" => outcome).increment(1);
    }

    /// Record an error by type label
    pub fn record_error(&self, err: &ManagerError) {
        counter!("manager_errors_total", "error_type" => err.error_type_label()).increment(1);
    }

    /// Set ready worker count
    pub fn set_workers_ready(&self, count: usize) {
        gauge!("manager_workers_ready").set(count as f64);
    }

    /// Set distinct guild count
    pub fn set_guilds(&self, count: usize) {
        gauge!("manager_guilds_total").set(count as f64);
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.as_ref().map(|h| h.render()).unwrap_or_default()
    }
}

impl std::fmt::Debug for ManagerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerMetrics")
            .field("installed", &self.handle.is_some())
            .finish()
    }
}
