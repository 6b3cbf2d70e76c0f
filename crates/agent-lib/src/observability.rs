//! Prometheus metrics and structured event logging for the agent

use crate::models::{TaskOperation, TaskReport, TaskStatus};
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    HistogramVec, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Reconciliations talk to the API server, so buckets run from 10ms to a minute
const RECONCILE_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

static GLOBAL_METRICS: OnceLock<AgentMetricsInner> = OnceLock::new();

struct AgentMetricsInner {
    commands_total: IntCounterVec,
    reconcile_duration_seconds: HistogramVec,
    heartbeats_sent: IntCounter,
    heartbeat_failures: IntCounter,
    stream_reconnects: IntCounter,
    session_active: IntGauge,
    ledger_publications: IntCounterVec,
    metered_workloads: IntGauge,
}

impl AgentMetricsInner {
    fn new() -> Self {
        Self {
            commands_total: register_int_counter_vec!(
                "dcagent_commands_total",
                "Task commands handled, by operation and resulting status",
                &["operation", "status"]
            )
            .expect("Failed to register commands_total"),

            reconcile_duration_seconds: register_histogram_vec!(
                "dcagent_reconcile_duration_seconds",
                "Time spent executing one task command against the cluster",
                &["operation"],
                RECONCILE_BUCKETS.to_vec()
            )
            .expect("Failed to register reconcile_duration_seconds"),

            heartbeats_sent: register_int_counter!(
                "dcagent_heartbeats_sent_total",
                "Heartbeats written to the controller stream"
            )
            .expect("Failed to register heartbeats_sent"),

            heartbeat_failures: register_int_counter!(
                "dcagent_heartbeat_failures_total",
                "Heartbeats that could not be written"
            )
            .expect("Failed to register heartbeat_failures"),

            stream_reconnects: register_int_counter!(
                "dcagent_stream_reconnects_total",
                "Times the controller stream was lost and redialed"
            )
            .expect("Failed to register stream_reconnects"),

            session_active: register_int_gauge!(
                "dcagent_session_active",
                "1 while the controller stream is active"
            )
            .expect("Failed to register session_active"),

            ledger_publications: register_int_counter_vec!(
                "dcagent_ledger_publications_total",
                "Metering broadcasts by outcome",
                &["outcome"]
            )
            .expect("Failed to register ledger_publications"),

            metered_workloads: register_int_gauge!(
                "dcagent_metered_workloads",
                "Workloads included in the last metering snapshot"
            )
            .expect("Failed to register metered_workloads"),
        }
    }
}

/// Handle to the process-wide metrics; clones share one registry entry
#[derive(Clone)]
pub struct AgentMetrics {
    _private: (),
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AgentMetricsInner {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new)
    }

    pub fn record_command(&self, operation: TaskOperation, status: TaskStatus, elapsed: Duration) {
        self.inner()
            .commands_total
            .with_label_values(&[operation.as_str(), status.as_str()])
            .inc();
        self.inner()
            .reconcile_duration_seconds
            .with_label_values(&[operation.as_str()])
            .observe(elapsed.as_secs_f64());
    }

    pub fn inc_heartbeats_sent(&self) {
        self.inner().heartbeats_sent.inc();
    }

    pub fn inc_heartbeat_failures(&self) {
        self.inner().heartbeat_failures.inc();
    }

    pub fn inc_stream_reconnects(&self) {
        self.inner().stream_reconnects.inc();
    }

    pub fn set_session_active(&self, active: bool) {
        self.inner().session_active.set(i64::from(active));
    }

    pub fn record_ledger_publication(&self, outcome: &str) {
        self.inner()
            .ledger_publications
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn set_metered_workloads(&self, count: usize) {
        self.inner().metered_workloads.set(count as i64);
    }
}

/// Named agent events with a stable field layout
#[derive(Clone)]
pub struct StructuredLogger {
    data_center: String,
}

impl StructuredLogger {
    pub fn new(data_center: impl Into<String>) -> Self {
        Self {
            data_center: data_center.into(),
        }
    }

    pub fn data_center(&self) -> &str {
        &self.data_center
    }

    pub fn log_startup(&self, version: &str, namespace: &str, controller: &str) {
        info!(
            event = "agent_started",
            data_center = %self.data_center,
            agent_version = %version,
            namespace = %namespace,
            controller = %controller,
            "Data center agent started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            data_center = %self.data_center,
            reason = %reason,
            "Data center agent shutting down"
        );
    }

    pub fn log_session_state(&self, state: &str, detail: Option<&str>) {
        match detail {
            Some(detail) => warn!(
                event = "session_state",
                data_center = %self.data_center,
                state = %state,
                detail = %detail,
                "Controller session changed state"
            ),
            None => info!(
                event = "session_state",
                data_center = %self.data_center,
                state = %state,
                "Controller session changed state"
            ),
        }
    }

    pub fn log_task_reported(&self, report: &TaskReport, elapsed: Duration) {
        if report.status.is_success() {
            info!(
                event = "task_reported",
                data_center = %self.data_center,
                task_id = %report.task_id,
                task_type = ?report.task_type,
                status = report.status.as_str(),
                url = ?report.url,
                elapsed_ms = elapsed.as_millis() as u64,
                "Task command completed"
            );
        } else {
            warn!(
                event = "task_reported",
                data_center = %self.data_center,
                task_id = %report.task_id,
                task_type = ?report.task_type,
                status = report.status.as_str(),
                report = %report.report,
                elapsed_ms = elapsed.as_millis() as u64,
                "Task command failed"
            );
        }
    }

    pub fn log_metering_published(&self, key: &str, workloads: usize, duplicate: bool) {
        if duplicate {
            debug!(
                event = "metering_published",
                data_center = %self.data_center,
                key = %key,
                workloads = workloads,
                "Metering snapshot already recorded"
            );
        } else {
            info!(
                event = "metering_published",
                data_center = %self.data_center,
                key = %key,
                workloads = workloads,
                "Metering snapshot broadcast"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskType;

    #[test]
    fn test_metrics_handles_share_registry() {
        let metrics = AgentMetrics::new();
        let other = metrics.clone();

        metrics.record_command(TaskOperation::Create, TaskStatus::StartSuccess, Duration::from_millis(20));
        other.inc_heartbeats_sent();
        other.inc_heartbeat_failures();
        metrics.inc_stream_reconnects();
        metrics.set_session_active(true);
        metrics.record_ledger_publication("committed");
        metrics.set_metered_workloads(3);

        let counted = GLOBAL_METRICS
            .get()
            .unwrap()
            .commands_total
            .with_label_values(&["create", "start_success"])
            .get();
        assert!(counted >= 1);
    }

    #[test]
    fn test_logger_events_do_not_panic() {
        let logger = StructuredLogger::new("dc-1");
        assert_eq!(logger.data_center(), "dc-1");

        logger.log_session_state("active", None);
        logger.log_session_state("disconnected", Some("stream closed"));
        logger.log_task_reported(
            &TaskReport {
                task_id: "web".to_string(),
                task_type: TaskType::Workload,
                operation: TaskOperation::Create,
                status: TaskStatus::StartFailed,
                url: None,
                report: "no image".to_string(),
            },
            Duration::from_millis(3),
        );
        logger.log_metering_published("dc-1:apps", 2, true);
    }
}
