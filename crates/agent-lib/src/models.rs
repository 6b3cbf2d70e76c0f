//! Core data models for the data center agent

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Milli-CPU units in one core
pub const CORE: u64 = 1000;
/// Binary mebibyte
pub const MI: u64 = 1024 * 1024;

/// The canonical web port; only global exposures on it get a route
pub const WEB_PORT: u32 = 80;

/// Resource dimensions of one container (or a time-integrated usage value)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUnit {
    pub cpu_milli: u64,
    pub memory_bytes: u64,
    pub disk_bytes: u64,
}

impl ResourceUnit {
    pub fn new(cpu_milli: u64, memory_bytes: u64, disk_bytes: u64) -> Self {
        Self {
            cpu_milli,
            memory_bytes,
            disk_bytes,
        }
    }

    /// Component-wise saturating addition
    pub fn saturating_add(self, other: ResourceUnit) -> Self {
        Self {
            cpu_milli: self.cpu_milli.saturating_add(other.cpu_milli),
            memory_bytes: self.memory_bytes.saturating_add(other.memory_bytes),
            disk_bytes: self.disk_bytes.saturating_add(other.disk_bytes),
        }
    }
}

/// Transport protocol of an exposed port
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        }
    }
}

/// One exposed port of a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceExpose {
    pub internal_port: u32,
    /// Zero means "same as internal port"
    pub external_port: u32,
    pub protocol: Protocol,
    pub is_global: bool,
    pub hosts: Vec<String>,
}

impl ServiceExpose {
    pub fn web(internal_port: u32, external_port: u32) -> Self {
        Self {
            internal_port,
            external_port,
            protocol: Protocol::Tcp,
            is_global: true,
            hosts: Vec::new(),
        }
    }

    pub fn effective_external_port(&self) -> u32 {
        if self.external_port == 0 {
            self.internal_port
        } else {
            self.external_port
        }
    }

    /// Whether this exposure is published through a route
    pub fn is_public_web(&self) -> bool {
        self.is_global && self.effective_external_port() == WEB_PORT
    }
}

/// Declarative description of one deployable unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceManifest {
    pub name: String,
    pub image: String,
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub unit: ResourceUnit,
    /// Zero means "remove the workload"
    pub replica_count: u32,
    pub expose: Vec<ServiceExpose>,
}

impl ServiceManifest {
    fn default_unit() -> ResourceUnit {
        ResourceUnit::new(CORE / 10, 128 * MI, 256 * MI)
    }

    /// A long-running workload with one replica exposed on port 80
    pub fn workload(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            args: Vec::new(),
            env: Vec::new(),
            unit: Self::default_unit(),
            replica_count: 1,
            expose: vec![ServiceExpose::web(WEB_PORT, WEB_PORT)],
        }
    }

    /// A run-to-completion manifest without exposure
    pub fn job(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            args: Vec::new(),
            env: Vec::new(),
            unit: Self::default_unit(),
            replica_count: 1,
            expose: Vec::new(),
        }
    }

    /// The first exposure that qualifies for a route, if any
    pub fn public_web_expose(&self) -> Option<&ServiceExpose> {
        self.expose.iter().find(|e| e.is_public_web())
    }
}

/// Ordered manifests sharing one task identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestGroup {
    pub task_id: String,
    pub services: Vec<ServiceManifest>,
    /// Cron expression, only meaningful for scheduled jobs
    pub schedule: Option<String>,
}

impl ManifestGroup {
    /// Expand a task's images into one manifest per image.
    ///
    /// A single image keeps the task id as its name; several images are
    /// named `<task>-0`, `<task>-1`, ...
    pub fn expand<F>(task_id: &str, images: &[String], make: F) -> Result<Self, ValidationError>
    where
        F: Fn(String, String) -> ServiceManifest,
    {
        validate_name(task_id)?;
        let images: Vec<&str> = images
            .iter()
            .map(|i| i.trim())
            .filter(|i| !i.is_empty())
            .collect();

        let services = match images.as_slice() {
            [] => return Err(ValidationError::NoImage),
            [image] => vec![make(task_id.to_string(), image.to_string())],
            many => many
                .iter()
                .enumerate()
                .map(|(i, image)| make(format!("{}-{}", task_id, i), image.to_string()))
                .collect(),
        };

        Ok(Self {
            task_id: task_id.to_string(),
            services,
            schedule: None,
        })
    }

    pub fn with_schedule(mut self, schedule: impl Into<String>) -> Self {
        self.schedule = Some(schedule.into());
        self
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services.iter().map(|s| s.name.clone()).collect()
    }
}

/// Resource names end up in DNS labels and label values
fn validate_name(name: &str) -> Result<(), ValidationError> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-');
    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidName(name.to_string()))
    }
}

/// The six resource kinds the agent manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    Namespace,
    Workload,
    NetworkService,
    Route,
    BatchJob,
    ScheduledJob,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Namespace => "namespace",
            ResourceKind::Workload => "workload",
            ResourceKind::NetworkService => "network service",
            ResourceKind::Route => "route",
            ResourceKind::BatchJob => "batch job",
            ResourceKind::ScheduledJob => "scheduled job",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskOperation {
    Create,
    Update,
    Cancel,
}

impl TaskOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskOperation::Create => "create",
            TaskOperation::Update => "update",
            TaskOperation::Cancel => "cancel",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskType {
    Workload,
    Job,
    ScheduledJob,
}

/// Internal and external port of an update request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub internal: u32,
    pub external: u32,
}

/// Inbound command from the controller, consumed exactly once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskCommand {
    pub operation: TaskOperation,
    pub task_id: String,
    pub task_type: TaskType,
    pub images: Vec<String>,
    pub schedule: Option<String>,
    pub replica_count: Option<u32>,
    pub ports: Option<PortMapping>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    StartSuccess,
    StartFailed,
    UpdateSuccess,
    UpdateFailed,
    Cancelled,
    CancelFailed,
}

impl TaskStatus {
    /// Status for the outcome of an operation
    pub fn for_outcome(operation: TaskOperation, success: bool) -> Self {
        match (operation, success) {
            (TaskOperation::Create, true) => TaskStatus::StartSuccess,
            (TaskOperation::Create, false) => TaskStatus::StartFailed,
            (TaskOperation::Update, true) => TaskStatus::UpdateSuccess,
            (TaskOperation::Update, false) => TaskStatus::UpdateFailed,
            (TaskOperation::Cancel, true) => TaskStatus::Cancelled,
            (TaskOperation::Cancel, false) => TaskStatus::CancelFailed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            TaskStatus::StartSuccess | TaskStatus::UpdateSuccess | TaskStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::StartSuccess => "start_success",
            TaskStatus::StartFailed => "start_failed",
            TaskStatus::UpdateSuccess => "update_success",
            TaskStatus::UpdateFailed => "update_failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::CancelFailed => "cancel_failed",
        }
    }
}

/// Outbound result of one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub task_id: String,
    pub task_type: TaskType,
    pub operation: TaskOperation,
    pub status: TaskStatus,
    pub url: Option<String>,
    /// Error text, empty on success
    pub report: String,
}

/// Periodic liveness and inventory frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatMessage {
    pub data_center_id: String,
    pub timestamp_nanos: u64,
    pub inventory_summary: String,
    pub metrics_json: String,
}

/// Available headroom of one schedulable node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCapacity {
    pub name: String,
    pub available: ResourceUnit,
}

/// Inventory carried in heartbeats
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySummary {
    pub nodes: Vec<NodeCapacity>,
    pub workloads: Vec<String>,
}

/// Rollout status of one workload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadStatus {
    pub observed_generation: i64,
    pub replicas: i32,
    pub updated_replicas: i32,
    pub ready_replicas: i32,
    pub available_replicas: i32,
}

/// Cluster-wide totals and usage carried as heartbeat metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMetrics {
    pub node_total: BTreeMap<String, ResourceUnit>,
    pub node_in_use: BTreeMap<String, ResourceUnit>,
    /// Images already pulled on each node
    pub node_images: BTreeMap<String, Vec<String>>,
    /// Exposed port -> number of agent-owned network services using it
    pub endpoints: BTreeMap<i32, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn images(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_workload_defaults() {
        let m = ServiceManifest::workload("web", "nginx:1.12");
        assert_eq!(m.replica_count, 1);
        assert_eq!(m.unit, ResourceUnit::new(100, 128 * MI, 256 * MI));
        assert_eq!(m.expose.len(), 1);
        assert!(m.expose[0].is_public_web());
    }

    #[test]
    fn test_job_has_no_exposure() {
        let m = ServiceManifest::job("batch", "busybox");
        assert!(m.expose.is_empty());
        assert!(m.public_web_expose().is_none());
    }

    #[test]
    fn test_external_port_defaults_to_internal() {
        let expose = ServiceExpose::web(80, 0);
        assert_eq!(expose.effective_external_port(), 80);
        assert!(expose.is_public_web());

        let internal_only = ServiceExpose {
            is_global: false,
            ..ServiceExpose::web(80, 80)
        };
        assert!(!internal_only.is_public_web());

        let other_port = ServiceExpose::web(8080, 8080);
        assert!(!other_port.is_public_web());
    }

    #[test]
    fn test_expand_single_image_keeps_name() {
        let group =
            ManifestGroup::expand("web", &images(&["nginx:1.12"]), ServiceManifest::workload)
                .unwrap();
        assert_eq!(group.service_names(), vec!["web"]);
    }

    #[test]
    fn test_expand_many_images_indexes_names() {
        let group = ManifestGroup::expand(
            "web",
            &images(&["nginx", "redis", "busybox"]),
            |name, image| ServiceManifest::workload(name, image),
        )
        .unwrap();
        assert_eq!(group.service_names(), vec!["web-0", "web-1", "web-2"]);
        assert_eq!(group.services[1].image, "redis");
    }

    #[test]
    fn test_expand_without_image_fails() {
        let err = ManifestGroup::expand("web", &[], ServiceManifest::workload).unwrap_err();
        assert_eq!(err.to_string(), "no image");

        let blank = ManifestGroup::expand("web", &images(&[" "]), ServiceManifest::workload);
        assert!(matches!(blank, Err(ValidationError::NoImage)));
    }

    #[test]
    fn test_expand_rejects_invalid_names() {
        for bad in ["", "Web", "web_1", "-web", "web-"] {
            let result = ManifestGroup::expand(bad, &images(&["nginx"]), ServiceManifest::workload);
            assert!(
                matches!(result, Err(ValidationError::InvalidName(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_status_for_outcome() {
        assert_eq!(
            TaskStatus::for_outcome(TaskOperation::Create, false),
            TaskStatus::StartFailed
        );
        assert_eq!(
            TaskStatus::for_outcome(TaskOperation::Cancel, true),
            TaskStatus::Cancelled
        );
        assert!(TaskStatus::UpdateSuccess.is_success());
        assert!(!TaskStatus::CancelFailed.is_success());
    }

    #[test]
    fn test_resource_unit_saturating_add() {
        let a = ResourceUnit::new(u64::MAX, 1, 2);
        let b = ResourceUnit::new(1, 1, 1);
        assert_eq!(a.saturating_add(b), ResourceUnit::new(u64::MAX, 2, 3));
    }
}
