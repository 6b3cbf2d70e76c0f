//! Task-level operations on top of the cluster client
//!
//! A task is the controller's unit of work: one or more images deployed
//! under a shared task id, as a workload, a batch job or a scheduled job.

use crate::cluster::ClusterClient;
use crate::error::TaskError;
use crate::models::{
    ClusterMetrics, ManifestGroup, NodeCapacity, PortMapping, ResourceKind, ResourceUnit,
    ServiceExpose, ServiceManifest, WorkloadStatus,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::info;

/// Kinds removed when a workload task is cancelled
const WORKLOAD_KINDS: [ResourceKind; 3] = [
    ResourceKind::Workload,
    ResourceKind::NetworkService,
    ResourceKind::Route,
];

/// Everything the command stream and the metering publisher need
#[async_trait]
pub trait TaskBackend: Send + Sync {
    /// Deploy a workload per image; returns the public host if one was routed
    async fn create_tasks(&self, task_id: &str, images: &[String])
        -> Result<Option<String>, TaskError>;

    /// Run a batch job per image, or a scheduled job when `schedule` is set
    async fn create_jobs(
        &self,
        task_id: &str,
        schedule: Option<&str>,
        images: &[String],
    ) -> Result<(), TaskError>;

    async fn update_task(
        &self,
        task_id: &str,
        images: &[String],
        replicas: u32,
        ports: PortMapping,
    ) -> Result<Option<String>, TaskError>;

    async fn cancel_task(&self, task_id: &str) -> Result<(), TaskError>;

    async fn cancel_job(&self, task_id: &str, scheduled: bool) -> Result<(), TaskError>;

    /// Names and JSON renderings of deployed workloads
    async fn list_tasks(&self) -> Result<(Vec<String>, Vec<String>), TaskError>;

    async fn task_status(&self, task_id: &str) -> Result<WorkloadStatus, TaskError>;

    async fn inventory(&self) -> Result<Vec<NodeCapacity>, TaskError>;

    async fn metering(&self) -> Result<BTreeMap<String, ResourceUnit>, TaskError>;

    async fn metrics(&self) -> Result<ClusterMetrics, TaskError>;
}

pub struct Tasker {
    client: ClusterClient,
}

impl Tasker {
    pub fn new(client: ClusterClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ClusterClient {
        &self.client
    }
}

#[async_trait]
impl TaskBackend for Tasker {
    async fn create_tasks(
        &self,
        task_id: &str,
        images: &[String],
    ) -> Result<Option<String>, TaskError> {
        let group = ManifestGroup::expand(task_id, images, ServiceManifest::workload)?;
        info!(%task_id, services = group.services.len(), "Deploying task");
        Ok(self.client.deploy(&group).await?)
    }

    async fn create_jobs(
        &self,
        task_id: &str,
        schedule: Option<&str>,
        images: &[String],
    ) -> Result<(), TaskError> {
        let group = ManifestGroup::expand(task_id, images, ServiceManifest::job)?;
        match schedule {
            Some(schedule) => {
                info!(%task_id, %schedule, "Scheduling job");
                self.client
                    .run_scheduled_job(&group.with_schedule(schedule))
                    .await?
            }
            None => {
                info!(%task_id, "Running job");
                self.client.run_job(&group).await?
            }
        }
        Ok(())
    }

    async fn update_task(
        &self,
        task_id: &str,
        images: &[String],
        replicas: u32,
        ports: PortMapping,
    ) -> Result<Option<String>, TaskError> {
        let group = ManifestGroup::expand(task_id, images, |name, image| {
            let mut manifest = ServiceManifest::workload(name, image);
            manifest.replica_count = replicas;
            manifest.expose = vec![ServiceExpose::web(ports.internal, ports.external)];
            manifest
        })?;
        info!(%task_id, replicas, "Updating task");
        Ok(self.client.deploy(&group).await?)
    }

    async fn cancel_task(&self, task_id: &str) -> Result<(), TaskError> {
        self.client.teardown_task(task_id, &WORKLOAD_KINDS).await?;
        Ok(())
    }

    async fn cancel_job(&self, task_id: &str, scheduled: bool) -> Result<(), TaskError> {
        let kind = if scheduled {
            ResourceKind::ScheduledJob
        } else {
            ResourceKind::BatchJob
        };
        self.client.teardown_task(task_id, &[kind]).await?;
        Ok(())
    }

    async fn list_tasks(&self) -> Result<(Vec<String>, Vec<String>), TaskError> {
        let (names, rendered) = self.client.list_workloads().await?;
        if names.is_empty() {
            return Err(TaskError::NoDeployment);
        }
        Ok((names, rendered))
    }

    async fn task_status(&self, task_id: &str) -> Result<WorkloadStatus, TaskError> {
        Ok(self.client.workload_status(task_id).await?)
    }

    async fn inventory(&self) -> Result<Vec<NodeCapacity>, TaskError> {
        Ok(self.client.inventory().await?)
    }

    async fn metering(&self) -> Result<BTreeMap<String, ResourceUnit>, TaskError> {
        Ok(self.client.metering().await?)
    }

    async fn metrics(&self) -> Result<ClusterMetrics, TaskError> {
        Ok(self.client.metrics().await?)
    }
}
