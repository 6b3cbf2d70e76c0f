//! High-level cluster operations for one namespace

use super::builder::{
    generated_hosts, BatchJobBuilder, ContainerSpec, NamespaceBuilder, NetworkServiceBuilder,
    Resource, RouteBuilder, ScheduledJobBuilder, WorkloadBuilder,
};
use super::cleanup::{remove_task, StaleCleanup};
use super::metering;
use super::plane::{self, ControlPlane, KubeControlPlane};
use super::reconciler::{Plan, Reconciler};
use super::selector::LabelSelector;
use crate::error::{ClusterError, ReconcileError, ValidationError};
use crate::models::{
    ClusterMetrics, ManifestGroup, NodeCapacity, ResourceKind, ResourceUnit, WorkloadStatus,
};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Where the cluster lives and how exposed services are named
#[derive(Debug, Clone)]
pub struct ClusterSettings {
    pub namespace: String,
    pub ingress_host: String,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            ingress_host: "localhost".to_string(),
        }
    }
}

pub struct ClusterClient {
    plane: Arc<dyn ControlPlane>,
    settings: ClusterSettings,
    /// Selector for every object the agent owns
    owned: String,
}

impl ClusterClient {
    /// Connect through kube-rs and prepare the namespace
    pub async fn connect(
        kubeconfig: Option<&Path>,
        settings: ClusterSettings,
    ) -> Result<Self, ClusterError> {
        let client = plane::connect(kubeconfig).await?;
        Self::new(Arc::new(KubeControlPlane::new(client)), settings).await
    }

    /// Fails when the namespace can be neither read nor created
    pub async fn new(
        plane: Arc<dyn ControlPlane>,
        settings: ClusterSettings,
    ) -> Result<Self, ClusterError> {
        let namespace = &settings.namespace;
        if plane
            .get(ResourceKind::Namespace, namespace, namespace)
            .await?
            .is_none()
        {
            info!(%namespace, "Creating namespace");
            plane
                .create(
                    namespace,
                    Resource::Namespace(NamespaceBuilder::new(namespace.clone())).desired(),
                )
                .await?;
        }

        Ok(Self {
            plane,
            owned: LabelSelector::owned().to_string(),
            settings,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.settings.namespace
    }

    fn reconciler(&self) -> Reconciler {
        Reconciler::new(Arc::clone(&self.plane), self.settings.namespace.clone())
    }

    fn base_plan(&self, group: &ManifestGroup) -> Plan {
        Plan::new()
            .ensure_namespace(NamespaceBuilder::new(self.settings.namespace.clone()))
            .cleanup(StaleCleanup::for_group(group))
    }

    fn specs(group: &ManifestGroup) -> Result<Vec<ContainerSpec>, ReconcileError> {
        group
            .services
            .iter()
            .map(|s| ContainerSpec::new(s.clone()))
            .collect::<Result<_, ValidationError>>()
            .map_err(ReconcileError::from)
    }

    /// Converge workloads, network services and routes for a group.
    ///
    /// Returns the public host of the first routed service.
    pub async fn deploy(&self, group: &ManifestGroup) -> Result<Option<String>, ReconcileError> {
        let specs = Self::specs(group)?;
        let mut plan = self.base_plan(group);
        for spec in specs {
            let manifest = spec.manifest().clone();
            plan = plan
                .resource(Resource::Workload(WorkloadBuilder::new(&group.task_id, spec)))
                .resource(Resource::NetworkService(NetworkServiceBuilder::new(
                    &group.task_id,
                    &manifest,
                )))
                .resource(Resource::Route(RouteBuilder::new(
                    &group.task_id,
                    &manifest,
                    &self.settings.ingress_host,
                    short_token(),
                )));
        }
        self.reconciler().execute(plan).await?;

        Ok(self.public_host(group).await)
    }

    pub async fn run_job(&self, group: &ManifestGroup) -> Result<(), ReconcileError> {
        let specs = Self::specs(group)?;
        let plan = self.base_plan(group).resources(
            specs
                .into_iter()
                .map(|spec| Resource::BatchJob(BatchJobBuilder::new(&group.task_id, spec))),
        );
        self.reconciler().execute(plan).await
    }

    pub async fn run_scheduled_job(&self, group: &ManifestGroup) -> Result<(), ReconcileError> {
        let schedule = group
            .schedule
            .clone()
            .ok_or(ValidationError::MissingSchedule)?;
        let specs = Self::specs(group)?;
        let plan = self.base_plan(group).resources(specs.into_iter().map(|spec| {
            Resource::ScheduledJob(ScheduledJobBuilder::new(
                &group.task_id,
                schedule.clone(),
                spec,
            ))
        }));
        self.reconciler().execute(plan).await
    }

    /// Delete the agent namespace and everything in it
    pub async fn teardown_namespace(&self) -> Result<(), ClusterError> {
        let namespace = &self.settings.namespace;
        match self
            .plane
            .delete(ResourceKind::Namespace, namespace, namespace)
            .await
        {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }

    /// Delete a task's objects of the given kinds
    pub async fn teardown_task(
        &self,
        task_id: &str,
        kinds: &[ResourceKind],
    ) -> Result<(), ClusterError> {
        remove_task(self.plane.as_ref(), self.namespace(), task_id, kinds).await
    }

    /// Names and JSON renderings of every owned workload
    pub async fn list_workloads(&self) -> Result<(Vec<String>, Vec<String>), ClusterError> {
        let objects = self
            .plane
            .list(ResourceKind::Workload, self.namespace(), &self.owned)
            .await?;

        let mut names = Vec::with_capacity(objects.len());
        let mut rendered = Vec::with_capacity(objects.len());
        for object in objects {
            names.push(object.name().to_string());
            let deployment = Deployment::try_from(object)?;
            rendered.push(serde_json::to_string(&deployment)?);
        }
        Ok((names, rendered))
    }

    pub async fn workload_status(&self, name: &str) -> Result<WorkloadStatus, ClusterError> {
        let object = self
            .plane
            .get(ResourceKind::Workload, self.namespace(), name)
            .await?
            .ok_or_else(|| ClusterError::NotFound {
                kind: ResourceKind::Workload,
                name: name.to_string(),
            })?;

        let status = Deployment::try_from(object)?.status.unwrap_or_default();
        Ok(WorkloadStatus {
            observed_generation: status.observed_generation.unwrap_or(0),
            replicas: status.replicas.unwrap_or(0),
            updated_replicas: status.updated_replicas.unwrap_or(0),
            ready_replicas: status.ready_replicas.unwrap_or(0),
            available_replicas: status.available_replicas.unwrap_or(0),
        })
    }

    /// Available capacity of schedulable nodes
    pub async fn inventory(&self) -> Result<Vec<NodeCapacity>, ClusterError> {
        let nodes = self.plane.nodes().await?;
        let usage = match self.plane.node_usage().await {
            Ok(usage) => usage,
            Err(e) => {
                warn!(error = %e, "Node metrics unavailable, reporting allocatable capacity");
                Vec::new()
            }
        };
        Ok(metering::available_capacity(&nodes, &usage))
    }

    /// Resource-seconds consumed by owned pods, keyed by service
    pub async fn metering(&self) -> Result<BTreeMap<String, ResourceUnit>, ClusterError> {
        let pods = self.plane.pods(self.namespace(), &self.owned).await?;
        Ok(metering::integrate_usage(&pods, chrono::Utc::now()))
    }

    pub async fn metrics(&self) -> Result<ClusterMetrics, ClusterError> {
        let nodes = self.plane.nodes().await?;
        let usage = self.plane.node_usage().await.unwrap_or_default();
        let services = self
            .plane
            .list(ResourceKind::NetworkService, self.namespace(), &self.owned)
            .await?
            .into_iter()
            .map(Service::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(metering::cluster_metrics(&nodes, &usage, &services))
    }

    async fn public_host(&self, group: &ManifestGroup) -> Option<String> {
        for name in group.service_names() {
            let route = self
                .plane
                .get(ResourceKind::Route, self.namespace(), &name)
                .await
                .ok()
                .flatten()
                .and_then(|o| Ingress::try_from(o).ok());
            if let Some(route) = route {
                if let Some(host) =
                    generated_hosts(&route, &name, &self.settings.ingress_host).into_iter().next()
                {
                    return Some(host);
                }
            }
        }
        None
    }
}

/// Short random label for generated hosts
fn short_token() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}
