//! Removal of a task's objects that no longer belong to its manifest group

use super::plane::ControlPlane;
use super::selector::{LabelSelector, SERVICE_LABEL, TASK_LABEL};
use crate::error::ClusterError;
use crate::models::{ManifestGroup, ResourceKind};
use tracing::{debug, info};

/// Kinds the API server can delete in bulk
const BULK_KINDS: [ResourceKind; 4] = [
    ResourceKind::Workload,
    ResourceKind::Route,
    ResourceKind::ScheduledJob,
    ResourceKind::BatchJob,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleCleanup {
    task_id: String,
    keep: Vec<String>,
}

impl StaleCleanup {
    pub fn for_group(group: &ManifestGroup) -> Self {
        Self {
            task_id: group.task_id.clone(),
            keep: group.service_names(),
        }
    }

    /// Owned objects of this task whose service is not kept
    pub fn selector(&self) -> LabelSelector {
        LabelSelector::owned()
            .equals(TASK_LABEL, self.task_id.clone())
            .not_in(SERVICE_LABEL, self.keep.iter().cloned())
    }

    pub async fn run(&self, plane: &dyn ControlPlane, namespace: &str) -> Result<(), ClusterError> {
        let selector = self.selector().to_string();
        debug!(task_id = %self.task_id, %selector, "Removing stale resources");

        for kind in BULK_KINDS {
            plane.delete_collection(kind, namespace, &selector).await?;
        }

        // Network services have no collection delete
        let services = plane
            .list(ResourceKind::NetworkService, namespace, &selector)
            .await?;
        for service in &services {
            match plane
                .delete(ResourceKind::NetworkService, namespace, service.name())
                .await
            {
                Err(e) if e.is_not_found() => {}
                other => other?,
            }
        }
        if !services.is_empty() {
            info!(
                task_id = %self.task_id,
                count = services.len(),
                "Removed stale network services"
            );
        }
        Ok(())
    }
}

/// Delete every owned object of `kinds` that belongs to `task_id`.
/// Missing objects are not an error.
pub async fn remove_task(
    plane: &dyn ControlPlane,
    namespace: &str,
    task_id: &str,
    kinds: &[ResourceKind],
) -> Result<(), ClusterError> {
    let selector = LabelSelector::owned().equals(TASK_LABEL, task_id).to_string();
    for &kind in kinds {
        match kind {
            ResourceKind::Namespace => {}
            ResourceKind::NetworkService => {
                for object in plane.list(kind, namespace, &selector).await? {
                    match plane.delete(kind, namespace, object.name()).await {
                        Err(e) if e.is_not_found() => {}
                        other => other?,
                    }
                }
            }
            _ => plane.delete_collection(kind, namespace, &selector).await?,
        }
    }
    info!(%task_id, ?kinds, "Removed task resources");
    Ok(())
}
