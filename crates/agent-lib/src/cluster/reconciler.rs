//! Transactional reconciliation with compensating rollback
//!
//! Each applied step pushes an undo action. When a later step fails the
//! undo actions run newest first, so a failed run leaves the cluster as it
//! was observed before the run.

use super::builder::{NamespaceBuilder, Resource};
use super::cleanup::StaleCleanup;
use super::object::KubeObject;
use super::plane::ControlPlane;
use crate::error::{ClusterError, ReconcileError};
use crate::models::ResourceKind;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info, warn};

type UndoFuture = Pin<Box<dyn Future<Output = Result<(), ClusterError>> + Send>>;

/// One deferred undo action
struct Compensation {
    description: String,
    action: Box<dyn FnOnce() -> UndoFuture + Send>,
}

/// Undo actions of a run, in the order they were recorded
#[derive(Default)]
struct CompensationStack {
    entries: Vec<Compensation>,
}

impl CompensationStack {
    fn push(&mut self, compensation: Compensation) {
        self.entries.push(compensation);
    }

    /// Run every action newest first, collecting failures instead of stopping
    async fn unwind(self) -> Result<(), String> {
        let mut failures = Vec::new();
        for compensation in self.entries.into_iter().rev() {
            debug!(step = %compensation.description, "Rolling back");
            if let Err(e) = (compensation.action)().await {
                warn!(step = %compensation.description, error = %e, "Rollback step failed");
                failures.push(format!("{}: {}", compensation.description, e));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures.join("; "))
        }
    }
}

/// Ordered work for one reconcile run: namespace, cleanup, then resources
#[derive(Default)]
pub struct Plan {
    namespace: Option<NamespaceBuilder>,
    cleanup: Option<StaleCleanup>,
    resources: Vec<Resource>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure_namespace(mut self, namespace: NamespaceBuilder) -> Self {
        self.namespace = Some(namespace);
        self
    }

    pub fn cleanup(mut self, cleanup: StaleCleanup) -> Self {
        self.cleanup = Some(cleanup);
        self
    }

    pub fn resource(mut self, resource: Resource) -> Self {
        self.resources.push(resource);
        self
    }

    pub fn resources(mut self, resources: impl IntoIterator<Item = Resource>) -> Self {
        self.resources.extend(resources);
        self
    }
}

pub struct Reconciler {
    plane: Arc<dyn ControlPlane>,
    namespace: String,
}

impl Reconciler {
    pub fn new(plane: Arc<dyn ControlPlane>, namespace: impl Into<String>) -> Self {
        Self {
            plane,
            namespace: namespace.into(),
        }
    }

    /// Apply resources in order, all or nothing
    pub async fn apply(&self, resources: Vec<Resource>) -> Result<(), ReconcileError> {
        self.execute(Plan::new().resources(resources)).await
    }

    pub async fn execute(&self, plan: Plan) -> Result<(), ReconcileError> {
        let mut stack = CompensationStack::default();

        if let Some(namespace) = plan.namespace {
            let resource = Resource::Namespace(namespace);
            if let Err(e) = self.step(&resource, &mut stack).await {
                return Err(fail(stack, context(&resource), e).await);
            }
        }

        // Cleanup deletes are not compensated; stale objects stay deleted
        if let Some(cleanup) = plan.cleanup {
            if let Err(e) = cleanup.run(self.plane.as_ref(), &self.namespace).await {
                return Err(fail(stack, "cleaning stale resources".to_string(), e).await);
            }
        }

        for resource in &plan.resources {
            if let Err(e) = self.step(resource, &mut stack).await {
                return Err(fail(stack, context(resource), e).await);
            }
        }

        info!(
            namespace = %self.namespace,
            steps = stack.entries.len(),
            "Reconcile complete"
        );
        Ok(())
    }

    /// Converge one resource, recording how to undo what was done
    async fn step(
        &self,
        resource: &Resource,
        stack: &mut CompensationStack,
    ) -> Result<(), ClusterError> {
        let kind = resource.kind();
        let name = resource.name();
        let observed = self.plane.get(kind, &self.namespace, &name).await?;

        match (observed, resource.is_removal()) {
            (None, true) => {
                debug!(%kind, %name, "Already absent");
            }
            (None, false) => {
                self.plane.create(&self.namespace, resource.desired()).await?;
                debug!(%kind, %name, "Created");
                stack.push(self.undo_create(kind, name));
            }
            (Some(previous), true) => {
                self.plane.delete(kind, &self.namespace, &name).await?;
                debug!(%kind, %name, "Deleted");
                stack.push(self.undo_delete(previous));
            }
            (Some(previous), false) => {
                let merged = resource.merge(previous.clone())?;
                self.plane.replace(&self.namespace, merged).await?;
                debug!(%kind, %name, "Replaced");
                stack.push(self.undo_replace(previous));
            }
        }
        Ok(())
    }

    fn undo_create(&self, kind: ResourceKind, name: String) -> Compensation {
        let plane = Arc::clone(&self.plane);
        let namespace = self.namespace.clone();
        Compensation {
            description: format!("delete {} {:?}", kind, name),
            action: Box::new(move || {
                Box::pin(async move {
                    match plane.delete(kind, &namespace, &name).await {
                        Err(e) if e.is_not_found() => Ok(()),
                        other => other,
                    }
                })
            }),
        }
    }

    fn undo_delete(&self, previous: KubeObject) -> Compensation {
        let plane = Arc::clone(&self.plane);
        let namespace = self.namespace.clone();
        Compensation {
            description: format!("recreate {} {:?}", previous.kind(), previous.name()),
            action: Box::new(move || {
                Box::pin(async move {
                    plane
                        .create(&namespace, previous.into_submittable())
                        .await
                        .map(|_| ())
                })
            }),
        }
    }

    /// Restore the pre-run snapshot on top of whatever version is current
    fn undo_replace(&self, previous: KubeObject) -> Compensation {
        let plane = Arc::clone(&self.plane);
        let namespace = self.namespace.clone();
        Compensation {
            description: format!("restore {} {:?}", previous.kind(), previous.name()),
            action: Box::new(move || {
                Box::pin(async move {
                    plane
                        .replace(&namespace, previous.with_resource_version(None))
                        .await
                        .map(|_| ())
                })
            }),
        }
    }
}

fn context(resource: &Resource) -> String {
    format!("applying {} {:?}", resource.kind(), resource.name())
}

async fn fail(stack: CompensationStack, context: String, source: ClusterError) -> ReconcileError {
    warn!(context = %context, error = %source, "Reconcile failed, rolling back");
    match stack.unwind().await {
        Ok(()) => ReconcileError::RolledBack { context, source },
        Err(detail) => ReconcileError::RollbackFailed {
            context,
            source,
            detail,
        },
    }
}
