//! Cluster reconciliation
//!
//! Translates manifest groups into Kubernetes objects and converges the
//! cluster toward them:
//! - `builder`: pure manifest -> object translation
//! - `reconciler`: ordered apply with compensating rollback
//! - `cleanup`: removal of a task's stale objects
//! - `metering`: usage integration and capacity accounting
//! - `plane`: the control plane seam and its kube-rs implementation

pub mod builder;
pub mod cleanup;
pub mod client;
pub mod metering;
pub mod object;
pub mod plane;
pub mod quantity;
pub mod reconciler;
pub mod selector;

#[cfg(test)]
pub(crate) mod memory;

pub use builder::{Builder, Resource};
pub use client::{ClusterClient, ClusterSettings};
pub use object::KubeObject;
pub use plane::{ControlPlane, KubeControlPlane, NodeUsage};
pub use reconciler::{Plan, Reconciler};
pub use selector::{LabelSelector, MANAGED_LABEL, SERVICE_LABEL, TASK_LABEL};
