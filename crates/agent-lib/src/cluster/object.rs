//! Tagged union over the object kinds the agent manages

use crate::error::ClusterError;
use crate::models::ResourceKind;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{Namespace, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub enum KubeObject {
    Namespace(Namespace),
    Workload(Deployment),
    NetworkService(Service),
    Route(Ingress),
    BatchJob(Job),
    ScheduledJob(CronJob),
}

macro_rules! kube_object_conversions {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for KubeObject {
                fn from(object: $ty) -> Self {
                    KubeObject::$variant(object)
                }
            }

            impl TryFrom<KubeObject> for $ty {
                type Error = ClusterError;

                fn try_from(object: KubeObject) -> Result<Self, Self::Error> {
                    match object {
                        KubeObject::$variant(inner) => Ok(inner),
                        other => Err(ClusterError::KindMismatch {
                            expected: ResourceKind::$variant,
                            found: other.kind(),
                        }),
                    }
                }
            }
        )*
    };
}

kube_object_conversions! {
    Namespace => Namespace,
    Workload => Deployment,
    NetworkService => Service,
    Route => Ingress,
    BatchJob => Job,
    ScheduledJob => CronJob,
}

impl KubeObject {
    pub fn kind(&self) -> ResourceKind {
        match self {
            KubeObject::Namespace(_) => ResourceKind::Namespace,
            KubeObject::Workload(_) => ResourceKind::Workload,
            KubeObject::NetworkService(_) => ResourceKind::NetworkService,
            KubeObject::Route(_) => ResourceKind::Route,
            KubeObject::BatchJob(_) => ResourceKind::BatchJob,
            KubeObject::ScheduledJob(_) => ResourceKind::ScheduledJob,
        }
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            KubeObject::Namespace(o) => o.meta(),
            KubeObject::Workload(o) => o.meta(),
            KubeObject::NetworkService(o) => o.meta(),
            KubeObject::Route(o) => o.meta(),
            KubeObject::BatchJob(o) => o.meta(),
            KubeObject::ScheduledJob(o) => o.meta(),
        }
    }

    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            KubeObject::Namespace(o) => o.meta_mut(),
            KubeObject::Workload(o) => o.meta_mut(),
            KubeObject::NetworkService(o) => o.meta_mut(),
            KubeObject::Route(o) => o.meta_mut(),
            KubeObject::BatchJob(o) => o.meta_mut(),
            KubeObject::ScheduledJob(o) => o.meta_mut(),
        }
    }

    pub fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        self.meta().labels.clone().unwrap_or_default()
    }

    /// Drop fields the server owns so the object can be submitted again
    pub fn into_submittable(mut self) -> Self {
        let meta = self.meta_mut();
        meta.resource_version = None;
        meta.uid = None;
        meta.creation_timestamp = None;
        meta.deletion_timestamp = None;
        meta.generation = None;
        meta.managed_fields = None;
        self
    }

    /// Keep the server's version token, for optimistic replace
    pub fn with_resource_version(mut self, version: Option<String>) -> Self {
        self.meta_mut().resource_version = version;
        self
    }
}
