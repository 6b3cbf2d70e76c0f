//! Control plane access
//!
//! [`ControlPlane`] is the seam between reconcile logic and the cluster API.
//! [`KubeControlPlane`] talks to a real API server through kube-rs.

use super::object::KubeObject;
use super::quantity;
use crate::error::ClusterError;
use crate::models::ResourceKind;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{Namespace, Node, Pod, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Point-in-time usage reported by the metrics API for one node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeUsage {
    pub name: String,
    pub cpu_milli: u64,
    pub memory_bytes: u64,
}

/// Operations the agent needs from the cluster.
///
/// Namespaced calls ignore `namespace` for [`ResourceKind::Namespace`].
/// Selectors use the Kubernetes string syntax.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<KubeObject>, ClusterError>;

    async fn create(&self, namespace: &str, object: KubeObject) -> Result<KubeObject, ClusterError>;

    /// Replace an object; a stale resource version yields `Conflict`
    async fn replace(&self, namespace: &str, object: KubeObject)
        -> Result<KubeObject, ClusterError>;

    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str)
        -> Result<(), ClusterError>;

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<KubeObject>, ClusterError>;

    /// Bulk delete; unsupported for namespaces and network services
    async fn delete_collection(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &str,
    ) -> Result<(), ClusterError>;

    async fn nodes(&self) -> Result<Vec<Node>, ClusterError>;

    async fn node_usage(&self) -> Result<Vec<NodeUsage>, ClusterError>;

    async fn pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, ClusterError>;
}

/// Resolve a client: explicit kubeconfig, then `~/.kube/config`, then in-cluster
pub async fn connect(kubeconfig: Option<&Path>) -> Result<Client, ClusterError> {
    let home_config = std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".kube").join("config"));

    let path = kubeconfig
        .map(Path::to_path_buf)
        .filter(|p| p.exists())
        .or_else(|| home_config.filter(|p| p.exists()));

    let config = match path {
        Some(path) => {
            info!(path = %path.display(), "Loading kubeconfig");
            let kubeconfig =
                Kubeconfig::read_from(&path).map_err(|e| ClusterError::Config(e.to_string()))?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| ClusterError::Config(e.to_string()))?
        }
        None => {
            info!("No kubeconfig found, using in-cluster configuration");
            Config::incluster().map_err(|e| ClusterError::Config(e.to_string()))?
        }
    };

    Client::try_from(config).map_err(|e| ClusterError::Config(e.to_string()))
}

/// [`ControlPlane`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeControlPlane {
    client: Client,
}

impl KubeControlPlane {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn namespaces(&self) -> Api<Namespace> {
        Api::all(self.client.clone())
    }
}

async fn fetch<K>(api: &Api<K>, kind: ResourceKind, name: &str) -> Result<Option<K>, ClusterError>
where
    K: Clone + DeserializeOwned + Debug,
{
    api.get_opt(name)
        .await
        .map_err(|e| ClusterError::from_kube(e, kind, name))
}

async fn create_in<K>(api: &Api<K>, kind: ResourceKind, object: K) -> Result<K, ClusterError>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    let name = object.meta().name.clone().unwrap_or_default();
    api.create(&PostParams::default(), &object)
        .await
        .map_err(|e| ClusterError::from_kube(e, kind, &name))
}

async fn replace_in<K>(api: &Api<K>, kind: ResourceKind, object: K) -> Result<K, ClusterError>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    let name = object.meta().name.clone().unwrap_or_default();
    api.replace(&name, &PostParams::default(), &object)
        .await
        .map_err(|e| ClusterError::from_kube(e, kind, &name))
}

async fn delete_in<K>(api: &Api<K>, kind: ResourceKind, name: &str) -> Result<(), ClusterError>
where
    K: Clone + DeserializeOwned + Debug,
{
    api.delete(name, &DeleteParams::background())
        .await
        .map(|_| ())
        .map_err(|e| ClusterError::from_kube(e, kind, name))
}

async fn list_in<K>(api: &Api<K>, kind: ResourceKind, selector: &str) -> Result<Vec<K>, ClusterError>
where
    K: Clone + DeserializeOwned + Debug,
{
    api.list(&ListParams::default().labels(selector))
        .await
        .map(|list| list.items)
        .map_err(|e| ClusterError::from_kube(e, kind, selector))
}

async fn delete_collection_in<K>(
    api: &Api<K>,
    kind: ResourceKind,
    selector: &str,
) -> Result<(), ClusterError>
where
    K: Clone + DeserializeOwned + Debug,
{
    api.delete_collection(&DeleteParams::background(), &ListParams::default().labels(selector))
        .await
        .map(|_| ())
        .map_err(|e| ClusterError::from_kube(e, kind, selector))
}

fn wrap<K: Into<KubeObject>>(items: Vec<K>) -> Vec<KubeObject> {
    items.into_iter().map(Into::into).collect()
}

#[async_trait]
impl ControlPlane for KubeControlPlane {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<KubeObject>, ClusterError> {
        debug!(%kind, %namespace, %name, "Fetching object");
        let object: Option<KubeObject> = match kind {
            ResourceKind::Namespace => fetch(&self.namespaces(), kind, name).await?.map(Into::into),
            ResourceKind::Workload => fetch(&self.namespaced::<Deployment>(namespace), kind, name)
                .await?
                .map(Into::into),
            ResourceKind::NetworkService => {
                fetch(&self.namespaced::<Service>(namespace), kind, name)
                    .await?
                    .map(Into::into)
            }
            ResourceKind::Route => fetch(&self.namespaced::<Ingress>(namespace), kind, name)
                .await?
                .map(Into::into),
            ResourceKind::BatchJob => fetch(&self.namespaced::<Job>(namespace), kind, name)
                .await?
                .map(Into::into),
            ResourceKind::ScheduledJob => fetch(&self.namespaced::<CronJob>(namespace), kind, name)
                .await?
                .map(Into::into),
        };
        Ok(object)
    }

    async fn create(&self, namespace: &str, object: KubeObject) -> Result<KubeObject, ClusterError> {
        let kind = object.kind();
        let created: KubeObject = match object {
            KubeObject::Namespace(o) => create_in(&self.namespaces(), kind, o).await?.into(),
            KubeObject::Workload(o) => create_in(&self.namespaced(namespace), kind, o).await?.into(),
            KubeObject::NetworkService(o) => {
                create_in(&self.namespaced(namespace), kind, o).await?.into()
            }
            KubeObject::Route(o) => create_in(&self.namespaced(namespace), kind, o).await?.into(),
            KubeObject::BatchJob(o) => create_in(&self.namespaced(namespace), kind, o).await?.into(),
            KubeObject::ScheduledJob(o) => {
                create_in(&self.namespaced(namespace), kind, o).await?.into()
            }
        };
        Ok(created)
    }

    async fn replace(
        &self,
        namespace: &str,
        object: KubeObject,
    ) -> Result<KubeObject, ClusterError> {
        let kind = object.kind();
        let replaced: KubeObject = match object {
            KubeObject::Namespace(o) => replace_in(&self.namespaces(), kind, o).await?.into(),
            KubeObject::Workload(o) => replace_in(&self.namespaced(namespace), kind, o).await?.into(),
            KubeObject::NetworkService(o) => {
                replace_in(&self.namespaced(namespace), kind, o).await?.into()
            }
            KubeObject::Route(o) => replace_in(&self.namespaced(namespace), kind, o).await?.into(),
            KubeObject::BatchJob(o) => replace_in(&self.namespaced(namespace), kind, o).await?.into(),
            KubeObject::ScheduledJob(o) => {
                replace_in(&self.namespaced(namespace), kind, o).await?.into()
            }
        };
        Ok(replaced)
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), ClusterError> {
        match kind {
            ResourceKind::Namespace => delete_in(&self.namespaces(), kind, name).await,
            ResourceKind::Workload => {
                delete_in(&self.namespaced::<Deployment>(namespace), kind, name).await
            }
            ResourceKind::NetworkService => {
                delete_in(&self.namespaced::<Service>(namespace), kind, name).await
            }
            ResourceKind::Route => delete_in(&self.namespaced::<Ingress>(namespace), kind, name).await,
            ResourceKind::BatchJob => delete_in(&self.namespaced::<Job>(namespace), kind, name).await,
            ResourceKind::ScheduledJob => {
                delete_in(&self.namespaced::<CronJob>(namespace), kind, name).await
            }
        }
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<KubeObject>, ClusterError> {
        let items = match kind {
            ResourceKind::Namespace => wrap(list_in(&self.namespaces(), kind, selector).await?),
            ResourceKind::Workload => wrap(
                list_in(&self.namespaced::<Deployment>(namespace), kind, selector).await?,
            ),
            ResourceKind::NetworkService => {
                wrap(list_in(&self.namespaced::<Service>(namespace), kind, selector).await?)
            }
            ResourceKind::Route => {
                wrap(list_in(&self.namespaced::<Ingress>(namespace), kind, selector).await?)
            }
            ResourceKind::BatchJob => {
                wrap(list_in(&self.namespaced::<Job>(namespace), kind, selector).await?)
            }
            ResourceKind::ScheduledJob => {
                wrap(list_in(&self.namespaced::<CronJob>(namespace), kind, selector).await?)
            }
        };
        Ok(items)
    }

    async fn delete_collection(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &str,
    ) -> Result<(), ClusterError> {
        match kind {
            ResourceKind::Namespace | ResourceKind::NetworkService => {
                Err(ClusterError::Unsupported {
                    kind,
                    operation: "bulk delete",
                })
            }
            ResourceKind::Workload => {
                delete_collection_in(&self.namespaced::<Deployment>(namespace), kind, selector).await
            }
            ResourceKind::Route => {
                delete_collection_in(&self.namespaced::<Ingress>(namespace), kind, selector).await
            }
            ResourceKind::BatchJob => {
                delete_collection_in(&self.namespaced::<Job>(namespace), kind, selector).await
            }
            ResourceKind::ScheduledJob => {
                delete_collection_in(&self.namespaced::<CronJob>(namespace), kind, selector).await
            }
        }
    }

    async fn nodes(&self) -> Result<Vec<Node>, ClusterError> {
        let api: Api<Node> = Api::all(self.client.clone());
        api.list(&ListParams::default())
            .await
            .map(|list| list.items)
            .map_err(|e| ClusterError::Connectivity(e.to_string()))
    }

    async fn node_usage(&self) -> Result<Vec<NodeUsage>, ClusterError> {
        let gvk = GroupVersionKind::gvk("metrics.k8s.io", "v1beta1", "NodeMetrics");
        let resource = ApiResource::from_gvk_with_plural(&gvk, "nodes");
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &resource);

        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| ClusterError::Connectivity(e.to_string()))?;

        Ok(list.items.iter().map(node_usage_from).collect())
    }

    async fn pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.list(&ListParams::default().labels(selector))
            .await
            .map(|list| list.items)
            .map_err(|e| ClusterError::Connectivity(e.to_string()))
    }
}

fn node_usage_from(object: &DynamicObject) -> NodeUsage {
    let usage = object.data.get("usage");
    let read = |key: &str| {
        usage
            .and_then(|u| u.get(key))
            .and_then(|v| v.as_str())
            .map(|s| k8s_openapi::apimachinery::pkg::api::resource::Quantity(s.to_string()))
    };

    NodeUsage {
        name: object.metadata.name.clone().unwrap_or_default(),
        cpu_milli: read("cpu").and_then(|q| quantity::milli_value(&q)).unwrap_or(0),
        memory_bytes: read("memory").and_then(|q| quantity::value(&q)).unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_node_usage_from_metrics_object() {
        let object: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "metrics.k8s.io/v1beta1",
            "kind": "NodeMetrics",
            "metadata": { "name": "node-a" },
            "timestamp": "2024-01-01T00:00:00Z",
            "window": "30s",
            "usage": { "cpu": "250m", "memory": "1Gi" }
        }))
        .unwrap();

        let usage = node_usage_from(&object);
        assert_eq!(usage.name, "node-a");
        assert_eq!(usage.cpu_milli, 250);
        assert_eq!(usage.memory_bytes, 1 << 30);
    }

    #[test]
    fn test_node_usage_tolerates_missing_fields() {
        let object: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "metrics.k8s.io/v1beta1",
            "kind": "NodeMetrics",
            "metadata": { "name": "node-b" }
        }))
        .unwrap();

        assert_eq!(
            node_usage_from(&object),
            NodeUsage {
                name: "node-b".to_string(),
                ..Default::default()
            }
        );
    }
}
