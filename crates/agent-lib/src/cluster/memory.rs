//! In-memory control plane used by tests

use super::object::KubeObject;
use super::plane::{ControlPlane, NodeUsage};
use super::selector::LabelSelector;
use crate::error::ClusterError;
use crate::models::ResourceKind;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Get,
    Create,
    Replace,
    Delete,
    List,
    DeleteCollection,
}

type Key = (ResourceKind, String, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, KubeObject>,
    next_version: u64,
    failures: Vec<(Op, ResourceKind)>,
    log: Vec<String>,
    nodes: Vec<Node>,
    usage: Vec<NodeUsage>,
    pods: Vec<(String, Pod)>,
    unreachable: bool,
}

/// Stores objects in a map and mimics the API server's version checks
#[derive(Default)]
pub struct MemoryControlPlane {
    state: Mutex<State>,
}

fn key(kind: ResourceKind, namespace: &str, name: &str) -> Key {
    let namespace = if kind == ResourceKind::Namespace {
        ""
    } else {
        namespace
    };
    (kind, namespace.to_string(), name.to_string())
}

impl MemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Seed an object without going through `create`
    pub fn insert(&self, namespace: &str, mut object: KubeObject) {
        let mut state = self.state();
        state.next_version += 1;
        object.meta_mut().resource_version = Some(state.next_version.to_string());
        let k = key(object.kind(), namespace, object.name());
        state.objects.insert(k, object);
    }

    /// Every call of `op` on `kind` fails until cleared
    pub fn fail_on(&self, op: Op, kind: ResourceKind) {
        self.state().failures.push((op, kind));
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Make every call fail as if the API server were down
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    pub fn set_nodes(&self, nodes: Vec<Node>, usage: Vec<NodeUsage>) {
        let mut state = self.state();
        state.nodes = nodes;
        state.usage = usage;
    }

    pub fn add_pod(&self, namespace: &str, pod: Pod) {
        self.state().pods.push((namespace.to_string(), pod));
    }

    pub fn object(&self, kind: ResourceKind, namespace: &str, name: &str) -> Option<KubeObject> {
        self.state().objects.get(&key(kind, namespace, name)).cloned()
    }

    /// All stored objects, ordered by kind, namespace and name
    pub fn snapshot(&self) -> Vec<KubeObject> {
        self.state().objects.values().cloned().collect()
    }

    /// Names of stored objects of one kind
    pub fn names(&self, kind: ResourceKind) -> Vec<String> {
        self.state()
            .objects
            .keys()
            .filter(|(k, _, _)| *k == kind)
            .map(|(_, _, name)| name.clone())
            .collect()
    }

    /// Mutating calls in order, e.g. `"create workload web"`
    pub fn log(&self) -> Vec<String> {
        self.state().log.clone()
    }

    pub fn clear_log(&self) {
        self.state().log.clear();
    }

    fn check(&self, op: Op, kind: ResourceKind) -> Result<(), ClusterError> {
        let state = self.state();
        if state.unreachable {
            return Err(ClusterError::Connectivity("connection refused".to_string()));
        }
        if state.failures.contains(&(op, kind)) {
            return Err(ClusterError::Connectivity(format!("injected {:?} failure", op)));
        }
        Ok(())
    }

    fn record(&self, entry: String) {
        self.state().log.push(entry);
    }
}

#[async_trait]
impl ControlPlane for MemoryControlPlane {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<KubeObject>, ClusterError> {
        self.check(Op::Get, kind)?;
        Ok(self.object(kind, namespace, name))
    }

    async fn create(&self, namespace: &str, mut object: KubeObject) -> Result<KubeObject, ClusterError> {
        let kind = object.kind();
        self.check(Op::Create, kind)?;
        let name = object.name().to_string();

        let mut state = self.state();
        let k = key(kind, namespace, &name);
        if state.objects.contains_key(&k) {
            return Err(ClusterError::Conflict {
                kind,
                name,
                message: "already exists".to_string(),
            });
        }
        state.next_version += 1;
        let version = state.next_version;
        let meta = object.meta_mut();
        meta.resource_version = Some(version.to_string());
        meta.uid = Some(format!("uid-{}", version));
        state.objects.insert(k, object.clone());
        state.log.push(format!("create {} {}", kind, name));
        Ok(object)
    }

    async fn replace(
        &self,
        namespace: &str,
        mut object: KubeObject,
    ) -> Result<KubeObject, ClusterError> {
        let kind = object.kind();
        self.check(Op::Replace, kind)?;
        let name = object.name().to_string();

        let mut state = self.state();
        let k = key(kind, namespace, &name);
        let stored_version = match state.objects.get(&k) {
            Some(stored) => stored.meta().resource_version.clone(),
            None => return Err(ClusterError::NotFound { kind, name }),
        };
        if let Some(submitted) = &object.meta().resource_version {
            if Some(submitted) != stored_version.as_ref() {
                return Err(ClusterError::Conflict {
                    kind,
                    name,
                    message: "the object has been modified".to_string(),
                });
            }
        }
        state.next_version += 1;
        object.meta_mut().resource_version = Some(state.next_version.to_string());
        state.objects.insert(k, object.clone());
        state.log.push(format!("replace {} {}", kind, name));
        Ok(object)
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), ClusterError> {
        self.check(Op::Delete, kind)?;
        let removed = self.state().objects.remove(&key(kind, namespace, name));
        match removed {
            Some(_) => {
                self.record(format!("delete {} {}", kind, name));
                Ok(())
            }
            None => Err(ClusterError::NotFound {
                kind,
                name: name.to_string(),
            }),
        }
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<KubeObject>, ClusterError> {
        self.check(Op::List, kind)?;
        let selector = LabelSelector::parse(selector)?;
        let ns = key(kind, namespace, "").1;
        Ok(self
            .state()
            .objects
            .iter()
            .filter(|((k, n, _), o)| *k == kind && *n == ns && selector.matches(&o.labels()))
            .map(|(_, o)| o.clone())
            .collect())
    }

    async fn delete_collection(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &str,
    ) -> Result<(), ClusterError> {
        if matches!(kind, ResourceKind::Namespace | ResourceKind::NetworkService) {
            return Err(ClusterError::Unsupported {
                kind,
                operation: "bulk delete",
            });
        }
        self.check(Op::DeleteCollection, kind)?;
        let parsed = LabelSelector::parse(selector)?;

        let mut state = self.state();
        let doomed: Vec<Key> = state
            .objects
            .iter()
            .filter(|((k, n, _), o)| *k == kind && n == namespace && parsed.matches(&o.labels()))
            .map(|(k, _)| k.clone())
            .collect();
        for k in doomed {
            state.objects.remove(&k);
            state.log.push(format!("delete {} {}", kind, k.2));
        }
        Ok(())
    }

    async fn nodes(&self) -> Result<Vec<Node>, ClusterError> {
        self.check(Op::List, ResourceKind::Namespace)?;
        Ok(self.state().nodes.clone())
    }

    async fn node_usage(&self) -> Result<Vec<NodeUsage>, ClusterError> {
        self.check(Op::List, ResourceKind::Namespace)?;
        Ok(self.state().usage.clone())
    }

    async fn pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, ClusterError> {
        self.check(Op::List, ResourceKind::Workload)?;
        let selector = LabelSelector::parse(selector)?;
        Ok(self
            .state()
            .pods
            .iter()
            .filter(|(ns, pod)| {
                ns == namespace
                    && selector.matches(&pod.metadata.labels.clone().unwrap_or_default())
            })
            .map(|(_, pod)| pod.clone())
            .collect())
    }
}
