//! Usage integration and capacity accounting
//!
//! Everything here is a pure function over API objects so the numbers can
//! be checked without a cluster.

use super::plane::NodeUsage;
use super::quantity;
use super::selector::SERVICE_LABEL;
use crate::models::{ClusterMetrics, NodeCapacity, ResourceUnit};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Node, Pod, Service};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;

/// Conditions that take a node out of scheduling
const PRESSURE_CONDITIONS: [&str; 4] = [
    "MemoryPressure",
    "DiskPressure",
    "PIDPressure",
    "NetworkUnavailable",
];

fn limit(limits: Option<&BTreeMap<String, Quantity>>, key: &str, milli: bool) -> u64 {
    limits
        .and_then(|l| l.get(key))
        .and_then(|q| {
            if milli {
                quantity::milli_value(q)
            } else {
                quantity::value(q)
            }
        })
        .unwrap_or(0)
}

/// Resource-seconds consumed by running containers, keyed by service.
///
/// Each running container contributes `elapsed_seconds * limit` per
/// dimension, CPU in milli-units. Containers of pods without a service
/// label are keyed by container name.
pub fn integrate_usage(pods: &[Pod], now: DateTime<Utc>) -> BTreeMap<String, ResourceUnit> {
    let mut usage: BTreeMap<String, ResourceUnit> = BTreeMap::new();

    for pod in pods {
        let service = pod
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(SERVICE_LABEL))
            .cloned();
        let statuses = pod
            .status
            .as_ref()
            .and_then(|s| s.container_statuses.as_ref());
        let containers = pod.spec.as_ref().map(|s| s.containers.as_slice()).unwrap_or_default();

        for status in statuses.into_iter().flatten() {
            let started = match status
                .state
                .as_ref()
                .and_then(|s| s.running.as_ref())
                .and_then(|r| r.started_at.as_ref())
            {
                Some(time) => time.0,
                None => continue,
            };
            let elapsed = u64::try_from((now - started).num_seconds()).unwrap_or(0);

            let limits = containers
                .iter()
                .find(|c| c.name == status.name)
                .and_then(|c| c.resources.as_ref())
                .and_then(|r| r.limits.as_ref());

            let consumed = ResourceUnit::new(
                elapsed.saturating_mul(limit(limits, "cpu", true)),
                elapsed.saturating_mul(limit(limits, "memory", false)),
                elapsed.saturating_mul(limit(limits, "ephemeral-storage", false)),
            );
            let key = service.clone().unwrap_or_else(|| status.name.clone());
            let entry = usage.entry(key).or_default();
            *entry = entry.saturating_add(consumed);
        }
    }
    usage
}

/// Ready and free of pressure conditions
pub fn node_is_schedulable(node: &Node) -> bool {
    let conditions = node
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|c| c.as_slice())
        .unwrap_or_default();

    let ready = conditions
        .iter()
        .any(|c| c.type_ == "Ready" && c.status == "True");
    let pressured = conditions
        .iter()
        .any(|c| PRESSURE_CONDITIONS.contains(&c.type_.as_str()) && c.status == "True");
    ready && !pressured
}

fn allocatable(node: &Node) -> ResourceUnit {
    let alloc = node.status.as_ref().and_then(|s| s.allocatable.as_ref());
    ResourceUnit::new(
        limit(alloc, "cpu", true),
        limit(alloc, "memory", false),
        limit(alloc, "ephemeral-storage", false),
    )
}

fn node_name(node: &Node) -> String {
    node.metadata.name.clone().unwrap_or_default()
}

/// Headroom per schedulable node: allocatable minus current usage, clamped at zero
pub fn available_capacity(nodes: &[Node], usage: &[NodeUsage]) -> Vec<NodeCapacity> {
    nodes
        .iter()
        .filter(|n| node_is_schedulable(n))
        .map(|node| {
            let name = node_name(node);
            let total = allocatable(node);
            let used = usage.iter().find(|u| u.name == name);
            let available = ResourceUnit::new(
                total
                    .cpu_milli
                    .saturating_sub(used.map_or(0, |u| u.cpu_milli)),
                total
                    .memory_bytes
                    .saturating_sub(used.map_or(0, |u| u.memory_bytes)),
                total.disk_bytes,
            );
            NodeCapacity { name, available }
        })
        .collect()
}

/// Totals, usage and exposed-port counts for heartbeat metrics
pub fn cluster_metrics(nodes: &[Node], usage: &[NodeUsage], services: &[Service]) -> ClusterMetrics {
    let mut metrics = ClusterMetrics::default();

    for node in nodes {
        metrics.node_total.insert(node_name(node), allocatable(node));
        let images: Vec<String> = node
            .status
            .as_ref()
            .and_then(|s| s.images.as_ref())
            .into_iter()
            .flatten()
            .filter_map(|image| image.names.as_ref()?.first().cloned())
            .collect();
        metrics.node_images.insert(node_name(node), images);
    }
    for u in usage {
        metrics
            .node_in_use
            .insert(u.name.clone(), ResourceUnit::new(u.cpu_milli, u.memory_bytes, 0));
    }
    for service in services {
        let ports = service
            .spec
            .as_ref()
            .and_then(|s| s.ports.as_ref())
            .map(|p| p.as_slice())
            .unwrap_or_default();
        for port in ports {
            *metrics.endpoints.entry(port.port).or_default() += 1;
        }
    }
    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use k8s_openapi::api::core::v1::{
        Container, ContainerState, ContainerStateRunning, ContainerStatus, NodeCondition,
        NodeStatus, PodSpec, PodStatus, ResourceRequirements,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn q(s: &str) -> Quantity {
        Quantity(s.to_string())
    }

    fn running_pod(service: Option<&str>, container: &str, started: DateTime<Utc>) -> Pod {
        let mut pod = Pod::default();
        if let Some(service) = service {
            pod.metadata.labels = Some(BTreeMap::from([(
                SERVICE_LABEL.to_string(),
                service.to_string(),
            )]));
        }
        pod.spec = Some(PodSpec {
            containers: vec![Container {
                name: container.to_string(),
                resources: Some(ResourceRequirements {
                    limits: Some(BTreeMap::from([
                        ("cpu".to_string(), q("100m")),
                        ("memory".to_string(), q("1Ki")),
                        ("ephemeral-storage".to_string(), q("2Ki")),
                    ])),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            ..Default::default()
        });
        pod.status = Some(PodStatus {
            container_statuses: Some(vec![ContainerStatus {
                name: container.to_string(),
                state: Some(ContainerState {
                    running: Some(ContainerStateRunning {
                        started_at: Some(Time(started)),
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        });
        pod
    }

    fn node(name: &str, conditions: &[(&str, &str)]) -> Node {
        let mut node = Node::default();
        node.metadata.name = Some(name.to_string());
        node.status = Some(NodeStatus {
            allocatable: Some(BTreeMap::from([
                ("cpu".to_string(), q("4")),
                ("memory".to_string(), q("8Gi")),
                ("ephemeral-storage".to_string(), q("100Gi")),
            ])),
            conditions: Some(
                conditions
                    .iter()
                    .map(|(t, s)| NodeCondition {
                        type_: t.to_string(),
                        status: s.to_string(),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        });
        node
    }

    #[test]
    fn test_integrate_usage_multiplies_by_elapsed_seconds() {
        let now = Utc::now();
        let pods = vec![running_pod(Some("web"), "web", now - Duration::seconds(10))];

        let usage = integrate_usage(&pods, now);
        assert_eq!(usage["web"], ResourceUnit::new(1000, 10 * 1024, 20 * 1024));
    }

    #[test]
    fn test_integrate_usage_sums_per_service() {
        let now = Utc::now();
        let pods = vec![
            running_pod(Some("web"), "web", now - Duration::seconds(10)),
            running_pod(Some("web"), "web", now - Duration::seconds(5)),
            running_pod(None, "sidecar", now - Duration::seconds(1)),
        ];

        let usage = integrate_usage(&pods, now);
        assert_eq!(usage["web"].cpu_milli, 1500);
        assert_eq!(usage["sidecar"].cpu_milli, 100);
    }

    #[test]
    fn test_integrate_usage_is_monotonic_in_time() {
        let start = Utc::now();
        let pods = vec![
            running_pod(Some("web"), "web", start),
            running_pod(Some("api"), "api", start + Duration::seconds(30)),
        ];

        let mut previous: Option<BTreeMap<String, ResourceUnit>> = None;
        for offset in [0, 1, 29, 30, 31, 600, 86_400] {
            let usage = integrate_usage(&pods, start + Duration::seconds(offset));
            if let Some(previous) = &previous {
                for (service, before) in previous {
                    let after = usage[service];
                    assert!(after.cpu_milli >= before.cpu_milli);
                    assert!(after.memory_bytes >= before.memory_bytes);
                    assert!(after.disk_bytes >= before.disk_bytes);
                }
            }
            previous = Some(usage);
        }
    }

    #[test]
    fn test_integrate_usage_skips_non_running() {
        let mut pod = running_pod(Some("web"), "web", Utc::now());
        pod.status = Some(PodStatus::default());
        assert!(integrate_usage(&[pod], Utc::now()).is_empty());
    }

    #[test]
    fn test_schedulable_nodes() {
        assert!(node_is_schedulable(&node("a", &[("Ready", "True")])));
        assert!(!node_is_schedulable(&node("b", &[("Ready", "False")])));
        assert!(!node_is_schedulable(&node(
            "c",
            &[("Ready", "True"), ("MemoryPressure", "True")]
        )));
        assert!(node_is_schedulable(&node(
            "d",
            &[("Ready", "True"), ("DiskPressure", "False")]
        )));
    }

    #[test]
    fn test_available_capacity_clamps_at_zero() {
        let nodes = vec![
            node("a", &[("Ready", "True")]),
            node("b", &[("Ready", "True")]),
            node("c", &[("Ready", "False")]),
        ];
        let usage = vec![
            NodeUsage {
                name: "a".to_string(),
                cpu_milli: 1500,
                memory_bytes: 1 << 30,
            },
            NodeUsage {
                name: "b".to_string(),
                cpu_milli: 9000,
                memory_bytes: 1 << 40,
            },
        ];

        let capacity = available_capacity(&nodes, &usage);
        assert_eq!(capacity.len(), 2);
        assert_eq!(capacity[0].available.cpu_milli, 2500);
        assert_eq!(capacity[0].available.memory_bytes, 7 << 30);
        assert_eq!(capacity[1].available.cpu_milli, 0);
        assert_eq!(capacity[1].available.memory_bytes, 0);
    }

    #[test]
    fn test_cluster_metrics_counts_endpoints() {
        use k8s_openapi::api::core::v1::{ServicePort, ServiceSpec};

        let service = |ports: &[i32]| Service {
            spec: Some(ServiceSpec {
                ports: Some(
                    ports
                        .iter()
                        .map(|p| ServicePort {
                            port: *p,
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        };

        let metrics = cluster_metrics(
            &[node("a", &[("Ready", "True")])],
            &[],
            &[service(&[80]), service(&[80, 443])],
        );
        assert_eq!(metrics.endpoints[&80], 2);
        assert_eq!(metrics.endpoints[&443], 1);
        assert_eq!(metrics.node_total["a"].cpu_milli, 4000);
        assert!(metrics.node_images["a"].is_empty());
    }
}
