//! Cluster-wide inspection and teardown

use agent_lib::{TaskBackend, Tasker};
use anyhow::Result;
use tabled::Tabled;

use crate::output::{format_bytes, format_cpu, print_rows, print_success, OutputFormat};

#[derive(Tabled)]
struct CapacityRow {
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "CPU")]
    cpu: String,
    #[tabled(rename = "Memory")]
    memory: String,
    #[tabled(rename = "Disk")]
    disk: String,
}

#[derive(Tabled)]
struct UsageRow {
    #[tabled(rename = "Workload")]
    workload: String,
    #[tabled(rename = "CPU m·s")]
    cpu: u64,
    #[tabled(rename = "Memory B·s")]
    memory: u64,
    #[tabled(rename = "Disk B·s")]
    disk: u64,
}

#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "CPU used/total")]
    cpu: String,
    #[tabled(rename = "Memory used/total")]
    memory: String,
    #[tabled(rename = "Images")]
    images: usize,
}

pub async fn inventory(backend: &dyn TaskBackend, format: OutputFormat) -> Result<()> {
    let nodes = backend.inventory().await?;
    let rows = nodes
        .iter()
        .map(|node| CapacityRow {
            node: node.name.clone(),
            cpu: format_cpu(node.available.cpu_milli),
            memory: format_bytes(node.available.memory_bytes),
            disk: format_bytes(node.available.disk_bytes),
        })
        .collect();
    print_rows(rows, &nodes, format)
}

pub async fn metering(backend: &dyn TaskBackend, format: OutputFormat) -> Result<()> {
    let usage = backend.metering().await?;
    let rows = usage
        .iter()
        .map(|(workload, unit)| UsageRow {
            workload: workload.clone(),
            cpu: unit.cpu_milli,
            memory: unit.memory_bytes,
            disk: unit.disk_bytes,
        })
        .collect();
    print_rows(rows, &usage, format)
}

pub async fn metrics(backend: &dyn TaskBackend, format: OutputFormat) -> Result<()> {
    let metrics = backend.metrics().await?;
    let rows = metrics
        .node_total
        .iter()
        .map(|(node, total)| {
            let used = metrics.node_in_use.get(node).copied().unwrap_or_default();
            NodeRow {
                node: node.clone(),
                cpu: format!("{}/{}", format_cpu(used.cpu_milli), format_cpu(total.cpu_milli)),
                memory: format!(
                    "{}/{}",
                    format_bytes(used.memory_bytes),
                    format_bytes(total.memory_bytes)
                ),
                images: metrics.node_images.get(node).map_or(0, Vec::len),
            }
        })
        .collect();
    print_rows(rows, &metrics, format)
}

pub async fn teardown(tasker: &Tasker) -> Result<()> {
    let namespace = tasker.client().namespace();
    tasker.client().teardown_namespace().await?;
    print_success(&format!("Namespace {} deleted", namespace));
    Ok(())
}
