//! Workload task commands

use agent_lib::{PortMapping, TaskBackend, TaskError};
use anyhow::Result;
use serde_json::json;
use tabled::Tabled;

use crate::output::{color_ready, print_info, print_json, print_rows, print_success, OutputFormat};

#[derive(Tabled)]
struct WorkloadRow {
    #[tabled(rename = "Name")]
    name: String,
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Ready")]
    ready: String,
    #[tabled(rename = "Updated")]
    updated: i32,
    #[tabled(rename = "Available")]
    available: i32,
    #[tabled(rename = "Generation")]
    generation: i64,
}

fn print_deployed(task_id: &str, url: Option<String>, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&json!({ "task_id": task_id, "url": url })),
        OutputFormat::Table => {
            print_success(&format!("Task {} deployed", task_id));
            match url {
                Some(url) => print_info(&format!("Reachable at http://{}", url)),
                None => print_info("No public route"),
            }
            Ok(())
        }
    }
}

pub async fn create(
    backend: &dyn TaskBackend,
    task_id: &str,
    images: &[String],
    format: OutputFormat,
) -> Result<()> {
    let url = backend.create_tasks(task_id, images).await?;
    print_deployed(task_id, url, format)
}

pub async fn update(
    backend: &dyn TaskBackend,
    task_id: &str,
    images: &[String],
    replicas: u32,
    (internal, external): (u32, u32),
    format: OutputFormat,
) -> Result<()> {
    let url = backend
        .update_task(task_id, images, replicas, PortMapping { internal, external })
        .await?;
    print_deployed(task_id, url, format)
}

pub async fn cancel(backend: &dyn TaskBackend, task_id: &str) -> Result<()> {
    backend.cancel_task(task_id).await?;
    print_success(&format!("Task {} cancelled", task_id));
    Ok(())
}

pub async fn list(backend: &dyn TaskBackend, format: OutputFormat) -> Result<()> {
    let (names, rendered) = match backend.list_tasks().await {
        Ok(listed) => listed,
        Err(TaskError::NoDeployment) => (Vec::new(), Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let workloads: Vec<serde_json::Value> = rendered
        .iter()
        .map(|raw| serde_json::from_str(raw))
        .collect::<Result<_, _>>()?;
    let rows = names.into_iter().map(|name| WorkloadRow { name }).collect();
    print_rows(rows, &workloads, format)
}

pub async fn status(backend: &dyn TaskBackend, name: &str, format: OutputFormat) -> Result<()> {
    let status = backend.task_status(name).await?;
    let row = StatusRow {
        name: name.to_string(),
        ready: color_ready(status.ready_replicas, status.replicas),
        updated: status.updated_replicas,
        available: status.available_replicas,
        generation: status.observed_generation,
    };
    print_rows(vec![row], &status, format)
}
