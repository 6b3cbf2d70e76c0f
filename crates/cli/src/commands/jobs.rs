//! Batch and scheduled job commands

use agent_lib::TaskBackend;
use anyhow::Result;

use crate::output::print_success;

pub async fn create(
    backend: &dyn TaskBackend,
    task_id: &str,
    schedule: Option<&str>,
    images: &[String],
) -> Result<()> {
    backend.create_jobs(task_id, schedule, images).await?;
    match schedule {
        Some(schedule) => print_success(&format!("Job {} scheduled at {}", task_id, schedule)),
        None => print_success(&format!("Job {} started", task_id)),
    }
    Ok(())
}

pub async fn cancel(backend: &dyn TaskBackend, task_id: &str, scheduled: bool) -> Result<()> {
    backend.cancel_job(task_id, scheduled).await?;
    print_success(&format!("Job {} cancelled", task_id));
    Ok(())
}
