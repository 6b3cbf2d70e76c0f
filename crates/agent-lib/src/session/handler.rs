//! Command execution
//!
//! One handler task drains a one-slot queue, so at most one command is
//! reconciled at a time and reports leave in arrival order.

use crate::error::{TaskError, ValidationError};
use crate::models::{
    PortMapping, TaskCommand, TaskOperation, TaskReport, TaskStatus, TaskType, WEB_PORT,
};
use crate::observability::{AgentMetrics, StructuredLogger};
use crate::proto::Envelope;
use crate::task::TaskBackend;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A command paired with the stream its report goes back on
pub struct Dispatch {
    pub command: TaskCommand,
    pub reply: mpsc::Sender<Envelope>,
}

pub struct CommandHandler {
    backend: Arc<dyn TaskBackend>,
    metrics: AgentMetrics,
    logger: StructuredLogger,
}

impl CommandHandler {
    pub fn new(
        backend: Arc<dyn TaskBackend>,
        metrics: AgentMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            backend,
            metrics,
            logger,
        }
    }

    /// Execute one command; failures become the report, never an error
    pub async fn handle(&self, command: &TaskCommand) -> TaskReport {
        let started = Instant::now();
        let outcome = self.execute(command).await;

        let (success, url, report) = match outcome {
            Ok(url) => (true, url, String::new()),
            Err(e) => (false, None, e.to_string()),
        };
        let status = TaskStatus::for_outcome(command.operation, success);
        let report = TaskReport {
            task_id: command.task_id.clone(),
            task_type: command.task_type,
            operation: command.operation,
            status,
            url,
            report,
        };

        let elapsed = started.elapsed();
        self.metrics.record_command(command.operation, status, elapsed);
        self.logger.log_task_reported(&report, elapsed);
        report
    }

    async fn execute(&self, command: &TaskCommand) -> Result<Option<String>, TaskError> {
        let id = command.task_id.as_str();
        let images = command.images.as_slice();

        match (command.operation, command.task_type) {
            (TaskOperation::Create, TaskType::Workload) => {
                self.backend.create_tasks(id, images).await
            }
            (TaskOperation::Update, TaskType::Workload) => {
                let ports = command.ports.unwrap_or(PortMapping {
                    internal: WEB_PORT,
                    external: WEB_PORT,
                });
                self.backend
                    .update_task(id, images, command.replica_count.unwrap_or(1), ports)
                    .await
            }
            (TaskOperation::Create | TaskOperation::Update, TaskType::Job) => {
                self.backend.create_jobs(id, None, images).await?;
                Ok(None)
            }
            (TaskOperation::Create | TaskOperation::Update, TaskType::ScheduledJob) => {
                let schedule = command
                    .schedule
                    .as_deref()
                    .ok_or(ValidationError::MissingSchedule)?;
                self.backend.create_jobs(id, Some(schedule), images).await?;
                Ok(None)
            }
            (TaskOperation::Cancel, TaskType::Workload) => {
                self.backend.cancel_task(id).await?;
                Ok(None)
            }
            (TaskOperation::Cancel, task_type) => {
                self.backend
                    .cancel_job(id, task_type == TaskType::ScheduledJob)
                    .await?;
                Ok(None)
            }
        }
    }

    /// Drain the dispatch queue until every sender is gone
    pub(crate) async fn run(self, mut queue: mpsc::Receiver<Dispatch>) {
        while let Some(Dispatch { command, reply }) = queue.recv().await {
            debug!(
                task_id = %command.task_id,
                operation = command.operation.as_str(),
                "Handling command"
            );
            let report = self.handle(&command).await;
            if reply.send(Envelope::report(report)).await.is_err() {
                warn!(
                    task_id = %command.task_id,
                    "Stream closed before the report could be sent"
                );
            }
        }
    }
}
