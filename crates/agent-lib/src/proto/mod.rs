//! Wire types for the controller command stream
//!
//! Messages are declared by hand with prost derives so the crate builds
//! without protoc. Every frame is an [`Envelope`] whose `op_type` tags the
//! operation and whose payload is a task, a task report or a heartbeat.

pub mod dcmgr {
    pub mod v1 {
        use prost::Message;

        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        #[repr(i32)]
        pub enum Operation {
            #[default]
            Unspecified = 0,
            TaskCreate = 1,
            TaskUpdate = 2,
            TaskCancel = 3,
            Heartbeat = 4,
        }

        impl Operation {
            pub fn from_i32(value: i32) -> Option<Self> {
                match value {
                    0 => Some(Operation::Unspecified),
                    1 => Some(Operation::TaskCreate),
                    2 => Some(Operation::TaskUpdate),
                    3 => Some(Operation::TaskCancel),
                    4 => Some(Operation::Heartbeat),
                    _ => None,
                }
            }
        }

        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        #[repr(i32)]
        pub enum TaskType {
            #[default]
            Deployment = 0,
            Job = 1,
            CronJob = 2,
        }

        impl TaskType {
            pub fn from_i32(value: i32) -> Option<Self> {
                match value {
                    0 => Some(TaskType::Deployment),
                    1 => Some(TaskType::Job),
                    2 => Some(TaskType::CronJob),
                    _ => None,
                }
            }
        }

        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        #[repr(i32)]
        pub enum TaskStatus {
            #[default]
            Unspecified = 0,
            StartSuccess = 1,
            StartFailed = 2,
            UpdateSuccess = 3,
            UpdateFailed = 4,
            Cancelled = 5,
            CancelFailed = 6,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct Task {
            #[prost(string, tag = "1")]
            pub id: String,
            #[prost(int32, tag = "2")]
            pub r#type: i32,
            #[prost(string, repeated, tag = "3")]
            pub images: Vec<String>,
            #[prost(string, tag = "4")]
            pub schedule: String,
            /// Absent means "not specified"; zero removes the workload
            #[prost(uint32, optional, tag = "5")]
            pub replicas: Option<u32>,
            #[prost(uint32, tag = "6")]
            pub internal_port: u32,
            #[prost(uint32, tag = "7")]
            pub external_port: u32,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct TaskReport {
            #[prost(string, tag = "1")]
            pub task_id: String,
            #[prost(int32, tag = "2")]
            pub r#type: i32,
            #[prost(int32, tag = "3")]
            pub status: i32,
            #[prost(string, tag = "4")]
            pub url: String,
            #[prost(string, tag = "5")]
            pub report: String,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct Heartbeat {
            #[prost(string, tag = "1")]
            pub data_center_id: String,
            #[prost(uint64, tag = "2")]
            pub timestamp_nanos: u64,
            #[prost(string, tag = "3")]
            pub inventory_summary: String,
            #[prost(string, tag = "4")]
            pub metrics_json: String,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct Envelope {
            #[prost(int32, tag = "1")]
            pub op_type: i32,
            #[prost(oneof = "envelope::Payload", tags = "2, 3, 4")]
            pub payload: Option<envelope::Payload>,
        }

        pub mod envelope {
            #[derive(Clone, PartialEq, prost::Oneof)]
            pub enum Payload {
                #[prost(message, tag = "2")]
                Task(super::Task),
                #[prost(message, tag = "3")]
                Report(super::TaskReport),
                #[prost(message, tag = "4")]
                Heartbeat(super::Heartbeat),
            }
        }

        pub mod dc_streamer_client {
            use super::*;
            use tonic::codegen::*;

            #[derive(Debug, Clone)]
            pub struct DcStreamerClient<T> {
                inner: tonic::client::Grpc<T>,
            }

            impl DcStreamerClient<tonic::transport::Channel> {
                pub fn new(channel: tonic::transport::Channel) -> Self {
                    let inner = tonic::client::Grpc::new(channel);
                    Self { inner }
                }
            }

            impl<T> DcStreamerClient<T>
            where
                T: tonic::client::GrpcService<tonic::body::BoxBody>,
                T::Error: Into<StdError>,
                T::ResponseBody: Body<Data = Bytes> + Send + 'static,
                <T::ResponseBody as Body>::Error: Into<StdError> + Send,
            {
                /// Open the bidirectional command stream
                pub async fn server_stream(
                    &mut self,
                    request: impl tonic::IntoStreamingRequest<Message = Envelope>,
                ) -> Result<tonic::Response<tonic::codec::Streaming<Envelope>>, tonic::Status>
                {
                    self.inner.ready().await.map_err(|e| {
                        tonic::Status::new(
                            tonic::Code::Unknown,
                            format!("Service was not ready: {}", e.into()),
                        )
                    })?;
                    let codec = tonic::codec::ProstCodec::default();
                    let path =
                        http::uri::PathAndQuery::from_static("/dcmgr.v1.DCStreamer/ServerStream");
                    self.inner
                        .streaming(request.into_streaming_request(), path, codec)
                        .await
                }
            }
        }
    }
}

pub use dcmgr::v1::*;

use crate::models::{self, HeartbeatMessage, PortMapping, TaskCommand, TaskOperation};
use thiserror::Error;

/// Why an inbound frame could not be turned into a command
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("unknown operation {0}")]
    UnknownOperation(i32),

    #[error("operation {0:?} is not a command")]
    NotACommand(Operation),

    #[error("frame carries no task")]
    MissingTask,

    #[error("unknown task type {0}")]
    UnknownTaskType(i32),
}

impl From<models::TaskType> for TaskType {
    fn from(value: models::TaskType) -> Self {
        match value {
            models::TaskType::Workload => TaskType::Deployment,
            models::TaskType::Job => TaskType::Job,
            models::TaskType::ScheduledJob => TaskType::CronJob,
        }
    }
}

impl From<TaskType> for models::TaskType {
    fn from(value: TaskType) -> Self {
        match value {
            TaskType::Deployment => models::TaskType::Workload,
            TaskType::Job => models::TaskType::Job,
            TaskType::CronJob => models::TaskType::ScheduledJob,
        }
    }
}

impl From<models::TaskStatus> for TaskStatus {
    fn from(value: models::TaskStatus) -> Self {
        match value {
            models::TaskStatus::StartSuccess => TaskStatus::StartSuccess,
            models::TaskStatus::StartFailed => TaskStatus::StartFailed,
            models::TaskStatus::UpdateSuccess => TaskStatus::UpdateSuccess,
            models::TaskStatus::UpdateFailed => TaskStatus::UpdateFailed,
            models::TaskStatus::Cancelled => TaskStatus::Cancelled,
            models::TaskStatus::CancelFailed => TaskStatus::CancelFailed,
        }
    }
}

impl From<TaskOperation> for Operation {
    fn from(value: TaskOperation) -> Self {
        match value {
            TaskOperation::Create => Operation::TaskCreate,
            TaskOperation::Update => Operation::TaskUpdate,
            TaskOperation::Cancel => Operation::TaskCancel,
        }
    }
}

impl Envelope {
    pub fn heartbeat(message: HeartbeatMessage) -> Self {
        Self {
            op_type: Operation::Heartbeat as i32,
            payload: Some(envelope::Payload::Heartbeat(Heartbeat {
                data_center_id: message.data_center_id,
                timestamp_nanos: message.timestamp_nanos,
                inventory_summary: message.inventory_summary,
                metrics_json: message.metrics_json,
            })),
        }
    }

    /// Report frames carry the operation of the command they answer
    pub fn report(report: models::TaskReport) -> Self {
        Self {
            op_type: Operation::from(report.operation) as i32,
            payload: Some(envelope::Payload::Report(TaskReport {
                task_id: report.task_id,
                r#type: TaskType::from(report.task_type) as i32,
                status: TaskStatus::from(report.status) as i32,
                url: report.url.unwrap_or_default(),
                report: report.report,
            })),
        }
    }

    pub fn command(operation: TaskOperation, task: Task) -> Self {
        Self {
            op_type: Operation::from(operation) as i32,
            payload: Some(envelope::Payload::Task(task)),
        }
    }

    pub fn into_command(self) -> Result<TaskCommand, FrameError> {
        let operation = match Operation::from_i32(self.op_type) {
            Some(Operation::TaskCreate) => TaskOperation::Create,
            Some(Operation::TaskUpdate) => TaskOperation::Update,
            Some(Operation::TaskCancel) => TaskOperation::Cancel,
            Some(other) => return Err(FrameError::NotACommand(other)),
            None => return Err(FrameError::UnknownOperation(self.op_type)),
        };
        let task = match self.payload {
            Some(envelope::Payload::Task(task)) => task,
            _ => return Err(FrameError::MissingTask),
        };
        let task_type = TaskType::from_i32(task.r#type)
            .ok_or(FrameError::UnknownTaskType(task.r#type))?
            .into();

        let ports = match (task.internal_port, task.external_port) {
            (0, 0) => None,
            (internal, external) => Some(PortMapping { internal, external }),
        };

        Ok(TaskCommand {
            operation,
            task_id: task.id,
            task_type,
            images: task
                .images
                .iter()
                .flat_map(|i| i.split(','))
                .map(|i| i.trim().to_string())
                .filter(|i| !i.is_empty())
                .collect(),
            schedule: Some(task.schedule).filter(|s| !s.trim().is_empty()),
            replica_count: task.replicas,
            ports,
        })
    }

    pub fn task_report(&self) -> Option<&TaskReport> {
        match &self.payload {
            Some(envelope::Payload::Report(report)) => Some(report),
            _ => None,
        }
    }

    pub fn heartbeat_payload(&self) -> Option<&Heartbeat> {
        match &self.payload {
            Some(envelope::Payload::Heartbeat(heartbeat)) => Some(heartbeat),
            _ => None,
        }
    }
}
