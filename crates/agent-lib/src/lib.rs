//! Data center agent library
//!
//! This crate provides the core functionality for:
//! - Translating task commands into Kubernetes objects and reconciling them
//!   with compensating rollback
//! - The controller command stream session with heartbeats
//! - Metering, inventory and ledger publication
//! - Health checks and observability

pub mod cluster;
pub mod error;
pub mod health;
pub mod ledger;
pub mod models;
pub mod observability;
pub mod proto;
pub mod session;
pub mod task;

pub use error::{ClusterError, LedgerError, ReconcileError, SessionError, TaskError, ValidationError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{AgentMetrics, StructuredLogger};
pub use task::{TaskBackend, Tasker};
