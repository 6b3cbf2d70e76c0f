//! Error types shared across the agent

use crate::models::ResourceKind;
use thiserror::Error;

/// Input rejected before anything touches the cluster
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("no image")]
    NoImage,

    #[error("invalid resource name {0:?}")]
    InvalidName(String),

    #[error("scheduled job requires a schedule")]
    MissingSchedule,

    #[error("malformed env entry {0:?}, expected KEY or KEY=VALUE")]
    MalformedEnv(String),

    #[error("{field} {value} is out of range (max {max})")]
    OutOfRange {
        field: &'static str,
        value: u32,
        max: u32,
    },

    #[error("invalid label selector: {0}")]
    Selector(String),
}

/// Failure talking to the control plane
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("{kind} {name:?} not found")]
    NotFound { kind: ResourceKind, name: String },

    #[error("conflict on {kind} {name:?}: {message}")]
    Conflict {
        kind: ResourceKind,
        name: String,
        message: String,
    },

    #[error("{operation} is not supported for {kind}")]
    Unsupported {
        kind: ResourceKind,
        operation: &'static str,
    },

    #[error("control plane rejected {kind} {name:?}: {message}")]
    Rejected {
        kind: ResourceKind,
        name: String,
        message: String,
    },

    #[error("control plane unreachable: {0}")]
    Connectivity(String),

    #[error("cluster configuration: {0}")]
    Config(String),

    #[error("expected {expected} object, got {found}")]
    KindMismatch {
        expected: ResourceKind,
        found: ResourceKind,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("failed to encode cluster state: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ClusterError {
    /// Classify a kube client error for the named object
    pub fn from_kube(err: kube::Error, kind: ResourceKind, name: &str) -> Self {
        match err {
            kube::Error::Api(response) => match response.code {
                404 => ClusterError::NotFound {
                    kind,
                    name: name.to_string(),
                },
                409 => ClusterError::Conflict {
                    kind,
                    name: name.to_string(),
                    message: response.message,
                },
                _ => ClusterError::Rejected {
                    kind,
                    name: name.to_string(),
                    message: response.message,
                },
            },
            other => ClusterError::Connectivity(other.to_string()),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound { .. })
    }
}

/// A reconcile run failed and compensation was attempted
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("{context}: {source}; rolled back")]
    RolledBack {
        context: String,
        source: ClusterError,
    },

    #[error("{context}: {source}; rollback failed: {detail}")]
    RollbackFailed {
        context: String,
        source: ClusterError,
        detail: String,
    },

    /// Rejected before any change was made
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

impl ReconcileError {
    pub fn rollback_failed(&self) -> bool {
        matches!(self, ReconcileError::RollbackFailed { .. })
    }
}

/// Failure of a task-level operation
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("no deployment")]
    NoDeployment,
}

/// Failure of the command stream
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid controller endpoint {endpoint:?}: {message}")]
    Endpoint { endpoint: String, message: String },

    #[error("failed to connect to controller: {0}")]
    Connect(#[from] tonic::transport::Error),

    #[error("controller refused stream: {0}")]
    Open(#[from] tonic::Status),

    #[error("registration failed: {0}")]
    Registration(String),
}

/// Failure publishing to the ledger
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The same transaction is already pending; callers treat this as benign
    #[error("tx already exists in cache")]
    AlreadyExists,

    #[error("ledger rejected transaction: {0}")]
    Rejected(String),

    #[error("ledger request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid ledger endpoint: {0}")]
    Endpoint(#[from] url::ParseError),

    #[error("failed to encode ledger payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("metering unavailable: {0}")]
    Source(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: format!("code {}", code),
            reason: "Test".to_string(),
            code,
        })
    }

    #[test]
    fn test_kube_404_maps_to_not_found() {
        let err = ClusterError::from_kube(api_error(404), ResourceKind::Workload, "web");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "workload \"web\" not found");
    }

    #[test]
    fn test_kube_409_maps_to_conflict() {
        let err = ClusterError::from_kube(api_error(409), ResourceKind::Route, "web");
        assert!(matches!(err, ClusterError::Conflict { .. }));
    }

    #[test]
    fn test_kube_other_codes_are_rejections() {
        let err = ClusterError::from_kube(api_error(422), ResourceKind::Route, "web");
        assert!(matches!(err, ClusterError::Rejected { .. }));
    }

    #[test]
    fn test_reconcile_error_text() {
        let err = ReconcileError::RolledBack {
            context: "applying route web".to_string(),
            source: ClusterError::Connectivity("timeout".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "applying route web: control plane unreachable: timeout; rolled back"
        );
        assert!(!err.rollback_failed());

        let err = ReconcileError::RollbackFailed {
            context: "applying route web".to_string(),
            source: ClusterError::Connectivity("timeout".to_string()),
            detail: "delete workload \"web\": denied".to_string(),
        };
        assert!(err.to_string().contains("rollback failed"));
        assert!(err.rollback_failed());
    }

    #[test]
    fn test_no_image_text() {
        let err: TaskError = ValidationError::NoImage.into();
        assert_eq!(err.to_string(), "no image");
    }
}
