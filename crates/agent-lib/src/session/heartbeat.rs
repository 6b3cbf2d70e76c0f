//! Heartbeat composition and the periodic heartbeat worker

use crate::error::TaskError;
use crate::models::{HeartbeatMessage, InventorySummary};
use crate::observability::AgentMetrics;
use crate::proto::Envelope;
use crate::task::TaskBackend;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Builds heartbeat frames from the current cluster view
#[derive(Clone)]
pub struct HeartbeatComposer {
    backend: Arc<dyn TaskBackend>,
    data_center_id: String,
}

impl HeartbeatComposer {
    pub fn new(backend: Arc<dyn TaskBackend>, data_center_id: impl Into<String>) -> Self {
        Self {
            backend,
            data_center_id: data_center_id.into(),
        }
    }

    /// Never fails: parts that cannot be read are sent empty
    pub async fn compose(&self) -> HeartbeatMessage {
        let nodes = self.backend.inventory().await.unwrap_or_else(|e| {
            warn!(error = %e, "Inventory unavailable for heartbeat");
            Vec::new()
        });
        let workloads = match self.backend.list_tasks().await {
            Ok((names, _)) => names,
            Err(TaskError::NoDeployment) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "Workload list unavailable for heartbeat");
                Vec::new()
            }
        };
        let summary = InventorySummary { nodes, workloads };

        let metrics_json = match self.backend.metrics().await {
            Ok(metrics) => serde_json::to_string(&metrics).unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Cluster metrics unavailable for heartbeat");
                String::new()
            }
        };

        HeartbeatMessage {
            data_center_id: self.data_center_id.clone(),
            timestamp_nanos: chrono::Utc::now()
                .timestamp_nanos_opt()
                .map(|n| n.max(0) as u64)
                .unwrap_or_default(),
            inventory_summary: serde_json::to_string(&summary).unwrap_or_default(),
            metrics_json,
        }
    }
}

/// Sends a heartbeat every `interval` until the receive loop reports the
/// connection lost, or until a send fails, which it reports on `failed`.
pub(crate) async fn run(
    composer: HeartbeatComposer,
    interval: Duration,
    outbound: mpsc::Sender<Envelope>,
    mut lost: oneshot::Receiver<()>,
    failed: oneshot::Sender<()>,
    metrics: AgentMetrics,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Registration already sent the first one
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = &mut lost => {
                debug!("Connection lost, heartbeat worker exiting");
                return;
            }
            _ = ticker.tick() => {
                let frame = Envelope::heartbeat(composer.compose().await);
                if outbound.send(frame).await.is_err() {
                    metrics.inc_heartbeat_failures();
                    let _ = failed.send(());
                    return;
                }
                metrics.inc_heartbeats_sent();
            }
        }
    }
}
