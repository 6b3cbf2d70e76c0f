//! Metering publication to a Tendermint ledger
//!
//! The publisher periodically serializes the metering map and broadcasts
//! it as a `key=value` transaction. Resubmitting a snapshot the ledger
//! already holds is answered with "tx already exists in cache", which is
//! counted as recorded rather than as a failure.

use crate::error::LedgerError;
use crate::health::{components, HealthRegistry};
use crate::observability::{AgentMetrics, StructuredLogger};
use crate::task::TaskBackend;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use url::Url;

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Broadcast one transaction and wait for it to be committed
    async fn broadcast(&self, key: &str, value: &str) -> Result<(), LedgerError>;
}

/// Tendermint RPC over HTTP (`/broadcast_tx_commit`)
#[derive(Debug, Clone)]
pub struct TendermintLedger {
    client: reqwest::Client,
    endpoint: Url,
}

impl TendermintLedger {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, LedgerError> {
        let mut endpoint = Url::parse(endpoint)?;
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }

    /// The `tx` argument is a JSON string literal, so quotes in the value
    /// are escaped before the RPC server unmarshals it
    fn request_url(&self, key: &str, value: &str) -> Result<Url, LedgerError> {
        let tx = serde_json::to_string(&format!("{}={}", key, value))?;
        let mut url = self.endpoint.join("broadcast_tx_commit")?;
        url.query_pairs_mut().append_pair("tx", &tx);
        Ok(url)
    }
}

#[async_trait]
impl Ledger for TendermintLedger {
    async fn broadcast(&self, key: &str, value: &str) -> Result<(), LedgerError> {
        let url = self.request_url(key, value)?;
        // RPC errors arrive as JSON bodies, sometimes with a 500 status
        let body = self.client.get(url).send().await?.text().await?;
        interpret(&body)
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<BroadcastResult>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl RpcError {
    fn detail(&self) -> String {
        match &self.data {
            serde_json::Value::Null => self.message.clone(),
            serde_json::Value::String(data) => data.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct BroadcastResult {
    #[serde(default)]
    check_tx: TxResult,
    #[serde(default, alias = "tx_result")]
    deliver_tx: TxResult,
}

#[derive(Debug, Default, Deserialize)]
struct TxResult {
    #[serde(default)]
    code: u32,
    #[serde(default)]
    log: String,
}

/// Map a `broadcast_tx_commit` response body onto a result
fn interpret(body: &str) -> Result<(), LedgerError> {
    let response: RpcResponse = serde_json::from_str(body)?;

    if let Some(error) = response.error {
        let detail = error.detail();
        if detail.contains("already exists") {
            return Err(LedgerError::AlreadyExists);
        }
        return Err(LedgerError::Rejected(detail));
    }

    let result = response.result.unwrap_or_default();
    for (stage, tx) in [("check_tx", &result.check_tx), ("deliver_tx", &result.deliver_tx)] {
        if tx.code != 0 {
            return Err(LedgerError::Rejected(format!(
                "{} code {}: {}",
                stage, tx.code, tx.log
            )));
        }
    }
    Ok(())
}

pub fn ledger_key(data_center_id: &str, namespace: &str) -> String {
    format!("{}:{}", data_center_id, namespace)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Publication {
    Committed { workloads: usize },
    /// The ledger already held this exact snapshot
    Duplicate { workloads: usize },
}

pub struct MeteringPublisher {
    backend: Arc<dyn TaskBackend>,
    ledger: Arc<dyn Ledger>,
    key: String,
    interval: Duration,
    health: HealthRegistry,
    metrics: AgentMetrics,
    logger: StructuredLogger,
    started: bool,
}

impl MeteringPublisher {
    pub fn new(
        backend: Arc<dyn TaskBackend>,
        ledger: Arc<dyn Ledger>,
        key: String,
        interval: Duration,
        health: HealthRegistry,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            backend,
            ledger,
            key,
            interval,
            health,
            metrics: AgentMetrics::new(),
            logger,
            started: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn publish_once(&mut self) -> Result<Publication, LedgerError> {
        let usage = self
            .backend
            .metering()
            .await
            .map_err(|e| LedgerError::Source(e.to_string()))?;
        let workloads = usage.len();
        let value = serde_json::to_string(&usage)?;
        self.metrics.set_metered_workloads(workloads);

        let publication = match self.ledger.broadcast(&self.key, &value).await {
            Ok(()) => Publication::Committed { workloads },
            Err(LedgerError::AlreadyExists) => Publication::Duplicate { workloads },
            Err(e) => return Err(e),
        };

        if !self.started {
            self.started = true;
            info!(key = %self.key, "metering broadcast started");
        }
        Ok(publication)
    }

    /// Publish every interval until the process exits
    pub async fn run(mut self) {
        self.health.register(components::LEDGER).await;

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            match self.publish_once().await {
                Ok(Publication::Committed { workloads }) => {
                    self.metrics.record_ledger_publication("committed");
                    self.logger.log_metering_published(&self.key, workloads, false);
                    self.health.set_healthy(components::LEDGER).await;
                }
                Ok(Publication::Duplicate { workloads }) => {
                    self.metrics.record_ledger_publication("duplicate");
                    self.logger.log_metering_published(&self.key, workloads, true);
                    self.health.set_healthy(components::LEDGER).await;
                }
                Err(e) => {
                    self.metrics.record_ledger_publication("failed");
                    warn!(key = %self.key, error = %e, "Metering broadcast failed");
                    self.health
                        .set_degraded(components::LEDGER, e.to_string())
                        .await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::memory::MemoryControlPlane;
    use crate::cluster::{ClusterClient, ClusterSettings};
    use crate::task::Tasker;
    use std::sync::Mutex;
    use tokio_test::{assert_err, assert_ok};

    /// Records transactions and answers from a script, then succeeds
    #[derive(Default)]
    struct ScriptedLedger {
        sent: Mutex<Vec<(String, String)>>,
        answers: Mutex<Vec<LedgerError>>,
    }

    #[async_trait]
    impl Ledger for ScriptedLedger {
        async fn broadcast(&self, key: &str, value: &str) -> Result<(), LedgerError> {
            self.sent
                .lock()
                .unwrap()
                .push((key.to_string(), value.to_string()));
            match self.answers.lock().unwrap().pop() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
    }

    async fn publisher(
        answers: Vec<LedgerError>,
    ) -> (Arc<MemoryControlPlane>, Arc<ScriptedLedger>, MeteringPublisher) {
        let plane = Arc::new(MemoryControlPlane::new());
        let client = ClusterClient::new(plane.clone(), ClusterSettings::default())
            .await
            .unwrap();
        let ledger = Arc::new(ScriptedLedger {
            answers: Mutex::new(answers),
            ..Default::default()
        });
        let publisher = MeteringPublisher::new(
            Arc::new(Tasker::new(client)),
            ledger.clone(),
            ledger_key("dc-1", "default"),
            Duration::from_secs(30),
            HealthRegistry::new(),
            StructuredLogger::new("dc-1"),
        );
        (plane, ledger, publisher)
    }

    #[tokio::test]
    async fn test_publish_sends_metering_under_key() {
        let (_plane, ledger, mut publisher) = publisher(Vec::new()).await;

        let publication = assert_ok!(publisher.publish_once().await);
        assert_eq!(publication, Publication::Committed { workloads: 0 });

        let sent = ledger.sent.lock().unwrap().clone();
        assert_eq!(sent, vec![("dc-1:default".to_string(), "{}".to_string())]);
    }

    #[tokio::test]
    async fn test_duplicate_is_benign() {
        let (_plane, _ledger, mut publisher) = publisher(vec![LedgerError::AlreadyExists]).await;

        let publication = assert_ok!(publisher.publish_once().await);
        assert_eq!(publication, Publication::Duplicate { workloads: 0 });
    }

    #[tokio::test]
    async fn test_rejection_and_source_failures_surface() {
        let (plane, ledger, mut publisher) =
            publisher(vec![LedgerError::Rejected("bad tx".to_string())]).await;

        let err = assert_err!(publisher.publish_once().await);
        assert!(matches!(err, LedgerError::Rejected(_)));

        plane.set_unreachable(true);
        let err = assert_err!(publisher.publish_once().await);
        assert!(matches!(err, LedgerError::Source(_)));
        // Nothing is broadcast without a snapshot
        assert_eq!(ledger.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_request_url_quotes_transaction() {
        let ledger =
            TendermintLedger::new("http://ledger:26657", Duration::from_secs(1)).unwrap();
        let snapshot = r#"{"web":{"cpu_milli":1,"memory_bytes":2,"disk_bytes":3}}"#;
        let url = ledger.request_url("dc-1:apps", snapshot).unwrap();

        assert_eq!(url.path(), "/broadcast_tx_commit");
        let (name, tx) = url.query_pairs().next().unwrap();
        assert_eq!(name, "tx");
        assert!(tx.starts_with('"') && tx.ends_with('"'));

        let decoded: String = serde_json::from_str(&tx).unwrap();
        assert_eq!(decoded, format!("dc-1:apps={}", snapshot));
    }

    #[test]
    fn test_endpoint_path_is_kept() {
        let ledger =
            TendermintLedger::new("http://gateway/tendermint", Duration::from_secs(1)).unwrap();
        let url = ledger.request_url("k", "v").unwrap();
        assert_eq!(url.path(), "/tendermint/broadcast_tx_commit");

        assert!(matches!(
            TendermintLedger::new("not a url", Duration::from_secs(1)),
            Err(LedgerError::Endpoint(_))
        ));
    }

    #[test]
    fn test_interpret_responses() {
        let committed = r#"{"jsonrpc":"2.0","id":-1,"result":{
            "check_tx":{"code":0,"log":""},
            "deliver_tx":{"code":0,"log":""},
            "hash":"AB12","height":"42"}}"#;
        assert_ok!(interpret(committed));

        let cached = r#"{"jsonrpc":"2.0","id":-1,"error":{
            "code":-32603,"message":"Internal error","data":"tx already exists in cache"}}"#;
        assert!(matches!(interpret(cached), Err(LedgerError::AlreadyExists)));

        let failed_check = r#"{"result":{"check_tx":{"code":4,"log":"bad format"}}}"#;
        match interpret(failed_check) {
            Err(LedgerError::Rejected(detail)) => assert_eq!(detail, "check_tx code 4: bad format"),
            other => panic!("unexpected: {:?}", other),
        }

        let newer = r#"{"result":{"check_tx":{"code":0},"tx_result":{"code":1,"log":"boom"}}}"#;
        assert!(matches!(interpret(newer), Err(LedgerError::Rejected(_))));

        assert!(matches!(interpret("<html>"), Err(LedgerError::Encode(_))));
    }
}
