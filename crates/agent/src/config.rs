//! Agent configuration, read from `DCAGENT_*` environment variables

use agent_lib::cluster::ClusterSettings;
use agent_lib::session::SessionConfig;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Identifies this data center to the controller and the ledger
    #[serde(default = "default_data_center")]
    pub data_center: String,

    /// Controller gRPC address; plaintext unless the scheme is https
    #[serde(default = "default_controller_addr")]
    pub controller_addr: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Base domain for generated route hosts
    #[serde(default = "default_ingress_host")]
    pub ingress_host: String,

    /// Falls back to ~/.kube/config, then in-cluster configuration
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,

    /// Tendermint RPC endpoint; metering publication is off when unset
    #[serde(default)]
    pub ledger_endpoint: Option<String>,

    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    #[serde(default = "default_metering_interval")]
    pub metering_interval_secs: u64,

    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_ledger_timeout")]
    pub ledger_timeout_secs: u64,
}

fn default_data_center() -> String {
    "dc-local".to_string()
}

fn default_controller_addr() -> String {
    "http://127.0.0.1:9090".to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_ingress_host() -> String {
    "localhost".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_metering_interval() -> u64 {
    30
}

fn default_reconnect_delay() -> u64 {
    5
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_ledger_timeout() -> u64 {
    10
}

impl AgentConfig {
    pub fn load() -> Result<Self> {
        Self::from_env(config::Environment::with_prefix("DCAGENT"))
    }

    fn from_env(source: config::Environment) -> Result<Self> {
        config::Config::builder()
            .add_source(source.try_parsing(true))
            .build()
            .context("Failed to read agent configuration")?
            .try_deserialize()
            .context("Invalid agent configuration")
    }

    pub fn cluster_settings(&self) -> ClusterSettings {
        ClusterSettings {
            namespace: self.namespace.clone(),
            ingress_host: self.ingress_host.clone(),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            data_center_id: self.data_center.clone(),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs.max(1)),
            reconnect_delay: Duration::from_secs(self.reconnect_delay_secs),
        }
    }

    pub fn metering_interval(&self) -> Duration {
        Duration::from_secs(self.metering_interval_secs.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn ledger_timeout(&self) -> Duration {
        Duration::from_secs(self.ledger_timeout_secs)
    }
}
