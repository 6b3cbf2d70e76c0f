//! dcagent - data center cluster agent
//!
//! Keeps a command stream open to the controller, reconciles task commands
//! into the cluster, and publishes metering to the ledger.

use agent_lib::{
    cluster::ClusterClient,
    health::{components, HealthRegistry},
    ledger::{ledger_key, MeteringPublisher, TendermintLedger},
    observability::{AgentMetrics, StructuredLogger},
    session::{GrpcConnector, Session},
    task::{TaskBackend, Tasker},
};
use anyhow::{Context, Result};
use dcagent::{api, config::AgentConfig};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = AgentConfig::load()?;
    let logger = StructuredLogger::new(&config.data_center);
    logger.log_startup(AGENT_VERSION, &config.namespace, &config.controller_addr);

    let health = HealthRegistry::new();
    let metrics = AgentMetrics::new();

    // Without the namespace there is nothing to reconcile into
    health.register(components::CLUSTER).await;
    let client = ClusterClient::connect(config.kubeconfig.as_deref(), config.cluster_settings())
        .await
        .with_context(|| format!("Failed to prepare namespace {:?}", config.namespace))?;
    let backend: Arc<dyn TaskBackend> = Arc::new(Tasker::new(client));

    match &config.ledger_endpoint {
        Some(endpoint) => {
            let ledger = TendermintLedger::new(endpoint, config.ledger_timeout())
                .context("Invalid ledger endpoint")?;
            let publisher = MeteringPublisher::new(
                backend.clone(),
                Arc::new(ledger),
                ledger_key(&config.data_center, &config.namespace),
                config.metering_interval(),
                health.clone(),
                logger.clone(),
            );
            info!(key = %publisher.key(), "Metering publication enabled");
            tokio::spawn(publisher.run());
        }
        None => info!("No ledger endpoint configured, metering publication disabled"),
    }

    let connector = GrpcConnector::new(&config.controller_addr, config.connect_timeout());
    let session = Session::new(
        config.session_config(),
        Arc::new(connector),
        backend,
        health.clone(),
    );
    tokio::spawn(session.run());

    let state = Arc::new(api::AppState::new(health.clone(), metrics));
    health.set_ready(true).await;
    let api_handle = tokio::spawn(api::serve(config.api_port, state));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            logger.log_shutdown("SIGINT received");
        }
        served = api_handle => {
            let reason = match served {
                Ok(Ok(())) => "API server stopped".to_string(),
                Ok(Err(e)) => format!("API server failed: {:#}", e),
                Err(e) => format!("API server panicked: {}", e),
            };
            error!(%reason, "Shutting down");
            logger.log_shutdown(&reason);
        }
    }

    Ok(())
}
