//! Controller command stream session
//!
//! The session keeps one bidirectional stream open to the controller for
//! the lifetime of the process:
//!
//! ```text
//! Disconnected -> Connecting -> Registering -> Active
//!       ^           |    ^         |            |
//!       |           +----+         |            |   (dial retry)
//!       +--------------------------+------------+   (after reconnect_delay)
//! ```
//!
//! While active, three tasks cooperate by message passing only: the
//! receive loop owned by [`Session`], the heartbeat worker, and the single
//! command handler fed through a one-slot queue. The receive loop alone
//! decides when a connection is dead and tells the heartbeat worker so.

pub mod connector;
pub mod handler;
pub mod heartbeat;


pub use connector::{Connector, GrpcConnector, Inbound};
pub use handler::{CommandHandler, Dispatch};
pub use heartbeat::HeartbeatComposer;

use crate::error::SessionError;
use crate::health::{components, HealthRegistry};
use crate::observability::{AgentMetrics, StructuredLogger};
use crate::proto::Envelope;
use crate::task::TaskBackend;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_stream::StreamExt;
use tracing::{debug, warn};

/// Frames buffered toward the controller before writers wait
const OUTBOUND_BUFFER: usize = 16;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub data_center_id: String,
    pub heartbeat_interval: Duration,
    /// Fixed wait before redialing after any disconnect
    pub reconnect_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            data_center_id: "dc-local".to_string(),
            heartbeat_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Registering,
    Active,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Registering => "registering",
            SessionState::Active => "active",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an active connection ended
#[derive(Debug)]
enum Disconnect {
    Closed,
    Receive(tonic::Status),
    HeartbeatFailed,
    HandlerStopped,
}

impl fmt::Display for Disconnect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disconnect::Closed => f.write_str("stream closed by controller"),
            Disconnect::Receive(status) => write!(f, "receive failed: {}", status),
            Disconnect::HeartbeatFailed => f.write_str("heartbeat could not be sent"),
            Disconnect::HandlerStopped => f.write_str("command handler stopped"),
        }
    }
}

pub struct Session {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    backend: Arc<dyn TaskBackend>,
    composer: HeartbeatComposer,
    health: HealthRegistry,
    metrics: AgentMetrics,
    logger: StructuredLogger,
    state: watch::Sender<SessionState>,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        backend: Arc<dyn TaskBackend>,
        health: HealthRegistry,
    ) -> Self {
        let composer = HeartbeatComposer::new(backend.clone(), config.data_center_id.clone());
        let logger = StructuredLogger::new(config.data_center_id.clone());
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            config,
            connector,
            backend,
            composer,
            health,
            metrics: AgentMetrics::new(),
            logger,
            state,
        }
    }

    /// Observe state transitions
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Run until the process exits; connectivity errors are retried forever
    pub async fn run(self) {
        self.health.register(components::SESSION).await;

        let (dispatch, queue) = mpsc::channel::<Dispatch>(1);
        let handler = CommandHandler::new(
            self.backend.clone(),
            self.metrics.clone(),
            self.logger.clone(),
        );
        tokio::spawn(handler.run(queue));

        loop {
            let reason = match self.connect(&dispatch).await {
                Ok(disconnect) => disconnect.to_string(),
                Err(e) => e.to_string(),
            };

            self.transition(SessionState::Disconnected, Some(&reason)).await;
            self.metrics.inc_stream_reconnects();
            tokio::time::sleep(self.config.reconnect_delay).await;
        }
    }

    async fn transition(&self, state: SessionState, detail: Option<&str>) {
        self.state.send_replace(state);
        self.metrics.set_session_active(state == SessionState::Active);
        self.logger.log_session_state(state.as_str(), detail);

        match state {
            SessionState::Active => self.health.set_healthy(components::SESSION).await,
            SessionState::Disconnected => {
                self.health
                    .set_degraded(components::SESSION, detail.unwrap_or("disconnected"))
                    .await
            }
            SessionState::Connecting | SessionState::Registering => {}
        }
    }

    /// One connection from dial to disconnect
    async fn connect(&self, dispatch: &mpsc::Sender<Dispatch>) -> Result<Disconnect, SessionError> {
        let (inbound, outbound) = self.dial().await;

        self.transition(SessionState::Registering, None).await;
        if outbound.is_closed() {
            return Err(SessionError::Registration(
                "stream closed before registration was written".to_string(),
            ));
        }
        self.metrics.inc_heartbeats_sent();

        self.transition(SessionState::Active, None).await;
        Ok(self.receive(inbound, outbound, dispatch).await)
    }

    /// Dial until the controller accepts the stream, staying in `Connecting`
    async fn dial(&self) -> (Inbound, mpsc::Sender<Envelope>) {
        self.transition(SessionState::Connecting, None).await;
        loop {
            // The registration heartbeat is queued before dialing so it is the
            // first frame on the wire even if the controller holds its headers.
            let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
            let registration = Envelope::heartbeat(self.composer.compose().await);
            let opened = match outbound.try_send(registration) {
                Ok(()) => self.connector.open(outbound_rx).await,
                Err(_) => Err(SessionError::Registration(
                    "outbound channel closed".to_string(),
                )),
            };

            match opened {
                Ok(inbound) => return (inbound, outbound),
                Err(e) => {
                    warn!(error = %e, delay = ?self.config.reconnect_delay, "Dial failed, retrying");
                    self.health
                        .set_degraded(components::SESSION, e.to_string())
                        .await;
                    tokio::time::sleep(self.config.reconnect_delay).await;
                }
            }
        }
    }

    async fn receive(
        &self,
        mut inbound: Inbound,
        outbound: mpsc::Sender<Envelope>,
        dispatch: &mpsc::Sender<Dispatch>,
    ) -> Disconnect {
        let (lost, lost_rx) = oneshot::channel();
        let (failed, mut failed_rx) = oneshot::channel();
        let heartbeats = tokio::spawn(heartbeat::run(
            self.composer.clone(),
            self.config.heartbeat_interval,
            outbound.clone(),
            lost_rx,
            failed,
            self.metrics.clone(),
        ));

        let disconnect = loop {
            tokio::select! {
                frame = inbound.next() => match frame {
                    Some(Ok(envelope)) => {
                        let command = match envelope.into_command() {
                            Ok(command) => command,
                            Err(e) => {
                                warn!(error = %e, "Ignoring frame");
                                continue;
                            }
                        };
                        debug!(task_id = %command.task_id, "Queueing command");
                        // Blocks while the handler is busy, pausing the stream
                        let queued = dispatch
                            .send(Dispatch { command, reply: outbound.clone() })
                            .await;
                        if queued.is_err() {
                            break Disconnect::HandlerStopped;
                        }
                    }
                    Some(Err(status)) => break Disconnect::Receive(status),
                    None => break Disconnect::Closed,
                },
                _ = &mut failed_rx => break Disconnect::HeartbeatFailed,
            }
        };

        let _ = lost.send(());
        let _ = heartbeats.await;
        disconnect
    }
}
