//! Opening the bidirectional command stream

use crate::error::SessionError;
use crate::proto::dc_streamer_client::DcStreamerClient;
use crate::proto::Envelope;
use async_trait::async_trait;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tracing::debug;

/// Frames arriving from the controller
pub type Inbound = Pin<Box<dyn Stream<Item = Result<Envelope, tonic::Status>> + Send>>;

/// Opens one stream to the controller.
///
/// Everything sent on the channel backing `outbound` is written to the
/// stream in order; the stream ends when that channel's senders are gone.
/// Frames already queued before `open` is called are written first, which
/// lets the caller register without waiting for response headers.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, outbound: mpsc::Receiver<Envelope>) -> Result<Inbound, SessionError>;
}

#[derive(Debug, Clone)]
pub struct GrpcConnector {
    endpoint: String,
    connect_timeout: Duration,
    keepalive: Duration,
}

impl GrpcConnector {
    /// `address` may omit the scheme, in which case plaintext is used
    pub fn new(address: &str, connect_timeout: Duration) -> Self {
        let endpoint = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        };
        Self {
            endpoint,
            connect_timeout,
            keepalive: Duration::from_secs(30),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn invalid(&self, message: impl ToString) -> SessionError {
        SessionError::Endpoint {
            endpoint: self.endpoint.clone(),
            message: message.to_string(),
        }
    }

    async fn channel(&self) -> Result<Channel, SessionError> {
        let mut endpoint = Endpoint::from_shared(self.endpoint.clone())
            .map_err(|e| self.invalid(e))?
            .connect_timeout(self.connect_timeout)
            .tcp_keepalive(Some(self.keepalive))
            .http2_keep_alive_interval(self.keepalive);

        if self.endpoint.starts_with("https://") {
            let url = url::Url::parse(&self.endpoint).map_err(|e| self.invalid(e))?;
            let host = url
                .host_str()
                .ok_or_else(|| self.invalid("no host in endpoint"))?;
            endpoint = endpoint.tls_config(ClientTlsConfig::new().domain_name(host))?;
        }

        debug!(endpoint = %self.endpoint, "Dialing controller");
        Ok(endpoint.connect().await?)
    }
}

#[async_trait]
impl Connector for GrpcConnector {
    async fn open(&self, outbound: mpsc::Receiver<Envelope>) -> Result<Inbound, SessionError> {
        let channel = self.channel().await?;
        let mut client = DcStreamerClient::new(channel);
        let response = client.server_stream(ReceiverStream::new(outbound)).await?;
        Ok(Box::pin(response.into_inner()))
    }
}
