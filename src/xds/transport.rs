//! Discovery stream transport.
//!
//! # Responsibilities
//! - Open one bidirectional aggregated discovery stream per call
//! - Bound connection setup by the configured timeouts
//! - Load TLS material for secure connections
//!
//! # Design Decisions
//! - The client only sees `DiscoveryTransport`, so the protocol loop can be
//!   driven by an in-process server in tests
//! - A stream is a sender plus a boxed receiver; dropping it closes the stream

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};

use crate::config::{DiscoveryConfig, TlsConfig};
use crate::xds::proto::{DiscoveryRequest, DiscoveryResponse, ADS_METHOD_PATH};

/// Outbound requests buffered per stream.
const OUTBOUND_BUFFER: usize = 16;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("invalid server address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("failed to load TLS material: {0}")]
    Tls(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("stream error: {0}")]
    Stream(String),

    #[error("stream closed")]
    Closed,
}

/// An open discovery stream.
pub struct DiscoveryStream {
    pub outbound: mpsc::Sender<DiscoveryRequest>,
    pub inbound: BoxStream<'static, Result<DiscoveryResponse, TransportError>>,
}

impl DiscoveryStream {
    pub async fn send(&mut self, request: DiscoveryRequest) -> Result<(), TransportError> {
        self.outbound.send(request).await.map_err(|_| TransportError::Closed)
    }

    /// Next response. `None` means the server ended the stream.
    pub async fn recv(&mut self) -> Option<Result<DiscoveryResponse, TransportError>> {
        self.inbound.next().await
    }
}

impl std::fmt::Debug for DiscoveryStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryStream")
            .field("outbound_closed", &self.outbound.is_closed())
            .finish()
    }
}

/// Opens discovery streams.
#[async_trait]
pub trait DiscoveryTransport: Send + Sync + 'static {
    /// Open a stream and send `initial` as its first request.
    async fn connect(&self, initial: DiscoveryRequest) -> Result<DiscoveryStream, TransportError>;
}

/// gRPC transport speaking the aggregated discovery service.
#[derive(Debug, Clone)]
pub struct GrpcTransport {
    address: String,
    connect_timeout: Duration,
    request_timeout: Duration,
    tls: Option<TlsConfig>,
}

impl GrpcTransport {
    pub fn new(config: &DiscoveryConfig) -> Self {
        Self {
            address: config.server_address.clone(),
            connect_timeout: config.connect_timeout(),
            request_timeout: config.request_timeout(),
            tls: config.tls.clone(),
        }
    }

    fn endpoint(&self) -> Result<Endpoint, TransportError> {
        let endpoint = Endpoint::from_shared(self.address.clone())
            .map_err(|e| TransportError::InvalidAddress {
                address: self.address.clone(),
                reason: e.to_string(),
            })?
            .connect_timeout(self.connect_timeout)
            .tcp_nodelay(true);

        match &self.tls {
            Some(tls) => endpoint
                .tls_config(load_tls(tls)?)
                .map_err(|e| TransportError::Tls(e.to_string())),
            None => Ok(endpoint),
        }
    }

    async fn channel(&self) -> Result<Channel, TransportError> {
        let endpoint = self.endpoint()?;
        tokio::time::timeout(self.connect_timeout, endpoint.connect())
            .await
            .map_err(|_| TransportError::Timeout {
                operation: "connect",
                timeout: self.connect_timeout,
            })?
            .map_err(|e| TransportError::Connect(e.to_string()))
    }
}

#[async_trait]
impl DiscoveryTransport for GrpcTransport {
    async fn connect(&self, initial: DiscoveryRequest) -> Result<DiscoveryStream, TransportError> {
        let channel = self.channel().await?;
        tracing::debug!(address = %self.address, "Discovery channel established");

        let mut grpc = tonic::client::Grpc::new(channel);
        grpc.ready()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        tx.send(initial).await.map_err(|_| TransportError::Closed)?;

        let path = PathAndQuery::from_static(ADS_METHOD_PATH);
        let codec: ProstCodec<DiscoveryRequest, DiscoveryResponse> = ProstCodec::default();
        let response = tokio::time::timeout(
            self.request_timeout,
            grpc.streaming(tonic::Request::new(ReceiverStream::new(rx)), path, codec),
        )
        .await
        .map_err(|_| TransportError::Timeout {
            operation: "open stream",
            timeout: self.request_timeout,
        })?
        .map_err(|status| TransportError::Stream(status.to_string()))?;

        let inbound = response
            .into_inner()
            .map(|item| item.map_err(|status| TransportError::Stream(status.to_string())))
            .boxed();

        Ok(DiscoveryStream { outbound: tx, inbound })
    }
}

fn load_tls(tls: &TlsConfig) -> Result<ClientTlsConfig, TransportError> {
    let read = |path: &str| {
        std::fs::read(path).map_err(|e| TransportError::Tls(format!("{}: {}", path, e)))
    };

    let mut config = ClientTlsConfig::new();
    if let Some(ca_path) = &tls.ca_path {
        config = config.ca_certificate(Certificate::from_pem(read(ca_path)?));
    }
    if let (Some(cert_path), Some(key_path)) = (&tls.cert_path, &tls.key_path) {
        config = config.identity(Identity::from_pem(read(cert_path)?, read(key_path)?));
    }
    if let Some(server_name) = &tls.server_name {
        config = config.domain_name(server_name.clone());
    }
    Ok(config)
}
