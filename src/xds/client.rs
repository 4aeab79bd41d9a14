//! Discovery client: connection lifecycle and the protocol loop.
//!
//! # Responsibilities
//! - Keep one aggregated discovery stream open, reconnecting with backoff
//! - Hand each response to the resource handler and ACK or NACK it
//! - Expose the connection state and an idempotent stop
//!
//! # Data Flow
//! ```text
//! Disconnected ─start→ Connecting ─stream open→ Connected
//!       ▲                   │                      │ stream ended / error
//!       │                   └──────failure─────────┤
//!       │                                          ▼
//!       │                         Reconnecting ─backoff→ Connecting
//!  stop() from any state → Stopped (terminal)
//! ```
//!
//! # Design Decisions
//! - Transport errors are never fatal; the loop only exits on stop
//! - Backoff resets after every successful connect
//! - Stopped is sticky: late state updates from the loop cannot overwrite it

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

use crate::config::validation::{validate_discovery, ValidationError};
use crate::config::DiscoveryConfig;
use crate::lifecycle::{Shutdown, ShutdownListener};
use crate::observability::metrics;
use crate::resilience::ReconnectManager;
use crate::xds::handler::ResourceHandler;
use crate::xds::proto::{DiscoveryResponse, POLICY_CHAIN_TYPE_URL};
use crate::xds::session::SubscriptionState;
use crate::xds::transport::{DiscoveryStream, DiscoveryTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ClientState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Reconnecting = 3,
    Stopped = 4,
}

impl ClientState {
    pub fn as_str(self) -> &'static str {
        match self {
            ClientState::Disconnected => "disconnected",
            ClientState::Connecting => "connecting",
            ClientState::Connected => "connected",
            ClientState::Reconnecting => "reconnecting",
            ClientState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("invalid discovery configuration: {}", format_errors(.0))]
    InvalidConfig(Vec<ValidationError>),

    #[error("discovery client already started")]
    AlreadyStarted,

    #[error("discovery client stopped")]
    Stopped,
}

fn format_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Why a stream ended.
enum StreamEnd {
    Shutdown,
    Lost,
}

/// Long-running client for the policy configuration subscription.
pub struct DiscoveryClient {
    config: DiscoveryConfig,
    transport: Arc<dyn DiscoveryTransport>,
    handler: ResourceHandler,
    state: Arc<watch::Sender<ClientState>>,
    done: Arc<watch::Sender<bool>>,
    shutdown: Shutdown,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl DiscoveryClient {
    /// Create a client. Fails before any connection attempt if the
    /// configuration is invalid.
    pub fn new(
        config: DiscoveryConfig,
        transport: Arc<dyn DiscoveryTransport>,
        handler: ResourceHandler,
    ) -> Result<Self, DiscoveryError> {
        validate_discovery(&config).map_err(DiscoveryError::InvalidConfig)?;

        let (state, _) = watch::channel(ClientState::Disconnected);
        let (done, _) = watch::channel(false);
        Ok(Self {
            config,
            transport,
            handler,
            state: Arc::new(state),
            done: Arc::new(done),
            shutdown: Shutdown::new(),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> ClientState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ClientState> {
        self.state.subscribe()
    }

    /// Spawn the discovery loop. Allowed once, and not after `stop`.
    pub fn start(&self) -> Result<(), DiscoveryError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(DiscoveryError::Stopped);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(DiscoveryError::AlreadyStarted);
        }

        tracing::info!(
            server = %self.config.server_address,
            node_id = %self.config.node_id,
            "Starting discovery client"
        );

        let worker = Worker {
            session: SubscriptionState::new(
                self.config.node_id.clone(),
                self.config.cluster.clone(),
                POLICY_CHAIN_TYPE_URL,
            ),
            backoff: ReconnectManager::new(
                self.config.initial_reconnect_delay(),
                self.config.max_reconnect_delay(),
            )
            .with_jitter(self.config.reconnect_jitter),
            transport: Arc::clone(&self.transport),
            handler: self.handler.clone(),
            state: Arc::clone(&self.state),
            shutdown: self.shutdown.subscribe(),
        };
        let done = Arc::clone(&self.done);

        tokio::spawn(async move {
            worker.run().await;
            done.send_replace(true);
        });
        Ok(())
    }

    /// Stop the client. Safe to call any number of times from any task.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Stopping discovery client");
        set_state(&self.state, ClientState::Stopped);
        self.shutdown.trigger();

        // Never started: nothing to wait for.
        if !self.started.load(Ordering::SeqCst) {
            self.done.send_replace(true);
        }
    }

    /// Resolve once the client has fully stopped.
    pub async fn wait(&self) {
        let mut done = self.done.subscribe();
        let _ = done.wait_for(|done| *done).await;
    }
}

impl std::fmt::Debug for DiscoveryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryClient")
            .field("server", &self.config.server_address)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for DiscoveryClient {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Move to `next` unless already stopped.
fn set_state(state: &watch::Sender<ClientState>, next: ClientState) {
    let changed = state.send_if_modified(|current| {
        if *current == ClientState::Stopped || *current == next {
            return false;
        }
        *current = next;
        true
    });
    if changed {
        tracing::debug!(state = %next, "Discovery client state changed");
        metrics::record_client_state(next as u8);
    }
}

/// State owned by the spawned loop.
struct Worker {
    session: SubscriptionState,
    backoff: ReconnectManager,
    transport: Arc<dyn DiscoveryTransport>,
    handler: ResourceHandler,
    state: Arc<watch::Sender<ClientState>>,
    shutdown: ShutdownListener,
}

impl Worker {
    async fn run(mut self) {
        while !self.shutdown.is_triggered() {
            set_state(&self.state, ClientState::Connecting);
            self.session.reset_stream();
            let initial = self.session.initial_request();

            let connected = tokio::select! {
                _ = self.shutdown.recv() => break,
                result = self.transport.connect(initial) => result,
            };

            match connected {
                Ok(stream) => {
                    metrics::record_connect_attempt("success");
                    set_state(&self.state, ClientState::Connected);
                    self.backoff.reset();
                    tracing::info!(version = %self.session.version_info(), "Discovery stream established");

                    if let StreamEnd::Shutdown = self.run_stream(stream).await {
                        break;
                    }
                }
                Err(e) => {
                    metrics::record_connect_attempt("failure");
                    tracing::warn!(error = %e, attempt = self.backoff.attempt(), "Failed to connect to discovery server");
                }
            }

            set_state(&self.state, ClientState::Reconnecting);
            if !self.backoff.wait(&mut self.shutdown).await {
                break;
            }
        }

        set_state(&self.state, ClientState::Stopped);
        tracing::info!("Discovery client stopped");
    }

    async fn run_stream(&mut self, mut stream: DiscoveryStream) -> StreamEnd {
        loop {
            let received = tokio::select! {
                _ = self.shutdown.recv() => return StreamEnd::Shutdown,
                received = stream.recv() => received,
            };

            let response = match received {
                Some(Ok(response)) => response,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Discovery stream error");
                    return StreamEnd::Lost;
                }
                None => {
                    tracing::warn!("Discovery stream closed by server");
                    return StreamEnd::Lost;
                }
            };

            let reply = self.process(response);
            if let Err(e) = stream.send(reply).await {
                tracing::warn!(error = %e, "Failed to send discovery reply");
                return StreamEnd::Lost;
            }
        }
    }

    /// Apply one response and build the ACK or NACK for it.
    fn process(&mut self, response: DiscoveryResponse) -> crate::xds::proto::DiscoveryRequest {
        let DiscoveryResponse {
            version_info,
            resources,
            type_url,
            nonce,
        } = response;

        tracing::debug!(
            version = %version_info,
            nonce = %nonce,
            resources = resources.len(),
            "Received discovery response"
        );

        match self.handler.handle_resources(&type_url, &resources) {
            Ok(summary) => {
                metrics::record_discovery_update("ack");
                tracing::info!(
                    version = %version_info,
                    nonce = %nonce,
                    routes_applied = summary.routes_applied,
                    routes_skipped = summary.routes_skipped.len(),
                    "Accepted discovery update"
                );
                self.session.accept(&version_info, &nonce)
            }
            Err(e) => {
                metrics::record_discovery_update("nack");
                tracing::error!(
                    version = %version_info,
                    nonce = %nonce,
                    kept_version = %self.session.version_info(),
                    error = %e,
                    "Rejected discovery update"
                );
                self.session.reject(&nonce, e.to_string())
            }
        }
    }
}
