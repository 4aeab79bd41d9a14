//! Shared utilities for integration tests: an in-memory control plane and a
//! handful of sample policies.

#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::StreamExt;
use prost_types::Any;
use serde_json::{json, Value};
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tracing_subscriber::fmt::MakeWriter;

use policy_engine::config::DiscoveryConfig;
use policy_engine::policy::{
    ImmediateResponse, ParameterDefinition, ParameterType, Parameters, PhaseMode, Policy,
    PolicyDefinition, PolicyError, PolicyRegistry, ProcessingMode, RequestAction, RequestContext,
    RequestMutation,
};
use policy_engine::xds::{
    encode_resource, DiscoveryRequest, DiscoveryResponse, DiscoveryStream, DiscoveryTransport,
    TransportError, POLICY_CHAIN_TYPE_URL,
};

/// Server end of one discovery stream.
pub struct ServerStream {
    /// First request the client sent when opening the stream.
    pub initial: DiscoveryRequest,
    requests: mpsc::Receiver<DiscoveryRequest>,
    responses: mpsc::Sender<Result<DiscoveryResponse, TransportError>>,
}

impl ServerStream {
    pub async fn push(&self, response: DiscoveryResponse) {
        self.responses
            .send(Ok(response))
            .await
            .expect("client dropped the stream");
    }

    /// Fail the stream with a transport error.
    pub async fn fail(&self, message: &str) {
        let _ = self
            .responses
            .send(Err(TransportError::Stream(message.to_string())))
            .await;
    }

    /// Next ACK or NACK from the client.
    pub async fn next_request(&mut self) -> DiscoveryRequest {
        tokio::time::timeout(Duration::from_secs(5), self.requests.recv())
            .await
            .expect("timed out waiting for client request")
            .expect("client closed the stream")
    }

    /// Resolve once the client has dropped its end.
    pub async fn closed(&mut self) {
        while self.requests.recv().await.is_some() {}
    }
}

/// Discovery transport backed by channels. Every successful `connect`
/// hands a `ServerStream` to the test.
pub struct MockControlPlane {
    streams: mpsc::UnboundedSender<ServerStream>,
    failures_left: AtomicU32,
    connects: AtomicU32,
}

impl MockControlPlane {
    pub fn new() -> (Arc<Self>, StreamAcceptor) {
        let (tx, rx) = mpsc::unbounded_channel();
        let plane = Arc::new(Self {
            streams: tx,
            failures_left: AtomicU32::new(0),
            connects: AtomicU32::new(0),
        });
        (plane, StreamAcceptor { rx: Mutex::new(rx) })
    }

    /// Refuse the next `n` connection attempts.
    pub fn fail_next(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn connect_attempts(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DiscoveryTransport for MockControlPlane {
    async fn connect(&self, initial: DiscoveryRequest) -> Result<DiscoveryStream, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Connect("connection refused".to_string()));
        }

        let (request_tx, request_rx) = mpsc::channel(16);
        let (response_tx, response_rx) = mpsc::channel(16);
        self.streams
            .send(ServerStream {
                initial,
                requests: request_rx,
                responses: response_tx,
            })
            .map_err(|_| TransportError::Closed)?;

        Ok(DiscoveryStream {
            outbound: request_tx,
            inbound: ReceiverStream::new(response_rx).boxed(),
        })
    }
}

/// Receives the server ends of streams the client opens.
pub struct StreamAcceptor {
    rx: Mutex<mpsc::UnboundedReceiver<ServerStream>>,
}

impl StreamAcceptor {
    pub async fn accept(&self) -> ServerStream {
        tokio::time::timeout(Duration::from_secs(120), self.rx.lock().await.recv())
            .await
            .expect("timed out waiting for the client to connect")
            .expect("control plane dropped")
    }
}

pub fn discovery_config() -> DiscoveryConfig {
    DiscoveryConfig {
        server_address: "http://control-plane.test:18000".to_string(),
        node_id: "test-node".to_string(),
        cluster: "test-cluster".to_string(),
        initial_reconnect_delay_ms: 1_000,
        max_reconnect_delay_ms: 60_000,
        ..Default::default()
    }
}

/// Adds a header taken from its parameters.
pub struct SetHeader;

impl Policy for SetHeader {
    fn name(&self) -> &str {
        "set-header"
    }

    fn mode(&self) -> ProcessingMode {
        ProcessingMode::request_headers()
    }

    fn on_request(&self, _ctx: &RequestContext, params: &Parameters) -> RequestAction {
        let name = params.get("name").and_then(Value::as_str).unwrap_or("x-policy");
        let value = params.get("value").and_then(Value::as_str).unwrap_or("1");
        RequestAction::Mutate(RequestMutation::default().set_header(name, value))
    }
}

/// Rejects every request it sees.
pub struct Deny;

impl Policy for Deny {
    fn name(&self) -> &str {
        "deny"
    }

    fn mode(&self) -> ProcessingMode {
        ProcessingMode::request_headers()
    }

    fn on_request(&self, _ctx: &RequestContext, params: &Parameters) -> RequestAction {
        let status = params.get("status").and_then(Value::as_u64).unwrap_or(403) as u16;
        RequestAction::ImmediateResponse(ImmediateResponse::new(status, "denied"))
    }
}

/// Needs the buffered request body.
pub struct BodyInspect;

impl Policy for BodyInspect {
    fn name(&self) -> &str {
        "body-inspect"
    }

    fn mode(&self) -> ProcessingMode {
        ProcessingMode {
            request_body: PhaseMode::Buffer,
            ..ProcessingMode::request_headers()
        }
    }

    fn validate(&self, params: &Parameters) -> Result<(), PolicyError> {
        match params.get("max_bytes").and_then(Value::as_i64) {
            Some(n) if n <= 0 => Err(PolicyError::InvalidParameter {
                name: "max_bytes".to_string(),
                reason: "must be positive".to_string(),
            }),
            _ => Ok(()),
        }
    }
}

pub fn registry() -> Arc<PolicyRegistry> {
    let registry = PolicyRegistry::builder()
        .register(
            PolicyDefinition::new("set-header", "v1")
                .with_parameter(ParameterDefinition::required("name", ParameterType::String))
                .with_parameter(ParameterDefinition::optional(
                    "value",
                    ParameterType::String,
                    Some(json!("on")),
                )),
            Arc::new(SetHeader),
        )
        .and_then(|b| {
            b.register(
                PolicyDefinition::new("deny", "v1").with_parameter(ParameterDefinition::optional(
                    "status",
                    ParameterType::Integer,
                    Some(json!(403)),
                )),
                Arc::new(Deny),
            )
        })
        .and_then(|b| {
            b.register(
                PolicyDefinition::new("body-inspect", "v1").with_parameter(
                    ParameterDefinition::optional("max_bytes", ParameterType::Integer, None),
                ),
                Arc::new(BodyInspect),
            )
        })
        .expect("sample policies register")
        .build();
    Arc::new(registry)
}

/// One policy configuration resource holding `routes`.
pub fn policy_resource(id: &str, routes: Value) -> Any {
    let document = json!({
        "id": id,
        "version": 1,
        "configuration": {
            "metadata": {"api_name": id, "api_version": "v1", "context": "/"},
            "routes": routes
        }
    });
    encode_resource(document.as_object().cloned().unwrap_or_default())
}

pub fn response(version: &str, nonce: &str, resources: Vec<Any>) -> DiscoveryResponse {
    DiscoveryResponse {
        version_info: version.to_string(),
        resources,
        type_url: POLICY_CHAIN_TYPE_URL.to_string(),
        nonce: nonce.to_string(),
    }
}

/// A resource that fails the outer decode stage.
pub fn malformed_resource() -> Any {
    Any {
        type_url: POLICY_CHAIN_TYPE_URL.to_string(),
        value: vec![0xff, 0xff, 0xff],
    }
}

/// In-memory log sink for `tracing_subscriber::fmt`.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<StdMutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    /// Lines that mention every one of `needles`.
    pub fn lines_with(&self, needles: &[&str]) -> Vec<String> {
        self.contents()
            .lines()
            .filter(|line| needles.iter().all(|n| line.contains(n)))
            .map(str::to_string)
            .collect()
    }

    /// Run `f` with a plain-text subscriber writing into this buffer.
    pub fn capture<T>(&self, f: impl FnOnce() -> T) -> T {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::with_default(subscriber, f)
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
