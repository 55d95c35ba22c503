//! Direct-path server orchestration.
//!
//! The HTTP upgrade itself belongs to the embedding server (axum in the
//! reference integration); this module supplies the pieces that sit behind
//! it: an axum `WebSocket` transport adapter, the origin gate, and
//! `accept_direct`, which drives one upgraded socket to an established
//! session.
//!
//! ```ignore
//! async fn ws_handler(ws: WebSocketUpgrade, headers: HeaderMap) -> Response {
//!     if let Err(e) = policy.check(origin_header(&headers)) {
//!         return (StatusCode::FORBIDDEN, e.to_string()).into_response();
//!     }
//!     ws.max_message_size(read_limit).on_upgrade(move |socket| async move {
//!         let transport = AxumWsTransport::new(socket);
//!         let _ = accept_direct(transport, &cache, config, registry, &cancel).await;
//!     })
//! }
//! ```

use std::time::Duration;

use axum::extract::ws::{Message as AxMessage, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;

use fsec_channel::{
    HandshakeCache, Message, RecordConfig, SecretSource, ServerConfig, Transport, TransportError,
    TransportReader, TransportWriter, server_handshake,
};
use fsec_crypto::Suite;
use fsec_wire::EndpointRole;

use crate::dispatch::StreamRegistry;
use crate::error::{Error, Path};
use crate::session::{AssembleParams, Session, assemble_session};

// ---------------------------------------------------------------------------
// Accept configuration
// ---------------------------------------------------------------------------

pub struct AcceptConfig {
    /// Static secrets for single-channel servers, or a resolver for
    /// multi-channel ones.
    pub secrets: SecretSource,
    pub expected_channel_id: Option<String>,
    pub allowed_suites: Vec<Suite>,
    pub features: u32,
    pub clock_skew: Duration,
    pub handshake_timeout: Option<Duration>,
    /// Direct sessions default to no keepalive; set one to opt in.
    pub keepalive: Option<Duration>,
    pub record: RecordConfig,
    pub max_handshake_payload: usize,
}

impl AcceptConfig {
    pub fn new(secrets: SecretSource) -> Self {
        Self {
            secrets,
            expected_channel_id: None,
            allowed_suites: Suite::ALL.to_vec(),
            features: 0,
            clock_skew: Duration::from_secs(30),
            handshake_timeout: Some(Duration::from_secs(30)),
            keepalive: None,
            record: RecordConfig::default(),
            max_handshake_payload: fsec_wire::DEFAULT_MAX_HANDSHAKE_PAYLOAD,
        }
    }
}

/// Drive one upgraded transport to an established direct-path session:
/// server handshake (against the shared init cache), mux in server mode,
/// dispatch loop.
pub async fn accept_direct<T: Transport>(
    mut transport: T,
    cache: &HandshakeCache,
    config: AcceptConfig,
    registry: StreamRegistry,
    cancel: &CancellationToken,
) -> Result<Session, Error> {
    let path = Path::Direct;
    let server_config = ServerConfig {
        expected_channel_id: config.expected_channel_id,
        allowed_suites: config.allowed_suites,
        features: config.features,
        clock_skew: config.clock_skew,
        secrets: config.secrets,
        max_handshake_payload: config.max_handshake_payload,
        timeout: config.handshake_timeout,
    };
    let established = server_handshake(&mut transport, cache, &server_config, cancel)
        .await
        .map_err(|e| Error::from_handshake(path, e))?;

    assemble_session(
        transport,
        &established,
        AssembleParams {
            path,
            role: EndpointRole::Server,
            endpoint_instance_id: None,
            keepalive: config.keepalive,
            record: config.record,
        },
        registry,
        cancel,
    )
    .await
}

// ---------------------------------------------------------------------------
// axum WebSocket transport
// ---------------------------------------------------------------------------

/// [`Transport`] over an upgraded axum `WebSocket`.
///
/// The embedding route must bound the socket with
/// `WebSocketUpgrade::max_message_size(transport_read_limit(..))` so an
/// oversized message is refused by the carrier.
pub struct AxumWsTransport {
    inner: WebSocket,
    remote: Option<String>,
}

pub struct AxumWsReader(SplitStream<WebSocket>);

pub struct AxumWsWriter(SplitSink<WebSocket, AxMessage>);

impl AxumWsTransport {
    pub fn new(inner: WebSocket) -> Self {
        Self { inner, remote: None }
    }

    pub fn with_remote_addr(inner: WebSocket, remote: Option<String>) -> Self {
        Self { inner, remote }
    }
}

fn map_incoming(
    item: Option<Result<AxMessage, axum::Error>>,
) -> Option<Result<Message, TransportError>> {
    match item {
        None => Some(Err(TransportError::Closed { code: None, reason: None })),
        Some(Err(e)) => Some(Err(TransportError::Ws(e.to_string()))),
        Some(Ok(AxMessage::Binary(bytes))) => Some(Ok(Message::Binary(bytes.to_vec()))),
        Some(Ok(AxMessage::Text(text))) => Some(Ok(Message::Text(text.as_str().to_owned()))),
        Some(Ok(AxMessage::Close(frame))) => {
            let (code, reason) = match frame {
                Some(frame) => {
                    let reason = frame.reason.as_str();
                    (Some(frame.code), (!reason.is_empty()).then(|| reason.to_owned()))
                }
                None => (None, None),
            };
            Some(Err(TransportError::Closed { code, reason }))
        }
        Some(Ok(AxMessage::Ping(_) | AxMessage::Pong(_))) => None,
    }
}

impl Transport for AxumWsTransport {
    type Reader = AxumWsReader;
    type Writer = AxumWsWriter;

    async fn read_message(&mut self) -> Result<Message, TransportError> {
        loop {
            if let Some(result) = map_incoming(self.inner.recv().await) {
                return result;
            }
        }
    }

    async fn write_message(&mut self, msg: Message) -> Result<(), TransportError> {
        let msg = match msg {
            Message::Binary(bytes) => AxMessage::Binary(bytes.into()),
            Message::Text(text) => AxMessage::Text(text.into()),
        };
        self.inner.send(msg).await.map_err(|e| TransportError::Ws(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inner
            .send(AxMessage::Close(None))
            .await
            .map_err(|e| TransportError::Ws(e.to_string()))
    }

    fn into_split(self) -> (Self::Reader, Self::Writer) {
        let (sink, stream) = self.inner.split();
        (AxumWsReader(stream), AxumWsWriter(sink))
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote.clone()
    }
}

impl TransportReader for AxumWsReader {
    async fn read_message(&mut self) -> Result<Message, TransportError> {
        loop {
            if let Some(result) = map_incoming(self.0.next().await) {
                return result;
            }
        }
    }
}

impl TransportWriter for AxumWsWriter {
    async fn write_message(&mut self, msg: Message) -> Result<(), TransportError> {
        let msg = match msg {
            Message::Binary(bytes) => AxMessage::Binary(bytes.into()),
            Message::Text(text) => AxMessage::Text(text.into()),
        };
        self.0.send(msg).await.map_err(|e| TransportError::Ws(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.0.send(AxMessage::Close(None)).await {
            Ok(()) => Ok(()),
            // The peer may already be gone; closing an already-closed
            // socket is a successful close.
            Err(_) => Ok(()),
        }
    }
}
