//! WebSocket binary transport over tokio-tungstenite.
//!
//! Wraps a `WebSocketStream` (client dial or server accept) as a
//! [`Transport`].  Control frames are handled inline: pings are answered by
//! the protocol layer, pongs are skipped.  A close frame surfaces as
//! [`TransportError::Closed`] with its code and reason so attach rejection
//! tokens reach the classifier.
//!
//! The caller configures the carrier's `max_message_size` at connect/accept
//! time (see `fsec_wire::transport_read_limit`), so an oversized message is
//! rejected before it is ever buffered whole.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::protocol::Message as TMessage;

use super::{Message, Transport, TransportError, TransportReader, TransportWriter};

pub struct WsTransport<S> {
    inner: WebSocketStream<S>,
    local: Option<String>,
    remote: Option<String>,
}

pub struct WsReader<S>(SplitStream<WebSocketStream<S>>);

pub struct WsWriter<S>(SplitSink<WebSocketStream<S>, TMessage>);

impl<S> WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(inner: WebSocketStream<S>) -> Self {
        Self { inner, local: None, remote: None }
    }

    pub fn with_addrs(
        inner: WebSocketStream<S>,
        local: Option<String>,
        remote: Option<String>,
    ) -> Self {
        Self { inner, local, remote }
    }
}

/// Map one incoming tungstenite item.  `None` means "skip and read again"
/// (ping/pong/raw frames).
fn map_incoming(
    item: Option<Result<TMessage, tokio_tungstenite::tungstenite::Error>>,
) -> Option<Result<Message, TransportError>> {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match item {
        None => Some(Err(TransportError::Closed { code: None, reason: None })),
        Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
            Some(Err(TransportError::Closed { code: None, reason: None }))
        }
        Some(Err(e)) => Some(Err(TransportError::Ws(e.to_string()))),
        Some(Ok(TMessage::Binary(bytes))) => Some(Ok(Message::Binary(bytes.to_vec()))),
        Some(Ok(TMessage::Text(text))) => Some(Ok(Message::Text(text.as_str().to_owned()))),
        Some(Ok(TMessage::Close(frame))) => {
            let (code, reason) = match frame {
                Some(frame) => {
                    let reason = frame.reason.as_str();
                    (
                        Some(u16::from(frame.code)),
                        (!reason.is_empty()).then(|| reason.to_owned()),
                    )
                }
                None => (None, None),
            };
            Some(Err(TransportError::Closed { code, reason }))
        }
        // Pings are answered by tungstenite itself; pongs and raw frames
        // carry nothing for us.
        Some(Ok(TMessage::Ping(_) | TMessage::Pong(_) | TMessage::Frame(_))) => None,
    }
}

fn map_outgoing(msg: Message) -> TMessage {
    match msg {
        Message::Binary(bytes) => TMessage::Binary(bytes.into()),
        Message::Text(text) => TMessage::Text(text.into()),
    }
}

fn map_ws_error(e: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match e {
        WsError::ConnectionClosed | WsError::AlreadyClosed => {
            TransportError::Closed { code: None, reason: None }
        }
        other => TransportError::Ws(other.to_string()),
    }
}

impl<S> Transport for WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Reader = WsReader<S>;
    type Writer = WsWriter<S>;

    async fn read_message(&mut self) -> Result<Message, TransportError> {
        loop {
            if let Some(result) = map_incoming(self.inner.next().await) {
                return result;
            }
        }
    }

    async fn write_message(&mut self, msg: Message) -> Result<(), TransportError> {
        self.inner.send(map_outgoing(msg)).await.map_err(map_ws_error)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.inner.close(None).await {
            Ok(()) => Ok(()),
            Err(e) => match map_ws_error(e) {
                // Already closed is a successful close.
                TransportError::Closed { .. } => Ok(()),
                other => Err(other),
            },
        }
    }

    fn into_split(self) -> (Self::Reader, Self::Writer) {
        let (sink, stream) = self.inner.split();
        (WsReader(stream), WsWriter(sink))
    }

    fn local_addr(&self) -> Option<String> {
        self.local.clone()
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote.clone()
    }
}

impl<S> TransportReader for WsReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn read_message(&mut self) -> Result<Message, TransportError> {
        loop {
            if let Some(result) = map_incoming(self.0.next().await) {
                return result;
            }
        }
    }
}

impl<S> TransportWriter for WsWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn write_message(&mut self, msg: Message) -> Result<(), TransportError> {
        self.0.send(map_outgoing(msg)).await.map_err(map_ws_error)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.0.send(TMessage::Close(None)).await {
            Ok(()) => Ok(()),
            Err(e) => match map_ws_error(e) {
                TransportError::Closed { .. } => Ok(()),
                other => Err(other),
            },
        }
    }
}
