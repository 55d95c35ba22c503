//! Binary transport abstraction.
//!
//! A duplex, message-oriented pipe of binary (and, for the attach prelude,
//! text) payloads with `close`.  Handshakes drive the combined trait
//! sequentially; the record layer splits it into reader and writer halves
//! so its receive and write loops can run as independent tasks.
//!
//! A peer close surfaces as [`TransportError::Closed`] carrying the close
//! code and reason string, so tunnel attach rejection tokens survive to the
//! classification layer.

pub mod mem;
pub mod ws;

use std::future::Future;

use thiserror::Error;

pub use mem::{MemTransport, mem_pair};
pub use ws::{WsReader, WsTransport, WsWriter};

/// One transport message.  Text is legal only for the tunnel attach prelude;
/// the record layer terminates the session on any text message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Binary(Vec<u8>),
    Text(String),
}

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The peer closed the connection.  `reason` carries the close-frame
    /// reason string, which in the tunnel topology may be an attach
    /// rejection token.
    #[error("connection closed{}", close_suffix(.code, .reason))]
    Closed { code: Option<u16>, reason: Option<String> },
    #[error("websocket error: {0}")]
    Ws(String),
    #[error("i/o error: {0}")]
    Io(String),
    #[error("operation canceled")]
    Canceled,
}

fn close_suffix(code: &Option<u16>, reason: &Option<String>) -> String {
    match (code, reason) {
        (Some(code), Some(reason)) => format!(" (code {code}, reason {reason:?})"),
        (Some(code), None) => format!(" (code {code})"),
        (None, Some(reason)) => format!(" (reason {reason:?})"),
        (None, None) => String::new(),
    }
}

impl TransportError {
    /// The close reason string, if the peer closed with one.
    pub fn close_reason(&self) -> Option<&str> {
        match self {
            Self::Closed { reason: Some(reason), .. } => Some(reason.as_str()),
            _ => None,
        }
    }
}

/// Read half of a split transport, owned by the record receive loop.
pub trait TransportReader: Send + 'static {
    fn read_message(&mut self) -> impl Future<Output = Result<Message, TransportError>> + Send;
}

/// Write half of a split transport, owned by the record write loop.
pub trait TransportWriter: Send + 'static {
    fn write_message(&mut self, msg: Message) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn close(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// A full-duplex message transport.
///
/// Handshake code reads and writes through `&mut self`; once keys are
/// established the transport is torn into halves with [`Transport::into_split`]
/// and handed to the record layer's tasks.
pub trait Transport: Send + Sized + 'static {
    type Reader: TransportReader;
    type Writer: TransportWriter;

    fn read_message(&mut self) -> impl Future<Output = Result<Message, TransportError>> + Send;

    fn write_message(&mut self, msg: Message) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn close(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn into_split(self) -> (Self::Reader, Self::Writer);

    /// Local endpoint description, if the carrier knows one (e.g. a socket
    /// address).
    fn local_addr(&self) -> Option<String> {
        None
    }

    fn remote_addr(&self) -> Option<String> {
        None
    }
}
