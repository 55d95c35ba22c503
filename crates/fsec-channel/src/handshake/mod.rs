//! E2EE handshake engine.
//!
//! Three-round exchange: `init` (client) → `resp` (server) → `ack` (client),
//! after which the server emits a `ping seq=1` record as its finished
//! signal.  The server caches per-init state keyed by a fingerprint of the
//! raw init payload, so a retried init deterministically yields the
//! byte-identical resp (same ephemeral, same nonce_s, same handshake_id).
//!
//! All identity is folded into the transcript hash; the PSK is the only
//! long-lived secret.  Any divergence between the two sides' view of the
//! session context surfaces as an auth-tag mismatch on the server.

mod cache;
mod client;
mod server;

use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use fsec_crypto::CryptoError;
use fsec_crypto::{Direction, SessionKeys, Suite};
use fsec_wire::frame::{FrameError, HandshakeFrame, HandshakeType, decode_handshake, encode_handshake};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::transport::{Message, Transport, TransportError};

pub use cache::HandshakeCache;
pub use client::{ClientConfig, client_handshake};
pub use server::{ResolveChannel, ResolveRequest, SecretSource, ServerConfig, server_handshake};

/// Per-channel long-lived secrets, either configured statically or produced
/// by a resolver for the incoming init.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ChannelSecrets {
    pub psk: [u8; 32],
    /// Unix seconds after which new handshakes for this channel are refused.
    #[zeroize(skip)]
    pub init_exp: u64,
}

/// Output of a completed handshake: everything the record layer needs.
pub struct Established {
    pub suite: Suite,
    pub transcript_hash: [u8; 32],
    pub keys: SessionKeys,
    /// The direction this side sends on (`c2s` for the client).
    pub send_dir: Direction,
    pub peer_features: u32,
}

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("frame: {0}")]
    Frame(#[from] FrameError),
    #[error("payload JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unexpected {got:?} frame, expected {expected}")]
    UnexpectedMessage { expected: &'static str, got: HandshakeType },
    #[error("text message during handshake")]
    UnexpectedText,
    #[error("unsupported protocol version {0}")]
    VersionMismatch(u8),
    #[error("init role must be \"client\", got {0:?}")]
    RoleMismatch(String),
    #[error("empty channel_id")]
    EmptyChannelId,
    #[error("channel_id mismatch: expected {expected:?}, got {got:?}")]
    ChannelMismatch { expected: String, got: String },
    #[error("unsupported suite {0}")]
    UnsupportedSuite(u16),
    #[error("invalid {0} field")]
    InvalidField(&'static str),
    #[error("auth tag mismatch")]
    AuthTagMismatch,
    #[error("ack timestamp {timestamp} outside allowed skew of now {now}")]
    TimestampOutOfSkew { now: u64, timestamp: u64 },
    #[error("ack timestamp {timestamp} after init_exp {init_exp}")]
    TimestampAfterInitExp { timestamp: u64, init_exp: u64 },
    #[error("handshake_id mismatch")]
    HandshakeIdMismatch,
    #[error("retried init does not match the original")]
    InitReplayMismatch,
    #[error("too many pending handshakes")]
    TooManyPendingHandshakes,
    #[error("channel resolver failed: {0}")]
    ResolveFailed(String),
    #[error("crypto: {0}")]
    Crypto(#[from] CryptoError),
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error("handshake timed out")]
    Timeout,
    #[error("handshake canceled")]
    Canceled,
}

pub(crate) fn now_unix_s() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock after epoch")
        .as_secs()
}

/// Read one handshake frame, honoring cancellation.  Text messages are a
/// protocol violation at this stage.
pub(crate) async fn recv_frame<T: Transport>(
    transport: &mut T,
    cancel: &CancellationToken,
    max_payload: usize,
) -> Result<HandshakeFrame, HandshakeError> {
    let msg = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(HandshakeError::Canceled),
        msg = transport.read_message() => msg.map_err(map_transport)?,
    };
    match msg {
        Message::Binary(bytes) => Ok(decode_handshake(&bytes, max_payload)?),
        Message::Text(_) => Err(HandshakeError::UnexpectedText),
    }
}

pub(crate) async fn send_frame<T: Transport>(
    transport: &mut T,
    cancel: &CancellationToken,
    typ: HandshakeType,
    payload: &[u8],
) -> Result<(), HandshakeError> {
    let frame = encode_handshake(typ, payload);
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(HandshakeError::Canceled),
        result = transport.write_message(Message::Binary(frame)) => {
            result.map_err(map_transport)
        }
    }
}

/// A cancelled scope reports cancellation, never the underlying I/O error.
fn map_transport(e: TransportError) -> HandshakeError {
    match e {
        TransportError::Canceled => HandshakeError::Canceled,
        other => HandshakeError::Transport(other),
    }
}
