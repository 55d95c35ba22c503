//! Frozen v1 JSON shapes carried inside handshake frames, JSON frames, and
//! the tunnel attach prelude.
//!
//! Binary fields are base64url without padding (see [`crate::b64u`]) and
//! keep the `_b64u` suffix on the wire.  Receivers ignore unknown fields;
//! senders never emit extra ones.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Handshake messages
// ---------------------------------------------------------------------------

/// Client → server opener.  `role` is always `"client"`; the server rejects
/// anything else before touching the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct E2eeInit {
    pub channel_id: String,
    pub role: String,
    pub version: u8,
    pub suite: u16,
    pub client_eph_pub_b64u: String,
    /// 32 bytes.
    pub nonce_c_b64u: String,
    pub client_features: u32,
}

/// Server → client response.  Deterministic for a given init fingerprint:
/// a retried init yields the byte-identical resp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct E2eeResp {
    pub handshake_id: String,
    pub server_eph_pub_b64u: String,
    /// 32 bytes.
    pub nonce_s_b64u: String,
    pub server_features: u32,
}

/// Client → server confirmation binding the transcript and a fresh timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct E2eeAck {
    pub handshake_id: String,
    pub timestamp_unix_s: u64,
    /// 32 bytes, HMAC-SHA-256 over `transcript_hash || timestamp`.
    pub auth_tag_b64u: String,
}

// ---------------------------------------------------------------------------
// Tunnel attach
// ---------------------------------------------------------------------------

/// Endpoint role within a channel.  Exactly one of each attaches per channel
/// in the tunnel topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointRole {
    Client,
    Server,
}

impl EndpointRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
        }
    }
}

impl std::fmt::Display for EndpointRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The plaintext tunnel prelude: one **text** WebSocket message sent before
/// any binary frame, pairing the two endpoints at the rendezvous and burning
/// the one-time token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attach {
    pub v: u8,
    pub channel_id: String,
    pub role: EndpointRole,
    pub token: String,
    pub endpoint_instance_id: String,
}

/// Stable close-frame reason tokens emitted by the rendezvous on attach
/// rejection.  A handshake-stage read that observes one of these must be
/// classified as an attach error with that exact code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachReason {
    TooManyConnections,
    ExpectedAttach,
    InvalidAttach,
    InvalidToken,
    ChannelMismatch,
    InitExpMismatch,
    IdleTimeoutMismatch,
    RoleMismatch,
    TokenReplay,
    ReplaceRateLimited,
    AttachFailed,
    Timeout,
    Canceled,
}

impl AttachReason {
    pub const ALL: [AttachReason; 13] = [
        Self::TooManyConnections,
        Self::ExpectedAttach,
        Self::InvalidAttach,
        Self::InvalidToken,
        Self::ChannelMismatch,
        Self::InitExpMismatch,
        Self::IdleTimeoutMismatch,
        Self::RoleMismatch,
        Self::TokenReplay,
        Self::ReplaceRateLimited,
        Self::AttachFailed,
        Self::Timeout,
        Self::Canceled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TooManyConnections => "too_many_connections",
            Self::ExpectedAttach => "expected_attach",
            Self::InvalidAttach => "invalid_attach",
            Self::InvalidToken => "invalid_token",
            Self::ChannelMismatch => "channel_mismatch",
            Self::InitExpMismatch => "init_exp_mismatch",
            Self::IdleTimeoutMismatch => "idle_timeout_mismatch",
            Self::RoleMismatch => "role_mismatch",
            Self::TokenReplay => "token_replay",
            Self::ReplaceRateLimited => "replace_rate_limited",
            Self::AttachFailed => "attach_failed",
            Self::Timeout => "timeout",
            Self::Canceled => "canceled",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.as_str() == token)
    }
}

impl std::fmt::Display for AttachReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Stream hello
// ---------------------------------------------------------------------------

/// Typed preface on every substream, written as one JSON frame before any
/// application bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamHello {
    pub kind: String,
    pub v: u8,
}

impl StreamHello {
    /// Substream kind reserved for the RPC runtime.
    pub const RPC_KIND: &'static str = "rpc";

    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into(), v: 1 }
    }
}

// ---------------------------------------------------------------------------
// RPC frames
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: u64,
    pub type_id: u32,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: u64,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorBody>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcErrorBody {
    pub code: u32,
    pub message: String,
}
