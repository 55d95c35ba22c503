//! Classified session errors.
//!
//! Every error surfaced to a caller carries `{path, stage, code, cause}`.
//! Codes are stable snake_case strings; the tunnel attach rejection tokens
//! appear verbatim as codes under `stage=attach`.  Cancellation always maps
//! to `canceled` and deadlines to `timeout`, regardless of the underlying
//! I/O error.

use std::sync::Arc;

use fsec_channel::{HandshakeError, SecureError, TransportError};
use fsec_crypto::CryptoError;
use fsec_wire::AttachReason;

/// Which topology the failing operation ran under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Path {
    Auto,
    Direct,
    Tunnel,
}

impl Path {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Direct => "direct",
            Self::Tunnel => "tunnel",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validate,
    Connect,
    Attach,
    Handshake,
    Secure,
    Yamux,
    Rpc,
    Close,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Connect => "connect",
            Self::Attach => "attach",
            Self::Handshake => "handshake",
            Self::Secure => "secure",
            Self::Yamux => "yamux",
            Self::Rpc => "rpc",
            Self::Close => "close",
        }
    }
}

/// Stable error codes.  `Attach` wraps the rendezvous rejection tokens so
/// they round-trip exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Timeout,
    Canceled,
    InvalidInput,
    InvalidOption,
    MissingGrant,
    MissingConnectInfo,
    MissingTunnelUrl,
    MissingWsUrl,
    MissingOrigin,
    MissingChannelId,
    MissingToken,
    MissingInitExp,
    InvalidPsk,
    InvalidSuite,
    InvalidVersion,
    InvalidEndpointInstanceId,
    DialFailed,
    Attach(AttachReason),
    HandshakeFailed,
    AuthTagMismatch,
    TimestampOutOfSkew,
    TimestampAfterInitExp,
    ChannelMismatch,
    RoleMismatch,
    TooManyPendingHandshakes,
    ResolveFailed,
    RandomFailed,
    SecureFailed,
    RecvBufferExceeded,
    RecordBadFlag,
    RecordBadSeq,
    DecryptFailed,
    MuxFailed,
    OpenStreamFailed,
    AcceptStreamFailed,
    StreamHelloFailed,
    MissingStreamKind,
    MissingHandler,
    PingFailed,
    NotConnected,
    RpcFailed,
    UpgradeFailed,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Canceled => "canceled",
            Self::InvalidInput => "invalid_input",
            Self::InvalidOption => "invalid_option",
            Self::MissingGrant => "missing_grant",
            Self::MissingConnectInfo => "missing_connect_info",
            Self::MissingTunnelUrl => "missing_tunnel_url",
            Self::MissingWsUrl => "missing_ws_url",
            Self::MissingOrigin => "missing_origin",
            Self::MissingChannelId => "missing_channel_id",
            Self::MissingToken => "missing_token",
            Self::MissingInitExp => "missing_init_exp",
            Self::InvalidPsk => "invalid_psk",
            Self::InvalidSuite => "invalid_suite",
            Self::InvalidVersion => "invalid_version",
            Self::InvalidEndpointInstanceId => "invalid_endpoint_instance_id",
            Self::DialFailed => "dial_failed",
            Self::Attach(reason) => reason.as_str(),
            Self::HandshakeFailed => "handshake_failed",
            Self::AuthTagMismatch => "auth_tag_mismatch",
            Self::TimestampOutOfSkew => "timestamp_out_of_skew",
            Self::TimestampAfterInitExp => "timestamp_after_init_exp",
            Self::ChannelMismatch => "channel_mismatch",
            Self::RoleMismatch => "role_mismatch",
            Self::TooManyPendingHandshakes => "too_many_pending_handshakes",
            Self::ResolveFailed => "resolve_failed",
            Self::RandomFailed => "random_failed",
            Self::SecureFailed => "secure_failed",
            Self::RecvBufferExceeded => "recv_buffer_exceeded",
            Self::RecordBadFlag => "record_bad_flag",
            Self::RecordBadSeq => "record_bad_seq",
            Self::DecryptFailed => "decrypt_failed",
            Self::MuxFailed => "mux_failed",
            Self::OpenStreamFailed => "open_stream_failed",
            Self::AcceptStreamFailed => "accept_stream_failed",
            Self::StreamHelloFailed => "stream_hello_failed",
            Self::MissingStreamKind => "missing_stream_kind",
            Self::MissingHandler => "missing_handler",
            Self::PingFailed => "ping_failed",
            Self::NotConnected => "not_connected",
            Self::RpcFailed => "rpc_failed",
            Self::UpgradeFailed => "upgrade_failed",
        }
    }
}

/// The one error type callers see.
#[derive(Debug, Clone)]
pub struct Error {
    pub path: Path,
    pub stage: Stage,
    pub code: ErrorCode,
    pub cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    pub fn new(path: Path, stage: Stage, code: ErrorCode) -> Self {
        Self { path, stage, code, cause: None }
    }

    pub fn with_cause(
        mut self,
        cause: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        self.cause = Some(Arc::from(cause.into()));
        self
    }

    /// Classify a handshake failure.  A transport close carrying an attach
    /// rejection token is an attach error with that exact code, never a
    /// generic handshake error.
    pub fn from_handshake(path: Path, err: HandshakeError) -> Self {
        if let HandshakeError::Transport(transport) = &err
            && let Some(reason) = attach_reason(transport)
        {
            return Self::new(path, Stage::Attach, ErrorCode::Attach(reason)).with_cause(err);
        }
        let code = match &err {
            HandshakeError::Canceled => ErrorCode::Canceled,
            HandshakeError::Timeout => ErrorCode::Timeout,
            HandshakeError::AuthTagMismatch => ErrorCode::AuthTagMismatch,
            HandshakeError::TimestampOutOfSkew { .. } => ErrorCode::TimestampOutOfSkew,
            HandshakeError::TimestampAfterInitExp { .. } => ErrorCode::TimestampAfterInitExp,
            HandshakeError::ChannelMismatch { .. } => ErrorCode::ChannelMismatch,
            HandshakeError::RoleMismatch(_) => ErrorCode::RoleMismatch,
            HandshakeError::UnsupportedSuite(_) => ErrorCode::InvalidSuite,
            HandshakeError::VersionMismatch(_) => ErrorCode::InvalidVersion,
            HandshakeError::TooManyPendingHandshakes => ErrorCode::TooManyPendingHandshakes,
            HandshakeError::ResolveFailed(_) => ErrorCode::ResolveFailed,
            HandshakeError::Crypto(CryptoError::RandomFailed) => ErrorCode::RandomFailed,
            _ => ErrorCode::HandshakeFailed,
        };
        match code {
            ErrorCode::Canceled | ErrorCode::Timeout => Self::new(path, Stage::Handshake, code),
            _ => Self::new(path, Stage::Handshake, code).with_cause(err),
        }
    }

    /// Classify a secure-channel failure at the given stage.
    pub fn from_secure(path: Path, stage: Stage, err: SecureError) -> Self {
        let code = match &err {
            SecureError::Canceled => ErrorCode::Canceled,
            SecureError::Timeout => ErrorCode::Timeout,
            SecureError::Closed => ErrorCode::NotConnected,
            SecureError::RecvBufferExceeded => ErrorCode::RecvBufferExceeded,
            SecureError::BadFlag(_) => ErrorCode::RecordBadFlag,
            SecureError::BadSeq { .. } => ErrorCode::RecordBadSeq,
            SecureError::Decrypt { .. } => ErrorCode::DecryptFailed,
            _ => ErrorCode::SecureFailed,
        };
        match code {
            ErrorCode::Canceled | ErrorCode::Timeout => Self::new(path, stage, code),
            _ => Self::new(path, stage, code).with_cause(err),
        }
    }
}

fn attach_reason(err: &TransportError) -> Option<AttachReason> {
    err.close_reason().and_then(AttachReason::from_token)
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "path={} stage={} code={}",
            self.path.as_str(),
            self.stage.as_str(),
            self.code.as_str()
        )?;
        if let Some(cause) = &self.cause {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}
