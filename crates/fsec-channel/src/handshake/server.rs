//! Server (responder) side of the handshake.
//!
//! State machine:
//!
//! ```text
//! START → AWAIT_INIT → (init)                           → SENT_RESP
//! SENT_RESP → (duplicate init, matching fingerprint)    → SENT_RESP
//! SENT_RESP → (ack, valid)                              → ESTABLISHED
//! any       → (invalid)                                 → FAILED(code)
//! ```
//!
//! The cache entry is evicted on success and on terminal failure.  On
//! timeout or cancellation it stays under TTL, allowing one last retry from
//! the same client fingerprint.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use fsec_crypto::{
    Direction, EphemeralSecret, NONCE_LEN, ROLE_CLIENT, Suite, TranscriptInputs,
    derive_session_keys, random_bytes, transcript_hash, verify_auth_tag,
};
use fsec_wire::frame::HandshakeType;
use fsec_wire::{E2eeAck, E2eeInit, E2eeResp, b64u};

use super::cache::{CacheEntry, HandshakeCache};
use super::{ChannelSecrets, Established, HandshakeError, now_unix_s, recv_frame, send_frame};
use crate::transport::Transport;

/// Length of the random portion of a handshake id (rendered base64url).
const HANDSHAKE_ID_LEN: usize = 18;

/// Input to a per-channel secret resolver: the validated fields of the
/// client's init.
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    pub channel_id: String,
    pub version: u8,
    pub suite: u16,
    pub client_features: u32,
}

/// Resolves `(psk, init_exp)` for a channel on a multi-channel server.
///
/// Runs inline under the handshake timeout, inside a panic-safe scope: a
/// panic classifies as `resolve_failed`, never as a server crash.
pub trait ResolveChannel: Send + Sync {
    fn resolve(&self, request: &ResolveRequest) -> Result<ChannelSecrets, String>;
}

impl<F> ResolveChannel for F
where
    F: Fn(&ResolveRequest) -> Result<ChannelSecrets, String> + Send + Sync,
{
    fn resolve(&self, request: &ResolveRequest) -> Result<ChannelSecrets, String> {
        self(request)
    }
}

pub enum SecretSource {
    Static(ChannelSecrets),
    Resolver(Arc<dyn ResolveChannel>),
}

pub struct ServerConfig {
    /// When set (tunnel topology, single-channel servers), the init's
    /// channel_id must match exactly.
    pub expected_channel_id: Option<String>,
    pub allowed_suites: Vec<Suite>,
    pub features: u32,
    pub clock_skew: Duration,
    pub secrets: SecretSource,
    pub max_handshake_payload: usize,
    pub timeout: Option<Duration>,
}

pub async fn server_handshake<T: Transport>(
    transport: &mut T,
    cache: &HandshakeCache,
    config: &ServerConfig,
    cancel: &CancellationToken,
) -> Result<Established, HandshakeError> {
    let mut fingerprint = None;
    let result = match config.timeout {
        Some(timeout) => {
            match tokio::time::timeout(timeout, drive(transport, cache, config, cancel, &mut fingerprint))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(HandshakeError::Timeout),
            }
        }
        None => drive(transport, cache, config, cancel, &mut fingerprint).await,
    };
    // Evict on success or terminal failure; keep under TTL on deadline or
    // cancellation so the same client fingerprint can retry once more.
    if let Some(fp) = fingerprint {
        match &result {
            Err(HandshakeError::Timeout | HandshakeError::Canceled) => {}
            _ => cache.remove(&fp),
        }
    }
    result
}

async fn drive<T: Transport>(
    transport: &mut T,
    cache: &HandshakeCache,
    config: &ServerConfig,
    cancel: &CancellationToken,
    fingerprint_out: &mut Option<[u8; 32]>,
) -> Result<Established, HandshakeError> {
    // AWAIT_INIT
    let frame = recv_frame(transport, cancel, config.max_handshake_payload).await?;
    if frame.typ != HandshakeType::Init {
        return Err(HandshakeError::UnexpectedMessage { expected: "init", got: frame.typ });
    }
    let fingerprint: [u8; 32] = Sha256::digest(&frame.payload).into();
    *fingerprint_out = Some(fingerprint);

    let init: E2eeInit = serde_json::from_slice(&frame.payload)?;
    let (suite, client_eph_pub, nonce_c) = validate_init(&init, config)?;
    let secrets = resolve_secrets(&init, config)?;

    let entry = cache.get_or_insert(fingerprint, || {
        let secret = EphemeralSecret::generate(suite);
        let nonce_s: [u8; NONCE_LEN] = random_bytes()?;
        let handshake_id = b64u::encode(&random_bytes::<HANDSHAKE_ID_LEN>()?);
        let resp = E2eeResp {
            handshake_id: handshake_id.clone(),
            server_eph_pub_b64u: b64u::encode(&secret.public_bytes()),
            nonce_s_b64u: b64u::encode(&nonce_s),
            server_features: config.features,
        };
        let resp_payload = serde_json::to_vec(&resp)?;
        Ok(CacheEntry::new(
            handshake_id,
            suite,
            init.clone(),
            client_eph_pub.clone(),
            nonce_c,
            secret,
            nonce_s,
            config.features,
            resp_payload,
            secrets.clone(),
        ))
    })?;

    // SENT_RESP
    send_frame(transport, cancel, HandshakeType::Resp, &entry.resp_payload).await?;

    loop {
        let frame = recv_frame(transport, cancel, config.max_handshake_payload).await?;
        match frame.typ {
            HandshakeType::Init => {
                // A retry must be byte-identical to the cached init.
                let retry_fp: [u8; 32] = Sha256::digest(&frame.payload).into();
                if retry_fp != fingerprint {
                    return Err(HandshakeError::InitReplayMismatch);
                }
                debug!(handshake_id = %entry.handshake_id, "duplicate init, replaying resp");
                send_frame(transport, cancel, HandshakeType::Resp, &entry.resp_payload).await?;
            }
            HandshakeType::Ack => {
                return finish(&entry, &frame.payload, config);
            }
            HandshakeType::Resp => {
                return Err(HandshakeError::UnexpectedMessage {
                    expected: "init or ack",
                    got: frame.typ,
                });
            }
        }
    }
}

fn validate_init(
    init: &E2eeInit,
    config: &ServerConfig,
) -> Result<(Suite, Vec<u8>, [u8; NONCE_LEN]), HandshakeError> {
    if init.version != 1 {
        return Err(HandshakeError::VersionMismatch(init.version));
    }
    if init.role != "client" {
        return Err(HandshakeError::RoleMismatch(init.role.clone()));
    }
    if init.channel_id.is_empty() {
        return Err(HandshakeError::EmptyChannelId);
    }
    if init.channel_id.len() > usize::from(u16::MAX) {
        return Err(HandshakeError::InvalidField("channel_id"));
    }
    if let Some(expected) = &config.expected_channel_id
        && expected != &init.channel_id
    {
        return Err(HandshakeError::ChannelMismatch {
            expected: expected.clone(),
            got: init.channel_id.clone(),
        });
    }
    let suite = Suite::from_wire(init.suite)
        .map_err(|_| HandshakeError::UnsupportedSuite(init.suite))?;
    if !config.allowed_suites.contains(&suite) {
        return Err(HandshakeError::UnsupportedSuite(init.suite));
    }
    let client_eph_pub = b64u::decode(&init.client_eph_pub_b64u)
        .map_err(|_| HandshakeError::InvalidField("client_eph_pub"))?;
    if client_eph_pub.len() != suite.ephemeral_public_len() {
        return Err(HandshakeError::InvalidField("client_eph_pub"));
    }
    let nonce_c: [u8; NONCE_LEN] =
        b64u::decode_exact(&init.nonce_c_b64u).ok_or(HandshakeError::InvalidField("nonce_c"))?;
    Ok((suite, client_eph_pub, nonce_c))
}

fn resolve_secrets(init: &E2eeInit, config: &ServerConfig) -> Result<ChannelSecrets, HandshakeError> {
    match &config.secrets {
        SecretSource::Static(secrets) => Ok(secrets.clone()),
        SecretSource::Resolver(resolver) => {
            let request = ResolveRequest {
                channel_id: init.channel_id.clone(),
                version: init.version,
                suite: init.suite,
                client_features: init.client_features,
            };
            match catch_unwind(AssertUnwindSafe(|| resolver.resolve(&request))) {
                Ok(Ok(secrets)) => Ok(secrets),
                Ok(Err(message)) => Err(HandshakeError::ResolveFailed(message)),
                Err(_) => {
                    warn!(channel_id = %init.channel_id, "channel resolver panicked");
                    Err(HandshakeError::ResolveFailed("resolver panicked".to_owned()))
                }
            }
        }
    }
}

fn finish(
    entry: &CacheEntry,
    ack_payload: &[u8],
    config: &ServerConfig,
) -> Result<Established, HandshakeError> {
    let ack: E2eeAck = serde_json::from_slice(ack_payload)?;
    if ack.handshake_id != entry.handshake_id {
        return Err(HandshakeError::HandshakeIdMismatch);
    }
    let tag: [u8; 32] =
        b64u::decode_exact(&ack.auth_tag_b64u).ok_or(HandshakeError::InvalidField("auth_tag"))?;

    let now = now_unix_s();
    let skew = config.clock_skew.as_secs();
    if now.abs_diff(ack.timestamp_unix_s) > skew {
        return Err(HandshakeError::TimestampOutOfSkew { now, timestamp: ack.timestamp_unix_s });
    }
    let init_exp = entry.secrets.init_exp;
    if ack.timestamp_unix_s > init_exp.saturating_add(skew) {
        return Err(HandshakeError::TimestampAfterInitExp {
            timestamp: ack.timestamp_unix_s,
            init_exp,
        });
    }

    let transcript = transcript_hash(&TranscriptInputs {
        version: 1,
        suite: entry.suite.wire(),
        role: ROLE_CLIENT,
        client_features: entry.init.client_features,
        server_features: entry.server_features,
        channel_id: &entry.init.channel_id,
        nonce_c: &entry.nonce_c,
        nonce_s: &entry.nonce_s,
        client_eph_pub: &entry.client_eph_pub,
        server_eph_pub: &entry.server_eph_pub,
    });
    if !verify_auth_tag(&entry.secrets.psk, &transcript, ack.timestamp_unix_s, &tag) {
        return Err(HandshakeError::AuthTagMismatch);
    }

    let shared = entry.secret.diffie_hellman(&entry.client_eph_pub)?;
    let keys = derive_session_keys(&entry.secrets.psk, &shared, &transcript);

    debug!(
        channel_id = %entry.init.channel_id,
        handshake_id = %entry.handshake_id,
        suite = entry.suite.wire(),
        "server handshake complete"
    );

    Ok(Established {
        suite: entry.suite,
        transcript_hash: transcript,
        keys,
        send_dir: Direction::ServerToClient,
        peer_features: entry.init.client_features,
    })
}
