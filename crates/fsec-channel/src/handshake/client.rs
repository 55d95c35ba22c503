//! Client (initiator) side of the handshake.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use fsec_crypto::{
    Direction, EphemeralSecret, NONCE_LEN, ROLE_CLIENT, Suite, TranscriptInputs, auth_tag,
    derive_session_keys, random_bytes, transcript_hash,
};
use fsec_wire::frame::HandshakeType;
use fsec_wire::{E2eeAck, E2eeInit, E2eeResp, b64u};

use super::{Established, HandshakeError, now_unix_s, recv_frame, send_frame};
use crate::transport::Transport;

pub struct ClientConfig {
    pub channel_id: String,
    pub psk: [u8; 32],
    pub suite: Suite,
    pub features: u32,
    pub max_handshake_payload: usize,
    /// `None` disables the timeout; the cancellation scope stays
    /// authoritative either way.
    pub timeout: Option<Duration>,
}

pub async fn client_handshake<T: Transport>(
    transport: &mut T,
    config: &ClientConfig,
    cancel: &CancellationToken,
) -> Result<Established, HandshakeError> {
    match config.timeout {
        Some(timeout) => tokio::time::timeout(timeout, drive(transport, config, cancel))
            .await
            .map_err(|_| HandshakeError::Timeout)?,
        None => drive(transport, config, cancel).await,
    }
}

async fn drive<T: Transport>(
    transport: &mut T,
    config: &ClientConfig,
    cancel: &CancellationToken,
) -> Result<Established, HandshakeError> {
    if config.channel_id.is_empty() {
        return Err(HandshakeError::EmptyChannelId);
    }

    let secret = EphemeralSecret::generate(config.suite);
    let client_eph_pub = secret.public_bytes();
    let nonce_c: [u8; NONCE_LEN] = random_bytes()?;

    let init = E2eeInit {
        channel_id: config.channel_id.clone(),
        role: "client".to_owned(),
        version: 1,
        suite: config.suite.wire(),
        client_eph_pub_b64u: b64u::encode(&client_eph_pub),
        nonce_c_b64u: b64u::encode(&nonce_c),
        client_features: config.features,
    };
    let init_payload = serde_json::to_vec(&init)?;
    send_frame(transport, cancel, HandshakeType::Init, &init_payload).await?;

    let frame = recv_frame(transport, cancel, config.max_handshake_payload).await?;
    if frame.typ != HandshakeType::Resp {
        return Err(HandshakeError::UnexpectedMessage { expected: "resp", got: frame.typ });
    }
    let resp: E2eeResp = serde_json::from_slice(&frame.payload)?;
    let server_eph_pub =
        b64u::decode(&resp.server_eph_pub_b64u).map_err(|_| HandshakeError::InvalidField("server_eph_pub"))?;
    if server_eph_pub.len() != config.suite.ephemeral_public_len() {
        return Err(HandshakeError::InvalidField("server_eph_pub"));
    }
    let nonce_s: [u8; NONCE_LEN] =
        b64u::decode_exact(&resp.nonce_s_b64u).ok_or(HandshakeError::InvalidField("nonce_s"))?;

    let shared = secret.diffie_hellman(&server_eph_pub)?;
    let transcript = transcript_hash(&TranscriptInputs {
        version: 1,
        suite: config.suite.wire(),
        role: ROLE_CLIENT,
        client_features: config.features,
        server_features: resp.server_features,
        channel_id: &config.channel_id,
        nonce_c: &nonce_c,
        nonce_s: &nonce_s,
        client_eph_pub: &client_eph_pub,
        server_eph_pub: &server_eph_pub,
    });
    let keys = derive_session_keys(&config.psk, &shared, &transcript);

    let timestamp = now_unix_s();
    let tag = auth_tag(&config.psk, &transcript, timestamp);
    let ack = E2eeAck {
        handshake_id: resp.handshake_id.clone(),
        timestamp_unix_s: timestamp,
        auth_tag_b64u: b64u::encode(&tag),
    };
    send_frame(transport, cancel, HandshakeType::Ack, &serde_json::to_vec(&ack)?).await?;

    debug!(
        channel_id = %config.channel_id,
        suite = config.suite.wire(),
        handshake_id = %resp.handshake_id,
        "client handshake complete"
    );

    Ok(Established {
        suite: config.suite,
        transcript_hash: transcript,
        keys,
        send_dir: Direction::ClientToServer,
        peer_features: resp.server_features,
    })
}
