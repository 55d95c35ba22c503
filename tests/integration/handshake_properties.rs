//! Handshake-engine properties driven at the frame level: init
//! idempotence, transcript binding, freshness windows, and cache bounds.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;

use fsec_channel::{
    ChannelSecrets, Established, HandshakeCache, HandshakeError, Message, SecretSource,
    ServerConfig, Transport, mem_pair, server_handshake,
};
use fsec_crypto::{
    EphemeralSecret, ROLE_CLIENT, Suite, TranscriptInputs, auth_tag, transcript_hash,
};
use fsec_wire::frame::{HandshakeType, decode_handshake, encode_handshake};
use fsec_wire::{DEFAULT_MAX_HANDSHAKE_PAYLOAD, E2eeAck, E2eeInit, E2eeResp, b64u};

const PSK: [u8; 32] = [0x0A; 32];
const CHANNEL: &str = "ch_hs";

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

fn server_config(init_exp: u64) -> ServerConfig {
    ServerConfig {
        expected_channel_id: Some(CHANNEL.to_owned()),
        allowed_suites: Suite::ALL.to_vec(),
        features: 0,
        clock_skew: Duration::from_secs(30),
        secrets: SecretSource::Static(ChannelSecrets { psk: PSK, init_exp }),
        max_handshake_payload: DEFAULT_MAX_HANDSHAKE_PAYLOAD,
        timeout: Some(Duration::from_secs(5)),
    }
}

/// Hand-rolled client state for frame-level tests.
struct ManualClient {
    secret: EphemeralSecret,
    public: Vec<u8>,
    nonce_c: [u8; 32],
    init: E2eeInit,
}

impl ManualClient {
    fn new() -> Self {
        let secret = EphemeralSecret::generate(Suite::DEFAULT);
        let public = secret.public_bytes();
        let nonce_c = [0x11; 32];
        let init = E2eeInit {
            channel_id: CHANNEL.to_owned(),
            role: "client".to_owned(),
            version: 1,
            suite: Suite::DEFAULT.wire(),
            client_eph_pub_b64u: b64u::encode(&public),
            nonce_c_b64u: b64u::encode(&nonce_c),
            client_features: 0,
        };
        Self { secret, public, nonce_c, init }
    }

    fn init_frame(&self) -> Vec<u8> {
        encode_handshake(HandshakeType::Init, &serde_json::to_vec(&self.init).unwrap())
    }

    /// Build a valid ack for the given resp, with a caller-chosen
    /// timestamp.
    fn ack_frame(&self, resp: &E2eeResp, timestamp: u64) -> Vec<u8> {
        let server_pub = b64u::decode(&resp.server_eph_pub_b64u).unwrap();
        let nonce_s: [u8; 32] = b64u::decode_exact(&resp.nonce_s_b64u).unwrap();
        let transcript = transcript_hash(&TranscriptInputs {
            version: 1,
            suite: Suite::DEFAULT.wire(),
            role: ROLE_CLIENT,
            client_features: 0,
            server_features: resp.server_features,
            channel_id: CHANNEL,
            nonce_c: &self.nonce_c,
            nonce_s: &nonce_s,
            client_eph_pub: &self.public,
            server_eph_pub: &server_pub,
        });
        // Keep the DH alive even though only the tag matters here.
        let _ = self.secret.diffie_hellman(&server_pub).unwrap();
        let tag = auth_tag(&PSK, &transcript, timestamp);
        let ack = E2eeAck {
            handshake_id: resp.handshake_id.clone(),
            timestamp_unix_s: timestamp,
            auth_tag_b64u: b64u::encode(&tag),
        };
        encode_handshake(HandshakeType::Ack, &serde_json::to_vec(&ack).unwrap())
    }
}

async fn read_resp<T: Transport>(transport: &mut T) -> (E2eeResp, Vec<u8>) {
    let Message::Binary(bytes) = transport.read_message().await.unwrap() else {
        panic!("expected binary resp frame");
    };
    let frame = decode_handshake(&bytes, DEFAULT_MAX_HANDSHAKE_PAYLOAD).unwrap();
    assert_eq!(frame.typ, HandshakeType::Resp);
    let resp: E2eeResp = serde_json::from_slice(&frame.payload).unwrap();
    (resp, frame.payload)
}

/// Property 4: the same init N times yields the byte-identical resp N
/// times, and the handshake still completes.
#[tokio::test]
async fn init_retries_get_identical_resps_then_complete() {
    let (mut client_t, mut server_t) = mem_pair(32);
    let cache = HandshakeCache::with_defaults();
    let cancel = CancellationToken::new();
    let server = tokio::spawn(async move {
        let result = server_handshake(&mut server_t, &cache, &server_config(now_unix() + 120), &cancel).await;
        (result, cache)
    });

    let client = ManualClient::new();
    let init = client.init_frame();

    client_t.write_message(Message::Binary(init.clone())).await.unwrap();
    let (_, first_payload) = read_resp(&mut client_t).await;

    for _ in 0..2 {
        client_t.write_message(Message::Binary(init.clone())).await.unwrap();
        let (_, payload) = read_resp(&mut client_t).await;
        assert_eq!(payload, first_payload, "retried init must replay the identical resp");
    }

    let resp: E2eeResp = serde_json::from_slice(&first_payload).unwrap();
    let ack = client.ack_frame(&resp, now_unix());
    client_t.write_message(Message::Binary(ack)).await.unwrap();

    let (result, cache) = server.await.unwrap();
    let established: Established = result.expect("handshake completes after retries");
    assert_eq!(established.suite, Suite::DEFAULT);
    assert!(cache.is_empty(), "entry must be evicted on success");
}

/// Property 4, negative half: a perturbed init mid-handshake is rejected.
#[tokio::test]
async fn perturbed_init_mid_handshake_is_rejected() {
    let (mut client_t, mut server_t) = mem_pair(32);
    let cache = HandshakeCache::with_defaults();
    let cancel = CancellationToken::new();
    let server = tokio::spawn(async move {
        server_handshake(&mut server_t, &cache, &server_config(now_unix() + 120), &cancel).await
    });

    let client = ManualClient::new();
    client_t.write_message(Message::Binary(client.init_frame())).await.unwrap();
    let _ = read_resp(&mut client_t).await;

    // Second init from a fresh ephemeral: different fingerprint.
    let other = ManualClient::new();
    client_t.write_message(Message::Binary(other.init_frame())).await.unwrap();

    let result = server.await.unwrap();
    assert!(matches!(result, Err(HandshakeError::InitReplayMismatch)));
}

/// Property 3: mutating a transcript input between the two sides causes
/// `auth_tag_mismatch` on the server.
#[tokio::test]
async fn tampered_server_features_cause_auth_tag_mismatch() {
    use fsec_channel::{ClientConfig, client_handshake};

    let (mut client_t, mut proxy_client) = mem_pair(32);
    let (mut proxy_server, mut server_t) = mem_pair(32);
    let cache = HandshakeCache::with_defaults();
    let cancel = CancellationToken::new();

    let server_cancel = cancel.clone();
    let server = tokio::spawn(async move {
        server_handshake(&mut server_t, &cache, &server_config(now_unix() + 120), &server_cancel)
            .await
    });

    // Tampering proxy: bumps server_features inside the resp.
    tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = proxy_client.read_message() => {
                    let Ok(msg) = msg else { break };
                    if proxy_server.write_message(msg).await.is_err() { break; }
                }
                msg = proxy_server.read_message() => {
                    let Ok(msg) = msg else { break };
                    let forwarded = match msg {
                        Message::Binary(bytes) => {
                            let frame = decode_handshake(&bytes, DEFAULT_MAX_HANDSHAKE_PAYLOAD).unwrap();
                            if frame.typ == HandshakeType::Resp {
                                let mut resp: E2eeResp =
                                    serde_json::from_slice(&frame.payload).unwrap();
                                resp.server_features += 1;
                                Message::Binary(encode_handshake(
                                    HandshakeType::Resp,
                                    &serde_json::to_vec(&resp).unwrap(),
                                ))
                            } else {
                                Message::Binary(bytes)
                            }
                        }
                        other => other,
                    };
                    if proxy_client.write_message(forwarded).await.is_err() { break; }
                }
            }
        }
    });

    let client_config = ClientConfig {
        channel_id: CHANNEL.to_owned(),
        psk: PSK,
        suite: Suite::DEFAULT,
        features: 0,
        max_handshake_payload: DEFAULT_MAX_HANDSHAKE_PAYLOAD,
        timeout: Some(Duration::from_secs(5)),
    };
    // The client sees the tampered resp and acks happily.
    let _ = client_handshake(&mut client_t, &client_config, &cancel).await;

    let result = server.await.unwrap();
    assert!(matches!(result, Err(HandshakeError::AuthTagMismatch)));
}

/// Property 5: timestamps just inside the windows pass; one second outside
/// either bound fails with the distinct code.
#[tokio::test]
async fn freshness_windows_are_exact() {
    // Out of skew: 61 s in the past against a 30 s skew (comfortably past
    // the boundary even with second-granularity rounding).
    let (mut client_t, mut server_t) = mem_pair(32);
    let cache = HandshakeCache::with_defaults();
    let cancel = CancellationToken::new();
    let server = tokio::spawn(async move {
        server_handshake(&mut server_t, &cache, &server_config(now_unix() + 120), &cancel).await
    });
    let client = ManualClient::new();
    client_t.write_message(Message::Binary(client.init_frame())).await.unwrap();
    let (resp, _) = read_resp(&mut client_t).await;
    let stale = client.ack_frame(&resp, now_unix() - 61);
    client_t.write_message(Message::Binary(stale)).await.unwrap();
    assert!(matches!(
        server.await.unwrap(),
        Err(HandshakeError::TimestampOutOfSkew { .. })
    ));

    // After init_exp: timestamp within clock skew of now but past
    // init_exp + skew.
    let init_exp = now_unix() - 40;
    let (mut client_t, mut server_t) = mem_pair(32);
    let cache = HandshakeCache::with_defaults();
    let cancel = CancellationToken::new();
    let server = tokio::spawn(async move {
        server_handshake(&mut server_t, &cache, &server_config(init_exp), &cancel).await
    });
    let client = ManualClient::new();
    client_t.write_message(Message::Binary(client.init_frame())).await.unwrap();
    let (resp, _) = read_resp(&mut client_t).await;
    let late = client.ack_frame(&resp, now_unix());
    client_t.write_message(Message::Binary(late)).await.unwrap();
    assert!(matches!(
        server.await.unwrap(),
        Err(HandshakeError::TimestampAfterInitExp { .. })
    ));

    // In-window timestamp passes.
    let (mut client_t, mut server_t) = mem_pair(32);
    let cache = HandshakeCache::with_defaults();
    let cancel = CancellationToken::new();
    let server = tokio::spawn(async move {
        server_handshake(&mut server_t, &cache, &server_config(now_unix() + 120), &cancel).await
    });
    let client = ManualClient::new();
    client_t.write_message(Message::Binary(client.init_frame())).await.unwrap();
    let (resp, _) = read_resp(&mut client_t).await;
    let fresh = client.ack_frame(&resp, now_unix());
    client_t.write_message(Message::Binary(fresh)).await.unwrap();
    assert!(server.await.unwrap().is_ok());
}

/// Cache overflow yields `too_many_pending_handshakes`.
#[tokio::test]
async fn cache_cap_rejects_excess_pending_handshakes() {
    let cache = std::sync::Arc::new(HandshakeCache::new(Duration::from_secs(60), 2));

    let mut pending = Vec::new();
    for _ in 0..2 {
        let (mut client_t, mut server_t) = mem_pair(32);
        let cache = std::sync::Arc::clone(&cache);
        let cancel = CancellationToken::new();
        let server = tokio::spawn(async move {
            server_handshake(&mut server_t, &cache, &server_config(now_unix() + 120), &cancel)
                .await
        });
        let client = ManualClient::new();
        client_t.write_message(Message::Binary(client.init_frame())).await.unwrap();
        let _ = read_resp(&mut client_t).await;
        // Keep the handshake pending: no ack, transports alive.
        pending.push((client_t, server));
    }
    assert_eq!(cache.len(), 2);

    let (mut client_t, mut server_t) = mem_pair(32);
    let overflow_cache = std::sync::Arc::clone(&cache);
    let cancel = CancellationToken::new();
    let server = tokio::spawn(async move {
        server_handshake(
            &mut server_t,
            &overflow_cache,
            &server_config(now_unix() + 120),
            &cancel,
        )
        .await
    });
    let client = ManualClient::new();
    client_t.write_message(Message::Binary(client.init_frame())).await.unwrap();
    assert!(matches!(
        server.await.unwrap(),
        Err(HandshakeError::TooManyPendingHandshakes)
    ));
    drop(pending);
}
