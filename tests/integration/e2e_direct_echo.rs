//! End-to-end direct-path echo (scenario S1).
//!
//! Covers the in-process transport pair, the real axum upgrade path, and
//! the dispatch loop's resilience to misbehaving substreams.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use fsec_channel::{ChannelSecrets, HandshakeCache, RecordConfig, SecretSource, mem_pair};
use fsec_crypto::Suite;
use fsec_session::{
    AcceptConfig, AxumWsTransport, ConnectOptions, DirectConnectInfo, OutboundParams, Path,
    Session, StreamRegistry, accept_direct, connect_direct, establish_outbound,
};
use fsec_test_utils::echo_registry;
use fsec_wire::{EndpointRole, b64u};

const PSK: [u8; 32] = [0x01; 32];
const CHANNEL: &str = "ch_test";

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

fn outbound_params() -> OutboundParams {
    OutboundParams {
        path: Path::Direct,
        role: EndpointRole::Client,
        channel_id: CHANNEL.to_owned(),
        psk: PSK,
        init_exp: now_unix() + 120,
        suite: Suite::DEFAULT,
        allowed_suites: vec![Suite::DEFAULT],
        features: 0,
        clock_skew: Duration::from_secs(30),
        handshake_timeout: Some(Duration::from_secs(5)),
        max_handshake_payload: fsec_wire::DEFAULT_MAX_HANDSHAKE_PAYLOAD,
        attach: None,
        keepalive: None,
        record: RecordConfig::default(),
        endpoint_instance_id: None,
    }
}

/// Establish a direct session over an in-memory transport pair.
async fn direct_pair(server_registry: StreamRegistry) -> (Session, Session) {
    let (client_t, server_t) = mem_pair(64);
    let cancel = CancellationToken::new();

    let server_cancel = cancel.clone();
    let server = tokio::spawn(async move {
        let cache = HandshakeCache::with_defaults();
        let mut config = AcceptConfig::new(SecretSource::Static(ChannelSecrets {
            psk: PSK,
            init_exp: now_unix() + 120,
        }));
        config.expected_channel_id = Some(CHANNEL.to_owned());
        accept_direct(server_t, &cache, config, server_registry, &server_cancel).await
    });

    let client = establish_outbound(client_t, outbound_params(), StreamRegistry::new(), &cancel)
        .await
        .expect("client establishes");
    let server = server.await.unwrap().expect("server establishes");
    (client, server)
}

async fn echo_round_trip(session: &Session, payload: &[u8]) {
    let mut stream = session.open_stream("echo").await.expect("open echo stream");
    stream.write_all(payload).await.unwrap();
    stream.flush().await.unwrap();
    let mut got = vec![0u8; payload.len()];
    stream.read_exact(&mut got).await.unwrap();
    assert_eq!(got, payload);
    let _ = stream.shutdown().await;
}

/// S1: send "hello", receive "hello".
#[tokio::test]
async fn direct_echo_hello() {
    let (client, mut server) = direct_pair(echo_registry()).await;
    echo_round_trip(&client, b"hello").await;
    client_close(client).await;
    server.close().await;
}

async fn client_close(mut session: Session) {
    session.close().await;
}

/// Multiple sequential substreams on one session.
#[tokio::test]
async fn repeated_substreams_on_one_session() {
    let (client, mut server) = direct_pair(echo_registry()).await;
    for i in 0..5u8 {
        echo_round_trip(&client, format!("payload-{i}").as_bytes()).await;
    }
    client_close(client).await;
    server.close().await;
}

/// A substream with an unknown kind is closed; the session keeps serving.
#[tokio::test]
async fn unknown_kind_closes_substream_but_session_survives() {
    let (client, mut server) = direct_pair(echo_registry()).await;

    let mut stream = client.open_stream("no_such_kind").await.unwrap();
    // The server closes its end; our read observes EOF.
    let mut buf = [0u8; 1];
    let n = stream.read(&mut buf).await.unwrap_or(0);
    assert_eq!(n, 0, "unhandled substream must be closed");

    echo_round_trip(&client, b"still-works").await;
    client_close(client).await;
    server.close().await;
}

/// A garbage hello is reported and skipped; the next substream works.
#[tokio::test]
async fn bad_hello_does_not_kill_the_accept_loop() {
    let (client, mut server) = direct_pair(echo_registry()).await;

    let mut stream = client.open_stream_raw().await.unwrap();
    // Length-prefixed frame whose body is not JSON.
    stream.write_all(&7u32.to_be_bytes()).await.unwrap();
    stream.write_all(b"not-js}").await.unwrap();
    stream.flush().await.unwrap();
    let mut buf = [0u8; 1];
    let n = stream.read(&mut buf).await.unwrap_or(0);
    assert_eq!(n, 0, "bad-hello substream must be closed");

    echo_round_trip(&client, b"after-bad-hello").await;
    client_close(client).await;
    server.close().await;
}

/// S1 over a real WebSocket upgrade: axum server, tokio-tungstenite dial.
#[tokio::test]
async fn direct_echo_over_real_websocket() {
    use axum::Router;
    use axum::extract::ws::WebSocketUpgrade;
    use axum::routing::get;

    let cache = Arc::new(HandshakeCache::with_defaults());
    let limit = fsec_wire::transport_read_limit(
        fsec_wire::DEFAULT_MAX_HANDSHAKE_PAYLOAD,
        fsec_wire::DEFAULT_MAX_RECORD_BYTES,
    );

    let handler = move |ws: WebSocketUpgrade| {
        let cache = Arc::clone(&cache);
        async move {
            ws.max_message_size(limit).on_upgrade(move |socket| async move {
                let mut config = AcceptConfig::new(SecretSource::Static(ChannelSecrets {
                    psk: PSK,
                    init_exp: now_unix() + 120,
                }));
                config.expected_channel_id = Some(CHANNEL.to_owned());
                let cancel = CancellationToken::new();
                if let Ok(mut session) = accept_direct(
                    AxumWsTransport::new(socket),
                    &cache,
                    config,
                    echo_registry(),
                    &cancel,
                )
                .await
                {
                    // Keep serving until the client goes away.
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    session.close().await;
                }
            })
        }
    };

    let app = Router::new().route("/ws", get(handler));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let info = DirectConnectInfo {
        ws_url: format!("ws://{addr}/ws"),
        channel_id: CHANNEL.to_owned(),
        psk: b64u::encode(&PSK),
        init_exp: now_unix() + 120,
        default_suite: 1,
    };
    let cancel = CancellationToken::new();
    let client = connect_direct(&info, &ConnectOptions::default(), StreamRegistry::new(), &cancel)
        .await
        .expect("connect over real websocket");

    echo_round_trip(&client, b"hello").await;
    client_close(client).await;
}
