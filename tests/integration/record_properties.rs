//! Record-layer properties observed at session level: keepalive cadence,
//! ping-failure teardown, rekey under mux traffic, and receive-buffer
//! bounds.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use fsec_channel::{
    ChannelSecrets, Established, HandshakeCache, MemTransport, Message, RecordConfig,
    SecretSource, SecureChannel, SecureError, Transport, TransportReader, TransportWriter,
    mem_pair,
};
use fsec_crypto::{Direction, SessionKeys, Suite};
use fsec_session::{
    AcceptConfig, ErrorCode, OutboundParams, Path, Session, StreamRegistry, accept_direct,
    establish_outbound,
};
use fsec_test_utils::echo_registry;
use fsec_wire::EndpointRole;
use fsec_wire::frame::{RecordFlags, decode_record};

const PSK: [u8; 32] = [0x05; 32];

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

/// Relay between two in-memory pairs, counting client→server ping records
/// on the wire.  Handshake frames fail `decode_record` and are not counted.
fn spawn_counting_relay(
    client_side: MemTransport,
    server_side: MemTransport,
) -> (Arc<AtomicUsize>, Vec<tokio::task::JoinHandle<()>>) {
    let pings = Arc::new(AtomicUsize::new(0));
    let (mut from_client, mut to_client) = client_side.into_split();
    let (mut from_server, mut to_server) = server_side.into_split();

    let counter = Arc::clone(&pings);
    let c2s = tokio::spawn(async move {
        while let Ok(msg) = from_client.read_message().await {
            if let Message::Binary(bytes) = &msg
                && let Ok(frame) = decode_record(bytes, usize::MAX)
                && frame.flags == RecordFlags::Ping as u8
            {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            if to_server.write_message(msg).await.is_err() {
                break;
            }
        }
    });
    let s2c = tokio::spawn(async move {
        while let Ok(msg) = from_server.read_message().await {
            if to_client.write_message(msg).await.is_err() {
                break;
            }
        }
    });
    (pings, vec![c2s, s2c])
}

async fn session_pair_through_relay(
    client_keepalive: Option<Duration>,
) -> (Session, Session, Arc<AtomicUsize>, Vec<tokio::task::JoinHandle<()>>) {
    let (client_t, relay_client) = mem_pair(64);
    let (relay_server, server_t) = mem_pair(64);
    let (pings, relays) = spawn_counting_relay(relay_client, relay_server);

    let cancel = CancellationToken::new();
    let server_cancel = cancel.clone();
    let server = tokio::spawn(async move {
        let cache = HandshakeCache::with_defaults();
        let config = AcceptConfig::new(SecretSource::Static(ChannelSecrets {
            psk: PSK,
            init_exp: now_unix() + 120,
        }));
        accept_direct(server_t, &cache, config, echo_registry(), &server_cancel).await
    });

    let client = establish_outbound(
        client_t,
        OutboundParams {
            path: Path::Direct,
            role: EndpointRole::Client,
            channel_id: "ch_rec".to_owned(),
            psk: PSK,
            init_exp: now_unix() + 120,
            suite: Suite::DEFAULT,
            allowed_suites: vec![Suite::DEFAULT],
            features: 0,
            clock_skew: Duration::from_secs(30),
            handshake_timeout: Some(Duration::from_secs(5)),
            max_handshake_payload: fsec_wire::DEFAULT_MAX_HANDSHAKE_PAYLOAD,
            attach: None,
            keepalive: client_keepalive,
            record: RecordConfig::default(),
            endpoint_instance_id: None,
        },
        StreamRegistry::new(),
        &cancel,
    )
    .await
    .expect("client establishes");
    let server = server.await.unwrap().expect("server establishes");
    (client, server, pings, relays)
}

/// With `keepalive_interval = 50 ms` and no app traffic, encrypted ping
/// records appear on the wire at that cadence.
#[tokio::test]
async fn keepalive_pings_at_configured_cadence() {
    let (mut client, mut server, pings, _relays) =
        session_pair_through_relay(Some(Duration::from_millis(50))).await;

    tokio::time::sleep(Duration::from_millis(330)).await;
    let count = pings.load(Ordering::SeqCst);
    // ~6 expected; allow generous OS jitter either way.
    assert!((3..=9).contains(&count), "expected ~6 pings in 330ms, saw {count}");

    client.close().await;
    server.close().await;
}

/// No keepalive configured: the wire stays silent.
#[tokio::test]
async fn no_keepalive_means_no_pings() {
    let (mut client, mut server, pings, _relays) = session_pair_through_relay(None).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(pings.load(Ordering::SeqCst), 0);
    client.close().await;
    server.close().await;
}

/// A failed keepalive ping closes the session; later operations are
/// `not_connected`.
#[tokio::test]
async fn ping_failure_closes_the_session() {
    let (client, mut server, _pings, relays) =
        session_pair_through_relay(Some(Duration::from_millis(40))).await;

    // Kill the relay: the client's next ping write fails.
    for relay in relays {
        relay.abort();
    }
    tokio::time::sleep(Duration::from_millis(250)).await;

    assert!(client.secure_channel().is_closed(), "keepalive failure must close the channel");
    let err = client.open_stream("echo").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::NotConnected);

    drop(client);
    server.close().await;
}

/// Rekeying mid-session is invisible to multiplexed traffic.
#[tokio::test]
async fn rekey_under_mux_traffic() {
    let (client, mut server, _pings, _relays) = session_pair_through_relay(None).await;

    let mut stream = client.open_stream("echo").await.unwrap();
    stream.write_all(b"before").await.unwrap();
    stream.flush().await.unwrap();
    let mut buf = [0u8; 6];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"before");

    client.secure_channel().rekey_now().await.unwrap();

    stream.write_all(b"after!").await.unwrap();
    stream.flush().await.unwrap();
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"after!");

    let mut client = client;
    client.close().await;
    server.close().await;
}

/// Flooding past `max_buffered_bytes` with no reader fails the session
/// with `recv_buffer_exceeded`.
#[tokio::test]
async fn receive_buffer_overrun_is_terminal() {
    fn established(send_dir: Direction) -> Established {
        Established {
            suite: Suite::DEFAULT,
            transcript_hash: [9; 32],
            keys: SessionKeys {
                c2s_key: [1; 32],
                s2c_key: [2; 32],
                rekey_base: [3; 32],
                c2s_nonce_prefix: [4; 4],
                s2c_nonce_prefix: [5; 4],
            },
            send_dir,
            peer_features: 0,
        }
    }

    let (a, b) = mem_pair(256);
    let writer = SecureChannel::start(
        a,
        &established(Direction::ClientToServer),
        RecordConfig::default(),
        CancellationToken::new(),
    );
    let reader = SecureChannel::start(
        b,
        &established(Direction::ServerToClient),
        RecordConfig { max_buffered_bytes: 1024, ..RecordConfig::default() },
        CancellationToken::new(),
    );

    // Nobody reads; 4 KiB must overrun the 1 KiB bound.
    writer.write(&[0u8; 4096]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut sink = vec![0u8; 8192];
    let mut saw_overrun = false;
    loop {
        match reader.read(&mut sink).await {
            Ok(0) => break,
            Ok(_) => continue,
            Err(SecureError::RecvBufferExceeded) => {
                saw_overrun = true;
                break;
            }
            Err(other) => panic!("expected recv_buffer_exceeded, got {other}"),
        }
    }
    assert!(saw_overrun);
    writer.close();
    reader.close();
}
