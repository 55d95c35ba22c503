//! Tunnel topology: attach, pairing, forwarding, and rejection mapping
//! (scenario S3 and the full reason-token table).

use std::time::{SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use fsec_session::{ConnectOptions, ErrorCode, Grant, Path, Stage, StreamRegistry, connect_tunnel};
use fsec_test_utils::{MockRendezvous, echo_registry};
use fsec_wire::{AttachReason, EndpointRole, b64u};

const PSK: [u8; 32] = [0x42; 32];

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

fn grant(url: &str, role: EndpointRole, token: &str) -> Grant {
    Grant {
        tunnel_url: url.to_owned(),
        channel_id: "ch_tunnel".to_owned(),
        role,
        token: token.to_owned(),
        psk: b64u::encode(&PSK),
        init_exp: now_unix() + 120,
        idle_timeout_seconds: 30,
        default_suite: 1,
        allowed_suites: vec![1, 2],
    }
}

/// Both endpoints attach, get paired, and run the full stack through the
/// rendezvous: handshake, mux, echo substream.
#[tokio::test]
async fn tunnel_pair_and_echo() {
    let rendezvous = MockRendezvous::start().await.unwrap();
    rendezvous.allow_token("tok-server");
    rendezvous.allow_token("tok-client");

    let server_grant = grant(&rendezvous.url(), EndpointRole::Server, "tok-server");
    let cancel = CancellationToken::new();
    let server_cancel = cancel.clone();
    let server = tokio::spawn(async move {
        connect_tunnel(&server_grant, &ConnectOptions::default(), echo_registry(), &server_cancel)
            .await
    });

    let client_grant = grant(&rendezvous.url(), EndpointRole::Client, "tok-client");
    let mut client =
        connect_tunnel(&client_grant, &ConnectOptions::default(), StreamRegistry::new(), &cancel)
            .await
            .expect("client tunnel connect");
    let mut server = server.await.unwrap().expect("server tunnel connect");

    assert_eq!(client.path(), Path::Tunnel);
    assert!(client.endpoint_instance_id().is_some());

    let mut stream = client.open_stream("echo").await.unwrap();
    stream.write_all(b"through-the-tunnel").await.unwrap();
    stream.flush().await.unwrap();
    let mut got = [0u8; 18];
    stream.read_exact(&mut got).await.unwrap();
    assert_eq!(&got, b"through-the-tunnel");

    client.close().await;
    server.close().await;
}

/// S3: attaching with a token the rendezvous does not accept surfaces as
/// `{path: tunnel, stage: attach, code: invalid_token}` on the server
/// endpoint.
#[tokio::test]
async fn expired_token_is_invalid_token_at_attach_stage() {
    let rendezvous = MockRendezvous::start().await.unwrap();
    // No tokens registered: everything is invalid.

    let server_grant = grant(&rendezvous.url(), EndpointRole::Server, "expired-token");
    let cancel = CancellationToken::new();
    let err =
        connect_tunnel(&server_grant, &ConnectOptions::default(), echo_registry(), &cancel)
            .await
            .unwrap_err();

    assert_eq!(err.path, Path::Tunnel);
    assert_eq!(err.stage, Stage::Attach);
    assert_eq!(err.code, ErrorCode::Attach(AttachReason::InvalidToken));
}

/// Re-using a burned token maps to `token_replay`.
#[tokio::test]
async fn burned_token_maps_to_token_replay() {
    let rendezvous = MockRendezvous::start().await.unwrap();
    rendezvous.allow_token("once");

    // First endpoint burns the token and parks waiting for its peer.
    let first_grant = grant(&rendezvous.url(), EndpointRole::Server, "once");
    let cancel = CancellationToken::new();
    let first_cancel = cancel.clone();
    let first = tokio::spawn(async move {
        connect_tunnel(&first_grant, &ConnectOptions::default(), StreamRegistry::new(), &first_cancel)
            .await
    });
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let second_grant = grant(&rendezvous.url(), EndpointRole::Client, "once");
    let err =
        connect_tunnel(&second_grant, &ConnectOptions::default(), StreamRegistry::new(), &cancel)
            .await
            .unwrap_err();
    assert_eq!(err.path, Path::Tunnel);
    assert_eq!(err.stage, Stage::Attach);
    assert_eq!(err.code, ErrorCode::Attach(AttachReason::TokenReplay));

    cancel.cancel();
    let _ = first.await;
}

/// Every rejection token in the contract classifies as
/// `{path: tunnel, stage: attach, code: <token>}`, never as a generic
/// handshake error.
#[tokio::test]
async fn every_reason_token_round_trips_through_classification() {
    for reason in AttachReason::ALL {
        let rendezvous = MockRendezvous::rejecting(reason).await.unwrap();
        let client_grant = grant(&rendezvous.url(), EndpointRole::Client, "whatever");
        let cancel = CancellationToken::new();
        let err = connect_tunnel(
            &client_grant,
            &ConnectOptions::default(),
            StreamRegistry::new(),
            &cancel,
        )
        .await
        .unwrap_err();

        assert_eq!(err.path, Path::Tunnel, "reason {reason}");
        assert_eq!(err.stage, Stage::Attach, "reason {reason}");
        assert_eq!(err.code, ErrorCode::Attach(reason), "reason {reason}");
    }
}

/// Validation failures never reach the network.
#[tokio::test]
async fn grant_validation_happens_before_dialing() {
    let mut bad = grant("ws://127.0.0.1:1/nowhere", EndpointRole::Client, "tok");
    bad.token.clear();
    let cancel = CancellationToken::new();
    let err = connect_tunnel(&bad, &ConnectOptions::default(), StreamRegistry::new(), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.stage, Stage::Validate);
    assert_eq!(err.code, ErrorCode::MissingToken);
}

/// An unreachable rendezvous is a connect-stage dial failure.
#[tokio::test]
async fn unreachable_rendezvous_is_dial_failed() {
    let g = grant("ws://127.0.0.1:9/nowhere", EndpointRole::Client, "tok");
    let cancel = CancellationToken::new();
    let err = connect_tunnel(&g, &ConnectOptions::default(), StreamRegistry::new(), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.stage, Stage::Connect);
    assert_eq!(err.code, ErrorCode::DialFailed);
}
