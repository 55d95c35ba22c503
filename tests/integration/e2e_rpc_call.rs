//! RPC runtime over the reserved `"rpc"` substream kind (scenario S2).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::json;
use tokio_util::sync::CancellationToken;

use fsec_channel::{ChannelSecrets, HandshakeCache, RecordConfig, SecretSource, mem_pair};
use fsec_crypto::Suite;
use fsec_session::{
    AcceptConfig, ErrorCode, OutboundParams, Path, RpcError, RpcRouter, Session, Stage,
    StreamRegistry, accept_direct, establish_outbound,
};
use fsec_wire::EndpointRole;

const PSK: [u8; 32] = [0x01; 32];

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

async fn rpc_pair(router: RpcRouter) -> (Session, Session) {
    let (client_t, server_t) = mem_pair(64);
    let cancel = CancellationToken::new();

    let server_cancel = cancel.clone();
    let server = tokio::spawn(async move {
        let cache = HandshakeCache::with_defaults();
        let config = AcceptConfig::new(SecretSource::Static(ChannelSecrets {
            psk: PSK,
            init_exp: now_unix() + 120,
        }));
        let registry = StreamRegistry::new().with_rpc(router);
        accept_direct(server_t, &cache, config, registry, &server_cancel).await
    });

    let client = establish_outbound(
        client_t,
        OutboundParams {
            path: Path::Direct,
            role: EndpointRole::Client,
            channel_id: "ch_rpc".to_owned(),
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
        },
        StreamRegistry::new(),
        &cancel,
    )
    .await
    .expect("client establishes");

    (client, server.await.unwrap().expect("server establishes"))
}

/// S2: `call(1, {})` returns the literal `{"ok": true}`.
#[tokio::test]
async fn rpc_call_returns_literal_payload() {
    let router = RpcRouter::new()
        .route(1, |_| async move { Ok::<_, RpcError>(json!({"ok": true})) });
    let (mut client, mut server) = rpc_pair(router).await;

    let rpc = client.rpc_client().await.unwrap();
    let reply = rpc.call(1, json!({})).await.unwrap();
    assert_eq!(reply, json!({"ok": true}));

    client.close().await;
    server.close().await;
}

/// Handler errors come back as a classified `rpc_failed`.
#[tokio::test]
async fn handler_error_classifies_as_rpc_failed() {
    let router = RpcRouter::new()
        .route(2, |_| async move { Err::<serde_json::Value, _>(RpcError::new(7, "denied")) });
    let (mut client, mut server) = rpc_pair(router).await;

    let rpc = client.rpc_client().await.unwrap();
    let err = rpc.call(2, json!({})).await.unwrap_err();
    assert_eq!(err.stage, Stage::Rpc);
    assert_eq!(err.code, ErrorCode::RpcFailed);

    client.close().await;
    server.close().await;
}

/// Unknown type ids are an error response, not a dead substream.
#[tokio::test]
async fn unknown_type_id_fails_that_call_only() {
    let router = RpcRouter::new()
        .route(1, |_| async move { Ok::<_, RpcError>(json!("here")) });
    let (mut client, mut server) = rpc_pair(router).await;

    let rpc = client.rpc_client().await.unwrap();
    let err = rpc.call(99, json!({})).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::RpcFailed);

    // The substream is still serving.
    assert_eq!(rpc.call(1, json!({})).await.unwrap(), json!("here"));

    client.close().await;
    server.close().await;
}

/// Concurrent calls correlate by id even when responses arrive out of
/// order.
#[tokio::test]
async fn concurrent_calls_correlate_by_id() {
    let router = RpcRouter::new()
        .route(10, |payload| async move {
            tokio::time::sleep(Duration::from_millis(80)).await;
            Ok::<_, RpcError>(json!({"slow": payload}))
        })
        .route(11, |payload| async move { Ok::<_, RpcError>(json!({"fast": payload})) });
    let (mut client, mut server) = rpc_pair(router).await;

    let rpc = client.rpc_client().await.unwrap();
    let (slow, fast) = tokio::join!(rpc.call(10, json!(1)), rpc.call(11, json!(2)));
    assert_eq!(slow.unwrap(), json!({"slow": 1}));
    assert_eq!(fast.unwrap(), json!({"fast": 2}));

    client.close().await;
    server.close().await;
}

/// Payloads survive the frame layer intact for both request and response.
#[tokio::test]
async fn payloads_round_trip_verbatim() {
    let router = RpcRouter::new()
        .route(5, |payload| async move { Ok::<_, RpcError>(payload) });
    let (mut client, mut server) = rpc_pair(router).await;

    let rpc = client.rpc_client().await.unwrap();
    let payload = json!({
        "nested": {"array": [1, 2, 3], "s": "text", "null": null},
        "bool": true,
    });
    assert_eq!(rpc.call(5, payload.clone()).await.unwrap(), payload);

    client.close().await;
    server.close().await;
}
