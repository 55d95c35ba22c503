//! Outbound connect orchestration.
//!
//! Two entry points: `connect_direct` (dial the server's WebSocket URL) and
//! `connect_tunnel` (dial the rendezvous and attach; used by both the
//! client and the server endpoint of a tunneled channel).  Both normalize
//! into [`establish_outbound`], which also serves in-process transports in
//! the test suites.

use std::time::Duration;

use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use fsec_channel::{
    ChannelSecrets, ClientConfig, HandshakeCache, RecordConfig, SecretSource, ServerConfig,
    Transport, WsTransport, client_handshake, server_handshake,
};
use fsec_crypto::Suite;
use fsec_wire::{Attach, EndpointRole, transport_read_limit};

use crate::attach::send_attach;
use crate::dispatch::StreamRegistry;
use crate::error::{Error, ErrorCode, Path, Stage};
use crate::options::{
    ConnectOptions, DirectConnectInfo, Grant, decode_psk, default_keepalive, endpoint_instance_id,
    resolve_suite, validate_connect_info, validate_grant,
};
use crate::session::{AssembleParams, Session, assemble_session};

/// Everything needed to run an outbound endpoint over an existing
/// transport.  `connect_direct`/`connect_tunnel` build this from their
/// bundles; tests drive it over in-memory transports.
pub struct OutboundParams {
    pub path: Path,
    pub role: EndpointRole,
    pub channel_id: String,
    pub psk: [u8; 32],
    pub init_exp: u64,
    pub suite: Suite,
    pub allowed_suites: Vec<Suite>,
    pub features: u32,
    pub clock_skew: Duration,
    pub handshake_timeout: Option<Duration>,
    pub max_handshake_payload: usize,
    pub attach: Option<Attach>,
    pub keepalive: Option<Duration>,
    pub record: RecordConfig,
    pub endpoint_instance_id: Option<String>,
}

/// Connect to a server directly over its WebSocket URL (role = client).
pub async fn connect_direct(
    info: &DirectConnectInfo,
    opts: &ConnectOptions,
    registry: StreamRegistry,
    cancel: &CancellationToken,
) -> Result<Session, Error> {
    let path = Path::Direct;
    validate_connect_info(info, path)?;
    let psk = decode_psk(&info.psk, path)?;
    let (suite, allowed_suites) = resolve_suite(info.default_suite, &[], opts.suite, path)?;
    let handshake_timeout = opts.handshake_timeout(path)?;

    let record = record_config(opts);
    let limit = transport_read_limit(opts.max_handshake_payload, opts.max_record_bytes);
    let transport = dial(&info.ws_url, limit, path, cancel).await?;

    establish_outbound(
        transport,
        OutboundParams {
            path,
            role: EndpointRole::Client,
            channel_id: info.channel_id.clone(),
            psk,
            init_exp: info.init_exp,
            suite,
            allowed_suites,
            features: opts.features,
            clock_skew: opts.clock_skew,
            handshake_timeout,
            max_handshake_payload: opts.max_handshake_payload,
            attach: None,
            keepalive: opts.keepalive_interval,
            record,
            endpoint_instance_id: None,
        },
        registry,
        cancel,
    )
    .await
}

/// Attach to the rendezvous and run the handshake through it.  The grant's
/// role decides which side of the handshake this endpoint drives.
pub async fn connect_tunnel(
    grant: &Grant,
    opts: &ConnectOptions,
    registry: StreamRegistry,
    cancel: &CancellationToken,
) -> Result<Session, Error> {
    let path = Path::Tunnel;
    validate_grant(grant, path)?;
    let psk = decode_psk(&grant.psk, path)?;
    let (suite, allowed_suites) =
        resolve_suite(grant.default_suite, &grant.allowed_suites, opts.suite, path)?;
    let handshake_timeout = opts.handshake_timeout(path)?;
    let instance_id = endpoint_instance_id(opts.endpoint_instance_id.as_deref(), path)?;

    let keepalive = opts
        .keepalive_interval
        .or_else(|| default_keepalive(Duration::from_secs(grant.idle_timeout_seconds)));

    let record = record_config(opts);
    let limit = transport_read_limit(opts.max_handshake_payload, opts.max_record_bytes);
    let transport = dial(&grant.tunnel_url, limit, path, cancel).await?;

    establish_outbound(
        transport,
        OutboundParams {
            path,
            role: grant.role,
            channel_id: grant.channel_id.clone(),
            psk,
            init_exp: grant.init_exp,
            suite,
            allowed_suites,
            features: opts.features,
            clock_skew: opts.clock_skew,
            handshake_timeout,
            max_handshake_payload: opts.max_handshake_payload,
            attach: Some(Attach {
                v: 1,
                channel_id: grant.channel_id.clone(),
                role: grant.role,
                token: grant.token.clone(),
                endpoint_instance_id: instance_id.clone(),
            }),
            keepalive,
            record,
            endpoint_instance_id: Some(instance_id),
        },
        registry,
        cancel,
    )
    .await
}

/// Run the attach prelude (tunnel path), the handshake for the configured
/// role, and session assembly over an arbitrary transport.
pub async fn establish_outbound<T: Transport>(
    mut transport: T,
    params: OutboundParams,
    registry: StreamRegistry,
    cancel: &CancellationToken,
) -> Result<Session, Error> {
    if let Some(attach) = &params.attach {
        send_attach(&mut transport, attach, cancel).await?;
    }

    let established = match params.role {
        EndpointRole::Client => {
            let config = ClientConfig {
                channel_id: params.channel_id.clone(),
                psk: params.psk,
                suite: params.suite,
                features: params.features,
                max_handshake_payload: params.max_handshake_payload,
                timeout: params.handshake_timeout,
            };
            client_handshake(&mut transport, &config, cancel)
                .await
                .map_err(|e| Error::from_handshake(params.path, e))?
        }
        EndpointRole::Server => {
            // An outbound server endpoint serves exactly one connection, so
            // its init cache is connection-local.
            let cache = HandshakeCache::with_defaults();
            let config = ServerConfig {
                expected_channel_id: Some(params.channel_id.clone()),
                allowed_suites: params.allowed_suites.clone(),
                features: params.features,
                clock_skew: params.clock_skew,
                secrets: SecretSource::Static(ChannelSecrets {
                    psk: params.psk,
                    init_exp: params.init_exp,
                }),
                max_handshake_payload: params.max_handshake_payload,
                timeout: params.handshake_timeout,
            };
            server_handshake(&mut transport, &cache, &config, cancel)
                .await
                .map_err(|e| Error::from_handshake(params.path, e))?
        }
    };

    assemble_session(
        transport,
        &established,
        AssembleParams {
            path: params.path,
            role: params.role,
            endpoint_instance_id: params.endpoint_instance_id,
            keepalive: params.keepalive,
            record: params.record,
        },
        registry,
        cancel,
    )
    .await
}

fn record_config(opts: &ConnectOptions) -> RecordConfig {
    RecordConfig {
        max_record_bytes: opts.max_record_bytes,
        max_buffered_bytes: opts.max_buffered_bytes,
        ..RecordConfig::default()
    }
}

/// Dial a ws:// or wss:// URL with the bounded read limit in force.
async fn dial(
    url: &str,
    read_limit: usize,
    path: Path,
    cancel: &CancellationToken,
) -> Result<WsTransport<MaybeTlsStream<tokio::net::TcpStream>>, Error> {
    let config = WebSocketConfig::default()
        .max_message_size(Some(read_limit))
        .max_frame_size(Some(read_limit));
    let connect = tokio_tungstenite::connect_async_with_config(url, Some(config), false);
    let (ws, _response) = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            return Err(Error::new(path, Stage::Connect, ErrorCode::Canceled));
        }
        result = connect => result.map_err(|e| {
            Error::new(path, Stage::Connect, ErrorCode::DialFailed).with_cause(e)
        })?,
    };
    debug!(url, "dialed");
    Ok(WsTransport::new(ws))
}
