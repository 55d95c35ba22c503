//! Session assembly and lifecycle.
//!
//! A session owns the secure channel, the multiplexer, the dispatch loop,
//! and (when configured) the keepalive task.  Closing tears them down in
//! that order: keepalive, mux, secure channel.  Shutdown is one-way; there
//! are no cyclic references.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use fsec_channel::{Established, RecordConfig, SecureChannel, Transport};
use fsec_wire::{EndpointRole, StreamHello};

use crate::dispatch::{StreamRegistry, run_dispatch};
use crate::error::{Error, ErrorCode, Path, Stage};
use crate::jsonio::write_json_frame;
use crate::mux::{Mux, MuxMode, SubStream, start_mux};
use crate::rpc::RpcClient;

pub(crate) struct AssembleParams {
    pub path: Path,
    pub role: EndpointRole,
    pub endpoint_instance_id: Option<String>,
    pub keepalive: Option<Duration>,
    pub record: RecordConfig,
}

/// An established end-to-end encrypted, multiplexed session.
#[derive(Debug)]
pub struct Session {
    path: Path,
    role: EndpointRole,
    endpoint_instance_id: Option<String>,
    channel: SecureChannel,
    mux: Mux,
    keepalive: Option<JoinHandle<()>>,
    dispatch: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Wrap an established handshake into a running session: record layer,
/// server-finished ping (server side), mux, dispatch loop, keepalive.
pub(crate) async fn assemble_session<T: Transport>(
    transport: T,
    established: &Established,
    params: AssembleParams,
    registry: StreamRegistry,
    cancel: &CancellationToken,
) -> Result<Session, Error> {
    let scope = cancel.child_token();
    let channel = SecureChannel::start(transport, established, params.record, scope.clone());

    // Server-finished: the first record on the wire is a ping with seq=1,
    // which the client's record layer consumes as handshake confirmation.
    if params.role == EndpointRole::Server {
        channel
            .send_ping()
            .await
            .map_err(|e| Error::from_secure(params.path, Stage::Handshake, e))?;
    }

    let mode = match params.role {
        EndpointRole::Server => MuxMode::Server,
        EndpointRole::Client => MuxMode::Client,
    };
    let (mux, inbound) = start_mux(channel.clone(), mode, scope.clone());
    let dispatch = tokio::spawn(run_dispatch(inbound, Arc::new(registry), params.path, scope.clone()));
    let keepalive = params
        .keepalive
        .filter(|interval| !interval.is_zero())
        .map(|interval| spawn_keepalive(channel.clone(), interval, scope.clone()));

    info!(
        path = params.path.as_str(),
        role = params.role.as_str(),
        keepalive = ?params.keepalive,
        "session established"
    );

    Ok(Session {
        path: params.path,
        role: params.role,
        endpoint_instance_id: params.endpoint_instance_id,
        channel,
        mux,
        keepalive,
        dispatch,
        cancel: scope,
    })
}

/// Periodic encrypted pings; a failed ping closes the session.
fn spawn_keepalive(
    channel: SecureChannel,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = channel.send_ping().await {
                        warn!(error = %e, "keepalive ping failed, closing session");
                        channel.close();
                        break;
                    }
                }
            }
        }
    })
}

impl Session {
    pub fn path(&self) -> Path {
        self.path
    }

    pub fn role(&self) -> EndpointRole {
        self.role
    }

    pub fn endpoint_instance_id(&self) -> Option<&str> {
        self.endpoint_instance_id.as_deref()
    }

    pub fn secure_channel(&self) -> &SecureChannel {
        &self.channel
    }

    /// Open a substream of the given kind; the hello frame is written
    /// before the stream is handed back.
    pub async fn open_stream(&self, kind: &str) -> Result<SubStream, Error> {
        if self.channel.is_closed() {
            return Err(Error::new(self.path, Stage::Yamux, ErrorCode::NotConnected));
        }
        let mut stream = self
            .mux
            .open_stream()
            .await
            .map_err(|e| Error::new(self.path, Stage::Yamux, ErrorCode::OpenStreamFailed).with_cause(e))?;
        write_json_frame(&mut stream, &StreamHello::new(kind))
            .await
            .map_err(|e| Error::new(self.path, Stage::Yamux, ErrorCode::StreamHelloFailed).with_cause(e))?;
        Ok(stream)
    }

    /// Open a substream without writing the hello; the caller is
    /// responsible for the preface the peer expects.
    pub async fn open_stream_raw(&self) -> Result<SubStream, Error> {
        if self.channel.is_closed() {
            return Err(Error::new(self.path, Stage::Yamux, ErrorCode::NotConnected));
        }
        self.mux
            .open_stream()
            .await
            .map_err(|e| Error::new(self.path, Stage::Yamux, ErrorCode::OpenStreamFailed).with_cause(e))
    }

    /// Open the reserved RPC substream and return a correlating client.
    pub async fn rpc_client(&self) -> Result<RpcClient, Error> {
        let stream = self.open_stream(StreamHello::RPC_KIND).await?;
        Ok(RpcClient::start(stream, self.path))
    }

    /// Tear down keepalive, mux, and secure channel, in that order.
    pub async fn close(&mut self) {
        if let Some(keepalive) = self.keepalive.take() {
            keepalive.abort();
        }
        self.mux.close().await;
        self.channel.close();
        self.cancel.cancel();
        self.dispatch.abort();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(keepalive) = &self.keepalive {
            keepalive.abort();
        }
        self.cancel.cancel();
        self.channel.close();
        self.dispatch.abort();
    }
}
