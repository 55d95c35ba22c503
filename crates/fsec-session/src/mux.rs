//! Multiplexer adapter.
//!
//! The secure channel is handed to yamux (v0 framing, 12-byte header); this
//! module only depends on its contract.  The accepting endpoint runs the mux
//! in server mode, the initiator in client mode.  rust-yamux performs no
//! automatic keepalives, so the record layer's encrypted pings are the only
//! liveness traffic.
//!
//! yamux's `Connection` is poll-driven and single-owner, so a driver task
//! owns it and multiplexes three duties: serving `open_stream` requests,
//! delivering inbound substreams to the dispatch loop, and closing.

use std::collections::VecDeque;
use std::pin::pin;
use std::task::Poll;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::compat::{Compat, FuturesAsyncReadCompatExt, TokioAsyncReadCompatExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use fsec_channel::SecureChannel;

/// One multiplexed substream, as tokio-flavored I/O.
pub type SubStream = Compat<yamux::Stream>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxMode {
    Client,
    Server,
}

impl From<MuxMode> for yamux::Mode {
    fn from(mode: MuxMode) -> Self {
        match mode {
            MuxMode::Client => yamux::Mode::Client,
            MuxMode::Server => yamux::Mode::Server,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum MuxError {
    #[error("multiplexer closed")]
    Closed,
    #[error("open stream: {0}")]
    Open(String),
}

enum Cmd {
    Open(oneshot::Sender<Result<yamux::Stream, MuxError>>),
    Close(oneshot::Sender<()>),
}

/// Handle to the driver task.
pub struct Mux {
    cmd_tx: mpsc::Sender<Cmd>,
}

impl std::fmt::Debug for Mux {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mux").finish_non_exhaustive()
    }
}

/// Start the mux over an established secure channel.  Returns the handle
/// and the stream of inbound substreams for the dispatch loop.
pub fn start_mux(
    channel: SecureChannel,
    mode: MuxMode,
    cancel: CancellationToken,
) -> (Mux, mpsc::UnboundedReceiver<yamux::Stream>) {
    let config = yamux::Config::default();
    let connection = yamux::Connection::new(channel.compat(), config, mode.into());
    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    tokio::spawn(drive(connection, cmd_rx, inbound_tx, cancel));
    (Mux { cmd_tx }, inbound_rx)
}

impl Mux {
    /// Open an outbound substream.  The caller writes the stream hello.
    pub async fn open_stream(&self) -> Result<SubStream, MuxError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx.send(Cmd::Open(tx)).await.map_err(|_| MuxError::Closed)?;
        match rx.await {
            Ok(Ok(stream)) => Ok(stream.compat()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(MuxError::Closed),
        }
    }

    /// Graceful close; resolves once the driver finished the close
    /// handshake or gave up.
    pub async fn close(&self) {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Cmd::Close(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }
}

async fn drive(
    mut connection: yamux::Connection<Compat<SecureChannel>>,
    mut cmd_rx: mpsc::Receiver<Cmd>,
    inbound_tx: mpsc::UnboundedSender<yamux::Stream>,
    cancel: CancellationToken,
) {
    let mut pending_open: VecDeque<oneshot::Sender<Result<yamux::Stream, MuxError>>> =
        VecDeque::new();
    let mut close_acks: Vec<oneshot::Sender<()>> = Vec::new();
    let mut closing = false;
    let mut cancelled = pin!(cancel.cancelled());

    std::future::poll_fn(|cx| {
        // Once closing, the cancellation future is done; never poll it again.
        if !closing && cancelled.as_mut().poll(cx).is_ready() {
            closing = true;
        }

        // Drain commands; a dropped handle also begins the close.
        loop {
            match cmd_rx.poll_recv(cx) {
                Poll::Ready(Some(Cmd::Open(reply))) => pending_open.push_back(reply),
                Poll::Ready(Some(Cmd::Close(ack))) => {
                    close_acks.push(ack);
                    closing = true;
                }
                Poll::Ready(None) => {
                    closing = true;
                    break;
                }
                Poll::Pending => break,
            }
        }

        if closing {
            for reply in pending_open.drain(..) {
                let _ = reply.send(Err(MuxError::Closed));
            }
            return match connection.poll_close(cx) {
                Poll::Ready(result) => {
                    if let Err(e) = result {
                        debug!(error = %e, "mux close");
                    }
                    for ack in close_acks.drain(..) {
                        let _ = ack.send(());
                    }
                    Poll::Ready(())
                }
                Poll::Pending => Poll::Pending,
            };
        }

        while !pending_open.is_empty() {
            match connection.poll_new_outbound(cx) {
                Poll::Ready(Ok(stream)) => {
                    if let Some(reply) = pending_open.pop_front() {
                        let _ = reply.send(Ok(stream));
                    }
                }
                Poll::Ready(Err(e)) => {
                    let message = e.to_string();
                    for reply in pending_open.drain(..) {
                        let _ = reply.send(Err(MuxError::Open(message.clone())));
                    }
                    return Poll::Ready(());
                }
                Poll::Pending => break,
            }
        }

        loop {
            match connection.poll_next_inbound(cx) {
                Poll::Ready(Some(Ok(stream))) => {
                    // Receiver gone means the dispatch loop stopped; drop
                    // the substream and keep draining the connection.
                    let _ = inbound_tx.send(stream);
                }
                Poll::Ready(Some(Err(e))) => {
                    debug!(error = %e, "mux connection error");
                    return Poll::Ready(());
                }
                Poll::Ready(None) => return Poll::Ready(()),
                Poll::Pending => return Poll::Pending,
            }
        }
    })
    .await;
}
