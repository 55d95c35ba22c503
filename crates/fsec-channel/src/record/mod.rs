//! Record layer: the secure channel.
//!
//! Carries arbitrary bytes over the binary transport as AEAD records with
//! strict sequence ordering, keepalive pings, and in-band rekey, and exposes
//! them as a reliable duplex byte stream (including tokio `AsyncRead` /
//! `AsyncWrite`, which is what the multiplexer consumes).
//!
//! # Internal structure
//!
//! Two background tasks per channel: a receive loop and a write loop.  The
//! send mutex guards `{send_seq, send_key, queue, send_err}`; the read mutex
//! guards `{buffer, recv state, read_err}`.  Sequence allocation, record
//! encryption, and queue append happen in one critical section, so on-wire
//! order equals seq order without serializing the transport write itself.
//!
//! `rekey_now` swaps the send key inside that same critical section, which
//! guarantees every later app frame is encrypted under the new key and
//! carries a strictly greater seq than the rekey record.  The receiver
//! swaps its key at the seq it observed the rekey frame on.
//!
//! Read/write deadlines are watch channels: updating one immediately
//! re-arms any in-flight operation (signal-on-change, not polling).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};

use bytes::BytesMut;
use thiserror::Error;
use tokio::sync::{Notify, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use fsec_crypto::aead::{AEAD_TAG_LEN, open, record_nonce, seal};
use fsec_crypto::{Direction, derive_rekey_key};
use fsec_wire::frame::{RecordFlags, decode_record, encode_record};

use crate::handshake::Established;
use crate::transport::{Message, Transport, TransportError, TransportReader, TransportWriter};

#[derive(Debug, Clone)]
pub struct RecordConfig {
    /// Maximum ciphertext length per record (includes the AEAD tag).
    pub max_record_bytes: usize,
    /// Receive-side plaintext buffering bound; overrun fails the session.
    pub max_buffered_bytes: usize,
    /// Send-side queue bound; writers back-pressure above this.
    pub max_queued_bytes: usize,
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            max_record_bytes: fsec_wire::DEFAULT_MAX_RECORD_BYTES,
            max_buffered_bytes: 1024 * 1024,
            max_queued_bytes: 256 * 1024,
        }
    }
}

impl RecordConfig {
    fn max_plaintext(&self) -> usize {
        self.max_record_bytes - AEAD_TAG_LEN
    }
}

/// Sticky, clonable session failure.  Once set, every subsequent operation
/// on that side of the channel reports it.
#[derive(Debug, Clone, Error)]
pub enum SecureError {
    #[error("secure channel closed")]
    Closed,
    #[error("deadline exceeded")]
    Timeout,
    #[error("canceled")]
    Canceled,
    #[error("transport: {0}")]
    Transport(String),
    #[error("record frame: {0}")]
    Frame(String),
    #[error("text message on secure channel")]
    UnexpectedText,
    #[error("record decrypt failed at seq {seq}")]
    Decrypt { seq: u64 },
    #[error("record seq {got}, expected {expected}")]
    BadSeq { expected: u64, got: u64 },
    #[error("unknown record flag {0}")]
    BadFlag(u8),
    #[error("receive buffer exceeded")]
    RecvBufferExceeded,
}

struct Pending {
    frame: Vec<u8>,
    done: Option<oneshot::Sender<Result<(), SecureError>>>,
}

struct SendState {
    /// Next sequence number to allocate; starts at 1.
    seq: u64,
    key: [u8; 32],
    nonce_prefix: [u8; 4],
    dir: Direction,
    queue: VecDeque<Pending>,
    queued_bytes: usize,
    writing: bool,
    err: Option<SecureError>,
    closed: bool,
    /// Wakers parked on queue space or flush completion.
    wakers: Vec<Waker>,
}

struct RecvState {
    /// Next expected sequence number; starts at 1.
    seq: u64,
    key: [u8; 32],
    nonce_prefix: [u8; 4],
    dir: Direction,
    buffer: BytesMut,
    err: Option<SecureError>,
    eof: bool,
    wakers: Vec<Waker>,
}

struct Shared {
    send: Mutex<SendState>,
    recv: Mutex<RecvState>,
    /// Rekey derivation inputs, fixed for the channel's lifetime.
    rekey_base: [u8; 32],
    transcript_hash: [u8; 32],
    send_ready: Notify,
    read_deadline: watch::Sender<Option<Instant>>,
    write_deadline: watch::Sender<Option<Instant>>,
    cancel: CancellationToken,
    close_once: AtomicBool,
    config: RecordConfig,
    local_addr: Option<String>,
    remote_addr: Option<String>,
}

/// The secure channel handle.  Cheap to clone; all clones share one channel.
#[derive(Clone)]
pub struct SecureChannel {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel").finish_non_exhaustive()
    }
}

impl SecureChannel {
    /// Wrap an established handshake: splits the transport and spawns the
    /// receive and write loops.  The caller-supplied token cancels both.
    pub fn start<T: Transport>(
        transport: T,
        established: &Established,
        config: RecordConfig,
        cancel: CancellationToken,
    ) -> SecureChannel {
        let keys = &established.keys;
        let (send_key, send_prefix, recv_key, recv_prefix) = match established.send_dir {
            Direction::ClientToServer => {
                (keys.c2s_key, keys.c2s_nonce_prefix, keys.s2c_key, keys.s2c_nonce_prefix)
            }
            Direction::ServerToClient => {
                (keys.s2c_key, keys.s2c_nonce_prefix, keys.c2s_key, keys.c2s_nonce_prefix)
            }
        };

        let local_addr = transport.local_addr();
        let remote_addr = transport.remote_addr();
        let shared = Arc::new(Shared {
            send: Mutex::new(SendState {
                seq: 1,
                key: send_key,
                nonce_prefix: send_prefix,
                dir: established.send_dir,
                queue: VecDeque::new(),
                queued_bytes: 0,
                writing: false,
                err: None,
                closed: false,
                wakers: Vec::new(),
            }),
            recv: Mutex::new(RecvState {
                seq: 1,
                key: recv_key,
                nonce_prefix: recv_prefix,
                dir: established.send_dir.opposite(),
                buffer: BytesMut::new(),
                err: None,
                eof: false,
                wakers: Vec::new(),
            }),
            rekey_base: keys.rekey_base,
            transcript_hash: established.transcript_hash,
            send_ready: Notify::new(),
            read_deadline: watch::channel(None).0,
            write_deadline: watch::channel(None).0,
            cancel,
            close_once: AtomicBool::new(false),
            config,
            local_addr,
            remote_addr,
        });

        let (reader, writer) = transport.into_split();
        tokio::spawn(recv_loop(reader, Arc::clone(&shared)));
        tokio::spawn(write_loop(writer, Arc::clone(&shared)));

        SecureChannel { shared }
    }

    pub fn local_addr(&self) -> Option<String> {
        self.shared.local_addr.clone()
    }

    pub fn remote_addr(&self) -> Option<String> {
        self.shared.remote_addr.clone()
    }

    /// Deadline for in-flight and future reads; `None` clears it.  Takes
    /// effect immediately against a blocked `read`.
    pub fn set_read_deadline(&self, deadline: Option<Instant>) {
        let _ = self.shared.read_deadline.send_replace(deadline);
    }

    pub fn set_write_deadline(&self, deadline: Option<Instant>) {
        let _ = self.shared.write_deadline.send_replace(deadline);
    }

    /// Read available plaintext into `buf`.  Returns `Ok(0)` at EOF.
    /// Buffered bytes are always delivered before a sticky error, and a
    /// deadline never discards them.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, SecureError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut deadline_rx = self.shared.read_deadline.subscribe();
        loop {
            let deadline = *deadline_rx.borrow_and_update();
            let data = std::future::poll_fn(|cx| self.poll_read_inner(cx, buf));
            tokio::select! {
                biased;
                result = data => return result,
                changed = deadline_rx.changed() => {
                    if changed.is_err() {
                        return Err(SecureError::Closed);
                    }
                }
                () = sleep_until_opt(deadline) => return Err(SecureError::Timeout),
            }
        }
    }

    /// Write all of `buf`, chunked to the record size.  Resolves when the
    /// write loop has pushed the final chunk into the transport.
    pub async fn write(&self, buf: &[u8]) -> Result<(), SecureError> {
        if buf.is_empty() {
            return Ok(());
        }
        let max_plaintext = self.shared.config.max_plaintext();
        let mut deadline_rx = self.shared.write_deadline.subscribe();
        let mut offset = 0;
        let mut done_rx = None;
        while offset < buf.len() {
            let end = usize::min(offset + max_plaintext, buf.len());
            let last = end == buf.len();
            let rx = self
                .enqueue_with_deadline(&mut deadline_rx, RecordFlags::App as u8, &buf[offset..end], last)
                .await?;
            if last {
                done_rx = rx;
            }
            offset = end;
        }
        self.await_completion(&mut deadline_rx, done_rx).await
    }

    /// Enqueue an encrypted keepalive record and wait for the transport
    /// write, so a dead carrier is observed by the keepalive task.
    pub async fn send_ping(&self) -> Result<(), SecureError> {
        let mut deadline_rx = self.shared.write_deadline.subscribe();
        let rx = {
            let mut send = self.lock_send();
            self.check_send_open(&send)?;
            Some(self.enqueue_record_locked(&mut send, RecordFlags::Ping as u8, &[], true)?)
        };
        self.await_completion(&mut deadline_rx, rx.flatten()).await
    }

    /// Rotate the send key in-band.  The rekey record travels under the old
    /// key; the swap happens while the send lock is still held, so every
    /// subsequent record uses the derived key and a strictly greater seq.
    pub async fn rekey_now(&self) -> Result<(), SecureError> {
        let mut deadline_rx = self.shared.write_deadline.subscribe();
        let rx = {
            let mut send = self.lock_send();
            self.check_send_open(&send)?;
            let rekey_seq = send.seq;
            let rx = self.enqueue_record_locked(&mut send, RecordFlags::Rekey as u8, &[], true)?;
            send.key = derive_rekey_key(
                &self.shared.rekey_base,
                &self.shared.transcript_hash,
                rekey_seq,
                send.dir,
            );
            debug!(seq = rekey_seq, dir = send.dir.label(), "send key rotated");
            Some(rx)
        };
        self.await_completion(&mut deadline_rx, rx.flatten()).await
    }

    /// Idempotent close: signals readers, marks the send side closed, and
    /// tears down both loops (the write loop closes the transport).
    pub fn close(&self) {
        if self.shared.close_once.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut send = self.lock_send();
            send.closed = true;
            wake_all(&mut send.wakers);
        }
        {
            let mut recv = self.lock_recv();
            recv.eof = true;
            wake_all(&mut recv.wakers);
        }
        self.shared.send_ready.notify_one();
        self.shared.cancel.cancel();
        trace!("secure channel closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.close_once.load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------------
    // Poll-level plumbing (shared by the async API and the AsyncRead/Write
    // impls the multiplexer drives)
    // -----------------------------------------------------------------------

    fn lock_send(&self) -> MutexGuard<'_, SendState> {
        self.shared.send.lock().expect("send lock")
    }

    fn lock_recv(&self) -> MutexGuard<'_, RecvState> {
        self.shared.recv.lock().expect("recv lock")
    }

    fn check_send_open(&self, send: &SendState) -> Result<(), SecureError> {
        if let Some(err) = &send.err {
            return Err(err.clone());
        }
        if send.closed {
            return Err(SecureError::Closed);
        }
        Ok(())
    }

    /// Allocate the next seq, seal, frame, and append — one critical
    /// section.  Returns the completion receiver when `with_done` is set.
    fn enqueue_record_locked(
        &self,
        send: &mut SendState,
        flags: u8,
        plaintext: &[u8],
        with_done: bool,
    ) -> Result<Option<oneshot::Receiver<Result<(), SecureError>>>, SecureError> {
        let seq = send.seq;
        let nonce = record_nonce(&send.nonce_prefix, seq);
        let ciphertext = seal(&send.key, &nonce, plaintext)
            .map_err(|e| SecureError::Frame(e.to_string()))?;
        let frame = encode_record(flags, seq, &ciphertext);
        send.seq += 1;
        send.queued_bytes += frame.len();
        let (done, rx) = if with_done {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        send.queue.push_back(Pending { frame, done });
        self.shared.send_ready.notify_one();
        Ok(rx)
    }

    /// Wait for queue space (app records only), then enqueue one chunk.
    async fn enqueue_with_deadline(
        &self,
        deadline_rx: &mut watch::Receiver<Option<Instant>>,
        flags: u8,
        plaintext: &[u8],
        with_done: bool,
    ) -> Result<Option<oneshot::Receiver<Result<(), SecureError>>>, SecureError> {
        loop {
            let deadline = *deadline_rx.borrow_and_update();
            let ready = std::future::poll_fn(|cx| {
                let mut send = self.lock_send();
                if let Err(e) = self.check_send_open(&send) {
                    return Poll::Ready(Err(e));
                }
                if send.queued_bytes >= self.shared.config.max_queued_bytes {
                    send.wakers.push(cx.waker().clone());
                    return Poll::Pending;
                }
                Poll::Ready(self.enqueue_record_locked(&mut send, flags, plaintext, with_done))
            });
            tokio::select! {
                biased;
                result = ready => return result,
                changed = deadline_rx.changed() => {
                    if changed.is_err() {
                        return Err(SecureError::Closed);
                    }
                }
                () = sleep_until_opt(deadline) => return Err(SecureError::Timeout),
            }
        }
    }

    async fn await_completion(
        &self,
        deadline_rx: &mut watch::Receiver<Option<Instant>>,
        rx: Option<oneshot::Receiver<Result<(), SecureError>>>,
    ) -> Result<(), SecureError> {
        let Some(mut rx) = rx else { return Ok(()) };
        loop {
            let deadline = *deadline_rx.borrow_and_update();
            tokio::select! {
                biased;
                result = &mut rx => {
                    return match result {
                        Ok(outcome) => outcome,
                        // Write loop dropped the sender mid-teardown.
                        Err(_) => Err(self.sticky_send_err()),
                    };
                }
                changed = deadline_rx.changed() => {
                    if changed.is_err() {
                        return Err(SecureError::Closed);
                    }
                }
                () = sleep_until_opt(deadline) => return Err(SecureError::Timeout),
            }
        }
    }

    fn sticky_send_err(&self) -> SecureError {
        self.lock_send().err.clone().unwrap_or(SecureError::Closed)
    }

    fn poll_read_inner(&self, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<Result<usize, SecureError>> {
        let mut recv = self.lock_recv();
        if !recv.buffer.is_empty() {
            let n = usize::min(buf.len(), recv.buffer.len());
            buf[..n].copy_from_slice(&recv.buffer.split_to(n));
            return Poll::Ready(Ok(n));
        }
        if let Some(err) = &recv.err {
            return Poll::Ready(Err(err.clone()));
        }
        if recv.eof {
            return Poll::Ready(Ok(0));
        }
        recv.wakers.push(cx.waker().clone());
        Poll::Pending
    }

    fn poll_write_inner(&self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<Result<usize, SecureError>> {
        let mut send = self.lock_send();
        if let Err(e) = self.check_send_open(&send) {
            return Poll::Ready(Err(e));
        }
        if send.queued_bytes >= self.shared.config.max_queued_bytes {
            send.wakers.push(cx.waker().clone());
            return Poll::Pending;
        }
        let n = usize::min(buf.len(), self.shared.config.max_plaintext());
        match self.enqueue_record_locked(&mut send, RecordFlags::App as u8, &buf[..n], false) {
            Ok(_) => Poll::Ready(Ok(n)),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_flush_inner(&self, cx: &mut Context<'_>) -> Poll<Result<(), SecureError>> {
        let mut send = self.lock_send();
        if let Some(err) = &send.err {
            return Poll::Ready(Err(err.clone()));
        }
        if send.queue.is_empty() && !send.writing {
            return Poll::Ready(Ok(()));
        }
        send.wakers.push(cx.waker().clone());
        Poll::Pending
    }
}

fn wake_all(wakers: &mut Vec<Waker>) {
    for waker in wakers.drain(..) {
        waker.wake();
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Mark both sides failed and stop the loops.  First error wins.
fn fail_session(shared: &Arc<Shared>, err: &SecureError) {
    {
        let mut send = shared.send.lock().expect("send lock");
        if send.err.is_none() {
            send.err = Some(err.clone());
        }
        for mut pending in send.queue.drain(..) {
            if let Some(done) = pending.done.take() {
                let _ = done.send(Err(err.clone()));
            }
        }
        send.queued_bytes = 0;
        wake_all(&mut send.wakers);
    }
    {
        let mut recv = shared.recv.lock().expect("recv lock");
        if recv.err.is_none() && !recv.eof {
            recv.err = Some(err.clone());
        }
        wake_all(&mut recv.wakers);
    }
    shared.send_ready.notify_one();
    shared.cancel.cancel();
}

// ---------------------------------------------------------------------------
// Write loop
// ---------------------------------------------------------------------------

async fn write_loop<W: TransportWriter>(mut writer: W, shared: Arc<Shared>) {
    loop {
        let next = {
            let mut send = shared.send.lock().expect("send lock");
            match send.queue.pop_front() {
                Some(pending) => {
                    send.writing = true;
                    Some(pending)
                }
                None => {
                    send.writing = false;
                    // Queue drained: unblock flush waiters.
                    wake_all(&mut send.wakers);
                    None
                }
            }
        };

        let Some(mut pending) = next else {
            if shared.close_once.load(Ordering::SeqCst) {
                let _ = writer.close().await;
                return;
            }
            tokio::select! {
                () = shared.send_ready.notified() => continue,
                () = shared.cancel.cancelled() => {
                    let _ = writer.close().await;
                    return;
                }
            }
        };

        let frame_len = pending.frame.len();
        let frame = std::mem::take(&mut pending.frame);
        let result = tokio::select! {
            biased;
            result = writer.write_message(Message::Binary(frame)) => result,
            () = shared.cancel.cancelled() => Err(TransportError::Canceled),
        };
        match result {
            Ok(()) => {
                {
                    let mut send = shared.send.lock().expect("send lock");
                    send.queued_bytes = send.queued_bytes.saturating_sub(frame_len);
                    send.writing = false;
                    wake_all(&mut send.wakers);
                }
                if let Some(done) = pending.done.take() {
                    let _ = done.send(Ok(()));
                }
            }
            Err(e) => {
                let err = match e {
                    TransportError::Canceled => SecureError::Closed,
                    other => SecureError::Transport(other.to_string()),
                };
                if let Some(done) = pending.done.take() {
                    let _ = done.send(Err(err.clone()));
                }
                fail_session(&shared, &err);
                let _ = writer.close().await;
                return;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Receive loop
// ---------------------------------------------------------------------------

async fn recv_loop<R: TransportReader>(mut reader: R, shared: Arc<Shared>) {
    loop {
        let msg = tokio::select! {
            biased;
            msg = reader.read_message() => msg,
            () = shared.cancel.cancelled() => return,
        };
        match msg {
            Ok(Message::Binary(bytes)) => {
                if let Err(err) = process_record(&shared, &bytes) {
                    fail_session(&shared, &err);
                    return;
                }
            }
            Ok(Message::Text(_)) => {
                fail_session(&shared, &SecureError::UnexpectedText);
                return;
            }
            Err(TransportError::Closed { code: None, reason: None }) => {
                // Clean peer close: readers drain the buffer, then EOF.
                let mut recv = shared.recv.lock().expect("recv lock");
                recv.eof = true;
                wake_all(&mut recv.wakers);
                drop(recv);
                let mut send = shared.send.lock().expect("send lock");
                if send.err.is_none() {
                    send.err = Some(SecureError::Closed);
                }
                wake_all(&mut send.wakers);
                drop(send);
                shared.send_ready.notify_one();
                shared.cancel.cancel();
                return;
            }
            Err(e) => {
                fail_session(&shared, &SecureError::Transport(e.to_string()));
                return;
            }
        }
    }
}

fn process_record(shared: &Arc<Shared>, bytes: &[u8]) -> Result<(), SecureError> {
    let frame = decode_record(bytes, shared.config.max_record_bytes)
        .map_err(|e| SecureError::Frame(e.to_string()))?;

    let mut recv = shared.recv.lock().expect("recv lock");
    if frame.seq != recv.seq {
        return Err(SecureError::BadSeq { expected: recv.seq, got: frame.seq });
    }
    let nonce = record_nonce(&recv.nonce_prefix, frame.seq);
    let plaintext =
        open(&recv.key, &nonce, &frame.ciphertext).map_err(|_| SecureError::Decrypt { seq: frame.seq })?;
    recv.seq += 1;

    match RecordFlags::from_wire(frame.flags) {
        Some(RecordFlags::App) => {
            if recv.buffer.len() + plaintext.len() > shared.config.max_buffered_bytes {
                return Err(SecureError::RecvBufferExceeded);
            }
            recv.buffer.extend_from_slice(&plaintext);
            wake_all(&mut recv.wakers);
        }
        Some(RecordFlags::Ping) => {
            // Keepalive or the server-finished signal; nothing to deliver.
            trace!(seq = frame.seq, "ping record");
        }
        Some(RecordFlags::Rekey) => {
            recv.key = derive_rekey_key(
                &shared.rekey_base,
                &shared.transcript_hash,
                frame.seq,
                recv.dir,
            );
            debug!(seq = frame.seq, dir = recv.dir.label(), "recv key rotated");
        }
        None => return Err(SecureError::BadFlag(frame.flags)),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// tokio AsyncRead / AsyncWrite (the multiplexer's view)
// ---------------------------------------------------------------------------

impl tokio::io::AsyncRead for SecureChannel {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let unfilled = buf.initialize_unfilled();
        match self.poll_read_inner(cx, unfilled) {
            Poll::Ready(Ok(n)) => {
                buf.advance(n);
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(io_err(e))),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl tokio::io::AsyncWrite for SecureChannel {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.poll_write_inner(cx, buf) {
            Poll::Ready(Ok(n)) => Poll::Ready(Ok(n)),
            Poll::Ready(Err(e)) => Poll::Ready(Err(io_err(e))),
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_flush(self: std::pin::Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.poll_flush_inner(cx) {
            Poll::Ready(Ok(())) => Poll::Ready(Ok(())),
            Poll::Ready(Err(e)) => Poll::Ready(Err(io_err(e))),
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_shutdown(self: std::pin::Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.close();
        Poll::Ready(Ok(()))
    }
}

fn io_err(e: SecureError) -> std::io::Error {
    use std::io::ErrorKind;
    let kind = match &e {
        SecureError::Closed => ErrorKind::BrokenPipe,
        SecureError::Timeout => ErrorKind::TimedOut,
        SecureError::Canceled => ErrorKind::Interrupted,
        _ => ErrorKind::Other,
    };
    std::io::Error::new(kind, e)
}
