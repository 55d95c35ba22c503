//! Request/response RPC over the reserved `"rpc"` substream kind.
//!
//! Length-prefixed JSON frames carry `{id, type_id, payload}` requests and
//! `{id, ok, payload | error}` responses.  The server routes by `type_id`
//! and runs handlers concurrently; the client correlates responses by the
//! `id` it assigned.  Ordering across concurrent calls is not guaranteed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use fsec_wire::{DEFAULT_MAX_JSON_FRAME, RpcErrorBody, RpcRequest, RpcResponse};

use crate::dispatch::ErrorCallback;
use crate::error::{Error, ErrorCode, Path, Stage};
use crate::jsonio::{JsonIoError, read_json_frame, write_json_frame};
use crate::mux::SubStream;

/// Error code for a request whose `type_id` has no registered handler.
pub const RPC_CODE_UNKNOWN_TYPE: u32 = 1;
/// Error code for a handler that panicked.
pub const RPC_CODE_HANDLER_PANIC: u32 = 2;

/// Handler-level failure, surfaced to the caller inside the response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    pub code: u32,
    pub message: String,
}

impl RpcError {
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

type RpcHandlerFn =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, RpcError>> + Send + Sync>;

/// Maps `type_id` to handlers.
#[derive(Clone)]
pub struct RpcRouter {
    handlers: HashMap<u32, RpcHandlerFn>,
    max_frame_bytes: usize,
}

impl Default for RpcRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcRouter {
    pub fn new() -> Self {
        Self { handlers: HashMap::new(), max_frame_bytes: DEFAULT_MAX_JSON_FRAME }
    }

    pub fn route<F, Fut>(mut self, type_id: u32, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
    {
        self.handlers.insert(type_id, Arc::new(move |payload| Box::pin(handler(payload))));
        self
    }

    pub fn with_max_frame_bytes(mut self, max: usize) -> Self {
        self.max_frame_bytes = max;
        self
    }
}

/// Serve requests on one RPC substream until EOF or a transport error.
/// Frame errors are reported through the optional callback and stop serving.
pub(crate) async fn serve_rpc(
    stream: SubStream,
    router: Arc<RpcRouter>,
    on_error: Option<ErrorCallback>,
    path: Path,
) {
    let (mut reader, writer) = tokio::io::split(stream);
    let (resp_tx, mut resp_rx) = mpsc::channel::<RpcResponse>(16);

    let max_frame = router.max_frame_bytes;
    let writer_task = tokio::spawn(async move {
        let mut writer = writer;
        while let Some(response) = resp_rx.recv().await {
            if let Err(e) = write_json_frame(&mut writer, &response).await {
                debug!(error = %e, "rpc response write failed");
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    loop {
        match read_json_frame::<_, RpcRequest>(&mut reader, max_frame).await {
            Ok(request) => {
                let router = Arc::clone(&router);
                let resp_tx = resp_tx.clone();
                tokio::spawn(async move {
                    let response = dispatch_request(&router, request).await;
                    let _ = resp_tx.send(response).await;
                });
            }
            Err(JsonIoError::Eof) => break,
            Err(e) => {
                if let Some(callback) = &on_error {
                    callback(Error::new(path, Stage::Rpc, ErrorCode::RpcFailed).with_cause(e));
                }
                break;
            }
        }
    }

    // Dropping our sender lets in-flight handler responses drain first.
    drop(resp_tx);
    let _ = writer_task.await;
}

async fn dispatch_request(router: &RpcRouter, request: RpcRequest) -> RpcResponse {
    let Some(handler) = router.handlers.get(&request.type_id).cloned() else {
        return RpcResponse {
            id: request.id,
            ok: false,
            payload: None,
            error: Some(RpcErrorBody {
                code: RPC_CODE_UNKNOWN_TYPE,
                message: format!("no handler for type_id {}", request.type_id),
            }),
        };
    };
    // Contain handler panics to the failing request.
    let outcome = tokio::spawn(handler(request.payload)).await;
    match outcome {
        Ok(Ok(payload)) => RpcResponse { id: request.id, ok: true, payload: Some(payload), error: None },
        Ok(Err(e)) => RpcResponse {
            id: request.id,
            ok: false,
            payload: None,
            error: Some(RpcErrorBody { code: e.code, message: e.message }),
        },
        Err(join_err) => {
            warn!(type_id = request.type_id, "rpc handler panicked");
            let _ = join_err;
            RpcResponse {
                id: request.id,
                ok: false,
                payload: None,
                error: Some(RpcErrorBody {
                    code: RPC_CODE_HANDLER_PANIC,
                    message: "handler panicked".to_owned(),
                }),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

struct ClientShared {
    pending: Mutex<HashMap<u64, oneshot::Sender<RpcResponse>>>,
}

/// Client half: issues requests and correlates responses by id.
pub struct RpcClient {
    next_id: AtomicU64,
    shared: Arc<ClientShared>,
    req_tx: mpsc::Sender<RpcRequest>,
    path: Path,
}

impl RpcClient {
    /// Drive an opened (hello already written) RPC substream.
    pub fn start(stream: SubStream, path: Path) -> Self {
        Self::with_max_frame_bytes(stream, path, DEFAULT_MAX_JSON_FRAME)
    }

    pub fn with_max_frame_bytes(stream: SubStream, path: Path, max_frame_bytes: usize) -> Self {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let shared = Arc::new(ClientShared { pending: Mutex::new(HashMap::new()) });
        let (req_tx, mut req_rx) = mpsc::channel::<RpcRequest>(16);

        tokio::spawn(async move {
            while let Some(request) = req_rx.recv().await {
                if let Err(e) = write_json_frame(&mut writer, &request).await {
                    debug!(error = %e, "rpc request write failed");
                    break;
                }
            }
            let _ = writer.shutdown().await;
        });

        let reader_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            loop {
                match read_json_frame::<_, RpcResponse>(&mut reader, max_frame_bytes).await {
                    Ok(response) => {
                        let waiter = reader_shared
                            .pending
                            .lock()
                            .expect("rpc pending lock")
                            .remove(&response.id);
                        match waiter {
                            Some(tx) => {
                                let _ = tx.send(response);
                            }
                            None => debug!(id = response.id, "rpc response with no waiter"),
                        }
                    }
                    Err(JsonIoError::Eof) => break,
                    Err(e) => {
                        debug!(error = %e, "rpc response read failed");
                        break;
                    }
                }
            }
            // Waking every waiter with a dropped sender surfaces rpc_failed.
            reader_shared.pending.lock().expect("rpc pending lock").clear();
        });

        Self { next_id: AtomicU64::new(1), shared, req_tx, path }
    }

    /// Issue one call and wait for its correlated response.
    ///
    /// `Ok` carries the response payload; a handler error or a dead
    /// substream classifies as `rpc_failed`.
    pub async fn call(&self, type_id: u32, payload: Value) -> Result<Value, Error> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().expect("rpc pending lock").insert(id, tx);

        let request = RpcRequest { id, type_id, payload };
        if self.req_tx.send(request).await.is_err() {
            self.shared.pending.lock().expect("rpc pending lock").remove(&id);
            return Err(Error::new(self.path, Stage::Rpc, ErrorCode::NotConnected));
        }

        match rx.await {
            Ok(response) if response.ok => Ok(response.payload.unwrap_or(Value::Null)),
            Ok(response) => {
                let body = response.error.unwrap_or(RpcErrorBody {
                    code: 0,
                    message: "unspecified rpc error".to_owned(),
                });
                Err(Error::new(self.path, Stage::Rpc, ErrorCode::RpcFailed)
                    .with_cause(format!("code {}: {}", body.code, body.message)))
            }
            Err(_) => Err(Error::new(self.path, Stage::Rpc, ErrorCode::RpcFailed)
                .with_cause("rpc substream closed before the response arrived")),
        }
    }
}
