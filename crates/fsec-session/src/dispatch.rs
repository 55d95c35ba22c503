//! Substream dispatch.
//!
//! Every accepted substream begins with a `StreamHello` JSON frame naming
//! its kind.  Registered handlers run in their own tasks; the reserved
//! `"rpc"` kind runs the RPC server when a router is configured; anything
//! else is closed.  A bad hello is reported and the accept loop continues —
//! one misbehaving substream never takes the session down.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::compat::FuturesAsyncReadCompatExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use fsec_wire::StreamHello;

use crate::error::{Error, ErrorCode, Path, Stage};
use crate::jsonio::read_json_frame;
use crate::mux::SubStream;
use crate::rpc::{RpcRouter, serve_rpc};

pub const DEFAULT_HELLO_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_HELLO_BYTES: usize = 4096;

type HandlerFn = Arc<dyn Fn(SubStream) -> BoxFuture<'static, ()> + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(Error) + Send + Sync>;

/// Named substream handlers plus the optional RPC hook.
///
/// Built once per endpoint and shared by every session it serves.
#[derive(Clone)]
pub struct StreamRegistry {
    handlers: HashMap<String, HandlerFn>,
    rpc: Option<Arc<RpcRouter>>,
    on_error: Option<ErrorCallback>,
    hello_timeout: Duration,
    max_hello_bytes: usize,
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            rpc: None,
            on_error: None,
            hello_timeout: DEFAULT_HELLO_TIMEOUT,
            max_hello_bytes: DEFAULT_MAX_HELLO_BYTES,
        }
    }

    /// Register a handler for a substream kind.  The handler owns the
    /// substream for its lifetime; it is closed when the handler returns.
    pub fn register<F, Fut>(mut self, kind: impl Into<String>, handler: F) -> Self
    where
        F: Fn(SubStream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handlers.insert(kind.into(), Arc::new(move |stream| Box::pin(handler(stream))));
        self
    }

    /// Serve the given router on the reserved `"rpc"` substream kind.
    pub fn with_rpc(mut self, router: RpcRouter) -> Self {
        self.rpc = Some(Arc::new(router));
        self
    }

    /// Observe non-terminal dispatch errors (bad hellos, handler panics).
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(Error) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    pub fn hello_timeout(mut self, timeout: Duration) -> Self {
        self.hello_timeout = timeout;
        self
    }

    fn report(&self, error: Error) {
        if let Some(callback) = &self.on_error {
            callback(error);
        }
    }
}

/// Accept loop: terminal only on cancel or mux teardown; substream handlers
/// run independently.
pub(crate) async fn run_dispatch(
    mut incoming: mpsc::UnboundedReceiver<yamux::Stream>,
    registry: Arc<StreamRegistry>,
    path: Path,
    cancel: CancellationToken,
) {
    loop {
        let stream = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            stream = incoming.recv() => match stream {
                Some(stream) => stream,
                None => break,
            },
        };
        let registry = Arc::clone(&registry);
        tokio::spawn(handle_substream(stream.compat(), registry, path));
    }
    debug!("dispatch loop stopped");
}

async fn handle_substream(mut stream: SubStream, registry: Arc<StreamRegistry>, path: Path) {
    let hello: StreamHello = match tokio::time::timeout(
        registry.hello_timeout,
        read_json_frame(&mut stream, registry.max_hello_bytes),
    )
    .await
    {
        Ok(Ok(hello)) => hello,
        Ok(Err(e)) => {
            registry.report(
                Error::new(path, Stage::Yamux, ErrorCode::StreamHelloFailed).with_cause(e),
            );
            let _ = stream.shutdown().await;
            return;
        }
        Err(_) => {
            registry.report(Error::new(path, Stage::Yamux, ErrorCode::StreamHelloFailed).with_cause(
                "timed out waiting for stream hello",
            ));
            let _ = stream.shutdown().await;
            return;
        }
    };

    if hello.kind.is_empty() {
        registry.report(Error::new(path, Stage::Yamux, ErrorCode::MissingStreamKind));
        let _ = stream.shutdown().await;
        return;
    }

    if hello.kind == StreamHello::RPC_KIND {
        if let Some(router) = registry.rpc.clone() {
            serve_rpc(stream, router, registry.on_error.clone(), path).await;
            return;
        }
        registry.report(Error::new(path, Stage::Yamux, ErrorCode::MissingHandler)
            .with_cause("no rpc router configured"));
        let _ = stream.shutdown().await;
        return;
    }

    let Some(handler) = registry.handlers.get(&hello.kind).cloned() else {
        debug!(kind = %hello.kind, "no handler for substream kind");
        registry.report(
            Error::new(path, Stage::Yamux, ErrorCode::MissingHandler)
                .with_cause(format!("no handler for kind {:?}", hello.kind)),
        );
        let _ = stream.shutdown().await;
        return;
    };

    // Run the handler in its own task so a panic is contained and
    // observable, then close whatever the handler left behind.
    let outcome = tokio::spawn(handler(stream)).await;
    if let Err(join_err) = outcome
        && join_err.is_panic()
    {
        warn!(kind = %hello.kind, "substream handler panicked");
        registry.report(
            Error::new(path, Stage::Yamux, ErrorCode::AcceptStreamFailed)
                .with_cause(format!("handler for {:?} panicked", hello.kind)),
        );
    }
}
