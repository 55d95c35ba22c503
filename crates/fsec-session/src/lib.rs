// fsec-session: Session shell on top of the secure channel.
//
// Wires the pieces together: tunnel attach prelude, connect orchestration
// for both topologies, the yamux adapter, stream-hello dispatch, the RPC
// runtime, the origin allow-list, and the classified error taxonomy every
// caller-facing failure flows through.

pub mod attach;
pub mod client;
pub mod dispatch;
pub mod error;
pub mod jsonio;
pub mod mux;
pub mod options;
pub mod origin;
pub mod rpc;
pub mod server;
pub mod session;

pub use client::{OutboundParams, connect_direct, connect_tunnel, establish_outbound};
pub use dispatch::{ErrorCallback, StreamRegistry};
pub use error::{Error, ErrorCode, Path, Stage};
pub use mux::{Mux, MuxError, MuxMode, SubStream};
pub use options::{ConnectOptions, DirectConnectInfo, Grant};
pub use origin::OriginPolicy;
pub use rpc::{RpcClient, RpcError, RpcRouter};
pub use server::{AcceptConfig, AxumWsTransport, accept_direct};
pub use session::Session;
