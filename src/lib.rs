// flowersec: end-to-end encrypted, multiplexed, application-level sessions
// over a WebSocket byte carrier.
//
// Facade crate: re-exports the workspace layers and the common entry
// points.  See `fsec-channel` for the handshake and record layer,
// `fsec-session` for connect orchestration, dispatch, and RPC.

pub use fsec_channel as channel;
pub use fsec_crypto as crypto;
pub use fsec_session as session;
pub use fsec_wire as wire;

pub use fsec_session::{
    AcceptConfig, ConnectOptions, DirectConnectInfo, Error, ErrorCode, Grant, OriginPolicy, Path,
    RpcError, RpcRouter, Session, Stage, StreamRegistry, accept_direct, connect_direct,
    connect_tunnel,
};
