// fsec-channel: The cryptographic session layer.
//
// Three pieces stack here, bottom up:
//
// 1. `transport` — a duplex, message-oriented byte pipe (a WebSocket binary
//    message in the reference integration) with cancellation-aware reads
//    and writes.
// 2. `handshake` — the PSK + ephemeral ECDH exchange with a server-side
//    init cache for deterministic retries.
// 3. `record` — the secure channel: AEAD records with strict sequence
//    ordering, keepalive pings, and in-band rekey, exposed as a reliable
//    duplex byte stream.

pub mod handshake;
pub mod record;
pub mod transport;

pub use handshake::{
    ChannelSecrets, ClientConfig, Established, HandshakeCache, HandshakeError, ResolveChannel,
    ResolveRequest, SecretSource, ServerConfig, client_handshake, server_handshake,
};
pub use record::{RecordConfig, SecureChannel, SecureError};
pub use transport::{
    MemTransport, Message, Transport, TransportError, TransportReader, TransportWriter,
    WsTransport, mem_pair,
};
