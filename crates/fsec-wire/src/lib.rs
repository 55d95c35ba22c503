// fsec-wire: Wire formats for the flowersec session protocol.
//
// Three frame formats ride the binary transport: magic-prefixed handshake
// frames, magic-prefixed record frames, and bare length-prefixed JSON frames
// (RPC and stream hello).  All JSON payloads use snake_case field names and
// are frozen v1 shapes: unknown fields are ignored on receive and never
// emitted on send.

pub mod b64u;
pub mod frame;
pub mod messages;

pub use frame::{
    DEFAULT_MAX_HANDSHAKE_PAYLOAD, DEFAULT_MAX_JSON_FRAME, DEFAULT_MAX_RECORD_BYTES, FrameError,
    HANDSHAKE_HEADER_LEN, HANDSHAKE_MAGIC, HandshakeFrame, HandshakeType, JSON_FRAME_HEADER_LEN,
    RECORD_HEADER_LEN, RECORD_MAGIC, RecordFlags, RecordFrame, WIRE_VERSION, decode_handshake,
    decode_json_frame, decode_record, encode_handshake, encode_json_frame, encode_record,
    transport_read_limit,
};
pub use messages::{
    Attach, AttachReason, E2eeAck, E2eeInit, E2eeResp, EndpointRole, RpcErrorBody, RpcRequest,
    RpcResponse, StreamHello,
};
