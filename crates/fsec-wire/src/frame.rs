//! Binary frame encoding for handshake and record messages.
//!
//! # Handshake frame
//! ```text
//! magic[4] = "FSEH"
//! version[1] = 1
//! type[1]   = 1 (init) | 2 (resp) | 3 (ack)
//! len[4]    = big-endian u32, length of JSON payload in bytes
//! payload[len]
//! ```
//!
//! # Record frame
//! ```text
//! magic[4] = "FSEC"
//! version[1] = 1
//! flags[1]   = 0 (app) | 1 (ping) | 2 (rekey)
//! seq[8]     = big-endian u64
//! len[4]     = big-endian u32, ciphertext length (includes AEAD tag)
//! ciphertext[len]
//! ```
//!
//! # JSON frame
//! `len[4] big-endian u32 || JSON[len]` — used by RPC and the stream hello.
//!
//! Decoders enforce a caller-supplied maximum payload size and reject frames
//! whose total length does not match the declared length.  Unknown record
//! flags are NOT rejected here: the record layer owns that field and fails
//! the session with its own classified error.

use thiserror::Error;

pub const HANDSHAKE_MAGIC: [u8; 4] = *b"FSEH";
pub const RECORD_MAGIC: [u8; 4] = *b"FSEC";
pub const WIRE_VERSION: u8 = 1;

pub const HANDSHAKE_HEADER_LEN: usize = 10;
pub const RECORD_HEADER_LEN: usize = 18;
pub const JSON_FRAME_HEADER_LEN: usize = 4;

pub const DEFAULT_MAX_HANDSHAKE_PAYLOAD: usize = 64 * 1024;
pub const DEFAULT_MAX_RECORD_BYTES: usize = 64 * 1024;
pub const DEFAULT_MAX_JSON_FRAME: usize = 1024 * 1024;

/// Read limit to impose on the underlying message transport, so a single
/// oversized message cannot exhaust memory before framing checks run.
pub fn transport_read_limit(max_handshake_payload: usize, max_record_bytes: usize) -> usize {
    max_handshake_payload.max(max_record_bytes) + RECORD_HEADER_LEN
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("truncated frame: {have} bytes, need at least {need}")]
    Truncated { need: usize, have: usize },
    #[error("bad frame magic")]
    BadMagic,
    #[error("unsupported frame version {0}")]
    BadVersion(u8),
    #[error("unknown handshake frame type {0}")]
    BadType(u8),
    #[error("payload length {len} exceeds limit {max}")]
    Oversized { len: usize, max: usize },
    #[error("declared length {declared} does not match actual {actual}")]
    LengthMismatch { declared: usize, actual: usize },
}

// ---------------------------------------------------------------------------
// Handshake frame
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandshakeType {
    Init = 1,
    Resp = 2,
    Ack = 3,
}

impl HandshakeType {
    pub fn from_wire(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Init),
            2 => Some(Self::Resp),
            3 => Some(Self::Ack),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeFrame {
    pub typ: HandshakeType,
    pub payload: Vec<u8>,
}

pub fn encode_handshake(typ: HandshakeType, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HANDSHAKE_HEADER_LEN + payload.len());
    out.extend_from_slice(&HANDSHAKE_MAGIC);
    out.push(WIRE_VERSION);
    out.push(typ as u8);
    out.extend_from_slice(&u32::try_from(payload.len()).expect("payload fits u32").to_be_bytes());
    out.extend_from_slice(payload);
    out
}

pub fn decode_handshake(buf: &[u8], max_payload: usize) -> Result<HandshakeFrame, FrameError> {
    if buf.len() < HANDSHAKE_HEADER_LEN {
        return Err(FrameError::Truncated {
            need: HANDSHAKE_HEADER_LEN,
            have: buf.len(),
        });
    }
    if buf[0..4] != HANDSHAKE_MAGIC {
        return Err(FrameError::BadMagic);
    }
    if buf[4] != WIRE_VERSION {
        return Err(FrameError::BadVersion(buf[4]));
    }
    let typ = HandshakeType::from_wire(buf[5]).ok_or(FrameError::BadType(buf[5]))?;
    let len = u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]) as usize;
    if len > max_payload {
        return Err(FrameError::Oversized { len, max: max_payload });
    }
    let actual = buf.len() - HANDSHAKE_HEADER_LEN;
    if len != actual {
        return Err(FrameError::LengthMismatch { declared: len, actual });
    }
    Ok(HandshakeFrame {
        typ,
        payload: buf[HANDSHAKE_HEADER_LEN..].to_vec(),
    })
}

// ---------------------------------------------------------------------------
// Record frame
// ---------------------------------------------------------------------------

/// Known record flag values.  The wire field is a raw `u8`; [`decode_record`]
/// passes it through untouched so the record layer can classify unknown
/// values as a session failure rather than a framing error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordFlags {
    App = 0,
    Ping = 1,
    Rekey = 2,
}

impl RecordFlags {
    pub fn from_wire(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::App),
            1 => Some(Self::Ping),
            2 => Some(Self::Rekey),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFrame {
    pub flags: u8,
    pub seq: u64,
    pub ciphertext: Vec<u8>,
}

pub fn encode_record(flags: u8, seq: u64, ciphertext: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(RECORD_HEADER_LEN + ciphertext.len());
    out.extend_from_slice(&RECORD_MAGIC);
    out.push(WIRE_VERSION);
    out.push(flags);
    out.extend_from_slice(&seq.to_be_bytes());
    out.extend_from_slice(
        &u32::try_from(ciphertext.len()).expect("ciphertext fits u32").to_be_bytes(),
    );
    out.extend_from_slice(ciphertext);
    out
}

pub fn decode_record(buf: &[u8], max_ciphertext: usize) -> Result<RecordFrame, FrameError> {
    if buf.len() < RECORD_HEADER_LEN {
        return Err(FrameError::Truncated {
            need: RECORD_HEADER_LEN,
            have: buf.len(),
        });
    }
    if buf[0..4] != RECORD_MAGIC {
        return Err(FrameError::BadMagic);
    }
    if buf[4] != WIRE_VERSION {
        return Err(FrameError::BadVersion(buf[4]));
    }
    let flags = buf[5];
    let seq = u64::from_be_bytes(buf[6..14].try_into().expect("8 bytes"));
    let len = u32::from_be_bytes(buf[14..18].try_into().expect("4 bytes")) as usize;
    if len > max_ciphertext {
        return Err(FrameError::Oversized { len, max: max_ciphertext });
    }
    let actual = buf.len() - RECORD_HEADER_LEN;
    if len != actual {
        return Err(FrameError::LengthMismatch { declared: len, actual });
    }
    Ok(RecordFrame {
        flags,
        seq,
        ciphertext: buf[RECORD_HEADER_LEN..].to_vec(),
    })
}

// ---------------------------------------------------------------------------
// JSON frame
// ---------------------------------------------------------------------------

pub fn encode_json_frame(json: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(JSON_FRAME_HEADER_LEN + json.len());
    out.extend_from_slice(&u32::try_from(json.len()).expect("json fits u32").to_be_bytes());
    out.extend_from_slice(json);
    out
}

/// Decode a complete JSON frame held in one buffer.  Streaming decode (read
/// the length prefix, then the body) lives with the async I/O helpers in the
/// session crate.
pub fn decode_json_frame(buf: &[u8], max_json: usize) -> Result<&[u8], FrameError> {
    if buf.len() < JSON_FRAME_HEADER_LEN {
        return Err(FrameError::Truncated {
            need: JSON_FRAME_HEADER_LEN,
            have: buf.len(),
        });
    }
    let len = u32::from_be_bytes(buf[0..4].try_into().expect("4 bytes")) as usize;
    if len > max_json {
        return Err(FrameError::Oversized { len, max: max_json });
    }
    let actual = buf.len() - JSON_FRAME_HEADER_LEN;
    if len != actual {
        return Err(FrameError::LengthMismatch { declared: len, actual });
    }
    Ok(&buf[JSON_FRAME_HEADER_LEN..])
}
