//! Unpadded base64url encoding for binary-in-JSON fields.
//!
//! Every `*_b64u` wire field (ephemeral public keys, nonces, auth tags,
//! handshake ids, endpoint instance ids) uses this alphabet.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

pub fn encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(s)
}

/// Decode a field that must be exactly `N` bytes (nonces, auth tags, PSKs).
pub fn decode_exact<const N: usize>(s: &str) -> Option<[u8; N]> {
    let bytes = decode(s).ok()?;
    <[u8; N]>::try_from(bytes.as_slice()).ok()
}
