//! Handshake transcript hash.
//!
//! All session context is folded into one 32-byte SHA-256 digest over a
//! fixed-order concatenation; any divergence between the two sides kills the
//! handshake via auth-tag mismatch.  Variable-length fields carry a
//! big-endian u16 length prefix over the byte count.

use sha2::{Digest, Sha256};

/// Size of the client and server handshake nonces.
pub const NONCE_LEN: usize = 32;

/// Role byte folded into the transcript: the init sender is always the
/// client, so both sides hash `ROLE_CLIENT`.
pub const ROLE_CLIENT: u8 = 1;
pub const ROLE_SERVER: u8 = 2;

pub struct TranscriptInputs<'a> {
    pub version: u8,
    pub suite: u16,
    pub role: u8,
    pub client_features: u32,
    pub server_features: u32,
    pub channel_id: &'a str,
    pub nonce_c: &'a [u8; NONCE_LEN],
    pub nonce_s: &'a [u8; NONCE_LEN],
    pub client_eph_pub: &'a [u8],
    pub server_eph_pub: &'a [u8],
}

/// `SHA-256(version || suite || role || client_features || server_features ||
/// lp(channel_id) || nonce_c || nonce_s || lp(client_eph_pub) ||
/// lp(server_eph_pub))` with all integers big-endian and
/// `lp(x) = len(x) as u16 BE || x`.
pub fn transcript_hash(inputs: &TranscriptInputs<'_>) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([inputs.version]);
    hasher.update(inputs.suite.to_be_bytes());
    hasher.update([inputs.role]);
    hasher.update(inputs.client_features.to_be_bytes());
    hasher.update(inputs.server_features.to_be_bytes());
    update_length_prefixed(&mut hasher, inputs.channel_id.as_bytes());
    hasher.update(inputs.nonce_c);
    hasher.update(inputs.nonce_s);
    update_length_prefixed(&mut hasher, inputs.client_eph_pub);
    update_length_prefixed(&mut hasher, inputs.server_eph_pub);
    hasher.finalize().into()
}

fn update_length_prefixed(hasher: &mut Sha256, bytes: &[u8]) {
    let len = u16::try_from(bytes.len()).expect("transcript field fits u16");
    hasher.update(len.to_be_bytes());
    hasher.update(bytes);
}
