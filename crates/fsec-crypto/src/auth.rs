//! Handshake auth tag.
//!
//! `HMAC-SHA-256(psk, transcript_hash || timestamp_unix_s as u64 BE)`,
//! produced by the client in the ack and verified by the server in constant
//! time.  The PSK is the only long-lived secret; the transcript carries all
//! identity.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub fn auth_tag(psk: &[u8; 32], transcript_hash: &[u8; 32], timestamp_unix_s: u64) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(psk).expect("HMAC accepts 32-byte keys");
    mac.update(transcript_hash);
    mac.update(&timestamp_unix_s.to_be_bytes());
    mac.finalize().into_bytes().into()
}

/// Constant-time verification via the `Mac` trait.
pub fn verify_auth_tag(
    psk: &[u8; 32],
    transcript_hash: &[u8; 32],
    timestamp_unix_s: u64,
    tag: &[u8],
) -> bool {
    let mut mac = HmacSha256::new_from_slice(psk).expect("HMAC accepts 32-byte keys");
    mac.update(transcript_hash);
    mac.update(&timestamp_unix_s.to_be_bytes());
    mac.verify_slice(tag).is_ok()
}
