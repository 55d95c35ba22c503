//! Session key schedule.
//!
//! `PRK = HKDF-Extract(salt = psk, ikm = shared_secret || transcript_hash)`,
//! then one `HKDF-Expand(PRK, label, L)` per output.  Labels are the stable
//! wire contract; changing one breaks interop with every deployed peer.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::keys::SharedSecret;

/// Common prefix of every expand label in the v1 key schedule.
pub const LABEL_PREFIX: &str = "flowersec-e2ee-v1:";

const LABEL_C2S_KEY: &[u8] = b"flowersec-e2ee-v1:c2s:key";
const LABEL_S2C_KEY: &[u8] = b"flowersec-e2ee-v1:s2c:key";
const LABEL_REKEY_BASE: &[u8] = b"flowersec-e2ee-v1:rekey_base";
const LABEL_C2S_NONCE_PREFIX: &[u8] = b"flowersec-e2ee-v1:c2s:nonce_prefix";
const LABEL_S2C_NONCE_PREFIX: &[u8] = b"flowersec-e2ee-v1:s2c:nonce_prefix";

/// Directional key material for one secure channel.  Wiped on drop; the
/// record layer copies what it owns and nothing else.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    pub c2s_key: [u8; 32],
    pub s2c_key: [u8; 32],
    pub rekey_base: [u8; 32],
    pub c2s_nonce_prefix: [u8; 4],
    pub s2c_nonce_prefix: [u8; 4],
}

pub fn derive_session_keys(
    psk: &[u8; 32],
    shared_secret: &SharedSecret,
    transcript_hash: &[u8; 32],
) -> SessionKeys {
    let mut ikm = [0u8; 64];
    ikm[..32].copy_from_slice(shared_secret.as_bytes());
    ikm[32..].copy_from_slice(transcript_hash);
    let hk = Hkdf::<Sha256>::new(Some(psk), &ikm);
    ikm.zeroize();

    let mut keys = SessionKeys {
        c2s_key: [0u8; 32],
        s2c_key: [0u8; 32],
        rekey_base: [0u8; 32],
        c2s_nonce_prefix: [0u8; 4],
        s2c_nonce_prefix: [0u8; 4],
    };
    // Output lengths are far below HKDF-SHA256's 255*32 limit.
    hk.expand(LABEL_C2S_KEY, &mut keys.c2s_key).expect("valid length");
    hk.expand(LABEL_S2C_KEY, &mut keys.s2c_key).expect("valid length");
    hk.expand(LABEL_REKEY_BASE, &mut keys.rekey_base).expect("valid length");
    hk.expand(LABEL_C2S_NONCE_PREFIX, &mut keys.c2s_nonce_prefix).expect("valid length");
    hk.expand(LABEL_S2C_NONCE_PREFIX, &mut keys.s2c_nonce_prefix).expect("valid length");
    keys
}
