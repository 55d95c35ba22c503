// fsec-crypto: Cryptographic primitives for the flowersec handshake and
// record layer.
//
// Suite registry (ECDH curve + HKDF-SHA256 + AES-256-GCM), transcript hash,
// session-key derivation, handshake auth tag, and the per-rekey KDF.  All
// derivation labels live here so the wire contract has a single home.
//
// The AEAD key (32 bytes) and nonce (12 bytes) sizes are fixed across
// suites; only the ephemeral key length and ECDH operation vary.

pub mod aead;
pub mod auth;
pub mod derive;
pub mod keys;
pub mod rekey;
pub mod suite;
pub mod transcript;

use thiserror::Error;

pub use aead::{AEAD_KEY_LEN, AEAD_NONCE_LEN, AEAD_TAG_LEN, NONCE_PREFIX_LEN, open, record_nonce, seal};
pub use auth::{auth_tag, verify_auth_tag};
pub use derive::{LABEL_PREFIX, SessionKeys, derive_session_keys};
pub use keys::{EphemeralSecret, SharedSecret};
pub use rekey::{Direction, REKEY_LABEL, derive_rekey_key};
pub use suite::Suite;
pub use transcript::{NONCE_LEN, ROLE_CLIENT, ROLE_SERVER, TranscriptInputs, transcript_hash};

/// Pre-shared key: 32 bytes of high-entropy secret distributed out-of-band.
pub const PSK_LEN: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("unsupported suite {0}")]
    UnsupportedSuite(u16),
    #[error("invalid peer public key for {suite:?}")]
    InvalidPeerKey { suite: Suite },
    #[error("non-contributory peer public key")]
    NonContributory,
    #[error("AEAD open failed")]
    DecryptFailed,
    #[error("plaintext too large for a single record")]
    PlaintextTooLarge,
    #[error("system randomness unavailable")]
    RandomFailed,
}

/// Fill a fixed-size buffer from the OS CSPRNG.
///
/// Randomness failure is reported, not panicked on, so connect paths can
/// classify it as `random_failed`.
pub fn random_bytes<const N: usize>() -> Result<[u8; N], CryptoError> {
    use rand::RngCore;
    let mut out = [0u8; N];
    rand::rngs::OsRng
        .try_fill_bytes(&mut out)
        .map_err(|_| CryptoError::RandomFailed)?;
    Ok(out)
}
