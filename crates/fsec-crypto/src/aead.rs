//! Record AEAD: AES-256-GCM with a counter nonce.
//!
//! Nonce = `nonce_prefix(4) || seq(u64 BE)`.  Uniqueness holds because seq
//! is strictly monotonic under a given key and the key rotates on rekey.
//! No AAD: the record header is bound by the strict seq check instead.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};

use crate::CryptoError;

pub const AEAD_KEY_LEN: usize = 32;
pub const AEAD_NONCE_LEN: usize = 12;
pub const AEAD_TAG_LEN: usize = 16;
pub const NONCE_PREFIX_LEN: usize = 4;

pub fn record_nonce(prefix: &[u8; NONCE_PREFIX_LEN], seq: u64) -> [u8; AEAD_NONCE_LEN] {
    let mut nonce = [0u8; AEAD_NONCE_LEN];
    nonce[..NONCE_PREFIX_LEN].copy_from_slice(prefix);
    nonce[NONCE_PREFIX_LEN..].copy_from_slice(&seq.to_be_bytes());
    nonce
}

/// Encrypt one record body.  Output is `ciphertext || tag`.
pub fn seal(
    key: &[u8; AEAD_KEY_LEN],
    nonce: &[u8; AEAD_NONCE_LEN],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad: &[] })
        .map_err(|_| CryptoError::PlaintextTooLarge)
}

pub fn open(
    key: &[u8; AEAD_KEY_LEN],
    nonce: &[u8; AEAD_NONCE_LEN],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad: &[] })
        .map_err(|_| CryptoError::DecryptFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let key = [1u8; 32];
        let nonce = record_nonce(&[2; 4], 1);
        let ct = seal(&key, &nonce, b"hello").unwrap();
        assert_eq!(ct.len(), 5 + AEAD_TAG_LEN);
        assert_eq!(open(&key, &nonce, &ct).unwrap(), b"hello");
    }

    #[test]
    fn empty_plaintext_yields_tag_only_record() {
        let key = [1u8; 32];
        let nonce = record_nonce(&[0; 4], 7);
        let ct = seal(&key, &nonce, b"").unwrap();
        assert_eq!(ct.len(), AEAD_TAG_LEN);
        assert_eq!(open(&key, &nonce, &ct).unwrap(), b"");
    }

    #[test]
    fn wrong_key_nonce_or_bitflip_fails_open() {
        let key = [1u8; 32];
        let nonce = record_nonce(&[2; 4], 1);
        let ct = seal(&key, &nonce, b"hello").unwrap();

        assert_eq!(open(&[9u8; 32], &nonce, &ct), Err(CryptoError::DecryptFailed));

        let other_nonce = record_nonce(&[2; 4], 2);
        assert_eq!(open(&key, &other_nonce, &ct), Err(CryptoError::DecryptFailed));

        let mut tampered = ct.clone();
        tampered[0] ^= 1;
        assert_eq!(open(&key, &nonce, &tampered), Err(CryptoError::DecryptFailed));
    }

    #[test]
    fn nonce_layout_is_prefix_then_seq() {
        let nonce = record_nonce(&[0xAA, 0xBB, 0xCC, 0xDD], 0x0102_0304_0506_0708);
        assert_eq!(nonce, [0xAA, 0xBB, 0xCC, 0xDD, 1, 2, 3, 4, 5, 6, 7, 8]);
    }
}
