//! Cipher suite registry.
//!
//! A suite is an integer wire tag selecting `{ECDH curve, KDF, AEAD}`.  Both
//! defined suites share HKDF-SHA256 and AES-256-GCM; they differ only in the
//! curve and therefore the ephemeral public key length.

use crate::CryptoError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Suite {
    /// X25519 + HKDF-SHA256 + AES-256-GCM.
    X25519HkdfSha256Aes256Gcm = 1,
    /// P-256 + HKDF-SHA256 + AES-256-GCM.
    P256HkdfSha256Aes256Gcm = 2,
}

impl Suite {
    pub const ALL: [Suite; 2] = [Self::X25519HkdfSha256Aes256Gcm, Self::P256HkdfSha256Aes256Gcm];
    pub const DEFAULT: Suite = Self::X25519HkdfSha256Aes256Gcm;

    pub fn from_wire(tag: u16) -> Result<Self, CryptoError> {
        match tag {
            1 => Ok(Self::X25519HkdfSha256Aes256Gcm),
            2 => Ok(Self::P256HkdfSha256Aes256Gcm),
            other => Err(CryptoError::UnsupportedSuite(other)),
        }
    }

    pub fn wire(self) -> u16 {
        self as u16
    }

    /// Byte length of an ephemeral public key on the wire: X25519 raw
    /// 32 bytes, P-256 SEC1 uncompressed 65 bytes.
    pub fn ephemeral_public_len(self) -> usize {
        match self {
            Self::X25519HkdfSha256Aes256Gcm => 32,
            Self::P256HkdfSha256Aes256Gcm => 65,
        }
    }
}
