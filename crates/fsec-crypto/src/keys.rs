//! Per-handshake ephemeral keypairs and the ECDH operation.
//!
//! The X25519 secret is held as a `StaticSecret` (not `EphemeralSecret`)
//! because the server's handshake cache must reuse the same keypair across
//! deterministic init retries; the key still lives only for one handshake.

use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{CryptoError, Suite};

/// Raw ECDH output, always 32 bytes for both suites.  Wiped on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; 32]);

impl SharedSecret {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Construct from raw bytes (vector tests and key-schedule tests).
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

pub enum EphemeralSecret {
    X25519(x25519_dalek::StaticSecret),
    P256(p256::ecdh::EphemeralSecret),
}

impl EphemeralSecret {
    pub fn generate(suite: Suite) -> Self {
        match suite {
            Suite::X25519HkdfSha256Aes256Gcm => {
                Self::X25519(x25519_dalek::StaticSecret::random_from_rng(OsRng))
            }
            Suite::P256HkdfSha256Aes256Gcm => {
                Self::P256(p256::ecdh::EphemeralSecret::random(&mut OsRng))
            }
        }
    }

    pub fn suite(&self) -> Suite {
        match self {
            Self::X25519(_) => Suite::X25519HkdfSha256Aes256Gcm,
            Self::P256(_) => Suite::P256HkdfSha256Aes256Gcm,
        }
    }

    /// Public key bytes as carried on the wire (base64url inside JSON).
    pub fn public_bytes(&self) -> Vec<u8> {
        match self {
            Self::X25519(secret) => {
                x25519_dalek::PublicKey::from(secret).as_bytes().to_vec()
            }
            Self::P256(secret) => {
                secret.public_key().to_encoded_point(false).as_bytes().to_vec()
            }
        }
    }

    /// ECDH against the peer's wire-format public key.
    pub fn diffie_hellman(&self, peer_public: &[u8]) -> Result<SharedSecret, CryptoError> {
        match self {
            Self::X25519(secret) => {
                let bytes: [u8; 32] = peer_public.try_into().map_err(|_| {
                    CryptoError::InvalidPeerKey { suite: Suite::X25519HkdfSha256Aes256Gcm }
                })?;
                let peer = x25519_dalek::PublicKey::from(bytes);
                let shared = secret.diffie_hellman(&peer);
                if !shared.was_contributory() {
                    return Err(CryptoError::NonContributory);
                }
                Ok(SharedSecret(shared.to_bytes()))
            }
            Self::P256(secret) => {
                let peer = p256::PublicKey::from_sec1_bytes(peer_public).map_err(|_| {
                    CryptoError::InvalidPeerKey { suite: Suite::P256HkdfSha256Aes256Gcm }
                })?;
                let shared = secret.diffie_hellman(&peer);
                let mut out = [0u8; 32];
                out.copy_from_slice(shared.raw_secret_bytes().as_slice());
                Ok(SharedSecret(out))
            }
        }
    }
}
