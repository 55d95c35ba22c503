//! In-band rekey KDF.
//!
//! A rekey record rotates the key of the direction it travels.  Binding the
//! derivation to the record's seq and direction label means both sides agree
//! on the new key without a cross-direction race: the sender derives before
//! enqueuing any later frame, the receiver derives at the seq it observed.

use hkdf::Hkdf;
use sha2::Sha256;

pub const REKEY_LABEL: &str = "flowersec-e2ee-v1:rekey";

/// Traffic direction of one half of a secure channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

impl Direction {
    pub fn label(self) -> &'static str {
        match self {
            Self::ClientToServer => "c2s",
            Self::ServerToClient => "s2c",
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Self::ClientToServer => Self::ServerToClient,
            Self::ServerToClient => Self::ClientToServer,
        }
    }
}

/// `HKDF-Expand(prk = rekey_base, REKEY_LABEL || transcript_hash ||
/// seq(u64 BE) || dir_label, 32)`.
pub fn derive_rekey_key(
    rekey_base: &[u8; 32],
    transcript_hash: &[u8; 32],
    seq: u64,
    dir: Direction,
) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::from_prk(rekey_base).expect("32-byte PRK");
    let mut info = Vec::with_capacity(REKEY_LABEL.len() + 32 + 8 + 3);
    info.extend_from_slice(REKEY_LABEL.as_bytes());
    info.extend_from_slice(transcript_hash);
    info.extend_from_slice(&seq.to_be_bytes());
    info.extend_from_slice(dir.label().as_bytes());
    let mut out = [0u8; 32];
    hk.expand(&info, &mut out).expect("valid length");
    out
}
