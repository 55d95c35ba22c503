//! Server-side handshake cache.
//!
//! Keyed by a SHA-256 fingerprint of the raw init payload.  A cache hit
//! means "this exact init was seen before": the server replays the cached
//! resp instead of minting fresh state, which keeps retries deterministic
//! under message-oriented transports.  Entries are bounded by TTL and an
//! entry cap; expiry is enforced on every access.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use fsec_crypto::{EphemeralSecret, Suite};
use fsec_wire::E2eeInit;

use super::{ChannelSecrets, HandshakeError};

pub(crate) const DEFAULT_TTL: Duration = Duration::from_secs(60);
pub(crate) const DEFAULT_CAP: usize = 4096;

pub(crate) struct CacheEntry {
    pub handshake_id: String,
    pub suite: Suite,
    pub init: E2eeInit,
    pub client_eph_pub: Vec<u8>,
    pub nonce_c: [u8; 32],
    pub secret: EphemeralSecret,
    pub server_eph_pub: Vec<u8>,
    pub nonce_s: [u8; 32],
    pub server_features: u32,
    /// Serialized resp, replayed byte-identical on init retry.
    pub resp_payload: Vec<u8>,
    pub secrets: ChannelSecrets,
    created_at: Instant,
}

impl CacheEntry {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        handshake_id: String,
        suite: Suite,
        init: E2eeInit,
        client_eph_pub: Vec<u8>,
        nonce_c: [u8; 32],
        secret: EphemeralSecret,
        nonce_s: [u8; 32],
        server_features: u32,
        resp_payload: Vec<u8>,
        secrets: ChannelSecrets,
    ) -> Self {
        let server_eph_pub = secret.public_bytes();
        Self {
            handshake_id,
            suite,
            init,
            client_eph_pub,
            nonce_c,
            secret,
            server_eph_pub,
            nonce_s,
            server_features,
            resp_payload,
            secrets,
            created_at: Instant::now(),
        }
    }
}

/// Shared across every connection a server endpoint accepts.
pub struct HandshakeCache {
    inner: Mutex<HashMap<[u8; 32], Arc<CacheEntry>>>,
    ttl: Duration,
    cap: usize,
}

impl HandshakeCache {
    pub fn new(ttl: Duration, cap: usize) -> Self {
        Self { inner: Mutex::new(HashMap::new()), ttl, cap }
    }

    /// TTL 60 s, 4096 entries.
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_CAP)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up the entry for `fingerprint`, creating it with `make` on miss.
    /// Expired entries are evicted first; the cap is enforced after eviction.
    pub(crate) fn get_or_insert(
        &self,
        fingerprint: [u8; 32],
        make: impl FnOnce() -> Result<CacheEntry, HandshakeError>,
    ) -> Result<Arc<CacheEntry>, HandshakeError> {
        let mut inner = self.inner.lock().expect("cache lock");
        inner.retain(|_, entry| entry.created_at.elapsed() <= self.ttl);
        if let Some(entry) = inner.get(&fingerprint) {
            return Ok(Arc::clone(entry));
        }
        if inner.len() >= self.cap {
            return Err(HandshakeError::TooManyPendingHandshakes);
        }
        let entry = Arc::new(make()?);
        inner.insert(fingerprint, Arc::clone(&entry));
        Ok(entry)
    }

    pub(crate) fn remove(&self, fingerprint: &[u8; 32]) {
        self.inner.lock().expect("cache lock").remove(fingerprint);
    }
}
