//! Connect inputs: grants, direct-connect info, and per-connection options.
//!
//! The grant and direct-connect bundles are minted by an external
//! controlplane; this module validates the fields the core consumes and
//! normalizes them into typed parameters.  Validation failures classify
//! under `stage=validate` with the `missing_*`/`invalid_*` codes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use fsec_crypto::{PSK_LEN, Suite, random_bytes};
use fsec_wire::{EndpointRole, b64u};

use crate::error::{Error, ErrorCode, Path, Stage};

/// Tunnel-topology credential bundle, conveyed inside a signed grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grant {
    pub tunnel_url: String,
    pub channel_id: String,
    pub role: EndpointRole,
    pub token: String,
    /// 32 bytes, base64url.
    pub psk: String,
    pub init_exp: u64,
    pub idle_timeout_seconds: u64,
    pub default_suite: u16,
    #[serde(default)]
    pub allowed_suites: Vec<u16>,
}

/// Direct-topology connection bundle, distributed out-of-band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectConnectInfo {
    pub ws_url: String,
    pub channel_id: String,
    /// 32 bytes, base64url.
    pub psk: String,
    pub init_exp: u64,
    pub default_suite: u16,
}

/// Per-connection tuning.  Defaults match the wire contract's limits.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Override the bundle's default suite.
    pub suite: Option<u16>,
    pub features: u32,
    pub clock_skew: Duration,
    /// Seconds; `0` disables the timeout (the cancellation scope stays
    /// authoritative), negative values are rejected as `invalid_option`.
    pub handshake_timeout_secs: i64,
    pub max_handshake_payload: usize,
    pub max_record_bytes: usize,
    pub max_buffered_bytes: usize,
    /// Override the keepalive cadence; `None` uses the topology default.
    pub keepalive_interval: Option<Duration>,
    /// Caller-assigned instance id; generated when absent (tunnel path).
    pub endpoint_instance_id: Option<String>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            suite: None,
            features: 0,
            clock_skew: Duration::from_secs(30),
            handshake_timeout_secs: 30,
            max_handshake_payload: fsec_wire::DEFAULT_MAX_HANDSHAKE_PAYLOAD,
            max_record_bytes: fsec_wire::DEFAULT_MAX_RECORD_BYTES,
            max_buffered_bytes: 1024 * 1024,
            keepalive_interval: None,
            endpoint_instance_id: None,
        }
    }
}

impl ConnectOptions {
    pub(crate) fn handshake_timeout(&self, path: Path) -> Result<Option<Duration>, Error> {
        match self.handshake_timeout_secs {
            secs if secs < 0 => Err(Error::new(path, Stage::Validate, ErrorCode::InvalidOption)
                .with_cause("handshake_timeout must not be negative")),
            0 => Ok(None),
            secs => Ok(Some(Duration::from_secs(secs.unsigned_abs()))),
        }
    }
}

/// Keepalive default: `max(500 ms, idle_timeout / 2)`, clamped strictly
/// below `idle_timeout`.  A zero idle timeout disables keepalive.
pub(crate) fn default_keepalive(idle_timeout: Duration) -> Option<Duration> {
    if idle_timeout.is_zero() {
        return None;
    }
    let interval = (idle_timeout / 2).max(Duration::from_millis(500));
    Some(interval.min(idle_timeout.saturating_sub(Duration::from_millis(1))))
}

pub(crate) fn decode_psk(psk_b64u: &str, path: Path) -> Result<[u8; PSK_LEN], Error> {
    b64u::decode_exact::<PSK_LEN>(psk_b64u)
        .ok_or_else(|| Error::new(path, Stage::Validate, ErrorCode::InvalidPsk))
}

pub(crate) fn resolve_suite(
    default_suite: u16,
    allowed: &[u16],
    override_suite: Option<u16>,
    path: Path,
) -> Result<(Suite, Vec<Suite>), Error> {
    let invalid = |_| Error::new(path, Stage::Validate, ErrorCode::InvalidSuite);
    let chosen = Suite::from_wire(override_suite.unwrap_or(default_suite)).map_err(invalid)?;
    let allowed_suites = if allowed.is_empty() {
        vec![chosen]
    } else {
        let mut suites = Vec::with_capacity(allowed.len());
        for tag in allowed {
            suites.push(Suite::from_wire(*tag).map_err(invalid)?);
        }
        if !suites.contains(&chosen) {
            return Err(Error::new(path, Stage::Validate, ErrorCode::InvalidSuite));
        }
        suites
    };
    Ok((chosen, allowed_suites))
}

/// Validate or mint the endpoint instance id (opaque, base64url, 1–64
/// chars on the wire).
pub(crate) fn endpoint_instance_id(
    configured: Option<&str>,
    path: Path,
) -> Result<String, Error> {
    match configured {
        Some(id) => {
            if id.is_empty()
                || id.len() > 64
                || !id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
            {
                return Err(Error::new(path, Stage::Validate, ErrorCode::InvalidEndpointInstanceId));
            }
            Ok(id.to_owned())
        }
        None => {
            let bytes = random_bytes::<16>().map_err(|e| {
                Error::new(path, Stage::Validate, ErrorCode::RandomFailed).with_cause(e)
            })?;
            Ok(b64u::encode(&bytes))
        }
    }
}

pub(crate) fn validate_grant(grant: &Grant, path: Path) -> Result<(), Error> {
    let fail = |code| Err(Error::new(path, Stage::Validate, code));
    if grant.tunnel_url.is_empty() {
        return fail(ErrorCode::MissingTunnelUrl);
    }
    if grant.channel_id.is_empty() {
        return fail(ErrorCode::MissingChannelId);
    }
    if grant.token.is_empty() {
        return fail(ErrorCode::MissingToken);
    }
    if grant.init_exp == 0 {
        return fail(ErrorCode::MissingInitExp);
    }
    Ok(())
}

pub(crate) fn validate_connect_info(info: &DirectConnectInfo, path: Path) -> Result<(), Error> {
    let fail = |code| Err(Error::new(path, Stage::Validate, code));
    if info.ws_url.is_empty() {
        return fail(ErrorCode::MissingWsUrl);
    }
    if info.channel_id.is_empty() {
        return fail(ErrorCode::MissingChannelId);
    }
    if info.init_exp == 0 {
        return fail(ErrorCode::MissingInitExp);
    }
    Ok(())
}
