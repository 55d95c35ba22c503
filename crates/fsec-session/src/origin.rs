//! Origin allow-list evaluation for direct-path server upgrades.
//!
//! Entry forms:
//! - full origin: `https://h.example` (scheme, host, and optional port all
//!   compared)
//! - hostname: `h.example` (any scheme, any port)
//! - hostname + port: `h.example:8080` (any scheme)
//! - wildcard subdomain: `*.example.com` (excludes the apex)
//! - the literal `"null"` (opaque origins)
//!
//! A request with no `Origin` header is rejected unless `allow_no_origin` is
//! set; that toggle is additive and never replaces the list.

use crate::error::{Error, ErrorCode, Path, Stage};

#[derive(Debug, Clone, PartialEq, Eq)]
enum OriginRule {
    /// scheme + host + optional explicit port, all lowercased.
    Full { scheme: String, host: String, port: Option<u16> },
    Host(String),
    HostPort(String, u16),
    /// `*.example.com` — matches `a.example.com`, not `example.com`.
    WildcardSubdomain(String),
    Null,
}

#[derive(Debug, Clone, Default)]
pub struct OriginPolicy {
    rules: Vec<OriginRule>,
    allow_no_origin: bool,
}

impl OriginPolicy {
    /// Parse allow-list entries.  An unparseable entry is an error, not a
    /// silent never-matching rule.
    pub fn new(entries: &[&str], allow_no_origin: bool) -> Result<Self, Error> {
        let mut rules = Vec::with_capacity(entries.len());
        for entry in entries {
            rules.push(parse_rule(entry).ok_or_else(|| {
                Error::new(Path::Direct, Stage::Validate, ErrorCode::InvalidOption)
                    .with_cause(format!("bad origin allow-list entry {entry:?}"))
            })?);
        }
        Ok(Self { rules, allow_no_origin })
    }

    pub fn is_allowed(&self, origin: Option<&str>) -> bool {
        let Some(origin) = origin else {
            return self.allow_no_origin;
        };
        if origin == "null" {
            return self.rules.iter().any(|r| *r == OriginRule::Null);
        }
        let Some((scheme, host, port)) = split_origin(origin) else {
            return false;
        };
        self.rules.iter().any(|rule| match rule {
            OriginRule::Full { scheme: rs, host: rh, port: rp } => {
                rs == &scheme && rh == &host && *rp == port
            }
            OriginRule::Host(rh) => rh == &host,
            OriginRule::HostPort(rh, rp) => rh == &host && Some(*rp) == port,
            OriginRule::WildcardSubdomain(apex) => {
                host.len() > apex.len() + 1 && host.ends_with(apex.as_str()) && {
                    let boundary = host.len() - apex.len() - 1;
                    host.as_bytes()[boundary] == b'.'
                }
            }
            OriginRule::Null => false,
        })
    }

    /// Gate an upgrade on the request's `Origin` header.
    pub fn check(&self, origin: Option<&str>) -> Result<(), Error> {
        if self.is_allowed(origin) {
            return Ok(());
        }
        match origin {
            None => Err(Error::new(Path::Direct, Stage::Validate, ErrorCode::MissingOrigin)),
            Some(origin) => Err(Error::new(Path::Direct, Stage::Validate, ErrorCode::InvalidInput)
                .with_cause(format!("origin {origin:?} not allowed"))),
        }
    }
}

fn parse_rule(entry: &str) -> Option<OriginRule> {
    let entry = entry.trim();
    if entry.is_empty() {
        return None;
    }
    if entry == "null" {
        return Some(OriginRule::Null);
    }
    if let Some(apex) = entry.strip_prefix("*.") {
        if apex.is_empty() || apex.contains('/') || apex.contains(':') {
            return None;
        }
        return Some(OriginRule::WildcardSubdomain(apex.to_ascii_lowercase()));
    }
    if entry.contains("://") {
        let (scheme, host, port) = split_origin(entry)?;
        return Some(OriginRule::Full { scheme, host, port });
    }
    match entry.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port = port.parse().ok()?;
            Some(OriginRule::HostPort(host.to_ascii_lowercase(), port))
        }
        _ => {
            if entry.contains('/') {
                return None;
            }
            Some(OriginRule::Host(entry.to_ascii_lowercase()))
        }
    }
}

/// Split `scheme://host[:port]` into lowercased parts.
fn split_origin(origin: &str) -> Option<(String, String, Option<u16>)> {
    let (scheme, rest) = origin.split_once("://")?;
    if rest.is_empty() || rest.contains('/') {
        return None;
    }
    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => (host, Some(port.parse().ok()?)),
        _ => (rest, None),
    };
    Some((scheme.to_ascii_lowercase(), host.to_ascii_lowercase(), port))
}
