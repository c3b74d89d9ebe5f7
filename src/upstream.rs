//! SOCKS upstream descriptors and the compact proxy-line grammar.
//!
//! Accepted forms:
//!
//! - `host:port`
//! - `host:port:user:pass`
//! - `user:pass@host:port`

use crate::error::ProxyError;
use std::fmt;

/// One SOCKS5 upstream endpoint with optional credentials.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UpstreamDescriptor {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub pass: Option<String>,
}

impl UpstreamDescriptor {
    /// Builds a descriptor from discrete fields, parsing `port` the same way a
    /// proxy line is parsed.
    pub fn from_parts(
        host: &str,
        port: &str,
        user: Option<&str>,
        pass: Option<&str>,
    ) -> Result<Self, ProxyError> {
        let malformed = || ProxyError::MalformedProxyLine(format!("{}:{}", host, port));
        let port = parse_port(port).ok_or_else(malformed)?;

        // Username/password auth (RFC 1929) carries 1..=255 bytes for each field.
        match (user, pass) {
            (None, None) => {}
            (Some(user), Some(pass)) if credential_len_ok(user) && credential_len_ok(pass) => {}
            _ => return Err(malformed()),
        }

        Ok(Self {
            host: host.to_string(),
            port,
            user: user.map(str::to_string),
            pass: pass.map(str::to_string),
        })
    }

    pub fn has_credentials(&self) -> bool {
        self.user.is_some()
    }
}

impl fmt::Display for UpstreamDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Alias kept for callers that build descriptors from loose fields.
pub fn get_proxy_object(
    host: &str,
    port: &str,
    user: Option<&str>,
    pass: Option<&str>,
) -> Result<UpstreamDescriptor, ProxyError> {
    UpstreamDescriptor::from_parts(host, port, user, pass)
}

pub fn parse_proxy_line(line: &str) -> Result<UpstreamDescriptor, ProxyError> {
    let malformed = || ProxyError::MalformedProxyLine(line.to_string());

    let (credentials, endpoint) = match line.split_once('@') {
        Some((credentials, endpoint)) => (Some(credentials), endpoint),
        None => (None, line),
    };

    let fields: Vec<&str> = endpoint.split(':').collect();

    let descriptor = match (credentials, fields.as_slice()) {
        // A leading '@' carries no credentials at all.
        (Some(""), [host, port]) => UpstreamDescriptor::from_parts(host, port, None, None),
        (Some(credentials), [host, port]) => {
            let mut parts = credentials.split(':');
            let user = parts.next();
            let pass = parts.next();
            UpstreamDescriptor::from_parts(host, port, user, pass)
        }
        (None, [host, port]) => UpstreamDescriptor::from_parts(host, port, None, None),
        (None, [host, port, user, pass]) => {
            UpstreamDescriptor::from_parts(host, port, Some(*user), Some(*pass))
        }
        _ => return Err(malformed()),
    };

    descriptor.map_err(|_| malformed())
}

fn credential_len_ok(value: &str) -> bool {
    (1..=255).contains(&value.len())
}

/// Leading-integer parse: skips leading whitespace and an optional `+`, reads
/// the run of ASCII digits and ignores whatever follows.
fn parse_port(raw: &str) -> Option<u16> {
    let trimmed = raw.trim_start();
    let trimmed = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let digits_end = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());

    let digits = &trimmed[..digits_end];
    if digits.is_empty() {
        return None;
    }

    // Overlong digit runs are out of range anyway.
    if digits.trim_start_matches('0').len() > 5 {
        return None;
    }

    digits
        .parse::<u32>()
        .ok()
        .and_then(|port| u16::try_from(port).ok())
        .filter(|port| *port != 0)
}
