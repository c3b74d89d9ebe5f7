use crate::error::ProxyError;
use http::uri::Authority;
use http::{Request, Uri};
use std::fmt;
use url::{Host, Url};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

/// Where a single inbound request or CONNECT wants to go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTarget {
    host: Host<String>,
    pub port: u16,
    pub scheme: Scheme,
    pub path_and_query: String,
}

impl RequestTarget {
    /// Target of a plain HTTP request. Only absolute-form URIs are accepted;
    /// an origin-form request is addressed to the proxy itself.
    pub fn from_request<B>(req: &Request<B>) -> Result<Self, ProxyError> {
        let uri = req.uri();

        if uri.scheme().is_none() || uri.authority().is_none() {
            return Err(ProxyError::BadRequest(format!("Cannot determine target for {}", uri)));
        }

        Self::from_url(&Url::parse(&uri.to_string())?)
    }

    /// Target of a CONNECT request; the port defaults to 443.
    pub fn from_authority(authority: &Authority) -> Result<Self, ProxyError> {
        let host = Host::parse(authority.host())?;
        Ok(Self {
            host,
            port: authority.port_u16().unwrap_or(443),
            scheme: Scheme::Https,
            path_and_query: String::new(),
        })
    }

    fn from_url(url: &Url) -> Result<Self, ProxyError> {
        let scheme = match url.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => {
                return Err(ProxyError::BadRequest(format!("Unsupported scheme: {}", other)));
            }
        };

        let host = url
            .host()
            .ok_or_else(|| ProxyError::BadRequest(format!("Missing host in {}", url)))?
            .to_owned();

        let mut path_and_query = url.path().to_string();
        if let Some(query) = url.query() {
            path_and_query.push('?');
            path_and_query.push_str(query);
        }

        Ok(Self {
            host,
            port: url.port().unwrap_or_else(|| scheme.default_port()),
            scheme,
            path_and_query,
        })
    }

    /// Hostname as matched against routing patterns: lowercase, IPv6 literals
    /// in brackets.
    pub fn hostname(&self) -> String {
        self.host.to_string()
    }

    /// Host suitable for a TCP connect or a SOCKS target (no brackets).
    pub fn connect_host(&self) -> String {
        match &self.host {
            Host::Ipv6(addr) => addr.to_string(),
            other => other.to_string(),
        }
    }

    /// Absolute URI for the outbound client request.
    pub fn outbound_uri(&self) -> Result<Uri, ProxyError> {
        let path = if self.path_and_query.is_empty() {
            "/"
        } else {
            self.path_and_query.as_str()
        };

        format!("{}://{}:{}{}", self.scheme.as_str(), self.host, self.port, path)
            .parse()
            .map_err(|e: http::uri::InvalidUri| ProxyError::BadRequest(e.to_string()))
    }
}

impl fmt::Display for RequestTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}:{}{}",
            self.scheme.as_str(),
            self.host,
            self.port,
            self.path_and_query
        )
    }
}
