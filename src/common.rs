use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full};
use hyper::body::Bytes;
use hyper::ext::ReasonPhrase;
use hyper::header::HeaderValue;
use hyper::{Response, StatusCode, Version};

/// Body type of every response the proxy produces.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Value of the `Proxy-agent` header on directly established tunnels.
pub const PROXY_AGENT: &str = concat!("socks-relay/", env!("CARGO_PKG_VERSION"));

pub fn empty() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

pub fn full<T: Into<Bytes>>(chunk: T) -> ProxyBody {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed()
}

/// Response helpers shared by the forwarding paths.
pub struct ResponseBuilder;

impl ResponseBuilder {
    /// Reply to a plain HTTP request whose outbound connection failed.
    pub fn connection_error() -> Response<ProxyBody> {
        let mut response = Response::new(full("Connection error\n"));
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        response
    }

    pub fn bad_request(message: &str) -> Response<ProxyBody> {
        let mut response = Response::new(full(format!("Bad Request: {}\n", message)));
        *response.status_mut() = StatusCode::BAD_REQUEST;
        response
    }

    /// `<version> 200 Connection established`, sent before a tunnel starts.
    pub fn tunnel_established(version: Version, proxy_agent: bool) -> Response<ProxyBody> {
        let mut response = Self::tunnel_reply(version, StatusCode::OK, b"Connection established");
        if proxy_agent {
            response
                .headers_mut()
                .insert("proxy-agent", HeaderValue::from_static(PROXY_AGENT));
        }
        response
    }

    /// `<version> 500 Connection error`, sent when the tunnel cannot be built.
    pub fn tunnel_failed(version: Version) -> Response<ProxyBody> {
        Self::tunnel_reply(version, StatusCode::INTERNAL_SERVER_ERROR, b"Connection error")
    }

    fn tunnel_reply(version: Version, status: StatusCode, reason: &'static [u8]) -> Response<ProxyBody> {
        let mut response = Response::new(empty());
        *response.status_mut() = status;
        *response.version_mut() = version;
        response.extensions_mut().insert(ReasonPhrase::from_static(reason));
        response
    }
}
