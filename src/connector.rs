//! Outbound connection establishment: direct TCP, SOCKS5 handshakes, and the
//! `tower_service::Service<Uri>` connector that lets the HTTP client dial
//! through a SOCKS upstream.

use crate::error::ProxyError;
use crate::upstream::UpstreamDescriptor;
use http::Uri;
use http::uri::Scheme;
use hyper_util::rt::TokioIo;
use log::debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_socks::tcp::Socks5Stream;
use tower_service::Service;

/// Runs `attempt`, failing it as an upstream connection error once `limit`
/// elapses. `None` waits forever.
pub async fn within_limit<T, F>(limit: Option<Duration>, what: &str, attempt: F) -> Result<T, ProxyError>
where
    F: Future<Output = Result<T, ProxyError>>,
{
    match limit {
        Some(limit) => timeout(limit, attempt).await.map_err(|_| {
            ProxyError::UpstreamConnection(format!("{} timed out after {:?}", what, limit))
        })?,
        None => attempt.await,
    }
}

pub async fn connect_direct(
    host: &str,
    port: u16,
    limit: Option<Duration>,
) -> Result<TcpStream, ProxyError> {
    within_limit(limit, "connect", async {
        TcpStream::connect((host, port))
            .await
            .map_err(|e| ProxyError::UpstreamConnection(e.to_string()))
    })
    .await
}

/// SOCKS5 CONNECT through `upstream` to `host:port`. The returned stream is
/// already past the handshake and carries raw target bytes.
pub async fn connect_socks(
    upstream: &UpstreamDescriptor,
    host: &str,
    port: u16,
    limit: Option<Duration>,
) -> Result<TcpStream, ProxyError> {
    let proxy = (upstream.host.as_str(), upstream.port);

    let stream = within_limit(limit, "SOCKS handshake", async {
        let stream = match (upstream.user.as_deref(), upstream.pass.as_deref()) {
            (Some(user), Some(pass)) => {
                Socks5Stream::connect_with_password(proxy, (host, port), user, pass).await?
            }
            _ => Socks5Stream::connect(proxy, (host, port)).await?,
        };
        Ok(stream)
    })
    .await?;

    debug!("SOCKS5 handshake with {} established to {}:{}", upstream, host, port);
    Ok(stream.into_inner())
}

/// HTTP client connector dialing every destination through one SOCKS upstream.
#[derive(Debug, Clone)]
pub struct SocksConnector {
    upstream: Arc<UpstreamDescriptor>,
    connect_timeout: Option<Duration>,
}

impl SocksConnector {
    pub fn new(upstream: UpstreamDescriptor, connect_timeout: Option<Duration>) -> Self {
        Self {
            upstream: Arc::new(upstream),
            connect_timeout,
        }
    }
}

impl Service<Uri> for SocksConnector {
    type Response = TokioIo<TcpStream>;
    type Error = ProxyError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        let upstream = self.upstream.clone();
        let connect_timeout = self.connect_timeout;

        Box::pin(async move {
            let host = dst
                .host()
                .ok_or_else(|| ProxyError::BadRequest(format!("No host in {}", dst)))?
                .trim_start_matches('[')
                .trim_end_matches(']')
                .to_string();
            let port = dst.port_u16().unwrap_or(if dst.scheme() == Some(&Scheme::HTTPS) {
                443
            } else {
                80
            });

            let stream = connect_socks(&upstream, &host, port, connect_timeout).await?;
            Ok(TokioIo::new(stream))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_direct_refused_is_upstream_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = connect_direct("127.0.0.1", port, Some(Duration::from_secs(5))).await;
        assert!(matches!(result, Err(ProxyError::UpstreamConnection(_))));
    }

    #[tokio::test]
    async fn test_within_limit_times_out() {
        let result: Result<(), _> = within_limit(
            Some(Duration::from_millis(20)),
            "SOCKS handshake",
            std::future::pending(),
        )
        .await;

        match result {
            Err(ProxyError::UpstreamConnection(message)) => {
                assert!(message.contains("SOCKS handshake timed out"))
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_socks_handshake_stalls_until_timeout() {
        // Accepts the TCP connection but never answers the SOCKS greeting.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let holder = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let upstream = UpstreamDescriptor::from_parts("127.0.0.1", &port.to_string(), None, None).unwrap();
        let result = connect_socks(&upstream, "example.com", 443, Some(Duration::from_millis(100))).await;
        assert!(matches!(result, Err(ProxyError::UpstreamConnection(_))));

        holder.abort();
    }
}
