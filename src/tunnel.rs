use crate::error::ProxyError;
use bytes::Bytes;
use tokio::io::{copy_bidirectional, AsyncRead, AsyncWrite, AsyncWriteExt};

/// Bytes moved through a finished tunnel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TunnelStats {
    pub client_to_upstream: u64,
    pub upstream_to_client: u64,
}

/// A client stream spliced to an upstream stream after a CONNECT.
///
/// The session owns both halves; `run` consumes it, so whichever side ends or
/// fails first, both streams are dropped together when it returns.
pub struct TunnelSession<C, U> {
    client: C,
    upstream: U,
    head: Bytes,
}

impl<C, U> TunnelSession<C, U>
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    /// `head` holds client bytes read past the CONNECT request head.
    pub fn new(client: C, upstream: U, head: Bytes) -> Self {
        Self {
            client,
            upstream,
            head,
        }
    }

    pub async fn run(mut self) -> Result<TunnelStats, ProxyError> {
        if !self.head.is_empty() {
            self.upstream
                .write_all(&self.head)
                .await
                .map_err(ProxyError::PeerStream)?;
        }

        let (client_to_upstream, upstream_to_client) =
            copy_bidirectional(&mut self.client, &mut self.upstream)
                .await
                .map_err(ProxyError::PeerStream)?;

        Ok(TunnelStats {
            client_to_upstream: client_to_upstream + self.head.len() as u64,
            upstream_to_client,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt};

    #[tokio::test]
    async fn test_head_reaches_upstream_before_client_bytes() {
        let (client, mut client_peer) = duplex(1024);
        let (upstream, mut upstream_peer) = duplex(1024);

        let session = TunnelSession::new(client, upstream, Bytes::from_static(b"HEAD"));
        let handle = tokio::spawn(session.run());

        client_peer.write_all(b"-body").await.unwrap();
        let mut buf = [0u8; 9];
        upstream_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"HEAD-body");

        upstream_peer.write_all(b"reply").await.unwrap();
        let mut reply = [0u8; 5];
        client_peer.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"reply");

        drop(client_peer);
        drop(upstream_peer);

        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.client_to_upstream, 9);
        assert_eq!(stats.upstream_to_client, 5);
    }

    #[tokio::test]
    async fn test_closing_one_side_ends_the_other() {
        let (client, mut client_peer) = duplex(64);
        let (upstream, upstream_peer) = duplex(64);

        let handle = tokio::spawn(TunnelSession::new(client, upstream, Bytes::new()).run());

        // Upstream goes away; the client side must observe EOF.
        drop(upstream_peer);
        let mut buf = Vec::new();
        let read = client_peer.read_to_end(&mut buf).await.unwrap();
        assert_eq!(read, 0);

        drop(client_peer);
        assert!(handle.await.unwrap().is_ok());
    }
}
