//! In-process collaborators for the integration tests: a SOCKS5 server, an
//! echo server, a canned HTTP origin and a recording event log.

#![allow(dead_code)]

use socks_relay::config::{Config, ProxyRuleConfig};
use socks_relay::logging::EventLog;
use socks_relay::ProxyServer;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
pub struct RecordingLog {
    pub lines: Mutex<Vec<(String, String)>>,
}

impl RecordingLog {
    pub fn infos(&self) -> Vec<String> {
        self.with_level("info")
    }

    pub fn errors(&self) -> Vec<String> {
        self.with_level("error")
    }

    fn with_level(&self, level: &str) -> Vec<String> {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| l == level)
            .map(|(_, message)| message.clone())
            .collect()
    }
}

impl EventLog for RecordingLog {
    fn info(&self, message: &str) {
        self.lines.lock().unwrap().push(("info".to_string(), message.to_string()));
    }

    fn error(&self, message: &str) {
        self.lines.lock().unwrap().push(("error".to_string(), message.to_string()));
    }
}

/// Starts a proxy for `rules` on an ephemeral port.
pub async fn spawn_proxy(rules: Vec<ProxyRuleConfig>) -> (SocketAddr, Arc<RecordingLog>) {
    let config = Config {
        port: 0,
        proxies: rules,
        connect_timeout_secs: 5,
        ..Config::default()
    };

    let log = Arc::new(RecordingLog::default());
    let server = ProxyServer::from_config_with_log(&config, log.clone()).unwrap();
    let listener = server.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.serve(listener));

    (addr, log)
}

/// A port nothing listens on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Echoes every byte back on each accepted connection.
pub async fn spawn_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else { break };
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });

    addr
}

/// One request as the canned origin received it. `body` is the error kind
/// when the `Content-Length` body did not arrive in full.
#[derive(Debug)]
pub struct OriginRequest {
    pub head: String,
    pub body: Result<Vec<u8>, std::io::ErrorKind>,
}

/// HTTP origin answering every complete request with `response` and reporting
/// what it received.
pub async fn spawn_origin(
    response: &'static str,
) -> (SocketAddr, mpsc::UnboundedReceiver<OriginRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else { break };
            let tx = tx.clone();
            tokio::spawn(async move {
                let head = read_head(&mut socket).await;
                let mut body = vec![0u8; content_length(&head)];
                let body = match timeout(IO_TIMEOUT, socket.read_exact(&mut body)).await {
                    Ok(Ok(_)) => Ok(body),
                    Ok(Err(e)) => Err(e.kind()),
                    Err(_) => Err(std::io::ErrorKind::TimedOut),
                };
                let complete = body.is_ok();
                let _ = tx.send(OriginRequest { head, body });

                if complete {
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                }
            });
        }
    });

    (addr, rx)
}

fn content_length(head: &str) -> usize {
    head.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}

/// What the fake SOCKS5 server saw during one handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocksHandshake {
    pub credentials: Option<(String, String)>,
    pub target_host: String,
    pub target_port: u16,
}

/// Minimal SOCKS5 server (RFC 1928/1929). Requires username/password auth when
/// `credentials` is set, connects to the requested target and splices.
pub async fn spawn_socks_server(
    credentials: Option<(&'static str, &'static str)>,
) -> (SocketAddr, mpsc::UnboundedReceiver<SocksHandshake>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else { break };
            let tx = tx.clone();
            tokio::spawn(async move {
                let _ = serve_socks(socket, credentials, tx).await;
            });
        }
    });

    (addr, rx)
}

async fn serve_socks(
    mut socket: TcpStream,
    required: Option<(&'static str, &'static str)>,
    tx: mpsc::UnboundedSender<SocksHandshake>,
) -> std::io::Result<()> {
    let version = socket.read_u8().await?;
    assert_eq!(version, 5);
    let method_count = socket.read_u8().await? as usize;
    let mut methods = vec![0u8; method_count];
    socket.read_exact(&mut methods).await?;

    let credentials = match required {
        Some(_) => {
            if !methods.contains(&2) {
                socket.write_all(&[5, 0xff]).await?;
                return Ok(());
            }
            socket.write_all(&[5, 2]).await?;

            let _auth_version = socket.read_u8().await?;
            let user = read_short_string(&mut socket).await?;
            let pass = read_short_string(&mut socket).await?;
            let accepted = required == Some((user.as_str(), pass.as_str()));
            socket.write_all(&[1, if accepted { 0 } else { 1 }]).await?;
            if !accepted {
                return Ok(());
            }
            Some((user, pass))
        }
        None => {
            socket.write_all(&[5, 0]).await?;
            None
        }
    };

    let mut request = [0u8; 4];
    socket.read_exact(&mut request).await?;
    let target_host = match request[3] {
        1 => {
            let mut ip = [0u8; 4];
            socket.read_exact(&mut ip).await?;
            std::net::Ipv4Addr::from(ip).to_string()
        }
        3 => read_short_string(&mut socket).await?,
        4 => {
            let mut ip = [0u8; 16];
            socket.read_exact(&mut ip).await?;
            std::net::Ipv6Addr::from(ip).to_string()
        }
        _ => return Ok(()),
    };
    let target_port = socket.read_u16().await?;

    let _ = tx.send(SocksHandshake {
        credentials,
        target_host: target_host.clone(),
        target_port,
    });

    match TcpStream::connect((target_host.as_str(), target_port)).await {
        Ok(mut target) => {
            socket.write_all(&[5, 0, 0, 1, 127, 0, 0, 1, 0, 0]).await?;
            let _ = tokio::io::copy_bidirectional(&mut socket, &mut target).await;
        }
        Err(_) => {
            // Connection refused
            socket.write_all(&[5, 5, 0, 1, 0, 0, 0, 0, 0, 0]).await?;
        }
    }

    Ok(())
}

async fn read_short_string(socket: &mut TcpStream) -> std::io::Result<String> {
    let len = socket.read_u8().await? as usize;
    let mut buf = vec![0u8; len];
    socket.read_exact(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Reads up to and including the blank line ending an HTTP head.
pub async fn read_head<R: AsyncRead + Unpin>(reader: &mut R) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match timeout(IO_TIMEOUT, reader.read(&mut byte)).await {
            Ok(Ok(1)) => head.push(byte[0]),
            _ => break,
        }
    }
    String::from_utf8_lossy(&head).into_owned()
}

/// Reads until the peer closes the connection.
pub async fn read_to_close<R: AsyncRead + Unpin>(reader: &mut R) -> String {
    let mut buf = Vec::new();
    let _ = timeout(IO_TIMEOUT, reader.read_to_end(&mut buf)).await;
    String::from_utf8_lossy(&buf).into_owned()
}

pub async fn read_exactly<R: AsyncRead + Unpin>(reader: &mut R, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    timeout(IO_TIMEOUT, reader.read_exact(&mut buf))
        .await
        .expect("timed out waiting for tunnel bytes")
        .expect("tunnel closed early");
    buf
}
