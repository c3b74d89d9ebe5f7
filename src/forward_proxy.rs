use crate::common::{ProxyBody, ResponseBuilder};
use crate::connector::{connect_direct, connect_socks, SocksConnector};
use crate::error::ProxyError;
use crate::logging::{EventLog, LogFacade};
use crate::rules::RuleSet;
use crate::target::RequestTarget;
use crate::tunnel::TunnelSession;
use http_body_util::BodyExt;
use hyper::body::{Bytes, Incoming};
use hyper::{Method, Request, Response};
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use log::debug;
use std::convert::Infallible;
use std::error::Error as StdError;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::time::Duration;

type HttpClient<C> = Client<HttpsConnector<C>, Incoming>;

/// The routing-and-tunneling engine.
///
/// Holds the immutable rule set, one pooled HTTP client per rule (dialing
/// through that rule's SOCKS upstream) and a direct client for unmatched
/// hosts.
pub struct ForwardProxy {
    rules: RuleSet,
    direct_client: HttpClient<HttpConnector>,
    socks_clients: Vec<HttpClient<SocksConnector>>,
    connect_timeout: Option<Duration>,
    log: Arc<dyn EventLog>,
}

impl ForwardProxy {
    pub fn new(rules: RuleSet, connect_timeout: Option<Duration>) -> Self {
        Self::with_event_log(rules, connect_timeout, Arc::new(LogFacade))
    }

    pub fn with_event_log(
        rules: RuleSet,
        connect_timeout: Option<Duration>,
        log: Arc<dyn EventLog>,
    ) -> Self {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(connect_timeout);
        let direct_client = Client::builder(TokioExecutor::new())
            .build(HttpsConnector::new_with_connector(http));

        let socks_clients = rules
            .rules()
            .iter()
            .map(|rule| {
                let connector = SocksConnector::new(rule.upstream().clone(), connect_timeout);
                Client::builder(TokioExecutor::new())
                    .build(HttpsConnector::new_with_connector(connector))
            })
            .collect();

        Self {
            rules,
            direct_client,
            socks_clients,
            connect_timeout,
            log,
        }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Entry point for every inbound request on a client connection.
    pub async fn handle(&self, req: Request<Incoming>) -> Result<Response<ProxyBody>, Infallible> {
        if req.method() == Method::CONNECT {
            Ok(self.handle_connect(req).await)
        } else {
            Ok(self.handle_request(req).await)
        }
    }

    /// Plain HTTP relay: re-issues the request towards the target and streams
    /// the answer back untouched.
    pub async fn handle_request(&self, req: Request<Incoming>) -> Response<ProxyBody> {
        self.log.info(&format!("request: {}", req.uri()));

        let target = match RequestTarget::from_request(&req) {
            Ok(target) => target,
            Err(e) => {
                self.log.error(&e.to_string());
                return ResponseBuilder::bad_request(&e.to_string());
            }
        };
        let outbound_uri = match target.outbound_uri() {
            Ok(uri) => uri,
            Err(e) => {
                self.log.error(&e.to_string());
                return ResponseBuilder::bad_request(&e.to_string());
            }
        };

        let (mut parts, body) = req.into_parts();
        parts.uri = outbound_uri;
        let outbound = Request::from_parts(parts, body);

        // A failing inbound body surfaces as an error on the outbound request,
        // which aborts it.
        let result = match self.rules.position(&target.hostname()) {
            Some(index) => {
                let upstream = self.rules.rules()[index].upstream();
                self.log.info(&format!(
                    "forwarding SOCKS HTTP(s) request for {} to {}",
                    target, upstream
                ));
                self.socks_clients[index].request(outbound).await
            }
            None => {
                self.log.info(&format!("forwarding HTTP for {} without tunneling", target));
                self.direct_client.request(outbound).await
            }
        };

        match result {
            Ok(response) => {
                debug!("{} answered {}", target, response.status());
                response.map(|body| body.boxed())
            }
            Err(e) => {
                self.log.error(&format!(
                    "{} on connection to {}:{}",
                    error_chain(&e),
                    target.connect_host(),
                    target.port
                ));
                ResponseBuilder::connection_error()
            }
        }
    }

    /// CONNECT: opens the upstream leg first, answers with the outcome and,
    /// on success, splices the upgraded client connection onto it.
    pub async fn handle_connect(&self, req: Request<Incoming>) -> Response<ProxyBody> {
        let version = req.version();

        let Some(authority) = req.uri().authority().cloned() else {
            self.log.error(&format!("CONNECT without authority: {}", req.uri()));
            return ResponseBuilder::bad_request("CONNECT target must be host:port");
        };
        self.log.info(&format!("connect: {}", authority));

        let target = match RequestTarget::from_authority(&authority) {
            Ok(target) => target,
            Err(e) => {
                self.log.error(&e.to_string());
                return ResponseBuilder::bad_request(&e.to_string());
            }
        };
        let host = target.connect_host();

        let (upstream_stream, direct) = match self.rules.select(&target.hostname()) {
            Some(upstream) => {
                self.log.info(&format!(
                    "forwarding SOCKS HTTP(s) connect for {} to {}",
                    authority, upstream
                ));
                let stream = connect_socks(upstream, &host, target.port, self.connect_timeout)
                    .await
                    .map_err(|e| format!("{} connection creating on {}", e, upstream));
                (stream, false)
            }
            None => {
                self.log.info(&format!("forwarding HTTPS for {} without tunneling", authority));
                let stream = connect_direct(&host, target.port, self.connect_timeout)
                    .await
                    .map_err(|e| format!("Error on target socket: {}", e));
                (stream, true)
            }
        };

        let upstream_stream = match upstream_stream {
            Ok(stream) => stream,
            Err(message) => {
                self.log.error(&message);
                return ResponseBuilder::tunnel_failed(version);
            }
        };

        let log = self.log.clone();
        tokio::spawn(async move {
            match hyper::upgrade::on(req).await {
                Ok(upgraded) => {
                    let result = splice(upgraded, upstream_stream).await;
                    match result {
                        Ok(stats) => debug!(
                            "Tunnel to {} closed ({} bytes up, {} bytes down)",
                            authority, stats.client_to_upstream, stats.upstream_to_client
                        ),
                        Err(e) => log.error(&format!("{} on tunnel to {}", error_chain(&e), authority)),
                    }
                }
                Err(e) => log.error(&format!("Failed to upgrade connection for {}: {}", authority, e)),
            }
        });

        ResponseBuilder::tunnel_established(version, direct)
    }
}

/// Recovers the raw client socket and the bytes hyper buffered past the
/// CONNECT head, then runs the tunnel.
async fn splice(
    upgraded: hyper::upgrade::Upgraded,
    upstream: TcpStream,
) -> Result<crate::tunnel::TunnelStats, ProxyError> {
    match upgraded.downcast::<TokioIo<TcpStream>>() {
        Ok(parts) => TunnelSession::new(parts.io.into_inner(), upstream, parts.read_buf).run().await,
        // Upgraded replays its own buffer on read.
        Err(upgraded) => TunnelSession::new(TokioIo::new(upgraded), upstream, Bytes::new()).run().await,
    }
}

fn error_chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyRuleConfig;

    #[test]
    fn test_one_client_per_rule() {
        let rules = RuleSet::from_config(&[
            ProxyRuleConfig::socks("127.0.0.1:1080"),
            ProxyRuleConfig::socks("u:p@127.0.0.1:1081"),
        ])
        .unwrap();

        let proxy = ForwardProxy::new(rules, None);
        assert_eq!(proxy.socks_clients.len(), 2);
        assert_eq!(proxy.rules().len(), 2);
    }

    #[test]
    fn test_error_chain_includes_sources() {
        let err = ProxyError::PeerStream(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset by peer",
        ));
        assert_eq!(
            error_chain(&err),
            "Tunnel stream error: reset by peer"
        );
    }
}
