use crate::config::Config;
use crate::error::ProxyError;
use crate::forward_proxy::ForwardProxy;
use crate::logging::EventLog;
use hyper::server::conn::http1::Builder as ServerBuilder;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use log::{debug, error, info};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::Duration;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Listening shell around the forwarding engine. Every accepted connection is
/// served by its own task; requests on it go to `ForwardProxy::handle`.
pub struct ProxyServer {
    proxy: Arc<ForwardProxy>,
    addr: SocketAddr,
}

impl ProxyServer {
    pub fn new(proxy: ForwardProxy, addr: SocketAddr) -> Self {
        Self {
            proxy: Arc::new(proxy),
            addr,
        }
    }

    /// Builds the rule set from `config`; malformed rules fail here.
    pub fn from_config(config: &Config) -> Result<Self, ProxyError> {
        let rules = config.rule_set()?;
        let proxy = ForwardProxy::new(rules, config.connect_timeout());
        Ok(Self::new(proxy, config.listen_addr()?))
    }

    pub fn from_config_with_log(config: &Config, log: Arc<dyn EventLog>) -> Result<Self, ProxyError> {
        let rules = config.rule_set()?;
        let proxy = ForwardProxy::with_event_log(rules, config.connect_timeout(), log);
        Ok(Self::new(proxy, config.listen_addr()?))
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn bind(&self) -> Result<TcpListener, ProxyError> {
        info!("Binding HTTP listener to: {}", self.addr);
        TcpListener::bind(self.addr).await.map_err(ProxyError::Io)
    }

    pub async fn run(self) -> Result<(), ProxyError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    pub async fn serve(self, listener: TcpListener) -> Result<(), ProxyError> {
        info!("http-proxy listening: {}", listener.local_addr()?);

        loop {
            let (stream, remote_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    // Usually descriptor exhaustion; back off instead of exiting.
                    error!("Failed to accept connection: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            debug!("Accepted connection from {}", remote_addr);

            let proxy = self.proxy.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let proxy = proxy.clone();
                    async move { proxy.handle(req).await }
                });

                if let Err(err) = ServerBuilder::new()
                    .title_case_headers(true)
                    .serve_connection(io, service)
                    .with_upgrades()
                    .await
                {
                    error!("Error serving connection from {}: {}", remote_addr, err);
                }
            });
        }
    }
}
