use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Incorrect proxy line: {0}")]
    MalformedProxyLine(String),

    #[error("Invalid hostname pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Connection error: {0}")]
    UpstreamConnection(String),

    #[error("Tunnel stream error")]
    PeerStream(#[source] std::io::Error),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<tokio_socks::Error> for ProxyError {
    fn from(err: tokio_socks::Error) -> Self {
        ProxyError::UpstreamConnection(err.to_string())
    }
}
