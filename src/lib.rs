pub mod common;
pub mod config;
pub mod config_validation;
pub mod connector;
pub mod error;
pub mod forward_proxy;
pub mod logging;
pub mod proxy;
pub mod rules;
pub mod target;
pub mod tunnel;
pub mod upstream;

pub use config::{Config, ProxyRuleConfig};
pub use error::ProxyError;
pub use forward_proxy::ForwardProxy;
pub use proxy::ProxyServer;
pub use rules::{RoutingRule, RuleSet};
pub use upstream::{get_proxy_object, parse_proxy_line, UpstreamDescriptor};
