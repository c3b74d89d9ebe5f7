//! Ordered routing rules and upstream selection.
//!
//! Rules are evaluated in configuration order and the first rule whose
//! predicate holds supplies the upstream. A rule with a whitelist matches only
//! hostnames hitting one of its patterns; a rule without one matches every
//! hostname its blacklist does not catch. No match means a direct connection.

use crate::config::ProxyRuleConfig;
use crate::error::ProxyError;
use crate::upstream::{parse_proxy_line, UpstreamDescriptor};
use log::debug;
use regex::Regex;

#[derive(Debug, Clone)]
pub struct RoutingRule {
    upstream: UpstreamDescriptor,
    whitelist: Option<Vec<Regex>>,
    blacklist: Option<Vec<Regex>>,
}

impl RoutingRule {
    /// A whitelist, when given, replaces the blacklist entirely.
    pub fn new(
        upstream: UpstreamDescriptor,
        whitelist: Option<Vec<Regex>>,
        blacklist: Option<Vec<Regex>>,
    ) -> Self {
        let blacklist = if whitelist.is_some() { None } else { blacklist };
        Self {
            upstream,
            whitelist,
            blacklist,
        }
    }

    pub fn from_config(entry: &ProxyRuleConfig) -> Result<Self, ProxyError> {
        let upstream = parse_proxy_line(&entry.socks)?;
        let whitelist = entry.whitelist.as_deref().map(compile_patterns).transpose()?;
        let blacklist = entry.blacklist.as_deref().map(compile_patterns).transpose()?;

        Ok(Self::new(upstream, whitelist, blacklist))
    }

    pub fn upstream(&self) -> &UpstreamDescriptor {
        &self.upstream
    }

    pub fn whitelist(&self) -> Option<&[Regex]> {
        self.whitelist.as_deref()
    }

    pub fn blacklist(&self) -> Option<&[Regex]> {
        self.blacklist.as_deref()
    }

    pub fn matches(&self, hostname: &str) -> bool {
        match (&self.whitelist, &self.blacklist) {
            (Some(whitelist), _) => any_match(whitelist, hostname),
            (None, Some(blacklist)) => !any_match(blacklist, hostname),
            (None, None) => true,
        }
    }
}

/// Immutable, ordered collection of routing rules built once at startup.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<RoutingRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<RoutingRule>) -> Self {
        Self { rules }
    }

    pub fn from_config(entries: &[ProxyRuleConfig]) -> Result<Self, ProxyError> {
        let rules = entries
            .iter()
            .map(RoutingRule::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(rules))
    }

    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Index of the first rule matching `hostname`.
    pub fn position(&self, hostname: &str) -> Option<usize> {
        let position = self.rules.iter().position(|rule| rule.matches(hostname));
        debug!("Route lookup for {}: rule {:?}", hostname, position);
        position
    }

    /// Upstream for `hostname`, or `None` to connect directly.
    pub fn select(&self, hostname: &str) -> Option<&UpstreamDescriptor> {
        self.position(hostname).map(|index| &self.rules[index].upstream)
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>, ProxyError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|source| ProxyError::InvalidPattern {
                pattern: pattern.clone(),
                source,
            })
        })
        .collect()
}

fn any_match(patterns: &[Regex], hostname: &str) -> bool {
    patterns.iter().any(|pattern| pattern.is_match(hostname))
}
