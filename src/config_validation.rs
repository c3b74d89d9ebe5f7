//! Startup validation of the proxy configuration.
//!
//! Errors stop the server from starting; warnings point at rules that are
//! legal but probably not what the author meant.

use crate::config::Config;
use crate::rules::RoutingRule;

/// Validation outcome
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn success() -> Self {
        Self {
            is_valid: true,
            errors: vec![],
            warnings: vec![],
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.errors.push(error);
        self.is_valid = false;
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }
}

pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &Config) -> ValidationResult {
        let mut result = ValidationResult::success();

        Self::validate_listen_address(config, &mut result);
        Self::validate_rules(config, &mut result);

        result
    }

    fn validate_listen_address(config: &Config, result: &mut ValidationResult) {
        if config.port == 0 {
            result.add_error("Listen port cannot be 0".to_string());
        } else if config.port < 1024 {
            result.add_warning(format!(
                "Using privileged port {} - may require elevated privileges",
                config.port
            ));
        }

        if let Err(e) = config.listen_addr() {
            result.add_error(e.to_string());
        }
    }

    fn validate_rules(config: &Config, result: &mut ValidationResult) {
        let last = config.proxies.len().saturating_sub(1);

        for (index, entry) in config.proxies.iter().enumerate() {
            if let Err(e) = RoutingRule::from_config(entry) {
                result.add_error(format!("Rule {} ({}): {}", index, entry.socks, e));
                continue;
            }

            if entry.whitelist.is_some() && entry.blacklist.is_some() {
                result.add_warning(format!(
                    "Rule {} ({}) has both whitelist and blacklist; the blacklist is ignored",
                    index, entry.socks
                ));
            }

            let catch_all = entry.whitelist.is_none()
                && entry.blacklist.as_ref().is_none_or(|list| list.is_empty());
            if catch_all && index < last {
                result.add_warning(format!(
                    "Rule {} ({}) matches every host; rules after it are never used",
                    index, entry.socks
                ));
            }
        }
    }
}
