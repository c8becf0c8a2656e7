//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and references.
//! Every violation is reported, not just the first.

use std::collections::HashSet;
use thiserror::Error;
use url::Url;

use crate::config::schema::ResilienceConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("retries.base_delay_ms ({base}) exceeds retries.max_delay_ms ({max})")]
    DelayOrder { base: u64, max: u64 },

    #[error("monitor target #{index} has an empty name")]
    EmptyTargetName { index: usize },

    #[error("monitor target '{name}' is defined more than once")]
    DuplicateTarget { name: String },

    #[error("monitor target '{name}' has invalid url '{url}': {reason}")]
    InvalidUrl {
        name: String,
        url: String,
        reason: String,
    },

    #[error("observability.metrics_address '{0}' is not a socket address")]
    MetricsAddress(String),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ResilienceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let retries = &config.retries;
    if retries.base_delay_ms == 0 {
        errors.push(ValidationError::Zero { field: "retries.base_delay_ms" });
    }
    if retries.max_delay_ms == 0 {
        errors.push(ValidationError::Zero { field: "retries.max_delay_ms" });
    }
    if retries.base_delay_ms > retries.max_delay_ms {
        errors.push(ValidationError::DelayOrder {
            base: retries.base_delay_ms,
            max: retries.max_delay_ms,
        });
    }

    if config.circuit_breaker.failure_threshold == 0 {
        errors.push(ValidationError::Zero { field: "circuit_breaker.failure_threshold" });
    }
    if config.circuit_breaker.reset_timeout_ms == 0 {
        errors.push(ValidationError::Zero { field: "circuit_breaker.reset_timeout_ms" });
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    let monitor = &config.monitor;
    if monitor.interval_secs == 0 {
        errors.push(ValidationError::Zero { field: "monitor.interval_secs" });
    }
    if monitor.timeout_secs == 0 {
        errors.push(ValidationError::Zero { field: "monitor.timeout_secs" });
    }

    let mut seen = HashSet::new();
    for (index, target) in monitor.targets.iter().enumerate() {
        if target.name.trim().is_empty() {
            errors.push(ValidationError::EmptyTargetName { index });
        } else if !seen.insert(target.name.as_str()) {
            errors.push(ValidationError::DuplicateTarget {
                name: target.name.clone(),
            });
        }

        if let Err(reason) = check_url(&target.url) {
            errors.push(ValidationError::InvalidUrl {
                name: target.name.clone(),
                url: target.url.clone(),
                reason,
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_url(raw: &str) -> Result<(), String> {
    let url = Url::parse(raw).map_err(|e| e.to_string())?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("unsupported scheme '{other}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::TargetConfig;

    fn target(name: &str, url: &str) -> TargetConfig {
        TargetConfig {
            name: name.to_string(),
            url: url.to_string(),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&ResilienceConfig::default()).is_ok());
    }

    #[test]
    fn test_reports_every_error() {
        let mut config = ResilienceConfig::default();
        config.retries.base_delay_ms = 20_000;
        config.circuit_breaker.failure_threshold = 0;
        config.monitor.interval_secs = 0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.contains(&ValidationError::DelayOrder { base: 20_000, max: 10_000 }));
        assert!(errors.contains(&ValidationError::Zero { field: "circuit_breaker.failure_threshold" }));
        assert!(errors.contains(&ValidationError::Zero { field: "monitor.interval_secs" }));
    }

    #[test]
    fn test_target_checks() {
        let mut config = ResilienceConfig::default();
        config.monitor.targets = vec![
            target("api", "https://api.example.com/health"),
            target("api", "http://127.0.0.1:8080/health"),
            target("", "http://127.0.0.1:8081/"),
            target("ftp", "ftp://files.example.com"),
            target("relative", "/health"),
        ];

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::DuplicateTarget { name: "api".into() }));
        assert!(errors.contains(&ValidationError::EmptyTargetName { index: 2 }));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidUrl { name, .. } if name == "ftp")));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidUrl { name, .. } if name == "relative")));
    }

    #[test]
    fn test_metrics_address_checked_only_when_enabled() {
        let mut config = ResilienceConfig::default();
        config.observability.metrics_address = "not-an-address".into();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors, vec![ValidationError::MetricsAddress("not-an-address".into())]);
    }
}
