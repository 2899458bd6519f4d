//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, factors in range, ports valid)
//! - Check that declared node weights fit the rotation
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::ProxyConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address {value:?}")]
    InvalidAddress { field: &'static str, value: String },
    #[error("data.path must start with '/' (got {0:?})")]
    InvalidPath(String),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("rebalance.slow_factor must be at least 1.0 (got {0})")]
    SlowFactor(f64),
    #[error("rebalance.weight_factor must be in (0, 1) (got {0})")]
    WeightFactor(f64),
    #[error("node {index}: {reason}")]
    Node { index: usize, reason: String },
    #[error("sum of node weights ({total}) exceeds scheduler.rotation_capacity ({capacity})")]
    WeightsExceedCapacity { total: u64, capacity: usize },
}

/// Check a parsed configuration for semantic errors.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_addr(&mut errors, "data.bind_address", &config.data.bind_address);
    if config.control.enabled {
        check_addr(&mut errors, "control.bind_address", &config.control.bind_address);
    }
    if config.observability.metrics_enabled {
        check_addr(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if !config.data.path.starts_with('/') {
        errors.push(ValidationError::InvalidPath(config.data.path.clone()));
    }

    if config.scheduler.stats_buffer == 0 {
        errors.push(ValidationError::Zero("scheduler.stats_buffer"));
    }
    if config.timeouts.acquire_secs == 0 {
        errors.push(ValidationError::Zero("timeouts.acquire_secs"));
    }
    if config.timeouts.upstream_secs == 0 {
        errors.push(ValidationError::Zero("timeouts.upstream_secs"));
    }

    let rebalance = &config.rebalance;
    if rebalance.enabled && rebalance.interval_secs == 0 {
        errors.push(ValidationError::Zero("rebalance.interval_secs"));
    }
    if !(rebalance.slow_factor >= 1.0) {
        errors.push(ValidationError::SlowFactor(rebalance.slow_factor));
    }
    if !(rebalance.weight_factor > 0.0 && rebalance.weight_factor < 1.0) {
        errors.push(ValidationError::WeightFactor(rebalance.weight_factor));
    }

    for (index, node) in config.nodes.iter().enumerate() {
        if node.address.trim().is_empty() {
            errors.push(ValidationError::Node {
                index,
                reason: "address is empty".into(),
            });
        }
        if node.port == 0 {
            errors.push(ValidationError::Node {
                index,
                reason: "port must be non-zero".into(),
            });
        }
    }

    // 0 selects the default capacity
    if config.scheduler.rotation_capacity > 0 {
        let total: u64 = config.nodes.iter().map(|n| u64::from(n.weight)).sum();
        if total > config.scheduler.rotation_capacity as u64 {
            errors.push(ValidationError::WeightsExceedCapacity {
                total,
                capacity: config.scheduler.rotation_capacity,
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_addr(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}
