//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::load_balancer::scheduler::DEFAULT_ROTATION_CAPACITY;
use crate::load_balancer::stats::DEFAULT_STATS_BUFFER;

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Data path listener (proxied traffic).
    pub data: DataPathConfig,

    /// Control surface listener (node admission and stats).
    pub control: ControlConfig,

    /// Scheduler sizing.
    pub scheduler: SchedulerConfig,

    /// Periodic weight rebalancing.
    pub rebalance: RebalanceConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Size limits.
    pub limits: LimitsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Worker nodes admitted at startup.
    pub nodes: Vec<NodeConfig>,
}

/// Data path listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DataPathConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Path prefix proxied to the nodes; also reported in scheduler stats.
    pub path: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,
}

impl Default for DataPathConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            path: "/".to_string(),
            tls: None,
        }
    }
}

/// Control surface configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Serve the control API.
    pub enabled: bool,

    /// Bind address (e.g., "0.0.0.0:8081").
    pub bind_address: String,

    /// Bearer token required on every control request, if set.
    pub api_key: Option<String>,

    /// Answer CORS preflights and allow any origin.
    pub cors: bool,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0:8081".to_string(),
            api_key: None,
            cors: true,
            tls: None,
        }
    }
}

/// TLS configuration for a listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Scheduler sizing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of queued tokens; should cover the sum of all node weights.
    pub rotation_capacity: usize,

    /// Pending statistics updates buffered per accumulator.
    pub stats_buffer: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            rotation_capacity: DEFAULT_ROTATION_CAPACITY,
            stats_buffer: DEFAULT_STATS_BUFFER,
        }
    }
}

/// Rebalance policy coefficients.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RebalanceConfig {
    /// Run the periodic rebalancer.
    pub enabled: bool,

    /// Seconds between rounds.
    pub interval_secs: u64,

    /// A node is slow when its average exceeds the best average times this factor.
    pub slow_factor: f64,

    /// Slow nodes are re-admitted with their weight multiplied by this factor.
    pub weight_factor: f64,

    /// Lower bound for a rebalanced weight.
    pub min_weight: u32,

    /// Minimum transactions before a node is judged.
    pub min_samples: u64,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 15 * 60,
            slow_factor: 2.0,
            weight_factor: 0.5,
            min_weight: 1,
            min_samples: 100,
        }
    }
}

/// Timeout configuration for request handling.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Longest a request waits for a free node, in seconds.
    pub acquire_secs: u64,

    /// Upstream exchange timeout (request through full response body) in seconds.
    pub upstream_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            acquire_secs: 30,
            upstream_secs: 30,
        }
    }
}

/// Size limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest upstream response body relayed, in bytes.
    pub max_response_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_response_bytes: 16 * 1024 * 1024, // 16MB
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// A worker node definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct NodeConfig {
    /// Host name or IP address.
    pub address: String,

    /// Port the node listens on.
    pub port: u16,

    /// Number of concurrent turns granted in the rotation.
    #[serde(default = "default_weight", alias = "maxTransactions")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}
