//! Configuration Module
//!
//! Handles loading engine and server configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::cache::{EvictionPolicy, MAX_DURATION_SECS};

/// Engine and server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Entry cap of the default strategy
    pub max_entries: u64,
    /// Byte cap of the default strategy
    pub max_size_bytes: u64,
    /// Default TTL in seconds for entries without explicit or rule TTL
    pub default_ttl: u64,
    /// Eviction policy of the default strategy
    pub eviction_policy: EvictionPolicy,
    /// HTTP server port
    pub server_port: u16,
    /// Expiry/eviction sweep interval in seconds
    pub sweep_interval: u64,
    /// Schedule check interval in seconds
    pub scheduler_interval: u64,
    /// Metrics recompute and alert evaluation interval in seconds
    pub metrics_interval: u64,
    /// Persistence flush interval in seconds
    pub persist_interval: u64,
    /// Number of metrics samples kept
    pub metrics_history: usize,
    /// Directory for persisted records; in-memory when unset
    pub data_dir: Option<PathBuf>,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `MAX_ENTRIES` - Default strategy entry cap (default: 1000)
    /// - `MAX_SIZE_BYTES` - Default strategy byte cap (default: 64 MiB)
    /// - `DEFAULT_TTL` - Default TTL in seconds (default: 300)
    /// - `EVICTION_POLICY` - lru, lfu, fifo or ttl (default: lru)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `SWEEP_INTERVAL` - Expiry/eviction sweep in seconds (default: 60)
    /// - `SCHEDULER_INTERVAL` - Schedule check in seconds (default: 30)
    /// - `METRICS_INTERVAL` - Metrics recompute in seconds (default: 30)
    /// - `PERSIST_INTERVAL` - Persistence flush in seconds (default: 5)
    /// - `METRICS_HISTORY` - Samples kept (default: 100)
    /// - `DATA_DIR` - Persistence directory (default: unset, in-memory)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_entries: parse_var("MAX_ENTRIES").unwrap_or(defaults.max_entries),
            max_size_bytes: parse_var("MAX_SIZE_BYTES").unwrap_or(defaults.max_size_bytes),
            default_ttl: parse_var::<u64>("DEFAULT_TTL")
                .unwrap_or(defaults.default_ttl)
                .min(MAX_DURATION_SECS as u64),
            eviction_policy: parse_var("EVICTION_POLICY").unwrap_or(defaults.eviction_policy),
            server_port: parse_var("SERVER_PORT").unwrap_or(defaults.server_port),
            sweep_interval: parse_var("SWEEP_INTERVAL").unwrap_or(defaults.sweep_interval),
            scheduler_interval: parse_var("SCHEDULER_INTERVAL")
                .unwrap_or(defaults.scheduler_interval),
            metrics_interval: parse_var("METRICS_INTERVAL").unwrap_or(defaults.metrics_interval),
            persist_interval: parse_var("PERSIST_INTERVAL").unwrap_or(defaults.persist_interval),
            metrics_history: parse_var("METRICS_HISTORY").unwrap_or(defaults.metrics_history),
            data_dir: env::var("DATA_DIR")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        }
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            max_size_bytes: 64 * 1024 * 1024,
            default_ttl: 300,
            eviction_policy: EvictionPolicy::Lru,
            server_port: 3000,
            sweep_interval: 60,
            scheduler_interval: 30,
            metrics_interval: 30,
            persist_interval: 5,
            metrics_history: 100,
            data_dir: None,
        }
    }
}
