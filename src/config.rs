use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Engine-level settings: query deadlines, header forwarding, and the
/// match-cache bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Query-wide deadline in milliseconds.
    pub global_timeout_ms: u64,
    /// Default per-resource timeout in milliseconds, used when a statement
    /// declares none.
    pub resource_timeout_ms: u64,
    /// Input headers whose name starts with this prefix are forwarded to
    /// every upstream request.
    pub forward_prefix: String,
    pub parse_arg_cache_size: usize,
    pub match_value_cache_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            global_timeout_ms: 30_000,
            resource_timeout_ms: 5_000,
            forward_prefix: "c_".to_string(),
            parse_arg_cache_size: 512,
            match_value_cache_size: 2_048,
        }
    }
}

impl EngineConfig {
    pub fn global_timeout(&self) -> Duration {
        Duration::from_millis(self.global_timeout_ms)
    }

    pub fn resource_timeout(&self) -> Duration {
        Duration::from_millis(self.resource_timeout_ms)
    }
}

/// HTTP client settings: connection pool limits, transport timeouts, and
/// the DNS cache refresh cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub max_idle_conns_per_host: usize,
    pub idle_conn_timeout_secs: u64,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub dns_refresh_interval_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            max_idle_conns_per_host: 512,
            idle_conn_timeout_secs: 90,
            connect_timeout_ms: 1_000,
            read_timeout_ms: 5_000,
            dns_refresh_interval_secs: 600,
        }
    }
}

impl ClientConfig {
    pub fn idle_conn_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_conn_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn dns_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.dns_refresh_interval_secs)
    }
}
