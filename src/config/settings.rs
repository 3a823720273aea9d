// Configuration structs

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::constants::{
    DEFAULT_BIND_ADDR, DEFAULT_BODY_LIMIT_BYTES, DEFAULT_MODEL, MAX_PROBE_TIMEOUT_SECS,
    SERVICE_TYPE,
};

/// Top-level configuration, one section per subsystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub discovery: DiscoveryConfig,
    pub health: HealthConfig,
    pub router: RouterConfig,
}

/// HTTP surface configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g. "127.0.0.1:9876"). A port of `auto` scans for a free one.
    pub bind_address: String,
    /// Write `host:port` here once the listener is bound; removed on shutdown.
    pub port_file: Option<PathBuf>,
    /// Maximum accepted request body in bytes
    pub body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDR.to_string(),
            port_file: None,
            body_limit_bytes: DEFAULT_BODY_LIMIT_BYTES,
        }
    }
}

/// How descriptors leave the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Only explicit withdrawal (mDNS goodbye or record expiry) removes a descriptor.
    #[default]
    Withdrawal,
    /// Withdrawal plus a periodic sweep of descriptors not seen within `stale_after_secs`.
    /// Only for event sources without pushed withdrawal.
    Staleness,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// DNS-SD service type to browse
    pub service_type: String,
    pub eviction: EvictionPolicy,
    /// Age after which an unrefreshed descriptor is evicted (staleness policy only)
    pub stale_after_secs: u64,
    /// How often the staleness sweep runs
    pub sweep_interval_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            service_type: SERVICE_TYPE.to_string(),
            eviction: EvictionPolicy::default(),
            stale_after_secs: 120,
            sweep_interval_secs: 15,
        }
    }
}

impl DiscoveryConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Seconds between probe cycles
    pub interval_secs: u64,
    /// Liveness probe timeout
    pub liveness_timeout_secs: u64,
    /// Capability (model listing) probe timeout
    pub capability_timeout_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            liveness_timeout_secs: 2,
            capability_timeout_secs: 3,
        }
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_secs(self.liveness_timeout_secs)
    }

    pub fn capability_timeout(&self) -> Duration {
        Duration::from_secs(self.capability_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Timeout for a whole generation call
    pub generation_timeout_secs: u64,
    /// Model used when neither the request nor the backend supplies one
    pub default_model: String,
    /// Allow one re-selection (excluding the failed backend) when a target is unreachable
    pub failover: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            generation_timeout_secs: 60,
            default_model: DEFAULT_MODEL.to_string(),
            failover: true,
        }
    }
}

impl RouterConfig {
    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }
}

impl Config {
    /// Validate configuration and return helpful errors
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.bind_address.trim().is_empty() {
            anyhow::bail!("server.bind_address must not be empty");
        }
        if !self.discovery.service_type.ends_with(".local.") {
            anyhow::bail!(
                "discovery.service_type must be a DNS-SD type ending in '.local.' (got '{}')",
                self.discovery.service_type
            );
        }
        if self.discovery.eviction == EvictionPolicy::Staleness
            && (self.discovery.stale_after_secs == 0 || self.discovery.sweep_interval_secs == 0)
        {
            anyhow::bail!("discovery.stale_after_secs and sweep_interval_secs must be > 0");
        }
        if self.health.interval_secs == 0 {
            anyhow::bail!("health.interval_secs must be > 0");
        }
        if self.health.liveness_timeout_secs == 0 || self.health.capability_timeout_secs == 0 {
            anyhow::bail!("health probe timeouts must be > 0");
        }
        if self.health.liveness_timeout_secs > MAX_PROBE_TIMEOUT_SECS {
            anyhow::bail!(
                "health.liveness_timeout_secs must be at most {}",
                MAX_PROBE_TIMEOUT_SECS
            );
        }
        if self.health.capability_timeout_secs > MAX_PROBE_TIMEOUT_SECS {
            anyhow::bail!(
                "health.capability_timeout_secs must be at most {}",
                MAX_PROBE_TIMEOUT_SECS
            );
        }
        if self.router.generation_timeout_secs == 0 {
            anyhow::bail!("router.generation_timeout_secs must be > 0");
        }
        if self.router.default_model.trim().is_empty() {
            anyhow::bail!("router.default_model must not be empty");
        }
        Ok(())
    }
}
