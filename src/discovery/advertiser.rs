// mDNS backend advertisement
//
// Puts an existing backend endpoint on the network under the saturn service
// type so routers can find it.

use anyhow::{Context, Result};
use mdns_sd::{ServiceDaemon, ServiceInfo};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::IpAddr;
use std::time::Duration;

use super::browser::discover;
use crate::dialects::Dialect;

/// What to advertise
#[derive(Debug, Clone)]
pub struct AdvertiserConfig {
    /// Instance name; defaults to `saturn-<hostname>` when empty
    pub name: String,
    pub port: u16,
    /// Address to publish; all interfaces are used when `None`
    pub host_ip: Option<IpAddr>,
    pub priority: i32,
    pub models: Vec<String>,
    pub capabilities: Vec<String>,
    pub dialect: Dialect,
    /// Free-form TXT hints (provider, auth_mode, billing, ...)
    pub extra: BTreeMap<String, String>,
}

pub struct Advertiser {
    daemon: ServiceDaemon,
    config: AdvertiserConfig,
    instance_name: String,
}

impl Advertiser {
    pub fn new(config: AdvertiserConfig) -> Result<Self> {
        let daemon = ServiceDaemon::new().context("Failed to create mDNS service daemon")?;

        let instance_name = if config.name.trim().is_empty() {
            format!("saturn-{}", local_hostname("saturn"))
        } else {
            config.name.trim().to_string()
        };

        tracing::debug!("Created mDNS advertiser for instance: {}", instance_name);

        Ok(Self {
            daemon,
            config,
            instance_name,
        })
    }

    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    /// TXT record for this backend.
    pub fn txt_properties(&self) -> HashMap<String, String> {
        let mut properties: HashMap<String, String> = self
            .config
            .extra
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        properties.insert("version".to_string(), env!("CARGO_PKG_VERSION").to_string());
        properties.insert("priority".to_string(), self.config.priority.to_string());
        properties.insert(
            "api_format".to_string(),
            self.config.dialect.as_str().to_string(),
        );
        if !self.config.models.is_empty() {
            properties.insert("models".to_string(), self.config.models.join(","));
        }
        if !self.config.capabilities.is_empty() {
            properties.insert(
                "capabilities".to_string(),
                self.config.capabilities.join(","),
            );
        }
        properties
    }

    /// Register the service under `service_type`.
    pub fn advertise(&self, service_type: &str) -> Result<()> {
        let host = format!("{}.local.", local_hostname("localhost"));

        let service_info = match self.config.host_ip {
            Some(ip) => ServiceInfo::new(
                service_type,
                &self.instance_name,
                &host,
                ip.to_string().as_str(),
                self.config.port,
                Some(self.txt_properties()),
            ),
            None => ServiceInfo::new(
                service_type,
                &self.instance_name,
                &host,
                (),
                self.config.port,
                Some(self.txt_properties()),
            )
            .map(ServiceInfo::enable_addr_auto),
        }
        .context("Failed to create service info")?;

        self.daemon
            .register(service_info)
            .context("Failed to register mDNS service")?;

        tracing::info!(
            service = %self.instance_name,
            port = self.config.port,
            priority = self.config.priority,
            api = self.config.dialect.as_str(),
            "Advertising backend"
        );

        Ok(())
    }

    /// Stop advertising. Shutting the daemon down sends the goodbye packets.
    pub fn stop(&self) -> Result<()> {
        self.daemon
            .shutdown()
            .context("Failed to stop mDNS service")?;

        tracing::info!(service = %self.instance_name, "Stopped advertising");
        Ok(())
    }
}

fn local_hostname(fallback: &str) -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .map(|h| h.trim_end_matches(".local").to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

/// Smallest priority >= `desired` not already taken.
pub fn next_free_priority(desired: i32, taken: &BTreeSet<i32>) -> i32 {
    let mut priority = desired;
    while taken.contains(&priority) {
        priority = priority.saturating_add(1);
        if priority == i32::MAX {
            break;
        }
    }
    priority
}

/// Browse briefly and bump `desired` past priorities other backends already advertise.
pub async fn find_available_priority(
    service_type: &str,
    desired: i32,
    browse_for: Duration,
) -> Result<i32> {
    let taken: BTreeSet<i32> = discover(service_type, browse_for)
        .await?
        .into_iter()
        .map(|ad| ad.priority)
        .collect();

    let priority = next_free_priority(desired, &taken);
    if priority != desired {
        tracing::info!(
            "Priority {} already in use, advertising with {}",
            desired,
            priority
        );
    }
    Ok(priority)
}
