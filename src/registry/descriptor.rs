// Service descriptor: the registry's record for one backend

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

use crate::dialects::Dialect;
use crate::discovery::Advertisement;

/// Feature tags and, once probed, the concrete model list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    pub features: Vec<String>,
    /// Models from the last successful capability probe
    pub models: Vec<String>,
}

/// Health as seen by callers: `Unknown` until the first probe completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Unknown,
    Healthy,
    Unhealthy,
}

/// A change in a descriptor's health, reported once per change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    /// First probe result (leaves `Unknown`)
    Initial { healthy: bool },
    Recovered,
    Lost,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceDescriptor {
    pub name: String,
    pub address: IpAddr,
    pub port: u16,
    /// Lower is preferred. Set by the backend, never recomputed here.
    pub priority: i32,
    pub dialect: Dialect,
    pub capabilities: Capabilities,
    /// Models hinted in the advertisement
    pub advertised_models: Vec<String>,
    pub properties: BTreeMap<String, String>,
    /// Result of the most recent liveness probe
    pub healthy: bool,
    pub first_probe_complete: bool,
    pub last_seen: DateTime<Utc>,
    /// Insertion order; equal priorities resolve to the earliest discovered
    pub discovered_seq: u64,
}

impl ServiceDescriptor {
    pub(crate) fn from_advertisement(ad: Advertisement, seq: u64, now: DateTime<Utc>) -> Self {
        Self {
            name: ad.name,
            address: ad.address,
            port: ad.port,
            priority: ad.priority,
            dialect: ad.dialect,
            capabilities: Capabilities {
                features: ad.features,
                models: Vec::new(),
            },
            advertised_models: ad.models,
            properties: ad.properties,
            healthy: false,
            first_probe_complete: false,
            last_seen: now,
            discovered_seq: seq,
        }
    }

    /// Refresh identity and capability hints from a re-advertisement.
    /// Health, probed models and the discovery sequence are kept.
    pub(crate) fn refresh(&mut self, ad: Advertisement, now: DateTime<Utc>) {
        self.address = ad.address;
        self.port = ad.port;
        self.priority = ad.priority;
        self.dialect = ad.dialect;
        self.capabilities.features = ad.features;
        self.advertised_models = ad.models;
        self.properties = ad.properties;
        self.last_seen = now;
    }

    /// Base URL, e.g. `http://192.168.1.20:11434`. IPv6 hosts are bracketed.
    pub fn endpoint(&self) -> String {
        match self.address {
            IpAddr::V4(v4) => format!("http://{}:{}", v4, self.port),
            IpAddr::V6(v6) => format!("http://[{}]:{}", v6, self.port),
        }
    }

    /// Probed models when known, otherwise the advertised hint.
    pub fn models(&self) -> &[String] {
        if self.capabilities.models.is_empty() {
            &self.advertised_models
        } else {
            &self.capabilities.models
        }
    }

    pub fn health_state(&self) -> HealthState {
        match (self.first_probe_complete, self.healthy) {
            (false, _) => HealthState::Unknown,
            (true, true) => HealthState::Healthy,
            (true, false) => HealthState::Unhealthy,
        }
    }

    pub fn to_summary(&self) -> ServiceSummary {
        ServiceSummary {
            name: self.name.clone(),
            url: self.endpoint(),
            priority: self.priority,
            api: self.dialect,
            models: self.models().to_vec(),
            features: self.capabilities.features.clone(),
            healthy: self.healthy,
            health: self.health_state(),
            last_seen: self.last_seen,
            properties: self.properties.clone(),
        }
    }
}

/// Serializable view of a descriptor (for GET /services).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSummary {
    pub name: String,
    pub url: String,
    pub priority: i32,
    pub api: Dialect,
    pub models: Vec<String>,
    pub features: Vec<String>,
    pub healthy: bool,
    pub health: HealthState,
    pub last_seen: DateTime<Utc>,
    pub properties: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn descriptor() -> ServiceDescriptor {
        let ad = Advertisement::new("Box", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), 8080, 10)
            .with_models(["llama3.2"]);
        ServiceDescriptor::from_advertisement(ad, 1, Utc::now())
    }

    #[test]
    fn test_endpoint_brackets_ipv6() {
        let mut d = descriptor();
        assert_eq!(d.endpoint(), "http://10.0.0.2:8080");
        d.address = "fe80::1".parse().unwrap();
        assert_eq!(d.endpoint(), "http://[fe80::1]:8080");
    }

    #[test]
    fn test_probed_models_override_advertised() {
        let mut d = descriptor();
        assert_eq!(d.models(), ["llama3.2".to_string()]);
        d.capabilities.models = vec!["qwen2.5".to_string()];
        assert_eq!(d.models(), ["qwen2.5".to_string()]);
    }

    #[test]
    fn test_health_state_unknown_until_first_probe() {
        let mut d = descriptor();
        assert_eq!(d.health_state(), HealthState::Unknown);
        d.first_probe_complete = true;
        assert_eq!(d.health_state(), HealthState::Unhealthy);
        d.healthy = true;
        assert_eq!(d.health_state(), HealthState::Healthy);
    }

    #[test]
    fn test_refresh_keeps_health_and_sequence() {
        let mut d = descriptor();
        d.healthy = true;
        d.first_probe_complete = true;
        d.capabilities.models = vec!["probed".to_string()];

        let ad = Advertisement::new("Box", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 3)), 9090, 5);
        d.refresh(ad, Utc::now());

        assert_eq!(d.port, 9090);
        assert_eq!(d.priority, 5);
        assert!(d.healthy);
        assert_eq!(d.discovered_seq, 1);
        assert_eq!(d.models(), ["probed".to_string()]);
    }
}
