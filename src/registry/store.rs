// Registry store
//
// One map behind one `tokio::sync::RwLock`. Every method takes the lock for a
// short, await-free section; callers never hold a reference into the map.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::descriptor::{HealthTransition, ServiceDescriptor};
use crate::discovery::Advertisement;

/// Whether an upsert created a new descriptor or refreshed an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Result of one health probe, ready to apply.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub alive: bool,
    /// Models from the capability probe; `None` keeps the cached list
    pub models: Option<Vec<String>>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeApplied {
    /// The descriptor was withdrawn while the probe was in flight
    Discarded,
    /// Health unchanged
    Steady,
    Changed(HealthTransition),
}

#[derive(Default)]
struct Inner {
    services: HashMap<String, ServiceDescriptor>,
    next_seq: u64,
}

/// Thread-safe registry of discovered backends.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RwLock<Inner>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh by name. Re-advertisement never resets health.
    pub async fn upsert(&self, ad: Advertisement, now: DateTime<Utc>) -> UpsertOutcome {
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner.services.get_mut(&ad.name) {
            existing.refresh(ad, now);
            return UpsertOutcome::Updated;
        }

        inner.next_seq += 1;
        let seq = inner.next_seq;
        let name = ad.name.clone();
        inner
            .services
            .insert(name, ServiceDescriptor::from_advertisement(ad, seq, now));
        UpsertOutcome::Inserted
    }

    /// Delete immediately. Returns whether the name was present.
    pub async fn remove(&self, name: &str) -> bool {
        self.inner.write().await.services.remove(name).is_some()
    }

    /// Owned copy of every descriptor, ordered by (priority, discovery order).
    pub async fn snapshot(&self) -> Vec<ServiceDescriptor> {
        let inner = self.inner.read().await;
        let mut services: Vec<ServiceDescriptor> = inner.services.values().cloned().collect();
        services.sort_by_key(|d| (d.priority, d.discovered_seq));
        services
    }

    pub async fn get(&self, name: &str) -> Option<ServiceDescriptor> {
        self.inner.read().await.services.get(name).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.services.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Apply a probe result to one descriptor, reporting a transition only
    /// when the health flag actually changed (or on the very first result).
    pub async fn apply_probe(&self, name: &str, outcome: ProbeOutcome) -> ProbeApplied {
        let mut inner = self.inner.write().await;
        let Some(descriptor) = inner.services.get_mut(name) else {
            return ProbeApplied::Discarded;
        };

        let was_probed = descriptor.first_probe_complete;
        let previous = descriptor.healthy;

        descriptor.healthy = outcome.alive;
        descriptor.first_probe_complete = true;
        if outcome.alive {
            descriptor.last_seen = outcome.at;
        }
        if let Some(models) = outcome.models {
            descriptor.capabilities.models = models;
        }

        match (was_probed, previous, outcome.alive) {
            (false, _, healthy) => ProbeApplied::Changed(HealthTransition::Initial { healthy }),
            (true, false, true) => ProbeApplied::Changed(HealthTransition::Recovered),
            (true, true, false) => ProbeApplied::Changed(HealthTransition::Lost),
            _ => ProbeApplied::Steady,
        }
    }

    /// Evict descriptors not seen for longer than `stale_after`; returns their names.
    pub async fn sweep_stale(&self, now: DateTime<Utc>, stale_after: Duration) -> Vec<String> {
        let mut inner = self.inner.write().await;
        let stale: Vec<String> = inner
            .services
            .values()
            .filter(|d| {
                (now - d.last_seen)
                    .to_std()
                    .map(|age| age > stale_after)
                    .unwrap_or(false)
            })
            .map(|d| d.name.clone())
            .collect();

        for name in &stale {
            inner.services.remove(name);
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn ad(name: &str, priority: i32) -> Advertisement {
        Advertisement::new(name, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 8080, priority)
    }

    fn probe(alive: bool) -> ProbeOutcome {
        ProbeOutcome {
            alive,
            models: None,
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_readvertisement_replaces_not_duplicates() {
        let registry = Registry::new();
        assert_eq!(registry.upsert(ad("a", 50), Utc::now()).await, UpsertOutcome::Inserted);
        registry.apply_probe("a", probe(true)).await;

        assert_eq!(registry.upsert(ad("a", 40), Utc::now()).await, UpsertOutcome::Updated);
        assert_eq!(registry.len().await, 1);

        let a = registry.get("a").await.unwrap();
        assert_eq!(a.priority, 40);
        assert!(a.healthy, "update must not reset health");
        assert_eq!(a.discovered_seq, 1);
    }

    #[tokio::test]
    async fn test_remove_is_immediate() {
        let registry = Registry::new();
        registry.upsert(ad("a", 50), Utc::now()).await;
        assert!(registry.remove("a").await);
        assert!(registry.get("a").await.is_none());
        assert!(!registry.remove("a").await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_snapshot_ordering_uses_discovery_tie_break() {
        let registry = Registry::new();
        registry.upsert(ad("late-low", 10), Utc::now()).await;
        registry.upsert(ad("first", 50), Utc::now()).await;
        registry.upsert(ad("second", 50), Utc::now()).await;

        let names: Vec<String> = registry.snapshot().await.into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["late-low", "first", "second"]);
    }

    #[tokio::test]
    async fn test_transitions_reported_once() {
        let registry = Registry::new();
        registry.upsert(ad("a", 50), Utc::now()).await;

        assert_eq!(
            registry.apply_probe("a", probe(true)).await,
            ProbeApplied::Changed(HealthTransition::Initial { healthy: true })
        );
        assert_eq!(registry.apply_probe("a", probe(true)).await, ProbeApplied::Steady);
        assert_eq!(
            registry.apply_probe("a", probe(false)).await,
            ProbeApplied::Changed(HealthTransition::Lost)
        );
        for _ in 0..5 {
            assert_eq!(registry.apply_probe("a", probe(false)).await, ProbeApplied::Steady);
        }
        assert_eq!(
            registry.apply_probe("a", probe(true)).await,
            ProbeApplied::Changed(HealthTransition::Recovered)
        );
    }

    #[tokio::test]
    async fn test_probe_failure_is_isolated() {
        let registry = Registry::new();
        registry.upsert(ad("a", 50), Utc::now()).await;
        registry.upsert(ad("b", 100), Utc::now()).await;
        registry.apply_probe("a", probe(true)).await;
        registry.apply_probe("b", probe(true)).await;

        registry.apply_probe("a", probe(false)).await;

        assert!(!registry.get("a").await.unwrap().healthy);
        assert!(registry.get("b").await.unwrap().healthy);
    }

    #[tokio::test]
    async fn test_probe_after_withdrawal_is_discarded() {
        let registry = Registry::new();
        registry.upsert(ad("a", 50), Utc::now()).await;
        registry.remove("a").await;

        assert_eq!(registry.apply_probe("a", probe(true)).await, ProbeApplied::Discarded);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_capability_probe_keeps_cached_models() {
        let registry = Registry::new();
        registry.upsert(ad("a", 50), Utc::now()).await;
        registry
            .apply_probe(
                "a",
                ProbeOutcome {
                    alive: true,
                    models: Some(vec!["llama3.2".to_string()]),
                    at: Utc::now(),
                },
            )
            .await;
        registry.apply_probe("a", probe(true)).await;

        assert_eq!(registry.get("a").await.unwrap().models(), ["llama3.2".to_string()]);
    }

    #[tokio::test]
    async fn test_sweep_evicts_only_stale() {
        let registry = Registry::new();
        let now = Utc::now();
        registry.upsert(ad("old", 50), now - chrono::Duration::seconds(300)).await;
        registry.upsert(ad("fresh", 50), now).await;

        let evicted = registry.sweep_stale(now, Duration::from_secs(120)).await;
        assert_eq!(evicted, vec!["old".to_string()]);
        assert!(registry.get("fresh").await.is_some());
    }

    #[tokio::test]
    async fn test_failed_probe_does_not_refresh_last_seen() {
        let registry = Registry::new();
        let then = Utc::now() - chrono::Duration::seconds(300);
        registry.upsert(ad("a", 50), then).await;
        registry.apply_probe("a", probe(false)).await;

        assert_eq!(registry.get("a").await.unwrap().last_seen, then);
    }
}
