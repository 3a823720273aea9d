// Discovery feed
//
// Applies discovery events to the registry. A bad advertisement is logged and
// dropped; nothing here ends the loop except cancellation or a closed channel.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::advertisement::{Advertisement, AdvertisementError};
use crate::registry::{Registry, UpsertOutcome};

#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// A backend was (re-)advertised
    Advertised(Advertisement),
    /// A backend withdrew its advertisement
    Withdrawn(String),
    /// An advertisement could not be parsed
    Rejected(AdvertisementError),
}

pub struct DiscoveryFeed {
    registry: Registry,
}

impl DiscoveryFeed {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    pub async fn apply(&self, event: DiscoveryEvent) {
        self.apply_at(event, Utc::now()).await
    }

    pub async fn apply_at(&self, event: DiscoveryEvent, now: DateTime<Utc>) {
        match event {
            DiscoveryEvent::Advertised(ad) => {
                let name = ad.name.clone();
                let endpoint = format!("{}:{}", ad.address, ad.port);
                let priority = ad.priority;
                match self.registry.upsert(ad, now).await {
                    UpsertOutcome::Inserted => tracing::info!(
                        service = %name,
                        endpoint = %endpoint,
                        priority,
                        "Discovered backend"
                    ),
                    UpsertOutcome::Updated => {
                        tracing::debug!(service = %name, "Backend re-advertised")
                    }
                }
            }
            DiscoveryEvent::Withdrawn(name) => {
                if self.registry.remove(&name).await {
                    tracing::info!(service = %name, "Backend withdrawn");
                }
            }
            DiscoveryEvent::Rejected(err) => {
                tracing::warn!("Dropping malformed advertisement: {}", err);
            }
        }
    }

    /// Consume events until cancelled or every sender is dropped.
    pub async fn run(self, mut rx: mpsc::Receiver<DiscoveryEvent>, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => self.apply(event).await,
                    None => break,
                },
            }
        }
        tracing::debug!("Discovery feed stopped");
    }
}

/// Periodic eviction of descriptors whose `last_seen` is too old.
pub struct StalenessSweep {
    registry: Registry,
    stale_after: Duration,
    interval: Duration,
}

impl StalenessSweep {
    pub fn new(registry: Registry, stale_after: Duration, interval: Duration) -> Self {
        Self {
            registry,
            stale_after,
            interval,
        }
    }

    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Vec<String> {
        let evicted = self.registry.sweep_stale(now, self.stale_after).await;
        for name in &evicted {
            tracing::info!(service = %name, "Evicted stale backend");
        }
        evicted
    }

    pub async fn run(self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    self.sweep_once(Utc::now()).await;
                }
            }
        }
        tracing::debug!("Staleness sweep stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn advertised(name: &str, priority: i32) -> DiscoveryEvent {
        DiscoveryEvent::Advertised(Advertisement::new(
            name,
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)),
            8080,
            priority,
        ))
    }

    #[tokio::test]
    async fn test_rejected_event_does_not_disturb_registry() {
        let registry = Registry::new();
        let feed = DiscoveryFeed::new(registry.clone());

        feed.apply(advertised("a", 50)).await;
        feed.apply(DiscoveryEvent::Rejected(AdvertisementError::EmptyName)).await;
        feed.apply(advertised("b", 60)).await;

        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_withdrawal_of_unknown_name_is_harmless() {
        let registry = Registry::new();
        let feed = DiscoveryFeed::new(registry.clone());
        feed.apply(DiscoveryEvent::Withdrawn("ghost".to_string())).await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_run_stops_when_senders_drop() {
        let registry = Registry::new();
        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(DiscoveryFeed::new(registry.clone()).run(rx, CancellationToken::new()));

        tx.send(advertised("a", 50)).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert!(registry.get("a").await.is_some());
    }

    #[tokio::test]
    async fn test_sweep_once_uses_last_seen() {
        let registry = Registry::new();
        let feed = DiscoveryFeed::new(registry.clone());
        let now = Utc::now();
        feed.apply_at(advertised("old", 50), now - chrono::Duration::seconds(200)).await;
        feed.apply_at(advertised("new", 50), now).await;

        let sweep = StalenessSweep::new(
            registry.clone(),
            Duration::from_secs(120),
            Duration::from_secs(15),
        );
        assert_eq!(sweep.sweep_once(now).await, vec!["old".to_string()]);
        assert_eq!(registry.len().await, 1);
    }
}
