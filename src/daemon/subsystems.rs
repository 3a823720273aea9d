// Subsystem supervisor
//
// Owns the background tasks (discovery feed, staleness sweep, health monitor,
// mDNS browser) and the token that stops them. `shutdown` cancels and joins
// every task before returning.

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, EvictionPolicy};
use crate::discovery::{DiscoveryEvent, DiscoveryFeed, MdnsBrowser, StalenessSweep};
use crate::health::HealthMonitor;
use crate::registry::Registry;

const EVENT_BUFFER: usize = 128;

pub struct Subsystems {
    registry: Registry,
    token: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    browser: Option<MdnsBrowser>,
}

impl Subsystems {
    /// Start everything, discovering backends over mDNS.
    pub fn start(config: &Config, client: reqwest::Client) -> Result<Self> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let mut subsystems = Self::start_with_events(config, client, rx);

        let browser = MdnsBrowser::new(&config.discovery.service_type)?;
        let handle = browser.spawn(tx, subsystems.token.clone())?;
        subsystems.tasks.push(("mdns-browser", handle));
        subsystems.browser = Some(browser);
        Ok(subsystems)
    }

    /// Start the feed, sweep and monitor on an externally supplied event source.
    pub fn start_with_events(
        config: &Config,
        client: reqwest::Client,
        events: mpsc::Receiver<DiscoveryEvent>,
    ) -> Self {
        let registry = Registry::new();
        let token = CancellationToken::new();
        let mut tasks = Vec::new();

        let feed = DiscoveryFeed::new(registry.clone());
        tasks.push(("discovery-feed", tokio::spawn(feed.run(events, token.clone()))));

        if config.discovery.eviction == EvictionPolicy::Staleness {
            let sweep = StalenessSweep::new(
                registry.clone(),
                config.discovery.stale_after(),
                config.discovery.sweep_interval(),
            );
            tasks.push(("staleness-sweep", tokio::spawn(sweep.run(token.clone()))));
        }

        let monitor = HealthMonitor::new(registry.clone(), client, &config.health);
        tasks.push(("health-monitor", tokio::spawn(monitor.run(token.clone()))));

        tracing::debug!(tasks = tasks.len(), "Subsystems started");

        Self {
            registry,
            token,
            tasks,
            browser: None,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Token cancelled by `shutdown`; child tokens stop alongside the subsystems.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub async fn shutdown(self) {
        self.token.cancel();
        for (name, handle) in self.tasks {
            if let Err(e) = handle.await {
                tracing::warn!(task = name, "Task ended abnormally: {}", e);
            }
        }
        if let Some(browser) = self.browser {
            browser.shutdown();
        }
        tracing::info!("Subsystems stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::Advertisement;
    use std::time::Duration;

    #[tokio::test]
    async fn test_shutdown_joins_all_tasks() {
        let (tx, rx) = mpsc::channel(8);
        let subsystems = Subsystems::start_with_events(&Config::default(), reqwest::Client::new(), rx);

        tx.send(DiscoveryEvent::Advertised(Advertisement::new(
            "a",
            "127.0.0.1".parse().unwrap(),
            9,
            50,
        )))
        .await
        .unwrap();

        // The feed applies asynchronously
        let registry = subsystems.registry().clone();
        tokio::time::timeout(Duration::from_secs(2), async {
            while registry.get("a").await.is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        tokio::time::timeout(Duration::from_secs(5), subsystems.shutdown())
            .await
            .expect("shutdown hung");
    }
}
