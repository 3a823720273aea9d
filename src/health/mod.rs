// Health monitor
//
// Each cycle probes every known backend concurrently: a liveness request,
// then (only if alive) a capability listing. Results are written back one
// descriptor at a time; a failure for one backend never touches another.

use chrono::Utc;
use futures::future::join_all;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::HealthConfig;
use crate::registry::{HealthTransition, ProbeApplied, ProbeOutcome, Registry, ServiceDescriptor};

pub struct HealthMonitor {
    registry: Registry,
    client: reqwest::Client,
    interval: Duration,
    liveness_timeout: Duration,
    capability_timeout: Duration,
}

impl HealthMonitor {
    pub fn new(registry: Registry, client: reqwest::Client, config: &HealthConfig) -> Self {
        Self {
            registry,
            client,
            interval: config.interval(),
            liveness_timeout: config.liveness_timeout(),
            capability_timeout: config.capability_timeout(),
        }
    }

    /// Probe on a fixed interval until cancelled. The first cycle runs immediately.
    pub async fn run(self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        // A slow cycle delays the next one instead of bunching probes up
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                _ = token.cancelled() => break,
                _ = self.run_cycle() => {}
            }
        }
        tracing::debug!("Health monitor stopped");
    }

    /// Probe every descriptor in the current snapshot once.
    pub async fn run_cycle(&self) {
        let snapshot = self.registry.snapshot().await;
        if snapshot.is_empty() {
            return;
        }

        let probes = snapshot.iter().map(|descriptor| async move {
            let outcome = self.probe(descriptor).await;
            let applied = self.registry.apply_probe(&descriptor.name, outcome).await;
            report(descriptor, applied);
        });
        join_all(probes).await;
    }

    /// Probe one backend. Never fails: errors become `alive: false`.
    pub async fn probe(&self, descriptor: &ServiceDescriptor) -> ProbeOutcome {
        let base = descriptor.endpoint();
        let liveness_url = format!("{}{}", base, descriptor.dialect.liveness_path());

        let alive = match self
            .client
            .get(&liveness_url)
            .timeout(self.liveness_timeout)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                tracing::debug!(
                    service = %descriptor.name,
                    status = %response.status(),
                    "Liveness probe rejected"
                );
                false
            }
            Err(e) => {
                tracing::debug!(service = %descriptor.name, "Liveness probe failed: {}", e);
                false
            }
        };

        let models = match (alive, descriptor.dialect.models_path()) {
            (true, Some(path)) => self.list_models(descriptor, &format!("{}{}", base, path)).await,
            _ => None,
        };

        ProbeOutcome {
            alive,
            models,
            at: Utc::now(),
        }
    }

    async fn list_models(&self, descriptor: &ServiceDescriptor, url: &str) -> Option<Vec<String>> {
        let response = self
            .client
            .get(url)
            .timeout(self.capability_timeout)
            .send()
            .await
            .and_then(|r| r.error_for_status());

        let body = match response {
            Ok(response) => response.bytes().await,
            Err(e) => Err(e),
        };

        match body {
            Ok(body) => match descriptor.dialect.parse_models(&body) {
                Ok(models) => Some(models),
                Err(e) => {
                    tracing::debug!(service = %descriptor.name, "Unreadable model listing: {}", e);
                    None
                }
            },
            Err(e) => {
                tracing::debug!(service = %descriptor.name, "Capability probe failed: {}", e);
                None
            }
        }
    }
}

fn report(descriptor: &ServiceDescriptor, applied: ProbeApplied) {
    let name = &descriptor.name;
    match applied {
        ProbeApplied::Changed(HealthTransition::Initial { healthy }) => {
            tracing::debug!(service = %name, healthy, "Initial health check complete")
        }
        ProbeApplied::Changed(HealthTransition::Recovered) => {
            tracing::info!(service = %name, endpoint = %descriptor.endpoint(), "Backend became healthy")
        }
        ProbeApplied::Changed(HealthTransition::Lost) => {
            tracing::warn!(service = %name, endpoint = %descriptor.endpoint(), "Backend became unhealthy")
        }
        ProbeApplied::Discarded => {
            tracing::debug!(service = %name, "Backend withdrawn during probe, result discarded")
        }
        ProbeApplied::Steady => {}
    }
}
