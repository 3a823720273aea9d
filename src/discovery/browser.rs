// mDNS browser
//
// Browses one service type and forwards resolved/removed services as
// `DiscoveryEvent`s on an mpsc channel.

use anyhow::{Context, Result};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::advertisement::{instance_name, Advertisement};
use super::feed::DiscoveryEvent;

pub struct MdnsBrowser {
    daemon: ServiceDaemon,
    service_type: String,
}

impl MdnsBrowser {
    pub fn new(service_type: impl Into<String>) -> Result<Self> {
        let daemon = ServiceDaemon::new().context("Failed to create mDNS service daemon")?;
        Ok(Self {
            daemon,
            service_type: service_type.into(),
        })
    }

    /// Start browsing and pump events into `tx` until `token` is cancelled
    /// or the receiving side goes away.
    pub fn spawn(
        &self,
        tx: mpsc::Sender<DiscoveryEvent>,
        token: CancellationToken,
    ) -> Result<JoinHandle<()>> {
        let receiver = self
            .daemon
            .browse(&self.service_type)
            .with_context(|| format!("Failed to browse {}", self.service_type))?;
        let service_type = self.service_type.clone();

        tracing::info!(service_type = %service_type, "Browsing for backends");

        Ok(tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = token.cancelled() => break,
                    event = receiver.recv_async() => event,
                };
                let event = match event {
                    Ok(event) => event,
                    Err(_) => {
                        tracing::warn!("mDNS event channel closed, browser stopping");
                        break;
                    }
                };
                if let Some(event) = translate(event, &service_type) {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
            }
            tracing::debug!("mDNS browser stopped");
        }))
    }

    /// Stop browsing and shut the daemon down.
    pub fn shutdown(&self) {
        if let Err(e) = self.daemon.stop_browse(&self.service_type) {
            tracing::debug!("stop_browse failed: {}", e);
        }
        if let Err(e) = self.daemon.shutdown() {
            tracing::debug!("mDNS daemon shutdown failed: {}", e);
        }
    }
}

/// Map one mDNS event onto the registry's vocabulary.
pub fn translate(event: ServiceEvent, service_type: &str) -> Option<DiscoveryEvent> {
    match event {
        ServiceEvent::ServiceResolved(info) => Some(resolved(&info, service_type)),
        ServiceEvent::ServiceRemoved(_, fullname) => Some(DiscoveryEvent::Withdrawn(
            instance_name(&fullname, service_type),
        )),
        other => {
            tracing::debug!("mDNS event: {:?}", other);
            None
        }
    }
}

fn resolved(info: &ServiceInfo, service_type: &str) -> DiscoveryEvent {
    let name = instance_name(info.get_fullname(), service_type);
    let addresses: Vec<IpAddr> = info
        .get_addresses()
        .iter()
        .map(|addr| IpAddr::from(*addr))
        .collect();
    let txt = info
        .get_properties()
        .iter()
        .map(|p| (p.key().to_string(), p.val_str().to_string()));

    match Advertisement::parse(&name, &addresses, info.get_port(), txt) {
        Ok(ad) => DiscoveryEvent::Advertised(ad),
        Err(e) => DiscoveryEvent::Rejected(e),
    }
}

/// Browse for `timeout` and return every advertisement seen that was not
/// withdrawn again in the meantime.
pub async fn discover(service_type: &str, timeout: Duration) -> Result<Vec<Advertisement>> {
    let browser = MdnsBrowser::new(service_type)?;
    let (tx, mut rx) = mpsc::channel(64);
    let token = CancellationToken::new();
    let handle = browser.spawn(tx, token.clone())?;

    let mut found: Vec<Advertisement> = Vec::new();
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = rx.recv() => match event {
                Some(DiscoveryEvent::Advertised(ad)) => {
                    found.retain(|existing| existing.name != ad.name);
                    found.push(ad);
                }
                Some(DiscoveryEvent::Withdrawn(name)) => found.retain(|ad| ad.name != name),
                Some(DiscoveryEvent::Rejected(e)) => {
                    tracing::warn!("Ignoring malformed advertisement: {}", e);
                }
                None => break,
            },
        }
    }

    token.cancel();
    let _ = handle.await;
    browser.shutdown();

    found.sort_by_key(|ad| ad.priority);
    Ok(found)
}
