// Selection policy
//
// Pure functions over a registry snapshot. No locking, no I/O, no mutation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::RouteError;
use crate::registry::ServiceDescriptor;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectError {
    #[error("no healthy backend available")]
    NoHealthyBackend,

    #[error("backend '{0}' not found or unhealthy")]
    NamedBackendUnavailable(String),
}

impl From<SelectError> for RouteError {
    fn from(err: SelectError) -> Self {
        match err {
            SelectError::NoHealthyBackend => RouteError::NoHealthyBackend,
            SelectError::NamedBackendUnavailable(name) => RouteError::BackendNotFound(name),
        }
    }
}

/// Pick the backend for a request.
///
/// With `explicit`, an exact name match wins, then a case-insensitive
/// substring match; the match must be healthy. Without it, the healthy
/// descriptor with the lowest priority wins, ties going to the one
/// discovered first.
pub fn select<'a>(
    snapshot: &'a [ServiceDescriptor],
    explicit: Option<&str>,
) -> Result<&'a ServiceDescriptor, SelectError> {
    select_excluding(snapshot, explicit, &[])
}

/// As [`select`], ignoring descriptors named in `excluded`.
pub fn select_excluding<'a>(
    snapshot: &'a [ServiceDescriptor],
    explicit: Option<&str>,
    excluded: &[String],
) -> Result<&'a ServiceDescriptor, SelectError> {
    let candidates = || {
        snapshot
            .iter()
            .filter(move |d| !excluded.iter().any(|name| name == &d.name))
    };

    match explicit.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => {
            if let Some(exact) = candidates().find(|d| d.name == name) {
                return if exact.healthy {
                    Ok(exact)
                } else {
                    Err(SelectError::NamedBackendUnavailable(name.to_string()))
                };
            }
            let needle = name.to_lowercase();
            candidates()
                .filter(|d| d.healthy && d.name.to_lowercase().contains(&needle))
                .min_by_key(|d| rank(d))
                .ok_or_else(|| SelectError::NamedBackendUnavailable(name.to_string()))
        }
        None => candidates()
            .filter(|d| d.healthy)
            .min_by_key(|d| rank(d))
            .ok_or(SelectError::NoHealthyBackend),
    }
}

fn rank(d: &ServiceDescriptor) -> (i32, u64) {
    (d.priority, d.discovered_seq)
}

/// Aggregate readiness of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    /// At least one healthy backend
    Ready,
    /// Backends known, none healthy, some still awaiting their first probe
    Transitional,
    NoServices,
}

pub fn readiness(snapshot: &[ServiceDescriptor]) -> Readiness {
    if snapshot.iter().any(|d| d.healthy) {
        Readiness::Ready
    } else if snapshot.iter().any(|d| !d.first_probe_complete) {
        Readiness::Transitional
    } else {
        Readiness::NoServices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::Advertisement;
    use crate::registry::{ProbeOutcome, Registry};
    use chrono::Utc;
    use std::net::{IpAddr, Ipv4Addr};

    async fn snapshot(entries: &[(&str, i32, bool)]) -> Vec<ServiceDescriptor> {
        let registry = Registry::new();
        for (name, priority, healthy) in entries {
            let ad = Advertisement::new(*name, IpAddr::V4(Ipv4Addr::LOCALHOST), 8080, *priority);
            registry.upsert(ad, Utc::now()).await;
            registry
                .apply_probe(
                    name,
                    ProbeOutcome {
                        alive: *healthy,
                        models: None,
                        at: Utc::now(),
                    },
                )
                .await;
        }
        registry.snapshot().await
    }

    #[tokio::test]
    async fn test_lowest_priority_healthy_wins() {
        let snap = snapshot(&[("slow", 100, true), ("fast", 50, true)]).await;
        assert_eq!(select(&snap, None).unwrap().name, "fast");
    }

    #[tokio::test]
    async fn test_unhealthy_skipped() {
        let snap = snapshot(&[("fast", 50, false), ("slow", 100, true)]).await;
        assert_eq!(select(&snap, None).unwrap().name, "slow");
    }

    #[tokio::test]
    async fn test_no_healthy_backend() {
        let snap = snapshot(&[("a", 50, false)]).await;
        assert_eq!(select(&snap, None), Err(SelectError::NoHealthyBackend));
        assert_eq!(select(&[], None), Err(SelectError::NoHealthyBackend));
    }

    #[tokio::test]
    async fn test_equal_priority_first_discovered_wins() {
        let snap = snapshot(&[("zeta", 50, true), ("alpha", 50, true)]).await;
        assert_eq!(select(&snap, None).unwrap().name, "zeta");
    }

    #[tokio::test]
    async fn test_selection_is_deterministic_and_pure() {
        let snap = snapshot(&[("a", 50, true), ("b", 50, true), ("c", 10, false)]).await;
        let before: Vec<(String, bool)> = snap.iter().map(|d| (d.name.clone(), d.healthy)).collect();

        let first = select(&snap, None).unwrap().name.clone();
        let second = select(&snap, None).unwrap().name.clone();
        assert_eq!(first, second);

        let after: Vec<(String, bool)> = snap.iter().map(|d| (d.name.clone(), d.healthy)).collect();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_explicit_exact_then_substring() {
        let snap = snapshot(&[("OllamaBox", 50, true), ("OpenRouter Cloud", 100, true)]).await;
        assert_eq!(select(&snap, Some("OllamaBox")).unwrap().name, "OllamaBox");
        assert_eq!(select(&snap, Some("openrouter")).unwrap().name, "OpenRouter Cloud");
    }

    #[tokio::test]
    async fn test_explicit_never_falls_back_to_auto() {
        let snap = snapshot(&[("OllamaBox", 50, true)]).await;
        assert_eq!(
            select(&snap, Some("Nonexistent")),
            Err(SelectError::NamedBackendUnavailable("Nonexistent".to_string()))
        );
    }

    #[tokio::test]
    async fn test_explicit_unhealthy_exact_match_not_found() {
        let snap = snapshot(&[("box", 50, false), ("box-2", 60, true)]).await;
        assert!(matches!(
            select(&snap, Some("box")),
            Err(SelectError::NamedBackendUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_excluding() {
        let snap = snapshot(&[("a", 50, true), ("b", 100, true)]).await;
        let picked = select_excluding(&snap, None, &["a".to_string()]).unwrap();
        assert_eq!(picked.name, "b");
        assert_eq!(
            select_excluding(&snap, None, &["a".to_string(), "b".to_string()]),
            Err(SelectError::NoHealthyBackend)
        );
    }

    #[tokio::test]
    async fn test_readiness() {
        assert_eq!(readiness(&[]), Readiness::NoServices);
        assert_eq!(
            readiness(&snapshot(&[("a", 50, false)]).await),
            Readiness::NoServices
        );
        assert_eq!(
            readiness(&snapshot(&[("a", 50, false), ("b", 60, true)]).await),
            Readiness::Ready
        );

        let registry = Registry::new();
        let ad = Advertisement::new("new", IpAddr::V4(Ipv4Addr::LOCALHOST), 8080, 50);
        registry.upsert(ad, Utc::now()).await;
        assert_eq!(readiness(&registry.snapshot().await), Readiness::Transitional);
    }
}
