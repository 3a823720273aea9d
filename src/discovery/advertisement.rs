// Advertisement parsing
//
// Turns a resolved DNS-SD record (instance name, addresses, port, TXT pairs)
// into the hints the registry stores. Only `priority`, `models`,
// `capabilities` and the dialect hint are load-bearing; everything else is
// carried through as informational properties.

use std::collections::BTreeMap;
use std::net::IpAddr;
use thiserror::Error;

use crate::config::constants::DEFAULT_PRIORITY;
use crate::dialects::Dialect;

/// A single advertisement that could not be turned into a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdvertisementError {
    #[error("advertisement has an empty instance name")]
    EmptyName,

    #[error("advertisement '{name}' carries no address")]
    NoAddress { name: String },

    #[error("advertisement '{name}' carries port 0")]
    InvalidPort { name: String },

    #[error("advertisement '{name}' has non-integer priority '{value}'")]
    InvalidPriority { name: String, value: String },
}

/// Identity and capability hints for one backend, as advertised.
#[derive(Debug, Clone, PartialEq)]
pub struct Advertisement {
    pub name: String,
    pub address: IpAddr,
    pub port: u16,
    pub priority: i32,
    pub dialect: Dialect,
    pub models: Vec<String>,
    pub features: Vec<String>,
    /// Remaining TXT pairs (version, provider, auth_mode, billing, ...)
    pub properties: BTreeMap<String, String>,
}

impl Advertisement {
    pub fn new(name: impl Into<String>, address: IpAddr, port: u16, priority: i32) -> Self {
        Self {
            name: name.into(),
            address,
            port,
            priority,
            dialect: Dialect::default(),
            models: Vec::new(),
            features: Vec::new(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn with_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.models = models.into_iter().map(Into::into).collect();
        self
    }

    /// Build from a resolved record.
    pub fn parse<I>(
        name: &str,
        addresses: &[IpAddr],
        port: u16,
        txt: I,
    ) -> Result<Self, AdvertisementError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let name = name.trim();
        if name.is_empty() {
            return Err(AdvertisementError::EmptyName);
        }
        let address = preferred_address(addresses).ok_or_else(|| AdvertisementError::NoAddress {
            name: name.to_string(),
        })?;
        if port == 0 {
            return Err(AdvertisementError::InvalidPort {
                name: name.to_string(),
            });
        }

        let mut ad = Advertisement::new(name, address, port, DEFAULT_PRIORITY);
        let mut dialect_hint = None;

        for (key, value) in txt {
            let key = key.trim().to_ascii_lowercase();
            match key.as_str() {
                "priority" => {
                    ad.priority = value.trim().parse().map_err(|_| {
                        AdvertisementError::InvalidPriority {
                            name: name.to_string(),
                            value: value.clone(),
                        }
                    })?;
                }
                "models" => ad.models = split_list(&value),
                "capabilities" => ad.features = split_list(&value),
                // `api` is only a provider label; the wire format lives in `api_format`
                "api_format" => dialect_hint = Some(value),
                _ => {
                    ad.properties.insert(key, value);
                }
            }
        }

        if let Some(hint) = dialect_hint {
            match Dialect::from_hint(&hint) {
                Some(dialect) => ad.dialect = dialect,
                None => tracing::debug!(
                    service = %name,
                    hint = %hint,
                    "Unknown api_format, assuming OpenAI-compatible"
                ),
            }
        }

        Ok(ad)
    }
}

/// Non-loopback IPv4 first, then any non-loopback address, then loopback.
pub fn preferred_address(addresses: &[IpAddr]) -> Option<IpAddr> {
    addresses
        .iter()
        .filter(|a| !a.is_unspecified())
        .min_by_key(|a| match a {
            IpAddr::V4(v4) if !v4.is_loopback() => 0,
            other if !other.is_loopback() => 1,
            _ => 2,
        })
        .copied()
}

/// Instance label of a DNS-SD full name (`Box._saturn._tcp.local.` -> `Box`).
pub fn instance_name(fullname: &str, service_type: &str) -> String {
    fullname
        .strip_suffix(service_type)
        .and_then(|rest| rest.strip_suffix('.'))
        .unwrap_or_else(|| fullname.trim_end_matches('.'))
        .to_string()
}

fn split_list(value: &str) -> Vec<String> {
    let mut items: Vec<String> = Vec::new();
    for item in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !items.iter().any(|existing| existing == item) {
            items.push(item.to_string());
        }
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn txt(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn lan() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20))
    }

    #[test]
    fn test_parse_full_record() {
        let ad = Advertisement::parse(
            "OllamaBox",
            &[lan()],
            11434,
            txt(&[
                ("version", "1.0"),
                ("priority", "20"),
                ("models", "llama3.2, mistral,llama3.2"),
                ("capabilities", "chat,stream"),
                ("api_format", "ollama"),
                ("api", "Ollama"),
                ("provider", "ollama"),
            ]),
        )
        .unwrap();

        assert_eq!(ad.priority, 20);
        assert_eq!(ad.models, vec!["llama3.2", "mistral"]);
        assert_eq!(ad.features, vec!["chat", "stream"]);
        assert_eq!(ad.dialect, Dialect::Ollama);
        assert_eq!(ad.properties.get("version").map(String::as_str), Some("1.0"));
        assert!(!ad.properties.contains_key("priority"));
        assert_eq!(ad.properties.get("api").map(String::as_str), Some("Ollama"));
    }

    #[test]
    fn test_defaults_without_txt() {
        let ad = Advertisement::parse("Plain", &[lan()], 8080, Vec::new()).unwrap();
        assert_eq!(ad.priority, DEFAULT_PRIORITY);
        assert_eq!(ad.dialect, Dialect::OpenAi);
        assert!(ad.models.is_empty());
    }

    #[test]
    fn test_api_format_selects_dialect() {
        let ad = Advertisement::parse(
            "Legacy",
            &[lan()],
            8080,
            txt(&[("api_format", "zeroconfai-v1"), ("api", "openai")]),
        )
        .unwrap();
        assert_eq!(ad.dialect, Dialect::Legacy);
    }

    #[test]
    fn test_api_label_does_not_select_dialect() {
        // Ollama-backed servers label themselves `api=Ollama` but speak /v1/*
        let ad = Advertisement::parse(
            "Ollama",
            &[lan()],
            8080,
            txt(&[("api", "Ollama"), ("priority", "50")]),
        )
        .unwrap();
        assert_eq!(ad.dialect, Dialect::OpenAi);
        assert_eq!(ad.properties.get("api").map(String::as_str), Some("Ollama"));
    }

    #[test]
    fn test_malformed_records() {
        assert_eq!(
            Advertisement::parse("  ", &[lan()], 80, Vec::new()),
            Err(AdvertisementError::EmptyName)
        );
        assert!(matches!(
            Advertisement::parse("a", &[], 80, Vec::new()),
            Err(AdvertisementError::NoAddress { .. })
        ));
        assert!(matches!(
            Advertisement::parse("a", &[lan()], 0, Vec::new()),
            Err(AdvertisementError::InvalidPort { .. })
        ));
        assert!(matches!(
            Advertisement::parse("a", &[lan()], 80, txt(&[("priority", "high")])),
            Err(AdvertisementError::InvalidPriority { .. })
        ));
    }

    #[test]
    fn test_address_preference() {
        let loopback = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let v6 = IpAddr::V6("fd00::5".parse::<Ipv6Addr>().unwrap());
        assert_eq!(preferred_address(&[loopback, v6, lan()]), Some(lan()));
        assert_eq!(preferred_address(&[loopback, v6]), Some(v6));
        assert_eq!(preferred_address(&[loopback]), Some(loopback));
        assert_eq!(preferred_address(&[IpAddr::V4(Ipv4Addr::UNSPECIFIED)]), None);
    }

    #[test]
    fn test_instance_name() {
        let ty = "_saturn._tcp.local.";
        assert_eq!(instance_name("OllamaBox._saturn._tcp.local.", ty), "OllamaBox");
        assert_eq!(instance_name("My Box._saturn._tcp.local.", ty), "My Box");
        assert_eq!(instance_name("odd.name.local.", ty), "odd.name.local");
    }
}
