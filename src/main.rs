// Saturn - zero-configuration discovery and routing for local text-generation backends
// Main entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;

use saturn::config::{load_config, Config};
use saturn::daemon::run_gateway;
use saturn::dialects::Dialect;
use saturn::discovery::{discover, find_available_priority, Advertiser, AdvertiserConfig};

#[derive(Parser)]
#[command(name = "saturn", version, about = "Discover and route to text-generation backends on the local network")]
struct Cli {
    /// Configuration file (default: ~/.saturn/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the discovery router (default)
    Serve {
        /// Bind address, e.g. 127.0.0.1:9876
        #[arg(long)]
        bind: Option<String>,
        /// Port to listen on, or `auto` to scan for a free one
        #[arg(long)]
        port: Option<String>,
        /// Write the bound host:port here; removed on exit
        #[arg(long)]
        port_file: Option<PathBuf>,
    },
    /// Browse the network once and list advertised backends
    Discover {
        /// Seconds to browse
        #[arg(long, default_value_t = 3)]
        timeout: u64,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Advertise an existing backend on the network until interrupted
    Advertise {
        /// Instance name (default: saturn-<hostname>)
        #[arg(long, default_value = "")]
        name: String,
        /// Port the backend listens on
        #[arg(long)]
        port: u16,
        /// Address to publish (default: all interfaces)
        #[arg(long)]
        host_ip: Option<IpAddr>,
        /// Desired priority; bumped past priorities already in use
        #[arg(long, default_value_t = 50)]
        priority: i32,
        /// Comma-separated model identifiers
        #[arg(long, value_delimiter = ',')]
        models: Vec<String>,
        /// Comma-separated capability tags
        #[arg(long, value_delimiter = ',')]
        capabilities: Vec<String>,
        /// Backend wire format, advertised as `api_format`: openai, ollama or zeroconfai-v1
        #[arg(long, default_value = "openai")]
        api: String,
        /// Extra TXT properties as key=value
        #[arg(long = "property", value_parser = parse_property)]
        properties: Vec<(String, String)>,
        /// Keep the requested priority even if another backend uses it
        #[arg(long)]
        no_priority_check: bool,
    },
}

fn parse_property(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "saturn=debug,info" } else { "saturn=info,warn" };
    let subscriber = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default.into()),
        ))
        .with(tracing_subscriber::fmt::layer());

    if tracing::subscriber::set_global_default(subscriber).is_ok() {
        // mdns-sd logs through the `log` crate
        let _ = tracing_log::LogTracer::init();
    }
}

/// Replace the port of a `host:port` bind address.
fn with_port(bind_address: &str, port: &str) -> String {
    let host = bind_address
        .rsplit_once(':')
        .map(|(host, _)| host)
        .unwrap_or(bind_address);
    format!("{}:{}", host, port)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = load_config(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Serve {
        bind: None,
        port: None,
        port_file: None,
    }) {
        Command::Serve {
            bind,
            port,
            port_file,
        } => {
            if let Some(bind) = bind {
                config.server.bind_address = bind;
            }
            if let Some(port) = port {
                config.server.bind_address = with_port(&config.server.bind_address, &port);
            }
            if port_file.is_some() {
                config.server.port_file = port_file;
            }
            config.validate()?;
            tracing::info!("Starting saturn v{}", env!("CARGO_PKG_VERSION"));
            run_gateway(config).await
        }
        Command::Discover { timeout, json } => {
            run_discover(&config, Duration::from_secs(timeout), json).await
        }
        Command::Advertise {
            name,
            port,
            host_ip,
            priority,
            models,
            capabilities,
            api,
            properties,
            no_priority_check,
        } => {
            let dialect = Dialect::from_hint(&api)
                .with_context(|| format!("Unknown api dialect '{}'", api))?;
            let service_type = config.discovery.service_type.clone();
            let priority = if no_priority_check {
                priority
            } else {
                find_available_priority(&service_type, priority, Duration::from_secs(2)).await?
            };

            let advertiser = Advertiser::new(AdvertiserConfig {
                name,
                port,
                host_ip,
                priority,
                models,
                capabilities,
                dialect,
                extra: properties.into_iter().collect::<BTreeMap<_, _>>(),
            })?;
            advertiser.advertise(&service_type)?;

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            advertiser.stop()
        }
    }
}

async fn run_discover(config: &Config, timeout: Duration, json: bool) -> Result<()> {
    let found = discover(&config.discovery.service_type, timeout).await?;

    if json {
        let entries: Vec<serde_json::Value> = found
            .iter()
            .map(|ad| {
                serde_json::json!({
                    "name": ad.name,
                    "address": ad.address.to_string(),
                    "port": ad.port,
                    "priority": ad.priority,
                    "api": ad.dialect,
                    "models": ad.models,
                    "capabilities": ad.features,
                    "properties": ad.properties,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if found.is_empty() {
        println!("No backends found on {}", config.discovery.service_type);
        return Ok(());
    }
    for ad in &found {
        println!(
            "{:<24} {:>21}  priority={:<4} api={:<14} models={}",
            ad.name,
            format!("{}:{}", ad.address, ad.port),
            ad.priority,
            ad.dialect.as_str(),
            ad.models.join(",")
        );
    }
    Ok(())
}
