// Listener and port-file lifecycle
//
// Binds the HTTP listener (optionally scanning for a free port) and publishes
// the bound address in a port file for external launchers.

use anyhow::{Context, Result};
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::config::constants::{DEFAULT_PORT_SCAN_START, PORT_SCAN_ATTEMPTS};

/// File holding `host:port` of the running router
pub struct PortFile {
    path: PathBuf,
}

impl PortFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the bound address. Parent directories are created as needed.
    pub fn write(&self, addr: SocketAddr) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        fs::write(&self.path, addr.to_string())
            .with_context(|| format!("Failed to write port file: {}", self.path.display()))?;
        info!(addr = %addr, path = %self.path.display(), "Port file written");
        Ok(())
    }

    pub fn read(&self) -> Result<SocketAddr> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read port file: {}", self.path.display()))?;
        contents
            .trim()
            .parse()
            .with_context(|| format!("Invalid address in port file: {}", contents.trim()))
    }

    /// Remove the file (called on shutdown)
    pub fn cleanup(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path).with_context(|| {
                format!("Failed to remove port file: {}", self.path.display())
            })?;
            info!("Port file removed");
        }
        Ok(())
    }
}

/// Bind `host:port`, where a port of `auto` scans for a free one.
pub async fn bind_listener(bind_address: &str) -> Result<TcpListener> {
    if let Some(host) = bind_address.strip_suffix(":auto") {
        let host: IpAddr = host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse()
            .with_context(|| format!("Invalid bind host: {}", host))?;
        return find_available_port(host, DEFAULT_PORT_SCAN_START, PORT_SCAN_ATTEMPTS).await;
    }

    let addr: SocketAddr = bind_address
        .parse()
        .with_context(|| format!("Invalid bind address: {}", bind_address))?;
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))
}

/// First port in `start..start + attempts` that binds on `host`.
pub async fn find_available_port(host: IpAddr, start: u16, attempts: u16) -> Result<TcpListener> {
    for offset in 0..attempts {
        let Some(port) = start.checked_add(offset) else {
            break;
        };
        match TcpListener::bind(SocketAddr::new(host, port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) => debug!(port, "Port unavailable: {}", e),
        }
    }
    anyhow::bail!(
        "No free port in {}..{} on {}",
        start,
        start.saturating_add(attempts),
        host
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tempfile::TempDir;

    #[test]
    fn test_port_file_lifecycle() {
        let temp_dir = TempDir::new().unwrap();
        let port_file = PortFile::new(temp_dir.path().join("nested").join("saturn.port"));
        let addr: SocketAddr = "127.0.0.1:9876".parse().unwrap();

        port_file.write(addr).unwrap();
        assert!(port_file.path().exists());
        assert_eq!(port_file.read().unwrap(), addr);

        port_file.cleanup().unwrap();
        assert!(!port_file.path().exists());
        // Cleanup is idempotent
        port_file.cleanup().unwrap();
    }

    #[tokio::test]
    async fn test_scan_skips_taken_port() {
        let localhost = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let taken = TcpListener::bind(SocketAddr::new(localhost, 0)).await.unwrap();
        let start = taken.local_addr().unwrap().port();

        // The scan may land on any later free port; it must not be the taken one
        if let Ok(listener) = find_available_port(localhost, start, 5).await {
            assert_ne!(listener.local_addr().unwrap().port(), start);
        }
    }

    #[tokio::test]
    async fn test_explicit_bind() {
        let listener = bind_listener("127.0.0.1:0").await.unwrap();
        assert!(listener.local_addr().unwrap().port() > 0);
        assert!(bind_listener("not-an-address").await.is_err());
    }
}
