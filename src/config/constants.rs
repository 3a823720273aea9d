// Project-wide constants
//
// Centralised here so port numbers and other magic values have one
// source of truth. Import via `use crate::config::constants::*;`.

/// DNS-SD service type every backend advertises under.
pub const SERVICE_TYPE: &str = "_saturn._tcp.local.";

/// Default bind address for the router's HTTP surface (localhost only).
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:9876";

/// First port tried when the bind port is `auto`.
pub const DEFAULT_PORT_SCAN_START: u16 = 9876;

/// Number of consecutive ports tried by the `auto` port scan.
pub const PORT_SCAN_ATTEMPTS: u16 = 20;

/// Priority assumed when an advertisement carries none.
pub const DEFAULT_PRIORITY: i32 = 50;

/// Model requested when neither the caller nor the backend names one.
pub const DEFAULT_MODEL: &str = "llama3.2";

/// Response header naming the backend that served a completion.
pub const BACKEND_HEADER: &str = "x-saturn-backend";

/// Upper bound for liveness and capability probes.
pub const MAX_PROBE_TIMEOUT_SECS: u64 = 3;

/// Request body limit for `/chat/completions`.
pub const DEFAULT_BODY_LIMIT_BYTES: usize = 4 * 1024 * 1024;
