//! Configuration data structures for mountgate.
//!
//! These types map directly to JSON (also YAML / TOML) configuration files. Every
//! block carries defaults so a file listing only `child_servers` is enough to run.
//! Child entries are kept deliberately loose at this layer (all fields optional):
//! a malformed entry must be reported and skipped by the registry, never fail the
//! whole document.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Top-level gateway configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GatewayConfig {
    /// Socket address the HTTP surface binds to
    pub listen_addr: String,
    /// Primary ingress path; children are mounted at `{ingress_path}/{prefix}`
    pub ingress_path: String,
    pub health_check: HealthCheckConfig,
    pub connections: ConnectionConfig,
    pub cors: CorsConfig,
    pub logging: LoggingConfig,
    pub child_servers: Vec<ChildServerEntry>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8001".to_string(),
            ingress_path: "/mcp".to_string(),
            health_check: HealthCheckConfig::default(),
            connections: ConnectionConfig::default(),
            cors: CorsConfig::default(),
            logging: LoggingConfig::default(),
            child_servers: Vec::new(),
        }
    }
}

impl GatewayConfig {
    /// Replace the port of `listen_addr`, keeping its host part.
    pub fn override_port(&mut self, port: u16) {
        let host = self
            .listen_addr
            .rsplit_once(':')
            .map(|(host, _)| host.to_string())
            .unwrap_or_else(|| "127.0.0.1".to_string());
        self.listen_addr = format!("{host}:{port}");
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Run the periodic prober worker
    pub enabled: bool,
    pub interval_secs: u64,
    /// Per-probe timeout of the periodic cycle
    pub timeout_secs: u64,
    /// Per-probe timeout of the synchronous `/health/{name}` check
    pub on_demand_timeout_secs: u64,
    /// Health path appended to a proxy base URL when no override is configured
    pub default_path: String,
    /// RPC path suffix stripped from a proxy URL to infer its base
    pub rpc_path_suffix: String,
    pub max_concurrent_probes: usize,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 5,
            timeout_secs: 2,
            on_demand_timeout_secs: 5,
            default_path: "/health".to_string(),
            rpc_path_suffix: "/mcp".to_string(),
            max_concurrent_probes: 16,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Connections unseen for longer than this are dropped on next enumeration
    pub idle_timeout_secs: u64,
    /// Upper bound on tracked client addresses
    pub max_tracked: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 30,
            max_tracked: 1024,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CorsConfig {
    pub enabled: bool,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// Emit JSON lines instead of pretty console output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// One raw `child_servers` entry as written in the configuration file.
///
/// Turned into a [`ChildServerDescriptor`](crate::core::ChildServerDescriptor) by
/// [`descriptor_from_entry`](crate::config::validation::descriptor_from_entry).
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ChildServerEntry {
    pub name: Option<String>,
    /// `proxy` or `module`
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub prefix: Option<String>,

    // proxy
    pub url: Option<String>,
    pub health_endpoint: Option<String>,
    pub auth: Option<AuthEntry>,

    // module
    pub module_path: Option<String>,
    pub module_name: Option<String>,
    pub init_function: Option<String>,
    pub module_envvars: BTreeMap<String, String>,
}

/// `auth` block of a proxy entry.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AuthEntry {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Name of an environment variable holding the token, or the token itself
    pub token: Option<String>,
}
