//! mountgate - a gateway that mounts child servers under path prefixes.
//!
//! Each configured child is either a **proxy** (a remote server reached over
//! HTTP) or a **module** (a router compiled into the gateway and looked up in a
//! [`ModuleCatalog`]). Children are attached at `{ingress_path}/{prefix}`; the
//! gateway probes their reachability, aggregates per-child and global request,
//! error and latency metrics, tracks active clients on the ingress path, and
//! serves read-only status endpoints (`/`, `/health`, `/health/{name}`,
//! `/status`, `/metrics`).
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (axum / hyper
//! implementations) while keeping in-memory logic inside `core`. One
//! [`GatewayState`] is created at startup and shared by every handler and the
//! prober worker; all metric mutation goes through the recorder in
//! [`metrics`].
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use mountgate::{
//!     GatewayState, HealthChecker, HttpClientAdapter, ModuleCatalog, Registry,
//!     adapters::ProbeSettings, build_app, config::load_config, ports::HttpClient,
//! };
//!
//! # fn main() -> eyre::Result<()> {
//! let config = load_config("gateway.json")?;
//! let state = Arc::new(GatewayState::default());
//! let client: Arc<dyn HttpClient> = Arc::new(HttpClientAdapter::new()?);
//! let registry = Registry::new(
//!     state.clone(),
//!     client.clone(),
//!     ModuleCatalog::with_builtin_modules(),
//!     None,
//! );
//! let (children, _report) = registry.mount_all(&config.child_servers);
//! let checker = Arc::new(HealthChecker::new(
//!     state.clone(),
//!     client,
//!     ProbeSettings::from(&config.health_check),
//! ));
//! let app = build_app(&config, state, checker, children);
//! # let _ = app;
//! # Ok(()) }
//! ```
//!
//! # Error Handling
//! Library operations return domain error types (`MountError`,
//! `ValidationError`, `HttpClientError`, `ConfigurationError`); the binary
//! uses `eyre::Result` with context. Startup is partial-failure tolerant: a bad
//! child entry or a child that cannot be mounted is logged and skipped.
pub mod app;
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{HealthChecker, HttpClientAdapter, ModuleCatalog, Registry},
    app::build_app,
    core::GatewayState,
    ports::http_client::HttpClient,
    utils::{GracefulShutdown, spawn_probe_worker},
};
