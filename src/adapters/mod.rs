pub mod health_checker;
pub mod http_client;
pub mod middleware;
pub mod module_mount;
pub mod proxy_mount;
pub mod registry;
pub mod status_api;

/// Re-export commonly used types from adapters
pub use health_checker::{HealthChecker, ProbeReport, ProbeSettings};
pub use http_client::HttpClientAdapter;
pub use module_mount::{ModuleCatalog, ModuleContext, ModuleDefinition, ModuleMount};
pub use proxy_mount::ProxyMount;
pub use registry::{ChildMount, MountReport, Registry};
pub use status_api::{StatusApiError, status_router};
