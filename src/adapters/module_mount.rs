//! In-process module children.
//!
//! Modules are compiled into the gateway and registered in a [`ModuleCatalog`]
//! under an importable name. A [`ModuleDefinition`] exposes named initializers
//! and/or pre-built routers ("handles"); resolution tries the configured
//! initializer first, then the `mcp` handle, then the `server` handle.
use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use axum::{
    Json, Router,
    extract::{Request, State},
    middleware::{self, Next},
    response::Response,
    routing::get,
};
use serde_json::{Value, json};

use crate::{
    core::{ChildServerDescriptor, GatewayState, ModuleSpec},
    metrics::ObservationOutcome,
    ports::mountable::{MountError, Mountable},
};

/// Handle names looked up, in order, after the initializer.
pub const HANDLE_ATTRIBUTES: [&str; 2] = ["mcp", "server"];

/// Name of the module carrying the gateway's own informational routes.
pub const GATEWAY_INFO_MODULE: &str = "gateway_info";

/// Builds a module's router.
pub type ModuleInitializer = Arc<dyn Fn(&ModuleContext) -> eyre::Result<Router> + Send + Sync>;

/// What an initializer gets to work with.
pub struct ModuleContext {
    pub child_name: String,
    pub state: Arc<GatewayState>,
    pub envvars: BTreeMap<String, String>,
}

impl ModuleContext {
    /// Configured variable, falling back to the process environment.
    pub fn env(&self, key: &str) -> Option<String> {
        self.envvars
            .get(key)
            .cloned()
            .or_else(|| std::env::var(key).ok())
    }
}

/// Everything one module exposes.
#[derive(Clone, Default)]
pub struct ModuleDefinition {
    initializers: HashMap<String, ModuleInitializer>,
    handles: HashMap<String, Router>,
}

impl ModuleDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initializer<F>(mut self, name: impl Into<String>, init: F) -> Self
    where
        F: Fn(&ModuleContext) -> eyre::Result<Router> + Send + Sync + 'static,
    {
        self.initializers.insert(name.into(), Arc::new(init));
        self
    }

    pub fn with_handle(mut self, name: impl Into<String>, router: Router) -> Self {
        self.handles.insert(name.into(), router);
        self
    }

    /// Resolve the routable handle: `function`, then `mcp`, then `server`.
    fn resolve(
        &self,
        module: &str,
        function: &str,
        ctx: &ModuleContext,
    ) -> Result<Router, MountError> {
        if let Some(init) = self.initializers.get(function) {
            return init(ctx).map_err(|e| MountError::InitializerFailed {
                module: module.to_string(),
                function: function.to_string(),
                reason: format!("{e:#}"),
            });
        }
        HANDLE_ATTRIBUTES
            .iter()
            .find_map(|attr| self.handles.get(*attr).cloned())
            .ok_or_else(|| MountError::NoMountableHandle {
                module: module.to_string(),
                function: function.to_string(),
            })
    }
}

impl fmt::Debug for ModuleDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut initializers: Vec<_> = self.initializers.keys().collect();
        initializers.sort();
        let mut handles: Vec<_> = self.handles.keys().collect();
        handles.sort();
        f.debug_struct("ModuleDefinition")
            .field("initializers", &initializers)
            .field("handles", &handles)
            .finish()
    }
}

/// Importable modules known to this binary.
#[derive(Debug, Clone, Default)]
pub struct ModuleCatalog {
    modules: HashMap<String, ModuleDefinition>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog pre-populated with the modules shipped in the gateway itself.
    pub fn with_builtin_modules() -> Self {
        let mut catalog = Self::new();
        catalog.register(GATEWAY_INFO_MODULE, gateway_info_module());
        catalog
    }

    pub fn register(&mut self, name: impl Into<String>, definition: ModuleDefinition) {
        self.modules.insert(name.into(), definition);
    }

    pub fn get(&self, name: &str) -> Option<&ModuleDefinition> {
        self.modules.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }
}

/// Importable name implied by a module location: a directory (package) name
/// with `-` turned into `_`, or a file stem.
fn name_from_path(path: &Path) -> Option<String> {
    if path.is_dir() {
        path.file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.replace('-', "_"))
    } else {
        path.file_stem()
            .and_then(|n| n.to_str())
            .map(str::to_string)
    }
}

fn candidate_names(spec: &ModuleSpec, resolved_path: Option<&Path>) -> Vec<String> {
    let mut candidates = Vec::new();
    if let Some(name) = &spec.module_name {
        candidates.push(name.clone());
    } else if let Some(from_path) = resolved_path.and_then(name_from_path) {
        candidates.push(from_path);
    }
    if candidates.is_empty() {
        candidates.push(ModuleSpec::DEFAULT_MODULE_NAME.to_string());
    }
    candidates
}

/// A resolved in-process child.
pub struct ModuleMount {
    name: String,
    module: String,
    router: Router,
    state: Arc<GatewayState>,
}

impl fmt::Debug for ModuleMount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleMount")
            .field("name", &self.name)
            .field("module", &self.module)
            .finish_non_exhaustive()
    }
}

impl ModuleMount {
    /// Locate the module in `catalog` and obtain its router.
    ///
    /// Relative `module_path`s resolve against `config_dir`. The configured
    /// `module_envvars` reach the initializer through [`ModuleContext::env`];
    /// the process environment is never modified here.
    pub fn resolve(
        descriptor: &ChildServerDescriptor,
        spec: &ModuleSpec,
        catalog: &ModuleCatalog,
        config_dir: Option<&Path>,
        state: Arc<GatewayState>,
    ) -> Result<Self, MountError> {
        let resolved_path = match &spec.module_path {
            Some(path) => {
                let full: PathBuf = match config_dir {
                    Some(dir) if path.is_relative() => dir.join(path),
                    _ => path.clone(),
                };
                if !full.exists() {
                    return Err(MountError::ModulePathNotFound(full));
                }
                Some(full)
            }
            None => None,
        };

        let candidates = candidate_names(spec, resolved_path.as_deref());
        let Some((module, definition)) = candidates
            .iter()
            .find_map(|name| catalog.get(name).map(|def| (name.clone(), def)))
        else {
            return Err(MountError::UnknownModule { candidates });
        };

        let ctx = ModuleContext {
            child_name: descriptor.name().to_string(),
            state: state.clone(),
            envvars: spec.envvars.clone(),
        };
        let router = definition.resolve(&module, &spec.init_function, &ctx)?;

        tracing::debug!(
            "Resolved module '{}' for child '{}'",
            module,
            descriptor.name()
        );
        Ok(Self {
            name: descriptor.name().to_string(),
            module,
            router,
            state,
        })
    }

    pub fn module(&self) -> &str {
        &self.module
    }
}

impl Mountable for ModuleMount {
    fn attach(&self, prefix: &str) -> Result<Router, MountError> {
        let observed = self.router.clone().layer(middleware::from_fn_with_state(
            (self.state.clone(), Arc::<str>::from(self.name.as_str())),
            observe_module,
        ));
        Ok(Router::new().nest(&format!("/{prefix}"), observed))
    }
}

async fn observe_module(
    State((state, name)): State<(Arc<GatewayState>, Arc<str>)>,
    req: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let response = next.run(req).await;
    let outcome = if response.status().is_server_error() {
        ObservationOutcome::Unhealthy
    } else {
        ObservationOutcome::Healthy
    };
    state.record_observation(&name, started.elapsed().as_secs_f64() * 1000.0, outcome);
    response
}

fn gateway_info_module() -> ModuleDefinition {
    ModuleDefinition::new().with_initializer(ModuleSpec::DEFAULT_INIT_FUNCTION, |ctx| {
        Ok(Router::new()
            .route("/info", get(gateway_info))
            .route("/servers", get(list_servers))
            .with_state(ctx.state.clone()))
    })
}

async fn gateway_info(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    Json(json!({
        "name": "mountgate",
        "version": env!("CARGO_PKG_VERSION"),
        "child_servers": state.child_count(),
        "uptime_seconds": state.uptime().as_secs_f64(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn list_servers(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    let servers: Vec<Value> = state
        .descriptors()
        .iter()
        .map(|d| {
            json!({
                "name": d.name(),
                "type": d.kind(),
                "prefix": d.prefix(),
                "url": d.url().unwrap_or("N/A"),
            })
        })
        .collect();
    Json(Value::Array(servers))
}
