//! Child server descriptors.
//!
//! A descriptor is the validated, immutable identity of one configured child:
//! its unique name, its unique routing prefix and what it points at. The
//! registry records one for every entry that passes validation, whether or not
//! the child could actually be mounted.
use std::{collections::BTreeMap, fmt, path::PathBuf};

use serde::Serialize;

/// Whether a child runs in another process or inside the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildKind {
    Proxy,
    Module,
}

impl ChildKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChildKind::Proxy => "proxy",
            ChildKind::Module => "module",
        }
    }
}

impl fmt::Display for ChildKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bearer credential reference. The configured value names an environment
/// variable; when that variable is unset the value is used as the token itself.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerAuth {
    token_ref: String,
}

impl BearerAuth {
    pub fn new(token_ref: impl Into<String>) -> Self {
        Self {
            token_ref: token_ref.into(),
        }
    }

    /// Resolve the token through the environment-variable indirection.
    pub fn resolve(&self) -> String {
        self.resolve_with(|key| std::env::var(key).ok())
    }

    /// Resolve the token with `lookup` standing in for the environment.
    pub fn resolve_with(&self, lookup: impl FnOnce(&str) -> Option<String>) -> String {
        lookup(&self.token_ref).unwrap_or_else(|| self.token_ref.clone())
    }

    /// `Authorization` header value for the resolved token.
    pub fn header_value(&self) -> String {
        format!("Bearer {}", self.resolve())
    }
}

// Never print the credential.
impl fmt::Debug for BearerAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerAuth").finish_non_exhaustive()
    }
}

/// How to locate an in-process module implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSpec {
    /// Explicit location, absolute or relative to the configuration file
    pub module_path: Option<PathBuf>,
    /// Explicit importable name, if configured
    pub module_name: Option<String>,
    /// Initializer looked up first when resolving the mountable handle
    pub init_function: String,
    /// Variables exposed to the module's initializer
    pub envvars: BTreeMap<String, String>,
}

impl ModuleSpec {
    pub const DEFAULT_MODULE_NAME: &'static str = "mcp_server";
    pub const DEFAULT_INIT_FUNCTION: &'static str = "initialize";
}

/// Type-specific part of a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildTarget {
    Proxy {
        url: String,
        health_endpoint: Option<String>,
        auth: Option<BearerAuth>,
    },
    Module(ModuleSpec),
}

/// Immutable identity of a configured child server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildServerDescriptor {
    name: String,
    prefix: String,
    target: ChildTarget,
}

impl ChildServerDescriptor {
    pub fn new(name: impl Into<String>, prefix: impl Into<String>, target: ChildTarget) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
            target,
        }
    }

    /// Convenience constructor for an unauthenticated proxy child.
    pub fn proxy(name: impl Into<String>, prefix: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(
            name,
            prefix,
            ChildTarget::Proxy {
                url: url.into(),
                health_endpoint: None,
                auth: None,
            },
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn target(&self) -> &ChildTarget {
        &self.target
    }

    pub fn kind(&self) -> ChildKind {
        match self.target {
            ChildTarget::Proxy { .. } => ChildKind::Proxy,
            ChildTarget::Module(_) => ChildKind::Module,
        }
    }

    /// Remote URL of a proxy child.
    pub fn url(&self) -> Option<&str> {
        match &self.target {
            ChildTarget::Proxy { url, .. } => Some(url),
            ChildTarget::Module(_) => None,
        }
    }

    pub fn auth(&self) -> Option<&BearerAuth> {
        match &self.target {
            ChildTarget::Proxy { auth, .. } => auth.as_ref(),
            ChildTarget::Module(_) => None,
        }
    }

    /// Health URL probed for a proxy child.
    ///
    /// An absolute `health_endpoint` is used verbatim. Otherwise the base is the
    /// proxy URL with `rpc_path_suffix` stripped, followed by the configured
    /// endpoint path or `default_path`.
    pub fn health_url(&self, default_path: &str, rpc_path_suffix: &str) -> Option<String> {
        let ChildTarget::Proxy {
            url,
            health_endpoint,
            ..
        } = &self.target
        else {
            return None;
        };

        if let Some(endpoint) = health_endpoint {
            if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
                return Some(endpoint.clone());
            }
        }

        let trimmed = url.trim_end_matches('/');
        let base = if rpc_path_suffix.is_empty() {
            trimmed
        } else {
            trimmed.strip_suffix(rpc_path_suffix).unwrap_or(trimmed)
        };
        let base = base.trim_end_matches('/');

        let path = health_endpoint.as_deref().unwrap_or(default_path);
        if path.starts_with('/') {
            Some(format!("{base}{path}"))
        } else {
            Some(format!("{base}/{path}"))
        }
    }
}
