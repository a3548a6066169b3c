use std::path::PathBuf;

use axum::Router;
use thiserror::Error;

/// Why a child could not be attached. The registry logs it, records it on the
/// child's mount state and carries on with the other children.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum MountError {
    #[error("Module path does not exist: {}", .0.display())]
    ModulePathNotFound(PathBuf),

    #[error("No module registered under any of: {}", .candidates.join(", "))]
    UnknownModule { candidates: Vec<String> },

    #[error("Initializer '{function}' of module '{module}' failed: {reason}")]
    InitializerFailed {
        module: String,
        function: String,
        reason: String,
    },

    #[error("Module '{module}' has no '{function}' initializer and no 'mcp' or 'server' handle")]
    NoMountableHandle { module: String, function: String },

    #[error("Invalid proxy target '{url}': {reason}")]
    InvalidProxyTarget { url: String, reason: String },

    #[error("Invalid bearer credential for '{0}'")]
    InvalidCredential(String),
}

/// Something that can be attached into the routing namespace.
pub trait Mountable: Send + Sync {
    /// Build the router serving this child under `/{prefix}`.
    fn attach(&self, prefix: &str) -> Result<Router, MountError>;
}
