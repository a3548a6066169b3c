//! Registry / mounter: turns configured child entries into descriptors and
//! routers.
//!
//! Startup is partial-failure tolerant. An entry that fails validation is
//! logged and skipped; an entry that validates is recorded in
//! [`GatewayState`] whether or not it can be mounted, so the status API can
//! report attempted-but-failed children.
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use axum::Router;

use crate::{
    adapters::{
        module_mount::{ModuleCatalog, ModuleMount},
        proxy_mount::ProxyMount,
    },
    config::{ChildServerEntry, ValidationError, descriptor_from_entry},
    core::{ChildServerDescriptor, ChildTarget, GatewayState, MountState},
    ports::{
        http_client::HttpClient,
        mountable::{MountError, Mountable},
    },
};

/// The two kinds of child, selected when the configuration is parsed.
#[derive(Debug)]
pub enum ChildMount {
    Proxy(ProxyMount),
    Module(ModuleMount),
}

impl Mountable for ChildMount {
    fn attach(&self, prefix: &str) -> Result<Router, MountError> {
        match self {
            ChildMount::Proxy(proxy) => proxy.attach(prefix),
            ChildMount::Module(module) => module.attach(prefix),
        }
    }
}

/// An entry that never became a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    /// Position in `child_servers`
    pub index: usize,
    pub name: Option<String>,
    pub reason: ValidationError,
}

/// What happened to every configured entry.
#[derive(Debug, Default)]
pub struct MountReport {
    pub mounted: Vec<String>,
    pub failed: Vec<(String, MountError)>,
    pub skipped: Vec<SkippedEntry>,
}

impl MountReport {
    /// Descriptors recorded, mounted or not.
    pub fn registered(&self) -> usize {
        self.mounted.len() + self.failed.len()
    }
}

pub struct Registry {
    state: Arc<GatewayState>,
    client: Arc<dyn HttpClient>,
    catalog: ModuleCatalog,
    config_dir: Option<PathBuf>,
}

impl Registry {
    pub fn new(
        state: Arc<GatewayState>,
        client: Arc<dyn HttpClient>,
        catalog: ModuleCatalog,
        config_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            state,
            client,
            catalog,
            config_dir,
        }
    }

    /// Directory relative module paths resolve against: the one holding the
    /// configuration file.
    pub fn config_dir_of(config_path: &Path) -> Option<PathBuf> {
        config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
    }

    /// Build the mount for a registered descriptor.
    pub fn build_mount(&self, descriptor: &ChildServerDescriptor) -> Result<ChildMount, MountError> {
        match descriptor.target() {
            ChildTarget::Proxy { .. } => Ok(ChildMount::Proxy(ProxyMount::new(
                descriptor,
                self.client.clone(),
                self.state.clone(),
            )?)),
            ChildTarget::Module(spec) => Ok(ChildMount::Module(ModuleMount::resolve(
                descriptor,
                spec,
                &self.catalog,
                self.config_dir.as_deref(),
                self.state.clone(),
            )?)),
        }
    }

    /// Validate, register and attach every entry; returns the merged router of
    /// all children that mounted.
    pub fn mount_all(&self, entries: &[ChildServerEntry]) -> (Router, MountReport) {
        let mut router = Router::new();
        let mut report = MountReport::default();

        for (index, entry) in entries.iter().enumerate() {
            let descriptor = match descriptor_from_entry(entry)
                .and_then(|descriptor| self.state.register(descriptor))
            {
                Ok(descriptor) => descriptor,
                Err(reason) => {
                    tracing::warn!(
                        "Skipping child server entry #{} ({}): {}",
                        index,
                        entry.name.as_deref().unwrap_or("<unnamed>"),
                        reason
                    );
                    report.skipped.push(SkippedEntry {
                        index,
                        name: entry.name.clone(),
                        reason,
                    });
                    continue;
                }
            };

            let name = descriptor.name().to_string();
            match self
                .build_mount(&descriptor)
                .and_then(|mount| mount.attach(descriptor.prefix()))
            {
                Ok(child) => {
                    router = router.merge(child);
                    self.state.set_mount_state(&name, MountState::Mounted);
                    tracing::info!(
                        "Mounted {} child server '{}' at prefix '{}'",
                        descriptor.kind(),
                        name,
                        descriptor.prefix()
                    );
                    report.mounted.push(name);
                }
                Err(e) => {
                    tracing::error!("Failed to mount {} child server '{}': {}", descriptor.kind(), name, e);
                    self.state.set_mount_state(
                        &name,
                        MountState::Failed {
                            reason: e.to_string(),
                        },
                    );
                    report.failed.push((name, e));
                }
            }
        }

        tracing::info!(
            "Registry loaded {} child servers ({} mounted, {} failed, {} skipped)",
            report.registered(),
            report.mounted.len(),
            report.failed.len(),
            report.skipped.len()
        );
        (router, report)
    }
}
