use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use futures_util::future::join_all;
use serde::Serialize;
use tokio::{sync::Semaphore, time::timeout};
use tracing::Instrument;

use crate::{
    config::HealthCheckConfig,
    core::{ChildKind, ChildServerDescriptor, GatewayState, MountState},
    metrics::{ConnectionStatus, ProbeVerdict},
    ports::http_client::{HttpClient, HttpClientError},
    tracing_setup::create_probe_span,
};

/// Probe parameters derived from the `health_check` configuration block.
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub timeout: Duration,
    pub on_demand_timeout: Duration,
    pub default_path: String,
    pub rpc_path_suffix: String,
    pub max_concurrent_probes: usize,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self::from(&HealthCheckConfig::default())
    }
}

impl From<&HealthCheckConfig> for ProbeSettings {
    fn from(config: &HealthCheckConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            on_demand_timeout: Duration::from_secs(config.on_demand_timeout_secs),
            default_path: config.default_path.clone(),
            rpc_path_suffix: config.rpc_path_suffix.clone(),
            max_concurrent_probes: config.max_concurrent_probes.max(1),
        }
    }
}

/// Outcome of probing one child.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub name: String,
    pub kind: ChildKind,
    pub verdict: ProbeVerdict,
    pub latency_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Reachability checks against child servers.
///
/// Proxy children are probed over HTTP. Module children need no network hop
/// and are connected only while mounted. Probe failures are classified, never
/// returned as errors.
pub struct HealthChecker {
    state: Arc<GatewayState>,
    http_client: Arc<dyn HttpClient>,
    settings: ProbeSettings,
    permits: Arc<Semaphore>,
}

impl HealthChecker {
    pub fn new(
        state: Arc<GatewayState>,
        http_client: Arc<dyn HttpClient>,
        settings: ProbeSettings,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent_probes.max(1)));
        Self {
            state,
            http_client,
            settings,
            permits,
        }
    }

    pub fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    /// Probe every registered child once.
    ///
    /// All proxy probes are started together (bounded by
    /// `max_concurrent_probes`) and the call returns once each has answered or
    /// timed out. Only connection status is recorded; request counters are
    /// left to real traffic and on-demand checks.
    pub async fn check_all(&self) -> Vec<ProbeReport> {
        let descriptors = self.state.descriptors();
        tracing::debug!("Running health checks on {} child servers", descriptors.len());

        let probes = descriptors.iter().map(|descriptor| async move {
            let report = self.probe(descriptor, self.settings.timeout).await;
            self.state
                .record_connection_status(&report.name, report.verdict.connection_status());
            report
        });
        let reports = join_all(probes).await;

        tracing::debug!("Health check cycle completed");
        reports
    }

    /// Synchronously probe one child and record the result as an observation.
    ///
    /// Returns `None` when no child is registered under `name`; nothing is
    /// recorded in that case.
    pub async fn check_child(&self, name: &str) -> Option<ProbeReport> {
        let descriptor = self.state.descriptor(name)?;
        let report = self
            .probe(&descriptor, self.settings.on_demand_timeout)
            .await;
        self.state
            .record_probe(&report.name, report.latency_ms, report.verdict);
        Some(report)
    }

    async fn probe(&self, descriptor: &ChildServerDescriptor, timeout_after: Duration) -> ProbeReport {
        let name = descriptor.name().to_string();
        let kind = descriptor.kind();

        let Some(url) =
            descriptor.health_url(&self.settings.default_path, &self.settings.rpc_path_suffix)
        else {
            // In-process children are reachable exactly when they are mounted.
            let (verdict, error) = match self.state.mount_state(&name) {
                Some(MountState::Mounted) => (ProbeVerdict::Connected, None),
                Some(MountState::Failed { reason }) => (ProbeVerdict::Disconnected, Some(reason)),
                Some(MountState::Pending) | None => (
                    ProbeVerdict::Disconnected,
                    Some("module is not mounted".to_string()),
                ),
            };
            return ProbeReport {
                name,
                kind,
                verdict,
                latency_ms: 0.0,
                response_code: None,
                error,
            };
        };

        // Closed only if the semaphore is dropped, which cannot happen while
        // `self` is alive.
        let _permit = self.permits.acquire().await.ok();

        let authorization = descriptor.auth().map(|auth| auth.header_value());
        let started = Instant::now();
        let result = timeout(
            timeout_after,
            self.http_client
                .health_check(&url, authorization.as_deref(), timeout_after),
        )
        .instrument(create_probe_span(&name, &url))
        .await
        .unwrap_or_else(|_| Err(HttpClientError::timeout(timeout_after)));
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        let (verdict, response_code, error) = match result {
            Ok(status) if status.as_u16() == 200 => (ProbeVerdict::Connected, Some(200), None),
            Ok(status) => {
                tracing::info!("Child server '{}' answered health check with {}", name, status);
                (ProbeVerdict::Unhealthy, Some(status.as_u16()), None)
            }
            Err(e) => {
                tracing::warn!("Health check failed for child server '{}': {}", name, e);
                (ProbeVerdict::Disconnected, None, Some(e.to_string()))
            }
        };

        ProbeReport {
            name,
            kind,
            verdict,
            latency_ms,
            response_code,
            error,
        }
    }

    /// Count of children by last known connection status.
    pub fn connection_summary(&self) -> (usize, usize) {
        let snapshot = self.state.snapshot();
        let connected = snapshot
            .children
            .iter()
            .filter(|c| {
                c.metrics
                    .as_ref()
                    .is_some_and(|m| m.connection_status == ConnectionStatus::Connected)
            })
            .count();
        (connected, snapshot.children.len() - connected)
    }
}
