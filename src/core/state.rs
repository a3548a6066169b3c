//! Shared gateway state.
//!
//! [`GatewayState`] is the single aggregate shared by request handlers, the
//! prober worker and the status API. Everything lives behind one mutex so that
//! counters, maps and derived snapshots always agree with each other; the lock
//! is never held across an `.await`.
//!
//! Metric mutation goes exclusively through the recorder in
//! [`crate::metrics`]; this module owns registration, mount outcomes,
//! connection bookkeeping and read snapshots.
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::{
    config::{ConnectionConfig, ValidationError, ValidationResult},
    core::descriptor::ChildServerDescriptor,
    metrics::ServerMetrics,
};

/// Bounds on connection bookkeeping.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    pub idle_timeout: Duration,
    pub max_tracked: usize,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self::from(&ConnectionConfig::default())
    }
}

impl From<&ConnectionConfig> for ConnectionLimits {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
            max_tracked: config.max_tracked.max(1),
        }
    }
}

/// A client seen on the ingress path.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveConnection {
    pub client_address: String,
    pub connected_at: DateTime<Utc>,
    #[serde(rename = "last_seen")]
    pub last_seen_at: DateTime<Utc>,
    #[serde(rename = "requests")]
    pub request_count: u64,
    #[serde(skip)]
    last_seen: Instant,
}

impl ActiveConnection {
    fn new(client_address: &str, now: Instant) -> Self {
        let wall = Utc::now();
        Self {
            client_address: client_address.to_string(),
            connected_at: wall,
            last_seen_at: wall,
            request_count: 0,
            last_seen: now,
        }
    }

    fn seen(&mut self, now: Instant) {
        self.last_seen = now;
        self.last_seen_at = Utc::now();
    }

    /// Time since the client was last seen, as of `now`.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }
}

/// Outcome of attaching a child into the routing namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MountState {
    Pending,
    Mounted,
    Failed { reason: String },
}

impl MountState {
    pub fn is_mounted(&self) -> bool {
        matches!(self, MountState::Mounted)
    }
}

#[derive(Debug, Default)]
pub(crate) struct StateInner {
    pub(crate) descriptors: Vec<Arc<ChildServerDescriptor>>,
    pub(crate) mounts: HashMap<String, MountState>,
    pub(crate) metrics: HashMap<String, ServerMetrics>,
    pub(crate) connections: HashMap<String, ActiveConnection>,
    pub(crate) total_requests: u64,
    pub(crate) total_errors: u64,
}

impl StateInner {
    fn prune_idle(&mut self, now: Instant, idle_timeout: Duration) {
        self.connections
            .retain(|_, conn| conn.idle_for(now) <= idle_timeout);
    }
}

/// One child as seen by a snapshot.
#[derive(Debug, Clone)]
pub struct ChildSnapshot {
    pub descriptor: Arc<ChildServerDescriptor>,
    pub mount: MountState,
    pub metrics: Option<ServerMetrics>,
}

/// Point-in-time copy of the whole aggregate, taken under a single lock.
#[derive(Debug, Clone)]
pub struct GatewaySnapshot {
    pub started_at: DateTime<Utc>,
    pub uptime: Duration,
    pub total_requests: u64,
    pub total_errors: u64,
    pub children: Vec<ChildSnapshot>,
    pub metrics: BTreeMap<String, ServerMetrics>,
    pub connections: Vec<ActiveConnection>,
}

impl GatewaySnapshot {
    /// `errors / requests`, or 0 when nothing has been recorded yet.
    pub fn error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_errors as f64 / self.total_requests as f64
        }
    }

    pub fn mounted_count(&self) -> usize {
        self.children.iter().filter(|c| c.mount.is_mounted()).count()
    }
}

/// Process-wide gateway aggregate. Create one at startup and share it via `Arc`.
#[derive(Debug)]
pub struct GatewayState {
    started_at: DateTime<Utc>,
    started: Instant,
    limits: ConnectionLimits,
    inner: Mutex<StateInner>,
}

impl Default for GatewayState {
    fn default() -> Self {
        Self::new(ConnectionLimits::default())
    }
}

impl GatewayState {
    pub fn new(limits: ConnectionLimits) -> Self {
        Self {
            started_at: Utc::now(),
            started: Instant::now(),
            limits,
            inner: Mutex::new(StateInner::default()),
        }
    }

    pub(crate) fn with_inner<R>(&self, f: impl FnOnce(&mut StateInner) -> R) -> R {
        let mut inner = self.inner.lock();
        f(&mut inner)
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn connection_limits(&self) -> ConnectionLimits {
        self.limits
    }

    /// Record a descriptor. Fails when its name or prefix is already taken.
    pub fn register(
        &self,
        descriptor: ChildServerDescriptor,
    ) -> ValidationResult<Arc<ChildServerDescriptor>> {
        self.with_inner(|inner| {
            if inner
                .descriptors
                .iter()
                .any(|d| d.name() == descriptor.name())
            {
                return Err(ValidationError::Duplicate {
                    field: "name",
                    value: descriptor.name().to_string(),
                });
            }
            if inner
                .descriptors
                .iter()
                .any(|d| d.prefix() == descriptor.prefix())
            {
                return Err(ValidationError::Duplicate {
                    field: "prefix",
                    value: descriptor.prefix().to_string(),
                });
            }

            let descriptor = Arc::new(descriptor);
            inner
                .mounts
                .insert(descriptor.name().to_string(), MountState::Pending);
            inner.descriptors.push(descriptor.clone());
            Ok(descriptor)
        })
    }

    pub fn set_mount_state(&self, name: &str, mount: MountState) {
        self.with_inner(|inner| {
            if let Some(slot) = inner.mounts.get_mut(name) {
                *slot = mount;
            }
        });
    }

    pub fn mount_state(&self, name: &str) -> Option<MountState> {
        self.with_inner(|inner| inner.mounts.get(name).cloned())
    }

    pub fn descriptor(&self, name: &str) -> Option<Arc<ChildServerDescriptor>> {
        self.with_inner(|inner| inner.descriptors.iter().find(|d| d.name() == name).cloned())
    }

    /// All registered descriptors in configuration order.
    pub fn descriptors(&self) -> Vec<Arc<ChildServerDescriptor>> {
        self.with_inner(|inner| inner.descriptors.clone())
    }

    pub fn child_count(&self) -> usize {
        self.with_inner(|inner| inner.descriptors.len())
    }

    pub fn metrics_for(&self, name: &str) -> Option<ServerMetrics> {
        self.with_inner(|inner| inner.metrics.get(name).cloned())
    }

    /// `(total_requests, total_errors)`
    pub fn totals(&self) -> (u64, u64) {
        self.with_inner(|inner| (inner.total_requests, inner.total_errors))
    }

    /// Note a request from `client_address` on the ingress path.
    ///
    /// Returns `false` when the address is new and the tracking table is full
    /// even after dropping idle entries; the request itself is unaffected.
    pub fn touch_connection(&self, client_address: &str) -> bool {
        self.touch_connection_at(client_address, Instant::now())
    }

    pub fn touch_connection_at(&self, client_address: &str, now: Instant) -> bool {
        let limits = self.limits;
        self.with_inner(|inner| {
            if !inner.connections.contains_key(client_address) {
                if inner.connections.len() >= limits.max_tracked {
                    inner.prune_idle(now, limits.idle_timeout);
                }
                if inner.connections.len() >= limits.max_tracked {
                    return false;
                }
            }

            let conn = inner
                .connections
                .entry(client_address.to_string())
                .or_insert_with(|| ActiveConnection::new(client_address, now));
            conn.request_count += 1;
            conn.seen(now);
            true
        })
    }

    /// Refresh `last_seen` of an already tracked client.
    pub fn refresh_connection(&self, client_address: &str) {
        self.refresh_connection_at(client_address, Instant::now())
    }

    pub fn refresh_connection_at(&self, client_address: &str, now: Instant) {
        self.with_inner(|inner| {
            if let Some(conn) = inner.connections.get_mut(client_address) {
                conn.seen(now);
            }
        })
    }

    /// Enumerate live connections, dropping those idle past the threshold.
    pub fn active_connections(&self) -> Vec<ActiveConnection> {
        self.active_connections_at(Instant::now())
    }

    pub fn active_connections_at(&self, now: Instant) -> Vec<ActiveConnection> {
        let idle_timeout = self.limits.idle_timeout;
        self.with_inner(|inner| {
            inner.prune_idle(now, idle_timeout);
            Self::sorted_connections(inner)
        })
    }

    fn sorted_connections(inner: &StateInner) -> Vec<ActiveConnection> {
        let mut connections: Vec<_> = inner.connections.values().cloned().collect();
        connections.sort_by(|a, b| a.client_address.cmp(&b.client_address));
        connections
    }

    /// Consistent copy of descriptors, metrics, counters and live connections.
    pub fn snapshot(&self) -> GatewaySnapshot {
        let now = Instant::now();
        let idle_timeout = self.limits.idle_timeout;
        let uptime = self.uptime();
        self.with_inner(|inner| {
            inner.prune_idle(now, idle_timeout);
            let children = inner
                .descriptors
                .iter()
                .map(|d| ChildSnapshot {
                    descriptor: d.clone(),
                    mount: inner
                        .mounts
                        .get(d.name())
                        .cloned()
                        .unwrap_or(MountState::Pending),
                    metrics: inner.metrics.get(d.name()).cloned(),
                })
                .collect();

            GatewaySnapshot {
                started_at: self.started_at,
                uptime,
                total_requests: inner.total_requests,
                total_errors: inner.total_errors,
                children,
                metrics: inner
                    .metrics
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                connections: Self::sorted_connections(inner),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_rejects_duplicates() {
        let state = GatewayState::default();
        state
            .register(ChildServerDescriptor::proxy("ado", "ado", "http://a/mcp"))
            .unwrap();

        let err = state
            .register(ChildServerDescriptor::proxy("ado", "other", "http://b/mcp"))
            .unwrap_err();
        assert!(matches!(err, ValidationError::Duplicate { field: "name", .. }));

        let err = state
            .register(ChildServerDescriptor::proxy("docs", "ado", "http://b/mcp"))
            .unwrap_err();
        assert!(matches!(err, ValidationError::Duplicate { field: "prefix", .. }));

        assert_eq!(state.child_count(), 1);
        assert_eq!(state.mount_state("ado"), Some(MountState::Pending));
    }

    #[test]
    fn test_mount_state_is_tracked() {
        let state = GatewayState::default();
        state
            .register(ChildServerDescriptor::proxy("ado", "ado", "http://a/mcp"))
            .unwrap();
        state.set_mount_state(
            "ado",
            MountState::Failed {
                reason: "boom".to_string(),
            },
        );
        let snapshot = state.snapshot();
        assert_eq!(snapshot.children.len(), 1);
        assert_eq!(snapshot.mounted_count(), 0);

        state.set_mount_state("ado", MountState::Mounted);
        assert_eq!(state.snapshot().mounted_count(), 1);
    }

    #[test]
    fn test_idle_connections_are_pruned_on_enumeration() {
        let state = GatewayState::default();
        let base = Instant::now();

        state.touch_connection_at("10.0.0.1:5000", base);
        state.touch_connection_at("10.0.0.2:5000", base + Duration::from_secs(21));

        // 31s after the first client, 10s after the second.
        let now = base + Duration::from_secs(31);
        let live = state.active_connections_at(now);
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].client_address, "10.0.0.2:5000");
    }

    #[test]
    fn test_touch_counts_requests_and_keeps_connected_at() {
        let state = GatewayState::default();
        let base = Instant::now();

        state.touch_connection_at("10.0.0.1:5000", base);
        let first = state.active_connections_at(base)[0].connected_at;
        state.touch_connection_at("10.0.0.1:5000", base + Duration::from_secs(5));
        state.refresh_connection_at("10.0.0.1:5000", base + Duration::from_secs(6));

        let live = state.active_connections_at(base + Duration::from_secs(6));
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].request_count, 2);
        assert_eq!(live[0].connected_at, first);
        assert_eq!(live[0].idle_for(base + Duration::from_secs(6)), Duration::ZERO);
    }

    #[test]
    fn test_tracking_cap_never_evicts_live_connections() {
        let state = GatewayState::new(ConnectionLimits {
            idle_timeout: Duration::from_secs(30),
            max_tracked: 2,
        });
        let base = Instant::now();

        assert!(state.touch_connection_at("a", base));
        assert!(state.touch_connection_at("b", base));
        // Both still live: the newcomer is not tracked.
        assert!(!state.touch_connection_at("c", base + Duration::from_secs(1)));
        // Known clients keep being tracked at the cap.
        assert!(state.touch_connection_at("a", base + Duration::from_secs(1)));

        // Once "b" goes idle its slot is reclaimed.
        assert!(state.touch_connection_at("c", base + Duration::from_secs(40)));
        let live = state.active_connections_at(base + Duration::from_secs(40));
        let addrs: Vec<_> = live.iter().map(|c| c.client_address.as_str()).collect();
        assert_eq!(addrs, vec!["c"]);
    }
}
