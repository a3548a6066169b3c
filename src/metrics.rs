//! Per-child metrics and the recorder that mutates them.
//!
//! The functions on [`GatewayState`] defined here are the only code paths that
//! create or change a [`ServerMetrics`] record or the global request / error
//! counters. Every observed interaction with a child (a forwarded request, a
//! module response, an on-demand health check) ends up in
//! [`GatewayState::record_observation`]; the periodic prober only updates the
//! connection status through [`GatewayState::record_connection_status`].
//!
//! Invariants kept here:
//! * `error_count <= request_count` for every record
//! * the global counters are the sums of what was observed
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::state::{GatewayState, StateInner};

/// Result of an interaction, as far as the recorder is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationOutcome {
    Healthy,
    Unhealthy,
    Error,
}

/// Last observed status of a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
    Error,
}

impl From<ObservationOutcome> for ServerStatus {
    fn from(outcome: ObservationOutcome) -> Self {
        match outcome {
            ObservationOutcome::Healthy => ServerStatus::Healthy,
            ObservationOutcome::Unhealthy => ServerStatus::Unhealthy,
            ObservationOutcome::Error => ServerStatus::Error,
        }
    }
}

/// Reachability of a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    NotChecked,
    Connected,
    Unhealthy,
    Failed,
    Disconnected,
}

impl From<ObservationOutcome> for ConnectionStatus {
    fn from(outcome: ObservationOutcome) -> Self {
        match outcome {
            ObservationOutcome::Healthy => ConnectionStatus::Connected,
            ObservationOutcome::Unhealthy => ConnectionStatus::Unhealthy,
            ObservationOutcome::Error => ConnectionStatus::Failed,
        }
    }
}

/// Classification of one reachability probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeVerdict {
    /// Health endpoint answered 200
    Connected,
    /// Health endpoint answered with any other status
    Unhealthy,
    /// Timeout or transport failure
    Disconnected,
}

impl ProbeVerdict {
    pub fn connection_status(self) -> ConnectionStatus {
        match self {
            ProbeVerdict::Connected => ConnectionStatus::Connected,
            ProbeVerdict::Unhealthy => ConnectionStatus::Unhealthy,
            ProbeVerdict::Disconnected => ConnectionStatus::Disconnected,
        }
    }

    pub fn outcome(self) -> ObservationOutcome {
        match self {
            ProbeVerdict::Connected => ObservationOutcome::Healthy,
            ProbeVerdict::Unhealthy => ObservationOutcome::Unhealthy,
            ProbeVerdict::Disconnected => ObservationOutcome::Error,
        }
    }
}

/// Aggregated metrics of one child.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct ServerMetrics {
    pub request_count: u64,
    pub error_count: u64,
    #[serde(rename = "total_latency_ms")]
    pub cumulative_latency_ms: f64,
    #[serde(rename = "last_check")]
    pub last_check_at: Option<DateTime<Utc>>,
    pub status: ServerStatus,
    pub connection_status: ConnectionStatus,
}

impl ServerMetrics {
    /// `cumulative_latency_ms / request_count`; `None` before the first request.
    pub fn average_latency_ms(&self) -> Option<f64> {
        if self.request_count == 0 {
            None
        } else {
            Some(self.cumulative_latency_ms / self.request_count as f64)
        }
    }
}

fn apply_observation<'a>(
    inner: &'a mut StateInner,
    name: &str,
    latency_ms: f64,
    outcome: ObservationOutcome,
) -> &'a mut ServerMetrics {
    inner.total_requests += 1;
    if outcome == ObservationOutcome::Error {
        inner.total_errors += 1;
    }

    let metrics = inner.metrics.entry(name.to_string()).or_default();
    metrics.request_count += 1;
    metrics.cumulative_latency_ms += latency_ms.max(0.0);
    metrics.last_check_at = Some(Utc::now());
    metrics.status = outcome.into();
    metrics.connection_status = outcome.into();
    if outcome == ObservationOutcome::Error {
        metrics.error_count += 1;
    }
    metrics
}

impl GatewayState {
    /// Record one observed interaction with `name`.
    ///
    /// Creates the record on first use, counts the request (per child and
    /// globally), accumulates latency and sets status / connection status from
    /// the outcome. `Error` outcomes also bump both error counters.
    pub fn record_observation(&self, name: &str, latency_ms: f64, outcome: ObservationOutcome) {
        self.with_inner(|inner| {
            apply_observation(inner, name, latency_ms, outcome);
        });
    }

    /// Record an on-demand probe as an observation.
    ///
    /// Same as [`record_observation`](Self::record_observation) with the
    /// verdict's outcome, except that a transport failure leaves the child
    /// `Disconnected` rather than `Failed`.
    pub fn record_probe(&self, name: &str, latency_ms: f64, verdict: ProbeVerdict) {
        self.with_inner(|inner| {
            let metrics = apply_observation(inner, name, latency_ms, verdict.outcome());
            metrics.connection_status = verdict.connection_status();
        });
    }

    /// Update reachability only, without counting a request.
    pub fn record_connection_status(&self, name: &str, status: ConnectionStatus) {
        self.with_inner(|inner| {
            let metrics = inner.metrics.entry(name.to_string()).or_default();
            metrics.connection_status = status;
            metrics.last_check_at = Some(Utc::now());
        });
    }
}
