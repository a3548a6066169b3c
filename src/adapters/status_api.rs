//! Read-only status endpoints over [`GatewayState`] snapshots.
//!
//! `GET /health/{name}` is the one endpoint with a side effect: it probes the
//! child synchronously and records the result.
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::{
    adapters::health_checker::HealthChecker,
    core::GatewayState,
    metrics::{ProbeVerdict, ServerMetrics, ServerStatus},
};

/// Fixed liveness text served at `/`.
pub const LIVENESS_TEXT: &str = "mountgate is running. Use /health for status.";

#[derive(Clone)]
struct StatusApi {
    state: Arc<GatewayState>,
    checker: Arc<HealthChecker>,
}

#[derive(Debug, Error)]
pub enum StatusApiError {
    #[error("Server '{0}' not found")]
    UnknownServer(String),
}

impl IntoResponse for StatusApiError {
    fn into_response(self) -> Response {
        let status = match self {
            StatusApiError::UnknownServer(_) => StatusCode::NOT_FOUND,
        };
        (
            status,
            Json(json!({
                "error": self.to_string(),
                "timestamp": timestamp(),
            })),
        )
            .into_response()
    }
}

pub fn status_router(state: Arc<GatewayState>, checker: Arc<HealthChecker>) -> Router {
    Router::new()
        .route("/", get(liveness))
        .route("/health", get(aggregate_health))
        .route("/health/{name}", get(child_health))
        .route("/status", get(aggregate_status))
        .route("/metrics", get(aggregate_metrics))
        .with_state(StatusApi { state, checker })
}

fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

async fn liveness() -> &'static str {
    LIVENESS_TEXT
}

async fn aggregate_health(State(api): State<StatusApi>) -> Json<Value> {
    let snapshot = api.state.snapshot();
    Json(json!({
        "status": "healthy",
        "gateway": "mountgate",
        "uptime_seconds": snapshot.uptime.as_secs_f64(),
        "total_requests": snapshot.total_requests,
        "total_errors": snapshot.total_errors,
        "child_servers": snapshot.children.len(),
        "mounted_children": snapshot.mounted_count(),
        "timestamp": timestamp(),
    }))
}

async fn child_health(
    State(api): State<StatusApi>,
    Path(name): Path<String>,
) -> Result<Response, StatusApiError> {
    let report = api
        .checker
        .check_child(&name)
        .await
        .ok_or(StatusApiError::UnknownServer(name))?;

    let status = match report.verdict {
        ProbeVerdict::Connected => ServerStatus::Healthy,
        ProbeVerdict::Unhealthy => ServerStatus::Unhealthy,
        ProbeVerdict::Disconnected => ServerStatus::Error,
    };
    let mut body = json!({
        "server": report.name,
        "type": report.kind,
        "status": status,
        "connection_status": report.verdict.connection_status(),
        "latency_ms": round2(report.latency_ms),
        "timestamp": timestamp(),
    });
    if let Some(code) = report.response_code {
        body["response_code"] = json!(code);
    }
    if let Some(error) = &report.error {
        body["error"] = json!(error);
    }

    let code = if report.verdict == ProbeVerdict::Disconnected {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    Ok((code, Json(body)).into_response())
}

fn metrics_json(metrics: &ServerMetrics) -> Value {
    let mut value = serde_json::to_value(metrics).unwrap_or_else(|_| Value::Object(Map::new()));
    if let (Some(avg), Value::Object(map)) = (metrics.average_latency_ms(), &mut value) {
        map.insert("average_latency_ms".to_string(), json!(round2(avg)));
    }
    value
}

async fn aggregate_status(State(api): State<StatusApi>) -> Json<Value> {
    let snapshot = api.state.snapshot();
    let servers: Vec<Value> = snapshot
        .children
        .iter()
        .map(|child| {
            let d = &child.descriptor;
            json!({
                "name": d.name(),
                "type": d.kind(),
                "prefix": d.prefix(),
                "url": d.url().unwrap_or(""),
                "mount": child.mount,
                "metrics": child
                    .metrics
                    .as_ref()
                    .map(metrics_json)
                    .unwrap_or_else(|| Value::Object(Map::new())),
            })
        })
        .collect();

    Json(json!({
        "gateway": {
            "status": "running",
            "started_at": snapshot.started_at.to_rfc3339(),
            "uptime_seconds": snapshot.uptime.as_secs_f64(),
            "total_requests": snapshot.total_requests,
            "total_errors": snapshot.total_errors,
            "active_connections": snapshot.connections,
        },
        "servers": servers,
        "timestamp": timestamp(),
    }))
}

async fn aggregate_metrics(State(api): State<StatusApi>) -> Json<Value> {
    let snapshot = api.state.snapshot();
    let server_metrics: Map<String, Value> = snapshot
        .metrics
        .iter()
        .map(|(name, metrics)| (name.clone(), metrics_json(metrics)))
        .collect();

    Json(json!({
        "gateway_metrics": {
            "uptime_seconds": snapshot.uptime.as_secs_f64(),
            "total_requests": snapshot.total_requests,
            "total_errors": snapshot.total_errors,
            "error_rate": snapshot.error_rate(),
        },
        "server_metrics": server_metrics,
        "timestamp": timestamp(),
    }))
}
