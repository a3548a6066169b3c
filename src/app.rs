//! Assembly of the HTTP surface: status endpoints, mounted children under the
//! ingress path, the observer pipeline and CORS.
use std::sync::Arc;

use axum::{Router, middleware};

use crate::{
    adapters::{
        health_checker::HealthChecker,
        middleware::{ObserverPipeline, RequestLogger, cors_layer, observe_requests},
        status_api::status_router,
    },
    config::GatewayConfig,
    core::GatewayState,
    utils::ConnectionTracker,
};

/// Observers run around every request: log, then track.
pub fn default_pipeline(state: Arc<GatewayState>, ingress_path: &str) -> ObserverPipeline {
    ObserverPipeline::new()
        .with(RequestLogger)
        .with(ConnectionTracker::new(state, ingress_path))
}

pub fn build_app(
    config: &GatewayConfig,
    state: Arc<GatewayState>,
    checker: Arc<HealthChecker>,
    children: Router,
) -> Router {
    let pipeline = Arc::new(default_pipeline(state.clone(), &config.ingress_path));

    let app = status_router(state, checker)
        .nest(&config.ingress_path, children)
        .layer(middleware::from_fn_with_state(pipeline, observe_requests));

    if config.cors.enabled {
        app.layer(cors_layer())
    } else {
        app
    }
}
