//! Active-connection bookkeeping for the ingress path.
//!
//! The tracker is one observer in the request pipeline: on the way in it
//! notes the client (first sight creates the record, later requests bump its
//! count), on the way out it refreshes `last_seen`. Idle records are pruned
//! lazily by [`GatewayState`] when the set is next enumerated.
use std::{sync::Arc, time::Duration};

use axum::http::StatusCode;

use crate::{
    adapters::middleware::{RequestInfo, RequestObserver},
    core::GatewayState,
};

pub struct ConnectionTracker {
    state: Arc<GatewayState>,
    ingress_path: String,
}

impl ConnectionTracker {
    pub fn new(state: Arc<GatewayState>, ingress_path: impl Into<String>) -> Self {
        Self {
            state,
            ingress_path: ingress_path.into(),
        }
    }

    /// Whether `path` is the ingress path or below it.
    pub fn is_ingress(&self, path: &str) -> bool {
        path.strip_prefix(self.ingress_path.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }
}

impl RequestObserver for ConnectionTracker {
    fn name(&self) -> &'static str {
        "connection_tracker"
    }

    fn on_request(&self, info: &RequestInfo) -> eyre::Result<()> {
        if self.is_ingress(&info.path) && !self.state.touch_connection(&info.client_address) {
            tracing::debug!(
                "Connection table full, not tracking {}",
                info.client_address
            );
        }
        Ok(())
    }

    fn on_response(
        &self,
        info: &RequestInfo,
        _status: StatusCode,
        _elapsed: Duration,
    ) -> eyre::Result<()> {
        if self.is_ingress(&info.path) {
            self.state.refresh_connection(&info.client_address);
        }
        Ok(())
    }
}
