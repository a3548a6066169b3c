//! Proxy children: requests under the child's prefix are forwarded to its
//! remote URL and every exchange is fed into the metrics recorder.
use std::{sync::Arc, time::Instant};

use axum::{
    Router,
    body::Body as AxumBody,
    extract::{Request, State},
    http::{HeaderValue, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use url::Url;

use crate::{
    core::{ChildServerDescriptor, GatewayState},
    metrics::ObservationOutcome,
    ports::{
        http_client::HttpClient,
        mountable::{MountError, Mountable},
    },
};

/// Headers that describe the inbound hop and must not be forwarded.
const HOP_BY_HOP: [header::HeaderName; 5] = [
    header::CONNECTION,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::UPGRADE,
];

#[derive(Clone)]
struct ProxyRoute {
    name: Arc<str>,
    target: Arc<str>,
    authorization: Option<HeaderValue>,
    client: Arc<dyn HttpClient>,
    state: Arc<GatewayState>,
}

/// A child reached over HTTP.
pub struct ProxyMount {
    route: ProxyRoute,
}

impl std::fmt::Debug for ProxyMount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyMount")
            .field("name", &self.route.name)
            .field("target", &self.route.target)
            .field("authorized", &self.route.authorization.is_some())
            .finish()
    }
}

impl ProxyMount {
    /// Bind a client to the descriptor's URL, resolving the bearer credential
    /// once, at mount time.
    pub fn new(
        descriptor: &ChildServerDescriptor,
        client: Arc<dyn HttpClient>,
        state: Arc<GatewayState>,
    ) -> Result<Self, MountError> {
        let Some(url) = descriptor.url() else {
            return Err(MountError::InvalidProxyTarget {
                url: String::new(),
                reason: format!("child '{}' is not a proxy", descriptor.name()),
            });
        };
        Url::parse(url).map_err(|e| MountError::InvalidProxyTarget {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let authorization = match descriptor.auth() {
            Some(auth) => {
                let mut value = HeaderValue::from_str(&auth.header_value())
                    .map_err(|_| MountError::InvalidCredential(descriptor.name().to_string()))?;
                value.set_sensitive(true);
                Some(value)
            }
            None => None,
        };

        Ok(Self {
            route: ProxyRoute {
                name: Arc::from(descriptor.name()),
                target: Arc::from(url.trim_end_matches('/')),
                authorization,
                client,
                state,
            },
        })
    }
}

impl Mountable for ProxyMount {
    fn attach(&self, prefix: &str) -> Result<Router, MountError> {
        let forwarder = Router::new()
            .fallback(forward)
            .with_state(self.route.clone());
        Ok(Router::new().nest_service(&format!("/{prefix}"), forwarder))
    }
}

/// Upstream URI for a request whose prefix has already been stripped.
fn upstream_uri(target: &str, remainder: &Uri) -> Result<Uri, axum::http::uri::InvalidUri> {
    let path = remainder.path();
    let mut uri = if path == "/" || path.is_empty() {
        target.to_string()
    } else {
        format!("{target}{path}")
    };
    if let Some(query) = remainder.query() {
        uri.push('?');
        uri.push_str(query);
    }
    uri.parse()
}

fn classify(status: StatusCode) -> ObservationOutcome {
    if status.is_server_error() {
        ObservationOutcome::Unhealthy
    } else {
        ObservationOutcome::Healthy
    }
}

async fn forward(State(route): State<ProxyRoute>, req: Request) -> Response {
    let started = Instant::now();
    let (mut parts, body) = req.into_parts();

    parts.uri = match upstream_uri(&route.target, &parts.uri) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::warn!("Cannot build upstream URI for '{}': {}", route.name, e);
            return (StatusCode::BAD_REQUEST, "Invalid request path").into_response();
        }
    };
    for name in HOP_BY_HOP {
        parts.headers.remove(name);
    }
    if let Some(value) = &route.authorization {
        parts.headers.insert(header::AUTHORIZATION, value.clone());
    }

    let result = route
        .client
        .send_request(Request::from_parts(parts, body))
        .await;
    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

    match result {
        Ok(response) => {
            route
                .state
                .record_observation(&route.name, latency_ms, classify(response.status()));
            response
        }
        Err(e) => {
            tracing::warn!("Proxy child '{}' unreachable: {}", route.name, e);
            route
                .state
                .record_observation(&route.name, latency_ms, ObservationOutcome::Error);
            Response::builder()
                .status(StatusCode::BAD_GATEWAY)
                .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
                .body(AxumBody::from(format!(
                    "Child server '{}' is unreachable",
                    route.name
                )))
                .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
        }
    }
}
