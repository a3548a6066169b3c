//! Request observation middleware.
//!
//! Every inbound request passes through one [`observe_requests`] layer which
//! drives an ordered [`ObserverPipeline`]: each observer is told about the
//! request before it is forwarded and about the response afterwards. Observers
//! are narrow (logging, connection tracking) and their failures, including
//! panics, are contained here so they never reach the response path.
use std::{
    net::SocketAddr,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderName, Method, StatusCode},
    middleware::Next,
    response::Response,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::Instrument;

use crate::tracing_setup::create_request_span;

/// What observers know about an in-flight request.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: Method,
    pub path: String,
    /// `ip:port` of the peer, or `unknown`
    pub client_address: String,
    pub started: Instant,
}

/// One step of the observation pipeline.
pub trait RequestObserver: Send + Sync {
    fn name(&self) -> &'static str;

    fn on_request(&self, info: &RequestInfo) -> eyre::Result<()>;

    fn on_response(
        &self,
        info: &RequestInfo,
        status: StatusCode,
        elapsed: Duration,
    ) -> eyre::Result<()>;
}

/// Ordered set of observers run around request forwarding.
#[derive(Default, Clone)]
pub struct ObserverPipeline {
    observers: Vec<Arc<dyn RequestObserver>>,
}

impl ObserverPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an observer; observers run in insertion order.
    pub fn with(mut self, observer: impl RequestObserver + 'static) -> Self {
        self.observers.push(Arc::new(observer));
        self
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn notify_request(&self, info: &RequestInfo) {
        for observer in &self.observers {
            contain(observer.name(), || observer.on_request(info));
        }
    }

    pub fn notify_response(&self, info: &RequestInfo, status: StatusCode, elapsed: Duration) {
        for observer in &self.observers {
            contain(observer.name(), || observer.on_response(info, status, elapsed));
        }
    }
}

fn contain(name: &str, f: impl FnOnce() -> eyre::Result<()>) {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!("Request observer '{}' failed: {:#}", name, e),
        Err(_) => tracing::warn!("Request observer '{}' panicked", name),
    }
}

/// Logs every request and its outcome.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestLogger;

impl RequestObserver for RequestLogger {
    fn name(&self) -> &'static str {
        "request_logger"
    }

    fn on_request(&self, info: &RequestInfo) -> eyre::Result<()> {
        tracing::info!("[{}] {} from {}", info.method, info.path, info.client_address);
        Ok(())
    }

    fn on_response(
        &self,
        info: &RequestInfo,
        status: StatusCode,
        elapsed: Duration,
    ) -> eyre::Result<()> {
        tracing::info!(
            "[{}] {} -> {} ({:.2}ms)",
            info.method,
            info.path,
            status.as_u16(),
            elapsed.as_secs_f64() * 1000.0
        );
        Ok(())
    }
}

/// Axum middleware running the pipeline; attach with
/// `axum::middleware::from_fn_with_state`.
pub async fn observe_requests(
    State(pipeline): State<Arc<ObserverPipeline>>,
    req: Request,
    next: Next,
) -> Response {
    let client_address = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let info = RequestInfo {
        method: req.method().clone(),
        path: req.uri().path().to_string(),
        client_address,
        started: Instant::now(),
    };

    let span = create_request_span(info.method.as_str(), &info.path, &info.client_address);
    pipeline.notify_request(&info);

    let response = next.run(req).instrument(span.clone()).await;

    let elapsed = info.started.elapsed();
    span.record("http.status_code", response.status().as_u16());
    span.record("duration_ms", elapsed.as_secs_f64() * 1000.0);
    pipeline.notify_response(&info, response.status(), elapsed);

    response
}

/// Permissive CORS: any origin and header, the methods RPC clients use, and
/// the session header exposed to browsers.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static("mcp-session-id")])
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::{Router, body::Body, middleware, routing::get};
    use tower::ServiceExt; // for oneshot

    use super::*;

    #[derive(Default)]
    struct Counting {
        requests: AtomicUsize,
        responses: AtomicUsize,
    }

    struct Shared(Arc<Counting>);

    impl RequestObserver for Shared {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn on_request(&self, _info: &RequestInfo) -> eyre::Result<()> {
            self.0.requests.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn on_response(
            &self,
            _info: &RequestInfo,
            status: StatusCode,
            _elapsed: Duration,
        ) -> eyre::Result<()> {
            assert_eq!(status, StatusCode::OK);
            self.0.responses.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    impl RequestObserver for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn on_request(&self, _info: &RequestInfo) -> eyre::Result<()> {
            Err(eyre::eyre!("bookkeeping unavailable"))
        }

        fn on_response(
            &self,
            _info: &RequestInfo,
            _status: StatusCode,
            _elapsed: Duration,
        ) -> eyre::Result<()> {
            panic!("observer bug");
        }
    }

    fn app(pipeline: ObserverPipeline) -> Router {
        Router::new()
            .route("/", get(|| async { "hello" }))
            .layer(middleware::from_fn_with_state(
                Arc::new(pipeline),
                observe_requests,
            ))
    }

    #[tokio::test]
    async fn test_observers_see_request_and_response() {
        let counting = Arc::new(Counting::default());
        let pipeline = ObserverPipeline::new()
            .with(RequestLogger)
            .with(Shared(counting.clone()));
        assert_eq!(pipeline.len(), 2);

        let response = app(pipeline)
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(counting.requests.load(Ordering::SeqCst), 1);
        assert_eq!(counting.responses.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_observer_failures_do_not_affect_response() {
        let counting = Arc::new(Counting::default());
        let pipeline = ObserverPipeline::new()
            .with(Failing)
            .with(Shared(counting.clone()));

        let response = app(pipeline)
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        // Later observers still run.
        assert_eq!(counting.responses.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cors_layer_exposes_session_header() {
        let app = Router::new()
            .route("/", get(|| async { "hello" }))
            .layer(cors_layer());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("origin", "http://localhost:6274")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let headers = response.headers();
        assert_eq!(headers.get("access-control-allow-origin").unwrap(), "*");
        assert_eq!(
            headers.get("access-control-expose-headers").unwrap(),
            "mcp-session-id"
        );
    }
}
