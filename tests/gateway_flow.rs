use std::{io::Write, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Router,
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode},
    routing::{get, post},
};
use http_body_util::BodyExt;
use mountgate::{
    GatewayState, HealthChecker, HttpClientAdapter, ModuleCatalog, Registry,
    adapters::{ModuleDefinition, ProbeSettings},
    build_app,
    config::{GatewayConfig, load_config},
    ports::HttpClient,
};
use serde_json::Value;
use tempfile::NamedTempFile;
use tower::ServiceExt;

async fn spawn_backend(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

struct Gateway {
    app: Router,
    state: Arc<GatewayState>,
}

fn gateway(config: &GatewayConfig, catalog: ModuleCatalog) -> Gateway {
    let state = Arc::new(GatewayState::default());
    let client: Arc<dyn HttpClient> = Arc::new(HttpClientAdapter::new().unwrap());
    let registry = Registry::new(state.clone(), client.clone(), catalog, None);
    let (children, _report) = registry.mount_all(&config.child_servers);
    let checker = Arc::new(HealthChecker::new(
        state.clone(),
        client,
        ProbeSettings::from(&config.health_check),
    ));
    Gateway {
        app: build_app(config, state.clone(), checker, children),
        state,
    }
}

fn request(method: &str, uri: &str, body: Body, client: SocketAddr) -> Request<Body> {
    let mut req = Request::builder()
        .method(method)
        .uri(uri)
        .body(body)
        .unwrap();
    req.extensions_mut().insert(ConnectInfo(client));
    req
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_one_valid_proxy_and_one_nameless_entry() {
    let file = write_config(
        r#"{
  "child_servers": [
    { "type": "proxy", "prefix": "nameless", "url": "http://localhost:9/mcp" },
    { "name": "ado", "type": "proxy", "prefix": "ado", "url": "http://localhost:8002/mcp" }
  ]
}"#,
    );
    let config = load_config(file.path()).unwrap();
    let gw = gateway(&config, ModuleCatalog::new());

    assert_eq!(gw.state.child_count(), 1);
    assert!(gw.state.descriptor("ado").is_some());

    let response = gw
        .app
        .oneshot(request("GET", "/health", Body::empty(), "127.0.0.1:1".parse().unwrap()))
        .await
        .unwrap();
    let health = json_body(response).await;
    assert_eq!(health["child_servers"], 1);
    assert_eq!(health["mounted_children"], 1);
}

#[tokio::test]
async fn test_proxy_forwarding_updates_status_and_connections() {
    let backend = Router::new()
        .route("/mcp", post(|body: String| async move { format!("echo:{body}") }))
        .route("/health", get(|| async { "ok" }));
    let addr = spawn_backend(backend).await;

    let file = write_config(&format!(
        r#"{{
  "child_servers": [
    {{ "name": "ado", "type": "proxy", "prefix": "ado", "url": "http://{addr}/mcp" }},
    {{ "name": "info", "type": "module", "prefix": "gateway", "module_name": "gateway_info" }}
  ]
}}"#
    ));
    let config = load_config(file.path()).unwrap();
    let gw = gateway(&config, ModuleCatalog::with_builtin_modules());
    let client: SocketAddr = "10.1.2.3:40000".parse().unwrap();

    let response = gw
        .app
        .clone()
        .oneshot(request("POST", "/mcp/ado", Body::from("hello"), client))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"echo:hello");

    let response = gw
        .app
        .clone()
        .oneshot(request("GET", "/mcp/gateway/servers", Body::empty(), client))
        .await
        .unwrap();
    let servers = json_body(response).await;
    assert_eq!(servers.as_array().unwrap().len(), 2);

    let response = gw
        .app
        .clone()
        .oneshot(request("GET", "/health/ado", Body::empty(), client))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let health = json_body(response).await;
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["response_code"], 200);

    let response = gw
        .app
        .clone()
        .oneshot(request("GET", "/status", Body::empty(), client))
        .await
        .unwrap();
    let status = json_body(response).await;
    let connections = status["gateway"]["active_connections"].as_array().unwrap();
    // Only ingress requests are tracked.
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0]["client_address"], "10.1.2.3:40000");
    assert_eq!(connections[0]["requests"], 2);

    let ado = &status["servers"][0];
    assert_eq!(ado["name"], "ado");
    assert_eq!(ado["mount"]["state"], "mounted");
    // One forwarded request plus one on-demand health check.
    assert_eq!(ado["metrics"]["request_count"], 2);
    assert_eq!(ado["metrics"]["connection_status"], "connected");

    let response = gw
        .app
        .oneshot(request("GET", "/metrics", Body::empty(), client))
        .await
        .unwrap();
    let metrics = json_body(response).await;
    assert_eq!(metrics["gateway_metrics"]["total_errors"], 0);
    assert_eq!(metrics["gateway_metrics"]["error_rate"], 0.0);
    assert_eq!(metrics["server_metrics"]["info"]["request_count"], 1);
}

#[tokio::test]
async fn test_unmountable_module_is_reported_not_fatal() {
    let file = write_config(
        r#"{
  "child_servers": [
    { "name": "wiki", "type": "module", "prefix": "wiki", "module_path": "/definitely/not/here" },
    { "name": "docs", "type": "module", "prefix": "docs" }
  ]
}"#,
    );
    let config = load_config(file.path()).unwrap();

    let mut catalog = ModuleCatalog::new();
    catalog.register(
        "mcp_server",
        ModuleDefinition::new().with_handle("mcp", Router::new().route("/ping", get(|| async { "pong" }))),
    );
    let gw = gateway(&config, catalog);
    let client: SocketAddr = "127.0.0.1:5000".parse().unwrap();

    let response = gw
        .app
        .clone()
        .oneshot(request("GET", "/mcp/docs/ping", Body::empty(), client))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = gw
        .app
        .clone()
        .oneshot(request("GET", "/mcp/wiki/ping", Body::empty(), client))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = gw
        .app
        .clone()
        .oneshot(request("GET", "/health/wiki", Body::empty(), client))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let health = json_body(response).await;
    assert_eq!(health["connection_status"], "disconnected");
    assert!(health["error"].as_str().unwrap().contains("/definitely/not/here"));

    let response = gw
        .app
        .oneshot(request("GET", "/status", Body::empty(), client))
        .await
        .unwrap();
    let status = json_body(response).await;
    assert_eq!(status["servers"][0]["name"], "wiki");
    assert_eq!(status["servers"][0]["mount"]["state"], "failed");
    assert!(status["servers"][0]["mount"]["reason"].is_string());
    assert_eq!(status["servers"][1]["mount"]["state"], "mounted");
}

#[tokio::test]
async fn test_unknown_prefix_under_ingress_is_still_tracked() {
    let config = GatewayConfig::default();
    let gw = gateway(&config, ModuleCatalog::new());
    let client: SocketAddr = "10.9.8.7:1234".parse().unwrap();

    let response = gw
        .app
        .clone()
        .oneshot(request("GET", "/mcp/nobody-mounted-here", Body::empty(), client))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Outside the ingress path, even when sharing its leading characters.
    let response = gw
        .app
        .clone()
        .oneshot(request("POST", "/mcpx", Body::empty(), client))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let live = gw.state.active_connections();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].client_address, "10.9.8.7:1234");
    assert_eq!(live[0].request_count, 1);
    // No child saw the request.
    assert_eq!(gw.state.totals(), (0, 0));
}

#[tokio::test]
async fn test_missing_configuration_serves_empty_gateway() {
    let (config, issue) = mountgate::config::load_config_or_default("/no/such/gateway.json");
    assert!(issue.is_some());
    let gw = gateway(&config, ModuleCatalog::with_builtin_modules());

    let response = gw
        .app
        .clone()
        .oneshot(request("GET", "/", Body::empty(), "127.0.0.1:1".parse().unwrap()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = gw
        .app
        .oneshot(request(
            "GET",
            "/health/anything",
            Body::empty(),
            "127.0.0.1:1".parse().unwrap(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(gw.state.totals(), (0, 0));
}

#[tokio::test]
async fn test_cors_preflight_on_ingress() {
    let config = GatewayConfig::default();
    let gw = gateway(&config, ModuleCatalog::new());

    let response = gw
        .app
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/health")
                .header("origin", "http://localhost:6274")
                .header("access-control-request-method", "POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(response.status().is_success());
    assert_eq!(
        response.headers().get("access-control-allow-origin").unwrap(),
        "*"
    );
}

#[tokio::test]
async fn test_served_over_tcp_with_connect_info() {
    let config = GatewayConfig::default();
    let gw = gateway(&config, ModuleCatalog::new());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = gw.app.clone();
    tokio::spawn(async move {
        let _ = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await;
    });

    let client = HttpClientAdapter::new().unwrap();
    let status = client
        .health_check(&format!("http://{addr}/health"), None, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::OK);
}
