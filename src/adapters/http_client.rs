use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use eyre::Result;
use http_body_util::BodyExt;
use hyper::{Request, Response, StatusCode, Version, header, header::HeaderValue};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;
use tokio::time::timeout;

use crate::ports::http_client::{HttpClient, HttpClientError, HttpClientResult};

const USER_AGENT: &str = concat!("mountgate/", env!("CARGO_PKG_VERSION"));

/// HTTP client adapter using Hyper with Rustls.
///
/// Responsibilities:
/// * Forwards requests to proxy children, passing bodies through as streams
/// * Sets `Host` and a default `User-Agent`
/// * Performs GET based health checks bounded by a timeout
pub struct HttpClientAdapter {
    client: Client<HttpsConnector<HttpConnector>, AxumBody>,
}

impl HttpClientAdapter {
    /// Create a new HTTP client adapter.
    pub fn new() -> Result<Self> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false); // Allow HTTPS URLs

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();

        if !native_certs.certs.is_empty() {
            for cert in native_certs.certs {
                if root_cert_store.add(cert).is_err() {
                    tracing::warn!("Failed to add native certificate to rustls RootCertStore");
                }
            }
            tracing::debug!("Loaded {} native root certificates.", root_cert_store.len());
        }

        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new()).build::<_, AxumBody>(https_connector);

        tracing::debug!("Created HTTP client for child servers");
        Ok(Self { client })
    }

    /// Set `Host` from the URI and a default `User-Agent` if absent.
    fn prepare_headers(req: &mut Request<AxumBody>) -> HttpClientResult<()> {
        let Some(host_str) = req.uri().host() else {
            return Err(HttpClientError::InvalidRequest(format!(
                "Outgoing URI has no host: {}",
                req.uri()
            )));
        };
        let host = match req.uri().port() {
            Some(port) => format!("{host_str}:{}", port.as_u16()),
            None => host_str.to_string(),
        };
        let host = HeaderValue::from_str(&host)
            .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;

        let headers = req.headers_mut();
        headers.insert(header::HOST, host);
        if !headers.contains_key(header::USER_AGENT) {
            headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
        }
        Ok(())
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(
        &self,
        mut req: Request<AxumBody>,
    ) -> HttpClientResult<Response<AxumBody>> {
        Self::prepare_headers(&mut req)?;

        let (mut parts, body) = req.into_parts();
        parts.version = Version::HTTP_11;
        let method = parts.method.clone();
        let uri = parts.uri.clone();

        tracing::debug!("Forwarding {} {}", method, uri);

        match self.client.request(Request::from_parts(parts, body)).await {
            Ok(response) => {
                let (mut parts, hyper_body) = response.into_parts();
                // The body is re-framed by the serving side.
                parts.headers.remove(header::TRANSFER_ENCODING);
                Ok(Response::from_parts(parts, AxumBody::new(hyper_body)))
            }
            Err(e) => {
                tracing::warn!("Error forwarding {} {}: {}", method, uri, e);
                Err(HttpClientError::ConnectionError(format!(
                    "Request to {method} {uri} failed: {e}"
                )))
            }
        }
    }

    async fn health_check(
        &self,
        url: &str,
        authorization: Option<&str>,
        timeout_after: Duration,
    ) -> HttpClientResult<StatusCode> {
        let mut builder = Request::builder()
            .method("GET")
            .uri(url)
            .version(Version::HTTP_11)
            .header(header::USER_AGENT, USER_AGENT);
        if let Some(value) = authorization {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        let request = builder
            .body(AxumBody::empty())
            .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;

        tracing::debug!("Health checking URL: {}", url);

        let exchange = async {
            let response = self
                .client
                .request(request)
                .await
                .map_err(|e| HttpClientError::ConnectionError(e.to_string()))?;
            let status = response.status();
            // Consume the body to prevent resource leaks
            let _ = response.into_body().collect().await;
            Ok(status)
        };

        match timeout(timeout_after, exchange).await {
            Ok(result) => {
                tracing::debug!("Health check for {} result: {:?}", url, result);
                result
            }
            Err(_) => {
                tracing::debug!("Health check timeout for {}", url);
                Err(HttpClientError::timeout(timeout_after))
            }
        }
    }
}
