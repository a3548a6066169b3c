use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response, StatusCode};
use thiserror::Error;

/// Custom error type for HTTP client operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// Error when connection to a child fails
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error when request times out
    #[error("Timeout error after {0} ms")]
    Timeout(u64),

    /// Error when request is invalid
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl HttpClientError {
    pub fn timeout(after: Duration) -> Self {
        HttpClientError::Timeout(after.as_millis() as u64)
    }
}

/// Result type alias for HTTP client operations
pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// HttpClient defines the port (interface) for talking to proxy children
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Forward an HTTP request to a child server
    ///
    /// # Arguments
    /// * `req` - The fully addressed request (absolute URI)
    ///
    /// # Returns
    /// The child's response, or an error when no response could be obtained
    async fn send_request(&self, req: Request<AxumBody>) -> HttpClientResult<Response<AxumBody>>;

    /// Probe a health endpoint
    ///
    /// # Arguments
    /// * `url` - The health URL to GET
    /// * `authorization` - Optional `Authorization` header value
    /// * `timeout` - Upper bound for the whole exchange
    ///
    /// # Returns
    /// The status code the endpoint answered with; timeouts and transport
    /// failures are errors
    async fn health_check(
        &self,
        url: &str,
        authorization: Option<&str>,
        timeout: Duration,
    ) -> HttpClientResult<StatusCode>;
}
