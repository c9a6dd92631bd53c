// HTTP module - Polling protocol implementation
pub mod batch;
pub mod engine;

pub use engine::{PollingEngine, PollingSettings};

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::domain::error::{HubError, HubResult};
use crate::domain::response::find_header;
pub use crate::domain::response::HttpResponse;

/// HTTP method subset used by the polling protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Delete,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
            HttpMethod::Delete => write!(f, "DELETE"),
        }
    }
}

/// One request of the polling protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    /// Path including the query string
    pub path: String,
    /// Headers in the order they are written
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// Request could not be carried out (DNS, TLS, socket, timeout)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct RequestFailure(pub String);

/// The request/response capability the polling engine runs on
#[async_trait]
pub trait HttpExecutor: Send + Sync {
    /// Perform one round trip against `host`
    async fn execute(
        &self,
        host: &str,
        request: HttpRequest,
    ) -> Result<HttpResponse, RequestFailure>;
}

/// `reqwest`-backed executor
pub struct ReqwestExecutor {
    client: reqwest::Client,
}

impl ReqwestExecutor {
    pub fn new(request_timeout: Duration) -> HubResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| HubError::Config {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self { client })
    }

    fn url(host: &str, path: &str) -> String {
        if host.starts_with("http://") || host.starts_with("https://") {
            format!("{}{}", host.trim_end_matches('/'), path)
        } else {
            format!("https://{}{}", host, path)
        }
    }
}

#[async_trait]
impl HttpExecutor for ReqwestExecutor {
    async fn execute(
        &self,
        host: &str,
        request: HttpRequest,
    ) -> Result<HttpResponse, RequestFailure> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };
        let url = Self::url(host, &request.path);

        let mut builder = self.client.request(method, &url);
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| RequestFailure(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(key, value)| {
                (
                    key.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| RequestFailure(e.to_string()))?
            .to_vec();

        debug!("{} {} -> {}", request.method, url, status);
        Ok(HttpResponse::new(status, headers, body))
    }
}
