//! HTTP client for a simple-jdbc server.
//!
//! Used both for sidecars started by [`crate::sidecar::SidecarManager`] and
//! for remote servers given on the command line. Calls are never retried;
//! transport failures surface as [`ClientError::Request`].

pub mod types;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::ClientError;
use crate::sidecar::readiness::ReadinessProbe;

pub use types::{Column, PreviewResult, Query, TableInfo, TablesQuery};

/// Longest error body kept in [`ClientError::Status`].
const MAX_ERROR_BODY: usize = 2048;

/// Typed access to the server's metadata, catalog, table and preview calls.
#[derive(Debug, Clone)]
pub struct SimpleJdbcClient {
    http: Client,
    base_url: Url,
}

impl SimpleJdbcClient {
    /// Client for the server at `base_url` with a 30 second request timeout.
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        Self::with_timeout(base_url, Duration::from_secs(30))
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let mut parsed = Url::parse(base_url).map_err(|e| ClientError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ClientError::InvalidBaseUrl {
                url: base_url.to_string(),
                reason: "scheme must be http or https".to_string(),
            });
        }
        // Endpoints are joined relative to the base path.
        if !parsed.path().ends_with('/') {
            let path = format!("{}/", parsed.path());
            parsed.set_path(&path);
        }

        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("simple-jdbc/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClientError::InvalidBaseUrl {
                url: base_url.to_string(),
                reason: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            http,
            base_url: parsed,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Whether the server is ready to accept requests.
    pub async fn ready(&self) -> Result<bool, ClientError> {
        self.get("ready").await
    }

    /// Server metadata, passed through as-is.
    pub async fn metadata(&self) -> Result<serde_json::Value, ClientError> {
        self.get("metadata").await
    }

    /// Catalogs visible through `jdbc_url`.
    pub async fn catalogs(&self, jdbc_url: &str) -> Result<Vec<String>, ClientError> {
        self.post("catalogs", &types::CatalogsRequest { jdbc_url })
            .await
    }

    /// Tables visible through `jdbc_url`, filtered by `query`.
    pub async fn tables(
        &self,
        jdbc_url: &str,
        query: &TablesQuery,
    ) -> Result<Vec<TableInfo>, ClientError> {
        self.post("tables", &types::TablesRequest { jdbc_url, query })
            .await
    }

    /// First `limit` rows of `query`.
    pub async fn preview(
        &self,
        jdbc_url: &str,
        query: &Query,
        limit: Option<u32>,
    ) -> Result<PreviewResult, ClientError> {
        self.post(
            "preview",
            &types::PreviewRequest {
                jdbc_url,
                query,
                limit,
            },
        )
        .await
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.base_url
            .join(path)
            .map_err(|e| ClientError::InvalidBaseUrl {
                url: self.base_url.to_string(),
                reason: e.to_string(),
            })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = self.endpoint(path)?;
        tracing::trace!("GET {}", url);
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| request_failed(path, &e))?;
        decode(path, response).await
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        tracing::trace!("POST {}", url);
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| request_failed(path, &e))?;
        decode(path, response).await
    }
}

#[async_trait]
impl ReadinessProbe for SimpleJdbcClient {
    async fn ready(&self) -> Result<bool, ClientError> {
        SimpleJdbcClient::ready(self).await
    }
}

fn request_failed(endpoint: &str, error: &reqwest::Error) -> ClientError {
    let reason = if error.is_timeout() {
        "request timed out".to_string()
    } else if error.is_connect() {
        "connection failed".to_string()
    } else {
        error.to_string()
    };
    ClientError::Request {
        endpoint: format!("/{}", endpoint),
        reason,
    }
}

async fn decode<T: DeserializeOwned>(
    endpoint: &str,
    response: reqwest::Response,
) -> Result<T, ClientError> {
    let status = response.status();
    if !status.is_success() {
        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut end = MAX_ERROR_BODY;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            body.truncate(end);
        }
        return Err(ClientError::Status {
            endpoint: format!("/{}", endpoint),
            status: status.as_u16(),
            body,
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| ClientError::Request {
            endpoint: format!("/{}", endpoint),
            reason: format!("failed to read response body: {}", e),
        })?;
    serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode {
        endpoint: format!("/{}", endpoint),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let client = SimpleJdbcClient::new("http://127.0.0.1:8000/api").unwrap();
        assert_eq!(client.base_url().as_str(), "http://127.0.0.1:8000/api/");
        assert_eq!(
            client.endpoint("ready").unwrap().as_str(),
            "http://127.0.0.1:8000/api/ready"
        );
    }

    #[test]
    fn test_rejects_bad_urls() {
        assert!(matches!(
            SimpleJdbcClient::new("not a url"),
            Err(ClientError::InvalidBaseUrl { .. })
        ));
        assert!(matches!(
            SimpleJdbcClient::new("ftp://example.com"),
            Err(ClientError::InvalidBaseUrl { .. })
        ));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        // Bind and release to get a port nobody listens on.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let client = SimpleJdbcClient::new(&format!("http://127.0.0.1:{}", port)).unwrap();

        let err = client.ready().await.unwrap_err();
        assert!(err.is_transport(), "unexpected error: {err}");
    }
}
