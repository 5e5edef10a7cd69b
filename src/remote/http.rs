//! HTTP object-store transport.
//!
//! Talks to any object store exposing a minimal REST surface:
//! `PUT {endpoint}/{container}` creates a container (409 means it already
//! exists) and `PUT {endpoint}/{container}/{key}` stores an object.

use crate::remote::transport::{ObjectTransport, TransportError};
use std::time::Duration;

/// HTTP transport configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Base URL, e.g. `https://objects.example.org`
    pub endpoint: String,
    /// Bearer authentication token
    pub token: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl HttpConfig {
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token: token.into(),
            timeout: Duration::from_secs(10),
        }
    }

    /// URL of a container.
    pub fn container_url(&self, container: &str) -> String {
        format!("{}/{}", self.endpoint.trim_end_matches('/'), container)
    }

    /// URL of an object inside a container.
    pub fn object_url(&self, container: &str, key: &str) -> String {
        format!("{}/{}", self.container_url(container), key)
    }
}

/// Async HTTP client for the object store.
pub struct ObjectStoreClient {
    config: HttpConfig,
    client: reqwest::Client,
}

impl ObjectStoreClient {
    pub fn new(config: HttpConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| TransportError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    pub async fn create_container(&self, container: &str) -> Result<(), TransportError> {
        let response = self
            .client
            .put(self.config.container_url(container))
            .header("Authorization", format!("Bearer {}", self.config.token))
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() || status == reqwest::StatusCode::CONFLICT {
            return Ok(());
        }

        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(TransportError::Server {
            status: status.as_u16(),
            message,
        })
    }

    pub async fn put_object(
        &self,
        container: &str,
        key: &str,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        let response = self
            .client
            .put(self.config.object_url(container, key))
            .header("Authorization", format!("Bearer {}", self.config.token))
            .header("Content-Type", "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(TransportError::Server {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }
}

/// Blocking transport for use from the protocol's worker threads.
pub struct HttpTransport {
    inner: ObjectStoreClient,
    runtime: tokio::runtime::Runtime,
}

impl HttpTransport {
    pub fn new(config: HttpConfig) -> Result<Self, TransportError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| TransportError::Config(format!("Failed to create runtime: {e}")))?;

        Ok(Self {
            inner: ObjectStoreClient::new(config)?,
            runtime,
        })
    }
}

impl ObjectTransport for HttpTransport {
    fn ensure_container_exists(&self, container: &str) -> Result<(), TransportError> {
        self.runtime.block_on(self.inner.create_container(container))
    }

    fn put(&self, container: &str, key: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.runtime
            .block_on(self.inner.put_object(container, key, payload.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_config_urls() {
        let config = HttpConfig::new("https://objects.example.org/", "test-token");
        assert_eq!(
            config.container_url("study/p1/dev"),
            "https://objects.example.org/study/p1/dev"
        );
        assert_eq!(
            config.object_url("study/p1/dev", "abc"),
            "https://objects.example.org/study/p1/dev/abc"
        );
    }

    #[test]
    fn test_unreachable_endpoint_is_network_error() {
        let mut config = HttpConfig::new("http://127.0.0.1:9", "t");
        config.timeout = Duration::from_millis(500);
        let transport = HttpTransport::new(config).unwrap();

        let err = transport.ensure_container_exists("b").unwrap_err();
        assert!(matches!(err, TransportError::Network(_)));
    }
}
