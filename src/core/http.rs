//! HTTP collaborator
//!
//! Repository indexes and package archives are fetched through [`HttpClient`] so the
//! lifecycle manager can be driven by a scripted client in tests.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;

use crate::core::config::HttpConfig;
use crate::core::error::{BridgeError, Result};

/// Status and decoded body of a GET request
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Fetch a text resource. Non-2xx statuses are returned, not raised.
    async fn get(&self, url: &str) -> Result<HttpResponse>;

    /// Fetch a binary resource, failing on any non-2xx status
    async fn download(&self, url: &str) -> Result<Bytes>;
}

/// `reqwest` backed client used by the CLI
#[derive(Clone)]
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| BridgeError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    fn parse_url(url: &str) -> Result<url::Url> {
        url::Url::parse(url).map_err(|e| BridgeError::Network(format!("Invalid URL {}: {}", url, e)))
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get(&self, url: &str) -> Result<HttpResponse> {
        let url = Self::parse_url(url)?;
        tracing::debug!(url = %url, "GET");

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| BridgeError::Network(format!("GET {} failed: {}", url, e)))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| BridgeError::Network(format!("Failed to read body of {}: {}", url, e)))?;

        Ok(HttpResponse { status, body })
    }

    async fn download(&self, url: &str) -> Result<Bytes> {
        let url = Self::parse_url(url)?;
        tracing::debug!(url = %url, "Downloading");

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| BridgeError::Network(format!("Download of {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(BridgeError::Network(format!(
                "Download failed: {} returned {}",
                url,
                response.status().as_u16()
            )));
        }

        response
            .bytes()
            .await
            .map_err(|e| BridgeError::Network(format!("Failed to read {}: {}", url, e)))
    }
}
