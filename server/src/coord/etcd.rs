//! etcd v2 keys API client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, error};
use url::Url;

use crate::coord::{CoordConnector, KeyValueClient};
use crate::errors::ServerError;

/// Timeout applied to each key request
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

/// Client for one etcd endpoint
pub struct EtcdClient {
    client: Client,
    base_url: Url,
}

impl EtcdClient {
    /// Create a client; `host:port` endpoints are treated as plain HTTP
    pub fn new(endpoint: &str) -> Result<Self, ServerError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: parse_endpoint(endpoint)?,
        })
    }

    /// Get the endpoint URL
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// URL of a key in the v2 keys API
    pub fn key_url(&self, key: &str) -> Result<Url, ServerError> {
        let path = format!("v2/keys/{}", key.trim_start_matches('/'));
        self.base_url
            .join(&path)
            .map_err(|e| ServerError::CoordError(format!("Invalid key {}: {}", key, e)))
    }
}

#[async_trait]
impl KeyValueClient for EtcdClient {
    async fn set(&self, key: &str, value: &str) -> Result<(), ServerError> {
        let url = self.key_url(key)?;
        debug!("PUT {}", url);

        let response = self
            .client
            .put(url)
            .form(&[("value", value)])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("etcd set failed: {} - {}", status, body);
            return Err(ServerError::CoordError(format!("{}: {}", status, body)));
        }

        Ok(())
    }
}

/// Connector that opens [`EtcdClient`]s
#[derive(Debug, Clone, Default)]
pub struct EtcdConnector;

impl CoordConnector for EtcdConnector {
    fn connect(&self, endpoint: &str) -> Result<Box<dyn KeyValueClient>, ServerError> {
        Ok(Box::new(EtcdClient::new(endpoint)?))
    }
}

fn parse_endpoint(endpoint: &str) -> Result<Url, ServerError> {
    let endpoint = endpoint.trim();
    let with_scheme = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("http://{}", endpoint)
    };
    let mut url = Url::parse(&with_scheme)
        .map_err(|e| ServerError::CoordError(format!("Invalid endpoint {}: {}", endpoint, e)))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
