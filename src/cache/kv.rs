use bytes::Bytes;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

use crate::cache::{CacheError, ValueCache};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Key-value store client over a raw-value HTTP API: `PUT /values/{key}`
/// writes the body verbatim, `GET /values/{key}` returns it (404 for a miss).
pub struct KvStoreClient {
    client: Client,
    base_url: String,
}

impl KvStoreClient {
    /// Create a new client for the store at `base_url`.
    /// Returns an error if the HTTP client fails to build.
    pub fn new(base_url: impl Into<String>) -> Result<Self, CacheError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CacheError::Unavailable(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Connectivity probe. A miss on the probe key still proves the store is
    /// reachable, so only transport and server errors fail the ping.
    pub async fn ping(&self, probe_key: &str) -> Result<(), CacheError> {
        match self.get(probe_key).await {
            Ok(_) | Err(CacheError::NotFound) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn value_url(&self, key: &str) -> String {
        format!("{}/values/{}", self.base_url, key)
    }
}

#[async_trait::async_trait]
impl ValueCache for KvStoreClient {
    async fn set(&self, key: &str, value: Bytes) -> Result<(), CacheError> {
        let response = self
            .client
            .put(self.value_url(key))
            .header("Content-Type", "application/octet-stream")
            .body(value)
            .send()
            .await
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(CacheError::Unavailable(format!(
                "HTTP {} writing key {}",
                status, key
            )));
        }
        debug!(key, "cache value written");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, CacheError> {
        let response = self
            .client
            .get(self.value_url(key))
            .send()
            .await
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(CacheError::NotFound);
        }
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(CacheError::Unavailable(format!(
                "HTTP {} reading key {}",
                status, key
            )));
        }

        response
            .bytes()
            .await
            .map_err(|e| CacheError::Unavailable(e.to_string()))
    }
}
