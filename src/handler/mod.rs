use bytes::Bytes;
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::broker::{StartOffset, StreamConsumer, StreamPublisher};
use crate::cache::{CacheError, ValueCache};

pub const DEFAULT_TOPIC: &str = "data-topic";
pub const DEFAULT_CACHE_KEY: &str = "latest-data";

#[derive(Debug)]
pub enum HandleError {
    /// Request body was not a JSON object
    Decode(String),
    /// Nothing cached yet (and the backfill produced nothing in time)
    NotFound,
}

impl std::fmt::Display for HandleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandleError::Decode(e) => write!(f, "decode error: {}", e),
            HandleError::NotFound => write!(f, "no data available"),
        }
    }
}

impl std::error::Error for HandleError {}

/// Fixed addressing and timing for the two pipelines.
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub topic: String,
    pub partition: i32,
    pub cache_key: String,
    /// How long a background consume may wait for a message
    pub consume_deadline: Duration,
    /// Upper bound on how long a read waits for its backfill before serving
    /// whatever the cache holds
    pub grace_period: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            partition: 0,
            cache_key: DEFAULT_CACHE_KEY.to_string(),
            consume_deadline: Duration::from_secs(10),
            grace_period: Duration::from_secs(2),
        }
    }
}

/// The bridge's two pipelines over injected broker and cache adapters.
///
/// `ingest` accepts a JSON object and schedules a fire-and-forget publish;
/// `fetch_latest` backfills the cache from the topic and serves the cached
/// value. Adapters are shared process-wide; the bridge itself holds no
/// mutable state.
pub struct Bridge {
    publisher: Arc<dyn StreamPublisher>,
    consumer: Arc<dyn StreamConsumer>,
    cache: Arc<dyn ValueCache>,
    config: BridgeConfig,
}

impl Bridge {
    pub fn new(
        publisher: Arc<dyn StreamPublisher>,
        consumer: Arc<dyn StreamConsumer>,
        cache: Arc<dyn ValueCache>,
        config: BridgeConfig,
    ) -> Self {
        Self {
            publisher,
            consumer,
            cache,
            config,
        }
    }

    /// Decode `body` as a JSON object and schedule one publish of it to the
    /// fixed topic. Returns as soon as the publish task is spawned; the
    /// caller never learns whether the publish succeeded. Malformed or
    /// non-object bodies fail synchronously, before anything is scheduled.
    #[tracing::instrument(name = "ingest", skip(self, body), fields(bytes = body.len()))]
    pub fn ingest(&self, body: Bytes) -> Result<(), HandleError> {
        let payload: Map<String, JsonValue> = serde_json::from_slice(&body).map_err(|e| {
            debug!(error = %e, "rejecting payload");
            HandleError::Decode(e.to_string())
        })?;

        let value = serde_json::to_vec(&payload)
            .map(Bytes::from)
            .map_err(|e| HandleError::Decode(e.to_string()))?;

        let publisher = Arc::clone(&self.publisher);
        let topic = self.config.topic.clone();
        tokio::spawn(async move {
            match publisher.publish(&topic, value).await {
                Ok(offset) => debug!(topic = %topic, offset, "payload published"),
                // Best-effort delivery: the payload is lost and nobody is told.
                Err(e) => warn!(topic = %topic, error = %e, "publish failed, payload dropped"),
            }
        });

        Ok(())
    }

    /// Backfill the cache with one message from the topic, then serve the
    /// cache's current value.
    ///
    /// The backfill runs as its own task; the serve path waits for it no
    /// longer than the grace period and then reads the cache regardless of
    /// whether the backfill finished. A slow backfill keeps running after the
    /// response and may populate the cache for a later read.
    #[tracing::instrument(name = "fetch_latest", skip(self))]
    pub async fn fetch_latest(&self) -> Result<Bytes, HandleError> {
        let consumer = Arc::clone(&self.consumer);
        let cache = Arc::clone(&self.cache);
        let config = self.config.clone();

        let backfill = tokio::spawn(async move {
            let message = match consumer
                .consume_one(
                    &config.topic,
                    config.partition,
                    StartOffset::Oldest,
                    config.consume_deadline,
                )
                .await
            {
                Ok(message) => message,
                Err(e) => {
                    warn!(topic = %config.topic, error = %e, "backfill consume failed, cache unchanged");
                    return;
                }
            };

            if let Err(e) = cache.set(&config.cache_key, message).await {
                warn!(key = %config.cache_key, error = %e, "backfill cache write failed");
            }
        });

        match tokio::time::timeout(self.config.grace_period, backfill).await {
            Ok(Ok(())) => debug!("backfill finished within grace period"),
            Ok(Err(e)) => warn!(error = %e, "backfill task failed"),
            Err(_) => debug!("grace period elapsed before backfill finished"),
        }

        match self.cache.get(&self.config.cache_key).await {
            Ok(bytes) => Ok(bytes),
            Err(CacheError::NotFound) => Err(HandleError::NotFound),
            Err(e) => {
                warn!(error = %e, "cache read failed");
                Err(HandleError::NotFound)
            }
        }
    }
}
