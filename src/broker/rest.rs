use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::broker::{BrokerError, StartOffset, StreamConsumer, StreamPublisher};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Long-poll window per records fetch; the overall deadline is enforced
/// around the whole consume, so this only bounds a single round trip.
const POLL_TIMEOUT_MS: u64 = 500;

const KAFKA_V2_JSON: &str = "application/vnd.kafka.v2+json";
const KAFKA_BINARY_V2_JSON: &str = "application/vnd.kafka.binary.v2+json";

#[derive(Deserialize)]
struct PublishResponse {
    offsets: Vec<PartitionOffset>,
}

#[derive(Deserialize)]
struct PartitionOffset {
    #[allow(dead_code)]
    partition: i32,
    offset: Option<i64>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct ConsumerInstance {
    instance_id: String,
    base_uri: String,
}

#[derive(Deserialize)]
struct ConsumedRecord {
    value: Option<String>,
    offset: i64,
}

/// Broker client speaking the Kafka REST proxy v2 wire format.
///
/// Messages travel base64-embedded in the proxy's binary envelope. Consumption
/// goes through a short-lived consumer instance that is created, assigned one
/// partition, sought to the start position, polled, and deleted again within a
/// single `consume_one` call.
pub struct RestProxyClient {
    client: Client,
    base_url: String,
}

impl RestProxyClient {
    /// Create a new client for the proxy at `base_url`.
    /// Returns an error if the HTTP client fails to build.
    pub fn new(base_url: impl Into<String>) -> Result<Self, BrokerError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BrokerError::Unavailable(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Connectivity probe: list topics and expect any successful answer.
    pub async fn ping(&self) -> Result<(), BrokerError> {
        let response = self
            .client
            .get(format!("{}/topics", self.base_url))
            .header("Accept", KAFKA_V2_JSON)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(BrokerError::Unavailable(format!(
                "HTTP {} from {}/topics",
                status, self.base_url
            )));
        }
        Ok(())
    }

    /// Create a throwaway consumer instance on the proxy.
    async fn create_instance(&self, group: &str) -> Result<ConsumerInstance, BrokerError> {
        let response = self
            .client
            .post(format!("{}/consumers/{}", self.base_url, group))
            .header("Content-Type", KAFKA_V2_JSON)
            .json(&serde_json::json!({
                "format": "binary",
                "auto.offset.reset": "earliest",
            }))
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "(failed to read body)".to_string());
            return Err(BrokerError::Unavailable(format!(
                "HTTP {} creating consumer instance: {}",
                status, body
            )));
        }

        response
            .json::<ConsumerInstance>()
            .await
            .map_err(|e| BrokerError::Protocol(format!("consumer instance response: {}", e)))
    }

    /// Delete a consumer instance. Failures are logged, not propagated: by the
    /// time this runs the consume outcome is already decided.
    async fn delete_instance(&self, instance: &ConsumerInstance) {
        match self
            .client
            .delete(&instance.base_uri)
            .header("Content-Type", KAFKA_V2_JSON)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                debug!(instance = %instance.instance_id, "consumer instance released");
            }
            Ok(response) => {
                warn!(
                    instance = %instance.instance_id,
                    status = response.status().as_u16(),
                    "failed to delete consumer instance"
                );
            }
            Err(e) => {
                warn!(instance = %instance.instance_id, error = %e, "failed to delete consumer instance");
            }
        }
    }

    /// Assign the instance one partition, seek to the start position, then
    /// poll until a record shows up. Runs under the caller's deadline.
    async fn poll_first(
        &self,
        instance: &ConsumerInstance,
        topic: &str,
        partition: i32,
        start: StartOffset,
    ) -> Result<Bytes, BrokerError> {
        let partitions = serde_json::json!({
            "partitions": [{ "topic": topic, "partition": partition }],
        });

        self.instance_post(instance, "assignments", &partitions)
            .await?;

        let position = match start {
            StartOffset::Oldest => "positions/beginning",
            StartOffset::Newest => "positions/end",
        };
        self.instance_post(instance, position, &partitions).await?;

        loop {
            let response = self
                .client
                .get(format!(
                    "{}/records?timeout={}",
                    instance.base_uri, POLL_TIMEOUT_MS
                ))
                .header("Accept", KAFKA_BINARY_V2_JSON)
                .send()
                .await
                .map_err(map_reqwest_error)?;

            let status = response.status().as_u16();
            if !(200..300).contains(&status) {
                return Err(BrokerError::Unavailable(format!(
                    "HTTP {} polling records",
                    status
                )));
            }

            let records = response
                .json::<Vec<ConsumedRecord>>()
                .await
                .map_err(|e| BrokerError::Protocol(format!("records response: {}", e)))?;

            if let Some(record) = records.into_iter().next() {
                debug!(topic, partition, offset = record.offset, "consumed one record");
                return decode_record_value(record);
            }
        }
    }

    async fn instance_post(
        &self,
        instance: &ConsumerInstance,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<(), BrokerError> {
        let response = self
            .client
            .post(format!("{}/{}", instance.base_uri, path))
            .header("Content-Type", KAFKA_V2_JSON)
            .json(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(BrokerError::Unavailable(format!(
                "HTTP {} from consumer {}",
                status, path
            )));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl StreamPublisher for RestProxyClient {
    #[tracing::instrument(
        name = "broker_publish",
        skip(self, topic, value),
        fields(topic = %topic, bytes = value.len())
    )]
    async fn publish(&self, topic: &str, value: Bytes) -> Result<i64, BrokerError> {
        let body = serde_json::json!({
            "records": [{ "value": BASE64.encode(&value) }],
        });

        let response = self
            .client
            .post(format!("{}/topics/{}", self.base_url, topic))
            .header("Content-Type", KAFKA_BINARY_V2_JSON)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let resp_body = response
                .text()
                .await
                .unwrap_or_else(|_| "(failed to read body)".to_string());
            return Err(BrokerError::Unavailable(format!(
                "HTTP {} publishing to {}: {}",
                status, topic, resp_body
            )));
        }

        let parsed = response
            .json::<PublishResponse>()
            .await
            .map_err(|e| BrokerError::Protocol(format!("publish response: {}", e)))?;

        let offset = first_offset(parsed)?;
        debug!(topic, offset, "published one record");
        Ok(offset)
    }
}

#[async_trait::async_trait]
impl StreamConsumer for RestProxyClient {
    #[tracing::instrument(
        name = "broker_consume",
        skip(self, topic, partition, start, deadline),
        fields(
            topic = %topic,
            partition = partition,
            start = ?start,
            deadline_ms = deadline.as_millis() as u64
        )
    )]
    async fn consume_one(
        &self,
        topic: &str,
        partition: i32,
        start: StartOffset,
        deadline: Duration,
    ) -> Result<Bytes, BrokerError> {
        let group = ephemeral_group_name();
        let instance = self.create_instance(&group).await?;

        let result = tokio::time::timeout(
            deadline,
            self.poll_first(&instance, topic, partition, start),
        )
        .await;

        // The instance is released on every exit path: success, error, timeout.
        self.delete_instance(&instance).await;

        match result {
            Ok(outcome) => outcome,
            Err(_) => Err(BrokerError::Timeout),
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> BrokerError {
    if e.is_timeout() {
        BrokerError::Timeout
    } else {
        BrokerError::Unavailable(e.to_string())
    }
}

/// Extract the assigned offset from a publish response, surfacing per-record
/// proxy errors.
fn first_offset(response: PublishResponse) -> Result<i64, BrokerError> {
    let entry = response
        .offsets
        .into_iter()
        .next()
        .ok_or_else(|| BrokerError::Protocol("publish response carried no offsets".to_string()))?;

    if let Some(error) = entry.error {
        return Err(BrokerError::Unavailable(error));
    }
    entry
        .offset
        .ok_or_else(|| BrokerError::Protocol("offset entry missing offset".to_string()))
}

fn decode_record_value(record: ConsumedRecord) -> Result<Bytes, BrokerError> {
    let encoded = record
        .value
        .ok_or_else(|| BrokerError::Protocol("record carried no value".to_string()))?;
    let decoded = BASE64
        .decode(encoded)
        .map_err(|e| BrokerError::Protocol(format!("record value is not base64: {}", e)))?;
    Ok(Bytes::from(decoded))
}

/// One consumer group per consume call, so instances never collide and the
/// proxy assigns each its full partition view.
fn ephemeral_group_name() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("streambridge-{}", nanos)
}
