use bytes::Bytes;
use std::time::Duration;

mod rest;

pub use rest::RestProxyClient;

/// Errors from the broker adapter
#[derive(Debug)]
pub enum BrokerError {
    /// No message (or no acknowledgement) arrived within the deadline
    Timeout,
    /// The broker could not be reached, or rejected the request
    Unavailable(String),
    /// The broker answered with something the adapter could not interpret
    Protocol(String),
}

impl std::fmt::Display for BrokerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerError::Timeout => write!(f, "broker request timed out"),
            BrokerError::Unavailable(msg) => write!(f, "broker unavailable: {}", msg),
            BrokerError::Protocol(msg) => write!(f, "unexpected broker response: {}", msg),
        }
    }
}

impl std::error::Error for BrokerError {}

/// Where a fresh subscription starts reading within a partition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartOffset {
    /// Replay from the beginning of retained history
    Oldest,
    /// Only messages published after the subscription opened
    Newest,
}

/// Trait for publishing messages to a topic (abstracts the broker client)
#[async_trait::async_trait]
pub trait StreamPublisher: Send + Sync {
    /// Send one message, returning the offset the broker assigned to it.
    async fn publish(&self, topic: &str, value: Bytes) -> Result<i64, BrokerError>;
}

/// Trait for one-shot consumption from a topic partition.
///
/// Implementations must release any subscription state on every exit path
/// (success, timeout, or error).
#[async_trait::async_trait]
pub trait StreamConsumer: Send + Sync {
    /// Return the first message delivered within `deadline`, starting the
    /// read at `start`. `BrokerError::Timeout` if nothing arrives in time.
    async fn consume_one(
        &self,
        topic: &str,
        partition: i32,
        start: StartOffset,
        deadline: Duration,
    ) -> Result<Bytes, BrokerError>;
}
