use bytes::Bytes;

mod kv;

pub use kv::KvStoreClient;

/// Errors from the cache adapter
#[derive(Debug)]
pub enum CacheError {
    /// The key has never been set, or was evicted
    NotFound,
    /// The store could not be reached, or rejected the request
    Unavailable(String),
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::NotFound => write!(f, "key not found"),
            CacheError::Unavailable(msg) => write!(f, "cache unavailable: {}", msg),
        }
    }
}

impl std::error::Error for CacheError {}

/// Trait for the key-value store (abstracts the HTTP client)
#[async_trait::async_trait]
pub trait ValueCache: Send + Sync {
    /// Unconditional overwrite, no TTL.
    async fn set(&self, key: &str, value: Bytes) -> Result<(), CacheError>;

    /// Current value for `key`, or `CacheError::NotFound`.
    async fn get(&self, key: &str) -> Result<Bytes, CacheError>;
}
