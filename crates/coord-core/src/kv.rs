use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_core::Stream;

use crate::error::BackendError;

/// A single entry delivered to a pub/sub subscriber.
#[derive(Debug, Clone)]
pub struct PubSubMessage {
    pub channel: String,
    pub payload: String,
}

/// A boxed stream of live fan-out notifications, as returned by
/// [`KvStore::subscribe`].
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

/// Narrow, implementation-agnostic view over the shared datastore
/// (SPEC_FULL.md §4.1). The broker client composes multi-step sequences on
/// top of this; the adapter itself offers no transactional primitive.
///
/// Implemented for a real Redis-backed client ([`coord_redis`]) and for an
/// in-memory fake ([`MemoryStore`]) used throughout this crate's and the
/// broker crate's own test suites — mirroring the way the teacher's
/// `StateStore` trait separates the publish engine from its concrete
/// filesystem backend.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), BackendError>;
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError>;
    async fn del(&self, key: &str) -> Result<(), BackendError>;
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), BackendError>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), BackendError>;
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, BackendError>;
    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, BackendError>;
    async fn hdel(&self, key: &str, field: &str) -> Result<(), BackendError>;

    async fn sadd(&self, key: &str, member: &str) -> Result<(), BackendError>;
    async fn srem(&self, key: &str, member: &str) -> Result<(), BackendError>;
    async fn sismember(&self, key: &str, member: &str) -> Result<bool, BackendError>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>, BackendError>;
    async fn scard(&self, key: &str) -> Result<u64, BackendError>;

    /// Add `member` with `score`, overwriting any existing score.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), BackendError>;
    /// Inclusive range by rank; negative indices count from the end like Redis `ZRANGE`.
    async fn zrange(&self, key: &str, start: i64, stop: i64, rev: bool) -> Result<Vec<String>, BackendError>;
    async fn zrem(&self, key: &str, member: &str) -> Result<(), BackendError>;
    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, BackendError>;
    async fn zcard(&self, key: &str) -> Result<u64, BackendError>;
    /// Remove the lowest-`count` scored members (used to enforce the timeline cap).
    async fn zremrangebyrank(&self, key: &str, start: i64, stop: i64) -> Result<(), BackendError>;

    async fn rpush(&self, key: &str, value: &str) -> Result<(), BackendError>;
    async fn lpop(&self, key: &str) -> Result<Option<String>, BackendError>;
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, BackendError>;
    async fn llen(&self, key: &str) -> Result<u64, BackendError>;

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BackendError>;

    /// Subscribe to live fan-out on `channel`. The returned stream ends
    /// when the underlying connection is dropped or closed.
    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, PubSubMessage>, BackendError>;
}

mod memory;
pub use memory::MemoryStore;
