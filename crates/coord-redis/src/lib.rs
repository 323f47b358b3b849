//! # coord-redis
//!
//! Redis-backed [`coord_core::kv::KvStore`] (SPEC_FULL.md §4.1, §9 "Redis
//! as a new dependency"). No other crate in this workspace reaches for
//! `redis` directly; every call into the shared datastore goes through the
//! trait so the broker client stays agnostic to the backend.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use coord_core::error::BackendError;
use coord_core::kv::{BoxStream, KvStore, PubSubMessage};
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

/// A Redis client wrapped in an auto-reconnecting [`ConnectionManager`].
///
/// Connections are not pooled beyond what `ConnectionManager` itself
/// multiplexes; the coordination broker's command volume does not justify
/// a dedicated pool (SPEC_FULL.md §5 "Concurrency & resource model").
pub struct RedisStore {
    client: redis::Client,
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        Ok(RedisStore { client, conn })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

fn map_err(err: redis::RedisError) -> BackendError {
    BackendError::backend(err.to_string())
}

#[async_trait]
impl KvStore for RedisStore {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), BackendError> {
        let mut conn = self.conn();
        match ttl {
            Some(ttl) => conn
                .set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
                .await
                .map_err(map_err),
            None => conn.set::<_, _, ()>(key, value).await.map_err(map_err),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        self.conn().get(key).await.map_err(map_err)
    }

    async fn del(&self, key: &str) -> Result<(), BackendError> {
        self.conn().del::<_, ()>(key).await.map_err(map_err)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), BackendError> {
        self.conn()
            .expire::<_, ()>(key, ttl.as_secs().max(1) as i64)
            .await
            .map_err(map_err)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), BackendError> {
        self.conn().hset::<_, _, _, ()>(key, field, value).await.map_err(map_err)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, BackendError> {
        self.conn().hget(key, field).await.map_err(map_err)
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, BackendError> {
        self.conn().hgetall(key).await.map_err(map_err)
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), BackendError> {
        self.conn().hdel::<_, _, ()>(key, field).await.map_err(map_err)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), BackendError> {
        self.conn().sadd::<_, _, ()>(key, member).await.map_err(map_err)
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), BackendError> {
        self.conn().srem::<_, _, ()>(key, member).await.map_err(map_err)
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, BackendError> {
        self.conn().sismember(key, member).await.map_err(map_err)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, BackendError> {
        self.conn().smembers(key).await.map_err(map_err)
    }

    async fn scard(&self, key: &str) -> Result<u64, BackendError> {
        self.conn().scard(key).await.map_err(map_err)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), BackendError> {
        self.conn().zadd::<_, _, _, ()>(key, member, score).await.map_err(map_err)
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64, rev: bool) -> Result<Vec<String>, BackendError> {
        let mut conn = self.conn();
        if rev {
            conn.zrevrange(key, start as isize, stop as isize).await.map_err(map_err)
        } else {
            conn.zrange(key, start as isize, stop as isize).await.map_err(map_err)
        }
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<(), BackendError> {
        self.conn().zrem::<_, _, ()>(key, member).await.map_err(map_err)
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, BackendError> {
        self.conn().zscore(key, member).await.map_err(map_err)
    }

    async fn zcard(&self, key: &str) -> Result<u64, BackendError> {
        self.conn().zcard(key).await.map_err(map_err)
    }

    async fn zremrangebyrank(&self, key: &str, start: i64, stop: i64) -> Result<(), BackendError> {
        self.conn()
            .zremrangebyrank::<_, ()>(key, start as isize, stop as isize)
            .await
            .map_err(map_err)
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<(), BackendError> {
        self.conn().rpush::<_, _, ()>(key, value).await.map_err(map_err)
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>, BackendError> {
        self.conn().lpop(key, None).await.map_err(map_err)
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, BackendError> {
        self.conn()
            .lrange(key, start as isize, stop as isize)
            .await
            .map_err(map_err)
    }

    async fn llen(&self, key: &str) -> Result<u64, BackendError> {
        self.conn().llen(key).await.map_err(map_err)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BackendError> {
        self.conn().publish::<_, _, ()>(channel, payload).await.map_err(map_err)
    }

    /// Opens a dedicated pub/sub connection, since Redis multiplexed
    /// connections cannot also run `SUBSCRIBE` (SPEC_FULL.md §4.1).
    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, PubSubMessage>, BackendError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(map_err)?;
        pubsub.subscribe(channel).await.map_err(map_err)?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let channel = msg.get_channel_name().to_string();
            let payload: String = msg.get_payload().ok()?;
            Some(PubSubMessage { channel, payload })
        });
        let boxed: Pin<Box<dyn futures::Stream<Item = PubSubMessage> + Send>> = Box::pin(stream);
        Ok(boxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `RedisStore::connect` surfaces connection failures instead of
    /// panicking; this is the only assertion this crate can make without a
    /// live Redis instance (everything else runs against
    /// `coord_core::kv::MemoryStore`).
    #[tokio::test]
    async fn connect_rejects_malformed_url() {
        let result = RedisStore::connect("not-a-redis-url").await;
        assert!(result.is_err());
    }
}
