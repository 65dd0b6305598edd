//! Redis-backed cache / lock service

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{CacheError, CacheStore};

pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    /// Connect and wrap the connection in a reconnecting manager.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(|e| CacheError(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| CacheError(e.to_string()))?;
        tracing::info!("Redis connection established");
        Ok(Self { conn })
    }

    fn conn(&self) -> ConnectionManager {
        // ConnectionManager is a cheap clone over a shared multiplexed
        // connection; cloning per call avoids holding a lock across awaits.
        self.conn.clone()
    }
}

fn map_err(e: redis::RedisError) -> CacheError {
    CacheError(e.to_string())
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn();
        conn.get(key).await.map_err(map_err)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn();
        conn.set_ex(key, value, ttl.as_secs()).await.map_err(map_err)
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let mut conn = self.conn();
        // SET key value NX EX ttl -> OK when set, nil when the key exists
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn();
        let _: () = conn.del(key).await.map_err(map_err)?;
        Ok(())
    }

    async fn sorted_add(&self, key: &str, member: &str, score: f64) -> Result<(), CacheError> {
        let mut conn = self.conn();
        let _: () = conn.zadd(key, member, score).await.map_err(map_err)?;
        Ok(())
    }

    async fn sorted_trim_below(&self, key: &str, min_score: f64) -> Result<(), CacheError> {
        let mut conn = self.conn();
        let _: () = redis::cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(format!("({}", min_score))
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn sorted_count(&self, key: &str) -> Result<u64, CacheError> {
        let mut conn = self.conn();
        conn.zcard(key).await.map_err(map_err)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn();
        let _: () = conn.expire(key, ttl.as_secs() as i64).await.map_err(map_err)?;
        Ok(())
    }
}
