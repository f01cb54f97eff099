use std::sync::Arc;

use async_trait::async_trait;
use deadpool::managed::QueueMode;
use deadpool_redis::{Config as DeadpoolConfig, Pool, PoolConfig, Runtime, Timeouts};
use redis::AsyncCommands;
use sha2::{Digest, Sha256};

use crate::embeddings::EmbeddingCache;
use crate::error::{ConciergeError, Result};

/// Redis connection manager, used for the embedding cache
#[derive(Clone)]
pub struct RedisManager {
    pool: Arc<Pool>,
    embedding_ttl_seconds: u64,
}

impl RedisManager {
    /// Create a new Redis manager with configuration
    pub async fn new_with_config(config: &crate::config::Config) -> Result<Self> {
        let redis_url = config.get_redis_url();

        tracing::info!(
            "Connecting to Redis at {}:{} (db: {})",
            config.redis.host,
            config.redis.port,
            config.redis.database
        );

        let mut cfg = DeadpoolConfig::from_url(&redis_url);
        cfg.pool = Some(PoolConfig {
            max_size: config.redis.pool.max_size,
            timeouts: Timeouts {
                wait: Some(config.get_pool_timeout()),
                create: Some(config.get_pool_create_timeout()),
                recycle: Some(config.get_pool_recycle_timeout()),
            },
            queue_mode: QueueMode::Fifo,
        });

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| ConciergeError::PoolCreation(e.to_string()))?;

        let mut conn = pool.get().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        tracing::info!("Redis connection established");

        Ok(Self {
            pool: Arc::new(pool),
            embedding_ttl_seconds: config.redis.embedding_ttl_seconds,
        })
    }

    pub async fn get_connection(&self) -> Result<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }
}

/// Cache key for a piece of text; SHA-256 so arbitrary utterances fit
pub(crate) fn embedding_key(model: &str, text: &str) -> String {
    format!(
        "watch:embedding:{}:{}",
        model,
        hex::encode(Sha256::digest(text.as_bytes()))
    )
}

#[async_trait]
impl EmbeddingCache for RedisManager {
    async fn get(&self, model: &str, text: &str) -> Result<Option<Vec<f32>>> {
        let mut conn = self.get_connection().await?;
        let key = embedding_key(model, text);

        let result: Option<Vec<u8>> = conn.get(&key).await?;

        match result {
            Some(bytes) => {
                let embedding: Vec<f32> = bincode::deserialize(&bytes).map_err(|e| {
                    ConciergeError::Internal(format!("Failed to deserialize embedding: {e}"))
                })?;
                Ok(Some(embedding))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, model: &str, text: &str, embedding: &[f32]) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let key = embedding_key(model, text);

        let bytes = bincode::serialize(embedding).map_err(|e| {
            ConciergeError::Internal(format!("Failed to serialize embedding: {e}"))
        })?;

        conn.set_ex::<_, _, ()>(&key, bytes, self.embedding_ttl_seconds)
            .await?;
        Ok(())
    }
}
