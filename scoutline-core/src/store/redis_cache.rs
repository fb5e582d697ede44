use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};
use std::{fmt, time::Duration};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::PipelineCache;
use crate::error::{OrchestratorError, Result};

/// Redis-backed pipeline cache. The connection is established lazily on
/// first use and shared afterwards.
pub struct RedisPipelineCache {
    client: redis::Client,
    conn: OnceCell<ConnectionManager>,
}

impl fmt::Debug for RedisPipelineCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisPipelineCache")
            .field("connected", &self.conn.initialized())
            .finish()
    }
}

impl RedisPipelineCache {
    pub fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).map_err(|e| {
            OrchestratorError::Internal(format!("Failed to create Redis client: {e}"))
        })?;

        Ok(Self {
            client,
            conn: OnceCell::new(),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        self.conn
            .get_or_try_init(|| async {
                info!(target: "orchestrator::store", "Connecting to Redis pipeline cache");
                let conn = ConnectionManager::new(self.client.clone())
                    .await
                    .map_err(|e| {
                        OrchestratorError::TransientStore(format!(
                            "Failed to connect to Redis: {e}"
                        ))
                    })?;
                info!(target: "orchestrator::store", "Connected to Redis pipeline cache");
                Ok(conn)
            })
            .await
            .cloned()
    }
}

#[async_trait]
impl PipelineCache for RedisPipelineCache {
    async fn ensure_ready(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| OrchestratorError::TransientStore(format!("Redis PING failed: {e}")))
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        debug!(target: "orchestrator::store", "Cache GET: {}", key);
        let mut conn = self.connection().await?;

        conn.get::<_, Option<String>>(key)
            .await
            .map_err(|e| OrchestratorError::TransientStore(format!("Redis GET failed: {e}")))
    }

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        debug!(target: "orchestrator::store", "Cache SET: {} (TTL: {:?})", key, ttl);
        let mut conn = self.connection().await?;

        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
            .await
            .map_err(|e| OrchestratorError::TransientStore(format!("Redis SETEX failed: {e}")))
    }
}
