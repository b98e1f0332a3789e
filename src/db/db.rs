// db/db.rs
use redis::aio::ConnectionManager;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{Pool, Postgres, Transaction};
use std::sync::Arc;
use uuid::Uuid;

use super::cache::{CacheHelper, CONTRACT_CACHE_TTL};
use crate::models::contractmodel::Contract;

#[derive(Clone)]
pub struct DBClient {
    pub pool: Pool<Postgres>,
    pub redis_client: Option<Arc<ConnectionManager>>,
}

impl std::fmt::Debug for DBClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DBClient")
            .field("pool", &"Pool<Postgres>")
            .field("redis_client", &self.redis_client.is_some())
            .finish()
    }
}

impl DBClient {
    pub fn new(pool: Pool<Postgres>) -> Self {
        DBClient {
            pool,
            redis_client: None,
        }
    }

    /// Falls back to an uncached client when Redis is unreachable.
    pub async fn with_redis(pool: Pool<Postgres>, redis_url: &str) -> Self {
        let client = match redis::Client::open(redis_url) {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!("Failed to create Redis client: {}. Continuing without cache.", e);
                return DBClient::new(pool);
            }
        };

        match ConnectionManager::new(client).await {
            Ok(conn) => {
                tracing::info!("Redis connection established");
                DBClient {
                    pool,
                    redis_client: Some(Arc::new(conn)),
                }
            }
            Err(e) => {
                tracing::warn!("Failed to connect to Redis: {}. Continuing without cache.", e);
                DBClient::new(pool)
            }
        }
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, sqlx::Error> {
        self.pool.begin().await
    }

    pub fn cache_status(&self) -> &str {
        if self.redis_client.is_some() {
            "enabled"
        } else {
            "disabled"
        }
    }

    pub async fn cache_health(&self) -> &'static str {
        match &self.redis_client {
            None => "disabled",
            Some(redis) => match CacheHelper::health_check(redis).await {
                Ok(true) => "ok",
                Ok(false) | Err(_) => "unreachable",
            },
        }
    }

    /// Cache reads never fail the caller.
    pub async fn cache_get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let redis = self.redis_client.as_ref()?;
        match CacheHelper::get::<T>(redis, key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Cache read failed for {}: {}", key, e);
                None
            }
        }
    }

    pub async fn cache_set<T: Serialize + Sync>(&self, key: &str, value: &T) {
        if let Some(redis) = &self.redis_client {
            if let Err(e) = CacheHelper::set(redis, key, value, CONTRACT_CACHE_TTL).await {
                tracing::warn!("Cache write failed for {}: {}", key, e);
            }
        }
    }

    /// Drops every cached view of a contract after a mutation.
    pub async fn invalidate_contract(&self, contract_id: Uuid) {
        if let Some(redis) = &self.redis_client {
            for key in [Contract::cache_key(contract_id), Contract::history_cache_key(contract_id)] {
                if let Err(e) = CacheHelper::delete(redis, &key).await {
                    tracing::warn!("Cache invalidation failed for {}: {}", key, e);
                }
            }
        }
    }
}
