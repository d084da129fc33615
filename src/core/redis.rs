use std::sync::Arc;

use redis::aio::ConnectionManager;
use redis::{cmd, Client, RedisError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;

/// Reconnect-tolerant handle around a shared connection manager. The session
/// mirror degrades to a no-op when redis is unavailable: checkpoints are
/// skipped and capture seeds stay ephemeral for the life of the session.
#[derive(Clone)]
pub(crate) struct RedisHandle {
    url: String,
    manager: Arc<RwLock<Option<ConnectionManager>>>,
}

#[derive(Debug, Clone)]
pub(crate) enum RedisHealth {
    Healthy,
    Disconnected,
    Unhealthy(String),
}

impl RedisHandle {
    pub(crate) fn new(url: String) -> Self {
        Self { url, manager: Arc::new(RwLock::new(None)) }
    }

    pub(crate) async fn connect(&self) -> Result<(), RedisError> {
        let client = Client::open(self.url.clone())?;
        let manager = ConnectionManager::new(client).await?;
        let mut guard = self.manager.write().await;
        *guard = Some(manager);
        Ok(())
    }

    pub(crate) async fn disconnect(&self) {
        let mut guard = self.manager.write().await;
        *guard = None;
    }

    pub(crate) async fn health(&self) -> RedisHealth {
        let manager = { self.manager.read().await.clone() };
        let Some(mut manager) = manager else {
            return RedisHealth::Disconnected;
        };

        match cmd("PING").query_async::<_, String>(&mut manager).await {
            Ok(_) => RedisHealth::Healthy,
            Err(err) => RedisHealth::Unhealthy(err.to_string()),
        }
    }

    /// Store a JSON document with a TTL. Returns false when no connection is
    /// available (the caller treats that as a skipped checkpoint, not an error).
    pub(crate) async fn put_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_seconds: u64,
    ) -> Result<bool, RedisError> {
        let manager = { self.manager.read().await.clone() };
        let Some(mut manager) = manager else {
            return Ok(false);
        };

        let payload = serde_json::to_string(value)
            .map_err(|err| RedisError::from((redis::ErrorKind::TypeError, "json", err.to_string())))?;

        cmd("SET")
            .arg(key)
            .arg(payload)
            .arg("EX")
            .arg(ttl_seconds)
            .query_async::<_, ()>(&mut manager)
            .await?;

        Ok(true)
    }

    pub(crate) async fn fetch_json<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, RedisError> {
        let manager = { self.manager.read().await.clone() };
        let Some(mut manager) = manager else {
            return Ok(None);
        };

        let raw: Option<String> = cmd("GET").arg(key).query_async(&mut manager).await?;

        match raw {
            Some(payload) => match serde_json::from_str(&payload) {
                Ok(value) => Ok(Some(value)),
                Err(err) => {
                    tracing::warn!(key, error = %err, "Discarding unreadable redis document");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    pub(crate) async fn remove(&self, key: &str) -> Result<(), RedisError> {
        let manager = { self.manager.read().await.clone() };
        let Some(mut manager) = manager else {
            return Ok(());
        };

        cmd("DEL").arg(key).query_async::<_, ()>(&mut manager).await?;
        Ok(())
    }

    /// SET NX then GET: the first writer wins and every later caller observes
    /// the same value. Returns None when no connection is available.
    pub(crate) async fn ensure_seed(
        &self,
        key: &str,
        candidate: u32,
        ttl_seconds: u64,
    ) -> Result<Option<u32>, RedisError> {
        let manager = { self.manager.read().await.clone() };
        let Some(mut manager) = manager else {
            return Ok(None);
        };

        cmd("SET")
            .arg(key)
            .arg(candidate)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds)
            .query_async::<_, ()>(&mut manager)
            .await?;

        let stored: Option<u32> = cmd("GET").arg(key).query_async(&mut manager).await?;
        Ok(Some(stored.unwrap_or(candidate)))
    }
}
