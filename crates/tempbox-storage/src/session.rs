use crate::{CacheBackend, MemoryCache, RedisCache};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tempbox_config::{CacheBackendKind, CacheConfig};

pub fn account_key(email: &str) -> String {
    format!("account:{email}")
}

/// Best-effort JSON cache shared between server instances.
///
/// Every failure (no backend, lost connection, bad payload) is logged and
/// reported as "not found" / `false`, so callers never have to handle a
/// cache error.
#[derive(Clone, Default)]
pub struct SessionStore {
    backend: Option<Arc<dyn CacheBackend>>,
}

impl SessionStore {
    pub async fn from_config(config: &CacheConfig) -> Self {
        match config.backend {
            CacheBackendKind::Disabled => Self::disabled(),
            CacheBackendKind::Memory => Self::memory(),
            CacheBackendKind::Redis => match config.redis_url.as_deref() {
                None => {
                    tracing::warn!("redis not configured, accounts live in process memory only");
                    Self::disabled()
                }
                Some(url) => match RedisCache::connect(url).await {
                    Ok(cache) => Self::with_backend(Arc::new(cache)),
                    Err(err) => {
                        tracing::error!("redis connection failed, continuing without cache: {err}");
                        Self::disabled()
                    }
                },
            },
        }
    }

    pub fn disabled() -> Self {
        Self { backend: None }
    }

    pub fn memory() -> Self {
        Self::with_backend(Arc::new(MemoryCache::new()))
    }

    pub fn with_backend(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.as_ref().map_or("disabled", |b| b.name())
    }

    pub fn is_connected(&self) -> bool {
        self.backend.as_ref().is_some_and(|b| b.is_connected())
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let backend = self.backend.as_ref()?;
        let raw = match backend.get(key).await {
            Ok(raw) => raw?,
            Err(err) => {
                tracing::warn!(key, "cache read failed: {err}");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(key, "cache entry is not valid json: {err}");
                None
            }
        }
    }

    /// `ttl_secs: None` stores the value until it is deleted.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl_secs: Option<u64>) -> bool {
        let Some(backend) = self.backend.as_ref() else {
            return false;
        };

        let serialized = match serde_json::to_string(value) {
            Ok(serialized) => serialized,
            Err(err) => {
                tracing::warn!(key, "cache value failed to serialize: {err}");
                return false;
            }
        };

        match backend.set(key, serialized, ttl_secs).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(key, "cache write failed: {err}");
                false
            }
        }
    }

    pub async fn del(&self, key: &str) -> bool {
        let Some(backend) = self.backend.as_ref() else {
            return false;
        };

        match backend.del(key).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(key, "cache delete failed: {err}");
                false
            }
        }
    }

    pub async fn exists(&self, key: &str) -> bool {
        let Some(backend) = self.backend.as_ref() else {
            return false;
        };

        match backend.exists(key).await {
            Ok(found) => found,
            Err(err) => {
                tracing::warn!(key, "cache exists check failed: {err}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StorageError;
    use async_trait::async_trait;
    use serde::Deserialize;
    use std::time::Duration;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        email: String,
        token: String,
    }

    fn record() -> Record {
        Record {
            email: "box@dcctb.com".to_string(),
            token: "t1".to_string(),
        }
    }

    struct BrokenBackend;

    #[async_trait]
    impl CacheBackend for BrokenBackend {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn is_connected(&self) -> bool {
            false
        }

        async fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::Unavailable("connection refused".to_string()))
        }

        async fn set(&self, _: &str, _: String, _: Option<u64>) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("connection refused".to_string()))
        }

        async fn del(&self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("connection refused".to_string()))
        }

        async fn exists(&self, _key: &str) -> Result<bool, StorageError> {
            Err(StorageError::Unavailable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn disabled_store_is_a_quiet_no_op() {
        let store = SessionStore::disabled();
        assert!(!store.set("k", &record(), None).await);
        assert_eq!(store.get::<Record>("k").await, None);
        assert!(!store.exists("k").await);
        assert!(!store.del("k").await);
        assert!(!store.is_connected());
        assert_eq!(store.backend_name(), "disabled");
    }

    #[tokio::test]
    async fn failing_backend_never_surfaces_errors() {
        let store = SessionStore::with_backend(Arc::new(BrokenBackend));
        assert!(!store.set("k", &record(), None).await);
        assert_eq!(store.get::<Record>("k").await, None);
        assert!(!store.exists("k").await);
        assert!(!store.del("k").await);
    }

    #[tokio::test]
    async fn memory_store_round_trips_values() {
        let store = SessionStore::memory();
        let key = account_key("box@dcctb.com");
        assert_eq!(key, "account:box@dcctb.com");

        assert!(store.set(&key, &record(), None).await);
        assert!(store.exists(&key).await);
        assert_eq!(store.get::<Record>(&key).await, Some(record()));

        assert!(store.del(&key).await);
        assert!(!store.exists(&key).await);
    }

    #[tokio::test]
    async fn malformed_entries_read_as_missing() {
        let store = SessionStore::memory();
        assert!(store.set("k", &"just a string", None).await);
        assert_eq!(store.get::<Record>("k").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn memory_entries_expire_after_ttl() {
        let store = SessionStore::memory();
        assert!(store.set("short", &record(), Some(30)).await);
        assert!(store.set("forever", &record(), None).await);

        tokio::time::advance(Duration::from_secs(31)).await;

        assert!(!store.exists("short").await);
        assert!(store.exists("forever").await);
    }

    #[tokio::test]
    async fn unconfigured_redis_runs_disabled() {
        let store = SessionStore::from_config(&CacheConfig::default()).await;
        assert_eq!(store.backend_name(), "disabled");
    }
}
