//! 缓存后端工厂
//!
//! 相同配置只创建一个后端实例，后续请求复用同一实例

use super::backend::{CacheBackend, MemCacheBackend, MemoryBackend};
use crate::error::QueryCacheResult;
use crate::types::{BackendConfig, BACKEND_TYPES};
use once_cell::sync::Lazy;
use rat_logger::{debug, info};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

/// 全局后端工厂
static GLOBAL_BACKEND_FACTORY: Lazy<BackendFactory> = Lazy::new(BackendFactory::new);

/// 获取全局后端工厂
pub fn global_backend_factory() -> &'static BackendFactory {
    &GLOBAL_BACKEND_FACTORY
}

/// 按规范化实例标识缓存后端实例
#[derive(Default)]
pub struct BackendFactory {
    instances: Mutex<HashMap<String, Arc<dyn CacheBackend>>>,
}

impl std::fmt::Debug for BackendFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendFactory").finish_non_exhaustive()
    }
}

impl BackendFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取或创建后端实例
    ///
    /// 创建过程在锁内完成，并发请求同一配置只会创建一次
    pub async fn get_or_create(
        &self,
        config: &BackendConfig,
    ) -> QueryCacheResult<Arc<dyn CacheBackend>> {
        let instance_id = config.instance_id();
        let mut instances = self.instances.lock().await;

        if let Some(existing) = instances.get(&instance_id) {
            debug!("复用缓存后端实例: {}", instance_id);
            return Ok(existing.clone());
        }

        let backend: Arc<dyn CacheBackend> = match config {
            BackendConfig::Memory { max_entries } => Arc::new(MemoryBackend::new(*max_entries)),
            BackendConfig::File { .. } => Arc::new(MemCacheBackend::new(config).await?),
        };
        info!("创建缓存后端实例: {}", instance_id);
        instances.insert(instance_id, backend.clone());
        Ok(backend)
    }

    /// 按类型名与字符串选项获取或创建后端
    ///
    /// 未知类型返回配置错误，错误信息列出支持的类型
    pub async fn get_or_create_from_options(
        &self,
        cache_type: &str,
        options: &BTreeMap<String, String>,
    ) -> QueryCacheResult<Arc<dyn CacheBackend>> {
        let config = BackendConfig::from_options(cache_type, options)?;
        self.get_or_create(&config).await
    }

    /// 已创建的实例数量
    pub async fn instance_count(&self) -> usize {
        self.instances.lock().await.len()
    }

    /// 支持的后端类型
    pub fn supported_types() -> &'static [&'static str] {
        &BACKEND_TYPES
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_same_config_returns_same_instance() {
        let factory = BackendFactory::new();
        let config = BackendConfig::Memory { max_entries: 16 };

        let a = factory.get_or_create(&config).await.unwrap();
        let b = factory.get_or_create(&config).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(factory.instance_count().await, 1);

        a.set("shared", Bytes::from_static(b"1"), 0).await.unwrap();
        assert!(b.has("shared").await.unwrap());

        let other = factory
            .get_or_create(&BackendConfig::Memory { max_entries: 32 })
            .await
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &other));
        assert_eq!(factory.instance_count().await, 2);
    }

    #[tokio::test]
    async fn test_options_are_order_insensitive() {
        let factory = BackendFactory::new();
        let mut options = BTreeMap::new();
        options.insert("max_entries".to_string(), "8".to_string());

        let a = factory.get_or_create_from_options("memory", &options).await.unwrap();
        let b = factory.get_or_create_from_options("MEMORY", &options).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_unknown_type_is_config_error() {
        let factory = BackendFactory::new();
        let err = factory
            .get_or_create_from_options("redis", &BTreeMap::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, crate::QueryCacheError::ConfigError { .. }));
        assert!(err.to_string().contains("memory"));
        assert_eq!(factory.instance_count().await, 0);
    }
}
