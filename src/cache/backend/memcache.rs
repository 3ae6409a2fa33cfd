//! 基于 rat_memcache 的分层缓存后端
//!
//! L1 为内存缓存，配置了 L2 时写入磁盘，作为文件型缓存后端使用

use super::CacheBackend;
use crate::error::QueryCacheResult;
use crate::types::BackendConfig;
use async_trait::async_trait;
use bytes::Bytes;
use rat_logger::{debug, info};
use rat_memcache::types::EvictionStrategy;
use rat_memcache::{CacheOptions, RatMemCache, RatMemCacheBuilder};
use std::path::PathBuf;
use std::sync::Arc;

/// rat_memcache 后端
#[derive(Clone)]
pub struct MemCacheBackend {
    cache: Arc<RatMemCache>,
    instance_id: String,
}

impl std::fmt::Debug for MemCacheBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemCacheBackend")
            .field("instance_id", &self.instance_id)
            .finish()
    }
}

impl MemCacheBackend {
    /// 按 `BackendConfig::File` 创建后端
    pub async fn new(config: &BackendConfig) -> QueryCacheResult<Self> {
        let BackendConfig::File {
            l1_config,
            l2_config,
            ttl_config,
        } = config
        else {
            return Err(crate::querycache_error!(
                config,
                format!("rat_memcache 后端需要 file 配置，收到: {}", config.type_name())
            ));
        };

        debug!("创建 rat_memcache 后端，配置: {:?}", config);

        let max_disk_mb = l2_config.as_ref().map(|c| c.max_disk_mb).unwrap_or(500);
        let enable_compression = l2_config
            .as_ref()
            .map(|c| c.enable_compression)
            .unwrap_or(false);

        let builder = RatMemCacheBuilder::new()
            .l1_config(rat_memcache::config::L1Config {
                max_memory: l1_config.max_memory_mb * 1024 * 1024,
                max_entries: l1_config.max_capacity,
                eviction_strategy: EvictionStrategy::Lru,
            })
            .l2_config(rat_memcache::config::L2Config {
                enable_l2_cache: l2_config.is_some(),
                data_dir: l2_config.as_ref().map(|c| PathBuf::from(&c.storage_path)),
                max_disk_size: max_disk_mb as u64 * 1024 * 1024,
                write_buffer_size: 64 * 1024 * 1024,
                max_write_buffer_number: 3,
                block_cache_size: 16 * 1024 * 1024,
                enable_lz4: enable_compression,
                compression_threshold: 1024,
                compression_max_threshold: 1024 * 10,
                compression_level: l2_config.as_ref().map(|c| c.compression_level).unwrap_or(6),
                background_threads: 2,
                clear_on_startup: l2_config.as_ref().map(|c| c.clear_on_startup).unwrap_or(false),
                cache_size_mb: max_disk_mb,
                max_file_size_mb: max_disk_mb / 2,
                smart_flush_enabled: true,
                smart_flush_base_interval_ms: 100,
                smart_flush_min_interval_ms: 20,
                smart_flush_max_interval_ms: 500,
                smart_flush_write_rate_threshold: 10000,
                smart_flush_accumulated_bytes_threshold: 4 * 1024 * 1024,
                cache_warmup_strategy: rat_memcache::config::CacheWarmupStrategy::Recent,
                zstd_compression_level: None,
                l2_write_strategy: "write_through".to_string(),
                l2_write_threshold: 1024,
                l2_write_ttl_threshold: 3600,
            })
            .ttl_config(rat_memcache::config::TtlConfig {
                // 不设默认过期时间，未指定 TTL 的条目（追踪器）永不过期
                expire_seconds: None,
                cleanup_interval: ttl_config.check_interval_secs,
                max_cleanup_entries: 1000,
                lazy_expiration: true,
                active_expiration: true,
            })
            .performance_config(rat_memcache::config::PerformanceConfig {
                worker_threads: 4,
                enable_concurrency: true,
                read_write_separation: true,
                batch_size: 1000,
                enable_warmup: true,
                large_value_threshold: 10240,
            })
            .logging_config(rat_memcache::config::LoggingConfig {
                level: "WARN".to_string(),
                enable_colors: true,
                show_timestamp: true,
                enable_performance_logs: false,
                enable_audit_logs: false,
                enable_cache_logs: false,
                enable_logging: true,
                enable_async: false,
                batch_size: 2048,
                batch_interval_ms: 25,
                buffer_size: 16384,
            });

        let cache = builder
            .build()
            .await
            .map_err(|e| crate::querycache_error!(cache, format!("创建 rat_memcache 失败: {}", e)))?;

        info!(
            "rat_memcache 后端初始化成功 - L1容量: {}, L1内存: {}MB, L2磁盘: {}MB",
            l1_config.max_capacity,
            l1_config.max_memory_mb,
            l2_config.as_ref().map(|c| c.max_disk_mb).unwrap_or(0)
        );

        Ok(Self {
            cache: Arc::new(cache),
            instance_id: config.instance_id(),
        })
    }

    /// 规范化实例标识
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }
}

#[async_trait]
impl CacheBackend for MemCacheBackend {
    fn name(&self) -> &str {
        "file"
    }

    async fn get(&self, key: &str) -> QueryCacheResult<Option<Bytes>> {
        self.cache
            .get(key)
            .await
            .map_err(|e| crate::querycache_error!(cache, format!("读取缓存 {} 失败: {}", key, e)))
    }

    async fn set(&self, key: &str, value: Bytes, ttl_secs: u64) -> QueryCacheResult<()> {
        let options = CacheOptions {
            ttl_seconds: (ttl_secs > 0).then_some(ttl_secs),
            ..Default::default()
        };
        self.cache
            .set_with_options(key.to_string(), value, &options)
            .await
            .map_err(|e| crate::querycache_error!(cache, format!("写入缓存 {} 失败: {}", key, e)))
    }

    async fn delete(&self, key: &str) -> QueryCacheResult<bool> {
        self.cache
            .delete(key)
            .await
            .map_err(|e| crate::querycache_error!(cache, format!("删除缓存 {} 失败: {}", key, e)))
    }
}
