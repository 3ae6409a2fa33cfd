//! # 查询缓存配置构建器模块

use crate::config::core::{LoggingConfig, QueryCacheConfig};
use crate::error::QueryCacheResult;
use crate::types::BackendConfig;
use rat_logger::info;

/// 查询缓存配置构建器
///
/// 后端与排序查询策略必须显式设置
#[derive(Debug)]
pub struct QueryCacheConfigBuilder {
    backend: Option<BackendConfig>,
    logging: Option<LoggingConfig>,
    bypass_ordered_queries: Option<bool>,
}

impl QueryCacheConfigBuilder {
    /// 创建新的构建器
    pub fn new() -> Self {
        Self {
            backend: None,
            logging: None,
            bypass_ordered_queries: None,
        }
    }

    /// 设置缓存后端
    pub fn backend(mut self, backend: BackendConfig) -> Self {
        self.backend = Some(backend);
        self
    }

    /// 设置日志配置
    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = Some(logging);
        self
    }

    /// 设置带排序或分页的查询是否绕过缓存
    pub fn bypass_ordered_queries(mut self, bypass: bool) -> Self {
        self.bypass_ordered_queries = Some(bypass);
        self
    }

    /// 构建查询缓存配置
    ///
    /// # 错误
    ///
    /// 必需项未设置或后端参数非法时返回配置错误
    pub fn build(self) -> QueryCacheResult<QueryCacheConfig> {
        let backend = self
            .backend
            .ok_or_else(|| crate::querycache_error!(config, "缓存后端必须设置"))?;

        let bypass_ordered_queries = self
            .bypass_ordered_queries
            .ok_or_else(|| crate::querycache_error!(config, "排序查询缓存策略必须设置"))?;

        if let BackendConfig::File {
            l1_config,
            l2_config,
            ..
        } = &backend
        {
            if l1_config.max_capacity == 0 {
                return Err(crate::querycache_error!(config, "L1缓存容量不能为零"));
            }
            if l1_config.max_memory_mb == 0 {
                return Err(crate::querycache_error!(config, "L1缓存内存上限不能为零"));
            }
            if let Some(l2) = l2_config {
                if l2.storage_path.trim().is_empty() {
                    return Err(crate::querycache_error!(config, "L2缓存存储路径不能为空"));
                }
            }
        }

        info!(
            "创建查询缓存配置: 后端={}, 排序查询绕过缓存={}",
            backend.type_name(),
            bypass_ordered_queries
        );

        Ok(QueryCacheConfig {
            backend,
            logging: self.logging,
            bypass_ordered_queries,
        })
    }
}

impl Default for QueryCacheConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
