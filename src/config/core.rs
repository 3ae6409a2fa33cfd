//! # 配置管理模块 - 核心配置类型
//!
//! 查询缓存配置与日志配置，支持从 TOML / JSON 文件加载

use crate::error::{QueryCacheError, QueryCacheResult};
use crate::types::BackendConfig;
use rat_logger::{LevelFilter, info};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 查询缓存配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryCacheConfig {
    /// 缓存后端
    pub backend: BackendConfig,
    /// 日志配置
    ///
    /// 创建缓存记录存储时不会读取该项，需要应用调用 [`QueryCacheConfig::init_logging`]
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
    /// 带排序或分页的查询是否绕过缓存
    #[serde(default)]
    pub bypass_ordered_queries: bool,
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: LogLevel,
    /// 是否输出到控制台
    pub console: bool,
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    /// 错误级别
    Error,
    /// 警告级别
    Warn,
    /// 信息级别
    Info,
    /// 调试级别
    Debug,
    /// 跟踪级别
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension().and_then(|s| s.to_str()) == Some("toml")
}

impl QueryCacheConfig {
    /// 创建配置构建器
    pub fn builder() -> super::builders::QueryCacheConfigBuilder {
        super::builders::QueryCacheConfigBuilder::new()
    }

    /// 从配置文件加载配置
    ///
    /// 扩展名为 `.toml` 时按 TOML 解析，否则按 JSON 解析
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> QueryCacheResult<Self> {
        let path = config_path.as_ref();
        let content = std::fs::read_to_string(path).map_err(QueryCacheError::IoError)?;

        let config: QueryCacheConfig = if is_toml(path) {
            toml::from_str(&content)
                .map_err(|e| crate::querycache_error!(config, format!("解析TOML配置文件失败: {}", e)))?
        } else {
            serde_json::from_str(&content)
                .map_err(|e| crate::querycache_error!(config, format!("解析JSON配置文件失败: {}", e)))?
        };

        info!("从文件加载配置: {:?}", path);
        Ok(config)
    }

    /// 按 `logging` 配置初始化日志，返回是否安装了日志处理器
    ///
    /// 未配置日志或未启用控制台输出时不做任何事。日志只能初始化一次，应用启动时调用
    pub fn init_logging(&self) -> QueryCacheResult<bool> {
        match &self.logging {
            Some(logging) if logging.console => {
                super::init_logging(logging)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, config_path: P) -> QueryCacheResult<()> {
        let path = config_path.as_ref();
        let content = if is_toml(path) {
            toml::to_string_pretty(self)
                .map_err(|e| crate::querycache_error!(config, format!("序列化TOML配置失败: {}", e)))?
        } else {
            serde_json::to_string_pretty(self)
                .map_err(|e| crate::querycache_error!(config, format!("序列化JSON配置失败: {}", e)))?
        };

        std::fs::write(path, content).map_err(QueryCacheError::IoError)?;

        info!("保存配置到文件: {:?}", path);
        Ok(())
    }
}

impl LoggingConfig {
    /// 创建日志配置构建器
    pub fn builder() -> super::builders::LoggingConfigBuilder {
        super::builders::LoggingConfigBuilder::new()
    }
}
