//! # 配置管理模块
//!
//! 提供统一的配置管理系统，支持构建器模式和链式配置

pub mod builders;
pub mod core;

pub use builders::{LoggingConfigBuilder, QueryCacheConfigBuilder};
pub use core::{LogLevel, LoggingConfig, QueryCacheConfig};

use crate::error::QueryCacheResult;
use rat_logger::{LevelFilter, LoggerBuilder, handler::term::TermConfig};

/// 按配置初始化日志系统
///
/// 库本身不会自动初始化日志，需要由应用显式调用。
/// 未启用控制台输出时不安装任何处理器
pub fn init_logging(config: &LoggingConfig) -> QueryCacheResult<()> {
    if !config.console {
        return Ok(());
    }

    LoggerBuilder::new()
        .with_level(LevelFilter::from(config.level))
        .add_terminal_with_config(TermConfig::default())
        .init()
        .map_err(|e| crate::querycache_error!(config, format!("初始化日志失败: {}", e)))
}
