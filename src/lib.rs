//! rat_querycache - 带条件感知失效的查询结果缓存
//!
//! 在记录存储前增加一层查询结果缓存：为结构化查询生成稳定的缓存键，
//! 按模型声明的条件模板决定哪些查询可缓存以及缓存多久，
//! 并在插入、更新、删除时精确丢弃可能过期的结果集

// 导出所有公共模块
pub mod adapter;
pub mod cache;
pub mod config;
pub mod error;
pub mod model;
pub mod output;
pub mod types;

// 重新导出常用类型和函数
pub use adapter::{CachedQuery, CachedRecordStore, MemoryRecordStore, RecordStore};
pub use cache::{
    BackendFactory, CacheBackend, CacheManager, CacheStats, ConditionRegistry, ConditionTemplate,
    MatchStrategy, MemCacheBackend, MemoryBackend, QueryTracker, global_backend_factory,
};
pub use config::{
    LogLevel, LoggingConfig, LoggingConfigBuilder, QueryCacheConfig, QueryCacheConfigBuilder,
    init_logging,
};
pub use error::{QueryCacheError, QueryCacheResult};
pub use model::{CacheableModel, ModelMeta};
pub use output::OutputCache;
pub use types::*;

// 日志系统导入
use rat_logger::info;

// 条件编译调试宏 - 只有在 debug 模式下才输出调试信息
#[cfg(debug_assertions)]
#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        rat_logger::debug!($($arg)*);
    };
}

#[cfg(not(debug_assertions))]
#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        // 在 release 模式下不输出调试信息
    };
}

/// 初始化rat_querycache库
///
/// 注意：日志系统由调用者自行初始化，本库不会自动初始化日志，
/// 需要时可以调用 [`init_logging`]
pub fn init() {
    info!("{} 已加载", get_info());
}

/// 库版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 库名称
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// 获取库信息
pub fn get_info() -> String {
    format!("{} v{}", NAME, VERSION)
}
