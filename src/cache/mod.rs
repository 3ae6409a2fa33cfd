//! 缓存管理模块
//!
//! 查询结果缓存与按条件失效：键生成、条件注册表、追踪器、
//! 作用域缓存管理器以及可替换的键值后端。

// 导出所有子模块
pub mod backend;
pub mod cache_manager;
pub mod conditions;
pub mod factory;
pub mod key_generator;
pub mod stats;
pub mod tracker;

// 重新导出主要的公共类型和结构体
pub use backend::{CacheBackend, MemCacheBackend, MemoryBackend};
pub use cache_manager::{CacheManager, Eligibility};
pub use conditions::{ConditionRegistry, ConditionTemplate};
pub use factory::{BackendFactory, global_backend_factory};
pub use key_generator::{cache_key, canonical_where, fingerprint, template_key, tracker_key};
pub use stats::{CachePerformanceStats, CacheStats};
pub use tracker::{MatchStrategy, QueryTracker};
