//! 查询缓存的通用数据类型
//!
//! 定义条件值、结构化查询以及缓存后端配置

pub mod data_value;
pub mod query;
pub mod cache_config;

// 重新导出所有公共类型
pub use data_value::DataValue;
pub use query::{ConditionKey, Pagination, Query, QueryOperator, WhereClause, OPERATOR_SEPARATOR};
pub use cache_config::{BackendConfig, L1CacheConfig, L2CacheConfig, TtlConfig, BACKEND_TYPES};
