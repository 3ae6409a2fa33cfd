//! 错误类型定义
//!
//! 查询缓存层统一使用 `QueryCacheError`，按照配置、序列化、缓存后端、
//! 记录存储和校验几类划分，便于调用方决定是否降级处理

use thiserror::Error;

/// 查询缓存错误
#[derive(Error, Debug)]
pub enum QueryCacheError {
    /// 配置错误（未知的后端类型、缺失条件注册表等），不可重试
    #[error("配置错误: {message}")]
    ConfigError { message: String },

    /// 查询或记录无法转换为缓存值
    #[error("数据序列化失败: {message}")]
    SerializationError { message: String },

    /// 缓存后端不可用或操作失败
    #[error("缓存操作失败: {message}")]
    CacheError { message: String },

    /// 底层记录存储执行失败
    #[error("查询执行失败: {message}")]
    QueryError { message: String },

    /// 输入校验失败
    #[error("校验失败: {field} - {message}")]
    ValidationError { field: String, message: String },

    /// IO 错误
    #[error("IO错误: {0}")]
    IoError(#[from] std::io::Error),

    /// 其他错误
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// 查询缓存结果类型
pub type QueryCacheResult<T> = Result<T, QueryCacheError>;

impl From<serde_json::Error> for QueryCacheError {
    fn from(err: serde_json::Error) -> Self {
        QueryCacheError::SerializationError {
            message: err.to_string(),
        }
    }
}

impl QueryCacheError {
    /// 是否为序列化错误
    pub fn is_serialization(&self) -> bool {
        matches!(self, QueryCacheError::SerializationError { .. })
    }

    /// 是否为缓存后端错误
    pub fn is_cache(&self) -> bool {
        matches!(self, QueryCacheError::CacheError { .. })
    }
}

/// 快速构造错误
///
/// ```ignore
/// querycache_error!(config, "未知的缓存类型");
/// querycache_error!(validation, "limit", "分页数量不能为零");
/// ```
#[macro_export]
macro_rules! querycache_error {
    (config, $msg:expr) => {
        $crate::error::QueryCacheError::ConfigError {
            message: ($msg).to_string(),
        }
    };
    (serialization, $msg:expr) => {
        $crate::error::QueryCacheError::SerializationError {
            message: ($msg).to_string(),
        }
    };
    (cache, $msg:expr) => {
        $crate::error::QueryCacheError::CacheError {
            message: ($msg).to_string(),
        }
    };
    (query, $msg:expr) => {
        $crate::error::QueryCacheError::QueryError {
            message: ($msg).to_string(),
        }
    };
    (validation, $field:expr, $msg:expr) => {
        $crate::error::QueryCacheError::ValidationError {
            field: ($field).to_string(),
            message: ($msg).to_string(),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_macro_variants() {
        let err = crate::querycache_error!(config, "未知的缓存类型");
        assert!(matches!(err, QueryCacheError::ConfigError { .. }));
        assert_eq!(err.to_string(), "配置错误: 未知的缓存类型");

        let err = crate::querycache_error!(validation, "limit", format!("非法值: {}", 0));
        assert_eq!(err.to_string(), "校验失败: limit - 非法值: 0");
    }

    #[test]
    fn test_serde_json_error_maps_to_serialization() {
        let err: QueryCacheError = serde_json::from_str::<u32>("not-a-number").unwrap_err().into();
        assert!(err.is_serialization());
        assert!(!err.is_cache());
    }
}
