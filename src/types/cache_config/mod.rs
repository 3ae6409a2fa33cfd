use crate::error::QueryCacheResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 支持的缓存后端类型名
pub const BACKEND_TYPES: [&str; 2] = ["memory", "file"];

/// 缓存后端配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// 进程内存后端
    Memory {
        /// 最大条目数，0 表示不限制
        #[serde(default)]
        max_entries: usize,
    },
    /// rat_memcache 分层后端：L1 内存 + 可选 L2 磁盘
    File {
        /// L1 缓存配置
        l1_config: L1CacheConfig,
        /// L2 缓存配置（可选）
        #[serde(default)]
        l2_config: Option<L2CacheConfig>,
        /// TTL 配置
        ttl_config: TtlConfig,
    },
}

/// L1 缓存配置（内存缓存）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct L1CacheConfig {
    /// 最大容量（条目数）
    pub max_capacity: usize,
    /// 最大内存使用（MB）
    pub max_memory_mb: usize,
}

/// L2 缓存配置（磁盘缓存）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct L2CacheConfig {
    /// 存储路径
    pub storage_path: String,
    /// 最大磁盘使用（MB）
    pub max_disk_mb: usize,
    /// 压缩级别
    pub compression_level: i32,
    /// 是否启用 LZ4 压缩
    pub enable_compression: bool,
    /// 启动时清空缓存目录
    pub clear_on_startup: bool,
}

/// TTL 配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtlConfig {
    /// 过期清理间隔（秒）
    pub check_interval_secs: u64,
}

impl BackendConfig {
    /// 后端类型名
    pub fn type_name(&self) -> &'static str {
        match self {
            BackendConfig::Memory { .. } => "memory",
            BackendConfig::File { .. } => "file",
        }
    }

    /// 规范化的实例标识：`类型?k1=v1&k2=v2`，键有序
    ///
    /// 工厂以此区分不同的连接配置
    pub fn instance_id(&self) -> String {
        let mut options = BTreeMap::new();
        match self {
            BackendConfig::Memory { max_entries } => {
                options.insert("max_entries", max_entries.to_string());
            }
            BackendConfig::File {
                l1_config,
                l2_config,
                ttl_config,
            } => {
                options.insert("max_capacity", l1_config.max_capacity.to_string());
                options.insert("max_memory_mb", l1_config.max_memory_mb.to_string());
                options.insert("check_interval_secs", ttl_config.check_interval_secs.to_string());
                if let Some(l2) = l2_config {
                    options.insert("storage_path", l2.storage_path.clone());
                    options.insert("max_disk_mb", l2.max_disk_mb.to_string());
                    options.insert("compression_level", l2.compression_level.to_string());
                    options.insert("enable_compression", l2.enable_compression.to_string());
                    options.insert("clear_on_startup", l2.clear_on_startup.to_string());
                }
            }
        }

        let query = options
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{}", self.type_name(), query)
    }

    /// 由后端类型名和字符串选项构造配置
    ///
    /// 未知类型直接返回配置错误；缺省选项使用保守的默认值
    pub fn from_options(
        cache_type: &str,
        options: &BTreeMap<String, String>,
    ) -> QueryCacheResult<Self> {
        match cache_type.to_lowercase().as_str() {
            "memory" => Ok(BackendConfig::Memory {
                max_entries: parse_option(options, "max_entries", 0)?,
            }),
            "file" => {
                let l2_config = match options.get("storage_path") {
                    Some(path) => Some(L2CacheConfig {
                        storage_path: path.clone(),
                        max_disk_mb: parse_option(options, "max_disk_mb", 500)?,
                        compression_level: parse_option(options, "compression_level", 6)?,
                        enable_compression: parse_option(options, "enable_compression", true)?,
                        clear_on_startup: parse_option(options, "clear_on_startup", false)?,
                    }),
                    None => None,
                };
                Ok(BackendConfig::File {
                    l1_config: L1CacheConfig {
                        max_capacity: parse_option(options, "max_capacity", 10_000)?,
                        max_memory_mb: parse_option(options, "max_memory_mb", 64)?,
                    },
                    l2_config,
                    ttl_config: TtlConfig {
                        check_interval_secs: parse_option(options, "check_interval_secs", 60)?,
                    },
                })
            }
            other => Err(crate::querycache_error!(
                config,
                format!(
                    "未知的缓存类型 `{}`，可选值为 [{}]",
                    other,
                    BACKEND_TYPES.join(", ")
                )
            )),
        }
    }
}

fn parse_option<T: std::str::FromStr>(
    options: &BTreeMap<String, String>,
    name: &str,
    default: T,
) -> QueryCacheResult<T> {
    match options.get(name) {
        Some(raw) => raw.parse::<T>().map_err(|_| {
            crate::querycache_error!(config, format!("缓存选项 {} 的值无效: {}", name, raw))
        }),
        None => Ok(default),
    }
}
