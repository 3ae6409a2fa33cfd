//! 缓存后端适配层
//!
//! 查询缓存只依赖最小的键值接口：读取、带过期写入、删除、批量删除和存在性检查。
//! 值对缓存层是不透明的字节串

mod memory;
mod memcache;

pub use memcache::MemCacheBackend;
pub use memory::MemoryBackend;

use crate::error::QueryCacheResult;
use async_trait::async_trait;
use bytes::Bytes;

/// 键值缓存后端
///
/// `ttl_secs == 0` 表示永不过期
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// 后端名称，用于日志
    fn name(&self) -> &str;

    /// 读取值
    async fn get(&self, key: &str) -> QueryCacheResult<Option<Bytes>>;

    /// 写入值
    async fn set(&self, key: &str, value: Bytes, ttl_secs: u64) -> QueryCacheResult<()>;

    /// 删除值，返回键是否存在
    async fn delete(&self, key: &str) -> QueryCacheResult<bool>;

    /// 批量删除，返回实际删除的数量
    async fn delete_many(&self, keys: &[String]) -> QueryCacheResult<usize> {
        let results = futures::future::join_all(keys.iter().map(|key| self.delete(key))).await;
        let mut deleted = 0;
        for result in results {
            if result? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// 键是否存在
    async fn has(&self, key: &str) -> QueryCacheResult<bool> {
        Ok(self.get(key).await?.is_some())
    }
}
