//! 记录存储适配器模块
//!
//! 查询缓存只通过 `RecordStore` 访问底层存储：执行查询、插入、更新和删除。
//! `CachedRecordStore` 在此接口之上实现读缓存与写失效

use crate::error::QueryCacheResult;
use crate::model::CacheableModel;
use crate::types::Query;
use async_trait::async_trait;

mod cached;
mod memory;

pub use cached::{CachedQuery, CachedRecordStore};
pub use memory::MemoryRecordStore;

/// 记录存储 trait，定义缓存层依赖的最小操作集合
#[async_trait]
pub trait RecordStore<M: CacheableModel>: Send + Sync {
    /// 执行查询，返回有序的记录列表
    async fn execute(&self, query: &Query) -> QueryCacheResult<Vec<M>>;

    /// 插入记录
    async fn insert(&self, record: &M) -> QueryCacheResult<()>;

    /// 按主键更新记录，返回记录是否存在
    async fn update(&self, record: &M) -> QueryCacheResult<bool>;

    /// 按主键删除记录，返回记录是否存在
    async fn delete(&self, record: &M) -> QueryCacheResult<bool>;
}
