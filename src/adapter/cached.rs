//! 带查询缓存的记录存储
//!
//! 在记录存储之上实现读路径缓存与写路径失效：读取先查缓存，未命中再执行查询并回填；
//! 写入前按模型的全部条件模板推导 where 子句并丢弃相关缓存，然后才执行真正的写操作

use super::RecordStore;
use crate::cache::{
    CacheBackend, CacheManager, CachePerformanceStats, CacheStats, ConditionRegistry,
    global_backend_factory,
};
use crate::config::QueryCacheConfig;
use crate::error::QueryCacheResult;
use crate::model::{CacheableModel, ModelMeta};
use crate::types::{DataValue, Query, WhereClause};
use rat_logger::{debug, info, warn};
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

/// 带缓存功能的记录存储包装器
pub struct CachedRecordStore<M, S> {
    /// 内部真实的记录存储
    inner: S,
    backend: Arc<dyn CacheBackend>,
    registry: Arc<ConditionRegistry>,
    meta: ModelMeta,
    bypass_ordered: bool,
    stats: CachePerformanceStats,
    _model: PhantomData<fn() -> M>,
}

impl<M, S> CachedRecordStore<M, S>
where
    M: CacheableModel,
    S: RecordStore<M>,
{
    /// 创建缓存记录存储
    ///
    /// 模型没有声明缓存条件时返回配置错误
    pub fn new(inner: S, backend: Arc<dyn CacheBackend>) -> QueryCacheResult<Self> {
        let meta = M::meta();
        let registry = ConditionRegistry::from_meta(&meta)?;
        info!(
            "启用查询缓存: 模型={}, 模板数={}, 后端={}",
            meta.model_name,
            registry.templates().len(),
            backend.name()
        );
        Ok(Self {
            inner,
            backend,
            registry: Arc::new(registry),
            meta,
            bypass_ordered: false,
            stats: CachePerformanceStats::new(),
            _model: PhantomData,
        })
    }

    /// 按配置从全局后端工厂获取后端并创建
    ///
    /// 配置中的日志项不在这里生效，见 [`QueryCacheConfig::init_logging`]
    pub async fn from_config(inner: S, config: &QueryCacheConfig) -> QueryCacheResult<Self> {
        let backend = global_backend_factory().get_or_create(&config.backend).await?;
        Ok(Self::new(inner, backend)?.bypass_ordered(config.bypass_ordered_queries))
    }

    /// 带排序或分页的查询是否绕过缓存
    pub fn bypass_ordered(mut self, bypass: bool) -> Self {
        self.bypass_ordered = bypass;
        self
    }

    /// 内部记录存储
    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    pub fn registry(&self) -> &ConditionRegistry {
        &self.registry
    }

    /// 打开一个缓存管理器作用域
    pub fn scope(&self) -> CacheManager {
        CacheManager::new(
            self.meta.model_name.clone(),
            self.backend.clone(),
            self.registry.clone(),
        )
        .bypass_ordered(self.bypass_ordered)
    }

    /// 创建惰性求值的查询句柄
    pub fn query(&self, query: Query) -> CachedQuery<'_, M, S> {
        CachedQuery {
            owner: self,
            query,
            resolved: None,
        }
    }

    /// 执行查询 - 先检查缓存，缓存未命中时查询记录存储并缓存结果
    pub async fn fetch(&self, query: &Query) -> QueryCacheResult<Vec<M>> {
        let mut manager = self.scope();

        match manager.get_records::<M>(query).await {
            Ok(Some(records)) => {
                self.stats.record_hit();
                return Ok(records);
            }
            Ok(None) => self.stats.record_miss(),
            Err(e) => {
                warn!("读取查询缓存失败，回退到记录存储: {}", e);
                self.stats.record_fallback();
            }
        }

        let records = self.inner.execute(query).await?;
        info!("从记录存储加载 {}: {} 条", self.meta.model_name, records.len());

        if let Err(e) = manager.add_records(query, &records) {
            warn!("缓存查询结果失败，本次结果不缓存: {}", e);
        }
        match manager.finish().await {
            Ok(written) => self.stats.record_writes(written as u64),
            Err(e) => {
                warn!("写入查询缓存失败: {}", e);
                self.stats.record_fallback();
            }
        }

        Ok(records)
    }

    /// 按实例在每个条件模板下的 where 子句
    fn derived_clauses(&self, instances: &[&M]) -> Vec<WhereClause> {
        let mut clauses: Vec<WhereClause> = Vec::new();
        for instance in instances {
            for template in self.registry.templates() {
                let clause = template.where_for(*instance);
                if !clauses.iter().any(|c| c.same_as(&clause)) {
                    clauses.push(clause);
                }
            }
        }
        clauses
    }

    async fn invalidate(&self, instances: &[&M]) -> bool {
        let clauses = self.derived_clauses(instances);
        let mut manager = self.scope();
        let outcome = manager.discard_where(&clauses).await;
        if let Err(e) = manager.finish().await {
            warn!("结束缓存作用域失败: {}", e);
        }

        match outcome {
            Some(discarded) => {
                self.stats.record_invalidations(discarded.len() as u64);
                debug!("{} 失效缓存 {} 条", self.meta.model_name, discarded.len());
                true
            }
            None => {
                self.stats.record_invalidation_failure();
                false
            }
        }
    }

    /// 失效与实例当前字段值相关的全部缓存，失败时返回 `false`
    pub async fn invalidate_for(&self, instance: &M) -> bool {
        self.invalidate(&[instance]).await
    }

    /// 插入记录，写入前失效相关缓存
    pub async fn insert(&self, record: &M) -> QueryCacheResult<()> {
        if !self.invalidate_for(record).await {
            warn!("{} 插入前失效缓存失败，继续写入", self.meta.model_name);
        }
        self.inner.insert(record).await
    }

    /// 更新记录，写入前按新值失效相关缓存
    pub async fn update(&self, record: &M) -> QueryCacheResult<bool> {
        if !self.invalidate_for(record).await {
            warn!("{} 更新前失效缓存失败，继续写入", self.meta.model_name);
        }
        self.inner.update(record).await
    }

    /// 更新记录，同时按旧值与新值失效相关缓存
    ///
    /// 依赖旧字段值的结果集在更新后同样过期
    pub async fn update_from(&self, previous: &M, current: &M) -> QueryCacheResult<bool> {
        if !self.invalidate(&[previous, current]).await {
            warn!("{} 更新前失效缓存失败，继续写入", self.meta.model_name);
        }
        self.inner.update(current).await
    }

    /// 删除记录，删除前失效相关缓存
    pub async fn delete(&self, record: &M) -> QueryCacheResult<bool> {
        if !self.invalidate_for(record).await {
            warn!("{} 删除前失效缓存失败，继续删除", self.meta.model_name);
        }
        self.inner.delete(record).await
    }

    /// 批量预热
    ///
    /// 执行一次全表查询，按每个单字段等值模板的字段值分组，每个值缓存一份结果。
    /// 复合模板不做预热。返回写入的条目数
    pub async fn warm_all(&self) -> QueryCacheResult<usize> {
        let base = M::query();
        let records = self.inner.execute(&base).await?;
        let mut manager = self.scope();

        for field in self.registry.single_field_keys() {
            let mut partitions: BTreeMap<String, (DataValue, Vec<M>)> = BTreeMap::new();
            for record in &records {
                let value = record.field_value(field).unwrap_or(DataValue::Null);
                if value.is_null() {
                    continue;
                }
                let bucket = serde_json::to_string(&value)?;
                partitions
                    .entry(bucket)
                    .or_insert_with(|| (value, Vec::new()))
                    .1
                    .push(record.clone());
            }

            for (value, group) in partitions.into_values() {
                let query = base.clone().filter(field, value);
                if let Err(e) = manager.add_records(&query, &group) {
                    warn!("预热缓存失败: {}.{} - {}", self.meta.model_name, field, e);
                }
            }
        }

        let written = manager.finish().await?;
        self.stats.record_writes(written as u64);
        info!("{} 预热缓存完成: {} 条", self.meta.model_name, written);
        Ok(written)
    }

    /// 清空模型的全部缓存
    pub async fn clear_all(&self) -> bool {
        let mut manager = self.scope();
        let cleared = manager.clear().await;
        if let Err(e) = manager.finish().await {
            warn!("结束缓存作用域失败: {}", e);
        }
        cleared
    }

    /// 缓存统计
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }
}

/// 惰性求值的查询句柄，首次解析后结果保存在句柄内
pub struct CachedQuery<'a, M, S> {
    owner: &'a CachedRecordStore<M, S>,
    query: Query,
    resolved: Option<Vec<M>>,
}

impl<'a, M, S> CachedQuery<'a, M, S>
where
    M: CacheableModel,
    S: RecordStore<M>,
{
    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.is_some()
    }

    /// 解析结果，已解析时直接返回
    pub async fn all(&mut self) -> QueryCacheResult<&[M]> {
        if self.resolved.is_none() {
            let records = self.owner.fetch(&self.query).await?;
            self.resolved = Some(records);
        }
        Ok(self.resolved.as_deref().unwrap_or_default())
    }

    /// 第一条记录
    pub async fn first(&mut self) -> QueryCacheResult<Option<&M>> {
        Ok(self.all().await?.first())
    }

    /// 记录数
    pub async fn count(&mut self) -> QueryCacheResult<usize> {
        Ok(self.all().await?.len())
    }

    /// 取出结果
    pub async fn into_records(mut self) -> QueryCacheResult<Vec<M>> {
        self.all().await?;
        Ok(self.resolved.take().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryRecordStore;
    use crate::cache::MemoryBackend;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Page {
        id: i64,
        book: String,
    }

    impl CacheableModel for Page {
        fn meta() -> ModelMeta {
            ModelMeta::new("Page", "id")
                .fields(["id", "book"])
                .cache_condition("book", Some(60))
        }

        fn field_value(&self, name: &str) -> Option<DataValue> {
            match name {
                "id" => Some(self.id.into()),
                "book" => Some(self.book.clone().into()),
                _ => None,
            }
        }
    }

    /// 记录执行次数的存储
    struct CountingStore {
        inner: MemoryRecordStore<Page>,
        executions: AtomicUsize,
    }

    #[async_trait]
    impl RecordStore<Page> for CountingStore {
        async fn execute(&self, query: &Query) -> QueryCacheResult<Vec<Page>> {
            self.executions.fetch_add(1, Ordering::SeqCst);
            self.inner.execute(query).await
        }

        async fn insert(&self, record: &Page) -> QueryCacheResult<()> {
            self.inner.insert(record).await
        }

        async fn update(&self, record: &Page) -> QueryCacheResult<bool> {
            self.inner.update(record).await
        }

        async fn delete(&self, record: &Page) -> QueryCacheResult<bool> {
            self.inner.delete(record).await
        }
    }

    fn cached() -> CachedRecordStore<Page, CountingStore> {
        let store = CountingStore {
            inner: MemoryRecordStore::with_records(vec![
                Page { id: 1, book: "a".into() },
                Page { id: 2, book: "b".into() },
            ]),
            executions: AtomicUsize::new(0),
        };
        CachedRecordStore::new(store, Arc::new(MemoryBackend::new(0))).unwrap()
    }

    #[tokio::test]
    async fn test_query_handle_resolves_once() {
        let store = cached();
        let mut handle = store.query(Page::query().filter("book", "a"));
        assert!(!handle.is_resolved());
        assert_eq!(handle.count().await.unwrap(), 1);
        assert_eq!(handle.first().await.unwrap().map(|p| p.id), Some(1));
        assert!(handle.is_resolved());
        assert_eq!(store.inner().executions.load(Ordering::SeqCst), 1);

        // 新句柄命中缓存
        let records = store
            .query(Page::query().filter("book", "a"))
            .into_records()
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(store.inner().executions.load(Ordering::SeqCst), 1);
        assert_eq!(store.stats().hits, 1);
        assert_eq!(store.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_model_without_conditions_is_config_error() {
        #[derive(Debug, Clone, Serialize, Deserialize)]
        struct Bare {
            id: i64,
        }

        impl CacheableModel for Bare {
            fn meta() -> ModelMeta {
                ModelMeta::new("Bare", "id").fields(["id"])
            }

            fn field_value(&self, name: &str) -> Option<DataValue> {
                (name == "id").then(|| self.id.into())
            }
        }

        let result = CachedRecordStore::<Bare, MemoryRecordStore<Bare>>::new(
            MemoryRecordStore::new(),
            Arc::new(MemoryBackend::new(0)),
        );
        assert!(matches!(
            result.err(),
            Some(crate::QueryCacheError::ConfigError { .. })
        ));
    }
}
