//! 缓存管理器
//!
//! 一个 `CacheManager` 对应一次“读取后回填”或“失效后写入”的工作单元：
//! 读取时只返回仍被追踪器记录的值，新增的结果先缓冲在内存中，
//! 调用 [`CacheManager::finish`] 时才与追踪器一起写入后端

use super::backend::CacheBackend;
use super::conditions::ConditionRegistry;
use super::key_generator::{cache_key, template_key};
use super::tracker::{MatchStrategy, QueryTracker};
use crate::error::QueryCacheResult;
use crate::types::{Query, WhereClause};
use bytes::Bytes;
use rat_logger::{debug, error, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// 待写入的缓存条目
#[derive(Debug, Clone)]
struct PendingEntry {
    where_clause: WhereClause,
    value: Bytes,
    ttl_secs: u64,
}

/// 可缓存查询的解析结果
#[derive(Debug, Clone, PartialEq)]
pub struct Eligibility {
    /// 缓存键
    pub cache_key: String,
    /// 缓存时长（秒）
    pub ttl_secs: u64,
}

/// 缓存管理器作用域
pub struct CacheManager {
    model_name: String,
    backend: Arc<dyn CacheBackend>,
    registry: Arc<ConditionRegistry>,
    bypass_ordered: bool,
    pending: HashMap<String, PendingEntry>,
    finished: bool,
}

impl CacheManager {
    /// 为模型打开一个作用域
    pub fn new(
        model_name: impl Into<String>,
        backend: Arc<dyn CacheBackend>,
        registry: Arc<ConditionRegistry>,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            backend,
            registry,
            bypass_ordered: false,
            pending: HashMap::new(),
            finished: false,
        }
    }

    /// 带排序或分页的查询是否绕过缓存
    pub fn bypass_ordered(mut self, bypass: bool) -> Self {
        self.bypass_ordered = bypass;
        self
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// 判断查询是否可缓存
    ///
    /// where 子句的模板没有配置 TTL 时返回 `None`
    pub fn eligibility(&self, query: &Query) -> QueryCacheResult<Option<Eligibility>> {
        if self.bypass_ordered && query.is_ordered_or_limited() {
            return Ok(None);
        }
        let template = template_key(query.where_clause());
        let Some(ttl_secs) = self.registry.lookup_ttl(&template) else {
            crate::debug_log!("模板 {} 未配置缓存，跳过: {}", template, self.model_name);
            return Ok(None);
        };
        if let Some((key, _)) = query.where_clause().iter().find(|(_, v)| !v.is_finite()) {
            return Err(crate::querycache_error!(
                serialization,
                format!("条件 {} 含有非有限浮点数，无法缓存: {}", key, self.model_name)
            ));
        }
        Ok(Some(Eligibility {
            cache_key: cache_key(&self.model_name, query)?,
            ttl_secs,
        }))
    }

    /// 缓存键是否仍在追踪器中
    ///
    /// 未被追踪的值无法被失效，读取时一律视为不存在
    async fn is_tracked(&self, cache_key: &str) -> QueryCacheResult<bool> {
        let mut tracker = QueryTracker::open(&self.model_name, self.backend.clone()).await;
        let tracked = tracker.get(cache_key).await?.is_some();
        tracker.finish().await?;
        if !tracked {
            debug!("缓存键未被追踪，按未命中处理: {}", cache_key);
        }
        Ok(tracked)
    }

    /// 读取缓存值，不可缓存的查询始终未命中
    ///
    /// 本作用域内尚未写入的缓冲值同样可见
    pub async fn get(&self, query: &Query) -> QueryCacheResult<Option<Bytes>> {
        let Some(eligibility) = self.eligibility(query)? else {
            return Ok(None);
        };
        if let Some(entry) = self.pending.get(&eligibility.cache_key) {
            return Ok(Some(entry.value.clone()));
        }
        if !self.is_tracked(&eligibility.cache_key).await? {
            return Ok(None);
        }
        let value = self.backend.get(&eligibility.cache_key).await?;
        debug!(
            "缓存{}: {}",
            if value.is_some() { "命中" } else { "未命中" },
            eligibility.cache_key
        );
        Ok(value)
    }

    /// 读取并反序列化缓存的记录列表
    pub async fn get_records<T: DeserializeOwned>(
        &self,
        query: &Query,
    ) -> QueryCacheResult<Option<Vec<T>>> {
        match self.get(query).await? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    /// 缓存中是否存在该查询的结果
    pub async fn has(&self, query: &Query) -> QueryCacheResult<bool> {
        let Some(eligibility) = self.eligibility(query)? else {
            return Ok(false);
        };
        if self.pending.contains_key(&eligibility.cache_key) {
            return Ok(true);
        }
        if !self.is_tracked(&eligibility.cache_key).await? {
            return Ok(false);
        }
        self.backend.has(&eligibility.cache_key).await
    }

    /// 缓冲一个查询结果，返回是否被接受
    ///
    /// 不可缓存的查询直接忽略
    pub fn add(&mut self, query: &Query, value: Bytes) -> QueryCacheResult<bool> {
        let Some(eligibility) = self.eligibility(query)? else {
            return Ok(false);
        };
        self.pending.insert(
            eligibility.cache_key,
            PendingEntry {
                where_clause: query.where_clause().clone(),
                value,
                ttl_secs: eligibility.ttl_secs,
            },
        );
        Ok(true)
    }

    /// 序列化记录列表后缓冲
    pub fn add_records<T: Serialize>(&mut self, query: &Query, records: &[T]) -> QueryCacheResult<bool> {
        if self.eligibility(query)?.is_none() {
            return Ok(false);
        }
        let raw = serde_json::to_vec(records)?;
        self.add(query, Bytes::from(raw))
    }

    /// 按查询的 where 子句失效缓存，任一失败返回 `false`
    pub async fn remove(&mut self, queries: &[Query]) -> bool {
        let clauses: Vec<WhereClause> = queries.iter().map(|q| q.where_clause().clone()).collect();
        self.discard_where(&clauses).await.is_some()
    }

    /// 按 where 子句失效缓存，返回被丢弃的缓存键
    ///
    /// 所有子句在同一个追踪器作用域内处理；任一子句失败时返回 `None`，
    /// 其余子句照常处理
    pub async fn discard_where(&mut self, clauses: &[WhereClause]) -> Option<BTreeSet<String>> {
        // 本作用域中尚未写入的缓冲同样需要丢弃
        self.pending.retain(|key, entry| {
            let stale = clauses
                .iter()
                .any(|clause| MatchStrategy::classify(clause).matches(clause, &entry.where_clause));
            if stale {
                debug!("丢弃未写入的缓冲: {}", key);
            }
            !stale
        });

        let mut tracker = QueryTracker::open(&self.model_name, self.backend.clone()).await;
        let mut discarded = BTreeSet::new();
        let mut failed = false;
        for clause in clauses {
            match tracker.discard(clause).await {
                Some(keys) => discarded.extend(keys),
                None => failed = true,
            }
        }
        if let Err(e) = tracker.finish().await {
            error!("同步追踪器失败: {} - {}", self.model_name, e);
            failed = true;
        }

        if failed { None } else { Some(discarded) }
    }

    /// 清空模型的全部缓存
    pub async fn clear(&mut self) -> bool {
        self.pending.clear();
        let mut tracker = QueryTracker::open(&self.model_name, self.backend.clone()).await;
        let mut cleared = tracker.discard_all().await;
        if let Err(e) = tracker.finish().await {
            error!("同步追踪器失败: {} - {}", self.model_name, e);
            cleared = false;
        }
        cleared
    }

    /// 待写入的条目数
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// 结束作用域，把缓冲写入后端
    ///
    /// 先追踪并写回追踪器，再写入缓存值，整个过程持有模型的追踪器锁。
    /// 没有缓冲时不触碰后端。返回写入的条目数
    pub async fn finish(mut self) -> QueryCacheResult<usize> {
        self.finished = true;
        let pending = std::mem::take(&mut self.pending);
        if pending.is_empty() {
            return Ok(0);
        }

        let mut tracker = QueryTracker::open(&self.model_name, self.backend.clone()).await;
        for (key, entry) in &pending {
            tracker.track(key.clone(), entry.where_clause.clone()).await?;
        }
        tracker.sync().await?;

        let written = pending.len();
        for (key, entry) in pending {
            self.backend.set(&key, entry.value, entry.ttl_secs).await?;
        }
        tracker.finish().await?;

        debug!("{} 写入缓存 {} 条", self.model_name, written);
        Ok(written)
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        if !self.finished && !self.pending.is_empty() {
            warn!(
                "缓存管理器 {} 未调用 finish 即被释放，丢弃 {} 条缓冲",
                self.model_name,
                self.pending.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::MemoryBackend;
    use crate::cache::key_generator::tracker_key;
    use crate::model::ModelMeta;

    fn registry(model: &str) -> Arc<ConditionRegistry> {
        let meta = ModelMeta::new(model, "id")
            .fields(["id", "name"])
            .cache_condition("*", Some(60))
            .cache_condition("id", Some(60))
            .cache_condition("id__gt", Some(60))
            .cache_condition("name", None);
        Arc::new(ConditionRegistry::from_meta(&meta).unwrap())
    }

    fn scope(model: &str, backend: &Arc<dyn CacheBackend>) -> CacheManager {
        CacheManager::new(model, backend.clone(), registry(model))
    }

    #[tokio::test]
    async fn test_round_trip_across_scopes() {
        let backend: Arc<dyn CacheBackend> = Arc::new(MemoryBackend::new(0));
        let query = Query::new().select(["id", "name"]).filter("id", 5);

        let mut manager = scope("RoundTrip", &backend);
        assert_eq!(manager.get(&query).await.unwrap(), None);
        assert!(manager.add_records(&query, &["row-5"]).unwrap());
        // 同一作用域内可见
        assert!(manager.has(&query).await.unwrap());
        assert_eq!(manager.finish().await.unwrap(), 1);

        let manager = scope("RoundTrip", &backend);
        let rows: Vec<String> = manager.get_records(&query).await.unwrap().unwrap();
        assert_eq!(rows, vec!["row-5".to_string()]);
        assert!(backend.has(&tracker_key("RoundTrip")).await.unwrap());
        manager.finish().await.unwrap();
    }

    #[tokio::test]
    async fn test_template_without_ttl_is_never_cached() {
        let backend: Arc<dyn CacheBackend> = Arc::new(MemoryBackend::new(0));
        let query = Query::new().filter("name", "x");

        let mut manager = scope("NoTtl", &backend);
        assert!(!manager.add(&query, Bytes::from_static(b"[]")).unwrap());
        assert_eq!(manager.finish().await.unwrap(), 0);

        let manager = scope("NoTtl", &backend);
        assert_eq!(manager.get(&query).await.unwrap(), None);
        assert!(!manager.has(&query).await.unwrap());
        // 未声明的模板同样不缓存
        assert_eq!(manager.eligibility(&Query::new().filter("other", 1)).unwrap(), None);
        manager.finish().await.unwrap();
        assert!(!backend.has(&tracker_key("NoTtl")).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_discards_matching_entries() {
        let backend: Arc<dyn CacheBackend> = Arc::new(MemoryBackend::new(0));
        let five = Query::new().filter("id", 5);
        let six = Query::new().filter("id", 6);

        let mut manager = scope("Removal", &backend);
        manager.add(&five, Bytes::from_static(b"[5]")).unwrap();
        manager.add(&six, Bytes::from_static(b"[6]")).unwrap();
        manager.finish().await.unwrap();

        let mut manager = scope("Removal", &backend);
        assert!(manager.remove(&[Query::new().filter("id", 5)]).await);
        assert_eq!(manager.get(&five).await.unwrap(), None);
        assert!(manager.get(&six).await.unwrap().is_some());
        manager.finish().await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_drops_pending_entries() {
        let backend: Arc<dyn CacheBackend> = Arc::new(MemoryBackend::new(0));
        let query = Query::new().filter("id", 9);

        let mut manager = scope("PendingRemoval", &backend);
        manager.add(&query, Bytes::from_static(b"[9]")).unwrap();
        let discarded = manager
            .discard_where(&[WhereClause::new().with("id", 9)])
            .await
            .unwrap();
        assert!(discarded.is_empty());
        assert_eq!(manager.pending_len(), 0);
        assert_eq!(manager.finish().await.unwrap(), 0);
        assert!(!backend.has(&tracker_key("PendingRemoval")).await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_removes_everything() {
        let backend: Arc<dyn CacheBackend> = Arc::new(MemoryBackend::new(0));
        let all = Query::new();
        let ranged = Query::new().filter("id__gt", 1);

        let mut manager = scope("Clearing", &backend);
        manager.add(&all, Bytes::from_static(b"[]")).unwrap();
        manager.add(&ranged, Bytes::from_static(b"[]")).unwrap();
        manager.finish().await.unwrap();

        let mut manager = scope("Clearing", &backend);
        assert!(manager.clear().await);
        assert_eq!(manager.get(&all).await.unwrap(), None);
        assert_eq!(manager.get(&ranged).await.unwrap(), None);
        manager.finish().await.unwrap();

        let mut tracker = QueryTracker::open("Clearing", backend.clone()).await;
        assert_eq!(tracker.len().await.unwrap(), 0);
        tracker.finish().await.unwrap();
    }

    #[tokio::test]
    async fn test_bypass_ordered_queries() {
        let backend: Arc<dyn CacheBackend> = Arc::new(MemoryBackend::new(0));
        let ordered = Query::new().filter("id", 1).order_by(["name"], false);

        let manager = scope("Ordered", &backend).bypass_ordered(true);
        assert_eq!(manager.eligibility(&ordered).unwrap(), None);
        assert!(manager.eligibility(&Query::new().filter("id", 1)).unwrap().is_some());
        manager.finish().await.unwrap();

        let manager = scope("Ordered", &backend);
        assert!(manager.eligibility(&ordered).unwrap().is_some());
        manager.finish().await.unwrap();
    }

    #[tokio::test]
    async fn test_untracked_value_reads_as_absent() {
        let backend: Arc<dyn CacheBackend> = Arc::new(MemoryBackend::new(0));
        let query = Query::new().filter("id", 5);

        let mut manager = scope("LostTracker", &backend);
        manager.add(&query, Bytes::from_static(b"[5]")).unwrap();
        manager.finish().await.unwrap();

        // 追踪器丢失后值仍在后端，但已无法被失效
        assert!(backend.delete(&tracker_key("LostTracker")).await.unwrap());
        let cache_key = scope("LostTracker", &backend)
            .eligibility(&query)
            .unwrap()
            .unwrap()
            .cache_key;
        assert!(backend.has(&cache_key).await.unwrap());

        let manager = scope("LostTracker", &backend);
        assert_eq!(manager.get(&query).await.unwrap(), None);
        assert!(!manager.has(&query).await.unwrap());
        manager.finish().await.unwrap();
    }

    #[tokio::test]
    async fn test_non_finite_condition_is_not_cached() {
        let backend: Arc<dyn CacheBackend> = Arc::new(MemoryBackend::new(0));
        let query = Query::new().filter("id", f64::NAN);

        let mut manager = scope("NanCondition", &backend);
        assert!(manager.eligibility(&query).unwrap_err().is_serialization());
        assert!(manager.add(&query, Bytes::from_static(b"[]")).is_err());
        assert!(
            manager
                .add(&Query::new().filter("id", f64::INFINITY), Bytes::from_static(b"[]"))
                .is_err()
        );
        assert!(manager.get(&query).await.is_err());
        assert_eq!(manager.finish().await.unwrap(), 0);
        assert!(!backend.has(&tracker_key("NanCondition")).await.unwrap());
    }

    #[tokio::test]
    async fn test_unfinished_scope_writes_nothing() {
        let backend: Arc<dyn CacheBackend> = Arc::new(MemoryBackend::new(0));
        let query = Query::new().filter("id", 1);
        {
            let mut manager = scope("Dropped", &backend);
            manager.add(&query, Bytes::from_static(b"[1]")).unwrap();
        }
        let manager = scope("Dropped", &backend);
        assert_eq!(manager.get(&query).await.unwrap(), None);
        manager.finish().await.unwrap();
    }
}
