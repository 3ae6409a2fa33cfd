//! 查询追踪器
//!
//! 每个模型在后端保存一份 `缓存键 -> where 子句` 的映射，
//! 写操作据此判断哪些已缓存的结果集可能过期并立即丢弃

use super::backend::CacheBackend;
use super::key_generator::tracker_key;
use crate::error::QueryCacheResult;
use crate::types::{ConditionKey, WhereClause};
use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use rat_logger::{debug, error, warn};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// 进程内按追踪器键串行化读改写
static TRACKER_LOCKS: Lazy<DashMap<String, Arc<Mutex<()>>>> = Lazy::new(DashMap::new);

/// 失效匹配策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    /// 纯等值条件，只丢弃条件完全相同的条目
    Exact,
    /// 含比较操作符或不确定的值，保守丢弃
    Contained,
}

impl MatchStrategy {
    /// 根据实例推导出的 where 子句选择策略
    pub fn classify(where_clause: &WhereClause) -> Self {
        let exact = where_clause
            .conditions()
            .all(|(key, value)| !key.is_comparison() && !value.is_null());
        if exact {
            MatchStrategy::Exact
        } else {
            MatchStrategy::Contained
        }
    }

    /// 已追踪的条件是否需要丢弃
    pub fn matches(&self, derived: &WhereClause, stored: &WhereClause) -> bool {
        match self {
            MatchStrategy::Exact => stored.same_as(derived),
            MatchStrategy::Contained => derived.iter().any(|(key, value)| {
                // 比较条件无法用单个实例判断范围，只要出现就丢弃
                if ConditionKey::parse(key).is_comparison() && stored.contains_key(key) {
                    return true;
                }
                if value.is_null() {
                    return false;
                }
                stored
                    .get(key)
                    .map(|stored_value| stored_value.same_value(value))
                    .unwrap_or(false)
            }),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            MatchStrategy::Exact => "Exact",
            MatchStrategy::Contained => "Contained",
        }
    }
}

/// 追踪器作用域
///
/// 打开时获取该模型的进程内锁，首次访问时从后端加载映射，
/// 必须调用 [`QueryTracker::finish`] 才会把修改写回后端
pub struct QueryTracker {
    key: String,
    backend: Arc<dyn CacheBackend>,
    entries: HashMap<String, WhereClause>,
    loaded: bool,
    dirty: bool,
    finished: bool,
    _guard: OwnedMutexGuard<()>,
}

impl QueryTracker {
    /// 打开模型的追踪器
    pub async fn open(model_name: &str, backend: Arc<dyn CacheBackend>) -> Self {
        let key = tracker_key(model_name);
        let lock = TRACKER_LOCKS.entry(key.clone()).or_default().clone();
        let guard = lock.lock_owned().await;

        Self {
            key,
            backend,
            entries: HashMap::new(),
            loaded: false,
            dirty: false,
            finished: false,
            _guard: guard,
        }
    }

    /// 追踪器在后端中的键
    pub fn key(&self) -> &str {
        &self.key
    }

    async fn ensure_loaded(&mut self) -> QueryCacheResult<()> {
        if self.loaded {
            return Ok(());
        }
        if let Some(raw) = self.backend.get(&self.key).await? {
            match serde_json::from_slice(&raw) {
                Ok(entries) => self.entries = entries,
                Err(e) => {
                    // 损坏的映射删除后重新开始，原先追踪的值随之按未命中处理
                    error!("追踪器 {} 已损坏，删除后重建: {}", self.key, e);
                    if let Err(delete_err) = self.backend.delete(&self.key).await {
                        error!("删除损坏的追踪器 {} 失败: {}", self.key, delete_err);
                    }
                    return Err(e.into());
                }
            }
            debug!("加载追踪器 {}，共 {} 条", self.key, self.entries.len());
        }
        self.loaded = true;
        Ok(())
    }

    /// 当前追踪的条目数
    pub async fn len(&mut self) -> QueryCacheResult<usize> {
        self.ensure_loaded().await?;
        Ok(self.entries.len())
    }

    /// 查询缓存键对应的 where 子句
    pub async fn get(&mut self, cache_key: &str) -> QueryCacheResult<Option<WhereClause>> {
        self.ensure_loaded().await?;
        Ok(self.entries.get(cache_key).cloned())
    }

    /// 记录缓存键及其 where 子句，已存在则覆盖
    pub async fn track(
        &mut self,
        cache_key: impl Into<String>,
        where_clause: WhereClause,
    ) -> QueryCacheResult<()> {
        self.ensure_loaded().await?;
        self.entries.insert(cache_key.into(), where_clause);
        self.dirty = true;
        Ok(())
    }

    /// 丢弃与实例推导出的 where 子句相关的缓存
    ///
    /// 返回被丢弃的缓存键；扫描或删除出错时记录日志并返回 `None`，
    /// 已经删除的条目不会回滚
    pub async fn discard(&mut self, where_clause: &WhereClause) -> Option<BTreeSet<String>> {
        match self.try_discard(where_clause).await {
            Ok(discarded) => Some(discarded),
            Err(e) => {
                error!("追踪器 {} 失效处理失败: {}", self.key, e);
                None
            }
        }
    }

    async fn try_discard(&mut self, where_clause: &WhereClause) -> QueryCacheResult<BTreeSet<String>> {
        self.ensure_loaded().await?;

        let strategy = MatchStrategy::classify(where_clause);
        let matched: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, stored)| strategy.matches(where_clause, stored))
            .map(|(key, _)| key.clone())
            .collect();

        let mut discarded = BTreeSet::new();
        for cache_key in matched {
            // 先删后端再移出映射，删除失败的条目仍保持追踪
            self.backend.delete(&cache_key).await?;
            self.entries.remove(&cache_key);
            self.dirty = true;
            warn!("[{}] 丢弃缓存: {}", strategy.label(), cache_key);
            discarded.insert(cache_key);
        }
        Ok(discarded)
    }

    /// 删除所有已追踪的缓存并清空映射，失败时返回 `false`
    pub async fn discard_all(&mut self) -> bool {
        match self.try_discard_all().await {
            Ok(count) => {
                warn!("清空追踪器 {}，删除缓存 {} 条", self.key, count);
                true
            }
            Err(e) => {
                error!("清空追踪器 {} 失败: {}", self.key, e);
                false
            }
        }
    }

    async fn try_discard_all(&mut self) -> QueryCacheResult<usize> {
        self.ensure_loaded().await?;
        let keys: Vec<String> = self.entries.keys().cloned().collect();
        let deleted = self.backend.delete_many(&keys).await?;
        self.entries.clear();
        self.dirty = true;
        Ok(deleted)
    }

    /// 把修改写回后端，不结束作用域
    ///
    /// 映射非空时以永不过期写回，为空时删除追踪器键；没有修改则不触碰后端
    pub async fn sync(&mut self) -> QueryCacheResult<()> {
        if !self.dirty {
            return Ok(());
        }
        if self.entries.is_empty() {
            self.backend.delete(&self.key).await?;
            debug!("追踪器 {} 为空，已删除", self.key);
        } else {
            let raw = serde_json::to_vec(&self.entries)?;
            self.backend.set(&self.key, Bytes::from(raw), 0).await?;
            debug!("追踪器 {} 已同步，共 {} 条", self.key, self.entries.len());
        }
        self.dirty = false;
        Ok(())
    }

    /// 结束作用域并释放锁
    pub async fn finish(mut self) -> QueryCacheResult<()> {
        self.finished = true;
        self.sync().await
    }
}

impl Drop for QueryTracker {
    fn drop(&mut self) {
        if self.dirty && !self.finished {
            warn!("追踪器 {} 未调用 finish 即被释放，本次修改未写回", self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::MemoryBackend;
    use crate::types::DataValue;
    use async_trait::async_trait;

    fn memory() -> Arc<dyn CacheBackend> {
        Arc::new(MemoryBackend::new(0))
    }

    async fn seed(backend: &Arc<dyn CacheBackend>, model: &str, entries: &[(&str, WhereClause)]) {
        let mut tracker = QueryTracker::open(model, backend.clone()).await;
        for (key, where_clause) in entries {
            backend.set(key, Bytes::from_static(b"[]"), 60).await.unwrap();
            tracker.track(*key, where_clause.clone()).await.unwrap();
        }
        tracker.finish().await.unwrap();
    }

    #[test]
    fn test_strategy_classification() {
        assert_eq!(
            MatchStrategy::classify(&WhereClause::new().with("id", 5)),
            MatchStrategy::Exact
        );
        assert_eq!(MatchStrategy::classify(&WhereClause::new()), MatchStrategy::Exact);
        assert_eq!(
            MatchStrategy::classify(&WhereClause::new().with("id", DataValue::Null)),
            MatchStrategy::Contained
        );
        assert_eq!(
            MatchStrategy::classify(&WhereClause::new().with("id__gt", DataValue::Null)),
            MatchStrategy::Contained
        );
    }

    #[tokio::test]
    async fn test_exact_discard_only_matching_value() {
        let backend = memory();
        seed(
            &backend,
            "ExactItem",
            &[
                ("k5", WhereClause::new().with("id", 5)),
                ("k6", WhereClause::new().with("id", 6)),
            ],
        )
        .await;

        let mut tracker = QueryTracker::open("ExactItem", backend.clone()).await;
        let discarded = tracker.discard(&WhereClause::new().with("id", 5u64)).await.unwrap();
        assert_eq!(discarded.into_iter().collect::<Vec<_>>(), vec!["k5".to_string()]);
        assert_eq!(tracker.len().await.unwrap(), 1);
        tracker.finish().await.unwrap();

        assert!(!backend.has("k5").await.unwrap());
        assert!(backend.has("k6").await.unwrap());
    }

    #[tokio::test]
    async fn test_contained_discard_ignores_stored_range_value() {
        let backend = memory();
        seed(
            &backend,
            "RangeItem",
            &[
                ("gt1", WhereClause::new().with("id__gt", 1)),
                ("gt100", WhereClause::new().with("id__gt", 100)),
                ("eq", WhereClause::new().with("id", 3)),
            ],
        )
        .await;

        let mut tracker = QueryTracker::open("RangeItem", backend.clone()).await;
        let discarded = tracker
            .discard(&WhereClause::new().with("id__gt", DataValue::Null))
            .await
            .unwrap();
        assert_eq!(discarded.len(), 2);
        assert!(discarded.contains("gt1") && discarded.contains("gt100"));
        tracker.finish().await.unwrap();
        assert!(backend.has("eq").await.unwrap());
    }

    #[tokio::test]
    async fn test_contained_discard_matches_equality_part() {
        let backend = memory();
        seed(
            &backend,
            "MixedItem",
            &[
                ("owner3", WhereClause::new().with("owner", 3).with("tag", "a")),
                ("owner4", WhereClause::new().with("owner", 4).with("tag", "b")),
            ],
        )
        .await;

        let derived = WhereClause::new()
            .with("owner", 3)
            .with("title__contains", DataValue::Null);
        let mut tracker = QueryTracker::open("MixedItem", backend.clone()).await;
        let discarded = tracker.discard(&derived).await.unwrap();
        assert_eq!(discarded.into_iter().collect::<Vec<_>>(), vec!["owner3".to_string()]);
        tracker.finish().await.unwrap();
    }

    #[tokio::test]
    async fn test_discard_all_and_empty_tracker_is_deleted() {
        let backend = memory();
        seed(
            &backend,
            "ClearItem",
            &[("a", WhereClause::new()), ("b", WhereClause::new().with("id", 1))],
        )
        .await;
        assert!(backend.has("tracker:clear_item").await.unwrap());

        let mut tracker = QueryTracker::open("ClearItem", backend.clone()).await;
        assert!(tracker.discard_all().await);
        assert_eq!(tracker.len().await.unwrap(), 0);
        tracker.finish().await.unwrap();

        assert!(!backend.has("a").await.unwrap());
        assert!(!backend.has("b").await.unwrap());
        assert!(!backend.has("tracker:clear_item").await.unwrap());
    }

    #[tokio::test]
    async fn test_unloaded_scope_does_not_touch_backend() {
        let backend = memory();
        let tracker = QueryTracker::open("Untouched", backend.clone()).await;
        assert_eq!(tracker.key(), "tracker:untouched");
        tracker.finish().await.unwrap();
        assert!(!backend.has("tracker:untouched").await.unwrap());
    }

    #[test]
    fn test_unknown_suffix_is_contained() {
        let derived = WhereClause::new().with("title__like", DataValue::Null);
        assert_eq!(MatchStrategy::classify(&derived), MatchStrategy::Contained);
        assert!(
            MatchStrategy::Contained
                .matches(&derived, &WhereClause::new().with("title__like", "a%"))
        );
    }

    #[tokio::test]
    async fn test_corrupt_tracker_is_deleted_and_rebuilt() {
        let backend = memory();
        // 非有限浮点数序列化为 null 后无法读回
        seed(
            &backend,
            "CorruptItem",
            &[("nan", WhereClause::new().with("score", f64::NAN))],
        )
        .await;
        assert!(backend.has("tracker:corrupt_item").await.unwrap());

        let mut tracker = QueryTracker::open("CorruptItem", backend.clone()).await;
        assert!(tracker.discard(&WhereClause::new().with("id", 1)).await.is_none());
        tracker.finish().await.unwrap();
        assert!(!backend.has("tracker:corrupt_item").await.unwrap());

        let mut tracker = QueryTracker::open("CorruptItem", backend.clone()).await;
        let discarded = tracker.discard(&WhereClause::new().with("id", 1)).await.unwrap();
        assert!(discarded.is_empty());
        assert_eq!(tracker.len().await.unwrap(), 0);
        tracker.finish().await.unwrap();
    }

    struct BrokenDelete(MemoryBackend);

    #[async_trait]
    impl CacheBackend for BrokenDelete {
        fn name(&self) -> &str {
            "broken"
        }

        async fn get(&self, key: &str) -> QueryCacheResult<Option<Bytes>> {
            self.0.get(key).await
        }

        async fn set(&self, key: &str, value: Bytes, ttl_secs: u64) -> QueryCacheResult<()> {
            self.0.set(key, value, ttl_secs).await
        }

        async fn delete(&self, _key: &str) -> QueryCacheResult<bool> {
            Err(crate::querycache_error!(cache, "后端不可用"))
        }
    }

    #[tokio::test]
    async fn test_discard_failure_reports_none_and_keeps_entry() {
        let backend: Arc<dyn CacheBackend> = Arc::new(BrokenDelete(MemoryBackend::new(0)));
        seed(&backend, "BrokenItem", &[("k", WhereClause::new().with("id", 1))]).await;

        let mut tracker = QueryTracker::open("BrokenItem", backend.clone()).await;
        assert!(tracker.discard(&WhereClause::new().with("id", 1)).await.is_none());
        assert!(tracker.get("k").await.unwrap().is_some());
        assert!(!tracker.discard_all().await);
        tracker.finish().await.unwrap();
    }
}
