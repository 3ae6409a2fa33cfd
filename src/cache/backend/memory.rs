//! 进程内存缓存后端

use super::CacheBackend;
use crate::error::QueryCacheResult;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use rat_logger::debug;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// 基于 DashMap 的内存后端，过期条目在访问时惰性清理
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: DashMap<String, MemoryEntry>,
    /// 最大条目数，0 表示不限制
    max_entries: usize,
}

impl MemoryBackend {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries,
        }
    }

    /// 当前条目数（含尚未清理的过期条目）
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 清理所有已过期条目，返回清理数量
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> QueryCacheResult<Option<Bytes>> {
        let now = Instant::now();
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        Ok(self.entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: Bytes, ttl_secs: u64) -> QueryCacheResult<()> {
        if self.max_entries > 0
            && !self.entries.contains_key(key)
            && self.entries.len() >= self.max_entries
        {
            let purged = self.purge_expired();
            debug!("内存缓存已满，清理过期条目: {}", purged);
            if self.entries.len() >= self.max_entries {
                return Err(crate::querycache_error!(
                    cache,
                    format!("内存缓存已满（{} 条），拒绝写入 {}", self.max_entries, key)
                ));
            }
        }

        let expires_at = match ttl_secs {
            0 => None,
            secs => Some(Instant::now() + Duration::from_secs(secs)),
        };
        self.entries
            .insert(key.to_string(), MemoryEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> QueryCacheResult<bool> {
        Ok(self.entries.remove(key).is_some())
    }
}
