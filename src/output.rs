//! 函数输出缓存
//!
//! 以函数名加参数摘要（或自定义键模板）为键缓存计算结果。
//! `None` 与忽略列表中的输出不会被缓存

use crate::cache::CacheBackend;
use crate::error::QueryCacheResult;
use bytes::Bytes;
use rat_logger::{debug, warn};
use regex::Regex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::future::Future;
use std::sync::Arc;

/// 键模板中的占位符：`{参数名}`
const PLACEHOLDER_PATTERN: &str = r"\{([A-Za-z_][A-Za-z0-9_]*)\}";

/// 参数摘要保留的十六进制位数
const ARGS_DIGEST_HEX_LEN: usize = 32;

/// 函数输出缓存
pub struct OutputCache {
    backend: Arc<dyn CacheBackend>,
    namespace: String,
    ttl_secs: u64,
    key_template: Option<String>,
    ignore_outputs: Vec<JsonValue>,
    enabled: bool,
}

impl OutputCache {
    /// 创建输出缓存，`ttl_secs == 0` 表示永不过期
    pub fn new(backend: Arc<dyn CacheBackend>, namespace: impl Into<String>, ttl_secs: u64) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
            ttl_secs,
            key_template: None,
            ignore_outputs: Vec::new(),
            enabled: true,
        }
    }

    /// 自定义键模板，如 `report_{year}_{month}`
    ///
    /// 占位符从参数对象的同名字段取值，值为空的片段会被去掉
    pub fn key_template(mut self, template: impl Into<String>) -> Self {
        self.key_template = Some(template.into());
        self
    }

    /// 添加不缓存的输出值
    pub fn ignore_output<T: Serialize>(mut self, output: &T) -> QueryCacheResult<Self> {
        self.ignore_outputs.push(serde_json::to_value(output)?);
        Ok(self)
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// 生成缓存键
    pub fn make_key<A: Serialize>(&self, name: &str, args: &A) -> QueryCacheResult<String> {
        let args = serde_json::to_value(args)?;
        match &self.key_template {
            Some(template) => render_template(template, &args),
            None => {
                let raw = serde_json::to_vec(&args)?;
                let digest = blake3::hash(&raw);
                Ok(format!(
                    "{}.{}_{}",
                    self.namespace,
                    name,
                    &digest.to_hex().as_str()[..ARGS_DIGEST_HEX_LEN]
                ))
            }
        }
    }

    /// 读取缓存或计算结果
    ///
    /// `refresh` 为真时跳过读取，重新计算并覆盖缓存。缓存读写失败只记录日志，
    /// 不影响计算结果
    pub async fn get_or_compute<A, T, F, Fut>(
        &self,
        name: &str,
        args: &A,
        refresh: bool,
        compute: F,
    ) -> QueryCacheResult<Option<T>>
    where
        A: Serialize,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = QueryCacheResult<Option<T>>>,
    {
        if !self.enabled {
            return compute().await;
        }

        let key = self.make_key(name, args)?;
        if !refresh {
            match self.backend.get(&key).await {
                Ok(Some(raw)) => match serde_json::from_slice::<T>(&raw) {
                    Ok(output) => {
                        debug!("输出缓存命中: {}", key);
                        return Ok(Some(output));
                    }
                    Err(e) => warn!("输出缓存 {} 无法解析，重新计算: {}", key, e),
                },
                Ok(None) => debug!("输出缓存未命中: {}", key),
                Err(e) => warn!("读取输出缓存 {} 失败: {}", key, e),
            }
        }

        let output = compute().await?;
        if let Some(value) = &output {
            self.store(&key, value).await;
        }
        Ok(output)
    }

    async fn store<T: Serialize>(&self, key: &str, output: &T) {
        let json = match serde_json::to_value(output) {
            Ok(json) => json,
            Err(e) => {
                warn!("输出无法序列化，不缓存: {} - {}", key, e);
                return;
            }
        };
        if self.ignore_outputs.contains(&json) {
            warn!("输出 {} 在忽略列表中，不缓存", json);
            return;
        }

        let raw = match serde_json::to_vec(&json) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("输出无法序列化，不缓存: {} - {}", key, e);
                return;
            }
        };
        match self.backend.set(key, Bytes::from(raw), self.ttl_secs).await {
            Ok(()) => debug!("写入输出缓存: {}", key),
            Err(e) => warn!("写入输出缓存 {} 失败: {}", key, e),
        }
    }
}

fn render_template(template: &str, args: &JsonValue) -> QueryCacheResult<String> {
    let placeholder = Regex::new(PLACEHOLDER_PATTERN)
        .map_err(|e| crate::querycache_error!(config, format!("键模板解析失败: {}", e)))?;
    let mut missing = None;
    let rendered = placeholder.replace_all(template, |caps: &regex::Captures| {
        let name = &caps[1];
        match args.get(name) {
            Some(JsonValue::Null) => String::new(),
            Some(JsonValue::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    if let Some(name) = missing {
        return Err(crate::querycache_error!(
            validation,
            name,
            format!("键模板 {} 引用了不存在的参数", template)
        ));
    }

    Ok(rendered
        .split('_')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryBackend;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn output_cache() -> OutputCache {
        OutputCache::new(Arc::new(MemoryBackend::new(0)), "reports", 60)
    }

    #[test]
    fn test_default_key_depends_on_args() {
        let cache = output_cache();
        let a = cache.make_key("monthly", &json!({"year": 2024, "month": 5})).unwrap();
        let b = cache.make_key("monthly", &json!({"month": 5, "year": 2024})).unwrap();
        let c = cache.make_key("monthly", &json!({"year": 2024, "month": 6})).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("reports.monthly_"));
    }

    #[test]
    fn test_custom_key_template_drops_empty_parts() {
        let cache = output_cache().key_template("report_{year}_{month}_{region}");
        let key = cache
            .make_key("monthly", &json!({"year": 2024, "month": null, "region": "eu"}))
            .unwrap();
        assert_eq!(key, "report_2024_eu");

        assert!(cache.make_key("monthly", &json!({"year": 2024})).is_err());
    }

    #[tokio::test]
    async fn test_cached_output_skips_compute() {
        let cache = output_cache();
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let compute = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, crate::QueryCacheError>(Some(vec![1, 2, 3]))
        };

        let first: Option<Vec<i32>> = cache.get_or_compute("sum", &(1, 2), false, compute).await.unwrap();
        let second: Option<Vec<i32>> = cache.get_or_compute("sum", &(1, 2), false, compute).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let refreshed: Option<Vec<i32>> = cache.get_or_compute("sum", &(1, 2), true, compute).await.unwrap();
        assert_eq!(refreshed, Some(vec![1, 2, 3]));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_none_and_ignored_outputs_are_not_cached() {
        let cache = output_cache().ignore_output(&"pending").unwrap();
        let calls = AtomicUsize::new(0);
        let counter = &calls;

        for _ in 0..2 {
            let output: Option<String> = cache
                .get_or_compute("status", &"job-1", false, move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, crate::QueryCacheError>(None)
                })
                .await
                .unwrap();
            assert_eq!(output, None);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        for _ in 0..2 {
            let output: Option<String> = cache
                .get_or_compute("status", &"job-2", false, move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, crate::QueryCacheError>(Some("pending".to_string()))
                })
                .await
                .unwrap();
            assert_eq!(output.as_deref(), Some("pending"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
