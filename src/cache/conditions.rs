//! 缓存条件模板与条件注册表
//!
//! 每个模型在注册时声明哪些条件组合可以缓存以及缓存时长，
//! 注册表构建后只读，可被多个读者并发访问

use super::key_generator::{CONDITION_JOINER, WILDCARD};
use crate::error::QueryCacheResult;
use crate::model::{CacheableModel, ModelMeta};
use crate::types::{ConditionKey, DataValue, WhereClause};
use std::collections::HashMap;

/// 复合模板中条件键的分隔符
pub const TEMPLATE_SEPARATOR: char = '+';

/// 缓存条件模板
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionTemplate {
    /// 原始声明，如 `folder_id__gt + name__contains`
    declaration: String,
    /// 排序后的条件键，无条件模板为空
    keys: Vec<String>,
    /// 缓存时长（秒），`None` 或 0 表示不缓存
    ttl_secs: Option<u64>,
}

impl ConditionTemplate {
    /// 解析模板声明
    pub fn parse(declaration: &str, ttl_secs: Option<u64>) -> QueryCacheResult<Self> {
        let mut keys = Vec::new();
        let mut wildcard = false;

        for part in declaration.split(TEMPLATE_SEPARATOR) {
            let part = part.trim();
            if part.is_empty() {
                return Err(crate::querycache_error!(
                    config,
                    format!("缓存条件模板 `{}` 含有空的条件键", declaration)
                ));
            }
            if part == WILDCARD {
                wildcard = true;
            } else {
                keys.push(part.to_string());
            }
        }

        // `*` 与任何条件组合都退化为无条件模板
        if wildcard {
            keys.clear();
        }
        keys.sort();
        keys.dedup();

        Ok(Self {
            declaration: declaration.to_string(),
            keys,
            ttl_secs,
        })
    }

    pub fn declaration(&self) -> &str {
        &self.declaration
    }

    /// 排序后的条件键
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// 生效的缓存时长
    pub fn ttl_secs(&self) -> Option<u64> {
        self.ttl_secs.filter(|ttl| *ttl > 0)
    }

    /// 注册表中的查找键，与 `key_generator::template_key` 的输出一致
    pub fn template_key(&self) -> String {
        if self.keys.is_empty() {
            WILDCARD.to_string()
        } else {
            self.keys.join(CONDITION_JOINER)
        }
    }

    /// 是否为单字段等值模板（可用于批量预热）
    pub fn single_field(&self) -> Option<&str> {
        match self.keys.as_slice() {
            [key] if !ConditionKey::parse(key).is_comparison() => Some(key.as_str()),
            _ => None,
        }
    }

    /// 由实例当前字段值推导该模板对应的 where 子句
    ///
    /// 带比较操作符的条件键无法从单个实例确定取值，置为空值
    pub fn where_for<M: CacheableModel>(&self, instance: &M) -> WhereClause {
        self.keys
            .iter()
            .map(|key| {
                let condition = ConditionKey::parse(key);
                let value = if condition.is_comparison() {
                    DataValue::Null
                } else {
                    instance.field_value(&condition.field).unwrap_or(DataValue::Null)
                };
                (key.clone(), value)
            })
            .collect()
    }
}

/// 条件注册表
#[derive(Debug, Clone)]
pub struct ConditionRegistry {
    templates: Vec<ConditionTemplate>,
    ttl_by_key: HashMap<String, Option<u64>>,
}

impl ConditionRegistry {
    /// 从模型元数据构建注册表
    ///
    /// 未声明任何缓存条件属于配置错误；模板引用的字段必须存在于模型中
    pub fn from_meta(meta: &ModelMeta) -> QueryCacheResult<Self> {
        if meta.cache_conditions.is_empty() {
            return Err(crate::querycache_error!(
                config,
                format!("模型 {} 未声明缓存条件", meta.model_name)
            ));
        }

        let mut templates = Vec::with_capacity(meta.cache_conditions.len());
        for (declaration, ttl) in &meta.cache_conditions {
            let template = ConditionTemplate::parse(declaration, *ttl)?;
            if !meta.fields.is_empty() {
                for key in template.keys() {
                    let condition = ConditionKey::parse(key);
                    if !meta.has_field(&condition.field) {
                        return Err(crate::querycache_error!(
                            validation,
                            key,
                            format!("模型 {} 没有字段 {}", meta.model_name, condition.field)
                        ));
                    }
                }
            }
            templates.push(template);
        }

        Ok(Self::from_templates(templates))
    }

    /// 由已解析的模板构建注册表
    pub fn from_templates(templates: Vec<ConditionTemplate>) -> Self {
        let ttl_by_key = templates
            .iter()
            .map(|t| (t.template_key(), t.ttl_secs()))
            .collect();
        Self {
            templates,
            ttl_by_key,
        }
    }

    /// 按模板键查找缓存时长，未声明或不可缓存时返回 `None`
    pub fn lookup_ttl(&self, template_key: &str) -> Option<u64> {
        self.ttl_by_key.get(template_key).copied().flatten()
    }

    /// 全部已声明模板
    pub fn templates(&self) -> &[ConditionTemplate] {
        &self.templates
    }

    /// 单字段等值模板对应的字段名
    pub fn single_field_keys(&self) -> Vec<&str> {
        self.templates
            .iter()
            .filter_map(ConditionTemplate::single_field)
            .collect()
    }
}
