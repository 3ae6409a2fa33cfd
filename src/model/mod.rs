//! 模型定义模块
//!
//! 模型通过 `CacheableModel` 声明自己的名称、字段、主键和缓存条件模板，
//! 并通过 `field_value` 按名称暴露字段值，供失效计算使用

use crate::types::{DataValue, Query};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;

/// 模型元数据
#[derive(Debug, Clone, PartialEq)]
pub struct ModelMeta {
    /// 模型名（驼峰形式，如 `Folder`）
    pub model_name: String,
    /// 字段名列表
    pub fields: Vec<String>,
    /// 主键字段
    pub primary_key: String,
    /// 缓存条件模板 -> TTL（秒），`None` 表示该条件组合不缓存
    pub cache_conditions: BTreeMap<String, Option<u64>>,
}

impl ModelMeta {
    /// 创建模型元数据
    pub fn new(model_name: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            fields: Vec::new(),
            primary_key: primary_key.into(),
            cache_conditions: BTreeMap::new(),
        }
    }

    /// 设置字段列表
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// 声明一个缓存条件模板
    ///
    /// `template` 形如 `"*"`、`"folder_id"`、`"folder_id__gt + name__contains"`
    pub fn cache_condition(mut self, template: impl Into<String>, ttl_secs: Option<u64>) -> Self {
        self.cache_conditions.insert(template.into(), ttl_secs);
        self
    }

    /// 是否包含指定字段
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f == name)
    }
}

/// 可缓存模型
///
/// 缓存值以 JSON 形式保存整条记录，因此模型需要可序列化
pub trait CacheableModel: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// 获取模型元数据
    fn meta() -> ModelMeta;

    /// 按字段名读取当前值，未知字段返回 `None`
    fn field_value(&self, name: &str) -> Option<DataValue>;

    /// 选择全部字段的无条件查询
    fn query() -> Query {
        Query::new().select(Self::meta().fields)
    }
}
