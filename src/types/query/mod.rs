use crate::types::data_value::DataValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 条件键中操作符后缀的分隔符，例如 `folder_id__gt`
pub const OPERATOR_SEPARATOR: &str = "__";

/// 查询操作符
///
/// 除 `Eq` 外的操作符都以 `字段__后缀` 的形式出现在条件键中
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QueryOperator {
    /// 等于（无后缀）
    Eq,
    /// 不等于
    Ne,
    /// 大于
    Gt,
    /// 大于等于
    Gte,
    /// 小于
    Lt,
    /// 小于等于
    Lte,
    /// 包含（字符串或数组）
    Contains,
    /// 忽略大小写包含
    IContains,
    /// 开始于（字符串）
    StartsWith,
    /// 结束于（字符串）
    EndsWith,
    /// 在列表中
    In,
    /// 不在列表中
    NotIn,
    /// 正则表达式匹配
    Regex,
    /// 为空
    IsNull,
    /// 不为空
    IsNotNull,
}

impl QueryOperator {
    /// 条件键后缀，`Eq` 没有后缀
    pub fn suffix(&self) -> Option<&'static str> {
        match self {
            QueryOperator::Eq => None,
            QueryOperator::Ne => Some("ne"),
            QueryOperator::Gt => Some("gt"),
            QueryOperator::Gte => Some("gte"),
            QueryOperator::Lt => Some("lt"),
            QueryOperator::Lte => Some("lte"),
            QueryOperator::Contains => Some("contains"),
            QueryOperator::IContains => Some("icontains"),
            QueryOperator::StartsWith => Some("startswith"),
            QueryOperator::EndsWith => Some("endswith"),
            QueryOperator::In => Some("in"),
            QueryOperator::NotIn => Some("notin"),
            QueryOperator::Regex => Some("regex"),
            QueryOperator::IsNull => Some("isnull"),
            QueryOperator::IsNotNull => Some("isnotnull"),
        }
    }

    /// 根据后缀解析操作符
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        let operator = match suffix {
            "ne" => QueryOperator::Ne,
            "gt" => QueryOperator::Gt,
            "gte" => QueryOperator::Gte,
            "lt" => QueryOperator::Lt,
            "lte" => QueryOperator::Lte,
            "contains" => QueryOperator::Contains,
            "icontains" => QueryOperator::IContains,
            "startswith" => QueryOperator::StartsWith,
            "endswith" => QueryOperator::EndsWith,
            "in" => QueryOperator::In,
            "notin" => QueryOperator::NotIn,
            "regex" => QueryOperator::Regex,
            "isnull" => QueryOperator::IsNull,
            "isnotnull" => QueryOperator::IsNotNull,
            _ => return None,
        };
        Some(operator)
    }

    /// 是否为纯等值比较
    pub fn is_equality(&self) -> bool {
        matches!(self, QueryOperator::Eq)
    }
}

/// 条件键：字段名加操作符
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConditionKey {
    /// 字段名
    pub field: String,
    /// 操作符
    pub operator: QueryOperator,
}

impl ConditionKey {
    pub fn new(field: impl Into<String>, operator: QueryOperator) -> Self {
        Self {
            field: field.into(),
            operator,
        }
    }

    /// 解析 `字段` 或 `字段__后缀` 形式的条件键
    ///
    /// 后缀不是已知操作符时，整个字符串按字段名处理
    pub fn parse(key: &str) -> Self {
        if let Some((field, suffix)) = key.rsplit_once(OPERATOR_SEPARATOR) {
            if !field.is_empty() {
                if let Some(operator) = QueryOperator::from_suffix(suffix) {
                    return Self::new(field, operator);
                }
            }
        }
        Self::new(key, QueryOperator::Eq)
    }

    /// 是否带比较操作符
    ///
    /// 后缀无法识别的 `字段__后缀` 同样视为比较条件，失效时保守处理
    pub fn is_comparison(&self) -> bool {
        !self.operator.is_equality() || self.field.contains(OPERATOR_SEPARATOR)
    }
}

impl std::fmt::Display for ConditionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.operator.suffix() {
            Some(suffix) => write!(f, "{}{}{}", self.field, OPERATOR_SEPARATOR, suffix),
            None => write!(f, "{}", self.field),
        }
    }
}

/// where 子句：条件键到条件值的映射，键天然有序
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WhereClause(BTreeMap<String, DataValue>);

impl WhereClause {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入条件，返回自身便于链式调用
    pub fn with(mut self, key: impl Into<String>, value: impl Into<DataValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<DataValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&DataValue> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 按键排序遍历
    pub fn iter(&self) -> impl Iterator<Item = (&String, &DataValue)> {
        self.0.iter()
    }

    /// 按键排序的条件键
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// 解析后的条件
    pub fn conditions(&self) -> impl Iterator<Item = (ConditionKey, &DataValue)> {
        self.0.iter().map(|(k, v)| (ConditionKey::parse(k), v))
    }

    /// 判断与另一子句是否逐项相同（数值跨类型视为相同）
    pub fn same_as(&self, other: &WhereClause) -> bool {
        self.len() == other.len()
            && self.iter().all(|(k, v)| {
                other
                    .get(k)
                    .map(|stored| stored.same_value(v))
                    .unwrap_or(false)
            })
    }
}

impl<K: Into<String>, V: Into<DataValue>> FromIterator<(K, V)> for WhereClause {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// 分页配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// 返回数量
    pub count: u64,
    /// 跳过数量
    pub offset: u64,
}

/// 结构化查询
///
/// 构造后不可变，只能通过消耗自身的构建方法派生新查询
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    select: Vec<String>,
    #[serde(rename = "where")]
    where_clause: WhereClause,
    limit: Option<Pagination>,
    order_by: Vec<String>,
    descending: bool,
}

impl Query {
    /// 创建空查询（无条件、无投影）
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置投影字段
    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = fields.into_iter().map(Into::into).collect();
        self
    }

    /// 添加条件，`key` 可以是 `字段` 或 `字段__后缀`
    pub fn filter(mut self, key: impl Into<String>, value: impl Into<DataValue>) -> Self {
        self.where_clause.insert(key, value);
        self
    }

    /// 以结构化方式添加条件
    pub fn condition(self, field: &str, operator: QueryOperator, value: impl Into<DataValue>) -> Self {
        let key = ConditionKey::new(field, operator).to_string();
        self.filter(key, value)
    }

    /// 替换整个 where 子句
    pub fn with_where(mut self, where_clause: WhereClause) -> Self {
        self.where_clause = where_clause;
        self
    }

    /// 设置分页
    pub fn limit(mut self, count: u64, offset: u64) -> Self {
        self.limit = Some(Pagination { count, offset });
        self
    }

    /// 设置排序
    pub fn order_by<I, S>(mut self, fields: I, descending: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.order_by = fields.into_iter().map(Into::into).collect();
        self.descending = descending;
        self
    }

    pub fn select_fields(&self) -> &[String] {
        &self.select
    }

    pub fn where_clause(&self) -> &WhereClause {
        &self.where_clause
    }

    pub fn pagination(&self) -> Option<Pagination> {
        self.limit
    }

    pub fn order_fields(&self) -> &[String] {
        &self.order_by
    }

    pub fn is_descending(&self) -> bool {
        self.descending
    }

    /// 是否带分页或排序
    pub fn is_ordered_or_limited(&self) -> bool {
        self.limit.is_some() || !self.order_by.is_empty()
    }
}
