//! 内存记录存储
//!
//! 在内存中按 `Query` 过滤、排序和分页，用于测试与本地开发

use super::RecordStore;
use crate::error::QueryCacheResult;
use crate::model::CacheableModel;
use crate::types::{ConditionKey, DataValue, Query, QueryOperator, WhereClause};
use async_trait::async_trait;
use parking_lot::RwLock;
use rat_logger::debug;
use regex::Regex;
use std::cmp::Ordering;

/// 内存记录存储
#[derive(Debug, Default)]
pub struct MemoryRecordStore<M> {
    records: RwLock<Vec<M>>,
}

impl<M: CacheableModel> MemoryRecordStore<M> {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }

    /// 以初始记录创建
    pub fn with_records(records: Vec<M>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn primary_key(record: &M) -> DataValue {
        record
            .field_value(&M::meta().primary_key)
            .unwrap_or(DataValue::Null)
    }

    fn position(records: &[M], key: &DataValue) -> Option<usize> {
        records
            .iter()
            .position(|r| Self::primary_key(r).same_value(key))
    }
}

/// 判断记录是否满足 where 子句中的全部条件
pub fn record_matches<M: CacheableModel>(
    record: &M,
    where_clause: &WhereClause,
) -> QueryCacheResult<bool> {
    for (condition, expected) in where_clause.conditions() {
        let actual = record
            .field_value(&condition.field)
            .unwrap_or(DataValue::Null);
        if !evaluate(&condition, &actual, expected)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn evaluate(condition: &ConditionKey, actual: &DataValue, expected: &DataValue) -> QueryCacheResult<bool> {
    let ordering = || actual.compare(expected);
    let matched = match condition.operator {
        QueryOperator::Eq => actual.same_value(expected),
        QueryOperator::Ne => !actual.same_value(expected),
        QueryOperator::Gt => ordering() == Some(Ordering::Greater),
        QueryOperator::Gte => matches!(ordering(), Some(Ordering::Greater | Ordering::Equal)),
        QueryOperator::Lt => ordering() == Some(Ordering::Less),
        QueryOperator::Lte => matches!(ordering(), Some(Ordering::Less | Ordering::Equal)),
        QueryOperator::Contains => match (actual, expected) {
            (DataValue::String(text), DataValue::String(part)) => text.contains(part.as_str()),
            (DataValue::Array(items), item) => items.iter().any(|v| v.same_value(item)),
            _ => false,
        },
        QueryOperator::IContains => match (actual, expected) {
            (DataValue::String(text), DataValue::String(part)) => {
                text.to_lowercase().contains(&part.to_lowercase())
            }
            _ => false,
        },
        QueryOperator::StartsWith => match (actual, expected) {
            (DataValue::String(text), DataValue::String(prefix)) => text.starts_with(prefix.as_str()),
            _ => false,
        },
        QueryOperator::EndsWith => match (actual, expected) {
            (DataValue::String(text), DataValue::String(suffix)) => text.ends_with(suffix.as_str()),
            _ => false,
        },
        QueryOperator::In | QueryOperator::NotIn => {
            let DataValue::Array(candidates) = expected else {
                return Err(crate::querycache_error!(
                    validation,
                    condition.to_string(),
                    format!("需要数组参数，收到 {}", expected.type_name())
                ));
            };
            let found = candidates.iter().any(|v| v.same_value(actual));
            found == (condition.operator == QueryOperator::In)
        }
        QueryOperator::Regex => {
            let DataValue::String(pattern) = expected else {
                return Err(crate::querycache_error!(
                    validation,
                    condition.to_string(),
                    "正则表达式必须是字符串"
                ));
            };
            let regex = Regex::new(pattern).map_err(|e| {
                crate::querycache_error!(query, format!("无效的正则表达式 {}: {}", pattern, e))
            })?;
            match actual {
                DataValue::String(text) => regex.is_match(text),
                _ => false,
            }
        }
        QueryOperator::IsNull | QueryOperator::IsNotNull => {
            // 参数为 false 时取反
            let expect = !matches!(expected, DataValue::Bool(false));
            let is_null = actual.is_null() == (condition.operator == QueryOperator::IsNull);
            is_null == expect
        }
    };
    Ok(matched)
}

fn sort_records<M: CacheableModel>(records: &mut [M], fields: &[String], descending: bool) {
    records.sort_by(|a, b| {
        let ordering = fields
            .iter()
            .map(|field| {
                let left = a.field_value(field).unwrap_or(DataValue::Null);
                let right = b.field_value(field).unwrap_or(DataValue::Null);
                left.sort_cmp(&right)
            })
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or(Ordering::Equal);
        if descending { ordering.reverse() } else { ordering }
    });
}

#[async_trait]
impl<M: CacheableModel> RecordStore<M> for MemoryRecordStore<M> {
    async fn execute(&self, query: &Query) -> QueryCacheResult<Vec<M>> {
        let mut matched = Vec::new();
        for record in self.records.read().iter() {
            if record_matches(record, query.where_clause())? {
                matched.push(record.clone());
            }
        }

        if !query.order_fields().is_empty() {
            sort_records(&mut matched, query.order_fields(), query.is_descending());
        }

        if let Some(pagination) = query.pagination() {
            matched = matched
                .into_iter()
                .skip(pagination.offset as usize)
                .take(pagination.count as usize)
                .collect();
        }

        debug!("内存存储查询 {}: {} 条", M::meta().model_name, matched.len());
        Ok(matched)
    }

    async fn insert(&self, record: &M) -> QueryCacheResult<()> {
        let key = Self::primary_key(record);
        let mut records = self.records.write();
        if !key.is_null() && Self::position(&records, &key).is_some() {
            return Err(crate::querycache_error!(
                query,
                format!("主键重复: {} = {}", M::meta().primary_key, key)
            ));
        }
        records.push(record.clone());
        Ok(())
    }

    async fn update(&self, record: &M) -> QueryCacheResult<bool> {
        let key = Self::primary_key(record);
        let mut records = self.records.write();
        match Self::position(&records, &key) {
            Some(index) => {
                records[index] = record.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, record: &M) -> QueryCacheResult<bool> {
        let key = Self::primary_key(record);
        let mut records = self.records.write();
        match Self::position(&records, &key) {
            Some(index) => {
                records.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
