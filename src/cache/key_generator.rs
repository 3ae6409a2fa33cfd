//! 缓存键生成模块
//!
//! 把结构化查询转换为确定性的字符串键与指纹

use crate::error::QueryCacheResult;
use crate::types::{Pagination, Query, WhereClause};
use serde::Serialize;

/// 无条件查询对应的模板键，也是空 where 子句的规范形式
pub const WILDCARD: &str = "*";

/// 条件之间的连接符
pub const CONDITION_JOINER: &str = "&";

/// 追踪器键前缀
pub const TRACKER_KEY_PREFIX: &str = "tracker:";

/// 指纹保留的十六进制位数（128 位）
const FINGERPRINT_HEX_LEN: usize = 32;

/// 参与指纹计算的规范化查询
///
/// 字段按名称排序声明，序列化结果与构造顺序无关
#[derive(Serialize)]
struct CanonicalQuery<'a> {
    descending: bool,
    limit: Option<Pagination>,
    order_by: Vec<&'a str>,
    select: Vec<&'a str>,
    #[serde(rename = "where")]
    where_clause: &'a WhereClause,
}

/// 驼峰转下划线：`FolderItem` -> `folder_item`
pub fn camel_to_underscore(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for ch in name.chars() {
        if ch.is_ascii_uppercase() {
            out.push('_');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out.trim_matches('_').to_string()
}

/// 计算查询指纹
///
/// where 按键排序，select 与 order_by 排序后参与计算，摘要取 blake3 的前 128 位
pub fn fingerprint(query: &Query) -> QueryCacheResult<String> {
    let mut select: Vec<&str> = query.select_fields().iter().map(String::as_str).collect();
    select.sort_unstable();
    let mut order_by: Vec<&str> = query.order_fields().iter().map(String::as_str).collect();
    order_by.sort_unstable();

    let canonical = CanonicalQuery {
        descending: query.is_descending(),
        limit: query.pagination(),
        order_by,
        select,
        where_clause: query.where_clause(),
    };

    let bytes = serde_json::to_vec(&canonical)?;
    let hash = blake3::hash(&bytes);
    Ok(hash.to_hex().as_str()[..FINGERPRINT_HEX_LEN].to_string())
}

/// where 子句的规范字符串：丢弃空值，`k=v` 以 `&` 连接，空子句为 `*`
pub fn canonical_where(where_clause: &WhereClause) -> String {
    let conditions = where_clause
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(CONDITION_JOINER);

    if conditions.is_empty() {
        WILDCARD.to_string()
    } else {
        conditions
    }
}

/// 查询结果的缓存键：`模型_where_条件_fp_指纹`
pub fn cache_key(model_name: &str, query: &Query) -> QueryCacheResult<String> {
    Ok(format!(
        "{}_where_{}_fp_{}",
        camel_to_underscore(model_name),
        canonical_where(query.where_clause()),
        fingerprint(query)?
    ))
}

/// 模板键：条件键排序后以 `&` 连接，空子句为 `*`
///
/// 值为空的条件键同样计入模板
pub fn template_key(where_clause: &WhereClause) -> String {
    if where_clause.is_empty() {
        return WILDCARD.to_string();
    }
    where_clause
        .keys()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(CONDITION_JOINER)
}

/// 模型追踪器在后端中的键
pub fn tracker_key(model_name: &str) -> String {
    format!("{}{}", TRACKER_KEY_PREFIX, camel_to_underscore(model_name))
}
