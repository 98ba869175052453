//! Search index module - exposes index primitives only / 搜索索引模块
//!
//! Architecture principles / 架构原则：
//! - The index only exposes primitive operations: upsert, remove, lookups
//! - The sync module controls what gets added, removed and cascaded
//! - Call direction: Sync → Search (unidirectional) / 调用方向
//!
//! Index implementations / 索引实现：
//! - Memory index: ordered map behind a lock, used by tests and one-shot runs
//! - Database index: SQLite storage with WAL mode and write retry

pub mod db_index;
pub mod memory_index;
pub mod schema;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::Result;
use crate::models::{CultureSet, IndexEntry};

pub use db_index::{SearchHit, SqliteIndex};
pub use memory_index::MemoryIndex;
pub use schema::IndexDocumentBuilder;

/// One page of an id lookup / 一页查询结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexPage {
    /// Matched index entry ids (serialized form) / 匹配的索引条目ID
    pub matches: Vec<String>,
    /// Total number of matches across all pages / 匹配总数
    pub total_count: usize,
}

/// Index statistics / 索引统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub entry_count: u64,
    pub content_count: u64,
    pub culture_count: u64,
    pub last_updated: Option<i64>,
}

/// Index/searcher abstraction / 索引与查询抽象
///
/// Removal contract: a bare content id removes every entry of that item and of
/// its descendants; a `"{id}|{culture}"` id removes only that entry. Absent
/// ids are a no-op.
#[async_trait]
pub trait ContentIndex: Send + Sync {
    fn name(&self) -> &str;

    /// Published-only (external) index, or one that also holds unpublished
    /// content (internal) / 是否只索引已发布内容
    fn published_values_only(&self) -> bool {
        true
    }

    /// Insert or replace entries by id / 插入或替换条目
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<()>;

    async fn remove_by_ids(&self, ids: &BTreeSet<String>) -> Result<()>;

    /// Cultures currently indexed for one content item / 查询已索引的语言
    async fn query_cultures(&self, content_id: i32) -> Result<CultureSet>;

    /// Entry ids of any of `content_ids`, `page` is zero based / 分页查询条目ID
    async fn query_by_content_ids_paged(
        &self,
        content_ids: &[i32],
        page: usize,
        page_size: usize,
    ) -> Result<IndexPage>;
}
