//! Test support: fixtures and a recording index wrapper / 测试辅助

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Result, SyncError};
use crate::models::{ContentItem, CultureSet, CultureVariant, IndexEntry, IndexEntryId};
use crate::search::{ContentIndex, IndexPage, MemoryIndex};

/// Published content item under `ancestors`, published in every culture given.
pub fn content(id: i32, ancestors: &[i32], cultures: &[&str]) -> ContentItem {
    let mut path = ancestors.to_vec();
    path.push(id);
    ContentItem {
        id,
        parent_id: ancestors.last().copied().unwrap_or(-1),
        path,
        content_type: "page".to_string(),
        trashed: false,
        published: true,
        cultures: cultures
            .iter()
            .map(|culture| {
                (
                    culture.to_string(),
                    CultureVariant {
                        name: format!("Item {} ({})", id, culture),
                        published: true,
                        updated_at: None,
                    },
                )
            })
            .collect::<BTreeMap<_, _>>(),
    }
}

/// Index entry for `content_id` in `culture` under `ancestors`.
pub fn entry(content_id: i32, culture: &str, ancestors: &[i32]) -> IndexEntry {
    let mut path = ancestors.to_vec();
    path.push(content_id);
    IndexEntry {
        id: IndexEntryId::new(content_id, culture),
        parent_id: ancestors.last().copied().unwrap_or(-1),
        path,
        content_type: "page".to_string(),
        name: format!("Item {} ({})", content_id, culture),
        updated_at: None,
    }
}

/// Index call observed by [`RecordingIndex`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOp {
    Upsert(Vec<String>),
    Remove(Vec<String>),
    QueryCultures(i32),
    QueryPaged { content_ids: Vec<i32>, page: usize, page_size: usize },
}

impl IndexOp {
    pub fn is_mutation(&self) -> bool {
        matches!(self, Self::Upsert(_) | Self::Remove(_))
    }
}

/// Memory index that records every call and can be switched offline.
pub struct RecordingIndex {
    pub inner: MemoryIndex,
    ops: Mutex<Vec<IndexOp>>,
    offline: AtomicBool,
}

impl RecordingIndex {
    pub fn new() -> Arc<Self> {
        Self::wrapping(MemoryIndex::new("recording"))
    }

    /// Recording index that also holds unpublished content
    pub fn all_content() -> Arc<Self> {
        Self::wrapping(MemoryIndex::all_content("recording"))
    }

    fn wrapping(inner: MemoryIndex) -> Arc<Self> {
        Arc::new(Self {
            inner,
            ops: Mutex::new(Vec::new()),
            offline: AtomicBool::new(false),
        })
    }

    pub fn ops(&self) -> Vec<IndexOp> {
        self.ops.lock().clone()
    }

    pub fn clear_ops(&self) {
        self.ops.lock().clear();
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn entry_ids(&self) -> Vec<String> {
        self.inner.entry_ids()
    }

    fn record(&self, op: IndexOp) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::index_unavailable("recording", "offline"));
        }
        self.ops.lock().push(op);
        Ok(())
    }
}

#[async_trait]
impl ContentIndex for RecordingIndex {
    fn name(&self) -> &str {
        "recording"
    }

    fn published_values_only(&self) -> bool {
        self.inner.published_values_only()
    }

    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<()> {
        self.record(IndexOp::Upsert(entries.iter().map(|e| e.id.to_string()).collect()))?;
        self.inner.upsert(entries).await
    }

    async fn remove_by_ids(&self, ids: &BTreeSet<String>) -> Result<()> {
        self.record(IndexOp::Remove(ids.iter().cloned().collect()))?;
        self.inner.remove_by_ids(ids).await
    }

    async fn query_cultures(&self, content_id: i32) -> Result<CultureSet> {
        self.record(IndexOp::QueryCultures(content_id))?;
        self.inner.query_cultures(content_id).await
    }

    async fn query_by_content_ids_paged(
        &self,
        content_ids: &[i32],
        page: usize,
        page_size: usize,
    ) -> Result<IndexPage> {
        self.record(IndexOp::QueryPaged {
            content_ids: content_ids.to_vec(),
            page,
            page_size,
        })?;
        self.inner
            .query_by_content_ids_paged(content_ids, page, page_size)
            .await
    }
}
