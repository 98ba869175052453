//! In-memory content store / 内存内容存储
//!
//! Implements the repository, descendant traversal and protection registry over a
//! single content tree. Loaded from a JSON snapshot by the CLI and used by tests.

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use super::{ContentRepository, DescendantBatches, DescendantEnumerator, ProtectedContentRegistry};
use crate::error::Result;
use crate::models::{ContentItem, ProtectedNodeId};

/// Serialized content tree / 内容树快照
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentSnapshot {
    pub items: Vec<ContentItem>,
    #[serde(default)]
    pub protected: Vec<ProtectedNodeId>,
}

pub struct MemoryContentStore {
    items: RwLock<BTreeMap<i32, ContentItem>>,
    protected: RwLock<BTreeSet<ProtectedNodeId>>,
    page_size: usize,
}

/// Paging state of one descendant traversal / 子孙遍历游标
struct DescendantCursor {
    root: i32,
    page: usize,
    /// Ids whose children may be yielded / 允许其子节点进入索引的ID
    allowed: HashSet<i32>,
    done: bool,
}

impl MemoryContentStore {
    pub fn new(page_size: usize) -> Self {
        Self {
            items: RwLock::new(BTreeMap::new()),
            protected: RwLock::new(BTreeSet::new()),
            page_size: page_size.max(1),
        }
    }

    pub fn from_snapshot(snapshot: ContentSnapshot, page_size: usize) -> Self {
        let store = Self::new(page_size);
        {
            let mut items = store.items.write();
            for item in snapshot.items {
                items.insert(item.id, item);
            }
        }
        store.protected.write().extend(snapshot.protected);
        store
    }

    /// Load a snapshot file / 从文件加载快照
    pub fn load_snapshot(path: &Path, page_size: usize) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let snapshot: ContentSnapshot = serde_json::from_str(&content)?;
        tracing::info!("Loaded {} content items from {:?}", snapshot.items.len(), path);
        Ok(Self::from_snapshot(snapshot, page_size))
    }

    pub fn upsert_item(&self, item: ContentItem) {
        self.items.write().insert(item.id, item);
    }

    pub fn remove_item(&self, content_id: i32) -> Option<ContentItem> {
        self.items.write().remove(&content_id)
    }

    /// Apply `f` to an item in place, returns false if absent / 原地修改内容
    pub fn update_item(&self, content_id: i32, f: impl FnOnce(&mut ContentItem)) -> bool {
        match self.items.write().get_mut(&content_id) {
            Some(item) => {
                f(item);
                true
            }
            None => false,
        }
    }

    pub fn protect(&self, content_id: ProtectedNodeId) {
        self.protected.write().insert(content_id);
    }

    pub fn unprotect(&self, content_id: ProtectedNodeId) {
        self.protected.write().remove(&content_id);
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// One page of published descendants ordered by path / 按路径排序的一页子孙节点
    fn descendant_page(&self, root: i32, page: usize) -> Vec<ContentItem> {
        let items = self.items.read();
        let mut descendants: Vec<&ContentItem> = items
            .values()
            .filter(|item| item.has_ancestor(root) && item.published && !item.trashed)
            .collect();
        descendants.sort_by(|a, b| a.path.cmp(&b.path));
        descendants
            .into_iter()
            .skip(page * self.page_size)
            .take(self.page_size)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ContentRepository for MemoryContentStore {
    async fn get_by_id(&self, content_id: i32) -> Result<Option<ContentItem>> {
        Ok(self.items.read().get(&content_id).cloned())
    }

    async fn is_path_published(&self, item: &ContentItem) -> Result<bool> {
        let items = self.items.read();
        Ok(item
            .path
            .iter()
            .filter(|&&id| id != item.id)
            .all(|id| matches!(items.get(id), Some(ancestor) if ancestor.published && !ancestor.trashed)))
    }

    async fn content_ids(&self, content_types: Option<&BTreeSet<String>>) -> Result<Vec<i32>> {
        let items = self.items.read();
        let mut matched: Vec<&ContentItem> = items
            .values()
            .filter(|item| content_types.map_or(true, |types| types.contains(&item.content_type)))
            .collect();
        matched.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(matched.into_iter().map(|item| item.id).collect())
    }
}

impl DescendantEnumerator for MemoryContentStore {
    fn applicable_descendants(&self, content_id: i32) -> DescendantBatches<'_> {
        let cursor = DescendantCursor {
            root: content_id,
            page: 0,
            allowed: HashSet::from([content_id]),
            done: false,
        };

        futures::stream::unfold(cursor, move |mut cursor| async move {
            if cursor.done {
                return None;
            }
            let page = self.descendant_page(cursor.root, cursor.page);
            cursor.page += 1;
            if page.len() < self.page_size {
                cursor.done = true;
            }
            if page.is_empty() {
                return None;
            }

            // Parents come first, so an unpublished ancestor masks its whole subtree.
            let batch: Vec<ContentItem> = page
                .into_iter()
                .filter(|item| {
                    if cursor.allowed.contains(&item.parent_id) {
                        cursor.allowed.insert(item.id);
                        true
                    } else {
                        false
                    }
                })
                .collect();
            Some((Ok(batch), cursor))
        })
        .boxed()
    }
}

#[async_trait]
impl ProtectedContentRegistry for MemoryContentStore {
    async fn get_all_protected_node_ids(&self) -> Result<Vec<ProtectedNodeId>> {
        Ok(self.protected.read().iter().copied().collect())
    }

    async fn is_protected(&self, path: &[i32]) -> Result<bool> {
        let protected = self.protected.read();
        Ok(path.iter().any(|id| protected.contains(id)))
    }
}
