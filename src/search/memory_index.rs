//! In-memory index / 内存索引
//!
//! Entries are kept in an ordered map keyed by the serialized entry id, so paged
//! lookups are stable across calls.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use super::{ContentIndex, IndexPage, IndexStats};
use crate::error::Result;
use crate::models::{CultureSet, IndexEntry, IndexKey};

pub struct MemoryIndex {
    name: String,
    published_values_only: bool,
    entries: RwLock<BTreeMap<String, IndexEntry>>,
    last_updated: RwLock<Option<i64>>,
}

impl MemoryIndex {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            published_values_only: true,
            entries: RwLock::new(BTreeMap::new()),
            last_updated: RwLock::new(None),
        }
    }

    /// Index holding unpublished content as well / 包含未发布内容的索引
    pub fn all_content(name: impl Into<String>) -> Self {
        Self {
            published_values_only: false,
            ..Self::new(name)
        }
    }

    /// All entry ids, sorted / 所有条目ID
    pub fn entry_ids(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<IndexEntry> {
        self.entries.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn stats(&self) -> IndexStats {
        let entries = self.entries.read();
        let contents: HashSet<i32> = entries.values().map(IndexEntry::content_id).collect();
        let cultures: HashSet<&str> = entries.values().map(IndexEntry::culture).collect();
        IndexStats {
            entry_count: entries.len() as u64,
            content_count: contents.len() as u64,
            culture_count: cultures.len() as u64,
            last_updated: *self.last_updated.read(),
        }
    }

    fn touch(&self) {
        *self.last_updated.write() = Some(chrono::Utc::now().timestamp());
    }
}

#[async_trait]
impl ContentIndex for MemoryIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn published_values_only(&self) -> bool {
        self.published_values_only
    }

    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        {
            let mut map = self.entries.write();
            for entry in entries {
                map.insert(entry.id.to_string(), entry);
            }
        }
        self.touch();
        Ok(())
    }

    async fn remove_by_ids(&self, ids: &BTreeSet<String>) -> Result<()> {
        let keys: Vec<IndexKey> = ids
            .iter()
            .filter_map(|id| {
                let key = IndexKey::parse(id);
                if key.is_none() {
                    tracing::debug!(index = %self.name, id = %id, "Ignoring unparsable index id");
                }
                key
            })
            .collect();
        if keys.is_empty() {
            return Ok(());
        }

        let removed = {
            let mut map = self.entries.write();
            let before = map.len();
            map.retain(|_, entry| {
                !keys.iter().any(|key| match key {
                    IndexKey::Content(content_id) => entry.is_within(*content_id),
                    IndexKey::Entry(target) => entry.id == *target,
                })
            });
            before - map.len()
        };
        if removed > 0 {
            self.touch();
        }
        tracing::debug!(index = %self.name, requested = ids.len(), removed, "Removed index entries");
        Ok(())
    }

    async fn query_cultures(&self, content_id: i32) -> Result<CultureSet> {
        Ok(self
            .entries
            .read()
            .values()
            .filter(|entry| entry.content_id() == content_id)
            .map(|entry| entry.culture().to_string())
            .collect())
    }

    async fn query_by_content_ids_paged(
        &self,
        content_ids: &[i32],
        page: usize,
        page_size: usize,
    ) -> Result<IndexPage> {
        let wanted: HashSet<i32> = content_ids.iter().copied().collect();
        let map = self.entries.read();
        let matched: Vec<&String> = map
            .iter()
            .filter(|(_, entry)| wanted.contains(&entry.content_id()))
            .map(|(id, _)| id)
            .collect();

        Ok(IndexPage {
            total_count: matched.len(),
            matches: matched
                .into_iter()
                .skip(page * page_size)
                .take(page_size)
                .cloned()
                .collect(),
        })
    }
}
