//! Index document definition / 索引文档定义

use std::sync::Arc;

use crate::content::{ContentRepository, ProtectedContentRegistry};
use crate::error::Result;
use crate::models::{ContentItem, CultureSet, IndexEntry, IndexEntryId};

/// Builds the entries a content item should have in an index / 构建内容的索引文档
///
/// Published-only indexes get one entry per published culture of a published
/// item whose ancestors are all published and which lies outside any protected
/// path. Indexes holding unpublished content get one entry per culture variant
/// of any item that is not trashed.
pub struct IndexDocumentBuilder {
    repository: Arc<dyn ContentRepository>,
    registry: Arc<dyn ProtectedContentRegistry>,
}

impl IndexDocumentBuilder {
    pub fn new(repository: Arc<dyn ContentRepository>, registry: Arc<dyn ProtectedContentRegistry>) -> Self {
        Self { repository, registry }
    }

    pub async fn build(&self, item: &ContentItem, published_values_only: bool) -> Result<Vec<IndexEntry>> {
        if item.trashed {
            return Ok(Vec::new());
        }
        if !published_values_only {
            return Ok(entries_for(item, |_| true));
        }

        if !item.published {
            return Ok(Vec::new());
        }
        if !self.repository.is_path_published(item).await? {
            tracing::debug!(content_id = item.id, "Ancestor not published, not indexable");
            return Ok(Vec::new());
        }
        if self.registry.is_protected(&item.path).await? {
            tracing::debug!(content_id = item.id, "Content is protected, not indexable");
            return Ok(Vec::new());
        }
        Ok(entries_for(item, |published| published))
    }
}

fn entries_for(item: &ContentItem, include: impl Fn(bool) -> bool) -> Vec<IndexEntry> {
    item.cultures
        .iter()
        .filter(|(_, variant)| include(variant.published))
        .map(|(culture, variant)| IndexEntry {
            id: IndexEntryId::new(item.id, culture.clone()),
            parent_id: item.parent_id,
            path: item.path.clone(),
            content_type: item.content_type.clone(),
            name: variant.name.clone(),
            updated_at: variant.updated_at,
        })
        .collect()
}

/// Cultures covered by a set of entries / 文档覆盖的语言
pub fn cultures_of(entries: &[IndexEntry]) -> CultureSet {
    entries.iter().map(|entry| entry.culture().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::MemoryContentStore;
    use crate::testing::content;

    fn builder(store: Arc<MemoryContentStore>) -> IndexDocumentBuilder {
        IndexDocumentBuilder::new(store.clone(), store)
    }

    #[tokio::test]
    async fn test_one_entry_per_published_culture() {
        let store = Arc::new(MemoryContentStore::new(10));
        store.upsert_item(content(1, &[], &["en"]));
        let mut item = content(10, &[1], &["en", "fr"]);
        item.cultures.get_mut("fr").unwrap().published = false;

        let entries = builder(store).build(&item, true).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id.to_string(), "10|en");
        assert_eq!(entries[0].path, vec![1, 10]);
        assert_eq!(cultures_of(&entries), CultureSet::from_iter(["en"]));
    }

    #[tokio::test]
    async fn test_unpublished_trashed_protected_build_nothing() {
        let store = Arc::new(MemoryContentStore::new(10));
        store.upsert_item(content(1, &[], &["en"]));
        let b = builder(store.clone());

        let mut unpublished = content(10, &[], &["en"]);
        unpublished.published = false;
        assert!(b.build(&unpublished, true).await.unwrap().is_empty());

        let mut trashed = content(11, &[], &["en"]);
        trashed.trashed = true;
        assert!(b.build(&trashed, true).await.unwrap().is_empty());
        assert!(b.build(&trashed, false).await.unwrap().is_empty());

        store.protect(1);
        let under_protected = content(12, &[1], &["en"]);
        assert!(b.build(&under_protected, true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unpublished_ancestor_builds_nothing() {
        let store = Arc::new(MemoryContentStore::new(10));
        let mut parent = content(1, &[], &["en"]);
        parent.published = false;
        store.upsert_item(parent);
        let child = content(2, &[1], &["en"]);
        store.upsert_item(child.clone());
        let b = builder(store.clone());

        assert!(b.build(&child, true).await.unwrap().is_empty());

        store.update_item(1, |item| item.published = true);
        assert_eq!(b.build(&child, true).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_all_content_index_keeps_unpublished_variants() {
        let store = Arc::new(MemoryContentStore::new(10));
        store.protect(1);
        let mut item = content(1, &[], &["en", "fr"]);
        item.published = false;
        item.cultures.get_mut("fr").unwrap().published = false;

        let entries = builder(store).build(&item, false).await.unwrap();
        assert_eq!(cultures_of(&entries), CultureSet::from_iter(["en", "fr"]));
    }
}
