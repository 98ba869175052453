//! Content change synchronizer / 内容变更索引同步
//!
//! Applies an ordered batch of change records to the index:
//! - contiguous removals are batched and flushed before the next refresh
//! - a refresh of missing or trashed content is treated as a removal
//! - a refresh upserts every desired culture, removes cultures no longer
//!   desired, and cascades to descendants when a new culture appears

use futures::TryStreamExt;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

use super::culture_diff::CultureDiffResolver;
use super::gateway::IndexMutationGateway;
use crate::content::{ContentRepository, DescendantEnumerator, ProtectedContentRegistry};
use crate::error::Result;
use crate::models::{ChangeKind, ContentChangeRecord, IndexEntry};
use crate::search::schema::cultures_of;
use crate::search::{ContentIndex, IndexDocumentBuilder};

/// Summary of one synchronizer pass / 同步结果统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub records: usize,
    pub entries_upserted: usize,
    pub ids_removed: usize,
    /// Refreshes of missing or trashed content / 被视为删除的刷新
    pub reinterpreted_as_removal: usize,
    pub cascades: usize,
    pub descendants_reindexed: usize,
}

impl SyncReport {
    fn merge(&mut self, other: SyncReport) {
        self.records += other.records;
        self.entries_upserted += other.entries_upserted;
        self.ids_removed += other.ids_removed;
        self.reinterpreted_as_removal += other.reinterpreted_as_removal;
        self.cascades += other.cascades;
        self.descendants_reindexed += other.descendants_reindexed;
    }
}

/// Removal ids accumulated between refreshes / 待删除ID累加器
#[derive(Default)]
struct PendingRemovals {
    ids: BTreeSet<String>,
}

impl PendingRemovals {
    fn push(&mut self, content_id: i32) {
        self.ids.insert(content_id.to_string());
    }

    async fn flush(&mut self, gateway: &IndexMutationGateway, report: &mut SyncReport) -> Result<()> {
        if self.ids.is_empty() {
            return Ok(());
        }
        gateway.remove_by_ids(&self.ids).await?;
        report.ids_removed += self.ids.len();
        self.ids.clear();
        Ok(())
    }
}

const REINDEX_CHUNK_SIZE: usize = 500;

pub struct ContentChangeIndexSynchronizer {
    repository: Arc<dyn ContentRepository>,
    descendants: Arc<dyn DescendantEnumerator>,
    index: Arc<dyn ContentIndex>,
    gateway: IndexMutationGateway,
    builder: IndexDocumentBuilder,
}

impl ContentChangeIndexSynchronizer {
    pub fn new(
        repository: Arc<dyn ContentRepository>,
        descendants: Arc<dyn DescendantEnumerator>,
        registry: Arc<dyn ProtectedContentRegistry>,
        index: Arc<dyn ContentIndex>,
    ) -> Self {
        Self {
            descendants,
            gateway: IndexMutationGateway::new(index.clone()),
            index,
            builder: IndexDocumentBuilder::new(repository.clone(), registry),
            repository,
        }
    }

    pub fn index_name(&self) -> &str {
        self.gateway.index_name()
    }

    /// Refresh every item, or every item of the given content types / 按内容类型重建
    ///
    /// Items are refreshed shallow to deep in chunks, one synchronizer pass per chunk.
    pub async fn reindex_content(&self, content_types: Option<&BTreeSet<String>>) -> Result<SyncReport> {
        let ids = self.repository.content_ids(content_types).await?;
        let mut report = SyncReport::default();
        for chunk in ids.chunks(REINDEX_CHUNK_SIZE) {
            let records: Vec<ContentChangeRecord> =
                chunk.iter().copied().map(ContentChangeRecord::node_refreshed).collect();
            report.merge(self.synchronize(&records).await?);
        }
        info!(
            index = %self.gateway.index_name(),
            content_types = ?content_types,
            items = ids.len(),
            "Content reindexed"
        );
        Ok(report)
    }

    /// Reconcile the index with one batch of change records, in order / 同步一批变更
    ///
    /// Any repository or index failure aborts the whole batch. Re-running the same
    /// batch is safe.
    pub async fn synchronize(&self, records: &[ContentChangeRecord]) -> Result<SyncReport> {
        let mut report = SyncReport {
            records: records.len(),
            ..Default::default()
        };
        let mut pending = PendingRemovals::default();

        for record in records {
            match record.change_kind {
                ChangeKind::Removed => pending.push(record.content_id),
                ChangeKind::NodeRefreshed | ChangeKind::BranchRefreshed => {
                    pending.flush(&self.gateway, &mut report).await?;
                    self.refresh(record, &mut pending, &mut report).await?;
                }
            }
        }
        pending.flush(&self.gateway, &mut report).await?;

        info!(
            index = %self.gateway.index_name(),
            records = report.records,
            upserted = report.entries_upserted,
            removed = report.ids_removed,
            cascades = report.cascades,
            "Content changes synchronized"
        );
        Ok(report)
    }

    async fn refresh(
        &self,
        record: &ContentChangeRecord,
        pending: &mut PendingRemovals,
        report: &mut SyncReport,
    ) -> Result<()> {
        let content_id = record.content_id;

        let content = match self.repository.get_by_id(content_id).await? {
            Some(content) if !content.trashed => content,
            other => {
                debug!(content_id, trashed = other.is_some(), "Refreshed content is gone, removing");
                pending.push(content_id);
                report.reinterpreted_as_removal += 1;
                return Ok(());
            }
        };

        let existing = self.index.query_cultures(content_id).await?;
        let published_only = self.index.published_values_only();
        let entries = self.builder.build(&content, published_only).await?;
        let desired = cultures_of(&entries);
        let diff = CultureDiffResolver::resolve(&existing, &desired);

        if diff.remove_all {
            // unpublished, protected or no published culture left
            debug!(content_id, kind = ?record.change_kind, "No indexable culture, removing content");
            self.gateway.remove_by_id(&content_id.to_string()).await?;
            report.ids_removed += 1;
            return Ok(());
        }

        report.entries_upserted += entries.len();
        self.index.upsert(entries).await?;

        // unpublished descendants are already present in an all-content index
        if published_only && diff.requires_cascade() {
            debug!(content_id, added = ?diff.added, "New cultures, reindexing descendants");
            report.cascades += 1;
            let reindexed = self.reindex_descendants(content_id, report).await?;
            report.descendants_reindexed += reindexed;
        }

        let stale: BTreeSet<String> = diff.removed_entry_ids(content_id).into_iter().collect();
        if !stale.is_empty() {
            self.gateway.remove_by_ids(&stale).await?;
            report.ids_removed += stale.len();
        }
        Ok(())
    }

    /// Re-run lookup and upsert for every applicable descendant, one batch at a time
    async fn reindex_descendants(&self, content_id: i32, report: &mut SyncReport) -> Result<usize> {
        let mut batches = self.descendants.applicable_descendants(content_id);
        let mut reindexed = 0;

        while let Some(batch) = batches.try_next().await? {
            let mut entries: Vec<IndexEntry> = Vec::new();
            for descendant in &batch {
                let existing = self.index.query_cultures(descendant.id).await?;
                let descendant_entries = self.builder.build(descendant, true).await?;
                if descendant_entries.is_empty() {
                    continue;
                }
                let gained = cultures_of(&descendant_entries).difference(&existing);
                if !gained.is_empty() {
                    debug!(content_id = descendant.id, gained = ?gained, "Descendant became visible");
                }
                reindexed += 1;
                entries.extend(descendant_entries);
            }
            if entries.is_empty() {
                continue;
            }
            report.entries_upserted += entries.len();
            self.index.upsert(entries).await?;
        }
        Ok(reindexed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::MemoryContentStore;
    use crate::error::SyncError;
    use crate::models::{ContentItem, CultureSet};
    use crate::testing::{content, entry, IndexOp, RecordingIndex};
    use async_trait::async_trait;

    struct Fixture {
        store: Arc<MemoryContentStore>,
        index: Arc<RecordingIndex>,
        synchronizer: ContentChangeIndexSynchronizer,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryContentStore::new(2));
        let index = RecordingIndex::new();
        let synchronizer = ContentChangeIndexSynchronizer::new(
            store.clone(),
            store.clone(),
            store.clone(),
            index.clone(),
        );
        Fixture { store, index, synchronizer }
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn test_removals_flushed_before_refresh() {
        let f = fixture();
        f.store.upsert_item(content(3, &[], &["en"]));
        f.index.inner.upsert(vec![entry(1, "en", &[]), entry(2, "en", &[])]).await.unwrap();

        let records = [
            ContentChangeRecord::removed(1),
            ContentChangeRecord::removed(2),
            ContentChangeRecord::node_refreshed(3),
        ];
        f.synchronizer.synchronize(&records).await.unwrap();

        let ops = f.index.ops();
        assert_eq!(ops[0], IndexOp::Remove(ids(&["1", "2"])));
        assert_eq!(ops[1], IndexOp::QueryCultures(3));
        assert_eq!(ops[2], IndexOp::Upsert(ids(&["3|en"])));
        assert_eq!(f.index.entry_ids(), ids(&["3|en"]));
    }

    #[tokio::test]
    async fn test_trailing_removals_flushed_at_end() {
        let f = fixture();
        f.store.upsert_item(content(3, &[], &["en"]));
        f.index.inner.upsert(vec![entry(1, "en", &[])]).await.unwrap();

        let report = f
            .synchronizer
            .synchronize(&[ContentChangeRecord::node_refreshed(3), ContentChangeRecord::removed(1)])
            .await
            .unwrap();

        assert_eq!(f.index.ops().last(), Some(&IndexOp::Remove(ids(&["1"]))));
        assert_eq!(report.ids_removed, 1);
        assert_eq!(f.index.entry_ids(), ids(&["3|en"]));
    }

    #[tokio::test]
    async fn test_refresh_of_trashed_or_missing_content_removes_it() {
        let f = fixture();
        let mut trashed = content(4, &[], &["en", "fr"]);
        trashed.trashed = true;
        f.store.upsert_item(trashed);
        f.index
            .inner
            .upsert(vec![entry(4, "en", &[]), entry(4, "fr", &[]), entry(8, "en", &[])])
            .await
            .unwrap();

        let report = f
            .synchronizer
            .synchronize(&[
                ContentChangeRecord::node_refreshed(4),
                ContentChangeRecord::branch_refreshed(8),
            ])
            .await
            .unwrap();

        assert!(f.index.entry_ids().is_empty());
        assert_eq!(report.reinterpreted_as_removal, 2);
        assert!(!f.index.ops().iter().any(|op| matches!(op, IndexOp::Upsert(_))));
    }

    #[tokio::test]
    async fn test_new_ancestor_culture_cascades_to_descendants() {
        let f = fixture();
        let mut ancestor = content(1, &[], &["en"]);
        ancestor.published = false;
        f.store.upsert_item(ancestor);
        f.store.upsert_item(content(2, &[1], &["en"]));
        f.store.upsert_item(content(3, &[1, 2], &["en"]));

        f.synchronizer.synchronize(&[ContentChangeRecord::node_refreshed(1)]).await.unwrap();
        assert!(f.index.entry_ids().is_empty());

        f.store.update_item(1, |item| item.published = true);
        let report = f
            .synchronizer
            .synchronize(&[ContentChangeRecord::node_refreshed(1)])
            .await
            .unwrap();

        assert_eq!(f.index.entry_ids(), ids(&["1|en", "2|en", "3|en"]));
        assert_eq!(report.cascades, 1);
        assert_eq!(report.descendants_reindexed, 2);
    }

    #[tokio::test]
    async fn test_no_cascade_without_new_culture() {
        let f = fixture();
        f.store.upsert_item(content(1, &[], &["en"]));
        f.store.upsert_item(content(2, &[1], &["en"]));
        f.index.inner.upsert(vec![entry(1, "en", &[])]).await.unwrap();

        let report = f
            .synchronizer
            .synchronize(&[ContentChangeRecord::branch_refreshed(1)])
            .await
            .unwrap();

        assert_eq!(report.cascades, 0);
        assert_eq!(f.index.entry_ids(), ids(&["1|en"]));
    }

    #[tokio::test]
    async fn test_unpublished_culture_converges() {
        let f = fixture();
        let mut item = content(5, &[], &["en", "fr"]);
        item.cultures.get_mut("fr").unwrap().published = false;
        f.store.upsert_item(item.clone());
        f.index
            .inner
            .upsert(vec![entry(5, "en", &[]), entry(5, "fr", &[]), entry(6, "fr", &[5])])
            .await
            .unwrap();

        f.synchronizer.synchronize(&[ContentChangeRecord::node_refreshed(5)]).await.unwrap();

        let existing = f.index.inner.query_cultures(5).await.unwrap();
        assert_eq!(existing, item.published_cultures());
        assert!(f.index.ops().contains(&IndexOp::Remove(ids(&["5|fr"]))));
        assert_eq!(f.index.entry_ids(), ids(&["5|en", "6|fr"]));
    }

    #[tokio::test]
    async fn test_ancestor_culture_loss_independent_of_refresh_order() {
        let f = fixture();
        f.store.upsert_item(content(1, &[], &["en", "fr"]));
        f.store.upsert_item(content(2, &[1], &["en", "fr"]));
        f.synchronizer.synchronize(&[ContentChangeRecord::branch_refreshed(1)]).await.unwrap();
        assert_eq!(f.index.entry_ids(), ids(&["1|en", "1|fr", "2|en", "2|fr"]));

        f.store.update_item(1, |item| item.cultures.get_mut("fr").unwrap().published = false);
        f.synchronizer.synchronize(&[ContentChangeRecord::node_refreshed(1)]).await.unwrap();
        let after_ancestor = f.index.entry_ids();

        f.synchronizer.synchronize(&[ContentChangeRecord::node_refreshed(2)]).await.unwrap();
        assert_eq!(f.index.entry_ids(), after_ancestor);
        assert_eq!(after_ancestor, ids(&["1|en", "2|en", "2|fr"]));
    }

    #[tokio::test]
    async fn test_direct_refresh_under_unpublished_ancestor_indexes_nothing() {
        let f = fixture();
        let mut parent = content(1, &[], &["en"]);
        parent.published = false;
        f.store.upsert_item(parent);
        f.store.upsert_item(content(2, &[1], &["en"]));

        f.synchronizer.synchronize(&[ContentChangeRecord::node_refreshed(2)]).await.unwrap();
        assert!(f.index.entry_ids().is_empty());

        // and a stale entry under the unpublished ancestor is removed
        f.index.inner.upsert(vec![entry(2, "en", &[1])]).await.unwrap();
        f.synchronizer.synchronize(&[ContentChangeRecord::node_refreshed(2)]).await.unwrap();
        assert!(f.index.entry_ids().is_empty());
    }

    #[tokio::test]
    async fn test_all_content_index_keeps_unpublished_content() {
        let store = Arc::new(MemoryContentStore::new(10));
        let index = RecordingIndex::all_content();
        let synchronizer = ContentChangeIndexSynchronizer::new(
            store.clone(),
            store.clone(),
            store.clone(),
            index.clone(),
        );
        let mut draft = content(1, &[], &["en", "fr"]);
        draft.published = false;
        store.upsert_item(draft);
        store.upsert_item(content(2, &[1], &["en"]));

        synchronizer
            .synchronize(&[ContentChangeRecord::branch_refreshed(1), ContentChangeRecord::node_refreshed(2)])
            .await
            .unwrap();
        assert_eq!(index.entry_ids(), ids(&["1|en", "1|fr", "2|en"]));
        assert!(!index.ops().iter().any(|op| matches!(op, IndexOp::Remove(_))));

        // removal still removes from every kind of index
        synchronizer.synchronize(&[ContentChangeRecord::removed(1)]).await.unwrap();
        assert!(index.entry_ids().is_empty());
    }

    #[tokio::test]
    async fn test_reindex_content_of_types() {
        let f = fixture();
        let mut article = content(1, &[], &["en"]);
        article.content_type = "article".into();
        f.store.upsert_item(article);
        f.store.upsert_item(content(2, &[], &["en"]));

        let types = BTreeSet::from(["article".to_string()]);
        let report = f.synchronizer.reindex_content(Some(&types)).await.unwrap();
        assert_eq!(report.records, 1);
        assert_eq!(f.index.entry_ids(), ids(&["1|en"]));

        f.synchronizer.reindex_content(None).await.unwrap();
        assert_eq!(f.index.entry_ids(), ids(&["1|en", "2|en"]));
    }

    #[tokio::test]
    async fn test_no_desired_culture_removes_fully_without_cascade() {
        let f = fixture();
        let mut item = content(1, &[], &["en"]);
        item.published = false;
        f.store.upsert_item(item);
        f.store.upsert_item(content(2, &[1], &["en"]));
        f.index.inner.upsert(vec![entry(1, "en", &[]), entry(2, "en", &[1])]).await.unwrap();

        f.synchronizer.synchronize(&[ContentChangeRecord::branch_refreshed(1)]).await.unwrap();

        assert!(f.index.entry_ids().is_empty());
        assert!(!f.index.ops().contains(&IndexOp::QueryCultures(2)));
        assert!(!f.index.ops().iter().any(|op| matches!(op, IndexOp::Upsert(_))));
    }

    #[tokio::test]
    async fn test_protected_content_is_not_indexed() {
        let f = fixture();
        f.store.upsert_item(content(1, &[], &["en"]));
        f.store.protect(1);
        f.index.inner.upsert(vec![entry(1, "en", &[])]).await.unwrap();

        f.synchronizer.synchronize(&[ContentChangeRecord::node_refreshed(1)]).await.unwrap();
        assert!(f.index.entry_ids().is_empty());
    }

    #[tokio::test]
    async fn test_same_batch_twice_is_idempotent() {
        let f = fixture();
        f.store.upsert_item(content(1, &[], &["en", "fr"]));
        f.store.upsert_item(content(2, &[1], &["en", "fr"]));
        f.store.upsert_item(content(3, &[1, 2], &["fr"]));
        let mut unpublished = content(4, &[1], &["en"]);
        unpublished.published = false;
        f.store.upsert_item(unpublished);
        f.index.inner.upsert(vec![entry(4, "en", &[1]), entry(9, "en", &[])]).await.unwrap();

        let batch = [
            ContentChangeRecord::removed(9),
            ContentChangeRecord::branch_refreshed(1),
            ContentChangeRecord::node_refreshed(4),
            ContentChangeRecord::node_refreshed(77),
        ];
        f.synchronizer.synchronize(&batch).await.unwrap();
        let once = f.index.entry_ids();
        f.synchronizer.synchronize(&batch).await.unwrap();

        assert_eq!(f.index.entry_ids(), once);
        assert_eq!(once, ids(&["1|en", "1|fr", "2|en", "2|fr", "3|fr"]));
        for item_id in [1, 2, 3] {
            let item: ContentItem = f.store.get_by_id(item_id).await.unwrap().unwrap();
            let existing: CultureSet = f.index.inner.query_cultures(item_id).await.unwrap();
            assert_eq!(existing, item.published_cultures());
        }
    }

    struct BrokenRepository;

    #[async_trait]
    impl ContentRepository for BrokenRepository {
        async fn get_by_id(&self, content_id: i32) -> Result<Option<ContentItem>> {
            Err(SyncError::repository(content_id, "connection reset"))
        }

        async fn content_ids(&self, _content_types: Option<&BTreeSet<String>>) -> Result<Vec<i32>> {
            Err(SyncError::repository(0, "connection reset"))
        }
    }

    #[tokio::test]
    async fn test_repository_failure_aborts_batch() {
        let store = Arc::new(MemoryContentStore::new(10));
        let index = RecordingIndex::new();
        let synchronizer = ContentChangeIndexSynchronizer::new(
            Arc::new(BrokenRepository),
            store.clone(),
            store,
            index.clone(),
        );

        let result = synchronizer
            .synchronize(&[ContentChangeRecord::node_refreshed(1), ContentChangeRecord::removed(2)])
            .await;

        assert!(matches!(result, Err(SyncError::Repository { content_id: 1, .. })));
        assert!(index.ops().is_empty());
    }

    #[tokio::test]
    async fn test_index_failure_aborts_batch() {
        let f = fixture();
        f.store.upsert_item(content(1, &[], &["en"]));
        f.index.set_offline(true);

        let result = f.synchronizer.synchronize(&[ContentChangeRecord::node_refreshed(1)]).await;
        assert!(matches!(result, Err(SyncError::IndexUnavailable { .. })));
    }
}
