//! Index notification handling / 索引通知处理
//!
//! Change notifications become deferred actions on the background queue. A
//! [`ChangeScope`] collects the records of one unit of work and only enqueues
//! them when completed, so a rolled-back unit never touches the index.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

use super::content_changes::ContentChangeIndexSynchronizer;
use super::protected_sweep::ProtectedContentIndexSweeper;
use crate::error::Result;
use crate::models::{ContentChangeRecord, LanguageChangeKind};
use crate::state::IndexingState;
use crate::task::{BackgroundTaskQueue, DeferredAction, TaskKind};

/// Apply one batch of change records to every index / 同步一批内容变更
pub struct SyncContentChanges {
    records: Vec<ContentChangeRecord>,
    synchronizers: Vec<Arc<ContentChangeIndexSynchronizer>>,
}

impl SyncContentChanges {
    pub fn new(records: Vec<ContentChangeRecord>, synchronizers: Vec<Arc<ContentChangeIndexSynchronizer>>) -> Self {
        Self { records, synchronizers }
    }
}

#[async_trait]
impl DeferredAction for SyncContentChanges {
    fn kind(&self) -> TaskKind {
        TaskKind::ContentSync
    }

    fn describe(&self) -> String {
        format!("Sync {} content change(s)", self.records.len())
    }

    async fn execute(&self) -> Result<()> {
        for synchronizer in &self.synchronizers {
            synchronizer.synchronize(&self.records).await?;
        }
        Ok(())
    }
}

/// Sweep protected content out of the indexes / 清理受保护内容
pub struct SweepProtectedContent {
    sweepers: Vec<Arc<ProtectedContentIndexSweeper>>,
}

impl SweepProtectedContent {
    pub fn new(sweepers: Vec<Arc<ProtectedContentIndexSweeper>>) -> Self {
        Self { sweepers }
    }
}

#[async_trait]
impl DeferredAction for SweepProtectedContent {
    fn kind(&self) -> TaskKind {
        TaskKind::ProtectedSweep
    }

    fn describe(&self) -> String {
        "Sweep protected content".to_string()
    }

    async fn execute(&self) -> Result<()> {
        for sweeper in &self.sweepers {
            sweeper.sweep().await?;
        }
        Ok(())
    }
}

/// Refresh all content, or the content of some types / 重建内容索引
pub struct ReindexContent {
    content_types: Option<BTreeSet<String>>,
    synchronizers: Vec<Arc<ContentChangeIndexSynchronizer>>,
}

impl ReindexContent {
    pub fn new(
        content_types: Option<BTreeSet<String>>,
        synchronizers: Vec<Arc<ContentChangeIndexSynchronizer>>,
    ) -> Self {
        Self {
            content_types,
            synchronizers,
        }
    }
}

#[async_trait]
impl DeferredAction for ReindexContent {
    fn kind(&self) -> TaskKind {
        TaskKind::ContentReindex
    }

    fn describe(&self) -> String {
        match &self.content_types {
            Some(types) => format!(
                "Reindex content of type(s) {}",
                types.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
            ),
            None => "Reindex all content".to_string(),
        }
    }

    async fn execute(&self) -> Result<()> {
        for synchronizer in &self.synchronizers {
            synchronizer.reindex_content(self.content_types.as_ref()).await?;
        }
        Ok(())
    }
}

/// Routes notifications to the indexes as deferred actions / 通知分发
///
/// Every index has its own synchronizer and sweeper. One notification becomes one
/// queued action covering all indexes.
#[derive(Clone)]
pub struct IndexNotificationHandler {
    synchronizers: Vec<Arc<ContentChangeIndexSynchronizer>>,
    sweepers: Vec<Arc<ProtectedContentIndexSweeper>>,
    queue: Arc<dyn BackgroundTaskQueue>,
    state: Arc<IndexingState>,
}

impl IndexNotificationHandler {
    pub fn new(
        synchronizer: Arc<ContentChangeIndexSynchronizer>,
        sweeper: Arc<ProtectedContentIndexSweeper>,
        queue: Arc<dyn BackgroundTaskQueue>,
        state: Arc<IndexingState>,
    ) -> Self {
        Self {
            synchronizers: vec![synchronizer],
            sweepers: vec![sweeper],
            queue,
            state,
        }
    }

    /// Also keep another index in sync / 添加索引
    pub fn with_index(
        mut self,
        synchronizer: Arc<ContentChangeIndexSynchronizer>,
        sweeper: Arc<ProtectedContentIndexSweeper>,
    ) -> Self {
        self.synchronizers.push(synchronizer);
        self.sweepers.push(sweeper);
        self
    }

    pub fn state(&self) -> &Arc<IndexingState> {
        &self.state
    }

    /// Start collecting records for one unit of work / 开始一个变更范围
    pub fn begin_scope(&self) -> ChangeScope {
        ChangeScope {
            handler: self.clone(),
            records: Vec::new(),
        }
    }

    /// Enqueue a sync of `records`, returns the task id when something was enqueued
    pub fn handle_content_changes(&self, records: Vec<ContentChangeRecord>) -> Result<Option<String>> {
        if records.is_empty() {
            return Ok(None);
        }
        if self.suspended("content changes") {
            return Ok(None);
        }
        let action = SyncContentChanges::new(records, self.synchronizers.clone());
        self.queue.enqueue(Arc::new(action)).map(Some)
    }

    /// Public access rules changed somewhere / 公共访问规则变更
    pub fn handle_public_access_changed(&self) -> Result<Option<String>> {
        if self.suspended("public access change") {
            return Ok(None);
        }
        let action = SweepProtectedContent::new(self.sweepers.clone());
        self.queue.enqueue(Arc::new(action)).map(Some)
    }

    /// Content types were refreshed, reindex their items / 内容类型变更
    ///
    /// Removed content types arrive as removal records of their content.
    pub fn handle_content_types_changed(&self, content_types: BTreeSet<String>) -> Result<Option<String>> {
        if content_types.is_empty() {
            return Ok(None);
        }
        if self.suspended("content type change") {
            return Ok(None);
        }
        let action = ReindexContent::new(Some(content_types), self.synchronizers.clone());
        self.queue.enqueue(Arc::new(action)).map(Some)
    }

    /// Languages changed / 语言变更
    ///
    /// Only a removed language or a changed culture code leaves stale entries, which
    /// a full reindex converges away.
    pub fn handle_languages_changed(&self, changes: &[LanguageChangeKind]) -> Result<Option<String>> {
        if !changes.iter().any(LanguageChangeKind::invalidates_entries) {
            debug!(changes = changes.len(), "Language changes keep entries valid");
            return Ok(None);
        }
        if self.suspended("language change") {
            return Ok(None);
        }
        let action = ReindexContent::new(None, self.synchronizers.clone());
        self.queue.enqueue(Arc::new(action)).map(Some)
    }

    fn suspended(&self, what: &str) -> bool {
        if !self.state.is_suspended() {
            return false;
        }
        self.state.record_dropped();
        warn!("Indexing suspended, {} dropped", what);
        true
    }
}

/// Records of one unit of work / 一个工作单元的变更记录
///
/// Dropping the scope without [`ChangeScope::complete`] discards the records.
pub struct ChangeScope {
    handler: IndexNotificationHandler,
    records: Vec<ContentChangeRecord>,
}

impl ChangeScope {
    pub fn record(&mut self, record: ContentChangeRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Hand the records over as a single deferred action
    pub fn complete(mut self) -> Result<Option<String>> {
        let records = std::mem::take(&mut self.records);
        self.handler.handle_content_changes(records)
    }
}

impl Drop for ChangeScope {
    fn drop(&mut self) {
        if !self.records.is_empty() {
            debug!(records = self.records.len(), "Change scope rolled back, records discarded");
        }
    }
}
