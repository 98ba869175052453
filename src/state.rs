use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::AppConfig;
use crate::content::MemoryContentStore;
use crate::error::Result;
use crate::search::SqliteIndex;
use crate::sync::{ContentChangeIndexSynchronizer, IndexNotificationHandler, ProtectedContentIndexSweeper};
use crate::task::TaskQueue;

/// Indexing suspension state / 索引暂停状态
///
/// While suspended, notifications are dropped. The drop count tells the operator
/// whether a republish or sweep is needed after resuming.
pub struct IndexingState {
    suspended: AtomicBool,
    dropped: AtomicU64,
    last_dropped_at: RwLock<Option<DateTime<Utc>>>,
}

impl IndexingState {
    pub fn new() -> Self {
        Self {
            suspended: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            last_dropped_at: RwLock::new(None),
        }
    }

    pub fn suspend(&self) {
        self.suspended.store(true, Ordering::SeqCst);
        tracing::info!("Indexing suspended");
    }

    /// Resume indexing, returns true when notifications were dropped meanwhile / 恢复索引
    pub fn resume(&self) -> bool {
        self.suspended.store(false, Ordering::SeqCst);
        let dropped = self.dropped.swap(0, Ordering::SeqCst);
        *self.last_dropped_at.write() = None;
        if dropped > 0 {
            tracing::warn!("Indexing resumed, {} notification(s) were dropped", dropped);
        } else {
            tracing::info!("Indexing resumed");
        }
        dropped > 0
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
        *self.last_dropped_at.write() = Some(Utc::now());
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }

    pub fn last_dropped_at(&self) -> Option<DateTime<Utc>> {
        *self.last_dropped_at.read()
    }
}

impl Default for IndexingState {
    fn default() -> Self {
        Self::new()
    }
}

/// Wired components of one running engine / 运行时组件
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<MemoryContentStore>,
    pub index: Arc<SqliteIndex>,
    /// Index of all content, when configured / 内部索引
    pub internal_index: Option<Arc<SqliteIndex>>,
    pub queue: TaskQueue,
    pub indexing: Arc<IndexingState>,
    pub handler: IndexNotificationHandler,
}

impl AppState {
    /// Open the index databases and wire the sync components around `store`
    pub async fn build(config: AppConfig, store: Arc<MemoryContentStore>) -> Result<Self> {
        let index = Arc::new(SqliteIndex::open(&config.get_index_db_path(), config.index.busy_timeout_ms).await?);
        let internal_index = match config.get_internal_index_db_path() {
            Some(path) => Some(Arc::new(
                SqliteIndex::open(&path, config.index.busy_timeout_ms)
                    .await?
                    .with_name("internal")
                    .with_published_values_only(false),
            )),
            None => None,
        };
        Ok(Self::with_indexes(config, store, index, internal_index))
    }

    pub fn with_index(config: AppConfig, store: Arc<MemoryContentStore>, index: Arc<SqliteIndex>) -> Self {
        Self::with_indexes(config, store, index, None)
    }

    pub fn with_indexes(
        config: AppConfig,
        store: Arc<MemoryContentStore>,
        index: Arc<SqliteIndex>,
        internal_index: Option<Arc<SqliteIndex>>,
    ) -> Self {
        let queue = TaskQueue::start(config.queue.clone());
        let indexing = Arc::new(IndexingState::new());
        let (synchronizer, sweeper) = Self::pipeline(&config, &store, index.clone());
        let mut handler = IndexNotificationHandler::new(synchronizer, sweeper, Arc::new(queue.clone()), indexing.clone());
        if let Some(internal) = &internal_index {
            let (synchronizer, sweeper) = Self::pipeline(&config, &store, internal.clone());
            handler = handler.with_index(synchronizer, sweeper);
        }

        Self {
            config,
            store,
            index,
            internal_index,
            queue,
            indexing,
            handler,
        }
    }

    fn pipeline(
        config: &AppConfig,
        store: &Arc<MemoryContentStore>,
        index: Arc<SqliteIndex>,
    ) -> (Arc<ContentChangeIndexSynchronizer>, Arc<ProtectedContentIndexSweeper>) {
        let synchronizer = Arc::new(ContentChangeIndexSynchronizer::new(
            store.clone(),
            store.clone(),
            store.clone(),
            index.clone(),
        ));
        let sweeper = Arc::new(ProtectedContentIndexSweeper::new(store.clone(), index).with_config(&config.sync));
        (synchronizer, sweeper)
    }

    /// Close every open index / 关闭索引
    pub async fn close(&self) {
        self.index.close().await;
        if let Some(internal) = &self.internal_index {
            internal.close().await;
        }
    }

    /// Load a content snapshot file into a store / 加载内容快照
    pub fn load_store(config: &AppConfig, snapshot: &Path) -> Result<Arc<MemoryContentStore>> {
        let store = MemoryContentStore::load_snapshot(snapshot, config.sync.descendant_page_size)?;
        Ok(Arc::new(store))
    }
}
