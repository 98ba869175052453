//! Protected content sweeper / 受保护内容清理
//!
//! Access-control notifications do not say which node changed, so every trigger
//! re-reads the whole registry and removes all matching entries. Content that
//! stops being protected is NOT re-added here; it comes back on its next publish.

use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

use super::gateway::IndexMutationGateway;
use crate::config::SyncConfig;
use crate::content::ProtectedContentRegistry;
use crate::error::Result;
use crate::search::ContentIndex;

/// Summary of one sweep / 清理结果统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub protected_ids: usize,
    pub batches: usize,
    pub pages: usize,
    pub entries_removed: usize,
}

pub struct ProtectedContentIndexSweeper {
    registry: Arc<dyn ProtectedContentRegistry>,
    index: Arc<dyn ContentIndex>,
    gateway: IndexMutationGateway,
    batch_size: usize,
    page_size: usize,
}

impl ProtectedContentIndexSweeper {
    pub const DEFAULT_BATCH_SIZE: usize = 50;
    pub const DEFAULT_PAGE_SIZE: usize = 500;

    pub fn new(registry: Arc<dyn ProtectedContentRegistry>, index: Arc<dyn ContentIndex>) -> Self {
        Self {
            registry,
            gateway: IndexMutationGateway::new(index.clone()),
            index,
            batch_size: Self::DEFAULT_BATCH_SIZE,
            page_size: Self::DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_config(mut self, config: &SyncConfig) -> Self {
        self.batch_size = config.sweep_batch_size.max(1);
        self.page_size = config.sweep_page_size.max(1);
        self
    }

    /// Remove every index entry of currently protected content / 全量清理
    ///
    /// Indexes holding unpublished content keep protected entries and are skipped.
    pub async fn sweep(&self) -> Result<SweepReport> {
        if !self.index.published_values_only() {
            debug!(index = %self.gateway.index_name(), "Index keeps protected content, sweep skipped");
            return Ok(SweepReport::default());
        }
        let protected = self.registry.get_all_protected_node_ids().await?;
        let mut report = SweepReport {
            protected_ids: protected.len(),
            ..Default::default()
        };
        if protected.is_empty() {
            debug!("No protected content, sweep skipped");
            return Ok(report);
        }

        let mut matched: BTreeSet<String> = BTreeSet::new();
        for batch in protected.chunks(self.batch_size) {
            report.batches += 1;
            self.collect_batch(batch, &mut matched, &mut report).await?;
        }

        report.entries_removed = matched.len();
        self.gateway.remove_by_ids(&matched).await?;

        info!(
            index = %self.gateway.index_name(),
            protected = report.protected_ids,
            batches = report.batches,
            removed = report.entries_removed,
            "Protected content swept from index"
        );
        Ok(report)
    }

    /// Page through the id lookup for one batch until the reported total is reached
    async fn collect_batch(
        &self,
        batch: &[i32],
        matched: &mut BTreeSet<String>,
        report: &mut SweepReport,
    ) -> Result<()> {
        let mut page = 0;
        let mut total = usize::MAX;

        while page * self.page_size < total {
            let result = self
                .index
                .query_by_content_ids_paged(batch, page, self.page_size)
                .await?;
            report.pages += 1;
            total = result.total_count;
            if result.matches.is_empty() {
                break;
            }
            matched.extend(result.matches);
            page += 1;
        }
        Ok(())
    }
}
