//! Index mutation gateway / 索引删除网关
//!
//! The only path through which the sync components remove anything from an index.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::Result;
use crate::search::ContentIndex;

#[derive(Clone)]
pub struct IndexMutationGateway {
    index: Arc<dyn ContentIndex>,
}

impl IndexMutationGateway {
    pub fn new(index: Arc<dyn ContentIndex>) -> Self {
        Self { index }
    }

    pub fn index_name(&self) -> &str {
        self.index.name()
    }

    /// Remove one id, a no-op when absent / 删除单个ID
    pub async fn remove_by_id(&self, id: &str) -> Result<()> {
        let ids = BTreeSet::from([id.to_string()]);
        self.remove_by_ids(&ids).await
    }

    /// Remove a set of ids. Safe to repeat; only transport failures are errors. / 批量删除
    pub async fn remove_by_ids(&self, ids: &BTreeSet<String>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        tracing::debug!(index = %self.index.name(), count = ids.len(), "Removing from index");
        self.index.remove_by_ids(ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{entry, IndexOp, RecordingIndex};

    #[tokio::test]
    async fn test_empty_removal_skips_index() {
        let index = RecordingIndex::new();
        let gateway = IndexMutationGateway::new(index.clone());

        gateway.remove_by_ids(&BTreeSet::new()).await.unwrap();
        assert!(index.ops().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_removal_converges() {
        let index = RecordingIndex::new();
        index.inner.upsert(vec![entry(5, "en", &[]), entry(6, "en", &[])]).await.unwrap();
        let gateway = IndexMutationGateway::new(index.clone());

        gateway.remove_by_id("5|en").await.unwrap();
        gateway.remove_by_id("5|en").await.unwrap();
        gateway.remove_by_id("5").await.unwrap();

        assert_eq!(index.entry_ids(), vec!["6|en".to_string()]);
        assert_eq!(
            index.ops(),
            vec![
                IndexOp::Remove(vec!["5|en".into()]),
                IndexOp::Remove(vec!["5|en".into()]),
                IndexOp::Remove(vec!["5".into()]),
            ]
        );
    }

    #[tokio::test]
    async fn test_transport_failure_propagates() {
        let index = RecordingIndex::new();
        index.set_offline(true);
        let gateway = IndexMutationGateway::new(index);

        assert!(gateway.remove_by_id("1").await.is_err());
    }
}
