//! Content-side collaborators / 内容侧协作接口
//!
//! The repository, descendant traversal and access-control registry are owned by
//! the host platform. The synchronizer and sweeper only talk to these traits.

pub mod memory;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::{BTreeSet, HashSet};

use crate::error::Result;
use crate::models::{ContentItem, ProtectedNodeId};

pub use memory::{ContentSnapshot, MemoryContentStore};

/// Lazy stream of descendant batches / 子孙节点批次流
pub type DescendantBatches<'a> = BoxStream<'a, Result<Vec<ContentItem>>>;

/// Authoritative content repository / 内容仓库
#[async_trait]
pub trait ContentRepository: Send + Sync {
    /// Resolve a content item, `None` when it no longer exists / 获取内容
    async fn get_by_id(&self, content_id: i32) -> Result<Option<ContentItem>>;

    /// Every ancestor of `item` exists, is published and not trashed / 祖先路径是否全部已发布
    async fn is_path_published(&self, item: &ContentItem) -> Result<bool> {
        for &ancestor_id in item.path.iter().filter(|&&id| id != item.id) {
            match self.get_by_id(ancestor_id).await? {
                Some(ancestor) if ancestor.published && !ancestor.trashed => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Ids of all content, or only of the given content types, ordered shallow to deep
    /// 按内容类型列出内容ID
    async fn content_ids(&self, content_types: Option<&BTreeSet<String>>) -> Result<Vec<i32>>;
}

/// Paginated traversal of the descendants eligible for indexing / 可索引子孙节点遍历
pub trait DescendantEnumerator: Send + Sync {
    /// Batches are ordered shallow to deep. Only published, non-trashed descendants
    /// whose whole parent chain below `content_id` is published are yielded.
    fn applicable_descendants(&self, content_id: i32) -> DescendantBatches<'_>;
}

/// Access-control registry / 访问控制注册表
#[async_trait]
pub trait ProtectedContentRegistry: Send + Sync {
    async fn get_all_protected_node_ids(&self) -> Result<Vec<ProtectedNodeId>>;

    /// Whether any node on `path` is protected / 路径上是否有受保护节点
    async fn is_protected(&self, path: &[i32]) -> Result<bool> {
        let protected: HashSet<ProtectedNodeId> =
            self.get_all_protected_node_ids().await?.into_iter().collect();
        Ok(path.iter().any(|id| protected.contains(id)))
    }
}
