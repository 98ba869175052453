//! Culture diff between what the index holds and what it should hold / 语言差异计算

use crate::models::{CultureSet, IndexEntryId};

/// Outcome of comparing existing and desired cultures for one content item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CultureDiff {
    /// `desired − existing`
    pub added: CultureSet,
    /// `existing − desired`
    pub removed: CultureSet,
    /// Nothing should remain indexed for the item
    pub remove_all: bool,
}

impl CultureDiff {
    /// New cultures appeared, descendants may have become visible / 需要级联到子孙节点
    pub fn requires_cascade(&self) -> bool {
        !self.remove_all && !self.added.is_empty()
    }

    /// Entry ids of the cultures that are no longer desired / 需要删除的条目ID
    pub fn removed_entry_ids(&self, content_id: i32) -> Vec<String> {
        self.removed
            .iter()
            .map(|culture| IndexEntryId::new(content_id, culture).to_string())
            .collect()
    }
}

pub struct CultureDiffResolver;

impl CultureDiffResolver {
    pub fn resolve(existing: &CultureSet, desired: &CultureSet) -> CultureDiff {
        CultureDiff {
            added: desired.difference(existing),
            removed: existing.difference(desired),
            remove_all: desired.is_empty(),
        }
    }
}
