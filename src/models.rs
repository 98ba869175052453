//! Core data model / 核心数据模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Separator between content id and culture in an index entry id / 索引条目ID分隔符
pub const ENTRY_ID_SEPARATOR: char = '|';

/// Identifier of a content item behind access control / 受保护内容ID
pub type ProtectedNodeId = i32;

/// Kind of change recorded for one content item / 内容变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Removed,
    NodeRefreshed,
    BranchRefreshed,
}

/// One change produced by the repository's change tracking / 内容变更记录
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentChangeRecord {
    pub content_id: i32,
    pub change_kind: ChangeKind,
}

impl ContentChangeRecord {
    pub fn removed(content_id: i32) -> Self {
        Self { content_id, change_kind: ChangeKind::Removed }
    }

    pub fn node_refreshed(content_id: i32) -> Self {
        Self { content_id, change_kind: ChangeKind::NodeRefreshed }
    }

    pub fn branch_refreshed(content_id: i32) -> Self {
        Self { content_id, change_kind: ChangeKind::BranchRefreshed }
    }
}

/// Kind of change to a configured language / 语言变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LanguageChangeKind {
    Added,
    Updated,
    Removed,
    CultureChanged,
}

impl LanguageChangeKind {
    /// Whether entries keyed by the old culture code can go stale
    pub fn invalidates_entries(&self) -> bool {
        matches!(self, Self::Removed | Self::CultureChanged)
    }
}

/// Unordered set of culture codes / 语言集合
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CultureSet(BTreeSet<String>);

impl CultureSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, culture: impl Into<String>) -> bool {
        self.0.insert(culture.into())
    }

    pub fn contains(&self, culture: &str) -> bool {
        self.0.contains(culture)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Cultures in `self` that are not in `other` / 差集
    pub fn difference(&self, other: &CultureSet) -> CultureSet {
        Self(self.0.difference(&other.0).cloned().collect())
    }
}

impl<S: Into<String>> FromIterator<S> for CultureSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Composite key `(content_id, culture)` of one index entry / 索引条目ID
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IndexEntryId {
    pub content_id: i32,
    pub culture: String,
}

impl IndexEntryId {
    pub fn new(content_id: i32, culture: impl Into<String>) -> Self {
        Self { content_id, culture: culture.into() }
    }
}

impl fmt::Display for IndexEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.content_id, ENTRY_ID_SEPARATOR, self.culture)
    }
}

impl FromStr for IndexEntryId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, culture) = s
            .split_once(ENTRY_ID_SEPARATOR)
            .ok_or_else(|| format!("missing culture in index entry id '{}'", s))?;
        let content_id = id
            .parse::<i32>()
            .map_err(|e| format!("invalid content id in '{}': {}", s, e))?;
        if culture.is_empty() {
            return Err(format!("empty culture in index entry id '{}'", s));
        }
        Ok(Self::new(content_id, culture))
    }
}

/// Target addressed by a removal id string / 删除操作的目标
///
/// A bare `"1234"` addresses every culture entry of content 1234,
/// `"1234|en-US"` addresses a single entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexKey {
    Content(i32),
    Entry(IndexEntryId),
}

impl IndexKey {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.contains(ENTRY_ID_SEPARATOR) {
            raw.parse::<IndexEntryId>().ok().map(Self::Entry)
        } else {
            raw.parse::<i32>().ok().map(Self::Content)
        }
    }

    pub fn content_id(&self) -> i32 {
        match self {
            Self::Content(id) => *id,
            Self::Entry(entry) => entry.content_id,
        }
    }
}

/// One culture variant of a content item / 内容的语言版本
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CultureVariant {
    pub name: String,
    #[serde(default)]
    pub published: bool,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Content item as seen by the repository / 内容项
///
/// `path` lists the ancestor ids from the top of the tree down to the item itself.
/// Invariant content carries a single culture variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: i32,
    pub parent_id: i32,
    pub path: Vec<i32>,
    pub content_type: String,
    #[serde(default)]
    pub trashed: bool,
    #[serde(default)]
    pub published: bool,
    #[serde(default)]
    pub cultures: BTreeMap<String, CultureVariant>,
}

impl ContentItem {
    /// Cultures currently published on this item / 已发布的语言
    pub fn published_cultures(&self) -> CultureSet {
        self.cultures
            .iter()
            .filter(|(_, variant)| variant.published)
            .map(|(culture, _)| culture.clone())
            .collect()
    }

    /// Whether `ancestor_id` appears on this item's path (self excluded) / 是否为祖先
    pub fn has_ancestor(&self, ancestor_id: i32) -> bool {
        self.path
            .iter()
            .take(self.path.len().saturating_sub(1))
            .any(|id| *id == ancestor_id)
    }
}

/// Document stored in the index for one culture variant / 索引文档
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: IndexEntryId,
    pub parent_id: i32,
    pub path: Vec<i32>,
    pub content_type: String,
    pub name: String,
    pub updated_at: Option<DateTime<Utc>>,
}

impl IndexEntry {
    pub fn content_id(&self) -> i32 {
        self.id.content_id
    }

    pub fn culture(&self) -> &str {
        &self.id.culture
    }

    /// Whether this entry belongs to `content_id` or one of its descendants / 是否属于该内容或其子孙
    pub fn is_within(&self, content_id: i32) -> bool {
        self.id.content_id == content_id || self.path.contains(&content_id)
    }
}
