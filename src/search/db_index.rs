//! 数据库搜索索引 / SQLite-backed content index
//!
//! 存储方案：
//! - index_entries表：每个语言版本一行，主键为条目ID（content_id|culture）
//! - path列以逗号包裹存储（",1,2,3,"），用LIKE匹配子孙节点
//! - index_meta表：存储索引更新时间等信息
//!
//! 特性：
//! - WAL模式（并发安全）
//! - 批量写入 + 锁冲突重试

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Row, Sqlite};
use std::collections::BTreeSet;
use std::path::Path;

use super::{ContentIndex, IndexPage, IndexStats};
use crate::error::{Result, SyncError};
use crate::models::{CultureSet, IndexEntry, IndexKey};

/// 搜索结果 / Search hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub entry_id: String,
    pub content_id: i32,
    pub culture: String,
    pub name: String,
    pub path: Vec<i32>,
    pub score: f32,
}

/// 数据库搜索索引
pub struct SqliteIndex {
    db: Pool<Sqlite>,
    name: String,
    published_values_only: bool,
}

/// 路径编码为 ",1,2,3," / Encode a path for LIKE matching
fn encode_path(path: &[i32]) -> String {
    let joined = path.iter().map(i32::to_string).collect::<Vec<_>>().join(",");
    format!(",{},", joined)
}

fn decode_path(raw: &str) -> Vec<i32> {
    raw.split(',').filter_map(|part| part.parse().ok()).collect()
}

/// 匹配自身及子孙节点的LIKE模式 / Pattern matching a node and its descendants
fn subtree_pattern(content_id: i32) -> String {
    format!("%,{},%", content_id)
}

fn is_locked(error: &sqlx::Error) -> bool {
    let message = error.to_string();
    message.contains("database is locked") || message.contains("SQLITE_BUSY")
}

impl SqliteIndex {
    /// 打开索引数据库文件（WAL模式）/ Open an index database file
    pub async fn open(db_path: &Path, busy_timeout_ms: u64) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db_url = format!("sqlite:{}?mode=rwc", db_path.to_string_lossy());

        let db = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&db_url)
            .await?;

        // 启用WAL模式，提高并发性能
        sqlx::query("PRAGMA journal_mode=WAL").execute(&db).await?;

        // 设置busy_timeout，避免锁超时
        sqlx::query(&format!("PRAGMA busy_timeout={}", busy_timeout_ms))
            .execute(&db)
            .await?;

        // 优化写入性能
        sqlx::query("PRAGMA synchronous=NORMAL").execute(&db).await?;

        tracing::info!("Index database opened: {:?} (WAL mode)", db_path);

        let index = Self::new(db, "content");
        index.init().await?;
        Ok(index)
    }

    /// 内存数据库（单连接）/ Private in-memory database, single connection
    pub async fn in_memory() -> Result<Self> {
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let index = Self::new(db, "content");
        index.init().await?;
        Ok(index)
    }

    /// 使用现有数据库连接池
    pub fn new(db: Pool<Sqlite>, name: impl Into<String>) -> Self {
        Self {
            db,
            name: name.into(),
            published_values_only: true,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// 设为内部索引（包含未发布内容）/ Mark as an index that also holds unpublished content
    pub fn with_published_values_only(mut self, published_values_only: bool) -> Self {
        self.published_values_only = published_values_only;
        self
    }

    /// 关闭数据库连接池 / Close database connection pool
    pub async fn close(&self) {
        self.db.close().await;
    }

    /// 初始化表结构，只在表不存在时创建
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS index_entries (
                entry_id TEXT PRIMARY KEY,
                content_id INTEGER NOT NULL,
                culture TEXT NOT NULL,
                parent_id INTEGER NOT NULL,
                path TEXT NOT NULL,
                content_type TEXT NOT NULL,
                name TEXT NOT NULL,
                name_lower TEXT NOT NULL,
                updated_at TEXT
            ) WITHOUT ROWID
        "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_content ON index_entries(content_id)")
            .execute(&self.db)
            .await?;

        // 索引：name_lower用于LIKE搜索
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_name ON index_entries(name_lower)")
            .execute(&self.db)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS index_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
        "#,
        )
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// 设置索引更新时间 / Set index last updated time
    async fn set_last_updated(&self) -> Result<()> {
        let now = Utc::now().timestamp();
        sqlx::query("INSERT OR REPLACE INTO index_meta (key, value) VALUES ('last_updated', ?)")
            .bind(now.to_string())
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// 获取索引更新时间 / Get index last updated time
    pub async fn get_last_updated(&self) -> Option<i64> {
        let result: Option<(String,)> =
            sqlx::query_as("SELECT value FROM index_meta WHERE key = 'last_updated'")
                .fetch_optional(&self.db)
                .await
                .ok()
                .flatten();

        result.and_then(|(v,)| v.parse::<i64>().ok())
    }

    /// 清空索引
    pub async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM index_entries").execute(&self.db).await?;
        sqlx::query("DELETE FROM index_meta").execute(&self.db).await?;
        Ok(())
    }

    /// 实际执行批量写入
    async fn do_upsert(&self, entries: &[IndexEntry]) -> std::result::Result<(), sqlx::Error> {
        let mut tx = self.db.begin().await?;

        for entry in entries {
            sqlx::query(
                r#"INSERT OR REPLACE INTO index_entries
                   (entry_id, content_id, culture, parent_id, path, content_type, name, name_lower, updated_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(entry.id.to_string())
            .bind(entry.content_id())
            .bind(entry.culture())
            .bind(entry.parent_id)
            .bind(encode_path(&entry.path))
            .bind(&entry.content_type)
            .bind(&entry.name)
            .bind(entry.name.to_lowercase())
            .bind(entry.updated_at.map(|t| t.to_rfc3339()))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await
    }

    async fn do_remove(&self, keys: &[IndexKey]) -> std::result::Result<u64, sqlx::Error> {
        let mut tx = self.db.begin().await?;
        let mut removed = 0;

        for key in keys {
            let result = match key {
                IndexKey::Content(content_id) => {
                    sqlx::query("DELETE FROM index_entries WHERE path LIKE ?")
                        .bind(subtree_pattern(*content_id))
                        .execute(&mut *tx)
                        .await?
                }
                IndexKey::Entry(entry_id) => {
                    sqlx::query("DELETE FROM index_entries WHERE entry_id = ?")
                        .bind(entry_id.to_string())
                        .execute(&mut *tx)
                        .await?
                }
            };
            removed += result.rows_affected();
        }

        tx.commit().await?;
        Ok(removed)
    }

    /// 名称搜索（LIKE查询）/ Name search, optionally restricted to one culture
    pub async fn search(&self, query: &str, culture: Option<&str>, limit: usize) -> Result<Vec<SearchHit>> {
        let query_lower = query.to_lowercase();
        let like_pattern = format!("%{}%", query_lower);

        let rows = sqlx::query(
            r#"
            SELECT entry_id, content_id, culture, name, path,
                CASE
                    WHEN name_lower = ? THEN 100
                    WHEN name_lower LIKE ? THEN 80
                    ELSE 30
                END as score
            FROM index_entries
            WHERE name_lower LIKE ? AND (? IS NULL OR culture = ?)
            ORDER BY score DESC, length(name) ASC
            LIMIT ?
            "#,
        )
        .bind(&query_lower)
        .bind(format!("{}%", query_lower))
        .bind(&like_pattern)
        .bind(culture)
        .bind(culture)
        .bind(limit as i64)
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .iter()
            .map(|row| SearchHit {
                entry_id: row.get("entry_id"),
                content_id: row.get("content_id"),
                culture: row.get("culture"),
                name: row.get("name"),
                path: decode_path(row.get::<&str, _>("path")),
                score: row.get::<i32, _>("score") as f32,
            })
            .collect())
    }

    /// 读取单个条目 / Load one entry
    pub async fn get_entry(&self, entry_id: &str) -> Result<Option<IndexEntry>> {
        let row = sqlx::query(
            "SELECT entry_id, parent_id, path, content_type, name, updated_at FROM index_entries WHERE entry_id = ?",
        )
        .bind(entry_id)
        .fetch_optional(&self.db)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let raw_id: String = row.get("entry_id");
        let id = raw_id
            .parse()
            .map_err(|e: String| SyncError::index_unavailable(&self.name, e))?;
        let updated_at: Option<String> = row.get("updated_at");

        Ok(Some(IndexEntry {
            id,
            parent_id: row.get("parent_id"),
            path: decode_path(row.get::<&str, _>("path")),
            content_type: row.get("content_type"),
            name: row.get("name"),
            updated_at: updated_at
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
        }))
    }

    /// 获取统计信息
    pub async fn get_stats(&self) -> IndexStats {
        let row = sqlx::query(
            "SELECT COUNT(*) as total, COUNT(DISTINCT content_id) as contents, COUNT(DISTINCT culture) as cultures FROM index_entries",
        )
        .fetch_one(&self.db)
        .await;

        let last_updated = self.get_last_updated().await;

        match row {
            Ok(r) => IndexStats {
                entry_count: r.get::<i64, _>("total") as u64,
                content_count: r.get::<i64, _>("contents") as u64,
                culture_count: r.get::<i64, _>("cultures") as u64,
                last_updated,
            },
            Err(_) => IndexStats::default(),
        }
    }
}

#[async_trait]
impl ContentIndex for SqliteIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn published_values_only(&self) -> bool {
        self.published_values_only
    }

    /// 批量写入 - 带重试机制
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        // 重试机制：最多重试3次
        let max_retries = 3;

        for attempt in 0..max_retries {
            match self.do_upsert(&entries).await {
                Ok(()) => {
                    self.set_last_updated().await?;
                    return Ok(());
                }
                Err(e) if is_locked(&e) && attempt + 1 < max_retries => {
                    // 数据库锁定，等待后重试
                    let delay = 100 * (attempt + 1) as u64;
                    tracing::debug!(
                        "Database locked, retrying in {}ms (attempt {}/{})",
                        delay,
                        attempt + 1,
                        max_retries
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(SyncError::index_unavailable(&self.name, "upsert retries exhausted"))
    }

    async fn remove_by_ids(&self, ids: &BTreeSet<String>) -> Result<()> {
        let mut keys: Vec<IndexKey> = Vec::with_capacity(ids.len());
        for id in ids {
            match IndexKey::parse(id) {
                Some(key) => keys.push(key),
                None => tracing::debug!(index = %self.name, id = %id, "Ignoring unparsable index id"),
            }
        }
        if keys.is_empty() {
            return Ok(());
        }

        let removed = self.do_remove(&keys).await?;
        if removed > 0 {
            self.set_last_updated().await?;
        }
        tracing::debug!(index = %self.name, requested = ids.len(), removed, "Removed index entries");
        Ok(())
    }

    async fn query_cultures(&self, content_id: i32) -> Result<CultureSet> {
        let cultures: Vec<String> =
            sqlx::query_scalar("SELECT culture FROM index_entries WHERE content_id = ?")
                .bind(content_id)
                .fetch_all(&self.db)
                .await?;
        Ok(cultures.into_iter().collect())
    }

    async fn query_by_content_ids_paged(
        &self,
        content_ids: &[i32],
        page: usize,
        page_size: usize,
    ) -> Result<IndexPage> {
        if content_ids.is_empty() {
            return Ok(IndexPage::default());
        }

        let placeholders = vec!["?"; content_ids.len()].join(",");

        let count_sql = format!(
            "SELECT COUNT(*) FROM index_entries WHERE content_id IN ({})",
            placeholders
        );
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        for id in content_ids {
            count_query = count_query.bind(*id);
        }
        let total = count_query.fetch_one(&self.db).await?;

        let page_sql = format!(
            "SELECT entry_id FROM index_entries WHERE content_id IN ({}) ORDER BY entry_id LIMIT ? OFFSET ?",
            placeholders
        );
        let mut page_query = sqlx::query_scalar::<_, String>(&page_sql);
        for id in content_ids {
            page_query = page_query.bind(*id);
        }
        let matches = page_query
            .bind(page_size as i64)
            .bind((page * page_size) as i64)
            .fetch_all(&self.db)
            .await?;

        Ok(IndexPage {
            matches,
            total_count: total as usize,
        })
    }
}
