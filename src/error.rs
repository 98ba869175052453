//! Error types / 错误类型
//!
//! Infrastructure failures (index, repository, registry) propagate and abort the
//! current deferred action. Logical inconsistencies never reach this type.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Index transport unavailable / 索引不可用
    #[error("index '{index}' unavailable: {message}")]
    IndexUnavailable { index: String, message: String },

    /// Content repository lookup failed / 内容仓库查询失败
    #[error("content repository error for {content_id}: {message}")]
    Repository { content_id: i32, message: String },

    /// Access-control registry unreachable / 访问控制注册表不可用
    #[error("protected content registry error: {0}")]
    Registry(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    /// Background queue is shut down / 后台队列已关闭
    #[error("task queue closed")]
    QueueClosed,
}

impl SyncError {
    pub fn index_unavailable(index: impl Into<String>, message: impl Into<String>) -> Self {
        Self::IndexUnavailable {
            index: index.into(),
            message: message.into(),
        }
    }

    pub fn repository(content_id: i32, message: impl Into<String>) -> Self {
        Self::Repository {
            content_id,
            message: message.into(),
        }
    }
}
