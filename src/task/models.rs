use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::types::{TaskKind, TaskStatus};
use crate::error::Result;

/// 延迟执行的动作（事务提交后在后台运行，不持久化）
#[async_trait]
pub trait DeferredAction: Send + Sync {
    fn kind(&self) -> TaskKind;

    /// 任务显示名称
    fn describe(&self) -> String;

    async fn execute(&self) -> Result<()>;
}

/// 后台队列接口
pub trait BackgroundTaskQueue: Send + Sync {
    /// 入队并立即返回任务ID
    fn enqueue(&self, action: Arc<dyn DeferredAction>) -> Result<String>;
}

/// 任务记录
#[derive(Clone)]
pub struct Task {
    pub id: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub name: String,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub action: Arc<dyn DeferredAction>,
}

impl Task {
    pub fn new(action: Arc<dyn DeferredAction>, max_attempts: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: action.kind(),
            status: TaskStatus::Pending,
            name: action.describe(),
            attempts: 0,
            max_attempts: max_attempts.max(1),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
            action,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

/// 轻量级任务信息（用于事件广播和查询）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSummary {
    pub id: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub name: String,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl From<&Task> for TaskSummary {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            kind: task.kind,
            status: task.status,
            name: task.name.clone(),
            attempts: task.attempts,
            max_attempts: task.max_attempts,
            created_at: task.created_at,
            started_at: task.started_at,
            finished_at: task.finished_at,
            error: task.error.clone(),
        }
    }
}
