use serde::{Deserialize, Serialize};

use super::models::TaskSummary;

/// 任务类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// 内容变更同步
    ContentSync,
    /// 受保护内容清理
    ProtectedSweep,
    /// 按内容类型重建
    ContentReindex,
}

/// 任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// 任务事件（广播给订阅者）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    TaskCreated { task: TaskSummary },
    TaskUpdated { task: TaskSummary },
    TaskCompleted { task: TaskSummary },
    TaskFailed { task: TaskSummary },
}

impl TaskEvent {
    pub fn task(&self) -> &TaskSummary {
        match self {
            Self::TaskCreated { task }
            | Self::TaskUpdated { task }
            | Self::TaskCompleted { task }
            | Self::TaskFailed { task } => task,
        }
    }
}
