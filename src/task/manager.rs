use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use chrono::Utc;

use super::models::{BackgroundTaskQueue, DeferredAction, Task, TaskSummary};
use super::types::{TaskEvent, TaskStatus};
use crate::config::QueueConfig;
use crate::error::{Result, SyncError};

/// 任务存储（工作线程与队列句柄共享）
struct TaskStore {
    tasks: RwLock<HashMap<String, Task>>,
    finished: RwLock<VecDeque<String>>,
    event_sender: broadcast::Sender<TaskEvent>,
    config: QueueConfig,
}

impl TaskStore {
    fn broadcast(&self, event: TaskEvent) {
        let _ = self.event_sender.send(event);
    }

    /// 标记运行并返回要执行的动作
    fn begin_attempt(&self, task_id: &str) -> Option<(Arc<dyn DeferredAction>, u32)> {
        let mut tasks = self.tasks.write();
        let task = tasks.get_mut(task_id)?;
        task.attempts += 1;
        task.status = TaskStatus::Running;
        task.started_at.get_or_insert_with(Utc::now);
        let result = (task.action.clone(), task.attempts);
        let summary = TaskSummary::from(&*task);
        drop(tasks);
        self.broadcast(TaskEvent::TaskUpdated { task: summary });
        Some(result)
    }

    /// 失败后是否还能重试
    fn can_retry(&self, task_id: &str) -> bool {
        self.tasks
            .read()
            .get(task_id)
            .map(Task::can_retry)
            .unwrap_or(false)
    }

    fn finish(&self, task_id: &str, error: Option<String>) {
        let mut tasks = self.tasks.write();
        let Some(task) = tasks.get_mut(task_id) else {
            return;
        };
        task.finished_at = Some(Utc::now());
        task.status = if error.is_some() {
            TaskStatus::Failed
        } else {
            TaskStatus::Completed
        };
        task.error = error;
        let summary = TaskSummary::from(&*task);
        drop(tasks);

        self.record_finished(task_id);
        let event = match summary.status {
            TaskStatus::Failed => TaskEvent::TaskFailed { task: summary },
            _ => TaskEvent::TaskCompleted { task: summary },
        };
        self.broadcast(event);
    }

    /// 只保留最近的已完成任务
    fn record_finished(&self, task_id: &str) {
        let mut finished = self.finished.write();
        finished.push_back(task_id.to_string());
        while finished.len() > self.config.history_limit {
            if let Some(evicted) = finished.pop_front() {
                self.tasks.write().remove(&evicted);
            }
        }
    }

    async fn run(&self, task_id: &str) {
        let delay = Duration::from_millis(self.config.retry_delay_ms);
        loop {
            let Some((action, attempt)) = self.begin_attempt(task_id) else {
                return;
            };
            match action.execute().await {
                Ok(()) => {
                    tracing::info!(task_id, attempt, "Deferred action completed: {}", action.describe());
                    self.finish(task_id, None);
                    return;
                }
                Err(e) if self.can_retry(task_id) => {
                    tracing::warn!(task_id, attempt, "Deferred action failed, retrying: {}", e);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => {
                    tracing::error!(task_id, attempt, "Deferred action failed: {}", e);
                    self.finish(task_id, Some(e.to_string()));
                    return;
                }
            }
        }
    }
}

/// 后台任务队列（无界通道 + 固定数量工作线程，失败自动重试）
#[derive(Clone)]
pub struct TaskQueue {
    store: Arc<TaskStore>,
    sender: mpsc::UnboundedSender<String>,
}

impl TaskQueue {
    /// 创建队列并启动工作线程，需要在 tokio 运行时内调用
    pub fn start(config: QueueConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel::<String>();
        let (event_sender, _) = broadcast::channel(256);
        let workers = config.workers.max(1);
        let store = Arc::new(TaskStore {
            tasks: RwLock::new(HashMap::new()),
            finished: RwLock::new(VecDeque::new()),
            event_sender,
            config,
        });

        let receiver = Arc::new(Mutex::new(receiver));
        for worker in 0..workers {
            let store = store.clone();
            let receiver = receiver.clone();
            tokio::spawn(async move {
                loop {
                    let next = receiver.lock().await.recv().await;
                    let Some(task_id) = next else {
                        break;
                    };
                    store.run(&task_id).await;
                }
                tracing::debug!(worker, "Task worker stopped");
            });
        }
        tracing::debug!(workers, "Task queue started");

        Self { store, sender }
    }

    /// 订阅任务事件
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.store.event_sender.subscribe()
    }

    pub fn get_task(&self, task_id: &str) -> Option<TaskSummary> {
        self.store.tasks.read().get(task_id).map(TaskSummary::from)
    }

    /// 列出所有任务（按创建时间排序）
    pub fn list_tasks(&self) -> Vec<TaskSummary> {
        let mut tasks: Vec<TaskSummary> = self
            .store
            .tasks
            .read()
            .values()
            .map(TaskSummary::from)
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        tasks
    }

    /// 等待任务结束，未知任务返回 None
    pub async fn wait_for_task(&self, task_id: &str) -> Option<TaskSummary> {
        let mut events = self.subscribe();
        loop {
            match self.get_task(task_id) {
                Some(task) if task.status.is_terminal() => return Some(task),
                Some(_) => {}
                None => return None,
            }
            match events.recv().await {
                Ok(event) if event.task().id == task_id && event.task().status.is_terminal() => {
                    return Some(event.task().clone());
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return self.get_task(task_id),
            }
        }
    }
}

impl BackgroundTaskQueue for TaskQueue {
    fn enqueue(&self, action: Arc<dyn DeferredAction>) -> Result<String> {
        let task = Task::new(action, self.store.config.max_attempts);
        let task_id = task.id.clone();
        let summary = TaskSummary::from(&task);
        self.store.tasks.write().insert(task_id.clone(), task);
        self.store.broadcast(TaskEvent::TaskCreated { task: summary });

        if self.sender.send(task_id.clone()).is_err() {
            self.store.tasks.write().remove(&task_id);
            return Err(SyncError::QueueClosed);
        }
        tracing::debug!(task_id = %task_id, "Deferred action enqueued");
        Ok(task_id)
    }
}
