//! Task queue seam
//!
//! The queue's storage belongs to the outer system. Recovery only needs to
//! insert subtasks, update statuses and pull the next ready task.

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use unstuck_core::{Result, Task, TaskId, TaskStatus, UnstuckError};

/// Ordered queue of tasks shared by every task driver
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Insert `subtasks`, in order, immediately ahead of `parent_id`
    async fn insert_subtasks(&self, parent_id: &str, subtasks: Vec<Task>) -> Result<()>;

    async fn set_status(&self, task_id: &str, status: TaskStatus) -> Result<()>;

    /// Claim the first `Ready` task, marking it `Running`
    async fn next_ready(&self) -> Result<Option<Task>>;

    async fn get(&self, task_id: &str) -> Result<Task>;
}

/// In-memory queue for tests and single-process runs
#[derive(Debug, Default)]
pub struct MemoryTaskQueue {
    tasks: RwLock<Vec<Task>>,
}

impl MemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        Self {
            tasks: RwLock::new(tasks),
        }
    }

    pub async fn push(&self, task: Task) {
        self.tasks.write().await.push(task);
    }

    /// Snapshot of the queue in order
    pub async fn tasks(&self) -> Vec<Task> {
        self.tasks.read().await.clone()
    }

    /// Queue order as task IDs
    pub async fn order(&self) -> Vec<TaskId> {
        self.tasks.read().await.iter().map(|t| t.id.clone()).collect()
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn insert_subtasks(&self, parent_id: &str, subtasks: Vec<Task>) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        let position = tasks
            .iter()
            .position(|t| t.id == parent_id)
            .ok_or_else(|| UnstuckError::TaskNotFound(parent_id.to_string()))?;

        if let Some(duplicate) = subtasks.iter().find(|s| tasks.iter().any(|t| t.id == s.id)) {
            return Err(UnstuckError::Queue(format!(
                "task {} already exists",
                duplicate.id
            )));
        }

        debug!(parent_id, count = subtasks.len(), "Inserting subtasks");
        for (offset, subtask) in subtasks.into_iter().enumerate() {
            tasks.insert(position + offset, subtask);
        }
        Ok(())
    }

    async fn set_status(&self, task_id: &str, status: TaskStatus) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| UnstuckError::TaskNotFound(task_id.to_string()))?;
        task.status = status;
        Ok(())
    }

    async fn next_ready(&self) -> Result<Option<Task>> {
        let mut tasks = self.tasks.write().await;
        Ok(tasks
            .iter_mut()
            .find(|t| t.status == TaskStatus::Ready)
            .map(|task| {
                task.status = TaskStatus::Running;
                task.clone()
            }))
    }

    async fn get(&self, task_id: &str) -> Result<Task> {
        self.tasks
            .read()
            .await
            .iter()
            .find(|t| t.id == task_id)
            .cloned()
            .ok_or_else(|| UnstuckError::TaskNotFound(task_id.to_string()))
    }
}
