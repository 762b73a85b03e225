use std::collections::HashMap;
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::MirageError;
use crate::task::{TaskDraft, TaskId, TaskRecord, TaskStatus, TerminalUpdate};

/// The persisted-task collaborator. The core calls `create` once per
/// task (before any poll starts) and `update` exactly once, at the
/// terminal transition. Row atomicity is the store's concern.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, draft: TaskDraft) -> Result<TaskId, MirageError>;

    async fn update(&self, task_id: &str, update: TerminalUpdate) -> Result<(), MirageError>;
}

/// Reference store backing the binary and the tests. Enforces the task
/// lifecycle invariants a real datastore would carry in its schema:
/// unknown ids are rejected, and a terminal row never changes again.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    rows: HashMap<TaskId, TaskRecord>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, task_id: &str) -> Option<TaskRecord> {
        self.inner.lock().await.rows.get(task_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl TaskStore for InMemoryStore {
    async fn create(&self, draft: TaskDraft) -> Result<TaskId, MirageError> {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let id = format!("task-{}", inner.next_id);

        inner.rows.insert(
            id.clone(),
            TaskRecord {
                id: id.clone(),
                model: draft.model,
                external_task_id: draft.external_task_id,
                status: TaskStatus::Pending,
                result_urls: None,
                failure_code: None,
                failure_message: None,
                created_at: SystemTime::now(),
                completed_at: None,
            },
        );

        Ok(id)
    }

    async fn update(&self, task_id: &str, update: TerminalUpdate) -> Result<(), MirageError> {
        if !update.status.is_terminal() {
            return Err(MirageError::StoreWrite(format!(
                "non-terminal update for task {task_id}"
            )));
        }

        let mut inner = self.inner.lock().await;
        let row = inner
            .rows
            .get_mut(task_id)
            .ok_or_else(|| MirageError::StoreWrite(format!("unknown task: {task_id}")))?;

        if row.status.is_terminal() {
            return Err(MirageError::StoreWrite(format!(
                "task {task_id} is already terminal"
            )));
        }

        row.status = update.status;
        row.result_urls = update.result_urls;
        row.failure_code = update.failure_code;
        row.failure_message = update.failure_message;
        row.completed_at = Some(update.completed_at);

        Ok(())
    }
}
