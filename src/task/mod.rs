pub mod poller;
pub mod store;

use std::sync::Arc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::MirageError;
use crate::provider::request::GenerationRequest;
use crate::provider::{Model, ProviderClient};
use crate::task::poller::{PollConfig, PollReport, Poller, StatusSource};
use crate::task::store::TaskStore;

pub type TaskId = String;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Success,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

/// What the Task Creator hands the store: everything but the store-assigned id.
#[derive(Clone, Debug)]
pub struct TaskDraft {
    pub model: Model,
    pub external_task_id: String,
}

/// The single terminal write a task ever receives.
#[derive(Clone, Debug)]
pub struct TerminalUpdate {
    pub status: TaskStatus,
    pub result_urls: Option<Vec<String>>,
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
    pub completed_at: SystemTime,
}

impl TerminalUpdate {
    pub fn success(result_urls: Vec<String>) -> Self {
        Self {
            status: TaskStatus::Success,
            result_urls: Some(result_urls),
            failure_code: None,
            failure_message: None,
            completed_at: SystemTime::now(),
        }
    }

    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Failed,
            result_urls: None,
            failure_code: Some(code.into()),
            failure_message: Some(message.into()),
            completed_at: SystemTime::now(),
        }
    }
}

/// Persisted task row. `status` moves monotonically from Pending to
/// exactly one terminal state; `completed_at` is set at that moment and
/// never again.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub model: Model,
    pub external_task_id: String,
    pub status: TaskStatus,
    pub result_urls: Option<Vec<String>>,
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
    pub created_at: SystemTime,
    pub completed_at: Option<SystemTime>,
}

/// Orchestrator tying the provider client, the task store and the
/// per-task pollers together. One instance per process; pollers are
/// detached tokio tasks that share nothing but the store.
pub struct TaskRunner {
    provider: Arc<ProviderClient>,
    store: Arc<dyn TaskStore>,
    poll_override: Option<PollConfig>,
    shutdown: CancellationToken,
    reports: Option<mpsc::UnboundedSender<PollReport>>,
}

impl TaskRunner {
    pub fn new(provider: Arc<ProviderClient>, store: Arc<dyn TaskStore>) -> Self {
        Self {
            provider,
            store,
            poll_override: None,
            shutdown: CancellationToken::new(),
            reports: None,
        }
    }

    /// Replace the per-model poll schedule with a fixed one.
    pub fn with_poll_config(mut self, config: PollConfig) -> Self {
        self.poll_override = Some(config);
        self
    }

    /// Tie all pollers to an external shutdown signal. Cancelled pollers
    /// stop between attempts without writing a terminal state.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Observe every poller's terminal result on a channel, in addition
    /// to the logs. Store-write failures land here too.
    pub fn with_reports(mut self, reports: mpsc::UnboundedSender<PollReport>) -> Self {
        self.reports = Some(reports);
        self
    }

    /// Synchronous half of the flow: submit to the provider and return
    /// the external task id. The caller persists the PENDING row, then
    /// starts polling.
    pub async fn create_task(&self, request: &GenerationRequest) -> Result<String, MirageError> {
        self.provider.create_task(request).await
    }

    /// Full flow: create the provider task, persist the PENDING row, and
    /// start polling. Returns the store-assigned task id; completion is
    /// observed by re-reading the store.
    pub async fn submit(&self, request: &GenerationRequest) -> Result<TaskId, MirageError> {
        let external_task_id = self.provider.create_task(request).await?;
        let model = request.model();

        let task_id = self
            .store
            .create(TaskDraft {
                model,
                external_task_id: external_task_id.clone(),
            })
            .await?;

        self.start_polling(task_id.clone(), model, external_task_id);
        Ok(task_id)
    }

    /// Fire-and-forget: spawn the detached poller for a task whose
    /// PENDING row already exists. The handle is returned for
    /// supervisors; the caller path never awaits it.
    pub fn start_polling(
        &self,
        task_id: TaskId,
        model: Model,
        external_task_id: String,
    ) -> JoinHandle<()> {
        let config = self
            .poll_override
            .unwrap_or_else(|| PollConfig::for_model(model));
        let source: Arc<dyn StatusSource> = self.provider.clone();
        let poller = Poller::new(source, self.store.clone(), config);
        let cancel = self.shutdown.child_token();
        let reports = self.reports.clone();

        tokio::spawn(async move {
            let result = poller.run(&task_id, model, &external_task_id, cancel).await;

            match &result {
                Ok(status) => {
                    tracing::info!(task_id = %task_id, status = ?status, "polling finished")
                }
                Err(e) => {
                    tracing::error!(task_id = %task_id, error = %e, "polling aborted")
                }
            }

            if let Some(reports) = reports {
                // Receiver may be gone during shutdown; nothing to do.
                let _ = reports.send(PollReport {
                    task_id,
                    model,
                    result,
                });
            }
        })
    }
}
