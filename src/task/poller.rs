use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::MirageError;
use crate::provider::normalize::{Outcome, normalize};
use crate::provider::{Model, ProviderClient};
use crate::task::store::TaskStore;
use crate::task::{TaskStatus, TerminalUpdate};

/// Failure code written when the poll budget runs out. Distinct from
/// provider-reported failure codes so dashboards can tell them apart.
pub const POLL_TIMEOUT_CODE: &str = "poll_timeout";

/// Per-task polling schedule and budget.
#[derive(Clone, Copy, Debug)]
pub struct PollConfig {
    /// Delay before the first status query.
    pub initial_delay: Duration,
    /// Base inter-poll interval; grows 1.5x per attempt.
    pub base_interval: Duration,
    /// Backoff cap.
    pub max_interval: Duration,
    /// Attempt budget; exceeding it is a terminal `poll_timeout`.
    pub max_attempts: u32,
    /// Wall-clock budget; same terminal outcome.
    pub max_elapsed: Duration,
}

impl PollConfig {
    pub fn for_model(model: Model) -> Self {
        Self {
            initial_delay: model.poll_interval(),
            base_interval: model.poll_interval(),
            max_interval: model.max_poll_interval(),
            max_attempts: 120,
            max_elapsed: Duration::from_secs(15 * 60),
        }
    }
}

/// Delay before attempt `attempt + 1`: `min(base * 1.5^attempt, max)`.
pub fn next_poll_delay(config: &PollConfig, attempt: u32) -> Duration {
    let delay = config.base_interval.mul_f64(1.5_f64.powi(attempt.min(32) as i32));
    delay.min(config.max_interval)
}

/// Where the poller reads provider status from. [`ProviderClient`] is
/// the production source; tests script this seam.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch(&self, model: Model, external_task_id: &str) -> Result<Value, MirageError>;
}

#[async_trait]
impl StatusSource for ProviderClient {
    async fn fetch(&self, model: Model, external_task_id: &str) -> Result<Value, MirageError> {
        self.query_task(model, external_task_id).await
    }
}

/// Terminal report emitted to the supervisor channel when a poller ends.
#[derive(Debug)]
pub struct PollReport {
    pub task_id: String,
    pub model: Model,
    pub result: Result<TaskStatus, MirageError>,
}

/// Drives one task from PENDING to a terminal state: query, normalize,
/// wait, repeat, then exactly one Task Store write.
pub struct Poller {
    source: Arc<dyn StatusSource>,
    store: Arc<dyn TaskStore>,
    config: PollConfig,
}

impl Poller {
    pub fn new(
        source: Arc<dyn StatusSource>,
        store: Arc<dyn TaskStore>,
        config: PollConfig,
    ) -> Self {
        Self {
            source,
            store,
            config,
        }
    }

    /// Run to a terminal state. Returns the terminal status written, or
    /// an error only when the terminal write itself failed or the poller
    /// was cancelled; query/normalize errors are consumed as failed
    /// attempts and never escape.
    pub async fn run(
        &self,
        task_id: &str,
        model: Model,
        external_task_id: &str,
        cancel: CancellationToken,
    ) -> Result<TaskStatus, MirageError> {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        if !self.wait(self.config.initial_delay, &cancel).await {
            return Err(self.cancelled(task_id, started));
        }

        loop {
            attempt += 1;

            if attempt > self.config.max_attempts || started.elapsed() >= self.config.max_elapsed {
                let exhausted = MirageError::PollBudgetExceeded {
                    attempts: attempt - 1,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                };
                tracing::warn!(
                    task_id = %task_id,
                    service = model.service(),
                    external_task_id = %external_task_id,
                    error = %exhausted,
                    "poll budget exceeded, failing task"
                );
                self.store
                    .update(
                        task_id,
                        TerminalUpdate::failure(exhausted.failure_code(), exhausted.to_string()),
                    )
                    .await?;
                return Ok(TaskStatus::Failed);
            }

            match self.poll_once(model, external_task_id).await {
                Ok(Outcome::Pending) => {
                    tracing::debug!(
                        task_id = %task_id,
                        external_task_id = %external_task_id,
                        attempt = attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "task still pending"
                    );
                }
                Ok(Outcome::Ready(urls)) => {
                    tracing::info!(
                        task_id = %task_id,
                        service = model.service(),
                        external_task_id = %external_task_id,
                        urls = urls.len(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "generation succeeded"
                    );
                    self.store
                        .update(task_id, TerminalUpdate::success(urls))
                        .await?;
                    return Ok(TaskStatus::Success);
                }
                Ok(Outcome::Failed { code, message }) => {
                    tracing::info!(
                        task_id = %task_id,
                        service = model.service(),
                        external_task_id = %external_task_id,
                        code = %code,
                        "provider reported failure"
                    );
                    self.store
                        .update(task_id, TerminalUpdate::failure(code, message))
                        .await?;
                    return Ok(TaskStatus::Failed);
                }
                // Transport or normalization error: one failed attempt,
                // bounded by the budget. Never terminal by itself.
                Err(e) => {
                    tracing::warn!(
                        task_id = %task_id,
                        external_task_id = %external_task_id,
                        attempt = attempt,
                        error = %e,
                        "poll attempt failed"
                    );
                }
            }

            if !self.wait(next_poll_delay(&self.config, attempt), &cancel).await {
                return Err(self.cancelled(task_id, started));
            }
        }
    }

    async fn poll_once(&self, model: Model, external_task_id: &str) -> Result<Outcome, MirageError> {
        let raw = self.source.fetch(model, external_task_id).await?;
        normalize(model.encoding(), &raw)
    }

    /// Sleep, unless cancelled first. Returns false on cancellation.
    async fn wait(&self, delay: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn cancelled(&self, task_id: &str, started: Instant) -> MirageError {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            task_id = %task_id,
            elapsed_ms = elapsed_ms,
            "poller cancelled, task left pending"
        );
        MirageError::Cancelled(elapsed_ms)
    }
}
