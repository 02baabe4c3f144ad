use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::Duration;
use tracing::{Span, field::display};

use crate::configuration::WorkerSettings;
use crate::dispatcher::{DeferredTask, TaskId};
use crate::repository::{StoreError, UserStore, persist_user};

/// Consumer side of the task queue.
#[async_trait]
pub trait TaskSource: Send + Sync {
    /// Takes the oldest available task, if any. The task stays reserved for
    /// the caller until the lease is completed or dropped; a dropped lease
    /// puts the task back.
    async fn lease(&self) -> Result<Option<Box<dyn TaskLease>>, anyhow::Error>;
}

#[async_trait]
pub trait TaskLease: Send {
    fn id(&self) -> TaskId;

    fn task(&self) -> &DeferredTask;

    fn enqueued_at(&self) -> DateTime<Utc>;

    /// Removes the task from the queue for good.
    async fn complete(self: Box<Self>) -> Result<(), anyhow::Error>;
}

#[derive(Debug, PartialEq, Eq)]
pub enum ExecutionOutcome {
    TaskCompleted,
    TaskSkipped,
    EmptyQueue,
}

pub async fn run_worker_until_stopped(
    source: Arc<dyn TaskSource>,
    store: Arc<dyn UserStore>,
    settings: WorkerSettings,
) -> Result<(), anyhow::Error> {
    worker_loop(source, store, settings).await
}

async fn worker_loop(
    source: Arc<dyn TaskSource>,
    store: Arc<dyn UserStore>,
    settings: WorkerSettings,
) -> Result<(), anyhow::Error> {
    let mut rng = StdRng::from_entropy();
    let max_backoff_secs = settings.max_backoff_seconds.max(1);
    let mut backoff_secs = 1_u64;

    loop {
        match try_execute_task(source.as_ref(), store.as_ref()).await {
            Ok(ExecutionOutcome::EmptyQueue) => {
                backoff_secs = 1;
                tokio::time::sleep(settings.idle_poll()).await;
            }

            Ok(ExecutionOutcome::TaskCompleted | ExecutionOutcome::TaskSkipped) => {
                backoff_secs = 1;
            }

            Err(e) => {
                tracing::warn!(error.cause_chain = ?e, "Transient failure while executing task");
                // Add 0–20% random jitter to avoid sync storms
                let jitter = rng.gen_range(0.0..=0.2);
                let sleep_duration = Duration::from_secs_f64(backoff_secs as f64 * (1.0 + jitter));
                tokio::time::sleep(sleep_duration).await;

                backoff_secs = (backoff_secs * 2).min(max_backoff_secs);
            }
        }
    }
}

#[tracing::instrument(
    skip_all,
    fields(
        task_id = tracing::field::Empty,
        task_kind = tracing::field::Empty,
        user_id = tracing::field::Empty
    ),
)]
pub async fn try_execute_task(
    source: &dyn TaskSource,
    store: &dyn UserStore,
) -> Result<ExecutionOutcome, anyhow::Error> {
    let Some(lease) = source.lease().await? else {
        return Ok(ExecutionOutcome::EmptyQueue);
    };

    let queued_for = Utc::now() - lease.enqueued_at();
    Span::current()
        .record("task_id", display(lease.id()))
        .record("task_kind", lease.task().name());
    tracing::debug!(
        queued_for_ms = queued_for.num_milliseconds(),
        "Leased a deferred task"
    );

    let outcome = match lease.task() {
        DeferredTask::PersistUser { user } => {
            Span::current().record("user_id", display(user.id));

            match persist_user(store, user).await {
                Ok(()) => ExecutionOutcome::TaskCompleted,
                Err(StoreError::UniqueViolation { field }) => {
                    tracing::error!(
                        field,
                        "Skipping a deferred user persistence. \
                        Another stored user already owns this value.",
                    );
                    ExecutionOutcome::TaskSkipped
                }
                Err(e @ StoreError::Unavailable(_)) => {
                    return Err(anyhow::Error::new(e)
                        .context("Failed to persist a user from a deferred task"));
                }
            }
        }
    };

    lease
        .complete()
        .await
        .context("Failed to complete a deferred task")?;
    Ok(outcome)
}
