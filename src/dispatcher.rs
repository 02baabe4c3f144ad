//! Hand-off of follow-up work to a background task queue.
//!
//! After a user is committed the handler asks the queue to run the
//! persistence step again later. The handler only waits for the queue to
//! acknowledge the task, never for the task to run.
//!
//! [`DispatchPolicy::Once`] enqueues a single task. [`DispatchPolicy::Redundant`]
//! enqueues the same task twice, the second time from a spawned task, which
//! is the behaviour of the system this crate replaces. Both are safe because
//! re-persisting a stored user is a no-op (see [`crate::repository::UserUnitOfWork`]).

use std::fmt::{self, Debug, Display, Formatter};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use crate::domain::User;
use crate::utils;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for TaskId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeferredTask {
    PersistUser { user: User },
}

impl DeferredTask {
    pub fn name(&self) -> &'static str {
        match self {
            DeferredTask::PersistUser { .. } => "persist_user",
        }
    }
}

#[derive(thiserror::Error)]
pub enum DispatchError {
    #[error("The task queue did not accept the task.")]
    Rejected(#[source] anyhow::Error),

    #[error("The enqueue call was interrupted before it was acknowledged.")]
    Interrupted(#[from] tokio::task::JoinError),
}

impl Debug for DispatchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        utils::error_chain_fmt(self, f)
    }
}

/// At-least-once task queue. `enqueue` returns once the task is accepted.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: DeferredTask) -> Result<TaskId, DispatchError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchPolicy {
    #[default]
    Once,
    Redundant,
}

/// An enqueue that failed after the user was already stored.
#[derive(Debug)]
pub struct DispatchWarning {
    pub attempt: usize,
    pub error: DispatchError,
}

impl Display for DispatchWarning {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "enqueue attempt {} failed: {}", self.attempt, self.error)
    }
}

pub struct BackgroundDispatcher {
    queue: Arc<dyn TaskQueue>,
    policy: DispatchPolicy,
}

impl BackgroundDispatcher {
    pub fn new(queue: Arc<dyn TaskQueue>, policy: DispatchPolicy) -> Self {
        Self { queue, policy }
    }

    pub fn policy(&self) -> DispatchPolicy {
        self.policy
    }

    /// Enqueues the deferred persistence of `user` according to the policy.
    /// Failures are logged and handed back as warnings; they never fail the
    /// caller.
    #[tracing::instrument(
        name = "Dispatch deferred user persistence",
        skip_all,
        fields(user_id = %user.id, policy = ?self.policy)
    )]
    pub async fn dispatch(&self, user: &User) -> Vec<DispatchWarning> {
        let task = DeferredTask::PersistUser { user: user.clone() };
        let mut warnings = Vec::new();

        if let Err(error) = self.queue.enqueue(task.clone()).await {
            warnings.push(DispatchWarning { attempt: 1, error });
        }

        if self.policy == DispatchPolicy::Redundant {
            let queue = Arc::clone(&self.queue);
            let handle =
                tokio::spawn(async move { queue.enqueue(task).await }.in_current_span());
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Err(e.into()),
            };
            if let Err(error) = outcome {
                warnings.push(DispatchWarning { attempt: 2, error });
            }
        }

        for warning in &warnings {
            tracing::warn!(
                error.cause_chain = ?warning.error,
                error.message = %warning.error,
                attempt = warning.attempt,
                "Failed to enqueue deferred user persistence. \
                The user is already stored, continuing.",
            );
        }

        warnings
    }
}
