use std::fmt::{self, Debug, Formatter};

use async_trait::async_trait;

use crate::domain::User;
use crate::utils;

#[derive(thiserror::Error)]
pub enum StoreError {
    #[error("A stored user already uses this {field}.")]
    UniqueViolation { field: &'static str },

    #[error(transparent)]
    Unavailable(#[from] anyhow::Error),
}

impl Debug for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        utils::error_chain_fmt(self, f)
    }
}

/// Read side used by the uniqueness check.
#[async_trait]
pub trait UserExistenceQuery: Send + Sync {
    async fn email_exists(&self, email: &str) -> Result<bool, anyhow::Error>;
}

/// Durable user storage with stage-then-commit semantics.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UserUnitOfWork>, StoreError>;
}

/// Users added here are invisible to everyone until `commit` succeeds.
/// Dropping the unit of work without committing discards what was staged.
///
/// Adding a user whose id is already stored is a no-op and the stored user
/// is kept unchanged, so the same user can be persisted any number of times.
#[async_trait]
pub trait UserUnitOfWork: Send {
    fn add(&mut self, user: User);

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Stages and commits a single user. Shared by the request path and the
/// deferred task worker.
#[tracing::instrument(skip_all, fields(user_id = %user.id))]
pub async fn persist_user(store: &dyn UserStore, user: &User) -> Result<(), StoreError> {
    let mut unit_of_work = store.begin().await?;
    unit_of_work.add(user.clone());
    unit_of_work.commit().await
}
