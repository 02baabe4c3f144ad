use std::fmt::{self, Debug, Display, Formatter};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{Span, field};

use crate::command_bus::{Command, CommandHandler};
use crate::dispatcher::{BackgroundDispatcher, DispatchPolicy, DispatchWarning, TaskQueue};
use crate::domain::{CreateUser, UserId, ValidationErrors, map_new_user, validate};
use crate::repository::{StoreError, UserExistenceQuery, UserStore, persist_user};
use crate::uniqueness::UniquenessChecker;
use crate::utils;

#[derive(thiserror::Error)]
pub enum CreateUserError {
    #[error(transparent)]
    Validation(ValidationErrors),

    #[error("{field} already exists")]
    Duplicate { field: &'static str },

    #[error("Failed to persist the new user.")]
    Persistence(#[source] anyhow::Error),
}

impl Debug for CreateUserError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        utils::error_chain_fmt(self, f)
    }
}

impl From<StoreError> for CreateUserError {
    fn from(e: StoreError) -> Self {
        match e {
            // The uniqueness check passed but a concurrent creation won the race.
            StoreError::UniqueViolation { field } => CreateUserError::Duplicate { field },
            StoreError::Unavailable(e) => CreateUserError::Persistence(e),
        }
    }
}

#[derive(Debug)]
pub struct CreateUserResult {
    pub id: UserId,
    /// Enqueue failures that happened after the user was stored.
    pub dispatch_warnings: Vec<DispatchWarning>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlingStage {
    Received,
    Validated,
    UniquenessChecked,
    Mapped,
    Persisted,
    Dispatched,
    Completed,
    Failed,
}

impl Display for HandlingStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandlingStage::Received => "received",
            HandlingStage::Validated => "validated",
            HandlingStage::UniquenessChecked => "uniqueness_checked",
            HandlingStage::Mapped => "mapped",
            HandlingStage::Persisted => "persisted",
            HandlingStage::Dispatched => "dispatched",
            HandlingStage::Completed => "completed",
            HandlingStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

fn enter(stage: HandlingStage) {
    Span::current().record("stage", field::display(stage));
    tracing::debug!(%stage, "Create user stage reached");
}

/// Runs the "create user" pipeline:
/// validate, check the email, map, stage and commit, then dispatch the
/// deferred persistence task.
///
/// Nothing is retried here. Dropping the returned future before the commit
/// finishes leaves no user behind.
pub struct CreateUserHandler {
    uniqueness: UniquenessChecker,
    store: Arc<dyn UserStore>,
    dispatcher: BackgroundDispatcher,
}

impl CreateUserHandler {
    pub fn new(
        existence: Arc<dyn UserExistenceQuery>,
        store: Arc<dyn UserStore>,
        queue: Arc<dyn TaskQueue>,
        policy: DispatchPolicy,
    ) -> Self {
        Self {
            uniqueness: UniquenessChecker::new(existence),
            store,
            dispatcher: BackgroundDispatcher::new(queue, policy),
        }
    }

    pub fn dispatch_policy(&self) -> DispatchPolicy {
        self.dispatcher.policy()
    }

    #[tracing::instrument(
        name = "Create user",
        skip_all,
        fields(
            user_email = %command.email,
            user_id = tracing::field::Empty,
            stage = tracing::field::Empty
        )
    )]
    pub async fn handle(&self, command: CreateUser) -> Result<CreateUserResult, CreateUserError> {
        enter(HandlingStage::Received);

        let outcome = self.run(&command).await;
        match &outcome {
            Ok(_) => enter(HandlingStage::Completed),
            Err(e) => {
                enter(HandlingStage::Failed);
                match e {
                    CreateUserError::Persistence(_) => tracing::error!(
                        error.cause_chain = ?e,
                        error.message = %e,
                        "Failed to create user"
                    ),
                    _ => tracing::info!(error.message = %e, "Rejected user creation"),
                }
            }
        }
        outcome
    }

    async fn run(&self, command: &CreateUser) -> Result<CreateUserResult, CreateUserError> {
        let valid = validate(command).map_err(CreateUserError::Validation)?;
        enter(HandlingStage::Validated);

        let exists = self
            .uniqueness
            .email_exists(valid.email().as_ref())
            .await
            .map_err(CreateUserError::Persistence)?;
        if exists {
            return Err(CreateUserError::Duplicate { field: "email" });
        }
        enter(HandlingStage::UniquenessChecked);

        let user = map_new_user(&valid);
        Span::current().record("user_id", field::display(user.id));
        enter(HandlingStage::Mapped);

        persist_user(self.store.as_ref(), &user).await?;
        enter(HandlingStage::Persisted);

        let dispatch_warnings = self.dispatcher.dispatch(&user).await;
        enter(HandlingStage::Dispatched);

        Ok(CreateUserResult {
            id: user.id,
            dispatch_warnings,
        })
    }
}

impl Command for CreateUser {
    const NAME: &'static str = "CreateUser";
    type Output = Result<CreateUserResult, CreateUserError>;
}

#[async_trait]
impl CommandHandler<CreateUser> for CreateUserHandler {
    async fn handle(&self, command: CreateUser) -> Result<CreateUserResult, CreateUserError> {
        CreateUserHandler::handle(self, command).await
    }
}
