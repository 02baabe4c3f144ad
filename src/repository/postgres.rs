use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use crate::dispatcher::{DeferredTask, DispatchError, TaskId, TaskQueue};
use crate::domain::User;
use crate::repository::{
    PgTransaction, StoreError, UserExistenceQuery, UserStore, UserUnitOfWork,
};
use crate::task_worker::{TaskLease, TaskSource};

const USERS_EMAIL_CONSTRAINT: &str = "users_email_key";

#[derive(Clone, Debug)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserExistenceQuery for PgUserStore {
    #[tracing::instrument(name = "Check for an existing user email", skip(self))]
    async fn email_exists(&self, email: &str) -> Result<bool, anyhow::Error> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM users
                WHERE email = $1
            )
            "#,
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .context("Failed to check whether a user with this email exists")?;
        Ok(exists)
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn begin(&self) -> Result<Box<dyn UserUnitOfWork>, StoreError> {
        let transaction = self
            .pool
            .begin()
            .await
            .context("Failed to acquire a Postgres connection from the pool")?;
        Ok(Box::new(PgUserUnitOfWork {
            transaction,
            staged: Vec::new(),
        }))
    }
}

/// Staged users are written inside one transaction at commit time. Dropping
/// the unit of work rolls the transaction back.
pub struct PgUserUnitOfWork {
    transaction: PgTransaction,
    staged: Vec<User>,
}

#[async_trait]
impl UserUnitOfWork for PgUserUnitOfWork {
    fn add(&mut self, user: User) {
        self.staged.push(user);
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let PgUserUnitOfWork {
            mut transaction,
            staged,
        } = *self;

        for user in &staged {
            insert_user(&mut transaction, user).await?;
        }

        transaction
            .commit()
            .await
            .context("Failed to commit SQL transaction to store a new user")?;
        Ok(())
    }
}

#[tracing::instrument(skip_all, fields(user_id = %user.id))]
async fn insert_user(transaction: &mut PgTransaction, user: &User) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO users (id, first_name, last_name, email)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(user.id.as_uuid())
    .bind(&user.first_name)
    .bind(&user.last_name)
    .bind(&user.email)
    .execute(&mut **transaction)
    .await
    .map_err(map_insert_error)?;
    Ok(())
}

fn map_insert_error(e: sqlx::Error) -> StoreError {
    let violated = match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            Some(match db.constraint() {
                Some(USERS_EMAIL_CONSTRAINT) => "email",
                _ => "id",
            })
        }
        _ => None,
    };

    match violated {
        Some(field) => StoreError::UniqueViolation { field },
        None => StoreError::Unavailable(anyhow::Error::new(e).context("Failed to insert new user")),
    }
}

#[derive(Clone, Debug)]
pub struct PgTaskQueue {
    pool: PgPool,
}

impl PgTaskQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskQueue for PgTaskQueue {
    #[tracing::instrument(skip_all, fields(task_kind = task.name()))]
    async fn enqueue(&self, task: DeferredTask) -> Result<TaskId, DispatchError> {
        let id = TaskId::generate();
        sqlx::query(
            r#"
            INSERT INTO user_task_queue (id, payload)
            VALUES ($1, $2)
            "#,
        )
        .bind(id.as_uuid())
        .bind(Json(&task))
        .execute(&self.pool)
        .await
        .context("Failed to insert a deferred task into the queue")
        .map_err(DispatchError::Rejected)?;
        Ok(id)
    }
}

#[async_trait]
impl TaskSource for PgTaskQueue {
    async fn lease(&self) -> Result<Option<Box<dyn TaskLease>>, anyhow::Error> {
        let mut transaction = self
            .pool
            .begin()
            .await
            .context("Failed to start a transaction")?;
        let row = sqlx::query_as::<_, (Uuid, Json<DeferredTask>, DateTime<Utc>)>(
            r#"
            SELECT id, payload, enqueued_at
            FROM user_task_queue
            ORDER BY enqueued_at
            LIMIT 1
            FOR UPDATE
            SKIP LOCKED
            "#,
        )
        .fetch_optional(&mut *transaction)
        .await
        .context("Failed to dequeue a deferred task from db")?;

        Ok(row.map(|(id, Json(task), enqueued_at)| {
            Box::new(PgTaskLease {
                transaction,
                id: id.into(),
                task,
                enqueued_at,
            }) as Box<dyn TaskLease>
        }))
    }
}

/// Holds the row lock on a queued task for as long as the lease lives.
pub struct PgTaskLease {
    transaction: PgTransaction,
    id: TaskId,
    task: DeferredTask,
    enqueued_at: DateTime<Utc>,
}

#[async_trait]
impl TaskLease for PgTaskLease {
    fn id(&self) -> TaskId {
        self.id
    }

    fn task(&self) -> &DeferredTask {
        &self.task
    }

    fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    #[tracing::instrument(skip_all, fields(task_id = %self.id))]
    async fn complete(self: Box<Self>) -> Result<(), anyhow::Error> {
        let PgTaskLease {
            mut transaction,
            id,
            ..
        } = *self;

        sqlx::query(
            r#"
            DELETE FROM user_task_queue
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .execute(&mut *transaction)
        .await
        .context("Failed to delete a deferred task from db")?;
        transaction
            .commit()
            .await
            .context("Failed to commit a transaction")?;
        Ok(())
    }
}
