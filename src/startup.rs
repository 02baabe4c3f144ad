use std::sync::Arc;

use anyhow::Context;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::command_bus::{BusError, CommandBus};
use crate::configuration::{Configuration, DatabaseConfigs, WorkerSettings};
use crate::domain::CreateUser;
use crate::handler::CreateUserHandler;
use crate::repository::{PgTaskQueue, PgUserStore};
use crate::task_worker;

pub struct Application {
    command_bus: CommandBus,
    store: Arc<PgUserStore>,
    queue: Arc<PgTaskQueue>,
    worker: WorkerSettings,
}

impl Application {
    pub async fn build(config: Configuration) -> Result<Self, anyhow::Error> {
        let connection_pool = get_connection_pool(&config.database);

        sqlx::migrate!("./migrations")
            .run(&connection_pool)
            .await
            .context("Failed to migrate the database")?;

        let store = Arc::new(PgUserStore::new(connection_pool.clone()));
        let queue = Arc::new(PgTaskQueue::new(connection_pool));
        let handler = Arc::new(CreateUserHandler::new(
            store.clone(),
            store.clone(),
            queue.clone(),
            config.application.dispatch_policy,
        ));
        let command_bus = build_command_bus(handler).context("Failed to build the command bus")?;

        tracing::info!(
            commands = ?command_bus.commands(),
            dispatch_policy = ?config.application.dispatch_policy,
            "Application built"
        );

        Ok(Self {
            command_bus,
            store,
            queue,
            worker: config.worker,
        })
    }

    pub fn command_bus(&self) -> &CommandBus {
        &self.command_bus
    }

    /// Runs the deferred task worker until it fails.
    pub async fn run_until_stopped(&self) -> Result<(), anyhow::Error> {
        task_worker::run_worker_until_stopped(
            self.queue.clone(),
            self.store.clone(),
            self.worker.clone(),
        )
        .await
    }
}

pub fn get_connection_pool(config: &DatabaseConfigs) -> PgPool {
    PgPoolOptions::new().connect_lazy_with(config.connect_options())
}

pub fn build_command_bus(handler: Arc<CreateUserHandler>) -> Result<CommandBus, BusError> {
    let command_bus = CommandBus::new();
    command_bus.register::<CreateUser, _>(handler)?;
    Ok(command_bus)
}
