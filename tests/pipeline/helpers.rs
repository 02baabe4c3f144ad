use std::sync::{Arc, OnceLock};

use signup::command_bus::CommandBus;
use signup::dispatcher::DispatchPolicy;
use signup::domain::CreateUser;
use signup::handler::{CreateUserError, CreateUserHandler, CreateUserResult};
use signup::repository::{InMemoryTaskQueue, InMemoryUserStore};
use signup::startup::build_command_bus;
use signup::task_worker::{ExecutionOutcome, try_execute_task};
use signup::telemetry;

static TRACING: OnceLock<()> = OnceLock::new();

pub fn init_tracing() {
    TRACING.get_or_init(|| {
        let default_filter_level = "info".to_string();
        let subscriber_name = "test".to_string();

        if std::env::var("TEST_LOG").is_ok() {
            let subscriber = telemetry::get_subscriber(
                subscriber_name,
                default_filter_level,
                std::io::stdout,
            );
            telemetry::init_subscriber(subscriber);
        } else {
            let subscriber =
                telemetry::get_subscriber(subscriber_name, default_filter_level, std::io::sink);
            telemetry::init_subscriber(subscriber);
        };
    });
}

pub struct TestApp {
    pub store: InMemoryUserStore,
    pub queue: InMemoryTaskQueue,
    pub handler: Arc<CreateUserHandler>,
    pub command_bus: CommandBus,
}

impl TestApp {
    pub async fn create_user(
        &self,
        command: CreateUser,
    ) -> Result<CreateUserResult, CreateUserError> {
        self.handler.handle(command).await
    }

    /// Runs the deferred task worker until the queue is empty.
    pub async fn drain_queue(&self) -> Vec<ExecutionOutcome> {
        let mut outcomes = Vec::new();
        loop {
            let outcome = try_execute_task(&self.queue, &self.store)
                .await
                .expect("Failed to execute a deferred task");
            if outcome == ExecutionOutcome::EmptyQueue {
                return outcomes;
            }
            outcomes.push(outcome);
        }
    }
}

pub fn spawn_app(policy: DispatchPolicy) -> TestApp {
    spawn_app_with_store(InMemoryUserStore::with_unique_email(), policy)
}

pub fn spawn_app_with_store(store: InMemoryUserStore, policy: DispatchPolicy) -> TestApp {
    init_tracing();

    let queue = InMemoryTaskQueue::new();
    let handler = Arc::new(CreateUserHandler::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(queue.clone()),
        policy,
    ));
    let command_bus = build_command_bus(handler.clone()).expect("Failed to build command bus");

    TestApp {
        store,
        queue,
        handler,
        command_bus,
    }
}

pub fn ada() -> CreateUser {
    CreateUser::new("Ada", "Lovelace", "ada@example.com")
}
