use std::sync::Arc;

use async_trait::async_trait;
use claims::{assert_err, assert_matches, assert_ok};
use signup::dispatcher::{DeferredTask, DispatchPolicy};
use signup::domain::{CreateUser, ViolationKind};
use signup::handler::{CreateUserError, CreateUserHandler};
use signup::repository::{InMemoryTaskQueue, InMemoryUserStore, UserExistenceQuery};
use uuid::Uuid;

use crate::helpers::{ada, init_tracing, spawn_app};

struct UnreachableQuery;

#[async_trait]
impl UserExistenceQuery for UnreachableQuery {
    async fn email_exists(&self, _email: &str) -> Result<bool, anyhow::Error> {
        Err(anyhow::anyhow!("connection refused"))
    }
}

#[tokio::test]
async fn valid_command_creates_a_user_and_returns_its_id() {
    let app = spawn_app(DispatchPolicy::Once);

    let result = assert_ok!(app.create_user(ada()).await);

    assert_ne!(result.id.as_uuid(), Uuid::nil());
    assert!(result.dispatch_warnings.is_empty());
    assert!(app.store.email_exists("ada@example.com").await.unwrap());

    let stored = app.store.get(result.id).expect("User was not stored");
    assert_eq!(stored.first_name, "Ada");
    assert_eq!(stored.last_name, "Lovelace");
    assert_eq!(stored.email, "ada@example.com");
}

#[tokio::test]
async fn every_created_user_gets_a_distinct_id() {
    let app = spawn_app(DispatchPolicy::Once);

    let first = assert_ok!(app.create_user(ada()).await);
    let second = assert_ok!(
        app.create_user(CreateUser::new("Grace", "Hopper", "grace@example.com"))
            .await
    );

    assert_ne!(first.id, second.id);
    assert_eq!(app.store.len(), 2);
}

#[tokio::test]
async fn invalid_commands_touch_nothing() {
    let app = spawn_app(DispatchPolicy::Once);
    let test_cases = vec![
        (
            CreateUser::new("", "Lovelace", "ada@example.com"),
            "first_name",
            ViolationKind::Required,
        ),
        (
            CreateUser::new("Ada", "  ", "ada@example.com"),
            "last_name",
            ViolationKind::Required,
        ),
        (
            CreateUser::new("Ada", "Lovelace", ""),
            "email",
            ViolationKind::Required,
        ),
        (
            CreateUser::new("Ada", "Lovelace", "ada-at-example.com"),
            "email",
            ViolationKind::InvalidFormat,
        ),
        (
            CreateUser::new("Ada", "Lovelace", "ada@"),
            "email",
            ViolationKind::InvalidFormat,
        ),
        (
            CreateUser::new("Ada", "Lovelace", "ada@example.com "),
            "email",
            ViolationKind::InvalidFormat,
        ),
    ];

    for (command, field, kind) in test_cases {
        let e = assert_err!(app.create_user(command.clone()).await);
        match e {
            CreateUserError::Validation(errors) => assert!(
                errors.has(field, kind),
                "Expected {field} to fail with {kind:?} for {command:?}, got {errors}"
            ),
            other => panic!("Expected a validation error for {command:?}, got {other:?}"),
        }
    }

    assert_eq!(app.store.existence_queries(), 0);
    assert_eq!(app.store.units_begun(), 0);
    assert!(app.store.is_empty());
    assert!(app.queue.is_empty());
}

#[tokio::test]
async fn existing_email_is_rejected_as_duplicate() {
    let app = spawn_app(DispatchPolicy::Once);
    assert_ok!(app.create_user(ada()).await);
    let units_before = app.store.units_begun();

    let e = assert_err!(
        app.create_user(CreateUser::new("Augusta", "King", "ada@example.com"))
            .await
    );

    assert_matches!(e, CreateUserError::Duplicate { field: "email" });
    assert_eq!(e.to_string(), "email already exists");
    assert_eq!(app.store.units_begun(), units_before);
    assert_eq!(app.store.len(), 1);
    assert_eq!(app.queue.len(), 1);
}

#[tokio::test]
async fn email_is_stored_verbatim_and_compared_exactly() {
    let app = spawn_app(DispatchPolicy::Once);
    assert_ok!(app.create_user(ada()).await);

    // No case folding: a differently cased address is a different email.
    let result = assert_ok!(
        app.create_user(CreateUser::new("Ada", "Lovelace", "ADA@example.com"))
            .await
    );

    assert_eq!(app.store.get(result.id).unwrap().email, "ADA@example.com");
    assert_eq!(app.store.len(), 2);
}

#[tokio::test]
async fn failed_commit_leaves_no_trace() {
    let app = spawn_app(DispatchPolicy::Once);
    app.store.fail_commits(true);

    let e = assert_err!(app.create_user(ada()).await);

    assert_matches!(e, CreateUserError::Persistence(_));
    assert!(!app.store.email_exists("ada@example.com").await.unwrap());
    assert!(app.store.is_empty());
    assert!(app.queue.is_empty());
}

#[tokio::test]
async fn refused_dispatch_is_a_warning_not_a_failure() {
    let app = spawn_app(DispatchPolicy::Once);
    app.queue.refuse_enqueues(true);

    let result = assert_ok!(app.create_user(ada()).await);

    assert_eq!(result.dispatch_warnings.len(), 1);
    assert_eq!(result.dispatch_warnings[0].attempt, 1);
    assert!(app.store.get(result.id).is_some());
    assert!(app.queue.is_empty());
}

#[tokio::test]
async fn dispatched_task_carries_the_created_user() {
    let app = spawn_app(DispatchPolicy::Once);

    let result = assert_ok!(app.create_user(ada()).await);

    let stored = app.store.get(result.id).unwrap();
    assert_eq!(
        app.queue.pending_tasks(),
        vec![DeferredTask::PersistUser { user: stored }]
    );
}

#[tokio::test]
async fn failing_uniqueness_query_is_a_persistence_error() {
    init_tracing();
    let store = InMemoryUserStore::with_unique_email();
    let queue = InMemoryTaskQueue::new();
    let handler = CreateUserHandler::new(
        Arc::new(UnreachableQuery),
        Arc::new(store.clone()),
        Arc::new(queue.clone()),
        DispatchPolicy::Once,
    );

    let e = assert_err!(handler.handle(ada()).await);

    assert_matches!(e, CreateUserError::Persistence(_));
    assert!(format!("{e:?}").contains("connection refused"));
    assert_eq!(store.units_begun(), 0);
    assert!(store.is_empty());
    assert!(queue.is_empty());
}

#[tokio::test]
async fn padded_email_does_not_bypass_the_unique_email_rule() {
    let app = spawn_app(DispatchPolicy::Once);
    assert_ok!(app.create_user(ada()).await);

    let e = assert_err!(
        app.create_user(CreateUser::new("Ada", "Lovelace", "ada@example.com "))
            .await
    );

    match e {
        CreateUserError::Validation(errors) => {
            assert!(errors.has("email", ViolationKind::InvalidFormat))
        }
        other => panic!("Expected a validation error, got {other:?}"),
    }
    assert_eq!(app.store.len(), 1);
    assert_eq!(app.queue.len(), 1);
}
