use std::sync::Arc;

use async_trait::async_trait;
use claims::assert_matches;
use signup::dispatcher::DispatchPolicy;
use signup::handler::{CreateUserError, CreateUserHandler};
use signup::repository::{InMemoryTaskQueue, InMemoryUserStore, UserExistenceQuery};
use tokio::sync::Barrier;

use crate::helpers::{ada, init_tracing};

/// Holds every caller after it has read the store until all racers have
/// read it, so each of them sees the email as free.
struct RacingQuery {
    store: InMemoryUserStore,
    barrier: Barrier,
}

#[async_trait]
impl UserExistenceQuery for RacingQuery {
    async fn email_exists(&self, email: &str) -> Result<bool, anyhow::Error> {
        let exists = self.store.email_exists(email).await?;
        self.barrier.wait().await;
        Ok(exists)
    }
}

fn racing_handler(store: &InMemoryUserStore) -> CreateUserHandler {
    init_tracing();
    let query = Arc::new(RacingQuery {
        store: store.clone(),
        barrier: Barrier::new(2),
    });
    CreateUserHandler::new(
        query,
        Arc::new(store.clone()),
        Arc::new(InMemoryTaskQueue::new()),
        DispatchPolicy::Once,
    )
}

#[tokio::test]
async fn without_a_store_constraint_both_racers_succeed() {
    let store = InMemoryUserStore::new();
    let handler = racing_handler(&store);

    let (first, second) = tokio::join!(handler.handle(ada()), handler.handle(ada()));

    assert!(first.is_ok());
    assert!(second.is_ok());
    let users = store.users();
    assert_eq!(users.len(), 2);
    assert!(users.iter().all(|u| u.email == "ada@example.com"));
}

#[tokio::test]
async fn with_a_store_constraint_the_loser_gets_a_duplicate() {
    let store = InMemoryUserStore::with_unique_email();
    let handler = racing_handler(&store);

    let (first, second) = tokio::join!(handler.handle(ada()), handler.handle(ada()));

    let (winner, loser) = match (first, second) {
        (Ok(winner), Err(loser)) | (Err(loser), Ok(winner)) => (winner, loser),
        other => panic!("Expected exactly one success, got {other:?}"),
    };
    assert_matches!(loser, CreateUserError::Duplicate { field: "email" });
    assert_eq!(store.users().len(), 1);
    assert!(store.get(winner.id).is_some());
}
