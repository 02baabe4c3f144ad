use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::dispatcher::{DeferredTask, DispatchError, TaskId, TaskQueue};
use crate::domain::{User, UserId};
use crate::repository::{StoreError, UserExistenceQuery, UserStore, UserUnitOfWork};
use crate::task_worker::{TaskLease, TaskSource};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct StoreState {
    users: Mutex<HashMap<UserId, User>>,
    unique_email: bool,
    fail_commits: AtomicBool,
    existence_queries: AtomicUsize,
    units_begun: AtomicUsize,
}

/// Process-local user store.
///
/// Without a unique email constraint two concurrent creations with the same
/// email can both be committed, exactly like a database without a `UNIQUE`
/// index would allow.
#[derive(Clone, Default)]
pub struct InMemoryUserStore {
    state: Arc<StoreState>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_unique_email() -> Self {
        Self {
            state: Arc::new(StoreState {
                unique_email: true,
                ..StoreState::default()
            }),
        }
    }

    /// Makes every commit fail with [`StoreError::Unavailable`] until reset.
    pub fn fail_commits(&self, fail: bool) {
        self.state.fail_commits.store(fail, Ordering::SeqCst);
    }

    pub fn get(&self, id: UserId) -> Option<User> {
        lock(&self.state.users).get(&id).cloned()
    }

    pub fn users(&self) -> Vec<User> {
        let mut users: Vec<User> = lock(&self.state.users).values().cloned().collect();
        users.sort_by_key(|u| u.id);
        users
    }

    pub fn len(&self) -> usize {
        lock(&self.state.users).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn existence_queries(&self) -> usize {
        self.state.existence_queries.load(Ordering::SeqCst)
    }

    pub fn units_begun(&self) -> usize {
        self.state.units_begun.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserExistenceQuery for InMemoryUserStore {
    async fn email_exists(&self, email: &str) -> Result<bool, anyhow::Error> {
        self.state.existence_queries.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.state.users).values().any(|u| u.email == email))
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn begin(&self) -> Result<Box<dyn UserUnitOfWork>, StoreError> {
        self.state.units_begun.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InMemoryUnitOfWork {
            state: Arc::clone(&self.state),
            staged: Vec::new(),
        }))
    }
}

struct InMemoryUnitOfWork {
    state: Arc<StoreState>,
    staged: Vec<User>,
}

#[async_trait]
impl UserUnitOfWork for InMemoryUnitOfWork {
    fn add(&mut self, user: User) {
        self.staged.push(user);
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let InMemoryUnitOfWork { state, staged } = *self;
        if state.fail_commits.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("The in-memory user store is unavailable.").into());
        }

        let mut users = lock(&state.users);
        let mut accepted: Vec<User> = Vec::new();

        // Every check runs before the first insert so a failure leaves nothing behind.
        for user in staged {
            // A known id keeps the stored user, like `ON CONFLICT (id) DO NOTHING`.
            if users.contains_key(&user.id) || accepted.iter().any(|u| u.id == user.id) {
                continue;
            }
            if state.unique_email
                && users
                    .values()
                    .chain(accepted.iter())
                    .any(|u| u.email == user.email)
            {
                return Err(StoreError::UniqueViolation { field: "email" });
            }
            accepted.push(user);
        }

        for user in accepted {
            users.insert(user.id, user);
        }
        Ok(())
    }
}

#[derive(Default)]
struct QueueState {
    pending: Mutex<VecDeque<QueuedTask>>,
    refuse: AtomicBool,
}

#[derive(Clone)]
struct QueuedTask {
    id: TaskId,
    task: DeferredTask,
    enqueued_at: DateTime<Utc>,
}

/// Process-local task queue. Leased tasks that are dropped without being
/// completed go back to the front of the queue.
#[derive(Clone, Default)]
pub struct InMemoryTaskQueue {
    state: Arc<QueueState>,
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every enqueue fail with [`DispatchError::Rejected`] until reset.
    pub fn refuse_enqueues(&self, refuse: bool) {
        self.state.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn pending_tasks(&self) -> Vec<DeferredTask> {
        lock(&self.state.pending)
            .iter()
            .map(|queued| queued.task.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.state.pending).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue(&self, task: DeferredTask) -> Result<TaskId, DispatchError> {
        if self.state.refuse.load(Ordering::SeqCst) {
            return Err(DispatchError::Rejected(anyhow::anyhow!(
                "The in-memory task queue is refusing new tasks."
            )));
        }

        let id = TaskId::generate();
        lock(&self.state.pending).push_back(QueuedTask {
            id,
            task,
            enqueued_at: Utc::now(),
        });
        Ok(id)
    }
}

#[async_trait]
impl TaskSource for InMemoryTaskQueue {
    async fn lease(&self) -> Result<Option<Box<dyn TaskLease>>, anyhow::Error> {
        let next = lock(&self.state.pending).pop_front();
        Ok(next.map(|queued| {
            Box::new(InMemoryTaskLease {
                state: Arc::clone(&self.state),
                queued,
                completed: false,
            }) as Box<dyn TaskLease>
        }))
    }
}

struct InMemoryTaskLease {
    state: Arc<QueueState>,
    queued: QueuedTask,
    completed: bool,
}

#[async_trait]
impl TaskLease for InMemoryTaskLease {
    fn id(&self) -> TaskId {
        self.queued.id
    }

    fn task(&self) -> &DeferredTask {
        &self.queued.task
    }

    fn enqueued_at(&self) -> DateTime<Utc> {
        self.queued.enqueued_at
    }

    async fn complete(self: Box<Self>) -> Result<(), anyhow::Error> {
        let mut lease = self;
        lease.completed = true;
        Ok(())
    }
}

impl Drop for InMemoryTaskLease {
    fn drop(&mut self) {
        if !self.completed {
            lock(&self.state.pending).push_front(self.queued.clone());
        }
    }
}
