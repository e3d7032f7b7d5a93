use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use backend::auth::{AuthError, AuthService, User, UserId};
use backend::store::{CancelHandle, DocumentStore, Fields, Filter, Order, StoreError, Subscription};

use crate::error::TaskError;
use crate::model::{
    CREATED_AT_FIELD, OWNER_ID_FIELD, RESERVED_FIELDS, Task, TaskId, UPDATED_AT_FIELD,
};

pub const TASKS_COLLECTION: &str = "tasks";

struct ActiveSession {
    user_id: UserId,
    subscription: Option<CancelHandle>,
}

/// Wall-clock microseconds with a strictly-increasing guard, so two
/// back-to-back stamps from the same client never collide.
#[derive(Default)]
struct MonotonicClock {
    last: AtomicI64,
}

impl MonotonicClock {
    fn now_micros(&self) -> i64 {
        let wall = Utc::now().timestamp_micros();
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let next = wall.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(observed) => prev = observed,
            }
        }
    }
}

/// Session-scoped task client.
///
/// Holds one authenticated identity and performs task CRUD scoped to it,
/// passing everything through to the auth service and document store.
/// Each manager instance carries its own session, so several managers
/// may hold several sessions concurrently.
///
/// At most one live query is tracked at a time; `watch_tasks` cancels
/// the previous one before installing a replacement, and `logout` tears
/// the active one down.
pub struct TaskManager<A, D> {
    auth: Arc<A>,
    store: Arc<D>,
    session: Mutex<Option<ActiveSession>>,
    clock: MonotonicClock,
}

impl<A: AuthService, D: DocumentStore> TaskManager<A, D> {
    pub fn new(auth: Arc<A>, store: Arc<D>) -> Self {
        Self {
            auth,
            store,
            session: Mutex::new(None),
            clock: MonotonicClock::default(),
        }
    }

    /// Create a new account and start a session for it.
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let user = self
            .auth
            .create_account(email, password)
            .await
            .inspect_err(|e| error!(error = %e, "signup failed"))?;

        self.install_session(user.id.clone()).await;
        info!(user = %user.id, "account created, session started");
        Ok(user)
    }

    /// Authenticate an existing account and start a session for it.
    /// A prior session is replaced and its live query cancelled.
    pub async fn login(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let user = self
            .auth
            .authenticate(email, password)
            .await
            .inspect_err(|e| error!(error = %e, "login failed"))?;

        self.install_session(user.id.clone()).await;
        info!(user = %user.id, "session started");
        Ok(user)
    }

    /// Sign out and clear the session. On auth failure the session is
    /// left untouched.
    pub async fn logout(&self) -> Result<(), AuthError> {
        self.auth
            .end_session()
            .await
            .inspect_err(|e| error!(error = %e, "logout failed"))?;

        let mut session = self.session.lock().await;
        if let Some(prev) = session.take() {
            if let Some(handle) = prev.subscription {
                handle.cancel();
            }
            info!(user = %prev.user_id, "session ended");
        }
        Ok(())
    }

    async fn install_session(&self, user_id: UserId) {
        let mut session = self.session.lock().await;
        if let Some(prev) = session.replace(ActiveSession {
            user_id,
            subscription: None,
        }) {
            // A live query scoped to the previous user must not outlive
            // its session.
            if let Some(handle) = prev.subscription {
                handle.cancel();
            }
        }
    }

    async fn current_user(&self) -> Result<UserId, AuthError> {
        let session = self.session.lock().await;
        session
            .as_ref()
            .map(|s| s.user_id.clone())
            .ok_or(AuthError::NotAuthenticated)
            .inspect_err(|e| error!(error = %e, "task operation rejected"))
    }

    /// Insert a task owned by the current session. Returns the
    /// store-assigned id.
    pub async fn add_task(&self, fields: Fields) -> Result<TaskId, TaskError> {
        let user_id = self.current_user().await?;
        let now = self.clock.now_micros();

        let mut doc = fields;
        doc.insert(OWNER_ID_FIELD.to_string(), Value::from(user_id));
        doc.insert(CREATED_AT_FIELD.to_string(), Value::from(now));
        doc.insert(UPDATED_AT_FIELD.to_string(), Value::from(now));

        self.store
            .insert(TASKS_COLLECTION, doc)
            .await
            .inspect_err(|e| error!(error = %e, "task insert failed"))
            .map_err(TaskError::from)
    }

    /// Partial-merge update. Reserved fields in `updates` are ignored;
    /// `updated_at` is always refreshed.
    pub async fn update_task(&self, id: &str, updates: Fields) -> Result<(), TaskError> {
        let user_id = self.current_user().await?;
        self.check_ownership(id, &user_id).await?;

        let mut patch = updates;
        for key in RESERVED_FIELDS {
            patch.remove(key);
        }
        patch.insert(
            UPDATED_AT_FIELD.to_string(),
            Value::from(self.clock.now_micros()),
        );

        self.store
            .patch(TASKS_COLLECTION, id, patch)
            .await
            .inspect_err(|e| error!(task = id, error = %e, "task patch failed"))
            .map_err(TaskError::from)
    }

    pub async fn delete_task(&self, id: &str) -> Result<(), TaskError> {
        let user_id = self.current_user().await?;
        self.check_ownership(id, &user_id).await?;

        self.store
            .remove(TASKS_COLLECTION, id)
            .await
            .inspect_err(|e| error!(task = id, error = %e, "task remove failed"))
            .map_err(TaskError::from)
    }

    /// The store enforces no access rules of its own, so ownership is
    /// checked here before any mutation.
    async fn check_ownership(&self, id: &str, user_id: &str) -> Result<(), TaskError> {
        let doc = self
            .store
            .get(TASKS_COLLECTION, id)
            .await
            .inspect_err(|e| error!(task = id, error = %e, "task lookup failed"))?;

        let owner = doc.fields.get(OWNER_ID_FIELD).and_then(Value::as_str);
        if owner != Some(user_id) {
            let err = StoreError::PermissionDenied(id.to_string());
            error!(task = id, error = %err, "ownership check failed");
            return Err(err.into());
        }
        Ok(())
    }

    /// Open the live query for the current session's tasks, ordered
    /// newest-first. Replaces (and cancels) any previously tracked
    /// subscription of this manager.
    pub async fn watch_tasks(&self) -> Result<TaskFeed, TaskError> {
        let mut session = self.session.lock().await;
        let active = session
            .as_mut()
            .ok_or(AuthError::NotAuthenticated)
            .inspect_err(|e| error!(error = %e, "watch rejected"))?;

        let filter = Filter::field_eq(OWNER_ID_FIELD, active.user_id.clone());
        let order = Order::desc(CREATED_AT_FIELD);

        let sub = self
            .store
            .subscribe(TASKS_COLLECTION, filter, order)
            .await
            .inspect_err(|e| error!(error = %e, "subscribe failed"))?;

        if let Some(prev) = active.subscription.replace(sub.cancel_handle()) {
            prev.cancel();
        }

        info!(user = %active.user_id, "live query opened");
        Ok(TaskFeed { inner: sub })
    }
}

/// Batch stream over the session's tasks.
///
/// Each batch is the full current result set, newest-first: one on
/// initial load, then one after every change to the owner's tasks.
/// Yields `None` once the subscription is cancelled.
pub struct TaskFeed {
    inner: Subscription,
}

impl TaskFeed {
    pub async fn next_batch(&mut self) -> Option<Vec<Task>> {
        let docs = self.inner.recv().await?;

        let batch = docs
            .into_iter()
            .filter_map(|doc| {
                let id = doc.id.clone();
                let task = Task::from_document(doc);
                if task.is_none() {
                    warn!(doc = %id, "skipping document without task shape");
                }
                task
            })
            .collect();

        Some(batch)
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.inner.cancel_handle()
    }
}
