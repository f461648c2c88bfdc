//! Long-running tasks.
//!
//! A [`Task`] is the observable handle of a long-running operation. The
//! [`TaskManager`] owns the state machine:
//!
//! ```text
//! pending --update--> running
//!    |                   |
//!    +--complete/fail/cancel--+--> complete | failed | cancelled (terminal)
//! ```
//!
//! Every transition runs under one manager-wide lock covering load, mutate,
//! save, notify and (for terminal states) closing the subscriber channels, so
//! observers never see progress go backwards and never see an update after
//! the terminal one.

pub mod store;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use crate::context::Context;
use crate::error::{Domain, Error, Result};
use crate::fanout::{Fanout, DEFAULT_BUFFER};

pub use store::{MemoryTaskStore, TaskStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Running,
    Complete,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub state: TaskState,
    /// Fraction done, in `[0, 1]`.
    pub progress: f64,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set exactly when the state becomes terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            state: TaskState::Pending,
            progress: 0.0,
            message: String::new(),
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    fn finish(&mut self, state: TaskState) {
        let now = Utc::now();
        self.state = state;
        self.updated_at = now;
        self.completed_at = Some(now);
    }
}

/// Coordinates task transitions, persistence and streaming updates.
pub struct TaskManager {
    store: Arc<dyn TaskStore>,
    lock: Mutex<()>,
    subscribers: Fanout<Task>,
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new(Arc::new(MemoryTaskStore::new()))
    }
}

impl TaskManager {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self::with_buffer(store, DEFAULT_BUFFER)
    }

    /// Subscriber buffers never go below the default of 10.
    pub fn with_buffer(store: Arc<dyn TaskStore>, buffer: usize) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
            subscribers: Fanout::new(buffer.max(DEFAULT_BUFFER)),
        }
    }

    pub async fn create(&self, ctx: &Context, id: &str) -> Result<Task> {
        ctx.check()?;
        if id.is_empty() {
            return Err(Error::EmptyId);
        }

        let _guard = self.lock.lock().await;
        match self.store.load(id).await {
            Ok(_) => return Err(Error::TaskExists),
            Err(Error::TaskNotFound) => {}
            Err(e) => return Err(e),
        }

        let task = Task::new(id);
        self.store.save(&task).await?;
        debug!("Created task {}", id);
        Ok(task)
    }

    pub async fn get(&self, ctx: &Context, id: &str) -> Result<Task> {
        ctx.check()?;
        self.store.load(id).await
    }

    pub async fn list(&self, ctx: &Context) -> Result<Vec<Task>> {
        ctx.check()?;
        self.store.load_all().await
    }

    /// Record progress. The first update moves a pending task to running.
    pub async fn update(
        &self,
        ctx: &Context,
        id: &str,
        progress: f64,
        message: impl Into<String>,
    ) -> Result<Task> {
        let message = message.into();
        self.transition(ctx, id, "update", move |task| {
            task.state = TaskState::Running;
            task.progress = if progress.is_nan() {
                task.progress
            } else {
                progress.clamp(0.0, 1.0)
            };
            task.message = message;
            task.updated_at = Utc::now();
        })
        .await
    }

    pub async fn complete(&self, ctx: &Context, id: &str, result: Value) -> Result<Task> {
        self.transition(ctx, id, "complete", move |task| {
            task.progress = 1.0;
            task.result = Some(result);
            task.finish(TaskState::Complete);
        })
        .await
    }

    pub async fn fail(&self, ctx: &Context, id: &str, error: impl Into<String>) -> Result<Task> {
        let error = error.into();
        self.transition(ctx, id, "fail", move |task| {
            task.error = Some(error);
            task.finish(TaskState::Failed);
        })
        .await
    }

    pub async fn cancel(&self, ctx: &Context, id: &str) -> Result<Task> {
        self.transition(ctx, id, "cancel", |task| task.finish(TaskState::Cancelled))
            .await
    }

    async fn transition<F>(&self, ctx: &Context, id: &str, op: &'static str, apply: F) -> Result<Task>
    where
        F: FnOnce(&mut Task),
    {
        ctx.check()?;
        let _guard = self.lock.lock().await;

        let mut task = self.store.load(id).await?;
        if task.is_terminal() {
            return Err(Error::domain(Domain::Task, id, op, Error::InvalidTransition));
        }
        apply(&mut task);
        self.store.save(&task).await?;

        self.subscribers.notify(id, &task);
        if task.is_terminal() {
            self.subscribers.close(id);
            info!("Task {} finished: {}", id, task.state);
        }
        Ok(task)
    }

    /// Stream of task snapshots. A task that is already terminal yields a
    /// channel that is closed immediately.
    pub async fn subscribe(&self, ctx: &Context, id: &str) -> Result<mpsc::Receiver<Task>> {
        ctx.check()?;
        let _guard = self.lock.lock().await;
        let task = self.store.load(id).await?;
        if task.is_terminal() {
            let (_, rx) = mpsc::channel(1);
            return Ok(rx);
        }
        Ok(self.subscribers.subscribe(ctx, id))
    }

    /// Remove a finished task.
    pub async fn delete(&self, ctx: &Context, id: &str) -> Result<()> {
        ctx.check()?;
        let _guard = self.lock.lock().await;
        let task = self.store.load(id).await?;
        if !task.is_terminal() {
            return Err(Error::domain(Domain::Task, id, "delete", Error::InvalidTransition));
        }
        self.store.delete(id).await
    }

    /// Remove finished tasks that completed more than `retention` ago.
    pub async fn prune(&self, ctx: &Context, retention: Duration) -> Result<usize> {
        ctx.check()?;
        let retention = chrono::Duration::from_std(retention)
            .map_err(|e| Error::InvalidParams(format!("retention: {}", e)))?;
        let cutoff = Utc::now() - retention;

        let _guard = self.lock.lock().await;
        let mut removed = 0;
        for task in self.store.load_all().await? {
            if task.completed_at.is_some_and(|at| at < cutoff) {
                self.store.delete(&task.id).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!("Pruned {} finished tasks", removed);
        }
        Ok(removed)
    }

    pub fn subscriber_count(&self, id: &str) -> usize {
        self.subscribers.subscriber_count(id)
    }
}
