//! Task persistence.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::Task;
use crate::error::{Error, Result};

/// Backing storage for tasks.
///
/// Implementations hand out copies: a task returned by `load` must not alias
/// the stored record.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn save(&self, task: &Task) -> Result<()>;

    /// [`Error::TaskNotFound`] when absent.
    async fn load(&self, id: &str) -> Result<Task>;

    async fn load_all(&self) -> Result<Vec<Task>>;

    async fn delete(&self, id: &str) -> Result<()>;
}

/// Process-lifetime task store.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<String, Task>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn save(&self, task: &Task) -> Result<()> {
        self.tasks
            .write()
            .await
            .insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Task> {
        self.tasks
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(Error::TaskNotFound)
    }

    async fn load_all(&self) -> Result<Vec<Task>> {
        Ok(self.tasks.read().await.values().cloned().collect())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.tasks.write().await.remove(id);
        Ok(())
    }
}
