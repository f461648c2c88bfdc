//! Client sessions with TTL.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::context::Context;
use crate::error::{Error, Result};

/// Default session lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Produces fresh session ids.
pub type IdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// 16 random bytes as 32 lowercase hex characters.
pub fn random_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Per-client session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub client_id: String,
    #[serde(default)]
    pub state: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn set_state(&mut self, key: impl Into<String>, value: Value) {
        self.state.insert(key.into(), value);
    }

    pub fn get_state(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// In-memory session store.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    ttl: Duration,
    id_generator: IdGenerator,
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
            id_generator: Arc::new(random_id),
        }
    }

    /// Replace the id generator.
    pub fn with_id_generator(mut self, generator: IdGenerator) -> Self {
        self.id_generator = generator;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn create(&self, ctx: &Context, client_id: &str) -> Result<Session> {
        ctx.check()?;
        if client_id.is_empty() {
            return Err(Error::InvalidClientId);
        }

        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.ttl)
            .map_err(|e| Error::InvalidConfig(format!("session ttl: {}", e)))?;
        let session = Session {
            id: (self.id_generator)(),
            client_id: client_id.to_string(),
            state: HashMap::new(),
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
        };

        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        info!("Created session {} for client {}", session.id, client_id);
        Ok(session)
    }

    /// Fetch a session. Expired sessions are reported but left in place.
    pub async fn get(&self, ctx: &Context, id: &str) -> Result<Session> {
        ctx.check()?;
        let sessions = self.sessions.read().await;
        let session = sessions.get(id).ok_or(Error::SessionNotFound)?;
        if session.is_expired() {
            return Err(Error::SessionExpired);
        }
        Ok(session.clone())
    }

    pub async fn update(&self, ctx: &Context, session: &Session) -> Result<()> {
        ctx.check()?;
        let mut sessions = self.sessions.write().await;
        let stored = sessions
            .get_mut(&session.id)
            .ok_or(Error::SessionNotFound)?;
        let mut updated = session.clone();
        updated.updated_at = Utc::now();
        *stored = updated;
        Ok(())
    }

    pub async fn delete(&self, ctx: &Context, id: &str) -> Result<()> {
        ctx.check()?;
        if self.sessions.write().await.remove(id).is_some() {
            debug!("Deleted session {}", id);
        }
        Ok(())
    }

    /// Remove every expired session; returns how many were removed.
    pub async fn cleanup(&self, ctx: &Context) -> Result<usize> {
        ctx.check()?;
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired());
        let removed = before - sessions.len();
        if removed > 0 {
            debug!("Swept {} expired sessions", removed);
        }
        Ok(removed)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
