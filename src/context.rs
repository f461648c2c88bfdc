//! Request-scoped context.
//!
//! A [`Context`] is threaded through every public operation. It carries a
//! cancellation signal (optionally bounded by a deadline) and the values that
//! identify a request as it moves from the transport through the dispatcher
//! into the subsystems: session id, connection id, trace id, request id, task
//! id, and the outbound sink a streaming transport offers for server-initiated
//! messages.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Channel a transport exposes for pushing notifications to its peer.
pub type Outbound = mpsc::Sender<Vec<u8>>;

/// Request-scoped values and cancellation.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
    session_id: Option<String>,
    connection_id: Option<String>,
    trace_id: Option<String>,
    request_id: Option<String>,
    task_id: Option<String>,
    outbound: Option<Outbound>,
}

impl Context {
    /// Create a root context that is never cancelled unless [`Context::cancel`] is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a child context. Cancelling the parent cancels the child; the
    /// reverse does not hold. Values are inherited.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            ..self.clone()
        }
    }

    /// Derive a child whose deadline is `timeout` from now (or the parent's
    /// deadline, whichever comes first).
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        let mut child = self.child();
        child.deadline = Some(match self.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        });
        child
    }

    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    /// Scope of the peer connection; request ids are unique within it.
    pub fn with_connection_id(mut self, id: impl Into<String>) -> Self {
        self.connection_id = Some(id.into());
        self
    }

    pub fn with_trace_id(mut self, id: impl Into<String>) -> Self {
        self.trace_id = Some(id.into());
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn with_task_id(mut self, id: impl Into<String>) -> Self {
        self.task_id = Some(id.into());
        self
    }

    pub fn with_outbound(mut self, outbound: Outbound) -> Self {
        self.outbound = Some(outbound);
        self
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn task_id(&self) -> Option<&str> {
        self.task_id.as_deref()
    }

    pub fn outbound(&self) -> Option<&Outbound> {
        self.outbound.as_ref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Signal cancellation to this context and all of its children.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// The underlying token, for handing to spawned work.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether the deadline has passed.
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Whether the context is done, either cancelled or past its deadline.
    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || self.is_expired()
    }

    /// The reason the context is done, if it is.
    ///
    /// A passed deadline reports [`Error::Timeout`]; an explicit cancel reports
    /// [`Error::Cancelled`].
    pub fn err(&self) -> Option<Error> {
        if self.is_expired() {
            Some(Error::Timeout)
        } else if self.token.is_cancelled() {
            Some(Error::Cancelled)
        } else {
            None
        }
    }

    /// Entry check used by every public operation.
    pub fn check(&self) -> Result<()> {
        match self.err() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Resolve once the context is cancelled or its deadline passes.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }
}
