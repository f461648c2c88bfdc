//! User-input elicitation.
//!
//! A server asks the end user for input through an [`ElicitCallback`]. The
//! handler bounds each request by a timeout and reports timeouts and
//! cancellations inside the [`ElicitResponse`] rather than as errors; only
//! invalid requests, a missing callback, or a failing callback produce `Err`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{Domain, Error, Result};

/// Default time a callback has to answer.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElicitKind {
    Text,
    Confirmation,
    Choice,
    Form,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElicitRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ElicitKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Per-request timeout; `None` or zero uses the handler default.
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

impl ElicitRequest {
    pub fn new(id: impl Into<String>, kind: ElicitKind, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            message: message.into(),
            schema: None,
            choices: Vec::new(),
            default: None,
            timeout: None,
        }
    }

    pub fn text(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(id, ElicitKind::Text, message)
    }

    pub fn with_choices(mut self, choices: Vec<String>) -> Self {
        self.choices = choices;
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::InvalidRequest("id is required".to_string()));
        }
        match self.kind {
            ElicitKind::Choice if self.choices.is_empty() => Err(Error::InvalidRequest(
                "choice request needs at least one choice".to_string(),
            )),
            ElicitKind::Form if self.schema.is_none() => Err(Error::InvalidRequest(
                "form request needs a schema".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElicitResponse {
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub timed_out: bool,
}

impl ElicitResponse {
    pub fn answered(request_id: impl Into<String>, value: Value) -> Self {
        Self {
            request_id: request_id.into(),
            value: Some(value),
            ..Default::default()
        }
    }

    pub fn cancelled(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            cancelled: true,
            ..Default::default()
        }
    }

    pub fn timed_out(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            timed_out: true,
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        !self.cancelled && !self.timed_out
    }
}

/// Presents a request to the user and returns their answer.
///
/// The context passed in is cancelled when the handler gives up waiting.
#[async_trait]
pub trait ElicitCallback: Send + Sync {
    async fn elicit(&self, ctx: &Context, req: &ElicitRequest) -> Result<ElicitResponse>;
}

struct HandlerState {
    callback: Option<Arc<dyn ElicitCallback>>,
    default_timeout: Duration,
}

pub struct ElicitationHandler {
    state: RwLock<HandlerState>,
}

impl Default for ElicitationHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ElicitationHandler {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(HandlerState {
                callback: None,
                default_timeout: DEFAULT_TIMEOUT,
            }),
        }
    }

    pub fn with_default_timeout(self, timeout: Duration) -> Self {
        let mut state = self.state.into_inner();
        state.default_timeout = timeout;
        Self {
            state: RwLock::new(state),
        }
    }

    pub fn with_callback(self, callback: Arc<dyn ElicitCallback>) -> Self {
        let mut state = self.state.into_inner();
        state.callback = Some(callback);
        Self {
            state: RwLock::new(state),
        }
    }

    pub async fn set_callback(&self, callback: Arc<dyn ElicitCallback>) {
        self.state.write().await.callback = Some(callback);
    }

    pub async fn set_default_timeout(&self, timeout: Duration) {
        self.state.write().await.default_timeout = timeout;
    }

    pub async fn has_callback(&self) -> bool {
        self.state.read().await.callback.is_some()
    }

    /// Run one elicitation.
    pub async fn handle(&self, ctx: &Context, req: &ElicitRequest) -> Result<ElicitResponse> {
        req.validate()
            .map_err(|e| Error::domain(Domain::Elicit, &req.id, "validate", e))?;

        let (callback, default_timeout) = {
            let state = self.state.read().await;
            (state.callback.clone(), state.default_timeout)
        };
        let callback = callback.ok_or(Error::NoHandler)?;
        let timeout = req
            .timeout
            .filter(|t| !t.is_zero())
            .unwrap_or(default_timeout);

        let child = ctx.with_timeout(timeout);
        let mut call = {
            let child = child.clone();
            let req = req.clone();
            tokio::spawn(async move { callback.elicit(&child, &req).await })
        };

        let outcome = tokio::select! {
            biased;
            _ = child.done() => None,
            joined = &mut call => Some(joined),
        };

        match outcome {
            None => Ok(ended(&child, &req.id, timeout)),
            // The callback gave up because its context ended.
            Some(Ok(Err(_))) if child.is_done() => Ok(ended(&child, &req.id, timeout)),
            Some(Ok(Ok(resp))) => Ok(resp),
            Some(Ok(Err(e))) => Err(Error::domain(Domain::Elicit, &req.id, "handle", e)),
            Some(Err(e)) => {
                warn!("Elicitation callback for {} panicked: {}", req.id, e);
                Err(Error::domain(
                    Domain::Elicit,
                    &req.id,
                    "handle",
                    Error::Internal(e.to_string()),
                ))
            }
        }
    }
}

/// Response for an elicitation whose context ended before an answer.
fn ended(child: &Context, id: &str, timeout: Duration) -> ElicitResponse {
    let cancelled = matches!(child.err(), Some(Error::Cancelled));
    child.cancel();
    if cancelled {
        debug!("Elicitation {} cancelled", id);
        ElicitResponse::cancelled(id)
    } else {
        debug!("Elicitation {} timed out after {:?}", id, timeout);
        ElicitResponse::timed_out(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Slow(Duration);

    #[async_trait]
    impl ElicitCallback for Slow {
        async fn elicit(&self, ctx: &Context, req: &ElicitRequest) -> Result<ElicitResponse> {
            tokio::select! {
                _ = tokio::time::sleep(self.0) => Ok(ElicitResponse::answered(&req.id, json!("late"))),
                _ = ctx.done() => Err(Error::Cancelled),
            }
        }
    }

    struct Echo;

    #[async_trait]
    impl ElicitCallback for Echo {
        async fn elicit(&self, _ctx: &Context, req: &ElicitRequest) -> Result<ElicitResponse> {
            Ok(ElicitResponse::answered(&req.id, json!(req.message)))
        }
    }

    struct Failing;

    #[async_trait]
    impl ElicitCallback for Failing {
        async fn elicit(&self, _ctx: &Context, _req: &ElicitRequest) -> Result<ElicitResponse> {
            Err(Error::Internal("ui crashed".into()))
        }
    }

    #[test]
    fn test_validate() {
        assert!(ElicitRequest::text("", "hi").validate().is_err());
        assert!(ElicitRequest::new("1", ElicitKind::Choice, "pick").validate().is_err());
        assert!(ElicitRequest::new("1", ElicitKind::Choice, "pick")
            .with_choices(vec!["a".into()])
            .validate()
            .is_ok());
        assert!(ElicitRequest::new("1", ElicitKind::Form, "fill").validate().is_err());
        assert!(ElicitRequest::new("1", ElicitKind::Form, "fill")
            .with_schema(json!({"type": "object"}))
            .validate()
            .is_ok());
        assert!(ElicitRequest::new("1", ElicitKind::Confirmation, "ok?").validate().is_ok());
    }

    #[test]
    fn test_response_flags() {
        assert!(ElicitResponse::answered("1", json!(true)).is_success());
        assert!(!ElicitResponse::cancelled("1").is_success());
        assert!(!ElicitResponse::timed_out("1").is_success());
    }

    #[tokio::test]
    async fn test_no_handler() {
        let handler = ElicitationHandler::new();
        assert!(matches!(
            handler.handle(&Context::new(), &ElicitRequest::text("1", "hi")).await,
            Err(Error::NoHandler)
        ));
    }

    #[tokio::test]
    async fn test_invalid_request_is_wrapped() {
        let handler = ElicitationHandler::new().with_callback(Arc::new(Echo));
        let err = handler
            .handle(&Context::new(), &ElicitRequest::new("q", ElicitKind::Choice, "pick"))
            .await
            .unwrap_err();
        assert!(matches!(err.root_cause(), Error::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_answer_passes_through() {
        let handler = ElicitationHandler::new().with_callback(Arc::new(Echo));
        let resp = handler
            .handle(&Context::new(), &ElicitRequest::text("1", "name?"))
            .await
            .unwrap();
        assert!(resp.is_success());
        assert_eq!(resp.value, Some(json!("name?")));
    }

    #[tokio::test]
    async fn test_timeout_is_not_an_error() {
        let handler = ElicitationHandler::new()
            .with_default_timeout(Duration::from_millis(10))
            .with_callback(Arc::new(Slow(Duration::from_millis(100))));

        let resp = handler
            .handle(&Context::new(), &ElicitRequest::text("1", "wait"))
            .await
            .unwrap();
        assert!(resp.timed_out);
        assert!(!resp.cancelled);
        assert_eq!(resp.request_id, "1");
    }

    #[tokio::test]
    async fn test_request_timeout_overrides_default() {
        let handler = ElicitationHandler::new()
            .with_callback(Arc::new(Slow(Duration::from_secs(5))));
        let req = ElicitRequest::text("1", "wait").with_timeout(Duration::from_millis(10));
        assert!(handler.handle(&Context::new(), &req).await.unwrap().timed_out);
    }

    #[tokio::test]
    async fn test_cancel_is_not_an_error() {
        let handler = ElicitationHandler::new()
            .with_callback(Arc::new(Slow(Duration::from_secs(5))));
        let ctx = Context::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let resp = handler
            .handle(&ctx, &ElicitRequest::text("1", "wait"))
            .await
            .unwrap();
        assert!(resp.cancelled);
        assert!(!resp.timed_out);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_callback_giving_up_at_deadline_reports_timeout() {
        let handler = Arc::new(
            ElicitationHandler::new().with_callback(Arc::new(Slow(Duration::from_secs(5)))),
        );
        let mut calls = tokio::task::JoinSet::new();
        for i in 0..200 {
            let handler = Arc::clone(&handler);
            calls.spawn(async move {
                let req = ElicitRequest::text(format!("r{}", i), "wait")
                    .with_timeout(Duration::from_millis(1));
                handler.handle(&Context::new(), &req).await
            });
        }
        while let Some(joined) = calls.join_next().await {
            let resp = joined.unwrap().unwrap();
            assert!(resp.timed_out, "{} was not reported as timed out", resp.request_id);
            assert!(!resp.cancelled);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_callback_giving_up_on_cancel_reports_cancelled() {
        let handler = Arc::new(
            ElicitationHandler::new().with_callback(Arc::new(Slow(Duration::from_secs(5)))),
        );
        let mut calls = tokio::task::JoinSet::new();
        for i in 0..200 {
            let handler = Arc::clone(&handler);
            calls.spawn(async move {
                let ctx = Context::new();
                let canceller = ctx.clone();
                tokio::spawn(async move {
                    tokio::task::yield_now().await;
                    canceller.cancel();
                });
                handler
                    .handle(&ctx, &ElicitRequest::text(format!("c{}", i), "wait"))
                    .await
            });
        }
        while let Some(joined) = calls.join_next().await {
            let resp = joined.unwrap().unwrap();
            assert!(resp.cancelled, "{} was not reported as cancelled", resp.request_id);
            assert!(!resp.timed_out);
        }
    }

    #[tokio::test]
    async fn test_callback_error_is_wrapped() {
        let handler = ElicitationHandler::new();
        handler.set_callback(Arc::new(Failing)).await;
        let err = handler
            .handle(&Context::new(), &ElicitRequest::text("e1", "hi"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "elicit e1: handle: Internal error: ui crashed");
    }
}
