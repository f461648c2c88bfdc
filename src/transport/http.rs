//! HTTP transport.
//!
//! JSON-RPC messages are POSTed to `{path}` (server default codec) or
//! `{path}/{protocol}`. Server-pushed updates are exposed as SSE streams:
//! `GET {path}/tasks/{id}/events` and `GET {path}/resources/events?uri=...`.
//! The session id travels in the `Mcp-Session-Id` header.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Response, Sse,
    },
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Transport, TransportInfo};
use crate::context::Context;
use crate::error::{codes, Error, Result};
use crate::server::Server;

pub const NAME: &str = "http";

/// Header carrying the session id.
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

/// Upper bound on graceful shutdown before connections are dropped.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

const SSE_KEEP_ALIVE: Duration = Duration::from_secs(30);

/// HTTP router state.
#[derive(Clone)]
struct AppState {
    server: Arc<Server>,
    /// Parent of every request and stream context; cancelled on shutdown.
    ctx: Context,
}

/// Build the router for `server` mounted at `path`.
pub fn router(server: Arc<Server>, path: &str) -> Router {
    router_with_context(Context::new(), server, path)
}

/// Like [`router`], with every request context derived from `ctx`.
pub fn router_with_context(ctx: Context, server: Arc<Server>, path: &str) -> Router {
    let base = path.trim_end_matches('/');
    let root = if base.is_empty() { "/" } else { base };

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route(root, post(post_default))
        .route(&format!("{}/{{protocol}}", base), post(post_protocol))
        .route(&format!("{}/tasks/{{id}}/events", base), get(task_events))
        .route(&format!("{}/resources/events", base), get(resource_events))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { server, ctx })
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "name": state.server.name(),
        "version": crate::VERSION,
    }))
}

/// Prometheus metrics endpoint.
async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.server.metrics().to_prometheus(),
    )
}

async fn post_default(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let protocol = state.server.protocol().to_string();
    dispatch(&state, &protocol, &headers, &body).await
}

async fn post_protocol(
    State(state): State<AppState>,
    Path(protocol): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    dispatch(&state, &protocol, &headers, &body).await
}

async fn dispatch(state: &AppState, protocol: &str, headers: &HeaderMap, body: &[u8]) -> Response {
    let mut ctx = state.ctx.child().with_trace_id(Uuid::new_v4().to_string());
    if let Some(session_id) = session_id(headers) {
        ctx = ctx.with_session_id(session_id);
    }

    let Some(reply) = state.server.handle_protocol(&ctx, protocol, body).await else {
        return StatusCode::ACCEPTED.into_response();
    };

    let mut resp = (
        [(header::CONTENT_TYPE, "application/json")],
        reply.clone(),
    )
        .into_response();
    if let Some(id) = new_session_id(&reply) {
        match HeaderValue::from_str(&id) {
            Ok(value) => {
                resp.headers_mut().insert(SESSION_ID_HEADER, value);
            }
            Err(e) => warn!("Session id is not a valid header value: {}", e),
        }
    }
    resp
}

fn session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// `result.sessionId` of an initialize reply.
fn new_session_id(reply: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(reply).ok()?;
    value
        .get("result")?
        .get("sessionId")?
        .as_str()
        .map(String::from)
}

/// Stream snapshots of a task until it reaches a terminal state.
async fn task_events(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let ctx = state.ctx.child();
    let rx = match state.server.tasks().subscribe(&ctx, &id).await {
        Ok(rx) => rx,
        Err(e) => return error_response(&e),
    };
    debug!("SSE subscriber attached to task {}", id);

    // Dropping the response on disconnect ends the subscription.
    let guard = ctx.token().clone().drop_guard();
    let stream = ReceiverStream::new(rx).map(move |task| {
        let _ = &guard;
        Event::default().event("task").json_data(task)
    });
    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE).text("ping"))
        .into_response()
}

#[derive(Debug, Deserialize)]
struct ResourceEventsQuery {
    uri: String,
}

/// Stream updated contents of one resource.
async fn resource_events(
    State(state): State<AppState>,
    Query(query): Query<ResourceEventsQuery>,
) -> Response {
    let ctx = state.ctx.child();
    let rx = match state.server.subscriptions().subscribe(&ctx, &query.uri) {
        Ok(rx) => rx,
        Err(e) => return error_response(&e),
    };
    debug!("SSE subscriber attached to resource {}", query.uri);

    let guard = ctx.token().clone().drop_guard();
    let stream = ReceiverStream::new(rx).map(move |contents| {
        let _ = &guard;
        Event::default().event("resource").json_data(contents)
    });
    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE).text("ping"))
        .into_response()
}

fn error_response(err: &Error) -> Response {
    let status = match err.rpc_code() {
        codes::NOT_FOUND => StatusCode::NOT_FOUND,
        codes::INTERNAL_ERROR => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    };
    (
        status,
        Json(json!({ "error": { "code": err.rpc_code(), "message": err.to_string() } })),
    )
        .into_response()
}

/// HTTP transport.
pub struct HttpTransport {
    addr: String,
    path: String,
    bound: Mutex<Option<SocketAddr>>,
    serving: AtomicBool,
    shutdown: CancellationToken,
}

impl HttpTransport {
    pub fn new(addr: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            path: path.into(),
            bound: Mutex::new(None),
            serving: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    /// Address actually bound, once serving.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.bound.lock().ok().and_then(|addr| *addr)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        NAME
    }

    fn info(&self) -> TransportInfo {
        TransportInfo {
            name: NAME.to_string(),
            addr: self
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|| self.addr.clone()),
            path: self.path.clone(),
        }
    }

    async fn serve(&self, ctx: &Context, server: Arc<Server>) -> Result<()> {
        if self.serving.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyServing);
        }

        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        let local = listener.local_addr()?;
        if let Ok(mut bound) = self.bound.lock() {
            *bound = Some(local);
        }

        let conn = ctx.child();
        let app = router_with_context(conn.clone(), server, &self.path);
        let stop = CancellationToken::new();
        let graceful = stop.clone();

        info!("Starting HTTP server on {}{}", local, self.path);
        let mut handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { graceful.cancelled().await })
                .await
        });

        tokio::select! {
            res = &mut handle => {
                return match res {
                    Ok(res) => res.map_err(Error::from),
                    Err(e) => Err(Error::Internal(format!("HTTP server task failed: {}", e))),
                };
            }
            _ = ctx.done() => {}
            _ = self.shutdown.cancelled() => {}
        }

        info!("Shutting down HTTP server");
        conn.cancel();
        stop.cancel();
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut handle).await {
            Ok(Ok(res)) => res.map_err(Error::from),
            Ok(Err(e)) => Err(Error::Internal(format!("HTTP server task failed: {}", e))),
            Err(_) => {
                warn!("Graceful shutdown exceeded {:?}, dropping connections", SHUTDOWN_TIMEOUT);
                handle.abort();
                Ok(())
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.shutdown.cancel();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn app() -> (Arc<Server>, Router) {
        let server = Arc::new(Server::new("test"));
        let app = router(Arc::clone(&server), "/mcp");
        (server, app)
    }

    fn post(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (_, app) = app();
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_initialize_sets_session_header() {
        let (_, app) = app();
        let resp = app
            .oneshot(post(
                "/mcp",
                json!({"jsonrpc": "2.0", "id": 1, "method": "initialize",
                       "params": {"clientInfo": {"name": "web"}}}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let header = resp.headers().get(SESSION_ID_HEADER).cloned().unwrap();
        let body = body_json(resp).await;
        assert_eq!(header.to_str().unwrap(), body["result"]["sessionId"]);
    }

    #[tokio::test]
    async fn test_named_protocol_route() {
        let (_, app) = app();
        let resp = app
            .oneshot(post("/mcp/a2a", json!({"jsonrpc": "2.0", "id": 1, "method": "skills/list"})))
            .await
            .unwrap();
        assert!(body_json(resp).await["result"]["skills"].is_array());
    }

    #[tokio::test]
    async fn test_notification_is_accepted() {
        let (_, app) = app();
        let resp = app
            .oneshot(post("/mcp", json!({"jsonrpc": "2.0", "method": "notifications/initialized"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_unknown_session_header() {
        let (_, app) = app();
        let mut req = post("/mcp", json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}));
        req.headers_mut()
            .insert(SESSION_ID_HEADER, HeaderValue::from_static("nope"));
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(body_json(resp).await["error"]["code"], codes::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let (server, app) = app();
        server.metrics().inc_requests();
        let resp = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("agent_bridge_requests_total 1"));
    }

    #[tokio::test]
    async fn test_task_events_unknown_task() {
        let (_, app) = app();
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/mcp/tasks/missing/events")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_task_events_stream() {
        let (server, app) = app();
        let ctx = Context::new();
        server.tasks().create(&ctx, "t1").await.unwrap();

        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/mcp/tasks/t1/events")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );

        server.tasks().update(&ctx, "t1", 0.5, "half").await.unwrap();
        server
            .tasks()
            .complete(&ctx, "t1", json!("done"))
            .await
            .unwrap();

        // The stream ends when the task reaches a terminal state.
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("event: task"));
        assert!(text.contains("\"state\":\"complete\""));
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition never held");
    }

    #[tokio::test]
    async fn test_resource_events_disconnect_ends_subscription() {
        let (server, app) = app();
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/mcp/resources/events?uri=mem://notes")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(server.subscriptions().subscriber_count("mem://notes"), 1);

        drop(resp);
        wait_until(|| server.subscriptions().subscriber_count("mem://notes") == 0).await;
    }

    #[tokio::test]
    async fn test_task_events_disconnect_ends_subscription() {
        let (server, app) = app();
        server.tasks().create(&Context::new(), "t2").await.unwrap();
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/mcp/tasks/t2/events")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(server.tasks().subscriber_count("t2"), 1);

        drop(resp);
        wait_until(|| server.tasks().subscriber_count("t2") == 0).await;
    }

    #[tokio::test]
    async fn test_serve_and_close() {
        let transport = Arc::new(HttpTransport::new("127.0.0.1:0", "/mcp"));
        let server = Arc::new(Server::new("test"));
        let serving = Arc::clone(&transport);
        let handle = tokio::spawn(async move { serving.serve(&Context::new(), server).await });

        while transport.local_addr().is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_ne!(transport.info().addr, "127.0.0.1:0");

        transport.close().await.unwrap();
        transport.close().await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(6), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
