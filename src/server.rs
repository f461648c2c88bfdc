//! Protocol-neutral request dispatcher.
//!
//! The server decodes a raw JSON-RPC message with one of the registered wire
//! codecs, classifies its method into an [`Operation`], routes it to the
//! owning subsystem and encodes the reply through the same codec.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::capability::{Capabilities, Negotiator};
use crate::content::Content;
use crate::context::Context;
use crate::discovery::DiscoveryRegistry;
use crate::elicit::ElicitationHandler;
use crate::error::{Error, Result};
use crate::metrics::{Metrics, Timer};
use crate::prompt::{PromptMessage, PromptRegistry};
use crate::resource::{ResourceRegistry, SubscriptionManager};
use crate::session::SessionStore;
use crate::task::{Task, TaskManager};
use crate::tools::{check_required, ToolHandler, ToolRegistry};
use crate::wire::{
    content_error, id_to_string, mcp, Envelope, Operation, Request, Response, RpcError, Wire,
    WireRegistry,
};
use crate::VERSION;

/// Session state key holding the negotiated capability vector.
pub const CAPABILITIES_STATE_KEY: &str = "capabilities";

/// Response meta key carrying the task created for a tool call.
pub const TASK_ID_META_KEY: &str = "taskId";

/// Method of resource update notifications.
pub const RESOURCE_UPDATED_METHOD: &str = "notifications/resources/updated";

/// Client name used when `initialize` carries no `clientInfo.name`.
const ANONYMOUS_CLIENT: &str = "anonymous";

enum Reply {
    /// A `result` object, wrapped in a generic JSON-RPC envelope.
    Value(Value),
    /// A complete envelope already encoded by the codec.
    Encoded(Vec<u8>),
}

/// Multi-protocol tool server.
pub struct Server {
    name: String,
    version: String,
    protocol: String,
    tools: ToolRegistry,
    prompts: Arc<PromptRegistry>,
    resources: Arc<ResourceRegistry>,
    subscriptions: SubscriptionManager,
    sessions: Arc<SessionStore>,
    tasks: Arc<TaskManager>,
    elicitation: Arc<ElicitationHandler>,
    discovery: Arc<DiscoveryRegistry>,
    negotiator: Negotiator,
    capabilities: Capabilities,
    wires: Arc<WireRegistry>,
    metrics: Arc<Metrics>,
    /// In-flight requests, keyed by peer scope and request id. The sequence
    /// number identifies which request owns an entry.
    inflight: DashMap<String, (u64, CancellationToken)>,
    next_inflight: AtomicU64,
    /// In-flight tool calls, keyed by task id.
    running: DashMap<String, CancellationToken>,
}

impl Server {
    /// Create a server with the built-in tools and default subsystems.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: VERSION.to_string(),
            protocol: "mcp".to_string(),
            tools: ToolRegistry::with_builtins(),
            prompts: Arc::new(PromptRegistry::new()),
            resources: Arc::new(ResourceRegistry::new()),
            subscriptions: SubscriptionManager::default(),
            sessions: Arc::new(SessionStore::default()),
            tasks: Arc::new(TaskManager::default()),
            elicitation: Arc::new(ElicitationHandler::new()),
            discovery: Arc::new(DiscoveryRegistry::new()),
            negotiator: Negotiator::default(),
            capabilities: Capabilities {
                tools: true,
                resources: true,
                prompts: true,
                streaming: true,
                sampling: false,
                progress: true,
                extensions: Default::default(),
            },
            wires: Arc::new(WireRegistry::with_defaults()),
            metrics: Metrics::new(),
            inflight: DashMap::new(),
            next_inflight: AtomicU64::new(1),
            running: DashMap::new(),
        }
    }

    /// Default protocol for transports that do not name one.
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_tool<T: ToolHandler + 'static>(mut self, tool: T) -> Self {
        self.tools.register(tool);
        self
    }

    pub fn with_prompts(mut self, prompts: Arc<PromptRegistry>) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_resources(mut self, resources: Arc<ResourceRegistry>) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_subscriptions(mut self, subscriptions: SubscriptionManager) -> Self {
        self.subscriptions = subscriptions;
        self
    }

    pub fn with_sessions(mut self, sessions: Arc<SessionStore>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn with_tasks(mut self, tasks: Arc<TaskManager>) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn with_elicitation(mut self, elicitation: Arc<ElicitationHandler>) -> Self {
        self.elicitation = elicitation;
        self
    }

    pub fn with_discovery(mut self, discovery: Arc<DiscoveryRegistry>) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn with_negotiator(mut self, negotiator: Negotiator) -> Self {
        self.negotiator = negotiator;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_wires(mut self, wires: Arc<WireRegistry>) -> Self {
        self.wires = wires;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn prompts(&self) -> &Arc<PromptRegistry> {
        &self.prompts
    }

    pub fn resources(&self) -> &Arc<ResourceRegistry> {
        &self.resources
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn tasks(&self) -> &Arc<TaskManager> {
        &self.tasks
    }

    pub fn elicitation(&self) -> &Arc<ElicitationHandler> {
        &self.elicitation
    }

    pub fn discovery(&self) -> &Arc<DiscoveryRegistry> {
        &self.discovery
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn wires(&self) -> &Arc<WireRegistry> {
        &self.wires
    }

    /// Look up a codec by protocol name.
    pub fn wire(&self, protocol: &str) -> Result<Arc<dyn Wire>> {
        self.wires
            .get(protocol)
            .ok_or_else(|| Error::UnsupportedFormat(protocol.to_string()))
    }

    /// Handle one message in the named protocol.
    pub async fn handle_protocol(&self, ctx: &Context, protocol: &str, raw: &[u8]) -> Option<Vec<u8>> {
        match self.wire(protocol) {
            Ok(wire) => self.handle(ctx, wire.as_ref(), raw).await,
            Err(e) => {
                warn!("Rejecting message for unknown protocol {}", protocol);
                let id = Envelope::parse(raw).map(|env| env.id_string()).unwrap_or_default();
                Envelope::error(&id, RpcError::from(&e)).to_bytes().ok()
            }
        }
    }

    /// Handle one raw message. Returns the encoded reply, or `None` for
    /// notifications and for responses sent by the peer.
    pub async fn handle(&self, ctx: &Context, wire: &dyn Wire, raw: &[u8]) -> Option<Vec<u8>> {
        let timer = Timer::start();
        let env = match Envelope::parse(raw) {
            Ok(env) => env,
            Err(e) => {
                warn!("Failed to parse message: {}", e);
                self.metrics.inc_requests();
                self.metrics.inc_failed();
                let reply = Envelope {
                    id: Some(Value::Null),
                    ..Envelope::error("", RpcError::from(&e))
                };
                return reply.to_bytes().ok();
            }
        };

        let Some(method) = env.method.clone() else {
            debug!("Ignoring message without method (id: {})", env.id_string());
            return None;
        };
        let id = env.id_string();
        let op = wire.operation(&method);

        if id.is_empty() || op == Operation::Notification {
            self.metrics.inc_notifications();
            self.handle_notification(ctx, &method, &env);
            return None;
        }

        debug!("Handling {} request: {} (id: {})", wire.name(), method, id);
        self.metrics.inc_requests();

        let req_ctx = ctx.child().with_request_id(&id);
        let tracked = inflight_key(ctx, &id).map(|key| {
            let seq = self.next_inflight.fetch_add(1, Ordering::Relaxed);
            self.inflight.insert(key.clone(), (seq, req_ctx.token().clone()));
            (key, seq)
        });
        let outcome = self.dispatch(&req_ctx, wire, op, &method, raw).await;
        if let Some((key, seq)) = tracked {
            self.inflight.remove_if(&key, |_, (owner, _)| *owner == seq);
        }

        let encoded = match outcome {
            Ok(Reply::Value(value)) => {
                self.metrics.inc_success();
                Envelope::result(&id, value).to_bytes()
            }
            Ok(Reply::Encoded(bytes)) => {
                self.metrics.inc_success();
                Ok(bytes)
            }
            Err(e) => {
                debug!("Request {} failed: {}", id, e);
                self.metrics.inc_failed();
                Envelope::error(&id, RpcError::from(&e)).to_bytes()
            }
        };
        self.metrics.observe_latency(&timer);
        debug!("Handled {} (id: {}) in {}ms", method, id, timer.elapsed_ms());

        match encoded {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                error!("Failed to encode reply for {}: {}", id, e);
                Envelope::error(&id, RpcError::from(&e)).to_bytes().ok()
            }
        }
    }

    async fn dispatch(
        &self,
        ctx: &Context,
        wire: &dyn Wire,
        op: Operation,
        method: &str,
        raw: &[u8],
    ) -> Result<Reply> {
        ctx.check()?;
        if op != Operation::Initialize {
            if let Some(session_id) = ctx.session_id() {
                self.sessions.get(ctx, session_id).await?;
            }
        }

        if matches!(op, Operation::Notification | Operation::Unknown) {
            return Err(Error::MethodNotFound(method.to_string()));
        }

        let req = wire.decode_request(raw)?;
        match op {
            Operation::Initialize => self.handle_initialize(ctx, wire, &req).await,
            Operation::Ping => Ok(Reply::Value(json!({}))),
            Operation::ListTools => {
                let bytes = wire.encode_tool_list(&self.tools.list_tools())?;
                Ok(Reply::Value(serde_json::from_slice(&bytes)?))
            }
            Operation::CallTool => self.handle_call_tool(ctx, wire, req).await,
            Operation::ListPrompts => {
                let prompts = self.prompts.list(ctx).await?;
                Ok(Reply::Value(json!({ "prompts": prompts })))
            }
            Operation::GetPrompt => self.handle_get_prompt(ctx, &req).await,
            Operation::ListResources => {
                let resources = self.resources.list(ctx).await?;
                Ok(Reply::Value(json!({ "resources": resources })))
            }
            Operation::ListResourceTemplates => {
                let templates = self.resources.templates(ctx).await?;
                Ok(Reply::Value(json!({ "resourceTemplates": templates })))
            }
            Operation::ReadResource => {
                let uri = target(&req, &["uri"]).ok_or_else(|| missing("uri"))?;
                let contents = self.resources.read(ctx, &uri).await?;
                Ok(Reply::Value(json!({ "contents": [contents] })))
            }
            Operation::Subscribe => self.handle_subscribe(ctx, &req),
            Operation::Unsubscribe => {
                let uri = target(&req, &["uri"]).ok_or_else(|| missing("uri"))?;
                self.subscriptions.unsubscribe(ctx, &uri)?;
                Ok(Reply::Value(json!({})))
            }
            Operation::GetTask => {
                let id = task_target(&req)?;
                let task = self.tasks.get(ctx, &id).await?;
                Ok(Reply::Value(serde_json::to_value(task)?))
            }
            Operation::CancelTask => {
                let id = task_target(&req)?;
                let task = self.cancel_task(ctx, &id).await?;
                Ok(Reply::Value(serde_json::to_value(task)?))
            }
            Operation::Notification | Operation::Unknown => {
                Err(Error::MethodNotFound(method.to_string()))
            }
        }
    }

    fn handle_notification(&self, ctx: &Context, method: &str, env: &Envelope) {
        debug!("Handling notification: {}", method);
        match method {
            "notifications/initialized" => {
                info!("Client initialized");
            }
            "notifications/cancelled" => {
                let params = env.params_object();
                if let Some(request_id) = params.get("requestId").map(id_to_string) {
                    let entry = inflight_key(ctx, &request_id)
                        .and_then(|key| self.inflight.get(&key));
                    if let Some(entry) = entry {
                        info!("Cancelling request: {}", request_id);
                        entry.1.cancel();
                    }
                }
            }
            _ => {
                debug!("Unknown notification: {}", method);
            }
        }
    }

    async fn handle_initialize(&self, ctx: &Context, wire: &dyn Wire, req: &Request) -> Result<Reply> {
        let client_name = req
            .arguments
            .get("clientInfo")
            .and_then(|info| info.get("name"))
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .unwrap_or(ANONYMOUS_CLIENT);
        let client_caps = req.arguments.get("capabilities").and_then(parse_capabilities);

        let negotiated = self
            .negotiator
            .negotiate(client_caps.as_ref(), Some(&self.capabilities))
            .unwrap_or_default();

        let mut session = self.sessions.create(ctx, client_name).await?;
        session.set_state(CAPABILITIES_STATE_KEY, serde_json::to_value(&negotiated)?);
        self.sessions.update(ctx, &session).await?;
        self.metrics.inc_sessions();

        info!(
            "Initialized {} session {} for {}",
            wire.name(),
            session.id,
            client_name
        );

        Ok(Reply::Value(json!({
            "protocolVersion": wire.version(),
            "serverInfo": { "name": self.name, "version": self.version },
            "sessionId": session.id,
            "capabilities": negotiated,
            "wireCapabilities": wire.capabilities(),
        })))
    }

    /// Run a tool call as a task: create, mark running, execute under a
    /// cancellable child context, then complete or fail it.
    async fn handle_call_tool(&self, ctx: &Context, wire: &dyn Wire, req: Request) -> Result<Reply> {
        let tool = self
            .tools
            .get_tool(&req.tool_id)
            .ok_or_else(|| Error::ToolNotFound(req.tool_id.clone()))?;
        check_required(&tool.definition(), &req.arguments)?;
        self.metrics.inc_tool_calls();

        let task_id = Uuid::new_v4().to_string();
        self.tasks.create(ctx, &task_id).await?;
        let call_ctx = ctx.child().with_task_id(&task_id);
        self.running
            .insert(task_id.clone(), call_ctx.token().clone());
        if let Err(e) = self
            .tasks
            .update(ctx, &task_id, 0.0, format!("calling {}", req.tool_id))
            .await
        {
            self.running.remove(&task_id);
            return Err(e);
        }
        let outcome = tool.execute(&call_ctx, req.arguments).await;
        self.running.remove(&task_id);

        // Bookkeeping must not be skipped because the call itself was cancelled.
        let books = Context::new();
        let response = match outcome {
            Ok(result) if result.is_error => {
                let err = content_error(&result.content);
                self.settle(self.tasks.fail(&books, &task_id, err.message.clone()).await);
                Response::tool_error(&req.id, result.content, err)
            }
            Ok(result) => {
                let value = Value::Array(result.content.iter().map(mcp::content_to_json).collect());
                self.settle(self.tasks.complete(&books, &task_id, value).await);
                Response::success(&req.id, result.content)
            }
            Err(e) => {
                self.settle(self.tasks.fail(&books, &task_id, e.to_string()).await);
                Response::tool_error(&req.id, vec![Content::text(e.to_string())], RpcError::from(&e))
            }
        };

        let response = response.with_meta(TASK_ID_META_KEY, json!(task_id));
        Ok(Reply::Encoded(wire.encode_response(&response)?))
    }

    fn settle(&self, outcome: Result<Task>) {
        match outcome {
            Ok(_) => self.metrics.inc_tasks_finished(),
            Err(e) if matches!(e.root_cause(), Error::InvalidTransition) => {
                debug!("Task already finished: {}", e);
            }
            Err(e) => warn!("Failed to record task outcome: {}", e),
        }
    }

    /// Cancel a task record and the tool call running under it, if any.
    pub async fn cancel_task(&self, ctx: &Context, id: &str) -> Result<Task> {
        let task = self.tasks.cancel(ctx, id).await?;
        if let Some((_, token)) = self.running.remove(id) {
            token.cancel();
        }
        self.metrics.inc_tasks_cancelled();
        self.metrics.inc_tasks_finished();
        Ok(task)
    }

    async fn handle_get_prompt(&self, ctx: &Context, req: &Request) -> Result<Reply> {
        let name = target(req, &["name"]).ok_or_else(|| missing("name"))?;
        let raw_args: HashMap<String, Value> = match req.arguments.get("arguments") {
            Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            _ => req
                .arguments
                .iter()
                .filter(|(k, _)| k.as_str() != "name")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        let args: HashMap<String, String> = raw_args
            .into_iter()
            .map(|(k, v)| {
                let s = match v {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, s)
            })
            .collect();

        let (prompt, messages) = self.prompts.get(ctx, &name, &args).await?;
        Ok(Reply::Value(json!({
            "description": prompt.description,
            "messages": messages.iter().map(message_to_json).collect::<Vec<_>>(),
        })))
    }

    /// Forward resource updates to the peer as notifications. Needs a
    /// transport that supplies an outbound sink.
    fn handle_subscribe(&self, ctx: &Context, req: &Request) -> Result<Reply> {
        let uri = target(req, &["uri"]).ok_or_else(|| missing("uri"))?;
        let outbound = ctx.outbound().cloned().ok_or_else(|| {
            Error::InvalidRequest("resource subscriptions need a streaming transport".to_string())
        })?;

        let mut updates = self.subscriptions.subscribe(ctx, &uri)?;
        tokio::spawn(async move {
            while let Some(contents) = updates.recv().await {
                let note = Envelope::notification(
                    RESOURCE_UPDATED_METHOD,
                    json!({ "uri": contents.uri, "contents": [contents] }),
                );
                let bytes = match note.to_bytes() {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!("Failed to encode resource update: {}", e);
                        continue;
                    }
                };
                if outbound.send(bytes).await.is_err() {
                    debug!("Outbound closed, stopping resource forwarder");
                    break;
                }
            }
        });
        Ok(Reply::Value(json!({})))
    }

    /// Re-emit a request decoded in one protocol in another. The method is
    /// mapped through the shared operation table when both sides know it.
    pub fn convert(&self, from: &str, to: &str, raw: &[u8]) -> Result<Vec<u8>> {
        let source = self.wire(from)?;
        let dest = self.wire(to)?;
        let mut req = source.decode_request(raw)?;
        if let Some(method) = dest.method_for(source.operation(&req.method)) {
            req.method = method.to_string();
        }
        dest.encode_request(&req)
    }

    /// Re-emit a response decoded in one protocol in another.
    pub fn convert_response(&self, from: &str, to: &str, raw: &[u8]) -> Result<Vec<u8>> {
        let resp = self.wire(from)?.decode_response(raw)?;
        self.wire(to)?.encode_response(&resp)
    }
}

/// Requests are addressable for cancellation only within a session or a
/// connection; without either there is no peer scope to match against.
fn inflight_key(ctx: &Context, id: &str) -> Option<String> {
    if let Some(session) = ctx.session_id() {
        Some(format!("session:{}/{}", session, id))
    } else {
        ctx.connection_id()
            .map(|conn| format!("conn:{}/{}", conn, id))
    }
}

fn missing(key: &str) -> Error {
    Error::InvalidParams(format!("Missing required argument: {}", key))
}

/// First string argument among `keys`, falling back to the request's tool id.
fn target(req: &Request, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| req.arguments.get(*k).and_then(Value::as_str))
        .map(String::from)
        .or_else(|| (!req.tool_id.is_empty()).then(|| req.tool_id.clone()))
}

fn task_target(req: &Request) -> Result<String> {
    target(req, &["taskId", "runId", "id"]).ok_or_else(|| missing("taskId"))
}

fn message_to_json(msg: &PromptMessage) -> Value {
    json!({
        "role": msg.role,
        "content": msg.content.iter().map(mcp::content_to_json).collect::<Vec<_>>(),
    })
}

/// Read a client capability object. A flag counts as present when it is
/// `true` or any non-null, non-boolean value (MCP advertises `{"tools": {}}`).
fn parse_capabilities(value: &Value) -> Option<Capabilities> {
    let obj = value.as_object()?;
    let flag = |key: &str| match obj.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Null) | None => false,
        Some(_) => true,
    };
    Some(Capabilities {
        tools: flag("tools"),
        resources: flag("resources"),
        prompts: flag("prompts"),
        streaming: flag("streaming"),
        sampling: flag("sampling"),
        progress: flag("progress"),
        extensions: obj
            .get("extensions")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_str).map(String::from).collect())
            .unwrap_or_default(),
    })
}
