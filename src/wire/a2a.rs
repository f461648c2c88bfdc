//! Agent-to-Agent protocol codec.
//!
//! Tools are advertised as skills. A call names the skill in `params.skillId`
//! (mirrored in `params.id`) and wraps a human-readable summary in a user
//! message; replies carry `result.status.state` and `result.artifacts[].parts[]`
//! whose items are discriminated by `kind`.

use serde_json::{json, Map, Value};
use tracing::warn;

use super::{
    content_error, insert_opt, listing_object, map_to_object, object_to_map, remaining_params,
    str_field, Envelope, Operation, Request, Response, ToolDescriptor, Wire, WireCapabilities,
};
use crate::content::{
    decode_base64, encode_base64, AudioContent, Content, FileContent, ImageContent,
    ResourceContent, TextContent,
};
use crate::error::{Error, Result};

/// A2A protocol version.
pub const A2A_VERSION: &str = "0.2.5";

const META_KEY: &str = "_meta";
const TASK_ID_KEY: &str = "taskId";

/// Task states reported in `result.status.state`.
pub const STATE_COMPLETED: &str = "completed";
pub const STATE_FAILED: &str = "failed";

/// Codec for the Agent-to-Agent protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct A2aWire;

impl A2aWire {
    pub fn new() -> Self {
        Self
    }
}

fn summary(req: &Request) -> String {
    if req.arguments.is_empty() {
        format!("Invoke skill {}", req.tool_id)
    } else {
        format!(
            "Invoke skill {} with {}",
            req.tool_id,
            map_to_object(&req.arguments)
        )
    }
}

impl Wire for A2aWire {
    fn name(&self) -> &'static str {
        "a2a"
    }

    fn version(&self) -> &'static str {
        A2A_VERSION
    }

    fn encode_request(&self, req: &Request) -> Result<Vec<u8>> {
        let mut params = Map::new();
        params.insert("id".into(), json!(req.tool_id));
        params.insert("skillId".into(), json!(req.tool_id));
        params.insert("arguments".into(), map_to_object(&req.arguments));
        params.insert(
            "message".into(),
            json!({
                "role": "user",
                "parts": [{ "kind": "text", "text": summary(req) }],
            }),
        );
        if !req.meta.is_empty() {
            params.insert(META_KEY.into(), map_to_object(&req.meta));
        }
        let method = if req.method.is_empty() {
            "message/send"
        } else {
            req.method.as_str()
        };
        Envelope::request(&req.id, method, Value::Object(params)).to_bytes()
    }

    fn decode_request(&self, data: &[u8]) -> Result<Request> {
        let env = Envelope::parse(data)?;
        let params = env.params_object();
        let tool_id = str_field(&params, "skillId")
            .or_else(|| str_field(&params, "id"))
            .unwrap_or_default();
        let arguments = match params.get("arguments") {
            Some(args) => object_to_map(Some(args)),
            None => data_part_arguments(&params).unwrap_or_else(|| {
                remaining_params(&params, &["id", "skillId", "message", META_KEY])
            }),
        };
        Ok(Request {
            id: env.id_string(),
            method: env.method.clone().unwrap_or_default(),
            tool_id,
            arguments,
            meta: object_to_map(params.get(META_KEY)),
        })
    }

    fn encode_response(&self, resp: &Response) -> Result<Vec<u8>> {
        if let (Some(error), true) = (&resp.error, resp.content.is_empty()) {
            return Envelope::error(&resp.id, error.clone()).to_bytes();
        }
        let state = if resp.is_error {
            STATE_FAILED
        } else {
            STATE_COMPLETED
        };
        let mut result = Map::new();
        result.insert("status".into(), json!({ "state": state }));
        result.insert(
            "artifacts".into(),
            json!([{ "parts": resp.content.iter().map(content_to_json).collect::<Vec<_>>() }]),
        );
        let mut meta = resp.meta.clone();
        if let Some(task_id) = meta.remove(TASK_ID_KEY) {
            result.insert(TASK_ID_KEY.into(), task_id);
        }
        if !meta.is_empty() {
            result.insert(META_KEY.into(), map_to_object(&meta));
        }
        Envelope::result(&resp.id, Value::Object(result)).to_bytes()
    }

    fn decode_response(&self, data: &[u8]) -> Result<Response> {
        let env = Envelope::parse(data)?;
        let id = env.id_string();
        if let Some(error) = env.error.clone() {
            return Ok(Response::failure(id, error));
        }
        let result = env.result_object();
        let content: Vec<Content> = result
            .get("artifacts")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|artifact| artifact.get("parts").and_then(Value::as_array))
            .flatten()
            .filter_map(content_from_json)
            .collect();
        let state = result
            .get("status")
            .and_then(|s| s.get("state"))
            .and_then(Value::as_str)
            .unwrap_or(STATE_COMPLETED);
        let is_error = matches!(state, STATE_FAILED | "rejected");
        let mut meta = object_to_map(result.get(META_KEY));
        if let Some(task_id) = result.get(TASK_ID_KEY) {
            meta.insert(TASK_ID_KEY.into(), task_id.clone());
        }
        Ok(Response {
            id,
            error: is_error.then(|| content_error(&content)),
            content,
            is_error,
            meta,
        })
    }

    fn encode_tool_list(&self, tools: &[ToolDescriptor]) -> Result<Vec<u8>> {
        let skills: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "id": t.name,
                    "name": t.name,
                    "description": t.description,
                    "inputSchema": t.input_schema,
                })
            })
            .collect();
        serde_json::to_vec(&json!({ "skills": skills })).map_err(Error::EncodeFailure)
    }

    fn decode_tool_list(&self, data: &[u8]) -> Result<Vec<ToolDescriptor>> {
        let obj = listing_object(data)?;
        Ok(obj
            .get("skills")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_object)
                    .filter_map(|skill| {
                        let name = str_field(skill, "id").or_else(|| str_field(skill, "name"))?;
                        Some(ToolDescriptor {
                            name,
                            description: str_field(skill, "description").unwrap_or_default(),
                            input_schema: skill
                                .get("inputSchema")
                                .cloned()
                                .unwrap_or_else(|| json!({})),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn capabilities(&self) -> WireCapabilities {
        WireCapabilities {
            streaming: true,
            batch: false,
            progress: true,
            cancellation: true,
        }
    }

    fn operation(&self, method: &str) -> Operation {
        match method {
            "initialize" => Operation::Initialize,
            "ping" => Operation::Ping,
            "agent/card" | "skills/list" => Operation::ListTools,
            "message/send" | "message/stream" => Operation::CallTool,
            "prompts/list" => Operation::ListPrompts,
            "prompts/get" => Operation::GetPrompt,
            "resources/list" => Operation::ListResources,
            "resources/read" => Operation::ReadResource,
            "resources/templates/list" => Operation::ListResourceTemplates,
            "resources/subscribe" | "tasks/resubscribe" => Operation::Subscribe,
            "resources/unsubscribe" => Operation::Unsubscribe,
            "tasks/get" => Operation::GetTask,
            "tasks/cancel" => Operation::CancelTask,
            m if m.starts_with("notifications/") => Operation::Notification,
            _ => Operation::Unknown,
        }
    }

    fn method_for(&self, op: Operation) -> Option<&'static str> {
        Some(match op {
            Operation::Initialize => "initialize",
            Operation::Ping => "ping",
            Operation::ListTools => "skills/list",
            Operation::CallTool => "message/send",
            Operation::ListPrompts => "prompts/list",
            Operation::GetPrompt => "prompts/get",
            Operation::ListResources => "resources/list",
            Operation::ReadResource => "resources/read",
            Operation::ListResourceTemplates => "resources/templates/list",
            Operation::Subscribe => "resources/subscribe",
            Operation::Unsubscribe => "resources/unsubscribe",
            Operation::GetTask => "tasks/get",
            Operation::CancelTask => "tasks/cancel",
            Operation::Notification | Operation::Unknown => return None,
        })
    }
}

/// Arguments carried as a structured `data` part of the user message.
fn data_part_arguments(params: &Map<String, Value>) -> Option<std::collections::HashMap<String, Value>> {
    params
        .get("message")?
        .get("parts")?
        .as_array()?
        .iter()
        .filter(|p| p.get("kind").and_then(Value::as_str) == Some("data"))
        .find_map(|p| p.get("data").filter(|d| d.is_object()))
        .map(|d| object_to_map(Some(d)))
}

/// Render a content part as an A2A message part.
pub fn content_to_json(content: &Content) -> Value {
    let mut obj = Map::new();
    match content {
        Content::Text(c) => {
            obj.insert("kind".into(), json!("text"));
            obj.insert("text".into(), json!(c.text));
        }
        Content::Image(ImageContent { data, .. }) | Content::Audio(AudioContent { data, .. }) => {
            obj.insert("kind".into(), json!("data"));
            obj.insert("data".into(), json!(encode_base64(data)));
            obj.insert("mimeType".into(), json!(content.mime_type()));
        }
        Content::Resource(c) => {
            obj.insert("kind".into(), json!("file"));
            obj.insert("uri".into(), json!(c.uri));
            obj.insert("mimeType".into(), json!(content.mime_type()));
        }
        Content::File(c) => {
            obj.insert("kind".into(), json!("file"));
            obj.insert("bytes".into(), json!(encode_base64(&c.data)));
            obj.insert("mimeType".into(), json!(content.mime_type()));
            insert_opt(&mut obj, "name", c.name.as_deref());
        }
    }
    Value::Object(obj)
}

/// Parse an A2A part. Unknown or malformed parts yield `None`.
pub fn content_from_json(value: &Value) -> Option<Content> {
    let obj = value.as_object()?;
    let mime_type = str_field(obj, "mimeType");
    let parsed = match obj.get("kind").and_then(Value::as_str)? {
        "text" => Content::text(str_field(obj, "text").unwrap_or_default()),
        "data" => match obj.get("data") {
            Some(Value::String(encoded)) => {
                let data = decode_base64(encoded).ok()?;
                if mime_type.as_deref().is_some_and(|m| m.starts_with("audio/")) {
                    Content::Audio(AudioContent {
                        data,
                        mime_type,
                        uri: None,
                    })
                } else {
                    Content::Image(ImageContent {
                        data,
                        mime_type,
                        ..Default::default()
                    })
                }
            }
            // Structured data parts surface as JSON text.
            Some(structured) => Content::Text(TextContent {
                text: structured.to_string(),
                mime_type: Some("application/json".to_string()),
            }),
            None => return None,
        },
        "file" => match str_field(obj, "bytes") {
            Some(encoded) => Content::File(FileContent {
                data: decode_base64(&encoded).ok()?,
                mime_type,
                name: str_field(obj, "name"),
                ..Default::default()
            }),
            None => Content::Resource(ResourceContent {
                uri: str_field(obj, "uri").unwrap_or_default(),
                mime_type,
                ..Default::default()
            }),
        },
        other => {
            warn!("Ignoring unknown A2A part kind: {}", other);
            return None;
        }
    };
    Some(parsed)
}
