//! Agent Communication Protocol codec.
//!
//! Tools are advertised as agents. A run names the agent in `params.agentId`
//! with its inputs under `params.input`; replies report `result.status` and a
//! keyed `result.output` map. Output keys are `part_<n>` so order survives
//! the trip through a JSON object.

use serde_json::{json, Map, Value};
use tracing::warn;

use super::{
    content_error, insert_opt, listing_object, map_to_object, object_to_map, remaining_params,
    str_field, Envelope, Operation, Request, Response, ToolDescriptor, Wire, WireCapabilities,
};
use crate::content::{
    decode_base64, encode_base64, AudioContent, Content, FileContent, ImageContent,
    ResourceContent,
};
use crate::error::{Error, Result};

/// ACP protocol version.
pub const ACP_VERSION: &str = "0.1.0";

const META_KEY: &str = "metadata";
const OUTPUT_PREFIX: &str = "part_";

pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_ERROR: &str = "error";

/// Codec for the Agent Communication Protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcpWire;

impl AcpWire {
    pub fn new() -> Self {
        Self
    }
}

impl Wire for AcpWire {
    fn name(&self) -> &'static str {
        "acp"
    }

    fn version(&self) -> &'static str {
        ACP_VERSION
    }

    fn encode_request(&self, req: &Request) -> Result<Vec<u8>> {
        let mut params = Map::new();
        params.insert("agentId".into(), json!(req.tool_id));
        params.insert("input".into(), map_to_object(&req.arguments));
        if !req.meta.is_empty() {
            params.insert(META_KEY.into(), map_to_object(&req.meta));
        }
        let method = if req.method.is_empty() {
            "runs/create"
        } else {
            req.method.as_str()
        };
        Envelope::request(&req.id, method, Value::Object(params)).to_bytes()
    }

    fn decode_request(&self, data: &[u8]) -> Result<Request> {
        let env = Envelope::parse(data)?;
        let params = env.params_object();
        let arguments = match params.get("input") {
            Some(input) => object_to_map(Some(input)),
            None => remaining_params(&params, &["agentId", META_KEY]),
        };
        Ok(Request {
            id: env.id_string(),
            method: env.method.clone().unwrap_or_default(),
            tool_id: str_field(&params, "agentId").unwrap_or_default(),
            arguments,
            meta: object_to_map(params.get(META_KEY)),
        })
    }

    fn encode_response(&self, resp: &Response) -> Result<Vec<u8>> {
        if let (Some(error), true) = (&resp.error, resp.content.is_empty()) {
            return Envelope::error(&resp.id, error.clone()).to_bytes();
        }
        let output: Map<String, Value> = resp
            .content
            .iter()
            .enumerate()
            .map(|(i, c)| (format!("{}{}", OUTPUT_PREFIX, i), content_to_json(c)))
            .collect();
        let mut result = Map::new();
        result.insert(
            "status".into(),
            json!(if resp.is_error { STATUS_ERROR } else { STATUS_SUCCESS }),
        );
        result.insert("output".into(), Value::Object(output));
        if !resp.meta.is_empty() {
            result.insert(META_KEY.into(), map_to_object(&resp.meta));
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
        let content = result
            .get("output")
            .and_then(Value::as_object)
            .map(ordered_output)
            .unwrap_or_default();
        let is_error = matches!(
            result.get("status").and_then(Value::as_str),
            Some(STATUS_ERROR) | Some("failed")
        );
        Ok(Response {
            id,
            error: is_error.then(|| content_error(&content)),
            content,
            is_error,
            meta: object_to_map(result.get(META_KEY)),
        })
    }

    fn encode_tool_list(&self, tools: &[ToolDescriptor]) -> Result<Vec<u8>> {
        serde_json::to_vec(&json!({ "agents": tools })).map_err(Error::EncodeFailure)
    }

    fn decode_tool_list(&self, data: &[u8]) -> Result<Vec<ToolDescriptor>> {
        let obj = listing_object(data)?;
        Ok(obj
            .get("agents")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_object)
                    .filter_map(|agent| {
                        let name = str_field(agent, "name").or_else(|| str_field(agent, "id"))?;
                        Some(ToolDescriptor {
                            name,
                            description: str_field(agent, "description").unwrap_or_default(),
                            input_schema: agent
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
            streaming: false,
            batch: true,
            progress: false,
            cancellation: true,
        }
    }

    fn operation(&self, method: &str) -> Operation {
        match method {
            "initialize" => Operation::Initialize,
            "ping" => Operation::Ping,
            "agents/list" => Operation::ListTools,
            "runs/create" | "agents/run" => Operation::CallTool,
            "prompts/list" => Operation::ListPrompts,
            "prompts/get" => Operation::GetPrompt,
            "resources/list" => Operation::ListResources,
            "resources/read" => Operation::ReadResource,
            "resources/templates/list" => Operation::ListResourceTemplates,
            "resources/subscribe" => Operation::Subscribe,
            "resources/unsubscribe" => Operation::Unsubscribe,
            "runs/get" => Operation::GetTask,
            "runs/cancel" => Operation::CancelTask,
            m if m.starts_with("notifications/") => Operation::Notification,
            _ => Operation::Unknown,
        }
    }

    fn method_for(&self, op: Operation) -> Option<&'static str> {
        Some(match op {
            Operation::Initialize => "initialize",
            Operation::Ping => "ping",
            Operation::ListTools => "agents/list",
            Operation::CallTool => "runs/create",
            Operation::ListPrompts => "prompts/list",
            Operation::GetPrompt => "prompts/get",
            Operation::ListResources => "resources/list",
            Operation::ReadResource => "resources/read",
            Operation::ListResourceTemplates => "resources/templates/list",
            Operation::Subscribe => "resources/subscribe",
            Operation::Unsubscribe => "resources/unsubscribe",
            Operation::GetTask => "runs/get",
            Operation::CancelTask => "runs/cancel",
            Operation::Notification | Operation::Unknown => return None,
        })
    }
}

/// Output items sorted by their `part_<n>` index; other keys follow in key order.
fn ordered_output(output: &Map<String, Value>) -> Vec<Content> {
    let mut entries: Vec<(Option<usize>, &String, &Value)> = output
        .iter()
        .map(|(k, v)| {
            let index = k
                .strip_prefix(OUTPUT_PREFIX)
                .and_then(|n| n.parse::<usize>().ok());
            (index, k, v)
        })
        .collect();
    entries.sort_by(|a, b| match (a.0, b.0) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.1.cmp(b.1),
    });
    entries
        .into_iter()
        .filter_map(|(_, _, v)| content_from_json(v))
        .collect()
}

/// Render a content part as an ACP output item.
pub fn content_to_json(content: &Content) -> Value {
    let mut obj = Map::new();
    match content {
        Content::Text(c) => {
            obj.insert("type".into(), json!("text"));
            obj.insert("text".into(), json!(c.text));
        }
        Content::Image(ImageContent { data, .. }) | Content::Audio(AudioContent { data, .. }) => {
            obj.insert("type".into(), json!("binary"));
            obj.insert("data".into(), json!(encode_base64(data)));
            obj.insert("mimeType".into(), json!(content.mime_type()));
        }
        Content::File(c) => {
            obj.insert("type".into(), json!("binary"));
            obj.insert("data".into(), json!(encode_base64(&c.data)));
            obj.insert("mimeType".into(), json!(content.mime_type()));
            insert_opt(&mut obj, "name", c.name.as_deref());
        }
        Content::Resource(c) => {
            obj.insert("type".into(), json!("resource"));
            obj.insert("uri".into(), json!(c.uri));
        }
    }
    Value::Object(obj)
}

/// Parse an ACP output item. Unknown or malformed items yield `None`.
pub fn content_from_json(value: &Value) -> Option<Content> {
    let obj = value.as_object()?;
    let parsed = match obj.get("type").and_then(Value::as_str)? {
        "text" => Content::text(str_field(obj, "text").unwrap_or_default()),
        "binary" => {
            let data = decode_base64(&str_field(obj, "data").unwrap_or_default()).ok()?;
            let mime_type = str_field(obj, "mimeType");
            let mime = mime_type.as_deref().unwrap_or_default();
            if mime.starts_with("image/") {
                Content::Image(ImageContent {
                    data,
                    mime_type,
                    ..Default::default()
                })
            } else if mime.starts_with("audio/") {
                Content::Audio(AudioContent {
                    data,
                    mime_type,
                    uri: None,
                })
            } else {
                let size = data.len() as u64;
                Content::File(FileContent {
                    data,
                    mime_type,
                    name: str_field(obj, "name"),
                    size: Some(size),
                    ..Default::default()
                })
            }
        }
        "resource" => Content::Resource(ResourceContent {
            uri: str_field(obj, "uri").unwrap_or_default(),
            ..Default::default()
        }),
        other => {
            warn!("Ignoring unknown ACP output type: {}", other);
            return None;
        }
    };
    Some(parsed)
}
