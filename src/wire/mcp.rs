//! Model Context Protocol codec.
//!
//! Requests carry the tool in `params.name` and its inputs in
//! `params.arguments`; replies list typed items under `result.content`.

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
use crate::error::Result;

/// MCP protocol version.
pub const MCP_VERSION: &str = "2025-06-18";

const META_KEY: &str = "_meta";

/// Codec for the Model Context Protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct McpWire;

impl McpWire {
    pub fn new() -> Self {
        Self
    }
}

impl Wire for McpWire {
    fn name(&self) -> &'static str {
        "mcp"
    }

    fn version(&self) -> &'static str {
        MCP_VERSION
    }

    fn encode_request(&self, req: &Request) -> Result<Vec<u8>> {
        let mut params = Map::new();
        params.insert("name".into(), Value::String(req.tool_id.clone()));
        params.insert("arguments".into(), map_to_object(&req.arguments));
        if !req.meta.is_empty() {
            params.insert(META_KEY.into(), map_to_object(&req.meta));
        }
        let method = if req.method.is_empty() {
            "tools/call"
        } else {
            req.method.as_str()
        };
        Envelope::request(&req.id, method, Value::Object(params)).to_bytes()
    }

    fn decode_request(&self, data: &[u8]) -> Result<Request> {
        let env = Envelope::parse(data)?;
        let params = env.params_object();
        let arguments = match params.get("arguments") {
            Some(args) => object_to_map(Some(args)),
            None => remaining_params(&params, &["name", META_KEY]),
        };
        Ok(Request {
            id: env.id_string(),
            method: env.method.clone().unwrap_or_default(),
            tool_id: str_field(&params, "name").unwrap_or_default(),
            arguments,
            meta: object_to_map(params.get(META_KEY)),
        })
    }

    fn encode_response(&self, resp: &Response) -> Result<Vec<u8>> {
        if let (Some(error), true) = (&resp.error, resp.content.is_empty()) {
            return Envelope::error(&resp.id, error.clone()).to_bytes();
        }
        let mut result = Map::new();
        result.insert(
            "content".into(),
            Value::Array(resp.content.iter().map(content_to_json).collect()),
        );
        if resp.is_error {
            result.insert("isError".into(), Value::Bool(true));
        }
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
        let content: Vec<Content> = result
            .get("content")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(content_from_json).collect())
            .unwrap_or_default();
        let is_error = result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let error = is_error.then(|| content_error(&content));
        Ok(Response {
            id,
            content,
            is_error,
            error,
            meta: object_to_map(result.get(META_KEY)),
        })
    }

    fn encode_tool_list(&self, tools: &[ToolDescriptor]) -> Result<Vec<u8>> {
        let value = json!({ "tools": tools });
        serde_json::to_vec(&value).map_err(crate::error::Error::EncodeFailure)
    }

    fn decode_tool_list(&self, data: &[u8]) -> Result<Vec<ToolDescriptor>> {
        let obj = listing_object(data)?;
        Ok(obj
            .get("tools")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|t| serde_json::from_value(t.clone()).ok())
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
            "tools/list" => Operation::ListTools,
            "tools/call" => Operation::CallTool,
            "prompts/list" => Operation::ListPrompts,
            "prompts/get" => Operation::GetPrompt,
            "resources/list" => Operation::ListResources,
            "resources/read" => Operation::ReadResource,
            "resources/templates/list" => Operation::ListResourceTemplates,
            "resources/subscribe" => Operation::Subscribe,
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
            Operation::ListTools => "tools/list",
            Operation::CallTool => "tools/call",
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

/// Render a content part as an MCP typed item.
pub fn content_to_json(content: &Content) -> Value {
    let mut obj = Map::new();
    match content {
        Content::Text(c) => {
            obj.insert("type".into(), json!("text"));
            obj.insert("text".into(), json!(c.text));
        }
        Content::Image(c) => {
            obj.insert("type".into(), json!("image"));
            obj.insert("data".into(), json!(encode_base64(&c.data)));
            obj.insert("mimeType".into(), json!(content.mime_type()));
            insert_opt(&mut obj, "uri", c.uri.as_deref());
            insert_opt(&mut obj, "altText", c.alt_text.as_deref());
        }
        Content::Audio(c) => {
            obj.insert("type".into(), json!("audio"));
            obj.insert("data".into(), json!(encode_base64(&c.data)));
            obj.insert("mimeType".into(), json!(content.mime_type()));
            insert_opt(&mut obj, "uri", c.uri.as_deref());
        }
        Content::Resource(c) => {
            obj.insert("type".into(), json!("resource"));
            obj.insert("uri".into(), json!(c.uri));
            obj.insert("mimeType".into(), json!(content.mime_type()));
            insert_opt(&mut obj, "text", c.text.as_deref());
            if let Some(blob) = &c.blob {
                obj.insert("blob".into(), json!(encode_base64(blob)));
            }
        }
        Content::File(c) => {
            obj.insert("type".into(), json!("file"));
            obj.insert("data".into(), json!(encode_base64(&c.data)));
            obj.insert("mimeType".into(), json!(content.mime_type()));
            insert_opt(&mut obj, "name", c.name.as_deref());
            insert_opt(&mut obj, "path", c.path.as_deref());
            if let Some(size) = c.size {
                obj.insert("size".into(), json!(size));
            }
        }
    }
    Value::Object(obj)
}

/// Parse an MCP typed item. Unknown or malformed items yield `None`.
pub fn content_from_json(value: &Value) -> Option<Content> {
    let obj = value.as_object()?;
    let mime_type = str_field(obj, "mimeType");
    let data = || {
        str_field(obj, "data")
            .map(|d| decode_base64(&d))
            .transpose()
            .map(Option::unwrap_or_default)
    };
    let parsed = match obj.get("type").and_then(Value::as_str)? {
        "text" => Content::Text(TextContent {
            text: str_field(obj, "text").unwrap_or_default(),
            mime_type: None,
        }),
        "image" => Content::Image(ImageContent {
            data: data().ok()?,
            mime_type,
            uri: str_field(obj, "uri"),
            alt_text: str_field(obj, "altText"),
        }),
        "audio" => Content::Audio(AudioContent {
            data: data().ok()?,
            mime_type,
            uri: str_field(obj, "uri"),
        }),
        "resource" => {
            // Accept the nested `{"resource": {...}}` form as well as the flat one.
            let inner = obj
                .get("resource")
                .and_then(Value::as_object)
                .unwrap_or(obj);
            let blob = str_field(inner, "blob")
                .map(|b| decode_base64(&b))
                .transpose()
                .ok()?;
            Content::Resource(ResourceContent {
                uri: str_field(inner, "uri").unwrap_or_default(),
                mime_type: str_field(inner, "mimeType"),
                text: str_field(inner, "text"),
                blob,
            })
        }
        "file" => Content::File(FileContent {
            data: data().ok()?,
            mime_type,
            name: str_field(obj, "name"),
            path: str_field(obj, "path"),
            size: obj.get("size").and_then(Value::as_u64),
        }),
        other => {
            warn!("Ignoring unknown MCP content type: {}", other);
            return None;
        }
    };
    Some(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{codes, Error};
    use crate::wire::RpcError;

    fn sample_request() -> Request {
        Request::new("r1", "tools/call", "search")
            .with_argument("query", json!("go"))
            .with_meta("progressToken", json!("p-1"))
    }

    #[test]
    fn test_encode_request_layout() {
        let bytes = McpWire.encode_request(&sample_request()).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["id"], "r1");
        assert_eq!(value["method"], "tools/call");
        assert_eq!(value["params"]["name"], "search");
        assert_eq!(value["params"]["arguments"]["query"], "go");
        assert_eq!(value["params"]["_meta"]["progressToken"], "p-1");
    }

    #[test]
    fn test_request_round_trip() {
        let req = sample_request();
        let decoded = McpWire
            .decode_request(&McpWire.encode_request(&req).unwrap())
            .unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn test_decode_numeric_id_and_missing_fields() {
        let req = McpWire
            .decode_request(br#"{"jsonrpc":"2.0","id":3,"method":"tools/list"}"#)
            .unwrap();
        assert_eq!(req.id, "3");
        assert_eq!(req.tool_id, "");
        assert!(req.arguments.is_empty());
        assert!(req.meta.is_empty());
    }

    #[test]
    fn test_top_level_params_become_arguments() {
        let req = McpWire
            .decode_request(
                br#"{"jsonrpc":"2.0","id":"1","method":"resources/read","params":{"uri":"file:///a"}}"#,
            )
            .unwrap();
        assert_eq!(req.arguments["uri"], "file:///a");
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(
            McpWire.decode_request(b"{oops"),
            Err(Error::DecodeFailure(_))
        ));
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let req = McpWire
            .decode_request(
                br#"{"jsonrpc":"2.0","id":"x","method":"tools/call","extra":1,"params":{"name":"t","arguments":{},"future":true}}"#,
            )
            .unwrap();
        assert_eq!(req.tool_id, "t");
    }

    #[test]
    fn test_response_content_mapping() {
        let resp = Response::success(
            "r1",
            vec![
                Content::text("hello"),
                Content::image(vec![1u8, 2, 3], "image/png"),
                Content::resource("file:///readme"),
            ],
        );
        let value: Value = serde_json::from_slice(&McpWire.encode_response(&resp).unwrap()).unwrap();
        let content = value["result"]["content"].as_array().unwrap();
        assert_eq!(content[0], json!({"type": "text", "text": "hello"}));
        assert_eq!(content[1]["type"], "image");
        assert_eq!(content[1]["data"], "AQID");
        assert_eq!(content[1]["mimeType"], "image/png");
        assert_eq!(content[2]["type"], "resource");
        assert_eq!(content[2]["uri"], "file:///readme");

        let decoded = McpWire
            .decode_response(&McpWire.encode_response(&resp).unwrap())
            .unwrap();
        assert_eq!(decoded.content[..2], resp.content[..2]);
        assert_eq!(decoded.content[2].mime_type(), "application/octet-stream");
        assert!(!decoded.is_error);
    }

    #[test]
    fn test_error_response_uses_error_envelope() {
        let resp = Response::failure("9", RpcError::new(codes::METHOD_NOT_FOUND, "nope"));
        let bytes = McpWire.encode_response(&resp).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(value.get("result").is_none());
        assert_eq!(value["error"]["code"], -32601);

        let decoded = McpWire.decode_response(&bytes).unwrap();
        assert!(decoded.is_error);
        assert_eq!(decoded.error.unwrap().message, "nope");
    }

    #[test]
    fn test_tool_error_keeps_content() {
        let resp = Response::tool_error(
            "1",
            vec![Content::text("disk full")],
            RpcError::new(codes::INTERNAL_ERROR, "disk full"),
        );
        let bytes = McpWire.encode_response(&resp).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["result"]["isError"], true);

        let decoded = McpWire.decode_response(&bytes).unwrap();
        assert!(decoded.is_error);
        assert_eq!(decoded.error.unwrap().message, "disk full");
    }

    #[test]
    fn test_nested_resource_form() {
        let item = json!({
            "type": "resource",
            "resource": {"uri": "file:///x", "mimeType": "text/markdown", "text": "# hi"}
        });
        match content_from_json(&item) {
            Some(Content::Resource(r)) => {
                assert_eq!(r.uri, "file:///x");
                assert_eq!(r.text.as_deref(), Some("# hi"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_tool_list() {
        let tools = vec![ToolDescriptor::new("echo", "Echo input", json!({"type": "object"}))];
        let bytes = McpWire.encode_tool_list(&tools).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["tools"][0]["name"], "echo");
        assert_eq!(McpWire.decode_tool_list(&bytes).unwrap(), tools);
    }

    #[test]
    fn test_capabilities() {
        let caps = McpWire.capabilities();
        assert!(caps.streaming && caps.progress && caps.cancellation);
        assert!(!caps.batch);
    }

    #[test]
    fn test_operations() {
        assert_eq!(McpWire.operation("tools/call"), Operation::CallTool);
        assert_eq!(
            McpWire.operation("notifications/initialized"),
            Operation::Notification
        );
        assert_eq!(McpWire.operation("bogus"), Operation::Unknown);
        assert_eq!(McpWire.method_for(Operation::GetPrompt), Some("prompts/get"));
    }
}
