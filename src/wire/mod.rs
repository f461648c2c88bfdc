//! Wire protocols.
//!
//! Every supported protocol is a JSON-RPC 2.0 envelope around a
//! protocol-specific parameter layout. A [`Wire`] codec translates between its
//! layout and the protocol-neutral [`Request`] / [`Response`] / [`ToolDescriptor`]
//! model, so a message entering through one protocol can be processed and
//! re-emitted in another.
//!
//! - `mcp` - tools/call style (`params.name`, `result.content[]`)
//! - `a2a` - skills and message parts (`params.skillId`, `result.artifacts[]`)
//! - `acp` - agents and keyed output (`params.agentId`, `result.output{}`)
//! - `registry` - name to codec lookup

pub mod a2a;
pub mod acp;
pub mod mcp;
pub mod registry;

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::content::Content;
use crate::error::{codes, Error, Result};

pub use a2a::A2aWire;
pub use acp::AcpWire;
pub use mcp::McpWire;
pub use registry::{default_registry, WireRegistry};

/// JSON-RPC version.
pub const JSONRPC_VERSION: &str = "2.0";

// ===== Protocol-neutral model =====

/// A protocol-neutral request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Request {
    /// Correlation id, stringified. Empty for notifications.
    pub id: String,
    pub method: String,
    /// Name of the invoked capability (tool, skill, agent, prompt, task).
    pub tool_id: String,
    pub arguments: HashMap<String, Value>,
    pub meta: HashMap<String, Value>,
}

impl Request {
    pub fn new(id: impl Into<String>, method: impl Into<String>, tool_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            tool_id: tool_id.into(),
            ..Default::default()
        }
    }

    pub fn with_argument(mut self, key: impl Into<String>, value: Value) -> Self {
        self.arguments.insert(key.into(), value);
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    /// A request without an id expects no reply.
    pub fn is_notification(&self) -> bool {
        self.id.is_empty()
    }
}

/// A protocol-neutral response.
///
/// `is_error` implies `error` is set; the constructors keep the two in step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    pub id: String,
    pub content: Vec<Content>,
    pub is_error: bool,
    pub error: Option<RpcError>,
    pub meta: HashMap<String, Value>,
}

impl Response {
    pub fn success(id: impl Into<String>, content: Vec<Content>) -> Self {
        Self {
            id: id.into(),
            content,
            ..Default::default()
        }
    }

    pub fn text(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::success(id, vec![Content::text(text)])
    }

    /// A protocol-level failure with no content.
    pub fn failure(id: impl Into<String>, error: RpcError) -> Self {
        Self {
            id: id.into(),
            is_error: true,
            error: Some(error),
            ..Default::default()
        }
    }

    /// A tool-level failure that still carries content for the caller.
    pub fn tool_error(id: impl Into<String>, content: Vec<Content>, error: RpcError) -> Self {
        Self {
            id: id.into(),
            content,
            is_error: true,
            error: Some(error),
            meta: HashMap::new(),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {}", self.message, self.code)?;
        if let Some(data) = &self.data {
            write!(f, ", data: {}", data)?;
        }
        write!(f, ")")
    }
}

impl std::error::Error for RpcError {}

impl From<&Error> for RpcError {
    fn from(err: &Error) -> Self {
        RpcError::new(err.rpc_code(), err.to_string())
    }
}

impl From<Error> for RpcError {
    fn from(err: Error) -> Self {
        RpcError::from(&err)
    }
}

/// Tool descriptor as advertised to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_object")]
    pub input_schema: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }

    /// Keys listed under `inputSchema.required`.
    pub fn required_arguments(&self) -> Vec<&str> {
        self.input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// Fixed feature set of a wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WireCapabilities {
    pub streaming: bool,
    pub batch: bool,
    pub progress: bool,
    pub cancellation: bool,
}

/// Protocol-neutral classification of a method name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Initialize,
    Ping,
    ListTools,
    CallTool,
    ListPrompts,
    GetPrompt,
    ListResources,
    ReadResource,
    ListResourceTemplates,
    Subscribe,
    Unsubscribe,
    GetTask,
    CancelTask,
    Notification,
    Unknown,
}

/// A protocol codec.
pub trait Wire: Send + Sync {
    /// Registry key, e.g. `"mcp"`.
    fn name(&self) -> &'static str;

    /// Protocol revision this codec speaks.
    fn version(&self) -> &'static str;

    fn encode_request(&self, req: &Request) -> Result<Vec<u8>>;

    fn decode_request(&self, data: &[u8]) -> Result<Request>;

    fn encode_response(&self, resp: &Response) -> Result<Vec<u8>>;

    fn decode_response(&self, data: &[u8]) -> Result<Response>;

    /// Encode a tool listing as the `result` object of a list reply.
    fn encode_tool_list(&self, tools: &[ToolDescriptor]) -> Result<Vec<u8>>;

    /// Decode a tool listing; accepts either the bare result object or a full envelope.
    fn decode_tool_list(&self, data: &[u8]) -> Result<Vec<ToolDescriptor>>;

    fn capabilities(&self) -> WireCapabilities;

    /// Classify a method name of this protocol.
    fn operation(&self, method: &str) -> Operation;

    /// The method name this protocol uses for an operation.
    fn method_for(&self, op: Operation) -> Option<&'static str>;
}

// ===== JSON-RPC envelope =====

/// A JSON-RPC message of any shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Envelope {
    pub fn request(id: &str, method: &str, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: encode_id(id),
            method: Some(method.to_string()),
            params: Some(params),
            ..Default::default()
        }
    }

    pub fn result(id: &str, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(Value::String(id.to_string())),
            result: Some(result),
            ..Default::default()
        }
    }

    pub fn error(id: &str, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(Value::String(id.to_string())),
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn notification(method: &str, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: Some(method.to_string()),
            params: Some(params),
            ..Default::default()
        }
    }

    /// Parse arbitrary bytes into an envelope.
    pub fn parse(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| Error::DecodeFailure(e.to_string()))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(Error::EncodeFailure)
    }

    /// The id rendered as a string; empty when absent.
    pub fn id_string(&self) -> String {
        self.id.as_ref().map(id_to_string).unwrap_or_default()
    }

    /// `params` as an object; any other shape reads as empty.
    pub fn params_object(&self) -> Map<String, Value> {
        match &self.params {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        }
    }

    /// `result` as an object; any other shape reads as empty.
    pub fn result_object(&self) -> Map<String, Value> {
        match &self.result {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        }
    }
}

fn encode_id(id: &str) -> Option<Value> {
    if id.is_empty() {
        None
    } else {
        Some(Value::String(id.to_string()))
    }
}

/// Stringify a JSON-RPC id. Integral floats lose their fraction (`1.0` -> `"1"`).
pub fn id_to_string(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else {
                let f = n.as_f64().unwrap_or_default();
                if f.fract() == 0.0 {
                    format!("{:.0}", f)
                } else {
                    f.to_string()
                }
            }
        }
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ===== Shared field helpers for the codecs =====

pub(crate) fn object_to_map(value: Option<&Value>) -> HashMap<String, Value> {
    match value {
        Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        _ => HashMap::new(),
    }
}

pub(crate) fn map_to_object(map: &HashMap<String, Value>) -> Value {
    Value::Object(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

/// Params left over once a codec has taken its own keys. Used as arguments
/// for methods that carry their inputs at the top level (e.g. `{"uri": ...}`).
pub(crate) fn remaining_params(
    params: &Map<String, Value>,
    consumed: &[&str],
) -> HashMap<String, Value> {
    params
        .iter()
        .filter(|(k, _)| !consumed.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

pub(crate) fn str_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(String::from)
}

pub(crate) fn insert_opt(obj: &mut Map<String, Value>, key: &str, value: Option<&str>) {
    if let Some(v) = value {
        obj.insert(key.to_string(), Value::String(v.to_string()));
    }
}

/// Decode a listing that may be a bare result object or a full envelope.
pub(crate) fn listing_object(data: &[u8]) -> Result<Map<String, Value>> {
    let value: Value =
        serde_json::from_slice(data).map_err(|e| Error::DecodeFailure(e.to_string()))?;
    let obj = match value {
        Value::Object(obj) => obj,
        _ => return Ok(Map::new()),
    };
    match obj.get("result") {
        Some(Value::Object(inner)) if obj.contains_key("jsonrpc") => Ok(inner.clone()),
        _ => Ok(obj),
    }
}

/// Error used when a failed response carries only content.
pub(crate) fn content_error(content: &[Content]) -> RpcError {
    let message = content
        .iter()
        .find_map(|c| c.as_text())
        .unwrap_or("tool reported an error");
    RpcError::new(codes::INTERNAL_ERROR, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rpc_error_display() {
        let err = RpcError::new(codes::METHOD_NOT_FOUND, "Method not found");
        assert_eq!(err.to_string(), "Method not found (code: -32601)");

        let err = RpcError::new(codes::INVALID_PARAMS, "bad").with_data(json!({"field": "q"}));
        assert_eq!(err.to_string(), r#"bad (code: -32602, data: {"field":"q"})"#);
    }

    #[test]
    fn test_id_to_string() {
        assert_eq!(id_to_string(&json!("abc")), "abc");
        assert_eq!(id_to_string(&json!(42)), "42");
        assert_eq!(id_to_string(&json!(7.0)), "7");
        assert_eq!(id_to_string(&json!(1e15)), "1000000000000000");
        assert_eq!(id_to_string(&json!(2.5)), "2.5");
        assert_eq!(id_to_string(&Value::Null), "");
    }

    #[test]
    fn test_envelope_request_serialization() {
        let env = Envelope::request("r1", "tools/call", json!({"name": "test"}));
        let json = String::from_utf8(env.to_bytes().unwrap()).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"id\":\"r1\""));
        assert!(json.contains("\"method\":\"tools/call\""));
        assert!(!json.contains("\"result\""));
    }

    #[test]
    fn test_envelope_error_serialization() {
        let env = Envelope::error("abc", RpcError::new(codes::METHOD_NOT_FOUND, "nope"));
        let json = String::from_utf8(env.to_bytes().unwrap()).unwrap();
        assert!(json.contains("\"error\""));
        assert!(json.contains("-32601"));
        assert!(!json.contains("\"result\""));
    }

    #[test]
    fn test_notification_has_no_id() {
        let env = Envelope::notification("notifications/initialized", json!({}));
        let json = String::from_utf8(env.to_bytes().unwrap()).unwrap();
        assert!(!json.contains("\"id\""));
    }

    #[test]
    fn test_envelope_parse_errors() {
        assert!(matches!(
            Envelope::parse(b"{not json"),
            Err(Error::DecodeFailure(_))
        ));
    }

    #[test]
    fn test_envelope_numeric_id() {
        let env = Envelope::parse(br#"{"jsonrpc":"2.0","id":5,"method":"ping"}"#).unwrap();
        assert_eq!(env.id_string(), "5");
        assert!(env.params_object().is_empty());
    }

    #[test]
    fn test_required_arguments() {
        let tool = ToolDescriptor::new(
            "search",
            "Search things",
            json!({"type": "object", "required": ["query", "limit"]}),
        );
        assert_eq!(tool.required_arguments(), vec!["query", "limit"]);
    }

    #[test]
    fn test_tool_descriptor_serialization() {
        let tool = ToolDescriptor::new("t", "d", json!({"type": "object"}));
        let json = serde_json::to_string(&tool).unwrap();
        assert!(json.contains("\"inputSchema\""));
    }

    #[test]
    fn test_listing_object_accepts_envelope() {
        let obj = listing_object(br#"{"jsonrpc":"2.0","id":1,"result":{"tools":[]}}"#).unwrap();
        assert!(obj.contains_key("tools"));
        let obj = listing_object(br#"{"tools":[]}"#).unwrap();
        assert!(obj.contains_key("tools"));
    }

    #[test]
    fn test_response_constructors_keep_invariant() {
        let ok = Response::text("1", "hi");
        assert!(!ok.is_error && ok.error.is_none());
        let failed = Response::failure("1", RpcError::new(codes::INTERNAL_ERROR, "x"));
        assert!(failed.is_error && failed.error.is_some());
    }
}
