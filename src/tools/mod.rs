//! Tool handlers and registry.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::content::Content;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::wire::ToolDescriptor;

/// Outcome of a tool call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolResult {
    pub content: Vec<Content>,
    pub is_error: bool,
}

/// Handler for tool calls.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Get the tool definition.
    fn definition(&self) -> ToolDescriptor;

    /// Execute the tool. `ctx` is cancelled if the call is cancelled.
    async fn execute(&self, ctx: &Context, arguments: HashMap<String, Value>) -> Result<ToolResult>;
}

/// Registry of tool handlers.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in tools.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(EchoTool);
        registry.register(WaitTool);
        registry
    }

    /// Register a tool handler.
    pub fn register<T: ToolHandler + 'static>(&mut self, handler: T) {
        self.register_arc(Arc::new(handler));
    }

    /// Register a tool handler (Arc version).
    pub fn register_arc(&mut self, handler: Arc<dyn ToolHandler>) {
        let tool = handler.definition();
        self.tools.insert(tool.name.clone(), handler);
    }

    /// All tool definitions, sorted by name.
    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        let mut tools: Vec<_> = self.tools.values().map(|h| h.definition()).collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Get a tool by name.
    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).cloned()
    }

    /// Check if a tool exists.
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Get the number of registered tools.
    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    /// Look up `name`, check its required arguments are present, and run it.
    pub async fn call(
        &self,
        ctx: &Context,
        name: &str,
        arguments: HashMap<String, Value>,
    ) -> Result<ToolResult> {
        let tool = self
            .get_tool(name)
            .ok_or_else(|| Error::ToolNotFound(name.to_string()))?;
        check_required(&tool.definition(), &arguments)?;
        tool.execute(ctx, arguments).await
    }
}

/// Every key in `inputSchema.required` must be present. Values are not checked.
pub fn check_required(tool: &ToolDescriptor, args: &HashMap<String, Value>) -> Result<()> {
    match tool
        .required_arguments()
        .into_iter()
        .find(|key| !args.contains_key(*key))
    {
        Some(key) => Err(Error::InvalidParams(format!(
            "Missing required argument: {}",
            key
        ))),
        None => Ok(()),
    }
}

/// Helper macro for creating tool input schemas.
#[macro_export]
macro_rules! tool_schema {
    ($($json:tt)+) => {
        serde_json::json!({
            "type": "object",
            "properties": {
                $($json)+
            }
        })
    };
}

/// Helper to create a successful tool result.
pub fn success_result(text: impl Into<String>) -> ToolResult {
    ToolResult {
        content: vec![Content::text(text)],
        is_error: false,
    }
}

/// Helper to create an error tool result.
pub fn error_result(text: impl Into<String>) -> ToolResult {
    ToolResult {
        content: vec![Content::text(text)],
        is_error: true,
    }
}

/// Helper to extract a required string argument.
pub fn get_string_arg(args: &HashMap<String, Value>, name: &str) -> Result<String> {
    args.get(name)
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| Error::InvalidParams(format!("Missing required argument: {}", name)))
}

/// Helper to extract a required integer argument.
pub fn get_int_arg(args: &HashMap<String, Value>, name: &str) -> Result<i64> {
    args.get(name)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| Error::InvalidParams(format!("Missing required argument: {}", name)))
}

/// Helper to extract a boolean argument with a default.
pub fn get_bool_arg(args: &HashMap<String, Value>, name: &str, default: bool) -> bool {
    args.get(name).and_then(|v| v.as_bool()).unwrap_or(default)
}

/// Echoes its `text` argument back, as an error result when `error` is set.
pub struct EchoTool;

#[async_trait]
impl ToolHandler for EchoTool {
    fn definition(&self) -> ToolDescriptor {
        let mut schema = tool_schema! {
            "text": { "type": "string", "description": "Text to echo back" },
            "error": { "type": "boolean", "description": "Return the text as a tool error (default false)" }
        };
        schema["required"] = serde_json::json!(["text"]);
        ToolDescriptor::new("echo", "Echo the given text", schema)
    }

    async fn execute(&self, _ctx: &Context, args: HashMap<String, Value>) -> Result<ToolResult> {
        let text = get_string_arg(&args, "text")?;
        if get_bool_arg(&args, "error", false) {
            Ok(error_result(text))
        } else {
            Ok(success_result(text))
        }
    }
}

/// Sleeps for `ms` milliseconds unless cancelled first.
pub struct WaitTool;

#[async_trait]
impl ToolHandler for WaitTool {
    fn definition(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "wait",
            "Wait for a number of milliseconds",
            tool_schema! {
                "ms": { "type": "integer", "description": "Milliseconds to wait (default 1000)" }
            },
        )
    }

    async fn execute(&self, ctx: &Context, args: HashMap<String, Value>) -> Result<ToolResult> {
        let ms = get_int_arg(&args, "ms").unwrap_or(1000).max(0) as u64;
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(ms)) => {
                Ok(success_result(format!("waited {}ms", ms)))
            }
            _ = ctx.done() => Err(ctx.err().unwrap_or(Error::Cancelled)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct TestTool {
        name: String,
    }

    #[async_trait]
    impl ToolHandler for TestTool {
        fn definition(&self) -> ToolDescriptor {
            ToolDescriptor::new(
                self.name.clone(),
                format!("Test tool: {}", self.name),
                json!({
                    "type": "object",
                    "properties": {
                        "input": { "type": "string" }
                    }
                }),
            )
        }

        async fn execute(&self, _ctx: &Context, args: HashMap<String, Value>) -> Result<ToolResult> {
            let input = get_string_arg(&args, "input").unwrap_or_default();
            Ok(success_result(format!("Executed {} with: {}", self.name, input)))
        }
    }

    #[test]
    fn test_registration() {
        let mut registry = ToolRegistry::new();
        registry.register(TestTool {
            name: "test_tool".to_string(),
        });

        assert_eq!(registry.tool_count(), 1);
        assert!(registry.has_tool("test_tool"));
        assert!(!registry.has_tool("nonexistent"));
    }

    #[test]
    fn test_list_tools_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register(TestTool {
            name: "tool_b".to_string(),
        });
        registry.register(TestTool {
            name: "tool_a".to_string(),
        });

        let names: Vec<_> = registry.list_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["tool_a", "tool_b"]);
    }

    #[tokio::test]
    async fn test_tool_execution() {
        let mut registry = ToolRegistry::new();
        registry.register(TestTool {
            name: "echo".to_string(),
        });

        let args = HashMap::from([("input".to_string(), json!("hello"))]);
        let result = registry.call(&Context::new(), "echo", args).await.unwrap();
        assert!(!result.is_error);
        assert_eq!(result.content[0].as_text(), Some("Executed echo with: hello"));
    }

    #[tokio::test]
    async fn test_call_checks_required_keys() {
        let registry = ToolRegistry::with_builtins();
        let err = registry
            .call(&Context::new(), "echo", HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParams(m) if m.contains("text")));

        assert!(matches!(
            registry.call(&Context::new(), "nope", HashMap::new()).await,
            Err(Error::ToolNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_echo_error_flag() {
        let registry = ToolRegistry::with_builtins();
        let args = HashMap::from([
            ("text".to_string(), json!("bad input")),
            ("error".to_string(), json!(true)),
        ]);
        let result = registry.call(&Context::new(), "echo", args).await.unwrap();
        assert!(result.is_error);
        assert_eq!(result.content[0].as_text(), Some("bad input"));
    }

    #[tokio::test]
    async fn test_wait_tool_honours_cancel() {
        let registry = ToolRegistry::with_builtins();
        let ctx = Context::new();
        ctx.cancel();
        let args = HashMap::from([("ms".to_string(), json!(10_000))]);
        assert!(matches!(
            registry.call(&ctx, "wait", args).await,
            Err(Error::Cancelled)
        ));
    }

    #[test]
    fn test_get_string_arg() {
        let args = HashMap::from([("name".to_string(), json!("value"))]);
        assert_eq!(get_string_arg(&args, "name").unwrap(), "value");
        assert!(get_string_arg(&args, "missing").is_err());
    }

    #[test]
    fn test_get_int_and_bool_args() {
        let args = HashMap::from([
            ("count".to_string(), json!(42)),
            ("flag".to_string(), json!(true)),
        ]);
        assert_eq!(get_int_arg(&args, "count").unwrap(), 42);
        assert!(get_int_arg(&args, "missing").is_err());
        assert!(get_bool_arg(&args, "flag", false));
        assert!(get_bool_arg(&args, "missing", true));
    }

    #[test]
    fn test_result_helpers() {
        assert!(!success_result("ok").is_error);
        assert!(error_result("bad").is_error);
    }
}
