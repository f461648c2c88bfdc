//! Conversion between every pair of wire protocols.

use serde_json::{json, Value};

use agent_bridge::content::Content;
use agent_bridge::context::Context;
use agent_bridge::server::Server;
use agent_bridge::wire::{default_registry, Request, Response};

const PROTOCOLS: [&str; 3] = ["mcp", "a2a", "acp"];

fn pairs() -> impl Iterator<Item = (&'static str, &'static str)> {
    PROTOCOLS
        .iter()
        .flat_map(|from| PROTOCOLS.iter().map(move |to| (*from, *to)))
}

#[test]
fn requests_survive_every_pair() {
    let server = Server::new("bridge");
    let req = Request::new("r1", "", "search")
        .with_argument("query", json!("go"))
        .with_argument("limit", json!(5));

    for (from, to) in pairs() {
        let source = default_registry().get(from).unwrap();
        let dest = default_registry().get(to).unwrap();

        let raw = source.encode_request(&req).unwrap();
        let converted = server.convert(from, to, &raw).unwrap();
        let decoded = dest.decode_request(&converted).unwrap();

        assert_eq!(decoded.id, "r1", "{} -> {}", from, to);
        assert_eq!(decoded.tool_id, "search", "{} -> {}", from, to);
        assert_eq!(decoded.arguments["query"], json!("go"), "{} -> {}", from, to);
        assert_eq!(decoded.arguments["limit"], json!(5), "{} -> {}", from, to);
    }
}

#[test]
fn call_method_is_renamed() {
    let server = Server::new("bridge");
    let raw = json!({
        "jsonrpc": "2.0", "id": 1, "method": "tools/call",
        "params": { "name": "search", "arguments": { "query": "go" } }
    })
    .to_string();

    let expected = [("mcp", "tools/call"), ("a2a", "message/send"), ("acp", "runs/create")];
    for (to, method) in expected {
        let out = server.convert("mcp", to, raw.as_bytes()).unwrap();
        let env: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(env["method"], method, "mcp -> {}", to);
    }
}

#[test]
fn responses_survive_every_pair() {
    let server = Server::new("bridge");
    let resp = Response::success("r1", vec![Content::text("found 3 results")]);

    for (from, to) in pairs() {
        let raw = default_registry().get(from).unwrap().encode_response(&resp).unwrap();
        let converted = server.convert_response(from, to, &raw).unwrap();
        let decoded = default_registry()
            .get(to)
            .unwrap()
            .decode_response(&converted)
            .unwrap();

        assert_eq!(decoded.id, "r1", "{} -> {}", from, to);
        assert!(!decoded.is_error, "{} -> {}", from, to);
        assert_eq!(
            decoded.content[0].as_text(),
            Some("found 3 results"),
            "{} -> {}",
            from,
            to
        );
    }
}

#[test]
fn unknown_protocol_is_rejected() {
    let server = Server::new("bridge");
    assert!(server.convert("mcp", "grpc", b"{}").is_err());
}

#[tokio::test]
async fn same_tool_served_in_every_protocol() {
    let server = Server::new("bridge");
    let ctx = Context::new();

    let calls = [
        ("mcp", json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call",
                       "params": {"name": "echo", "arguments": {"text": "hi"}}})),
        ("a2a", json!({"jsonrpc": "2.0", "id": 1, "method": "message/send",
                       "params": {"skillId": "echo", "arguments": {"text": "hi"}}})),
        ("acp", json!({"jsonrpc": "2.0", "id": 1, "method": "runs/create",
                       "params": {"agentId": "echo", "input": {"text": "hi"}}})),
    ];

    for (protocol, msg) in calls {
        let reply = server
            .handle_protocol(&ctx, protocol, msg.to_string().as_bytes())
            .await
            .unwrap();
        let resp = default_registry()
            .get(protocol)
            .unwrap()
            .decode_response(&reply)
            .unwrap();
        assert!(!resp.is_error, "{}", protocol);
        assert_eq!(resp.content[0].as_text(), Some("hi"), "{}", protocol);
    }

    assert_eq!(server.tasks().list(&ctx).await.unwrap().len(), 3);
}
