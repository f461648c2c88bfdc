//! End-to-end scenarios through the public API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use agent_bridge::capability::{Capabilities, Negotiator, Strategy};
use agent_bridge::context::Context;
use agent_bridge::elicit::{ElicitCallback, ElicitRequest, ElicitResponse, ElicitationHandler};
use agent_bridge::error::{Error, Result};
use agent_bridge::resource::{Contents, Resource, ResourceRegistry, StaticProvider, SubscriptionManager};
use agent_bridge::session::SessionStore;
use agent_bridge::task::{TaskManager, TaskState};
use agent_bridge::wire::{default_registry, Request};

#[tokio::test]
async fn task_lifecycle_with_streaming() {
    let ctx = Context::new();
    let tasks = TaskManager::default();

    let task = tasks.create(&ctx, "t1").await.unwrap();
    assert_eq!(task.id, "t1");
    assert_eq!(task.state, TaskState::Pending);
    assert_eq!(task.progress, 0.0);

    let mut ch = tasks.subscribe(&ctx, "t1").await.unwrap();

    tasks.update(&ctx, "t1", 0.5, "halfway").await.unwrap();
    let update = ch.recv().await.unwrap();
    assert_eq!(update.state, TaskState::Running);
    assert_eq!(update.progress, 0.5);
    assert_eq!(update.message, "halfway");

    tasks.complete(&ctx, "t1", json!("done")).await.unwrap();
    let done = ch.recv().await.unwrap();
    assert_eq!(done.state, TaskState::Complete);
    assert_eq!(done.progress, 1.0);
    assert_eq!(done.result, Some(json!("done")));
    assert!(done.completed_at.is_some());
    assert!(ch.recv().await.is_none());

    let err = tasks.cancel(&ctx, "t1").await.unwrap_err();
    assert!(matches!(err.root_cause(), Error::InvalidTransition));
}

#[test]
fn cross_protocol_preservation() {
    let req = Request::new("r1", "tools/call", "search").with_argument("query", json!("go"));

    for name in ["mcp", "a2a", "acp"] {
        let wire = default_registry().get(name).unwrap();
        let bytes = wire.encode_request(&req).unwrap();
        let decoded = wire.decode_request(&bytes).unwrap();
        assert_eq!(decoded.id, "r1", "{}", name);
        assert_eq!(decoded.tool_id, "search", "{}", name);
        assert_eq!(decoded.arguments["query"], json!("go"), "{}", name);
    }
}

#[tokio::test]
async fn resource_subscription_broadcast() {
    let resources = ResourceRegistry::new();
    resources
        .register("file", Arc::new(StaticProvider::new()))
        .await
        .unwrap();
    let subs = SubscriptionManager::default();
    let uri = "file:///config";

    let ctx1 = Context::new();
    let ctx2 = Context::new();
    let mut ch1 = subs.subscribe(&ctx1, uri).unwrap();
    let mut ch2 = subs.subscribe(&ctx2, uri).unwrap();

    assert_eq!(subs.notify(uri, &Contents::text(uri, "v1")), 2);
    assert_eq!(ch1.recv().await.unwrap().text, "v1");
    assert_eq!(ch2.recv().await.unwrap().text, "v1");

    ctx1.cancel();
    tokio::time::timeout(Duration::from_secs(1), async {
        while subs.subscriber_count(uri) > 1 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    subs.notify(uri, &Contents::text(uri, "v2"));
    assert!(ch1.recv().await.is_none());
    assert_eq!(ch2.recv().await.unwrap().text, "v2");
}

#[tokio::test]
async fn session_expiration() {
    let ctx = Context::new();
    let store = SessionStore::new(Duration::from_millis(1));
    let session = store.create(&ctx, "c1").await.unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;
    let err = store.get(&ctx, &session.id).await.unwrap_err();
    assert!(matches!(err.root_cause(), Error::SessionExpired));

    assert_eq!(store.cleanup(&ctx).await.unwrap(), 1);
    let err = store.get(&ctx, &session.id).await.unwrap_err();
    assert!(matches!(err.root_cause(), Error::SessionNotFound));
}

struct SlowCallback;

#[async_trait]
impl ElicitCallback for SlowCallback {
    async fn elicit(&self, _ctx: &Context, req: &ElicitRequest) -> Result<ElicitResponse> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(ElicitResponse::answered(&req.id, json!("late")))
    }
}

#[tokio::test]
async fn elicitation_timeout() {
    let handler = ElicitationHandler::new()
        .with_default_timeout(Duration::from_millis(10))
        .with_callback(Arc::new(SlowCallback));

    let resp = handler
        .handle(&Context::new(), &ElicitRequest::text("e1", "Your name?"))
        .await
        .unwrap();
    assert!(resp.timed_out);
    assert!(!resp.is_success());
}

#[test]
fn capability_negotiation() {
    let client = Capabilities {
        tools: true,
        resources: true,
        streaming: true,
        ..Capabilities::empty()
    }
    .with_extension("a")
    .with_extension("b");
    let server = Capabilities {
        tools: true,
        prompts: true,
        ..Capabilities::empty()
    }
    .with_extension("b")
    .with_extension("c");

    let intersect = Negotiator::new(Strategy::Intersect)
        .negotiate(Some(&client), Some(&server))
        .unwrap();
    assert_eq!(intersect, Capabilities { tools: true, ..Capabilities::empty() }.with_extension("b"));

    let merge = Negotiator::new(Strategy::Merge)
        .negotiate(Some(&client), Some(&server))
        .unwrap();
    assert!(merge.tools && merge.resources && merge.streaming && merge.prompts);
    assert!(!merge.sampling && !merge.progress);
    assert_eq!(
        merge.extensions.iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["a", "b", "c"]
    );
}

#[tokio::test]
async fn registered_resource_is_readable() {
    let ctx = Context::new();
    let provider = Arc::new(StaticProvider::new());
    provider
        .add(
            Resource::new("file:///config", "config"),
            Contents::text("file:///config", "v0"),
        )
        .await;
    let resources = ResourceRegistry::new();
    resources.register("file", provider).await.unwrap();

    let contents = resources.read(&ctx, "file:///config").await.unwrap();
    assert_eq!(contents.text, "v0");
    assert_eq!(resources.list(&ctx).await.unwrap().len(), 1);
}
