//! In-memory service discovery.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::capability::{Capabilities, Negotiator};
use crate::context::Context;
use crate::error::{Error, Result};

/// A service that can be found through the registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    pub endpoint: String,
    #[serde(default)]
    pub capabilities: Capabilities,
}

impl Service {
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::InvalidParams("service id is required".to_string()));
        }
        if self.endpoint.is_empty() {
            return Err(Error::InvalidParams(
                "service endpoint is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Listing filter. Namespace and tags are accepted for forward compatibility;
/// only `capabilities` and `limit` constrain results today.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Every listed capability must be present on a matching service.
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    /// Reserved; ignored.
    #[serde(default)]
    pub cursor: Option<String>,
}

impl Filter {
    fn matches(&self, svc: &Service) -> bool {
        self.capabilities
            .iter()
            .all(|name| svc.capabilities.has(name))
    }
}

/// Registry of discoverable services.
#[derive(Debug, Default)]
pub struct DiscoveryRegistry {
    services: RwLock<HashMap<String, Service>>,
    negotiator: Negotiator,
}

impl DiscoveryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_negotiator(negotiator: Negotiator) -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            negotiator,
        }
    }

    /// Add a service. `name` defaults to `id`.
    pub async fn register(&self, ctx: &Context, mut svc: Service) -> Result<()> {
        ctx.check()?;
        svc.validate()?;
        if svc.name.is_empty() {
            svc.name = svc.id.clone();
        }

        let mut services = self.services.write().await;
        if services.contains_key(&svc.id) {
            return Err(Error::Duplicate);
        }
        debug!("Registered service: {} at {}", svc.id, svc.endpoint);
        services.insert(svc.id.clone(), svc);
        Ok(())
    }

    pub async fn deregister(&self, ctx: &Context, id: &str) -> Result<()> {
        ctx.check()?;
        self.services
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or(Error::NotFound)
    }

    pub async fn get(&self, ctx: &Context, id: &str) -> Result<Service> {
        ctx.check()?;
        self.services
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(Error::NotFound)
    }

    /// Services matching `filter`, sorted by id and truncated to `filter.limit`.
    pub async fn list(&self, ctx: &Context, filter: Option<&Filter>) -> Result<Vec<Service>> {
        ctx.check()?;
        let mut matched: Vec<Service> = self
            .services
            .read()
            .await
            .values()
            .filter(|svc| filter.map_or(true, |f| f.matches(svc)))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));

        if let Some(limit) = filter.and_then(|f| f.limit).filter(|l| *l > 0) {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    /// Negotiate client and server vectors with the registry's strategy.
    pub async fn negotiate(
        &self,
        ctx: &Context,
        client: Option<&Capabilities>,
        server: Option<&Capabilities>,
    ) -> Result<Option<Capabilities>> {
        ctx.check()?;
        Ok(self.negotiator.negotiate(client, server))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Strategy;

    fn service(id: &str, tools: bool, streaming: bool) -> Service {
        Service {
            capabilities: Capabilities {
                tools,
                streaming,
                ..Default::default()
            },
            ..Service::new(id, format!("http://{}.local", id))
        }
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let ctx = Context::new();
        let registry = DiscoveryRegistry::new();
        registry.register(&ctx, service("alpha", true, false)).await.unwrap();

        let svc = registry.get(&ctx, "alpha").await.unwrap();
        assert_eq!(svc.name, "alpha");
        assert_eq!(svc.endpoint, "http://alpha.local");
    }

    #[tokio::test]
    async fn test_get_returns_copy() {
        let ctx = Context::new();
        let registry = DiscoveryRegistry::new();
        registry.register(&ctx, service("alpha", true, false)).await.unwrap();

        let mut svc = registry.get(&ctx, "alpha").await.unwrap();
        svc.endpoint = "mutated".to_string();
        assert_eq!(
            registry.get(&ctx, "alpha").await.unwrap().endpoint,
            "http://alpha.local"
        );
    }

    #[tokio::test]
    async fn test_duplicate_and_missing() {
        let ctx = Context::new();
        let registry = DiscoveryRegistry::new();
        registry.register(&ctx, service("alpha", true, false)).await.unwrap();

        assert!(matches!(
            registry.register(&ctx, service("alpha", false, false)).await,
            Err(Error::Duplicate)
        ));
        assert!(matches!(registry.get(&ctx, "nope").await, Err(Error::NotFound)));
        assert!(matches!(
            registry.deregister(&ctx, "nope").await,
            Err(Error::NotFound)
        ));
        registry.deregister(&ctx, "alpha").await.unwrap();
        assert!(matches!(registry.get(&ctx, "alpha").await, Err(Error::NotFound)));
    }

    #[tokio::test]
    async fn test_validation() {
        let ctx = Context::new();
        let registry = DiscoveryRegistry::new();
        assert!(registry.register(&ctx, Service::new("", "http://x")).await.is_err());
        assert!(registry.register(&ctx, Service::new("x", "")).await.is_err());
    }

    #[tokio::test]
    async fn test_list_sorted_filtered_limited() {
        let ctx = Context::new();
        let registry = DiscoveryRegistry::new();
        for (id, tools, streaming) in [("c", true, true), ("a", true, false), ("b", true, true)] {
            registry.register(&ctx, service(id, tools, streaming)).await.unwrap();
        }

        let all = registry.list(&ctx, None).await.unwrap();
        let ids: Vec<_> = all.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let filter = Filter {
            capabilities: vec!["tools".into(), "streaming".into()],
            ..Default::default()
        };
        let streaming = registry.list(&ctx, Some(&filter)).await.unwrap();
        let ids: Vec<_> = streaming.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);

        let limited = Filter {
            limit: Some(1),
            ..filter
        };
        assert_eq!(registry.list(&ctx, Some(&limited)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_context_leaves_state_untouched() {
        let registry = DiscoveryRegistry::new();
        let ctx = Context::new();
        ctx.cancel();
        assert!(matches!(
            registry.register(&ctx, service("alpha", true, false)).await,
            Err(Error::Cancelled)
        ));
        assert!(registry.list(&Context::new(), None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_negotiate_uses_strategy() {
        let ctx = Context::new();
        let registry = DiscoveryRegistry::with_negotiator(Negotiator::new(Strategy::Merge));
        let a = Capabilities {
            tools: true,
            ..Default::default()
        };
        let b = Capabilities {
            prompts: true,
            ..Default::default()
        };
        let result = registry.negotiate(&ctx, Some(&a), Some(&b)).await.unwrap().unwrap();
        assert!(result.tools && result.prompts);
    }
}
