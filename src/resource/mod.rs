//! Resources
//!
//! Scheme-routed resource providers and the per-URI update bus.

pub mod subscription;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::content::{Content, ResourceContent, DEFAULT_TEXT_MIME};
use crate::context::Context;
use crate::error::{Domain, Error, Result};

pub use subscription::SubscriptionManager;

/// A resource exposed by a provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, Value>,
}

impl Resource {
    pub fn new(uri: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: name.into(),
            ..Default::default()
        }
    }
}

/// The body of a resource. Either `text` or `blob` is meaningful.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contents {
    pub uri: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "blob_base64")]
    pub blob: Vec<u8>,
}

impl Contents {
    pub fn text(uri: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            mime_type: DEFAULT_TEXT_MIME.to_string(),
            text: text.into(),
            blob: Vec::new(),
        }
    }

    pub fn blob(uri: impl Into<String>, mime_type: impl Into<String>, blob: Vec<u8>) -> Self {
        Self {
            uri: uri.into(),
            mime_type: mime_type.into(),
            text: String::new(),
            blob,
        }
    }

    pub fn is_binary(&self) -> bool {
        !self.blob.is_empty()
    }
}

impl From<Contents> for Content {
    fn from(contents: Contents) -> Self {
        let mime_type = (!contents.mime_type.is_empty()).then_some(contents.mime_type);
        let (text, blob) = if contents.blob.is_empty() {
            (Some(contents.text), None)
        } else {
            (None, Some(contents.blob))
        };
        Content::Resource(ResourceContent {
            uri: contents.uri,
            mime_type,
            text,
            blob,
        })
    }
}

mod blob_base64 {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::content::{decode_base64, encode_base64};

    pub fn serialize<S: Serializer>(blob: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&encode_base64(blob))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        decode_base64(&encoded).map_err(serde::de::Error::custom)
    }
}

/// A parameterized resource URI such as `file:///{path}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub uri_template: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mime_type: String,
}

impl Template {
    pub fn new(uri_template: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uri_template: uri_template.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Replace each `{key}` with its value. Unknown placeholders are left as-is.
    pub fn expand(&self, vars: &HashMap<String, String>) -> String {
        vars.iter().fold(self.uri_template.clone(), |acc, (k, v)| {
            acc.replace(&format!("{{{}}}", k), v)
        })
    }
}

/// Source of resources for one URI scheme.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    async fn list(&self, ctx: &Context) -> Result<Vec<Resource>>;

    /// Read one resource; [`Error::ResourceNotFound`] when the URI is unknown.
    async fn read(&self, ctx: &Context, uri: &str) -> Result<Contents>;

    async fn templates(&self, ctx: &Context) -> Result<Vec<Template>>;
}

#[derive(Debug, Default)]
struct StaticState {
    resources: HashMap<String, Resource>,
    contents: HashMap<String, Contents>,
    templates: Vec<Template>,
}

/// Provider backed by in-memory maps.
#[derive(Debug, Default)]
pub struct StaticProvider {
    state: RwLock<StaticState>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a resource and its contents.
    pub async fn add(&self, resource: Resource, contents: Contents) {
        let mut state = self.state.write().await;
        state.contents.insert(resource.uri.clone(), contents);
        state.resources.insert(resource.uri.clone(), resource);
    }

    pub async fn add_template(&self, template: Template) {
        self.state.write().await.templates.push(template);
    }

    /// Replace the contents of an existing resource.
    pub async fn set_contents(&self, uri: &str, contents: Contents) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.resources.contains_key(uri) {
            return Err(Error::ResourceNotFound(uri.to_string()));
        }
        state.contents.insert(uri.to_string(), contents);
        Ok(())
    }

    pub async fn remove(&self, uri: &str) -> bool {
        let mut state = self.state.write().await;
        state.contents.remove(uri);
        state.resources.remove(uri).is_some()
    }
}

#[async_trait]
impl ResourceProvider for StaticProvider {
    async fn list(&self, ctx: &Context) -> Result<Vec<Resource>> {
        ctx.check()?;
        let mut resources: Vec<Resource> =
            self.state.read().await.resources.values().cloned().collect();
        resources.sort_by(|a, b| a.uri.cmp(&b.uri));
        Ok(resources)
    }

    async fn read(&self, ctx: &Context, uri: &str) -> Result<Contents> {
        ctx.check()?;
        self.state
            .read()
            .await
            .contents
            .get(uri)
            .cloned()
            .ok_or_else(|| Error::ResourceNotFound(uri.to_string()))
    }

    async fn templates(&self, ctx: &Context) -> Result<Vec<Template>> {
        ctx.check()?;
        Ok(self.state.read().await.templates.clone())
    }
}

/// Extract the scheme of `uri` (everything before the first `://`).
pub fn scheme_of(uri: &str) -> Result<&str> {
    match uri.find("://") {
        Some(idx) if idx > 0 => Ok(&uri[..idx]),
        _ => Err(Error::InvalidUri(uri.to_string())),
    }
}

/// Routes resource operations to providers by URI scheme.
#[derive(Default)]
pub struct ResourceRegistry {
    providers: RwLock<HashMap<String, Arc<dyn ResourceProvider>>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, scheme: &str, provider: Arc<dyn ResourceProvider>) -> Result<()> {
        if scheme.is_empty() {
            return Err(Error::InvalidUri(scheme.to_string()));
        }
        let mut providers = self.providers.write().await;
        if providers.contains_key(scheme) {
            return Err(Error::DuplicateProvider(scheme.to_string()));
        }
        providers.insert(scheme.to_string(), provider);
        debug!("Registered resource provider for scheme {}", scheme);
        Ok(())
    }

    /// Registered schemes, sorted.
    pub async fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self.providers.read().await.keys().cloned().collect();
        schemes.sort();
        schemes
    }

    // Providers are called outside the registry lock.
    async fn snapshot(&self) -> Vec<Arc<dyn ResourceProvider>> {
        let providers = self.providers.read().await;
        let mut entries: Vec<_> = providers.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries.into_iter().map(|(_, p)| Arc::clone(p)).collect()
    }

    pub async fn read(&self, ctx: &Context, uri: &str) -> Result<Contents> {
        ctx.check()?;
        let scheme = scheme_of(uri)?;
        let provider = self
            .providers
            .read()
            .await
            .get(scheme)
            .cloned()
            .ok_or_else(|| Error::ProviderNotFound(scheme.to_string()))?;

        provider
            .read(ctx, uri)
            .await
            .map_err(|e| Error::domain(Domain::Resource, uri, "read", e))
    }

    /// Resources from every provider. Duplicated URIs are not collapsed.
    pub async fn list(&self, ctx: &Context) -> Result<Vec<Resource>> {
        ctx.check()?;
        let mut all = Vec::new();
        for provider in self.snapshot().await {
            all.extend(provider.list(ctx).await?);
        }
        Ok(all)
    }

    pub async fn templates(&self, ctx: &Context) -> Result<Vec<Template>> {
        ctx.check()?;
        let mut all = Vec::new();
        for provider in self.snapshot().await {
            all.extend(provider.templates(ctx).await?);
        }
        Ok(all)
    }
}
