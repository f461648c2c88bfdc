//! Transports carry raw protocol messages between peers and a [`Server`].
//!
//! - `stdio` - newline-delimited messages over any async reader/writer pair
//! - `http` - axum router with JSON-RPC POST endpoints and SSE event streams

pub mod http;
pub mod stdio;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::server::Server;

pub use http::HttpTransport;
pub use stdio::StdioTransport;

/// Default HTTP listen address.
pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";

/// Default HTTP mount path.
pub const DEFAULT_PATH: &str = "/mcp";

/// Where a transport is listening.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportInfo {
    pub name: String,
    pub addr: String,
    pub path: String,
}

/// Settings handed to a transport factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOptions {
    pub addr: String,
    pub path: String,
    /// Codec for transports with a single message stream. `None` uses the
    /// server's default protocol.
    pub protocol: Option<String>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            path: DEFAULT_PATH.to_string(),
            protocol: None,
        }
    }
}

/// A listener that feeds messages to a server.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    fn info(&self) -> TransportInfo;

    /// Serve until `ctx` is done, [`Transport::close`] is called, or the
    /// underlying stream fails. A transport serves at most once.
    async fn serve(&self, ctx: &Context, server: Arc<Server>) -> Result<()>;

    /// Stop serving. Idempotent, and safe to call before or during `serve`.
    async fn close(&self) -> Result<()>;
}

/// Builds a transport from options.
pub type TransportFactory = Arc<dyn Fn(&TransportOptions) -> Arc<dyn Transport> + Send + Sync>;

/// Name to transport factory lookup.
#[derive(Default)]
pub struct TransportRegistry {
    factories: DashMap<String, TransportFactory>,
}

impl fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportRegistry")
            .field("transports", &self.list())
            .finish()
    }
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `stdio` and `http`.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(
            stdio::NAME,
            Arc::new(|opts: &TransportOptions| -> Arc<dyn Transport> {
                Arc::new(StdioTransport::stdio(opts.protocol.clone()))
            }),
        );
        registry.register(
            http::NAME,
            Arc::new(|opts: &TransportOptions| -> Arc<dyn Transport> {
                Arc::new(HttpTransport::new(&opts.addr, &opts.path))
            }),
        );
        registry
    }

    /// Register a factory, replacing any previous one under the same name.
    pub fn register(&self, name: impl Into<String>, factory: TransportFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn create(&self, name: &str, opts: &TransportOptions) -> Result<Arc<dyn Transport>> {
        let factory = self
            .factories
            .get(name)
            .map(|f| Arc::clone(f.value()))
            .ok_or_else(|| Error::InvalidConfig(format!("unknown transport: {}", name)))?;
        Ok(factory(opts))
    }

    /// Registered names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}
