//! Agent Bridge - a protocol-neutral tool-provider server.
//!
//! One set of tools, prompts, resources and tasks is exposed over three
//! JSON-RPC dialects: MCP-style `tools/call`, A2A-style skills and message
//! parts, and ACP-style agent runs. A message entering through any codec is
//! decoded into the same internal request model, so it can be served by the
//! shared subsystems or re-emitted in another dialect.
//!
//! # Architecture
//!
//! 1. **Wire layer** (`wire`) - codecs between each dialect and the internal model
//! 2. **Dispatch layer** (`server`) - routes decoded operations to subsystems
//! 3. **Subsystems** - `task`, `session`, `resource`, `prompt`, `elicit`,
//!    `discovery`, `capability`, sharing `fanout` for subscriptions
//! 4. **Transport layer** (`transport`) - stdio and HTTP/SSE listeners
//!
//! Every operation takes a [`context::Context`] carrying cancellation, a
//! deadline and request-scoped ids.

pub mod capability;
pub mod config;
pub mod content;
pub mod context;
pub mod discovery;
pub mod elicit;
pub mod error;
pub mod fanout;
pub mod metrics;
pub mod prompt;
pub mod resource;
pub mod server;
pub mod session;
pub mod task;
pub mod tools;
pub mod transport;
pub mod wire;

pub use context::Context;
pub use error::{Error, Result};
pub use server::Server;

/// Server version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
