//! Configuration management for Agent Bridge.
//!
//! Values come from three layers: built-in defaults, an optional YAML file
//! (`--config`), and command-line flags or their `AGENT_BRIDGE_*` environment
//! variables. Later layers override earlier ones.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::session::DEFAULT_TTL;
use crate::transport::{TransportOptions, DEFAULT_ADDR, DEFAULT_PATH};
use crate::wire::default_registry;

/// Command-line arguments for the Agent Bridge server.
///
/// Options left unset fall through to the config file, then to defaults.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "agent-bridge")]
#[command(author = "Agent Bridge Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Tool-provider server speaking MCP, A2A and ACP")]
pub struct Args {
    /// YAML config file
    #[arg(short, long, env = "AGENT_BRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Transport mode: stdio or http
    #[arg(short, long, env = "AGENT_BRIDGE_TRANSPORT")]
    pub transport: Option<TransportMode>,

    /// HTTP listen address (only for http transport)
    #[arg(short, long, env = "AGENT_BRIDGE_ADDR")]
    pub addr: Option<String>,

    /// HTTP mount path (only for http transport)
    #[arg(long, env = "AGENT_BRIDGE_PATH")]
    pub path: Option<String>,

    /// Default wire protocol: mcp, a2a or acp
    #[arg(short, long, env = "AGENT_BRIDGE_PROTOCOL")]
    pub protocol: Option<String>,

    /// Server name reported to clients
    #[arg(short, long, env = "AGENT_BRIDGE_NAME")]
    pub name: Option<String>,

    /// Session lifetime in seconds
    #[arg(long, env = "AGENT_BRIDGE_SESSION_TTL_SECS")]
    pub session_ttl_secs: Option<u64>,

    /// Elicitation timeout in seconds
    #[arg(long, env = "AGENT_BRIDGE_ELICIT_TIMEOUT_SECS")]
    pub elicit_timeout_secs: Option<u64>,

    /// Per-subscriber queue depth
    #[arg(long, env = "AGENT_BRIDGE_SUBSCRIPTION_BUFFER")]
    pub subscription_buffer: Option<usize>,

    /// Enable debug logging
    #[arg(short, long, env = "AGENT_BRIDGE_DEBUG")]
    pub debug: bool,

    /// Emit logs as JSON
    #[arg(long, env = "AGENT_BRIDGE_LOG_JSON")]
    pub log_json: bool,
}

/// Transport mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    #[default]
    Stdio,
    Http,
}

impl TransportMode {
    /// Name under which the transport is registered.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportMode::Stdio => crate::transport::stdio::NAME,
            TransportMode::Http => crate::transport::http::NAME,
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server name
    pub name: String,
    /// Transport mode
    pub transport: TransportMode,
    /// HTTP listen address
    pub addr: String,
    /// HTTP mount path
    pub path: String,
    /// Default wire protocol
    pub protocol: String,
    /// Session lifetime, seconds
    pub session_ttl_secs: u64,
    /// Elicitation timeout, seconds
    pub elicit_timeout_secs: u64,
    /// Per-subscriber queue depth
    pub subscription_buffer: usize,
    /// Debug mode
    pub debug: bool,
    /// JSON log output
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "agent-bridge".to_string(),
            transport: TransportMode::Stdio,
            addr: DEFAULT_ADDR.to_string(),
            path: DEFAULT_PATH.to_string(),
            protocol: "mcp".to_string(),
            session_ttl_secs: DEFAULT_TTL.as_secs(),
            elicit_timeout_secs: crate::elicit::DEFAULT_TIMEOUT.as_secs(),
            subscription_buffer: crate::fanout::DEFAULT_BUFFER,
            debug: false,
            log_json: false,
        }
    }
}

impl Config {
    /// Read a YAML config file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&text)?)
    }

    /// Build the effective config: file (if any), then `args`, then validate.
    pub fn load(args: &Args) -> Result<Self> {
        let base = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let config = base.merge(args);
        config.validate()?;
        Ok(config)
    }

    /// Overlay the values set in `args`.
    pub fn merge(mut self, args: &Args) -> Self {
        if let Some(transport) = args.transport {
            self.transport = transport;
        }
        if let Some(addr) = &args.addr {
            self.addr = addr.clone();
        }
        if let Some(path) = &args.path {
            self.path = path.clone();
        }
        if let Some(protocol) = &args.protocol {
            self.protocol = protocol.clone();
        }
        if let Some(name) = &args.name {
            self.name = name.clone();
        }
        if let Some(ttl) = args.session_ttl_secs {
            self.session_ttl_secs = ttl;
        }
        if let Some(timeout) = args.elicit_timeout_secs {
            self.elicit_timeout_secs = timeout;
        }
        if let Some(buffer) = args.subscription_buffer {
            self.subscription_buffer = buffer;
        }
        self.debug |= args.debug;
        self.log_json |= args.log_json;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if default_registry().get(&self.protocol).is_none() {
            return Err(Error::InvalidConfig(format!(
                "unknown protocol: {}",
                self.protocol
            )));
        }
        if self.session_ttl_secs == 0 {
            return Err(Error::InvalidConfig("session TTL must be positive".to_string()));
        }
        if self.subscription_buffer == 0 {
            return Err(Error::InvalidConfig(
                "subscription buffer must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn elicit_timeout(&self) -> Duration {
        Duration::from_secs(self.elicit_timeout_secs)
    }

    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            addr: self.addr.clone(),
            path: self.path.clone(),
            protocol: Some(self.protocol.clone()),
        }
    }
}
