//! Error types for Agent Bridge.

use std::fmt;

use thiserror::Error;

/// Result type alias for Agent Bridge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Subsystem an [`Error::Domain`] wrapper belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Resource,
    Session,
    Task,
    Elicit,
    Prompt,
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Domain::Resource => write!(f, "resource"),
            Domain::Session => write!(f, "session"),
            Domain::Task => write!(f, "task"),
            Domain::Elicit => write!(f, "elicit"),
            Domain::Prompt => write!(f, "prompt"),
        }
    }
}

/// Main error type for Agent Bridge.
#[derive(Error, Debug)]
pub enum Error {
    // ===== Generic lookups and conflicts =====
    #[error("not found")]
    NotFound,

    #[error("already exists")]
    Duplicate,

    // ===== Session Errors =====
    #[error("invalid client id")]
    InvalidClientId,

    #[error("session not found")]
    SessionNotFound,

    #[error("session expired")]
    SessionExpired,

    // ===== Task Errors =====
    #[error("invalid state transition")]
    InvalidTransition,

    #[error("task already exists")]
    TaskExists,

    #[error("empty task id")]
    EmptyId,

    #[error("task not found")]
    TaskNotFound,

    // ===== Prompt Errors =====
    #[error("invalid prompt")]
    InvalidPrompt,

    #[error("duplicate prompt")]
    DuplicatePrompt,

    #[error("prompt not found")]
    PromptNotFound,

    #[error("missing required argument: {0}")]
    MissingArgument(String),

    // ===== Resource Errors =====
    #[error("invalid uri: {0}")]
    InvalidUri(String),

    #[error("provider not found for scheme: {0}")]
    ProviderNotFound(String),

    #[error("duplicate provider for scheme: {0}")]
    DuplicateProvider(String),

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("not subscribed: {0}")]
    NotSubscribed(String),

    // ===== Elicitation Errors =====
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no handler configured")]
    NoHandler,

    // ===== Context Errors =====
    #[error("deadline exceeded")]
    Timeout,

    #[error("context cancelled")]
    Cancelled,

    // ===== Wire Errors =====
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("encode failure: {0}")]
    EncodeFailure(#[source] serde_json::Error),

    #[error("decode failure: {0}")]
    DecodeFailure(String),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    // ===== Transport Errors =====
    #[error("transport closed")]
    TransportClosed,

    #[error("transport already serving")]
    AlreadyServing,

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    // ===== Domain wrapper =====
    #[error("{domain} {id}: {op}{}", render_source(.source))]
    Domain {
        domain: Domain,
        id: String,
        op: &'static str,
        #[source]
        source: Option<Box<Error>>,
    },

    // ===== I/O Errors =====
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // ===== Internal Errors =====
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn render_source(source: &Option<Box<Error>>) -> String {
    source
        .as_ref()
        .map(|e| format!(": {}", e))
        .unwrap_or_default()
}

/// JSON-RPC error codes used on the wire.
pub mod codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    // Domain range
    pub const NOT_FOUND: i32 = -32001;
    pub const CONFLICT: i32 = -32002;
    pub const INVALID_TRANSITION: i32 = -32003;
    pub const EXPIRED: i32 = -32004;
    pub const CANCELLED: i32 = -32005;
    pub const TIMEOUT: i32 = -32006;
}

impl Error {
    /// Wrap an underlying error with the entity and operation it failed on.
    pub fn domain(domain: Domain, id: impl Into<String>, op: &'static str, source: Error) -> Self {
        Self::Domain {
            domain,
            id: id.into(),
            op,
            source: Some(Box::new(source)),
        }
    }

    /// Walk through [`Error::Domain`] wrappers down to the innermost error.
    pub fn root_cause(&self) -> &Error {
        let mut current = self;
        while let Error::Domain {
            source: Some(inner),
            ..
        } = current
        {
            current = inner;
        }
        current
    }

    /// JSON-RPC code for this error.
    pub fn rpc_code(&self) -> i32 {
        match self.root_cause() {
            Self::DecodeFailure(_) | Self::Json(_) => codes::PARSE_ERROR,
            Self::InvalidRequest(_) | Self::UnsupportedFormat(_) => codes::INVALID_REQUEST,
            Self::MethodNotFound(_) => codes::METHOD_NOT_FOUND,
            Self::InvalidParams(_)
            | Self::MissingArgument(_)
            | Self::InvalidUri(_)
            | Self::InvalidClientId
            | Self::InvalidPrompt
            | Self::EmptyId => codes::INVALID_PARAMS,
            Self::NotFound
            | Self::SessionNotFound
            | Self::TaskNotFound
            | Self::PromptNotFound
            | Self::ProviderNotFound(_)
            | Self::ResourceNotFound(_)
            | Self::NotSubscribed(_)
            | Self::ToolNotFound(_)
            | Self::NoHandler => codes::NOT_FOUND,
            Self::Duplicate
            | Self::TaskExists
            | Self::DuplicatePrompt
            | Self::DuplicateProvider(_)
            | Self::AlreadyServing => codes::CONFLICT,
            Self::InvalidTransition => codes::INVALID_TRANSITION,
            Self::SessionExpired => codes::EXPIRED,
            Self::Cancelled => codes::CANCELLED,
            Self::Timeout => codes::TIMEOUT,
            _ => codes::INTERNAL_ERROR,
        }
    }

    /// Check if this error is a caller-input problem (no state was touched).
    pub fn is_user_error(&self) -> bool {
        matches!(
            self.root_cause(),
            Self::InvalidClientId
                | Self::InvalidPrompt
                | Self::InvalidRequest(_)
                | Self::InvalidParams(_)
                | Self::EmptyId
                | Self::MissingArgument(_)
                | Self::InvalidUri(_)
        )
    }
}
