//! Capability vectors and negotiation.
//!
//! A vector is six fixed feature flags plus a set of extension names.
//! Extensions are kept in a sorted set so that merge and intersect are
//! commutative in both flags and extensions.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Canonical names of the fixed flags, as used by filters.
pub const TOOLS: &str = "tools";
pub const RESOURCES: &str = "resources";
pub const PROMPTS: &str = "prompts";
pub const STREAMING: &str = "streaming";
pub const SAMPLING: &str = "sampling";
pub const PROGRESS: &str = "progress";

/// Feature vector advertised by a client, server, or discoverable service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub tools: bool,
    #[serde(default)]
    pub resources: bool,
    #[serde(default)]
    pub prompts: bool,
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub sampling: bool,
    #[serde(default)]
    pub progress: bool,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub extensions: BTreeSet<String>,
}

impl Capabilities {
    /// The empty vector: every flag off, no extensions.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_extension(mut self, name: impl Into<String>) -> Self {
        self.extensions.insert(name.into());
        self
    }

    /// Union of flags and extensions. Merging with `None` yields a copy of `self`.
    pub fn merge(&self, other: Option<&Capabilities>) -> Capabilities {
        let Some(other) = other else {
            return self.clone();
        };
        Capabilities {
            tools: self.tools || other.tools,
            resources: self.resources || other.resources,
            prompts: self.prompts || other.prompts,
            streaming: self.streaming || other.streaming,
            sampling: self.sampling || other.sampling,
            progress: self.progress || other.progress,
            extensions: self.extensions.union(&other.extensions).cloned().collect(),
        }
    }

    /// Common flags and extensions. Intersecting with `None` yields the empty vector.
    pub fn intersect(&self, other: Option<&Capabilities>) -> Capabilities {
        let Some(other) = other else {
            return Capabilities::empty();
        };
        Capabilities {
            tools: self.tools && other.tools,
            resources: self.resources && other.resources,
            prompts: self.prompts && other.prompts,
            streaming: self.streaming && other.streaming,
            sampling: self.sampling && other.sampling,
            progress: self.progress && other.progress,
            extensions: self
                .extensions
                .intersection(&other.extensions)
                .cloned()
                .collect(),
        }
    }

    /// Whether a named capability is present. The six canonical names map to
    /// flags; anything else is looked up in the extension set.
    pub fn has(&self, name: &str) -> bool {
        match name {
            TOOLS => self.tools,
            RESOURCES => self.resources,
            PROMPTS => self.prompts,
            STREAMING => self.streaming,
            SAMPLING => self.sampling,
            PROGRESS => self.progress,
            other => self.extensions.contains(other),
        }
    }
}

/// How a [`Negotiator`] combines two vectors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    #[default]
    Intersect,
    Merge,
}

/// Combines client and server vectors at session start.
#[derive(Debug, Clone, Copy, Default)]
pub struct Negotiator {
    strategy: Strategy,
}

impl Negotiator {
    pub fn new(strategy: Strategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Combine the two sides. If exactly one side is absent the other is
    /// returned as-is; if both are absent there is nothing to negotiate.
    pub fn negotiate(
        &self,
        client: Option<&Capabilities>,
        server: Option<&Capabilities>,
    ) -> Option<Capabilities> {
        match (client, server) {
            (None, None) => None,
            (Some(c), None) => Some(c.clone()),
            (None, Some(s)) => Some(s.clone()),
            (Some(c), Some(s)) => Some(match self.strategy {
                Strategy::Intersect => c.intersect(Some(s)),
                Strategy::Merge => c.merge(Some(s)),
            }),
        }
    }
}
