//! Prompt Templates
//!
//! Named prompts with declared arguments, rendered by a handler into an
//! ordered list of messages.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::content::Content;
use crate::context::Context;
use crate::error::{Domain, Error, Result};

/// A prompt argument definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

impl PromptArgument {
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: false,
        }
    }
}

/// A prompt definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
}

impl Prompt {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            arguments: Vec::new(),
        }
    }

    pub fn with_argument(mut self, arg: PromptArgument) -> Self {
        self.arguments.push(arg);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One rendered message. Content is limited to text, image and resource parts.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptMessage {
    pub role: Role,
    pub content: Vec<Content>,
}

impl PromptMessage {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![Content::text(text)],
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![Content::text(text)],
        }
    }
}

/// Renders a prompt from its arguments.
#[async_trait]
pub trait PromptHandler: Send + Sync {
    async fn render(
        &self,
        ctx: &Context,
        args: &HashMap<String, String>,
    ) -> Result<Vec<PromptMessage>>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> PromptHandler for FnHandler<F>
where
    F: Fn(&HashMap<String, String>) -> Result<Vec<PromptMessage>> + Send + Sync,
{
    async fn render(
        &self,
        _ctx: &Context,
        args: &HashMap<String, String>,
    ) -> Result<Vec<PromptMessage>> {
        (self.0)(args)
    }
}

/// Wrap a synchronous closure as a [`PromptHandler`].
pub fn handler<F>(f: F) -> Arc<dyn PromptHandler>
where
    F: Fn(&HashMap<String, String>) -> Result<Vec<PromptMessage>> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

/// Renders a `{{var}}` template into a single user message.
#[derive(Debug, Clone)]
pub struct TemplatePrompt {
    template: String,
    defaults: HashMap<String, String>,
}

impl TemplatePrompt {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            defaults: HashMap::new(),
        }
    }

    pub fn with_default(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.defaults.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl PromptHandler for TemplatePrompt {
    async fn render(
        &self,
        _ctx: &Context,
        args: &HashMap<String, String>,
    ) -> Result<Vec<PromptMessage>> {
        let text = expand_template_with_defaults(&self.template, args, &self.defaults)?;
        Ok(vec![PromptMessage::user_text(text)])
    }
}

/// Prompt registry.
#[derive(Default)]
pub struct PromptRegistry {
    prompts: RwLock<HashMap<String, (Prompt, Arc<dyn PromptHandler>)>>,
}

impl PromptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a prompt.
    pub async fn register(&self, prompt: Prompt, handler: Arc<dyn PromptHandler>) -> Result<()> {
        if prompt.name.is_empty() {
            return Err(Error::InvalidPrompt);
        }
        let mut prompts = self.prompts.write().await;
        if prompts.contains_key(&prompt.name) {
            return Err(Error::DuplicatePrompt);
        }
        debug!("Registered prompt: {}", prompt.name);
        prompts.insert(prompt.name.clone(), (prompt, handler));
        Ok(())
    }

    /// List all prompts.
    pub async fn list(&self, ctx: &Context) -> Result<Vec<Prompt>> {
        ctx.check()?;
        Ok(self
            .prompts
            .read()
            .await
            .values()
            .map(|(p, _)| p.clone())
            .collect())
    }

    /// Render a prompt. Required arguments must be present; handler failures
    /// are wrapped with the prompt name.
    pub async fn get(
        &self,
        ctx: &Context,
        name: &str,
        args: &HashMap<String, String>,
    ) -> Result<(Prompt, Vec<PromptMessage>)> {
        ctx.check()?;
        let (prompt, handler) = self
            .prompts
            .read()
            .await
            .get(name)
            .map(|(p, h)| (p.clone(), Arc::clone(h)))
            .ok_or(Error::PromptNotFound)?;

        if let Some(missing) = prompt
            .arguments
            .iter()
            .find(|a| a.required && !args.contains_key(&a.name))
        {
            return Err(Error::MissingArgument(missing.name.clone()));
        }

        let messages = handler
            .render(ctx, args)
            .await
            .map_err(|e| Error::domain(Domain::Prompt, name, "get", e))?;
        Ok((prompt, messages))
    }
}

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{([^{}]*)\}\}").expect("placeholder pattern is valid")
});

/// Replace each `{{ key }}` with `args[key]`, left to right.
///
/// Substituted text is not rescanned, so a value containing `{{x}}` is
/// emitted literally.
pub fn expand_template(template: &str, args: &HashMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in PLACEHOLDER.captures_iter(template) {
        let (Some(whole), Some(key)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let key = key.as_str().trim();
        let value = args
            .get(key)
            .ok_or_else(|| Error::MissingArgument(key.to_string()))?;
        out.push_str(&template[last..whole.start()]);
        out.push_str(value);
        last = whole.end();
    }
    out.push_str(&template[last..]);
    Ok(out)
}

/// [`expand_template`] over `defaults` overlaid with `args`.
pub fn expand_template_with_defaults(
    template: &str,
    args: &HashMap<String, String>,
    defaults: &HashMap<String, String>,
) -> Result<String> {
    let mut merged = defaults.clone();
    merged.extend(args.iter().map(|(k, v)| (k.clone(), v.clone())));
    expand_template(template, &merged)
}
