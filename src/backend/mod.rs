//! Provider execution layer.
//!
//! A [`Provider`] wraps one vendor CLI: it declares its models, knows how to
//! find and invoke the executable, and supplies an [`EventNormalizer`] that
//! maps the CLI's JSONL protocol onto [`ProviderMessage`]. [`execute`] wires
//! those pieces into one lazy stream per request.

pub mod claude;
pub mod codex;
pub mod context;
pub mod cursor;
pub mod dedup;
pub mod discovery;
pub mod error;
pub mod events;
pub mod models;
pub mod opencode;
pub mod process;
pub mod registry;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use context::ExecutionContext;
use dedup::TextDedup;
use discovery::{Detector, DiscoveryEnv, InstallationStatus};
use error::{ErrorHints, ProcessFailure, ProviderError};
use events::ProviderMessage;
use models::ModelDefinition;
use process::Invocation;

/// Lazy sequence of normalized messages for one execution.
///
/// Ends after at most one `Err`. Cancellation ends it without an error.
pub type ProviderStream = Pin<Box<dyn Stream<Item = Result<ProviderMessage, ProviderError>> + Send>>;

/// One fragment of a structured prompt. Only text is forwarded to backends.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PromptBlock {
    Text { text: String },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Prompt {
    Text(String),
    Blocks(Vec<PromptBlock>),
}

impl Prompt {
    /// Flatten to the text sent on stdin. Fragments are separated by a blank line.
    pub fn to_text(&self) -> String {
        match self {
            Prompt::Text(text) => text.clone(),
            Prompt::Blocks(blocks) => {
                let mut parts = Vec::new();
                for block in blocks {
                    match block {
                        PromptBlock::Text { text } => parts.push(text.as_str()),
                        PromptBlock::Unsupported => {
                            warn!("Dropping non-text prompt fragment; backends only accept text")
                        }
                    }
                }
                parts.join("\n\n")
            }
        }
    }
}

impl From<&str> for Prompt {
    fn from(text: &str) -> Self {
        Prompt::Text(text.to_string())
    }
}

/// Auxiliary tool server (MCP) handed to backends that can load one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum McpServerConfig {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
    Http {
        #[serde(alias = "endpoint")]
        url: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
}

/// Construction inputs shared by every provider.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub discovery: DiscoveryEnv,
    /// Operator-configured executable path, checked before discovery.
    pub cli_path: Option<PathBuf>,
}

/// A single execution request. Immutable once the stream starts.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteOptions {
    /// Public model id; empty selects the backend's default model.
    #[serde(default)]
    pub model: String,
    pub prompt: Prompt,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default, alias = "readOnly")]
    pub read_only: bool,
    #[serde(default, alias = "mcpServers")]
    pub mcp_servers: BTreeMap<String, McpServerConfig>,
    #[serde(skip)]
    pub cancel: CancellationToken,
}

impl ExecuteOptions {
    pub fn new(model: impl Into<String>, prompt: impl Into<Prompt>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            cwd: None,
            read_only: false,
            mcp_servers: BTreeMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Directory the CLI runs in.
    pub fn workdir(&self) -> PathBuf {
        self.cwd
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Maps one backend's raw events onto canonical messages.
pub trait EventNormalizer: Send {
    /// Returns `None` for informational events. Captures session ids into `ctx`.
    fn normalize(&mut self, event: Value, ctx: &mut ExecutionContext) -> Option<ProviderMessage>;
}

#[async_trait]
pub trait Provider: Send + Sync {
    /// Registry key, lowercase.
    fn name(&self) -> &'static str;
    fn display_name(&self) -> &'static str;
    fn models(&self) -> Vec<ModelDefinition>;

    /// Prefix on public model ids that the CLI does not expect.
    fn vendor_prefix(&self) -> Option<&'static str> {
        None
    }

    fn detector(&self) -> &Detector;

    async fn check_installation(&self) -> InstallationStatus {
        self.detector().status().await
    }

    /// CLI argument vector. `workdir` is already in the executable's namespace.
    /// The prompt never goes here.
    fn build_args(&self, options: &ExecuteOptions, workdir: &str) -> Vec<String>;

    fn stdin_payload(&self, options: &ExecuteOptions) -> String {
        options.prompt.to_text()
    }

    /// Variables added to the inherited environment.
    fn extra_env(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn normalizer(&self) -> Box<dyn EventNormalizer>;

    /// Whether text needs the duplicate/replay filter.
    fn dedups_text(&self) -> bool {
        false
    }

    fn error_hints(&self) -> ErrorHints;

    fn classify_failure(&self, failure: &ProcessFailure) -> ProviderError {
        error::classify_failure(failure, &self.error_hints())
    }

    /// Model string the CLI expects for a public model id.
    fn cli_model(&self, model: &str) -> String {
        let models = self.models();
        let query = model.trim().to_lowercase();
        if query.is_empty() {
            return models
                .iter()
                .find(|m| m.default)
                .or_else(|| models.first())
                .map(|m| m.model_string.clone())
                .unwrap_or_default();
        }
        if let Some(found) = models.iter().find(|m| m.matches(&query, self.vendor_prefix())) {
            return found.model_string.clone();
        }
        match self.vendor_prefix() {
            Some(prefix) if query.starts_with(prefix) => {
                model.trim().get(prefix.len()..).unwrap_or_default().to_string()
            }
            _ => model.trim().to_string(),
        }
    }
}

/// Log-and-skip deserialization of one raw event into a backend's event enum.
pub(crate) fn parse_event<T: DeserializeOwned>(backend: &str, event: Value) -> Option<T> {
    let kind = event
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("<missing>")
        .to_string();
    match serde_json::from_value(event) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            warn!(backend, kind = %kind, error = %e, "Skipping unparseable backend event");
            None
        }
    }
}

/// normalize -> dedup -> session backfill, for one execution.
pub struct MessagePipeline {
    normalizer: Box<dyn EventNormalizer>,
    ctx: ExecutionContext,
    dedup: Option<TextDedup>,
}

impl MessagePipeline {
    pub fn new(normalizer: Box<dyn EventNormalizer>, dedup_text: bool) -> Self {
        Self {
            normalizer,
            ctx: ExecutionContext::new(),
            dedup: dedup_text.then(TextDedup::new),
        }
    }

    /// Feed one raw event; returns the messages ready to yield, in order.
    pub fn push(&mut self, event: Value) -> Vec<ProviderMessage> {
        let Some(message) = self.normalizer.normalize(event, &mut self.ctx) else {
            // An init event may have just supplied the session id.
            return self.ctx.release_held();
        };
        let message = match self.dedup.as_mut() {
            Some(dedup) => match dedup.filter(message) {
                Some(m) => m,
                None => return Vec::new(),
            },
            None => message,
        };
        self.ctx.release(message)
    }

    /// Messages still held at stream end.
    pub fn finish(&mut self) -> Vec<ProviderMessage> {
        self.ctx.flush()
    }
}

/// Run `options` on `provider` and stream normalized messages.
pub fn execute(provider: Arc<dyn Provider>, options: ExecuteOptions) -> ProviderStream {
    Box::pin(stream! {
        let Some(location) = provider.detector().locate().await else {
            warn!(provider = provider.name(), "Backend CLI not found");
            yield Err(ProviderError::not_installed(&provider.error_hints()));
            return;
        };

        let workdir = options.workdir();
        let args = provider.build_args(&options, &location.translate_path(&workdir));
        let invocation = Invocation {
            location,
            args,
            cwd: Some(workdir),
            env: provider.extra_env(),
            stdin: Some(provider.stdin_payload(&options)),
        };
        info!(
            provider = provider.name(),
            model = %options.model,
            read_only = options.read_only,
            "Starting execution"
        );

        let cancel = options.cancel.clone();
        let mut pipeline = MessagePipeline::new(provider.normalizer(), provider.dedups_text());
        let mut raw = process::spawn_jsonl(invocation, cancel.clone());

        while let Some(item) = raw.next().await {
            match item {
                Ok(event) => {
                    for message in pipeline.push(event) {
                        yield Ok(message);
                    }
                }
                Err(failure) => {
                    if cancel.is_cancelled() {
                        return;
                    }
                    for message in pipeline.finish() {
                        yield Ok(message);
                    }
                    let err = provider.classify_failure(&failure);
                    warn!(provider = provider.name(), code = %err.code, error = %err.message, "Execution failed");
                    yield Err(err);
                    return;
                }
            }
        }

        if cancel.is_cancelled() {
            debug!(provider = provider.name(), "Execution cancelled");
            return;
        }
        for message in pipeline.finish() {
            yield Ok(message);
        }
        debug!(provider = provider.name(), "Execution finished");
    })
}
