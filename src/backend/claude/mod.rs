//! Claude Code backend (`claude` CLI).

pub mod events;

use serde_json::json;
use tracing::{debug, warn};

use crate::backend::discovery::{CliSpec, CredentialFile, Detector, DiscoveryEnv, Platform};
use crate::backend::error::ErrorHints;
use crate::backend::models::{ModelDefinition, ModelTier};
use crate::backend::{EventNormalizer, ExecuteOptions, Provider, ProviderSettings};

use events::ClaudeNormalizer;

pub const NAME: &str = "claude";

/// Routing predicate over a lowercased model id.
pub fn can_handle_model(model: &str) -> bool {
    model.starts_with("claude-")
        || model.starts_with("anthropic/")
        || ["sonnet", "opus", "haiku"].iter().any(|m| model.contains(m))
}

pub struct ClaudeProvider {
    detector: Detector,
}

impl ClaudeProvider {
    pub fn new(settings: ProviderSettings) -> Self {
        let spec = cli_spec(&settings.discovery, settings.cli_path);
        Self {
            detector: Detector::new(spec, settings.discovery),
        }
    }
}

fn cli_spec(env: &DiscoveryEnv, cli_path: Option<std::path::PathBuf>) -> CliSpec {
    let home = &env.home;
    let mut spec = CliSpec::new("claude");
    spec.path_override = cli_path;
    spec.common_paths = match env.platform {
        Platform::Windows => vec![
            home.join("AppData/Roaming/npm/claude.cmd"),
            home.join(".local/bin/claude.exe"),
        ],
        _ => vec![
            home.join(".claude/local/claude"),
            home.join(".local/bin/claude"),
            home.join(".npm-global/bin/claude"),
            "/usr/local/bin/claude".into(),
            "/opt/homebrew/bin/claude".into(),
        ],
    };
    spec.api_key_vars = vec!["ANTHROPIC_API_KEY", "CLAUDE_CODE_OAUTH_TOKEN"];
    spec.credential_files = vec![CredentialFile {
        path: home.join(".claude/.credentials.json"),
        token_paths: vec!["claudeAiOauth/accessToken"],
    }];
    spec.self_check_args = vec!["--version"];
    spec
}

impl Provider for ClaudeProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn display_name(&self) -> &'static str {
        "Claude Code"
    }

    fn models(&self) -> Vec<ModelDefinition> {
        vec![
            ModelDefinition::new(
                NAME,
                "claude-sonnet-4-5",
                "Claude Sonnet 4.5",
                "claude-sonnet-4-5-20250929",
                ModelTier::Standard,
            )
            .vision()
            .as_default(),
            ModelDefinition::new(
                NAME,
                "claude-opus-4-1",
                "Claude Opus 4.1",
                "claude-opus-4-1-20250805",
                ModelTier::Premium,
            )
            .vision(),
            ModelDefinition::new(
                NAME,
                "claude-haiku-4-5",
                "Claude Haiku 4.5",
                "claude-haiku-4-5-20251001",
                ModelTier::Basic,
            )
            .vision(),
        ]
    }

    fn vendor_prefix(&self) -> Option<&'static str> {
        Some("anthropic/")
    }

    fn detector(&self) -> &Detector {
        &self.detector
    }

    /// No trailing `-`: print mode reads stdin when no prompt argument is given,
    /// and a `-` would be taken as the prompt itself.
    fn build_args(&self, options: &ExecuteOptions, _workdir: &str) -> Vec<String> {
        let mut args: Vec<String> = ["-p", "--output-format", "stream-json", "--verbose"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        args.push("--model".to_string());
        args.push(self.cli_model(&options.model));

        // Plan mode never edits files or runs mutating tools.
        args.push("--permission-mode".to_string());
        args.push(if options.read_only { "plan" } else { "acceptEdits" }.to_string());

        if !options.mcp_servers.is_empty() {
            match serde_json::to_string(&json!({ "mcpServers": options.mcp_servers })) {
                Ok(config) => {
                    args.push("--mcp-config".to_string());
                    args.push(config);
                }
                Err(e) => warn!(error = %e, "Ignoring MCP servers that could not be serialized"),
            }
        }
        args
    }

    /// OAuth tokens (`sk-ant-oat...`) must be passed as `CLAUDE_CODE_OAUTH_TOKEN`.
    fn extra_env(&self) -> Vec<(String, String)> {
        match self.detector.env().var("ANTHROPIC_API_KEY") {
            Some(key) if key.starts_with("sk-ant-oat") => {
                debug!("Passing Anthropic OAuth token to Claude CLI");
                vec![("CLAUDE_CODE_OAUTH_TOKEN".to_string(), key.to_string())]
            }
            _ => Vec::new(),
        }
    }

    fn normalizer(&self) -> Box<dyn EventNormalizer> {
        Box::new(ClaudeNormalizer::new())
    }

    fn error_hints(&self) -> ErrorHints {
        ErrorHints {
            display_name: "Claude Code".to_string(),
            install_hint: "Install it with `npm install -g @anthropic-ai/claude-code`".to_string(),
            login_hint: "Run `claude login` or set ANTHROPIC_API_KEY".to_string(),
        }
    }
}
