//! OpenCode backend (`opencode run`).

pub mod events;

use tracing::warn;

use crate::backend::discovery::{CliSpec, CredentialFile, Detector, DiscoveryEnv, Platform};
use crate::backend::error::ErrorHints;
use crate::backend::models::{ModelDefinition, ModelTier};
use crate::backend::{EventNormalizer, ExecuteOptions, Provider, ProviderSettings};

use events::OpenCodeNormalizer;

pub const NAME: &str = "opencode";

pub fn can_handle_model(model: &str) -> bool {
    model.starts_with("opencode-") || model.starts_with("opencode/")
}

pub struct OpenCodeProvider {
    detector: Detector,
}

impl OpenCodeProvider {
    pub fn new(settings: ProviderSettings) -> Self {
        let spec = cli_spec(&settings.discovery, settings.cli_path);
        Self {
            detector: Detector::new(spec, settings.discovery),
        }
    }
}

fn cli_spec(env: &DiscoveryEnv, cli_path: Option<std::path::PathBuf>) -> CliSpec {
    let home = &env.home;
    let mut spec = CliSpec::new("opencode");
    spec.path_override = cli_path;
    spec.common_paths = match env.platform {
        Platform::Windows => vec![home.join("AppData/Roaming/npm/opencode.cmd")],
        _ => vec![
            home.join(".opencode/bin/opencode"),
            home.join(".local/bin/opencode"),
            "/usr/local/bin/opencode".into(),
            "/opt/homebrew/bin/opencode".into(),
        ],
    };
    spec.api_key_vars = vec!["OPENCODE_API_KEY"];
    spec.credential_files = vec![CredentialFile {
        path: home.join(".local/share/opencode/auth.json"),
        token_paths: vec!["*/key", "*/access"],
    }];
    spec.self_check_args = vec!["auth", "list"];
    spec
}

impl Provider for OpenCodeProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn display_name(&self) -> &'static str {
        "OpenCode"
    }

    fn models(&self) -> Vec<ModelDefinition> {
        vec![
            ModelDefinition::new(
                NAME,
                "opencode-big-pickle",
                "Big Pickle",
                "opencode/big-pickle",
                ModelTier::Basic,
            )
            .as_default(),
            ModelDefinition::new(
                NAME,
                "opencode-grok-code",
                "Grok Code Fast",
                "opencode/grok-code",
                ModelTier::Basic,
            ),
            ModelDefinition::new(
                NAME,
                "opencode-gpt-5-nano",
                "GPT-5 Nano",
                "opencode/gpt-5-nano",
                ModelTier::Basic,
            ),
        ]
    }

    fn vendor_prefix(&self) -> Option<&'static str> {
        Some("opencode-")
    }

    fn detector(&self) -> &Detector {
        &self.detector
    }

    /// OpenCode wants `provider/model`; `opencode-x` maps to `opencode/x`.
    fn cli_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let query = trimmed.to_lowercase();
        let models = self.models();
        if let Some(found) = models.iter().find(|m| m.matches(&query, self.vendor_prefix())) {
            return found.model_string.clone();
        }
        if query.is_empty() {
            return models
                .iter()
                .find(|m| m.default)
                .map(|m| m.model_string.clone())
                .unwrap_or_default();
        }
        match trimmed.get(..9) {
            Some(prefix) if prefix.eq_ignore_ascii_case("opencode-") => {
                format!("opencode/{}", &trimmed[9..])
            }
            _ => trimmed.to_string(),
        }
    }

    fn build_args(&self, options: &ExecuteOptions, _workdir: &str) -> Vec<String> {
        if !options.mcp_servers.is_empty() {
            warn!(
                servers = ?options.mcp_servers.keys().collect::<Vec<_>>(),
                "opencode reads MCP servers from its own config; ignoring them"
            );
        }
        let mut args: Vec<String> = ["run", "--format", "json", "--model"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.push(self.cli_model(&options.model));
        // The built-in plan agent has edit and bash tools disabled.
        if options.read_only {
            args.push("--agent".to_string());
            args.push("plan".to_string());
        }
        args.push("-".to_string());
        args
    }

    fn normalizer(&self) -> Box<dyn EventNormalizer> {
        Box::new(OpenCodeNormalizer::new())
    }

    fn error_hints(&self) -> ErrorHints {
        ErrorHints {
            display_name: "OpenCode".to_string(),
            install_hint: "Install it with `npm install -g opencode-ai`".to_string(),
            login_hint: "Run `opencode auth login`".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn provider() -> OpenCodeProvider {
        OpenCodeProvider::new(ProviderSettings {
            discovery: DiscoveryEnv {
                platform: Platform::Linux,
                path_var: None,
                home: "/nonexistent-home".into(),
                env_vars: HashMap::new(),
                wsl: None,
                probe_timeout: Duration::from_secs(1),
            },
            cli_path: None,
        })
    }

    #[test]
    fn test_model_rewrites() {
        let p = provider();
        assert_eq!(p.cli_model("opencode-big-pickle"), "opencode/big-pickle");
        assert_eq!(p.cli_model("opencode-qwen3-coder"), "opencode/qwen3-coder");
        assert_eq!(p.cli_model("opencode/grok-code"), "opencode/grok-code");
        assert_eq!(p.cli_model(""), "opencode/big-pickle");
    }

    #[test]
    fn test_read_only_selects_plan_agent() {
        let mut options = ExecuteOptions::new("opencode-grok-code", "hi");
        options.read_only = true;
        assert_eq!(
            provider().build_args(&options, "/repo"),
            vec![
                "run",
                "--format",
                "json",
                "--model",
                "opencode/grok-code",
                "--agent",
                "plan",
                "-"
            ]
        );
    }
}
