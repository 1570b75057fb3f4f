//! Cursor backend (`cursor-agent` CLI).
//!
//! There is no native Windows build; on Windows hosts the CLI is discovered
//! and run inside WSL when that is configured.

pub mod events;
pub mod tools;

use tracing::warn;

use crate::backend::discovery::{CliSpec, CredentialFile, Detector, DiscoveryEnv, Platform};
use crate::backend::error::ErrorHints;
use crate::backend::models::{ModelDefinition, ModelTier};
use crate::backend::{EventNormalizer, ExecuteOptions, Provider, ProviderSettings};

use events::CursorNormalizer;

pub const NAME: &str = "cursor";

pub fn can_handle_model(model: &str) -> bool {
    model.starts_with("cursor-")
}

pub struct CursorProvider {
    detector: Detector,
}

impl CursorProvider {
    pub fn new(settings: ProviderSettings) -> Self {
        let spec = cli_spec(&settings.discovery, settings.cli_path);
        Self {
            detector: Detector::new(spec, settings.discovery),
        }
    }
}

fn cli_spec(env: &DiscoveryEnv, cli_path: Option<std::path::PathBuf>) -> CliSpec {
    let home = &env.home;
    let mut spec = CliSpec::new("cursor-agent");
    spec.path_override = cli_path;
    spec.native_on_windows = false;
    spec.common_paths = match env.platform {
        Platform::Windows => Vec::new(),
        _ => vec![
            home.join(".local/bin/cursor-agent"),
            home.join(".cursor/bin/cursor-agent"),
            "/usr/local/bin/cursor-agent".into(),
            "/opt/homebrew/bin/cursor-agent".into(),
        ],
    };
    spec.layer_common_paths = vec![".local/bin/cursor-agent", "/usr/local/bin/cursor-agent"];
    spec.versions_dir = Some(".local/share/cursor-agent/versions");
    spec.api_key_vars = vec!["CURSOR_API_KEY"];
    spec.credential_files = vec![
        CredentialFile {
            path: home.join(".cursor/cli-config.json"),
            token_paths: vec!["authInfo/accessToken"],
        },
        CredentialFile {
            path: home.join(".config/cursor/auth.json"),
            token_paths: vec!["accessToken"],
        },
    ];
    spec.self_check_args = vec!["status"];
    spec
}

impl Provider for CursorProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn display_name(&self) -> &'static str {
        "Cursor"
    }

    fn models(&self) -> Vec<ModelDefinition> {
        vec![
            ModelDefinition::new(NAME, "cursor-auto", "Auto", "auto", ModelTier::Standard)
                .as_default(),
            ModelDefinition::new(
                NAME,
                "cursor-composer-1",
                "Composer 1",
                "composer-1",
                ModelTier::Standard,
            ),
            ModelDefinition::new(
                NAME,
                "cursor-sonnet-4.5",
                "Claude Sonnet 4.5",
                "sonnet-4.5",
                ModelTier::Premium,
            )
            .vision(),
            ModelDefinition::new(
                NAME,
                "cursor-sonnet-4.5-thinking",
                "Claude Sonnet 4.5 (Thinking)",
                "sonnet-4.5-thinking",
                ModelTier::Premium,
            )
            .vision(),
            ModelDefinition::new(
                NAME,
                "cursor-opus-4.1",
                "Claude Opus 4.1",
                "opus-4.1",
                ModelTier::Premium,
            )
            .vision(),
            ModelDefinition::new(NAME, "cursor-gpt-5", "GPT-5", "gpt-5", ModelTier::Premium)
                .vision(),
            ModelDefinition::new(NAME, "cursor-grok", "Grok", "grok", ModelTier::Standard),
        ]
    }

    fn vendor_prefix(&self) -> Option<&'static str> {
        Some("cursor-")
    }

    fn detector(&self) -> &Detector {
        &self.detector
    }

    fn build_args(&self, options: &ExecuteOptions, workdir: &str) -> Vec<String> {
        if !options.mcp_servers.is_empty() {
            warn!(
                servers = ?options.mcp_servers.keys().collect::<Vec<_>>(),
                "cursor-agent cannot load MCP servers from the command line; ignoring them"
            );
        }

        let mut args: Vec<String> = [
            "-p",
            "--output-format",
            "stream-json",
            "--stream-partial-output",
            "--workspace",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.push(workdir.to_string());
        args.push("--model".to_string());
        args.push(self.cli_model(&options.model));
        // --force lets the agent write files and run commands without asking.
        if !options.read_only {
            args.push("--force".to_string());
        }
        args.push("-".to_string());
        args
    }

    /// Forwarded explicitly so WSL sees it through WSLENV.
    fn extra_env(&self) -> Vec<(String, String)> {
        self.detector
            .env()
            .var("CURSOR_API_KEY")
            .map(|key| vec![("CURSOR_API_KEY".to_string(), key.to_string())])
            .unwrap_or_default()
    }

    fn normalizer(&self) -> Box<dyn EventNormalizer> {
        Box::new(CursorNormalizer::new())
    }

    fn dedups_text(&self) -> bool {
        true
    }

    fn error_hints(&self) -> ErrorHints {
        ErrorHints {
            display_name: "Cursor".to_string(),
            install_hint: "Install it with `curl https://cursor.com/install -fsS | bash`".to_string(),
            login_hint: "Run `cursor-agent login` or set CURSOR_API_KEY".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn provider() -> CursorProvider {
        CursorProvider::new(ProviderSettings {
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
    fn test_args_end_with_stdin_sentinel() {
        let options = ExecuteOptions::new("cursor-sonnet-4.5", "`whoami`");
        let args = provider().build_args(&options, "/mnt/c/repo");
        assert_eq!(
            args,
            vec![
                "-p",
                "--output-format",
                "stream-json",
                "--stream-partial-output",
                "--workspace",
                "/mnt/c/repo",
                "--model",
                "sonnet-4.5",
                "--force",
                "-"
            ]
        );
    }

    #[test]
    fn test_read_only_drops_force_and_empty_model_uses_default() {
        let mut options = ExecuteOptions::new("", "hi");
        options.read_only = true;
        let args = provider().build_args(&options, "/repo");
        assert!(!args.contains(&"--force".to_string()));
        let idx = args.iter().position(|a| a == "--model").unwrap();
        assert_eq!(args[idx + 1], "auto");
    }

    #[test]
    fn test_unlisted_model_strips_prefix() {
        assert_eq!(provider().cli_model("cursor-gemini-2.5-pro"), "gemini-2.5-pro");
    }
}
