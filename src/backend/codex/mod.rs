//! OpenAI Codex backend (`codex exec`).

pub mod events;

use tracing::warn;

use crate::backend::discovery::{CliSpec, CredentialFile, Detector, DiscoveryEnv, Platform};
use crate::backend::error::ErrorHints;
use crate::backend::models::{ModelDefinition, ModelTier};
use crate::backend::{EventNormalizer, ExecuteOptions, McpServerConfig, Provider, ProviderSettings};

use events::CodexNormalizer;

pub const NAME: &str = "codex";

pub fn can_handle_model(model: &str) -> bool {
    if model.starts_with("codex-") || model.starts_with("gpt-") {
        return true;
    }
    // o-series reasoning models: o1, o3-mini, o4-mini ...
    let mut chars = model.chars();
    chars.next() == Some('o') && chars.next().is_some_and(|c| c.is_ascii_digit())
}

pub struct CodexProvider {
    detector: Detector,
}

impl CodexProvider {
    pub fn new(settings: ProviderSettings) -> Self {
        let spec = cli_spec(&settings.discovery, settings.cli_path);
        Self {
            detector: Detector::new(spec, settings.discovery),
        }
    }
}

fn cli_spec(env: &DiscoveryEnv, cli_path: Option<std::path::PathBuf>) -> CliSpec {
    let home = &env.home;
    let mut spec = CliSpec::new("codex");
    spec.path_override = cli_path;
    spec.common_paths = match env.platform {
        Platform::Windows => vec![home.join("AppData/Roaming/npm/codex.cmd")],
        _ => vec![
            home.join(".local/bin/codex"),
            home.join(".npm-global/bin/codex"),
            "/usr/local/bin/codex".into(),
            "/opt/homebrew/bin/codex".into(),
        ],
    };
    spec.api_key_vars = vec!["OPENAI_API_KEY"];
    spec.credential_files = vec![CredentialFile {
        path: home.join(".codex/auth.json"),
        token_paths: vec!["OPENAI_API_KEY", "tokens/access_token"],
    }];
    spec.self_check_args = vec!["login", "status"];
    spec
}

/// `-c key=value` overrides registering stdio MCP servers. Values are TOML;
/// JSON strings and string arrays are valid TOML.
fn mcp_overrides(name: &str, server: &McpServerConfig) -> Option<Vec<String>> {
    match server {
        McpServerConfig::Stdio { command, args, env } => {
            let mut out = vec![
                "-c".to_string(),
                format!("mcp_servers.{}.command={}", name, serde_json::to_string(command).ok()?),
                "-c".to_string(),
                format!("mcp_servers.{}.args={}", name, serde_json::to_string(args).ok()?),
            ];
            for (key, value) in env {
                out.push("-c".to_string());
                out.push(format!(
                    "mcp_servers.{}.env.{}={}",
                    name,
                    key,
                    serde_json::to_string(value).ok()?
                ));
            }
            Some(out)
        }
        McpServerConfig::Http { .. } => None,
    }
}

impl Provider for CodexProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn display_name(&self) -> &'static str {
        "Codex"
    }

    fn models(&self) -> Vec<ModelDefinition> {
        vec![
            ModelDefinition::new(
                NAME,
                "codex-gpt-5.1-codex",
                "GPT-5.1 Codex",
                "gpt-5.1-codex",
                ModelTier::Premium,
            )
            .vision()
            .as_default(),
            ModelDefinition::new(
                NAME,
                "codex-gpt-5.1-codex-mini",
                "GPT-5.1 Codex Mini",
                "gpt-5.1-codex-mini",
                ModelTier::Basic,
            )
            .vision(),
            ModelDefinition::new(NAME, "codex-gpt-5.1", "GPT-5.1", "gpt-5.1", ModelTier::Standard)
                .vision(),
        ]
    }

    fn vendor_prefix(&self) -> Option<&'static str> {
        Some("codex-")
    }

    fn detector(&self) -> &Detector {
        &self.detector
    }

    fn build_args(&self, options: &ExecuteOptions, workdir: &str) -> Vec<String> {
        let mut args: Vec<String> = ["exec", "--json", "--skip-git-repo-check", "-C"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.push(workdir.to_string());
        args.push("--model".to_string());
        args.push(self.cli_model(&options.model));
        args.push("--sandbox".to_string());
        args.push(
            if options.read_only {
                "read-only"
            } else {
                "workspace-write"
            }
            .to_string(),
        );

        for (name, server) in &options.mcp_servers {
            match mcp_overrides(name, server) {
                Some(overrides) => args.extend(overrides),
                None => warn!(server = %name, "Codex only loads stdio MCP servers; ignoring"),
            }
        }

        args.push("-".to_string());
        args
    }

    fn normalizer(&self) -> Box<dyn EventNormalizer> {
        Box::new(CodexNormalizer::new())
    }

    fn error_hints(&self) -> ErrorHints {
        ErrorHints {
            display_name: "Codex".to_string(),
            install_hint: "Install it with `npm install -g @openai/codex`".to_string(),
            login_hint: "Run `codex login` or set OPENAI_API_KEY".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashMap};
    use std::time::Duration;

    fn provider() -> CodexProvider {
        CodexProvider::new(ProviderSettings {
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
    fn test_routing_predicate() {
        assert!(can_handle_model("gpt-5"));
        assert!(can_handle_model("o3-mini"));
        assert!(can_handle_model("codex-gpt-5.1"));
        assert!(!can_handle_model("opus-4.1"));
        assert!(!can_handle_model("opencode-big-pickle"));
    }

    #[test]
    fn test_read_only_uses_read_only_sandbox() {
        let mut options = ExecuteOptions::new("codex-gpt-5.1-codex-mini", "hi");
        options.read_only = true;
        let args = provider().build_args(&options, "/repo");
        assert_eq!(
            args,
            vec![
                "exec",
                "--json",
                "--skip-git-repo-check",
                "-C",
                "/repo",
                "--model",
                "gpt-5.1-codex-mini",
                "--sandbox",
                "read-only",
                "-"
            ]
        );
    }

    #[test]
    fn test_stdio_mcp_servers_become_config_overrides() {
        let mut options = ExecuteOptions::new("gpt-5", "hi");
        options.mcp_servers = BTreeMap::from([
            (
                "fs".to_string(),
                McpServerConfig::Stdio {
                    command: "mcp-fs".to_string(),
                    args: vec!["--root".to_string(), "/tmp".to_string()],
                    env: BTreeMap::new(),
                },
            ),
            (
                "remote".to_string(),
                McpServerConfig::Http {
                    url: "http://localhost:9000".to_string(),
                    headers: BTreeMap::new(),
                },
            ),
        ]);
        let args = provider().build_args(&options, "/repo");
        assert!(args.contains(&"mcp_servers.fs.command=\"mcp-fs\"".to_string()));
        assert!(args.contains(&"mcp_servers.fs.args=[\"--root\",\"/tmp\"]".to_string()));
        assert!(!args.iter().any(|a| a.contains("remote")));
        assert_eq!(args.last().map(String::as_str), Some("-"));
        // Unlisted model ids pass through untouched.
        assert!(args.contains(&"gpt-5".to_string()));
    }
}
