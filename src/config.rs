//! Configuration management for the agent bridge.
//!
//! Configuration is read from environment variables:
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `3000`.
//! - `WORKING_DIR` - Optional. Default working directory for executions. Defaults to the current directory.
//! - `DISCOVERY_TIMEOUT_SECS` - Optional. Timeout for discovery probes (`--version`, auth self-checks). Defaults to `5`.
//! - `AGENT_BRIDGE_USE_WSL` - Optional. Run backends without a native Windows build inside WSL. Defaults to `false`.
//! - `AGENT_BRIDGE_WSL_DISTRO` - Optional. WSL distribution to use. Defaults to the WSL default.
//! - `CLAUDE_CLI_PATH`, `CURSOR_CLI_PATH`, `CODEX_CLI_PATH`, `OPENCODE_CLI_PATH` - Optional.
//!   Explicit executable paths, checked before PATH.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::backend::discovery::{DiscoveryEnv, WslConfig};
use crate::backend::ProviderSettings;
use crate::util::is_truthy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Backend name -> environment variable holding its executable override.
const CLI_PATH_VARS: &[(&str, &str)] = &[
    ("claude", "CLAUDE_CLI_PATH"),
    ("cursor", "CURSOR_CLI_PATH"),
    ("codex", "CODEX_CLI_PATH"),
    ("opencode", "OPENCODE_CLI_PATH"),
];

#[derive(Debug, Clone)]
pub struct Config {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Working directory used when a request does not name one
    pub working_dir: PathBuf,

    /// Upper bound for each discovery probe
    pub discovery_timeout: Duration,

    /// WSL settings, when backends may run through it
    pub wsl: Option<WslConfig>,

    /// Per-backend executable overrides
    pub cli_paths: BTreeMap<String, PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if `PORT` or `DISCOVERY_TIMEOUT_SECS`
    /// does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| get(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let host = get("HOST").unwrap_or_else(|| "127.0.0.1".to_string());

        let port = get("PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse()
            .map_err(|e| ConfigError::InvalidValue("PORT".to_string(), format!("{}", e)))?;

        let working_dir = get("WORKING_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        let timeout_secs: u64 = get("DISCOVERY_TIMEOUT_SECS")
            .unwrap_or_else(|| "5".to_string())
            .parse()
            .map_err(|e| {
                ConfigError::InvalidValue("DISCOVERY_TIMEOUT_SECS".to_string(), format!("{}", e))
            })?;

        let wsl = get("AGENT_BRIDGE_USE_WSL")
            .is_some_and(|v| is_truthy(&v))
            .then(|| WslConfig {
                distribution: get("AGENT_BRIDGE_WSL_DISTRO"),
            });

        let cli_paths = CLI_PATH_VARS
            .iter()
            .filter_map(|(name, var)| get(var).map(|path| (name.to_string(), PathBuf::from(path))))
            .collect();

        Ok(Self {
            host,
            port,
            working_dir,
            discovery_timeout: Duration::from_secs(timeout_secs),
            wsl,
            cli_paths,
        })
    }

    /// Create a config with default values (useful for testing).
    pub fn new(working_dir: PathBuf) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            working_dir,
            discovery_timeout: Duration::from_secs(5),
            wsl: None,
            cli_paths: BTreeMap::new(),
        }
    }

    /// Snapshot of the host environment for discovery.
    pub fn discovery_env(&self) -> DiscoveryEnv {
        DiscoveryEnv::from_process(self.wsl.clone(), self.discovery_timeout)
    }

    pub fn provider_settings(&self, name: &str) -> ProviderSettings {
        ProviderSettings {
            discovery: self.discovery_env(),
            cli_path: self.cli_paths.get(name).cloned(),
        }
    }
}
