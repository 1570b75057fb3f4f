//! CLI execution layer.
//!
//! Spawns backend executables according to how they were discovered:
//! - Native executables run directly on the host
//! - Executables found inside WSL run through `wsl.exe --exec`, with paths
//!   translated into the WSL filesystem namespace
//!
//! Every spawn goes through [`CliLocation::command`], the only place that
//! branches on the strategy. Arguments are passed as argv, never through a shell.

use std::path::Path;
use std::process::Stdio;

use serde::Serialize;
use tokio::process::Command;

/// How a discovered executable must be launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecStrategy {
    Native,
    /// Run inside Windows Subsystem for Linux. `None` uses the default distribution.
    Wsl { distribution: Option<String> },
}

/// How an installation was found, as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallMethod {
    Native,
    Wsl,
}

/// A resolved backend executable plus the strategy needed to run it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliLocation {
    /// Path in the namespace of the strategy (host path, or a path inside WSL).
    pub path: String,
    pub strategy: ExecStrategy,
}

impl CliLocation {
    pub fn native(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_string_lossy().to_string(),
            strategy: ExecStrategy::Native,
        }
    }

    pub fn wsl(path: impl Into<String>, distribution: Option<String>) -> Self {
        Self {
            path: path.into(),
            strategy: ExecStrategy::Wsl { distribution },
        }
    }

    pub fn method(&self) -> InstallMethod {
        match self.strategy {
            ExecStrategy::Native => InstallMethod::Native,
            ExecStrategy::Wsl { .. } => InstallMethod::Wsl,
        }
    }

    /// Path as shown to users; marks WSL indirection.
    pub fn display_path(&self) -> String {
        match &self.strategy {
            ExecStrategy::Native => self.path.clone(),
            ExecStrategy::Wsl {
                distribution: Some(distro),
            } => format!("{} (WSL: {})", self.path, distro),
            ExecStrategy::Wsl { distribution: None } => format!("{} (WSL)", self.path),
        }
    }

    /// Translate a host path into the namespace the executable sees.
    pub fn translate_path(&self, path: &Path) -> String {
        match self.strategy {
            ExecStrategy::Native => path.to_string_lossy().to_string(),
            ExecStrategy::Wsl { .. } => windows_to_wsl_path(&path.to_string_lossy()),
        }
    }

    /// Build the command for this executable. Stdio is left to the caller
    /// except stdin, which defaults to null.
    pub fn command(&self, cwd: Option<&Path>, args: &[String], env: &[(String, String)]) -> Command {
        let mut cmd = match &self.strategy {
            ExecStrategy::Native => {
                let mut cmd = Command::new(&self.path);
                if let Some(cwd) = cwd {
                    cmd.current_dir(cwd);
                }
                cmd.args(args);
                cmd
            }
            ExecStrategy::Wsl { distribution } => {
                let mut cmd = Command::new("wsl.exe");
                if let Some(distro) = distribution {
                    cmd.arg("-d").arg(distro);
                }
                if let Some(cwd) = cwd {
                    cmd.arg("--cd").arg(self.translate_path(cwd));
                }
                cmd.arg("--exec").arg(&self.path);
                cmd.args(args);
                // Host env vars only cross into WSL when listed in WSLENV.
                if !env.is_empty() {
                    cmd.env("WSLENV", merge_wslenv(std::env::var("WSLENV").ok(), env));
                }
                cmd
            }
        };
        cmd.envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);
        cmd
    }
}

/// Command that runs `program args...` inside WSL, for probes that have no location yet.
pub fn wsl_probe_command(distribution: Option<&str>, program: &str, args: &[&str]) -> Command {
    let mut cmd = Command::new("wsl.exe");
    if let Some(distro) = distribution {
        cmd.arg("-d").arg(distro);
    }
    cmd.arg("--exec").arg(program).args(args);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd.kill_on_drop(true);
    cmd
}

fn merge_wslenv(existing: Option<String>, env: &[(String, String)]) -> String {
    let mut names: Vec<String> = existing
        .unwrap_or_default()
        .split(':')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    for (key, _) in env {
        if !key.trim().is_empty() && !names.iter().any(|n| n.split('/').next() == Some(key.as_str())) {
            names.push(key.clone());
        }
    }
    names.join(":")
}

/// `C:\Users\me\repo` -> `/mnt/c/Users/me/repo`. Non-drive paths only get slashes normalized.
pub fn windows_to_wsl_path(path: &str) -> String {
    let normalized = path.replace('\\', "/");
    let bytes = normalized.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        let drive = (bytes[0] as char).to_ascii_lowercase();
        let rest = normalized[2..].trim_start_matches('/');
        if rest.is_empty() {
            format!("/mnt/{}", drive)
        } else {
            format!("/mnt/{}/{}", drive, rest)
        }
    } else {
        normalized
    }
}
