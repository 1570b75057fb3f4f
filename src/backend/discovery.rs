//! Backend executable discovery and authentication checks.
//!
//! Discovery never fails: every filesystem or process probe degrades to
//! "not found". The resolved location is computed lazily once per backend
//! instance and reused; authentication is re-checked on every status query.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::exec::{wsl_probe_command, CliLocation, InstallMethod};

/// Host operating system family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    MacOs,
    Windows,
}

impl Platform {
    pub fn current() -> Self {
        match std::env::consts::OS {
            "windows" => Platform::Windows,
            "macos" => Platform::MacOs,
            _ => Platform::Linux,
        }
    }

    /// Candidate file names for `binary` on this platform.
    fn executable_names(&self, binary: &str) -> Vec<String> {
        match self {
            Platform::Windows => vec![
                format!("{}.exe", binary),
                format!("{}.cmd", binary),
                binary.to_string(),
            ],
            _ => vec![binary.to_string()],
        }
    }

    fn path_separator(&self) -> char {
        match self {
            Platform::Windows => ';',
            _ => ':',
        }
    }
}

/// Compatibility layer settings (WSL on Windows hosts).
#[derive(Debug, Clone, Default)]
pub struct WslConfig {
    pub distribution: Option<String>,
}

/// Snapshot of everything discovery reads from the host.
#[derive(Debug, Clone)]
pub struct DiscoveryEnv {
    pub platform: Platform,
    pub path_var: Option<OsString>,
    pub home: PathBuf,
    pub env_vars: HashMap<String, String>,
    /// Compatibility layer, when configured.
    pub wsl: Option<WslConfig>,
    pub probe_timeout: Duration,
}

impl DiscoveryEnv {
    /// Capture the current process environment.
    pub fn from_process(wsl: Option<WslConfig>, probe_timeout: Duration) -> Self {
        Self {
            platform: Platform::current(),
            path_var: std::env::var_os("PATH"),
            home: PathBuf::from(crate::util::home_dir()),
            env_vars: std::env::vars().collect(),
            wsl,
            probe_timeout,
        }
    }

    pub fn var(&self, name: &str) -> Option<&str> {
        self.env_vars
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// A JSON credential file and the token fields that prove a login.
///
/// Token paths are `/`-separated keys; `*` matches any key of an object.
#[derive(Debug, Clone)]
pub struct CredentialFile {
    pub path: PathBuf,
    pub token_paths: Vec<&'static str>,
}

/// Static description of how to find and verify one backend CLI.
#[derive(Debug, Clone)]
pub struct CliSpec {
    pub binary: &'static str,
    /// Explicit executable path configured by the operator.
    pub path_override: Option<PathBuf>,
    /// Host install locations probed after PATH.
    pub common_paths: Vec<PathBuf>,
    /// Install locations inside the compatibility layer, relative to its `$HOME`
    /// when not absolute.
    pub layer_common_paths: Vec<&'static str>,
    /// Directory holding `<version>/<binary>` folders, relative to home.
    pub versions_dir: Option<&'static str>,
    pub native_on_windows: bool,
    pub api_key_vars: Vec<&'static str>,
    pub credential_files: Vec<CredentialFile>,
    pub self_check_args: Vec<&'static str>,
    /// Lowercase phrases in self-check output meaning "logged out".
    pub unauthenticated_markers: Vec<&'static str>,
}

impl CliSpec {
    pub fn new(binary: &'static str) -> Self {
        Self {
            binary,
            path_override: None,
            common_paths: Vec::new(),
            layer_common_paths: Vec::new(),
            versions_dir: None,
            native_on_windows: true,
            api_key_vars: Vec::new(),
            credential_files: Vec::new(),
            self_check_args: Vec::new(),
            unauthenticated_markers: vec!["not authenticated", "not logged in", "unauthorized"],
        }
    }
}

/// Point-in-time installation snapshot. Re-query rather than caching it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InstallationStatus {
    pub installed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<InstallMethod>,
    pub has_api_key: bool,
    pub authenticated: bool,
}

impl InstallationStatus {
    pub fn not_installed() -> Self {
        Self::default()
    }
}

struct ProbeOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

/// Locates one backend's executable and checks its authentication.
pub struct Detector {
    spec: CliSpec,
    env: DiscoveryEnv,
    location: OnceCell<Option<CliLocation>>,
}

impl Detector {
    pub fn new(spec: CliSpec, env: DiscoveryEnv) -> Self {
        Self {
            spec,
            env,
            location: OnceCell::new(),
        }
    }

    pub fn spec(&self) -> &CliSpec {
        &self.spec
    }

    pub fn env(&self) -> &DiscoveryEnv {
        &self.env
    }

    /// Resolved executable, discovered on first use.
    pub async fn locate(&self) -> Option<CliLocation> {
        self.location
            .get_or_init(|| self.discover())
            .await
            .clone()
    }

    /// Full installation and authentication snapshot.
    pub async fn status(&self) -> InstallationStatus {
        let location = self.locate().await;
        let has_api_key = self.has_api_key();
        let version = match &location {
            Some(loc) => self.version(loc).await,
            None => None,
        };
        let authenticated = self.is_authenticated(location.as_ref(), has_api_key).await;

        InstallationStatus {
            installed: location.is_some(),
            version,
            path: location.as_ref().map(CliLocation::display_path),
            method: location.as_ref().map(CliLocation::method),
            has_api_key,
            authenticated,
        }
    }

    async fn discover(&self) -> Option<CliLocation> {
        if let Some(path) = &self.spec.path_override {
            if tokio::fs::metadata(path).await.is_ok_and(|m| m.is_file()) {
                debug!(binary = self.spec.binary, path = %path.display(), "Using configured CLI path");
                return Some(CliLocation::native(path));
            }
            warn!(
                binary = self.spec.binary,
                path = %path.display(),
                "Configured CLI path does not exist, falling back to discovery"
            );
        }

        let needs_layer = self.env.platform == Platform::Windows && !self.spec.native_on_windows;
        let found = if needs_layer {
            match &self.env.wsl {
                Some(wsl) => self.discover_in_wsl(wsl).await,
                None => {
                    debug!(
                        binary = self.spec.binary,
                        "No native Windows build and WSL is not configured"
                    );
                    None
                }
            }
        } else {
            let native = match self.find_on_path().await {
                Some(path) => Some(path),
                None => match self.find_in_common_paths().await {
                    Some(path) => Some(path),
                    None => self.find_in_versions_dir().await,
                },
            };
            native.map(CliLocation::native)
        };

        match &found {
            Some(loc) => debug!(binary = self.spec.binary, path = %loc.display_path(), "CLI found"),
            None => debug!(binary = self.spec.binary, "CLI not found"),
        }
        found
    }

    async fn find_on_path(&self) -> Option<PathBuf> {
        let path_var = self.env.path_var.as_ref()?.to_string_lossy().to_string();
        let names = self.env.platform.executable_names(self.spec.binary);
        let candidates = path_var
            .split(self.env.platform.path_separator())
            .filter(|dir| !dir.is_empty())
            .flat_map(|dir| names.iter().map(move |name| Path::new(dir).join(name)))
            .collect::<Vec<PathBuf>>();
        first_executable(candidates).await
    }

    async fn find_in_common_paths(&self) -> Option<PathBuf> {
        first_executable(self.spec.common_paths.iter().cloned()).await
    }

    /// Newest `<versions_dir>/<version>/<binary>`, compared lexicographically.
    async fn find_in_versions_dir(&self) -> Option<PathBuf> {
        let dir = self.env.home.join(self.spec.versions_dir?);
        let mut entries = tokio::fs::read_dir(&dir).await.ok()?;
        let mut versions = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let is_dir = entry.file_type().await.is_ok_and(|t| t.is_dir());
            if let (true, Some(name)) = (is_dir, entry.file_name().to_str()) {
                versions.push(name.to_string());
            }
        }
        versions.sort();
        for version in versions.into_iter().rev() {
            let candidates = self
                .env
                .platform
                .executable_names(self.spec.binary)
                .into_iter()
                .map(|name| dir.join(&version).join(name));
            if let Some(found) = first_executable(candidates).await {
                return Some(found);
            }
        }
        None
    }

    async fn discover_in_wsl(&self, wsl: &WslConfig) -> Option<CliLocation> {
        let distro = wsl.distribution.as_deref();
        let binary = self.spec.binary;
        let to_location = |path: String| CliLocation::wsl(path, wsl.distribution.clone());

        // Login shell so the distro's profile PATH applies; the binary name is a constant.
        let lookup = format!("command -v {}", binary);
        if let Some(out) = self
            .probe(wsl_probe_command(distro, "sh", &["-lc", &lookup]))
            .await
        {
            let path = out.stdout.lines().next().unwrap_or("").trim().to_string();
            if out.success && path.starts_with('/') {
                return Some(to_location(path));
            }
        }

        let layer_home = self
            .probe(wsl_probe_command(distro, "sh", &["-c", "printf %s \"$HOME\""]))
            .await
            .filter(|o| o.success)
            .map(|o| o.stdout.trim().to_string())
            .filter(|h| !h.is_empty())?;

        for candidate in &self.spec.layer_common_paths {
            let path = if candidate.starts_with('/') {
                candidate.to_string()
            } else {
                format!("{}/{}", layer_home, candidate)
            };
            if self.wsl_is_executable(distro, &path).await {
                return Some(to_location(path));
            }
        }

        let versions_dir = format!("{}/{}", layer_home, self.spec.versions_dir?);
        let listing = self
            .probe(wsl_probe_command(distro, "ls", &["-1", &versions_dir]))
            .await
            .filter(|o| o.success)?;
        let mut versions: Vec<&str> = listing
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        versions.sort();
        for version in versions.into_iter().rev() {
            let path = format!("{}/{}/{}", versions_dir, version, binary);
            if self.wsl_is_executable(distro, &path).await {
                return Some(to_location(path));
            }
        }
        None
    }

    async fn wsl_is_executable(&self, distro: Option<&str>, path: &str) -> bool {
        self.probe(wsl_probe_command(distro, "test", &["-x", path]))
            .await
            .map(|o| o.success)
            .unwrap_or(false)
    }

    fn has_api_key(&self) -> bool {
        self.spec
            .api_key_vars
            .iter()
            .any(|name| self.env.var(name).is_some())
    }

    async fn is_authenticated(&self, location: Option<&CliLocation>, has_api_key: bool) -> bool {
        if has_api_key {
            return true;
        }
        for file in &self.spec.credential_files {
            if credential_file_has_token(file).await {
                debug!(path = %file.path.display(), "Found CLI credentials");
                return true;
            }
        }
        let Some(location) = location else {
            return false;
        };
        if self.spec.self_check_args.is_empty() {
            return false;
        }

        let args: Vec<String> = self.spec.self_check_args.iter().map(|s| s.to_string()).collect();
        let Some(out) = self.run_cli(location, &args).await else {
            return false;
        };
        let combined = format!("{}\n{}", out.stdout, out.stderr).to_lowercase();
        let logged_out = self
            .spec
            .unauthenticated_markers
            .iter()
            .any(|marker| combined.contains(marker));
        out.success && !logged_out
    }

    async fn version(&self, location: &CliLocation) -> Option<String> {
        let out = self.run_cli(location, &["--version".to_string()]).await?;
        if !out.success {
            return None;
        }
        parse_version(&out.stdout).or_else(|| parse_version(&out.stderr))
    }

    async fn run_cli(&self, location: &CliLocation, args: &[String]) -> Option<ProbeOutput> {
        let mut cmd = location.command(None, args, &[]);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        self.probe(cmd).await
    }

    /// Run a short-lived probe with the configured timeout. Any failure is `None`.
    async fn probe(&self, mut cmd: Command) -> Option<ProbeOutput> {
        match tokio::time::timeout(self.env.probe_timeout, cmd.output()).await {
            Ok(Ok(output)) => Some(ProbeOutput {
                success: output.status.success(),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            }),
            Ok(Err(e)) => {
                debug!(binary = self.spec.binary, error = %e, "Probe failed to run");
                None
            }
            Err(_) => {
                warn!(
                    binary = self.spec.binary,
                    timeout_secs = self.env.probe_timeout.as_secs(),
                    "Probe timed out"
                );
                None
            }
        }
    }
}

async fn first_executable(candidates: impl IntoIterator<Item = PathBuf>) -> Option<PathBuf> {
    for candidate in candidates {
        if is_executable(&candidate).await {
            return Some(candidate);
        }
    }
    None
}

async fn is_executable(path: &Path) -> bool {
    let Ok(meta) = tokio::fs::metadata(path).await else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

async fn credential_file_has_token(file: &CredentialFile) -> bool {
    let Ok(contents) = tokio::fs::read_to_string(&file.path).await else {
        return false;
    };
    let value: Value = match serde_json::from_str(&contents) {
        Ok(v) => v,
        Err(e) => {
            debug!(path = %file.path.display(), error = %e, "Credential file is not valid JSON");
            return false;
        }
    };
    file.token_paths
        .iter()
        .any(|path| has_token_at(&value, &path.split('/').filter(|s| !s.is_empty()).collect::<Vec<_>>()))
}

fn has_token_at(value: &Value, segments: &[&str]) -> bool {
    match segments.split_first() {
        None => value.as_str().is_some_and(|s| !s.trim().is_empty()),
        Some((&"*", rest)) => value
            .as_object()
            .is_some_and(|obj| obj.values().any(|v| has_token_at(v, rest))),
        Some((key, rest)) => value.get(*key).is_some_and(|v| has_token_at(v, rest)),
    }
}

static VERSION_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn parse_version(output: &str) -> Option<String> {
    let re = VERSION_RE
        .get_or_init(|| Regex::new(r"\d+\.\d+(?:\.\d+)?(?:-[0-9A-Za-z.]+)?").ok())
        .as_ref()?;
    re.find(output).map(|m| m.as_str().to_string())
}
