//! Provider registry: model routing and backend instance cache.
//!
//! Registrations are evaluated in descending priority; ties keep
//! registration order. The first registered backend is the baseline that
//! every unroutable model falls back to.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::discovery::InstallationStatus;
use super::models::ModelDefinition;
use super::{claude, codex, cursor, opencode};
use super::{ExecuteOptions, Provider, ProviderStream};
use crate::config::Config;

pub type ProviderFactory = Arc<dyn Fn() -> anyhow::Result<Arc<dyn Provider>> + Send + Sync>;

#[derive(Clone)]
pub struct ProviderRegistration {
    pub factory: ProviderFactory,
    /// Alternate names resolvable to this backend
    pub aliases: Vec<String>,
    /// Predicate over a lowercased model string
    pub can_handle_model: fn(&str) -> bool,
    /// Higher is checked first
    pub priority: i32,
}

impl ProviderRegistration {
    pub fn new<F>(factory: F, can_handle_model: fn(&str) -> bool) -> Self
    where
        F: Fn() -> anyhow::Result<Arc<dyn Provider>> + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
            aliases: Vec::new(),
            can_handle_model,
            priority: 0,
        }
    }

    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| a.to_lowercase()).collect();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("No providers are registered")]
    Empty,

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Failed to construct provider {name}: {message}")]
    Construction { name: String, message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderInfo {
    pub name: String,
    pub display_name: String,
    pub aliases: Vec<String>,
    pub priority: i32,
}

#[derive(Default)]
pub struct ProviderRegistry {
    /// Registration order is significant.
    registrations: Vec<(String, ProviderRegistration)>,
    instances: Mutex<HashMap<String, Arc<dyn Provider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the registration for `name` (case-insensitive).
    /// A replaced registration keeps its original position.
    pub fn register(&mut self, name: &str, registration: ProviderRegistration) {
        let key = name.to_lowercase();
        self.evict(&key);
        match self.registrations.iter_mut().find(|(n, _)| *n == key) {
            Some(slot) => slot.1 = registration,
            None => self.registrations.push((key, registration)),
        }
    }

    fn evict(&self, name: &str) {
        self.instances
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name);
    }

    /// Name of the first-registered backend.
    pub fn baseline(&self) -> Option<&str> {
        self.registrations.first().map(|(name, _)| name.as_str())
    }

    fn by_priority(&self) -> Vec<&(String, ProviderRegistration)> {
        let mut ordered: Vec<_> = self.registrations.iter().collect();
        // Stable sort: equal priorities keep registration order.
        ordered.sort_by_key(|(_, r)| Reverse(r.priority));
        ordered
    }

    /// Backend name for `model`. Only fails when nothing is registered.
    pub fn resolve_provider_name(&self, model: &str) -> Result<String, RegistryError> {
        let model = model.trim().to_lowercase();
        let ordered = self.by_priority();

        if let Some((name, _)) = ordered.iter().find(|(_, r)| (r.can_handle_model)(&model)) {
            return Ok(name.clone());
        }
        if let Some((name, _)) = ordered
            .iter()
            .find(|(name, _)| model.starts_with(&format!("{}-", name)))
        {
            return Ok(name.clone());
        }

        let baseline = self.baseline().ok_or(RegistryError::Empty)?;
        if !model.is_empty() {
            debug!(model = %model, baseline, "No provider claims model; using baseline");
        }
        Ok(baseline.to_string())
    }

    /// Cached instance for a registered name.
    fn instantiate(&self, name: &str) -> Result<Arc<dyn Provider>, RegistryError> {
        if let Some(provider) = self
            .instances
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
        {
            return Ok(Arc::clone(provider));
        }

        let (_, registration) = self
            .registrations
            .iter()
            .find(|(n, _)| n == name)
            .ok_or_else(|| RegistryError::UnknownProvider(name.to_string()))?;
        let provider = (registration.factory)().map_err(|e| RegistryError::Construction {
            name: name.to_string(),
            message: format!("{:#}", e),
        })?;

        // Concurrent first use may construct twice; the first insert wins.
        let mut instances = self.instances.lock().unwrap_or_else(|e| e.into_inner());
        Ok(Arc::clone(instances.entry(name.to_string()).or_insert(provider)))
    }

    /// Backend instance for `model`, falling back to the baseline when the
    /// routed backend cannot be constructed.
    pub fn resolve_provider(&self, model: &str) -> Result<Arc<dyn Provider>, RegistryError> {
        let name = self.resolve_provider_name(model)?;
        match self.instantiate(&name) {
            Ok(provider) => Ok(provider),
            Err(e) => {
                let baseline = self.baseline().ok_or(RegistryError::Empty)?;
                if name == baseline {
                    return Err(e);
                }
                warn!(provider = %name, error = %e, "Provider unavailable; falling back to {}", baseline);
                self.instantiate(baseline)
            }
        }
    }

    /// Lookup by registered name, then by alias.
    pub fn get_provider_by_name(&self, name: &str) -> Option<Arc<dyn Provider>> {
        let key = name.trim().to_lowercase();
        let (name, _) = self
            .registrations
            .iter()
            .find(|(n, _)| *n == key)
            .or_else(|| self.registrations.iter().find(|(_, r)| r.aliases.contains(&key)))?;
        match self.instantiate(name) {
            Ok(provider) => Some(provider),
            Err(e) => {
                warn!(provider = %name, error = %e, "Provider lookup failed");
                None
            }
        }
    }

    /// Status of every registered backend. One failing backend reports
    /// "not installed" without affecting the others.
    pub async fn check_all_providers(&self) -> BTreeMap<String, InstallationStatus> {
        let checks = self.registrations.iter().map(|(name, _)| async move {
            let status = match self.instantiate(name) {
                Ok(provider) => provider.check_installation().await,
                Err(e) => {
                    warn!(provider = %name, error = %e, "Skipping installation check");
                    InstallationStatus::not_installed()
                }
            };
            (name.clone(), status)
        });
        join_all(checks).await.into_iter().collect()
    }

    pub async fn check_installation(&self, name: &str) -> Option<InstallationStatus> {
        let provider = self.get_provider_by_name(name)?;
        Some(provider.check_installation().await)
    }

    /// Every declared model, in registration order. Ids are backend-qualified.
    pub fn all_available_models(&self) -> Vec<ModelDefinition> {
        self.registrations
            .iter()
            .filter_map(|(name, _)| self.instantiate(name).ok())
            .flat_map(|provider| provider.models())
            .collect()
    }

    /// Unknown models are assumed to accept images.
    pub fn model_supports_vision(&self, model: &str) -> bool {
        let Ok(provider) = self.resolve_provider(model) else {
            return true;
        };
        let query = model.trim().to_lowercase();
        provider
            .models()
            .iter()
            .find(|m| m.matches(&query, provider.vendor_prefix()))
            .map(|m| m.supports_vision)
            .unwrap_or(true)
    }

    /// Registered backends sorted by name.
    pub fn list_providers(&self) -> Vec<ProviderInfo> {
        let mut list: Vec<_> = self
            .registrations
            .iter()
            .map(|(name, registration)| ProviderInfo {
                name: name.clone(),
                display_name: self
                    .instantiate(name)
                    .map(|p| p.display_name().to_string())
                    .unwrap_or_else(|_| name.clone()),
                aliases: registration.aliases.clone(),
                priority: registration.priority,
            })
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    /// Resolve the backend for `options.model` and run it.
    pub fn execute(&self, options: ExecuteOptions) -> Result<ProviderStream, RegistryError> {
        let provider = self.resolve_provider(&options.model)?;
        Ok(super::execute(provider, options))
    }
}

/// Register the built-in backends. Call once at startup.
///
/// Claude is registered first and is the baseline.
pub fn register_all_backends(registry: &mut ProviderRegistry, config: &Config) {
    let settings = config.provider_settings(claude::NAME);
    registry.register(
        claude::NAME,
        ProviderRegistration::new(
            move || Ok(Arc::new(claude::ClaudeProvider::new(settings.clone())) as Arc<dyn Provider>),
            claude::can_handle_model,
        )
        .with_aliases(&["anthropic", "claude-code"]),
    );

    let settings = config.provider_settings(cursor::NAME);
    registry.register(
        cursor::NAME,
        ProviderRegistration::new(
            move || Ok(Arc::new(cursor::CursorProvider::new(settings.clone())) as Arc<dyn Provider>),
            cursor::can_handle_model,
        )
        .with_aliases(&["cursor-agent"])
        .with_priority(10),
    );

    let settings = config.provider_settings(codex::NAME);
    registry.register(
        codex::NAME,
        ProviderRegistration::new(
            move || Ok(Arc::new(codex::CodexProvider::new(settings.clone())) as Arc<dyn Provider>),
            codex::can_handle_model,
        )
        .with_aliases(&["openai"])
        .with_priority(5),
    );

    let settings = config.provider_settings(opencode::NAME);
    registry.register(
        opencode::NAME,
        ProviderRegistration::new(
            move || {
                Ok(Arc::new(opencode::OpenCodeProvider::new(settings.clone())) as Arc<dyn Provider>)
            },
            opencode::can_handle_model,
        )
        .with_aliases(&["open-code"])
        .with_priority(3),
    );

    debug!(
        providers = ?registry.registrations.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(),
        "Registered backends"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        register_all_backends(&mut registry, &Config::new(std::env::temp_dir()));
        registry
    }

    fn unbuildable(can_handle_model: fn(&str) -> bool) -> ProviderRegistration {
        ProviderRegistration::new(|| anyhow::bail!("missing dependency"), can_handle_model)
    }

    #[test]
    fn test_routes_builtin_models() {
        let registry = defaults();
        let cases = [
            ("claude-sonnet-4-5", "claude"),
            ("anthropic/claude-opus-4-1", "claude"),
            ("cursor-sonnet-4.5", "cursor"),
            ("CURSOR-AUTO", "cursor"),
            ("gpt-5", "codex"),
            ("o3-mini", "codex"),
            ("codex-gpt-5.1-codex", "codex"),
            ("opencode/big-pickle", "opencode"),
            ("opencode-grok-code", "opencode"),
            ("sonnet", "claude"),
        ];
        for (model, expected) in cases {
            assert_eq!(registry.resolve_provider_name(model).unwrap(), expected, "{model}");
            // Repeated lookups are stable.
            assert_eq!(registry.resolve_provider_name(model).unwrap(), expected, "{model}");
        }
    }

    #[test]
    fn test_priority_beats_registration_order() {
        let mut registry = ProviderRegistry::new();
        registry.register("low", unbuildable(|_| true));
        registry.register("high", unbuildable(|_| true).with_priority(10));
        registry.register("tied", unbuildable(|_| true));
        assert_eq!(registry.resolve_provider_name("anything").unwrap(), "high");

        // Equal priority falls back to registration order.
        registry.register("high", unbuildable(|_| true));
        assert_eq!(registry.resolve_provider_name("anything").unwrap(), "low");
    }

    #[test]
    fn test_unclaimed_models_use_prefix_then_baseline() {
        let mut registry = ProviderRegistry::new();
        registry.register("first", unbuildable(|_| false));
        registry.register("Other", unbuildable(|_| false));
        assert_eq!(registry.resolve_provider_name("other-model-x").unwrap(), "other");
        assert_eq!(registry.resolve_provider_name("mystery-model").unwrap(), "first");
        assert_eq!(registry.resolve_provider_name("").unwrap(), "first");
        assert!(matches!(
            ProviderRegistry::new().resolve_provider_name("x"),
            Err(RegistryError::Empty)
        ));
    }

    #[test]
    fn test_register_is_an_upsert() {
        let mut registry = defaults();
        registry.register("CURSOR", unbuildable(|m| m == "special"));
        let names: Vec<_> = registry.list_providers().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["claude", "codex", "cursor", "opencode"]);
        assert_eq!(registry.resolve_provider_name("special").unwrap(), "cursor");
    }

    #[test]
    fn test_construction_failure_falls_back_to_baseline() {
        let mut registry = defaults();
        registry.register("cursor", unbuildable(cursor::can_handle_model).with_priority(10));
        let provider = registry.resolve_provider("cursor-auto").unwrap();
        assert_eq!(provider.name(), "claude");
        assert!(registry.get_provider_by_name("cursor").is_none());

        let mut broken = ProviderRegistry::new();
        broken.register("only", unbuildable(|_| true));
        assert!(matches!(
            broken.resolve_provider("x"),
            Err(RegistryError::Construction { .. })
        ));
    }

    #[test]
    fn test_lookup_by_alias_and_cached_instances() {
        let registry = defaults();
        let by_alias = registry.get_provider_by_name("OpenAI").unwrap();
        assert_eq!(by_alias.name(), "codex");
        let again = registry.get_provider_by_name("codex").unwrap();
        assert!(Arc::ptr_eq(&by_alias, &again));
        assert!(registry.get_provider_by_name("gemini").is_none());
    }

    #[test]
    fn test_models_and_vision() {
        let registry = defaults();
        let models = registry.all_available_models();
        assert!(models.iter().any(|m| m.id == "cursor-grok" && m.provider == "cursor"));
        assert!(models.iter().any(|m| m.id == "opencode-big-pickle"));
        assert!(registry.model_supports_vision("claude-sonnet-4-5"));
        assert!(!registry.model_supports_vision("cursor-grok"));
        assert!(!registry.model_supports_vision("opencode/big-pickle"));
        assert!(registry.model_supports_vision("cursor-some-future-model"));
    }

    #[tokio::test]
    async fn test_check_all_providers_survives_broken_backend() {
        let mut registry = ProviderRegistry::new();
        registry.register("broken", unbuildable(|_| true));
        let statuses = registry.check_all_providers().await;
        assert_eq!(statuses.get("broken"), Some(&InstallationStatus::not_installed()));
        assert!(registry.check_installation("nope").await.is_none());
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use crate::backend::error::ErrorCode;
        use crate::backend::events::ProviderMessage;
        use futures::StreamExt;
        use std::path::{Path, PathBuf};
        use std::time::Duration;

        fn fake_opencode(dir: &Path, body: &str) -> PathBuf {
            use std::os::unix::fs::PermissionsExt;
            let path = dir.join("opencode");
            std::fs::write(&path, format!("#!/bin/sh\ncat > /dev/null\n{}", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn registry_with(cli: PathBuf, workdir: &Path) -> ProviderRegistry {
            let mut config = Config::new(workdir.to_path_buf());
            config.cli_paths.insert("opencode".to_string(), cli);
            let mut registry = ProviderRegistry::new();
            register_all_backends(&mut registry, &config);
            registry
        }

        #[tokio::test]
        async fn test_clean_run_end_to_end() {
            let dir = tempfile::tempdir().unwrap();
            let cli = fake_opencode(
                dir.path(),
                "echo '{\"type\":\"init\",\"session_id\":\"s1\"}'\n\
                 echo '{\"type\":\"text-delta\",\"text\":\"Hi\"}'\n\
                 echo '{\"type\":\"finish\",\"success\":true}'\n",
            );
            let registry = registry_with(cli, dir.path());
            let mut options = ExecuteOptions::new("opencode-big-pickle", "Say hi");
            options.cwd = Some(dir.path().to_path_buf());

            let stream = tokio_test::assert_ok!(registry.execute(options));
            let messages: Vec<_> = stream.collect().await;
            let messages: Vec<ProviderMessage> = messages.into_iter().map(|m| m.unwrap()).collect();
            assert_eq!(
                messages,
                vec![
                    ProviderMessage::assistant_text("Hi").with_session_id(Some("s1")),
                    ProviderMessage::success(None).with_session_id(Some("s1")),
                ]
            );
        }

        #[tokio::test]
        async fn test_rate_limit_ends_stream_with_classified_error() {
            let dir = tempfile::tempdir().unwrap();
            let cli = fake_opencode(
                dir.path(),
                "echo '{\"type\":\"init\",\"session_id\":\"s1\"}'\n\
                 echo '429 Too Many Requests' >&2\n\
                 exit 1\n",
            );
            let registry = registry_with(cli, dir.path());
            let stream = registry
                .execute(ExecuteOptions::new("opencode/grok-code", "hi"))
                .unwrap();
            let items: Vec<_> = stream.collect().await;
            assert_eq!(items.len(), 1);
            let err = items[0].as_ref().unwrap_err();
            assert_eq!(err.code, ErrorCode::RateLimited);
            assert!(err.recoverable);
        }

        #[tokio::test]
        async fn test_cancel_mid_run_ends_without_error() {
            let dir = tempfile::tempdir().unwrap();
            let cli = fake_opencode(
                dir.path(),
                "echo '{\"type\":\"init\",\"session_id\":\"s1\"}'\n\
                 echo '{\"type\":\"text-delta\",\"text\":\"Hi\"}'\n\
                 echo 'Error: connection reset' >&2\n\
                 sleep 30\n\
                 exit 1\n",
            );
            let registry = registry_with(cli, dir.path());
            let mut options = ExecuteOptions::new("opencode/big-pickle", "Say hi");
            let cancel = options.cancel.clone();
            options.cwd = Some(dir.path().to_path_buf());
            let mut stream = registry.execute(options).unwrap();

            let first = stream.next().await.unwrap().unwrap();
            assert_eq!(first, ProviderMessage::assistant_text("Hi").with_session_id(Some("s1")));

            cancel.cancel();
            let rest = tokio::time::timeout(Duration::from_secs(5), stream.collect::<Vec<_>>())
                .await
                .expect("stream should end promptly after cancel");
            assert!(rest.iter().all(|item| item.is_ok()), "{rest:?}");
            assert!(
                !rest.iter().flatten().any(|m| matches!(m, ProviderMessage::Error { .. })),
                "{rest:?}"
            );
        }

        #[tokio::test]
        async fn test_cancel_before_session_discards_held_messages() {
            let dir = tempfile::tempdir().unwrap();
            let cli = fake_opencode(
                dir.path(),
                "echo '{\"type\":\"text-delta\",\"text\":\"Thinking out loud\"}'\n\
                 sleep 30\n\
                 exit 1\n",
            );
            let registry = registry_with(cli, dir.path());
            let mut options = ExecuteOptions::new("opencode/big-pickle", "Say hi");
            let cancel = options.cancel.clone();
            options.cwd = Some(dir.path().to_path_buf());
            let stream = registry.execute(options).unwrap();

            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                cancel.cancel();
            });
            let items = tokio::time::timeout(Duration::from_secs(5), stream.collect::<Vec<_>>())
                .await
                .expect("stream should end promptly after cancel");
            assert!(items.is_empty(), "{items:?}");
        }

        #[tokio::test]
        async fn test_missing_override_reports_not_installed() {
            let dir = tempfile::tempdir().unwrap();
            let mut config = Config::new(dir.path().to_path_buf());
            config
                .cli_paths
                .insert("cursor".to_string(), dir.path().join("missing"));
            let provider = cursor::CursorProvider::new(config.provider_settings("cursor"));
            // PATH may hold a real cursor-agent; only assert the override was not used.
            let status = provider.check_installation().await;
            assert_ne!(status.path, Some(dir.path().join("missing").display().to_string()));
        }
    }
}
