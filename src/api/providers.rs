//! Provider and model discovery API.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use crate::backend::models::ModelDefinition;

use super::routes::AppState;
use super::types::{ProviderStatusResponse, ProviderSummary, ResolveQuery, ResolveResponse};

/// List registered backends with a fresh installation snapshot for each.
pub async fn list_providers(State(state): State<Arc<AppState>>) -> Json<Vec<ProviderSummary>> {
    let mut statuses = state.registry.check_all_providers().await;
    let providers = state
        .registry
        .list_providers()
        .into_iter()
        .map(|info| ProviderSummary {
            status: statuses.remove(&info.name).unwrap_or_default(),
            info,
        })
        .collect();
    Json(providers)
}

pub async fn get_provider(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<ProviderStatusResponse>, (StatusCode, String)> {
    let provider = state
        .registry
        .get_provider_by_name(&name)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Unknown provider: {}", name)))?;
    let status = provider.check_installation().await;
    Ok(Json(ProviderStatusResponse {
        name: provider.name().to_string(),
        status,
    }))
}

pub async fn list_models(State(state): State<Arc<AppState>>) -> Json<Vec<ModelDefinition>> {
    Json(state.registry.all_available_models())
}

pub async fn resolve_model(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ResolveQuery>,
) -> Result<Json<ResolveResponse>, (StatusCode, String)> {
    let provider = state
        .registry
        .resolve_provider_name(&query.model)
        .map_err(|e| (StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;
    Ok(Json(ResolveResponse {
        supports_vision: state.registry.model_supports_vision(&query.model),
        model: query.model,
        provider,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::registry::{register_all_backends, ProviderRegistry};
    use crate::config::Config;

    fn state() -> Arc<AppState> {
        let config = Config::new(std::env::temp_dir());
        let mut registry = ProviderRegistry::new();
        register_all_backends(&mut registry, &config);
        Arc::new(AppState { config, registry })
    }

    #[tokio::test]
    async fn test_resolve_model() {
        let Json(resolved) = resolve_model(
            State(state()),
            Query(ResolveQuery {
                model: "cursor-grok".to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(resolved.provider, "cursor");
        assert!(!resolved.supports_vision);
    }

    #[tokio::test]
    async fn test_unknown_provider_is_not_found() {
        let err = get_provider(State(state()), Path("gemini".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_models_cover_every_backend() {
        let Json(models) = list_models(State(state())).await;
        for provider in ["claude", "cursor", "codex", "opencode"] {
            assert!(models.iter().any(|m| m.provider == provider), "{provider}");
        }
    }
}
