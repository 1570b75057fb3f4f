//! API request and response types.

use serde::{Deserialize, Serialize};

use crate::backend::discovery::InstallationStatus;
use crate::backend::registry::ProviderInfo;

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Number of registered backends
    pub providers: usize,
}

/// Query for `GET /api/models/resolve`.
#[derive(Debug, Clone, Deserialize)]
pub struct ResolveQuery {
    #[serde(default)]
    pub model: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolveResponse {
    pub model: String,
    pub provider: String,
    pub supports_vision: bool,
}

/// A registered backend together with its current installation status.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderSummary {
    #[serde(flatten)]
    pub info: ProviderInfo,
    pub status: InstallationStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatusResponse {
    pub name: String,
    pub status: InstallationStatus,
}

/// Terminal SSE payload for `POST /api/execute`.
#[derive(Debug, Clone, Serialize)]
pub struct DonePayload {
    pub execution_id: String,
    pub messages: usize,
    pub failed: bool,
}
