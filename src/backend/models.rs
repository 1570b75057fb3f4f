//! Static capability declarations shared by all backends.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Basic,
    Standard,
    Premium,
}

/// A model a backend declares it can run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDefinition {
    /// Public, backend-qualified identifier (e.g. "cursor-sonnet-4.5")
    pub id: String,
    /// Human-readable label
    pub name: String,
    /// What the backend CLI actually expects after `--model`
    pub model_string: String,
    /// Name of the backend that serves this model
    pub provider: String,
    pub supports_tools: bool,
    pub supports_vision: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<ModelTier>,
    #[serde(default)]
    pub default: bool,
}

impl ModelDefinition {
    pub fn new(
        provider: &str,
        id: &str,
        name: &str,
        model_string: &str,
        tier: ModelTier,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            model_string: model_string.to_string(),
            provider: provider.to_string(),
            supports_tools: true,
            supports_vision: false,
            tier: Some(tier),
            default: false,
        }
    }

    pub fn vision(mut self) -> Self {
        self.supports_vision = true;
        self
    }

    pub fn as_default(mut self) -> Self {
        self.default = true;
        self
    }

    /// Does `query` (already lowercased) name this model?
    ///
    /// Tries the public id, the CLI model string, and finally the id with the
    /// backend's vendor prefix stripped (so "sonnet-4.5" finds "cursor-sonnet-4.5").
    pub fn matches(&self, query: &str, vendor_prefix: Option<&str>) -> bool {
        let id = self.id.to_lowercase();
        let model_string = self.model_string.to_lowercase();
        if id == query || model_string == query {
            return true;
        }
        let bare_query = vendor_prefix
            .and_then(|prefix| query.strip_prefix(prefix))
            .unwrap_or(query);
        let bare_id = vendor_prefix
            .and_then(|prefix| id.strip_prefix(prefix))
            .unwrap_or(&id);
        bare_id == bare_query
            || model_string == bare_query
            || model_string.rsplit('/').next() == Some(bare_query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_by_id_model_string_and_bare_suffix() {
        let model = ModelDefinition::new(
            "cursor",
            "cursor-sonnet-4.5",
            "Claude Sonnet 4.5",
            "sonnet-4.5",
            ModelTier::Premium,
        );
        assert!(model.matches("cursor-sonnet-4.5", Some("cursor-")));
        assert!(model.matches("sonnet-4.5", Some("cursor-")));
        assert!(!model.matches("cursor-gpt-5", Some("cursor-")));
    }

    #[test]
    fn matches_model_string_with_provider_path() {
        let model = ModelDefinition::new(
            "opencode",
            "opencode-big-pickle",
            "Big Pickle",
            "opencode/big-pickle",
            ModelTier::Basic,
        );
        assert!(model.matches("opencode/big-pickle", Some("opencode-")));
        assert!(model.matches("big-pickle", Some("opencode-")));
    }
}
