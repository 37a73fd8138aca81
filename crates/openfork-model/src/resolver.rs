// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;

use crate::provider::ChatProvider;

/// Catalog metadata for a resolvable model.
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub id: String,
    pub context_window: u32,
    pub max_tokens: u32,
}

/// Resolves `(provider_id, model_id)` pairs to provider instances and bare
/// model names to catalog metadata.
pub trait ProviderResolver: Send + Sync {
    fn resolve(&self, provider_id: &str, model_id: &str) -> anyhow::Result<Arc<dyn ChatProvider>>;

    /// Resolve a bare model name to its owning provider key and metadata.
    fn resolve_model(&self, model: &str) -> anyhow::Result<(String, ModelInfo)>;
}

/// Fixed-table resolver built at startup.  Sufficient for tests and for
/// embedders that construct their provider set up front.
pub struct StaticResolver {
    providers: HashMap<String, Arc<dyn ChatProvider>>,
    models: HashMap<String, (String, ModelInfo)>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self { providers: HashMap::new(), models: HashMap::new() }
    }

    pub fn with_provider(mut self, key: impl Into<String>, provider: Arc<dyn ChatProvider>) -> Self {
        self.providers.insert(key.into(), provider);
        self
    }

    pub fn with_model(
        mut self,
        provider_key: impl Into<String>,
        info: ModelInfo,
    ) -> Self {
        self.models.insert(info.id.clone(), (provider_key.into(), info));
        self
    }
}

impl Default for StaticResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderResolver for StaticResolver {
    fn resolve(&self, provider_id: &str, _model_id: &str) -> anyhow::Result<Arc<dyn ChatProvider>> {
        self.providers
            .get(provider_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown provider: {provider_id}"))
    }

    fn resolve_model(&self, model: &str) -> anyhow::Result<(String, ModelInfo)> {
        self.models
            .get(model)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown model: {model}"))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedProvider;

    #[test]
    fn resolve_known_provider() {
        let r = StaticResolver::new()
            .with_provider("mock", Arc::new(ScriptedProvider::always_text("x")));
        assert!(r.resolve("mock", "any").is_ok());
    }

    #[test]
    fn resolve_unknown_provider_errors() {
        let r = StaticResolver::new();
        assert!(r.resolve("nope", "m").is_err());
    }

    #[test]
    fn resolve_model_returns_metadata() {
        let r = StaticResolver::new().with_model(
            "mock",
            ModelInfo { id: "small".into(), context_window: 128_000, max_tokens: 16_384 },
        );
        let (key, info) = r.resolve_model("small").unwrap();
        assert_eq!(key, "mock");
        assert_eq!(info.context_window, 128_000);
        assert_eq!(info.max_tokens, 16_384);
    }
}
