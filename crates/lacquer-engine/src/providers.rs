//! The seam between a workflow's declared `agents.<name>.provider` and a
//! concrete [`lacquer_agent::ModelProvider`] implementation. Concrete
//! providers (OpenAI, Anthropic, ...) are out of scope for this core
//! (spec.md §1's non-goals); the host embedding the engine supplies one
//! `Arc<dyn ModelProvider>` per provider name at construction time.

use lacquer_agent::ModelProvider;
use lacquer_core::error::{LacquerError, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Looks up a provider by the name an `agents:` block declares (e.g.
/// `openai`, `anthropic`), not by agent name — several agents in the
/// same workflow may share one provider instance.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ModelProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider_name: impl Into<String>, provider: Arc<dyn ModelProvider>) {
        self.providers.insert(provider_name.into(), provider);
    }

    pub fn resolve(&self, provider_name: &str) -> Result<Arc<dyn ModelProvider>> {
        self.providers
            .get(provider_name)
            .cloned()
            .ok_or_else(|| LacquerError::ValidationError {
                message: format!("no model provider registered for '{provider_name}'"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lacquer_agent::{ModelRequest, ModelResponse};
    use async_trait::async_trait;

    struct StubProvider;

    #[async_trait]
    impl ModelProvider for StubProvider {
        async fn complete(&self, _request: ModelRequest) -> Result<ModelResponse> {
            unimplemented!()
        }
    }

    #[test]
    fn unregistered_provider_is_a_validation_error() {
        let registry = ProviderRegistry::new();
        let err = registry.resolve("openai").unwrap_err();
        assert!(matches!(err, LacquerError::ValidationError { .. }));
    }

    #[test]
    fn registered_provider_resolves() {
        let mut registry = ProviderRegistry::new();
        registry.register("openai", Arc::new(StubProvider));
        assert!(registry.resolve("openai").is_ok());
    }
}
