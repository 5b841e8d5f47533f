pub mod client;
pub mod error;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub use client::AnthropicClient;
pub use error::ProviderError;
pub use types::{Completion, ModelId};

/// An opaque text-generation backend: `(model, prompt) -> text, usage`.
#[async_trait]
pub trait TextProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, model: &str, prompt: &str) -> Result<Completion, ProviderError>;
}

/// Providers available to the generator, keyed by provider name.
#[derive(Clone, Default)]
pub struct ProviderSet {
    providers: HashMap<String, Arc<dyn TextProvider>>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its own name, replacing any previous one.
    pub fn register(&mut self, provider: Arc<dyn TextProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn with(mut self, provider: Arc<dyn TextProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TextProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Run one provider call under an overall wall-clock deadline.
pub async fn complete_with_timeout(
    provider: &dyn TextProvider,
    model: &ModelId,
    prompt: &str,
    deadline: Duration,
) -> Result<Completion, ProviderError> {
    match tokio::time::timeout(deadline, provider.complete(&model.model, prompt)).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout { after: deadline }),
    }
}
